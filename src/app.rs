use std::sync::Arc;

use axum::http::header::{ACCESS_CONTROL_ALLOW_CREDENTIALS, CONTENT_TYPE, COOKIE};
use axum::http::{HeaderValue, Method};
use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use thiserror::Error;
use time::Duration;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::{self, TraceLayer};
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_rusqlite_store::RusqliteStore;
use tracing::Level;

use crate::auth::{get_user_data, login, logout};
use crate::cache::PortfolioCache;
use crate::catalog::{Catalog, CatalogError};
use crate::config::Config;
use crate::db::{self, DatabasePool};
use crate::handlers::{
    accounts::register,
    portfolio::{get_account, get_transaction_history},
    stocks::{stock_detail, stock_list},
    trading::{redirect_to_detail, stock_buy, stock_sell},
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub cache: Arc<PortfolioCache>,
    pub config: Arc<Config>,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database setup failed: {0}")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Opens the database, applies the schema, seeds the catalog if configured.
pub fn build_state(config: Config) -> Result<AppState, StartupError> {
    let mut conn = Connection::open(&config.db_path)?;
    db::init_schema(&conn)?;

    if let Some(path) = &config.catalog_path {
        let report = Catalog::from_path(path)?.seed(&mut conn)?;
        tracing::info!(
            "Catalog {} seeded: {} new currencies, {} new stocks",
            path,
            report.currencies,
            report.stocks
        );
    }

    Ok(AppState {
        pool: DatabasePool(Arc::new(Mutex::new(conn))),
        cache: Arc::new(PortfolioCache::new(config.portfolio_cache_ttl)),
        config: Arc::new(config),
    })
}

/// Session store backed by its own SQLite file.
pub async fn session_store(path: &str) -> Result<RusqliteStore, Box<dyn std::error::Error>> {
    let conn = Connection::open(path)?;
    let store = RusqliteStore::new(conn.into());
    store.migrate().await?;
    Ok(store)
}

pub fn session_layer(store: RusqliteStore) -> SessionManagerLayer<RusqliteStore> {
    SessionManagerLayer::new(store)
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(Duration::days(7)))
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods(vec![Method::GET, Method::POST])
        .allow_headers(vec![ACCESS_CONTROL_ALLOW_CREDENTIALS, CONTENT_TYPE, COOKIE]);

    match frontend_url.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(
                "FRONTEND_URL {:?} is not a valid origin, cross-origin requests are disabled",
                frontend_url
            );
            cors
        }
    }
}

pub fn app_router(state: AppState, sessions: SessionManagerLayer<RusqliteStore>) -> Router {
    let cors = cors_layer(&state.config.frontend_url);

    Router::new()
        // Stock routes
        .route("/stock/list", get(stock_list))
        .route("/stock/detail/:pk", get(stock_detail))
        .route("/stock/buy/:pk", get(redirect_to_detail).post(stock_buy))
        .route("/stock/sell/:pk", get(redirect_to_detail).post(stock_sell))
        // Portfolio routes
        .route("/stock/account", get(get_account))
        .route("/stock/transactions", get(get_transaction_history))
        // Auth routes
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/user", get(get_user_data))
        .with_state(state)
        // Session, CORS, and tracing layers
        .layer(sessions)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
}
