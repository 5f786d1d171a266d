use axum::{extract::State, Json};
use tower_sessions::Session;

use crate::app::AppState;
use crate::auth::{require_login, take_flashes};
use crate::db;
use crate::error::ApiResult;
use crate::models::{AccountPage, Trade};

/// The account page. Both portfolio halves come from the cache when fresh
/// and are rebuilt from the ledger tables on a miss.
pub async fn get_account(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<AccountPage>> {
    let user = require_login(&session).await?;
    let messages = take_flashes(&session).await?;

    let currencies = match state.cache.currencies(&user.username).await {
        Some(currencies) => currencies,
        None => {
            // Refill while holding the pool lock; trades evict under it too
            let conn = state.pool.0.lock().await;
            let currencies = db::list_balances(&conn, user.account_id)?;
            state
                .cache
                .store_currencies(&user.username, currencies.clone())
                .await;
            currencies
        }
    };

    let stocks = match state.cache.stocks(&user.username).await {
        Some(stocks) => stocks,
        None => {
            let conn = state.pool.0.lock().await;
            let stocks = db::list_open_positions(&conn, user.account_id)?;
            state.cache.store_stocks(&user.username, stocks.clone()).await;
            stocks
        }
    };

    Ok(Json(AccountPage {
        messages,
        currencies,
        stocks,
    }))
}

/// The account's trades, newest first.
pub async fn get_transaction_history(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<Vec<Trade>>> {
    let user = require_login(&session).await?;
    let conn = state.pool.0.lock().await;
    Ok(Json(db::list_trades(&conn, user.account_id)?))
}
