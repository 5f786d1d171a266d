use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    response::Redirect,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::app::AppState;
use crate::db;
use crate::error::{ApiError, ApiResult};

const SESSION_KEY: &str = "SESSION";
const FLASH_KEY: &str = "FLASH";

pub const ACCOUNT_PATH: &str = "/stock/account";
pub const STOCK_LIST_PATH: &str = "/stock/list";

/// Identity kept in the session once a user has logged in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: i64,
    pub account_id: i64,
    pub username: String,
}

/// Username/password form used by login and registration.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Returns the logged-in user, or 401 if there is none.
pub async fn require_login(session: &Session) -> ApiResult<SessionUser> {
    session
        .get::<SessionUser>(SESSION_KEY)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized access".to_string()))
}

/// Stores `user` in a fresh session id.
pub async fn start_session(session: &Session, user: SessionUser) -> ApiResult<()> {
    session.cycle_id().await?;
    session.insert(SESSION_KEY, user).await?;
    Ok(())
}

/// Queues a message for the next account page view.
pub async fn flash(session: &Session, message: String) -> ApiResult<()> {
    let mut messages: Vec<String> = session.get(FLASH_KEY).await?.unwrap_or_default();
    messages.push(message);
    session.insert(FLASH_KEY, messages).await?;
    Ok(())
}

/// Drains queued messages.
pub async fn take_flashes(session: &Session) -> ApiResult<Vec<String>> {
    Ok(session
        .remove::<Vec<String>>(FLASH_KEY)
        .await?
        .unwrap_or_default())
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Log in with a username and password.
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(credentials): Form<Credentials>,
) -> ApiResult<Redirect> {
    let user = {
        let conn = state.pool.0.lock().await;
        db::find_user(&conn, credentials.username.trim())?
    };

    let user = match user {
        Some(user) if verify_password(&credentials.password, &user.password_hash) => user,
        _ => {
            tracing::info!("Failed login for {}", credentials.username);
            return Err(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }
    };

    start_session(
        &session,
        SessionUser {
            user_id: user.id,
            account_id: user.account_id,
            username: user.username.clone(),
        },
    )
    .await?;
    tracing::info!("User {} logged in", user.username);

    Ok(Redirect::to(ACCOUNT_PATH))
}

/// Logout the user by removing the session.
pub async fn logout(session: Session) -> ApiResult<Redirect> {
    session.flush().await?;
    Ok(Redirect::to(STOCK_LIST_PATH))
}

/// Get user data from the session.
pub async fn get_user_data(session: Session) -> ApiResult<Json<SessionUser>> {
    Ok(Json(require_login(&session).await?))
}
