use axum::{extract::State, response::Redirect, Form};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tower_sessions::Session;

use crate::app::AppState;
use crate::auth::{hash_password, start_session, Credentials, SessionUser, ACCOUNT_PATH};
use crate::db;
use crate::error::{ApiError, ApiResult};

const MAX_USERNAME_LEN: usize = 150;
const MIN_PASSWORD_LEN: usize = 8;

/// Registers a user, opens their account with the starting balance in every
/// catalog currency, and logs them in.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(credentials): Form<Credentials>,
) -> ApiResult<Redirect> {
    let username = credentials.username.trim().to_string();
    validate_credentials(&username, &credentials.password)?;
    let password_hash = hash_password(&credentials.password)?;

    let user = {
        let mut conn = state.pool.0.lock().await;
        open_account(
            &mut conn,
            &username,
            &password_hash,
            state.config.starting_balance,
        )?
    };

    tracing::info!("Registered user {}", user.username);
    start_session(&session, user).await?;
    Ok(Redirect::to(ACCOUNT_PATH))
}

fn validate_credentials(username: &str, password: &str) -> ApiResult<()> {
    let valid_chars = username
        .chars()
        .all(|c| c.is_alphanumeric() || "@.+-_".contains(c));
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN || !valid_chars {
        return Err(ApiError::BadRequest(format!(
            "Username must be 1-{} characters: letters, digits and @/./+/-/_ only",
            MAX_USERNAME_LEN
        )));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Creates the user and account and grants the starting balance, all or nothing.
pub fn open_account(
    conn: &mut Connection,
    username: &str,
    password_hash: &str,
    starting_balance: Decimal,
) -> ApiResult<SessionUser> {
    let tx = conn.transaction()?;
    if db::username_taken(&tx, username)? {
        return Err(ApiError::Conflict(format!(
            "Username {} is already taken",
            username
        )));
    }

    let account_id = db::create_user(&tx, username, password_hash)?;
    for currency in db::list_currencies(&tx)? {
        db::save_balance(&tx, account_id, currency.id, starting_balance)?;
    }
    let user = db::find_user(&tx, username)?
        .ok_or_else(|| ApiError::Internal(format!("User {} vanished after insert", username)))?;
    tx.commit()?;

    Ok(SessionUser {
        user_id: user.id,
        account_id,
        username: user.username,
    })
}
