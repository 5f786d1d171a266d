use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use rusqlite::{Connection, TransactionBehavior};
use tower_sessions::Session;

use crate::app::AppState;
use crate::auth::{flash, require_login, SessionUser, ACCOUNT_PATH};
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::forms::{BuySellForm, BuySellInput, FormErrors, FormState};
use crate::handlers::stocks::stock_page;
use crate::ledger::{self, TradeOutcome};
use crate::models::{Stock, StockPage, Trade, TradeSide};

/// Result of running a trade against the database.
#[derive(Debug)]
pub enum TradeResult {
    /// Committed. Carries the message to flash.
    Completed(String),
    /// Nothing was written. Carries the detail page to re-render.
    Rejected(StockPage),
}

/// Buy a stock. The form body carries `amount` and `price`.
#[axum::debug_handler]
pub async fn stock_buy(
    State(state): State<AppState>,
    session: Session,
    Path(pk): Path<i64>,
    Form(input): Form<BuySellInput>,
) -> ApiResult<Response> {
    trade(state, session, pk, input, TradeSide::Buy).await
}

/// Sell a stock. The form body carries `amount` and `price`.
pub async fn stock_sell(
    State(state): State<AppState>,
    session: Session,
    Path(pk): Path<i64>,
    Form(input): Form<BuySellInput>,
) -> ApiResult<Response> {
    trade(state, session, pk, input, TradeSide::Sell).await
}

/// Trades only accept POST; anything else goes back to the detail page.
pub async fn redirect_to_detail(session: Session, Path(pk): Path<i64>) -> ApiResult<Redirect> {
    require_login(&session).await?;
    Ok(Redirect::to(&format!("/stock/detail/{}", pk)))
}

async fn trade(
    state: AppState,
    session: Session,
    pk: i64,
    input: BuySellInput,
    side: TradeSide,
) -> ApiResult<Response> {
    let user = require_login(&session).await?;

    // Eviction happens under the pool lock so a concurrent account read
    // cannot refill the cache with pre-trade rows.
    let result = {
        let mut conn = state.pool.0.lock().await;
        let result = run_trade(&mut conn, &user, pk, input, side)?;
        if matches!(result, TradeResult::Completed(_)) {
            state.cache.invalidate(&user.username).await;
        }
        result
    };

    match result {
        TradeResult::Completed(message) => {
            flash(&session, message).await?;
            Ok(Redirect::to(ACCOUNT_PATH).into_response())
        }
        TradeResult::Rejected(page) => {
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(page)).into_response())
        }
    }
}

/// Validates the form and applies the trade in one IMMEDIATE transaction,
/// so concurrent trades on the same account cannot interleave.
pub fn run_trade(
    conn: &mut Connection,
    user: &SessionUser,
    pk: i64,
    input: BuySellInput,
    side: TradeSide,
) -> ApiResult<TradeResult> {
    let stock = db::get_stock(conn, pk)?.ok_or(ApiError::NotFound)?;

    let form = match BuySellForm::validate(&input) {
        Ok(form) => form,
        Err(errors) => return rejected(conn, user, stock, input, errors),
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let account_id = user.account_id;
    let balance = db::get_balance(&tx, account_id, stock.currency.id)?.unwrap_or_default();
    let position = db::get_position(&tx, account_id, stock.id)?;

    let applied = match side {
        TradeSide::Buy => ledger::buy(
            position.unwrap_or_default(),
            balance,
            form.amount,
            form.price,
            &stock.currency.sign,
        ),
        TradeSide::Sell => ledger::sell(position, balance, form.amount, form.price, &stock.ticker),
    };

    let outcome = match applied {
        Ok(outcome) => outcome,
        Err(e) => {
            tx.rollback()?;
            tracing::info!(
                "{} {} x{} refused for {}: {}",
                side.as_str(),
                stock.ticker,
                form.amount,
                user.username,
                e
            );
            let mut errors = FormErrors::default();
            errors.add_non_field(e.to_string());
            return rejected(conn, user, stock, input, errors);
        }
    };

    persist(&tx, account_id, &stock, side, &form, &outcome)?;
    tx.commit()?;

    tracing::info!(
        "{} {} x{} at {} for {}",
        side.as_str(),
        stock.ticker,
        form.amount,
        form.price,
        user.username
    );

    let message = match side {
        TradeSide::Buy => format!(
            "Successfully bought {} shares of {}",
            form.amount, stock.ticker
        ),
        TradeSide::Sell => format!(
            "Successfully sold {} shares of {} for {:.2}{}",
            form.amount, stock.ticker, outcome.total, stock.currency.sign
        ),
    };
    Ok(TradeResult::Completed(message))
}

fn persist(
    conn: &Connection,
    account_id: i64,
    stock: &Stock,
    side: TradeSide,
    form: &BuySellForm,
    outcome: &TradeOutcome,
) -> rusqlite::Result<()> {
    db::save_position(conn, account_id, stock.id, &outcome.position)?;
    db::save_balance(conn, account_id, stock.currency.id, outcome.balance)?;
    db::record_trade(
        conn,
        account_id,
        &Trade {
            id: uuid::Uuid::new_v4().to_string(),
            stock_id: stock.id,
            ticker: stock.ticker.clone(),
            side,
            amount: form.amount,
            price: form.price,
            total: outcome.total,
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}

fn rejected(
    conn: &Connection,
    user: &SessionUser,
    stock: Stock,
    input: BuySellInput,
    errors: FormErrors,
) -> ApiResult<TradeResult> {
    let form = FormState::rejected(input, errors);
    Ok(TradeResult::Rejected(stock_page(
        conn,
        user.account_id,
        stock,
        form,
    )?))
}
