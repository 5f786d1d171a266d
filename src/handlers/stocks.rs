use axum::{
    extract::{Path, State},
    Json,
};
use rusqlite::Connection;
use tower_sessions::Session;

use crate::app::AppState;
use crate::auth::require_login;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::forms::FormState;
use crate::models::{Stock, StockPage};

/// Lists the whole catalog. No login needed.
pub async fn stock_list(State(state): State<AppState>) -> ApiResult<Json<Vec<Stock>>> {
    let conn = state.pool.0.lock().await;
    Ok(Json(db::list_stocks(&conn)?))
}

/// Shows one stock with a buy/sell form primed with a fresh demo price.
pub async fn stock_detail(
    State(state): State<AppState>,
    session: Session,
    Path(pk): Path<i64>,
) -> ApiResult<Json<StockPage>> {
    let user = require_login(&session).await?;
    let conn = state.pool.0.lock().await;
    let stock = db::get_stock(&conn, pk)?.ok_or(ApiError::NotFound)?;

    let form = FormState::initial(stock.random_price());
    Ok(Json(stock_page(&conn, user.account_id, stock, form)?))
}

/// Builds the detail page around `form`, reporting what the account holds.
pub(crate) fn stock_page(
    conn: &Connection,
    account_id: i64,
    stock: Stock,
    form: FormState,
) -> rusqlite::Result<StockPage> {
    let available_amount = db::get_position(conn, account_id, stock.id)?
        .map(|position| position.amount)
        .unwrap_or(0);

    Ok(StockPage {
        stock,
        form,
        user_has_stock: available_amount > 0,
        available_amount,
    })
}
