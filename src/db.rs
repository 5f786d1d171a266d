use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::ledger::Position;
use crate::models::{Currency, CurrencyBalance, PositionSummary, Stock, Trade, TradeSide};

#[derive(Clone)]
pub struct DatabasePool(pub Arc<Mutex<rusqlite::Connection>>);

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS currencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sign TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stocks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticker TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            currency_id INTEGER NOT NULL REFERENCES currencies(id)
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            date_joined TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS account_stocks (
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            stock_id INTEGER NOT NULL REFERENCES stocks(id),
            amount INTEGER NOT NULL CHECK (amount >= 0),
            average_buy_cost TEXT NOT NULL,
            PRIMARY KEY (account_id, stock_id)
        );

        CREATE TABLE IF NOT EXISTS account_currencies (
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            currency_id INTEGER NOT NULL REFERENCES currencies(id),
            amount TEXT NOT NULL,
            PRIMARY KEY (account_id, currency_id)
        );

        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            stock_id INTEGER NOT NULL REFERENCES stocks(id),
            side TEXT NOT NULL,
            amount INTEGER NOT NULL,
            price TEXT NOT NULL,
            total TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );",
    )
}

/// Decimals are stored as TEXT to keep them exact.
fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const STOCK_COLUMNS: &str = "SELECT s.id, s.ticker, s.name, s.description, c.id, c.sign, c.name
     FROM stocks s JOIN currencies c ON c.id = s.currency_id";

fn stock_from_row(row: &Row) -> rusqlite::Result<Stock> {
    Ok(Stock {
        id: row.get(0)?,
        ticker: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        currency: Currency {
            id: row.get(4)?,
            sign: row.get(5)?,
            name: row.get(6)?,
        },
    })
}

pub fn list_stocks(conn: &Connection) -> rusqlite::Result<Vec<Stock>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY s.id", STOCK_COLUMNS))?;
    let stocks = stmt
        .query_map([], stock_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stocks)
}

pub fn get_stock(conn: &Connection, id: i64) -> rusqlite::Result<Option<Stock>> {
    conn.query_row(
        &format!("{} WHERE s.id = ?", STOCK_COLUMNS),
        [id],
        stock_from_row,
    )
    .optional()
}

pub fn list_currencies(conn: &Connection) -> rusqlite::Result<Vec<Currency>> {
    let mut stmt = conn.prepare("SELECT id, sign, name FROM currencies ORDER BY id")?;
    let currencies = stmt
        .query_map([], |row| {
            Ok(Currency {
                id: row.get(0)?,
                sign: row.get(1)?,
                name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(currencies)
}

pub fn find_currency_id(conn: &Connection, sign: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row("SELECT id FROM currencies WHERE sign = ?", [sign], |row| {
        row.get(0)
    })
    .optional()
}

/// Returns true when a new row was written.
pub fn insert_currency_if_missing(
    conn: &Connection,
    sign: &str,
    name: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO currencies (sign, name) VALUES (?, ?)",
        params![sign, name],
    )?;
    Ok(changed > 0)
}

/// Returns true when a new row was written.
pub fn insert_stock_if_missing(
    conn: &Connection,
    ticker: &str,
    name: &str,
    description: &str,
    currency_id: i64,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO stocks (ticker, name, description, currency_id)
         VALUES (?, ?, ?, ?)",
        params![ticker, name, description, currency_id],
    )?;
    Ok(changed > 0)
}

/// A user joined with their account.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub account_id: i64,
}

pub fn find_user(conn: &Connection, username: &str) -> rusqlite::Result<Option<UserRecord>> {
    conn.query_row(
        "SELECT u.id, u.username, u.password_hash, a.id
         FROM users u JOIN accounts a ON a.user_id = u.id
         WHERE u.username = ?",
        [username],
        |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
                account_id: row.get(3)?,
            })
        },
    )
    .optional()
}

pub fn username_taken(conn: &Connection, username: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)",
        [username],
        |row| row.get(0),
    )
}

/// Creates a user and its account, returning the account id.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash, date_joined) VALUES (?, ?, ?)",
        params![username, password_hash, chrono::Utc::now().to_rfc3339()],
    )?;
    let user_id = conn.last_insert_rowid();
    conn.execute("INSERT INTO accounts (user_id) VALUES (?)", [user_id])?;
    Ok(conn.last_insert_rowid())
}

pub fn get_position(
    conn: &Connection,
    account_id: i64,
    stock_id: i64,
) -> rusqlite::Result<Option<Position>> {
    conn.query_row(
        "SELECT amount, average_buy_cost FROM account_stocks
         WHERE account_id = ? AND stock_id = ?",
        [account_id, stock_id],
        |row| {
            Ok(Position {
                amount: row.get(0)?,
                average_buy_cost: decimal_at(row, 1)?,
            })
        },
    )
    .optional()
}

pub fn save_position(
    conn: &Connection,
    account_id: i64,
    stock_id: i64,
    position: &Position,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO account_stocks (account_id, stock_id, amount, average_buy_cost)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(account_id, stock_id)
         DO UPDATE SET amount = excluded.amount, average_buy_cost = excluded.average_buy_cost",
        params![
            account_id,
            stock_id,
            position.amount,
            position.average_buy_cost.to_string()
        ],
    )?;
    Ok(())
}

pub fn get_balance(
    conn: &Connection,
    account_id: i64,
    currency_id: i64,
) -> rusqlite::Result<Option<Decimal>> {
    conn.query_row(
        "SELECT amount FROM account_currencies WHERE account_id = ? AND currency_id = ?",
        [account_id, currency_id],
        |row| decimal_at(row, 0),
    )
    .optional()
}

pub fn save_balance(
    conn: &Connection,
    account_id: i64,
    currency_id: i64,
    amount: Decimal,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO account_currencies (account_id, currency_id, amount)
         VALUES (?, ?, ?)
         ON CONFLICT(account_id, currency_id)
         DO UPDATE SET amount = excluded.amount",
        params![account_id, currency_id, amount.to_string()],
    )?;
    Ok(())
}

pub fn list_balances(
    conn: &Connection,
    account_id: i64,
) -> rusqlite::Result<Vec<CurrencyBalance>> {
    let mut stmt = conn.prepare(
        "SELECT ac.amount, c.sign
         FROM account_currencies ac JOIN currencies c ON c.id = ac.currency_id
         WHERE ac.account_id = ?
         ORDER BY c.id",
    )?;
    let balances = stmt
        .query_map([account_id], |row| {
            Ok(CurrencyBalance {
                amount: decimal_at(row, 0)?,
                sign: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(balances)
}

/// Positions the account currently holds; emptied ones are skipped.
pub fn list_open_positions(
    conn: &Connection,
    account_id: i64,
) -> rusqlite::Result<Vec<PositionSummary>> {
    let mut stmt = conn.prepare(
        "SELECT s.ticker, ast.amount, ast.average_buy_cost, s.id
         FROM account_stocks ast JOIN stocks s ON s.id = ast.stock_id
         WHERE ast.account_id = ? AND ast.amount > 0
         ORDER BY s.ticker",
    )?;
    let positions = stmt
        .query_map([account_id], |row| {
            Ok(PositionSummary {
                ticker: row.get(0)?,
                amount: row.get(1)?,
                avg: decimal_at(row, 2)?,
                stock_id: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(positions)
}

pub fn record_trade(conn: &Connection, account_id: i64, trade: &Trade) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO trades (id, account_id, stock_id, side, amount, price, total, timestamp)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            &trade.id,
            account_id,
            trade.stock_id,
            trade.side.as_str(),
            trade.amount,
            trade.price.to_string(),
            trade.total.to_string(),
            &trade.timestamp,
        ],
    )?;
    Ok(())
}

pub fn list_trades(conn: &Connection, account_id: i64) -> rusqlite::Result<Vec<Trade>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.stock_id, s.ticker, t.side, t.amount, t.price, t.total, t.timestamp
         FROM trades t JOIN stocks s ON s.id = t.stock_id
         WHERE t.account_id = ?
         ORDER BY t.timestamp DESC, t.rowid DESC",
    )?;
    let trades = stmt
        .query_map([account_id], |row| {
            let side: String = row.get(3)?;
            let side = TradeSide::parse(&side).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    Type::Text,
                    format!("unknown trade side {:?}", side).into(),
                )
            })?;
            Ok(Trade {
                id: row.get(0)?,
                stock_id: row.get(1)?,
                ticker: row.get(2)?,
                side,
                amount: row.get(4)?,
                price: decimal_at(row, 5)?,
                total: decimal_at(row, 6)?,
                timestamp: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(trades)
}
