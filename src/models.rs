use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::forms::FormState;
use crate::pricing;

/// Currency reference data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub id: i64,
    pub sign: String,
    pub name: String,
}

/// A catalog entry. Stocks never change once created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Stock {
    pub id: i64,
    pub ticker: String,
    pub name: String,
    pub description: String,
    pub currency: Currency,
}

impl Stock {
    /// Demo quote. There is no market data behind it.
    pub fn random_price(&self) -> Decimal {
        pricing::random_price(&mut rand::thread_rng())
    }
}

/// One entry of the cached currency half of the portfolio.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CurrencyBalance {
    pub amount: Decimal,
    pub sign: String,
}

/// One entry of the cached stock half of the portfolio.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PositionSummary {
    pub ticker: String,
    pub amount: i64,
    pub avg: Decimal,
    pub stock_id: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// A completed buy or sell, kept for the account's history.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Trade {
    pub id: String,
    pub stock_id: i64,
    pub ticker: String,
    pub side: TradeSide,
    pub amount: i64,
    pub price: Decimal,
    pub total: Decimal,
    pub timestamp: String,
}

/// The stock detail page, also re-rendered when a trade form is rejected.
#[derive(Serialize, Debug)]
pub struct StockPage {
    pub stock: Stock,
    pub form: FormState,
    pub user_has_stock: bool,
    pub available_amount: i64,
}

/// The account page: pending flash messages plus the portfolio.
#[derive(Serialize, Debug)]
pub struct AccountPage {
    pub messages: Vec<String>,
    pub currencies: Vec<CurrencyBalance>,
    pub stocks: Vec<PositionSummary>,
}
