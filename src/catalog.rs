//! Loading currencies and stocks from a JSON catalog file.

use rusqlite::Connection;
use serde::Deserialize;
use thiserror::Error;

use crate::db;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("stock {ticker} refers to unknown currency {sign:?}")]
    UnknownCurrency { ticker: String, sign: String },
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

#[derive(Deserialize, Debug, Default)]
pub struct Catalog {
    #[serde(default)]
    pub currencies: Vec<CatalogCurrency>,
    #[serde(default)]
    pub stocks: Vec<CatalogStock>,
}

#[derive(Deserialize, Debug)]
pub struct CatalogCurrency {
    pub sign: String,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct CatalogStock {
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Sign of the currency the stock trades in.
    pub currency: String,
}

/// Counts of rows a seeding run actually created.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub currencies: usize,
    pub stocks: usize,
}

impl Catalog {
    pub fn from_path(path: &str) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Inserts missing entries in one transaction. Existing signs and
    /// tickers are left as they are.
    pub fn seed(&self, conn: &mut Connection) -> Result<SeedReport, CatalogError> {
        let tx = conn.transaction()?;
        let mut report = SeedReport::default();

        for currency in &self.currencies {
            if db::insert_currency_if_missing(&tx, &currency.sign, &currency.name)? {
                report.currencies += 1;
            }
        }

        for stock in &self.stocks {
            let currency_id = db::find_currency_id(&tx, &stock.currency)?.ok_or_else(|| {
                CatalogError::UnknownCurrency {
                    ticker: stock.ticker.clone(),
                    sign: stock.currency.clone(),
                }
            })?;
            if db::insert_stock_if_missing(
                &tx,
                &stock.ticker,
                &stock.name,
                &stock.description,
                currency_id,
            )? {
                report.stocks += 1;
            }
        }

        tx.commit()?;
        Ok(report)
    }
}
