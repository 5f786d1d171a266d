//! Average-cost accounting for buys and sells.
//!
//! Everything here is pure: callers load the current position and balance,
//! apply a trade, and persist the returned state only on success.

use rust_decimal::Decimal;
use thiserror::Error;

/// A user's holding in one stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub amount: i64,
    pub average_buy_cost: Decimal,
}

impl Position {
    /// Total cost basis of the shares currently held, `None` on overflow.
    pub fn cost_basis(&self) -> Option<Decimal> {
        self.average_buy_cost.checked_mul(Decimal::from(self.amount))
    }
}

/// Reasons a trade is refused. None of them change any state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("Insufficient funds in {sign}")]
    InsufficientFunds { sign: String },
    #[error("You have no shares of {ticker}")]
    NoPosition { ticker: String },
    #[error("Not enough shares to sell. You have {held} shares")]
    InsufficientShares { held: i64 },
    #[error("Amount must be positive")]
    NonPositiveAmount,
    #[error("Trade amount is too large")]
    Overflow,
}

/// State after a successful trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeOutcome {
    pub position: Position,
    pub balance: Decimal,
    /// Cost of a buy or income of a sell.
    pub total: Decimal,
}

/// Buys `amount` shares at `price`, paying from `balance`.
pub fn buy(
    position: Position,
    balance: Decimal,
    amount: i64,
    price: Decimal,
    sign: &str,
) -> Result<TradeOutcome, TradeError> {
    if amount <= 0 {
        return Err(TradeError::NonPositiveAmount);
    }
    let cost = price
        .checked_mul(Decimal::from(amount))
        .ok_or(TradeError::Overflow)?;

    if balance < cost {
        return Err(TradeError::InsufficientFunds {
            sign: sign.to_string(),
        });
    }

    let total_amount = position
        .amount
        .checked_add(amount)
        .ok_or(TradeError::Overflow)?;
    let total_cost = position
        .cost_basis()
        .and_then(|basis| basis.checked_add(cost))
        .ok_or(TradeError::Overflow)?;

    Ok(TradeOutcome {
        position: Position {
            amount: total_amount,
            average_buy_cost: total_cost / Decimal::from(total_amount),
        },
        balance: balance - cost,
        total: cost,
    })
}

/// Sells `amount` shares at `price`, crediting `balance`.
///
/// `position` is `None` when the account never held the stock.
pub fn sell(
    position: Option<Position>,
    balance: Decimal,
    amount: i64,
    price: Decimal,
    ticker: &str,
) -> Result<TradeOutcome, TradeError> {
    let position = position.ok_or_else(|| TradeError::NoPosition {
        ticker: ticker.to_string(),
    })?;

    if amount <= 0 {
        return Err(TradeError::NonPositiveAmount);
    }
    if position.amount < amount {
        return Err(TradeError::InsufficientShares {
            held: position.amount,
        });
    }

    let income = price
        .checked_mul(Decimal::from(amount))
        .ok_or(TradeError::Overflow)?;
    let balance = balance.checked_add(income).ok_or(TradeError::Overflow)?;

    let remaining = position.amount - amount;
    let average_buy_cost = if remaining == 0 {
        Decimal::ZERO
    } else {
        position.average_buy_cost
    };

    Ok(TradeOutcome {
        position: Position {
            amount: remaining,
            average_buy_cost,
        },
        balance,
        total: income,
    })
}
