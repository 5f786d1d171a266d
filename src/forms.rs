//! Validation for the shared buy/sell form.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const MAX_AMOUNT: i64 = 1_000_000_000;
const MAX_PRICE: Decimal = dec!(1000000000);
const PRICE_DECIMAL_PLACES: u32 = 2;

/// Raw form submission. Fields stay strings so bad input becomes a form
/// error instead of an extractor rejection.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BuySellInput {
    pub amount: Option<String>,
    pub price: Option<String>,
}

/// Errors attached to a form, per field and form-wide.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    pub fields: BTreeMap<&'static str, Vec<String>>,
    pub non_field: Vec<String>,
}

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.entry(field).or_default().push(message.into());
    }

    pub fn add_non_field(&mut self, message: impl Into<String>) {
        self.non_field.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.non_field.is_empty()
    }
}

/// What a page shows for the form: current values and any errors.
#[derive(Serialize, Debug, Clone, Default)]
pub struct FormState {
    pub data: BuySellInput,
    pub errors: FormErrors,
}

impl FormState {
    /// An unbound form with a suggested price.
    pub fn initial(price: Decimal) -> Self {
        Self {
            data: BuySellInput {
                amount: None,
                price: Some(price.to_string()),
            },
            errors: FormErrors::default(),
        }
    }

    pub fn rejected(data: BuySellInput, errors: FormErrors) -> Self {
        Self { data, errors }
    }
}

/// A validated buy/sell request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuySellForm {
    pub amount: i64,
    pub price: Decimal,
}

impl BuySellForm {
    pub fn validate(input: &BuySellInput) -> Result<Self, FormErrors> {
        let mut errors = FormErrors::default();

        let amount = match non_blank(&input.amount) {
            None => {
                errors.add("amount", "This field is required.");
                None
            }
            Some(raw) => match raw.parse::<i64>() {
                Err(_) => {
                    errors.add("amount", "Enter a whole number.");
                    None
                }
                Ok(n) if n < 1 => {
                    errors.add("amount", "Ensure this value is greater than or equal to 1.");
                    None
                }
                Ok(n) if n > MAX_AMOUNT => {
                    errors.add(
                        "amount",
                        format!("Ensure this value is less than or equal to {MAX_AMOUNT}."),
                    );
                    None
                }
                Ok(n) => Some(n),
            },
        };

        let price = match non_blank(&input.price) {
            None => {
                errors.add("price", "This field is required.");
                None
            }
            Some(raw) => match Decimal::from_str(raw) {
                Err(_) => {
                    errors.add("price", "Enter a number.");
                    None
                }
                Ok(p) if p <= Decimal::ZERO => {
                    errors.add("price", "Ensure this value is greater than 0.");
                    None
                }
                Ok(p) if p > MAX_PRICE => {
                    errors.add(
                        "price",
                        format!("Ensure this value is less than or equal to {MAX_PRICE}."),
                    );
                    None
                }
                Ok(p) if p.normalize().scale() > PRICE_DECIMAL_PLACES => {
                    errors.add(
                        "price",
                        format!(
                            "Ensure that there are no more than {PRICE_DECIMAL_PLACES} decimal places."
                        ),
                    );
                    None
                }
                Ok(p) => Some(p.round_dp(PRICE_DECIMAL_PLACES)),
            },
        };

        match (amount, price) {
            (Some(amount), Some(price)) => Ok(Self { amount, price }),
            _ => Err(errors),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
