use rand::Rng;
use rust_decimal::Decimal;

/// Lowest and highest demo quote, in cents.
const MIN_PRICE_CENTS: i64 = 100;
const MAX_PRICE_CENTS: i64 = 100_00;

/// A uniformly random price with two decimal places.
pub fn random_price<R: Rng + ?Sized>(rng: &mut R) -> Decimal {
    Decimal::new(rng.gen_range(MIN_PRICE_CENTS..=MAX_PRICE_CENTS), 2)
}
