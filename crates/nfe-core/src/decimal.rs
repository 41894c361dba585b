//! # Fixed-Precision Numeric Formatting
//!
//! The document schema fixes the number of decimal places per field kind:
//! money has 2, quantities 4, unit prices 10. Values are rounded half away
//! from zero and always rendered with exactly that many places.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places for monetary values (`vProd`, `vNF`, ...).
pub const MONEY_SCALE: u32 = 2;
/// Decimal places for quantities (`qCom`, `qTrib`).
pub const QUANTITY_SCALE: u32 = 4;
/// Decimal places for unit prices (`vUnCom`, `vUnTrib`).
pub const UNIT_PRICE_SCALE: u32 = 10;
/// Decimal places for tax rates (`pICMS`, `pPIS`, `pCOFINS`).
pub const RATE_SCALE: u32 = 4;

/// Round to `scale` places and render with exactly `scale` places.
pub fn fixed(value: Decimal, scale: u32) -> String {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded.to_string()
}

/// Render a monetary value (2 places).
pub fn money(value: Decimal) -> String {
    fixed(value, MONEY_SCALE)
}

/// Render a quantity (4 places).
pub fn quantity(value: Decimal) -> String {
    fixed(value, QUANTITY_SCALE)
}

/// Render a unit price (10 places).
pub fn unit_price(value: Decimal) -> String {
    fixed(value, UNIT_PRICE_SCALE)
}

/// Render a percentage rate (4 places).
pub fn rate(value: Decimal) -> String {
    fixed(value, RATE_SCALE)
}

/// Round a monetary amount to 2 places without rendering it.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
