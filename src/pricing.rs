//! Cart totals.
//!
//! All amounts are integer minor currency units (cents). Tax is 8.5 % of the
//! subtotal rounded half-up to the cent; shipping is free from 75.00 upward and
//! a flat 9.99 below that.

use serde::Serialize;
use utoipa::ToSchema;

/// Tax rate expressed in tenths of a percent (85 = 8.5 %).
pub const TAX_RATE_PER_MILLE: i64 = 85;
pub const FREE_SHIPPING_THRESHOLD: i64 = 7_500;
pub const FLAT_SHIPPING: i64 = 999;

/// Anything that contributes `quantity * unit_price` to a subtotal.
pub trait PricedLine {
    fn quantity(&self) -> i32;
    fn unit_price(&self) -> i64;

    fn line_total(&self) -> i64 {
        i64::from(self.quantity()) * self.unit_price()
    }
}

impl PricedLine for (i32, i64) {
    fn quantity(&self) -> i32 {
        self.0
    }

    fn unit_price(&self) -> i64 {
        self.1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CartTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
}

/// Totals for a cart. An absent or empty cart yields all zeros.
pub fn calculate_totals<L: PricedLine>(lines: Option<&[L]>) -> CartTotals {
    let Some(lines) = lines.filter(|lines| !lines.is_empty()) else {
        return CartTotals::default();
    };

    let subtotal: i64 = lines.iter().map(PricedLine::line_total).sum();
    let tax = tax_for(subtotal);
    let shipping = shipping_for(subtotal);

    CartTotals {
        subtotal,
        tax,
        shipping,
        total: subtotal + tax + shipping,
    }
}

pub fn tax_for(subtotal: i64) -> i64 {
    (subtotal * TAX_RATE_PER_MILLE + 500) / 1_000
}

pub fn shipping_for(subtotal: i64) -> i64 {
    if subtotal >= FREE_SHIPPING_THRESHOLD {
        0
    } else {
        FLAT_SHIPPING
    }
}

/// Render minor units as `12.34 USD`.
pub fn format_minor(amount: i64, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{sign}{}.{:02} {}",
        abs / 100,
        abs % 100,
        currency.to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_units_at_twenty_five() {
        let totals = calculate_totals(Some(&[(2, 2_500)][..]));
        assert_eq!(
            totals,
            CartTotals {
                subtotal: 5_000,
                tax: 425,
                shipping: 999,
                total: 6_424,
            }
        );
    }

    #[test]
    fn free_shipping_starts_at_threshold() {
        assert_eq!(calculate_totals(Some(&[(1, 7_500)][..])).shipping, 0);
        assert_eq!(calculate_totals(Some(&[(1, 7_499)][..])).shipping, 999);
    }

    #[test]
    fn empty_and_absent_carts_are_zero() {
        let empty: [(i32, i64); 0] = [];
        assert_eq!(calculate_totals(Some(&empty[..])), CartTotals::default());
        assert_eq!(calculate_totals::<(i32, i64)>(None), CartTotals::default());
    }

    #[test]
    fn tax_rounds_half_up() {
        // 75.00 * 8.5 % = 6.375
        assert_eq!(tax_for(7_500), 638);
        // 0.05 * 8.5 % = 0.00425
        assert_eq!(tax_for(5), 0);
        // 10.00 * 8.5 % = 0.85
        assert_eq!(tax_for(1_000), 85);
    }

    #[test]
    fn subtotal_sums_every_line() {
        let totals = calculate_totals(Some(&[(3, 1_250), (1, 4_000)][..]));
        assert_eq!(totals.subtotal, 7_750);
        assert_eq!(totals.tax, 659);
        assert_eq!(totals.shipping, 0);
        assert_eq!(totals.total, 8_409);
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_minor(6_424, "usd"), "64.24 USD");
        assert_eq!(format_minor(5, "eur"), "0.05 EUR");
        assert_eq!(format_minor(-150, "usd"), "-1.50 USD");
    }
}
