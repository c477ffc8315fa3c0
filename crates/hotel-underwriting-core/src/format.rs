//! Display helpers for the UI layer. Formatting only; amounts are never
//! converted between currencies.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::time_value::IrrOutcome;
use crate::types::{Currency, Money, Rate};

/// Marker for a ratio whose denominator was zero.
pub const UNDEFINED_MARKER: &str = "—";

/// Shown when there is no IRR to display.
pub const NO_IRR: &str = "N/A";

/// `0.1234` -> `"12.34%"`.
pub fn format_percent(rate: Rate, decimals: u32) -> String {
    format!("{:.*}%", decimals as usize, (rate * dec!(100)).round_dp(decimals))
}

/// IRR as a percentage with two decimals, `"N/A"` when there is none.
pub fn format_irr(irr: Option<Rate>) -> String {
    match irr {
        Some(rate) => format_percent(rate, 2),
        None => NO_IRR.to_string(),
    }
}

pub fn format_irr_outcome(outcome: IrrOutcome) -> String {
    format_irr(outcome.rate())
}

/// Percentage-of-revenue style ratio with one decimal, `"—"` when undefined.
pub fn format_ratio(ratio: Option<Rate>) -> String {
    match ratio {
        Some(r) => format_percent(r, 1),
        None => UNDEFINED_MARKER.to_string(),
    }
}

/// Whole currency units with thousands separators, e.g. `"-£1,250,000"`.
pub fn format_money(amount: Money, currency: &Currency) -> String {
    let rounded = amount.round_dp(0);
    let sign = if rounded < Decimal::ZERO { "-" } else { "" };
    let digits = rounded.abs().trunc().to_string();
    format!("{sign}{}{}", currency.symbol(), group_thousands(&digits))
}

/// Per-room and other optional amounts, `"—"` when undefined.
pub fn format_optional_money(amount: Option<Money>, currency: &Currency) -> String {
    match amount {
        Some(a) => format_money(a, currency),
        None => UNDEFINED_MARKER.to_string(),
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
