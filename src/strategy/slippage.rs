//! Slippage protection
//!
//! Projects the price impact of a trade from the quote value it moves and the
//! depth the market snapshot reports for that asset.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Slippage protection result
#[derive(Debug, Clone, PartialEq)]
pub enum SlippageCheck {
    /// Trade can proceed
    Approved {
        /// Estimated slippage as a fraction of price
        estimated_slippage: Decimal,
    },
    /// Trade skipped due to excessive slippage
    Rejected {
        reason: String,
        estimated_slippage: Decimal,
    },
}

impl SlippageCheck {
    pub fn estimated_slippage(&self) -> Decimal {
        match self {
            SlippageCheck::Approved { estimated_slippage } => *estimated_slippage,
            SlippageCheck::Rejected {
                estimated_slippage, ..
            } => *estimated_slippage,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, SlippageCheck::Approved { .. })
    }
}

/// Projected slippage of moving `trade_value` through a book of `depth` quote value.
///
/// Unknown depth projects zero impact; an empty book, or one so thin the
/// ratio leaves the `Decimal` range, projects `Decimal::MAX`.
pub fn projected_slippage(trade_value: Decimal, depth: Option<Decimal>) -> Decimal {
    match depth {
        None => Decimal::ZERO,
        Some(d) if d <= Decimal::ZERO => Decimal::MAX,
        Some(d) => trade_value
            .abs()
            .checked_div(d)
            .unwrap_or(Decimal::MAX)
            .max(Decimal::ZERO),
    }
}

fn percent(fraction: Decimal) -> String {
    match fraction.checked_mul(dec!(100)) {
        Some(pct) => format!("{:.2}%", pct),
        None => "unbounded".to_string(),
    }
}

/// Check a trade against the tolerance
pub fn check_trade(trade_value: Decimal, depth: Option<Decimal>, tolerance: Decimal) -> SlippageCheck {
    let estimated = projected_slippage(trade_value, depth);

    if estimated > tolerance {
        let reason = if estimated == Decimal::MAX {
            "no market depth".to_string()
        } else {
            format!(
                "Slippage too high: {} (max: {})",
                percent(estimated),
                percent(tolerance)
            )
        };
        return SlippageCheck::Rejected {
            reason,
            estimated_slippage: estimated,
        };
    }

    SlippageCheck::Approved {
        estimated_slippage: estimated,
    }
}
