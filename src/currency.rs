//! Display currency for budget amounts
//!
//! Amounts are stored in INR. Conversion to a display currency is chosen per
//! request and never changes what is stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Fixed conversion rate, rupees per dollar
pub const USD_TO_INR_RATE: f64 = 83.0;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Inr,
    Usd,
}

impl Currency {
    /// Convert a stored INR amount into this currency
    pub fn from_inr(self, amount: f64) -> f64 {
        match self {
            Currency::Inr => amount,
            Currency::Usd => round_cents(amount / USD_TO_INR_RATE),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Inr => "INR",
            Currency::Usd => "USD",
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INR" => Ok(Currency::Inr),
            "USD" => Ok(Currency::Usd),
            other => Err(LedgerError::InvalidInput(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}
