//! Payment currencies with stable numeric codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("unknown currency code: {0}")]
    UnknownCurrency(u64),
}

/// Currencies a transfer payment can demand.
///
/// The numeric code is part of the wire format and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Nothing,
    Bitcoin,
}

impl Currency {
    pub fn code(self) -> u64 {
        match self {
            Currency::Nothing => 0,
            Currency::Bitcoin => 1,
        }
    }

    pub fn from_code(code: u64) -> Result<Self, CurrencyError> {
        match code {
            0 => Ok(Currency::Nothing),
            1 => Ok(Currency::Bitcoin),
            other => Err(CurrencyError::UnknownCurrency(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Nothing => "",
            Currency::Bitcoin => "bitcoin",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Currency::Nothing.code(), 0);
        assert_eq!(Currency::Bitcoin.code(), 1);
        for currency in [Currency::Nothing, Currency::Bitcoin] {
            assert_eq!(Currency::from_code(currency.code()), Ok(currency));
        }
        assert_eq!(
            Currency::from_code(99),
            Err(CurrencyError::UnknownCurrency(99))
        );
    }
}
