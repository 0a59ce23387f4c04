//! Pricing errors
//!
//! Every failure the stateless pricing engine can report. None of these are
//! recovered inside the crate; they are contract violations the caller must
//! handle.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced by [`crate::PricingEngine`] and [`crate::FeeSchedule`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AmmError {
    /// Non-positive or malformed input amount
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Pool has no liquidity backing it
    #[error("Pool is empty: token reserve {token_reserve}, EGP reserve {egp_reserve}")]
    EmptyPool {
        token_reserve: Decimal,
        egp_reserve: Decimal,
    },

    /// Trade would drain the output reserve
    #[error("Insufficient liquidity: output {requested} would drain reserve {available}")]
    InsufficientLiquidity {
        requested: Decimal,
        available: Decimal,
    },

    /// Fee rate or fee split outside the allowed range
    #[error("Invalid fee schedule: {reason}")]
    InvalidFee { reason: String },

    /// Decimal arithmetic overflowed
    #[error("Arithmetic overflow while computing {operation}")]
    Overflow { operation: &'static str },
}

impl AmmError {
    pub(crate) fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(operation: &'static str) -> Self {
        Self::Overflow { operation }
    }
}

pub type Result<T> = std::result::Result<T, AmmError>;
