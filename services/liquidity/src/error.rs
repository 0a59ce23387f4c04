//! Liquidity service errors
//!
//! Pricing failures are wrapped transparently; ledger failures (slippage,
//! balances, lock contention) are added here. Every mutating operation that
//! returns one of these has left pool and position state untouched.

use crate::pool_state::PoolId;
use crate::traits::StateError;
use amm::AmmError;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Error taxonomy callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAmount,
    EmptyPool,
    InsufficientLiquidity,
    SlippageExceeded,
    InsufficientBalance,
    PoolLockTimeout,
    PoolNotFound,
    PoolAlreadyExists,
    RatioOutOfTolerance,
    InvalidFee,
    Overflow,
    Persistence,
}

#[derive(Debug, Error)]
pub enum LiquidityError {
    #[error(transparent)]
    Pricing(#[from] AmmError),

    #[error("Slippage exceeded on {side}: minimum {minimum}, actual {actual}")]
    SlippageExceeded {
        side: &'static str,
        minimum: Decimal,
        actual: Decimal,
    },

    #[error("Insufficient LP balance: held {held}, requested {requested}")]
    InsufficientBalance { held: Decimal, requested: Decimal },

    #[error("Timed out after {waited:?} waiting for lock on pool {pool_id}")]
    PoolLockTimeout { pool_id: PoolId, waited: Duration },

    #[error("Pool {0} not found")]
    PoolNotFound(PoolId),

    #[error("Pool {0} already exists")]
    PoolAlreadyExists(PoolId),

    #[error("Deposit ratio deviates {deviation_percent}% from pool ratio, tolerance is {tolerance_percent}%")]
    RatioOutOfTolerance {
        deviation_percent: Decimal,
        tolerance_percent: Decimal,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl LiquidityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiquidityError::Pricing(err) => match err {
                AmmError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
                AmmError::EmptyPool { .. } => ErrorKind::EmptyPool,
                AmmError::InsufficientLiquidity { .. } => ErrorKind::InsufficientLiquidity,
                AmmError::InvalidFee { .. } => ErrorKind::InvalidFee,
                AmmError::Overflow { .. } => ErrorKind::Overflow,
            },
            LiquidityError::SlippageExceeded { .. } => ErrorKind::SlippageExceeded,
            LiquidityError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            LiquidityError::PoolLockTimeout { .. } => ErrorKind::PoolLockTimeout,
            LiquidityError::PoolNotFound(_) => ErrorKind::PoolNotFound,
            LiquidityError::PoolAlreadyExists(_) => ErrorKind::PoolAlreadyExists,
            LiquidityError::RatioOutOfTolerance { .. } => ErrorKind::RatioOutOfTolerance,
            LiquidityError::Snapshot(_) | LiquidityError::State(_) => ErrorKind::Persistence,
        }
    }

    /// Whether the caller may retry: slippage with a fresh quote, lock
    /// contention with backoff. Everything else needs a different request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SlippageExceeded | ErrorKind::PoolLockTimeout
        )
    }

    pub(crate) fn invalid_amount(reason: impl Into<String>) -> Self {
        LiquidityError::Pricing(AmmError::InvalidAmount {
            reason: reason.into(),
        })
    }
}

pub type Result<T> = std::result::Result<T, LiquidityError>;
