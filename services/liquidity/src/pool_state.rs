//! Pool State
//!
//! The authoritative record for one property's liquidity market. Instances
//! inside the ledger are only mutated under that pool's write lock; every
//! other holder works with a clone.

use crate::traits::StateError;
use amm::{AmmError, FeeSchedule, ReservePool};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a property liquidity pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u64);

/// Identifier of a liquidity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Has outstanding LP supply and tradable reserves
    Active,
    /// Never seeded, or every LP token has been burned
    Inactive,
}

/// Complete state of a single pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub pool_id: PoolId,

    // Reserves
    pub token_reserve: Decimal,
    pub egp_reserve: Decimal,
    pub total_lp_supply: Decimal,

    pub fees: FeeSchedule,
    pub status: PoolStatus,

    // Reporting counters, fees themselves stay in the reserves
    pub trade_count: u64,
    pub volume_egp: Decimal,
    pub lp_fees_egp: Decimal,
    pub platform_fees_egp: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reserves and supply at one point in time, recorded on every trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub token_reserve: Decimal,
    pub egp_reserve: Decimal,
    pub total_lp_supply: Decimal,
}

/// Reporting view of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_id: PoolId,
    pub status: PoolStatus,
    /// EGP per token, `None` while empty
    pub spot_price: Option<Decimal>,
    /// Both reserves valued in EGP at the spot price
    pub total_value_egp: Decimal,
    pub total_lp_supply: Decimal,
    pub trade_count: u64,
    pub volume_egp: Decimal,
    pub lp_fees_egp: Decimal,
    pub platform_fees_egp: Decimal,
    pub open_positions: usize,
}

impl Pool {
    /// Create an unseeded pool
    pub fn new(pool_id: PoolId, fees: FeeSchedule) -> Self {
        let now = Utc::now();
        Self {
            pool_id,
            token_reserve: Decimal::ZERO,
            egp_reserve: Decimal::ZERO,
            total_lp_supply: Decimal::ZERO,
            fees,
            status: PoolStatus::Inactive,
            trade_count: 0,
            volume_egp: Decimal::ZERO,
            lp_fees_egp: Decimal::ZERO,
            platform_fees_egp: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PoolStatus::Active
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            token_reserve: self.token_reserve,
            egp_reserve: self.egp_reserve,
            total_lp_supply: self.total_lp_supply,
        }
    }

    /// Constant product `token_reserve * egp_reserve`
    pub fn product(&self) -> Option<Decimal> {
        self.token_reserve.checked_mul(self.egp_reserve)
    }

    /// Value a token amount in EGP at the current spot price, zero while empty
    pub fn tokens_in_egp(&self, token_amount: Decimal) -> Result<Decimal, AmmError> {
        match self.spot_price() {
            Some(price) => token_amount
                .checked_mul(price)
                .ok_or(AmmError::Overflow {
                    operation: "token value",
                }),
            None => Ok(Decimal::ZERO),
        }
    }

    /// Total value locked, in EGP
    pub fn total_value_egp(&self) -> Result<Decimal, AmmError> {
        self.tokens_in_egp(self.token_reserve)?
            .checked_add(self.egp_reserve)
            .ok_or(AmmError::Overflow {
                operation: "pool value",
            })
    }

    /// Check the structural invariants of a pool record
    pub fn check_invariants(&self) -> Result<(), StateError> {
        let fail = |reason: String| {
            Err(StateError::ValidationFailed {
                reason: format!("{}: {}", self.pool_id, reason),
            })
        };

        if self.token_reserve < Decimal::ZERO
            || self.egp_reserve < Decimal::ZERO
            || self.total_lp_supply < Decimal::ZERO
        {
            return fail("negative reserve or supply".to_string());
        }
        if self.total_lp_supply > Decimal::ZERO
            && (self.token_reserve.is_zero() || self.egp_reserve.is_zero())
        {
            return fail(format!(
                "LP supply {} without liquidity backing it",
                self.total_lp_supply
            ));
        }
        if self.total_lp_supply.is_zero()
            && (!self.token_reserve.is_zero() || !self.egp_reserve.is_zero())
        {
            return fail(format!(
                "reserves {} / {} left without LP supply",
                self.token_reserve, self.egp_reserve
            ));
        }
        let expected = if self.total_lp_supply > Decimal::ZERO {
            PoolStatus::Active
        } else {
            PoolStatus::Inactive
        };
        if self.status != expected {
            return fail(format!("status {:?} does not match LP supply", self.status));
        }

        Ok(())
    }
}

impl ReservePool for Pool {
    fn reserves(&self) -> (Decimal, Decimal) {
        (self.token_reserve, self.egp_reserve)
    }

    fn lp_supply(&self) -> Decimal {
        self.total_lp_supply
    }

    fn fee_schedule(&self) -> FeeSchedule {
        self.fees
    }
}
