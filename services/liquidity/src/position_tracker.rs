//! Position Tracker
//!
//! Per-provider LP-token holdings for every pool, plus fee attribution.
//!
//! Fees are attributed with a per-pool fee-growth accumulator: each swap adds
//! `lp_fee_egp / total_lp_supply` to the pool's growth, and a position's
//! share of fees is `lp_tokens * (growth - checkpoint)`. This keeps swaps
//! O(1) regardless of how many providers a pool has. `fees_earned` is a
//! reporting figure; the fees themselves never leave the reserves.
//!
//! Mutations are driven by the pool ledger while it holds the pool's write
//! lock, so balance checks and debits cannot interleave for one pool.

use crate::error::{LiquidityError, Result};
use crate::pool_state::{Pool, PoolId, ProviderId};
use amm::{AmmError, ReservePool, AMOUNT_SCALE};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    /// Debited to zero; kept so historical PnL stays queryable
    Closed,
}

/// One provider's claim on one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub pool_id: PoolId,
    pub provider_id: ProviderId,
    pub lp_tokens: Decimal,

    // Cost basis since the position was last opened
    pub initial_token_amount: Decimal,
    pub initial_egp_amount: Decimal,
    pub withdrawn_token_amount: Decimal,
    pub withdrawn_egp_amount: Decimal,

    /// Cumulative LP fees attributed, in EGP
    pub fees_earned: Decimal,
    pub fee_growth_checkpoint: Decimal,

    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mark-to-market view of a position, computed on read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionValuation {
    pub share_percent: Decimal,
    /// Reserves the position could withdraw right now
    pub token_amount: Decimal,
    pub egp_amount: Decimal,
    /// Current holdings valued in EGP at the spot price
    pub current_value_egp: Decimal,
    /// Holdings plus withdrawals minus contributions, all at the current spot price
    pub pnl_egp: Decimal,
    pub fees_earned: Decimal,
}

impl Position {
    fn open(pool_id: PoolId, provider_id: ProviderId, fee_growth: Decimal) -> Self {
        let now = Utc::now();
        Self {
            pool_id,
            provider_id,
            lp_tokens: Decimal::ZERO,
            initial_token_amount: Decimal::ZERO,
            initial_egp_amount: Decimal::ZERO,
            withdrawn_token_amount: Decimal::ZERO,
            withdrawn_egp_amount: Decimal::ZERO,
            fees_earned: Decimal::ZERO,
            fee_growth_checkpoint: fee_growth,
            status: PositionStatus::Open,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Fold fees accrued since the last checkpoint into `fees_earned`
    ///
    /// On overflow the checkpoint is left in place, so the fees stay pending.
    fn settle(&mut self, fee_growth: Decimal) {
        let settled = (fee_growth - self.fee_growth_checkpoint)
            .checked_mul(self.lp_tokens)
            .map(|pending| pending.round_dp(AMOUNT_SCALE).max(Decimal::ZERO))
            .and_then(|pending| self.fees_earned.checked_add(pending));

        match settled {
            Some(fees_earned) => {
                self.fees_earned = fees_earned;
                self.fee_growth_checkpoint = fee_growth;
            }
            None => warn!(
                "Fee settlement overflowed for {} in {}",
                self.provider_id, self.pool_id
            ),
        }
    }

    /// Value this position against the current pool state
    pub fn valuation(&self, pool: &Pool) -> Result<PositionValuation> {
        let share = if pool.total_lp_supply > Decimal::ZERO {
            self.lp_tokens
                .checked_div(pool.total_lp_supply)
                .ok_or_else(|| overflow("position share"))?
        } else {
            Decimal::ZERO
        };
        let spot_price = pool.spot_price().unwrap_or(Decimal::ZERO);
        let value_at_spot = |tokens: Decimal, egp: Decimal, operation: &'static str| {
            tokens
                .checked_mul(spot_price)
                .and_then(|v| v.checked_add(egp))
                .ok_or_else(|| overflow(operation))
        };

        let token_amount = checked_mul(share, pool.token_reserve, "position tokens")?;
        let egp_amount = checked_mul(share, pool.egp_reserve, "position EGP")?;
        let current_value_egp = value_at_spot(token_amount, egp_amount, "position value")?;
        let withdrawn_value = value_at_spot(
            self.withdrawn_token_amount,
            self.withdrawn_egp_amount,
            "withdrawn value",
        )?;
        let cost_basis = value_at_spot(
            self.initial_token_amount,
            self.initial_egp_amount,
            "cost basis",
        )?;
        let pnl_egp = current_value_egp
            .checked_add(withdrawn_value)
            .and_then(|v| v.checked_sub(cost_basis))
            .ok_or_else(|| overflow("position PnL"))?;

        Ok(PositionValuation {
            share_percent: checked_mul(share, Decimal::ONE_HUNDRED, "position share")?
                .round_dp(AMOUNT_SCALE),
            token_amount: token_amount.round_dp(AMOUNT_SCALE),
            egp_amount: egp_amount.round_dp(AMOUNT_SCALE),
            current_value_egp: current_value_egp.round_dp(AMOUNT_SCALE),
            pnl_egp: pnl_egp.round_dp(AMOUNT_SCALE),
            fees_earned: self.fees_earned,
        })
    }
}

fn overflow(operation: &'static str) -> LiquidityError {
    AmmError::Overflow { operation }.into()
}

fn checked_mul(lhs: Decimal, rhs: Decimal, operation: &'static str) -> Result<Decimal> {
    lhs.checked_mul(rhs).ok_or_else(|| overflow(operation))
}

fn checked_add(lhs: Decimal, rhs: Decimal, operation: &'static str) -> Result<Decimal> {
    lhs.checked_add(rhs).ok_or_else(|| overflow(operation))
}

/// Serializable contents of a [`PositionTracker`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub positions: Vec<Position>,
    pub fee_growth: Vec<(PoolId, Decimal)>,
}

/// Tracks LP positions across all pools
#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: DashMap<(PoolId, ProviderId), Position>,
    /// Cumulative LP fee (EGP) per LP token, per pool
    fee_growth: DashMap<PoolId, Decimal>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn growth(&self, pool_id: PoolId) -> Decimal {
        self.fee_growth
            .get(&pool_id)
            .map(|g| *g)
            .unwrap_or(Decimal::ZERO)
    }

    /// Current position with fees settled up to now
    pub fn get_position(&self, pool_id: PoolId, provider_id: ProviderId) -> Option<Position> {
        let growth = self.growth(pool_id);
        self.positions.get(&(pool_id, provider_id)).map(|entry| {
            let mut position = entry.clone();
            position.settle(growth);
            position
        })
    }

    /// LP tokens held by an open position, zero otherwise
    pub fn balance(&self, pool_id: PoolId, provider_id: ProviderId) -> Decimal {
        self.positions
            .get(&(pool_id, provider_id))
            .filter(|p| p.is_open())
            .map(|p| p.lp_tokens)
            .unwrap_or(Decimal::ZERO)
    }

    /// Add LP tokens and their contribution to a provider's position
    ///
    /// Creates the position on first deposit; a closed position is reopened
    /// with a fresh cost basis, keeping its cumulative fees. Nothing is
    /// written when a total would overflow.
    pub fn credit(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        lp_tokens: Decimal,
        token_amount: Decimal,
        egp_amount: Decimal,
    ) -> Result<Position> {
        let growth = self.growth(pool_id);
        let mut position = self
            .positions
            .get(&(pool_id, provider_id))
            .map(|entry| entry.clone())
            .unwrap_or_else(|| Position::open(pool_id, provider_id, growth));

        position.settle(growth);
        if !position.is_open() {
            position.status = PositionStatus::Open;
            position.initial_token_amount = Decimal::ZERO;
            position.initial_egp_amount = Decimal::ZERO;
            position.withdrawn_token_amount = Decimal::ZERO;
            position.withdrawn_egp_amount = Decimal::ZERO;
            position.opened_at = Utc::now();
        }

        position.lp_tokens = checked_add(position.lp_tokens, lp_tokens, "position LP tokens")?;
        position.initial_token_amount =
            checked_add(position.initial_token_amount, token_amount, "position token basis")?;
        position.initial_egp_amount =
            checked_add(position.initial_egp_amount, egp_amount, "position EGP basis")?;
        position.updated_at = Utc::now();

        debug!(
            "Credited {} LP tokens to {} in {} (holds {})",
            lp_tokens, provider_id, pool_id, position.lp_tokens
        );
        self.positions
            .insert((pool_id, provider_id), position.clone());
        Ok(position)
    }

    /// Remove LP tokens from a provider's position
    ///
    /// Fails with `InsufficientBalance` when the position holds fewer than
    /// `lp_tokens`. Debiting to zero closes the position.
    pub fn debit(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        lp_tokens: Decimal,
    ) -> Result<Position> {
        self.withdraw(pool_id, provider_id, lp_tokens, Decimal::ZERO, Decimal::ZERO)
    }

    /// Debit LP tokens and record the reserves paid out for them, in one step
    pub fn withdraw(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        lp_tokens: Decimal,
        token_amount: Decimal,
        egp_amount: Decimal,
    ) -> Result<Position> {
        if lp_tokens <= Decimal::ZERO {
            return Err(LiquidityError::invalid_amount(format!(
                "LP tokens to debit must be positive, got {}",
                lp_tokens
            )));
        }

        let growth = self.growth(pool_id);
        let mut entry = self
            .positions
            .get_mut(&(pool_id, provider_id))
            .filter(|p| p.is_open())
            .ok_or(LiquidityError::InsufficientBalance {
                held: Decimal::ZERO,
                requested: lp_tokens,
            })?;

        if lp_tokens > entry.lp_tokens {
            return Err(LiquidityError::InsufficientBalance {
                held: entry.lp_tokens,
                requested: lp_tokens,
            });
        }

        let mut position = entry.clone();
        position.settle(growth);
        position.withdrawn_token_amount =
            checked_add(position.withdrawn_token_amount, token_amount, "withdrawn tokens")?;
        position.withdrawn_egp_amount =
            checked_add(position.withdrawn_egp_amount, egp_amount, "withdrawn EGP")?;
        position.lp_tokens -= lp_tokens;
        if position.lp_tokens.is_zero() {
            position.status = PositionStatus::Closed;
            debug!("Closed position of {} in {}", provider_id, pool_id);
        }
        position.updated_at = Utc::now();

        *entry = position.clone();
        Ok(position)
    }

    /// Attribute an LP fee (in EGP) to every LP token of a pool
    pub fn accrue_fees(
        &self,
        pool_id: PoolId,
        lp_fee_egp: Decimal,
        total_lp_supply: Decimal,
    ) -> Result<()> {
        if lp_fee_egp <= Decimal::ZERO || total_lp_supply <= Decimal::ZERO {
            return Ok(());
        }
        let per_token = lp_fee_egp
            .checked_div(total_lp_supply)
            .ok_or_else(|| overflow("fee growth"))?;

        let growth = checked_add(self.growth(pool_id), per_token, "fee growth")?;
        self.fee_growth.insert(pool_id, growth);
        Ok(())
    }

    /// All positions in a pool, open and closed, ordered by provider
    pub fn positions_for_pool(&self, pool_id: PoolId) -> Vec<Position> {
        let growth = self.growth(pool_id);
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|entry| entry.key().0 == pool_id)
            .map(|entry| {
                let mut position = entry.value().clone();
                position.settle(growth);
                position
            })
            .collect();
        positions.sort_by_key(|p| p.provider_id);
        positions
    }

    /// All positions held by a provider, ordered by pool
    pub fn positions_for_provider(&self, provider_id: ProviderId) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|entry| entry.key().1 == provider_id)
            .map(|entry| entry.value().clone())
            .collect();
        for position in positions.iter_mut() {
            let growth = self.growth(position.pool_id);
            position.settle(growth);
        }
        positions.sort_by_key(|p| p.pool_id);
        positions
    }

    pub fn open_position_count(&self, pool_id: PoolId) -> usize {
        self.positions
            .iter()
            .filter(|entry| entry.key().0 == pool_id && entry.value().is_open())
            .count()
    }

    pub fn export(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            positions: self.positions.iter().map(|e| e.value().clone()).collect(),
            fee_growth: self.fee_growth.iter().map(|e| (*e.key(), *e.value())).collect(),
        }
    }

    /// Replace all tracked state with a snapshot
    pub fn import(&self, snapshot: TrackerSnapshot) {
        self.positions.clear();
        self.fee_growth.clear();
        for position in snapshot.positions {
            self.positions
                .insert((position.pool_id, position.provider_id), position);
        }
        for (pool_id, growth) in snapshot.fee_growth {
            self.fee_growth.insert(pool_id, growth);
        }
    }
}
