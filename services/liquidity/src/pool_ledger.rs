//! Pool Ledger
//!
//! Owns the authoritative state of every pool and is the only component that
//! mutates reserves. Each pool sits behind its own `RwLock`; every mutating
//! call holds that pool's write lock across read → compute → write, so two
//! operations on one pool never interleave while different pools never block
//! each other.
//!
//! Mutations are all-or-nothing: the new pool state is built on a copy,
//! validated, and only then swapped in together with the position update.

use crate::error::{LiquidityError, Result};
use crate::events::{EventSink, LedgerEvent};
use crate::pool_state::{Pool, PoolId, PoolStats, PoolStatus, ProviderId};
use crate::position_tracker::{Position, PositionStatus, PositionTracker, TrackerSnapshot};
use crate::trade_log::{PendingTrade, Trade, TradeLog};
use crate::traits::{StateError, Stateful};
use amm::{AmmError, FeeSchedule, ReservePool, SwapDirection, AMOUNT_SCALE};
use amm_config::LiquiditySettings;
use chrono::Utc;
use crossbeam_channel::Receiver;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// Reserves paid out by `remove_liquidity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub pool_id: PoolId,
    pub provider_id: ProviderId,
    pub lp_tokens_burned: Decimal,
    pub token_amount: Decimal,
    pub egp_amount: Decimal,
}

/// Full ledger contents for the external store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub pools: Vec<Pool>,
    pub positions: TrackerSnapshot,
    pub trades: Vec<Trade>,
}

/// Manages state for all pools
pub struct PoolLedger {
    /// One lock per pool
    pools: DashMap<PoolId, Arc<RwLock<Pool>>>,
    positions: PositionTracker,
    trades: TradeLog,
    default_fees: FeeSchedule,
    lock_timeout: Duration,
    events: Option<EventSink>,
}

impl Default for PoolLedger {
    fn default() -> Self {
        Self::new(FeeSchedule::default(), DEFAULT_LOCK_TIMEOUT)
    }
}

impl PoolLedger {
    pub fn new(default_fees: FeeSchedule, lock_timeout: Duration) -> Self {
        Self {
            pools: DashMap::new(),
            positions: PositionTracker::new(),
            trades: TradeLog::new(),
            default_fees,
            lock_timeout,
            events: None,
        }
    }

    pub fn from_settings(settings: &LiquiditySettings) -> anyhow::Result<Self> {
        Ok(Self::new(
            settings.fees.schedule()?,
            settings.ledger.lock_timeout(),
        ))
    }

    /// Ledger plus its event channel, sized by `ledger.event_buffer`
    pub fn with_events(
        settings: &LiquiditySettings,
    ) -> anyhow::Result<(Self, Receiver<LedgerEvent>)> {
        let mut ledger = Self::from_settings(settings)?;
        let receiver = ledger.subscribe(settings.ledger.event_buffer);
        Ok((ledger, receiver))
    }

    /// Publish settled changes on a bounded channel
    pub fn subscribe(&mut self, capacity: usize) -> Receiver<LedgerEvent> {
        let (sink, receiver) = EventSink::channel(capacity);
        self.events = Some(sink);
        receiver
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn trade_log(&self) -> &TradeLog {
        &self.trades
    }

    pub fn default_fees(&self) -> FeeSchedule {
        self.default_fees
    }

    /// Register an empty pool with its own fee schedule
    pub fn open_pool(&self, pool_id: PoolId, fees: FeeSchedule) -> Result<Pool> {
        let pool = match self.pools.entry(pool_id) {
            Entry::Occupied(_) => return Err(LiquidityError::PoolAlreadyExists(pool_id)),
            Entry::Vacant(vacant) => {
                let pool = Pool::new(pool_id, fees);
                vacant.insert(Arc::new(RwLock::new(pool.clone())));
                pool
            }
        };

        info!("Opened {} with fee rate {}", pool_id, fees.fee_rate());
        self.publish(LedgerEvent::PoolOpened { pool_id });
        Ok(pool)
    }

    /// Swap against a pool, failing rather than accepting less than `min_amount_out`
    pub fn execute_swap(
        &self,
        pool_id: PoolId,
        direction: SwapDirection,
        amount_in: Decimal,
        min_amount_out: Decimal,
    ) -> Result<Trade> {
        if min_amount_out < Decimal::ZERO {
            return Err(LiquidityError::invalid_amount(format!(
                "min_amount_out cannot be negative, got {}",
                min_amount_out
            )));
        }

        let handle = self.handle(pool_id)?;
        let trade = self.with_pool_mut(&handle, pool_id, |pool| {
            if !pool.is_active() {
                return Err(AmmError::EmptyPool {
                    token_reserve: pool.token_reserve,
                    egp_reserve: pool.egp_reserve,
                }
                .into());
            }

            let quote = pool.quote_swap(direction, amount_in)?;
            if quote.amount_out < min_amount_out {
                warn!(
                    "{} {} on {} rejected: output {} below minimum {}",
                    direction, amount_in, pool_id, quote.amount_out, min_amount_out
                );
                return Err(LiquidityError::SlippageExceeded {
                    side: "amount_out",
                    minimum: min_amount_out,
                    actual: quote.amount_out,
                });
            }

            let split = pool.fees.split(quote.fee_amount)?;
            let spot_price = pool.spot_price().unwrap_or(Decimal::ZERO);

            // Fee counters and volume are reported in EGP
            let (lp_fee_egp, platform_fee_egp, volume_egp) = match direction {
                SwapDirection::Buy => (split.lp_fee, split.platform_fee, amount_in),
                SwapDirection::Sell => (
                    checked(split.lp_fee.checked_mul(spot_price), "fee conversion")?,
                    checked(split.platform_fee.checked_mul(spot_price), "fee conversion")?,
                    quote.amount_out,
                ),
            };

            let mut updated = pool.clone();
            match direction {
                SwapDirection::Buy => {
                    updated.egp_reserve =
                        checked(pool.egp_reserve.checked_add(amount_in), "egp reserve")?;
                    updated.token_reserve = pool.token_reserve - quote.amount_out;
                }
                SwapDirection::Sell => {
                    updated.token_reserve =
                        checked(pool.token_reserve.checked_add(amount_in), "token reserve")?;
                    updated.egp_reserve = pool.egp_reserve - quote.amount_out;
                }
            }
            updated.trade_count = pool
                .trade_count
                .checked_add(1)
                .ok_or(AmmError::Overflow {
                    operation: "trade count",
                })?;
            updated.volume_egp = checked(pool.volume_egp.checked_add(volume_egp), "volume")?;
            updated.lp_fees_egp = checked(
                pool.lp_fees_egp
                    .checked_add(lp_fee_egp.round_dp(AMOUNT_SCALE)),
                "lp fees",
            )?;
            updated.platform_fees_egp = checked(
                pool.platform_fees_egp
                    .checked_add(platform_fee_egp.round_dp(AMOUNT_SCALE)),
                "platform fees",
            )?;
            updated.updated_at = Utc::now();
            updated.check_invariants()?;
            if let (Some(after), Some(before)) = (updated.product(), pool.product()) {
                debug_assert!(after >= before);
            }

            self.positions
                .accrue_fees(pool_id, lp_fee_egp, updated.total_lp_supply)?;
            *pool = updated;

            Ok(self.trades.append(PendingTrade {
                pool_id,
                direction,
                amount_in,
                amount_out: quote.amount_out,
                execution_price: quote.execution_price,
                price_impact_percent: quote.price_impact_percent,
                fee_amount: quote.fee_amount,
                lp_fee: split.lp_fee,
                platform_fee: split.platform_fee,
                pool_after: pool.snapshot(),
            }))
        })?;

        debug!(
            "Trade {} on {}: {} {} in, {} out at {}",
            trade.trade_id,
            pool_id,
            trade.direction,
            trade.amount_in,
            trade.amount_out,
            trade.execution_price
        );
        self.publish(LedgerEvent::TradeExecuted(trade.clone()));
        Ok(trade)
    }

    /// Deposit both assets and mint LP tokens to the provider
    ///
    /// The first deposit into an unknown pool creates it with the ledger's
    /// default fee schedule and sets its price.
    pub fn add_liquidity(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        token_amount: Decimal,
        egp_amount: Decimal,
        min_lp_tokens: Decimal,
    ) -> Result<Position> {
        self.add_liquidity_with(
            pool_id,
            provider_id,
            token_amount,
            egp_amount,
            min_lp_tokens,
            |_| Ok(()),
        )
    }

    /// `add_liquidity` with a caller check run against the pool under its
    /// write lock, so the check sees the reserves the deposit mints against
    pub fn add_liquidity_with(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        token_amount: Decimal,
        egp_amount: Decimal,
        min_lp_tokens: Decimal,
        check: impl FnOnce(&Pool) -> Result<()>,
    ) -> Result<Position> {
        if token_amount <= Decimal::ZERO || egp_amount <= Decimal::ZERO {
            return Err(LiquidityError::invalid_amount(format!(
                "deposit amounts must be positive, got {} tokens and {} EGP",
                token_amount, egp_amount
            )));
        }

        let handle = self.handle_or_open(pool_id);
        let (position, minted, seeded) = self.with_pool_mut(&handle, pool_id, |pool| {
            check(pool)?;
            let quote = pool.quote_add_liquidity(token_amount, egp_amount)?;
            if quote.lp_tokens_minted < min_lp_tokens {
                warn!(
                    "Deposit into {} rejected: {} LP tokens below minimum {}",
                    pool_id, quote.lp_tokens_minted, min_lp_tokens
                );
                return Err(LiquidityError::SlippageExceeded {
                    side: "lp_tokens",
                    minimum: min_lp_tokens,
                    actual: quote.lp_tokens_minted,
                });
            }

            let seeded = !pool.is_active();
            let mut updated = pool.clone();
            updated.token_reserve =
                checked(pool.token_reserve.checked_add(token_amount), "token reserve")?;
            updated.egp_reserve =
                checked(pool.egp_reserve.checked_add(egp_amount), "egp reserve")?;
            updated.total_lp_supply = checked(
                pool.total_lp_supply.checked_add(quote.lp_tokens_minted),
                "lp supply",
            )?;
            updated.status = PoolStatus::Active;
            updated.updated_at = Utc::now();
            updated.check_invariants()?;

            let position = self.positions.credit(
                pool_id,
                provider_id,
                quote.lp_tokens_minted,
                token_amount,
                egp_amount,
            )?;
            *pool = updated;
            Ok((position, quote.lp_tokens_minted, seeded))
        })?;

        if seeded {
            info!(
                "{} seeded by {}: {} tokens / {} EGP",
                pool_id, provider_id, token_amount, egp_amount
            );
        }
        debug!(
            "{} added {} tokens / {} EGP to {}, minted {} LP",
            provider_id, token_amount, egp_amount, pool_id, minted
        );
        self.publish(LedgerEvent::LiquidityAdded {
            pool_id,
            provider_id,
            lp_tokens: minted,
            token_amount,
            egp_amount,
        });
        Ok(position)
    }

    /// Burn LP tokens and pay out the provider's share of both reserves
    pub fn remove_liquidity(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        lp_tokens: Decimal,
        min_token_out: Decimal,
        min_egp_out: Decimal,
    ) -> Result<Withdrawal> {
        if lp_tokens <= Decimal::ZERO {
            return Err(LiquidityError::invalid_amount(format!(
                "LP tokens to burn must be positive, got {}",
                lp_tokens
            )));
        }

        let handle = self.handle(pool_id)?;
        let (withdrawal, deactivated) = self.with_pool_mut(&handle, pool_id, |pool| {
            let held = self.positions.balance(pool_id, provider_id);
            if lp_tokens > held {
                warn!(
                    "{} tried to burn {} LP in {} but holds {}",
                    provider_id, lp_tokens, pool_id, held
                );
                return Err(LiquidityError::InsufficientBalance {
                    held,
                    requested: lp_tokens,
                });
            }

            let quote = pool.quote_remove_liquidity(lp_tokens)?;
            if quote.token_amount_out < min_token_out {
                return Err(LiquidityError::SlippageExceeded {
                    side: "token_amount",
                    minimum: min_token_out,
                    actual: quote.token_amount_out,
                });
            }
            if quote.egp_amount_out < min_egp_out {
                return Err(LiquidityError::SlippageExceeded {
                    side: "egp_amount",
                    minimum: min_egp_out,
                    actual: quote.egp_amount_out,
                });
            }

            let mut updated = pool.clone();
            updated.token_reserve -= quote.token_amount_out;
            updated.egp_reserve -= quote.egp_amount_out;
            updated.total_lp_supply -= lp_tokens;
            let deactivated = updated.total_lp_supply.is_zero();
            if deactivated {
                updated.status = PoolStatus::Inactive;
            }
            updated.updated_at = Utc::now();
            updated.check_invariants()?;

            self.positions.withdraw(
                pool_id,
                provider_id,
                lp_tokens,
                quote.token_amount_out,
                quote.egp_amount_out,
            )?;
            *pool = updated;

            Ok((
                Withdrawal {
                    pool_id,
                    provider_id,
                    lp_tokens_burned: lp_tokens,
                    token_amount: quote.token_amount_out,
                    egp_amount: quote.egp_amount_out,
                },
                deactivated,
            ))
        })?;

        debug!(
            "{} burned {} LP in {} for {} tokens / {} EGP",
            provider_id, lp_tokens, pool_id, withdrawal.token_amount, withdrawal.egp_amount
        );
        self.publish(LedgerEvent::LiquidityRemoved {
            pool_id,
            provider_id,
            lp_tokens,
            token_amount: withdrawal.token_amount,
            egp_amount: withdrawal.egp_amount,
        });
        if deactivated {
            info!("{} deactivated: all LP tokens burned", pool_id);
            self.publish(LedgerEvent::PoolDeactivated { pool_id });
        }
        Ok(withdrawal)
    }

    /// Copy of a pool's current state
    pub fn pool(&self, pool_id: PoolId) -> Result<Pool> {
        let handle = self.handle(pool_id)?;
        let guard = self.read_pool(&handle, pool_id)?;
        Ok(guard.clone())
    }

    pub fn pool_ids(&self) -> Vec<PoolId> {
        let mut ids: Vec<PoolId> = self.pools.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn trades(&self, pool_id: PoolId) -> Vec<Trade> {
        self.trades.for_pool(pool_id)
    }

    pub fn stats(&self, pool_id: PoolId) -> Result<PoolStats> {
        let pool = self.pool(pool_id)?;
        Ok(PoolStats {
            pool_id,
            status: pool.status,
            spot_price: pool.spot_price(),
            total_value_egp: pool.total_value_egp()?,
            total_lp_supply: pool.total_lp_supply,
            trade_count: pool.trade_count,
            volume_egp: pool.volume_egp,
            lp_fees_egp: pool.lp_fees_egp,
            platform_fees_egp: pool.platform_fees_egp,
            open_positions: self.positions.open_position_count(pool_id),
        })
    }

    fn handle(&self, pool_id: PoolId) -> Result<Arc<RwLock<Pool>>> {
        self.pools
            .get(&pool_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LiquidityError::PoolNotFound(pool_id))
    }

    fn handle_or_open(&self, pool_id: PoolId) -> Arc<RwLock<Pool>> {
        let mut opened = false;
        let handle = self
            .pools
            .entry(pool_id)
            .or_insert_with(|| {
                opened = true;
                Arc::new(RwLock::new(Pool::new(pool_id, self.default_fees)))
            })
            .clone();

        if opened {
            info!("Opened {} on first deposit", pool_id);
            self.publish(LedgerEvent::PoolOpened { pool_id });
        }
        handle
    }

    /// Run `f` with the pool's write lock held, or fail after the lock timeout
    fn with_pool_mut<R>(
        &self,
        handle: &RwLock<Pool>,
        pool_id: PoolId,
        f: impl FnOnce(&mut Pool) -> Result<R>,
    ) -> Result<R> {
        let mut guard = handle.try_write_for(self.lock_timeout).ok_or_else(|| {
            warn!("Lock on {} not acquired within {:?}", pool_id, self.lock_timeout);
            LiquidityError::PoolLockTimeout {
                pool_id,
                waited: self.lock_timeout,
            }
        })?;
        f(&mut guard)
    }

    fn read_pool<'a>(
        &self,
        handle: &'a RwLock<Pool>,
        pool_id: PoolId,
    ) -> Result<RwLockReadGuard<'a, Pool>> {
        handle
            .try_read_for(self.lock_timeout)
            .ok_or(LiquidityError::PoolLockTimeout {
                pool_id,
                waited: self.lock_timeout,
            })
    }

    fn publish(&self, event: LedgerEvent) {
        if let Some(sink) = &self.events {
            sink.publish(event);
        }
    }
}

impl Stateful for PoolLedger {
    type Error = LiquidityError;

    /// JSON snapshot taken with every pool read-locked, so it is consistent
    fn snapshot(&self) -> Result<Vec<u8>> {
        let ids = self.pool_ids();
        let handles = ids
            .iter()
            .map(|id| self.handle(*id))
            .collect::<Result<Vec<_>>>()?;

        // Lock in id order; writers only ever hold one pool lock
        let guards = handles
            .iter()
            .zip(ids.iter())
            .map(|(handle, id)| self.read_pool(handle, *id))
            .collect::<Result<Vec<_>>>()?;

        let snapshot = LedgerSnapshot {
            pools: guards.iter().map(|guard| (**guard).clone()).collect(),
            positions: self.positions.export(),
            trades: self.trades.all(),
        };
        drop(guards);

        Ok(serde_json::to_vec(&snapshot)?)
    }

    fn restore(&self, snapshot: &[u8]) -> Result<()> {
        let snapshot: LedgerSnapshot = serde_json::from_slice(snapshot)?;
        for pool in &snapshot.pools {
            pool.check_invariants()?;
        }
        check_position_supply(&snapshot)?;

        self.trades.restore(snapshot.trades)?;
        self.positions.import(snapshot.positions);
        self.pools.clear();
        for pool in snapshot.pools {
            self.pools.insert(pool.pool_id, Arc::new(RwLock::new(pool)));
        }

        info!(
            "Restored ledger: {} pools, {} trades",
            self.pools.len(),
            self.trades.len()
        );
        Ok(())
    }
}

fn checked(value: Option<Decimal>, operation: &'static str) -> Result<Decimal> {
    value.ok_or_else(|| AmmError::Overflow { operation }.into())
}

/// Open positions must hold exactly each pool's LP supply
fn check_position_supply(snapshot: &LedgerSnapshot) -> Result<()> {
    let mut held: HashMap<PoolId, Decimal> = HashMap::new();
    for position in &snapshot.positions.positions {
        if !snapshot.pools.iter().any(|p| p.pool_id == position.pool_id) {
            return Err(StateError::ValidationFailed {
                reason: format!(
                    "position of {} in unknown {}",
                    position.provider_id, position.pool_id
                ),
            }
            .into());
        }
        if position.status == PositionStatus::Open {
            let total = held.entry(position.pool_id).or_default();
            *total = checked(total.checked_add(position.lp_tokens), "position supply")?;
        }
    }

    for pool in &snapshot.pools {
        let total = held.get(&pool.pool_id).copied().unwrap_or_default();
        if total != pool.total_lp_supply {
            return Err(StateError::ValidationFailed {
                reason: format!(
                    "{}: positions hold {} LP but supply is {}",
                    pool.pool_id, total, pool.total_lp_supply
                ),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rust_decimal_macros::dec;

    const POOL: PoolId = PoolId(1);
    const SEEDER: ProviderId = ProviderId(100);

    fn seeded_ledger() -> PoolLedger {
        let ledger = PoolLedger::default();
        ledger
            .add_liquidity(POOL, SEEDER, dec!(100000), dec!(750000), Decimal::ZERO)
            .unwrap();
        ledger
    }

    #[test]
    fn test_first_deposit_creates_pool() {
        let ledger = seeded_ledger();
        let pool = ledger.pool(POOL).unwrap();

        assert!(pool.is_active());
        assert_eq!(pool.fees, FeeSchedule::default());
        assert!((pool.total_lp_supply - dec!(273861.2788)).abs() < dec!(0.001));
        assert_eq!(
            ledger.positions().balance(POOL, SEEDER),
            pool.total_lp_supply
        );
    }

    #[test]
    fn test_swap_updates_reserves_and_logs_trade() {
        let ledger = seeded_ledger();
        let trade = ledger
            .execute_swap(POOL, SwapDirection::Buy, dec!(10000), Decimal::ZERO)
            .unwrap();

        let pool = ledger.pool(POOL).unwrap();
        assert_eq!(pool.egp_reserve, dec!(760000));
        assert_eq!(pool.token_reserve, dec!(100000) - trade.amount_out);
        assert_eq!(trade.pool_after, pool.snapshot());
        assert_eq!(trade.fee_amount, dec!(30));
        assert_eq!(trade.lp_fee, dec!(25));
        assert_eq!(trade.platform_fee, dec!(5));
        assert_eq!(pool.lp_fees_egp, dec!(25));
        assert_eq!(ledger.trades(POOL), vec![trade]);
    }

    #[test]
    fn test_swap_on_unknown_pool() {
        let ledger = PoolLedger::default();
        let err = ledger
            .execute_swap(PoolId(42), SwapDirection::Sell, dec!(1), Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolNotFound);
    }

    #[test]
    fn test_swap_on_unseeded_pool_is_empty() {
        let ledger = PoolLedger::default();
        ledger.open_pool(POOL, FeeSchedule::default()).unwrap();

        let err = ledger
            .execute_swap(POOL, SwapDirection::Buy, dec!(1), Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyPool);
    }

    #[test]
    fn test_open_pool_twice_fails() {
        let ledger = PoolLedger::default();
        let fees = FeeSchedule::lp_only(dec!(0.01)).unwrap();
        ledger.open_pool(POOL, fees).unwrap();

        let err = ledger.open_pool(POOL, FeeSchedule::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolAlreadyExists);
        assert_eq!(ledger.pool(POOL).unwrap().fees, fees);
    }

    #[test]
    fn test_lock_timeout_is_reported() {
        let ledger = PoolLedger::new(FeeSchedule::default(), Duration::from_millis(20));
        ledger
            .add_liquidity(POOL, SEEDER, dec!(1000), dec!(7500), Decimal::ZERO)
            .unwrap();

        let handle = ledger.handle(POOL).unwrap();
        let guard = handle.write();
        let err = ledger
            .execute_swap(POOL, SwapDirection::Buy, dec!(10), Decimal::ZERO)
            .unwrap_err();
        drop(guard);

        assert_eq!(err.kind(), ErrorKind::PoolLockTimeout);
        assert!(err.is_retryable());
        assert!(ledger.trades(POOL).is_empty());
    }

    #[test]
    fn test_reserve_overflow_is_an_error() {
        let ledger = PoolLedger::default();
        let huge = Decimal::from_i128_with_scale(5 * 10i128.pow(28), 0);
        ledger
            .add_liquidity(POOL, ProviderId(1), huge, dec!(1), Decimal::ZERO)
            .unwrap();
        let before = ledger.pool(POOL).unwrap();

        let err = ledger
            .add_liquidity(POOL, ProviderId(2), huge, dec!(1), Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
        assert_eq!(ledger.pool(POOL).unwrap(), before);
        assert!(ledger
            .positions()
            .get_position(POOL, ProviderId(2))
            .is_none());
    }

    #[test]
    fn test_volume_overflow_leaves_pool_unchanged() {
        let ledger = seeded_ledger();
        ledger
            .execute_swap(POOL, SwapDirection::Buy, dec!(100), Decimal::ZERO)
            .unwrap();
        {
            let handle = ledger.handle(POOL).unwrap();
            handle.write().volume_egp = Decimal::MAX;
        }
        let before = ledger.pool(POOL).unwrap();

        let err = ledger
            .execute_swap(POOL, SwapDirection::Buy, dec!(100), Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
        assert_eq!(ledger.pool(POOL).unwrap(), before);
        assert_eq!(ledger.trades(POOL).len(), 1);
    }

    #[test]
    fn test_deposit_check_runs_under_pool_lock() {
        let ledger = seeded_ledger();
        let handle = ledger.handle(POOL).unwrap();

        ledger
            .add_liquidity_with(POOL, ProviderId(2), dec!(10), dec!(75), Decimal::ZERO, |pool| {
                assert!(handle.try_read().is_none());
                assert_eq!(pool.token_reserve, dec!(100000));
                Ok(())
            })
            .unwrap();

        let before = ledger.pool(POOL).unwrap();
        let err = ledger
            .add_liquidity_with(POOL, ProviderId(3), dec!(10), dec!(75), Decimal::ZERO, |_| {
                Err(LiquidityError::invalid_amount("deposit refused"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        assert_eq!(ledger.pool(POOL).unwrap(), before);
        assert!(ledger
            .positions()
            .get_position(POOL, ProviderId(3))
            .is_none());
    }

    #[test]
    fn test_event_channel_sized_from_settings() {
        let mut settings = LiquiditySettings::default();
        settings.ledger.event_buffer = 8;

        let (ledger, events) = PoolLedger::with_events(&settings).unwrap();
        assert_eq!(events.capacity(), Some(8));

        ledger
            .add_liquidity(POOL, SEEDER, dec!(1000), dec!(7500), Decimal::ZERO)
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_full_withdrawal_deactivates_pool() {
        let ledger = seeded_ledger();
        let supply = ledger.pool(POOL).unwrap().total_lp_supply;

        let withdrawal = ledger
            .remove_liquidity(POOL, SEEDER, supply, Decimal::ZERO, Decimal::ZERO)
            .unwrap();
        assert_eq!(withdrawal.token_amount, dec!(100000));
        assert_eq!(withdrawal.egp_amount, dec!(750000));

        let pool = ledger.pool(POOL).unwrap();
        assert_eq!(pool.status, PoolStatus::Inactive);
        assert!(pool.token_reserve.is_zero());
        assert!(pool.egp_reserve.is_zero());
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_events_follow_operations() {
        let mut ledger = PoolLedger::default();
        let events = ledger.subscribe(16);

        ledger
            .add_liquidity(POOL, SEEDER, dec!(1000), dec!(7500), Decimal::ZERO)
            .unwrap();
        ledger
            .execute_swap(POOL, SwapDirection::Buy, dec!(75), Decimal::ZERO)
            .unwrap();

        let received: Vec<LedgerEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0], LedgerEvent::PoolOpened { pool_id: POOL });
        assert!(matches!(received[1], LedgerEvent::LiquidityAdded { .. }));
        assert!(matches!(received[2], LedgerEvent::TradeExecuted(_)));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let ledger = seeded_ledger();
        ledger
            .execute_swap(POOL, SwapDirection::Buy, dec!(5000), Decimal::ZERO)
            .unwrap();
        let bytes = ledger.snapshot().unwrap();

        let restored = PoolLedger::default();
        restored.restore(&bytes).unwrap();

        assert_eq!(restored.pool(POOL).unwrap(), ledger.pool(POOL).unwrap());
        assert_eq!(restored.trades(POOL), ledger.trades(POOL));
        assert_eq!(
            restored.positions().get_position(POOL, SEEDER),
            ledger.positions().get_position(POOL, SEEDER)
        );

        let next = restored
            .execute_swap(POOL, SwapDirection::Sell, dec!(100), Decimal::ZERO)
            .unwrap();
        assert_eq!(next.trade_id, 2);
    }

    #[test]
    fn test_restore_rejects_reserves_without_supply() {
        let ledger = seeded_ledger();
        let supply = ledger.pool(POOL).unwrap().total_lp_supply;
        ledger
            .remove_liquidity(POOL, SEEDER, supply, Decimal::ZERO, Decimal::ZERO)
            .unwrap();
        let mut snapshot: LedgerSnapshot =
            serde_json::from_slice(&ledger.snapshot().unwrap()).unwrap();
        snapshot.pools[0].token_reserve = dec!(500);
        snapshot.pools[0].egp_reserve = dec!(3750);

        let restored = PoolLedger::default();
        let err = restored
            .restore(&serde_json::to_vec(&snapshot).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(restored.pool_ids().is_empty());
    }

    #[test]
    fn test_restore_rejects_positions_off_supply() {
        let ledger = seeded_ledger();
        let mut snapshot: LedgerSnapshot =
            serde_json::from_slice(&ledger.snapshot().unwrap()).unwrap();
        snapshot.positions.positions[0].lp_tokens -= dec!(1);

        let restored = PoolLedger::default();
        let err = restored
            .restore(&serde_json::to_vec(&snapshot).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(restored.pool_ids().is_empty());
        assert!(restored.positions().get_position(POOL, SEEDER).is_none());
    }

    #[test]
    fn test_restore_rejects_position_in_unknown_pool() {
        let ledger = seeded_ledger();
        let mut snapshot: LedgerSnapshot =
            serde_json::from_slice(&ledger.snapshot().unwrap()).unwrap();
        let mut stray = snapshot.positions.positions[0].clone();
        stray.pool_id = PoolId(404);
        snapshot.positions.positions.push(stray);

        let err = PoolLedger::default()
            .restore(&serde_json::to_vec(&snapshot).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_restore_rejects_broken_pool() {
        let ledger = seeded_ledger();
        let mut snapshot: LedgerSnapshot =
            serde_json::from_slice(&ledger.snapshot().unwrap()).unwrap();
        snapshot.pools[0].egp_reserve = Decimal::ZERO;

        let restored = PoolLedger::default();
        let err = restored
            .restore(&serde_json::to_vec(&snapshot).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(restored.pool_ids().is_empty());
    }
}
