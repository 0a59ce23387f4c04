//! Append-only trade log

use crate::error::Result;
use crate::pool_state::{PoolId, PoolSnapshot};
use crate::traits::SequenceTracker;
use amm::SwapDirection;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An executed swap; immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub pool_id: PoolId,
    pub direction: SwapDirection,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub execution_price: Decimal,
    /// Slippage realized against the pre-trade spot price
    pub price_impact_percent: Decimal,
    pub fee_amount: Decimal,
    pub lp_fee: Decimal,
    pub platform_fee: Decimal,
    /// Pool state right after this trade
    pub pool_after: PoolSnapshot,
    pub executed_at: DateTime<Utc>,
}

/// Trade fields known before an id is assigned
#[derive(Debug, Clone)]
pub(crate) struct PendingTrade {
    pub pool_id: PoolId,
    pub direction: SwapDirection,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub execution_price: Decimal,
    pub price_impact_percent: Decimal,
    pub fee_amount: Decimal,
    pub lp_fee: Decimal,
    pub platform_fee: Decimal,
    pub pool_after: PoolSnapshot,
}

#[derive(Debug, Default)]
struct LogInner {
    sequence: SequenceTracker,
    trades: Vec<Trade>,
}

/// Ledger-wide trade history with monotonic trade ids
#[derive(Debug, Default)]
pub struct TradeLog {
    inner: RwLock<LogInner>,
}

impl TradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next trade id and append
    pub(crate) fn append(&self, pending: PendingTrade) -> Trade {
        let mut inner = self.inner.write();
        let trade = Trade {
            trade_id: inner.sequence.advance(),
            pool_id: pending.pool_id,
            direction: pending.direction,
            amount_in: pending.amount_in,
            amount_out: pending.amount_out,
            execution_price: pending.execution_price,
            price_impact_percent: pending.price_impact_percent,
            fee_amount: pending.fee_amount,
            lp_fee: pending.lp_fee,
            platform_fee: pending.platform_fee,
            pool_after: pending.pool_after,
            executed_at: Utc::now(),
        };
        inner.trades.push(trade.clone());
        trade
    }

    pub fn len(&self) -> usize {
        self.inner.read().trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_trade_id(&self) -> u64 {
        self.inner.read().sequence.last_sequence()
    }

    /// Trades for one pool, oldest first
    pub fn for_pool(&self, pool_id: PoolId) -> Vec<Trade> {
        self.inner
            .read()
            .trades
            .iter()
            .filter(|t| t.pool_id == pool_id)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Trade> {
        self.inner.read().trades.clone()
    }

    /// Replace the log, rejecting any gap in trade ids
    pub fn restore(&self, trades: Vec<Trade>) -> Result<()> {
        let mut sequence = SequenceTracker::new();
        for trade in &trades {
            sequence.track(trade.trade_id)?;
        }

        let mut inner = self.inner.write();
        inner.sequence = sequence;
        inner.trades = trades;
        Ok(())
    }
}
