//! Ledger events
//!
//! Settled state changes published for external mirrors (persistence,
//! on-chain relayer). Publishing is best effort: a full or disconnected
//! channel is logged and never fails the ledger operation.

use crate::pool_state::{PoolId, ProviderId};
use crate::trade_log::Trade;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// Pool registered (explicitly or by its first deposit)
    PoolOpened { pool_id: PoolId },
    /// Swap settled
    TradeExecuted(Trade),
    LiquidityAdded {
        pool_id: PoolId,
        provider_id: ProviderId,
        lp_tokens: Decimal,
        token_amount: Decimal,
        egp_amount: Decimal,
    },
    LiquidityRemoved {
        pool_id: PoolId,
        provider_id: ProviderId,
        lp_tokens: Decimal,
        token_amount: Decimal,
        egp_amount: Decimal,
    },
    /// Last LP token burned
    PoolDeactivated { pool_id: PoolId },
}

/// Sending half held by the ledger
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    sender: Sender<LedgerEvent>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, Receiver<LedgerEvent>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }

    pub(crate) fn publish(&self, event: LedgerEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Ledger event channel full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Ledger event receiver dropped");
            }
        }
    }
}
