//! # Property Liquidity - Pool Ledger and Quote Service
//!
//! ## Purpose
//!
//! Authoritative state for fractional-property liquidity pools: reserves and
//! LP supply per pool, per-provider LP positions with fee attribution, the
//! append-only trade log, and the quote service callers trade through.
//!
//! ## Integration Points
//!
//! - **Input Sources**: Swap and liquidity requests from the marketplace API
//! - **Pricing**: Stateless constant-product math from the `amm` crate
//! - **Output Destinations**: [`LedgerEvent`]s on a bounded channel for the
//!   persistence layer and on-chain relayer
//! - **State Persistence**: JSON snapshots through the [`Stateful`] trait
//! - **Configuration**: [`amm_config::LiquiditySettings`]
//!
//! ## Architecture Role
//!
//! ```text
//! Request → [QuoteService] → [PoolLedger] ──→ PricingEngine (amm)
//!                                 │
//!                    ┌────────────┼─────────────┐
//!                    ↓            ↓             ↓
//!            PositionTracker   TradeLog    LedgerEvent channel
//! ```
//!
//! Every pool has its own lock. A mutating call holds that pool's write lock
//! from reading reserves to committing the new state, so operations on one
//! pool are serialized and operations on different pools run in parallel.
//! A failed call leaves pool, position and trade state exactly as it was.

pub mod error;
pub mod events;
pub mod pool_ledger;
pub mod pool_state;
pub mod position_tracker;
pub mod quote_service;
pub mod trade_log;
pub mod traits;

pub use error::{ErrorKind, LiquidityError, Result};
pub use events::LedgerEvent;
pub use pool_ledger::{LedgerSnapshot, PoolLedger, Withdrawal};
pub use pool_state::{Pool, PoolId, PoolSnapshot, PoolStats, PoolStatus, ProviderId};
pub use position_tracker::{
    Position, PositionStatus, PositionTracker, PositionValuation, TrackerSnapshot,
};
pub use quote_service::{PositionReport, Quote, QuotePolicy, QuoteService};
pub use trade_log::{Trade, TradeLog};

// Re-export core traits for convenience
pub use traits::{SequenceTracker, StateError, Stateful};

pub use amm::{FeeSchedule, ReservePool, SwapDirection};
