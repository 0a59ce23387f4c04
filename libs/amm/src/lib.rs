//! # Property AMM - Constant-Product Pricing Engine
//!
//! ## Purpose
//!
//! Stateless mathematics for the fractional-property liquidity pools: swap
//! quoting, liquidity minting and burning, fee splitting and slippage bounds.
//! All amounts are exact decimals; nothing in this crate holds or mutates pool
//! state.
//!
//! ## Integration Points
//!
//! - **Input Sources**: Reserve snapshots and LP supply handed in by the pool ledger
//! - **Output Destinations**: `liquidity` service (ledger commits, quote service previews)
//! - **Precision**: `Decimal` amounts truncated to [`AMOUNT_SCALE`] places in the pool's favor
//!
//! ## Architecture Role
//!
//! ```text
//! QuoteService → PoolLedger → [PricingEngine] → SwapQuote / AddLiquidityQuote / RemoveLiquidityQuote
//!                                   ↑
//!                             FeeSchedule (fee rate + LP/platform split)
//! ```
//!
//! The core invariant the engine protects: for any sequence of swaps,
//! `token_reserve * egp_reserve` never decreases.

pub mod error;
pub mod fees;
pub mod pool_traits;
pub mod pricing;

pub use error::{AmmError, Result};
pub use fees::{FeeSchedule, FeeScheduleParts, FeeSplit};
pub use pool_traits::ReservePool;
pub use pricing::{
    AddLiquidityQuote, PricingEngine, RemoveLiquidityQuote, SwapDirection, SwapQuote,
    AMOUNT_SCALE, PRICE_SCALE,
};

/// Common types for AMM calculations
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
