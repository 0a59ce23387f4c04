//! # Liquidity Configuration
//!
//! Centralized settings for the property liquidity pools: default fee
//! schedule, quote policy thresholds and ledger concurrency limits.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use amm_config::LiquiditySettings;
//!
//! let settings = LiquiditySettings::load(None, Some("production"))?;
//! let fees = settings.fees.schedule()?;
//! let timeout = settings.ledger.lock_timeout();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod settings;

pub use settings::{
    load_settings, FeeSettings, LedgerSettings, LiquiditySettings, QuoteSettings, ENV_PREFIX,
};
