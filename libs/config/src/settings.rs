//! Liquidity Settings Module
//!
//! Loads pool settings from an optional TOML file, an optional
//! environment-specific override file, and `AMM__`-prefixed environment
//! variables, in that order.

use amm::FeeSchedule;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn, Level};

/// Prefix for environment variable overrides (`AMM__FEES__FEE_RATE`)
pub const ENV_PREFIX: &str = "AMM";

const DEFAULT_CONFIG_PATH: &str = "config/liquidity.toml";

/// Top-level settings for the liquidity service
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LiquiditySettings {
    /// Default filter for the embedding binary's subscriber when `RUST_LOG`
    /// is unset
    pub log_level: String,

    /// Default fee schedule for newly seeded pools
    pub fees: FeeSettings,

    /// Quote policy thresholds
    pub quote: QuoteSettings,

    /// Ledger concurrency settings
    pub ledger: LedgerSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct FeeSettings {
    pub fee_rate: Decimal,
    pub lp_fee_share: Decimal,
    pub platform_fee_share: Decimal,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct QuoteSettings {
    /// Quotes above this price impact are flagged for the caller
    pub high_price_impact_percent: Decimal,
    /// Maximum deviation of a deposit from the pool ratio
    pub ratio_tolerance_percent: Decimal,
    /// Tolerance used to suggest `min_amount_out` on quotes
    pub default_slippage_bps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LedgerSettings {
    /// How long a mutating call waits for a pool lock before failing
    pub lock_timeout_ms: u64,
    /// Capacity of the ledger event channel
    pub event_buffer: usize,
}

impl Default for LiquiditySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            fees: FeeSettings::default(),
            quote: QuoteSettings::default(),
            ledger: LedgerSettings::default(),
        }
    }
}

impl Default for FeeSettings {
    fn default() -> Self {
        let schedule = FeeSchedule::default();
        Self {
            fee_rate: schedule.fee_rate(),
            lp_fee_share: schedule.lp_fee_share(),
            platform_fee_share: schedule.platform_fee_share(),
        }
    }
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            high_price_impact_percent: Decimal::from(5),
            ratio_tolerance_percent: Decimal::ONE,
            default_slippage_bps: 50,
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 250,
            event_buffer: 1024,
        }
    }
}

impl FeeSettings {
    /// Validated fee schedule
    pub fn schedule(&self) -> Result<FeeSchedule> {
        FeeSchedule::new(self.fee_rate, self.lp_fee_share, self.platform_fee_share)
            .context("Invalid fee settings")
    }
}

impl LedgerSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl LiquiditySettings {
    /// Load settings from files with environment overrides
    ///
    /// `base_path` defaults to `config/liquidity.toml` and may be absent, in
    /// which case built-in defaults apply. `environment` selects
    /// `environments/<name>.toml` next to the base file.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        Self::load_with_prefix(base_path, environment, ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(
        base_path: Option<&Path>,
        environment: Option<&str>,
        env_prefix: &str,
    ) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));

        let mut builder = Config::builder().add_source(File::from(base).required(false));

        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or(Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment settings: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment settings not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build settings")?;
        let settings: Self = config
            .try_deserialize()
            .context("Failed to deserialize settings")?;

        settings.validate()?;
        debug!(?settings, "Loaded liquidity settings");
        Ok(settings)
    }

    /// Parsed `log_level`, for `EnvFilter::new` or `with_max_level`
    pub fn default_log_level(&self) -> Result<Level> {
        self.log_level
            .parse::<Level>()
            .with_context(|| format!("Invalid log_level {:?}", self.log_level))
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> Result<()> {
        self.fees.schedule()?;
        self.default_log_level()?;

        if self.quote.high_price_impact_percent <= Decimal::ZERO {
            bail!(
                "high_price_impact_percent must be positive, got {}",
                self.quote.high_price_impact_percent
            );
        }
        if self.quote.ratio_tolerance_percent < Decimal::ZERO {
            bail!(
                "ratio_tolerance_percent cannot be negative, got {}",
                self.quote.ratio_tolerance_percent
            );
        }
        if self.quote.default_slippage_bps > 10_000 {
            bail!(
                "default_slippage_bps must be at most 10000, got {}",
                self.quote.default_slippage_bps
            );
        }
        if self.ledger.lock_timeout_ms == 0 {
            bail!("lock_timeout_ms must be greater than zero");
        }
        if self.ledger.event_buffer == 0 {
            bail!("event_buffer must be greater than zero");
        }

        Ok(())
    }
}

/// Convenience function to load settings from the default location
pub fn load_settings(environment: Option<&str>) -> Result<LiquiditySettings> {
    LiquiditySettings::load(None, environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_base_settings() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("liquidity.toml");

        let config_content = r#"
log_level = "debug"

[fees]
fee_rate = "0.005"
lp_fee_share = "0.004"
platform_fee_share = "0.001"

[quote]
high_price_impact_percent = "7.5"

[ledger]
lock_timeout_ms = 100
"#;

        fs::write(&config_path, config_content).unwrap();

        let settings =
            LiquiditySettings::load_with_prefix(Some(&config_path), None, "AMMTESTBASE").unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.default_log_level().unwrap(), Level::DEBUG);
        assert_eq!(settings.fees.fee_rate, dec!(0.005));
        assert_eq!(settings.quote.high_price_impact_percent, dec!(7.5));
        // Unset keys keep their defaults
        assert_eq!(settings.quote.default_slippage_bps, 50);
        assert_eq!(settings.ledger.lock_timeout(), Duration::from_millis(100));
        assert_eq!(settings.ledger.event_buffer, 1024);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = LiquiditySettings::load_with_prefix(
            Some(&dir.path().join("absent.toml")),
            None,
            "AMMTESTMISSING",
        )
        .unwrap();

        assert_eq!(settings, LiquiditySettings::default());
        assert_eq!(settings.fees.schedule().unwrap(), FeeSchedule::default());
    }

    #[test]
    fn test_environment_file_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("liquidity.toml");
        fs::write(&config_path, toml::to_string(&LiquiditySettings::default()).unwrap()).unwrap();

        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("staging.toml"),
            "[quote]\nratio_tolerance_percent = \"2.5\"\n",
        )
        .unwrap();

        let settings =
            LiquiditySettings::load_with_prefix(Some(&config_path), Some("staging"), "AMMTESTENV")
                .unwrap();
        assert_eq!(settings.quote.ratio_tolerance_percent, dec!(2.5));
    }

    #[test]
    fn test_env_var_override() {
        let dir = tempdir().unwrap();
        std::env::set_var("AMMTESTVAR__LEDGER__LOCK_TIMEOUT_MS", "40");

        let settings = LiquiditySettings::load_with_prefix(
            Some(&dir.path().join("absent.toml")),
            None,
            "AMMTESTVAR",
        )
        .unwrap();
        std::env::remove_var("AMMTESTVAR__LEDGER__LOCK_TIMEOUT_MS");

        assert_eq!(settings.ledger.lock_timeout_ms, 40);
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("liquidity.toml");
        fs::write(&config_path, "log_level = \"chatty\"\n").unwrap();

        let result =
            LiquiditySettings::load_with_prefix(Some(&config_path), None, "AMMTESTBADLEVEL");
        assert!(result.is_err());

        let settings = LiquiditySettings {
            log_level: "WARN".to_string(),
            ..LiquiditySettings::default()
        };
        assert_eq!(settings.default_log_level().unwrap(), Level::WARN);
    }

    #[test]
    fn test_inconsistent_fee_split_is_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("liquidity.toml");
        fs::write(
            &config_path,
            "[fees]\nfee_rate = \"0.003\"\nlp_fee_share = \"0.003\"\nplatform_fee_share = \"0.001\"\n",
        )
        .unwrap();

        let result =
            LiquiditySettings::load_with_prefix(Some(&config_path), None, "AMMTESTBADFEE");
        assert!(result.is_err());
    }
}
