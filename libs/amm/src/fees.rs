//! Trading fee schedule and LP/platform split

use crate::error::{AmmError, Result};
use crate::pricing::AMOUNT_SCALE;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Fee taken from every swap input, split between LPs and the platform
///
/// `lp_fee_share + platform_fee_share` always equals `fee_rate`. The split is
/// a reporting concern: the whole fee stays inside the pool reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FeeScheduleParts", into = "FeeScheduleParts")]
pub struct FeeSchedule {
    fee_rate: Decimal,
    lp_fee_share: Decimal,
    platform_fee_share: Decimal,
}

/// Unvalidated wire form of [`FeeSchedule`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeScheduleParts {
    pub fee_rate: Decimal,
    pub lp_fee_share: Decimal,
    pub platform_fee_share: Decimal,
}

/// A fee amount divided into its LP and platform portions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeSplit {
    pub lp_fee: Decimal,
    pub platform_fee: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.003),
            lp_fee_share: dec!(0.0025),
            platform_fee_share: dec!(0.0005),
        }
    }
}

impl FeeSchedule {
    pub fn new(
        fee_rate: Decimal,
        lp_fee_share: Decimal,
        platform_fee_share: Decimal,
    ) -> Result<Self> {
        validate_rate(fee_rate)?;
        if lp_fee_share < Decimal::ZERO || platform_fee_share < Decimal::ZERO {
            return Err(AmmError::InvalidFee {
                reason: "fee shares must be non-negative".to_string(),
            });
        }
        if lp_fee_share + platform_fee_share != fee_rate {
            return Err(AmmError::InvalidFee {
                reason: format!(
                    "LP share {} + platform share {} must equal fee rate {}",
                    lp_fee_share, platform_fee_share, fee_rate
                ),
            });
        }

        Ok(Self {
            fee_rate,
            lp_fee_share,
            platform_fee_share,
        })
    }

    /// Schedule where the entire fee goes to liquidity providers
    pub fn lp_only(fee_rate: Decimal) -> Result<Self> {
        Self::new(fee_rate, fee_rate, Decimal::ZERO)
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    pub fn lp_fee_share(&self) -> Decimal {
        self.lp_fee_share
    }

    pub fn platform_fee_share(&self) -> Decimal {
        self.platform_fee_share
    }

    /// Split a fee charged at `fee_rate` into LP and platform portions
    ///
    /// The LP portion is truncated to [`AMOUNT_SCALE`]; the platform portion
    /// takes the remainder so the two always sum to `fee_amount`.
    pub fn split(&self, fee_amount: Decimal) -> Result<FeeSplit> {
        if fee_amount.is_zero() || self.fee_rate.is_zero() {
            return Ok(FeeSplit::default());
        }

        let lp_fee = fee_amount
            .checked_mul(self.lp_fee_share)
            .and_then(|v| v.checked_div(self.fee_rate))
            .ok_or_else(|| AmmError::overflow("LP fee split"))?
            .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero);

        Ok(FeeSplit {
            lp_fee,
            platform_fee: fee_amount - lp_fee,
        })
    }
}

impl TryFrom<FeeScheduleParts> for FeeSchedule {
    type Error = AmmError;

    fn try_from(parts: FeeScheduleParts) -> Result<Self> {
        Self::new(parts.fee_rate, parts.lp_fee_share, parts.platform_fee_share)
    }
}

impl From<FeeSchedule> for FeeScheduleParts {
    fn from(schedule: FeeSchedule) -> Self {
        Self {
            fee_rate: schedule.fee_rate,
            lp_fee_share: schedule.lp_fee_share,
            platform_fee_share: schedule.platform_fee_share,
        }
    }
}

pub(crate) fn validate_rate(fee_rate: Decimal) -> Result<()> {
    if fee_rate < Decimal::ZERO || fee_rate >= Decimal::ONE {
        return Err(AmmError::InvalidFee {
            reason: format!("fee rate {} must be in [0, 1)", fee_rate),
        });
    }
    Ok(())
}
