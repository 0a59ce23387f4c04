//! Constant-product pricing with exact decimal arithmetic
//!
//! Every function here is pure: reserves are passed in, amounts come out, and
//! nothing is mutated. The caller (the pool ledger) applies the deltas.
//!
//! Rounding always favors the pool. Outputs and minted LP tokens are
//! truncated to [`AMOUNT_SCALE`] decimal places, required inputs are rounded
//! up.

use crate::error::{AmmError, Result};
use crate::fees::validate_rate;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept on token, currency and LP amounts
pub const AMOUNT_SCALE: u32 = 12;

/// Decimal places kept on prices and percentages
pub const PRICE_SCALE: u32 = 12;

const BPS_DENOMINATOR: u32 = 10_000;

/// Trade direction relative to the property token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwapDirection {
    /// Currency (EGP) in, property token out
    Buy,
    /// Property token in, currency (EGP) out
    Sell,
}

impl SwapDirection {
    /// Order the pool reserves as `(reserve_in, reserve_out)` for this direction
    pub fn orient(self, token_reserve: Decimal, egp_reserve: Decimal) -> (Decimal, Decimal) {
        match self {
            SwapDirection::Buy => (egp_reserve, token_reserve),
            SwapDirection::Sell => (token_reserve, egp_reserve),
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            SwapDirection::Buy => SwapDirection::Sell,
            SwapDirection::Sell => SwapDirection::Buy,
        }
    }
}

impl fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapDirection::Buy => write!(f, "BUY"),
            SwapDirection::Sell => write!(f, "SELL"),
        }
    }
}

/// Result of pricing a swap against a reserve snapshot
///
/// Prices are expressed as input units per output unit: EGP per token for a
/// buy, tokens per EGP for a sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub direction: SwapDirection,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    /// Fee charged on the full input amount
    pub fee_amount: Decimal,
    /// Effective price paid, including fee and slippage
    pub execution_price: Decimal,
    /// Pool price before the trade
    pub spot_price: Decimal,
    /// Deviation of the execution price from the pre-trade spot price
    pub price_impact_percent: Decimal,
    /// How far the trade moves the pool's spot price
    pub price_movement_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidityQuote {
    pub lp_tokens_minted: Decimal,
    /// Share of the pool the minted tokens represent after the deposit
    pub pool_share_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLiquidityQuote {
    pub token_amount_out: Decimal,
    pub egp_amount_out: Decimal,
}

/// Stateless constant-product math (x * y = k, fee on input)
pub struct PricingEngine;

impl PricingEngine {
    /// Price a swap of `amount_in` against the given reserves
    ///
    /// # Arguments
    /// * `direction` - `Buy` spends EGP for tokens, `Sell` spends tokens for EGP
    /// * `amount_in` - Full input amount, fee included
    /// * `token_reserve` / `egp_reserve` - Pool reserves before the trade
    /// * `fee_rate` - Fraction of the input kept by the pool (0.003 = 0.3%)
    pub fn quote_swap(
        direction: SwapDirection,
        amount_in: Decimal,
        token_reserve: Decimal,
        egp_reserve: Decimal,
        fee_rate: Decimal,
    ) -> Result<SwapQuote> {
        if amount_in <= Decimal::ZERO {
            return Err(AmmError::invalid_amount(format!(
                "swap input must be positive, got {}",
                amount_in
            )));
        }
        ensure_reserves(token_reserve, egp_reserve)?;
        validate_rate(fee_rate)?;

        let (reserve_in, reserve_out) = direction.orient(token_reserve, egp_reserve);

        let amount_in_after_fee = amount_in
            .checked_mul(Decimal::ONE - fee_rate)
            .ok_or_else(|| AmmError::overflow("input after fee"))?;
        let amount_out = Self::output_for_input(amount_in_after_fee, reserve_in, reserve_out)?;

        if amount_out >= reserve_out {
            return Err(AmmError::InsufficientLiquidity {
                requested: amount_out,
                available: reserve_out,
            });
        }
        if amount_out.is_zero() {
            return Err(AmmError::invalid_amount(format!(
                "swap input {} is too small to produce any output",
                amount_in
            )));
        }

        let fee_amount = amount_in
            .checked_mul(fee_rate)
            .ok_or_else(|| AmmError::overflow("fee amount"))?;

        let spot_price = ratio(reserve_in, reserve_out, "spot price")?;
        let execution_price = ratio(amount_in, amount_out, "execution price")?;
        let spot_after = ratio(
            reserve_in
                .checked_add(amount_in)
                .ok_or_else(|| AmmError::overflow("post-trade reserve"))?,
            reserve_out - amount_out,
            "post-trade spot price",
        )?;

        Ok(SwapQuote {
            direction,
            amount_in,
            amount_out,
            fee_amount,
            execution_price,
            spot_price,
            price_impact_percent: percent_change(spot_price, execution_price)?,
            price_movement_percent: percent_change(spot_price, spot_after)?,
        })
    }

    /// Input required to receive exactly `amount_out` (reverse calculation)
    ///
    /// Rounded up so that swapping the returned amount yields at least
    /// `amount_out`.
    pub fn quote_swap_exact_out(
        direction: SwapDirection,
        amount_out: Decimal,
        token_reserve: Decimal,
        egp_reserve: Decimal,
        fee_rate: Decimal,
    ) -> Result<Decimal> {
        if amount_out <= Decimal::ZERO {
            return Err(AmmError::invalid_amount(format!(
                "desired output must be positive, got {}",
                amount_out
            )));
        }
        ensure_reserves(token_reserve, egp_reserve)?;
        validate_rate(fee_rate)?;

        let (reserve_in, reserve_out) = direction.orient(token_reserve, egp_reserve);
        if amount_out >= reserve_out {
            return Err(AmmError::InsufficientLiquidity {
                requested: amount_out,
                available: reserve_out,
            });
        }

        // in_after_fee = reserve_in * amount_out / (reserve_out - amount_out)
        let amount_in_after_fee = reserve_in
            .checked_mul(amount_out)
            .and_then(|n| n.checked_div(reserve_out - amount_out))
            .ok_or_else(|| AmmError::overflow("required input"))?;
        let amount_in = amount_in_after_fee
            .checked_div(Decimal::ONE - fee_rate)
            .ok_or_else(|| AmmError::overflow("required input before fee"))?;

        Ok(amount_in.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::AwayFromZero))
    }

    /// LP tokens minted for a deposit
    ///
    /// The first deposit into an empty pool mints the geometric mean of the
    /// two amounts and fixes the pool's price. Later deposits mint against the
    /// smaller of the two contribution ratios, so over-supplying one side
    /// never buys extra shares. Ratio tolerance is the caller's policy.
    pub fn quote_add_liquidity(
        token_amount: Decimal,
        egp_amount: Decimal,
        token_reserve: Decimal,
        egp_reserve: Decimal,
        total_lp_supply: Decimal,
    ) -> Result<AddLiquidityQuote> {
        if token_amount <= Decimal::ZERO || egp_amount <= Decimal::ZERO {
            return Err(AmmError::invalid_amount(format!(
                "deposit amounts must be positive, got {} tokens and {} EGP",
                token_amount, egp_amount
            )));
        }
        if total_lp_supply < Decimal::ZERO {
            return Err(AmmError::invalid_amount("LP supply cannot be negative"));
        }

        let raw_minted = if total_lp_supply.is_zero() {
            let product = token_amount
                .checked_mul(egp_amount)
                .ok_or_else(|| AmmError::overflow("bootstrap deposit product"))?;
            Self::decimal_sqrt(product)?
        } else {
            ensure_reserves(token_reserve, egp_reserve)?;
            let token_ratio = ratio(token_amount, token_reserve, "token contribution ratio")?;
            let egp_ratio = ratio(egp_amount, egp_reserve, "EGP contribution ratio")?;
            total_lp_supply
                .checked_mul(token_ratio.min(egp_ratio))
                .ok_or_else(|| AmmError::overflow("LP tokens minted"))?
        };
        let minted = raw_minted.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero);

        if minted.is_zero() {
            return Err(AmmError::invalid_amount(
                "deposit is too small to mint any LP tokens",
            ));
        }

        let supply_after = total_lp_supply
            .checked_add(minted)
            .ok_or_else(|| AmmError::overflow("LP supply"))?;
        let pool_share_percent = (ratio(minted, supply_after, "pool share")? * dec!(100))
            .round_dp(PRICE_SCALE);

        Ok(AddLiquidityQuote {
            lp_tokens_minted: minted,
            pool_share_percent,
        })
    }

    /// Reserves returned for burning `lp_tokens_to_burn`
    ///
    /// Ownership of the LP tokens is checked by the position tracker, not here.
    pub fn quote_remove_liquidity(
        lp_tokens_to_burn: Decimal,
        token_reserve: Decimal,
        egp_reserve: Decimal,
        total_lp_supply: Decimal,
    ) -> Result<RemoveLiquidityQuote> {
        if lp_tokens_to_burn <= Decimal::ZERO {
            return Err(AmmError::invalid_amount(format!(
                "LP tokens to burn must be positive, got {}",
                lp_tokens_to_burn
            )));
        }
        if lp_tokens_to_burn > total_lp_supply {
            return Err(AmmError::invalid_amount(format!(
                "cannot burn {} LP tokens from a supply of {}",
                lp_tokens_to_burn, total_lp_supply
            )));
        }

        // Burning the whole supply hands back the reserves exactly
        if lp_tokens_to_burn == total_lp_supply {
            return Ok(RemoveLiquidityQuote {
                token_amount_out: token_reserve,
                egp_amount_out: egp_reserve,
            });
        }

        Ok(RemoveLiquidityQuote {
            token_amount_out: pro_rata(token_reserve, lp_tokens_to_burn, total_lp_supply)?,
            egp_amount_out: pro_rata(egp_reserve, lp_tokens_to_burn, total_lp_supply)?,
        })
    }

    /// EGP amount that matches the pool ratio for a token deposit
    pub fn matching_deposit(
        token_amount: Decimal,
        token_reserve: Decimal,
        egp_reserve: Decimal,
    ) -> Result<Decimal> {
        if token_amount <= Decimal::ZERO {
            return Err(AmmError::invalid_amount(format!(
                "token amount must be positive, got {}",
                token_amount
            )));
        }
        ensure_reserves(token_reserve, egp_reserve)?;

        Ok(token_amount
            .checked_mul(egp_reserve)
            .and_then(|n| n.checked_div(token_reserve))
            .ok_or_else(|| AmmError::overflow("matching deposit"))?
            .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::AwayFromZero))
    }

    /// Lowest acceptable output for a quoted amount and a tolerance in basis points
    pub fn min_amount_out(amount_out: Decimal, slippage_bps: u32) -> Result<Decimal> {
        if slippage_bps > BPS_DENOMINATOR {
            return Err(AmmError::invalid_amount(format!(
                "slippage tolerance {} bps exceeds 100%",
                slippage_bps
            )));
        }
        let keep = Decimal::from(BPS_DENOMINATOR - slippage_bps) / Decimal::from(BPS_DENOMINATOR);

        Ok((amount_out * keep).round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero))
    }

    /// Constant-product output: reserve_out * in / (reserve_in + in)
    ///
    /// Algebraically equal to `reserve_out - k / (reserve_in + in)` without
    /// forming `k`, which keeps large pools inside decimal range.
    fn output_for_input(
        amount_in_after_fee: Decimal,
        reserve_in: Decimal,
        reserve_out: Decimal,
    ) -> Result<Decimal> {
        let numerator = amount_in_after_fee
            .checked_mul(reserve_out)
            .ok_or_else(|| AmmError::overflow("swap output numerator"))?;
        let denominator = reserve_in
            .checked_add(amount_in_after_fee)
            .ok_or_else(|| AmmError::overflow("swap output denominator"))?;

        Ok(numerator
            .checked_div(denominator)
            .ok_or_else(|| AmmError::overflow("swap output"))?
            .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero))
    }

    /// Calculate square root of a Decimal using Newton's method
    pub fn decimal_sqrt(value: Decimal) -> Result<Decimal> {
        if value < Decimal::ZERO {
            return Err(AmmError::invalid_amount(
                "cannot take the square root of a negative number",
            ));
        }
        if value.is_zero() {
            return Ok(Decimal::ZERO);
        }

        let mut x = value;
        let mut last_x = Decimal::ZERO;
        let epsilon = dec!(0.0000000000001);

        // Newton's method: x_new = (x + value/x) / 2
        for _ in 0..200 {
            let quotient = value
                .checked_div(x)
                .ok_or_else(|| AmmError::overflow("square root"))?;
            let next_x = (x + quotient) / dec!(2);

            if (next_x - x).abs() < epsilon || next_x == last_x {
                return Ok(next_x);
            }

            last_x = x;
            x = next_x;
        }

        Ok(x)
    }
}

fn ensure_reserves(token_reserve: Decimal, egp_reserve: Decimal) -> Result<()> {
    if token_reserve <= Decimal::ZERO || egp_reserve <= Decimal::ZERO {
        return Err(AmmError::EmptyPool {
            token_reserve,
            egp_reserve,
        });
    }
    Ok(())
}

fn ratio(numerator: Decimal, denominator: Decimal, operation: &'static str) -> Result<Decimal> {
    numerator
        .checked_div(denominator)
        .ok_or_else(|| AmmError::overflow(operation))
}

fn pro_rata(reserve: Decimal, lp_tokens: Decimal, total_lp_supply: Decimal) -> Result<Decimal> {
    Ok(reserve
        .checked_mul(lp_tokens)
        .and_then(|n| n.checked_div(total_lp_supply))
        .ok_or_else(|| AmmError::overflow("pro-rata withdrawal"))?
        .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero))
}

/// |value - reference| / reference as a percentage
fn percent_change(reference: Decimal, value: Decimal) -> Result<Decimal> {
    let change = ratio((value - reference).abs(), reference, "percent change")?;
    Ok((change * dec!(100)).round_dp(PRICE_SCALE))
}
