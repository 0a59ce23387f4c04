//! Quote Service
//!
//! Entry point for callers. Quotes are computed against a copy of the pool
//! taken under a short read lock; execution delegates to the [`PoolLedger`],
//! which re-prices under the write lock and enforces the caller's bounds.

use crate::error::{LiquidityError, Result};
use crate::pool_ledger::{PoolLedger, Withdrawal};
use crate::pool_state::{PoolId, PoolStats, ProviderId};
use crate::position_tracker::{Position, PositionValuation};
use crate::trade_log::Trade;
use amm::{
    AddLiquidityQuote, AmmError, PricingEngine, RemoveLiquidityQuote, ReservePool, SwapDirection,
    SwapQuote, AMOUNT_SCALE,
};
use amm_config::LiquiditySettings;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Thresholds applied on top of raw pricing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotePolicy {
    /// Quotes above this impact are flagged
    pub high_price_impact_percent: Decimal,
    /// Largest deviation of a deposit from the pool ratio
    pub ratio_tolerance_percent: Decimal,
    /// Used for the suggested minimum output
    pub default_slippage_bps: u32,
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self {
            high_price_impact_percent: dec!(5),
            ratio_tolerance_percent: dec!(1),
            default_slippage_bps: 50,
        }
    }
}

/// A swap quote plus the policy verdict on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub pool_id: PoolId,
    #[serde(flatten)]
    pub quote: SwapQuote,
    pub high_price_impact: bool,
    /// `amount_out` less the default slippage tolerance
    pub suggested_min_amount_out: Decimal,
}

/// Position with its mark-to-market valuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub position: Position,
    pub valuation: PositionValuation,
}

pub struct QuoteService {
    ledger: Arc<PoolLedger>,
    policy: QuotePolicy,
}

impl QuoteService {
    pub fn new(ledger: Arc<PoolLedger>, policy: QuotePolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn from_settings(ledger: Arc<PoolLedger>, settings: &LiquiditySettings) -> Self {
        let policy = QuotePolicy {
            high_price_impact_percent: settings.quote.high_price_impact_percent,
            ratio_tolerance_percent: settings.quote.ratio_tolerance_percent,
            default_slippage_bps: settings.quote.default_slippage_bps,
        };
        Self::new(ledger, policy)
    }

    pub fn ledger(&self) -> &Arc<PoolLedger> {
        &self.ledger
    }

    pub fn policy(&self) -> QuotePolicy {
        self.policy
    }

    /// Price a swap without touching pool state
    pub fn get_quote(
        &self,
        pool_id: PoolId,
        direction: SwapDirection,
        amount_in: Decimal,
    ) -> Result<Quote> {
        let pool = self.ledger.pool(pool_id)?;
        let quote = pool.quote_swap(direction, amount_in)?;
        let suggested_min_amount_out =
            PricingEngine::min_amount_out(quote.amount_out, self.policy.default_slippage_bps)?;
        let high_price_impact = quote.price_impact_percent > self.policy.high_price_impact_percent;

        if high_price_impact {
            debug!(
                "High impact quote on {}: {}% for {} {}",
                pool_id, quote.price_impact_percent, direction, amount_in
            );
        }

        Ok(Quote {
            pool_id,
            quote,
            high_price_impact,
            suggested_min_amount_out,
        })
    }

    /// Input needed to receive exactly `amount_out`
    pub fn quote_for_output(
        &self,
        pool_id: PoolId,
        direction: SwapDirection,
        amount_out: Decimal,
    ) -> Result<Decimal> {
        let pool = self.ledger.pool(pool_id)?;
        Ok(pool.quote_swap_exact_out(direction, amount_out)?)
    }

    pub fn execute_trade(
        &self,
        pool_id: PoolId,
        direction: SwapDirection,
        amount_in: Decimal,
        min_amount_out: Decimal,
    ) -> Result<Trade> {
        self.ledger
            .execute_swap(pool_id, direction, amount_in, min_amount_out)
    }

    /// Deposit liquidity, rejecting deposits too far off the pool ratio
    ///
    /// The ratio is checked under the pool's write lock against the reserves
    /// the deposit mints on. Seeding an empty pool sets its price, so no
    /// ratio applies.
    pub fn provide_liquidity(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        token_amount: Decimal,
        egp_amount: Decimal,
        min_lp_tokens: Decimal,
    ) -> Result<Position> {
        self.ledger.add_liquidity_with(
            pool_id,
            provider_id,
            token_amount,
            egp_amount,
            min_lp_tokens,
            |pool| {
                if !pool.is_active() {
                    return Ok(());
                }
                self.check_ratio(pool.token_reserve, pool.egp_reserve, token_amount, egp_amount)
            },
        )
    }

    pub fn withdraw_liquidity(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
        lp_tokens: Decimal,
        min_token_out: Decimal,
        min_egp_out: Decimal,
    ) -> Result<Withdrawal> {
        self.ledger
            .remove_liquidity(pool_id, provider_id, lp_tokens, min_token_out, min_egp_out)
    }

    /// LP tokens a deposit would mint right now; unknown pools preview a bootstrap
    pub fn preview_add_liquidity(
        &self,
        pool_id: PoolId,
        token_amount: Decimal,
        egp_amount: Decimal,
    ) -> Result<AddLiquidityQuote> {
        match self.ledger.pool(pool_id) {
            Ok(pool) => Ok(pool.quote_add_liquidity(token_amount, egp_amount)?),
            Err(LiquidityError::PoolNotFound(_)) => Ok(PricingEngine::quote_add_liquidity(
                token_amount,
                egp_amount,
                Decimal::ZERO,
                Decimal::ZERO,
                Decimal::ZERO,
            )?),
            Err(err) => Err(err),
        }
    }

    pub fn preview_remove_liquidity(
        &self,
        pool_id: PoolId,
        lp_tokens: Decimal,
    ) -> Result<RemoveLiquidityQuote> {
        let pool = self.ledger.pool(pool_id)?;
        Ok(pool.quote_remove_liquidity(lp_tokens)?)
    }

    /// EGP to pair with `token_amount` at the pool's current ratio
    pub fn matching_deposit(&self, pool_id: PoolId, token_amount: Decimal) -> Result<Decimal> {
        let pool = self.ledger.pool(pool_id)?;
        Ok(PricingEngine::matching_deposit(
            token_amount,
            pool.token_reserve,
            pool.egp_reserve,
        )?)
    }

    pub fn position_report(
        &self,
        pool_id: PoolId,
        provider_id: ProviderId,
    ) -> Result<Option<PositionReport>> {
        let pool = self.ledger.pool(pool_id)?;
        self.ledger
            .positions()
            .get_position(pool_id, provider_id)
            .map(|position| {
                Ok(PositionReport {
                    valuation: position.valuation(&pool)?,
                    position,
                })
            })
            .transpose()
    }

    pub fn pool_stats(&self, pool_id: PoolId) -> Result<PoolStats> {
        self.ledger.stats(pool_id)
    }

    fn check_ratio(
        &self,
        token_reserve: Decimal,
        egp_reserve: Decimal,
        token_amount: Decimal,
        egp_amount: Decimal,
    ) -> Result<()> {
        if token_amount <= Decimal::ZERO || egp_amount <= Decimal::ZERO {
            // Rejected with InvalidAmount by the ledger
            return Ok(());
        }

        let pool_ratio = egp_reserve
            .checked_div(token_reserve)
            .ok_or_else(|| LiquidityError::invalid_amount("pool ratio is undefined"))?;
        let deposit_ratio = egp_amount
            .checked_div(token_amount)
            .ok_or_else(|| LiquidityError::invalid_amount("deposit ratio is undefined"))?;
        let deviation_percent = (deposit_ratio - pool_ratio)
            .abs()
            .checked_div(pool_ratio)
            .and_then(|d| d.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or(AmmError::Overflow {
                operation: "ratio deviation",
            })?
            .round_dp(AMOUNT_SCALE);

        if deviation_percent > self.policy.ratio_tolerance_percent {
            warn!(
                "Deposit of {} tokens / {} EGP deviates {}% from pool ratio {}",
                token_amount, egp_amount, deviation_percent, pool_ratio
            );
            return Err(LiquidityError::RatioOutOfTolerance {
                deviation_percent,
                tolerance_percent: self.policy.ratio_tolerance_percent,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const POOL: PoolId = PoolId(7);
    const SEEDER: ProviderId = ProviderId(1);
    const LATECOMER: ProviderId = ProviderId(2);

    fn service() -> QuoteService {
        let service = QuoteService::new(Arc::new(PoolLedger::default()), QuotePolicy::default());
        service
            .provide_liquidity(POOL, SEEDER, dec!(100000), dec!(750000), Decimal::ZERO)
            .unwrap();
        service
    }

    #[test]
    fn test_quote_leaves_pool_untouched() {
        let service = service();
        let before = service.ledger().pool(POOL).unwrap();

        let quote = service
            .get_quote(POOL, SwapDirection::Buy, dec!(10000))
            .unwrap();
        assert_eq!(quote.quote.fee_amount, dec!(30));
        assert_eq!(quote.quote.spot_price, dec!(7.5));
        assert!(!quote.high_price_impact);
        assert!(quote.suggested_min_amount_out < quote.quote.amount_out);
        assert_eq!(service.ledger().pool(POOL).unwrap(), before);
    }

    #[test]
    fn test_large_trade_is_flagged() {
        let service = service();
        let quote = service
            .get_quote(POOL, SwapDirection::Buy, dec!(100000))
            .unwrap();
        assert!(quote.high_price_impact);
    }

    #[test]
    fn test_quote_matches_execution() {
        let service = service();
        let quote = service
            .get_quote(POOL, SwapDirection::Sell, dec!(250))
            .unwrap();
        let trade = service
            .execute_trade(POOL, SwapDirection::Sell, dec!(250), quote.suggested_min_amount_out)
            .unwrap();
        assert_eq!(trade.amount_out, quote.quote.amount_out);
    }

    #[test]
    fn test_quote_for_output_buys_at_least_target() {
        let service = service();
        let needed = service
            .quote_for_output(POOL, SwapDirection::Buy, dec!(500))
            .unwrap();
        let trade = service
            .execute_trade(POOL, SwapDirection::Buy, needed, dec!(500))
            .unwrap();
        assert!(trade.amount_out >= dec!(500));
    }

    #[test]
    fn test_off_ratio_deposit_rejected() {
        let service = service();
        let supply = service.ledger().pool(POOL).unwrap().total_lp_supply;

        let err = service
            .provide_liquidity(POOL, LATECOMER, dec!(1000), dec!(9000), Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RatioOutOfTolerance);
        assert_eq!(service.ledger().pool(POOL).unwrap().total_lp_supply, supply);
        assert!(service
            .ledger()
            .positions()
            .get_position(POOL, LATECOMER)
            .is_none());
    }

    #[test]
    fn test_deposit_ratio_checked_against_current_reserves() {
        let service = service();
        let egp = service.matching_deposit(POOL, dec!(1000)).unwrap();

        // Price moves between sizing the deposit and sending it
        service
            .execute_trade(POOL, SwapDirection::Buy, dec!(100000), Decimal::ZERO)
            .unwrap();
        let before = service.ledger().pool(POOL).unwrap();

        let err = service
            .provide_liquidity(POOL, LATECOMER, dec!(1000), egp, Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RatioOutOfTolerance);
        assert_eq!(service.ledger().pool(POOL).unwrap(), before);
    }

    #[test]
    fn test_matching_deposit_is_accepted() {
        let service = service();
        let egp = service.matching_deposit(POOL, dec!(1000)).unwrap();
        assert_eq!(egp, dec!(7500));

        let preview = service.preview_add_liquidity(POOL, dec!(1000), egp).unwrap();
        let position = service
            .provide_liquidity(POOL, LATECOMER, dec!(1000), egp, Decimal::ZERO)
            .unwrap();
        assert_eq!(position.lp_tokens, preview.lp_tokens_minted);
    }

    #[test]
    fn test_preview_unknown_pool_is_bootstrap() {
        let service = service();
        let preview = service
            .preview_add_liquidity(PoolId(99), dec!(4), dec!(9))
            .unwrap();
        assert_eq!(preview.lp_tokens_minted, dec!(6));
        assert_eq!(preview.pool_share_percent, dec!(100));
    }

    #[test]
    fn test_position_report_after_trading() {
        let service = service();
        service
            .execute_trade(POOL, SwapDirection::Buy, dec!(10000), Decimal::ZERO)
            .unwrap();

        let report = service.position_report(POOL, SEEDER).unwrap().unwrap();
        assert_eq!(report.valuation.share_percent, dec!(100));
        assert_eq!(report.position.fees_earned, dec!(25));
        assert!(service
            .position_report(POOL, LATECOMER)
            .unwrap()
            .is_none());

        let stats = service.pool_stats(POOL).unwrap();
        assert_eq!(stats.trade_count, 1);
        assert_eq!(stats.volume_egp, dec!(10000));
        assert_eq!(stats.open_positions, 1);
    }

    #[test]
    fn test_from_settings_applies_policy() {
        let mut settings = LiquiditySettings::default();
        settings.quote.ratio_tolerance_percent = dec!(25);
        settings.ledger.lock_timeout_ms = 50;

        let ledger = Arc::new(PoolLedger::from_settings(&settings).unwrap());
        let service = QuoteService::from_settings(ledger, &settings);
        assert_eq!(service.policy().ratio_tolerance_percent, dec!(25));

        service
            .provide_liquidity(POOL, SEEDER, dec!(1000), dec!(7500), Decimal::ZERO)
            .unwrap();
        // 20% off ratio passes under the wider tolerance
        service
            .provide_liquidity(POOL, LATECOMER, dec!(1000), dec!(9000), Decimal::ZERO)
            .unwrap();
    }

    #[test]
    fn test_withdraw_preview_matches_payout() {
        let service = service();
        let preview = service.preview_remove_liquidity(POOL, dec!(1000)).unwrap();
        let withdrawal = service
            .withdraw_liquidity(POOL, SEEDER, dec!(1000), Decimal::ZERO, Decimal::ZERO)
            .unwrap();
        assert_eq!(withdrawal.token_amount, preview.token_amount_out);
        assert_eq!(withdrawal.egp_amount, preview.egp_amount_out);
    }
}
