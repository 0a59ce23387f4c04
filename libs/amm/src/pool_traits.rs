//! Pool trait for pricing against any reserve holder

use crate::{
    AddLiquidityQuote, Decimal, FeeSchedule, PricingEngine, RemoveLiquidityQuote, Result,
    SwapDirection, SwapQuote,
};

/// Anything that holds constant-product reserves can be priced
///
/// Implementors only expose their state; the provided methods run the
/// stateless [`PricingEngine`] against it.
pub trait ReservePool {
    /// Current `(token_reserve, egp_reserve)`
    fn reserves(&self) -> (Decimal, Decimal);

    /// Outstanding LP-token supply
    fn lp_supply(&self) -> Decimal;

    fn fee_schedule(&self) -> FeeSchedule;

    /// EGP per token, `None` while the pool is empty
    fn spot_price(&self) -> Option<Decimal> {
        let (token_reserve, egp_reserve) = self.reserves();
        if token_reserve > Decimal::ZERO && egp_reserve > Decimal::ZERO {
            egp_reserve.checked_div(token_reserve)
        } else {
            None
        }
    }

    fn quote_swap(&self, direction: SwapDirection, amount_in: Decimal) -> Result<SwapQuote> {
        let (token_reserve, egp_reserve) = self.reserves();
        PricingEngine::quote_swap(
            direction,
            amount_in,
            token_reserve,
            egp_reserve,
            self.fee_schedule().fee_rate(),
        )
    }

    fn quote_swap_exact_out(
        &self,
        direction: SwapDirection,
        amount_out: Decimal,
    ) -> Result<Decimal> {
        let (token_reserve, egp_reserve) = self.reserves();
        PricingEngine::quote_swap_exact_out(
            direction,
            amount_out,
            token_reserve,
            egp_reserve,
            self.fee_schedule().fee_rate(),
        )
    }

    fn quote_add_liquidity(
        &self,
        token_amount: Decimal,
        egp_amount: Decimal,
    ) -> Result<AddLiquidityQuote> {
        let (token_reserve, egp_reserve) = self.reserves();
        PricingEngine::quote_add_liquidity(
            token_amount,
            egp_amount,
            token_reserve,
            egp_reserve,
            self.lp_supply(),
        )
    }

    fn quote_remove_liquidity(&self, lp_tokens: Decimal) -> Result<RemoveLiquidityQuote> {
        let (token_reserve, egp_reserve) = self.reserves();
        PricingEngine::quote_remove_liquidity(
            lp_tokens,
            token_reserve,
            egp_reserve,
            self.lp_supply(),
        )
    }
}
