//! Pool Ledger Property Tests
//!
//! Invariants that must hold for any sequence of ledger operations.

use liquidity::{ErrorKind, PoolId, PoolLedger, ProviderId, SwapDirection};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const POOL: PoolId = PoolId(1);
const SEEDER: ProviderId = ProviderId(1);
const PROVIDER: ProviderId = ProviderId(2);

prop_compose! {
    fn seed_amounts()
        (tokens in 1_000u64..10_000_000u64, price_cents in 100u64..100_000u64) -> (Decimal, Decimal) {
        let tokens = Decimal::from(tokens);
        (tokens, tokens * Decimal::from(price_cents) / dec!(100))
    }
}

prop_compose! {
    /// Swap sized in basis points of the input-side reserve
    fn swap()
        (buy in any::<bool>(), size_bps in 1u32..3_000u32) -> (SwapDirection, Decimal) {
        let direction = if buy { SwapDirection::Buy } else { SwapDirection::Sell };
        (direction, Decimal::from(size_bps) / dec!(10_000))
    }
}

fn seeded(tokens: Decimal, egp: Decimal) -> PoolLedger {
    let ledger = PoolLedger::default();
    ledger
        .add_liquidity(POOL, SEEDER, tokens, egp, Decimal::ZERO)
        .unwrap();
    ledger
}

proptest! {
    #[test]
    fn swaps_never_shrink_product_or_reserves(
        (tokens, egp) in seed_amounts(),
        swaps in prop::collection::vec(swap(), 1..25),
    ) {
        let ledger = seeded(tokens, egp);

        for (direction, fraction) in swaps {
            let before = ledger.pool(POOL).unwrap();
            let (reserve_in, _) = direction.orient(before.token_reserve, before.egp_reserve);
            let amount_in = (reserve_in * fraction).round_dp(6);

            match ledger.execute_swap(POOL, direction, amount_in, Decimal::ZERO) {
                Ok(trade) => {
                    let after = ledger.pool(POOL).unwrap();
                    prop_assert!(after.product().unwrap() >= before.product().unwrap());
                    prop_assert!(after.token_reserve > Decimal::ZERO);
                    prop_assert!(after.egp_reserve > Decimal::ZERO);
                    prop_assert_eq!(trade.pool_after, after.snapshot());
                }
                Err(err) => {
                    prop_assert!(matches!(
                        err.kind(),
                        ErrorKind::InvalidAmount | ErrorKind::InsufficientLiquidity
                    ));
                    prop_assert_eq!(ledger.pool(POOL).unwrap(), before);
                }
            }
        }
    }

    #[test]
    fn add_then_remove_returns_contribution(
        (tokens, egp) in seed_amounts(),
        deposit_bps in 1u32..20_000u32,
    ) {
        let ledger = seeded(tokens, egp);
        let token_amount = (tokens * Decimal::from(deposit_bps) / dec!(10_000)).round_dp(6);
        prop_assume!(token_amount > Decimal::ZERO);
        let egp_amount = token_amount * egp / tokens;

        let position = ledger
            .add_liquidity(POOL, PROVIDER, token_amount, egp_amount, Decimal::ZERO)
            .unwrap();
        let withdrawal = ledger
            .remove_liquidity(POOL, PROVIDER, position.lp_tokens, Decimal::ZERO, Decimal::ZERO)
            .unwrap();

        let tolerance = dec!(0.000000001);
        prop_assert!(withdrawal.token_amount <= token_amount);
        prop_assert!(withdrawal.egp_amount <= egp_amount);
        prop_assert!(withdrawal.token_amount >= token_amount * (Decimal::ONE - tolerance));
        prop_assert!(withdrawal.egp_amount >= egp_amount * (Decimal::ONE - tolerance));
        prop_assert_eq!(ledger.positions().balance(POOL, PROVIDER), Decimal::ZERO);
    }

    #[test]
    fn rejected_slippage_changes_nothing(
        (tokens, egp) in seed_amounts(),
        (direction, fraction) in swap(),
    ) {
        let ledger = seeded(tokens, egp);
        let before = ledger.pool(POOL).unwrap();
        let (reserve_in, reserve_out) = direction.orient(before.token_reserve, before.egp_reserve);
        let amount_in = (reserve_in * fraction).round_dp(6);

        let err = ledger
            .execute_swap(POOL, direction, amount_in, reserve_out)
            .unwrap_err();
        prop_assert!(matches!(
            err.kind(),
            ErrorKind::SlippageExceeded | ErrorKind::InvalidAmount
        ));
        prop_assert_eq!(ledger.pool(POOL).unwrap(), before);
        prop_assert!(ledger.trade_log().is_empty());
    }
}
