use rust_decimal::Decimal;

/// Slippage/fee rates for the order-placement saga (spec.md §4.3 step 3).
/// Not tier-scoped -- spec.md's `Tier` carries only risk/drawdown/split
/// parameters, so these are platform-wide and env-configurable
/// (`CoreConfig`), matching scenario 1's BTC/USD figures as the default.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRates {
    pub crypto_slippage_rate: Decimal,
    pub crypto_fee_rate: Decimal,
    pub prediction_slippage_rate: Decimal,
    pub prediction_fee_rate: Decimal,
}

impl Default for ExecutionRates {
    fn default() -> Self {
        Self {
            crypto_slippage_rate: Decimal::new(1, 3),       // 0.001
            crypto_fee_rate: Decimal::new(1, 3),             // 0.001
            prediction_slippage_rate: Decimal::new(2, 2),    // 0.02
            prediction_fee_rate: Decimal::new(5, 4),         // 0.0005
        }
    }
}

impl ExecutionRates {
    pub fn for_market(&self, is_prediction: bool) -> (Decimal, Decimal) {
        if is_prediction {
            (self.prediction_slippage_rate, self.prediction_fee_rate)
        } else {
            (self.crypto_slippage_rate, self.crypto_fee_rate)
        }
    }
}
