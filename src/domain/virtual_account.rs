use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 1:1 with an Assessment. Invariant I1 (peak monotone): `peak_balance >=
/// current_balance` at every saga boundary, or the peak update was skipped
/// because current <= peak. Invariant I2: `current_balance >= 0` always.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VirtualAccount {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub starting_balance: Decimal,
    pub current_balance: Decimal,
    pub peak_balance: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub trade_count: i32,
}

impl VirtualAccount {
    /// Read-modify-write peak helper (spec.md §4.1): only writes when the
    /// current balance has advanced past the recorded peak.
    pub fn maybe_raise_peak(&mut self) -> bool {
        if self.current_balance > self.peak_balance {
            self.peak_balance = self.current_balance;
            true
        } else {
            false
        }
    }

    pub fn drawdown(&self) -> Decimal {
        if self.peak_balance <= Decimal::ZERO || self.current_balance >= self.peak_balance {
            Decimal::ZERO
        } else {
            (self.peak_balance - self.current_balance) / self.peak_balance
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn peak_only_advances() {
        let mut va = VirtualAccount {
            id: Uuid::new_v4(),
            assessment_id: Uuid::new_v4(),
            starting_balance: dec!(50000),
            current_balance: dec!(50500),
            peak_balance: dec!(50000),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            trade_count: 0,
        };
        assert!(va.maybe_raise_peak());
        assert_eq!(va.peak_balance, dec!(50500));

        va.current_balance = dec!(50200);
        assert!(!va.maybe_raise_peak());
        assert_eq!(va.peak_balance, dec!(50500));
    }

    #[test]
    fn drawdown_zero_when_at_or_above_peak() {
        let va = VirtualAccount {
            id: Uuid::new_v4(),
            assessment_id: Uuid::new_v4(),
            starting_balance: dec!(50000),
            current_balance: dec!(50000),
            peak_balance: dec!(50000),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            trade_count: 0,
        };
        assert_eq!(va.drawdown(), Decimal::ZERO);
    }
}
