use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FundedAccountStatus {
    Active,
    Closed,
}

/// Mirror of Assessment for post-pass trading. `source_assessment_id` is
/// unique -- activation (spec.md §4.7) is idempotent on it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FundedAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub source_assessment_id: Uuid,
    pub status: FundedAccountStatus,
    pub closure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Mirror of VirtualAccount, plus the monotonic withdrawal ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FundedVirtualAccount {
    pub id: Uuid,
    pub funded_account_id: Uuid,
    pub starting_balance: Decimal,
    pub current_balance: Decimal,
    pub peak_balance: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_withdrawals: Decimal,
}

impl FundedVirtualAccount {
    /// Withdrawable amount (spec.md §4.8), floored at zero.
    pub fn withdrawable_amount(&self, profit_split_ratio: Decimal) -> Decimal {
        let profit = self.current_balance - self.starting_balance - self.total_withdrawals;
        (profit_split_ratio * profit).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn withdrawable_amount_matches_scenario_5() {
        let fva = FundedVirtualAccount {
            id: Uuid::new_v4(),
            funded_account_id: Uuid::new_v4(),
            starting_balance: dec!(50000),
            current_balance: dec!(55000),
            peak_balance: dec!(55000),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
        };
        assert_eq!(fva.withdrawable_amount(dec!(0.85)), dec!(4250.00));
    }

    #[test]
    fn withdrawable_amount_floors_at_zero() {
        let fva = FundedVirtualAccount {
            id: Uuid::new_v4(),
            funded_account_id: Uuid::new_v4(),
            starting_balance: dec!(50000),
            current_balance: dec!(49000),
            peak_balance: dec!(50000),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
        };
        assert_eq!(fva.withdrawable_amount(dec!(0.85)), Decimal::ZERO);
    }
}
