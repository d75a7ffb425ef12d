use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub funded_account_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub payout_reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// Amounts below this auto-approve; at/above requires admin review
    /// (spec.md §3/§4.8).
    pub const AUTO_APPROVE_THRESHOLD: i64 = 1000;
    /// Minimum withdrawal amount (spec.md §4.8 validation).
    pub const MIN_AMOUNT: i64 = 100;

    pub fn qualifies_for_auto_approval(amount: Decimal) -> bool {
        amount < Decimal::from(Self::AUTO_APPROVE_THRESHOLD)
    }
}
