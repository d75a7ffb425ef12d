use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "camelCase")]
pub enum RuleName {
    Drawdown,
    TradeCount,
    RiskPerTrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Safe,
    Warning,
    Danger,
    Violation,
}

impl RuleStatus {
    /// Status bucketing per spec.md §4.5: `v < 0.8t -> safe`,
    /// `0.8t <= v < 0.9t -> warning`, `0.9t <= v < t -> danger`, `v >= t ->
    /// violation`. For `trade_count`, `violation` is remapped to `safe`
    /// because the rule is purely informational.
    pub fn bucket(rule: RuleName, value: Decimal, threshold: Decimal) -> Self {
        if threshold <= Decimal::ZERO {
            return RuleStatus::Safe;
        }
        let ratio_80 = threshold * Decimal::new(80, 2);
        let ratio_90 = threshold * Decimal::new(90, 2);

        let status = if value >= threshold {
            RuleStatus::Violation
        } else if value >= ratio_90 {
            RuleStatus::Danger
        } else if value >= ratio_80 {
            RuleStatus::Warning
        } else {
            RuleStatus::Safe
        };

        if rule == RuleName::TradeCount && status == RuleStatus::Violation {
            RuleStatus::Safe
        } else {
            status
        }
    }
}

/// Durable record of a rule breach that triggered a failure transition.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Violation {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub rule: RuleName,
    pub value: Decimal,
    pub threshold: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Periodic snapshot row of one rule's evaluated value/threshold/status,
/// written by the rule-checks persistence worker (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleCheck {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub rule: RuleName,
    pub value: Decimal,
    pub threshold: Decimal,
    pub status: RuleStatus,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buckets_drawdown_by_ratio_of_threshold() {
        let t = dec!(0.20);
        assert_eq!(
            RuleStatus::bucket(RuleName::Drawdown, dec!(0.10), t),
            RuleStatus::Safe
        );
        assert_eq!(
            RuleStatus::bucket(RuleName::Drawdown, dec!(0.17), t),
            RuleStatus::Warning
        );
        assert_eq!(
            RuleStatus::bucket(RuleName::Drawdown, dec!(0.19), t),
            RuleStatus::Danger
        );
        assert_eq!(
            RuleStatus::bucket(RuleName::Drawdown, dec!(0.20), t),
            RuleStatus::Violation
        );
    }

    #[test]
    fn trade_count_violation_remaps_to_safe() {
        let status = RuleStatus::bucket(RuleName::TradeCount, dec!(50), dec!(10));
        assert_eq!(status, RuleStatus::Safe);
    }
}
