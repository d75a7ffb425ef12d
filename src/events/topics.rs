//! Event-bus topic catalog and the tagged-variant payload decode
//! (Design Notes §9: "re-architect as a tagged-variant decode at the
//! consumer edge, one variant per topic, exhaustive matching in the
//! router"). Every message payload carries `correlationId` and `timestamp`
//! (spec.md §6).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AssessmentStatus, Side};

/// One topic name per spec.md §6's event-bus subset. Kept as a plain
/// string newtype (rather than an enum) because producers publish by name
/// and the fan-out router's topic -> message mapping pattern-matches on
/// prefixes (`market-data.*-ticks`).
pub type Topic = &'static str;

pub mod topic {
    use super::Topic;

    pub const ORDER_PLACED: Topic = "trading.order-placed";
    pub const ORDER_FILLED: Topic = "trading.order-filled";
    pub const POSITION_OPENED: Topic = "trading.position-opened";
    pub const POSITION_CLOSED: Topic = "trading.position-closed";
    pub const TRADE_COMPLETED: Topic = "trading.trade-completed";
    pub const POSITION_REFUNDED: Topic = "trading.position-refunded";

    pub const ASSESSMENT_CREATED: Topic = "assessment.created";
    pub const ASSESSMENT_STARTED: Topic = "assessment.started";
    pub const ASSESSMENT_PAUSED: Topic = "assessment.paused";
    pub const ASSESSMENT_RESUMED: Topic = "assessment.resumed";
    pub const ASSESSMENT_ABANDONED: Topic = "assessment.abandoned";
    pub const ASSESSMENT_COMPLETED: Topic = "assessment.completed";
    pub const ASSESSMENT_BALANCE_UPDATED: Topic = "assessment.balance-updated";
    pub const ASSESSMENT_PNL_UPDATED: Topic = "assessment.pnl-updated";

    pub const RULES_VIOLATION_DETECTED: Topic = "rules.violation-detected";
    pub const RULES_DRAWDOWN_CHECKED: Topic = "rules.drawdown-checked";

    pub const FUNDED_ACCOUNT_CREATED: Topic = "funded-account.created";
    pub const FUNDED_ACCOUNT_ACTIVATED: Topic = "funded-account.activated";

    pub const WITHDRAWAL_REQUESTED: Topic = "withdrawal.requested";
    pub const WITHDRAWAL_APPROVED: Topic = "withdrawal.approved";
    pub const WITHDRAWAL_COMPLETED: Topic = "withdrawal.completed";
    pub const WITHDRAWAL_REJECTED: Topic = "withdrawal.rejected";
    pub const WITHDRAWAL_FAILED: Topic = "withdrawal.failed";

    pub const PURCHASE_INITIATED: Topic = "payment.purchase-initiated";
    pub const PURCHASE_COMPLETED: Topic = "payment.purchase-completed";
    pub const PURCHASE_FAILED: Topic = "payment.purchase-failed";

    pub const EVENT_CANCELLED: Topic = "events.event-cancelled";

    pub const MARKET_DATA_CRYPTO_TICKS: Topic = "market-data.crypto-ticks";
    pub const MARKET_DATA_PREDICTION_TICKS: Topic = "market-data.prediction-ticks";
}

/// Envelope wrapping every published payload with the correlation id and
/// timestamp spec.md §6 mandates on every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(correlation_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Tagged-variant decode at the consumer edge, one variant per topic
/// family the core service or fan-out router actually inspects. Unknown
/// topics are represented as `Payload::Unknown` rather than failing to
/// decode, so the router's exhaustive match can "log and drop" per Design
/// Notes §9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum Payload {
    #[serde(rename = "trading.order-placed")]
    OrderPlaced {
        assessment_id: Uuid,
        order_id: Uuid,
        market: String,
        side: Side,
        quantity: Decimal,
    },
    #[serde(rename = "trading.order-filled")]
    OrderFilled {
        assessment_id: Uuid,
        position_id: Uuid,
        execution_price: Decimal,
        balance: Decimal,
    },
    #[serde(rename = "trading.position-opened")]
    PositionOpened {
        assessment_id: Uuid,
        position_id: Uuid,
        market: String,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
    },
    #[serde(rename = "trading.position-closed")]
    PositionClosed {
        assessment_id: Uuid,
        position_id: Uuid,
        entry_price: Decimal,
        exit_price: Decimal,
        realized_pnl: Decimal,
    },
    #[serde(rename = "trading.trade-completed")]
    TradeCompleted {
        assessment_id: Uuid,
        trade_id: Uuid,
        realized_pnl: Decimal,
    },
    #[serde(rename = "trading.position-refunded")]
    PositionRefunded {
        assessment_id: Uuid,
        position_id: Uuid,
        refund_amount: Decimal,
    },

    #[serde(rename = "assessment.created")]
    AssessmentCreated { assessment_id: Uuid, user_id: Uuid },
    #[serde(rename = "assessment.started")]
    AssessmentStarted { assessment_id: Uuid },
    #[serde(rename = "assessment.paused")]
    AssessmentPaused { assessment_id: Uuid },
    #[serde(rename = "assessment.resumed")]
    AssessmentResumed { assessment_id: Uuid },
    #[serde(rename = "assessment.abandoned")]
    AssessmentAbandoned { assessment_id: Uuid },
    #[serde(rename = "assessment.completed")]
    AssessmentCompleted {
        assessment_id: Uuid,
        status: AssessmentStatus,
    },
    #[serde(rename = "assessment.balance-updated")]
    AssessmentBalanceUpdated {
        assessment_id: Uuid,
        balance: Decimal,
    },
    #[serde(rename = "assessment.pnl-updated")]
    AssessmentPnlUpdated {
        assessment_id: Uuid,
        realized_pnl: Decimal,
        unrealized_pnl: Decimal,
    },

    #[serde(rename = "rules.violation-detected")]
    RulesViolationDetected {
        assessment_id: Uuid,
        rule: crate::domain::RuleName,
        value: Decimal,
        threshold: Decimal,
    },
    #[serde(rename = "rules.drawdown-checked")]
    RulesDrawdownChecked {
        assessment_id: Uuid,
        value: Decimal,
        threshold: Decimal,
        status: crate::domain::RuleStatus,
    },

    #[serde(rename = "funded-account.created")]
    FundedAccountCreated {
        funded_account_id: Uuid,
        source_assessment_id: Uuid,
    },
    #[serde(rename = "funded-account.activated")]
    FundedAccountActivated { funded_account_id: Uuid },

    #[serde(rename = "withdrawal.requested")]
    WithdrawalRequested {
        withdrawal_id: Uuid,
        funded_account_id: Uuid,
        amount: Decimal,
    },
    #[serde(rename = "withdrawal.approved")]
    WithdrawalApproved { withdrawal_id: Uuid },
    #[serde(rename = "withdrawal.completed")]
    WithdrawalCompleted {
        withdrawal_id: Uuid,
        payout_reference: String,
    },
    #[serde(rename = "withdrawal.rejected")]
    WithdrawalRejected {
        withdrawal_id: Uuid,
        reason: String,
    },
    #[serde(rename = "withdrawal.failed")]
    WithdrawalFailed {
        withdrawal_id: Uuid,
        funded_account_id: Uuid,
        amount: Decimal,
    },

    #[serde(rename = "payment.purchase-initiated")]
    PurchaseInitiated { purchase_id: Uuid },
    #[serde(rename = "payment.purchase-completed")]
    PurchaseCompleted {
        purchase_id: Uuid,
        assessment_id: Uuid,
    },
    #[serde(rename = "payment.purchase-failed")]
    PurchaseFailed { purchase_id: Uuid },

    #[serde(rename = "events.event-cancelled")]
    EventCancelled {
        event_id: String,
        source: String,
        status: String,
    },

    #[serde(rename = "market-data.crypto-ticks")]
    MarketDataCryptoTick { market: String, price: Decimal },
    #[serde(rename = "market-data.prediction-ticks")]
    MarketDataPredictionTick {
        market: String,
        yes: Decimal,
        no: Decimal,
    },

    /// Unrecognized topic: decoded opaquely, logged and dropped by every
    /// consumer's exhaustive match rather than failing the whole envelope.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_topic_decodes_opaquely() {
        let json = r#"{"topic":"some.future.topic","foo":"bar"}"#;
        let payload: Payload = serde_json::from_str(json).unwrap();
        assert!(matches!(payload, Payload::Unknown));
    }

    #[test]
    fn round_trips_order_placed() {
        let payload = Payload::OrderPlaced {
            assessment_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            market: "BTC/USD".to_string(),
            side: Side::Long,
            quantity: Decimal::new(1, 1),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Payload::OrderPlaced { .. }));
    }
}
