use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
    Yes,
    No,
}

impl Side {
    pub fn is_crypto_side(self) -> bool {
        matches!(self, Side::Long | Side::Short)
    }

    pub fn is_prediction_side(self) -> bool {
        matches!(self, Side::Yes | Side::No)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    /// Durable column value stays `"open"` (sqlx rename_all above); the
    /// hot-snapshot JSON contract (spec.md §3) calls this status
    /// `"active"`, so serde gets its own rename here.
    #[serde(rename = "active")]
    Open,
    Cancelled,
}

/// Invariant (spec.md §3): exactly one lifecycle. Once `closed_at` is set or
/// `status == Cancelled`, only idempotent re-assertion of the same values is
/// permitted -- never a further state change.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Position {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub market: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Realized P&L on close, by side (spec.md §4.4).
    pub fn realized_pnl_on_close(&self, exit_price: Decimal) -> Decimal {
        match self.side {
            Side::Long | Side::Yes => (exit_price - self.entry_price) * self.quantity,
            Side::Short | Side::No => (self.entry_price - exit_price) * self.quantity,
        }
    }

    pub fn risk_ratio(&self, current_balance: Decimal) -> Decimal {
        if current_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.quantity * self.entry_price) / current_balance
    }

    /// True when `market` names the event this position trades, under any
    /// of the prefix forms spec.md §4.9 lists for cancellation matching.
    pub fn matches_cancelled_event(&self, event_id: &str) -> bool {
        self.market == event_id
            || self.market == format!("polymarket:{event_id}")
            || self.market == format!("kalshi:{event_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_position(side: Side) -> Position {
        Position {
            id: Uuid::new_v4(),
            assessment_id: Uuid::new_v4(),
            market: "BTC/USD".to_string(),
            side,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            current_price: dec!(50000),
            unrealized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn long_realized_pnl_is_exit_minus_entry_times_qty() {
        let p = base_position(Side::Long);
        assert_eq!(p.realized_pnl_on_close(dec!(51000)), dec!(100));
    }

    #[test]
    fn short_realized_pnl_is_entry_minus_exit_times_qty() {
        let p = base_position(Side::Short);
        assert_eq!(p.realized_pnl_on_close(dec!(49000)), dec!(100));
    }

    #[test]
    fn event_match_accepts_prefixed_forms() {
        let mut p = base_position(Side::Yes);
        p.market = "polymarket:E1".to_string();
        assert!(p.matches_cancelled_event("E1"));
        assert!(!p.matches_cancelled_event("E2"));
    }
}
