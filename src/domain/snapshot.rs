use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::{PositionStatus, Side};
use super::rules::{RuleName, RuleStatus};

/// Cache-resident JSON blob for one assessment or funded account, keyed
/// `assessment:{id}:state` / `funded:{id}:state` (spec.md §3). This is the
/// authoritative real-time view while the account is live; the durable row
/// is authoritative for identity, lifecycle, and history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HotSnapshot {
    pub current_balance: Decimal,
    pub peak_balance: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub trade_count: i64,
    pub positions: Vec<SnapshotPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPosition {
    pub id: Uuid,
    pub market: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    pub status: PositionStatus,
}

impl SnapshotPosition {
    /// Mirrors `Position::matches_cancelled_event` for the hot-snapshot
    /// scan the event-cancellation handler runs (spec.md §4.9).
    pub fn matches_cancelled_event(&self, event_id: &str) -> bool {
        self.market == event_id
            || self.market == format!("polymarket:{event_id}")
            || self.market == format!("kalshi:{event_id}")
    }
}

impl HotSnapshot {
    pub fn empty(starting_balance: Decimal) -> Self {
        Self {
            current_balance: starting_balance,
            peak_balance: starting_balance,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            trade_count: 0,
            positions: Vec::new(),
        }
    }

    /// Read-modify-write peak helper (spec.md §4.1).
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

    pub fn active_positions(&self) -> impl Iterator<Item = &SnapshotPosition> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
    }

    /// `max` over active positions of `(qty * entry) / current_balance`
    /// (spec.md §4.5).
    pub fn max_risk_per_trade(&self) -> Decimal {
        self.active_positions()
            .map(|p| {
                if self.current_balance <= Decimal::ZERO {
                    Decimal::ZERO
                } else {
                    (p.quantity * p.entry_price) / self.current_balance
                }
            })
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn recompute_unrealized_pnl(&mut self) {
        self.unrealized_pnl = self.active_positions().map(|p| p.unrealized_pnl).sum();
    }
}

/// Cache-resident rules snapshot keyed `…:rules` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesSnapshot {
    pub drawdown: RuleValue,
    pub trade_count: RuleValue,
    pub risk_per_trade: RuleValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RuleValue {
    pub value: Decimal,
    pub threshold: Decimal,
    pub status: RuleStatus,
}

impl RuleValue {
    pub fn new(rule: RuleName, value: Decimal, threshold: Decimal) -> Self {
        Self {
            value,
            threshold,
            status: RuleStatus::bucket(rule, value, threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos(market: &str, qty: Decimal, entry: Decimal) -> SnapshotPosition {
        SnapshotPosition {
            id: Uuid::new_v4(),
            market: market.to_string(),
            side: Side::Long,
            quantity: qty,
            entry_price: entry,
            current_price: entry,
            unrealized_pnl: Decimal::ZERO,
            opened_at: chrono::Utc::now(),
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn max_risk_per_trade_picks_largest_ratio() {
        let mut snap = HotSnapshot::empty(dec!(50000));
        snap.positions.push(pos("BTC/USD", dec!(0.1), dec!(50000)));
        snap.positions.push(pos("ETH/USD", dec!(1), dec!(3000)));
        // risks: 5000/50000=0.1, 3000/50000=0.06
        assert_eq!(snap.max_risk_per_trade(), dec!(0.1));
    }

    #[test]
    fn recompute_unrealized_pnl_ignores_cancelled() {
        let mut snap = HotSnapshot::empty(dec!(50000));
        let mut p = pos("BTC/USD", dec!(0.1), dec!(50000));
        p.unrealized_pnl = dec!(10);
        snap.positions.push(p.clone());
        let mut cancelled = pos("ETH/USD", dec!(1), dec!(3000));
        cancelled.status = PositionStatus::Cancelled;
        cancelled.unrealized_pnl = dec!(999);
        snap.positions.push(cancelled);

        snap.recompute_unrealized_pnl();
        assert_eq!(snap.unrealized_pnl, dec!(10));
    }
}
