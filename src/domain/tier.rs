use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable evaluation tier config, seeded once and never mutated at
/// runtime (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tier {
    pub id: Uuid,
    pub name: String,
    pub purchase_price_minor: i64,
    pub starting_balance: Decimal,
    pub max_drawdown_ratio: Decimal,
    pub min_trade_count: i32,
    pub max_risk_per_trade_ratio: Decimal,
    pub profit_split_ratio: Decimal,
}

/// Tier-fixed thresholds used by the funded rules-monitoring loop.
///
/// spec.md's Open Question: the source reads `tier.maxDrawdown` directly for
/// funded accounts rather than the documented fixed funded-tier values. This
/// struct is the single chosen source of truth for funded thresholds --
/// see DESIGN.md for the resolution.
#[derive(Debug, Clone, Copy)]
pub struct FundedThresholds {
    pub max_drawdown_ratio: Decimal,
    pub max_risk_per_trade_ratio: Decimal,
}

impl Tier {
    /// Fixed funded-tier parameters, independent of the purchased tier's
    /// assessment-phase thresholds (spec.md §3: "funded tier parameters
    /// typically stricter: drawdown 10-15%, per-trade risk 5%").
    pub fn funded_thresholds(&self) -> FundedThresholds {
        FundedThresholds {
            max_drawdown_ratio: self.funded_max_drawdown_ratio(),
            max_risk_per_trade_ratio: Decimal::new(5, 2), // 0.05
        }
    }

    fn funded_max_drawdown_ratio(&self) -> Decimal {
        // Stricter band than the assessment-phase threshold, clamped into
        // the documented 10-15% range.
        let candidate = self.max_drawdown_ratio * Decimal::new(75, 2); // 0.75x
        candidate.clamp(Decimal::new(10, 2), Decimal::new(15, 2))
    }
}
