use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Open,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub position_id: Uuid,
    pub kind: TradeKind,
    pub market: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub slippage_amount: Decimal,
    pub fee_amount: Decimal,
    /// Zero for `kind == Open` (spec.md §3).
    pub realized_pnl: Decimal,
    pub cancelled: bool,
    pub executed_at: DateTime<Utc>,
}
