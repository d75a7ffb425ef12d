//! Durable store port (SPEC_FULL.md §B): one repository surface covering
//! every entity in spec.md §3/§6 (Users, Sessions, Tiers, Purchases,
//! Assessments, VirtualAccounts, Positions, Trades, Violations, RuleChecks,
//! FundedAccounts, FundedVirtualAccounts, Withdrawals).
//!
//! The teacher wraps one connection per concern behind a small struct
//! (`UserStore` over a `rusqlite::Connection`, `VaultDb` over its own pool).
//! This generalizes that shape to Postgres: a single `async_trait` port so
//! saga/worker code depends on a trait object rather than a concrete pool,
//! with one production adapter (`postgres::PgStore`) and one in-memory fake
//! for saga/worker unit tests (`fake::FakeStore`), matching the teacher's
//! preference for substituting fakes at collaborator seams (SPEC_FULL.md
//! §A.5).
//!
//! Multi-row mutations that spec.md calls out as needing one transaction
//! (purchase completion + assessment creation, funded-account + funded
//! virtual-account creation, cancelled-position + trade bulk update) are
//! single methods here precisely so the adapter can wrap them in one
//! `sqlx::Transaction`.

pub mod fake;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    Assessment, AssessmentStatus, FundedAccount, FundedVirtualAccount, Position, PositionStatus,
    Purchase, RuleCheck, Session, Side, Tier, Trade, TradeKind, User, Violation, Withdrawal,
    WithdrawalStatus,
};

#[derive(Debug, Clone)]
pub struct NewPosition {
    pub assessment_id: Uuid,
    pub market: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTrade {
    pub assessment_id: Uuid,
    pub position_id: Uuid,
    pub kind: TradeKind,
    pub market: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub slippage_amount: Decimal,
    pub fee_amount: Decimal,
    pub realized_pnl: Decimal,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    // -- users / sessions --------------------------------------------
    async fn create_user(&self, email: &str, credential_hash: &str) -> anyhow::Result<User>;
    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create_session(
        &self,
        user_id: Uuid,
        ttl: chrono::Duration,
    ) -> anyhow::Result<Session>;
    async fn get_session(&self, token: &str) -> anyhow::Result<Option<Session>>;
    async fn delete_session(&self, token: &str) -> anyhow::Result<()>;

    // -- tiers ---------------------------------------------------------
    async fn get_tier(&self, id: Uuid) -> anyhow::Result<Option<Tier>>;
    async fn list_tiers(&self) -> anyhow::Result<Vec<Tier>>;

    // -- purchases -------------------------------------------------------
    async fn create_purchase(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        payment_reference: &str,
    ) -> anyhow::Result<Purchase>;
    async fn get_purchase(&self, id: Uuid) -> anyhow::Result<Option<Purchase>>;
    async fn get_purchase_by_payment_reference(
        &self,
        reference: &str,
    ) -> anyhow::Result<Option<Purchase>>;
    /// Atomic: marks the purchase `completed` and creates the backing
    /// `Assessment` (status `pending`) in one transaction (spec.md §3).
    /// Idempotent: if the purchase is already `completed`, returns the
    /// existing assessment rather than creating a second one.
    async fn complete_purchase_and_create_assessment(
        &self,
        purchase_id: Uuid,
    ) -> anyhow::Result<Assessment>;

    // -- assessments -----------------------------------------------------
    async fn get_assessment(&self, id: Uuid) -> anyhow::Result<Option<Assessment>>;
    async fn list_assessments_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Assessment>>;
    async fn list_active_assessment_ids(&self) -> anyhow::Result<Vec<Uuid>>;
    async fn transition_assessment(
        &self,
        id: Uuid,
        next: AssessmentStatus,
    ) -> anyhow::Result<Assessment>;
    /// `pending -> active`: also creates the 1:1 `VirtualAccount` seeded
    /// from `tier.starting_balance` (spec.md §3).
    async fn start_assessment(&self, id: Uuid, tier: &Tier) -> anyhow::Result<Assessment>;

    // -- virtual accounts --------------------------------------------------
    async fn get_virtual_account(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Option<crate::domain::VirtualAccount>>;
    async fn update_virtual_account_numerics(
        &self,
        assessment_id: Uuid,
        current: Decimal,
        peak: Decimal,
        realized: Decimal,
        unrealized: Decimal,
    ) -> anyhow::Result<()>;
    async fn increment_trade_count(&self, assessment_id: Uuid) -> anyhow::Result<()>;

    // -- positions -------------------------------------------------------
    async fn create_position(&self, new: NewPosition) -> anyhow::Result<Position>;
    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>>;
    async fn list_positions_for_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Vec<Position>>;
    async fn list_open_positions_for_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Vec<Position>>;
    async fn close_position(&self, id: Uuid, closed_at: DateTime<Utc>) -> anyhow::Result<()>;
    /// Transaction: sets `status=cancelled`, `closed_at=now`, and bulk-sets
    /// `cancelled=true` on every uncancelled trade referencing the position
    /// (spec.md §4.10 "cancelled-position procedure").
    async fn cancel_position_with_trades(
        &self,
        id: Uuid,
        closed_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
    async fn refresh_position_price(
        &self,
        id: Uuid,
        current_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> anyhow::Result<()>;

    // -- trades ----------------------------------------------------------
    async fn create_trade(&self, new: NewTrade) -> anyhow::Result<Trade>;
    async fn list_trades_for_assessment(
        &self,
        assessment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Trade>, i64)>;

    // -- violations / rule checks -----------------------------------------
    async fn create_violation(
        &self,
        assessment_id: Uuid,
        rule: crate::domain::RuleName,
        value: Decimal,
        threshold: Decimal,
    ) -> anyhow::Result<Violation>;
    /// Bulk insert, one row per rule-type per assessment, `ON CONFLICT DO
    /// NOTHING` semantics (spec.md §4.10 "skipDuplicates").
    async fn bulk_insert_rule_checks(&self, checks: Vec<RuleCheck>) -> anyhow::Result<usize>;

    // -- funded accounts ---------------------------------------------------
    async fn get_funded_account_by_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Option<FundedAccount>>;
    async fn get_funded_account(&self, id: Uuid) -> anyhow::Result<Option<FundedAccount>>;
    async fn list_funded_accounts_for_user(
        &self,
        user_id: Uuid,
    ) -> anyhow::Result<Vec<FundedAccount>>;
    async fn list_active_funded_account_ids(&self) -> anyhow::Result<Vec<Uuid>>;
    /// Atomic: creates `FundedAccount` + `FundedVirtualAccount` in one
    /// transaction (spec.md §4.7 step 3).
    async fn create_funded_account(
        &self,
        assessment: &Assessment,
        tier: &Tier,
    ) -> anyhow::Result<(FundedAccount, FundedVirtualAccount)>;
    /// Compensation for step 3-4 failure (spec.md §4.7 step 5).
    async fn delete_funded_account(&self, id: Uuid) -> anyhow::Result<()>;
    async fn close_funded_account(&self, id: Uuid, reason: &str) -> anyhow::Result<()>;
    async fn get_funded_virtual_account(
        &self,
        funded_account_id: Uuid,
    ) -> anyhow::Result<Option<FundedVirtualAccount>>;
    async fn update_funded_virtual_account_numerics(
        &self,
        funded_account_id: Uuid,
        current: Decimal,
        peak: Decimal,
        realized: Decimal,
        unrealized: Decimal,
    ) -> anyhow::Result<()>;
    async fn adjust_total_withdrawals(
        &self,
        funded_account_id: Uuid,
        delta: Decimal,
    ) -> anyhow::Result<()>;

    // -- withdrawals -------------------------------------------------------
    async fn create_withdrawal(
        &self,
        funded_account_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    ) -> anyhow::Result<Withdrawal>;
    async fn get_withdrawal(&self, id: Uuid) -> anyhow::Result<Option<Withdrawal>>;
    /// Looked up by the late payout-paid/-failed webhook path (spec.md
    /// §4.8), which only carries the provider's reference.
    async fn get_withdrawal_by_payout_reference(
        &self,
        payout_reference: &str,
    ) -> anyhow::Result<Option<Withdrawal>>;
    async fn list_pending_withdrawals(&self) -> anyhow::Result<Vec<Withdrawal>>;
    async fn set_withdrawal_approved(&self, id: Uuid) -> anyhow::Result<Withdrawal>;
    async fn set_withdrawal_completed(
        &self,
        id: Uuid,
        payout_reference: &str,
    ) -> anyhow::Result<Withdrawal>;
    async fn set_withdrawal_rejected(&self, id: Uuid, reason: &str) -> anyhow::Result<Withdrawal>;
    async fn delete_withdrawal(&self, id: Uuid) -> anyhow::Result<()>;
}
