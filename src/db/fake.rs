//! In-memory `DurableStore` fake for saga/worker unit tests
//! (SPEC_FULL.md §A.5), matching the teacher's preference for substituting
//! fakes behind a trait rather than standing up real Postgres in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    Assessment, AssessmentStatus, FundedAccount, FundedAccountStatus, FundedVirtualAccount,
    Position, PositionStatus, Purchase, PurchaseStatus, RuleCheck, Session, Tier, Trade, User,
    Violation, VirtualAccount, Withdrawal, WithdrawalStatus,
};

use super::{DurableStore, NewPosition, NewTrade};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    tiers: HashMap<Uuid, Tier>,
    purchases: HashMap<Uuid, Purchase>,
    assessments: HashMap<Uuid, Assessment>,
    virtual_accounts: HashMap<Uuid, VirtualAccount>,
    positions: HashMap<Uuid, Position>,
    trades: HashMap<Uuid, Trade>,
    violations: Vec<Violation>,
    rule_checks: Vec<RuleCheck>,
    funded_accounts: HashMap<Uuid, FundedAccount>,
    funded_virtual_accounts: HashMap<Uuid, FundedVirtualAccount>,
    withdrawals: HashMap<Uuid, Withdrawal>,
}

/// In-memory stand-in for the durable store. Seed tiers/users/purchases
/// directly via the `seed_*` helpers before invoking sagas under test.
pub struct FakeStore {
    inner: Mutex<Inner>,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_tier(&self, tier: Tier) {
        self.inner.lock().tiers.insert(tier.id, tier);
    }

    pub fn seed_user(&self, user: User) {
        self.inner.lock().users.insert(user.id, user);
    }

    pub fn seed_assessment(&self, assessment: Assessment) {
        self.inner
            .lock()
            .assessments
            .insert(assessment.id, assessment);
    }

    pub fn seed_virtual_account(&self, va: VirtualAccount) {
        self.inner
            .lock()
            .virtual_accounts
            .insert(va.assessment_id, va);
    }

    pub fn seed_position(&self, position: Position) {
        self.inner.lock().positions.insert(position.id, position);
    }

    pub fn seed_funded_account(&self, fa: FundedAccount, fva: FundedVirtualAccount) {
        let mut inner = self.inner.lock();
        inner.funded_accounts.insert(fa.id, fa.clone());
        inner.funded_virtual_accounts.insert(fa.id, fva);
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.inner.lock().violations.clone()
    }

    pub fn rule_checks(&self) -> Vec<RuleCheck> {
        self.inner.lock().rule_checks.clone()
    }
}

#[async_trait]
impl DurableStore for FakeStore {
    async fn create_user(&self, email: &str, credential_hash: &str) -> anyhow::Result<User> {
        let mut inner = self.inner.lock();
        if inner.users.values().any(|u| u.email == email) {
            anyhow::bail!("duplicate email");
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            credential_hash: credential_hash.to_string(),
            is_admin: false,
            created_at: Utc::now(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .inner
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        ttl: chrono::Duration,
    ) -> anyhow::Result<Session> {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id,
            expires_at: Utc::now() + ttl,
        };
        self.inner
            .lock()
            .sessions
            .insert(session.token.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, token: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.inner.lock().sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> anyhow::Result<()> {
        self.inner.lock().sessions.remove(token);
        Ok(())
    }

    async fn get_tier(&self, id: Uuid) -> anyhow::Result<Option<Tier>> {
        Ok(self.inner.lock().tiers.get(&id).cloned())
    }

    async fn list_tiers(&self) -> anyhow::Result<Vec<Tier>> {
        Ok(self.inner.lock().tiers.values().cloned().collect())
    }

    async fn create_purchase(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        payment_reference: &str,
    ) -> anyhow::Result<Purchase> {
        let mut inner = self.inner.lock();
        if inner
            .purchases
            .values()
            .any(|p| p.payment_reference == payment_reference)
        {
            anyhow::bail!("duplicate payment reference");
        }
        let purchase = Purchase {
            id: Uuid::new_v4(),
            user_id,
            tier_id,
            payment_reference: payment_reference.to_string(),
            status: PurchaseStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        inner.purchases.insert(purchase.id, purchase.clone());
        Ok(purchase)
    }

    async fn get_purchase(&self, id: Uuid) -> anyhow::Result<Option<Purchase>> {
        Ok(self.inner.lock().purchases.get(&id).cloned())
    }

    async fn get_purchase_by_payment_reference(
        &self,
        reference: &str,
    ) -> anyhow::Result<Option<Purchase>> {
        Ok(self
            .inner
            .lock()
            .purchases
            .values()
            .find(|p| p.payment_reference == reference)
            .cloned())
    }

    async fn complete_purchase_and_create_assessment(
        &self,
        purchase_id: Uuid,
    ) -> anyhow::Result<Assessment> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .assessments
            .values()
            .find(|a| a.purchase_id == purchase_id)
        {
            return Ok(existing.clone());
        }
        let purchase = inner
            .purchases
            .get_mut(&purchase_id)
            .ok_or_else(|| anyhow::anyhow!("purchase not found"))?;
        purchase.status = PurchaseStatus::Completed;
        purchase.completed_at = Some(Utc::now());
        let assessment = Assessment {
            id: Uuid::new_v4(),
            user_id: purchase.user_id,
            tier_id: purchase.tier_id,
            purchase_id,
            status: AssessmentStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            soft_delete_at: None,
        };
        inner.assessments.insert(assessment.id, assessment.clone());
        Ok(assessment)
    }

    async fn get_assessment(&self, id: Uuid) -> anyhow::Result<Option<Assessment>> {
        Ok(self.inner.lock().assessments.get(&id).cloned())
    }

    async fn list_assessments_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Assessment>> {
        Ok(self
            .inner
            .lock()
            .assessments
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_active_assessment_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        Ok(self
            .inner
            .lock()
            .assessments
            .values()
            .filter(|a| a.status == AssessmentStatus::Active)
            .map(|a| a.id)
            .collect())
    }

    async fn transition_assessment(
        &self,
        id: Uuid,
        next: AssessmentStatus,
    ) -> anyhow::Result<Assessment> {
        let mut inner = self.inner.lock();
        let assessment = inner
            .assessments
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("assessment not found"))?;
        if !assessment.status.can_transition_to(next) && assessment.status != next {
            anyhow::bail!("illegal transition {:?} -> {:?}", assessment.status, next);
        }
        assessment.status = next;
        if next.is_terminal() {
            assessment.completed_at = Some(Utc::now());
            if next == AssessmentStatus::Abandoned {
                assessment.soft_delete_at =
                    Some(Utc::now() + chrono::Duration::days(Assessment::ABANDON_RETENTION_DAYS));
            }
        }
        Ok(assessment.clone())
    }

    async fn start_assessment(&self, id: Uuid, tier: &Tier) -> anyhow::Result<Assessment> {
        let mut inner = self.inner.lock();
        let assessment = inner
            .assessments
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("assessment not found"))?;
        if assessment.status != AssessmentStatus::Pending {
            anyhow::bail!("assessment not pending");
        }
        assessment.status = AssessmentStatus::Active;
        assessment.started_at = Some(Utc::now());
        let assessment = assessment.clone();
        inner.virtual_accounts.insert(
            assessment.id,
            VirtualAccount {
                id: Uuid::new_v4(),
                assessment_id: assessment.id,
                starting_balance: tier.starting_balance,
                current_balance: tier.starting_balance,
                peak_balance: tier.starting_balance,
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                trade_count: 0,
            },
        );
        Ok(assessment)
    }

    async fn get_virtual_account(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Option<VirtualAccount>> {
        Ok(self
            .inner
            .lock()
            .virtual_accounts
            .get(&assessment_id)
            .cloned())
    }

    async fn update_virtual_account_numerics(
        &self,
        assessment_id: Uuid,
        current: Decimal,
        peak: Decimal,
        realized: Decimal,
        unrealized: Decimal,
    ) -> anyhow::Result<()> {
        if let Some(va) = self.inner.lock().virtual_accounts.get_mut(&assessment_id) {
            va.current_balance = current;
            va.peak_balance = peak;
            va.realized_pnl = realized;
            va.unrealized_pnl = unrealized;
        }
        Ok(())
    }

    async fn increment_trade_count(&self, assessment_id: Uuid) -> anyhow::Result<()> {
        if let Some(va) = self.inner.lock().virtual_accounts.get_mut(&assessment_id) {
            va.trade_count += 1;
        }
        Ok(())
    }

    async fn create_position(&self, new: NewPosition) -> anyhow::Result<Position> {
        let position = Position {
            id: Uuid::new_v4(),
            assessment_id: new.assessment_id,
            market: new.market,
            side: new.side,
            quantity: new.quantity,
            entry_price: new.entry_price,
            current_price: new.entry_price,
            unrealized_pnl: Decimal::ZERO,
            status: new.status,
            opened_at: new.opened_at,
            closed_at: None,
        };
        self.inner.lock().positions.insert(position.id, position.clone());
        Ok(position)
    }

    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>> {
        Ok(self.inner.lock().positions.get(&id).cloned())
    }

    async fn list_positions_for_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Vec<Position>> {
        Ok(self
            .inner
            .lock()
            .positions
            .values()
            .filter(|p| p.assessment_id == assessment_id)
            .cloned()
            .collect())
    }

    async fn list_open_positions_for_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Vec<Position>> {
        Ok(self
            .inner
            .lock()
            .positions
            .values()
            .filter(|p| p.assessment_id == assessment_id && p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn close_position(&self, id: Uuid, closed_at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(p) = self.inner.lock().positions.get_mut(&id) {
            if p.closed_at.is_none() {
                p.closed_at = Some(closed_at);
            }
        }
        Ok(())
    }

    async fn cancel_position_with_trades(
        &self,
        id: Uuid,
        closed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let already_cancelled = inner
            .positions
            .get(&id)
            .map(|p| p.status == PositionStatus::Cancelled)
            .unwrap_or(true);
        if already_cancelled {
            return Ok(());
        }
        if let Some(p) = inner.positions.get_mut(&id) {
            p.status = PositionStatus::Cancelled;
            p.closed_at = Some(closed_at);
        }
        for trade in inner.trades.values_mut() {
            if trade.position_id == id {
                trade.cancelled = true;
            }
        }
        Ok(())
    }

    async fn refresh_position_price(
        &self,
        id: Uuid,
        current_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> anyhow::Result<()> {
        if let Some(p) = self.inner.lock().positions.get_mut(&id) {
            p.current_price = current_price;
            p.unrealized_pnl = unrealized_pnl;
        }
        Ok(())
    }

    async fn create_trade(&self, new: NewTrade) -> anyhow::Result<Trade> {
        let trade = Trade {
            id: Uuid::new_v4(),
            assessment_id: new.assessment_id,
            position_id: new.position_id,
            kind: new.kind,
            market: new.market,
            side: new.side,
            quantity: new.quantity,
            price: new.price,
            slippage_amount: new.slippage_amount,
            fee_amount: new.fee_amount,
            realized_pnl: new.realized_pnl,
            cancelled: false,
            executed_at: Utc::now(),
        };
        self.inner.lock().trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn list_trades_for_assessment(
        &self,
        assessment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Trade>, i64)> {
        let inner = self.inner.lock();
        let mut all: Vec<Trade> = inner
            .trades
            .values()
            .filter(|t| t.assessment_id == assessment_id)
            .cloned()
            .collect();
        all.sort_by_key(|t| t.executed_at);
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn create_violation(
        &self,
        assessment_id: Uuid,
        rule: crate::domain::RuleName,
        value: Decimal,
        threshold: Decimal,
    ) -> anyhow::Result<Violation> {
        let violation = Violation {
            id: Uuid::new_v4(),
            assessment_id,
            rule,
            value,
            threshold,
            occurred_at: Utc::now(),
        };
        self.inner.lock().violations.push(violation.clone());
        Ok(violation)
    }

    async fn bulk_insert_rule_checks(&self, checks: Vec<RuleCheck>) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock();
        let mut inserted = 0;
        for check in checks {
            let dup = inner.rule_checks.iter().any(|existing| {
                existing.assessment_id == check.assessment_id
                    && existing.rule == check.rule
                    && existing.checked_at == check.checked_at
            });
            if !dup {
                inner.rule_checks.push(check);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_funded_account_by_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Option<FundedAccount>> {
        Ok(self
            .inner
            .lock()
            .funded_accounts
            .values()
            .find(|f| f.source_assessment_id == assessment_id)
            .cloned())
    }

    async fn get_funded_account(&self, id: Uuid) -> anyhow::Result<Option<FundedAccount>> {
        Ok(self.inner.lock().funded_accounts.get(&id).cloned())
    }

    async fn list_funded_accounts_for_user(
        &self,
        user_id: Uuid,
    ) -> anyhow::Result<Vec<FundedAccount>> {
        Ok(self
            .inner
            .lock()
            .funded_accounts
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_active_funded_account_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        Ok(self
            .inner
            .lock()
            .funded_accounts
            .values()
            .filter(|f| f.status == FundedAccountStatus::Active)
            .map(|f| f.id)
            .collect())
    }

    async fn create_funded_account(
        &self,
        assessment: &Assessment,
        tier: &Tier,
    ) -> anyhow::Result<(FundedAccount, FundedVirtualAccount)> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .funded_accounts
            .values()
            .find(|f| f.source_assessment_id == assessment.id)
        {
            let fva = inner
                .funded_virtual_accounts
                .get(&existing.id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing funded virtual account"))?;
            return Ok((existing.clone(), fva));
        }
        let fa = FundedAccount {
            id: Uuid::new_v4(),
            user_id: assessment.user_id,
            tier_id: tier.id,
            source_assessment_id: assessment.id,
            status: FundedAccountStatus::Active,
            closure_reason: None,
            created_at: Utc::now(),
            closed_at: None,
        };
        let fva = FundedVirtualAccount {
            id: Uuid::new_v4(),
            funded_account_id: fa.id,
            starting_balance: tier.starting_balance,
            current_balance: tier.starting_balance,
            peak_balance: tier.starting_balance,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
        };
        inner.funded_accounts.insert(fa.id, fa.clone());
        inner
            .funded_virtual_accounts
            .insert(fa.id, fva.clone());
        Ok((fa, fva))
    }

    async fn delete_funded_account(&self, id: Uuid) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.funded_accounts.remove(&id);
        inner.funded_virtual_accounts.remove(&id);
        Ok(())
    }

    async fn close_funded_account(&self, id: Uuid, reason: &str) -> anyhow::Result<()> {
        if let Some(fa) = self.inner.lock().funded_accounts.get_mut(&id) {
            fa.status = FundedAccountStatus::Closed;
            fa.closure_reason = Some(reason.to_string());
            fa.closed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_funded_virtual_account(
        &self,
        funded_account_id: Uuid,
    ) -> anyhow::Result<Option<FundedVirtualAccount>> {
        Ok(self
            .inner
            .lock()
            .funded_virtual_accounts
            .get(&funded_account_id)
            .cloned())
    }

    async fn update_funded_virtual_account_numerics(
        &self,
        funded_account_id: Uuid,
        current: Decimal,
        peak: Decimal,
        realized: Decimal,
        unrealized: Decimal,
    ) -> anyhow::Result<()> {
        if let Some(fva) = self
            .inner
            .lock()
            .funded_virtual_accounts
            .get_mut(&funded_account_id)
        {
            fva.current_balance = current;
            fva.peak_balance = peak;
            fva.realized_pnl = realized;
            fva.unrealized_pnl = unrealized;
        }
        Ok(())
    }

    async fn adjust_total_withdrawals(
        &self,
        funded_account_id: Uuid,
        delta: Decimal,
    ) -> anyhow::Result<()> {
        if let Some(fva) = self
            .inner
            .lock()
            .funded_virtual_accounts
            .get_mut(&funded_account_id)
        {
            fva.total_withdrawals += delta;
        }
        Ok(())
    }

    async fn create_withdrawal(
        &self,
        funded_account_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    ) -> anyhow::Result<Withdrawal> {
        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            funded_account_id,
            user_id,
            amount,
            status: WithdrawalStatus::Pending,
            payout_reference: None,
            rejection_reason: None,
            requested_at: Utc::now(),
            approved_at: None,
            completed_at: None,
            rejected_at: None,
        };
        self.inner
            .lock()
            .withdrawals
            .insert(withdrawal.id, withdrawal.clone());
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: Uuid) -> anyhow::Result<Option<Withdrawal>> {
        Ok(self.inner.lock().withdrawals.get(&id).cloned())
    }

    async fn get_withdrawal_by_payout_reference(
        &self,
        payout_reference: &str,
    ) -> anyhow::Result<Option<Withdrawal>> {
        Ok(self
            .inner
            .lock()
            .withdrawals
            .values()
            .find(|w| w.payout_reference.as_deref() == Some(payout_reference))
            .cloned())
    }

    async fn list_pending_withdrawals(&self) -> anyhow::Result<Vec<Withdrawal>> {
        Ok(self
            .inner
            .lock()
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .cloned()
            .collect())
    }

    async fn set_withdrawal_approved(&self, id: Uuid) -> anyhow::Result<Withdrawal> {
        let mut inner = self.inner.lock();
        let w = inner
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("withdrawal not found"))?;
        w.status = WithdrawalStatus::Approved;
        w.approved_at = Some(Utc::now());
        Ok(w.clone())
    }

    async fn set_withdrawal_completed(
        &self,
        id: Uuid,
        payout_reference: &str,
    ) -> anyhow::Result<Withdrawal> {
        let mut inner = self.inner.lock();
        let w = inner
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("withdrawal not found"))?;
        w.status = WithdrawalStatus::Completed;
        w.payout_reference = Some(payout_reference.to_string());
        w.completed_at = Some(Utc::now());
        Ok(w.clone())
    }

    async fn set_withdrawal_rejected(&self, id: Uuid, reason: &str) -> anyhow::Result<Withdrawal> {
        let mut inner = self.inner.lock();
        let w = inner
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("withdrawal not found"))?;
        w.status = WithdrawalStatus::Rejected;
        w.rejection_reason = Some(reason.to_string());
        w.rejected_at = Some(Utc::now());
        Ok(w.clone())
    }

    async fn delete_withdrawal(&self, id: Uuid) -> anyhow::Result<()> {
        self.inner.lock().withdrawals.remove(&id);
        Ok(())
    }
}
