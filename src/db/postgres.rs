//! Postgres adapter for `DurableStore`, generalizing the teacher's
//! per-entity wrapper-over-a-connection shape (`user_store.rs`'s
//! `rusqlite::Connection`, `vault_db.rs`'s sqlite pool) to a single
//! `sqlx::PgPool`-backed struct. Queries are runtime-checked
//! (`sqlx::query`/`query_as`) rather than the `sqlx::query!` compile-time
//! macros, since this crate is built without a live database available to
//! the macro's schema check.
//!
//! Column names match the domain structs' field names 1:1 (`sqlx::FromRow`
//! derives on every domain entity rely on this), per the table in
//! SPEC_FULL.md's durable-store section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{
    Assessment, AssessmentStatus, FundedAccount, FundedAccountStatus, FundedVirtualAccount,
    Position, PositionStatus, Purchase, PurchaseStatus, RuleCheck, RuleName, Session, Tier,
    Trade, Violation, VirtualAccount, Withdrawal, WithdrawalStatus,
};

use super::{DurableStore, NewPosition, NewTrade};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DurableStore for PgStore {
    async fn create_user(&self, email: &str, credential_hash: &str) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, credential_hash, is_admin, created_at)
             VALUES ($1, $2, $3, false, now())
             RETURNING id, email, credential_hash, is_admin, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(credential_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, credential_hash, is_admin, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, credential_hash, is_admin, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        ttl: chrono::Duration,
    ) -> anyhow::Result<Session> {
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + ttl;
        sqlx::query(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(Session {
            token,
            user_id,
            expires_at,
        })
    }

    async fn get_session(&self, token: &str) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_tier(&self, id: Uuid) -> anyhow::Result<Option<Tier>> {
        let tier = sqlx::query_as::<_, Tier>(
            "SELECT id, name, purchase_price_minor, starting_balance, max_drawdown_ratio,
                    min_trade_count, max_risk_per_trade_ratio, profit_split_ratio
             FROM tiers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tier)
    }

    async fn list_tiers(&self) -> anyhow::Result<Vec<Tier>> {
        let tiers = sqlx::query_as::<_, Tier>(
            "SELECT id, name, purchase_price_minor, starting_balance, max_drawdown_ratio,
                    min_trade_count, max_risk_per_trade_ratio, profit_split_ratio
             FROM tiers ORDER BY purchase_price_minor",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tiers)
    }

    async fn create_purchase(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        payment_reference: &str,
    ) -> anyhow::Result<Purchase> {
        let purchase = sqlx::query_as::<_, Purchase>(
            "INSERT INTO purchases (id, user_id, tier_id, payment_reference, status, created_at)
             VALUES ($1, $2, $3, $4, 'pending', now())
             RETURNING id, user_id, tier_id, payment_reference, status, created_at, completed_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(tier_id)
        .bind(payment_reference)
        .fetch_one(&self.pool)
        .await?;
        Ok(purchase)
    }

    async fn get_purchase(&self, id: Uuid) -> anyhow::Result<Option<Purchase>> {
        let purchase = sqlx::query_as::<_, Purchase>(
            "SELECT id, user_id, tier_id, payment_reference, status, created_at, completed_at
             FROM purchases WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(purchase)
    }

    async fn get_purchase_by_payment_reference(
        &self,
        reference: &str,
    ) -> anyhow::Result<Option<Purchase>> {
        let purchase = sqlx::query_as::<_, Purchase>(
            "SELECT id, user_id, tier_id, payment_reference, status, created_at, completed_at
             FROM purchases WHERE payment_reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(purchase)
    }

    async fn complete_purchase_and_create_assessment(
        &self,
        purchase_id: Uuid,
    ) -> anyhow::Result<Assessment> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = sqlx::query_as::<_, Assessment>(
            "SELECT id, user_id, tier_id, purchase_id, status, created_at, started_at,
                    completed_at, soft_delete_at
             FROM assessments WHERE purchase_id = $1",
        )
        .bind(purchase_id)
        .fetch_optional(&mut *tx)
        .await?
        {
            tx.commit().await?;
            return Ok(existing);
        }

        let purchase = sqlx::query_as::<_, Purchase>(
            "UPDATE purchases SET status = 'completed', completed_at = now()
             WHERE id = $1 RETURNING id, user_id, tier_id, payment_reference, status,
                                       created_at, completed_at",
        )
        .bind(purchase_id)
        .fetch_one(&mut *tx)
        .await?;

        let assessment = sqlx::query_as::<_, Assessment>(
            "INSERT INTO assessments (id, user_id, tier_id, purchase_id, status, created_at)
             VALUES ($1, $2, $3, $4, 'pending', now())
             RETURNING id, user_id, tier_id, purchase_id, status, created_at, started_at,
                       completed_at, soft_delete_at",
        )
        .bind(Uuid::new_v4())
        .bind(purchase.user_id)
        .bind(purchase.tier_id)
        .bind(purchase_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(assessment)
    }

    async fn get_assessment(&self, id: Uuid) -> anyhow::Result<Option<Assessment>> {
        let a = sqlx::query_as::<_, Assessment>(
            "SELECT id, user_id, tier_id, purchase_id, status, created_at, started_at,
                    completed_at, soft_delete_at
             FROM assessments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(a)
    }

    async fn list_assessments_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Assessment>> {
        let rows = sqlx::query_as::<_, Assessment>(
            "SELECT id, user_id, tier_id, purchase_id, status, created_at, started_at,
                    completed_at, soft_delete_at
             FROM assessments WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_active_assessment_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM assessments WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<Uuid, _>("id")).collect())
    }

    async fn transition_assessment(
        &self,
        id: Uuid,
        next: AssessmentStatus,
    ) -> anyhow::Result<Assessment> {
        let (completed_at_clause, soft_delete_clause): (&str, &str) = if next.is_terminal() {
            if next == AssessmentStatus::Abandoned {
                (", completed_at = now()", ", soft_delete_at = now() + interval '90 days'")
            } else {
                (", completed_at = now()", "")
            }
        } else {
            ("", "")
        };
        let sql = format!(
            "UPDATE assessments SET status = $2{completed_at_clause}{soft_delete_clause}
             WHERE id = $1
             RETURNING id, user_id, tier_id, purchase_id, status, created_at, started_at,
                       completed_at, soft_delete_at"
        );
        let assessment = sqlx::query_as::<_, Assessment>(&sql)
            .bind(id)
            .bind(next)
            .fetch_one(&self.pool)
            .await?;
        Ok(assessment)
    }

    async fn start_assessment(&self, id: Uuid, tier: &Tier) -> anyhow::Result<Assessment> {
        let mut tx = self.pool.begin().await?;
        let assessment = sqlx::query_as::<_, Assessment>(
            "UPDATE assessments SET status = 'active', started_at = now()
             WHERE id = $1 AND status = 'pending'
             RETURNING id, user_id, tier_id, purchase_id, status, created_at, started_at,
                       completed_at, soft_delete_at",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO virtual_accounts (id, assessment_id, starting_balance, current_balance,
                                            peak_balance, realized_pnl, unrealized_pnl, trade_count)
             VALUES ($1, $2, $3, $3, $3, 0, 0, 0)",
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(tier.starting_balance)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(assessment)
    }

    async fn get_virtual_account(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Option<VirtualAccount>> {
        let va = sqlx::query_as::<_, VirtualAccount>(
            "SELECT id, assessment_id, starting_balance, current_balance, peak_balance,
                    realized_pnl, unrealized_pnl, trade_count
             FROM virtual_accounts WHERE assessment_id = $1",
        )
        .bind(assessment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(va)
    }

    async fn update_virtual_account_numerics(
        &self,
        assessment_id: Uuid,
        current: Decimal,
        peak: Decimal,
        realized: Decimal,
        unrealized: Decimal,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE virtual_accounts
             SET current_balance = $2, peak_balance = $3, realized_pnl = $4, unrealized_pnl = $5
             WHERE assessment_id = $1",
        )
        .bind(assessment_id)
        .bind(current)
        .bind(peak)
        .bind(realized)
        .bind(unrealized)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_trade_count(&self, assessment_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE virtual_accounts SET trade_count = trade_count + 1 WHERE assessment_id = $1",
        )
        .bind(assessment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_position(&self, new: NewPosition) -> anyhow::Result<Position> {
        let position = sqlx::query_as::<_, Position>(
            "INSERT INTO positions (id, assessment_id, market, side, quantity, entry_price,
                                     current_price, unrealized_pnl, status, opened_at, closed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6, 0, $7, $8, NULL)
             RETURNING id, assessment_id, market, side, quantity, entry_price, current_price,
                       unrealized_pnl, status, opened_at, closed_at",
        )
        .bind(Uuid::new_v4())
        .bind(new.assessment_id)
        .bind(&new.market)
        .bind(new.side)
        .bind(new.quantity)
        .bind(new.entry_price)
        .bind(new.status)
        .bind(new.opened_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(position)
    }

    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>> {
        let position = sqlx::query_as::<_, Position>(
            "SELECT id, assessment_id, market, side, quantity, entry_price, current_price,
                    unrealized_pnl, status, opened_at, closed_at
             FROM positions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(position)
    }

    async fn list_positions_for_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, Position>(
            "SELECT id, assessment_id, market, side, quantity, entry_price, current_price,
                    unrealized_pnl, status, opened_at, closed_at
             FROM positions WHERE assessment_id = $1 ORDER BY opened_at",
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_open_positions_for_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, Position>(
            "SELECT id, assessment_id, market, side, quantity, entry_price, current_price,
                    unrealized_pnl, status, opened_at, closed_at
             FROM positions WHERE assessment_id = $1 AND status = 'open' AND closed_at IS NULL",
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn close_position(&self, id: Uuid, closed_at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE positions SET closed_at = $2 WHERE id = $1 AND closed_at IS NULL",
        )
        .bind(id)
        .bind(closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_position_with_trades(
        &self,
        id: Uuid,
        closed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let status: Option<PositionStatus> =
            sqlx::query_scalar("SELECT status FROM positions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if status == Some(PositionStatus::Cancelled) || status.is_none() {
            tx.commit().await?;
            return Ok(());
        }
        sqlx::query(
            "UPDATE positions SET status = 'cancelled', closed_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(closed_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE trades SET cancelled = true WHERE position_id = $1 AND cancelled = false",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn refresh_position_price(
        &self,
        id: Uuid,
        current_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE positions SET current_price = $2, unrealized_pnl = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(current_price)
        .bind(unrealized_pnl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_trade(&self, new: NewTrade) -> anyhow::Result<Trade> {
        let trade = sqlx::query_as::<_, Trade>(
            "INSERT INTO trades (id, assessment_id, position_id, kind, market, side, quantity,
                                  price, slippage_amount, fee_amount, realized_pnl, cancelled,
                                  executed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, false, now())
             RETURNING id, assessment_id, position_id, kind, market, side, quantity, price,
                       slippage_amount, fee_amount, realized_pnl, cancelled, executed_at",
        )
        .bind(Uuid::new_v4())
        .bind(new.assessment_id)
        .bind(new.position_id)
        .bind(new.kind)
        .bind(&new.market)
        .bind(new.side)
        .bind(new.quantity)
        .bind(new.price)
        .bind(new.slippage_amount)
        .bind(new.fee_amount)
        .bind(new.realized_pnl)
        .fetch_one(&self.pool)
        .await?;
        Ok(trade)
    }

    async fn list_trades_for_assessment(
        &self,
        assessment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Trade>, i64)> {
        let rows = sqlx::query_as::<_, Trade>(
            "SELECT id, assessment_id, position_id, kind, market, side, quantity, price,
                    slippage_amount, fee_amount, realized_pnl, cancelled, executed_at
             FROM trades WHERE assessment_id = $1 ORDER BY executed_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(assessment_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM trades WHERE assessment_id = $1",
        )
        .bind(assessment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((rows, total))
    }

    async fn create_violation(
        &self,
        assessment_id: Uuid,
        rule: RuleName,
        value: Decimal,
        threshold: Decimal,
    ) -> anyhow::Result<Violation> {
        let violation = sqlx::query_as::<_, Violation>(
            "INSERT INTO violations (id, assessment_id, rule, value, threshold, occurred_at)
             VALUES ($1, $2, $3, $4, $5, now())
             RETURNING id, assessment_id, rule, value, threshold, occurred_at",
        )
        .bind(Uuid::new_v4())
        .bind(assessment_id)
        .bind(rule)
        .bind(value)
        .bind(threshold)
        .fetch_one(&self.pool)
        .await?;
        Ok(violation)
    }

    async fn bulk_insert_rule_checks(&self, checks: Vec<RuleCheck>) -> anyhow::Result<usize> {
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;
        for check in checks {
            let result = sqlx::query(
                "INSERT INTO rule_checks (id, assessment_id, rule, value, threshold, status, checked_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (assessment_id, rule, checked_at) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(check.assessment_id)
            .bind(check.rule)
            .bind(check.value)
            .bind(check.threshold)
            .bind(check.status)
            .bind(check.checked_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_funded_account_by_assessment(
        &self,
        assessment_id: Uuid,
    ) -> anyhow::Result<Option<FundedAccount>> {
        let fa = sqlx::query_as::<_, FundedAccount>(
            "SELECT id, user_id, tier_id, source_assessment_id, status, closure_reason,
                    created_at, closed_at
             FROM funded_accounts WHERE source_assessment_id = $1",
        )
        .bind(assessment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fa)
    }

    async fn get_funded_account(&self, id: Uuid) -> anyhow::Result<Option<FundedAccount>> {
        let fa = sqlx::query_as::<_, FundedAccount>(
            "SELECT id, user_id, tier_id, source_assessment_id, status, closure_reason,
                    created_at, closed_at
             FROM funded_accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fa)
    }

    async fn list_funded_accounts_for_user(
        &self,
        user_id: Uuid,
    ) -> anyhow::Result<Vec<FundedAccount>> {
        let rows = sqlx::query_as::<_, FundedAccount>(
            "SELECT id, user_id, tier_id, source_assessment_id, status, closure_reason,
                    created_at, closed_at
             FROM funded_accounts WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_active_funded_account_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM funded_accounts WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<Uuid, _>("id")).collect())
    }

    async fn create_funded_account(
        &self,
        assessment: &Assessment,
        tier: &Tier,
    ) -> anyhow::Result<(FundedAccount, FundedVirtualAccount)> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = sqlx::query_as::<_, FundedAccount>(
            "SELECT id, user_id, tier_id, source_assessment_id, status, closure_reason,
                    created_at, closed_at
             FROM funded_accounts WHERE source_assessment_id = $1",
        )
        .bind(assessment.id)
        .fetch_optional(&mut *tx)
        .await?
        {
            let fva = sqlx::query_as::<_, FundedVirtualAccount>(
                "SELECT id, funded_account_id, starting_balance, current_balance, peak_balance,
                        realized_pnl, unrealized_pnl, total_withdrawals
                 FROM funded_virtual_accounts WHERE funded_account_id = $1",
            )
            .bind(existing.id)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok((existing, fva));
        }

        let fa = sqlx::query_as::<_, FundedAccount>(
            "INSERT INTO funded_accounts (id, user_id, tier_id, source_assessment_id, status, created_at)
             VALUES ($1, $2, $3, $4, 'active', now())
             RETURNING id, user_id, tier_id, source_assessment_id, status, closure_reason,
                       created_at, closed_at",
        )
        .bind(Uuid::new_v4())
        .bind(assessment.user_id)
        .bind(tier.id)
        .bind(assessment.id)
        .fetch_one(&mut *tx)
        .await?;

        let fva = sqlx::query_as::<_, FundedVirtualAccount>(
            "INSERT INTO funded_virtual_accounts (id, funded_account_id, starting_balance,
                                                    current_balance, peak_balance, realized_pnl,
                                                    unrealized_pnl, total_withdrawals)
             VALUES ($1, $2, $3, $3, $3, 0, 0, 0)
             RETURNING id, funded_account_id, starting_balance, current_balance, peak_balance,
                       realized_pnl, unrealized_pnl, total_withdrawals",
        )
        .bind(Uuid::new_v4())
        .bind(fa.id)
        .bind(tier.starting_balance)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((fa, fva))
    }

    async fn delete_funded_account(&self, id: Uuid) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM funded_virtual_accounts WHERE funded_account_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM funded_accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn close_funded_account(&self, id: Uuid, reason: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE funded_accounts SET status = 'closed', closure_reason = $2, closed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_funded_virtual_account(
        &self,
        funded_account_id: Uuid,
    ) -> anyhow::Result<Option<FundedVirtualAccount>> {
        let fva = sqlx::query_as::<_, FundedVirtualAccount>(
            "SELECT id, funded_account_id, starting_balance, current_balance, peak_balance,
                    realized_pnl, unrealized_pnl, total_withdrawals
             FROM funded_virtual_accounts WHERE funded_account_id = $1",
        )
        .bind(funded_account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fva)
    }

    async fn update_funded_virtual_account_numerics(
        &self,
        funded_account_id: Uuid,
        current: Decimal,
        peak: Decimal,
        realized: Decimal,
        unrealized: Decimal,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE funded_virtual_accounts
             SET current_balance = $2, peak_balance = $3, realized_pnl = $4, unrealized_pnl = $5
             WHERE funded_account_id = $1",
        )
        .bind(funded_account_id)
        .bind(current)
        .bind(peak)
        .bind(realized)
        .bind(unrealized)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn adjust_total_withdrawals(
        &self,
        funded_account_id: Uuid,
        delta: Decimal,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE funded_virtual_accounts SET total_withdrawals = total_withdrawals + $2
             WHERE funded_account_id = $1",
        )
        .bind(funded_account_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_withdrawal(
        &self,
        funded_account_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    ) -> anyhow::Result<Withdrawal> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            "INSERT INTO withdrawals (id, funded_account_id, user_id, amount, status, requested_at)
             VALUES ($1, $2, $3, $4, 'pending', now())
             RETURNING id, funded_account_id, user_id, amount, status, payout_reference,
                       rejection_reason, requested_at, approved_at, completed_at, rejected_at",
        )
        .bind(Uuid::new_v4())
        .bind(funded_account_id)
        .bind(user_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: Uuid) -> anyhow::Result<Option<Withdrawal>> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            "SELECT id, funded_account_id, user_id, amount, status, payout_reference,
                    rejection_reason, requested_at, approved_at, completed_at, rejected_at
             FROM withdrawals WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(withdrawal)
    }

    async fn get_withdrawal_by_payout_reference(
        &self,
        payout_reference: &str,
    ) -> anyhow::Result<Option<Withdrawal>> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            "SELECT id, funded_account_id, user_id, amount, status, payout_reference,
                    rejection_reason, requested_at, approved_at, completed_at, rejected_at
             FROM withdrawals WHERE payout_reference = $1",
        )
        .bind(payout_reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(withdrawal)
    }

    async fn list_pending_withdrawals(&self) -> anyhow::Result<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, Withdrawal>(
            "SELECT id, funded_account_id, user_id, amount, status, payout_reference,
                    rejection_reason, requested_at, approved_at, completed_at, rejected_at
             FROM withdrawals WHERE status = 'pending' ORDER BY requested_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_withdrawal_approved(&self, id: Uuid) -> anyhow::Result<Withdrawal> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            "UPDATE withdrawals SET status = 'approved', approved_at = now() WHERE id = $1
             RETURNING id, funded_account_id, user_id, amount, status, payout_reference,
                       rejection_reason, requested_at, approved_at, completed_at, rejected_at",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(withdrawal)
    }

    async fn set_withdrawal_completed(
        &self,
        id: Uuid,
        payout_reference: &str,
    ) -> anyhow::Result<Withdrawal> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            "UPDATE withdrawals SET status = 'completed', payout_reference = $2, completed_at = now()
             WHERE id = $1
             RETURNING id, funded_account_id, user_id, amount, status, payout_reference,
                       rejection_reason, requested_at, approved_at, completed_at, rejected_at",
        )
        .bind(id)
        .bind(payout_reference)
        .fetch_one(&self.pool)
        .await?;
        Ok(withdrawal)
    }

    async fn set_withdrawal_rejected(&self, id: Uuid, reason: &str) -> anyhow::Result<Withdrawal> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            "UPDATE withdrawals SET status = 'rejected', rejection_reason = $2, rejected_at = now()
             WHERE id = $1
             RETURNING id, funded_account_id, user_id, amount, status, payout_reference,
                       rejection_reason, requested_at, approved_at, completed_at, rejected_at",
        )
        .bind(id)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(withdrawal)
    }

    async fn delete_withdrawal(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM withdrawals WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

use crate::domain::User;
