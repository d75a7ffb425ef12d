//! Withdrawal-processing saga (spec.md §4.8), plus the late-payout-event
//! reconciliation path for pending-at-provider withdrawals.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache;
use crate::domain::{FundedAccountStatus, PositionStatus, Withdrawal, WithdrawalStatus};
use crate::events::topics::Payload;
use crate::payment::PayoutEvent;

use super::Collaborators;

#[derive(Debug, thiserror::Error)]
pub enum WithdrawalError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub async fn request_withdrawal(
    collab: &Collaborators,
    funded_account_id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    correlation_id: &str,
) -> Result<Withdrawal, WithdrawalError> {
    let funded_account = collab
        .db
        .get_funded_account(funded_account_id)
        .await?
        .ok_or_else(|| WithdrawalError::NotFound("funded account not found".into()))?;
    if funded_account.user_id != user_id {
        return Err(WithdrawalError::Forbidden("not your funded account".into()));
    }
    if funded_account.status != FundedAccountStatus::Active {
        return Err(WithdrawalError::Conflict("funded account is not active".into()));
    }

    let snapshot = cache::get_funded_snapshot(collab.cache.as_ref(), funded_account_id)
        .await?
        .ok_or_else(|| WithdrawalError::Conflict("no live state for funded account".into()))?;
    if snapshot
        .positions
        .iter()
        .any(|p| p.status == PositionStatus::Open)
    {
        return Err(WithdrawalError::Conflict(
            "cannot withdraw with open positions".into(),
        ));
    }

    if amount < Decimal::from(Withdrawal::MIN_AMOUNT) {
        return Err(WithdrawalError::Conflict(format!(
            "amount must be at least {}",
            Withdrawal::MIN_AMOUNT
        )));
    }

    let tier = collab
        .db
        .get_tier(funded_account.tier_id)
        .await?
        .ok_or_else(|| WithdrawalError::NotFound("tier not found".into()))?;
    let fva = collab
        .db
        .get_funded_virtual_account(funded_account_id)
        .await?
        .ok_or_else(|| WithdrawalError::NotFound("funded virtual account not found".into()))?;
    let withdrawable = fva.withdrawable_amount(tier.profit_split_ratio);
    if amount > withdrawable {
        return Err(WithdrawalError::Conflict(format!(
            "amount exceeds withdrawable balance of {withdrawable}"
        )));
    }

    // Step 1.
    let mut withdrawal = collab
        .db
        .create_withdrawal(funded_account_id, user_id, amount)
        .await?;

    collab
        .events
        .publish(
            correlation_id,
            Payload::WithdrawalRequested {
                withdrawal_id: withdrawal.id,
                funded_account_id,
                amount,
            },
        )
        .await
        .ok();

    // Step 2: auto-approve below the threshold, else leave pending.
    if !Withdrawal::qualifies_for_auto_approval(amount) {
        return Ok(withdrawal);
    }
    withdrawal = collab.db.set_withdrawal_approved(withdrawal.id).await?;
    collab
        .events
        .publish(
            correlation_id,
            Payload::WithdrawalApproved {
                withdrawal_id: withdrawal.id,
            },
        )
        .await
        .ok();

    // Step 3: approved path, issue payout.
    let payout = match collab.payment.issue_payout(amount, &withdrawal.id.to_string()).await {
        Ok(p) => p,
        Err(e) => {
            // Compensation: delete the Withdrawal row (step 6).
            collab.db.delete_withdrawal(withdrawal.id).await.ok();
            return Err(WithdrawalError::Internal(e));
        }
    };
    withdrawal = collab
        .db
        .set_withdrawal_completed(withdrawal.id, &payout.provider_reference)
        .await?;

    // Step 4: increment total_withdrawals, mirror to hot snapshot.
    collab
        .db
        .adjust_total_withdrawals(funded_account_id, amount)
        .await?;
    let mut updated_snapshot = snapshot;
    updated_snapshot.current_balance -= amount;
    cache::set_funded_snapshot(collab.cache.as_ref(), funded_account_id, &updated_snapshot)
        .await
        .ok();

    // Step 5: completed event.
    collab
        .events
        .publish(
            correlation_id,
            Payload::WithdrawalCompleted {
                withdrawal_id: withdrawal.id,
                payout_reference: payout.provider_reference,
            },
        )
        .await
        .ok();

    Ok(withdrawal)
}

/// Admin manual approval of a `pending` withdrawal (spec.md §6
/// `/admin/withdrawals/:id/approve`): the same issue-payout-then-complete
/// tail as the auto-approval path in `request_withdrawal`, minus the
/// threshold check, since an admin approving is itself the gate.
pub async fn admin_approve(
    collab: &Collaborators,
    withdrawal_id: Uuid,
    correlation_id: &str,
) -> Result<Withdrawal, WithdrawalError> {
    let withdrawal = collab
        .db
        .get_withdrawal(withdrawal_id)
        .await?
        .ok_or_else(|| WithdrawalError::NotFound("withdrawal not found".into()))?;
    if withdrawal.status != WithdrawalStatus::Pending {
        return Err(WithdrawalError::Conflict(
            "withdrawal is not pending review".into(),
        ));
    }

    let mut withdrawal = collab.db.set_withdrawal_approved(withdrawal.id).await?;
    collab
        .events
        .publish(
            correlation_id,
            Payload::WithdrawalApproved {
                withdrawal_id: withdrawal.id,
            },
        )
        .await
        .ok();

    let payout = match collab
        .payment
        .issue_payout(withdrawal.amount, &withdrawal.id.to_string())
        .await
    {
        Ok(p) => p,
        Err(e) => {
            collab.db.delete_withdrawal(withdrawal.id).await.ok();
            return Err(WithdrawalError::Internal(e));
        }
    };
    withdrawal = collab
        .db
        .set_withdrawal_completed(withdrawal.id, &payout.provider_reference)
        .await?;

    collab
        .db
        .adjust_total_withdrawals(withdrawal.funded_account_id, withdrawal.amount)
        .await?;
    if let Some(mut snapshot) =
        cache::get_funded_snapshot(collab.cache.as_ref(), withdrawal.funded_account_id).await?
    {
        snapshot.current_balance -= withdrawal.amount;
        cache::set_funded_snapshot(collab.cache.as_ref(), withdrawal.funded_account_id, &snapshot)
            .await
            .ok();
    }

    collab
        .events
        .publish(
            correlation_id,
            Payload::WithdrawalCompleted {
                withdrawal_id: withdrawal.id,
                payout_reference: payout.provider_reference,
            },
        )
        .await
        .ok();

    Ok(withdrawal)
}

/// Admin manual rejection of a `pending` withdrawal (spec.md §6
/// `/admin/withdrawals/:id/reject`). Nothing to revert on the virtual
/// account: `total_withdrawals` is only incremented once a payout has
/// actually been issued, which a still-`pending` withdrawal never reached.
pub async fn admin_reject(
    collab: &Collaborators,
    withdrawal_id: Uuid,
    reason: &str,
    correlation_id: &str,
) -> Result<Withdrawal, WithdrawalError> {
    let withdrawal = collab
        .db
        .get_withdrawal(withdrawal_id)
        .await?
        .ok_or_else(|| WithdrawalError::NotFound("withdrawal not found".into()))?;
    if withdrawal.status != WithdrawalStatus::Pending {
        return Err(WithdrawalError::Conflict(
            "withdrawal is not pending review".into(),
        ));
    }

    let withdrawal = collab
        .db
        .set_withdrawal_rejected(withdrawal.id, reason)
        .await?;
    collab
        .events
        .publish(
            correlation_id,
            Payload::WithdrawalFailed {
                withdrawal_id: withdrawal.id,
                funded_account_id: withdrawal.funded_account_id,
                amount: withdrawal.amount,
            },
        )
        .await
        .ok();

    Ok(withdrawal)
}

/// Late payout-paid/-failed events from the payment provider, resolving
/// withdrawals left `approved` awaiting provider confirmation.
pub async fn handle_payout_event(
    collab: &Collaborators,
    event: PayoutEvent,
    correlation_id: &str,
) -> anyhow::Result<()> {
    match event {
        PayoutEvent::Paid { payout_reference } => {
            tracing::debug!(correlation_id, payout_reference, "payout confirmed paid");
            Ok(())
        }
        PayoutEvent::Failed { payout_reference } => {
            let withdrawal = collab
                .db
                .get_withdrawal_by_payout_reference(&payout_reference)
                .await?;
            let Some(withdrawal) = withdrawal else {
                return Ok(());
            };
            if withdrawal.status == WithdrawalStatus::Rejected {
                return Ok(());
            }

            collab
                .db
                .set_withdrawal_rejected(withdrawal.id, "payout failed at provider")
                .await?;
            collab
                .db
                .adjust_total_withdrawals(withdrawal.funded_account_id, -withdrawal.amount)
                .await?;
            if let Some(mut snapshot) =
                cache::get_funded_snapshot(collab.cache.as_ref(), withdrawal.funded_account_id).await?
            {
                snapshot.current_balance += withdrawal.amount;
                cache::set_funded_snapshot(collab.cache.as_ref(), withdrawal.funded_account_id, &snapshot)
                    .await
                    .ok();
            }
            collab
                .events
                .publish(
                    correlation_id,
                    Payload::WithdrawalFailed {
                        withdrawal_id: withdrawal.id,
                        funded_account_id: withdrawal.funded_account_id,
                        amount: withdrawal.amount,
                    },
                )
                .await
                .ok();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::HotSnapshot;
    use crate::events::fake::FakeEventBus;
    use crate::events::topics::topic;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn make_collab(
        db: Arc<FakeStore>,
        cache: Arc<FakeCache>,
        events: Arc<FakeEventBus>,
        payment: Arc<FakePaymentProvider>,
    ) -> Collaborators {
        Collaborators {
            cache: cache.clone(),
            db,
            events,
            oracle: Arc::new(CacheOracle::new(cache)),
            payment,
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        }
    }

    #[tokio::test]
    async fn small_withdrawal_auto_approves_and_completes() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let payment = Arc::new(FakePaymentProvider::new());

        let tier = crate::domain::Tier {
            id: Uuid::new_v4(),
            name: "T0".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: dec!(0.2),
            min_trade_count: 10,
            max_risk_per_trade_ratio: dec!(0.1),
            profit_split_ratio: dec!(0.85),
        };
        db.seed_tier(tier.clone());

        let user_id = Uuid::new_v4();
        let funded_account_id = Uuid::new_v4();
        db.seed_funded_account(
            crate::domain::FundedAccount {
                id: funded_account_id,
                user_id,
                tier_id: tier.id,
                source_assessment_id: Uuid::new_v4(),
                status: FundedAccountStatus::Active,
                closure_reason: None,
                created_at: Utc::now(),
                closed_at: None,
            },
            crate::domain::FundedVirtualAccount {
                id: Uuid::new_v4(),
                funded_account_id,
                starting_balance: dec!(50000),
                current_balance: dec!(55000),
                peak_balance: dec!(55000),
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                total_withdrawals: Decimal::ZERO,
            },
        );
        let snapshot = HotSnapshot::empty(dec!(55000));
        cache::set_funded_snapshot(cache.as_ref(), funded_account_id, &snapshot)
            .await
            .unwrap();

        let collab = make_collab(db.clone(), cache.clone(), events.clone(), payment.clone());

        let withdrawal = request_withdrawal(&collab, funded_account_id, user_id, dec!(500), "corr-wd-small")
            .await
            .unwrap();

        assert_eq!(withdrawal.status, WithdrawalStatus::Completed);
        assert!(withdrawal.payout_reference.is_some());
        assert_eq!(events.count(topic::WITHDRAWAL_REQUESTED), 1);
        assert_eq!(events.count(topic::WITHDRAWAL_APPROVED), 1);
        assert_eq!(events.count(topic::WITHDRAWAL_COMPLETED), 1);

        let final_snapshot = cache::get_funded_snapshot(cache.as_ref(), funded_account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_snapshot.current_balance, dec!(54500));
    }

    #[tokio::test]
    async fn large_withdrawal_stays_pending_for_admin() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let payment = Arc::new(FakePaymentProvider::new());

        let tier = crate::domain::Tier {
            id: Uuid::new_v4(),
            name: "T0".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: dec!(0.2),
            min_trade_count: 10,
            max_risk_per_trade_ratio: dec!(0.1),
            profit_split_ratio: dec!(0.85),
        };
        db.seed_tier(tier.clone());

        let user_id = Uuid::new_v4();
        let funded_account_id = Uuid::new_v4();
        db.seed_funded_account(
            crate::domain::FundedAccount {
                id: funded_account_id,
                user_id,
                tier_id: tier.id,
                source_assessment_id: Uuid::new_v4(),
                status: FundedAccountStatus::Active,
                closure_reason: None,
                created_at: Utc::now(),
                closed_at: None,
            },
            crate::domain::FundedVirtualAccount {
                id: Uuid::new_v4(),
                funded_account_id,
                starting_balance: dec!(50000),
                current_balance: dec!(60000),
                peak_balance: dec!(60000),
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                total_withdrawals: Decimal::ZERO,
            },
        );
        let snapshot = HotSnapshot::empty(dec!(60000));
        cache::set_funded_snapshot(cache.as_ref(), funded_account_id, &snapshot)
            .await
            .unwrap();

        let collab = make_collab(db.clone(), cache.clone(), events.clone(), payment.clone());

        let withdrawal = request_withdrawal(&collab, funded_account_id, user_id, dec!(1500), "corr-wd-large")
            .await
            .unwrap();

        assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
        assert_eq!(events.count(topic::WITHDRAWAL_REQUESTED), 1);
        assert_eq!(events.count(topic::WITHDRAWAL_APPROVED), 0);
        assert_eq!(events.count(topic::WITHDRAWAL_COMPLETED), 0);
    }

    #[tokio::test]
    async fn late_payout_failure_rejects_and_reverts_withdrawal() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let payment = Arc::new(FakePaymentProvider::new());

        let tier = crate::domain::Tier {
            id: Uuid::new_v4(),
            name: "T0".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: dec!(0.2),
            min_trade_count: 10,
            max_risk_per_trade_ratio: dec!(0.1),
            profit_split_ratio: dec!(0.85),
        };
        db.seed_tier(tier.clone());

        let user_id = Uuid::new_v4();
        let funded_account_id = Uuid::new_v4();
        db.seed_funded_account(
            crate::domain::FundedAccount {
                id: funded_account_id,
                user_id,
                tier_id: tier.id,
                source_assessment_id: Uuid::new_v4(),
                status: FundedAccountStatus::Active,
                closure_reason: None,
                created_at: Utc::now(),
                closed_at: None,
            },
            crate::domain::FundedVirtualAccount {
                id: Uuid::new_v4(),
                funded_account_id,
                starting_balance: dec!(50000),
                current_balance: dec!(55000),
                peak_balance: dec!(55000),
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                total_withdrawals: Decimal::ZERO,
            },
        );
        let snapshot = HotSnapshot::empty(dec!(55000));
        cache::set_funded_snapshot(cache.as_ref(), funded_account_id, &snapshot)
            .await
            .unwrap();

        let collab = make_collab(db.clone(), cache.clone(), events.clone(), payment.clone());

        let withdrawal = request_withdrawal(&collab, funded_account_id, user_id, dec!(500), "corr-wd-fail")
            .await
            .unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Completed);
        let payout_reference = withdrawal.payout_reference.clone().unwrap();

        handle_payout_event(
            &collab,
            PayoutEvent::Failed { payout_reference },
            "corr-wd-fail-webhook",
        )
        .await
        .unwrap();

        let reverted = collab.db.get_withdrawal(withdrawal.id).await.unwrap().unwrap();
        assert_eq!(reverted.status, WithdrawalStatus::Rejected);
        let fva = collab
            .db
            .get_funded_virtual_account(funded_account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fva.total_withdrawals, Decimal::ZERO);
        let final_snapshot = cache::get_funded_snapshot(cache.as_ref(), funded_account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_snapshot.current_balance, dec!(55000));
        assert_eq!(events.count(topic::WITHDRAWAL_FAILED), 1);
    }
}
