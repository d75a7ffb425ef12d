//! Durable-reconciliation worker (spec.md §4.10): every 5s, folds each live
//! assessment's hot snapshot back onto its durable rows. The worker is the
//! single writer of the VirtualAccount numeric columns, so the "observe
//! prior updatedAt, warn on mismatch" optimistic check spec.md describes is
//! a non-issue here -- there is never a second writer to race against.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{self, keys};
use crate::domain::PositionStatus;
use crate::events::topics::Payload;
use crate::sagas::Collaborators;

const CYCLE_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_DELAYS_MS: [u64; 3] = [100, 200, 400];
const DLQ_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    Transient,
    Permanent,
    Unknown,
}

fn classify(err: &anyhow::Error) -> FailureClass {
    let msg = err.to_string().to_lowercase();
    if msg.contains("connection refused")
        || msg.contains("timed out")
        || msg.contains("timeout")
        || msg.contains("reset")
        || msg.contains("unreachable")
        || msg.contains("temporarily unavailable")
    {
        FailureClass::Transient
    } else if msg.contains("unique")
        || msg.contains("duplicate")
        || msg.contains("foreign key")
        || msg.contains("not null")
        || msg.contains("syntax")
    {
        FailureClass::Permanent
    } else {
        FailureClass::Unknown
    }
}

/// Classifier + exponential-backoff wrapper around one durable operation
/// (spec.md §4.10 "Retry").
async fn with_retry<F, Fut, T>(mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if classify(&e) == FailureClass::Permanent || attempt >= RETRY_DELAYS_MS.len() {
                    return Err(e);
                }
                tokio::time::sleep(Duration::from_millis(RETRY_DELAYS_MS[attempt])).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DlqEntry {
    assessment_id: Uuid,
    position_id: Uuid,
    timestamp: chrono::DateTime<Utc>,
    error_message: String,
    retry_count: usize,
    error_type: String,
}

async fn push_to_dlq(
    collab: &Collaborators,
    assessment_id: Uuid,
    position_id: Uuid,
    err: &anyhow::Error,
) {
    let entry = DlqEntry {
        assessment_id,
        position_id,
        timestamp: Utc::now(),
        error_message: err.to_string(),
        retry_count: RETRY_DELAYS_MS.len(),
        error_type: format!("{:?}", classify(err)),
    };
    if let Ok(json) = serde_json::to_string(&entry) {
        collab
            .cache
            .list_push(keys::PERSISTENCE_DLQ, json, Some(DLQ_TTL_SECS))
            .await
            .ok();
    }
}

/// Cycle health, exposed at the readiness endpoint (spec.md §4.10
/// "Health").
pub struct PersistenceHealth {
    last_successful_cycle: Mutex<Option<chrono::DateTime<Utc>>>,
    consecutive_failures: AtomicU32,
}

impl PersistenceHealth {
    fn new() -> Self {
        Self {
            last_successful_cycle: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    fn record_success(&self) {
        *self.last_successful_cycle.lock() = Some(Utc::now());
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        let recent = self
            .last_successful_cycle
            .lock()
            .map(|t| (Utc::now() - t).num_seconds() < 60)
            .unwrap_or(false);
        self.consecutive_failures.load(Ordering::SeqCst) <= 5 && recent
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// `i64::MAX` if no cycle has ever succeeded yet.
    pub fn seconds_since_last_success(&self) -> i64 {
        self.last_successful_cycle
            .lock()
            .map(|t| (Utc::now() - t).num_seconds())
            .unwrap_or(i64::MAX)
    }
}

pub fn spawn(collab: Collaborators) -> (JoinHandle<()>, Arc<PersistenceHealth>) {
    let health = Arc::new(PersistenceHealth::new());
    let cycle_health = health.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CYCLE_INTERVAL);
        loop {
            interval.tick().await;
            match run_cycle(&collab).await {
                Ok(()) => cycle_health.record_success(),
                Err(e) => {
                    tracing::warn!(error = %e, "persistence cycle failed");
                    cycle_health.record_failure();
                }
            }
        }
    });
    (handle, health)
}

async fn run_cycle(collab: &Collaborators) -> anyhow::Result<()> {
    for key in collab.cache.scan_keys(keys::ASSESSMENT_STATE_PATTERN).await? {
        let Some(assessment_id) = keys::id_from_scanned_key(&key) else {
            continue;
        };
        if let Err(e) = reconcile_assessment(collab, assessment_id).await {
            tracing::warn!(%assessment_id, error = %e, "reconcile failed for assessment");
        }
    }
    Ok(())
}

async fn reconcile_assessment(collab: &Collaborators, assessment_id: Uuid) -> anyhow::Result<()> {
    // Step 1: locate the VirtualAccount row; skip entirely if absent.
    let Some(_va) = collab.db.get_virtual_account(assessment_id).await? else {
        return Ok(());
    };
    let Some(mut snapshot) = cache::get_snapshot(collab.cache.as_ref(), assessment_id).await? else {
        return Ok(());
    };

    // Step 2.
    with_retry(|| {
        collab.db.update_virtual_account_numerics(
            assessment_id,
            snapshot.current_balance,
            snapshot.peak_balance,
            snapshot.realized_pnl,
            snapshot.unrealized_pnl,
        )
    })
    .await?;

    let durable_positions = collab.db.list_positions_for_assessment(assessment_id).await?;

    // Step 3: reconcile every snapshot position against its durable row.
    for snap_position in &snapshot.positions {
        let durable = durable_positions.iter().find(|p| p.id == snap_position.id);
        match durable {
            None => {
                let create_result = with_retry(|| {
                    collab.db.create_position(crate::db::NewPosition {
                        assessment_id,
                        market: snap_position.market.clone(),
                        side: snap_position.side,
                        quantity: snap_position.quantity,
                        entry_price: snap_position.entry_price,
                        status: snap_position.status,
                        opened_at: snap_position.opened_at,
                    })
                })
                .await;
                match create_result {
                    Ok(created) if snap_position.status == PositionStatus::Cancelled => {
                        if let Err(e) =
                            with_retry(|| collab.db.cancel_position_with_trades(created.id, Utc::now())).await
                        {
                            push_to_dlq(collab, assessment_id, created.id, &e).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        push_to_dlq(collab, assessment_id, snap_position.id, &e).await;
                    }
                }
            }
            Some(durable_position)
                if snap_position.status == PositionStatus::Cancelled
                    && durable_position.status != PositionStatus::Cancelled =>
            {
                if let Err(e) = with_retry(|| {
                    collab
                        .db
                        .cancel_position_with_trades(snap_position.id, Utc::now())
                })
                .await
                {
                    push_to_dlq(collab, assessment_id, snap_position.id, &e).await;
                }
            }
            Some(_) => {
                with_retry(|| {
                    collab.db.refresh_position_price(
                        snap_position.id,
                        snap_position.current_price,
                        snap_position.unrealized_pnl,
                    )
                })
                .await?;
            }
        }
    }

    // Step 4: durable open positions absent from the snapshot were closed
    // elsewhere (the manual-close path already wrote the durable row when
    // it existed at close time) -- treat surviving open rows with no
    // snapshot counterpart as closures that need to catch up. `closed_at`
    // (not `status`, which stays `Open` after a close) is the guard against
    // reprocessing the same closure on the next cycle.
    let mut snapshot_trade_count_changed = false;
    for durable_position in durable_positions
        .iter()
        .filter(|p| p.status == PositionStatus::Open && p.closed_at.is_none())
    {
        if snapshot.positions.iter().any(|sp| sp.id == durable_position.id) {
            continue;
        }
        let closed_at = Utc::now();
        with_retry(|| collab.db.close_position(durable_position.id, closed_at)).await?;
        collab.db.increment_trade_count(assessment_id).await.ok();
        snapshot.trade_count += 1;
        snapshot_trade_count_changed = true;
        collab
            .events
            .publish(
                "persistence-worker",
                Payload::PositionClosed {
                    assessment_id,
                    position_id: durable_position.id,
                    entry_price: durable_position.entry_price,
                    exit_price: durable_position.current_price,
                    realized_pnl: durable_position.unrealized_pnl,
                },
            )
            .await
            .ok();
    }

    // Step 4 (cont.): the snapshot's own tradeCount must reflect
    // worker-driven closures too, not just the durable VA's, since the
    // rules-monitor reads `snapshot.trade_count` (spec.md §4.5).
    if snapshot_trade_count_changed {
        cache::set_snapshot(collab.cache.as_ref(), assessment_id, &snapshot).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::{AssessmentStatus, HotSnapshot, Side, SnapshotPosition};
    use crate::events::fake::FakeEventBus;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use rust_decimal_macros::dec;

    fn make_collab(db: Arc<FakeStore>, cache: Arc<FakeCache>, events: Arc<FakeEventBus>) -> Collaborators {
        Collaborators {
            cache: cache.clone(),
            db,
            events,
            oracle: Arc::new(CacheOracle::new(cache)),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        }
    }

    #[tokio::test]
    async fn creates_durable_position_from_snapshot_only_position() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = make_collab(db.clone(), cache.clone(), events.clone());

        let tier = crate::domain::Tier {
            id: Uuid::new_v4(),
            name: "T0".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: dec!(0.2),
            min_trade_count: 10,
            max_risk_per_trade_ratio: dec!(0.1),
            profit_split_ratio: dec!(0.8),
        };
        db.seed_tier(tier.clone());

        let user_id = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        db.seed_assessment(crate::domain::Assessment {
            id: assessment_id,
            user_id,
            tier_id: tier.id,
            purchase_id: Uuid::new_v4(),
            status: AssessmentStatus::Active,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            soft_delete_at: None,
        });
        db.seed_virtual_account(crate::domain::VirtualAccount {
            id: Uuid::new_v4(),
            assessment_id,
            starting_balance: dec!(50000),
            current_balance: dec!(50000),
            peak_balance: dec!(50000),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            trade_count: 0,
        });

        let position_id = Uuid::new_v4();
        let mut snapshot = HotSnapshot::empty(dec!(50000));
        snapshot.positions.push(SnapshotPosition {
            id: position_id,
            market: "BTC/USD".into(),
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            current_price: dec!(50500),
            unrealized_pnl: dec!(50),
            opened_at: Utc::now(),
            status: crate::domain::PositionStatus::Open,
        });
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        reconcile_assessment(&collab, assessment_id).await.unwrap();

        let position = db.get_position(position_id).await.unwrap().unwrap();
        assert_eq!(position.status, crate::domain::PositionStatus::Open);
        let va = db.get_virtual_account(assessment_id).await.unwrap().unwrap();
        assert_eq!(va.current_balance, dec!(50000));
    }

    #[tokio::test]
    async fn closes_durable_position_missing_from_snapshot() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = make_collab(db.clone(), cache.clone(), events.clone());

        let tier = crate::domain::Tier {
            id: Uuid::new_v4(),
            name: "T0".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: dec!(0.2),
            min_trade_count: 10,
            max_risk_per_trade_ratio: dec!(0.1),
            profit_split_ratio: dec!(0.8),
        };
        db.seed_tier(tier.clone());

        let user_id = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        db.seed_assessment(crate::domain::Assessment {
            id: assessment_id,
            user_id,
            tier_id: tier.id,
            purchase_id: Uuid::new_v4(),
            status: AssessmentStatus::Active,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            soft_delete_at: None,
        });
        db.seed_virtual_account(crate::domain::VirtualAccount {
            id: Uuid::new_v4(),
            assessment_id,
            starting_balance: dec!(50000),
            current_balance: dec!(50000),
            peak_balance: dec!(50000),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            trade_count: 0,
        });
        db.seed_position(crate::domain::Position {
            id: Uuid::new_v4(),
            assessment_id,
            market: "BTC/USD".into(),
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            current_price: dec!(50500),
            unrealized_pnl: dec!(50),
            status: crate::domain::PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        });

        let snapshot = HotSnapshot::empty(dec!(50000));
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        reconcile_assessment(&collab, assessment_id).await.unwrap();

        let positions = db.list_positions_for_assessment(assessment_id).await.unwrap();
        assert!(positions[0].closed_at.is_some());
        let va = db.get_virtual_account(assessment_id).await.unwrap().unwrap();
        assert_eq!(va.trade_count, 1);
        let updated_snapshot = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated_snapshot.trade_count, 1);
    }
}
