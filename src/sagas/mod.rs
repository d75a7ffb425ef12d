//! Sagas (spec.md §4.3-4.9): atomic-effect command pipelines with
//! registered compensations, serialized per assessment/funded-account id
//! via `crate::concurrency::AssessmentLocks` (spec.md §5).
//!
//! Every saga takes `&Collaborators` rather than a concrete cache/db/event
//! client, per Design Notes §9 ("re-architect as an injected collaborators
//! bundle"). Saga-internal errors are `anyhow::Result`; the HTTP layer
//! (`src/api/`) converts them to `AppError` at the boundary.

pub mod assessment_lifecycle;
pub mod event_cancellation;
pub mod funded_activation;
pub mod order_placement;
pub mod position_close;
pub mod rule_violation;
pub mod withdrawal;

pub mod execution_rates;

use std::sync::Arc;

use crate::cache::Cache;
use crate::concurrency::AssessmentLocks;
use crate::db::DurableStore;
use crate::events::EventBus;
use crate::oracle::Oracle;
use crate::payment::PaymentProvider;

/// The injected-collaborators bundle Design Notes §9 calls for: constructed
/// once at startup, held behind `Arc` by both binaries' `AppState`s and
/// passed by reference into every saga/worker function.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn Cache>,
    pub db: Arc<dyn DurableStore>,
    pub events: Arc<dyn EventBus>,
    pub oracle: Arc<dyn Oracle>,
    pub payment: Arc<dyn PaymentProvider>,
    pub locks: Arc<AssessmentLocks>,
    pub execution_rates: execution_rates::ExecutionRates,
}
