//! Core-service event consumption (spec.md §6's "(C)" topics): the funded-
//! account activation saga reacts to `assessment.completed`, the event-
//! cancellation handler reacts to `events.event-cancelled`. Both run off
//! one subscription loop, mirroring `fanout::router::MessageRouter`'s
//! shape but for the two topics the core binary itself owns.

use std::sync::Arc;

use super::consumer::EventSubscriber;
use super::topics::{topic, Payload};
use crate::sagas::{event_cancellation, funded_activation, Collaborators};

const SUBSCRIBED_TOPICS: &[&str] = &[topic::ASSESSMENT_COMPLETED, topic::EVENT_CANCELLED];

/// Subscribes and drives the consumer loop until the subscription's
/// channel closes. Handler failures are logged, never propagated --
/// offsets (for a real Kafka/NATS adapter) are only committed after the
/// handler returns, per Design Notes §9, so a crashed handler relies on
/// re-delivery and each saga's own idempotence rather than this loop's.
pub async fn run(collab: Collaborators, subscriber: Arc<dyn EventSubscriber>) -> anyhow::Result<()> {
    let mut rx = subscriber.subscribe(SUBSCRIBED_TOPICS.to_vec()).await?;
    while let Some(envelope) = rx.recv().await {
        let correlation_id = envelope.correlation_id.clone();
        match envelope.payload {
            Payload::AssessmentCompleted { assessment_id, status } => {
                if status != crate::domain::AssessmentStatus::Passed {
                    continue;
                }
                if let Err(e) =
                    funded_activation::activate_funded_account(&collab, assessment_id, &correlation_id).await
                {
                    tracing::warn!(error = %e, %assessment_id, "funded-account activation failed");
                }
            }
            Payload::EventCancelled { event_id, .. } => {
                if let Err(e) =
                    event_cancellation::handle_event_cancelled(&collab, &event_id, &correlation_id).await
                {
                    tracing::warn!(error = %e, event_id, "event-cancellation handling failed");
                }
            }
            _ => {}
        }
    }
    Ok(())
}
