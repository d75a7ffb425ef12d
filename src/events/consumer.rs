//! Consumer-side subscription port, the other half of the `EventBus`
//! producer port in `events/mod.rs`.
//!
//! spec.md §4.7 and §4.9 both describe the core service *consuming*
//! `assessment.completed` and `events.event-cancelled`; §4.11 describes the
//! fan-out service consuming a much larger topic set. Both want the same
//! shape: "give me a channel of `Envelope`s for these topics" -- so this is
//! a separate trait from `EventBus` rather than a method on it, since a
//! production Kafka/NATS client would split producer and consumer handles
//! the same way.
//!
//! Implemented as an `mpsc::Receiver` handoff rather than a boxed `Stream`:
//! simpler to hold in a struct field and `.recv().await` in a `tokio::select!`
//! loop, matching the teacher's `broadcast::Receiver` consumption style in
//! its WebSocket broadcast loop.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::topics::{Envelope, Topic};

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribes to exactly the given topics; messages on any other topic
    /// are never delivered to the returned receiver.
    async fn subscribe(&self, topics: Vec<Topic>) -> anyhow::Result<mpsc::Receiver<Envelope>>;
}

/// Cross-process adapter over Redis pub/sub, the consumer side of
/// `RedisEventBus`. Opens one dedicated connection (pub/sub connections
/// cannot multiplex ordinary commands) and forwards matching messages onto
/// an internal channel for the lifetime of the subscription.
pub struct RedisEventSubscriber {
    redis_url: String,
}

impl RedisEventSubscriber {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
        }
    }
}

#[async_trait]
impl EventSubscriber for RedisEventSubscriber {
    async fn subscribe(&self, topics: Vec<Topic>) -> anyhow::Result<mpsc::Receiver<Envelope>> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let conn = client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        for topic in &topics {
            pubsub.subscribe(*topic).await?;
        }

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read pub/sub payload");
                        continue;
                    }
                };
                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode event envelope");
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// In-process adapter over `InProcessEventBus`'s broadcast channel, used
/// when core and fan-out run in the same binary (dev mode) and by tests.
pub struct InProcessEventSubscriber {
    bus: std::sync::Arc<super::InProcessEventBus>,
}

impl InProcessEventSubscriber {
    pub fn new(bus: std::sync::Arc<super::InProcessEventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl EventSubscriber for InProcessEventSubscriber {
    async fn subscribe(&self, topics: Vec<Topic>) -> anyhow::Result<mpsc::Receiver<Envelope>> {
        let mut broadcast_rx = self.bus.subscribe();
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok((topic, envelope)) => {
                        if topics.contains(&topic) && tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "in-process event subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::topics::topic;
    use crate::events::{EventBus, InProcessEventBus};
    use uuid::Uuid;

    #[tokio::test]
    async fn in_process_subscriber_filters_by_topic() {
        let bus = std::sync::Arc::new(InProcessEventBus::new(16));
        let subscriber = InProcessEventSubscriber::new(bus.clone());
        let mut rx = subscriber
            .subscribe(vec![topic::ASSESSMENT_COMPLETED])
            .await
            .unwrap();

        bus.publish(
            "corr-1",
            crate::events::topics::Payload::AssessmentCompleted {
                assessment_id: Uuid::new_v4(),
                status: crate::domain::AssessmentStatus::Passed,
            },
        )
        .await
        .unwrap();
        bus.publish(
            "corr-2",
            crate::events::topics::Payload::AssessmentPaused {
                assessment_id: Uuid::new_v4(),
            },
        )
        .await
        .unwrap();

        let received = rx.recv().await.unwrap();
        assert!(matches!(
            received.payload,
            crate::events::topics::Payload::AssessmentCompleted { .. }
        ));
        // The paused event was filtered out; channel should have nothing else
        // queued (give it a moment in case of scheduling races).
        tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv())
            .await
            .ok();
    }
}
