//! Ring membership (spec.md §4.12): nodes register in the shared
//! `websocket:nodes` set at startup and deregister on shutdown; membership
//! changes propagate to every node's in-process ring via the
//! `websocket:node:join`/`websocket:node:leave` pub/sub channels.

use std::sync::Arc;

use futures_util::StreamExt;

use crate::cache::{keys, Cache};

use super::ring::ConsistentHashRing;

pub struct RingMembership {
    cache: Arc<dyn Cache>,
    ring: Arc<ConsistentHashRing>,
    node_id: String,
}

impl RingMembership {
    pub fn new(cache: Arc<dyn Cache>, ring: Arc<ConsistentHashRing>, node_id: String) -> Self {
        Self {
            cache,
            ring,
            node_id,
        }
    }

    /// Loads the existing membership set into the local ring, registers
    /// this node, and announces the join so peers pick it up too.
    pub async fn join(&self) -> anyhow::Result<()> {
        for existing in self.cache.set_members(keys::WEBSOCKET_NODES_SET).await? {
            self.ring.add_node(&existing);
        }
        self.ring.add_node(&self.node_id);
        self.cache
            .set_add(keys::WEBSOCKET_NODES_SET, &self.node_id)
            .await?;
        self.cache
            .publish(keys::WEBSOCKET_NODE_JOIN_CHANNEL, self.node_id.clone())
            .await?;
        tracing::info!(node_id = %self.node_id, "joined fan-out ring");
        Ok(())
    }

    pub async fn leave(&self) -> anyhow::Result<()> {
        self.cache
            .set_remove(keys::WEBSOCKET_NODES_SET, &self.node_id)
            .await?;
        self.cache
            .publish(keys::WEBSOCKET_NODE_LEAVE_CHANNEL, self.node_id.clone())
            .await?;
        self.ring.remove_node(&self.node_id);
        tracing::info!(node_id = %self.node_id, "left fan-out ring");
        Ok(())
    }

    /// Spawns a task subscribing to join/leave announcements over Redis
    /// pub/sub and keeping `ring` eventually consistent, per spec.md §4.12's
    /// "a minority of misrouted messages during membership change is
    /// acceptable" tolerance.
    pub fn spawn_listener(ring: Arc<ConsistentHashRing>, redis_url: String) {
        tokio::spawn(async move {
            loop {
                match Self::listen_once(&ring, &redis_url).await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "ring membership listener dropped, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    async fn listen_once(ring: &Arc<ConsistentHashRing>, redis_url: &str) -> anyhow::Result<()> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(keys::WEBSOCKET_NODE_JOIN_CHANNEL)
            .await?;
        pubsub
            .subscribe(keys::WEBSOCKET_NODE_LEAVE_CHANNEL)
            .await?;

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel: String = msg.get_channel_name().to_string();
            let node_id: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read ring membership payload");
                    continue;
                }
            };
            match channel.as_str() {
                keys::WEBSOCKET_NODE_JOIN_CHANNEL => ring.add_node(&node_id),
                keys::WEBSOCKET_NODE_LEAVE_CHANNEL => ring.remove_node(&node_id),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;

    #[tokio::test]
    async fn join_registers_in_shared_set_and_local_ring() {
        let cache: Arc<dyn Cache> = Arc::new(FakeCache::new());
        let ring = Arc::new(ConsistentHashRing::new());
        let membership = RingMembership::new(cache.clone(), ring.clone(), "node-a".to_string());
        membership.join().await.unwrap();

        assert_eq!(ring.node_count(), 1);
        let members = cache.set_members(keys::WEBSOCKET_NODES_SET).await.unwrap();
        assert_eq!(members, vec!["node-a".to_string()]);
    }

    #[tokio::test]
    async fn leave_removes_from_shared_set_and_local_ring() {
        let cache: Arc<dyn Cache> = Arc::new(FakeCache::new());
        let ring = Arc::new(ConsistentHashRing::new());
        let membership = RingMembership::new(cache.clone(), ring.clone(), "node-a".to_string());
        membership.join().await.unwrap();
        membership.leave().await.unwrap();

        assert_eq!(ring.node_count(), 0);
        let members = cache.set_members(keys::WEBSOCKET_NODES_SET).await.unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn second_node_joining_picks_up_existing_member() {
        let cache: Arc<dyn Cache> = Arc::new(FakeCache::new());
        let ring_a = Arc::new(ConsistentHashRing::new());
        RingMembership::new(cache.clone(), ring_a.clone(), "node-a".to_string())
            .join()
            .await
            .unwrap();

        let ring_b = Arc::new(ConsistentHashRing::new());
        RingMembership::new(cache.clone(), ring_b.clone(), "node-b".to_string())
            .join()
            .await
            .unwrap();

        // node-b's local ring should know about node-a from the shared set,
        // even though it never saw the join pub/sub message directly.
        assert_eq!(ring_b.node_count(), 2);
    }
}
