//! Consistent-hash ring for assessment ownership across fan-out nodes
//! (spec.md §4.12): 150 virtual nodes per physical node, positions derived
//! from a uniform 128-bit digest truncated to 32 bits, `node_for` walks to
//! the first ring position at or after the key's hash, wrapping to the
//! minimum.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;

pub const VIRTUAL_NODES_PER_PHYSICAL_NODE: usize = 150;

type HmacSha256 = Hmac<Sha256>;

fn ring_position(key: &str) -> u32 {
    // HMAC-SHA256 gives a uniform 256-bit digest; the top 128 bits are
    // plenty of entropy for an 8-byte slice, and we only need 32 of those
    // bits to place the point on the ring.
    let mut mac = HmacSha256::new_from_slice(b"fundedtrader-fanout-ring")
        .expect("HMAC accepts keys of any length");
    mac.update(key.as_bytes());
    let digest = mac.finalize().into_bytes();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Thread-safe consistent-hash ring. Reads (`node_for`) and writes
/// (`add_node`/`remove_node`) are both cheap enough to hold a single
/// `RwLock` for the whole table (spec.md §5: "per-process registries").
#[derive(Default)]
pub struct ConsistentHashRing {
    inner: RwLock<BTreeMap<u32, String>>,
}

impl ConsistentHashRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node_id: &str) {
        let mut inner = self.inner.write();
        for i in 0..VIRTUAL_NODES_PER_PHYSICAL_NODE {
            let pos = ring_position(&format!("{node_id}#{i}"));
            inner.insert(pos, node_id.to_string());
        }
    }

    pub fn remove_node(&self, node_id: &str) {
        let mut inner = self.inner.write();
        inner.retain(|_, owner| owner != node_id);
    }

    pub fn node_count(&self) -> usize {
        self.inner
            .read()
            .values()
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    /// First ring position at or after `hash(key)`, wrapping to the
    /// minimum position if `key` hashes past the last entry.
    pub fn node_for(&self, key: &str) -> Option<String> {
        let inner = self.inner.read();
        if inner.is_empty() {
            return None;
        }
        let target = ring_position(key);
        inner
            .range(target..)
            .next()
            .or_else(|| inner.iter().next())
            .map(|(_, node)| node.clone())
    }

    pub fn owns(&self, this_node_id: &str, key: &str) -> bool {
        self.node_for(key).as_deref() == Some(this_node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_owns_everything() {
        let ring = ConsistentHashRing::new();
        ring.add_node("node-a");
        for i in 0..50 {
            assert_eq!(ring.node_for(&format!("assessment-{i}")).as_deref(), Some("node-a"));
        }
    }

    #[test]
    fn removed_node_no_longer_owns_anything() {
        let ring = ConsistentHashRing::new();
        ring.add_node("node-a");
        ring.add_node("node-b");
        ring.remove_node("node-a");
        assert_eq!(ring.node_count(), 1);
        for i in 0..50 {
            assert_eq!(ring.node_for(&format!("assessment-{i}")).as_deref(), Some("node-b"));
        }
    }

    #[test]
    fn assignment_is_deterministic_for_a_fixed_membership() {
        let ring = ConsistentHashRing::new();
        ring.add_node("node-a");
        ring.add_node("node-b");
        ring.add_node("node-c");
        let first = ring.node_for("assessment-xyz");
        let second = ring.node_for("assessment-xyz");
        assert_eq!(first, second);
    }

    #[test]
    fn coverage_is_roughly_even_across_three_nodes() {
        // spec.md §8 invariant I6: every key is owned by exactly one live
        // node, and with enough virtual nodes the distribution should not
        // collapse onto a single physical node.
        let ring = ConsistentHashRing::new();
        ring.add_node("node-a");
        ring.add_node("node-b");
        ring.add_node("node-c");

        let mut counts = std::collections::HashMap::new();
        for i in 0..3000 {
            let owner = ring.node_for(&format!("assessment-{i}")).unwrap();
            *counts.entry(owner).or_insert(0usize) += 1;
        }

        assert_eq!(counts.len(), 3);
        for count in counts.values() {
            assert!(*count > 500, "node got suspiciously few keys: {count}");
        }
    }

    #[test]
    fn empty_ring_owns_nothing() {
        let ring = ConsistentHashRing::new();
        assert_eq!(ring.node_for("assessment-1"), None);
    }
}
