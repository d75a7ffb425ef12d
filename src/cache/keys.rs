//! Cache key layout (spec.md §6).

use uuid::Uuid;

pub fn session(token: &str) -> String {
    format!("session:{token}")
}

pub fn assessment_state(assessment_id: Uuid) -> String {
    format!("assessment:{assessment_id}:state")
}

pub fn assessment_rules(assessment_id: Uuid) -> String {
    format!("assessment:{assessment_id}:rules")
}

pub fn funded_state(funded_id: Uuid) -> String {
    format!("funded:{funded_id}:state")
}

pub fn funded_rules(funded_id: Uuid) -> String {
    format!("funded:{funded_id}:rules")
}

pub fn market_price(market: &str) -> String {
    format!("market:{market}:price")
}

pub const WEBSOCKET_NODES_SET: &str = "websocket:nodes";
pub const WEBSOCKET_NODE_JOIN_CHANNEL: &str = "websocket:node:join";
pub const WEBSOCKET_NODE_LEAVE_CHANNEL: &str = "websocket:node:leave";
pub const PERSISTENCE_DLQ: &str = "persistence:failed:cancelled-positions";

pub const ASSESSMENT_STATE_PATTERN: &str = "assessment:*:state";
pub const ASSESSMENT_RULES_PATTERN: &str = "assessment:*:rules";
pub const FUNDED_STATE_PATTERN: &str = "funded:*:state";
pub const FUNDED_RULES_PATTERN: &str = "funded:*:rules";

/// Extracts the assessment/funded id embedded in a scanned state/rules key
/// of the form `{prefix}:{id}:{suffix}`.
pub fn id_from_scanned_key(key: &str) -> Option<Uuid> {
    key.split(':').nth(1).and_then(|s| Uuid::parse_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_state_key() {
        let id = Uuid::new_v4();
        let key = assessment_state(id);
        assert_eq!(id_from_scanned_key(&key), Some(id));
    }
}
