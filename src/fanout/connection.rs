//! WebSocket connection manager (spec.md §4.11): tracks per-connection
//! `{userId, assessmentId?, connectedAt, lastHeartbeat}`, runs the heartbeat
//! sweep, and fans outbound messages out to the connections they're scoped
//! to. Modeled on the teacher's broadcast-over-`tokio::select!` WebSocket
//! loop, generalized from one global channel to a per-connection mailbox so
//! assessment-scoped messages don't have to be filtered client-side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{AssessmentStatus, RuleName, RuleStatus};

/// Server -> client frames (spec.md §6's WebSocket section).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "market_price")]
    MarketPrice {
        market: String,
        price: serde_json::Value,
    },
    #[serde(rename = "pnl_update")]
    PnlUpdate {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
        #[serde(rename = "realizedPnl")]
        realized_pnl: Decimal,
        #[serde(rename = "unrealizedPnl")]
        unrealized_pnl: Decimal,
        balance: Option<Decimal>,
    },
    #[serde(rename = "position_update")]
    PositionUpdate {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
        #[serde(rename = "positionId")]
        position_id: Uuid,
        status: String,
        #[serde(rename = "realizedPnl")]
        realized_pnl: Option<Decimal>,
    },
    #[serde(rename = "assessment_update")]
    AssessmentUpdate {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
        status: Option<AssessmentStatus>,
    },
    #[serde(rename = "violation")]
    Violation {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
        rule: RuleName,
        value: Decimal,
        threshold: Decimal,
    },
    #[serde(rename = "rule_status")]
    RuleStatusMessage {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
        value: Decimal,
        threshold: Decimal,
        status: RuleStatus,
    },
}

/// Close codes spec.md §6 names explicitly.
pub mod close_code {
    pub const AUTH_OR_REDIRECT: u16 = 1008;
    pub const HEARTBEAT_TIMEOUT: u16 = 1000;
    pub const SHUTDOWN: u16 = 1001;
    pub const INTERNAL: u16 = 1011;
}

/// A connection's mailbox carries either a frame to relay verbatim or a
/// close instruction -- kept as a separate command rather than folded into
/// `OutboundMessage` so `OutboundMessage`'s `#[serde(tag = "type")]` only
/// ever has to model real wire frames.
#[derive(Debug, Clone)]
pub enum ConnectionCommand {
    Send(OutboundMessage),
    Close { code: u16, reason: String },
}

struct Connection {
    #[allow(dead_code)]
    user_id: Uuid,
    assessment_id: Option<Uuid>,
    #[allow(dead_code)]
    connected_at: Instant,
    last_heartbeat: Instant,
    sender: mpsc::UnboundedSender<ConnectionCommand>,
}

/// Registry of live connections for this fan-out node. `Arc`-shared between
/// the accept loop, heartbeat task, and event router.
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        assessment_id: Option<Uuid>,
    ) -> mpsc::UnboundedReceiver<ConnectionCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().insert(
            connection_id,
            Connection {
                user_id,
                assessment_id,
                connected_at: Instant::now(),
                last_heartbeat: Instant::now(),
                sender: tx,
            },
        );
        rx
    }

    pub fn remove(&self, connection_id: Uuid) {
        self.connections.write().remove(&connection_id);
    }

    pub fn touch_heartbeat(&self, connection_id: Uuid) {
        if let Some(conn) = self.connections.write().get_mut(&connection_id) {
            conn.last_heartbeat = Instant::now();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Broadcasts to every local connection (`market-data.*-ticks`).
    pub fn broadcast_all(&self, message: OutboundMessage) {
        for conn in self.connections.read().values() {
            let _ = conn.sender.send(ConnectionCommand::Send(message.clone()));
        }
    }

    /// Broadcasts to every local connection whose `assessmentId` matches
    /// (spec.md §4.11: "owners broadcast to all local connections whose
    /// assessmentId matches").
    pub fn broadcast_to_assessment(&self, assessment_id: Uuid, message: OutboundMessage) {
        for conn in self.connections.read().values() {
            if conn.assessment_id == Some(assessment_id) {
                let _ = conn.sender.send(ConnectionCommand::Send(message.clone()));
            }
        }
    }

    /// Heartbeat sweep (spec.md §4.11): pings connections within the
    /// timeout window, sends a close command to (and returns the ids of)
    /// the ones that haven't answered in time.
    pub fn sweep_heartbeats(&self, connection_timeout: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        let mut timed_out = Vec::new();
        let connections = self.connections.read();
        for (id, conn) in connections.iter() {
            if now.duration_since(conn.last_heartbeat) > connection_timeout {
                timed_out.push(*id);
                let _ = conn.sender.send(ConnectionCommand::Close {
                    code: close_code::HEARTBEAT_TIMEOUT,
                    reason: "Heartbeat timeout".to_string(),
                });
            } else {
                let _ = conn.sender.send(ConnectionCommand::Send(OutboundMessage::Ping));
            }
        }
        timed_out
    }

    /// Sends every connection a close command, used on graceful shutdown
    /// (spec.md's supplemented graceful-shutdown behavior, SPEC_FULL.md §D).
    pub fn close_all(&self, code: u16, reason: &str) {
        for conn in self.connections.read().values() {
            let _ = conn.sender.send(ConnectionCommand::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

/// Drives one accepted WebSocket: forwards queued `OutboundMessage`s to the
/// socket and reacts to inbound `pong` frames by refreshing the heartbeat
/// clock, exactly mirroring the teacher's `tokio::select!` duplex loop.
pub async fn run_connection(
    mut socket: WebSocket,
    connection_id: Uuid,
    manager: Arc<ConnectionManager>,
    mut outbound: mpsc::UnboundedReceiver<ConnectionCommand>,
) {
    loop {
        tokio::select! {
            maybe_cmd = outbound.recv() => {
                let Some(cmd) = maybe_cmd else { break; };
                match cmd {
                    ConnectionCommand::Send(msg) => {
                        let payload = serde_json::to_string(&msg).unwrap_or_else(|_| "{}".to_string());
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    ConnectionCommand::Close { code, reason } => {
                        let frame = axum::extract::ws::CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        let _ = socket.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "pong" {
                            manager.touch_heartbeat(connection_id);
                        } else if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                            if json.get("type").and_then(|t| t.as_str()) == Some("pong") {
                                manager.touch_heartbeat(connection_id);
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => manager.touch_heartbeat(connection_id),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    manager.remove(connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_to_assessment_skips_other_assessments() {
        let manager = ConnectionManager::new();
        let a = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut rx_a = manager.register(Uuid::new_v4(), Uuid::new_v4(), Some(a));
        let mut rx_other = manager.register(Uuid::new_v4(), Uuid::new_v4(), Some(other));

        manager.broadcast_to_assessment(
            a,
            OutboundMessage::AssessmentUpdate {
                assessment_id: a,
                status: Some(AssessmentStatus::Active),
            },
        );

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn sweep_heartbeats_flags_only_timed_out_connections() {
        let manager = ConnectionManager::new();
        let fresh = Uuid::new_v4();
        let _rx = manager.register(fresh, Uuid::new_v4(), None);

        let timed_out = manager.sweep_heartbeats(Duration::from_secs(45));
        assert!(timed_out.is_empty());

        let timed_out = manager.sweep_heartbeats(Duration::from_millis(0));
        assert_eq!(timed_out, vec![fresh]);
    }

    #[test]
    fn remove_drops_connection_from_registry() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let _rx = manager.register(id, Uuid::new_v4(), None);
        assert_eq!(manager.connection_count(), 1);
        manager.remove(id);
        assert_eq!(manager.connection_count(), 0);
    }
}
