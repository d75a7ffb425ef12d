//! Fan-out service (spec.md §4.11/§4.12): the WebSocket half of the
//! platform, run as its own binary (`fundedtrader-fanout`) so it can scale
//! independently of the core HTTP/saga service and still watch the same
//! event bus and Redis-resident ring membership.

pub mod connection;
pub mod membership;
pub mod router;
pub mod ring;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::SessionManager;

use self::connection::{close_code, run_connection, ConnectionManager, OutboundMessage};
use self::ring::ConsistentHashRing;

#[derive(Clone)]
pub struct FanoutState {
    pub connections: Arc<ConnectionManager>,
    pub ring: Arc<ConsistentHashRing>,
    pub sessions: Arc<SessionManager>,
    pub node_id: String,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
    #[serde(rename = "assessmentId")]
    assessment_id: Option<Uuid>,
}

/// `GET /ws?token=...&assessmentId=...` (spec.md §6).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<FanoutState>,
) -> Response {
    ws.on_upgrade(move |socket| accept(socket, query, state))
}

async fn accept(mut socket: WebSocket, query: WsQuery, state: FanoutState) {
    let user_id = match state.sessions.authenticate(&query.token).await {
        Ok(Some(user_id)) => user_id,
        _ => {
            close_with(
                &mut socket,
                close_code::AUTH_OR_REDIRECT,
                "invalid or expired session",
            )
            .await;
            return;
        }
    };

    if let Some(assessment_id) = query.assessment_id {
        if !state.ring.owns(&state.node_id, &assessment_id.to_string()) {
            let owner = state.ring.node_for(&assessment_id.to_string());
            let hint = serde_json::json!({ "type": "redirect", "node": owner });
            let _ = socket
                .send(axum::extract::ws::Message::Text(hint.to_string()))
                .await;
            close_with(&mut socket, close_code::AUTH_OR_REDIRECT, "wrong node").await;
            return;
        }
    }

    let connection_id = Uuid::new_v4();
    let outbound = state
        .connections
        .register(connection_id, user_id, query.assessment_id);

    let greeting = OutboundMessage::Connected {
        connection_id,
        user_id,
    };
    if let Ok(payload) = serde_json::to_string(&greeting) {
        if socket
            .send(axum::extract::ws::Message::Text(payload))
            .await
            .is_err()
        {
            state.connections.remove(connection_id);
            return;
        }
    }

    run_connection(socket, connection_id, state.connections.clone(), outbound).await;
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    use axum::extract::ws::{CloseFrame, Message};
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// Spawns the heartbeat sweep (spec.md §4.11): every `heartbeat_interval`,
/// ping live connections and close the ones that went quiet.
pub fn spawn_heartbeat(connections: Arc<ConnectionManager>, interval: Duration, timeout: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let timed_out = connections.sweep_heartbeats(timeout);
            if !timed_out.is_empty() {
                tracing::info!(count = timed_out.len(), "dropped connections on heartbeat timeout");
            }
        }
    });
}
