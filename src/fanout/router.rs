//! Event-bus message router (spec.md §4.11): subscribes to the topics the
//! fan-out service cares about and translates each into the outbound
//! WebSocket frame(s) it maps to, dropping assessment-scoped messages this
//! node doesn't own.

use std::sync::Arc;

use crate::events::consumer::EventSubscriber;
use crate::events::topics::{topic, Payload};

use super::connection::{ConnectionManager, OutboundMessage};
use super::ring::ConsistentHashRing;

const SUBSCRIBED_TOPICS: &[&str] = &[
    topic::MARKET_DATA_CRYPTO_TICKS,
    topic::MARKET_DATA_PREDICTION_TICKS,
    topic::ORDER_FILLED,
    topic::POSITION_OPENED,
    topic::POSITION_CLOSED,
    topic::ASSESSMENT_BALANCE_UPDATED,
    topic::ASSESSMENT_PNL_UPDATED,
    topic::ASSESSMENT_CREATED,
    topic::ASSESSMENT_STARTED,
    topic::ASSESSMENT_COMPLETED,
    topic::RULES_VIOLATION_DETECTED,
    topic::RULES_DRAWDOWN_CHECKED,
];

pub struct MessageRouter {
    connections: Arc<ConnectionManager>,
    ring: Arc<ConsistentHashRing>,
    node_id: String,
}

impl MessageRouter {
    pub fn new(connections: Arc<ConnectionManager>, ring: Arc<ConsistentHashRing>, node_id: String) -> Self {
        Self {
            connections,
            ring,
            node_id,
        }
    }

    /// Subscribes to the event bus and drives the router loop until the
    /// subscription's channel closes (subscriber task died or shutdown).
    pub async fn run(self, subscriber: Arc<dyn EventSubscriber>) -> anyhow::Result<()> {
        let mut rx = subscriber.subscribe(SUBSCRIBED_TOPICS.to_vec()).await?;
        while let Some(envelope) = rx.recv().await {
            self.dispatch(envelope.payload);
        }
        Ok(())
    }

    fn owns(&self, assessment_id: uuid::Uuid) -> bool {
        self.ring.owns(&self.node_id, &assessment_id.to_string())
    }

    fn dispatch(&self, payload: Payload) {
        match payload {
            Payload::MarketDataCryptoTick { market, price } => {
                self.connections.broadcast_all(OutboundMessage::MarketPrice {
                    market,
                    price: serde_json::json!(price),
                });
            }
            Payload::MarketDataPredictionTick { market, yes, no } => {
                self.connections.broadcast_all(OutboundMessage::MarketPrice {
                    market,
                    price: serde_json::json!({ "yes": yes, "no": no }),
                });
            }

            Payload::OrderFilled {
                assessment_id,
                balance,
                ..
            } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::PnlUpdate {
                        assessment_id,
                        realized_pnl: rust_decimal::Decimal::ZERO,
                        unrealized_pnl: rust_decimal::Decimal::ZERO,
                        balance: Some(balance),
                    },
                );
            }

            Payload::PositionOpened {
                assessment_id,
                position_id,
                ..
            } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::PositionUpdate {
                        assessment_id,
                        position_id,
                        status: "open".to_string(),
                        realized_pnl: None,
                    },
                );
            }
            Payload::PositionClosed {
                assessment_id,
                position_id,
                realized_pnl,
                ..
            } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::PositionUpdate {
                        assessment_id,
                        position_id,
                        status: "closed".to_string(),
                        realized_pnl: Some(realized_pnl),
                    },
                );
            }

            Payload::AssessmentBalanceUpdated { assessment_id, .. } => {
                if !self.owns(assessment_id) {
                    return;
                }
                // Balance-only updates still surface as a pnl_update frame
                // per spec.md §4.11's mapping table; pnl fields are left at
                // zero since this event carries no pnl breakdown.
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::PnlUpdate {
                        assessment_id,
                        realized_pnl: rust_decimal::Decimal::ZERO,
                        unrealized_pnl: rust_decimal::Decimal::ZERO,
                        balance: None,
                    },
                );
            }
            Payload::AssessmentPnlUpdated {
                assessment_id,
                realized_pnl,
                unrealized_pnl,
            } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::PnlUpdate {
                        assessment_id,
                        realized_pnl,
                        unrealized_pnl,
                        balance: None,
                    },
                );
            }

            Payload::AssessmentCreated { assessment_id, .. } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::AssessmentUpdate {
                        assessment_id,
                        status: None,
                    },
                );
            }
            Payload::AssessmentStarted { assessment_id } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::AssessmentUpdate {
                        assessment_id,
                        status: None,
                    },
                );
            }
            Payload::AssessmentCompleted {
                assessment_id,
                status,
            } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::AssessmentUpdate {
                        assessment_id,
                        status: Some(status),
                    },
                );
            }

            Payload::RulesViolationDetected {
                assessment_id,
                rule,
                value,
                threshold,
            } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::Violation {
                        assessment_id,
                        rule,
                        value,
                        threshold,
                    },
                );
            }
            Payload::RulesDrawdownChecked {
                assessment_id,
                value,
                threshold,
                status,
            } => {
                if !self.owns(assessment_id) {
                    return;
                }
                self.connections.broadcast_to_assessment(
                    assessment_id,
                    OutboundMessage::RuleStatusMessage {
                        assessment_id,
                        value,
                        threshold,
                        status,
                    },
                );
            }

            // Everything else on the bus is irrelevant to the fan-out
            // service's outbound frame set; log-and-drop per Design Notes §9.
            other => tracing::trace!(?other, "fan-out router ignoring unrouted topic"),
        }
    }
}
