//! Delivery unit.
//!
//! Terminal step of the pipeline: pushes the formatted response out on the
//! user's channel, one send per message part in sequence order. Runs under
//! its own retry policy - more patient than anything pipeline-internal,
//! because losing the final message is the worst user-visible outcome.
//! Terminal failure is reported, never re-raised: the original caller got
//! its acknowledgment long ago.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::models::{Channel, ConversationRequest, FormattedResponse};
use crate::runtime::{run_unit, RetryPolicy};

/// Provider acknowledgment for one outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub delivered: bool,
    pub provider_ref: String,
}

/// Outbound seam to the concrete channel clients (SMS gateway, chat API,
/// mail relay).
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        sender_id: &str,
        content: &str,
    ) -> Result<SendReceipt, DeliveryError>;
}

/// Terminal pipeline result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    Done { receipts: Vec<SendReceipt> },
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, DeliveryOutcome::Done { .. })
    }
}

/// Outcome plus the timing the audit log wants; the orchestrator itself
/// never reads the clock.
#[derive(Debug)]
pub struct DeliveryReport {
    pub outcome: DeliveryOutcome,
    pub elapsed_ms: u64,
}

pub struct DeliveryUnit {
    sender: Arc<dyn ChannelSender>,
    policy: RetryPolicy,
}

impl DeliveryUnit {
    pub fn new(sender: Arc<dyn ChannelSender>, policy: RetryPolicy) -> Self {
        Self { sender, policy }
    }

    /// Send every part in order. A part is only attempted once the one
    /// before it was accepted; exhausting retries mid-sequence fails the
    /// delivery without re-sending the parts that already went out.
    pub async fn deliver(
        &self,
        request: &ConversationRequest,
        response: &FormattedResponse,
    ) -> DeliveryReport {
        let mut receipts = Vec::new();
        let mut elapsed_ms = 0u64;

        for (index, text) in response.outgoing_texts().iter().enumerate() {
            let result = run_unit("delivery.send", &self.policy, || {
                self.sender.send(request.channel, &request.sender_id, text)
            })
            .await;

            match result {
                Ok(report) => {
                    elapsed_ms += report.elapsed_ms;
                    receipts.push(report.value);
                }
                Err(failure) => {
                    elapsed_ms += failure.elapsed_ms;
                    tracing::error!(
                        request_id = %request.request_id,
                        part = index + 1,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "outbound send exhausted retries"
                    );
                    return DeliveryReport {
                        outcome: DeliveryOutcome::Failed {
                            reason: format!(
                                "send of part {} failed after {} attempts",
                                index + 1,
                                failure.attempts
                            ),
                        },
                        elapsed_ms,
                    };
                }
            }
        }

        DeliveryReport {
            outcome: DeliveryOutcome::Done { receipts },
            elapsed_ms,
        }
    }
}
