//! Offline stand-ins for the external channel and timesheet providers.
//!
//! The real SMS gateway, chat API, mail relay, and timesheet backend are
//! deployment concerns wired in by configuration. These stubs let the
//! binary run end-to-end without live providers: sends are logged, lookups
//! answer with canned data.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tally_core::delivery::{ChannelSender, SendReceipt};
use tally_core::error::{AgentError, DeliveryError, ToolErrorKind};
use tally_core::models::Channel;
use tally_core::registry::TimesheetClient;

/// Channel sender that logs outbound messages instead of sending them.
pub struct LoggingChannelSender {
    counter: AtomicU64,
}

impl LoggingChannelSender {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ChannelSender for LoggingChannelSender {
    async fn send(
        &self,
        channel: Channel,
        sender_id: &str,
        content: &str,
    ) -> Result<SendReceipt, DeliveryError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            channel = channel.as_str(),
            to = sender_id,
            chars = content.chars().count(),
            "outbound message:\n{}",
            content
        );
        Ok(SendReceipt {
            delivered: true,
            provider_ref: format!("log-{n}"),
        })
    }
}

/// Timesheet backend answering every tool with plausible canned data.
pub struct StubTimesheetClient;

impl StubTimesheetClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimesheetClient for StubTimesheetClient {
    async fn invoke(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
        _credentials_ref: &str,
    ) -> Result<serde_json::Value, AgentError> {
        let str_param = |key: &str| {
            parameters
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };

        match tool_name {
            "get_timesheet_entries" => Ok(json!({
                "entries": [
                    {"date": str_param("start_date"), "project_code": "OPS", "hours": 7.5, "note": "standup + support rotation"},
                    {"date": str_param("end_date"), "project_code": "OPS", "hours": 8.0, "note": null}
                ]
            })),
            "get_timesheet_summary" => Ok(json!({
                "period_start": str_param("start_date"),
                "period_end": str_param("end_date"),
                "total_hours": 38.5,
                "days_worked": 5
            })),
            "log_time_entry" => Ok(json!({
                "entry_id": format!("entry-{}", str_param("date")),
                "recorded": true
            })),
            "submit_timesheet" => Ok(json!({
                "submission_id": format!("sub-{}", str_param("period_start")),
                "status": "pending_approval"
            })),
            other => Err(AgentError::Tool {
                kind: ToolErrorKind::ToolNotFound,
                message: format!("stub backend has no tool '{other}'"),
            }),
        }
    }
}
