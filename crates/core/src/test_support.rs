//! Scripted fakes shared by the unit and scenario tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::audit::{AuditSink, InteractionLogEntry};
use crate::delivery::{ChannelSender, SendReceipt};
use crate::error::{AgentError, DeliveryError};
use crate::llm::CompletionClient;
use crate::models::{Channel, ConversationRequest};
use crate::registry::TimesheetClient;

/// A request fixture with a fixed timestamp so prompts are reproducible.
pub(crate) fn request_on(channel: Channel, message: &str) -> ConversationRequest {
    let mut user_context = HashMap::new();
    user_context.insert("name".to_string(), "Jordan".to_string());
    user_context.insert("timezone".to_string(), "America/Chicago".to_string());
    user_context.insert("credentials_ref".to_string(), "cred-jordan".to_string());
    ConversationRequest {
        request_id: "req-1".to_string(),
        channel,
        sender_id: "+15550100".to_string(),
        message_text: message.to_string(),
        received_at: Utc.with_ymd_and_hms(2026, 8, 3, 14, 30, 0).unwrap(),
        user_context,
    }
}

/// Completion client that pops scripted replies in order and records every
/// prompt it was given. Panics when called more times than scripted.
pub(crate) struct ScriptedCompletionClient {
    replies: Mutex<VecDeque<Result<String, AgentError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletionClient {
    pub(crate) fn replies(replies: Vec<Result<String, AgentError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected model call beyond the scripted replies")
    }
}

/// Timesheet client returning scripted results per call, in order.
pub(crate) struct ScriptedTimesheetClient {
    results: Mutex<VecDeque<Result<serde_json::Value, AgentError>>>,
    pub(crate) invocations: Mutex<Vec<(String, serde_json::Value, String)>>,
}

impl ScriptedTimesheetClient {
    pub(crate) fn results(results: Vec<Result<serde_json::Value, AgentError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            invocations: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TimesheetClient for ScriptedTimesheetClient {
    async fn invoke(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
        credentials_ref: &str,
    ) -> Result<serde_json::Value, AgentError> {
        self.invocations.lock().unwrap().push((
            tool_name.to_string(),
            parameters.clone(),
            credentials_ref.to_string(),
        ));
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected tool invocation beyond the scripted results")
    }
}

/// Channel sender that records sends; optionally fails the first N calls.
pub(crate) struct RecordingSender {
    pub(crate) sent: Mutex<Vec<(Channel, String, String)>>,
    fail_first: Mutex<u32>,
}

impl RecordingSender {
    pub(crate) fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    pub(crate) fn failing_first(n: u32) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_first: Mutex::new(n),
        })
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(
        &self,
        channel: Channel,
        sender_id: &str,
        content: &str,
    ) -> Result<SendReceipt, DeliveryError> {
        {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeliveryError::Transient("provider hiccup".into()));
            }
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((channel, sender_id.to_string(), content.to_string()));
        Ok(SendReceipt {
            delivered: true,
            provider_ref: format!("msg-{}", sent.len()),
        })
    }
}

/// Fully wired orchestrator over scripted fakes, shared by the scenario
/// and dispatch tests.
pub(crate) struct PipelineHarness {
    pub(crate) orchestrator: Arc<crate::pipeline::Orchestrator>,
    pub(crate) client: Arc<ScriptedCompletionClient>,
    pub(crate) sender: Arc<RecordingSender>,
    pub(crate) audit: Arc<MemoryAudit>,
}

pub(crate) fn pipeline_harness(
    replies: Vec<Result<String, AgentError>>,
    tool_results: Vec<Result<serde_json::Value, AgentError>>,
) -> PipelineHarness {
    use crate::agents::{
        DataRetrievalAgent, FormattingAgent, PlannerAgent, PromptSet, QualityValidationAgent,
    };
    use crate::config::{ChannelRules, PipelineConfig};
    use crate::delivery::DeliveryUnit;
    use crate::pipeline::Orchestrator;
    use crate::registry::CapabilityRegistry;
    use crate::runtime::RetryPolicy;

    let fast = |max_attempts: u32| RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        timeout_ms: 500,
    };
    let config = PipelineConfig {
        model_policy: fast(2),
        retrieval_policy: fast(2),
        delivery_policy: fast(3),
        ..PipelineConfig::default()
    };

    let client = ScriptedCompletionClient::replies(replies);
    let sender = RecordingSender::new();
    let audit = MemoryAudit::new();
    let prompts = PromptSet::default();

    let planner = PlannerAgent::new(
        client.clone(),
        prompts.clone(),
        config.apology_template.clone(),
    );
    let retrieval = DataRetrievalAgent::new(
        client.clone(),
        Arc::new(CapabilityRegistry::standard()),
        ScriptedTimesheetClient::results(tool_results),
        prompts.clone(),
    );
    let formatter = FormattingAgent::new(client.clone(), prompts.clone(), ChannelRules::default());
    let validator = QualityValidationAgent::new(client.clone(), prompts);
    let delivery = DeliveryUnit::new(sender.clone(), config.delivery_policy.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        planner,
        retrieval,
        formatter,
        validator,
        delivery,
        audit.clone(),
    ));

    PipelineHarness {
        orchestrator,
        client,
        sender,
        audit,
    }
}

/// Vector-backed audit sink for asserting on transition history.
#[derive(Default)]
pub(crate) struct MemoryAudit {
    entries: Mutex<Vec<InteractionLogEntry>>,
}

impl MemoryAudit {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn agent_names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.agent_name.clone())
            .collect()
    }
}

impl AuditSink for MemoryAudit {
    fn append(&self, entry: InteractionLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
