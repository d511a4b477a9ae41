//! Idempotent pipeline starts.
//!
//! The intake gateway fires conversations at the dispatcher without
//! waiting for them. Starting is keyed by `request_id`: a second start
//! with an id that was ever seen is a no-op, so webhook redeliveries and
//! double-taps cannot produce a second outbound send sequence. Per-request
//! status is tracked for the operator endpoints only - control flow never
//! reads it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryOutcome;
use crate::models::ConversationRequest;
use crate::pipeline::Orchestrator;

/// Observable lifecycle of one dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Done,
    Failed,
}

/// Fire-and-forget front door to the orchestrator.
#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    /// Ids stay here for the process lifetime: startable once per id,
    /// not once per in-flight window.
    statuses: Arc<Mutex<HashMap<String, RunStatus>>>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start the pipeline for `request` in the background.
    ///
    /// Returns false (and starts nothing) when the request_id was already
    /// seen.
    pub fn dispatch(&self, request: ConversationRequest) -> bool {
        let request_id = request.request_id.clone();
        {
            let mut statuses = match self.statuses.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if statuses.contains_key(&request_id) {
                tracing::info!(request_id = %request_id, "duplicate start ignored");
                return false;
            }
            statuses.insert(request_id.clone(), RunStatus::Running);
        }

        let orchestrator = self.orchestrator.clone();
        let statuses = self.statuses.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.run(request).await;
            let status = match outcome {
                DeliveryOutcome::Done { .. } => RunStatus::Done,
                DeliveryOutcome::Failed { .. } => RunStatus::Failed,
            };
            let mut statuses = match statuses.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            statuses.insert(request_id, status);
        });
        true
    }

    pub fn status(&self, request_id: &str) -> Option<RunStatus> {
        match self.statuses.lock() {
            Ok(guard) => guard.get(request_id).copied(),
            Err(poisoned) => poisoned.into_inner().get(request_id).copied(),
        }
    }
}
