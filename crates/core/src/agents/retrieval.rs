//! Data retrieval agent.
//!
//! Turns a natural-language data request into one validated tool
//! invocation. The model performs the date/intent resolution - the set of
//! phrasings users produce is unbounded, so selection is a reasoning step -
//! but everything around it stays deterministic: the chosen name must exist
//! in the registry and the parameters must satisfy the declared input
//! schema before the backend is touched. The raw result is returned
//! unmodified; interpretation belongs to the planner.

use std::sync::Arc;

use serde::Deserialize;

use crate::agents::{parse_llm_json, PromptSet};
use crate::error::AgentError;
use crate::llm::CompletionClient;
use crate::registry::{CapabilityRegistry, TimesheetClient};

#[derive(Debug, Deserialize)]
struct ToolChoiceReply {
    tool_name: String,
    parameters: serde_json::Value,
}

pub struct DataRetrievalAgent {
    client: Arc<dyn CompletionClient>,
    registry: Arc<CapabilityRegistry>,
    timesheet: Arc<dyn TimesheetClient>,
    prompts: PromptSet,
}

impl DataRetrievalAgent {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: Arc<CapabilityRegistry>,
        timesheet: Arc<dyn TimesheetClient>,
        prompts: PromptSet,
    ) -> Self {
        Self {
            client,
            registry,
            timesheet,
            prompts,
        }
    }

    /// Select a tool, validate the selection, invoke it.
    pub async fn execute(
        &self,
        data_request: &str,
        credentials_ref: &str,
    ) -> Result<serde_json::Value, AgentError> {
        let prompt = format!(
            "{}\n\n## Available tools\n\n{}\n## Data request\n\n{}",
            self.prompts.get("tool_selection"),
            self.registry.catalogue_text(),
            data_request,
        );

        let raw = self.client.complete(&prompt).await?;
        let choice: ToolChoiceReply = parse_llm_json(&raw)?;

        self.registry
            .validate_invocation(&choice.tool_name, &choice.parameters)?;

        tracing::debug!(tool = %choice.tool_name, "invoking timesheet tool");
        self.timesheet
            .invoke(&choice.tool_name, &choice.parameters, credentials_ref)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::test_support::{ScriptedCompletionClient, ScriptedTimesheetClient};
    use serde_json::json;

    fn agent(
        client: Arc<ScriptedCompletionClient>,
        timesheet: Arc<ScriptedTimesheetClient>,
    ) -> DataRetrievalAgent {
        DataRetrievalAgent::new(
            client,
            Arc::new(CapabilityRegistry::standard()),
            timesheet,
            PromptSet::default(),
        )
    }

    #[tokio::test]
    async fn test_selects_validates_and_invokes() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "tool_name": "get_timesheet_summary",
            "parameters": {"start_date": "2026-07-27", "end_date": "2026-08-02"}
        })
        .to_string())]);
        let timesheet = ScriptedTimesheetClient::results(vec![Ok(
            json!({"total_hours": 38.5, "days_worked": 5, "period_start": "2026-07-27", "period_end": "2026-08-02"}),
        )]);

        let data = agent(client.clone(), timesheet.clone())
            .execute("Total hours for 2026-07-27 through 2026-08-02", "cred-jordan")
            .await
            .unwrap();

        assert_eq!(data["total_hours"], json!(38.5));
        let invocations = timesheet.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].0, "get_timesheet_summary");
        assert_eq!(invocations[0].2, "cred-jordan");
        assert!(client.prompts()[0].contains("get_timesheet_summary"));
    }

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_backend() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "tool_name": "get_payroll",
            "parameters": {}
        })
        .to_string())]);
        let timesheet = ScriptedTimesheetClient::results(vec![]);

        let err = agent(client, timesheet.clone())
            .execute("Payroll for July", "cred-jordan")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AgentError::Tool {
                kind: ToolErrorKind::ToolNotFound,
                ..
            }
        ));
        assert!(timesheet.invocations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_reach_backend() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "tool_name": "get_timesheet_entries",
            "parameters": {"start_date": "last week", "end_date": "2026-08-02"}
        })
        .to_string())]);
        let timesheet = ScriptedTimesheetClient::results(vec![]);

        let err = agent(client, timesheet.clone())
            .execute("Entries for last week", "cred-jordan")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AgentError::Tool {
                kind: ToolErrorKind::InvalidParameters,
                ..
            }
        ));
        assert!(timesheet.invocations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates_typed() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "tool_name": "get_timesheet_summary",
            "parameters": {"start_date": "2026-07-27", "end_date": "2026-08-02"}
        })
        .to_string())]);
        let timesheet = ScriptedTimesheetClient::results(vec![Err(AgentError::Tool {
            kind: ToolErrorKind::UpstreamTimeout,
            message: "backend took too long".into(),
        })]);

        let err = agent(client, timesheet)
            .execute("Summary for last week", "cred-jordan")
            .await
            .unwrap_err();

        assert_eq!(err.tool_kind(), ToolErrorKind::UpstreamTimeout);
    }
}
