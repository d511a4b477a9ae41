//! Quality validation agent.
//!
//! Builds the scorecard for a request and judges a formatted answer
//! against it. Criteria are batched into a single judgment call, but every
//! criterion must come back with an explicit pass/fail - a verdict the
//! model skipped is malformed output, not a pass.

use std::sync::Arc;

use serde::Deserialize;

use crate::agents::{parse_llm_json, PromptSet};
use crate::error::AgentError;
use crate::llm::CompletionClient;
use crate::models::{
    ConversationRequest, FormattedResponse, Scorecard, ScorecardCriterion, ValidationResult,
};

#[derive(Debug, Deserialize)]
struct CriterionReply {
    id: String,
    description: String,
    expected_behavior: String,
}

#[derive(Debug, Deserialize)]
struct ScorecardReply {
    criteria: Vec<CriterionReply>,
}

#[derive(Debug, Deserialize)]
struct VerdictReply {
    criterion_id: String,
    passed: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct JudgmentReply {
    verdicts: Vec<VerdictReply>,
}

pub struct QualityValidationAgent {
    client: Arc<dyn CompletionClient>,
    prompts: PromptSet,
}

impl QualityValidationAgent {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: PromptSet) -> Self {
        Self { client, prompts }
    }

    /// Derive the pass/fail criteria for this request. The scorecard
    /// invariants (at least one criterion, non-vacuous descriptions) are
    /// enforced on construction; a model reply that violates them is
    /// retryable malformed output.
    pub async fn build_scorecard(
        &self,
        request: &ConversationRequest,
    ) -> Result<Scorecard, AgentError> {
        let prompt = format!(
            "{}\n\nChannel: {}\n\nUser message:\n{}",
            self.prompts.get("scorecard"),
            request.channel.as_str(),
            request.message_text,
        );

        let reply: ScorecardReply = parse_llm_json(&self.client.complete(&prompt).await?)?;
        let criteria = reply
            .criteria
            .into_iter()
            .map(|c| ScorecardCriterion {
                id: c.id,
                description: c.description,
                expected_behavior: c.expected_behavior,
            })
            .collect();

        Scorecard::new(criteria).map_err(|e| AgentError::MalformedOutput(e.to_string()))
    }

    /// Judge the formatted answer against every criterion of the scorecard.
    pub async fn validate(
        &self,
        request: &ConversationRequest,
        response: &FormattedResponse,
        scorecard: &Scorecard,
    ) -> Result<ValidationResult, AgentError> {
        let criteria_section = scorecard
            .criteria()
            .iter()
            .map(|c| format!("- {}: {} Expected: {}", c.id, c.description, c.expected_behavior))
            .collect::<Vec<_>>()
            .join("\n");

        let delivery_note = if response.is_split {
            format!(" (will be delivered as {} parts)", response.parts.len())
        } else {
            String::new()
        };

        let prompt = format!(
            "{}\n\nUser message:\n{}\n\nCandidate reply{}:\n{}\n\nCriteria:\n{}",
            self.prompts.get("judge"),
            request.message_text,
            delivery_note,
            response.content,
            criteria_section,
        );

        let reply: JudgmentReply = parse_llm_json(&self.client.complete(&prompt).await?)?;

        let mut failed_criteria = Vec::new();
        let mut reasons = Vec::new();
        for criterion in scorecard.criteria() {
            let verdict = reply
                .verdicts
                .iter()
                .find(|v| v.criterion_id == criterion.id)
                .ok_or_else(|| {
                    AgentError::MalformedOutput(format!(
                        "no verdict for criterion '{}'",
                        criterion.id
                    ))
                })?;
            if !verdict.passed {
                failed_criteria.push(criterion.id.clone());
                if verdict.reason.trim().is_empty() {
                    reasons.push(format!("{}: {}", criterion.id, criterion.description));
                } else {
                    reasons.push(format!("{}: {}", criterion.id, verdict.reason));
                }
            }
        }

        Ok(ValidationResult {
            passed: failed_criteria.is_empty(),
            failed_criteria,
            feedback: reasons.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;
    use crate::test_support::{request_on, ScriptedCompletionClient};
    use serde_json::json;

    fn formatted(content: &str) -> FormattedResponse {
        FormattedResponse {
            content: content.to_string(),
            is_split: false,
            parts: Vec::new(),
            channel: Channel::Sms,
        }
    }

    fn scorecard() -> Scorecard {
        Scorecard::new(vec![
            ScorecardCriterion {
                id: "answers_question".into(),
                description: "The reply answers the question that was asked.".into(),
                expected_behavior: "States the requested hours.".into(),
            },
            ScorecardCriterion {
                id: "no_jargon".into(),
                description: "The reply contains no internal jargon or codes.".into(),
                expected_behavior: "Plain language only.".into(),
            },
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_scorecard() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "criteria": [{
                "id": "answers_question",
                "description": "The reply answers the question that was asked.",
                "expected_behavior": "States the requested hours."
            }]
        })
        .to_string())]);
        let agent = QualityValidationAgent::new(client, PromptSet::default());
        let scorecard = agent
            .build_scorecard(&request_on(Channel::Sms, "Check my timesheet"))
            .await
            .unwrap();
        assert_eq!(scorecard.criteria().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_scorecard_is_malformed() {
        let client =
            ScriptedCompletionClient::replies(vec![Ok(json!({"criteria": []}).to_string())]);
        let agent = QualityValidationAgent::new(client, PromptSet::default());
        let err = agent
            .build_scorecard(&request_on(Channel::Sms, "Check my timesheet"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn test_validate_passes_when_all_criteria_pass() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "verdicts": [
                {"criterion_id": "answers_question", "passed": true, "reason": ""},
                {"criterion_id": "no_jargon", "passed": true, "reason": ""}
            ]
        })
        .to_string())]);
        let agent = QualityValidationAgent::new(client, PromptSet::default());
        let result = agent
            .validate(
                &request_on(Channel::Sms, "Check my timesheet"),
                &formatted("38.5 hours last week."),
                &scorecard(),
            )
            .await
            .unwrap();
        assert!(result.passed);
        assert!(result.failed_criteria.is_empty());
    }

    #[tokio::test]
    async fn test_validate_collects_failures_and_feedback() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "verdicts": [
                {"criterion_id": "answers_question", "passed": false, "reason": "Reports the month, not the week asked about."},
                {"criterion_id": "no_jargon", "passed": true, "reason": ""}
            ]
        })
        .to_string())]);
        let agent = QualityValidationAgent::new(client, PromptSet::default());
        let result = agent
            .validate(
                &request_on(Channel::Sms, "Check my timesheet for last week"),
                &formatted("You worked 160 hours in July."),
                &scorecard(),
            )
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.failed_criteria, vec!["answers_question"]);
        assert!(result.feedback.contains("not the week"));
    }

    #[tokio::test]
    async fn test_missing_verdict_is_malformed() {
        let client = ScriptedCompletionClient::replies(vec![Ok(json!({
            "verdicts": [
                {"criterion_id": "answers_question", "passed": true, "reason": ""}
            ]
        })
        .to_string())]);
        let agent = QualityValidationAgent::new(client, PromptSet::default());
        let err = agent
            .validate(
                &request_on(Channel::Sms, "Check my timesheet"),
                &formatted("38.5 hours."),
                &scorecard(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }
}
