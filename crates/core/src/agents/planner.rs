//! Planner agent.
//!
//! Owns everything that decides *what* to say: routing analysis, answer
//! composition, refinement after a failed review, and the graceful-failure
//! apology. The planner never formats for a channel and never talks to the
//! timesheet backend - when it needs data it writes a natural-language
//! request for the retrieval agent instead.

use std::sync::Arc;

use serde::Deserialize;

use crate::agents::{parse_llm_json, PromptSet};
use crate::error::AgentError;
use crate::llm::CompletionClient;
use crate::models::{AnswerSource, ComposedAnswer, ConversationRequest, DataOutcome, RoutingDecision};

#[derive(Debug, Deserialize)]
struct RoutingReply {
    needs_data: bool,
    #[serde(default)]
    data_request: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerReply {
    answer: String,
}

pub struct PlannerAgent {
    client: Arc<dyn CompletionClient>,
    prompts: PromptSet,
    /// Used verbatim when even the apology model call fails.
    fallback_apology: String,
}

impl PlannerAgent {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        prompts: PromptSet,
        fallback_apology: String,
    ) -> Self {
        Self {
            client,
            prompts,
            fallback_apology,
        }
    }

    /// Decide whether the message needs a timesheet lookup, and draft the
    /// request for the retrieval agent when it does.
    pub async fn analyze(&self, request: &ConversationRequest) -> Result<RoutingDecision, AgentError> {
        let prompt = format!(
            "{}\n\nCurrent date: {}\nUser timezone: {}\nChannel: {}\n\nMessage from {}:\n{}",
            self.prompts.get("analyze"),
            request.received_at.date_naive(),
            request.timezone().unwrap_or("unknown"),
            request.channel.as_str(),
            request.display_name(),
            request.message_text,
        );

        let raw = self.client.complete(&prompt).await?;
        let reply: RoutingReply = parse_llm_json(&raw)?;

        let data_request = reply
            .data_request
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        if reply.needs_data && data_request.is_none() {
            return Err(AgentError::MalformedOutput(
                "needs_data set without a data_request".into(),
            ));
        }

        Ok(RoutingDecision {
            needs_data: reply.needs_data,
            data_request: if reply.needs_data { data_request } else { None },
        })
    }

    /// Compose the plain-text answer from the message and whatever the
    /// retrieval step produced. A failed lookup arrives as a marker, and
    /// the answer must acknowledge it rather than pretend.
    pub async fn compose(
        &self,
        request: &ConversationRequest,
        data: &DataOutcome,
    ) -> Result<ComposedAnswer, AgentError> {
        let data_section = match data {
            DataOutcome::NotRequested => "No lookup was needed for this message.".to_string(),
            DataOutcome::Retrieved(value) => format!(
                "Data returned by the lookup:\n{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
            DataOutcome::Unavailable(marker) => {
                format!("The lookup failed: {}.", marker.summary)
            }
        };

        let prompt = format!(
            "{}\n\nMessage from {}:\n{}\n\n{}",
            self.prompts.get("compose"),
            request.display_name(),
            request.message_text,
            data_section,
        );

        let reply: AnswerReply = parse_llm_json(&self.client.complete(&prompt).await?)?;
        Self::into_answer(reply, AnswerSource::Initial)
    }

    /// Rewrite a rejected answer using the reviewer's feedback. Refinement
    /// only rewrites - it never re-fetches data, which this agent cannot
    /// do by construction.
    pub async fn refine(
        &self,
        previous: &ComposedAnswer,
        feedback: &str,
    ) -> Result<ComposedAnswer, AgentError> {
        let prompt = format!(
            "{}\n\nDraft reply:\n{}\n\nReviewer objections:\n{}",
            self.prompts.get("refine"),
            previous.text,
            feedback,
        );

        let reply: AnswerReply = parse_llm_json(&self.client.complete(&prompt).await?)?;
        Self::into_answer(reply, AnswerSource::Refinement)
    }

    /// Produce the safety-net apology. This call cannot fail: if the model
    /// is unreachable or answers nonsense, the static fallback goes out.
    pub async fn graceful_failure(
        &self,
        request: &ConversationRequest,
        reason: &str,
    ) -> ComposedAnswer {
        let prompt = format!(
            "{}\n\nMessage from {}:\n{}\n\nWhat went wrong (internal, do not repeat verbatim): {}",
            self.prompts.get("graceful_failure"),
            request.display_name(),
            request.message_text,
            reason,
        );

        let text = match self.client.complete(&prompt).await {
            Ok(raw) => match parse_llm_json::<AnswerReply>(&raw) {
                Ok(reply) if !reply.answer.trim().is_empty() => reply.answer,
                _ => {
                    tracing::warn!(request_id = %request.request_id, "apology call unparseable, using fallback");
                    self.fallback_apology.clone()
                }
            },
            Err(e) => {
                tracing::warn!(request_id = %request.request_id, error = %e, "apology call failed, using fallback");
                self.fallback_apology.clone()
            }
        };

        ComposedAnswer {
            text,
            source: AnswerSource::GracefulFailure,
        }
    }

    fn into_answer(reply: AnswerReply, source: AnswerSource) -> Result<ComposedAnswer, AgentError> {
        let text = reply.answer.trim().to_string();
        if text.is_empty() {
            return Err(AgentError::MalformedOutput("empty answer text".into()));
        }
        Ok(ComposedAnswer { text, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, DataUnavailable};
    use crate::test_support::{request_on, ScriptedCompletionClient};
    use crate::error::ToolErrorKind;

    fn planner(client: Arc<ScriptedCompletionClient>) -> PlannerAgent {
        PlannerAgent::new(client, PromptSet::default(), "Sorry, try again later.".into())
    }

    #[tokio::test]
    async fn test_analyze_parses_routing_decision() {
        let client = ScriptedCompletionClient::replies(vec![Ok(
            r#"{"needs_data": true, "data_request": "Entries for 2026-07-27 to 2026-08-02"}"#.into(),
        )]);
        let decision = planner(client.clone())
            .analyze(&request_on(Channel::Sms, "Check my timesheet for last week"))
            .await
            .unwrap();
        assert!(decision.needs_data);
        assert!(decision.data_request.unwrap().contains("2026-07-27"));

        let prompts = client.prompts();
        assert!(prompts[0].contains("Check my timesheet for last week"));
    }

    #[tokio::test]
    async fn test_analyze_rejects_missing_data_request() {
        let client =
            ScriptedCompletionClient::replies(vec![Ok(r#"{"needs_data": true}"#.into())]);
        let err = planner(client)
            .analyze(&request_on(Channel::Sms, "Check my timesheet"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn test_analyze_drops_request_when_no_data_needed() {
        let client = ScriptedCompletionClient::replies(vec![Ok(
            r#"{"needs_data": false, "data_request": "stale text"}"#.into(),
        )]);
        let decision = planner(client)
            .analyze(&request_on(Channel::Chat, "Hi there"))
            .await
            .unwrap();
        assert!(!decision.needs_data);
        assert!(decision.data_request.is_none());
    }

    #[tokio::test]
    async fn test_compose_feeds_unavailable_marker_to_prompt() {
        let client = ScriptedCompletionClient::replies(vec![Ok(
            r#"{"answer": "I couldn't reach your timesheet just now."}"#.into(),
        )]);
        let marker = DataUnavailable::from_kind(ToolErrorKind::UpstreamUnavailable);
        let answer = planner(client.clone())
            .compose(
                &request_on(Channel::Sms, "Check my timesheet"),
                &DataOutcome::Unavailable(marker),
            )
            .await
            .unwrap();
        assert_eq!(answer.source, AnswerSource::Initial);
        assert!(client.prompts()[0].contains("couldn't reach the timesheet system"));
    }

    #[tokio::test]
    async fn test_refine_marks_source() {
        let client = ScriptedCompletionClient::replies(vec![Ok(
            r#"{"answer": "38.5h logged last week."}"#.into(),
        )]);
        let previous = ComposedAnswer {
            text: "A very long draft".into(),
            source: AnswerSource::Initial,
        };
        let refined = planner(client.clone())
            .refine(&previous, "too long for SMS")
            .await
            .unwrap();
        assert_eq!(refined.source, AnswerSource::Refinement);
        assert!(client.prompts()[0].contains("too long for SMS"));
    }

    #[tokio::test]
    async fn test_graceful_failure_falls_back_on_error() {
        let client = ScriptedCompletionClient::replies(vec![Err(AgentError::Transient(
            "model down".into(),
        ))]);
        let answer = planner(client)
            .graceful_failure(&request_on(Channel::Sms, "Check my timesheet"), "review failed twice")
            .await;
        assert_eq!(answer.source, AnswerSource::GracefulFailure);
        assert_eq!(answer.text, "Sorry, try again later.");
    }
}
