//! # Orchestrator
//!
//! Drives one conversation from inbound message to outbound send:
//!
//! ```text
//! Planning -> [DataRetrieval] -> Composing -> Formatting -> Validating
//!     -> [Refining -> Formatting -> Validating]   (at most once)
//!     -> [GracefulFailure -> Formatting]
//!     -> Delivering -> Done | Failed
//! ```
//!
//! Every side-effecting call runs as a named unit of work with its own
//! retry budget; the control flow below only branches on unit results.
//! Retrieval failures degrade to a data-unavailable marker, validation
//! failures buy exactly one refinement, and when nothing else works a
//! graceful apology still goes out - the user always gets *some* answer.

use std::sync::Arc;

use crate::agents::{DataRetrievalAgent, FormattingAgent, PlannerAgent, QualityValidationAgent};
use crate::audit::{AuditSink, InteractionLogEntry, StepOutcome};
use crate::config::PipelineConfig;
use crate::delivery::{DeliveryOutcome, DeliveryUnit};
use crate::models::{
    AnswerSource, ComposedAnswer, ConversationRequest, DataOutcome, DataUnavailable,
    FormattedResponse, Scorecard,
};
use crate::pipeline::state::{Pipeline, PipelineState};
use crate::runtime::run_unit;

/// Orchestrates the agent pipeline for one conversation.
pub struct Orchestrator {
    config: PipelineConfig,
    planner: PlannerAgent,
    retrieval: DataRetrievalAgent,
    formatter: FormattingAgent,
    validator: QualityValidationAgent,
    delivery: DeliveryUnit,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        planner: PlannerAgent,
        retrieval: DataRetrievalAgent,
        formatter: FormattingAgent,
        validator: QualityValidationAgent,
        delivery: DeliveryUnit,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            planner,
            retrieval,
            formatter,
            validator,
            delivery,
            audit,
        }
    }

    /// Run the pipeline to completion for one request.
    ///
    /// Never returns an error: every failure path ends in either a
    /// delivered answer (possibly an apology) or a logged delivery
    /// failure. The inbound caller was acknowledged long before this
    /// returns.
    #[tracing::instrument(skip(self, request), fields(request_id = %request.request_id))]
    pub async fn run(&self, request: ConversationRequest) -> DeliveryOutcome {
        let mut fsm = Pipeline::new();

        // Planning
        let decision = match run_unit("planner.analyze", &self.config.model_policy, || {
            self.planner.analyze(&request)
        })
        .await
        {
            Ok(report) => {
                self.log(
                    &request,
                    "planner.analyze",
                    &request.message_text,
                    &format!("needs_data={}", report.value.needs_data),
                    report.elapsed_ms,
                    StepOutcome::Ok,
                );
                report.value
            }
            Err(failure) => {
                self.log(
                    &request,
                    "planner.analyze",
                    &request.message_text,
                    &failure.error.to_string(),
                    failure.elapsed_ms,
                    StepOutcome::Failed,
                );
                // The planner is unreachable, so the model almost surely
                // is too: deliver the static apology without further
                // model calls.
                return self.static_graceful(&mut fsm, &request).await;
            }
        };

        // DataRetrieval (conditional)
        let data = match &decision.data_request {
            Some(data_request) if decision.needs_data => {
                fsm.advance(PipelineState::DataRetrieval);
                match run_unit("retrieval.execute", &self.config.retrieval_policy, || {
                    self.retrieval.execute(data_request, request.credentials_ref())
                })
                .await
                {
                    Ok(report) => {
                        self.log(
                            &request,
                            "retrieval.execute",
                            data_request,
                            "data retrieved",
                            report.elapsed_ms,
                            StepOutcome::Ok,
                        );
                        DataOutcome::Retrieved(report.value)
                    }
                    Err(failure) => {
                        let marker = DataUnavailable::from_kind(failure.error.tool_kind());
                        self.log(
                            &request,
                            "retrieval.execute",
                            data_request,
                            &marker.summary,
                            failure.elapsed_ms,
                            StepOutcome::Degraded,
                        );
                        DataOutcome::Unavailable(marker)
                    }
                }
            }
            _ => DataOutcome::NotRequested,
        };

        // Composing
        fsm.advance(PipelineState::Composing);
        let mut answer = match run_unit("planner.compose", &self.config.model_policy, || {
            self.planner.compose(&request, &data)
        })
        .await
        {
            Ok(report) => {
                self.log(
                    &request,
                    "planner.compose",
                    &request.message_text,
                    &report.value.text,
                    report.elapsed_ms,
                    StepOutcome::Ok,
                );
                report.value
            }
            Err(failure) => {
                self.log(
                    &request,
                    "planner.compose",
                    &request.message_text,
                    &failure.error.to_string(),
                    failure.elapsed_ms,
                    StepOutcome::Failed,
                );
                fsm.advance(PipelineState::GracefulFailure);
                return self
                    .graceful_tail(&mut fsm, &request, "the answer could not be written")
                    .await;
            }
        };

        // Formatting -> Validating, re-entered once after a refinement.
        let mut scorecard: Option<Scorecard> = None;
        loop {
            fsm.advance(PipelineState::Formatting);
            let formatted = match run_unit("formatter.format", &self.config.model_policy, || {
                self.formatter.format(&answer, request.channel)
            })
            .await
            {
                Ok(report) => {
                    self.log(
                        &request,
                        "formatter.format",
                        &answer.text,
                        &format!(
                            "{} chars, {} parts",
                            report.value.content.chars().count(),
                            report.value.parts.len()
                        ),
                        report.elapsed_ms,
                        StepOutcome::Ok,
                    );
                    report.value
                }
                Err(failure) => {
                    self.log(
                        &request,
                        "formatter.format",
                        &answer.text,
                        &failure.error.to_string(),
                        failure.elapsed_ms,
                        StepOutcome::Failed,
                    );
                    fsm.advance(PipelineState::GracefulFailure);
                    return self
                        .graceful_tail(&mut fsm, &request, "the reply could not be prepared")
                        .await;
                }
            };

            fsm.advance(PipelineState::Validating);

            // The scorecard is built once and reused unchanged for the
            // refinement round.
            if scorecard.is_none() {
                match run_unit("validator.build_scorecard", &self.config.model_policy, || {
                    self.validator.build_scorecard(&request)
                })
                .await
                {
                    Ok(report) => {
                        self.log(
                            &request,
                            "validator.build_scorecard",
                            &request.message_text,
                            &format!("{} criteria", report.value.criteria().len()),
                            report.elapsed_ms,
                            StepOutcome::Ok,
                        );
                        scorecard = Some(report.value);
                    }
                    Err(failure) => {
                        self.log(
                            &request,
                            "validator.build_scorecard",
                            &request.message_text,
                            &failure.error.to_string(),
                            failure.elapsed_ms,
                            StepOutcome::Failed,
                        );
                        fsm.advance(PipelineState::GracefulFailure);
                        return self
                            .graceful_tail(&mut fsm, &request, "the reply could not be checked")
                            .await;
                    }
                }
            }
            let Some(card) = scorecard.as_ref() else {
                fsm.advance(PipelineState::GracefulFailure);
                return self
                    .graceful_tail(&mut fsm, &request, "the reply could not be checked")
                    .await;
            };

            let verdict = match run_unit("validator.validate", &self.config.model_policy, || {
                self.validator.validate(&request, &formatted, card)
            })
            .await
            {
                Ok(report) => {
                    let outcome_text = if report.value.passed {
                        "passed".to_string()
                    } else {
                        format!("failed: {:?}", report.value.failed_criteria)
                    };
                    self.log(
                        &request,
                        "validator.validate",
                        &formatted.content,
                        &outcome_text,
                        report.elapsed_ms,
                        StepOutcome::Ok,
                    );
                    report.value
                }
                Err(failure) => {
                    self.log(
                        &request,
                        "validator.validate",
                        &formatted.content,
                        &failure.error.to_string(),
                        failure.elapsed_ms,
                        StepOutcome::Failed,
                    );
                    // An uncertified answer is not delivered.
                    fsm.advance(PipelineState::GracefulFailure);
                    return self
                        .graceful_tail(&mut fsm, &request, "the reply could not be checked")
                        .await;
                }
            };

            if verdict.passed {
                fsm.advance(PipelineState::Delivering);
                return self.deliver_and_finish(&mut fsm, &request, &formatted).await;
            }

            if fsm.reject() {
                // Refining: rewrite only, never re-fetch.
                answer = match run_unit("planner.refine", &self.config.model_policy, || {
                    self.planner.refine(&answer, &verdict.feedback)
                })
                .await
                {
                    Ok(report) => {
                        self.log(
                            &request,
                            "planner.refine",
                            &verdict.feedback,
                            &report.value.text,
                            report.elapsed_ms,
                            StepOutcome::Ok,
                        );
                        report.value
                    }
                    Err(failure) => {
                        self.log(
                            &request,
                            "planner.refine",
                            &verdict.feedback,
                            &failure.error.to_string(),
                            failure.elapsed_ms,
                            StepOutcome::Failed,
                        );
                        fsm.advance(PipelineState::GracefulFailure);
                        return self
                            .graceful_tail(&mut fsm, &request, "the reply could not be revised")
                            .await;
                    }
                };
                continue;
            }

            // Refinement budget spent; fsm is already in GracefulFailure.
            return self
                .graceful_tail(&mut fsm, &request, "the reply failed review twice")
                .await;
        }
    }

    /// Apology path when even the planner is unreachable: static template,
    /// deterministic formatting, no model calls at all.
    async fn static_graceful(
        &self,
        fsm: &mut Pipeline,
        request: &ConversationRequest,
    ) -> DeliveryOutcome {
        fsm.advance(PipelineState::GracefulFailure);
        let answer = ComposedAnswer {
            text: self.config.apology_template.clone(),
            source: AnswerSource::GracefulFailure,
        };
        self.log(
            request,
            "planner.graceful_failure",
            "planning unreachable",
            "static apology template",
            0,
            StepOutcome::Degraded,
        );

        fsm.advance(PipelineState::Formatting);
        let formatted = self.formatter.enforce_only(&answer, request.channel);
        self.log(
            request,
            "formatter.format",
            &answer.text,
            "length rules applied without rewrite",
            0,
            StepOutcome::Degraded,
        );

        fsm.advance(PipelineState::Delivering);
        self.deliver_and_finish(fsm, request, &formatted).await
    }

    /// Apology path while the model may still be reachable. The graceful
    /// answer is never validated - it is safe by construction - and a
    /// formatting failure degrades to the deterministic length pass.
    async fn graceful_tail(
        &self,
        fsm: &mut Pipeline,
        request: &ConversationRequest,
        reason: &str,
    ) -> DeliveryOutcome {
        let answer = match run_unit(
            "planner.graceful_failure",
            &self.config.model_policy,
            || async {
                Ok::<_, crate::error::AgentError>(
                    self.planner.graceful_failure(request, reason).await,
                )
            },
        )
        .await
        {
            Ok(report) => {
                self.log(
                    request,
                    "planner.graceful_failure",
                    reason,
                    &report.value.text,
                    report.elapsed_ms,
                    StepOutcome::Degraded,
                );
                report.value
            }
            Err(failure) => {
                self.log(
                    request,
                    "planner.graceful_failure",
                    reason,
                    "static apology template",
                    failure.elapsed_ms,
                    StepOutcome::Degraded,
                );
                ComposedAnswer {
                    text: self.config.apology_template.clone(),
                    source: AnswerSource::GracefulFailure,
                }
            }
        };

        fsm.advance(PipelineState::Formatting);
        let formatted = match run_unit("formatter.format", &self.config.model_policy, || {
            self.formatter.format(&answer, request.channel)
        })
        .await
        {
            Ok(report) => {
                self.log(
                    request,
                    "formatter.format",
                    &answer.text,
                    &format!("{} chars", report.value.content.chars().count()),
                    report.elapsed_ms,
                    StepOutcome::Ok,
                );
                report.value
            }
            Err(failure) => {
                self.log(
                    request,
                    "formatter.format",
                    &answer.text,
                    "length rules applied without rewrite",
                    failure.elapsed_ms,
                    StepOutcome::Degraded,
                );
                self.formatter.enforce_only(&answer, request.channel)
            }
        };

        fsm.advance(PipelineState::Delivering);
        self.deliver_and_finish(fsm, request, &formatted).await
    }

    async fn deliver_and_finish(
        &self,
        fsm: &mut Pipeline,
        request: &ConversationRequest,
        formatted: &FormattedResponse,
    ) -> DeliveryOutcome {
        let report = self.delivery.deliver(request, formatted).await;
        match &report.outcome {
            DeliveryOutcome::Done { receipts } => {
                fsm.advance(PipelineState::Done);
                self.log(
                    request,
                    "delivery.send",
                    request.channel.as_str(),
                    &format!("{} message(s) delivered", receipts.len()),
                    report.elapsed_ms,
                    StepOutcome::Ok,
                );
            }
            DeliveryOutcome::Failed { reason } => {
                fsm.advance(PipelineState::Failed);
                self.log(
                    request,
                    "delivery.send",
                    request.channel.as_str(),
                    reason,
                    report.elapsed_ms,
                    StepOutcome::Failed,
                );
            }
        }
        report.outcome
    }

    fn log(
        &self,
        request: &ConversationRequest,
        agent_name: &str,
        input: &str,
        output: &str,
        duration_ms: u64,
        outcome: StepOutcome,
    ) {
        self.audit.append(InteractionLogEntry {
            request_id: request.request_id.clone(),
            agent_name: agent_name.to_string(),
            input_summary: summarize(input),
            output_summary: summarize(output),
            duration_ms,
            outcome,
        });
    }
}

/// Clip a summary field to something log-sized.
fn summarize(text: &str) -> String {
    const MAX: usize = 160;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(MAX).collect();
        format!("{clipped}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::models::Channel;
    use crate::test_support::{pipeline_harness as harness, request_on, MemoryAudit};
    use serde_json::json;

    fn routing(needs_data: bool) -> Result<String, AgentError> {
        if needs_data {
            Ok(json!({
                "needs_data": true,
                "data_request": "Summary for 2026-07-27 through 2026-08-02"
            })
            .to_string())
        } else {
            Ok(json!({"needs_data": false, "data_request": null}).to_string())
        }
    }

    fn tool_choice() -> Result<String, AgentError> {
        Ok(json!({
            "tool_name": "get_timesheet_summary",
            "parameters": {"start_date": "2026-07-27", "end_date": "2026-08-02"}
        })
        .to_string())
    }

    fn answer(text: &str) -> Result<String, AgentError> {
        Ok(json!({"answer": text}).to_string())
    }

    fn formatted(text: &str) -> Result<String, AgentError> {
        Ok(json!({"content": text}).to_string())
    }

    fn scorecard_reply() -> Result<String, AgentError> {
        Ok(json!({
            "criteria": [{
                "id": "answers_question",
                "description": "The reply answers the question that was asked.",
                "expected_behavior": "States the requested hours."
            }]
        })
        .to_string())
    }

    fn verdict(passed: bool, reason: &str) -> Result<String, AgentError> {
        Ok(json!({
            "verdicts": [{"criterion_id": "answers_question", "passed": passed, "reason": reason}]
        })
        .to_string())
    }

    fn step_count(audit: &MemoryAudit, name: &str) -> usize {
        audit.agent_names().iter().filter(|n| *n == name).count()
    }

    #[tokio::test]
    async fn test_scenario_a_data_then_first_try_pass() {
        let h = harness(
            vec![
                routing(true),
                tool_choice(),
                answer("You logged 38.5 hours last week."),
                formatted("You logged 38.5 hours last week."),
                scorecard_reply(),
                verdict(true, ""),
            ],
            vec![Ok(json!({"total_hours": 38.5, "days_worked": 5,
                "period_start": "2026-07-27", "period_end": "2026-08-02"}))],
        );

        let outcome = h
            .orchestrator
            .run(request_on(Channel::Sms, "Check my timesheet for last week"))
            .await;

        assert!(outcome.is_done());
        assert_eq!(h.sender.sent_texts(), vec!["You logged 38.5 hours last week."]);
        assert_eq!(step_count(&h.audit, "planner.compose"), 1);
        assert_eq!(step_count(&h.audit, "formatter.format"), 1);
        assert_eq!(step_count(&h.audit, "validator.validate"), 1);
        assert_eq!(step_count(&h.audit, "planner.refine"), 0);
    }

    #[tokio::test]
    async fn test_scenario_b_single_refinement_then_deliver() {
        let h = harness(
            vec![
                routing(false),
                answer("A long-winded reply about the timesheet."),
                formatted("A long-winded reply about the timesheet."),
                scorecard_reply(),
                verdict(false, "too long for SMS"),
                answer("38.5h logged last week."),
                formatted("38.5h logged last week."),
                verdict(true, ""),
            ],
            vec![],
        );

        let outcome = h
            .orchestrator
            .run(request_on(Channel::Sms, "Check my timesheet"))
            .await;

        assert!(outcome.is_done());
        assert_eq!(h.sender.sent_texts(), vec!["38.5h logged last week."]);
        assert_eq!(step_count(&h.audit, "planner.refine"), 1);
        // The scorecard is built once and reused for the second round.
        assert_eq!(step_count(&h.audit, "validator.build_scorecard"), 1);
        assert_eq!(step_count(&h.audit, "validator.validate"), 2);
    }

    #[tokio::test]
    async fn test_scenario_c_second_failure_goes_graceful() {
        let h = harness(
            vec![
                routing(false),
                answer("Draft one."),
                formatted("Draft one."),
                scorecard_reply(),
                verdict(false, "does not answer the question"),
                answer("Draft two."),
                formatted("Draft two."),
                verdict(false, "still does not answer the question"),
                answer("Sorry - I couldn't sort that out just now. Please try again soon."),
                formatted("Sorry - I couldn't sort that out just now. Please try again soon."),
            ],
            vec![],
        );

        let outcome = h
            .orchestrator
            .run(request_on(Channel::Sms, "Check my timesheet"))
            .await;

        assert!(outcome.is_done());
        // Exactly one refinement, then the apology; never a third rewrite.
        assert_eq!(step_count(&h.audit, "planner.refine"), 1);
        assert_eq!(step_count(&h.audit, "planner.graceful_failure"), 1);
        // The graceful answer is not validated.
        assert_eq!(step_count(&h.audit, "validator.validate"), 2);
        let sent = h.sender.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Sorry"));
    }

    #[tokio::test]
    async fn test_scenario_d_retrieval_failure_degrades_to_marker() {
        let h = harness(
            vec![
                routing(true),
                // Both retrieval attempts fail at tool selection time.
                Err(AgentError::Transient("backend down".into())),
                Err(AgentError::Transient("backend down".into())),
                answer("I couldn't reach your timesheet just now - try me again shortly."),
                formatted("I couldn't reach your timesheet just now - try me again shortly."),
                scorecard_reply(),
                verdict(true, ""),
            ],
            vec![],
        );

        let outcome = h
            .orchestrator
            .run(request_on(Channel::Sms, "Check my timesheet"))
            .await;

        assert!(outcome.is_done());
        // Composition saw the marker, not an abort.
        let compose_prompt = h
            .client
            .prompts()
            .into_iter()
            .find(|p| p.contains("The lookup failed"))
            .expect("compose prompt should carry the unavailable marker");
        assert!(compose_prompt.contains("couldn't reach the timesheet system"));
        assert_eq!(h.sender.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_planning_exhaustion_sends_static_apology() {
        let h = harness(
            vec![
                Err(AgentError::Transient("model down".into())),
                Err(AgentError::Transient("model down".into())),
            ],
            vec![],
        );

        let outcome = h
            .orchestrator
            .run(request_on(Channel::Sms, "Check my timesheet"))
            .await;

        assert!(outcome.is_done());
        // No model calls beyond the failed planning attempts.
        assert_eq!(h.client.calls(), 2);
        let sent = h.sender.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Sorry"));
    }

    #[tokio::test]
    async fn test_malformed_routing_is_retried() {
        let h = harness(
            vec![
                Ok("not json at all".to_string()),
                routing(false),
                answer("Happy to help with your timesheet."),
                formatted("Happy to help with your timesheet."),
                scorecard_reply(),
                verdict(true, ""),
            ],
            vec![],
        );

        let outcome = h
            .orchestrator
            .run(request_on(Channel::Chat, "What can you do?"))
            .await;

        assert!(outcome.is_done());
        assert_eq!(h.sender.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_long_answer_is_delivered_in_order() {
        let long_text = "A fact. ".repeat(45).trim_end().to_string();
        let h = harness(
            vec![
                routing(false),
                answer(&long_text),
                formatted(&long_text),
                scorecard_reply(),
                verdict(true, ""),
            ],
            vec![],
        );

        let outcome = h
            .orchestrator
            .run(request_on(Channel::Sms, "Summarize my month"))
            .await;

        assert!(outcome.is_done());
        let sent = h.sender.sent_texts();
        assert!(sent.len() > 1);
        for part in &sent {
            assert!(part.chars().count() <= 160);
        }
        assert_eq!(sent.concat(), long_text);
    }

    #[test]
    fn test_summarize_clips_long_text() {
        let text = "x".repeat(500);
        let clipped = summarize(&text);
        assert!(clipped.chars().count() <= 163);
        assert!(clipped.ends_with("..."));
    }
}
