//! # Pipeline States
//!
//! The finite-state machine for one conversation. The struct is a pure
//! bookkeeping type: it never calls the model, the clock, or anything
//! random, so replaying the same unit-of-work results walks the same
//! states.

use serde::{Deserialize, Serialize};

/// Refinement is attempted at most once per request. A hard invariant, not
/// configuration: it bounds worst-case latency for every conversation.
pub const MAX_REFINEMENTS: u32 = 1;

/// State of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Analyzing the message and routing
    Planning,
    /// Fetching timesheet data (only when routing asked for it)
    DataRetrieval,
    /// Composing the plain-text answer
    Composing,
    /// Adapting the answer to the channel
    Formatting,
    /// Judging the formatted answer against the scorecard
    Validating,
    /// Rewriting after a failed validation
    Refining,
    /// Composing the safety-net apology
    GracefulFailure,
    /// Sending message parts
    Delivering,
    /// Delivered
    Done,
    /// Delivery exhausted its retries
    Failed,
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Current state
    pub state: PipelineState,
    /// Number of refinements attempted
    refinements: u32,
    /// Every state entered, in order
    history: Vec<PipelineState>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            state: PipelineState::Planning,
            refinements: 0,
            history: vec![PipelineState::Planning],
        }
    }
}

impl Pipeline {
    /// Create a new pipeline in the planning state
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `next`, recording it in the transition history.
    pub fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            Self::permitted(self.state, next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        self.history.push(next);
    }

    /// Handle a failed validation verdict. Returns true when a refinement
    /// attempt is still available (state moves to Refining), false when
    /// the budget is spent (state moves to GracefulFailure).
    pub fn reject(&mut self) -> bool {
        if self.refinements < MAX_REFINEMENTS {
            self.refinements += 1;
            self.advance(PipelineState::Refining);
            true
        } else {
            self.advance(PipelineState::GracefulFailure);
            false
        }
    }

    pub fn refinements(&self) -> u32 {
        self.refinements
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Check if pipeline reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PipelineState::Done | PipelineState::Failed)
    }

    /// Legal transitions of the state machine.
    fn permitted(from: PipelineState, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (from, to),
            (Planning, DataRetrieval)
                | (Planning, Composing)
                | (Planning, GracefulFailure)
                | (DataRetrieval, Composing)
                | (Composing, Formatting)
                | (Composing, GracefulFailure)
                | (Formatting, Validating)
                | (Formatting, Delivering)
                | (Formatting, GracefulFailure)
                | (Validating, Delivering)
                | (Validating, Refining)
                | (Validating, GracefulFailure)
                | (Refining, Formatting)
                | (Refining, GracefulFailure)
                | (GracefulFailure, Formatting)
                | (Delivering, Done)
                | (Delivering, Failed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut pipeline = Pipeline::new();
        assert_eq!(pipeline.state, PipelineState::Planning);

        pipeline.advance(PipelineState::DataRetrieval);
        pipeline.advance(PipelineState::Composing);
        pipeline.advance(PipelineState::Formatting);
        pipeline.advance(PipelineState::Validating);
        pipeline.advance(PipelineState::Delivering);
        pipeline.advance(PipelineState::Done);

        assert!(pipeline.is_terminal());
        assert_eq!(pipeline.history().len(), 7);
    }

    #[test]
    fn test_reject_allows_exactly_one_refinement() {
        let mut pipeline = Pipeline::new();
        pipeline.advance(PipelineState::Composing);
        pipeline.advance(PipelineState::Formatting);
        pipeline.advance(PipelineState::Validating);

        // First rejection - refine
        assert!(pipeline.reject());
        assert_eq!(pipeline.state, PipelineState::Refining);

        pipeline.advance(PipelineState::Formatting);
        pipeline.advance(PipelineState::Validating);

        // Second rejection - give up
        assert!(!pipeline.reject());
        assert_eq!(pipeline.state, PipelineState::GracefulFailure);
        assert_eq!(pipeline.refinements(), MAX_REFINEMENTS);
    }

    #[test]
    fn test_history_counts_refinements() {
        let mut pipeline = Pipeline::new();
        pipeline.advance(PipelineState::Composing);
        pipeline.advance(PipelineState::Formatting);
        pipeline.advance(PipelineState::Validating);
        pipeline.reject();
        pipeline.advance(PipelineState::Formatting);
        pipeline.advance(PipelineState::Validating);
        pipeline.reject();

        let refine_entries = pipeline
            .history()
            .iter()
            .filter(|s| **s == PipelineState::Refining)
            .count();
        assert_eq!(refine_entries, 1);
    }

    #[test]
    fn test_planning_may_short_circuit_to_graceful_failure() {
        let mut pipeline = Pipeline::new();
        pipeline.advance(PipelineState::GracefulFailure);
        pipeline.advance(PipelineState::Formatting);
        pipeline.advance(PipelineState::Delivering);
        pipeline.advance(PipelineState::Done);
        assert!(pipeline.is_terminal());
    }
}
