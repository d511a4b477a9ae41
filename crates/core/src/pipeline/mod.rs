//! # Pipeline Orchestration
//!
//! Coordinates the agent pipeline for Tally.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Message -> Planner -> [Data Retrieval] -> Planner (compose) -> Formatter
//!         -> Validator -> [Planner (refine) -> Formatter -> Validator]
//!         -> [Planner (graceful failure)] -> Delivery
//! ```

pub mod dispatch;
pub mod orchestrator;
pub mod state;

pub use dispatch::{Dispatcher, RunStatus};
pub use orchestrator::Orchestrator;
pub use state::{Pipeline, PipelineState, MAX_REFINEMENTS};
