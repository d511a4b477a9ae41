//! Capability registry.
//!
//! A closed catalogue of the timesheet data tools the retrieval agent may
//! call: name, input schema, output schema, and a validation hook. Tool
//! *selection* is delegated to a model call, but invocation stays
//! deterministic - parameters are checked against the declared input
//! schema before anything touches the backend.

use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::{schema_for, JsonSchema, Schema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, ToolErrorKind};

const DATE_FORMAT: &str = "%Y-%m-%d";

fn check_date(field: &str, value: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(|_| ())
        .map_err(|_| format!("{field} must be a YYYY-MM-DD date, got '{value}'"))
}

// === Tool input parameters ===

/// Fetch individual timesheet entries for a date range.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimesheetEntriesParams {
    /// Inclusive range start, YYYY-MM-DD.
    pub start_date: String,
    /// Inclusive range end, YYYY-MM-DD.
    pub end_date: String,
    /// Include break records as separate entries.
    #[serde(default)]
    pub include_breaks: Option<bool>,
}

/// Aggregate hours for a date range.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimesheetSummaryParams {
    /// Inclusive range start, YYYY-MM-DD.
    pub start_date: String,
    /// Inclusive range end, YYYY-MM-DD.
    pub end_date: String,
}

/// Record a new time entry.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LogTimeEntryParams {
    /// Work date, YYYY-MM-DD.
    pub date: String,
    pub project_code: String,
    pub hours: f64,
    #[serde(default)]
    pub note: Option<String>,
}

/// Submit a finished timesheet period for approval.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SubmitTimesheetParams {
    /// Period start, YYYY-MM-DD.
    pub period_start: String,
    /// Period end, YYYY-MM-DD.
    pub period_end: String,
}

// === Tool outputs ===

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimesheetEntry {
    pub date: String,
    pub project_code: String,
    pub hours: f64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimesheetEntriesOutput {
    pub entries: Vec<TimesheetEntry>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimesheetSummaryOutput {
    pub period_start: String,
    pub period_end: String,
    pub total_hours: f64,
    pub days_worked: u32,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LogTimeEntryOutput {
    pub entry_id: String,
    pub recorded: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SubmitTimesheetOutput {
    pub submission_id: String,
    pub status: String,
}

// === Registry ===

/// Declared signature of one data tool.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Schema,
    pub output_schema: Schema,
}

type ParamValidator = Box<dyn Fn(&serde_json::Value) -> Result<(), String> + Send + Sync>;

struct RegisteredTool {
    spec: ToolSpec,
    validate: ParamValidator,
}

fn typed_validator<T, F>(extra: F) -> ParamValidator
where
    T: DeserializeOwned,
    F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
{
    Box::new(move |value| {
        let params: T =
            serde_json::from_value(value.clone()).map_err(|e| format!("schema mismatch: {e}"))?;
        extra(&params)
    })
}

/// The closed tool catalogue exposed by the external timesheet client.
pub struct CapabilityRegistry {
    tools: Vec<RegisteredTool>,
}

impl CapabilityRegistry {
    /// The standard timesheet catalogue.
    pub fn standard() -> Self {
        let tools = vec![
            RegisteredTool {
                spec: ToolSpec {
                    name: "get_timesheet_entries",
                    description:
                        "List the individual timesheet entries recorded between two dates.",
                    input_schema: schema_for!(TimesheetEntriesParams),
                    output_schema: schema_for!(TimesheetEntriesOutput),
                },
                validate: typed_validator(|p: &TimesheetEntriesParams| {
                    check_date("start_date", &p.start_date)?;
                    check_date("end_date", &p.end_date)
                }),
            },
            RegisteredTool {
                spec: ToolSpec {
                    name: "get_timesheet_summary",
                    description: "Total hours and days worked between two dates.",
                    input_schema: schema_for!(TimesheetSummaryParams),
                    output_schema: schema_for!(TimesheetSummaryOutput),
                },
                validate: typed_validator(|p: &TimesheetSummaryParams| {
                    check_date("start_date", &p.start_date)?;
                    check_date("end_date", &p.end_date)
                }),
            },
            RegisteredTool {
                spec: ToolSpec {
                    name: "log_time_entry",
                    description: "Record a new time entry for a single day and project.",
                    input_schema: schema_for!(LogTimeEntryParams),
                    output_schema: schema_for!(LogTimeEntryOutput),
                },
                validate: typed_validator(|p: &LogTimeEntryParams| {
                    check_date("date", &p.date)?;
                    if !(0.0..=24.0).contains(&p.hours) {
                        return Err(format!("hours must be between 0 and 24, got {}", p.hours));
                    }
                    Ok(())
                }),
            },
            RegisteredTool {
                spec: ToolSpec {
                    name: "submit_timesheet",
                    description: "Submit a completed timesheet period for approval.",
                    input_schema: schema_for!(SubmitTimesheetParams),
                    output_schema: schema_for!(SubmitTimesheetOutput),
                },
                validate: typed_validator(|p: &SubmitTimesheetParams| {
                    check_date("period_start", &p.period_start)?;
                    check_date("period_end", &p.period_end)
                }),
            },
        ];
        Self { tools }
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.spec.name).collect()
    }

    /// Catalogue rendered for the tool-selection prompt.
    pub fn catalogue_text(&self) -> String {
        let mut out = String::new();
        for tool in &self.tools {
            let schema = serde_json::to_string_pretty(&tool.spec.input_schema)
                .unwrap_or_else(|_| "{}".to_string());
            out.push_str(&format!(
                "### {}\n{}\nInput schema:\n{}\n\n",
                tool.spec.name, tool.spec.description, schema
            ));
        }
        out
    }

    /// Check a model-selected invocation before it reaches the backend.
    ///
    /// Unknown names and schema-violating parameters are retryable agent
    /// errors - the model gets another chance to pick, nothing is coerced.
    pub fn validate_invocation(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
    ) -> Result<(), AgentError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.spec.name == tool_name)
            .ok_or_else(|| AgentError::Tool {
                kind: ToolErrorKind::ToolNotFound,
                message: format!("no tool named '{tool_name}' in the catalogue"),
            })?;

        (tool.validate)(parameters).map_err(|message| AgentError::Tool {
            kind: ToolErrorKind::InvalidParameters,
            message,
        })
    }
}

/// Invocation seam to the external timesheet backend.
///
/// Implementations resolve `credentials_ref` to real credentials on their
/// side; errors surface as [`AgentError::Tool`] with the upstream kinds.
#[async_trait]
pub trait TimesheetClient: Send + Sync {
    async fn invoke(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
        credentials_ref: &str,
    ) -> Result<serde_json::Value, AgentError>;
}
