//! Default prompt templates bundled at compile time.
//!
//! One template per agent operation, named by slug. A deployment can
//! override individual templates through [`PromptSet`]; agents read from
//! the set handed to their constructor, never from globals.

use std::collections::HashMap;

/// Routing analysis - does the message need a timesheet lookup?
pub const ANALYZE: &str = include_str!("defaults/analyze.md");

/// Answer composition from the message plus retrieved data (or its absence).
pub const COMPOSE: &str = include_str!("defaults/compose.md");

/// Rewrite of an answer that failed validation.
pub const REFINE: &str = include_str!("defaults/refine.md");

/// Short, honest apology when the pipeline cannot produce a real answer.
pub const GRACEFUL_FAILURE: &str = include_str!("defaults/graceful_failure.md");

/// Tool selection against the capability catalogue.
pub const TOOL_SELECTION: &str = include_str!("defaults/tool_selection.md");

/// Channel-appropriate rewrite (markup rules).
pub const FORMAT: &str = include_str!("defaults/format.md");

/// Scorecard derivation from the original request.
pub const SCORECARD: &str = include_str!("defaults/scorecard.md");

/// Per-criterion judgment of a formatted answer.
pub const JUDGE: &str = include_str!("defaults/judge.md");

/// All default templates with their slugs.
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("analyze", ANALYZE),
        ("compose", COMPOSE),
        ("refine", REFINE),
        ("graceful_failure", GRACEFUL_FAILURE),
        ("tool_selection", TOOL_SELECTION),
        ("format", FORMAT),
        ("scorecard", SCORECARD),
        ("judge", JUDGE),
    ]
}

/// Immutable template set passed into agent constructors.
#[derive(Debug, Clone)]
pub struct PromptSet {
    templates: HashMap<&'static str, String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        let templates = all_defaults()
            .into_iter()
            .map(|(slug, content)| (slug, content.to_string()))
            .collect();
        Self { templates }
    }
}

impl PromptSet {
    /// Replace one template. Overrides for unknown slugs are ignored.
    pub fn with_override(mut self, slug: &str, content: impl Into<String>) -> Self {
        if let Some((known, _)) = all_defaults().into_iter().find(|(s, _)| *s == slug) {
            self.templates.insert(known, content.into());
        } else {
            tracing::warn!(slug, "ignoring override for unknown prompt slug");
        }
        self
    }

    pub fn get(&self, slug: &str) -> &str {
        self.templates
            .get(slug)
            .map(String::as_str)
            .unwrap_or_default()
    }
}
