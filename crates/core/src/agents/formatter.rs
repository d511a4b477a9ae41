//! Formatting agent.
//!
//! One model call rewrites the answer for the channel's markup rules; a
//! deterministic post-pass enforces the length rules. Splitting and
//! truncation are never delegated to the model - the same composed answer
//! must always yield the same parts.

use std::sync::Arc;

use serde::Deserialize;

use crate::agents::{parse_llm_json, PromptSet};
use crate::config::{ChannelRule, ChannelRules, MarkupLevel};
use crate::error::AgentError;
use crate::llm::CompletionClient;
use crate::models::{Channel, ComposedAnswer, FormattedResponse, MessagePart};

/// Appended when a channel forbids splitting and the content was cut.
pub const CONTINUATION_MARKER: &str = " [...]";

#[derive(Debug, Deserialize)]
struct FormatReply {
    content: String,
}

pub struct FormattingAgent {
    client: Arc<dyn CompletionClient>,
    prompts: PromptSet,
    rules: ChannelRules,
}

impl FormattingAgent {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: PromptSet, rules: ChannelRules) -> Self {
        Self {
            client,
            prompts,
            rules,
        }
    }

    /// Rewrite for the channel, then enforce its length rules.
    pub async fn format(
        &self,
        answer: &ComposedAnswer,
        channel: Channel,
    ) -> Result<FormattedResponse, AgentError> {
        let rule = self.rules.for_channel(channel);
        let markup = match rule.markup {
            MarkupLevel::None => "none",
            MarkupLevel::Limited => "limited",
            MarkupLevel::Full => "full",
        };

        let prompt = format!(
            "{}\n\nChannel: {}\nMarkup rule: {}\n\nReply to adapt:\n{}",
            self.prompts.get("format"),
            channel.as_str(),
            markup,
            answer.text,
        );

        let reply: FormatReply = parse_llm_json(&self.client.complete(&prompt).await?)?;
        let content = reply.content.trim().to_string();
        if content.is_empty() {
            return Err(AgentError::MalformedOutput("empty formatted content".into()));
        }

        Ok(enforce_length(content, channel, rule))
    }

    /// Length enforcement without the model rewrite. Used when an apology
    /// must go out even though the model is unreachable.
    pub fn enforce_only(&self, answer: &ComposedAnswer, channel: Channel) -> FormattedResponse {
        enforce_length(answer.text.clone(), channel, self.rules.for_channel(channel))
    }
}

/// Deterministic length pass: split at paragraph/sentence boundaries when
/// the channel allows it, truncate with a visible marker when it does not.
fn enforce_length(content: String, channel: Channel, rule: &ChannelRule) -> FormattedResponse {
    let length = content.chars().count();
    if length <= rule.max_message_len {
        return FormattedResponse {
            content,
            is_split: false,
            parts: Vec::new(),
            channel,
        };
    }

    if rule.allow_split {
        let parts = split_parts(&content, rule.max_message_len)
            .into_iter()
            .enumerate()
            .map(|(i, text)| MessagePart {
                sequence_index: i + 1,
                text,
            })
            .collect();
        FormattedResponse {
            content,
            is_split: true,
            parts,
            channel,
        }
    } else {
        FormattedResponse {
            content: truncate_with_marker(&content, rule.max_message_len),
            is_split: false,
            parts: Vec::new(),
            channel,
        }
    }
}

/// Byte offset just past the first `chars` characters of `s`.
fn byte_of_char(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Greedy segmentation into chunks of at most `max_chars` characters.
///
/// Each chunk is a contiguous slice of the original, separators included,
/// so concatenating the parts in order reproduces the input exactly. Break
/// preference: paragraph boundary, then sentence boundary, then a hard cut.
fn split_parts(content: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = content;

    while rest.chars().count() > max_chars {
        let limit = byte_of_char(rest, max_chars);
        let window = &rest[..limit];
        let cut = match best_break(window) {
            Some(cut) if cut > 0 => cut,
            _ => limit,
        };
        parts.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

/// Best break position inside `window`: just past the last paragraph break
/// if there is one, otherwise just past the last sentence boundary.
fn best_break(window: &str) -> Option<usize> {
    if let Some(i) = window.rfind("\n\n") {
        return Some(i + 2);
    }
    [". ", "! ", "? ", "\n"]
        .iter()
        .filter_map(|pat| window.rfind(pat).map(|i| i + pat.len()))
        .max()
}

/// Cut to `max_chars` with [`CONTINUATION_MARKER`] appended; the result
/// never exceeds `max_chars` characters.
fn truncate_with_marker(content: &str, max_chars: usize) -> String {
    let marker_chars = CONTINUATION_MARKER.chars().count();
    if max_chars <= marker_chars {
        return content.chars().take(max_chars).collect();
    }
    let keep = byte_of_char(content, max_chars - marker_chars);
    let mut out = content[..keep].to_string();
    out.push_str(CONTINUATION_MARKER);
    out
}
