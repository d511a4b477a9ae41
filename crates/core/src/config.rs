//! Process-start configuration.
//!
//! Loaded once, passed into each agent's constructor, never read from
//! ambient global state - concurrent conversations must not observe a
//! config change mid-flight. Channel presentation rules are data here,
//! not code in the formatter.

use serde::{Deserialize, Serialize};

use crate::models::Channel;
use crate::runtime::RetryPolicy;

/// How much markup a channel tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupLevel {
    /// Plain text only (SMS).
    None,
    /// Bold/italic/lists, no headings or tables.
    Limited,
    /// Anything reasonable in an email body.
    Full,
}

/// Presentation rules for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRule {
    /// Maximum length of a single outbound message, in characters.
    pub max_message_len: usize,
    pub markup: MarkupLevel,
    /// Whether an over-length answer may be sent as multiple parts.
    /// When false, the answer is truncated with a continuation marker.
    pub allow_split: bool,
}

/// Per-channel rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRules {
    pub sms: ChannelRule,
    pub chat: ChannelRule,
    pub email: ChannelRule,
}

impl Default for ChannelRules {
    fn default() -> Self {
        Self {
            sms: ChannelRule {
                max_message_len: 160,
                markup: MarkupLevel::None,
                allow_split: true,
            },
            chat: ChannelRule {
                max_message_len: 4000,
                markup: MarkupLevel::Limited,
                allow_split: true,
            },
            email: ChannelRule {
                max_message_len: 10_000,
                markup: MarkupLevel::Full,
                allow_split: false,
            },
        }
    }
}

impl ChannelRules {
    pub fn for_channel(&self, channel: Channel) -> &ChannelRule {
        match channel {
            Channel::Sms => &self.sms,
            Channel::Chat => &self.chat,
            Channel::Email => &self.email,
        }
    }
}

/// Configuration for one pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub channel_rules: ChannelRules,
    /// Retry policy for model-backed steps (planning, composing,
    /// formatting, validating).
    #[serde(default = "RetryPolicy::model_default")]
    pub model_policy: RetryPolicy,
    /// Retry policy for the data-retrieval step.
    #[serde(default = "RetryPolicy::tool_default")]
    pub retrieval_policy: RetryPolicy,
    /// Retry policy for outbound sends. Independent of, and longer than,
    /// the pipeline-internal policies: losing the final message is the
    /// worst user-visible outcome.
    #[serde(default = "RetryPolicy::delivery_default")]
    pub delivery_policy: RetryPolicy,
    /// Apology used when even the planner is unreachable. Plain language,
    /// no internal identifiers.
    #[serde(default = "default_apology")]
    pub apology_template: String,
}

fn default_apology() -> String {
    "Sorry - I'm having trouble answering right now. Please try again in a \
     few minutes."
        .to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_rules: ChannelRules::default(),
            model_policy: RetryPolicy::model_default(),
            retrieval_policy: RetryPolicy::tool_default(),
            delivery_policy: RetryPolicy::delivery_default(),
            apology_template: default_apology(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_per_channel() {
        let rules = ChannelRules::default();
        assert_eq!(rules.for_channel(Channel::Sms).max_message_len, 160);
        assert!(rules.for_channel(Channel::Sms).allow_split);
        assert!(!rules.for_channel(Channel::Email).allow_split);
        assert_eq!(rules.for_channel(Channel::Chat).markup, MarkupLevel::Limited);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert!(config.delivery_policy.max_attempts >= config.model_policy.max_attempts);
        assert!(!config.apology_template.is_empty());
    }
}
