// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core type definitions shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message in an agent's conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Prompt sent by the orchestrator on behalf of the user.
    User,
    /// Text produced by the coding agent.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry in an agent's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create a user entry stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant entry stamped with the current time.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Token usage statistics reported by the coding agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt
    #[serde(default)]
    pub input_tokens: u64,
    /// Number of tokens in the output/completion
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Get total tokens (input + output).
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Add another usage sample to this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut usage = TokenUsage::default();
        usage.accumulate(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        usage.accumulate(&TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
        });
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 7);
    }

    #[test]
    fn test_token_usage_partial_json() {
        let usage: TokenUsage = serde_json::from_str(r#"{"input_tokens": 42}"#).unwrap();
        assert_eq!(usage.input_tokens, 42);
        assert_eq!(usage.output_tokens, 0);
    }

    #[test]
    fn test_history_entry_roles() {
        assert_eq!(HistoryEntry::user("hi").role, Role::User);
        assert_eq!(HistoryEntry::assistant("hello").role, Role::Assistant);
        assert_eq!(Role::User.to_string(), "user");
    }
}
