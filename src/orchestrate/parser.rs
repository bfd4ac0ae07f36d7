// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming parser for agent subprocess output.
//!
//! Agent processes write newline-delimited JSON to their terminal. Output
//! arrives in arbitrary chunks, so the parser buffers raw bytes, emits events
//! only for complete lines, and keeps the trailing partial line for the next
//! call to [`StreamParser::feed`].
//!
//! Lines that are not valid JSON, or whose shape is not recognized, produce
//! no events. Terminal control sequences and status chatter are expected on a
//! pseudo-terminal and are dropped silently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TokenUsage;

// ============================================================================
// Semantic Events
// ============================================================================

/// A semantic event decoded from the agent output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParserEvent {
    /// Incremental assistant text. Consumers append `delta`.
    Text {
        delta: String,
        /// All text seen since the last completion.
        accumulated: String,
    },
    /// The agent invoked a tool.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// A tool returned a result.
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    /// The agent finished its turn.
    Complete {
        result: String,
        usage: TokenUsage,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        is_error: bool,
    },
    /// The agent reported an error.
    Error { error_type: String, message: String },
    /// Accumulated text contains the registered promise pattern.
    PromiseDetected { pattern: String },
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    Assistant {
        message: AssistantBody,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        usage: Option<TokenUsage>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    Error {
        #[serde(default)]
        error: ErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantBody {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Flatten tool result content to text.
///
/// Content is either a plain string or a list of blocks; text blocks are
/// joined with newlines and anything else is rendered as JSON.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .map(|block| match block.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => block.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Stateful line-buffering decoder for one agent subprocess.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    accumulated: String,
    promise_pattern: Option<String>,
    promise_fired: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch accumulated text for `pattern`.
    ///
    /// A [`ParserEvent::PromiseDetected`] fires at most once per registered
    /// pattern. Registering a pattern re-arms detection.
    pub fn set_promise_pattern(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        self.promise_pattern = if pattern.is_empty() { None } else { Some(pattern) };
        self.promise_fired = false;
    }

    /// Stop watching for a promise pattern.
    pub fn clear_promise_pattern(&mut self) {
        self.promise_pattern = None;
        self.promise_fired = false;
    }

    /// Text accumulated since the last completion.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// Number of bytes held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a raw output chunk and return the events for every complete line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParserEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            let line = self.buffer[start..end].to_vec();
            self.parse_line(&line, &mut events);
            start = end + 1;
            search_from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        events
    }

    /// Parse whatever remains in the buffer as a final line and reset.
    pub fn flush(&mut self) -> Vec<ParserEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let mut events = Vec::new();
        self.parse_line(&rest, &mut events);
        self.accumulated.clear();
        events
    }

    fn parse_line(&mut self, raw: &[u8], events: &mut Vec<ParserEvent>) {
        let Ok(line) = std::str::from_utf8(raw) else {
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Ok(message) = serde_json::from_str::<StreamMessage>(line) else {
            return;
        };

        match message {
            StreamMessage::Assistant { message } => {
                for block in message.content {
                    self.handle_block(block, events);
                }
            }
            StreamMessage::Result {
                result,
                usage,
                total_cost_usd,
                session_id,
                is_error,
            } => {
                let accumulated = std::mem::take(&mut self.accumulated);
                events.push(ParserEvent::Complete {
                    result: result.unwrap_or(accumulated),
                    usage: usage.unwrap_or_default(),
                    cost_usd: total_cost_usd,
                    session_id,
                    is_error,
                });
            }
            StreamMessage::Error { error } => {
                events.push(ParserEvent::Error {
                    error_type: error.kind.unwrap_or_else(|| "error".to_string()),
                    message: error.message.unwrap_or_default(),
                });
            }
            StreamMessage::Other => {}
        }
    }

    fn handle_block(&mut self, block: ContentBlock, events: &mut Vec<ParserEvent>) {
        match block {
            ContentBlock::Text { text } => {
                if text.is_empty() {
                    return;
                }
                self.accumulated.push_str(&text);
                events.push(ParserEvent::Text {
                    delta: text,
                    accumulated: self.accumulated.clone(),
                });
                self.check_promise(events);
            }
            ContentBlock::ToolUse { id, name, input } => {
                events.push(ParserEvent::ToolUse { id, name, input });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                events.push(ParserEvent::ToolResult {
                    tool_use_id,
                    content: tool_result_text(&content),
                    is_error,
                });
            }
            ContentBlock::Other => {}
        }
    }

    fn check_promise(&mut self, events: &mut Vec<ParserEvent>) {
        if self.promise_fired {
            return;
        }
        if let Some(pattern) = &self.promise_pattern {
            if self.accumulated.contains(pattern.as_str()) {
                self.promise_fired = true;
                events.push(ParserEvent::PromiseDetected {
                    pattern: pattern.clone(),
                });
            }
        }
    }
}
