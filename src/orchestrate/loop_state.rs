// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Iterative loop automation.
//!
//! A loop re-sends the same prompt to the main agent after each completion
//! until the agent's output contains the completion promise, the iteration
//! budget is spent, or the loop is cancelled. Each loop ends exactly once.

use serde::{Deserialize, Serialize};

use super::pool::PoolError;

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopEndReason {
    /// The completion promise appeared in the agent's output.
    Promise,
    /// The next iteration would exceed the configured maximum.
    MaxIterations,
    /// The loop was cancelled by the caller.
    Cancelled,
}

impl LoopEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promise => "promise",
            Self::MaxIterations => "max_iterations",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for LoopEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens after an iteration completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// Run this (1-based) iteration next.
    Next(u32),
    /// The loop is over.
    End(LoopEndReason),
}

/// Read-only view of a running loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub prompt: String,
    pub completion_promise: String,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub active: bool,
}

/// State of one loop run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub prompt: String,
    pub completion_promise: String,
    pub max_iterations: u32,
    pub current_iteration: u32,
    pub active: bool,
}

impl LoopConfig {
    /// Validate arguments and create a loop positioned on iteration 1.
    pub fn new(
        prompt: impl Into<String>,
        completion_promise: impl Into<String>,
        max_iterations: u32,
    ) -> Result<Self, PoolError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(PoolError::InvalidLoop("prompt is empty".to_string()));
        }
        if max_iterations == 0 {
            return Err(PoolError::InvalidLoop(
                "max iterations must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            prompt,
            completion_promise: completion_promise.into(),
            max_iterations,
            current_iteration: 1,
            active: true,
        })
    }

    /// Advance after an iteration completed without a promise.
    pub fn advance(&mut self) -> LoopStep {
        if !self.active {
            return LoopStep::End(LoopEndReason::Cancelled);
        }
        let next = self.current_iteration + 1;
        if next > self.max_iterations {
            self.active = false;
            return LoopStep::End(LoopEndReason::MaxIterations);
        }
        self.current_iteration = next;
        LoopStep::Next(next)
    }

    /// End the loop. Returns the reason only the first time.
    pub fn finish(&mut self, reason: LoopEndReason) -> Option<LoopEndReason> {
        if !self.active {
            return None;
        }
        self.active = false;
        Some(reason)
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus {
            prompt: self.prompt.clone(),
            completion_promise: self.completion_promise.clone(),
            current_iteration: self.current_iteration,
            max_iterations: self.max_iterations,
            active: self.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_arguments() {
        assert!(LoopConfig::new("  ", "DONE", 3).is_err());
        assert!(LoopConfig::new("fix tests", "DONE", 0).is_err());
    }

    #[test]
    fn test_advance_until_max() {
        let mut config = LoopConfig::new("fix tests", "DONE", 3).unwrap();
        assert_eq!(config.current_iteration, 1);
        assert_eq!(config.advance(), LoopStep::Next(2));
        assert_eq!(config.advance(), LoopStep::Next(3));
        assert_eq!(config.advance(), LoopStep::End(LoopEndReason::MaxIterations));
        assert!(!config.active);
        assert_eq!(config.current_iteration, 3);
    }

    #[test]
    fn test_single_iteration_loop() {
        let mut config = LoopConfig::new("once", "DONE", 1).unwrap();
        assert_eq!(config.advance(), LoopStep::End(LoopEndReason::MaxIterations));
    }

    #[test]
    fn test_finish_is_exclusive() {
        let mut config = LoopConfig::new("fix tests", "DONE", 5).unwrap();
        assert_eq!(config.finish(LoopEndReason::Promise), Some(LoopEndReason::Promise));
        assert_eq!(config.finish(LoopEndReason::Cancelled), None);
        assert_eq!(config.advance(), LoopStep::End(LoopEndReason::Cancelled));
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&LoopEndReason::MaxIterations).unwrap();
        assert_eq!(json, "\"max_iterations\"");
        assert_eq!(LoopEndReason::Cancelled.to_string(), "cancelled");
    }
}
