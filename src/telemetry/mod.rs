// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing setup for the workforce binary.
//!
//! Library code logs through `tracing` macros with structured fields
//! (`agent_id`, `run_id`, `pid`) and `#[instrument]` on the public pool
//! operations. The binary installs a subscriber once at startup:
//!
//! ```rust,ignore
//! use workforce::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::from_verbosity(1))?;
//! ```

mod init;

pub use init::{init_telemetry, TelemetryConfig};
