// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-process resource sampling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::trace;

/// Resource usage default polling interval.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 2_000;

/// One CPU/memory sample for a process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

/// Samples resource usage of a process.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Sample `pid`. `None` means the process is gone and polling should stop.
    async fn sample(&self, pid: u32) -> Option<ResourceSample>;
}

/// Probe backed by `ps`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsProbe;

#[async_trait]
impl ResourceProbe for PsProbe {
    async fn sample(&self, pid: u32) -> Option<ResourceSample> {
        let output = Command::new("ps")
            .args(["-o", "%cpu=", "-o", "rss=", "-p", &pid.to_string()])
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            trace!(pid, "ps reported no such process");
            return None;
        }
        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `ps -o %cpu= -o rss=` output (rss in KiB).
pub fn parse_ps_output(output: &str) -> Option<ResourceSample> {
    let mut fields = output.split_whitespace();
    let cpu_percent = fields.next()?.replace(',', ".").parse::<f32>().ok()?;
    let rss_kb = fields.next()?.parse::<u64>().ok()?;
    Some(ResourceSample {
        cpu_percent,
        memory_mb: rss_kb as f64 / 1024.0,
    })
}
