// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::pipeline::ProvisionError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Why a run failed. Every failure kind ends the run; none is retried.
#[derive(Error, Debug)]
pub enum FailureReason {
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),
    #[error("application logged an error: {line}")]
    ApplicationError { line: String },
    #[error("not quiescent after {}s", .after.as_secs())]
    Timeout { after: Duration },
    #[error("process exited before launching")]
    ProcessExitedPrematurely,
    #[error("failed to start application: {0:#}")]
    SpawnFailed(anyhow::Error),
    #[error("run interrupted")]
    Interrupted,
}

impl FailureReason {
    /// Stable short name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Provisioning(_) => "provisioning_failure",
            FailureReason::ApplicationError { .. } => "application_error",
            FailureReason::Timeout { .. } => "timeout",
            FailureReason::ProcessExitedPrematurely => "process_exited_prematurely",
            FailureReason::SpawnFailed(_) => "spawn_failed",
            FailureReason::Interrupted => "interrupted",
        }
    }
}

/// Terminal result of one run, created once by whichever condition is hit first.
#[derive(Debug)]
pub enum RunOutcome {
    Success(Duration),
    Failure(FailureReason),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success(_))
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Report {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_sec: f64,
}

impl Report {
    /// `elapsed` is the whole run, provisioning included.
    pub fn new(outcome: &RunOutcome, elapsed: Duration) -> Self {
        match outcome {
            RunOutcome::Success(_) => Report {
                status: "success",
                kind: None,
                reason: None,
                duration_sec: elapsed.as_secs_f64(),
            },
            RunOutcome::Failure(reason) => Report {
                status: "failure",
                kind: Some(reason.kind()),
                reason: Some(reason.to_string()),
                duration_sec: elapsed.as_secs_f64(),
            },
        }
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_sec / 60.0
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing report")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))
    }
}
