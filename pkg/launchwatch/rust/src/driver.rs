// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::clock::Clock;
use crate::config::{Config, ConfigError};
use crate::outcome::{FailureReason, Report, RunOutcome};
use crate::pipeline::{CommandProvisioner, Provisioner, provision};
use crate::supervisor::ProcessSupervisor;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// One end-to-end run: provision, launch, watch, report.
pub struct TestRun {
    config: Config,
    supervisor: ProcessSupervisor,
}

impl TestRun {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let supervisor = ProcessSupervisor::new(config.readiness.clone(), clock)?;
        Ok(Self { config, supervisor })
    }

    /// Run with the configured provisioning commands.
    pub async fn execute(&self, cancel: &CancellationToken) -> (RunOutcome, Report) {
        let deadline = Instant::now() + self.config.readiness.overall_timeout();
        let provisioner = CommandProvisioner::new(&self.config.provisioning, deadline);
        self.execute_with(&provisioner, deadline, cancel).await
    }

    /// The overall deadline covers provisioning as well as the watch.
    pub async fn execute_with<P: Provisioner>(
        &self,
        provisioner: &P,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> (RunOutcome, Report) {
        let started = Instant::now();
        let outcome = self.outcome(provisioner, deadline, cancel).await;
        let report = Report::new(&outcome, started.elapsed());

        info!("test duration: {:.2}m", report.duration_minutes());
        match outcome {
            RunOutcome::Success(_) => info!("[{}] run succeeded", self.config.app.name),
            RunOutcome::Failure(ref reason) => {
                error!("[{}] run failed: {reason}", self.config.app.name)
            }
        }
        (outcome, report)
    }

    async fn outcome<P: Provisioner>(
        &self,
        provisioner: &P,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let provisioned = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailureReason::Interrupted),
            r = provision(provisioner, &self.config.provisioning) => r.map_err(FailureReason::from),
            _ = sleep_until(deadline) => {
                warn!("provisioning still running at the run deadline");
                Err(FailureReason::Timeout {
                    after: self.config.readiness.overall_timeout(),
                })
            }
        };
        if let Err(reason) = provisioned {
            return RunOutcome::Failure(reason);
        }

        self.supervisor
            .run(self.config.app.clone(), deadline, cancel)
            .await
    }
}
