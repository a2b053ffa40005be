// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Watches the application's output until it has launched and gone idle, or
//! until something ends the run first.
//!
//! The output consumer is the only writer of the activity state and publishes
//! each change through a `watch` channel; the quiescence monitor only reads
//! the latest snapshot. Both run as branches of one `select!`, together with
//! the run deadline and cancellation, and the first branch to finish decides
//! the outcome.

use crate::activity::{ActivitySnapshot, ActivityTracker};
use crate::classifier::LineClassifier;
use crate::clock::Clock;
use crate::config::{AppConfig, ConfigError, ReadinessConfig};
use crate::monitor::QuiescenceMonitor;
use crate::outcome::{FailureReason, RunOutcome};
use crate::process::SupervisedProcess;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    ErrorLine(String),
    Closed { launched: bool },
}

/// Classify each line, fold it into the tracker and publish the snapshot.
/// Returns on the first error line or when the stream closes.
async fn consume_output<R>(
    name: &str,
    mut reader: R,
    classifier: &LineClassifier,
    mut tracker: ActivityTracker,
    activity: watch::Sender<ActivitySnapshot>,
    echo: bool,
) -> StreamEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("[{name}] reading output failed: {e}");
                break;
            }
        }

        let raw = String::from_utf8_lossy(&buf);
        let line = raw.trim_end_matches(['\n', '\r']);
        if echo {
            info!("[{name}] {line}");
        } else {
            debug!("[{name}] {line}");
        }

        let event = classifier.classify(line);
        if event.is_error {
            return StreamEnd::ErrorLine(line.to_string());
        }
        let was_launched = tracker.is_launched();
        tracker.observe(&event);
        if tracker.is_launched() && !was_launched {
            info!("[{name}] launch marker seen");
        }
        activity.send_if_modified(|current| {
            let next = tracker.snapshot();
            let changed = *current != next;
            *current = next;
            changed
        });
    }
    StreamEnd::Closed {
        launched: tracker.is_launched(),
    }
}

/// Log what the process still writes after the decision, until it closes.
async fn drain_output<R>(name: &str, reader: &mut R, echo: bool)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                let raw = String::from_utf8_lossy(&buf);
                let line = raw.trim_end_matches(['\n', '\r']);
                if echo {
                    info!("[{name}] {line}");
                } else {
                    debug!("[{name}] {line}");
                }
            }
        }
    }
}

/// Runs the application and decides, from its stdout alone, whether it came
/// up and went idle.
pub struct ProcessSupervisor {
    classifier: LineClassifier,
    readiness: ReadinessConfig,
    clock: Arc<dyn Clock>,
}

impl ProcessSupervisor {
    pub fn new(readiness: ReadinessConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        readiness.validate()?;
        Ok(Self {
            classifier: readiness.classifier()?,
            readiness,
            clock,
        })
    }

    /// Observe `reader` until quiescence (returns the idle time), an error
    /// line, a premature close, the deadline or cancellation.
    pub async fn watch<R>(
        &self,
        name: &str,
        reader: R,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Duration, FailureReason>
    where
        R: AsyncBufRead + Unpin,
    {
        let tracker = ActivityTracker::new(self.clock.now(), self.readiness.timestamp_policy);
        let (tx, rx) = watch::channel(tracker.snapshot());

        let monitor = QuiescenceMonitor::new(
            rx,
            Arc::clone(&self.clock),
            self.readiness.idle_threshold(),
            self.readiness.poll_interval(),
        )
        .run();
        let output = consume_output(
            name,
            reader,
            &self.classifier,
            tracker,
            tx,
            self.readiness.echo_output,
        );
        tokio::pin!(monitor);
        tokio::pin!(output);

        let mut output_open = true;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(FailureReason::Interrupted),
                end = &mut output, if output_open => match end {
                    StreamEnd::ErrorLine(line) => {
                        warn!("[{name}] error line: {line}");
                        return Err(FailureReason::ApplicationError { line });
                    }
                    StreamEnd::Closed { launched: false } => {
                        warn!("[{name}] output closed before the launch marker");
                        return Err(FailureReason::ProcessExitedPrematurely);
                    }
                    StreamEnd::Closed { launched: true } => {
                        info!("[{name}] output closed after launch, waiting for quiescence");
                        output_open = false;
                    }
                },
                idle = &mut monitor => return Ok(idle),
                _ = sleep_until(deadline) => {
                    return Err(FailureReason::Timeout {
                        after: self.readiness.overall_timeout(),
                    });
                }
            }
        }
    }

    /// Spawn the application, watch it, then interrupt it whatever the
    /// result. Only a timeout or cancellation escalates to SIGKILL.
    pub async fn run(
        &self,
        app: AppConfig,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut process = SupervisedProcess::new(app);
        let stdout = match process.spawn() {
            Ok(stdout) => stdout,
            Err(e) => return RunOutcome::Failure(FailureReason::SpawnFailed(e)),
        };

        let name = process.name.clone();
        let mut stdout = BufReader::new(stdout);
        let result = self.watch(&name, &mut stdout, deadline, cancel).await;

        let force = matches!(
            result,
            Err(FailureReason::Timeout { .. } | FailureReason::Interrupted)
        );
        // The pipe stays open until the child is gone, so whatever it logs
        // while shutting down does not hit EPIPE.
        let terminate = process.terminate(self.readiness.stop_timeout(), force);
        let drain = drain_output(&name, &mut stdout, self.readiness.echo_output);
        tokio::pin!(terminate);
        tokio::pin!(drain);
        let mut draining = true;
        loop {
            tokio::select! {
                biased;

                _ = &mut terminate => break,
                _ = &mut drain, if draining => draining = false,
            }
        }

        match result {
            Ok(idle) => {
                info!(
                    "[{name}] launched and idle for {}s, done after {}s",
                    idle.as_secs(),
                    started.elapsed().as_secs()
                );
                RunOutcome::Success(started.elapsed())
            }
            Err(reason) => RunOutcome::Failure(reason),
        }
    }
}
