// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::activity::ActivitySnapshot;
use crate::classifier::format_time_of_day;
use crate::clock::{Clock, time_of_day_elapsed};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use time::Time;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No launch marker yet; idle time is meaningless.
    AwaitingLaunch,
    Active { idle_for: Duration },
    Quiescent { idle_for: Duration },
}

/// Level-triggered decision for one tick. Quiescence needs the latch set and
/// strictly more than `idle_threshold` since the last activity.
pub fn evaluate(snapshot: &ActivitySnapshot, now: Time, idle_threshold: Duration) -> Verdict {
    if !snapshot.launched {
        return Verdict::AwaitingLaunch;
    }
    let idle_for = time_of_day_elapsed(snapshot.last_activity, now);
    if idle_for > idle_threshold {
        Verdict::Quiescent { idle_for }
    } else {
        Verdict::Active { idle_for }
    }
}

/// Polls the activity snapshot on a fixed period, independently of when
/// output lines arrive, until the process has launched and gone idle.
pub struct QuiescenceMonitor {
    activity: watch::Receiver<ActivitySnapshot>,
    clock: Arc<dyn Clock>,
    idle_threshold: Duration,
    poll_interval: Duration,
}

impl QuiescenceMonitor {
    pub fn new(
        activity: watch::Receiver<ActivitySnapshot>,
        clock: Arc<dyn Clock>,
        idle_threshold: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            activity,
            clock,
            idle_threshold,
            poll_interval,
        }
    }

    /// Resolves with the observed idle time once quiescence is reached. The
    /// first check happens one full period after the call.
    pub async fn run(self) -> Duration {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let snapshot = *self.activity.borrow();
            match evaluate(&snapshot, self.clock.now(), self.idle_threshold) {
                Verdict::AwaitingLaunch => debug!("waiting for launch marker"),
                Verdict::Active { idle_for } => debug!(
                    "launched, idle for {}s since {}",
                    idle_for.as_secs(),
                    format_time_of_day(snapshot.last_activity)
                ),
                Verdict::Quiescent { idle_for } => {
                    info!(
                        "quiescent: no activity since {} ({}s > {}s)",
                        format_time_of_day(snapshot.last_activity),
                        idle_for.as_secs(),
                        self.idle_threshold.as_secs_f64()
                    );
                    return idle_for;
                }
            }
        }
    }
}
