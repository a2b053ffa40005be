// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::classifier::ClassifiedEvent;
use crate::clock::time_of_day_elapsed;
use serde::Deserialize;
use std::fmt;
use time::Time;

/// How a parsed log timestamp moves the activity clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    /// Every parsed timestamp becomes the last activity, even an earlier one.
    #[default]
    Latest,
    /// Only timestamps later than the current value move the clock. "Later"
    /// is read on the 24-hour dial, so a rollover past midnight still counts.
    Monotonic,
}

impl fmt::Display for TimestampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampPolicy::Latest => write!(f, "latest"),
            TimestampPolicy::Monotonic => write!(f, "monotonic"),
        }
    }
}

/// Time of day of the most recent log activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityClock {
    last: Time,
    policy: TimestampPolicy,
}

impl ActivityClock {
    pub fn new(start: Time, policy: TimestampPolicy) -> Self {
        Self {
            last: start,
            policy,
        }
    }

    pub fn record(&mut self, ts: Time) {
        match self.policy {
            TimestampPolicy::Latest => self.last = ts,
            TimestampPolicy::Monotonic => {
                if !time_of_day_elapsed(self.last, ts).is_zero() {
                    self.last = ts;
                }
            }
        }
    }

    pub fn last_activity(&self) -> Time {
        self.last
    }
}

/// Flips once, on the first launch marker, and never resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchLatch(bool);

impl LaunchLatch {
    pub fn set(&mut self) {
        self.0 = true;
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}

/// The `(launched, last_activity)` pair read by the quiescence monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub launched: bool,
    pub last_activity: Time,
}

/// Folds classified lines into the activity clock and launch latch. Owned by
/// the task that reads the process output; nothing else writes to it.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    clock: ActivityClock,
    latch: LaunchLatch,
}

impl ActivityTracker {
    pub fn new(start: Time, policy: TimestampPolicy) -> Self {
        Self {
            clock: ActivityClock::new(start, policy),
            latch: LaunchLatch::default(),
        }
    }

    pub fn observe(&mut self, event: &ClassifiedEvent) {
        if let Some(ts) = event.timestamp {
            self.clock.record(ts);
        }
        if event.is_launch_marker {
            self.latch.set();
        }
    }

    pub fn is_launched(&self) -> bool {
        self.latch.is_set()
    }

    pub fn last_activity(&self) -> Time {
        self.clock.last_activity()
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            launched: self.is_launched(),
            last_activity: self.last_activity(),
        }
    }
}
