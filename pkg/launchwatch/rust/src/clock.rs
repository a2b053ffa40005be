// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::warn;
use std::time::Duration;
use time::{OffsetDateTime, Time, UtcOffset};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HALF_DAY: Duration = Duration::from_secs(12 * 60 * 60);

/// Source of the current wall-clock time of day, in the same zone as the
/// timestamps the supervised process writes.
pub trait Clock: Send + Sync {
    fn now(&self) -> Time;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn utc() -> Self {
        Self {
            offset: UtcOffset::UTC,
        }
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Must run before any other thread is spawned: `time` refuses to read
    /// the local offset from a multi-threaded process on unix.
    pub fn local() -> Self {
        match UtcOffset::current_local_offset() {
            Ok(offset) => Self { offset },
            Err(e) => {
                warn!("could not determine local UTC offset ({e}), using UTC");
                Self::utc()
            }
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Time {
        OffsetDateTime::now_utc().to_offset(self.offset).time()
    }
}

/// Time of day that starts at `base` and advances with tokio's clock, so it
/// follows `tokio::time::pause`/`advance` in tests.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    base: Time,
    origin: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(base: Time) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> Time {
        self.base + self.origin.elapsed()
    }
}

/// Time elapsed from `earlier` to `later` on a 24-hour dial.
///
/// A gap of more than twelve hours backwards is a midnight rollover. A smaller
/// backwards gap means the log clock runs ahead of ours and counts as zero.
pub fn time_of_day_elapsed(earlier: Time, later: Time) -> Duration {
    let delta = later - earlier;
    if delta.is_negative() {
        let behind = delta.unsigned_abs();
        if behind > HALF_DAY {
            DAY - behind
        } else {
            Duration::ZERO
        }
    } else {
        delta.unsigned_abs()
    }
}
