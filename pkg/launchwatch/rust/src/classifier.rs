// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::LazyLock;
use time::Time;
use time::macros::format_description;

pub const DEFAULT_LAUNCH_PHRASE: &str = "Bot launched";
pub const DEFAULT_ERROR_PHRASE: &str = "error";

/// `hour:minute:second`, no date, no timezone.
#[allow(clippy::expect_used)]
static TIME_OF_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2}):(\d{1,2}):(\d{1,2})").expect("time-of-day pattern is valid")
});

/// What a single output line says about the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub timestamp: Option<Time>,
    pub is_error: bool,
    pub is_launch_marker: bool,
}

impl fmt::Display for ClassifiedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "timestamp={}", format_time_of_day(ts))?,
            None => write!(f, "timestamp=-")?,
        }
        write!(
            f,
            " error={} launched={}",
            self.is_error, self.is_launch_marker
        )
    }
}

/// Matches the configured readiness and error phrases, case-insensitively,
/// and pulls the first valid time of day out of a line.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    error: Regex,
    launched: Regex,
}

impl LineClassifier {
    pub fn new(launch_phrase: &str, error_phrase: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            error: literal_ci(error_phrase)?,
            launched: literal_ci(launch_phrase)?,
        })
    }

    pub fn classify(&self, line: &str) -> ClassifiedEvent {
        ClassifiedEvent {
            timestamp: extract_time_of_day(line),
            is_error: self.error.is_match(line),
            is_launch_marker: self.launched.is_match(line),
        }
    }
}

impl Default for LineClassifier {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self::new(DEFAULT_LAUNCH_PHRASE, DEFAULT_ERROR_PHRASE)
            .expect("default phrases are plain literals")
    }
}

fn literal_ci(phrase: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&regex::escape(phrase))
        .case_insensitive(true)
        .build()
}

/// First `H:M:S` substring that forms a valid 24-hour time of day.
pub fn extract_time_of_day(line: &str) -> Option<Time> {
    TIME_OF_DAY.captures_iter(line).find_map(|caps| {
        let hour = caps.get(1)?.as_str().parse().ok()?;
        let minute = caps.get(2)?.as_str().parse().ok()?;
        let second = caps.get(3)?.as_str().parse().ok()?;
        Time::from_hms(hour, minute, second).ok()
    })
}

pub fn format_time_of_day(t: Time) -> String {
    t.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| t.to_string())
}
