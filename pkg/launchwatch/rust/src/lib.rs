// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod activity;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod driver;
mod env;
pub mod monitor;
pub mod outcome;
pub mod pipeline;
pub mod process;
pub mod supervisor;

pub use classifier::{ClassifiedEvent, LineClassifier};
pub use config::Config;
pub use driver::TestRun;
pub use outcome::{FailureReason, Report, RunOutcome};
