// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::activity::TimestampPolicy;
use crate::classifier::{DEFAULT_ERROR_PHRASE, DEFAULT_LAUNCH_PHRASE, LineClassifier};
use crate::monitor::{DEFAULT_IDLE_THRESHOLD, DEFAULT_POLL_INTERVAL};
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "launchwatch.yaml";
pub const CONFIG_ENV_VAR: &str = "LAUNCHWATCH_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_true() -> bool {
    true
}

fn default_inherit() -> String {
    "inherit".to_string()
}

fn default_app_name() -> String {
    "app".to_string()
}

fn default_launch_phrase() -> String {
    DEFAULT_LAUNCH_PHRASE.to_string()
}

fn default_error_phrase() -> String {
    DEFAULT_ERROR_PHRASE.to_string()
}

fn default_idle_threshold_sec() -> f64 {
    DEFAULT_IDLE_THRESHOLD.as_secs_f64()
}

fn default_poll_interval_sec() -> f64 {
    DEFAULT_POLL_INTERVAL.as_secs_f64()
}

fn default_overall_timeout_sec() -> f64 {
    20.0 * 60.0
}

fn default_stop_timeout_sec() -> f64 {
    10.0
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

/// The application under test.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub environment_file: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_inherit")]
    pub stderr: String,
}

impl AppConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: default_app_name(),
            command: command.into(),
            args,
            env: HashMap::new(),
            environment_file: None,
            working_dir: None,
            stderr: default_inherit(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub launch_phrase: String,
    pub error_phrase: String,
    pub idle_threshold_sec: f64,
    pub poll_interval_sec: f64,
    pub overall_timeout_sec: f64,
    pub stop_timeout_sec: f64,
    pub timestamp_policy: TimestampPolicy,
    pub clock: ClockSource,
    pub echo_output: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            launch_phrase: default_launch_phrase(),
            error_phrase: default_error_phrase(),
            idle_threshold_sec: default_idle_threshold_sec(),
            poll_interval_sec: default_poll_interval_sec(),
            overall_timeout_sec: default_overall_timeout_sec(),
            stop_timeout_sec: default_stop_timeout_sec(),
            timestamp_policy: TimestampPolicy::default(),
            clock: ClockSource::default(),
            echo_output: default_true(),
        }
    }
}

impl ReadinessConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.idle_threshold_sec)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_sec)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.overall_timeout_sec)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stop_timeout_sec)
    }

    pub fn classifier(&self) -> Result<LineClassifier, ConfigError> {
        LineClassifier::new(&self.launch_phrase, &self.error_phrase)
            .map_err(|e| ConfigError::Invalid(format!("readiness phrases: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in [
            ("idle_threshold_sec", self.idle_threshold_sec),
            ("poll_interval_sec", self.poll_interval_sec),
            ("overall_timeout_sec", self.overall_timeout_sec),
            ("stop_timeout_sec", self.stop_timeout_sec),
        ] {
            // Also bounds the value for Duration::from_secs_f64.
            if !secs.is_finite() || secs <= 0.0 || secs > u32::MAX as f64 {
                return Err(ConfigError::Invalid(format!(
                    "readiness.{name} must be a positive number of seconds, got {secs}"
                )));
            }
        }
        if self.launch_phrase.is_empty() {
            return Err(ConfigError::Invalid(
                "readiness.launch_phrase must not be empty".into(),
            ));
        }
        if self.error_phrase.is_empty() {
            return Err(ConfigError::Invalid(
                "readiness.error_phrase must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// An external command run as one provisioning step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    pub target_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub clean: bool,
    pub build: Option<CommandSpec>,
    pub init: Option<CommandSpec>,
    pub config_dir: Option<PathBuf>,
    pub install: Option<CommandSpec>,
    #[serde(default)]
    pub packages: Vec<String>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            target_dir: None,
            clean: true,
            build: None,
            init: None,
            config_dir: None,
            install: None,
            packages: Vec::new(),
        }
    }
}

impl ProvisioningConfig {
    pub fn has_steps(&self) -> bool {
        self.build.is_some()
            || self.init.is_some()
            || self.config_dir.is_some()
            || self.install.is_some()
    }
}

/// `--config` wins, then `LAUNCHWATCH_CONFIG`, then `./launchwatch.yaml`.
pub fn config_path(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&contents, base).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse, resolve relative paths against `base_dir`, and validate.
    pub fn from_yaml(contents: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.command.trim().is_empty() {
            return Err(ConfigError::Invalid("app.command must not be empty".into()));
        }
        if !matches!(self.app.stderr.as_str(), "inherit" | "null") {
            return Err(ConfigError::Invalid(format!(
                "app.stderr must be inherit or null, got {}",
                self.app.stderr
            )));
        }
        self.readiness.validate()?;
        let p = &self.provisioning;
        if p.target_dir.is_none() && (p.init.is_some() || p.config_dir.is_some() || p.install.is_some())
        {
            return Err(ConfigError::Invalid(
                "provisioning.target_dir is required by init, config_dir and install".into(),
            ));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        let prov = &mut self.provisioning;
        prov.target_dir.iter_mut().for_each(resolve);
        prov.config_dir.iter_mut().for_each(resolve);
        for spec in [&mut prov.build, &mut prov.init, &mut prov.install]
            .into_iter()
            .flatten()
        {
            spec.working_dir.iter_mut().for_each(resolve);
        }

        self.app.environment_file.iter_mut().for_each(resolve);
        self.app.working_dir.iter_mut().for_each(resolve);
        if self.app.working_dir.is_none() {
            self.app.working_dir = self.provisioning.target_dir.clone();
        }
        debug!(
            "resolved app working_dir: {:?}, target_dir: {:?}",
            self.app.working_dir, self.provisioning.target_dir
        );
    }
}
