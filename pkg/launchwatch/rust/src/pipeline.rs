// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::{CommandSpec, ProvisioningConfig};
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{Instant, timeout_at};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Clean,
    Build,
    Init,
    Configure,
    Install,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Clean => write!(f, "clean"),
            Step::Build => write!(f, "build"),
            Step::Init => write!(f, "init"),
            Step::Configure => write!(f, "configure"),
            Step::Install => write!(f, "install"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("[{step}] failed to spawn {command}: {source}")]
    Spawn {
        step: Step,
        command: String,
        source: std::io::Error,
    },
    #[error("[{step}] {command} exited with {status}")]
    Failed {
        step: Step,
        command: String,
        status: ExitStatus,
    },
    #[error("[{step}] {context}: {source}")]
    Io {
        step: Step,
        context: String,
        source: std::io::Error,
    },
    #[error("[{step}] did not finish before the run deadline")]
    TimedOut { step: Step },
}

impl ProvisionError {
    pub fn step(&self) -> Step {
        match self {
            ProvisionError::Spawn { step, .. }
            | ProvisionError::Failed { step, .. }
            | ProvisionError::Io { step, .. }
            | ProvisionError::TimedOut { step } => *step,
        }
    }
}

/// The external steps that turn sources into a runnable application. Each
/// step either succeeds or fails; none is retried.
pub trait Provisioner {
    fn build(&self) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    fn init(&self, target_dir: &Path) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    fn configure(
        &self,
        target_dir: &Path,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    fn install_dependencies(
        &self,
        target_dir: &Path,
        packages: &[String],
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;
}

/// Runs the configured commands. Steps left out of the config succeed
/// without doing anything.
pub struct CommandProvisioner {
    build: Option<CommandSpec>,
    init: Option<CommandSpec>,
    config_dir: Option<PathBuf>,
    install: Option<CommandSpec>,
    deadline: Instant,
}

impl CommandProvisioner {
    pub fn new(config: &ProvisioningConfig, deadline: Instant) -> Self {
        Self {
            build: config.build.clone(),
            init: config.init.clone(),
            config_dir: config.config_dir.clone(),
            install: config.install.clone(),
            deadline,
        }
    }

    async fn run_step(
        &self,
        step: Step,
        spec: &CommandSpec,
        extra_args: &[String],
        default_dir: Option<&Path>,
    ) -> Result<(), ProvisionError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args).args(extra_args).envs(&spec.env);
        if let Some(dir) = spec.working_dir.as_deref().or(default_dir) {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        // Dropped on deadline; the step's process must not outlive the run.
        cmd.kill_on_drop(true);

        info!("[{step}] running {} {}", spec.command, spec.args.join(" "));
        let mut child = cmd.spawn().map_err(|source| ProvisionError::Spawn {
            step,
            command: spec.command.clone(),
            source,
        })?;

        let status = match timeout_at(self.deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                return Err(ProvisionError::Io {
                    step,
                    context: format!("waiting for {}", spec.command),
                    source,
                });
            }
            Err(_) => return Err(ProvisionError::TimedOut { step }),
        };

        info!("[{step}] exited with {status}");
        if status.success() {
            Ok(())
        } else {
            Err(ProvisionError::Failed {
                step,
                command: spec.command.clone(),
                status,
            })
        }
    }
}

impl Provisioner for CommandProvisioner {
    async fn build(&self) -> Result<(), ProvisionError> {
        match self.build {
            Some(ref spec) => self.run_step(Step::Build, spec, &[], None).await,
            None => Ok(()),
        }
    }

    async fn init(&self, target_dir: &Path) -> Result<(), ProvisionError> {
        match self.init {
            Some(ref spec) => {
                let target = vec![target_dir.display().to_string()];
                self.run_step(Step::Init, spec, &target, None).await
            }
            None => Ok(()),
        }
    }

    async fn configure(&self, target_dir: &Path) -> Result<(), ProvisionError> {
        match self.config_dir {
            Some(ref src) => {
                let src = src.clone();
                let target_dir = target_dir.to_path_buf();
                tokio::task::spawn_blocking(move || copy_config_dir(&src, &target_dir))
                    .await
                    .map_err(|e| ProvisionError::Io {
                        step: Step::Configure,
                        context: "copy task".to_string(),
                        source: std::io::Error::other(e),
                    })?
            }
            None => Ok(()),
        }
    }

    async fn install_dependencies(
        &self,
        target_dir: &Path,
        packages: &[String],
    ) -> Result<(), ProvisionError> {
        match self.install {
            Some(ref spec) => {
                self.run_step(Step::Install, spec, packages, Some(target_dir))
                    .await
            }
            None => Ok(()),
        }
    }
}

fn io_err(context: String) -> impl FnOnce(std::io::Error) -> ProvisionError {
    move |source| ProvisionError::Io {
        step: Step::Configure,
        context,
        source,
    }
}

/// Copy `src` into `target_dir/<name of src>`, replacing an existing copy.
fn copy_config_dir(src: &Path, target_dir: &Path) -> Result<(), ProvisionError> {
    let name = src.file_name().ok_or_else(|| ProvisionError::Io {
        step: Step::Configure,
        context: format!("config_dir has no name: {}", src.display()),
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;
    let dest = target_dir.join(name);
    if dest.exists() {
        debug!("[{}] removing {}", Step::Configure, dest.display());
        std::fs::remove_dir_all(&dest)
            .map_err(io_err(format!("removing {}", dest.display())))?;
    }

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| ProvisionError::Io {
            step: Step::Configure,
            context: format!("walking {}", src.display()),
            source: e.into(),
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ProvisionError::Io {
                step: Step::Configure,
                context: format!("relative path of {}", entry.path().display()),
                source: std::io::Error::other(e),
            })?;
        let out = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out).map_err(io_err(format!("creating {}", out.display())))?;
        } else {
            std::fs::copy(entry.path(), &out)
                .map_err(io_err(format!("copying {}", entry.path().display())))?;
        }
    }
    info!(
        "[{}] copied {} to {}",
        Step::Configure,
        src.display(),
        dest.display()
    );
    Ok(())
}

/// Remove a previous run's target directory.
pub fn clean_target(target_dir: &Path) -> Result<(), ProvisionError> {
    if !target_dir.exists() {
        return Ok(());
    }
    info!("[{}] removing {}", Step::Clean, target_dir.display());
    std::fs::remove_dir_all(target_dir).map_err(|source| ProvisionError::Io {
        step: Step::Clean,
        context: format!("removing {}", target_dir.display()),
        source,
    })
}

/// Run every step in order, stopping at the first failure. Earlier steps are
/// not undone.
pub async fn provision<P: Provisioner>(
    provisioner: &P,
    config: &ProvisioningConfig,
) -> Result<(), ProvisionError> {
    if config.clean
        && let Some(ref dir) = config.target_dir
    {
        clean_target(dir)?;
    }

    provisioner.build().await.inspect_err(log_failure)?;

    if let Some(ref dir) = config.target_dir {
        provisioner.init(dir).await.inspect_err(log_failure)?;
        provisioner.configure(dir).await.inspect_err(log_failure)?;
        provisioner
            .install_dependencies(dir, &config.packages)
            .await
            .inspect_err(log_failure)?;
    }
    Ok(())
}

fn log_failure(e: &ProvisionError) {
    warn!("provisioning stopped at {}: {e}", e.step());
}
