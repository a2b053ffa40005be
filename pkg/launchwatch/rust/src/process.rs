// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::AppConfig;
use crate::env::app_environment;
use anyhow::{Context, Result, bail};
use log::{info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{Duration, timeout};

const SIGKILL_TIMEOUT: Duration = Duration::from_secs(10);

/// The application under test. At most one child is alive per instance.
pub struct SupervisedProcess {
    pub name: String,
    config: AppConfig,
    child: Option<Child>,
}

impl SupervisedProcess {
    pub fn new(config: AppConfig) -> Self {
        Self {
            name: config.name.clone(),
            config,
            child: None,
        }
    }

    /// Start the child with stdout piped and hand the pipe back to the caller.
    pub fn spawn(&mut self) -> Result<ChildStdout> {
        if self.child.is_some() {
            bail!("[{}] already running", self.name);
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.envs(app_environment(&self.config)?);

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(stdio_from_str(&self.config.stderr));

        let mut child = cmd
            .spawn()
            .with_context(|| format!("[{}] failed to spawn: {}", self.name, self.config.command))?;
        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("[{}] stdout was not captured", self.name))?;

        let pid = child.id().unwrap_or(0);
        info!(
            "[{}] spawned (pid={}, cmd={})",
            self.name, pid, self.config.command
        );
        self.child = Some(child);
        Ok(stdout)
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn send_signal(&self, sig: Signal) {
        let Some(pid) = self.pid() else {
            return;
        };
        let Ok(raw) = i32::try_from(pid) else {
            warn!("[{}] pid {pid} out of range, not sending {sig}", self.name);
            return;
        };
        if let Err(e) = signal::kill(Pid::from_raw(raw), sig) {
            warn!("[{}] failed to send {sig}: {e}", self.name);
        }
    }

    /// Wait for the child to exit. Returns the exit status.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        let child = self.child.as_mut().context("no child process to wait on")?;
        let status = child.wait().await?;
        info!("[{}] exited with {status}", self.name);
        self.child = None;
        Ok(status)
    }

    /// Send SIGINT once and wait up to `grace` for the child to exit. With
    /// `force`, a child still alive after that gets SIGKILL. Problems are
    /// logged, never returned.
    pub async fn terminate(&mut self, grace: Duration, force: bool) {
        if !self.is_running() {
            return;
        }
        info!("[{}] sending SIGINT", self.name);
        self.send_signal(Signal::SIGINT);

        match timeout(grace, self.wait()).await {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => {
                warn!("[{}] failed to wait for exit: {e:#}", self.name);
                return;
            }
            Err(_) if !force => {
                warn!(
                    "[{}] still running {}s after SIGINT, leaving it",
                    self.name,
                    grace.as_secs_f64()
                );
                return;
            }
            Err(_) => warn!(
                "[{}] still running {}s after SIGINT, sending SIGKILL",
                self.name,
                grace.as_secs_f64()
            ),
        }

        self.send_signal(Signal::SIGKILL);
        if timeout(SIGKILL_TIMEOUT, self.wait()).await.is_err() {
            warn!("[{}] still running after SIGKILL, giving up", self.name);
        }
    }
}

fn stdio_from_str(s: &str) -> Stdio {
    match s {
        "null" => Stdio::null(),
        _ => Stdio::inherit(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    pub(crate) fn make_config(command: &str, args: Vec<&str>) -> AppConfig {
        let mut cfg = AppConfig::new(command, args.into_iter().map(String::from).collect());
        cfg.name = "test".to_string();
        cfg.stderr = "null".to_string();
        cfg
    }

    // -- spawn tests --

    #[tokio::test]
    async fn test_spawn_and_is_running() {
        let mut proc = SupervisedProcess::new(make_config("/bin/sleep", vec!["60"]));

        assert!(!proc.is_running());
        let _stdout = proc.spawn().unwrap();
        assert!(proc.is_running());
        assert!(proc.pid().is_some());

        proc.send_signal(Signal::SIGKILL);
        let status = proc.wait().await.unwrap();
        assert!(!status.success());
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn test_spawn_twice_is_rejected() {
        let mut proc = SupervisedProcess::new(make_config("/bin/sleep", vec!["60"]));
        let _stdout = proc.spawn().unwrap();
        assert!(proc.spawn().is_err());
        proc.terminate(Duration::from_secs(5), true).await;
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_binary() {
        let mut proc = SupervisedProcess::new(make_config("/nonexistent/binary", vec![]));
        assert!(proc.spawn().is_err());
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn test_spawn_with_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = make_config("/bin/sh", vec!["-c", "echo \"$BOT_PORT $(pwd)\""]);
        cfg.env.insert("BOT_PORT".to_string(), "3000".to_string());
        cfg.working_dir = Some(dir.path().to_path_buf());

        let mut proc = SupervisedProcess::new(cfg);
        let stdout = proc.spawn().unwrap();
        let line = BufReader::new(stdout)
            .lines()
            .next_line()
            .await
            .unwrap()
            .unwrap();
        let expected_dir = dir.path().canonicalize().unwrap();
        assert_eq!(line, format!("3000 {}", expected_dir.display()));
        assert!(proc.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_spawn_exit_code() {
        let mut proc = SupervisedProcess::new(make_config("/bin/sh", vec!["-c", "exit 7"]));
        let _stdout = proc.spawn().unwrap();
        let status = proc.wait().await.unwrap();
        assert_eq!(status.code(), Some(7));
    }

    // -- signal tests --

    #[test]
    fn test_send_signal_no_child_does_not_panic() {
        let proc = SupervisedProcess::new(make_config("/usr/bin/true", vec![]));
        proc.send_signal(Signal::SIGINT);
    }

    // -- terminate tests --

    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut proc = SupervisedProcess::new(make_config("/bin/sleep", vec!["60"]));
        let _stdout = proc.spawn().unwrap();

        proc.terminate(Duration::from_secs(5), false).await;
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn test_terminate_not_running_is_noop() {
        let mut proc = SupervisedProcess::new(make_config("/usr/bin/true", vec![]));
        proc.terminate(Duration::from_secs(1), true).await;
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn test_terminate_ignored_sigint_is_left_running() {
        let mut proc = SupervisedProcess::new(make_config(
            "/bin/sh",
            vec!["-c", "trap '' INT; sleep 60"],
        ));
        let _stdout = proc.spawn().unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        proc.terminate(Duration::from_millis(500), false).await;
        assert!(proc.is_running(), "SIGINT alone must not kill a stubborn child");

        proc.send_signal(Signal::SIGKILL);
        proc.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_forced_sigkill() {
        let mut proc = SupervisedProcess::new(make_config(
            "/bin/sh",
            vec!["-c", "trap '' INT; sleep 60"],
        ));
        let _stdout = proc.spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        proc.terminate(Duration::from_millis(500), true).await;
        assert!(!proc.is_running());
    }
}
