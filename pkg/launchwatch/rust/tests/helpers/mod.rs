// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to a running launchwatch binary. Collects everything it logs.
pub struct LaunchwatchHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _readers: Vec<std::thread::JoinHandle<()>>,
}

fn collect<R: Read + Send + 'static>(
    stream: R,
    tag: &'static str,
    lines: Arc<Mutex<Vec<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(l) => {
                    eprintln!("[{tag}] {l}");
                    lines.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

impl LaunchwatchHandle {
    /// Start `launchwatch <args..>` with stdin closed.
    pub fn start(args: &[&str]) -> Self {
        Self::start_with_stdin(args, None)
    }

    pub fn start_with_stdin(args: &[&str], stdin: Option<&str>) -> Self {
        let bin = env!("CARGO_BIN_EXE_launchwatch");
        let mut child = Command::new(bin)
            .args(args)
            .env_remove("LAUNCHWATCH_CONFIG")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start launchwatch");

        if let Some(input) = stdin {
            let mut pipe = child.stdin.take().expect("failed to capture stdin");
            pipe.write_all(input.as_bytes())
                .expect("failed to write stdin");
        }

        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let readers = vec![
            collect(stdout, "launchwatch", Arc::clone(&log_lines)),
            collect(stderr, "launchwatch:err", Arc::clone(&log_lines)),
        ];

        Self {
            child,
            log_lines,
            _readers: readers,
        }
    }

    /// Run `launchwatch run --config <config> <extra..>` to completion.
    pub fn run_config(config: &Path, extra: &[&str]) -> (ExitStatus, Self) {
        let config = config.to_str().expect("non-UTF-8 config path");
        let mut args = vec!["run", "--config", config];
        args.extend_from_slice(extra);
        let mut handle = Self::start(&args);
        let status = handle.wait_with_timeout(DEFAULT_TIMEOUT);
        (status, handle)
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_log(pattern) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn has_log(&self, pattern: &str) -> bool {
        self.log_lines
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.contains(pattern))
    }

    pub fn lines(&self) -> Vec<String> {
        self.log_lines.lock().unwrap().clone()
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = i32::try_from(self.child.id()).expect("pid out of range");
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to launchwatch");
    }

    /// Wait for launchwatch to exit, killing it after `timeout`. Gives the
    /// reader threads a moment to drain the pipes.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        let status = loop {
            match self
                .child
                .try_wait()
                .expect("failed to check launchwatch status")
            {
                Some(status) => break status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        panic!("launchwatch did not exit within {timeout:?}");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        };
        for reader in self._readers.drain(..) {
            reader.join().ok();
        }
        status
    }

    /// Extract the application PID from the "spawned (pid=NNN" log line.
    pub fn spawned_pid(&self) -> Option<u32> {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().find_map(|l| {
            let marker = "spawned (pid=";
            let start = l.find(marker)? + marker.len();
            let end = l[start..].find(|c: char| !c.is_ascii_digit())? + start;
            l[start..end].parse().ok()
        })
    }
}

impl Drop for LaunchwatchHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Write `launchwatch.yaml` into `dir` and return its path.
pub fn write_config(dir: &Path, yaml: &str) -> std::path::PathBuf {
    let path = dir.join("launchwatch.yaml");
    std::fs::write(&path, yaml)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    path
}

/// A config running `/bin/sh -c <script>` with fast readiness settings.
pub fn script_config(script: &str, extra: &str) -> String {
    format!(
        r#"app:
  name: bot
  command: /bin/sh
  args:
    - -c
    - '{script}'
  stderr: "null"
readiness:
  idle_threshold_sec: 0.5
  poll_interval_sec: 0.1
  overall_timeout_sec: 20
  stop_timeout_sec: 5
  clock: utc
{extra}"#
    )
}

pub fn read_report(path: &Path) -> serde_json::Value {
    let contents = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
    serde_json::from_str(&contents).expect("report is not valid JSON")
}

fn pid_is_alive(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|pid| signal::kill(Pid::from_raw(pid), None).is_ok())
}

/// Wait until a PID is no longer alive, or timeout.
pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
