// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use launchwatch::clock::{Clock, SystemClock};
use launchwatch::config::{AppConfig, ClockSource, ProvisioningConfig, ReadinessConfig};
use launchwatch::{Config, LineClassifier, TestRun};
use log::{LevelFilter, error, info};
use simple_logger::SimpleLogger;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "launchwatch", version)]
#[command(about = "Provision an application, launch it and wait until its output goes quiet", long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision and watch the application described by a config file
    Run {
        /// Config file (defaults to $LAUNCHWATCH_CONFIG, then ./launchwatch.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Watch an already provisioned command, without a config file
    Watch {
        /// Name used to prefix the command's output
        #[arg(long, default_value = "app")]
        name: String,

        #[arg(long)]
        launch_phrase: Option<String>,

        #[arg(long)]
        error_phrase: Option<String>,

        /// Compare log timestamps against UTC instead of local time
        #[arg(long)]
        utc: bool,

        #[command(flatten)]
        overrides: Overrides,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Classify lines read from stdin, one event per line
    Classify {
        #[arg(long)]
        launch_phrase: Option<String>,

        #[arg(long)]
        error_phrase: Option<String>,
    },
}

#[derive(Args, Debug)]
struct Overrides {
    /// Seconds without activity after launch before the run succeeds
    #[arg(long)]
    idle_threshold: Option<f64>,

    /// Seconds between quiescence checks
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Seconds before the whole run is abandoned
    #[arg(long)]
    timeout: Option<f64>,

    /// Write a JSON report of the outcome to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, readiness: &mut ReadinessConfig) {
        if let Some(v) = self.idle_threshold {
            readiness.idle_threshold_sec = v;
        }
        if let Some(v) = self.poll_interval {
            readiness.poll_interval_sec = v;
        }
        if let Some(v) = self.timeout {
            readiness.overall_timeout_sec = v;
        }
    }
}

fn phrases(launch: Option<String>, error: Option<String>) -> ReadinessConfig {
    let mut readiness = ReadinessConfig::default();
    if let Some(p) = launch {
        readiness.launch_phrase = p;
    }
    if let Some(p) = error {
        readiness.error_phrase = p;
    }
    readiness
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level: LevelFilter = cli
        .log_level
        .parse()
        .map_err(|e| anyhow!("invalid --log-level {}: {e}", cli.log_level))?;
    SimpleLogger::new().with_level(level).init()?;

    let (config, report) = match cli.command {
        Command::Run { config, overrides } => {
            let path = launchwatch::config::config_path(config);
            let mut config = Config::load(&path)?;
            overrides.apply(&mut config.readiness);
            (config, overrides.report)
        }
        Command::Watch {
            name,
            launch_phrase,
            error_phrase,
            utc,
            overrides,
            command,
        } => {
            let (program, args) = command.split_first().context("no command to watch")?;
            let mut app = AppConfig::new(program.clone(), args.to_vec());
            app.name = name;
            let mut readiness = phrases(launch_phrase, error_phrase);
            if utc {
                readiness.clock = ClockSource::Utc;
            }
            overrides.apply(&mut readiness);
            let config = Config {
                app,
                readiness,
                provisioning: ProvisioningConfig::default(),
            };
            (config, overrides.report)
        }
        Command::Classify {
            launch_phrase,
            error_phrase,
        } => return classify(phrases(launch_phrase, error_phrase)),
    };
    config.validate()?;

    // The local offset has to be read before the runtime starts its threads.
    let clock: Arc<dyn Clock> = match config.readiness.clock {
        ClockSource::Local => Arc::new(SystemClock::local()),
        ClockSource::Utc => Arc::new(SystemClock::utc()),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let success = runtime.block_on(run(config, clock, report))?;

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(config: Config, clock: Arc<dyn Clock>, report: Option<PathBuf>) -> Result<bool> {
    info!(
        "launchwatch starting (version {}) for {}",
        env!("CARGO_PKG_VERSION"),
        config.app.name
    );
    let cancel = CancellationToken::new();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        token.cancel();
    });

    let test_run = TestRun::new(config, clock)?;
    let (outcome, summary) = test_run.execute(&cancel).await;

    if let Some(path) = report {
        if let Err(e) = summary.write_json(&path) {
            error!("{e:#}");
        } else {
            info!("report written to {}", path.display());
        }
    }
    Ok(outcome.is_success())
}

#[allow(clippy::print_stdout)]
fn classify(readiness: ReadinessConfig) -> Result<ExitCode> {
    readiness.validate()?;
    let classifier: LineClassifier = readiness.classifier()?;
    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        println!("{}", classifier.classify(&line));
    }
    Ok(ExitCode::SUCCESS)
}
