// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::collections::HashMap;

/// One `KEY=VALUE` entry of an environment file. Blank lines, `#` comments
/// and lines without `=` yield nothing; an `export ` prefix and one layer of
/// matching quotes around the value are dropped.
fn env_entry(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let value = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(value);
    Some((key.trim().to_string(), value.to_string()))
}

/// Extra environment for the application. Entries from
/// `app.environment_file` are applied first and `app.env` on top, so inline
/// values win.
pub fn app_environment(app: &AppConfig) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    if let Some(ref path) = app.environment_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading environment file: {}", path.display()))?;
        env.extend(contents.lines().filter_map(env_entry));
    }
    env.extend(app.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(env)
}
