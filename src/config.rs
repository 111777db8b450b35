//! Minimal runtime configuration helpers.
//! Settings come from the process environment, optionally seeded from a
//! `.env` file (see [`load_env_file`]).

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io::BufRead, io::BufReader};

use crate::client::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::models::uplink::{ParameterId, SystemId};
use crate::services::scheduler::{
    DEFAULT_REQUEST_INTERVAL, DEFAULT_SOFTWARE_CHECK_DAYS, DEFAULT_UPDATE_INTERVAL, EngineSettings,
};
use crate::utils::parse_list;

pub const DEFAULT_TOKEN_FILE: &str = "token.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Token given directly via `UPLINK_ACCESS_TOKEN`.
    Inline(String),
    /// File kept current by an external OAuth helper.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: TokenSource,
    pub base_url: String,
    /// Standard poll cadence.
    pub update_interval: Duration,
    /// Software update check cadence; zero or less disables it.
    pub software_check_days: i64,
    /// Pause between two outbound requests.
    pub request_interval: Duration,
    pub request_timeout: Duration,
    /// Parameters tracked on every polled system.
    pub tracked_parameters: Vec<ParameterId>,
    /// Restrict polling to these systems; empty polls all of them.
    pub system_ids: Vec<SystemId>,
}

fn env_secs(name: &str, default: Duration) -> Result<Duration, String> {
    match std::env::var(name) {
        Ok(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("{} must be a whole number of seconds", name)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        // Prefer env var; fallback to token file in working directory
        let token = match std::env::var("UPLINK_ACCESS_TOKEN") {
            Ok(v) if !v.trim().is_empty() => TokenSource::Inline(v.trim().to_string()),
            _ => {
                let path = std::env::var("UPLINK_TOKEN_FILE").unwrap_or_else(|_| DEFAULT_TOKEN_FILE.to_string());
                if !Path::new(&path).is_file() {
                    return Err(format!(
                        "Missing access token: set UPLINK_ACCESS_TOKEN or provide {} (UPLINK_TOKEN_FILE)",
                        path
                    ));
                }
                TokenSource::File(PathBuf::from(path))
            }
        };

        let base_url = std::env::var("UPLINK_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let software_check_days = match std::env::var("SOFTWARE_CHECK_DAYS") {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<i64>()
                .map_err(|_| "SOFTWARE_CHECK_DAYS must be an integer".to_string())?,
            _ => DEFAULT_SOFTWARE_CHECK_DAYS,
        };

        let request_interval = env_secs("REQUEST_INTERVAL_SECS", DEFAULT_REQUEST_INTERVAL)?;
        if request_interval.is_zero() {
            return Err("REQUEST_INTERVAL_SECS must be at least 1".to_string());
        }

        let tracked_parameters = parse_list::<i64>(&std::env::var("TRACKED_PARAMETERS").unwrap_or_default())
            .map_err(|e| format!("TRACKED_PARAMETERS: {}", e))?
            .into_iter()
            .map(ParameterId)
            .collect();
        let system_ids = parse_list::<i64>(&std::env::var("SYSTEM_IDS").unwrap_or_default())
            .map_err(|e| format!("SYSTEM_IDS: {}", e))?
            .into_iter()
            .map(SystemId)
            .collect();

        Ok(Config {
            token,
            base_url,
            update_interval: env_secs("UPDATE_INTERVAL_SECS", DEFAULT_UPDATE_INTERVAL)?,
            software_check_days,
            request_interval,
            request_timeout: env_secs("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT)?,
            tracked_parameters,
            system_ids,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            request_interval: self.request_interval,
            update_interval: self.update_interval,
            software_check_days: self.software_check_days,
            ..EngineSettings::default()
        }
    }
}

/// Load `KEY=value` lines into the process environment. Variables that are
/// already set win over the file.
pub fn load_env_file(path: &Path) -> Result<(), String> {
    let file = fs::File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        let Some((key, value)) =
            parse_env_assignment(&line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

pub fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);

    let (key, raw_value) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_env_value(raw_value)?)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix('"') {
        parse_quoted(rest, '"', true)
    } else if let Some(rest) = trimmed.strip_prefix('\'') {
        parse_quoted(rest, '\'', false)
    } else {
        Ok(trimmed.split('#').next().unwrap_or_default().trim_end().to_string())
    }
}

/// Read up to the closing `quote`; only double quotes honour escapes.
fn parse_quoted(input: &str, quote: char, escapes: bool) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if escapes => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| "unterminated escape sequence in quoted value".to_string())?;
                result.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => {
                let remainder = chars.as_str().trim();
                return if remainder.is_empty() || remainder.starts_with('#') {
                    Ok(result)
                } else {
                    Err("unexpected characters after closing quote".to_string())
                };
            }
            other => result.push(other),
        }
    }
    Err("unterminated quoted value".to_string())
}
