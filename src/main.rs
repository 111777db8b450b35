use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uplink_poller::auth::{StaticToken, TokenFile};
use uplink_poller::client::{CredentialProvider, RequestExecutor, UreqTransport};
use uplink_poller::config::{Config, TokenSource, load_env_file};
use uplink_poller::models::uplink::{AlarmInfo, Category, Mode, Parameter, SoftwareInfo, System, SystemId};
use uplink_poller::utils::serde_enum_name;
use uplink_poller::{ConnectionObserver, RequestError, SystemListener, UplinkConnector};

/// Logs every update it receives.
struct LoggingListener;

impl SystemListener for LoggingListener {
    fn system_updated(&self, system: &System) {
        info!(
            "System {} ({}): {} alarmed={}",
            system.system_id,
            system.name,
            serde_enum_name(&system.connection_status).unwrap_or_else(|| "-".into()),
            system.has_alarmed
        );
    }

    fn status_updated(&self, system_id: SystemId, status: &[Category]) {
        let names = status.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
        info!("System {} status: {}", system_id, if names.is_empty() { "-" } else { names.as_str() });
    }

    fn parameters_updated(&self, system_id: SystemId, parameters: &[Parameter]) {
        for p in parameters {
            info!(
                "System {} parameter {} ({}): {}",
                system_id,
                p.parameter_id,
                p.title.as_deref().unwrap_or("-"),
                p.display_value
            );
        }
    }

    fn mode_updated(&self, system_id: SystemId, mode: Mode) {
        info!(
            "System {} mode: {}",
            system_id,
            serde_enum_name(&mode).unwrap_or_else(|| "-".into())
        );
    }

    fn software_info_updated(&self, system_id: SystemId, info: &SoftwareInfo) {
        match &info.upgrade {
            Some(upgrade) => info!(
                "System {} runs {}; upgrade {} available",
                system_id, info.current.name, upgrade.name
            ),
            None => info!("System {} runs {} (up to date)", system_id, info.current.name),
        }
    }

    fn alarm_info_updated(&self, system_id: SystemId, alarm: Option<&AlarmInfo>) {
        match alarm {
            Some(a) => warn!(
                "System {} alarm {}: {}",
                system_id,
                a.alarm_number.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
                a.header
            ),
            None => info!("System {} has no active alarm", system_id),
        }
    }
}

struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn outage(&self, error: &RequestError) {
        warn!("NIBE Uplink unavailable ({}); polling suspended", error);
    }

    fn recovered(&self) {
        info!("NIBE Uplink reachable again; polling resumed");
    }
}

async fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (base_url={}, update_interval={}s, software_check_days={}, request_interval={}s, tracked_parameters={}, system_ids={})",
        cfg.base_url,
        cfg.update_interval.as_secs(),
        cfg.software_check_days,
        cfg.request_interval.as_secs(),
        cfg.tracked_parameters.len(),
        if cfg.system_ids.is_empty() {
            "all".to_string()
        } else {
            cfg.system_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
        }
    );

    // 2) Init client
    let credentials: Arc<dyn CredentialProvider> = match &cfg.token {
        TokenSource::Inline(token) => Arc::new(StaticToken::new(token.clone())),
        TokenSource::File(path) => Arc::new(TokenFile::new(path.clone())),
    };
    let executor = RequestExecutor::new(
        Arc::new(UreqTransport::new(cfg.request_timeout)),
        credentials,
        cfg.base_url.clone(),
        cfg.request_timeout,
    );
    let connector = UplinkConnector::new(executor, cfg.engine_settings(), Some(Arc::new(LoggingObserver)));

    // 3) Discover systems
    let systems = connector
        .list_systems()
        .await
        .map_err(|e| format!("Listing systems failed: {}", e))?;
    let selected: Vec<&System> = systems
        .iter()
        .filter(|s| cfg.system_ids.is_empty() || cfg.system_ids.contains(&s.system_id))
        .collect();
    if selected.is_empty() {
        return Err("No accessible systems matched the configuration".to_string());
    }
    for id in cfg.system_ids.iter().filter(|id| !systems.iter().any(|s| s.system_id == **id)) {
        warn!("Configured system {} is not accessible with this token", id);
    }

    // 4) Register listeners; the first one starts polling
    let listener: Arc<dyn SystemListener> = Arc::new(LoggingListener);
    for system in &selected {
        for parameter in &cfg.tracked_parameters {
            connector.add_tracked_parameter(system.system_id, *parameter);
        }
        connector.add_callback_listener(system.system_id, listener.clone());
        info!(
            "Polling system {} ({}, {})",
            system.system_id,
            system.name,
            system.product_name.as_deref().unwrap_or("-")
        );
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Waiting for shutdown signal failed: {}", e))?;
    info!("Shutdown requested");
    connector.shutdown();
    Ok(())
}

/// Accepts only `--env-file <path>` or `--env-file=<path>`.
fn env_file_arg(args: impl IntoIterator<Item = String>) -> Result<Option<PathBuf>, String> {
    let mut args = args.into_iter();
    let mut path = None;
    while let Some(arg) = args.next() {
        let value = match arg.strip_prefix("--env-file") {
            Some("") => args.next(),
            Some(rest) if rest.starts_with('=') => Some(rest[1..].to_string()),
            _ => return Err(format!("unrecognised argument: {}", arg)),
        };
        match value.filter(|v| !v.is_empty()) {
            Some(v) if path.is_none() => path = Some(PathBuf::from(v)),
            Some(_) => return Err("`--env-file` provided more than once".to_string()),
            None => return Err("`--env-file` requires a path argument".to_string()),
        }
    }
    Ok(path)
}

/// Load the given env file, or `./.env` when present; returns the file used.
fn load_env(explicit: Option<PathBuf>) -> Result<Option<PathBuf>, String> {
    let path = match explicit {
        Some(path) if path.is_file() => path,
        Some(path) => return Err(format!("env file not found: {}", path.display())),
        None if Path::new(".env").is_file() => PathBuf::from(".env"),
        None => return Ok(None),
    };
    load_env_file(&path)?;
    Ok(Some(path))
}

#[tokio::main]
async fn main() {
    let loaded_env = std::env::args_os()
        .skip(1)
        .map(|a| a.into_string().map_err(|_| "argument contains invalid UTF-8".to_string()))
        .collect::<Result<Vec<_>, _>>()
        .and_then(env_file_arg)
        .and_then(load_env);
    let loaded_env = match loaded_env {
        Ok(path) => path,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = &loaded_env {
        info!("Environment loaded from {}", path.display());
    }
    info!(
        "uplink-poller {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run().await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn env_file_flag_forms() {
        assert_eq!(env_file_arg(args(&[])), Ok(None));
        assert_eq!(env_file_arg(args(&["--env-file", "a.env"])), Ok(Some(PathBuf::from("a.env"))));
        assert_eq!(env_file_arg(args(&["--env-file=b.env"])), Ok(Some(PathBuf::from("b.env"))));
        assert!(env_file_arg(args(&["--env-file"])).is_err());
        assert!(env_file_arg(args(&["--env-file="])).is_err());
        assert!(env_file_arg(args(&["--env-file=a", "--env-file=b"])).is_err());
        assert!(env_file_arg(args(&["--verbose"])).is_err());
        assert!(env_file_arg(args(&["--env-filex"])).is_err());
    }
}
