use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// How the execution engine is told to pick up a rewritten registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineReload {
    /// Run a local command, e.g. `docker restart ofelia`.
    Command { program: String, args: Vec<String> },
    /// POST to a live reload endpoint.
    Http { url: String },
    /// Do nothing (tests, or an engine that watches the file itself).
    Disabled,
}

impl EngineReload {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("none") {
            return Ok(Self::Disabled);
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Http {
                url: raw.to_string(),
            });
        }
        let Some(command) = raw.strip_prefix("command:") else {
            bail!("engine reload must be 'none', an http(s) URL, or 'command:<argv>', got '{raw}'");
        };
        let mut argv = command.split_whitespace().map(str::to_string);
        let Some(program) = argv.next() else {
            bail!("engine reload command is empty");
        };
        Ok(Self::Command {
            program,
            args: argv.collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub redis_url: String,
    pub registry_path: PathBuf,
    pub engine_reload: EngineReload,
    pub max_workers: u32,
    pub max_jobs_per_worker: usize,
    pub heartbeat_interval: Duration,
    pub lock_ttl: Duration,
    pub lock_retry: Duration,
    pub lock_fenced: bool,
    pub subscription_store_url: String,
    pub fetch_script: String,
    pub internal_api_key: String,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_or("POLLMESH_LISTEN_ADDR", "127.0.0.1:5000")
            .parse()
            .context("POLLMESH_LISTEN_ADDR must be a socket address")?;

        let log_level = env_or("POLLMESH_LOG_LEVEL", "info");
        let redis_url = env_or("POLLMESH_REDIS_URL", "redis://127.0.0.1:6379");
        let registry_path = PathBuf::from(env_or(
            "POLLMESH_REGISTRY_PATH",
            "/app/opheliaConfig/config.ini",
        ));
        let engine_reload = EngineReload::parse(&env_or(
            "POLLMESH_ENGINE_RELOAD",
            "command:docker restart ofelia",
        ))?;

        let max_workers: u32 = parse_env("POLLMESH_MAX_WORKERS", 3)?;
        let max_jobs_per_worker: usize = parse_env("POLLMESH_MAX_JOBS_PER_WORKER", 5)?;
        if max_workers == 0 || max_jobs_per_worker == 0 {
            bail!("POLLMESH_MAX_WORKERS and POLLMESH_MAX_JOBS_PER_WORKER must be positive");
        }

        let heartbeat_secs: u64 = parse_env("POLLMESH_HEARTBEAT_INTERVAL_SECS", 10)?;
        let lock_ttl_secs: u64 = parse_env("POLLMESH_LOCK_TTL_SECS", 10)?;
        let lock_retry_ms: u64 = parse_env("POLLMESH_LOCK_RETRY_MS", 500)?;
        if heartbeat_secs == 0 || lock_ttl_secs == 0 {
            bail!("heartbeat interval and lock TTL must be positive");
        }

        let lock_fenced = std::env::var("POLLMESH_LOCK_FENCED")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let subscription_store_url = env_or("POLLMESH_SUBSCRIPTION_STORE_URL", "http://127.0.0.1:5001")
            .trim_end_matches('/')
            .to_string();
        let fetch_script = env_or("POLLMESH_FETCH_SCRIPT", "python /app/fetchScripts/fetchApis.py");

        let internal_api_key = required_env("POLLMESH_INTERNAL_API_KEY")?;
        let jwt_secret = required_env("POLLMESH_JWT_SECRET")?;

        Ok(Self {
            listen_addr,
            log_level,
            redis_url,
            registry_path,
            engine_reload,
            max_workers,
            max_jobs_per_worker,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            lock_ttl: Duration::from_secs(lock_ttl_secs),
            lock_retry: Duration::from_millis(lock_retry_ms),
            lock_fenced,
            subscription_store_url,
            fetch_script,
            internal_api_key,
            jwt_secret,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn required_env(name: &str) -> Result<String> {
    let value = std::env::var(name).with_context(|| format!("{name} must be set"))?;
    if value.is_empty() {
        bail!("{name} must not be empty");
    }
    Ok(value)
}
