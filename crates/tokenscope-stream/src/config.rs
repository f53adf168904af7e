use crate::connection::ConnectionConfig;
use crate::lifecycle::{ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS};
use clap::Parser;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tokenscope_core::stream_protocol::DEFAULT_MAX_FRAME_BYTES;
use tokenscope_core::ReplacePolicy;
use url::Url;

pub const DEFAULT_STREAM_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_LOG_DIR: &str = ".tokenscope/logs";
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 90;

#[derive(Parser, Debug)]
#[command(name = "tokenscope", about = "Live token analysis feed monitor")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub url: String,
    #[arg(long)]
    pub reconnect_interval_ms: Option<u64>,
    #[arg(long)]
    pub max_reconnect_attempts: Option<u32>,
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_SECS)]
    pub heartbeat_interval: u64,
    /// Seconds without any inbound frame before the socket is dropped. 0 disables.
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout: u64,
    #[arg(long, default_value = "")]
    pub replace_policy: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    /// Print every snapshot as a JSON line on stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub url: Url,
    pub connection: ConnectionConfig,
    pub replace_policy: ReplacePolicy,
    pub log_dir: String,
    pub log_stdout: bool,
    pub json: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid stream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported stream url scheme {scheme} (expected ws or wss)")]
    UnsupportedScheme { scheme: String },
    #[error("invalid {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

pub fn load_config(args: Args) -> Result<RuntimeConfig, ConfigError> {
    let url = resolve_url(&args.url)?;
    let reconnect = ReconnectPolicy {
        interval: Duration::from_millis(resolve_u64(
            args.reconnect_interval_ms,
            "TOKENSCOPE_RECONNECT_INTERVAL_MS",
            DEFAULT_RECONNECT_INTERVAL_MS,
        )?),
        max_attempts: resolve_u64(
            args.max_reconnect_attempts.map(u64::from),
            "TOKENSCOPE_MAX_RECONNECT_ATTEMPTS",
            u64::from(DEFAULT_MAX_RECONNECT_ATTEMPTS),
        )?
        .min(u64::from(u32::MAX)) as u32,
    };
    let connection = ConnectionConfig {
        reconnect,
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval.max(1)),
        idle_timeout: resolve_idle_timeout(args.idle_timeout),
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    };
    Ok(RuntimeConfig {
        url,
        connection,
        replace_policy: resolve_replace_policy(&args.replace_policy)?,
        log_dir: resolve_log_dir(&args.log_dir),
        log_stdout: resolve_log_stdout(),
        json: args.json,
    })
}

pub fn resolve_url(flag: &str) -> Result<Url, ConfigError> {
    let raw = pick(flag, "TOKENSCOPE_STREAM_URL").unwrap_or_else(|| DEFAULT_STREAM_URL.to_string());
    parse_stream_url(&raw)
}

pub fn parse_stream_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

fn resolve_replace_policy(flag: &str) -> Result<ReplacePolicy, ConfigError> {
    match pick(flag, "TOKENSCOPE_REPLACE_POLICY") {
        Some(value) => value.parse::<ReplacePolicy>().map_err(|reason| ConfigError::InvalidValue {
            name: "replace policy",
            reason,
        }),
        None => Ok(ReplacePolicy::default()),
    }
}

fn resolve_u64(flag: Option<u64>, env_key: &'static str, default: u64) -> Result<u64, ConfigError> {
    if let Some(value) = flag {
        return Ok(value);
    }
    match env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse::<u64>()
                .map_err(|err| ConfigError::InvalidValue {
                    name: env_key,
                    reason: err.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn resolve_idle_timeout(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

fn resolve_log_dir(flag: &str) -> String {
    pick(flag, "TOKENSCOPE_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())
}

fn resolve_log_stdout() -> bool {
    if let Ok(value) = env::var("TOKENSCOPE_LOG_STDOUT") {
        if let Some(enabled) = parse_bool_env(&value) {
            return enabled;
        }
    }
    false
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

/// Flag first, then the environment. Blank values count as unset.
fn pick(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    match env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_must_be_websocket() {
        assert!(parse_stream_url("ws://localhost:8000/ws").is_ok());
        assert!(parse_stream_url("wss://feed.example.com/ws").is_ok());
        assert_eq!(
            parse_stream_url("http://localhost:8000/ws"),
            Err(ConfigError::UnsupportedScheme {
                scheme: "http".to_string()
            })
        );
        assert!(matches!(
            parse_stream_url("not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn flags_win_over_defaults() {
        let args = Args::parse_from([
            "tokenscope",
            "--url",
            "ws://127.0.0.1:9000/ws",
            "--reconnect-interval-ms",
            "250",
            "--max-reconnect-attempts",
            "3",
            "--heartbeat-interval",
            "5",
            "--idle-timeout",
            "0",
            "--replace-policy",
            "wholesale",
            "--log-dir",
            "/tmp/tokenscope-logs",
            "--json",
        ]);
        let config = load_config(args).expect("config");
        assert_eq!(config.url.as_str(), "ws://127.0.0.1:9000/ws");
        assert_eq!(config.connection.reconnect.interval, Duration::from_millis(250));
        assert_eq!(config.connection.reconnect.max_attempts, 3);
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.connection.idle_timeout, None);
        assert_eq!(config.replace_policy, ReplacePolicy::Wholesale);
        assert_eq!(config.log_dir, "/tmp/tokenscope-logs");
        assert!(config.json);
    }

    #[test]
    fn bad_replace_policy_is_a_config_error() {
        assert!(matches!(
            resolve_replace_policy("sometimes"),
            Err(ConfigError::InvalidValue { name: "replace policy", .. })
        ));
    }

    #[test]
    fn bool_env_values() {
        assert_eq!(parse_bool_env("YES"), Some(true));
        assert_eq!(parse_bool_env("0"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }
}
