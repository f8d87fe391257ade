//! Environment-driven configuration (spec §6.1), carried over from
//! `original_source/rpcwatcher/config.go`'s `ReadConfig`/`Config.Validate`
//! rather than the teacher's TOML-file `ConfigLoader`: the registry
//! database, not a config file, is this system's authoritative source of
//! chain topology, and there is no SIGHUP reload here.

use thiserror::Error;

const ENV_PREFIX: &str = "RPCWATCHER_";

const DEFAULT_REDIS_URL: &str = "redis-master:6379";
const DEFAULT_API_URL: &str = "http://api-server:8000";
const DEFAULT_PROFILING_SERVER_URL: &str = "localhost:6060";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing or invalid configuration fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_connection_url: String,
    pub redis_url: String,
    pub api_url: String,
    pub profiling_server_url: String,
    pub debug: bool,
    pub json_logs: bool,
}

impl Config {
    /// Reads every `RPCWATCHER_*` key from the environment and validates it,
    /// collecting every failing field into one error rather than stopping at
    /// the first (mirrors `validation.MissingFieldsErr(err, false)`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();

        let database_connection_url = env_var("DatabaseConnectionURL", None);
        if database_connection_url.as_deref().is_none_or(str::is_empty) {
            missing.push("DatabaseConnectionURL".to_string());
        }

        let redis_url = env_var("RedisURL", Some(DEFAULT_REDIS_URL)).unwrap_or_default();
        if !is_host_port(&redis_url) {
            missing.push("RedisURL".to_string());
        }

        let api_url = env_var("ApiURL", Some(DEFAULT_API_URL)).unwrap_or_default();
        if url::Url::parse(&api_url).is_err() {
            missing.push("ApiURL".to_string());
        }

        let profiling_server_url =
            env_var("ProfilingServerURL", Some(DEFAULT_PROFILING_SERVER_URL)).unwrap_or_default();
        if !is_host_port(&profiling_server_url) {
            missing.push("ProfilingServerURL".to_string());
        }

        let debug = parse_bool(env_var("Debug", Some("false")));
        let json_logs = parse_bool(env_var("JSONLogs", Some("false")));

        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }

        Ok(Self {
            database_connection_url: database_connection_url.unwrap_or_default(),
            redis_url,
            api_url,
            profiling_server_url,
            debug,
            json_logs,
        })
    }
}

fn env_var(key: &str, default: Option<&str>) -> Option<String> {
    match std::env::var(format!("{ENV_PREFIX}{key}")) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => default.map(str::to_string),
    }
}

fn parse_bool(value: Option<String>) -> bool {
    value.map(|v| v.eq_ignore_ascii_case("true") || v == "1").unwrap_or(false)
}

/// `host:port` shape, matching the validator's `hostname_port` tag.
fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "DatabaseConnectionURL",
            "RedisURL",
            "ApiURL",
            "ProfilingServerURL",
            "Debug",
            "JSONLogs",
        ] {
            // SAFETY: serialized by ENV_LOCK, no other thread reads/writes
            // these keys concurrently within this test module.
            unsafe { std::env::remove_var(format!("{ENV_PREFIX}{key}")) };
        }
    }

    #[test]
    fn missing_database_url_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        match Config::from_env() {
            Err(ConfigError::MissingFields(fields)) => {
                assert!(fields.contains(&"DatabaseConnectionURL".to_string()));
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_when_optional_fields_are_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        // SAFETY: serialized by ENV_LOCK.
        unsafe { std::env::set_var("RPCWATCHER_DatabaseConnectionURL", "postgres://localhost/cns") };

        let config = Config::from_env().expect("config should be valid");
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.profiling_server_url, DEFAULT_PROFILING_SERVER_URL);
        assert!(!config.debug);

        clear_env();
    }

    #[test]
    fn invalid_url_and_host_port_are_both_reported_together() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        // SAFETY: serialized by ENV_LOCK.
        unsafe {
            std::env::set_var("RPCWATCHER_DatabaseConnectionURL", "postgres://localhost/cns");
            std::env::set_var("RPCWATCHER_RedisURL", "not-a-host-port");
            std::env::set_var("RPCWATCHER_ApiURL", "not a url");
        }

        match Config::from_env() {
            Err(ConfigError::MissingFields(fields)) => {
                assert!(fields.contains(&"RedisURL".to_string()));
                assert!(fields.contains(&"ApiURL".to_string()));
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }

        clear_env();
    }
}
