// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// SQLite file holding the persisted canvas documents.
    pub db_path: PathBuf,
    /// Log filter directive (e.g. `info`, `easel_relay=debug`).
    pub log_filter: String,
    /// Liveness threshold for presence records.
    pub presence_timeout_ms: i64,
    /// Cadence of the presence expiry sweep.
    pub presence_sweep_interval_ms: u64,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `EASEL_RELAY_HOST` | `0.0.0.0` |
    /// | `EASEL_RELAY_PORT` | `8080` |
    /// | `EASEL_RELAY_DB_PATH` | `easel-relay.db` |
    /// | `EASEL_RELAY_LOG_FILTER` | `info` |
    /// | `EASEL_RELAY_PRESENCE_TIMEOUT_MS` | `20000` |
    /// | `EASEL_RELAY_PRESENCE_SWEEP_MS` | `5000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("EASEL_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("EASEL_RELAY_PORT").ok().and_then(|value| value.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let db_path =
            PathBuf::from(env("EASEL_RELAY_DB_PATH").unwrap_or_else(|_| "easel-relay.db".into()));

        let log_filter = env("EASEL_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let presence_timeout_ms = env("EASEL_RELAY_PRESENCE_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .filter(|value| *value > 0)
            .unwrap_or(20_000);

        let presence_sweep_interval_ms = env("EASEL_RELAY_PRESENCE_SWEEP_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .filter(|value| *value > 0)
            .unwrap_or(5_000);

        Self { listen_addr, db_path, log_filter, presence_timeout_ms, presence_sweep_interval_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::RelayConfig;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key| map.get(key).map(|value| value.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_with_empty_environment() {
        let config = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.db_path.to_string_lossy(), "easel-relay.db");
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.presence_timeout_ms, 20_000);
        assert_eq!(config.presence_sweep_interval_ms, 5_000);
    }

    #[test]
    fn environment_overrides_are_honored() {
        let mut map = HashMap::new();
        map.insert("EASEL_RELAY_HOST", "127.0.0.1");
        map.insert("EASEL_RELAY_PORT", "9100");
        map.insert("EASEL_RELAY_DB_PATH", "/tmp/canvases.db");
        map.insert("EASEL_RELAY_PRESENCE_TIMEOUT_MS", "15000");

        let config = RelayConfig::from_env_fn(env_from_map(map));
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9100");
        assert_eq!(config.db_path.to_string_lossy(), "/tmp/canvases.db");
        assert_eq!(config.presence_timeout_ms, 15_000);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let mut map = HashMap::new();
        map.insert("EASEL_RELAY_PORT", "not-a-port");
        map.insert("EASEL_RELAY_PRESENCE_TIMEOUT_MS", "0");

        let config = RelayConfig::from_env_fn(env_from_map(map));
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.presence_timeout_ms, 20_000);
    }
}
