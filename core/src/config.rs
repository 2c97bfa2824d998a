use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Client construction parameters.
///
/// Deserialisable so it can be loaded from a JSON file; every field has a
/// default.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Equivalent cluster members, tried in order.
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Ask the service for linearisable reads (`consistent=true` on GETs).
    #[serde(default = "default_consistent")]
    pub consistent: bool,

    /// Sent with every request unless a call overrides the same name.
    #[serde(default = "default_headers")]
    pub headers: Vec<(String, String)>,

    /// Pause between failover attempts.
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,

    /// Pause before a `wait_then` continuation is run.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Overall request deadline. `None` lets `wait` block indefinitely.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: Option<u64>,

    /// Largest response body read before giving up. Recursive listings of
    /// big directories can exceed a few megabytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

fn default_servers() -> Vec<String> {
    vec!["http://127.0.0.1:4001".to_string()]
}

fn default_consistent() -> bool {
    true
}

fn default_headers() -> Vec<(String, String)> {
    vec![("Accept".to_string(), "application/json".to_string())]
}

fn default_election_timeout_ms() -> u64 {
    200
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_connect_timeout_ms() -> Option<u64> {
    Some(1_000)
}

fn default_max_body_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            consistent: default_consistent(),
            headers: default_headers(),
            election_timeout_ms: default_election_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            request_timeout_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ClientConfig {
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `ETCD_ENDPOINTS` (comma separated),
    /// `ETCD_ELECTION_TIMEOUT_MS`, `ETCD_HEARTBEAT_INTERVAL_MS` and
    /// `ETCD_REQUEST_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(endpoints) = lookup("ETCD_ENDPOINTS") {
            config.servers = endpoints
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(ms) = lookup("ETCD_ELECTION_TIMEOUT_MS") {
            config.election_timeout_ms = parse_ms("ETCD_ELECTION_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("ETCD_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval_ms = parse_ms("ETCD_HEARTBEAT_INTERVAL_MS", &ms)?;
        }
        if let Some(ms) = lookup("ETCD_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = Some(parse_ms("ETCD_REQUEST_TIMEOUT_MS", &ms)?);
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject an empty server list or a server that is not an http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        for server in &self.servers {
            let url = Url::parse(server).map_err(|e| ConfigError::InvalidServer {
                url: server.clone(),
                reason: e.to_string(),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidServer {
                    url: server.clone(),
                    reason: format!("unsupported scheme {}", url.scheme()),
                });
            }
        }
        Ok(())
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Fixed delay before retrying against the next server.
    pub fn failover_backoff(&self) -> Duration {
        self.election_timeout()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_ms(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_point_at_localhost() {
        let config = ClientConfig::default();
        assert_eq!(config.servers, vec!["http://127.0.0.1:4001"]);
        assert_eq!(config.election_timeout(), Duration::from_millis(200));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(50));
        assert_eq!(config.failover_backoff(), config.election_timeout());
        assert!(config.request_timeout().is_none());
        assert!(config.consistent);
        config.validate().unwrap();
    }

    #[test]
    fn missing_json_fields_take_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"servers": ["http://10.0.0.1:4001", "http://10.0.0.2:4001"]}"#)
                .unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(
            config.headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
        assert_eq!(config.election_timeout_ms, 200);
        assert_eq!(config.max_body_bytes, 64 * 1024 * 1024);
        assert!(config.consistent);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ETCD_ENDPOINTS", "http://a:4001, http://b:4001,"),
            ("ETCD_ELECTION_TIMEOUT_MS", "500"),
            ("ETCD_REQUEST_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();
        assert_eq!(config.servers, vec!["http://a:4001", "http://b:4001"]);
        assert_eq!(config.election_timeout_ms, 500);
        assert_eq!(config.heartbeat_interval_ms, 50);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn env_rejects_non_numeric_timeouts() {
        let err = ClientConfig::from_lookup(lookup(&[("ETCD_HEARTBEAT_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn validate_rejects_empty_and_bad_servers() {
        assert_eq!(
            ClientConfig::new(Vec::<String>::new()).validate(),
            Err(ConfigError::NoServers)
        );
        assert!(matches!(
            ClientConfig::new(["not a url"]).validate(),
            Err(ConfigError::InvalidServer { .. })
        ));
        assert!(matches!(
            ClientConfig::new(["ftp://a:21"]).validate(),
            Err(ConfigError::InvalidServer { .. })
        ));
    }
}
