//! Node configuration from environment variables. Every setting has a
//! default so a node starts with no configuration on a local network.

use std::time::Duration;

use libp2p::Multiaddr;

use commonplace_net::{PresenceConfig, SwarmConfig};
use commonplace_shared::constants::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_HEARTBEAT_SECS, DEFAULT_QUIC_PORT, PRESENCE_TTL_SECS,
};
use commonplace_store::StoreConfig;

#[derive(Clone)]
pub struct NodeConfig {
    /// Env: `LISTEN_PORT`. Default: 4001
    pub listen_port: u16,

    /// Comma-separated multiaddrs.
    /// Env: `BOOTSTRAP_PEERS`
    pub bootstrap_peers: Vec<Multiaddr>,

    /// Env: `USERNAME`. Default: `anonymous`
    pub username: String,

    /// 64 hex chars. Without it the node runs under a fresh identity.
    /// Env: `IDENTITY_SECRET`
    pub identity_secret: Option<String>,

    /// Env: `HEARTBEAT_SECS`. Default: 30
    pub heartbeat: Duration,

    /// Env: `PRESENCE_TTL_SECS`. Default: 90
    pub presence_ttl: Duration,

    /// Budget for each storage and transport call.
    /// Env: `CALL_TIMEOUT_MS`. Default: 10000
    pub call_timeout: Duration,

    /// Collection created and registered at start-up.
    /// Env: `COLLECTION_NAME`
    pub collection_name: Option<String>,
}

// Hand-written so the identity secret never reaches the logs.
impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("listen_port", &self.listen_port)
            .field("bootstrap_peers", &self.bootstrap_peers)
            .field("username", &self.username)
            .field(
                "identity_secret",
                &self.identity_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("heartbeat", &self.heartbeat)
            .field("presence_ttl", &self.presence_ttl)
            .field("call_timeout", &self.call_timeout)
            .field("collection_name", &self.collection_name)
            .finish()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            bootstrap_peers: Vec::new(),
            username: "anonymous".to_string(),
            identity_secret: None,
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            presence_ttl: Duration::from_secs(PRESENCE_TTL_SECS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            collection_name: None,
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; invalid values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("LISTEN_PORT") {
            match val.parse() {
                Ok(port) => config.listen_port = port,
                Err(_) => tracing::warn!(value = %val, "Invalid LISTEN_PORT, using default"),
            }
        }

        if let Some(val) = lookup("BOOTSTRAP_PEERS") {
            config.bootstrap_peers = parse_multiaddrs(&val);
        }

        if let Some(name) = lookup("USERNAME") {
            if !name.trim().is_empty() {
                config.username = name.trim().to_string();
            }
        }

        if let Some(secret) = lookup("IDENTITY_SECRET") {
            if !secret.is_empty() {
                config.identity_secret = Some(secret);
            }
        }

        if let Some(secs) = parse_positive(&lookup, "HEARTBEAT_SECS") {
            config.heartbeat = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive(&lookup, "PRESENCE_TTL_SECS") {
            config.presence_ttl = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_positive(&lookup, "CALL_TIMEOUT_MS") {
            config.call_timeout = Duration::from_millis(ms);
        }

        if let Some(name) = lookup("COLLECTION_NAME") {
            if !name.trim().is_empty() {
                config.collection_name = Some(name.trim().to_string());
            }
        }

        config
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::with_call_timeout(self.call_timeout)
    }

    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig {
            heartbeat_interval: self.heartbeat,
            ttl: self.presence_ttl,
            call_timeout: self.call_timeout,
            ..PresenceConfig::default()
        }
    }

    pub fn swarm_config(&self) -> SwarmConfig {
        SwarmConfig {
            listen_port: self.listen_port,
            bootstrap: self.bootstrap_peers.clone(),
        }
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let val = lookup(key)?;
    match val.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %val, "Invalid duration, using default");
            None
        }
    }
}

fn parse_multiaddrs(list: &str) -> Vec<Multiaddr> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!(value = %s, error = %e, "Skipping invalid bootstrap address");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> NodeConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_port, 4001);
        assert_eq!(config.heartbeat, Duration::from_secs(30));
        assert_eq!(config.presence_ttl, Duration::from_secs(90));
        assert!(config.identity_secret.is_none());
        assert!(config.collection_name.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("LISTEN_PORT", "5001"),
            ("USERNAME", " ada "),
            ("HEARTBEAT_SECS", "5"),
            ("CALL_TIMEOUT_MS", "250"),
            ("COLLECTION_NAME", "Quotes"),
            (
                "BOOTSTRAP_PEERS",
                "/ip4/10.0.0.1/udp/4001/quic-v1, /ip4/10.0.0.2/udp/4001/quic-v1",
            ),
        ]);
        assert_eq!(config.listen_port, 5001);
        assert_eq!(config.username, "ada");
        assert_eq!(config.heartbeat, Duration::from_secs(5));
        assert_eq!(config.presence_config().sweep_interval(), Duration::from_millis(2500));
        assert_eq!(config.store_config().call_timeout, Duration::from_millis(250));
        assert_eq!(config.collection_name.as_deref(), Some("Quotes"));
        assert_eq!(config.bootstrap_peers.len(), 2);
    }

    #[test]
    fn test_debug_redacts_identity_secret() {
        let secret = "ab".repeat(32);
        let config = from_pairs(&[("IDENTITY_SECRET", secret.as_str())]);
        assert_eq!(config.identity_secret.as_deref(), Some(secret.as_str()));

        let printed = format!("{config:?}");
        assert!(!printed.contains(&secret));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("LISTEN_PORT", "not-a-port"),
            ("HEARTBEAT_SECS", "0"),
            ("PRESENCE_TTL_SECS", "-3"),
            ("BOOTSTRAP_PEERS", "garbage,/ip4/10.0.0.1/udp/4001/quic-v1"),
        ]);
        assert_eq!(config.listen_port, 4001);
        assert_eq!(config.heartbeat, Duration::from_secs(30));
        assert_eq!(config.presence_ttl, Duration::from_secs(90));
        assert_eq!(config.bootstrap_peers.len(), 1);
    }
}
