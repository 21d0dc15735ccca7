//! Connection-level configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SettingsError;
use crate::types::{Endpoint, NodePreference};

const DEFAULT_PORT: u16 = 2_113;

/// Configuration consumed by [`crate::Client`].
///
/// Built directly, deserialized from configuration files, or parsed from a
/// `strata://` connection string. Seeds and the single-node address are
/// mutually exclusive; [`ClientSettings::validate`] enforces that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Gossip seed endpoints used to bootstrap discovery.
    pub seeds: Vec<Endpoint>,
    /// Single-node address; skips gossip discovery entirely.
    pub address: Option<Endpoint>,
    /// Rounds of gossip discovery before giving up. Must be at least 1.
    pub max_discover_attempts: u32,
    /// Pause between exhausted discovery rounds, and the retry delay after
    /// a failed channel production.
    #[serde(with = "humantime_serde")]
    pub discovery_interval: Duration,
    /// Per-call budget for gossip reads and capability probes.
    #[serde(with = "humantime_serde")]
    pub gossip_timeout: Duration,
    /// Role preference applied when ranking candidates.
    pub node_preference: NodePreference,
    /// Use TLS for channels and fallback HTTP calls.
    pub secure: bool,
    /// Name tagged onto every outgoing request.
    pub connection_name: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            address: None,
            max_discover_attempts: 10,
            discovery_interval: Duration::from_millis(100),
            gossip_timeout: Duration::from_secs(3),
            node_preference: NodePreference::default(),
            secure: false,
            connection_name: format!("strata-rs-{}", Uuid::new_v4()),
        }
    }
}

impl ClientSettings {
    /// Settings for a cluster reached through the given gossip seeds.
    pub fn for_cluster(seeds: Vec<Endpoint>) -> Self {
        Self {
            seeds,
            ..Self::default()
        }
    }

    /// Settings for a single node, skipping gossip discovery.
    pub fn for_single_node(address: Endpoint) -> Self {
        Self {
            address: Some(address),
            ..Self::default()
        }
    }

    /// Override the discovery retry budget.
    #[must_use]
    pub fn with_max_discover_attempts(mut self, attempts: u32) -> Self {
        self.max_discover_attempts = attempts;
        self
    }

    /// Override the pause between discovery rounds.
    #[must_use]
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Override the per-call gossip/probe budget.
    #[must_use]
    pub fn with_gossip_timeout(mut self, timeout: Duration) -> Self {
        self.gossip_timeout = timeout;
        self
    }

    /// Override the node preference.
    #[must_use]
    pub fn with_node_preference(mut self, preference: NodePreference) -> Self {
        self.node_preference = preference;
        self
    }

    /// Override the connection name tagged onto requests.
    #[must_use]
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    /// Check the mutual-exclusion and budget invariants.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.seeds.is_empty() == self.address.is_none() {
            return Err(SettingsError::AmbiguousTarget);
        }
        if self.max_discover_attempts == 0 {
            return Err(SettingsError::ZeroAttempts);
        }
        Ok(())
    }
}

impl FromStr for ClientSettings {
    type Err = SettingsError;

    /// Parse a `strata://host:port[,host:port...]?key=value` connection
    /// string. A single host selects single-node mode; several hosts become
    /// gossip seeds. Recognized keys (case-insensitive):
    /// `maxDiscoverAttempts`, `discoveryInterval` (ms), `gossipTimeout`
    /// (ms), `nodePreference`, `tls`, `connectionName`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let rest = input
            .strip_prefix("strata://")
            .ok_or_else(|| SettingsError::InvalidScheme(input.to_string()))?;

        let (hosts, query) = match rest.split_once('?') {
            Some((hosts, query)) => (hosts, Some(query)),
            None => (rest, None),
        };

        let mut endpoints = Vec::new();
        for entry in hosts.split(',') {
            endpoints.push(parse_host(entry)?);
        }

        let mut settings = if endpoints.len() == 1 {
            Self::for_single_node(endpoints.remove(0))
        } else {
            Self::for_cluster(endpoints)
        };

        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| SettingsError::InvalidParam {
                        key: pair.to_string(),
                        value: String::new(),
                    })?;
                apply_param(&mut settings, key, value)?;
            }
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn parse_host(entry: &str) -> Result<Endpoint, SettingsError> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(SettingsError::InvalidHost(entry.to_string()));
    }
    match entry.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| SettingsError::InvalidHost(entry.to_string()))?;
            if host.is_empty() {
                return Err(SettingsError::InvalidHost(entry.to_string()));
            }
            Ok(Endpoint::new(host, port))
        }
        None => Ok(Endpoint::new(entry, DEFAULT_PORT)),
    }
}

fn apply_param(
    settings: &mut ClientSettings,
    key: &str,
    value: &str,
) -> Result<(), SettingsError> {
    let invalid = || SettingsError::InvalidParam {
        key: key.to_string(),
        value: value.to_string(),
    };
    match key.to_ascii_lowercase().as_str() {
        "maxdiscoverattempts" => {
            settings.max_discover_attempts = value.parse().map_err(|_| invalid())?;
        }
        "discoveryinterval" => {
            let millis: u64 = value.parse().map_err(|_| invalid())?;
            settings.discovery_interval = Duration::from_millis(millis);
        }
        "gossiptimeout" => {
            let millis: u64 = value.parse().map_err(|_| invalid())?;
            settings.gossip_timeout = Duration::from_millis(millis);
        }
        "nodepreference" => {
            settings.node_preference = match value.to_ascii_lowercase().as_str() {
                "leader" => NodePreference::Leader,
                "follower" => NodePreference::Follower,
                "readonlyreplica" | "read-only-replica" => NodePreference::ReadOnlyReplica,
                "random" => NodePreference::Random,
                _ => return Err(invalid()),
            };
        }
        "tls" => {
            settings.secure = match value.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => return Err(invalid()),
            };
        }
        "connectionname" => {
            settings.connection_name = value.to_string();
        }
        _ => return Err(invalid()),
    }
    Ok(())
}
