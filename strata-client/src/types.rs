//! Core data types shared across the discovery and connection subsystems.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Network location of one cluster member.
///
/// Host comparison is case-insensitive: `Node-1` and `node-1` name the same
/// member, and the channel cache must not hold two channels for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// DNS name or IP literal.
    pub host: String,
    /// TCP port the member listens on.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URL usable for channel construction.
    #[must_use]
    pub fn url(&self, secure: bool) -> String {
        let scheme = if secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.host.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Replication/lifecycle role a member reports through gossip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Node is starting up and has not joined replication yet.
    Initializing,
    /// Node is searching for the current leader.
    DiscoverLeader,
    /// Role could not be determined.
    Unknown,
    /// Node is being prepared as a replica.
    PreReplica,
    /// Replica replaying the log to catch up.
    CatchingUp,
    /// Replica cloning the leader's log.
    Clone,
    /// Fully caught-up voting replica.
    Follower,
    /// Node elected leader, not yet serving writes.
    PreLeader,
    /// Node currently accepting writes.
    Leader,
    /// Supervisor process, never serves data.
    Manager,
    /// Node draining ahead of shutdown.
    ShuttingDown,
    /// Node has stopped.
    Shutdown,
    /// Read-only node detached from any leader.
    ReadOnlyLeaderless,
    /// Read-only replica being prepared.
    PreReadOnlyReplica,
    /// Non-voting replica serving reads.
    ReadOnlyReplica,
    /// Leader stepping down.
    ResigningLeader,
}

impl NodeState {
    /// Whether a member in this state may ever be selected.
    ///
    /// Everything outside this subset is disallowed regardless of the
    /// configured preference.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Leader | Self::Follower | Self::ReadOnlyReplica)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::DiscoverLeader => "discover-leader",
            Self::Unknown => "unknown",
            Self::PreReplica => "pre-replica",
            Self::CatchingUp => "catching-up",
            Self::Clone => "clone",
            Self::Follower => "follower",
            Self::PreLeader => "pre-leader",
            Self::Leader => "leader",
            Self::Manager => "manager",
            Self::ShuttingDown => "shutting-down",
            Self::Shutdown => "shutdown",
            Self::ReadOnlyLeaderless => "read-only-leaderless",
            Self::PreReadOnlyReplica => "pre-read-only-replica",
            Self::ReadOnlyReplica => "read-only-replica",
            Self::ResigningLeader => "resigning-leader",
        };
        f.write_str(name)
    }
}

/// Identity, role and liveness of one member from a gossip snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Stable identifier of the server process.
    pub instance_id: Uuid,
    /// Reported replication role.
    pub state: NodeState,
    /// Liveness as judged by the reporting node.
    pub is_alive: bool,
    /// Address the member serves clients on.
    pub endpoint: Endpoint,
}

/// Immutable cluster membership snapshot from one gossip call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Members in the order the queried node reported them.
    pub members: Vec<MemberInfo>,
}

/// Role preference applied when ranking selectable members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodePreference {
    /// Prefer the write leader.
    #[default]
    Leader,
    /// Prefer a caught-up follower.
    Follower,
    /// Prefer a read-only replica.
    ReadOnlyReplica,
    /// No role preference; pick uniformly among selectable members.
    Random,
}

impl fmt::Display for NodePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
            Self::ReadOnlyReplica => "read-only-replica",
            Self::Random => "random",
        };
        f.write_str(name)
    }
}

/// Input driving the next channel production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionRequired {
    /// Nothing to do; the current channel is believed healthy.
    None,
    /// Run a full gossip discovery sweep.
    Rediscover,
    /// Reconnect straight to a reported leader, bypassing ranking.
    NewLeader(Endpoint),
}
