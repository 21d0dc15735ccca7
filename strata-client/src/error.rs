//! Error taxonomy surfaced by the client.

use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use crate::types::Endpoint;

/// Errors that occur while discovering the cluster or running operations.
///
/// Variants are cloneable so one production outcome can be shared by every
/// consumer awaiting the same slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Transport-level failure talking to one node. Recovered during
    /// discovery by moving on to the next candidate.
    #[error("transport error talking to {endpoint}: {message}")]
    Transport {
        /// Node the failed call targeted.
        endpoint: Endpoint,
        /// Rendering of the underlying transport failure.
        message: String,
    },
    /// Discovery gave up after exhausting its full retry budget.
    #[error("cluster discovery exhausted after {attempts} attempt(s)")]
    DiscoveryExhausted {
        /// Rounds attempted before giving up.
        attempts: u32,
    },
    /// The contacted node refused a write because it is not the leader.
    /// The subsystem reconnects to the referral in the background; the
    /// failed operation is the caller's to retry.
    #[error("node is not the leader; referred to {leader}")]
    NotLeader {
        /// Leader endpoint named by the refusal.
        leader: Endpoint,
    },
    /// The server rejected an RPC with a non-transport status.
    #[error("server returned {code:?}: {message}")]
    Grpc {
        /// gRPC status code.
        code: Code,
        /// Status message supplied by the server.
        message: String,
    },
    /// The client or one of its subsystems was disposed. Never retried.
    #[error("client has been disposed")]
    Disposed,
    /// Malformed settings or connection string.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),
}

impl ClientError {
    /// Build a transport error from any displayable cause.
    pub fn transport(endpoint: &Endpoint, cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.clone(),
            message: cause.to_string(),
        }
    }

    /// Translate a gRPC status observed on `endpoint` into the client
    /// taxonomy, honoring the leader-referral trailers servers attach to
    /// not-leader refusals.
    pub fn from_status(endpoint: &Endpoint, status: &Status) -> Self {
        if let Some(leader) = leader_referral(status.metadata()) {
            return Self::NotLeader { leader };
        }
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded => Self::transport(endpoint, status),
            code => Self::Grpc {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

/// Errors raised while parsing settings or connection strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// Connection string does not start with the `strata://` scheme.
    #[error("connection string must start with strata:// (got {0:?})")]
    InvalidScheme(String),
    /// A host entry could not be split into host and port.
    #[error("invalid host entry {0:?}")]
    InvalidHost(String),
    /// A query parameter carried an unparseable value.
    #[error("invalid value {value:?} for parameter {key}")]
    InvalidParam {
        /// Parameter name as written in the connection string.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Seeds and a single-node address were both supplied, or neither.
    #[error("exactly one of seed endpoints or a single-node address is required")]
    AmbiguousTarget,
    /// The discovery retry budget must allow at least one round.
    #[error("max_discover_attempts must be at least 1")]
    ZeroAttempts,
}

fn leader_referral(metadata: &MetadataMap) -> Option<Endpoint> {
    let kind = metadata.get("exception")?.to_str().ok()?;
    if kind != "not-leader" {
        return None;
    }
    let host = metadata.get("leader-endpoint-host")?.to_str().ok()?;
    let port = metadata
        .get("leader-endpoint-port")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    Some(Endpoint::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    fn not_leader_status(host: &str, port: u16) -> Status {
        let mut metadata = MetadataMap::new();
        metadata.insert("exception", MetadataValue::from_static("not-leader"));
        metadata.insert(
            "leader-endpoint-host",
            host.parse().unwrap_or_else(|_| MetadataValue::from_static("")),
        );
        metadata.insert(
            "leader-endpoint-port",
            port.to_string()
                .parse()
                .unwrap_or_else(|_| MetadataValue::from_static("")),
        );
        Status::with_metadata(Code::FailedPrecondition, "not leader", metadata)
    }

    #[test]
    fn not_leader_trailers_become_a_referral() {
        let endpoint = Endpoint::new("node-1", 2_113);
        let err = ClientError::from_status(&endpoint, &not_leader_status("node-2", 2_113));
        assert_eq!(
            err,
            ClientError::NotLeader {
                leader: Endpoint::new("node-2", 2_113)
            }
        );
    }

    #[test]
    fn unavailable_maps_to_transport() {
        let endpoint = Endpoint::new("node-1", 2_113);
        let err = ClientError::from_status(&endpoint, &Status::unavailable("connection refused"));
        assert!(matches!(err, ClientError::Transport { .. }));
    }

    #[test]
    fn other_codes_stay_grpc() {
        let endpoint = Endpoint::new("node-1", 2_113);
        let err = ClientError::from_status(&endpoint, &Status::permission_denied("nope"));
        assert_eq!(
            err,
            ClientError::Grpc {
                code: Code::PermissionDenied,
                message: "nope".into()
            }
        );
    }
}
