//! Gossip query boundary.
//!
//! Any cluster node can be asked for its view of membership; discovery only
//! ever needs this single RPC. The trait keeps the gossip transport
//! replaceable (tests drive discovery with scripted snapshots).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::channel::ChannelCache;
use crate::error::ClientError;
use crate::types::{ClusterInfo, Endpoint, MemberInfo, NodeState};

/// One-shot gossip read against a candidate node.
#[async_trait]
pub trait GossipQuery: Send + Sync + 'static {
    /// Query `endpoint` for its view of cluster membership, bounded by
    /// `timeout`.
    async fn read(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<ClusterInfo, ClientError>;
}

/// Production gossip query over channels borrowed from the pool.
pub struct GrpcGossip {
    cache: Arc<ChannelCache>,
}

impl GrpcGossip {
    /// Gossip client reusing pooled channels.
    pub fn new(cache: Arc<ChannelCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl GossipQuery for GrpcGossip {
    async fn read(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<ClusterInfo, ClientError> {
        let channel = self.cache.get_or_create(endpoint)?;
        let mut client = strata_wire::GossipClient::new(channel);
        let call = client.read(strata_wire::Empty::default());
        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ClientError::transport(endpoint, "gossip read timed out"))?
            .map_err(|status| ClientError::transport(endpoint, status))?;
        Ok(cluster_from_wire(response.into_inner()))
    }
}

fn cluster_from_wire(info: strata_wire::gossip::ClusterInfo) -> ClusterInfo {
    ClusterInfo {
        members: info.members.into_iter().map(member_from_wire).collect(),
    }
}

fn member_from_wire(member: strata_wire::gossip::MemberInfo) -> MemberInfo {
    let state = strata_wire::gossip::NodeState::try_from(member.state)
        .map_or(NodeState::Unknown, state_from_wire);
    MemberInfo {
        instance_id: Uuid::parse_str(&member.instance_id).unwrap_or(Uuid::nil()),
        state,
        is_alive: member.is_alive,
        endpoint: Endpoint::new(member.host, member.port as u16),
    }
}

const fn state_from_wire(state: strata_wire::gossip::NodeState) -> NodeState {
    use strata_wire::gossip::NodeState as Wire;
    match state {
        Wire::Initializing => NodeState::Initializing,
        Wire::DiscoverLeader => NodeState::DiscoverLeader,
        Wire::Unknown => NodeState::Unknown,
        Wire::PreReplica => NodeState::PreReplica,
        Wire::CatchingUp => NodeState::CatchingUp,
        Wire::Clone => NodeState::Clone,
        Wire::Follower => NodeState::Follower,
        Wire::PreLeader => NodeState::PreLeader,
        Wire::Leader => NodeState::Leader,
        Wire::Manager => NodeState::Manager,
        Wire::ShuttingDown => NodeState::ShuttingDown,
        Wire::Shutdown => NodeState::Shutdown,
        Wire::ReadOnlyLeaderless => NodeState::ReadOnlyLeaderless,
        Wire::PreReadOnlyReplica => NodeState::PreReadOnlyReplica,
        Wire::ReadOnlyReplica => NodeState::ReadOnlyReplica,
        Wire::ResigningLeader => NodeState::ResigningLeader,
    }
}
