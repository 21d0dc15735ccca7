//! Protobuf surface for the Strata control-plane RPCs.
//!
//! Only two RPCs cross the client/server boundary at this layer: the gossip
//! read used during cluster discovery and the capability probe issued once
//! per validated endpoint. The message structs and client wrappers below are
//! written out by hand in the exact shape `tonic-build` would generate for
//! them, which keeps the crate free of a protoc build step.

use http::uri::PathAndQuery;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::transport::Channel;
use tonic::{Response, Status};

/// Empty request payload shared by the control-plane RPCs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

pub mod gossip {
    //! Messages for `strata.gossip.Gossip/Read`.

    /// One node's view of cluster membership.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClusterInfo {
        #[prost(message, repeated, tag = "1")]
        pub members: ::prost::alloc::vec::Vec<MemberInfo>,
    }

    /// Identity, role and liveness of a single member.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MemberInfo {
        #[prost(string, tag = "1")]
        pub instance_id: ::prost::alloc::string::String,
        #[prost(enumeration = "NodeState", tag = "2")]
        pub state: i32,
        #[prost(bool, tag = "3")]
        pub is_alive: bool,
        #[prost(string, tag = "4")]
        pub host: ::prost::alloc::string::String,
        #[prost(uint32, tag = "5")]
        pub port: u32,
    }

    /// Replication/lifecycle role a member advertises over gossip.
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum NodeState {
        Initializing = 0,
        DiscoverLeader = 1,
        Unknown = 2,
        PreReplica = 3,
        CatchingUp = 4,
        Clone = 5,
        Follower = 6,
        PreLeader = 7,
        Leader = 8,
        Manager = 9,
        ShuttingDown = 10,
        Shutdown = 11,
        ReadOnlyLeaderless = 12,
        PreReadOnlyReplica = 13,
        ReadOnlyReplica = 14,
        ResigningLeader = 15,
    }
}

pub mod features {
    //! Messages for `strata.features.Features/GetSupportedMethods`.

    /// Catalogue of optional RPCs the connected server implements.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SupportedMethods {
        #[prost(string, tag = "1")]
        pub server_version: ::prost::alloc::string::String,
        #[prost(message, repeated, tag = "2")]
        pub methods: ::prost::alloc::vec::Vec<SupportedMethod>,
    }

    /// One optional RPC plus its feature flags.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SupportedMethod {
        #[prost(string, tag = "1")]
        pub service_name: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub method_name: ::prost::alloc::string::String,
        #[prost(string, repeated, tag = "3")]
        pub features: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    }
}

/// Client for the `strata.gossip.Gossip` service.
#[derive(Debug, Clone)]
pub struct GossipClient {
    inner: Grpc<Channel>,
}

impl GossipClient {
    /// Wrap an existing channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Grpc::new(channel),
        }
    }

    /// Ask the connected node for its view of cluster membership.
    pub async fn read(
        &mut self,
        request: impl tonic::IntoRequest<Empty>,
    ) -> Result<Response<gossip::ClusterInfo>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
        let codec: ProstCodec<Empty, gossip::ClusterInfo> = ProstCodec::default();
        let path = PathAndQuery::from_static("/strata.gossip.Gossip/Read");
        self.inner.unary(request.into_request(), path, codec).await
    }
}

/// Client for the `strata.features.Features` service.
#[derive(Debug, Clone)]
pub struct FeaturesClient {
    inner: Grpc<Channel>,
}

impl FeaturesClient {
    /// Wrap an existing channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Grpc::new(channel),
        }
    }

    /// Fetch the catalogue of optional methods the server supports.
    ///
    /// Older servers answer this with `Unimplemented`; callers are expected
    /// to treat that status as an empty catalogue, not a failure.
    pub async fn get_supported_methods(
        &mut self,
        request: impl tonic::IntoRequest<Empty>,
    ) -> Result<Response<features::SupportedMethods>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
        let codec: ProstCodec<Empty, features::SupportedMethods> = ProstCodec::default();
        let path = PathAndQuery::from_static("/strata.features.Features/GetSupportedMethods");
        self.inner.unary(request.into_request(), path, codec).await
    }
}
