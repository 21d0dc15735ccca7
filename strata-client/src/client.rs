//! Client composition root.
//!
//! Wires the shared-resource provider around the channel selector so every
//! operation sees one current validated channel, with a leader-redirect
//! fast path: a "not leader" refusal reconnects straight to the referral
//! instead of running a full gossip sweep.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, warn};

use crate::channel::{ChannelCache, LazyChannelFactory};
use crate::discovery::EndpointDiscoverer;
use crate::error::ClientError;
use crate::features::{FeatureProbe, GrpcFeatureProbe, ServerFeatures};
use crate::gossip::{GossipQuery, GrpcGossip};
use crate::http::HttpFallback;
use crate::selector::{ChannelInfo, ChannelSelector};
use crate::settings::ClientSettings;
use crate::sharing::{ResourceFactory, SharedResourceProvider, SlotId};
use crate::types::{Endpoint, ReconnectionRequired};

/// Maps the reconnection input onto the selector: a full sweep for
/// `Rediscover`, a direct validation for `NewLeader`.
struct ChannelInfoFactory {
    selector: Arc<ChannelSelector>,
}

#[async_trait]
impl ResourceFactory<ReconnectionRequired, ChannelInfo> for ChannelInfoFactory {
    async fn produce(
        &self,
        input: ReconnectionRequired,
        slot: SlotId,
    ) -> Result<ChannelInfo, ClientError> {
        match input {
            ReconnectionRequired::NewLeader(endpoint) => {
                self.selector.select_endpoint(slot, endpoint).await
            }
            ReconnectionRequired::Rediscover => self.selector.select(slot).await,
            ReconnectionRequired::None => {
                // Nothing should produce from `None`; fall back to a sweep.
                debug!("production requested with no reconnection input");
                self.selector.select(slot).await
            }
        }
    }
}

struct ClientInner {
    settings: ClientSettings,
    provider: SharedResourceProvider<ReconnectionRequired, ChannelInfo>,
    selector: Arc<ChannelSelector>,
    cache: Arc<ChannelCache>,
    http: HttpFallback,
}

/// Client for a Strata cluster (or single node).
///
/// Cheap to clone; all clones share the same discovery state and channel
/// pool. Must be created within a tokio runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Per-operation view of the validated connection, carrying the request
/// pipeline for outgoing calls.
pub struct RequestContext {
    channel: Channel,
    endpoint: Endpoint,
    features: ServerFeatures,
    connection_name: String,
}

impl RequestContext {
    fn new(info: &ChannelInfo, connection_name: &str) -> Self {
        Self {
            channel: info.channel.clone(),
            endpoint: info.endpoint.clone(),
            features: info.features.clone(),
            connection_name: connection_name.to_string(),
        }
    }

    /// Transport handle for driving generated RPC clients.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Node this context is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Capabilities of the connected server.
    #[must_use]
    pub const fn features(&self) -> &ServerFeatures {
        &self.features
    }

    /// Wrap `message` with the client's standing request metadata.
    pub fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        if let Ok(value) = MetadataValue::try_from(self.connection_name.as_str()) {
            request.metadata_mut().insert("connection-name", value);
        }
        request
    }
}

/// Snapshot of the connection subsystem for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// Endpoint of the currently validated channel.
    pub endpoint: Endpoint,
    /// Endpoints holding live pooled channels, in randomized order.
    pub pooled: Vec<Endpoint>,
}

impl Client {
    /// Create a client with the production gossip and probe collaborators.
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        let cache = Arc::new(ChannelCache::new(Box::new(LazyChannelFactory::new(
            settings.secure,
        ))));
        let gossip = Arc::new(GrpcGossip::new(Arc::clone(&cache)));
        Self::with_collaborators(settings, cache, gossip, Arc::new(GrpcFeatureProbe))
    }

    /// Wire the client against explicit collaborator implementations.
    ///
    /// Used by tests and by embedders that bring their own transports; the
    /// channel cache must be the one the gossip implementation borrows
    /// channels from.
    pub fn with_collaborators(
        settings: ClientSettings,
        cache: Arc<ChannelCache>,
        gossip: Arc<dyn GossipQuery>,
        probe: Arc<dyn FeatureProbe>,
    ) -> Result<Self, ClientError> {
        settings.validate()?;

        let discoverer = EndpointDiscoverer::new(&settings, gossip, Arc::clone(&cache));
        let selector = Arc::new(ChannelSelector::spawn(
            discoverer,
            Arc::clone(&cache),
            probe,
            settings.gossip_timeout,
        ));

        // Single-node mode validates its one endpoint directly and keeps
        // doing so on every reconnect; cluster mode boots from a sweep.
        let boot = match &settings.address {
            Some(address) => ReconnectionRequired::NewLeader(address.clone()),
            None => ReconnectionRequired::Rediscover,
        };
        let provider = SharedResourceProvider::new(
            Arc::new(ChannelInfoFactory {
                selector: Arc::clone(&selector),
            }),
            boot,
            settings.discovery_interval,
        );

        let http = HttpFallback::new(settings.secure);
        Ok(Self {
            inner: Arc::new(ClientInner {
                settings,
                provider,
                selector,
                cache,
                http,
            }),
        })
    }

    /// Settings this client was built from.
    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Wait for the current validated channel.
    pub async fn current_channel(&self) -> Result<ChannelInfo, ClientError> {
        self.inner.provider.get_current().await
    }

    /// Run `op` against the current validated channel.
    ///
    /// Failures are translated into the client taxonomy. A "not leader"
    /// refusal is surfaced to this caller while a targeted reconnect to the
    /// referral is scheduled for everyone else; a transport failure
    /// schedules a full rediscovery the same way.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let info = self.inner.provider.get_current().await?;
        let context = RequestContext::new(&info, &self.inner.settings.connection_name);
        match op(context).await {
            Ok(value) => Ok(value),
            Err(status) => Err(self.report_status(&info, &status)),
        }
    }

    /// Force a full topology rediscovery for future operations.
    pub fn rediscover(&self) {
        debug!("rediscovery requested");
        self.inner.provider.reset();
    }

    /// Send one plain-HTTP request to the cluster through the failover
    /// hook.
    pub async fn http_execute(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let refresh = async {
            let info = self.inner.provider.get_current().await?;
            Ok(info.endpoint)
        };
        self.inner.http.execute(method, path, refresh).await
    }

    /// Currently validated endpoint plus the live channel pool.
    pub async fn connection_state(&self) -> Result<ConnectionState, ClientError> {
        let info = self.inner.provider.get_current().await?;
        let pooled = self
            .inner
            .cache
            .snapshot()?
            .into_iter()
            .map(|(endpoint, _)| endpoint)
            .collect();
        Ok(ConnectionState {
            endpoint: info.endpoint,
            pooled,
        })
    }

    /// Dispose the client: fail future productions with
    /// [`ClientError::Disposed`], stop the selector worker and close every
    /// pooled channel. Idempotent.
    pub fn dispose(&self) {
        self.inner.provider.dispose();
        self.inner.selector.shutdown();
        self.inner.cache.dispose();
    }

    /// Translate `status` and arrange the appropriate reconnection.
    fn report_status(&self, info: &ChannelInfo, status: &Status) -> ClientError {
        let err = ClientError::from_status(&info.endpoint, status);
        match &err {
            ClientError::NotLeader { leader } => {
                warn!(leader = %leader, "node refused as non-leader; reconnecting to referral");
                self.inner.http.seed(leader.clone());
                self.inner
                    .provider
                    .on_broken(info.id, ReconnectionRequired::NewLeader(leader.clone()));
            }
            ClientError::Transport { .. } => {
                warn!(endpoint = %info.endpoint, "channel reported broken: {err}");
                self.inner
                    .provider
                    .on_broken(info.id, ReconnectionRequired::Rediscover);
            }
            _ => {}
        }
        err
    }
}
