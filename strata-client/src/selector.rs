//! Channel selection state machine.
//!
//! One background worker owns the discoverer and consumes a FIFO queue of
//! control messages; every message yields exactly one entry on the output
//! queue. Because a single worker does all the work, at most one discovery
//! is ever in flight, and a redundant `Discover` enqueued while one is
//! pending collapses into the in-flight attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tonic::transport::Channel;
use tracing::{debug, trace, warn};

use crate::channel::ChannelCache;
use crate::discovery::EndpointDiscoverer;
use crate::error::ClientError;
use crate::features::{FeatureProbe, ServerFeatures};
use crate::sharing::SlotId;
use crate::types::Endpoint;

/// Validated connection handed to consumers.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Production slot this channel was resolved under; breakage reports
    /// reference it.
    pub id: SlotId,
    /// Node the channel is bound to.
    pub endpoint: Endpoint,
    /// Transport handle. A non-owning clone; the channel cache owns the
    /// connection.
    pub channel: Channel,
    /// Optional server capabilities learned from the probe.
    pub features: ServerFeatures,
}

#[derive(Debug)]
enum SelectorCommand {
    /// Run a full gossip discovery sweep.
    Discover { slot: SlotId },
    /// Validate one endpoint directly, bypassing ranking (leader redirect
    /// and single-node mode).
    SetEndpoint { slot: SlotId, endpoint: Endpoint },
}

/// Composes discovery, channel caching and capability probing into a stream
/// of validated channels.
pub struct ChannelSelector {
    commands: Mutex<Option<mpsc::UnboundedSender<SelectorCommand>>>,
    output: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<ChannelInfo, ClientError>>>,
    discover_pending: Arc<AtomicBool>,
    terminal: Arc<Mutex<Option<ClientError>>>,
}

impl ChannelSelector {
    /// Spawn the worker. It lives until the selector is dropped or shut
    /// down, or until discovery fails terminally.
    pub fn spawn(
        discoverer: EndpointDiscoverer,
        cache: Arc<ChannelCache>,
        probe: Arc<dyn FeatureProbe>,
        probe_timeout: Duration,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let discover_pending = Arc::new(AtomicBool::new(false));
        let terminal = Arc::new(Mutex::new(None));

        let worker = SelectorWorker {
            discoverer,
            cache,
            probe,
            probe_timeout,
            features: HashMap::new(),
            discover_pending: Arc::clone(&discover_pending),
            terminal: Arc::clone(&terminal),
        };
        tokio::spawn(worker.run(command_rx, output_tx));

        Self {
            commands: Mutex::new(Some(command_tx)),
            output: tokio::sync::Mutex::new(output_rx),
            discover_pending,
            terminal,
        }
    }

    /// Run one full discovery and return the validated channel.
    pub async fn select(&self, slot: SlotId) -> Result<ChannelInfo, ClientError> {
        // A discovery already pending means the queued command will serve
        // this caller too; enqueueing another would be a wasted sweep.
        if self.discover_pending.swap(true, Ordering::AcqRel) {
            trace!("discovery already in progress; joining it");
        } else {
            self.enqueue(SelectorCommand::Discover { slot })?;
        }
        self.next().await
    }

    /// Validate a single endpoint, bypassing ranking.
    pub async fn select_endpoint(
        &self,
        slot: SlotId,
        endpoint: Endpoint,
    ) -> Result<ChannelInfo, ClientError> {
        self.enqueue(SelectorCommand::SetEndpoint { slot, endpoint })?;
        self.next().await
    }

    /// Stop the worker. Subsequent selections fail with the terminal error
    /// if one was recorded, otherwise [`ClientError::Disposed`].
    pub fn shutdown(&self) {
        self.commands.lock().take();
    }

    fn enqueue(&self, command: SelectorCommand) -> Result<(), ClientError> {
        let commands = self.commands.lock();
        let Some(sender) = commands.as_ref() else {
            return Err(self.terminal_error());
        };
        sender
            .send(command)
            .map_err(|_| self.terminal_error())
    }

    async fn next(&self) -> Result<ChannelInfo, ClientError> {
        let mut output = self.output.lock().await;
        match output.recv().await {
            Some(result) => result,
            None => Err(self.terminal_error()),
        }
    }

    fn terminal_error(&self) -> ClientError {
        self.terminal
            .lock()
            .clone()
            .unwrap_or(ClientError::Disposed)
    }
}

struct SelectorWorker {
    discoverer: EndpointDiscoverer,
    cache: Arc<ChannelCache>,
    probe: Arc<dyn FeatureProbe>,
    probe_timeout: Duration,
    /// Capability probe results, kept per endpoint so a reconnect to a
    /// known node skips the probe.
    features: HashMap<Endpoint, ServerFeatures>,
    discover_pending: Arc<AtomicBool>,
    terminal: Arc<Mutex<Option<ClientError>>>,
}

impl SelectorWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SelectorCommand>,
        output: mpsc::UnboundedSender<Result<ChannelInfo, ClientError>>,
    ) {
        while let Some(command) = commands.recv().await {
            let result = match command {
                SelectorCommand::Discover { slot } => {
                    let result = self.discover(slot).await;
                    self.discover_pending.store(false, Ordering::Release);
                    result
                }
                SelectorCommand::SetEndpoint { slot, endpoint } => {
                    debug!(endpoint = %endpoint, "validating endpoint directly");
                    self.validate(slot, endpoint).await
                }
            };

            let terminal = match &result {
                Err(err @ ClientError::DiscoveryExhausted { .. }) => Some(err.clone()),
                _ => None,
            };
            if output.send(result).is_err() {
                // Selector was dropped; nothing left to serve.
                return;
            }
            if let Some(err) = terminal {
                warn!("discovery exhausted; selector is permanently failed");
                *self.terminal.lock() = Some(err);
                break;
            }
        }
    }

    async fn discover(&mut self, slot: SlotId) -> Result<ChannelInfo, ClientError> {
        let member = self.discoverer.discover().await?;
        self.validate(slot, member.endpoint).await
    }

    async fn validate(
        &mut self,
        slot: SlotId,
        endpoint: Endpoint,
    ) -> Result<ChannelInfo, ClientError> {
        let channel = self.cache.get_or_create(&endpoint)?;
        let features = match self.features.get(&endpoint) {
            Some(features) => features.clone(),
            None => {
                let features = self
                    .probe
                    .probe(&endpoint, channel.clone(), self.probe_timeout)
                    .await?;
                self.features.insert(endpoint.clone(), features.clone());
                features
            }
        };
        Ok(ChannelInfo {
            id: slot,
            endpoint,
            channel,
            features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LazyChannelFactory;
    use crate::gossip::GossipQuery;
    use crate::settings::ClientSettings;
    use crate::types::{ClusterInfo, MemberInfo, NodeState};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new("node", port)
    }

    fn leader_snapshot(port: u16) -> ClusterInfo {
        ClusterInfo {
            members: vec![MemberInfo {
                instance_id: Uuid::new_v4(),
                state: NodeState::Leader,
                is_alive: true,
                endpoint: endpoint(port),
            }],
        }
    }

    struct StubGossip {
        snapshot: Option<ClusterInfo>,
        calls: AtomicUsize,
    }

    impl StubGossip {
        fn answering(snapshot: ClusterInfo) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Some(snapshot),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                snapshot: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GossipQuery for StubGossip {
        async fn read(
            &self,
            endpoint: &Endpoint,
            _timeout: Duration,
        ) -> Result<ClusterInfo, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.snapshot
                .clone()
                .ok_or_else(|| ClientError::transport(endpoint, "down"))
        }
    }

    struct CountingProbe {
        calls: AtomicUsize,
    }

    impl CountingProbe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FeatureProbe for CountingProbe {
        async fn probe(
            &self,
            _endpoint: &Endpoint,
            _channel: Channel,
            _timeout: Duration,
        ) -> Result<ServerFeatures, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ServerFeatures::default())
        }
    }

    fn selector(gossip: Arc<StubGossip>, probe: Arc<CountingProbe>, attempts: u32) -> ChannelSelector {
        let settings = ClientSettings::for_cluster(vec![endpoint(1)])
            .with_max_discover_attempts(attempts)
            .with_discovery_interval(Duration::from_millis(1));
        let cache = Arc::new(ChannelCache::new(Box::new(LazyChannelFactory::new(false))));
        let discoverer = EndpointDiscoverer::new(
            &settings,
            gossip as Arc<dyn GossipQuery>,
            Arc::clone(&cache),
        );
        ChannelSelector::spawn(
            discoverer,
            cache,
            probe as Arc<dyn FeatureProbe>,
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn discovery_produces_a_validated_channel() {
        let gossip = StubGossip::answering(leader_snapshot(1));
        let probe = CountingProbe::new();
        let selector = selector(Arc::clone(&gossip), Arc::clone(&probe), 3);

        let info = selector.select(SlotId::new(1)).await.expect("selected");
        assert_eq!(info.endpoint, endpoint(1));
        assert_eq!(info.id, SlotId::new(1));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_endpoint_skips_gossip_entirely() {
        let gossip = StubGossip::answering(leader_snapshot(1));
        let probe = CountingProbe::new();
        let selector = selector(Arc::clone(&gossip), probe, 3);

        let info = selector
            .select_endpoint(SlotId::new(1), endpoint(5))
            .await
            .expect("validated");
        assert_eq!(info.endpoint, endpoint(5));
        assert_eq!(gossip.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn probe_runs_once_per_endpoint() {
        let gossip = StubGossip::answering(leader_snapshot(1));
        let probe = CountingProbe::new();
        let selector = selector(gossip, Arc::clone(&probe), 3);

        selector
            .select_endpoint(SlotId::new(1), endpoint(5))
            .await
            .expect("first validation");
        selector
            .select_endpoint(SlotId::new(2), endpoint(5))
            .await
            .expect("revalidation");

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_discovery_fails_the_selector_permanently() {
        let gossip = StubGossip::failing();
        let probe = CountingProbe::new();
        let selector = selector(gossip, probe, 2);

        let first = selector.select(SlotId::new(1)).await;
        assert_eq!(
            first.err(),
            Some(ClientError::DiscoveryExhausted { attempts: 2 })
        );

        let second = selector.select(SlotId::new(2)).await;
        assert_eq!(
            second.err(),
            Some(ClientError::DiscoveryExhausted { attempts: 2 })
        );

        let direct = selector.select_endpoint(SlotId::new(3), endpoint(5)).await;
        assert_eq!(
            direct.err(),
            Some(ClientError::DiscoveryExhausted { attempts: 2 })
        );
    }

    #[tokio::test]
    async fn shutdown_fails_later_selections_with_disposed() {
        let gossip = StubGossip::answering(leader_snapshot(1));
        let probe = CountingProbe::new();
        let selector = selector(gossip, probe, 3);

        selector.shutdown();
        let result = selector.select_endpoint(SlotId::new(1), endpoint(5)).await;
        assert_eq!(result.err(), Some(ClientError::Disposed));
    }
}

