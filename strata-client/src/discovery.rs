//! Gossip-driven endpoint discovery.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, trace};

use crate::channel::ChannelCache;
use crate::error::ClientError;
use crate::gossip::GossipQuery;
use crate::ranking::NodeRankingPolicy;
use crate::settings::ClientSettings;
use crate::types::{ClusterInfo, Endpoint, MemberInfo, NodeState};

/// Repeatedly queries gossip until a role-appropriate member is found.
///
/// Each round walks every candidate in randomized order; a round that
/// exhausts all of them is followed by a `discovery_interval` pause before
/// the next. Per-candidate transport failures and empty snapshots are
/// swallowed here; only exhausting the whole retry budget surfaces as
/// [`ClientError::DiscoveryExhausted`].
pub struct EndpointDiscoverer {
    gossip: Arc<dyn GossipQuery>,
    cache: Arc<ChannelCache>,
    ranking: NodeRankingPolicy,
    seeds: Vec<Endpoint>,
    max_attempts: u32,
    discovery_interval: Duration,
    gossip_timeout: Duration,
    previous: Option<ClusterInfo>,
    rng: SmallRng,
}

impl EndpointDiscoverer {
    /// Discoverer over the configured seeds.
    pub fn new(
        settings: &ClientSettings,
        gossip: Arc<dyn GossipQuery>,
        cache: Arc<ChannelCache>,
    ) -> Self {
        let seeds = match &settings.address {
            Some(address) => vec![address.clone()],
            None => settings.seeds.clone(),
        };
        Self {
            gossip,
            cache,
            ranking: NodeRankingPolicy::new(settings.node_preference),
            seeds,
            max_attempts: settings.max_discover_attempts,
            discovery_interval: settings.discovery_interval,
            gossip_timeout: settings.gossip_timeout,
            previous: None,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Run discovery to a single chosen member.
    pub async fn discover(&mut self) -> Result<MemberInfo, ClientError> {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.discovery_interval).await;
            }
            if let Some(member) = self.attempt_once().await {
                debug!(attempt, endpoint = %member.endpoint, state = %member.state, "discovery selected a member");
                return Ok(member);
            }
            debug!(attempt, "discovery round exhausted all candidates");
        }
        Err(ClientError::DiscoveryExhausted {
            attempts: self.max_attempts,
        })
    }

    async fn attempt_once(&mut self) -> Option<MemberInfo> {
        for candidate in self.candidates() {
            match self.gossip.read(&candidate, self.gossip_timeout).await {
                Ok(info) if !info.members.is_empty() => {
                    let ranked = self.ranking.rank(&info.members, &mut self.rng);
                    let Some(best) = ranked.into_iter().next() else {
                        trace!(candidate = %candidate, "snapshot held no selectable member");
                        continue;
                    };
                    self.refresh_pool(&info);
                    self.previous = Some(info);
                    return Some(best);
                }
                Ok(_) => {
                    trace!(candidate = %candidate, "gossip returned an empty snapshot");
                }
                Err(err) => {
                    debug!(candidate = %candidate, "gossip query failed: {err}");
                }
            }
        }
        None
    }

    /// Candidate endpoints for one round: the remembered snapshot when one
    /// exists, otherwise the seeds. Shuffled either way; members that last
    /// reported Manager go to the back of the line.
    fn candidates(&mut self) -> Vec<Endpoint> {
        match self.previous.as_ref() {
            Some(info) => {
                let mut members: Vec<&MemberInfo> = info.members.iter().collect();
                members.shuffle(&mut self.rng);
                let (rest, managers): (Vec<&MemberInfo>, Vec<&MemberInfo>) = members
                    .into_iter()
                    .partition(|member| member.state != NodeState::Manager);
                rest.into_iter()
                    .chain(managers)
                    .map(|member| member.endpoint.clone())
                    .collect()
            }
            None => {
                let mut seeds = self.seeds.clone();
                seeds.shuffle(&mut self.rng);
                seeds
            }
        }
    }

    /// Keep the channel pool aligned with live membership so subsequent
    /// gossip rounds and validation reuse warm connections.
    fn refresh_pool(&self, info: &ClusterInfo) {
        let wanted: Vec<Endpoint> = info
            .members
            .iter()
            .filter(|member| member.is_alive && member.state.is_allowed())
            .map(|member| member.endpoint.clone())
            .collect();
        if wanted.is_empty() {
            return;
        }
        if let Err(err) = self.cache.replace_set(&wanted) {
            debug!("channel pool refresh skipped: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelFactory, LazyChannelFactory};
    use crate::types::NodePreference;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;
    use uuid::Uuid;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new("node", port)
    }

    fn member(port: u16, state: NodeState) -> MemberInfo {
        MemberInfo {
            instance_id: Uuid::new_v4(),
            state,
            is_alive: true,
            endpoint: endpoint(port),
        }
    }

    fn cache() -> Arc<ChannelCache> {
        Arc::new(ChannelCache::new(Box::new(LazyChannelFactory::new(false))))
    }

    /// Gossip stub replaying one scripted outcome per call and recording
    /// the order in which candidates were queried.
    struct ScriptedGossip {
        outcomes: Mutex<Vec<Result<ClusterInfo, ClientError>>>,
        calls: AtomicUsize,
        queried: Mutex<Vec<Endpoint>>,
    }

    impl ScriptedGossip {
        fn new(outcomes: Vec<Result<ClusterInfo, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
                queried: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl GossipQuery for ScriptedGossip {
        async fn read(
            &self,
            endpoint: &Endpoint,
            _timeout: Duration,
        ) -> Result<ClusterInfo, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queried.lock().push(endpoint.clone());
            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                Err(ClientError::transport(endpoint, "script exhausted"))
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn settings(seeds: Vec<Endpoint>, attempts: u32) -> ClientSettings {
        ClientSettings::for_cluster(seeds)
            .with_max_discover_attempts(attempts)
            .with_discovery_interval(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_failed_rounds_honors_the_interval() {
        let seed = endpoint(1);
        let snapshot = ClusterInfo {
            members: vec![member(1, NodeState::Leader)],
        };
        let gossip = ScriptedGossip::new(vec![
            Err(ClientError::transport(&seed, "down")),
            Err(ClientError::transport(&seed, "down")),
            Ok(snapshot),
        ]);
        let mut discoverer =
            EndpointDiscoverer::new(&settings(vec![seed], 5), gossip, cache());

        let started = Instant::now();
        let chosen = discoverer.discover().await.expect("third round succeeds");

        assert_eq!(chosen.endpoint, endpoint(1));
        // Two exhausted rounds, so two full interval pauses.
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_the_attempt_count() {
        let seed = endpoint(1);
        let gossip = ScriptedGossip::new(vec![
            Err(ClientError::transport(&seed, "down")),
            Err(ClientError::transport(&seed, "down")),
        ]);
        let mut discoverer =
            EndpointDiscoverer::new(&settings(vec![seed], 2), gossip, cache());

        let err = discoverer.discover().await;
        assert_eq!(err, Err(ClientError::DiscoveryExhausted { attempts: 2 }));
    }

    #[tokio::test]
    async fn snapshot_with_no_selectable_member_moves_to_next_candidate() {
        let bad = ClusterInfo {
            members: vec![member(1, NodeState::Manager)],
        };
        let good = ClusterInfo {
            members: vec![member(2, NodeState::Leader)],
        };
        let gossip = ScriptedGossip::new(vec![Ok(bad), Ok(good)]);
        let mut discoverer = EndpointDiscoverer::new(
            &settings(vec![endpoint(1), endpoint(2)], 1),
            Arc::clone(&gossip) as Arc<dyn GossipQuery>,
            cache(),
        );

        let chosen = discoverer.discover().await.expect("second candidate");
        assert_eq!(chosen.endpoint, endpoint(2));
        assert_eq!(gossip.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resumed_discovery_tries_managers_last() {
        let snapshot = ClusterInfo {
            members: vec![
                member(1, NodeState::Manager),
                member(2, NodeState::Follower),
                member(3, NodeState::Leader),
            ],
        };
        let gossip = ScriptedGossip::new(vec![
            Ok(snapshot.clone()),
            // Second discovery: every candidate fails so the full query
            // order is observable.
            Err(ClientError::transport(&endpoint(9), "down")),
            Err(ClientError::transport(&endpoint(9), "down")),
            Err(ClientError::transport(&endpoint(9), "down")),
        ]);
        let mut discoverer = EndpointDiscoverer::new(
            &settings(vec![endpoint(7)], 1),
            Arc::clone(&gossip) as Arc<dyn GossipQuery>,
            cache(),
        );

        discoverer.discover().await.expect("first discovery");
        let _ = discoverer.discover().await;

        let queried = gossip.queried.lock();
        // Calls 2..=4 walk the remembered snapshot; the manager at :1 must
        // come last no matter how the shuffle fell.
        assert_eq!(queried.len(), 4);
        assert_eq!(queried[3], endpoint(1));
    }

    #[tokio::test]
    async fn pool_tracks_live_selectable_members() {
        let snapshot = ClusterInfo {
            members: vec![
                member(1, NodeState::Leader),
                member(2, NodeState::Follower),
                member(3, NodeState::Manager),
            ],
        };
        let gossip = ScriptedGossip::new(vec![Ok(snapshot)]);
        let cache = cache();
        let mut discoverer = EndpointDiscoverer::new(
            &settings(vec![endpoint(1)], 1),
            Arc::clone(&gossip) as Arc<dyn GossipQuery>,
            Arc::clone(&cache),
        );

        discoverer.discover().await.expect("discovery");
        let pooled: Vec<Endpoint> = cache
            .snapshot()
            .expect("snapshot")
            .into_iter()
            .map(|(endpoint, _)| endpoint)
            .collect();
        assert_eq!(pooled.len(), 2);
        assert!(pooled.contains(&endpoint(1)));
        assert!(pooled.contains(&endpoint(2)));
        assert!(!pooled.contains(&endpoint(3)));
    }

    // Keeps the trait boundary honest for external implementations.
    #[test]
    fn channel_factory_is_object_safe() {
        let _factory: Box<dyn ChannelFactory> = Box::new(LazyChannelFactory::new(false));
    }
}
