//! Channel construction and the keyed connection pool.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tonic::transport::Channel;
use tracing::trace;

use crate::error::ClientError;
use crate::types::Endpoint;

/// Creates transport channels for endpoints.
///
/// The production implementation builds lazily connecting tonic channels;
/// tests substitute their own.
pub trait ChannelFactory: Send + Sync + 'static {
    /// Build a channel to `endpoint`. Must not block on the network;
    /// connection establishment happens on first use.
    fn create(&self, endpoint: &Endpoint) -> Result<Channel, ClientError>;
}

/// Tonic-backed factory producing lazily connected channels.
pub struct LazyChannelFactory {
    secure: bool,
}

impl LazyChannelFactory {
    /// Factory for plain or TLS channels depending on `secure`.
    #[must_use]
    pub const fn new(secure: bool) -> Self {
        Self { secure }
    }
}

impl ChannelFactory for LazyChannelFactory {
    fn create(&self, endpoint: &Endpoint) -> Result<Channel, ClientError> {
        let uri = endpoint.url(self.secure);
        let builder = tonic::transport::Endpoint::from_shared(uri)
            .map_err(|err| ClientError::transport(endpoint, err))?;
        Ok(builder.connect_lazy())
    }
}

struct CacheState {
    channels: HashMap<Endpoint, Channel>,
    disposed: bool,
}

/// Keyed pool of open channels, at most one per distinct endpoint.
///
/// The cache is the sole owner of every channel it creates; consumers
/// receive non-owning clones. Dropping an entry here is what actually tears
/// the connection down (tonic finishes the teardown in the background once
/// the last clone goes away).
pub struct ChannelCache {
    factory: Box<dyn ChannelFactory>,
    state: Mutex<CacheState>,
    rng: Mutex<SmallRng>,
}

impl ChannelCache {
    /// Empty cache drawing new channels from `factory`.
    pub fn new(factory: Box<dyn ChannelFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(CacheState {
                channels: HashMap::new(),
                disposed: false,
            }),
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Fetch the channel for `endpoint`, creating it on first use.
    pub fn get_or_create(&self, endpoint: &Endpoint) -> Result<Channel, ClientError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ClientError::Disposed);
        }
        if let Some(channel) = state.channels.get(endpoint) {
            return Ok(channel.clone());
        }
        let channel = self.factory.create(endpoint)?;
        state.channels.insert(endpoint.clone(), channel.clone());
        trace!(endpoint = %endpoint, "channel created");
        Ok(channel)
    }

    /// Reconcile the pool against `endpoints`: channels no longer wanted
    /// are closed, newly wanted ones are created, unchanged ones are kept
    /// untouched.
    pub fn replace_set(&self, endpoints: &[Endpoint]) -> Result<(), ClientError> {
        let wanted: HashSet<&Endpoint> = endpoints.iter().collect();

        let mut state = self.state.lock();
        if state.disposed {
            return Err(ClientError::Disposed);
        }

        let stale: Vec<Endpoint> = state
            .channels
            .keys()
            .filter(|endpoint| !wanted.contains(endpoint))
            .cloned()
            .collect();
        for endpoint in stale {
            state.channels.remove(&endpoint);
            trace!(endpoint = %endpoint, "channel dropped from pool");
        }

        for endpoint in wanted {
            if !state.channels.contains_key(endpoint) {
                let channel = self.factory.create(endpoint)?;
                state.channels.insert(endpoint.clone(), channel);
                trace!(endpoint = %endpoint, "channel added to pool");
            }
        }
        Ok(())
    }

    /// Randomized-order copy of the live entries, for iteration without
    /// holding the pool lock.
    pub fn snapshot(&self) -> Result<Vec<(Endpoint, Channel)>, ClientError> {
        let mut entries: Vec<(Endpoint, Channel)> = {
            let state = self.state.lock();
            if state.disposed {
                return Err(ClientError::Disposed);
            }
            state
                .channels
                .iter()
                .map(|(endpoint, channel)| (endpoint.clone(), channel.clone()))
                .collect()
        };
        entries.shuffle(&mut *self.rng.lock());
        Ok(entries)
    }

    /// Close every channel; later operations fail with
    /// [`ClientError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.channels.clear();
    }
}

impl Drop for ChannelCache {
    fn drop(&mut self) {
        self.dispose();
    }
}
