//! HTTP failover hook.
//!
//! A handful of operations travel over plain HTTP instead of gRPC. They
//! share one cached endpoint: requests are rewritten to its scheme, host
//! and port and tagged with a requires-leader header. A transport failure
//! invalidates the cache by generation compare-and-swap, so any number of
//! concurrent failures clear it exactly once and the next request performs
//! a single rediscovery.

use std::future::Future;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ClientError;
use crate::types::Endpoint;

struct HttpState {
    generation: u64,
    endpoint: Option<Endpoint>,
}

/// Single-endpoint cache backing the plain-HTTP operation subset.
pub struct HttpFallback {
    client: reqwest::Client,
    scheme: &'static str,
    state: Mutex<HttpState>,
}

impl HttpFallback {
    /// Hook routing over plain or TLS HTTP depending on `secure`.
    pub fn new(secure: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            scheme: if secure { "https" } else { "http" },
            state: Mutex::new(HttpState {
                generation: 0,
                endpoint: None,
            }),
        }
    }

    /// Seed the cache directly; leader redirects observed on the gRPC side
    /// land here so the next HTTP call skips rediscovery.
    pub fn seed(&self, endpoint: Endpoint) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.endpoint = Some(endpoint);
    }

    /// Send one request to the cluster, resolving the target endpoint from
    /// the cache or, on a miss, from `refresh`.
    pub async fn execute<F>(
        &self,
        method: reqwest::Method,
        path: &str,
        refresh: F,
    ) -> Result<reqwest::Response, ClientError>
    where
        F: Future<Output = Result<Endpoint, ClientError>>,
    {
        let (generation, endpoint) = match self.cached() {
            (generation, Some(endpoint)) => (generation, endpoint),
            (_, None) => {
                let endpoint = refresh.await?;
                self.seed(endpoint.clone());
                (self.state.lock().generation, endpoint)
            }
        };

        let url = format!(
            "{}://{}:{}{}",
            self.scheme, endpoint.host, endpoint.port, path
        );
        let result = self
            .client
            .request(method, url)
            .header("requires-leader", "true")
            .send()
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                if self.invalidate(generation) {
                    debug!(endpoint = %endpoint, "http endpoint invalidated: {err}");
                }
                Err(ClientError::transport(&endpoint, err))
            }
        }
    }

    fn cached(&self) -> (u64, Option<Endpoint>) {
        let state = self.state.lock();
        (state.generation, state.endpoint.clone())
    }

    /// Drop the cached endpoint iff `generation` is still current. Returns
    /// whether this call was the one that cleared it.
    fn invalidate(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation == generation && state.endpoint.is_some() {
            state.endpoint = None;
            state.generation += 1;
            true
        } else {
            false
        }
    }
}
