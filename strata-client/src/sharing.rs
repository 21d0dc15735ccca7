//! Single-flight production of a shared, occasionally broken resource.
//!
//! Many concurrent consumers need "the current validated channel" without
//! duplicating the work of producing it: the factory runs at most once
//! concurrently, everyone awaiting the same production shares its outcome,
//! and any holder of the resource may later report it broken to trigger
//! exactly one replacement. Breakage is reported as an explicit
//! `{slot id, replacement input}` pair compared against the current slot,
//! so a stale report (the slot was already replaced) is recognized and
//! dropped instead of stampeding reproductions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::ClientError;

/// Identifier of one production slot. Breakage reports carry it so the
/// provider can tell a live report from a stale one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

impl SlotId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Single-assignment future holding one production's outcome.
struct Slot<O> {
    id: u64,
    cell: watch::Sender<Option<Result<O, ClientError>>>,
}

impl<O: Clone> Slot<O> {
    fn new(id: u64) -> Arc<Self> {
        let (cell, _) = watch::channel(None);
        Arc::new(Self { id, cell })
    }

    /// First write wins; later resolutions are dropped.
    fn resolve(&self, result: Result<O, ClientError>) -> bool {
        let mut result = Some(result);
        self.cell.send_if_modified(|value| {
            if value.is_none() {
                *value = result.take();
                true
            } else {
                false
            }
        })
    }

    fn is_resolved(&self) -> bool {
        self.cell.borrow().is_some()
    }

    async fn wait(&self) -> Result<O, ClientError> {
        let mut rx = self.cell.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Err(ClientError::Disposed)),
            // The sender lives as long as this slot, so this arm is only
            // reachable through disposal races.
            Err(_) => Err(ClientError::Disposed),
        }
    }
}

/// Produces the shared resource.
#[async_trait]
pub trait ResourceFactory<I, O>: Send + Sync + 'static {
    /// Produce a fresh output for `input`. The `slot` identifier must be
    /// captured into the output so its owner can report breakage against
    /// the production that handed it out.
    async fn produce(&self, input: I, slot: SlotId) -> Result<O, ClientError>;
}

struct ProviderState<I, O> {
    current: Arc<Slot<O>>,
    last_input: I,
    disposed: bool,
}

struct ProviderInner<I, O> {
    factory: Arc<dyn ResourceFactory<I, O>>,
    boot_input: I,
    retry_delay: Duration,
    next_id: AtomicU64,
    state: Mutex<ProviderState<I, O>>,
}

/// Hands one lazily produced resource to many concurrent consumers with
/// single-flight reproduction and self-healing retries.
pub struct SharedResourceProvider<I, O> {
    inner: Arc<ProviderInner<I, O>>,
}

impl<I, O> Clone for SharedResourceProvider<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> SharedResourceProvider<I, O>
where
    I: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Start the provider and kick off the first production from
    /// `boot_input`. Must be called within a tokio runtime.
    pub fn new(
        factory: Arc<dyn ResourceFactory<I, O>>,
        boot_input: I,
        retry_delay: Duration,
    ) -> Self {
        let slot = Slot::new(0);
        let inner = Arc::new(ProviderInner {
            factory,
            boot_input: boot_input.clone(),
            retry_delay,
            next_id: AtomicU64::new(1),
            state: Mutex::new(ProviderState {
                current: Arc::clone(&slot),
                last_input: boot_input.clone(),
                disposed: false,
            }),
        });
        Self::spawn_production(&inner, slot, boot_input);
        Self { inner }
    }

    /// Wait for the current production and return its outcome.
    ///
    /// Suspends only until the slot that is current *now* resolves; a
    /// replacement installed afterwards is observed by the next call.
    pub async fn get_current(&self) -> Result<O, ClientError> {
        let slot = {
            let state = self.inner.state.lock();
            if state.disposed {
                return Err(ClientError::Disposed);
            }
            Arc::clone(&state.current)
        };
        slot.wait().await
    }

    /// Produce for `input` if it differs from the last input used;
    /// otherwise join the current production.
    pub async fn get_async(&self, input: I) -> Result<O, ClientError> {
        let slot = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(ClientError::Disposed);
            }
            if state.last_input == input {
                Arc::clone(&state.current)
            } else {
                let slot = self.install_slot(&mut state, input.clone());
                Self::spawn_production(&self.inner, Arc::clone(&slot), input);
                slot
            }
        };
        slot.wait().await
    }

    /// Report that the output produced under `slot` is broken and request a
    /// replacement produced from `input`.
    ///
    /// No-op when the slot is still unresolved (its production is already
    /// running), when it has been superseded by a newer slot, or after
    /// disposal. Concurrent reports against the same resource therefore
    /// trigger exactly one reproduction.
    pub fn on_broken(&self, slot: SlotId, input: I) {
        Self::on_broken_inner(&self.inner, slot, input);
    }

    /// Force reproduction from the original boot input.
    pub fn reset(&self) {
        let current = {
            let state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            SlotId(state.current.id)
        };
        Self::on_broken_inner(&self.inner, current, self.inner.boot_input.clone());
    }

    /// Stop producing: resolve a pending current slot with
    /// [`ClientError::Disposed`], fail all future calls the same way and
    /// never invoke the factory again. Idempotent.
    pub fn dispose(&self) {
        let slot = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            Arc::clone(&state.current)
        };
        slot.resolve(Err(ClientError::Disposed));
    }

    fn install_slot(&self, state: &mut ProviderState<I, O>, input: I) -> Arc<Slot<O>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Slot::new(id);
        state.current = Arc::clone(&slot);
        state.last_input = input;
        slot
    }

    fn on_broken_inner(inner: &Arc<ProviderInner<I, O>>, slot: SlotId, input: I) {
        let fresh = {
            let mut state = inner.state.lock();
            if state.disposed {
                return;
            }
            if state.current.id != slot.0 {
                trace!(slot = slot.0, "broken report for a superseded slot; ignoring");
                return;
            }
            if !state.current.is_resolved() {
                trace!(slot = slot.0, "production already in flight; ignoring");
                return;
            }
            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
            let fresh = Slot::new(id);
            state.current = Arc::clone(&fresh);
            state.last_input = input.clone();
            fresh
        };
        Self::spawn_production(inner, fresh, input);
    }

    fn spawn_production(inner: &Arc<ProviderInner<I, O>>, slot: Arc<Slot<O>>, input: I) {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            debug!(slot = slot.id, input = ?input, "production started");
            match inner.factory.produce(input, SlotId(slot.id)).await {
                Ok(output) => {
                    slot.resolve(Ok(output));
                }
                Err(err) => {
                    warn!(slot = slot.id, error = %err, "production failed; retrying from boot input");
                    slot.resolve(Err(err));
                    tokio::task::yield_now().await;
                    tokio::time::sleep(inner.retry_delay).await;
                    if inner.state.lock().disposed {
                        return;
                    }
                    Self::on_broken_inner(&inner, SlotId(slot.id), inner.boot_input.clone());
                }
            }
        });
    }
}
