//! The session: exclusive owner of one pod's state and transport.

use std::sync::Weak;

use crate::dose::DoseRecord;
use crate::pod_state::PodState;
use crate::transport::MessageTransport;

/// Host-side observer of pod state transitions.
///
/// Notified synchronously after every state mutation, so observers see a
/// total order on transitions. The session holds the observer weakly and
/// never extends its lifetime.
pub trait SessionObserver {
    fn pod_state_did_change(&self, state: &PodState);
}

/// Session tunables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    /// Read status via a cancel-nothing command instead of get-status,
    /// which additionally validates the nonce. Off by default.
    pub use_cancel_none_for_status: bool,
}

/// A communication session with one pod.
///
/// The session owns the [`PodState`], the dose ledger, and the nonce state;
/// `&mut self` on every operation is the serialization discipline — two
/// concurrent operations on the same pod cannot compile. All mutation is
/// routed through [`Session::mutate`], which notifies the observer exactly
/// once per batch.
pub struct Session<T: MessageTransport> {
    pub(crate) state: PodState,
    pub(crate) transport: T,
    pub(crate) config: SessionConfig,
    observer: Option<Weak<dyn SessionObserver>>,
}

impl<T: MessageTransport> Session<T> {
    pub fn new(state: PodState, transport: T) -> Self {
        Self::with_config(state, transport, SessionConfig::default())
    }

    pub fn with_config(state: PodState, transport: T, config: SessionConfig) -> Self {
        Self {
            state,
            transport,
            config,
            observer: None,
        }
    }

    /// Registers the state observer. The session keeps only a weak handle;
    /// a dropped observer is silently skipped.
    pub fn set_observer(&mut self, observer: Weak<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    pub fn pod_state(&self) -> &PodState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Applies a batch of state mutations and notifies the observer once.
    pub(crate) fn mutate<R>(&mut self, mutation: impl FnOnce(&mut PodState) -> R) -> R {
        let result = mutation(&mut self.state);
        self.notify_observer();
        result
    }

    fn notify_observer(&self) {
        if let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) {
            observer.pod_state_did_change(&self.state);
        }
    }

    /// Hands finalized and live dose records to `handler` for durable
    /// export; the finalized buffer is cleared only if the handler returns
    /// `true`. Live records are included for visibility but never cleared.
    pub fn drain_doses(&mut self, handler: impl FnOnce(&[DoseRecord]) -> bool) -> bool {
        self.mutate(|state| state.doses.drain(handler))
    }

    /// Ends the relationship with this pod, discarding its state. Returns
    /// the transport for reuse with a new pod.
    pub fn forget_pod(self) -> T {
        tracing::info!(address = %self.state.address, "forgetting pod");
        self.transport
    }
}
