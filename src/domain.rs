//! The controller's execution domain.
//!
//! All controller state lives in one task that consumes [`DomainMsg`]s from a
//! single unbounded channel; everything else (provider backends, timers, the
//! diagnostic dump caller) talks to it by posting messages through a
//! [`DomainHandle`]. That gives cooperative single-threaded semantics without
//! any locking of controller fields.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::SimulatedProviderEvent;
use crate::provider::{ProviderRole, ProviderState};

/// A message for the controller task.
#[derive(Debug)]
pub enum DomainMsg {
    /// The environment's user configuration may have changed; re-fetch it.
    ConfigChanged,
    /// A provider transitioned state and is notifying its listener.
    ProviderNotification(ProviderState),
    /// The uncertainty debounce timer fired. The token is the one the timer
    /// was scheduled with; if it has been cancelled since, the firing is
    /// stale and must be ignored.
    UncertaintyTimeout {
        role: ProviderRole,
        token: CancellationToken,
    },
    /// A provider's initialization timeout fired.
    InitTimeout {
        role: ProviderRole,
        token: CancellationToken,
    },
    /// A synthetic event from the test/simulation interface.
    Simulated(SimulatedProviderEvent),
    /// Diagnostic snapshot request; answered with human-readable text.
    Dump(oneshot::Sender<String>),
    /// Stop the controller task.
    Shutdown,
}

/// Cloneable sender half of the execution domain.
#[derive(Debug, Clone)]
pub struct DomainHandle {
    tx: mpsc::UnboundedSender<DomainMsg>,
}

impl DomainHandle {
    /// Creates the domain channel. The receiver goes to the one task allowed
    /// to mutate controller state.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Posts a message onto the domain. Messages posted after shutdown are
    /// dropped; senders outliving the controller is a normal teardown race.
    pub fn post(&self, msg: DomainMsg) {
        if self.tx.send(msg).is_err() {
            debug!("Execution domain is shut down; dropping message");
        }
    }

    /// Requests a diagnostic dump and waits for the answer. Returns `None`
    /// if the controller has already shut down.
    pub async fn dump(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        self.post(DomainMsg::Dump(tx));
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        self.post(DomainMsg::Shutdown);
    }
}

/// A single-slot delayed callback: at most one timer may be pending at any
/// time.
///
/// Scheduling while one is pending is an explicit no-op, and cancellation is
/// idempotent. A fired timer posts its message onto the domain; the handler
/// must check the message's token and treat a cancelled one as stale, since
/// cancellation can race an in-flight firing.
#[derive(Debug)]
pub struct TimerSlot {
    label: &'static str,
    pending: Option<PendingTimer>,
}

#[derive(Debug)]
struct PendingTimer {
    token: CancellationToken,
    deadline: Instant,
}

impl TimerSlot {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            pending: None,
        }
    }

    /// Schedules `build`'s message to be posted after `delay`. Returns false
    /// (and does nothing) if a timer is already pending.
    pub fn schedule(
        &mut self,
        handle: &DomainHandle,
        delay: Duration,
        build: impl FnOnce(CancellationToken) -> DomainMsg,
    ) -> bool {
        if self.is_scheduled() {
            debug!("{}: timer already scheduled; not replacing", self.label);
            return false;
        }

        let token = CancellationToken::new();
        let msg = build(token.clone());
        self.pending = Some(PendingTimer {
            token: token.clone(),
            deadline: Instant::now() + delay,
        });

        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    handle.post(msg);
                }
            }
        });
        true
    }

    /// Cancels any pending timer. No-op when nothing is pending. Also used
    /// to clear the slot once a fired timer's message has been accepted.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.token.cancel();
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| !p.token.is_cancelled())
    }

    /// Time remaining until the pending timer's deadline, for diagnostics.
    pub fn remaining(&self) -> Option<Duration> {
        self.pending
            .as_ref()
            .filter(|p| !p.token.is_cancelled())
            .map(|p| p.deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_msg(token: CancellationToken) -> DomainMsg {
        DomainMsg::UncertaintyTimeout {
            role: ProviderRole::Primary,
            token,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (handle, mut rx) = DomainHandle::new();
        let mut slot = TimerSlot::new("test");

        assert!(slot.schedule(&handle, Duration::from_secs(5), timeout_msg));
        assert!(slot.is_scheduled());

        let started = Instant::now();
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, DomainMsg::UncertaintyTimeout { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_schedule_is_a_noop() {
        let (handle, mut rx) = DomainHandle::new();
        let mut slot = TimerSlot::new("test");

        assert!(slot.schedule(&handle, Duration::from_secs(5), timeout_msg));
        // A shorter second schedule must not replace the pending one.
        assert!(!slot.schedule(&handle, Duration::from_secs(1), timeout_msg));

        let started = Instant::now();
        let _ = rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        // Only one firing ever arrives.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (handle, mut rx) = DomainHandle::new();
        let mut slot = TimerSlot::new("test");

        slot.schedule(&handle, Duration::from_secs(5), timeout_msg);
        slot.cancel();
        assert!(!slot.is_scheduled());

        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut slot = TimerSlot::new("test");
        slot.cancel();
        slot.cancel();
        assert!(!slot.is_scheduled());
        assert_eq!(slot.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_tracks_deadline() {
        let (handle, _rx) = DomainHandle::new();
        let mut slot = TimerSlot::new("test");

        slot.schedule(&handle, Duration::from_secs(10), timeout_msg);
        assert_eq!(slot.remaining(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(slot.remaining(), Some(Duration::from_secs(6)));
    }

    #[tokio::test]
    async fn test_dump_after_shutdown_returns_none() {
        let (handle, rx) = DomainHandle::new();
        drop(rx);
        assert_eq!(handle.dump().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_after_cancel_works() {
        let (handle, mut rx) = DomainHandle::new();
        let mut slot = TimerSlot::new("test");

        slot.schedule(&handle, Duration::from_secs(5), timeout_msg);
        slot.cancel();
        assert!(slot.schedule(&handle, Duration::from_secs(2), timeout_msg));

        let started = Instant::now();
        let msg = rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(2));

        // The fired message carries a live token; the cancelled one never
        // arrives at all.
        match msg {
            DomainMsg::UncertaintyTimeout { token, .. } => assert!(!token.is_cancelled()),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
