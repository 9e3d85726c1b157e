//! The provider state machine: a wrapper around an external time-zone signal
//! source that tracks enablement, reports state changes to a listener on the
//! execution domain, and times out initialization that takes too long.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::UserConfig;
use crate::domain::{DomainHandle, DomainMsg, TimerSlot};
use crate::event::{EventKind, TimeZoneEvent};

/// Which of the controller's two provider slots this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStateKind {
    Disabled,
    EnabledInitializing,
    EnabledCertain,
    EnabledUncertain,
    /// Absorbing: once entered, the provider never re-enables.
    PermFailed,
}

impl ProviderStateKind {
    pub fn is_enabled(self) -> bool {
        matches!(
            self,
            ProviderStateKind::EnabledInitializing
                | ProviderStateKind::EnabledCertain
                | ProviderStateKind::EnabledUncertain
        )
    }
}

/// The pure event-transition function for an enabled provider. Events
/// received outside the enabled states are ignored.
pub(crate) fn event_transition(kind: ProviderStateKind, event: EventKind) -> ProviderStateKind {
    if !kind.is_enabled() {
        return kind;
    }
    match event {
        EventKind::Success => ProviderStateKind::EnabledCertain,
        EventKind::Uncertain => ProviderStateKind::EnabledUncertain,
        EventKind::PermanentFailure => ProviderStateKind::PermFailed,
    }
}

/// An immutable snapshot of a provider's state, as delivered to the
/// controller's listener.
///
/// `event` is present only for enabled kinds, and only when a signal actually
/// arrived; `None` while enabled means "no signal yet" or an implicit
/// uncertainty condition (lost signal, initialization timeout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderState {
    pub role: ProviderRole,
    pub name: String,
    pub kind: ProviderStateKind,
    pub event: Option<TimeZoneEvent>,
}

/// The mechanism a provider uses to obtain signal. Real backends would own
/// process/IPC plumbing; this crate ships the simulated one.
pub trait ProviderBackend: Send {
    fn start(&mut self, config: &UserConfig);
    fn stop(&mut self);

    /// Whether injected events from the simulation interface are accepted.
    fn supports_simulation(&self) -> bool {
        false
    }
}

/// Backend for scripted/simulated sessions: events are injected through the
/// controller's simulation interface rather than produced by hardware.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    started: bool,
}

impl ProviderBackend for SimulatedBackend {
    fn start(&mut self, config: &UserConfig) {
        debug!("Simulated backend started for user {}", config.user_id);
        self.started = true;
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn supports_simulation(&self) -> bool {
        true
    }
}

/// A location-derived time-zone signal source.
///
/// Exclusively owned by the controller; all calls happen on the execution
/// domain. State-change notifications are posted back onto the domain via the
/// listener handle registered with [`Provider::initialize`].
pub struct Provider {
    role: ProviderRole,
    name: String,
    backend: Box<dyn ProviderBackend>,
    kind: ProviderStateKind,
    last_event: Option<TimeZoneEvent>,
    listener: Option<DomainHandle>,
    init_timer: TimerSlot,
}

impl Provider {
    pub fn new(role: ProviderRole, name: impl Into<String>, backend: Box<dyn ProviderBackend>) -> Self {
        Self {
            role,
            name: name.into(),
            backend,
            kind: ProviderStateKind::Disabled,
            last_event: None,
            listener: None,
            init_timer: TimerSlot::new("provider-init-timeout"),
        }
    }

    pub fn simulated(role: ProviderRole, name: impl Into<String>) -> Self {
        Self::new(role, name, Box::new(SimulatedBackend::default()))
    }

    /// Registers the state-change listener. Must be called once before
    /// `enable`.
    pub fn initialize(&mut self, listener: DomainHandle) {
        if self.listener.is_some() {
            warn!("Provider {} initialized more than once", self.name);
        }
        self.listener = Some(listener);
    }

    pub fn role(&self) -> ProviderRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_kind(&self) -> ProviderStateKind {
        self.kind
    }

    pub fn current_state(&self) -> ProviderState {
        ProviderState {
            role: self.role,
            name: self.name.clone(),
            kind: self.kind,
            event: self.last_event.clone(),
        }
    }

    /// `Disabled -> EnabledInitializing`. Silently a no-op when already
    /// enabled or permanently failed. Entering the enabled state does not
    /// notify the listener; only events (or the initialization timeout) do.
    pub fn enable(&mut self, config: &UserConfig, init_timeout: Duration, init_timeout_fuzz: Duration) {
        match self.kind {
            ProviderStateKind::Disabled => {}
            ProviderStateKind::PermFailed => {
                debug!("Provider {} cannot be enabled: perm failed", self.name);
                return;
            }
            _ => {
                debug!("Provider {} already enabled", self.name);
                return;
            }
        }

        self.kind = ProviderStateKind::EnabledInitializing;
        self.last_event = None;
        self.backend.start(config);

        let Some(listener) = self.listener.clone() else {
            warn!(
                "Provider {} enabled without a listener; initialization timeout not armed",
                self.name
            );
            return;
        };

        let delay = init_timeout + fuzz_amount(init_timeout_fuzz);
        let role = self.role;
        self.init_timer.schedule(&listener, delay, |token| DomainMsg::InitTimeout { role, token });
        debug!(
            "Provider {} enabled; initialization timeout in {:?}",
            self.name, delay
        );
    }

    /// `any ENABLED_* -> Disabled`. No-op if already disabled; impossible
    /// once permanently failed. Entering disabled never notifies the
    /// listener.
    pub fn disable(&mut self) {
        match self.kind {
            ProviderStateKind::Disabled => {
                debug!("Provider {} already disabled", self.name);
            }
            ProviderStateKind::PermFailed => {
                debug!("Provider {} cannot be disabled: perm failed", self.name);
            }
            _ => {
                self.kind = ProviderStateKind::Disabled;
                self.last_event = None;
                self.init_timer.cancel();
                self.backend.stop();
                debug!("Provider {} disabled", self.name);
            }
        }
    }

    /// Applies an event from the signal source. Events arriving while not
    /// enabled are dropped (late delivery after disable is a normal race).
    /// Every resulting state change notifies the listener exactly once.
    pub fn handle_event(&mut self, event: TimeZoneEvent) {
        if !self.kind.is_enabled() {
            debug!(
                "Provider {} received event while {:?}; dropping",
                self.name, self.kind
            );
            return;
        }

        // Any event resolves initialization, one way or the other.
        self.init_timer.cancel();

        self.kind = event_transition(self.kind, event.kind());
        if self.kind == ProviderStateKind::PermFailed {
            // Terminal. The event itself is not part of the state snapshot:
            // event payloads only accompany enabled states.
            self.last_event = None;
            self.backend.stop();
        } else {
            self.last_event = Some(event);
        }
        self.notify_listener();
    }

    /// Fired when the initialization timeout elapses. If the provider is
    /// still initializing, it becomes implicitly uncertain (no event
    /// payload).
    pub fn handle_init_timeout(&mut self, token: CancellationToken) {
        if token.is_cancelled() {
            debug!("Provider {}: stale initialization timeout; ignoring", self.name);
            return;
        }
        self.init_timer.cancel();

        if self.kind == ProviderStateKind::EnabledInitializing {
            debug!(
                "Provider {} initialization timed out; now implicitly uncertain",
                self.name
            );
            self.kind = ProviderStateKind::EnabledUncertain;
            self.last_event = None;
            self.notify_listener();
        } else {
            debug!(
                "Provider {} initialization timeout in state {:?}; ignoring",
                self.name, self.kind
            );
        }
    }

    /// Routes a simulated event into the state machine, provided the backend
    /// is simulation-capable. Other backends log and discard.
    pub fn simulate_event(&mut self, event: TimeZoneEvent) {
        if !self.backend.supports_simulation() {
            warn!(
                "Provider {} does not support simulated events; discarding",
                self.name
            );
            return;
        }
        self.handle_event(event);
    }

    fn notify_listener(&self) {
        match &self.listener {
            Some(listener) => {
                listener.post(DomainMsg::ProviderNotification(self.current_state()));
            }
            None => warn!(
                "Provider {} changed state with no listener registered",
                self.name
            ),
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("role", &self.role)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("last_event", &self.last_event)
            .finish()
    }
}

fn fuzz_amount(fuzz: Duration) -> Duration {
    if fuzz.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=fuzz.as_millis() as u64))
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    fn any_kind() -> ProviderStateKind {
        match kani::any::<u8>() % 5 {
            0 => ProviderStateKind::Disabled,
            1 => ProviderStateKind::EnabledInitializing,
            2 => ProviderStateKind::EnabledCertain,
            3 => ProviderStateKind::EnabledUncertain,
            _ => ProviderStateKind::PermFailed,
        }
    }

    fn any_event() -> EventKind {
        match kani::any::<u8>() % 3 {
            0 => EventKind::Success,
            1 => EventKind::Uncertain,
            _ => EventKind::PermanentFailure,
        }
    }

    #[kani::proof]
    fn perm_failed_absorbing() {
        let next = event_transition(ProviderStateKind::PermFailed, any_event());
        kani::assert(
            next == ProviderStateKind::PermFailed,
            "perm failed must be terminal",
        );
    }

    #[kani::proof]
    fn transition_preserves_disablement() {
        let kind = any_kind();
        let next = event_transition(kind, any_event());
        if !kind.is_enabled() {
            kani::assert(next == kind, "events must be inert outside enabled states");
        }
    }
}
