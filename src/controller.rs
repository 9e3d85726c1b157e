//! The failover controller: arbitrates between a primary and a secondary
//! time-zone provider and turns their state changes into a single, debounced
//! stream of suggestions.
//!
//! The primary is used until it fails or becomes uncertain, at which point
//! the secondary is given a chance. Certainty is suggested immediately;
//! uncertainty is debounced behind a single uncertainty timeout so providers
//! (and the secondary) have time to change the controller's mind.

use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UserConfig;
use crate::domain::{DomainHandle, DomainMsg, TimerSlot};
use crate::event::{EventKind, SimulatedProviderEvent};
use crate::provider::{Provider, ProviderRole, ProviderState, ProviderStateKind};
use crate::suggestion::Suggestion;

/// Supplies the live configuration and timing parameters.
pub trait Environment: Send + 'static {
    fn current_user_config(&self) -> UserConfig;
    fn provider_init_timeout(&self) -> Duration;
    fn provider_init_timeout_fuzz(&self) -> Duration;
    fn uncertainty_delay(&self) -> Duration;
}

/// Receives emitted suggestions. Invoked 0..N times per controller lifetime;
/// consecutive duplicate-equivalent values are expected and must be
/// tolerated.
pub trait Callback: Send + 'static {
    fn suggest(&mut self, suggestion: Suggestion);
}

/// The failover controller. Owns both providers, the uncertainty timer, the
/// last emitted suggestion, and the current configuration snapshot. All
/// mutation happens inside [`Controller::run`], the single consumer of the
/// execution domain.
pub struct Controller<E: Environment, C: Callback> {
    handle: DomainHandle,
    env: E,
    callback: C,
    config: UserConfig,
    primary: Provider,
    secondary: Provider,
    uncertainty_timer: TimerSlot,
    last_suggestion: Option<Suggestion>,
}

impl<E: Environment, C: Callback> Controller<E, C> {
    /// Panics if the providers' roles don't match their slots: the
    /// arbitration logic depends on there being exactly one provider per
    /// role, so a mismatch is a programming error that must fail loudly.
    pub fn new(
        handle: DomainHandle,
        primary: Provider,
        secondary: Provider,
        env: E,
        callback: C,
    ) -> Self {
        assert_eq!(
            primary.role(),
            ProviderRole::Primary,
            "primary slot holds a {:?} provider",
            primary.role()
        );
        assert_eq!(
            secondary.role(),
            ProviderRole::Secondary,
            "secondary slot holds a {:?} provider",
            secondary.role()
        );

        let config = env.current_user_config();
        Self {
            handle,
            env,
            callback,
            config,
            primary,
            secondary,
            uncertainty_timer: TimerSlot::new("uncertainty-timeout"),
            last_suggestion: None,
        }
    }

    /// Runs the controller until shutdown, consuming domain messages in
    /// strict arrival order.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DomainMsg>) {
        self.initialize();

        while let Some(msg) = rx.recv().await {
            match msg {
                DomainMsg::ConfigChanged => self.on_config_changed(),
                DomainMsg::ProviderNotification(state) => self.on_provider_state_change(state),
                DomainMsg::UncertaintyTimeout { role, token } => {
                    self.on_uncertainty_timeout(role, token)
                }
                DomainMsg::InitTimeout { role, token } => {
                    self.provider_mut(role).handle_init_timeout(token)
                }
                DomainMsg::Simulated(event) => self.on_simulated_event(event),
                DomainMsg::Dump(reply) => {
                    let _ = reply.send(self.dump());
                }
                DomainMsg::Shutdown => {
                    info!("Controller shutting down");
                    break;
                }
            }
        }
    }

    /// Records collaborators, snapshots the configuration, registers the
    /// shared listener with both providers, and runs the enablement
    /// algorithm as if there were no prior configuration.
    fn initialize(&mut self) {
        debug!("initialize()");
        self.config = self.env.current_user_config();
        self.primary.initialize(self.handle.clone());
        self.secondary.initialize(self.handle.clone());

        let config = self.config;
        self.alter_providers_enabled_state(None, config);
    }

    fn on_config_changed(&mut self) {
        let old_config = self.config;
        let new_config = self.env.current_user_config();
        self.config = new_config;

        if new_config == old_config {
            return;
        }

        if new_config.user_id != old_config.user_id {
            // A user switch must never leave a stale-user suggestion window
            // open: force-disable, then re-evaluate as a fresh start.
            debug!(
                "User changed. old={}, new={}: disabling providers",
                old_config.user_id, new_config.user_id
            );
            self.disable_providers();
            self.alter_providers_enabled_state(None, new_config);
        } else {
            self.alter_providers_enabled_state(Some(old_config), new_config);
        }
    }

    /// Sets the providers into the correct enabled/disabled state for
    /// `new_config`, emitting any suggestion the downstream consumer needs
    /// as a result. Only a change in `geo_detection_enabled` does anything.
    fn alter_providers_enabled_state(
        &mut self,
        old_config: Option<UserConfig>,
        new_config: UserConfig,
    ) {
        let old_geo_enabled = old_config.map(|c| c.geo_detection_enabled).unwrap_or(false);
        if old_geo_enabled == new_config.geo_detection_enabled {
            return;
        }

        if new_config.geo_detection_enabled {
            self.try_enable_provider(ProviderRole::Primary);

            // The secondary is only brought in when the primary could not be
            // enabled at all, i.e. it is permanently failed.
            if !self.primary.current_kind().is_enabled() {
                self.try_enable_provider(ProviderRole::Secondary);

                if !self.secondary.current_kind().is_enabled() {
                    // Both signal sources are unavailable; the controller is
                    // uncertain right away.
                    let suggestion = Suggestion::uncertain().with_trail(format!(
                        "Providers are failed: primary={:?} secondary={:?}",
                        self.primary.current_kind(),
                        self.secondary.current_kind()
                    ));
                    self.emit(suggestion);
                }
            }
        } else {
            self.disable_providers();

            // If the last suggestion was certain, the consumer must be told
            // it will not receive further updates.
            if self
                .last_suggestion
                .as_ref()
                .is_some_and(Suggestion::is_certain)
            {
                let suggestion = Suggestion::uncertain().with_trail(format!(
                    "Provider is disabled: primary={:?}",
                    self.primary.current_kind()
                ));
                self.emit(suggestion);
            }
        }
    }

    fn disable_providers(&mut self) {
        self.disable_provider_if_enabled(ProviderRole::Primary);
        self.disable_provider_if_enabled(ProviderRole::Secondary);

        // By definition, both providers disabled means uncertain.
        self.uncertainty_timer.cancel();
    }

    fn disable_provider_if_enabled(&mut self, role: ProviderRole) {
        let provider = self.provider_mut(role);
        if provider.current_kind().is_enabled() {
            debug!("Disabling {}", provider.name());
            provider.disable();
        }
    }

    fn try_enable_provider(&mut self, role: ProviderRole) {
        let config = self.config;
        let init_timeout = self.env.provider_init_timeout();
        let init_timeout_fuzz = self.env.provider_init_timeout_fuzz();

        let provider = self.provider_mut(role);
        match provider.current_kind() {
            ProviderStateKind::Disabled => {
                debug!("Enabling {}", provider.name());
                provider.enable(&config, init_timeout, init_timeout_fuzz);
            }
            ProviderStateKind::EnabledInitializing
            | ProviderStateKind::EnabledCertain
            | ProviderStateKind::EnabledUncertain => {
                debug!("No need to enable {}: already enabled", provider.name());
            }
            ProviderStateKind::PermFailed => {
                debug!("Unable to enable {}: it is perm failed", provider.name());
            }
        }
    }

    fn on_provider_state_change(&mut self, state: ProviderState) {
        match state.kind {
            ProviderStateKind::Disabled => {
                // Entering disabled never fires the listener by contract.
                warn!(
                    "Unexpected state-change notification for disabled provider {}",
                    state.name
                );
            }
            ProviderStateKind::EnabledInitializing
            | ProviderStateKind::EnabledCertain
            | ProviderStateKind::EnabledUncertain => {
                debug!(
                    "State change while enabled, provider={} kind={:?}",
                    state.name, state.kind
                );
                self.handle_provider_enabled_state_change(state);
            }
            ProviderStateKind::PermFailed => {
                debug!("Permanent failure notified by provider={}", state.name);
                self.handle_provider_failed_state_change(state);
            }
        }
    }

    /// A provider moved between enabled states, usually because an event
    /// arrived. A missing event means implicit uncertainty: lost signal or
    /// an initialization timeout.
    fn handle_provider_enabled_state_change(&mut self, state: ProviderState) {
        let Some(event) = state.event else {
            self.handle_provider_uncertainty(
                state.role,
                format!("provider={}, implicit uncertainty, event=None", state.name),
            );
            return;
        };

        // Consistency checks only: user switches race provider events.
        if event.user_id() != self.config.user_id {
            warn!(
                "Event for user {} arrived while current user is {}",
                event.user_id(),
                self.config.user_id
            );
        }
        if !self.config.geo_detection_enabled {
            warn!(
                "Provider {} is enabled but geo detection is off in the current configuration",
                state.name
            );
        }

        match event.kind() {
            EventKind::PermanentFailure => {
                // A provider cannot claim "enabled" and report this event.
                warn!(
                    "Provider {} is enabled, but event suggests it shouldn't be",
                    state.name
                );
            }
            EventKind::Uncertain => {
                self.handle_provider_uncertainty(
                    state.role,
                    format!("provider={}, explicit uncertainty", state.name),
                );
            }
            EventKind::Success => {
                let zone_ids = event.zone_ids().unwrap_or(&[]).to_vec();
                self.handle_provider_certainty(
                    state.role,
                    zone_ids,
                    format!("Event received provider={}, event={:?}", state.name, event),
                );
            }
        }
    }

    /// A provider has become certain of the time zone(s): suggest
    /// immediately and stand down everything that could contradict it later.
    fn handle_provider_certainty(&mut self, role: ProviderRole, zone_ids: Vec<String>, reason: String) {
        // By definition, the controller is now certain.
        self.uncertainty_timer.cancel();

        if role == ProviderRole::Primary {
            self.disable_provider_if_enabled(ProviderRole::Secondary);
        }

        let suggestion = Suggestion::certain(zone_ids).with_trail(reason);
        // The receiver dedupes; over-communicating beats missing an update.
        self.emit(suggestion);
    }

    /// A provider has become uncertain. Schedules the uncertainty timeout if
    /// none is pending (a pending one is never extended, which bounds
    /// worst-case suggestion latency), and gives the secondary a chance to
    /// supply certainty before it fires.
    fn handle_provider_uncertainty(&mut self, role: ProviderRole, reason: String) {
        if !self.uncertainty_timer.is_scheduled() {
            debug!("Starting uncertainty timeout: reason={}", reason);
            let delay = self.env.uncertainty_delay();
            let handle = self.handle.clone();
            self.uncertainty_timer
                .schedule(&handle, delay, |token| DomainMsg::UncertaintyTimeout {
                    role,
                    token,
                });
        }

        if role == ProviderRole::Primary {
            self.try_enable_provider(ProviderRole::Secondary);
        }
    }

    fn handle_provider_failed_state_change(&mut self, state: ProviderState) {
        match state.role {
            ProviderRole::Primary => {
                if self.secondary.current_kind() != ProviderStateKind::PermFailed {
                    // The controller needs some active source; give the
                    // secondary a chance. No-op if it is already enabled.
                    self.try_enable_provider(ProviderRole::Secondary);
                }
            }
            ProviderRole::Secondary => {
                // The secondary should only have been active while the
                // primary was uncertain or failed. Log the surprise, change
                // nothing.
                let primary_kind = self.primary.current_kind();
                if primary_kind != ProviderStateKind::EnabledUncertain
                    && primary_kind != ProviderStateKind::PermFailed
                {
                    warn!(
                        "Secondary provider unexpectedly reported a failure: primary={:?}",
                        primary_kind
                    );
                }
            }
        }

        if self.primary.current_kind() == ProviderStateKind::PermFailed
            && self.secondary.current_kind() == ProviderStateKind::PermFailed
        {
            // Terminal for the session: nothing can recover, so the timer is
            // moot and the consumer must hear that no updates will follow.
            self.uncertainty_timer.cancel();

            let suggestion = Suggestion::uncertain().with_trail(format!(
                "Both providers are permanently failed: primary={}, secondary={}",
                self.primary.name(),
                self.secondary.name()
            ));
            self.emit(suggestion);
        }
    }

    fn on_uncertainty_timeout(&mut self, role: ProviderRole, token: CancellationToken) {
        if token.is_cancelled() {
            debug!("Stale uncertainty timeout; ignoring");
            return;
        }
        self.uncertainty_timer.cancel();

        // The triggering provider is informational only; current state is
        // re-read rather than trusted from scheduling time.
        let suggestion = Suggestion::uncertain().with_trail(format!(
            "Uncertainty timeout triggered for {}: primary={:?}, secondary={:?}",
            self.provider(role).name(),
            self.primary.current_kind(),
            self.secondary.current_kind()
        ));
        self.emit(suggestion);
    }

    /// Routes a synthetic event to the provider with the matching name.
    /// Unknown names are logged and discarded.
    fn on_simulated_event(&mut self, simulated: SimulatedProviderEvent) {
        let role = if simulated.provider_name == self.primary.name() {
            ProviderRole::Primary
        } else if simulated.provider_name == self.secondary.name() {
            ProviderRole::Secondary
        } else {
            warn!(
                "Unknown provider name '{}' in simulated event; discarding",
                simulated.provider_name
            );
            return;
        };
        self.provider_mut(role).simulate_event(simulated.event);
    }

    /// Single choke point for suggestions: forwards to the callback and
    /// records the value. Deliberately no deduplication.
    fn emit(&mut self, suggestion: Suggestion) {
        debug!("Suggesting: {:?}", suggestion);
        self.callback.suggest(suggestion.clone());
        self.last_suggestion = Some(suggestion);
    }

    /// Human-readable snapshot for diagnostics. Read-only.
    fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "TimeZoneFailoverController:");
        let _ = writeln!(out, "  config={:?}", self.config);
        let _ = writeln!(
            out,
            "  provider_init_timeout={:?}",
            self.env.provider_init_timeout()
        );
        let _ = writeln!(
            out,
            "  provider_init_timeout_fuzz={:?}",
            self.env.provider_init_timeout_fuzz()
        );
        let _ = writeln!(out, "  uncertainty_delay={:?}", self.env.uncertainty_delay());
        let _ = writeln!(
            out,
            "  uncertainty_timeout_scheduled={} remaining={:?}",
            self.uncertainty_timer.is_scheduled(),
            self.uncertainty_timer.remaining()
        );
        let _ = writeln!(out, "  last_suggestion={:?}", self.last_suggestion);
        let _ = writeln!(out, "  primary={:?}", self.primary.current_state());
        let _ = writeln!(out, "  secondary={:?}", self.secondary.current_state());
        out
    }

    fn provider(&self, role: ProviderRole) -> &Provider {
        match role {
            ProviderRole::Primary => &self.primary,
            ProviderRole::Secondary => &self.secondary,
        }
    }

    fn provider_mut(&mut self, role: ProviderRole) -> &mut Provider {
        match role {
            ProviderRole::Primary => &mut self.primary,
            ProviderRole::Secondary => &mut self.secondary,
        }
    }
}
