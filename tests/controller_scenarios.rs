//! End-to-end scenarios for the failover controller, run against a paused
//! tokio clock so timer behavior is observed deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tzfailover::config::UserConfig;
use tzfailover::controller::{Callback, Controller, Environment};
use tzfailover::domain::{DomainHandle, DomainMsg};
use tzfailover::event::{SimulatedProviderEvent, TimeZoneEvent};
use tzfailover::provider::{Provider, ProviderRole};
use tzfailover::suggestion::Suggestion;

const UNCERTAINTY_DELAY: Duration = Duration::from_millis(30_000);

struct TestEnv {
    config: Arc<Mutex<UserConfig>>,
    uncertainty_delay: Duration,
    init_timeout: Duration,
}

impl Environment for TestEnv {
    fn current_user_config(&self) -> UserConfig {
        *self.config.lock().unwrap()
    }

    fn provider_init_timeout(&self) -> Duration {
        self.init_timeout
    }

    fn provider_init_timeout_fuzz(&self) -> Duration {
        Duration::ZERO
    }

    fn uncertainty_delay(&self) -> Duration {
        self.uncertainty_delay
    }
}

struct ChannelCallback(mpsc::UnboundedSender<Suggestion>);

impl Callback for ChannelCallback {
    fn suggest(&mut self, suggestion: Suggestion) {
        let _ = self.0.send(suggestion);
    }
}

struct Harness {
    handle: DomainHandle,
    suggestions: mpsc::UnboundedReceiver<Suggestion>,
    config: Arc<Mutex<UserConfig>>,
}

impl Harness {
    /// Spawns a controller with simulated "primary"/"secondary" providers
    /// and a long provider initialization timeout so init expiry doesn't
    /// interfere with the scenario under test.
    fn spawn(geo_detection_enabled: bool) -> Self {
        Self::spawn_with(geo_detection_enabled, UNCERTAINTY_DELAY, Duration::from_secs(500))
    }

    fn spawn_with(
        geo_detection_enabled: bool,
        uncertainty_delay: Duration,
        init_timeout: Duration,
    ) -> Self {
        let config = Arc::new(Mutex::new(UserConfig {
            user_id: 0,
            geo_detection_enabled,
        }));
        let env = TestEnv {
            config: Arc::clone(&config),
            uncertainty_delay,
            init_timeout,
        };

        let (suggestion_tx, suggestions) = mpsc::unbounded_channel();
        let (handle, rx) = DomainHandle::new();
        let controller = Controller::new(
            handle.clone(),
            Provider::simulated(ProviderRole::Primary, "primary"),
            Provider::simulated(ProviderRole::Secondary, "secondary"),
            env,
            ChannelCallback(suggestion_tx),
        );
        tokio::spawn(controller.run(rx));

        Self {
            handle,
            suggestions,
            config,
        }
    }

    fn inject(&self, provider_name: &str, event: TimeZoneEvent) {
        self.handle.post(DomainMsg::Simulated(SimulatedProviderEvent {
            provider_name: provider_name.to_string(),
            event,
        }));
    }

    fn set_geo(&self, enabled: bool) {
        self.config.lock().unwrap().geo_detection_enabled = enabled;
        self.handle.post(DomainMsg::ConfigChanged);
    }

    fn set_user(&self, user_id: u32) {
        self.config.lock().unwrap().user_id = user_id;
        self.handle.post(DomainMsg::ConfigChanged);
    }

    /// Waits until every queued message, including notifications re-posted
    /// by providers while handling earlier messages, has been processed.
    /// Returns the final diagnostic dump.
    async fn settle(&self) -> String {
        let _ = self.handle.dump().await.expect("controller alive");
        self.handle.dump().await.expect("controller alive")
    }

    fn drain(&mut self) -> Vec<Suggestion> {
        let mut out = Vec::new();
        while let Ok(suggestion) = self.suggestions.try_recv() {
            out.push(suggestion);
        }
        out
    }
}

fn zones(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// Primary certain at t=0, secondary never involved. One certain
// suggestion, no timer.
#[tokio::test(start_paused = true)]
async fn primary_certainty_suggests_immediately_without_timer() {
    let mut harness = Harness::spawn(true);
    harness.inject("primary", TimeZoneEvent::success(0, zones(&["Europe/London"])));

    let dump = harness.settle().await;
    let suggestions = harness.drain();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].zone_ids(), Some(&zones(&["Europe/London"])[..]));
    assert!(dump.contains("uncertainty_timeout_scheduled=false"));

    // Nothing else ever fires.
    tokio::time::advance(Duration::from_secs(3600)).await;
    let _ = harness.settle().await;
    assert!(harness.drain().is_empty());
}

// Primary uncertain at t=0, nothing else. An uncertain
// suggestion fires at exactly the uncertainty delay.
#[tokio::test(start_paused = true)]
async fn uncertainty_is_debounced_until_the_timeout() {
    let mut harness = Harness::spawn(true);
    let started = Instant::now();
    harness.inject("primary", TimeZoneEvent::uncertain(0));

    let suggestion = harness.suggestions.recv().await.unwrap();
    assert_eq!(started.elapsed(), UNCERTAINTY_DELAY);
    assert_eq!(suggestion.zone_ids(), None);
    assert!(suggestion
        .debug_trail()
        .iter()
        .any(|line| line.contains("Uncertainty timeout")));
}

// Certainty arriving before the timeout cancels it; exactly one
// suggestion results.
#[tokio::test(start_paused = true)]
async fn certainty_preempts_a_pending_uncertainty_timeout() {
    let mut harness = Harness::spawn(true);
    harness.inject("primary", TimeZoneEvent::uncertain(0));
    let _ = harness.settle().await;

    tokio::time::advance(Duration::from_millis(5_000)).await;
    harness.inject(
        "primary",
        TimeZoneEvent::success(0, zones(&["America/New_York"])),
    );
    let dump = harness.settle().await;
    assert!(dump.contains("uncertainty_timeout_scheduled=false"));

    let suggestions = harness.drain();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(
        suggestions[0].zone_ids(),
        Some(&zones(&["America/New_York"])[..])
    );

    // The cancelled timer never fires.
    tokio::time::advance(Duration::from_secs(60)).await;
    let _ = harness.settle().await;
    assert!(harness.drain().is_empty());
}

// Both providers failing permanently yields exactly one
// uncertain suggestion, after the second failure.
#[tokio::test(start_paused = true)]
async fn double_permanent_failure_emits_one_terminal_uncertain() {
    let mut harness = Harness::spawn(true);

    harness.inject("primary", TimeZoneEvent::permanent_failure(0));
    let dump = harness.settle().await;
    // Failover happened, no suggestion yet.
    assert!(dump.contains("name: \"secondary\", kind: EnabledInitializing"));
    assert!(harness.drain().is_empty());

    tokio::time::advance(Duration::from_millis(100)).await;
    harness.inject("secondary", TimeZoneEvent::permanent_failure(0));
    let dump = harness.settle().await;

    let suggestions = harness.drain();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].zone_ids(), None);
    assert!(suggestions[0]
        .debug_trail()
        .iter()
        .any(|line| line.contains("permanently failed")));
    assert!(dump.contains("uncertainty_timeout_scheduled=false"));

    // Terminal: no timer is ever scheduled again.
    tokio::time::advance(Duration::from_secs(3600)).await;
    let _ = harness.settle().await;
    assert!(harness.drain().is_empty());
}

// A user switch disables both providers, then re-evaluates for
// the new user starting from enabled-initializing.
#[tokio::test(start_paused = true)]
async fn user_switch_restarts_providers_for_the_new_user() {
    let mut harness = Harness::spawn(true);
    harness.inject("primary", TimeZoneEvent::success(0, zones(&["Europe/London"])));
    let _ = harness.settle().await;
    assert_eq!(harness.drain().len(), 1);

    harness.set_user(11);
    let dump = harness.settle().await;

    assert!(dump.contains("name: \"primary\", kind: EnabledInitializing"));
    assert!(dump.contains("name: \"secondary\", kind: Disabled"));
    // The switch itself emits nothing; the new user's providers get to
    // speak first.
    assert!(harness.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn geo_detection_disabled_at_startup_enables_nothing() {
    let mut harness = Harness::spawn(false);
    let dump = harness.settle().await;
    assert!(dump.contains("name: \"primary\", kind: Disabled"));
    assert!(dump.contains("name: \"secondary\", kind: Disabled"));
    assert!(harness.drain().is_empty());
}

// A provider that never produces a signal becomes implicitly uncertain at
// its initialization timeout, and the uncertainty debounce runs from there.
#[tokio::test(start_paused = true)]
async fn initialization_timeout_feeds_the_uncertainty_path() {
    let init_timeout = Duration::from_secs(20);
    let mut harness = Harness::spawn_with(true, UNCERTAINTY_DELAY, init_timeout);
    let started = Instant::now();

    let suggestion = harness.suggestions.recv().await.unwrap();
    assert_eq!(started.elapsed(), init_timeout + UNCERTAINTY_DELAY);
    assert_eq!(suggestion.zone_ids(), None);
    assert!(suggestion
        .debug_trail()
        .iter()
        .any(|line| line.contains("Uncertainty timeout")));
}

// The secondary's certainty counts just as much as the primary's.
#[tokio::test(start_paused = true)]
async fn secondary_certainty_cancels_the_timeout() {
    let mut harness = Harness::spawn(true);
    harness.inject("primary", TimeZoneEvent::uncertain(0));
    let _ = harness.settle().await;

    tokio::time::advance(Duration::from_secs(3)).await;
    harness.inject("secondary", TimeZoneEvent::success(0, zones(&["Asia/Tokyo"])));
    let dump = harness.settle().await;

    let suggestions = harness.drain();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].zone_ids(), Some(&zones(&["Asia/Tokyo"])[..]));
    assert!(dump.contains("uncertainty_timeout_scheduled=false"));
    // Secondary stays enabled: only primary certainty stands it down.
    assert!(dump.contains("name: \"secondary\", kind: EnabledCertain"));
}

// Primary recovering with certainty stands the secondary down.
#[tokio::test(start_paused = true)]
async fn primary_certainty_disables_the_secondary() {
    let mut harness = Harness::spawn(true);
    harness.inject("primary", TimeZoneEvent::uncertain(0));
    let _ = harness.settle().await;

    harness.inject("primary", TimeZoneEvent::success(0, zones(&["Europe/Paris"])));
    let dump = harness.settle().await;

    assert!(dump.contains("name: \"primary\", kind: EnabledCertain"));
    assert!(dump.contains("name: \"secondary\", kind: Disabled"));
    assert_eq!(harness.drain().len(), 1);
}

// Toggling detection off goes quiet (with one final uncertain suggestion),
// and toggling it back on restarts the primary from scratch.
#[tokio::test(start_paused = true)]
async fn toggling_detection_off_and_on_restarts_the_primary() {
    let mut harness = Harness::spawn(true);
    harness.inject("primary", TimeZoneEvent::success(0, zones(&["Europe/London"])));
    let _ = harness.settle().await;
    assert_eq!(harness.drain().len(), 1);

    harness.set_geo(false);
    let dump = harness.settle().await;
    assert!(dump.contains("name: \"primary\", kind: Disabled"));
    let suggestions = harness.drain();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].zone_ids(), None);

    harness.set_geo(true);
    let dump = harness.settle().await;
    assert!(dump.contains("name: \"primary\", kind: EnabledInitializing"));
    // Re-enabling alone says nothing; the primary gets to speak first.
    assert!(harness.drain().is_empty());
}

// An empty zone list is still a certain suggestion ("certainly no zone").
#[tokio::test(start_paused = true)]
async fn empty_zone_list_is_a_certain_suggestion() {
    let mut harness = Harness::spawn(true);
    harness.inject("primary", TimeZoneEvent::uncertain(0));
    let _ = harness.settle().await;

    harness.inject("primary", TimeZoneEvent::success(0, Vec::new()));
    let dump = harness.settle().await;

    let suggestions = harness.drain();
    assert_eq!(suggestions.len(), 1);
    assert!(suggestions[0].is_certain());
    assert_eq!(suggestions[0].zone_ids(), Some(&[][..]));
    assert!(dump.contains("uncertainty_timeout_scheduled=false"));
}
