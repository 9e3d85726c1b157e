use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

use tzfailover::cli;
use tzfailover::config::{ServiceSettings, UserConfig};
use tzfailover::controller::{Callback, Controller, Environment};
use tzfailover::domain::{DomainHandle, DomainMsg};
use tzfailover::event::SimulatedProviderEvent;
use tzfailover::provider::{Provider, ProviderRole};
use tzfailover::suggestion::Suggestion;

/// Environment backed by startup settings plus a shared, mutable user
/// configuration slot that the stdin command loop updates.
struct SharedEnvironment {
    settings: ServiceSettings,
    current: Arc<Mutex<UserConfig>>,
}

impl SharedEnvironment {
    fn new(settings: ServiceSettings) -> Self {
        let current = Arc::new(Mutex::new(settings.initial_user_config()));
        Self { settings, current }
    }

    fn shared_config(&self) -> Arc<Mutex<UserConfig>> {
        Arc::clone(&self.current)
    }
}

impl Environment for SharedEnvironment {
    fn current_user_config(&self) -> UserConfig {
        read_config(&self.current)
    }

    fn provider_init_timeout(&self) -> Duration {
        self.settings.provider_init_timeout()
    }

    fn provider_init_timeout_fuzz(&self) -> Duration {
        self.settings.provider_init_timeout_fuzz()
    }

    fn uncertainty_delay(&self) -> Duration {
        self.settings.uncertainty_delay()
    }
}

fn read_config(slot: &Mutex<UserConfig>) -> UserConfig {
    match slot.lock() {
        Ok(guard) => *guard,
        // Poisoning can't corrupt a Copy value; take it anyway.
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn update_config(slot: &Mutex<UserConfig>, f: impl FnOnce(&mut UserConfig)) {
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard);
}

/// Prints every suggestion as a JSON line on stdout; the downstream
/// consumer in a real deployment sits behind this seam.
struct JsonCallback;

impl Callback for JsonCallback {
    fn suggest(&mut self, suggestion: Suggestion) {
        match serde_json::to_string(&suggestion) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode suggestion: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    if args.help {
        cli::print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tzfailover=info".parse()?),
        )
        .init();

    info!("tzfailover v{}", env!("CARGO_PKG_VERSION"));

    let settings = ServiceSettings::from_env()?;
    info!("Configuration loaded");
    info!("  Uncertainty delay: {:?}", settings.uncertainty_delay());
    info!(
        "  Provider init timeout: {:?} (+ up to {:?} fuzz)",
        settings.provider_init_timeout(),
        settings.provider_init_timeout_fuzz()
    );
    info!(
        "  Providers: primary='{}' secondary='{}'",
        settings.primary_provider_name, settings.secondary_provider_name
    );

    if args.validate {
        info!("Validating configuration...");
        match settings.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    let primary = Provider::simulated(ProviderRole::Primary, settings.primary_provider_name.clone());
    let secondary = Provider::simulated(
        ProviderRole::Secondary,
        settings.secondary_provider_name.clone(),
    );

    let environment = SharedEnvironment::new(settings);
    let shared = environment.shared_config();

    let (handle, rx) = DomainHandle::new();
    let controller = Controller::new(handle.clone(), primary, secondary, environment, JsonCallback);
    let controller_task = tokio::spawn(controller.run(rx));

    info!("Reading simulation commands from stdin ('help' for syntax)");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("quit") | Some("exit") => break,
            Some("help") => cli::print_help(),
            Some("dump") => match handle.dump().await {
                Some(snapshot) => print!("{}", snapshot),
                None => {
                    warn!("Controller has shut down");
                    break;
                }
            },
            Some("geo") => match parts.next() {
                Some("on") => {
                    update_config(&shared, |c| c.geo_detection_enabled = true);
                    handle.post(DomainMsg::ConfigChanged);
                }
                Some("off") => {
                    update_config(&shared, |c| c.geo_detection_enabled = false);
                    handle.post(DomainMsg::ConfigChanged);
                }
                _ => error!("usage: geo on|off"),
            },
            Some("user") => match parts.next().and_then(|v| v.parse().ok()) {
                Some(user_id) => {
                    update_config(&shared, |c| c.user_id = user_id);
                    handle.post(DomainMsg::ConfigChanged);
                }
                None => error!("usage: user <id>"),
            },
            _ => {
                let user_id = read_config(&shared).user_id;
                match SimulatedProviderEvent::parse(line, user_id) {
                    Ok(event) => handle.post(DomainMsg::Simulated(event)),
                    Err(e) => error!("{}", e),
                }
            }
        }
    }

    handle.shutdown();
    controller_task.await?;

    Ok(())
}
