//! Time-zone events reported by providers, plus the simulated-event parser
//! used by the test/simulation interface.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// What a provider is telling us about its confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// The provider is certain of the time zone and carries candidate ids.
    Success,
    /// The provider has lost confidence in its last answer.
    Uncertain,
    /// The provider can never produce signal again.
    PermanentFailure,
}

/// A single report from a provider.
///
/// `zone_ids` is present iff `kind` is [`EventKind::Success`]; the
/// constructors are the only way to build one, so the invariant holds by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeZoneEvent {
    kind: EventKind,
    zone_ids: Option<Vec<String>>,
    user_id: u32,
}

impl TimeZoneEvent {
    pub fn success(user_id: u32, zone_ids: Vec<String>) -> Self {
        Self {
            kind: EventKind::Success,
            zone_ids: Some(zone_ids),
            user_id,
        }
    }

    pub fn uncertain(user_id: u32) -> Self {
        Self {
            kind: EventKind::Uncertain,
            zone_ids: None,
            user_id,
        }
    }

    pub fn permanent_failure(user_id: u32) -> Self {
        Self {
            kind: EventKind::PermanentFailure,
            zone_ids: None,
            user_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Candidate zone ids; `Some` only for success events.
    pub fn zone_ids(&self) -> Option<&[String]> {
        self.zone_ids.as_deref()
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }
}

/// A synthetic provider event addressed by provider name.
///
/// Routed by the controller to the matching provider; unknown names are
/// logged and discarded rather than rejected with an error, matching the
/// best-effort contract of the simulation interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedProviderEvent {
    pub provider_name: String,
    pub event: TimeZoneEvent,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseEventError {
    #[error("empty simulation command")]
    Empty,
    #[error("missing event type for provider '{0}'")]
    MissingEventType(String),
    #[error("unknown event type '{0}' (expected success/uncertain/failure)")]
    UnknownEventType(String),
    #[error("success event requires a comma-separated zone-id list")]
    MissingZoneIds,
}

impl SimulatedProviderEvent {
    /// Parses a command of the form:
    ///
    /// ```text
    /// <provider-name> success <zone-id>[,<zone-id>...]
    /// <provider-name> success -            # certain, but no zone determinable
    /// <provider-name> uncertain
    /// <provider-name> failure
    /// ```
    pub fn parse(line: &str, user_id: u32) -> Result<Self, ParseEventError> {
        let mut parts = line.split_whitespace();
        let provider_name = parts.next().ok_or(ParseEventError::Empty)?.to_string();
        let event_type = parts
            .next()
            .ok_or_else(|| ParseEventError::MissingEventType(provider_name.clone()))?;

        let event = match event_type {
            "success" => {
                let zones = parts.next().ok_or(ParseEventError::MissingZoneIds)?;
                let zone_ids: Vec<String> = if zones == "-" {
                    Vec::new()
                } else {
                    zones.split(',').map(str::to_string).collect()
                };
                warn_on_unknown_zone_ids(&zone_ids);
                TimeZoneEvent::success(user_id, zone_ids)
            }
            "uncertain" => TimeZoneEvent::uncertain(user_id),
            "failure" => TimeZoneEvent::permanent_failure(user_id),
            other => return Err(ParseEventError::UnknownEventType(other.to_string())),
        };

        Ok(Self {
            provider_name,
            event,
        })
    }
}

/// Zone ids pass through unvalidated (the controller forwards whatever the
/// provider reported), but ids the tz database has never heard of usually
/// mean a typo in a simulation script, so flag them.
fn warn_on_unknown_zone_ids(zone_ids: &[String]) {
    for id in zone_ids {
        if id.parse::<chrono_tz::Tz>().is_err() {
            warn!("Zone id '{}' is not in the tz database", id);
        }
    }
}
