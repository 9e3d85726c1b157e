//! The controller's output value: either a concrete candidate zone-id list
//! or "no opinion", with a free-text diagnostic trail.

use serde::Serialize;

/// A time-zone suggestion for the downstream detector.
///
/// `zone_ids == None` means the controller has no opinion. `Some(vec![])`
/// means it is certain no zone can be determined. The downstream consumer
/// treats two suggestions with equal `zone_ids` as equivalent and must be
/// idempotent on repeats; the controller deliberately never dedupes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    zone_ids: Option<Vec<String>>,
    debug_trail: Vec<String>,
}

impl Suggestion {
    pub fn certain(zone_ids: Vec<String>) -> Self {
        Self {
            zone_ids: Some(zone_ids),
            debug_trail: Vec::new(),
        }
    }

    pub fn uncertain() -> Self {
        Self {
            zone_ids: None,
            debug_trail: Vec::new(),
        }
    }

    pub fn with_trail(mut self, note: impl Into<String>) -> Self {
        self.add_trail(note);
        self
    }

    /// Appends a diagnostic annotation. The trail is append-only.
    pub fn add_trail(&mut self, note: impl Into<String>) {
        self.debug_trail.push(note.into());
    }

    pub fn zone_ids(&self) -> Option<&[String]> {
        self.zone_ids.as_deref()
    }

    pub fn is_certain(&self) -> bool {
        self.zone_ids.is_some()
    }

    pub fn debug_trail(&self) -> &[String] {
        &self.debug_trail
    }

    /// Downstream equivalence: zone ids only, trail ignored.
    pub fn same_zones(&self, other: &Suggestion) -> bool {
        self.zone_ids == other.zone_ids
    }
}
