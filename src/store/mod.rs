//! Event log storage: the `EventStore` contract, backend capability
//! traits, and the adapters that bind them together through the codec.

pub mod document;
mod doc;
mod list;

pub use doc::{DocClient, DocEventStore, DocQuery, InMemoryDocClient, SortOrder, TxOutcome};
pub use list::{CasOutcome, InMemoryListClient, ListClient, ListEventStore, ListInfo};

use crate::error::EventoryError;
use crate::event::Event;

/// Per-aggregate append-only ordered event log.
///
/// Implementations delegate write serialization to the backend's atomic
/// conditional operation; the compare-and-append is never split into
/// separate read and write calls from this process.
pub trait EventStore: Send + Sync {
    /// Append `events` after verifying the stream's last persisted
    /// version equals `expected_version` (0 for a stream expected to be
    /// empty). Versions are assigned contiguously from
    /// `expected_version + 1`. All-or-nothing: a conflict persists
    /// nothing. An empty event slice is a no-op.
    fn append(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        events: &[Event],
        expected_version: u64,
    ) -> Result<(), EventoryError>;

    /// Load events with `from_version <= version <= to_version`, ordered
    /// by ascending version. `to_version == 0` means "to the end". An
    /// aggregate with no events yields an empty vec, not an error.
    fn load(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        from_version: u64,
        to_version: u64,
    ) -> Result<Vec<Event>, EventoryError>;

    /// Highest stored version, 0 when no events exist.
    fn last_version(&self, aggregate_id: &str, aggregate_type: &str)
        -> Result<u64, EventoryError>;

    /// Physically and irrecoverably remove all events with
    /// `version < before_version`. Returns the number of events removed.
    ///
    /// Callers must ensure a snapshot at or beyond `before_version`
    /// exists first; this is not verified here.
    fn compact(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        before_version: u64,
    ) -> Result<u64, EventoryError>;
}

/// Reject blank aggregate ids before touching the backend.
pub(crate) fn validate_aggregate_id(aggregate_id: &str) -> Result<(), EventoryError> {
    if aggregate_id.trim().is_empty() {
        return Err(EventoryError::Validation(
            "aggregate id must not be blank".into(),
        ));
    }
    Ok(())
}

/// Stamp identity and contiguous versions onto an event batch before it
/// crosses the storage boundary.
pub(crate) fn stamp_events(
    aggregate_id: &str,
    aggregate_type: &str,
    events: &[Event],
    expected_version: u64,
) -> Vec<Event> {
    events
        .iter()
        .enumerate()
        .map(|(offset, event)| {
            let mut stamped = event.clone();
            stamped.aggregate_id = aggregate_id.to_string();
            stamped.aggregate_type = aggregate_type.to_string();
            stamped.version = expected_version + offset as u64 + 1;
            stamped
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    struct Noted {
        note: String,
    }

    impl EventPayload for Noted {
        const EVENT_TYPE: &'static str = "Noted";
    }

    #[test]
    fn blank_ids_rejected() {
        assert!(validate_aggregate_id("guild-1").is_ok());
        assert!(matches!(
            validate_aggregate_id(""),
            Err(EventoryError::Validation(_))
        ));
        assert!(matches!(
            validate_aggregate_id("   "),
            Err(EventoryError::Validation(_))
        ));
    }

    #[test]
    fn stamping_assigns_contiguous_versions() {
        let events = vec![
            Event::new("", "", 0, Box::new(Noted { note: "a".into() })),
            Event::new("", "", 0, Box::new(Noted { note: "b".into() })),
        ];
        let stamped = stamp_events("guild-1", "guild", &events, 3);
        assert_eq!(stamped[0].version, 4);
        assert_eq!(stamped[1].version, 5);
        assert!(stamped.iter().all(|e| e.aggregate_id == "guild-1"));
        assert!(stamped.iter().all(|e| e.aggregate_type == "guild"));
    }
}
