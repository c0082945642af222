use std::fmt;

/// Crate-wide error type.
///
/// Variants map one-to-one onto the failure classes callers are expected
/// to handle differently: concurrency conflicts are retryable after a
/// reload, the not-found family is often not an error at all for
/// existence checks, and registry misuse is a programming error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventoryError {
    /// Optimistic concurrency check failed. Retryable: reload the
    /// aggregate and re-apply the command.
    ConcurrencyConflict {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },
    /// No events and no snapshot exist for the requested aggregate.
    AggregateNotFound {
        aggregate_id: String,
        aggregate_type: String,
    },
    /// No snapshot stored for the requested aggregate.
    SnapshotNotFound {
        aggregate_id: String,
        aggregate_type: String,
    },
    /// No state document stored for the requested aggregate (or it is
    /// soft-deleted).
    StateNotFound {
        aggregate_id: String,
        aggregate_type: String,
    },
    /// An event type name was used that has no registration.
    UnknownEventType(String),
    /// An event type name was re-registered with a different payload shape.
    AlreadyRegisteredIncompatible(String),
    /// A stored record carries no event type tag.
    MissingEventType,
    /// A payload or document could not be encoded or decoded.
    Serialization(String),
    /// The caller passed invalid input (blank id, zero interval, ...).
    Validation(String),
    /// The storage backend failed (lock poisoning, simulated I/O, ...).
    /// Retryable at the caller's discretion.
    Backend(String),
}

impl fmt::Display for EventoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventoryError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => write!(
                f,
                "concurrency conflict on aggregate {} (expected version {}, actual {})",
                aggregate_id, expected, actual
            ),
            EventoryError::AggregateNotFound {
                aggregate_id,
                aggregate_type,
            } => write!(f, "aggregate not found: {}:{}", aggregate_type, aggregate_id),
            EventoryError::SnapshotNotFound {
                aggregate_id,
                aggregate_type,
            } => write!(f, "snapshot not found: {}:{}", aggregate_type, aggregate_id),
            EventoryError::StateNotFound {
                aggregate_id,
                aggregate_type,
            } => write!(
                f,
                "state document not found: {}:{}",
                aggregate_type, aggregate_id
            ),
            EventoryError::UnknownEventType(name) => {
                write!(f, "unknown event type: {}", name)
            }
            EventoryError::AlreadyRegisteredIncompatible(name) => write!(
                f,
                "event type {} is already registered with a different payload shape",
                name
            ),
            EventoryError::MissingEventType => {
                write!(f, "stored record carries no event type tag")
            }
            EventoryError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            EventoryError::Validation(msg) => write!(f, "validation error: {}", msg),
            EventoryError::Backend(msg) => write!(f, "storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for EventoryError {}

impl EventoryError {
    /// Whether the caller may retry the operation after reloading.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventoryError::ConcurrencyConflict { .. } | EventoryError::Backend(_)
        )
    }

    pub(crate) fn backend(context: &str) -> Self {
        EventoryError::Backend(context.to_string())
    }

    pub(crate) fn serde(err: impl fmt::Display) -> Self {
        EventoryError::Serialization(err.to_string())
    }
}
