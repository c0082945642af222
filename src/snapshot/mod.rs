//! Snapshots: point-in-time serialized aggregate state, the policies
//! that decide when to take one, and the background manager that writes
//! them without touching the save path.

mod backends;
mod manager;
mod policy;
mod store;

pub use backends::{DocSnapshotStore, ListSnapshotStore};
pub use manager::SnapshotManager;
pub use policy::{
    AdaptivePolicy, CompositeMode, CompositePolicy, EveryNEvents, SnapshotPolicy, TimeInterval,
    VersionInterval,
};
pub use store::{SnapshotRecord, SnapshotStore};
