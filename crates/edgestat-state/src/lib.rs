//! edgestat-state — persistence for the accumulation snapshot.
//!
//! One JSON file holds every service's merged record, the wall-clock time
//! of the last write, and whether that write came from a background
//! refresh. A snapshot captured before the most recent local midnight is
//! read back as empty, which resets all accumulators once a day.

pub mod error;
pub mod store;

pub use error::{StateError, StateResult};
pub use store::{Snapshot, SnapshotStore};
