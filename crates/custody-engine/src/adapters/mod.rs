//! # Adapters
//!
//! In-memory store (with JSON snapshots) and clocks.

pub mod memory;
pub mod snapshot;
pub mod time;

pub use memory::InMemoryCustodyStore;
pub use snapshot::{CustodySnapshot, SNAPSHOT_FORMAT};
pub use time::{ManualTimeSource, SystemTimeSource};
