//! Local Mirror Store.
//!
//! State that passive surfaces render lives in a [`SharedRegion`] readable by
//! every process of the app: the mistake counter with its timeline and
//! session-start marker, plus the log of notes received from the peer.

pub mod counter;
pub mod messages;
pub mod region;

pub use counter::{CounterState, CounterStore};
pub use messages::{MessageItem, MessageLog};
pub use region::{open_region, FileRegion, MemoryRegion, RegionSnapshot, RegionWrite, SharedRegion};
