//! Domain types shared by the simulation progress tracker.
//!
//! Nothing in here touches the network or the filesystem: the tracker
//! crate owns all I/O and builds on these types.

pub mod error;
pub mod job;
pub mod progress;
pub mod simulation;
pub mod types;
