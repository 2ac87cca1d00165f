//! Client-side tracker for long-running simulation jobs.
//!
//! Submits a simulation, polls its progress with bounded linear backoff,
//! persists the job in a local session record so tracking survives
//! restarts, and refuses a second submission while one is running.
//!
//! Entry points are [`bootstrap::rehydrate`] (startup) and
//! [`machine::JobStateMachine`] (everything after).

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod machine;
pub mod poller;
pub mod store;
