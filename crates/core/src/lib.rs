//! Domain types and the job registry for the SpinW compute service.
//!
//! The registry is the single writer of job lifecycle state. Storage
//! backends plug in through the traits in [`store`]; the engine and the
//! background poller live in their own crates and only call into
//! [`registry::JobRegistry`].

pub mod error;
pub mod job;
pub mod job_events;
pub mod quota;
pub mod registry;
pub mod store;
pub mod types;
