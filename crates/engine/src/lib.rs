//! Connection manager for the external SpinW compute engine.
//!
//! Supervises the single engine process, owns its TCP command socket,
//! encodes commands, recovers from write failures with one bounded
//! reconnect-and-retry cycle, and exposes the engine's per-job status
//! reports.

pub mod command;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod events;
pub mod process;
pub mod status;

pub use command::EngineCommand;
pub use config::{EngineConfig, Endpoint, RestartPolicy};
pub use connection::{Delivery, EngineConnection, SocketState};
pub use error::EngineError;
pub use status::{EngineReport, EngineStatusSource, StatusSource};
