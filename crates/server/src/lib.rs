//! SpinW job dispatch service.
//!
//! Wires the job registry, the engine connection manager and the status
//! poller together, and exposes [`facade::DispatchFacade`] to the request
//! layer.

pub mod app;
pub mod config;
mod dispatch;
pub mod error;
pub mod facade;
pub mod poller;

pub use app::App;
pub use config::ServerConfig;
pub use facade::DispatchFacade;
