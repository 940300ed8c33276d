//! Timebox controller library
//!
//! Tracks time-boxed resources, warns their owners before expiry and
//! destroys them once their TTL runs out. Exposed as a library for the
//! `timeboxd` binary, tests and benchmarks.

// Core
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

// Lifecycle
pub mod controller;
pub mod escalation;
pub mod notify;
pub mod provision;
pub mod store;

// HTTP surface
pub mod api;
pub mod health;
pub mod shutdown;
pub mod state;

pub use controller::LifecycleController;
pub use state::AppState;
