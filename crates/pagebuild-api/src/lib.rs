//! Operator HTTP server for the pagebuild scheduler.
//!
//! Exposes liveness, an aggregated healthcheck and the callback builds use
//! to report completion.

pub mod routes;
pub mod state;

pub use state::AppState;
