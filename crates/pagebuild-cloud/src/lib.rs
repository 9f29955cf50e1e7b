//! Compute-control API client and status callbacks.
//!
//! Provides the HTTP implementations of the core collaborator traits:
//! - `CloudFoundryClient` for `ComputeApi`
//! - `TokenClient` for cached OAuth2 access tokens
//! - `HttpStatusReporter` for `StatusReporter`

pub mod auth;
pub mod client;
pub mod reporter;

pub use auth::TokenClient;
pub use client::CloudFoundryClient;
pub use reporter::HttpStatusReporter;
