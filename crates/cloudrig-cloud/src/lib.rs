//! cloudrig cloud abstraction layer
//!
//! This crate provides the provider-agnostic pieces of cloudrig: the error
//! taxonomy shared by every backend, the bounded retry driver that consumes
//! it, and authentication status reporting.
//!
//! Provider crates (e.g. `cloudrig-vcd`) build their lifecycle managers on
//! top of these types so that the benchmarking harness can treat backends
//! interchangeably.

pub mod auth;
pub mod error;
pub mod retry;

// Re-exports
pub use auth::AuthStatus;
pub use error::{CloudError, Result};
pub use retry::{RetryConfig, retry};
