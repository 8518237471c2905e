//! Authentication status reporting
//!
//! Providers expose an auth probe so the harness can check connectivity
//! and credentials before committing to a run. `cloudrig-vcd` backs it
//! with the organization login.

use serde::{Deserialize, Serialize};

/// Outcome of an authentication probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether the provider accepted the credentials
    pub authenticated: bool,

    /// Account identity, e.g. `user@org`, when authenticated
    pub account_info: Option<String>,

    /// Failure reason when not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}
