//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use vault::{DecryptFailurePolicy, FieldCrypto};

use crate::repo::Repository;

/// Application state shared across all request handlers.
///
/// All fields are cheaply cloneable (`Arc`-wrapped or already `Arc`-backed) so
/// that Axum can clone the state for each request without copying expensive data.
#[derive(Clone)]
pub struct AppState {
    /// User, goal, and journal storage.
    pub repo: Arc<dyn Repository>,
    /// Field encryption orchestrator built from the process keys.
    pub crypto: FieldCrypto,
    /// What journal listings do with entries that fail to decrypt.
    pub list_policy: DecryptFailurePolicy,
}

impl AppState {
    /// Create a new [`AppState`].
    pub fn new(
        repo: Arc<dyn Repository>,
        crypto: FieldCrypto,
        list_policy: DecryptFailurePolicy,
    ) -> Self {
        Self {
            repo,
            crypto,
            list_policy,
        }
    }
}
