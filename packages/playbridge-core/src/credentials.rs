//! Credential provider abstraction.
//!
//! Token acquisition and refresh happen outside the core. The core asks a
//! [`CredentialProvider`] for the current bearer token before every remote
//! call and reports back through [`CredentialProvider::on_expired`] when the
//! backend rejects it.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{PlaybackError, PlaybackResult};
use crate::types::Credential;

/// Source of bearer tokens for the remote backend.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the current credential.
    async fn get_token(&self) -> PlaybackResult<Credential>;

    /// Called when the backend rejected the credential, so the provider can
    /// start a refresh. Must not block.
    fn on_expired(&self);
}

/// Provider holding a single credential that is replaced from outside.
///
/// Suitable for the player binary (token passed on the command line) and for
/// hosts that refresh tokens themselves and push them in with [`replace`].
///
/// [`replace`]: StaticCredentialProvider::replace
pub struct StaticCredentialProvider {
    credential: RwLock<Credential>,
    /// Set by `on_expired`, cleared by `replace`.
    refresh_requested: AtomicBool,
}

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(credential),
            refresh_requested: AtomicBool::new(false),
        }
    }

    /// Installs a refreshed credential.
    pub fn replace(&self, credential: Credential) {
        *self.credential.write() = credential;
        self.refresh_requested.store(false, Ordering::SeqCst);
    }

    /// Returns true if the core reported the current credential as rejected.
    #[must_use]
    pub fn refresh_requested(&self) -> bool {
        self.refresh_requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_token(&self) -> PlaybackResult<Credential> {
        let credential = self.credential.read().clone();
        if credential.is_expired() {
            return Err(PlaybackError::Unauthorized(
                "credential expired; refresh required".to_string(),
            ));
        }
        Ok(credential)
    }

    fn on_expired(&self) {
        if !self.refresh_requested.swap(true, Ordering::SeqCst) {
            log::warn!("[Credentials] Backend rejected credential, refresh requested");
        }
    }
}
