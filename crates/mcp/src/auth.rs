//! Credential source shared by every endpoint session.

use std::sync::Arc;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::info,
};

use toolmesh_oauth::AuthEngine;

use crate::error::Result;

/// Supplies bearer tokens to transports.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// A currently valid access token, refreshing or logging in if necessary.
    async fn access_token(&self) -> Result<Secret<String>>;

    /// React to a 401 for `rejected`. Returns `true` when a different token
    /// is now available and the request should be retried once.
    async fn handle_unauthorized(
        &self,
        rejected: &str,
        www_authenticate: Option<&str>,
    ) -> Result<bool>;
}

pub type SharedCredentialSource = Arc<dyn CredentialSource>;

#[async_trait]
impl CredentialSource for AuthEngine {
    async fn access_token(&self) -> Result<Secret<String>> {
        Ok(self.ensure_valid_credentials().await?.access_token)
    }

    async fn handle_unauthorized(
        &self,
        rejected: &str,
        www_authenticate: Option<&str>,
    ) -> Result<bool> {
        info!(www_authenticate = ?www_authenticate, "endpoint rejected access token");
        self.invalidate_access_token(rejected);
        let tokens = self.ensure_valid_credentials().await?;
        Ok(tokens.access_token.expose_secret() != rejected)
    }
}

/// A fixed token, for endpoints configured with a pre-issued credential.
pub struct StaticToken(Secret<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }
}

#[async_trait]
impl CredentialSource for StaticToken {
    async fn access_token(&self) -> Result<Secret<String>> {
        Ok(self.0.clone())
    }

    async fn handle_unauthorized(&self, _: &str, _: Option<&str>) -> Result<bool> {
        Ok(false)
    }
}
