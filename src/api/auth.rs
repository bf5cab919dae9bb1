//! Bearer token authentication via OAuth2 token introspection

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use super::error::{ApiError, Result};
use crate::config::IntrospectionConfig;
use crate::Error;

/// Errors from the introspection endpoint
#[derive(Debug, thiserror::Error)]
pub enum IntrospectionError {
    /// The request could not be sent or the body was not valid JSON
    #[error("introspection request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("introspection endpoint returned status {0}")]
    Status(u16),
}

/// Decides whether a bearer token is currently active
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    /// `Ok(true)` if the identity provider reports the token as active
    async fn introspect(&self, token: &str) -> std::result::Result<bool, IntrospectionError>;
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
}

/// Introspects tokens against an OpenID Connect provider
pub struct OidcIntrospector {
    config: IntrospectionConfig,
    http_client: reqwest::Client,
}

impl OidcIntrospector {
    /// Create an introspector with a client honouring `config.timeout`
    pub fn new(config: IntrospectionConfig) -> std::result::Result<Self, Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl TokenIntrospector for OidcIntrospector {
    async fn introspect(&self, token: &str) -> std::result::Result<bool, IntrospectionError> {
        let response = self
            .http_client
            .post(self.config.introspection_url())
            .form(&[
                ("token", token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IntrospectionError::Status(status.as_u16()));
        }

        let body: IntrospectionResponse = response.json().await?;
        debug!(active = body.active, "Token introspected");
        Ok(body.active)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("Authorization header is missing".into()))?;

    let invalid = || ApiError::Unauthorized("Authorization header is invalid".into());
    let value = header.to_str().map_err(|_| invalid())?;
    match value.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() => Ok(token),
        _ => Err(invalid()),
    }
}

/// Require an active bearer token on the request
pub async fn authenticate(introspector: &dyn TokenIntrospector, headers: &HeaderMap) -> Result<()> {
    let token = extract_bearer_token(headers)?;

    match introspector.introspect(token).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!("Rejected inactive token");
            Err(ApiError::Unauthorized("token is not active".into()))
        }
        Err(e) => {
            warn!(error = %e, "Token validation failed");
            Err(ApiError::Unauthorized("Token validation failed".into()))
        }
    }
}
