//! Identity collaborator reached over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use hera_core::Actor;
use hera_middleware::{IdentityError, IdentityResolver};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::ServerError;

/// Identity provider client.
///
/// - `POST {endpoint}/tokens/verify` with the bearer token returns
///   `{"subject": "..."}`; 401 or 403 means the token is invalid.
/// - `GET {endpoint}/actors/{subject}` returns the [`Actor`] with its
///   memberships; 404 means the subject has no actor.
#[derive(Debug, Clone)]
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct Verified {
    subject: String,
}

impl HttpIdentityResolver {
    /// Creates a resolver for `endpoint`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::collaborator("identity", e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn verify_token(&self, token: &str) -> Result<String, IdentityError> {
        let response = self
            .client
            .post(format!("{}/tokens/verify", self.endpoint))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Verified>()
                .await
                .map(|verified| verified.subject)
                .map_err(|e| IdentityError::unavailable(format!("malformed verify response: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(IdentityError::invalid_token("rejected by identity provider"))
            }
            status => Err(IdentityError::unavailable(format!(
                "token verification failed with {status}"
            ))),
        }
    }

    async fn resolve_actor(&self, subject: &str) -> Result<Actor, IdentityError> {
        let response = self
            .client
            .get(format!("{}/actors/{subject}", self.endpoint))
            .send()
            .await
            .map_err(|e| IdentityError::unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Actor>()
                .await
                .map_err(|e| IdentityError::unavailable(format!("malformed actor: {e}"))),
            StatusCode::NOT_FOUND => Err(IdentityError::actor_not_found(subject)),
            status => Err(IdentityError::unavailable(format!(
                "actor resolution failed with {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_provider_is_unavailable() {
        let resolver =
            HttpIdentityResolver::new("http://127.0.0.1:9/", Duration::from_millis(200)).unwrap();
        assert_eq!(resolver.endpoint, "http://127.0.0.1:9");
        let err = resolver.verify_token("token").await.unwrap_err();
        assert!(matches!(err, IdentityError::Unavailable { .. }));
    }
}
