use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{error, info};

use snowbot_twitch::{OAuthError, TwitchOAuthClient};

/// App access token used for EventSub management calls.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceCredential {
    access_token: String,
    refresh_token: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ServiceCredential {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("access_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint request failed: {0}")]
    Request(#[from] OAuthError),
    #[error("token endpoint returned an empty access token")]
    EmptyToken,
    #[error("token lifetime of {0}s is out of range")]
    InvalidLifetime(u64),
}

/// Acquires the service credential through the client-credentials grant.
pub struct TokenManager {
    oauth: TwitchOAuthClient,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    current: Option<ServiceCredential>,
}

impl TokenManager {
    pub fn new(oauth: TwitchOAuthClient) -> Self {
        Self {
            oauth,
            clock: Arc::new(Utc::now),
            current: None,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn current(&self) -> Option<&ServiceCredential> {
        self.current.as_ref()
    }

    /// Performs one token request and replaces the held credential on success.
    ///
    /// A failed request leaves the previous credential untouched.
    pub async fn acquire_credential(&mut self) -> Result<ServiceCredential, AuthError> {
        let response = self.oauth.client_credentials().await.map_err(|err| {
            error!(stage = "token", error = %err, "failed to acquire app access token");
            AuthError::from(err)
        })?;

        if response.access_token.trim().is_empty() {
            error!(stage = "token", "token endpoint returned an empty access token");
            return Err(AuthError::EmptyToken);
        }

        let issued_at = (self.clock)();
        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                error!(stage = "token", expires_in = response.expires_in, "token lifetime is out of range");
                AuthError::InvalidLifetime(response.expires_in)
            })?;

        let credential = ServiceCredential {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            issued_at,
            expires_at,
        };
        info!(
            stage = "token",
            expires_at = %credential.expires_at().to_rfc3339(),
            "acquired app access token"
        );
        self.current = Some(credential.clone());
        Ok(credential)
    }
}
