//! OAuth2 client-credentials token cache for the authenticated tender
//! gateway (PISTE). An explicit injected object: holds `(token, expiry)`
//! behind a mutex, refreshes shortly before expiry, retries transient
//! failures with exponential backoff and validates the token response shape.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use sniper_storage::BackoffPolicy;
use tokio::sync::Mutex;
use tracing::warn;

/// Refresh this far before the reported expiry.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at
            .checked_duration_since(now)
            .map(|left| left > EXPIRY_BUFFER)
            .unwrap_or(false)
    }
}

pub struct TokenCache {
    http: reqwest::Client,
    config: TokenCacheConfig,
    state: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(config: TokenCacheConfig) -> anyhow::Result<Self> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(anyhow!(
                "tender gateway credentials missing (client id / secret)"
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building auth http client")?;
        Ok(Self {
            http,
            config,
            state: Mutex::new(None),
        })
    }

    /// Current access token, refreshed on expiry. The mutex makes concurrent
    /// callers share one refresh instead of stampeding the gateway.
    pub async fn token(&self) -> anyhow::Result<String> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(cached) = state.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.fetch_with_retry().await?;
        let token = fresh.access_token.clone();
        *state = Some(CachedToken {
            access_token: fresh.access_token,
            expires_at: now + Duration::from_secs(fresh.expires_in),
        });
        Ok(token)
    }

    async fn fetch_with_retry(&self) -> anyhow::Result<TokenResponse> {
        let backoff = self.config.backoff;
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=backoff.max_retries {
            match self.fetch_once().await {
                Ok(token) => return Ok(token),
                Err(FetchAttemptError::Fatal(err)) => return Err(err),
                Err(FetchAttemptError::Transient(err)) => {
                    warn!(error = %err, attempt, "token fetch failed, retrying");
                    last_error = Some(err);
                    if attempt < backoff.max_retries {
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("token fetch exhausted retries")))
    }

    async fn fetch_once(&self) -> Result<TokenResponse, FetchAttemptError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|err| FetchAttemptError::Transient(err.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("token endpoint returned {status}: {body}");
            // Client errors (bad credentials) will not improve with retries.
            return if status.is_server_error() {
                Err(FetchAttemptError::Transient(err))
            } else {
                Err(FetchAttemptError::Fatal(err))
            };
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| FetchAttemptError::Fatal(anyhow!("malformed token response: {err}")))?;
        Ok(token)
    }
}

enum FetchAttemptError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_token_is_fresh_until_the_expiry_buffer() {
        let now = Instant::now();
        let token = CachedToken {
            access_token: "tok".into(),
            expires_at: now + Duration::from_secs(600),
        };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + Duration::from_secs(545)));
        assert!(!token.is_fresh(now + Duration::from_secs(700)));
    }

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let result = TokenCache::new(TokenCacheConfig {
            token_url: "https://oauth.piste.gouv.fr/api/oauth/token".into(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: "tncp.apidecp".into(),
            backoff: BackoffPolicy::default(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn token_response_shape_is_validated() {
        let ok: Result<TokenResponse, _> =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":3600,"token_type":"Bearer"}"#);
        assert!(ok.is_ok());
        let missing: Result<TokenResponse, _> =
            serde_json::from_str(r#"{"token_type":"Bearer","expires_in":3600}"#);
        assert!(missing.is_err());
    }
}
