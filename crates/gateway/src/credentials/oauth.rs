//! OAuth refresh-token credentials with background auto-refresh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use config::ChannelConfig;
use http::header;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{CredentialHeaders, CredentialProvider, header_value};
use crate::error::{GatewayError, GatewayResult};

const FALLBACK_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CachedToken {
    access_token: SecretString,
    expires_at: jiff::Timestamp,
}

/// OAuth client refreshing an access token from a long-lived refresh token.
///
/// `start` spawns one background refresher scheduled at
/// `expires_at - refresh_before`; repeated calls collapse to the first.
/// `stop` cancels it and is safe to call any number of times.
pub struct OAuthProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    refresh_before: Duration,
    token: RwLock<Option<CachedToken>>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl OAuthProvider {
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
        refresh_before: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url,
            client_id,
            client_secret,
            refresh_token,
            refresh_before,
            token: RwLock::new(None),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the background refresher. Idempotent.
    pub fn start(self: &std::sync::Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let provider = self.clone();

        tokio::spawn(async move {
            loop {
                let wait = provider.next_refresh_in().await;

                tokio::select! {
                    () = provider.shutdown.cancelled() => break,
                    () = tokio::time::sleep(wait) => {}
                }

                if let Err(error) = provider.refresh().await {
                    log::warn!("OAuth token refresh failed: {error}");
                }
            }
        });
    }

    /// Cancel the background refresher. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn next_refresh_in(&self) -> Duration {
        let token = self.token.read().await;

        let Some(token) = token.as_ref() else {
            return FALLBACK_REFRESH_INTERVAL;
        };

        let refresh_at = token.expires_at - jiff::SignedDuration::try_from(self.refresh_before).unwrap_or_default();
        let now = jiff::Timestamp::now();

        if refresh_at <= now {
            return Duration::ZERO;
        }

        refresh_at.duration_since(now).unsigned_abs()
    }

    async fn refresh(&self) -> GatewayResult<CachedToken> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", self.refresh_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|error| GatewayError::Unauthorized(format!("token refresh request failed: {error}")))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Unauthorized(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|error| GatewayError::Unauthorized(format!("malformed token response: {error}")))?;

        let cached = CachedToken {
            access_token: SecretString::from(token.access_token),
            expires_at: jiff::Timestamp::now() + jiff::SignedDuration::from_secs(token.expires_in as i64),
        };

        *self.token.write().await = Some(cached.clone());

        Ok(cached)
    }

    /// The current token, refreshing inline when missing or expired.
    async fn current(&self) -> GatewayResult<CachedToken> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref()
                && token.expires_at > jiff::Timestamp::now()
            {
                return Ok(token.clone());
            }
        }

        self.refresh().await
    }
}

#[async_trait]
impl CredentialProvider for OAuthProvider {
    async fn headers_for(&self, _channel: &ChannelConfig) -> GatewayResult<CredentialHeaders> {
        let token = self.current().await?;

        let mut headers = http::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {}", token.access_token.expose_secret()))?,
        );

        Ok(CredentialHeaders {
            headers,
            expires_at: Some(token.expires_at),
        })
    }
}
