//! GCP bearer tokens for Vertex channels.
//!
//! Vertex accepts short-lived OAuth bearer tokens; the refresh-token grant
//! against Google's token endpoint is the same flow the generic OAuth
//! provider implements, pinned to the Google endpoint here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::ChannelConfig;
use secrecy::SecretString;

use super::{CredentialHeaders, CredentialProvider, oauth::OAuthProvider};
use crate::error::GatewayResult;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub struct GcpProvider {
    oauth: Arc<OAuthProvider>,
}

impl GcpProvider {
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
        refresh_before: Duration,
    ) -> Self {
        Self {
            oauth: Arc::new(OAuthProvider::new(
                GOOGLE_TOKEN_URL.to_string(),
                client_id,
                client_secret,
                refresh_token,
                refresh_before,
            )),
        }
    }

    /// The wrapped OAuth provider, for refresher lifecycle management.
    pub(crate) fn oauth(&self) -> Arc<OAuthProvider> {
        self.oauth.clone()
    }
}

#[async_trait]
impl CredentialProvider for GcpProvider {
    async fn headers_for(&self, channel: &ChannelConfig) -> GatewayResult<CredentialHeaders> {
        self.oauth.headers_for(channel).await
    }
}
