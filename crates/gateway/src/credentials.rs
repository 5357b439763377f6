//! Credential providers for upstream channels.
//!
//! A [`CredentialProvider`] supplies per-request auth material for a channel:
//! plain headers for key- and token-based providers, and a whole-request
//! signature for SigV4 (Bedrock). Providers with background refresh loops
//! implement idempotent `start`/`stop`.

pub(crate) mod gcp;
pub(crate) mod oauth;
pub(crate) mod sigv4;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use config::{ChannelConfig, ChannelType, CredentialsConfig};
use http::{HeaderMap, HeaderValue, header};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::{GatewayError, GatewayResult},
    transport::ProviderRequest,
};

/// Auth material for one attempt.
#[derive(Debug, Clone, Default)]
pub struct CredentialHeaders {
    pub headers: HeaderMap,

    /// When the material expires, for providers with short-lived tokens.
    pub expires_at: Option<jiff::Timestamp>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Headers to attach to an outgoing request on this channel.
    async fn headers_for(&self, channel: &ChannelConfig) -> GatewayResult<CredentialHeaders>;

    /// Sign the fully built request. Only SigV4 needs this; the default is a
    /// no-op and runs after all other headers are in place.
    fn sign(&self, _request: &mut ProviderRequest, _channel: &ChannelConfig) -> GatewayResult<()> {
        Ok(())
    }
}

/// A fixed API key, placed where the channel's dialect expects it.
pub struct StaticKeyProvider {
    api_key: SecretString,
}

impl StaticKeyProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl CredentialProvider for StaticKeyProvider {
    async fn headers_for(&self, channel: &ChannelConfig) -> GatewayResult<CredentialHeaders> {
        let mut headers = HeaderMap::new();

        match channel.channel_type {
            ChannelType::Anthropic => {
                headers.insert("x-api-key", header_value(self.api_key.expose_secret())?);
            }
            ChannelType::Gemini => {
                headers.insert("x-goog-api-key", header_value(self.api_key.expose_secret())?);
            }
            _ => {
                headers.insert(
                    header::AUTHORIZATION,
                    header_value(&format!("Bearer {}", self.api_key.expose_secret()))?,
                );
            }
        }

        Ok(CredentialHeaders {
            headers,
            expires_at: None,
        })
    }
}

/// Provider for channels configured without credentials.
pub struct AnonymousProvider;

#[async_trait]
impl CredentialProvider for AnonymousProvider {
    async fn headers_for(&self, _channel: &ChannelConfig) -> GatewayResult<CredentialHeaders> {
        Ok(CredentialHeaders::default())
    }
}

pub(crate) fn header_value(value: &str) -> GatewayResult<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|error| GatewayError::Internal(format!("invalid credential header value: {error}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// All configured credential providers, keyed by the name channels reference.
pub(crate) struct CredentialStore {
    providers: HashMap<String, Arc<dyn CredentialProvider>>,
    refreshers: Vec<Arc<oauth::OAuthProvider>>,
    anonymous: Arc<dyn CredentialProvider>,
}

impl CredentialStore {
    pub fn from_config(
        credentials: &indexmap::IndexMap<String, CredentialsConfig>,
    ) -> GatewayResult<Self> {
        let mut providers: HashMap<String, Arc<dyn CredentialProvider>> = HashMap::new();
        let mut refreshers = Vec::new();

        for (name, config) in credentials {
            let provider: Arc<dyn CredentialProvider> = match config.clone() {
                CredentialsConfig::Static { api_key } => Arc::new(StaticKeyProvider::new(api_key)),
                CredentialsConfig::Oauth {
                    client_id,
                    client_secret,
                    refresh_token,
                    token_url,
                    refresh_before,
                } => {
                    let provider = Arc::new(oauth::OAuthProvider::new(
                        token_url,
                        client_id,
                        client_secret,
                        refresh_token,
                        std::time::Duration::from_secs(refresh_before),
                    ));
                    refreshers.push(provider.clone());
                    provider
                }
                CredentialsConfig::Aws {
                    access_key_id,
                    secret_access_key,
                    session_token,
                } => Arc::new(sigv4::SigV4Provider::new(access_key_id, secret_access_key, session_token)),
                CredentialsConfig::Gcp {
                    client_id,
                    client_secret,
                    refresh_token,
                    refresh_before,
                } => {
                    let provider = gcp::GcpProvider::new(
                        client_id,
                        client_secret,
                        refresh_token,
                        std::time::Duration::from_secs(refresh_before),
                    );
                    refreshers.push(provider.oauth());
                    Arc::new(provider)
                }
            };

            providers.insert(name.clone(), provider);
        }

        Ok(Self {
            providers,
            refreshers,
            anonymous: Arc::new(AnonymousProvider),
        })
    }

    /// Resolve the provider a channel references, falling back to anonymous.
    pub fn for_channel(&self, channel: &ChannelConfig) -> GatewayResult<Arc<dyn CredentialProvider>> {
        match &channel.credentials {
            Some(name) => self
                .providers
                .get(name)
                .cloned()
                .ok_or_else(|| GatewayError::Internal(format!("unknown credentials '{name}'"))),
            None => Ok(self.anonymous.clone()),
        }
    }

    /// Start background refresh loops. Idempotent.
    pub fn start(&self) {
        for refresher in &self.refreshers {
            refresher.start();
        }
    }

    /// Stop background refresh loops. Idempotent.
    pub fn stop(&self) {
        for refresher in &self.refreshers {
            refresher.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(channel_type: ChannelType) -> ChannelConfig {
        let toml = format!(
            r#"
            type = "{}"
            models = ["m"]
            "#,
            match channel_type {
                ChannelType::Anthropic => "anthropic",
                _ => "openai",
            }
        );
        toml::from_str(&toml).unwrap()
    }

    #[tokio::test]
    async fn static_key_uses_bearer_for_openai_family() {
        let provider = StaticKeyProvider::new(SecretString::from("sk-test".to_string()));
        let credentials = provider.headers_for(&channel(ChannelType::OpenAi)).await.unwrap();

        assert_eq!(
            credentials.headers.get(header::AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
    }

    #[tokio::test]
    async fn static_key_uses_x_api_key_for_anthropic() {
        let provider = StaticKeyProvider::new(SecretString::from("sk-ant-test".to_string()));
        let credentials = provider.headers_for(&channel(ChannelType::Anthropic)).await.unwrap();

        assert_eq!(credentials.headers.get("x-api-key").unwrap(), "sk-ant-test");
        assert!(credentials.headers.get(header::AUTHORIZATION).is_none());
    }
}
