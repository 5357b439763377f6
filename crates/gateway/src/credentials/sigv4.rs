//! AWS SigV4 request signing for Bedrock channels.

use std::time::SystemTime;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use config::ChannelConfig;
use secrecy::{ExposeSecret, SecretString};

use super::{CredentialHeaders, CredentialProvider};
use crate::{
    error::{GatewayError, GatewayResult},
    transport::ProviderRequest,
};

const SERVICE_NAME: &str = "bedrock";

/// Signs Bedrock requests with SigV4. Produces no standalone headers; the
/// whole request is signed after it is fully built.
pub struct SigV4Provider {
    identity: Identity,
}

impl SigV4Provider {
    pub fn new(
        access_key_id: SecretString,
        secret_access_key: SecretString,
        session_token: Option<SecretString>,
    ) -> Self {
        let credentials = Credentials::new(
            access_key_id.expose_secret(),
            secret_access_key.expose_secret(),
            session_token.map(|token| token.expose_secret().to_string()),
            None,
            "switchyard",
        );

        Self {
            identity: credentials.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for SigV4Provider {
    async fn headers_for(&self, _channel: &ChannelConfig) -> GatewayResult<CredentialHeaders> {
        Ok(CredentialHeaders::default())
    }

    fn sign(&self, request: &mut ProviderRequest, channel: &ChannelConfig) -> GatewayResult<()> {
        let region = channel
            .region
            .clone()
            .ok_or_else(|| GatewayError::Internal("bedrock channel is missing a region".to_string()))?;

        let settings = SigningSettings::default();

        let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
            .identity(&self.identity)
            .region(&region)
            .name(SERVICE_NAME)
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|error| GatewayError::Internal(format!("failed to build signing params: {error}")))?
            .into();

        let headers = request
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), std::str::from_utf8(value.as_bytes()).unwrap_or("")));

        let signable = SignableRequest::new(
            request.method.as_str(),
            &request.url,
            headers,
            SignableBody::Bytes(&request.body),
        )
        .map_err(|error| GatewayError::Internal(format!("request is not signable: {error}")))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|error| GatewayError::Internal(format!("SigV4 signing failed: {error}")))?
            .into_parts();

        for (name, value) in instructions.headers() {
            let name = http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|error| GatewayError::Internal(format!("invalid signing header name: {error}")))?;
            let value = http::HeaderValue::from_str(value)
                .map_err(|error| GatewayError::Internal(format!("invalid signing header value: {error}")))?;

            request.headers.insert(name, value);
        }

        Ok(())
    }
}
