//! Named credential sets referenced by channels.

use secrecy::SecretString;
use serde::Deserialize;

fn default_refresh_before() -> u64 {
    300
}

fn default_oauth_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// One credential set under `[credentials.<name>]`.
///
/// The variant controls which credential provider the gateway instantiates
/// for channels referencing this set.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum CredentialsConfig {
    /// A fixed API key sent on every request.
    Static {
        /// The provider API key.
        api_key: SecretString,
    },

    /// OAuth client with a refresh token, auto-refreshed in the background.
    Oauth {
        /// OAuth client id.
        client_id: String,
        /// OAuth client secret.
        client_secret: SecretString,
        /// Long-lived refresh token.
        refresh_token: SecretString,
        /// Token endpoint to post the refresh grant to.
        #[serde(default = "default_oauth_token_url")]
        token_url: String,
        /// Seconds before expiry at which the background refresher runs.
        #[serde(default = "default_refresh_before")]
        refresh_before: u64,
    },

    /// AWS access keys used for SigV4 request signing (Bedrock).
    Aws {
        /// AWS access key id.
        access_key_id: SecretString,
        /// AWS secret access key.
        secret_access_key: SecretString,
        /// Optional session token for temporary credentials.
        #[serde(default)]
        session_token: Option<SecretString>,
    },

    /// GCP user credentials exchanged for short-lived bearer tokens (Vertex).
    Gcp {
        /// OAuth client id of the GCP application.
        client_id: String,
        /// OAuth client secret.
        client_secret: SecretString,
        /// Long-lived refresh token.
        refresh_token: SecretString,
        /// Seconds before expiry at which the background refresher runs.
        #[serde(default = "default_refresh_before")]
        refresh_before: u64,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn static_credentials() {
        let config: CredentialsConfig = toml::from_str(
            r#"
            type = "static"
            api_key = "sk-ant-test"
            "#,
        )
        .unwrap();

        assert!(matches!(config, CredentialsConfig::Static { .. }));
    }

    #[test]
    fn oauth_defaults() {
        let config: CredentialsConfig = toml::from_str(
            r#"
            type = "oauth"
            client_id = "client"
            client_secret = "secret"
            refresh_token = "refresh"
            "#,
        )
        .unwrap();

        let CredentialsConfig::Oauth {
            token_url,
            refresh_before,
            ..
        } = config
        else {
            panic!("expected oauth credentials");
        };

        assert_eq!(token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(refresh_before, 300);
    }
}
