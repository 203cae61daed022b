//! OAuth access tokens and ID tokens for Google APIs.
//!
//! Tokens come from explicit overrides when provided, otherwise from the
//! instance metadata server. Access tokens are cached until shortly before
//! they expire.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::PlatformError;

const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct TokenSettings {
    /// Fixed access token (`GOOGLE_OAUTH_ACCESS_TOKEN`).
    pub access_token: Option<String>,
    /// Fixed identity token (`GOOGLE_ID_TOKEN`), used for every audience.
    pub id_token: Option<String>,
    /// Metadata server `host[:port]` (`GCE_METADATA_HOST`).
    pub metadata_host: Option<String>,
}

impl TokenSettings {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            access_token: read("GOOGLE_OAUTH_ACCESS_TOKEN"),
            id_token: read("GOOGLE_ID_TOKEN"),
            metadata_host: read("GCE_METADATA_HOST"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetadataAccessToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct TokenProvider {
    http: reqwest::Client,
    settings: TokenSettings,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, settings: TokenSettings) -> Self {
        Self {
            http,
            settings,
            cached: Mutex::new(None),
        }
    }

    fn metadata_url(&self, path: &str) -> String {
        let host = self
            .settings
            .metadata_host
            .as_deref()
            .unwrap_or(DEFAULT_METADATA_HOST);
        format!("http://{host}/computeMetadata/v1/instance/service-accounts/default/{path}")
    }

    pub async fn access_token(&self) -> Result<String, PlatformError> {
        if let Some(token) = &self.settings.access_token {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .get(self.metadata_url("token"))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|error| PlatformError::Auth(format!("metadata token request: {error}")))?;
        if !response.status().is_success() {
            return Err(PlatformError::Auth(format!(
                "metadata token request returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let token: MetadataAccessToken = response
            .json()
            .await
            .map_err(|error| PlatformError::Auth(format!("metadata token body: {error}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        debug!(expires_in = token.expires_in, "refreshed access token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    pub async fn id_token(&self, audience: &str) -> Result<String, PlatformError> {
        if let Some(token) = &self.settings.id_token {
            return Ok(token.clone());
        }

        let response = self
            .http
            .get(self.metadata_url("identity"))
            .query(&[("audience", audience), ("format", "full")])
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|error| PlatformError::Auth(format!("metadata identity request: {error}")))?;
        if !response.status().is_success() {
            return Err(PlatformError::Auth(format!(
                "metadata identity request returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let token = response
            .text()
            .await
            .map_err(|error| PlatformError::Auth(format!("metadata identity body: {error}")))?;
        Ok(token.trim().to_string())
    }
}
