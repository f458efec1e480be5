//! Platform driver abstraction and implementations
//!
//! Each supported network implements [`PlatformDriver`]: the OAuth handshake,
//! token refresh and revocation, publishing, and analytics lookup. Drivers are
//! intentionally thin wire adapters; content rules live in the capability
//! layer and lifecycle decisions in the orchestrator.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, PlatformAppConfig};
use crate::error::{PlatformError, Result};
use crate::types::{MediaRef, PlatformId};

pub mod linkedin;
pub mod mastodon;

// Mock driver is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Tokens issued by a platform's OAuth endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp at which the access token expires. `None` for
    /// platforms that issue non-expiring tokens.
    pub expires_at: Option<i64>,
    pub scopes: Vec<String>,
}

/// The platform-side account a credential is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_id: String,
    pub username: String,
    pub display_name: Option<String>,
}

/// A successfully published platform post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub platform_post_id: String,
    pub url: Option<String>,
}

/// Engagement counters for one platform post, as far as the platform
/// exposes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsSnapshot {
    pub impressions: Option<u64>,
    pub likes: Option<u64>,
    pub shares: Option<u64>,
    pub comments: Option<u64>,
    pub fetched_at: i64,
}

/// Static pieces the credential layer needs to build an authorization URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub authorize_endpoint: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Whether the platform requires PKCE on the authorization-code flow.
    pub uses_pkce: bool,
}

/// Wire adapter for one platform.
///
/// Implementations must be stateless with respect to credentials: every call
/// that talks to the platform takes the access token it should use, so one
/// driver instance serves all owners.
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    /// The platform this driver speaks for
    fn platform(&self) -> PlatformId;

    /// OAuth parameters for building an authorization URL
    fn auth_config(&self) -> AuthConfig;

    /// Exchange an authorization code for tokens and resolve the account
    /// they belong to.
    ///
    /// `code_verifier` is the PKCE verifier generated alongside the
    /// authorization URL; drivers that don't use PKCE ignore it.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<(TokenSet, AccountInfo)>;

    /// Trade a refresh token for a fresh token set
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet>;

    /// Invalidate an access token upstream
    async fn revoke_token(&self, access_token: &str) -> Result<()>;

    /// Publish formatted content, returning the platform's post handle
    async fn publish(
        &self,
        access_token: &str,
        body: &str,
        media: &[MediaRef],
    ) -> Result<PublishedPost>;

    /// Fetch engagement counters for a previously published post
    async fn analytics(
        &self,
        access_token: &str,
        platform_post_id: &str,
    ) -> Result<AnalyticsSnapshot>;
}

/// The set of drivers available to the orchestrator and credential layer.
pub struct DriverRegistry {
    drivers: HashMap<PlatformId, Arc<dyn PlatformDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Build drivers for every platform the config registers an app for
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.dispatcher.call_timeout_secs);
        let mut registry = Self::new();

        for app in &config.platforms {
            match app {
                PlatformAppConfig::Mastodon {
                    base_url,
                    client_id,
                    client_secret,
                } => {
                    registry.insert(Arc::new(mastodon::MastodonDriver::new(
                        base_url.clone(),
                        client_id.clone(),
                        client_secret.clone(),
                        timeout,
                    )?));
                }
                PlatformAppConfig::Linkedin {
                    client_id,
                    client_secret,
                } => {
                    registry.insert(Arc::new(linkedin::LinkedinDriver::new(
                        client_id.clone(),
                        client_secret.clone(),
                        timeout,
                    )?));
                }
            }
        }

        Ok(registry)
    }

    /// Register a driver, replacing any existing driver for its platform
    pub fn insert(&mut self, driver: Arc<dyn PlatformDriver>) {
        self.drivers.insert(driver.platform(), driver);
    }

    pub fn get(&self, platform: PlatformId) -> Option<Arc<dyn PlatformDriver>> {
        self.drivers.get(&platform).cloned()
    }

    /// Platforms a driver is registered for
    pub fn platforms(&self) -> Vec<PlatformId> {
        let mut platforms: Vec<PlatformId> = self.drivers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Map transport-level reqwest failures onto platform errors.
/// HTTP status handling is done per call site, where the semantics are known.
pub(crate) fn transport_error(platform: PlatformId, e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout(format!("{}: {}", platform, e))
    } else {
        PlatformError::Network(format!("{}: {}", platform, e))
    }
}

/// Map an error response's status onto a platform error.
pub(crate) fn status_error(
    platform: PlatformId,
    status: reqwest::StatusCode,
    body: String,
) -> PlatformError {
    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(format!("{}: {} {}", platform, status, body)),
        422 => PlatformError::Validation(format!("{}: {}", platform, body)),
        429 => PlatformError::RateLimit(format!("{}: {}", platform, body)),
        _ => PlatformError::Publishing(format!("{}: {} {}", platform, status, body)),
    }
}
