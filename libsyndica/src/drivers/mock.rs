//! Mock driver implementation for testing
//!
//! A configurable driver that simulates handshake, refresh, publish, and
//! revocation outcomes without network access. Call counters are shared
//! through the config handle, so tests keep a clone of the config and
//! inspect it after handing the driver to a registry.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::drivers::{
    AccountInfo, AnalyticsSnapshot, AuthConfig, PlatformDriver, PublishedPost, TokenSet,
};
use crate::error::{PlatformError, Result};
use crate::types::{MediaRef, PlatformId};

/// Configuration for mock driver behavior
#[derive(Debug, Clone)]
pub struct MockDriverConfig {
    pub platform: PlatformId,

    /// Whether the code exchange should succeed
    pub exchange_succeeds: bool,

    /// Whether token refresh should succeed
    pub refresh_succeeds: bool,

    /// Error to return on publish, `None` for success
    pub publish_error: Option<PlatformError>,

    /// Errors to return on the first N publish calls before succeeding.
    /// Exercises the retry path.
    pub transient_publish_failures: usize,

    /// Lifetime of issued access tokens; `None` for non-expiring tokens
    pub token_lifetime_secs: Option<i64>,

    /// Whether issued token sets carry a refresh token
    pub issues_refresh_token: bool,

    /// Access token the driver expects on publish; mismatches fail with an
    /// authentication error. `None` accepts anything.
    pub expected_token: Option<String>,

    /// Whether the mock advertises PKCE on its auth config
    pub uses_pkce: bool,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    /// Number of times exchange_code has been called
    pub exchange_call_count: Arc<Mutex<usize>>,

    /// Number of times refresh_tokens has been called
    pub refresh_call_count: Arc<Mutex<usize>>,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Number of times revoke_token has been called
    pub revoke_call_count: Arc<Mutex<usize>>,

    /// Bodies that have been published (for verification)
    pub published_bodies: Arc<Mutex<Vec<String>>>,
}

impl MockDriverConfig {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            exchange_succeeds: true,
            refresh_succeeds: true,
            publish_error: None,
            transient_publish_failures: 0,
            token_lifetime_secs: None,
            issues_refresh_token: false,
            expected_token: None,
            uses_pkce: false,
            delay: Duration::from_millis(0),
            exchange_call_count: Arc::new(Mutex::new(0)),
            refresh_call_count: Arc::new(Mutex::new(0)),
            publish_call_count: Arc::new(Mutex::new(0)),
            revoke_call_count: Arc::new(Mutex::new(0)),
            published_bodies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn exchange_calls(&self) -> usize {
        *self.exchange_call_count.lock().unwrap()
    }

    pub fn refresh_calls(&self) -> usize {
        *self.refresh_call_count.lock().unwrap()
    }

    pub fn publish_calls(&self) -> usize {
        *self.publish_call_count.lock().unwrap()
    }

    pub fn revoke_calls(&self) -> usize {
        *self.revoke_call_count.lock().unwrap()
    }

    pub fn published_bodies(&self) -> Vec<String> {
        self.published_bodies.lock().unwrap().clone()
    }
}

/// Mock driver for testing
pub struct MockDriver {
    config: MockDriverConfig,
}

impl MockDriver {
    /// Create a new mock driver with the given configuration
    pub fn new(config: MockDriverConfig) -> Self {
        Self { config }
    }

    /// Create a mock driver where every operation succeeds
    pub fn success(platform: PlatformId) -> Self {
        Self::new(MockDriverConfig::new(platform))
    }

    /// Create a mock driver whose publish always fails with the given error
    pub fn publish_failure(platform: PlatformId, error: PlatformError) -> Self {
        Self::new(MockDriverConfig {
            publish_error: Some(error),
            ..MockDriverConfig::new(platform)
        })
    }

    /// Create a mock driver whose token refresh fails
    pub fn refresh_failure(platform: PlatformId) -> Self {
        Self::new(MockDriverConfig {
            refresh_succeeds: false,
            ..MockDriverConfig::new(platform)
        })
    }

    /// Create a mock driver issuing expiring tokens with refresh tokens
    pub fn expiring(platform: PlatformId, lifetime_secs: i64) -> Self {
        Self::new(MockDriverConfig {
            token_lifetime_secs: Some(lifetime_secs),
            issues_refresh_token: true,
            ..MockDriverConfig::new(platform)
        })
    }

    pub fn config(&self) -> &MockDriverConfig {
        &self.config
    }

    fn token_set(&self, suffix: &str) -> TokenSet {
        TokenSet {
            access_token: format!("{}-access-{}", self.config.platform, suffix),
            refresh_token: self
                .config
                .issues_refresh_token
                .then(|| format!("{}-refresh-{}", self.config.platform, suffix)),
            expires_at: self
                .config
                .token_lifetime_secs
                .map(|secs| chrono::Utc::now().timestamp() + secs),
            scopes: vec!["write".to_string()],
        }
    }
}

#[async_trait]
impl PlatformDriver for MockDriver {
    fn platform(&self) -> PlatformId {
        self.config.platform
    }

    fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            authorize_endpoint: format!("https://{}.example/oauth/authorize", self.config.platform),
            client_id: "mock-client".to_string(),
            scopes: vec!["write".to_string()],
            uses_pkce: self.config.uses_pkce,
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<(TokenSet, AccountInfo)> {
        *self.config.exchange_call_count.lock().unwrap() += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if !self.config.exchange_succeeds {
            return Err(
                PlatformError::Authentication("Mock code exchange rejected".to_string()).into(),
            );
        }

        let account = AccountInfo {
            account_id: format!("{}-account", self.config.platform),
            username: "mockuser".to_string(),
            display_name: Some("Mock User".to_string()),
        };
        Ok((self.token_set(code), account))
    }

    async fn refresh_tokens(&self, _refresh_token: &str) -> Result<TokenSet> {
        *self.config.refresh_call_count.lock().unwrap() += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if !self.config.refresh_succeeds {
            return Err(
                PlatformError::Authentication("Mock refresh rejected".to_string()).into(),
            );
        }

        Ok(self.token_set("refreshed"))
    }

    async fn revoke_token(&self, _access_token: &str) -> Result<()> {
        *self.config.revoke_call_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn publish(
        &self,
        access_token: &str,
        body: &str,
        _media: &[MediaRef],
    ) -> Result<PublishedPost> {
        let call_number = {
            let mut count = self.config.publish_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(expected) = &self.config.expected_token {
            if access_token != expected {
                return Err(PlatformError::Authentication(format!(
                    "Mock token mismatch: got {}",
                    access_token
                ))
                .into());
            }
        }

        if call_number <= self.config.transient_publish_failures {
            return Err(
                PlatformError::Network("Mock transient network failure".to_string()).into(),
            );
        }

        if let Some(error) = &self.config.publish_error {
            return Err(error.clone().into());
        }

        self.config
            .published_bodies
            .lock()
            .unwrap()
            .push(body.to_string());

        let post_id = format!("{}:mock-{}", self.config.platform, uuid::Uuid::new_v4());
        Ok(PublishedPost {
            platform_post_id: post_id.clone(),
            url: Some(format!("https://{}.example/posts/{}", self.config.platform, post_id)),
        })
    }

    async fn analytics(
        &self,
        _access_token: &str,
        _platform_post_id: &str,
    ) -> Result<AnalyticsSnapshot> {
        Ok(AnalyticsSnapshot {
            impressions: Some(100),
            likes: Some(10),
            shares: Some(2),
            comments: Some(1),
            fetched_at: chrono::Utc::now().timestamp(),
        })
    }
}
