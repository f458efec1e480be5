//! Mastodon driver
//!
//! Talks the plain Mastodon REST API of a single instance: OAuth2 token
//! endpoints under `/oauth`, account and status endpoints under `/api/v1`.
//! PKCE is used on the authorization-code flow.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::drivers::{
    status_error, transport_error, AccountInfo, AnalyticsSnapshot, AuthConfig, PlatformDriver,
    PublishedPost, TokenSet,
};
use crate::error::{PlatformError, Result};
use crate::types::{MediaRef, PlatformId};

pub struct MastodonDriver {
    base_url: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    id: String,
    username: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    favourites_count: Option<u64>,
    #[serde(default)]
    reblogs_count: Option<u64>,
    #[serde(default)]
    replies_count: Option<u64>,
}

impl MastodonDriver {
    pub fn new(
        base_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("mastodon: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(status_error(PlatformId::Mastodon, status, body).into())
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let response = self
            .http
            .post(self.url("/oauth/token"))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        let token: TokenResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            // Most instances issue non-expiring tokens and omit expires_in
            expires_at: token
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
            scopes: token
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    async fn verify_credentials(&self, access_token: &str) -> Result<AccountInfo> {
        let response = self
            .http
            .get(self.url("/api/v1/accounts/verify_credentials"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        let account: AccountResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        Ok(AccountInfo {
            account_id: account.id,
            username: account.username,
            display_name: account.display_name.filter(|n| !n.is_empty()),
        })
    }
}

#[async_trait]
impl PlatformDriver for MastodonDriver {
    fn platform(&self) -> PlatformId {
        PlatformId::Mastodon
    }

    fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            authorize_endpoint: self.url("/oauth/authorize"),
            client_id: self.client_id.clone(),
            scopes: vec!["read".to_string(), "write".to_string()],
            uses_pkce: true,
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<(TokenSet, AccountInfo)> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let tokens = self.token_request(&form).await?;
        let account = self.verify_credentials(&tokens.access_token).await?;
        Ok((tokens, account))
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn revoke_token(&self, access_token: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/oauth/revoke"))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("token", access_token),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        self.check(response).await?;
        Ok(())
    }

    async fn publish(
        &self,
        access_token: &str,
        body: &str,
        media: &[MediaRef],
    ) -> Result<PublishedPost> {
        // Media lives at externally hosted URLs; append them to the status
        // body rather than re-uploading through the instance's media API.
        let mut status = body.to_string();
        for item in media {
            status.push('\n');
            status.push_str(&item.url);
        }

        let response = self
            .http
            .post(self.url("/api/v1/statuses"))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        let status: StatusResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        Ok(PublishedPost {
            platform_post_id: status.id,
            url: status.url,
        })
    }

    async fn analytics(
        &self,
        access_token: &str,
        platform_post_id: &str,
    ) -> Result<AnalyticsSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/statuses/{}", platform_post_id)))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        let status: StatusResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Mastodon, e))?;

        Ok(AnalyticsSnapshot {
            impressions: None,
            likes: status.favourites_count,
            shares: status.reblogs_count,
            comments: status.replies_count,
            fetched_at: chrono::Utc::now().timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> MastodonDriver {
        MastodonDriver::new(
            "https://mastodon.social/".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let driver = driver();
        assert_eq!(
            driver.url("/oauth/authorize"),
            "https://mastodon.social/oauth/authorize"
        );
    }

    #[test]
    fn test_auth_config_uses_pkce() {
        let config = driver().auth_config();
        assert!(config.uses_pkce);
        assert_eq!(config.client_id, "client-id");
        assert!(config.authorize_endpoint.ends_with("/oauth/authorize"));
        assert!(config.scopes.contains(&"write".to_string()));
    }

    #[test]
    fn test_token_response_without_expiry() {
        let json = r#"{"access_token":"abc","token_type":"Bearer","scope":"read write","created_at":1690000000}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_in, None);
        assert_eq!(token.refresh_token, None);
    }

    #[test]
    fn test_status_response_parsing() {
        let json = r#"{"id":"109501","url":"https://mastodon.social/@user/109501","favourites_count":3,"reblogs_count":1,"replies_count":0}"#;
        let status: StatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(status.id, "109501");
        assert_eq!(status.favourites_count, Some(3));
    }
}
