//! LinkedIn driver
//!
//! OAuth2 against `www.linkedin.com/oauth/v2`, publishing through the
//! `v2/ugcPosts` API. LinkedIn access tokens always expire, so this is the
//! driver that exercises the refresh path in production.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::drivers::{
    status_error, transport_error, AccountInfo, AnalyticsSnapshot, AuthConfig, PlatformDriver,
    PublishedPost, TokenSet,
};
use crate::error::{PlatformError, Result};
use crate::types::{MediaRef, PlatformId};

const OAUTH_BASE: &str = "https://www.linkedin.com/oauth/v2";
const API_BASE: &str = "https://api.linkedin.com/v2";

pub struct LinkedinDriver {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    sub: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UgcPostResponse {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialActionsResponse {
    #[serde(default)]
    likes_summary: Option<LikesSummary>,
    #[serde(default)]
    comments_summary: Option<CommentsSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikesSummary {
    #[serde(default)]
    total_likes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentsSummary {
    #[serde(default)]
    aggregated_total_comments: u64,
}

impl LinkedinDriver {
    pub fn new(client_id: String, client_secret: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("linkedin: {}", e)))?;

        Ok(Self {
            client_id,
            client_secret,
            http,
        })
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(status_error(PlatformId::Linkedin, status, body).into())
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let response = self
            .http
            .post(format!("{}/accessToken", OAUTH_BASE))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        let token: TokenResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Some(chrono::Utc::now().timestamp() + token.expires_in),
            scopes: token
                .scope
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfoResponse> {
        let response = self
            .http
            .get(format!("{}/userinfo", API_BASE))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e).into())
    }
}

#[async_trait]
impl PlatformDriver for LinkedinDriver {
    fn platform(&self) -> PlatformId {
        PlatformId::Linkedin
    }

    fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            authorize_endpoint: format!("{}/authorization", OAUTH_BASE),
            client_id: self.client_id.clone(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "w_member_social".to_string(),
            ],
            uses_pkce: false,
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<(TokenSet, AccountInfo)> {
        let tokens = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        let info = self.user_info(&tokens.access_token).await?;
        let account = AccountInfo {
            account_id: info.sub.clone(),
            username: info.email.unwrap_or(info.sub),
            display_name: info.name,
        };
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
            .post(format!("{}/revoke", OAUTH_BASE))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("token", access_token),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        self.check(response).await?;
        Ok(())
    }

    async fn publish(
        &self,
        access_token: &str,
        body: &str,
        media: &[MediaRef],
    ) -> Result<PublishedPost> {
        // ugcPosts needs the author URN, which is derived from the token
        let info = self.user_info(access_token).await?;
        let author = format!("urn:li:person:{}", info.sub);

        let media_entries: Vec<serde_json::Value> = media
            .iter()
            .map(|m| {
                serde_json::json!({
                    "status": "READY",
                    "originalUrl": m.url,
                    "description": { "text": m.alt_text.clone().unwrap_or_default() },
                })
            })
            .collect();

        let payload = serde_json::json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": body },
                    "shareMediaCategory": if media.is_empty() { "NONE" } else { "ARTICLE" },
                    "media": media_entries,
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        });

        let response = self
            .http
            .post(format!("{}/ugcPosts", API_BASE))
            .bearer_auth(access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        let post: UgcPostResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        let url = format!("https://www.linkedin.com/feed/update/{}", post.id);
        Ok(PublishedPost {
            platform_post_id: post.id,
            url: Some(url),
        })
    }

    async fn analytics(
        &self,
        access_token: &str,
        platform_post_id: &str,
    ) -> Result<AnalyticsSnapshot> {
        let response = self
            .http
            .get(format!("{}/socialActions/{}", API_BASE, platform_post_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        let actions: SocialActionsResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(PlatformId::Linkedin, e))?;

        Ok(AnalyticsSnapshot {
            impressions: None,
            likes: actions.likes_summary.map(|l| l.total_likes),
            shares: None,
            comments: actions.comments_summary.map(|c| c.aggregated_total_comments),
            fetched_at: chrono::Utc::now().timestamp(),
        })
    }
}
