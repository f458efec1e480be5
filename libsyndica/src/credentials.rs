//! Credential management for Syndica
//!
//! Owns the OAuth connect/refresh/disconnect lifecycle for platform
//! credentials. The single choke point is [`CredentialManager::ensure_valid_token`]:
//! everything that talks to a platform on a user's behalf goes through it,
//! so token expiry is handled in exactly one place.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::drivers::{AccountInfo, DriverRegistry, TokenSet};
use crate::error::{ConfigError, CredentialError, Result};
use crate::types::{CredentialStatus, PlatformCredential, PlatformId};

/// An authorization URL plus the transient state the caller must hold on
/// to until the callback arrives.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub url: String,
    /// CSRF state parameter embedded in the URL
    pub state: String,
    /// PKCE verifier, present only for platforms that use PKCE
    pub code_verifier: Option<String>,
}

/// Outcome of completing an OAuth callback.
///
/// Platform-side rejection is reported here rather than raised: a failed
/// handshake is a normal outcome of the connect flow, not a system error.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub success: bool,
    pub credential: Option<PlatformCredential>,
    pub error: Option<String>,
}

pub struct CredentialManager {
    db: Database,
    drivers: Arc<DriverRegistry>,
}

impl CredentialManager {
    pub fn new(db: Database, drivers: Arc<DriverRegistry>) -> Self {
        Self { db, drivers }
    }

    /// Build the authorization URL that starts the connect flow.
    ///
    /// Callers may narrow the requested scopes or carry their own CSRF
    /// state; by default the driver's full scope set is requested and a
    /// random opaque state is generated.
    ///
    /// Fails only when no driver is registered for the platform; that is an
    /// operator configuration problem, not a user outcome.
    pub fn generate_auth_url(
        &self,
        platform: PlatformId,
        redirect_uri: &str,
        scopes: Option<&[String]>,
        state: Option<String>,
    ) -> Result<PendingAuthorization> {
        let driver = self
            .drivers
            .get(platform)
            .ok_or_else(|| ConfigError::PlatformNotConfigured(platform.to_string()))?;
        let auth = driver.auth_config();

        let state = state.unwrap_or_else(|| random_token(32));
        let scope = scopes.unwrap_or(&auth.scopes).join(" ");

        let mut params: Vec<(&str, String)> = vec![
            ("response_type", "code".to_string()),
            ("client_id", auth.client_id.clone()),
            ("redirect_uri", redirect_uri.to_string()),
            ("scope", scope),
            ("state", state.clone()),
        ];

        let code_verifier = if auth.uses_pkce {
            let verifier = random_token(64);
            params.push(("code_challenge", pkce_challenge(&verifier)));
            params.push(("code_challenge_method", "S256".to_string()));
            Some(verifier)
        } else {
            None
        };

        let url = reqwest::Url::parse_with_params(&auth.authorize_endpoint, &params)
            .map_err(|e| ConfigError::MissingField(format!("authorize endpoint: {}", e)))?;

        debug!(platform = %platform, "generated authorization URL");
        Ok(PendingAuthorization {
            url: url.to_string(),
            state,
            code_verifier,
        })
    }

    /// Complete the handshake after the user returns from the platform.
    ///
    /// On success the credential is persisted as `connected`, replacing any
    /// previous credential for the same (owner, platform) pair.
    pub async fn complete_auth(
        &self,
        owner_id: &str,
        tenant_id: &str,
        platform: PlatformId,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<AuthOutcome> {
        let driver = self
            .drivers
            .get(platform)
            .ok_or_else(|| ConfigError::PlatformNotConfigured(platform.to_string()))?;

        let (tokens, account) = match driver
            .exchange_code(code, redirect_uri, code_verifier)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(platform = %platform, error = %e, "authorization code exchange failed");
                return Ok(AuthOutcome {
                    success: false,
                    credential: None,
                    error: Some(e.to_string()),
                });
            }
        };

        let credential = self
            .store_credential(owner_id, tenant_id, platform, tokens, account)
            .await?;
        Ok(AuthOutcome {
            success: true,
            credential: Some(credential),
            error: None,
        })
    }

    /// Persist a credential as `connected`, replacing any previous
    /// credential for the same (owner, platform) pair. Used by
    /// [`complete_auth`](Self::complete_auth) and by callers that obtained
    /// tokens out of band (imports, tests).
    pub async fn store_credential(
        &self,
        owner_id: &str,
        tenant_id: &str,
        platform: PlatformId,
        tokens: TokenSet,
        account: AccountInfo,
    ) -> Result<PlatformCredential> {
        let now = chrono::Utc::now().timestamp();
        let credential = PlatformCredential {
            owner_id: owner_id.to_string(),
            tenant_id: tenant_id.to_string(),
            platform,
            status: CredentialStatus::Connected,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
            account_id: Some(account.account_id),
            account_username: Some(account.username),
            display_name: account.display_name,
            scopes: tokens.scopes,
            connected_at: now,
            updated_at: now,
        };
        self.db.upsert_credential(&credential).await?;

        info!(platform = %platform, owner = owner_id, "credential connected");
        Ok(credential)
    }

    /// Return a usable access token for (owner, platform), refreshing it
    /// first when expired.
    ///
    /// Returns `None` when no connected credential exists or the token
    /// cannot be made valid; the caller records that as a per-platform
    /// failure rather than aborting. Two concurrent calls may both refresh;
    /// both end up persisting a valid token, so the race is tolerated.
    pub async fn ensure_valid_token(
        &self,
        owner_id: &str,
        platform: PlatformId,
    ) -> Result<Option<String>> {
        let Some(credential) = self.db.get_credential(owner_id, platform).await? else {
            return Ok(None);
        };
        if credential.status != CredentialStatus::Connected {
            return Ok(None);
        }

        let now = chrono::Utc::now().timestamp();
        if credential.token_is_fresh(now) {
            return Ok(Some(credential.access_token));
        }

        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            warn!(platform = %platform, owner = owner_id, "token expired with no refresh token");
            self.db
                .set_credential_status(owner_id, platform, CredentialStatus::Expired)
                .await?;
            return Ok(None);
        };

        let Some(driver) = self.drivers.get(platform) else {
            return Err(ConfigError::PlatformNotConfigured(platform.to_string()).into());
        };

        match driver.refresh_tokens(refresh_token).await {
            Ok(tokens) => {
                self.db
                    .update_credential_tokens(
                        owner_id,
                        platform,
                        &tokens.access_token,
                        // Keep the old refresh token when the platform doesn't rotate it
                        tokens
                            .refresh_token
                            .as_deref()
                            .or(credential.refresh_token.as_deref()),
                        tokens.expires_at,
                    )
                    .await?;
                info!(platform = %platform, owner = owner_id, "access token refreshed");
                Ok(Some(tokens.access_token))
            }
            Err(e) => {
                warn!(platform = %platform, owner = owner_id, error = %e, "token refresh failed");
                self.db
                    .set_credential_status(owner_id, platform, CredentialStatus::Expired)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Disconnect a platform: optionally revoke the token upstream (best
    /// effort) and mark the credential disconnected locally. `revoke:
    /// false` skips the upstream call, for tokens already invalidated on
    /// the platform side.
    pub async fn disconnect(&self, owner_id: &str, platform: PlatformId, revoke: bool) -> Result<()> {
        let Some(credential) = self.db.get_credential(owner_id, platform).await? else {
            return Err(CredentialError::NotConnected(platform.to_string()).into());
        };

        if revoke {
            if let Some(driver) = self.drivers.get(platform) {
                if let Err(e) = driver.revoke_token(&credential.access_token).await {
                    // Local disconnect proceeds regardless
                    warn!(platform = %platform, error = %e, "upstream token revocation failed");
                }
            }
        }

        self.db
            .set_credential_status(owner_id, platform, CredentialStatus::Disconnected)
            .await?;
        info!(platform = %platform, owner = owner_id, "credential disconnected");
        Ok(())
    }

    /// All credentials stored for an owner
    pub async fn list(&self, owner_id: &str) -> Result<Vec<PlatformCredential>> {
        self.db.list_credentials(owner_id).await
    }
}

fn random_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// S256 code challenge for a PKCE verifier
fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
