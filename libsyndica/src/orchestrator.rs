//! Post lifecycle orchestration
//!
//! This module owns the post state machine: create/update in `draft` or
//! `scheduled`, fan-out publishing with per-platform isolation, deletion as
//! a tombstone, and analytics passthrough. Platform failures never cross
//! platform boundaries; the post's aggregate status folds over the
//! per-platform outcomes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::capabilities;
use crate::credentials::CredentialManager;
use crate::db::Database;
use crate::dispatcher::WorkQueue;
use crate::drivers::{AnalyticsSnapshot, DriverRegistry, PlatformDriver, PublishedPost};
use crate::error::{CredentialError, PlatformError, Result, SyndicaError};
use crate::types::{
    CredentialStatus, MediaRef, PlatformId, PlatformOverride, Post, PostStatus, Priority,
    PublishRecord,
};

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86_400;

/// Request to create a post.
#[derive(Debug, Clone, Default)]
pub struct CreatePostRequest {
    pub content: String,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub media: Vec<MediaRef>,
    pub platforms: Vec<PlatformId>,
    pub overrides: HashMap<PlatformId, PlatformOverride>,
    pub priority: Priority,
    /// When set, the post is created as `scheduled` and a work item is
    /// enqueued for the dispatcher.
    pub scheduled_at: Option<i64>,
}

/// Partial update for an editable post. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdatePostRequest {
    pub content: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub mentions: Option<Vec<String>>,
    pub media: Option<Vec<MediaRef>>,
    pub platforms: Option<Vec<PlatformId>>,
    pub overrides: Option<HashMap<PlatformId, PlatformOverride>>,
    pub priority: Option<Priority>,
    /// `Some(Some(ts))` reschedules, `Some(None)` unschedules back to draft
    pub scheduled_at: Option<Option<i64>>,
}

/// Aggregate result of a publish call.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub post: Post,
    /// Records written during this attempt, one per platform tried
    pub records: Vec<PublishRecord>,
}

/// Analytics for one platform of a published post.
#[derive(Debug, Clone)]
pub struct PlatformAnalytics {
    pub platform: PlatformId,
    pub snapshot: Option<AnalyticsSnapshot>,
    pub error: Option<String>,
}

/// Check if an error is transient and should be retried
///
/// Transient errors include network issues, timeouts, and rate limiting.
/// Permanent errors include authentication and validation failures.
fn is_transient_error(error: &SyndicaError) -> bool {
    matches!(
        error,
        SyndicaError::Platform(
            PlatformError::Network(_) | PlatformError::Timeout(_) | PlatformError::RateLimit(_)
        )
    )
}

/// Publish to one platform with up to 3 attempts and exponential backoff
/// (1s, 2s) on transient errors.
async fn publish_with_retry(
    driver: &dyn PlatformDriver,
    access_token: &str,
    body: &str,
    media: &[MediaRef],
) -> Result<PublishedPost> {
    let max_attempts = 3;
    let platform = driver.platform();

    for attempt in 1..=max_attempts {
        match driver.publish(access_token, body, media).await {
            Ok(published) => {
                if attempt > 1 {
                    info!("Successfully published to {} on attempt {}", platform, attempt);
                }
                return Ok(published);
            }
            Err(e) => {
                if is_transient_error(&e) && attempt < max_attempts {
                    let delay_secs = 2_u64.pow(attempt - 1);
                    warn!(
                        "Transient error publishing to {} (attempt {}/{}): {}. Retrying in {}s...",
                        platform, attempt, max_attempts, e, delay_secs
                    );
                    sleep(Duration::from_secs(delay_secs)).await;
                } else {
                    if attempt == max_attempts {
                        warn!(
                            "Failed to publish to {} after {} attempts: {}",
                            platform, max_attempts, e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    Err(PlatformError::Publishing(format!(
        "Failed to publish to {} after {} attempts",
        platform, max_attempts
    ))
    .into())
}

pub struct PostOrchestrator {
    db: Database,
    credentials: Arc<CredentialManager>,
    drivers: Arc<DriverRegistry>,
    work_queue: WorkQueue,
}

impl PostOrchestrator {
    pub fn new(
        db: Database,
        credentials: Arc<CredentialManager>,
        drivers: Arc<DriverRegistry>,
    ) -> Self {
        let work_queue = WorkQueue::new(db.clone());
        Self {
            db,
            credentials,
            drivers,
            work_queue,
        }
    }

    /// Create a post in `draft`, or `scheduled` when a publish time is given.
    ///
    /// Every target platform must have a connected credential and accept the
    /// effective content; otherwise nothing is persisted.
    pub async fn create_post(&self, owner_id: &str, request: CreatePostRequest) -> Result<Post> {
        if request.platforms.is_empty() {
            return Err(SyndicaError::InvalidInput(
                "at least one target platform is required".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp();
        if let Some(scheduled_at) = request.scheduled_at {
            if scheduled_at <= now {
                return Err(SyndicaError::InvalidInput(
                    "scheduled time must be in the future".to_string(),
                ));
            }
        }

        let mut post = Post::new(owner_id.to_string(), request.content, request.platforms);
        post.hashtags = request.hashtags;
        post.mentions = request.mentions;
        post.media = request.media;
        post.overrides = request.overrides;
        post.priority = request.priority;

        self.require_connected_credentials(owner_id, &post.platforms)
            .await?;
        self.validate_for_platforms(&post)?;

        if let Some(scheduled_at) = request.scheduled_at {
            post.status = PostStatus::Scheduled;
            post.scheduled_at = Some(scheduled_at);
        }

        self.db.create_post(&post).await?;
        if post.status == PostStatus::Scheduled {
            self.work_queue.schedule(&post).await?;
        }

        info!(post_id = %post.id, status = %post.status, "post created");
        Ok(post)
    }

    /// Edit a post that has not started publishing.
    pub async fn update_post(
        &self,
        owner_id: &str,
        post_id: &str,
        request: UpdatePostRequest,
    ) -> Result<Post> {
        let mut post = self.get_owned_post(owner_id, post_id).await?;

        // Editable exactly while still publishable; anything past `posting`
        // is immutable except for deletion.
        if !post.is_publishable() {
            return Err(SyndicaError::InvalidInput(format!(
                "cannot edit a {} post",
                post.status
            )));
        }

        if let Some(content) = request.content {
            post.content = content;
        }
        if let Some(hashtags) = request.hashtags {
            post.hashtags = hashtags;
        }
        if let Some(mentions) = request.mentions {
            post.mentions = mentions;
        }
        if let Some(media) = request.media {
            post.media = media;
        }
        if let Some(platforms) = request.platforms {
            if platforms.is_empty() {
                return Err(SyndicaError::InvalidInput(
                    "at least one target platform is required".to_string(),
                ));
            }
            self.require_connected_credentials(owner_id, &platforms)
                .await?;
            post.platforms = platforms;
        }
        if let Some(overrides) = request.overrides {
            post.overrides = overrides;
        }
        if let Some(priority) = request.priority {
            post.priority = priority;
        }

        self.validate_for_platforms(&post)?;

        match request.scheduled_at {
            Some(Some(scheduled_at)) => {
                let now = chrono::Utc::now().timestamp();
                if scheduled_at <= now {
                    return Err(SyndicaError::InvalidInput(
                        "scheduled time must be in the future".to_string(),
                    ));
                }
                post.status = PostStatus::Scheduled;
                post.scheduled_at = Some(scheduled_at);
            }
            Some(None) => {
                if post.status == PostStatus::Scheduled {
                    post.status = PostStatus::Draft;
                }
                post.scheduled_at = None;
            }
            None => {}
        }

        post.updated_at = chrono::Utc::now().timestamp();
        self.db.update_post(&post).await?;

        // Work queue follows the post's scheduling state
        match (post.status, post.scheduled_at) {
            (PostStatus::Scheduled, Some(_)) => self.work_queue.reschedule(&post).await?,
            _ => {
                self.work_queue.cancel(&post.id).await?;
            }
        }

        info!(post_id = %post.id, "post updated");
        Ok(post)
    }

    /// Publish a post to every target platform that has not already
    /// succeeded, in parallel, and fold the outcomes into the post status.
    ///
    /// The `posting` status acts as the lock: the claim below is a single
    /// conditional update, so only one of any number of concurrent publish
    /// calls wins it and the rest are rejected.
    pub async fn publish(&self, owner_id: &str, post_id: &str) -> Result<PublishOutcome> {
        let mut post = self.get_owned_post(owner_id, post_id).await?;

        match post.status {
            PostStatus::Published => {
                return Err(SyndicaError::InvalidInput(format!(
                    "post {} is already published",
                    post.id
                )));
            }
            PostStatus::Posting => {
                return Err(SyndicaError::InvalidInput(format!(
                    "post {} is already being published",
                    post.id
                )));
            }
            PostStatus::Deleted => {
                return Err(SyndicaError::InvalidInput(format!(
                    "post {} has been deleted",
                    post.id
                )));
            }
            PostStatus::Draft | PostStatus::Scheduled | PostStatus::Failed => {}
        }

        // The status check above only shapes the error message; the claim
        // itself decides who publishes.
        if !self.db.try_mark_posting(&post.id).await? {
            return Err(SyndicaError::InvalidInput(format!(
                "post {} is already being published",
                post.id
            )));
        }
        post.status = PostStatus::Posting;

        // A retry after partial failure skips platforms that already went out
        let prior_successes = self.platforms_already_published(&post.id).await?;
        let pending: Vec<PlatformId> = post
            .platforms
            .iter()
            .copied()
            .filter(|p| !prior_successes.contains(p))
            .collect();

        let attempts: Vec<_> = pending
            .iter()
            .map(|&platform| self.publish_to_platform(&post, platform))
            .collect();
        let records = futures::future::join_all(attempts).await;

        for record in &records {
            if let Err(e) = self.db.insert_publish_record(record).await {
                warn!(
                    "Failed to record result for platform {}: {}",
                    record.platform, e
                );
            }
        }

        let all_succeeded = records.iter().all(|r| r.success);
        let now = chrono::Utc::now().timestamp();
        if all_succeeded {
            post.status = PostStatus::Published;
            post.published_at = Some(now);
        } else {
            post.status = PostStatus::Failed;
        }
        post.updated_at = now;
        self.db.update_post(&post).await?;

        info!(post_id = %post.id, status = %post.status, "publish finished");
        Ok(PublishOutcome { post, records })
    }

    /// Tombstone a post. Publish records are retained for audit.
    pub async fn delete_post(&self, owner_id: &str, post_id: &str) -> Result<Post> {
        let mut post = self.get_owned_post(owner_id, post_id).await?;

        if post.status == PostStatus::Deleted {
            return Ok(post);
        }
        if post.status == PostStatus::Posting {
            return Err(SyndicaError::InvalidInput(format!(
                "post {} is being published and cannot be deleted",
                post.id
            )));
        }

        self.work_queue.cancel(&post.id).await?;
        post.status = PostStatus::Deleted;
        post.updated_at = chrono::Utc::now().timestamp();
        self.db.update_post(&post).await?;

        info!(post_id = %post.id, "post deleted");
        Ok(post)
    }

    /// Operator recovery for a post stranded in `posting` after a crash.
    /// Moves it back to `failed` so it can be edited or republished. The
    /// reset is conditional, so a publish that is actually still running
    /// and finishes first keeps its outcome.
    pub async fn recover_stuck_publish(&self, owner_id: &str, post_id: &str) -> Result<Post> {
        let post = self.get_owned_post(owner_id, post_id).await?;
        if post.status != PostStatus::Posting {
            return Err(SyndicaError::InvalidInput(format!(
                "post {} is not stuck publishing ({})",
                post.id, post.status
            )));
        }

        if self.db.reset_posting(&post.id).await? {
            warn!(post_id = %post.id, "stuck publish reset to failed");
        }
        self.get_owned_post(owner_id, post_id).await
    }

    pub async fn get_post(&self, owner_id: &str, post_id: &str) -> Result<Post> {
        self.get_owned_post(owner_id, post_id).await
    }

    pub async fn list_posts(&self, owner_id: &str, limit: usize) -> Result<Vec<Post>> {
        self.db.list_posts(owner_id, limit).await
    }

    pub async fn publish_records(&self, owner_id: &str, post_id: &str) -> Result<Vec<PublishRecord>> {
        self.get_owned_post(owner_id, post_id).await?;
        self.db.get_publish_records(post_id).await
    }

    /// Fetch engagement counters for each platform the post reached.
    /// Per-platform failures are reported in the entry, not raised.
    pub async fn post_analytics(
        &self,
        owner_id: &str,
        post_id: &str,
    ) -> Result<Vec<PlatformAnalytics>> {
        let post = self.get_owned_post(owner_id, post_id).await?;
        let records = self.db.get_publish_records(&post.id).await?;

        let mut results = Vec::new();
        for platform in self.platforms_already_published(&post.id).await? {
            let Some(platform_post_id) = records
                .iter()
                .find(|r| r.platform == platform && r.success)
                .and_then(|r| r.platform_post_id.clone())
            else {
                continue;
            };

            let entry = match self.fetch_analytics(owner_id, platform, &platform_post_id).await {
                Ok(snapshot) => PlatformAnalytics {
                    platform,
                    snapshot: Some(snapshot),
                    error: None,
                },
                Err(e) => PlatformAnalytics {
                    platform,
                    snapshot: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(entry);
        }
        Ok(results)
    }

    async fn fetch_analytics(
        &self,
        owner_id: &str,
        platform: PlatformId,
        platform_post_id: &str,
    ) -> Result<AnalyticsSnapshot> {
        let driver = self
            .drivers
            .get(platform)
            .ok_or_else(|| CredentialError::NotConnected(platform.to_string()))?;
        let token = self
            .credentials
            .ensure_valid_token(owner_id, platform)
            .await?
            .ok_or_else(|| CredentialError::NotConnected(platform.to_string()))?;
        driver.analytics(&token, platform_post_id).await
    }

    /// One platform's publish attempt, fully isolated: every failure mode
    /// becomes a failure record for this platform only.
    async fn publish_to_platform(&self, post: &Post, platform: PlatformId) -> PublishRecord {
        let failure =
            |error: String| PublishRecord::failure(post.id.clone(), platform, error);

        let Some(driver) = self.drivers.get(platform) else {
            return failure(format!("no driver configured for {}", platform));
        };

        let token = match self
            .credentials
            .ensure_valid_token(&post.owner_id, platform)
            .await
        {
            Ok(Some(token)) => token,
            Ok(None) => {
                return failure(format!("no connected credential for {}", platform));
            }
            Err(e) => return failure(e.to_string()),
        };

        match self.check_rate_limit(&post.owner_id, platform).await {
            Ok(decision) if !decision.allowed => {
                return failure(
                    decision
                        .reason
                        .unwrap_or_else(|| format!("{}: rate limit reached", platform)),
                );
            }
            Ok(_) => {}
            Err(e) => return failure(e.to_string()),
        }

        let content = post.content_for(platform);
        let media: Vec<MediaRef> = content
            .media
            .iter()
            .filter(|m| {
                let supported = capabilities::accepts_media_type(platform, &m.mime_type);
                if !supported {
                    warn!(
                        "Skipping media {} for {}: type {} not supported",
                        m.url, platform, m.mime_type
                    );
                }
                supported
            })
            .cloned()
            .collect();
        let body = capabilities::format(platform, &content);

        info!("Publishing to platform: {}", platform);
        match publish_with_retry(driver.as_ref(), &token, &body, &media).await {
            Ok(published) => {
                info!(
                    "Successfully published to {}: {}",
                    platform, published.platform_post_id
                );
                PublishRecord::success(
                    post.id.clone(),
                    platform,
                    published.platform_post_id,
                    published.url,
                )
            }
            Err(e) => {
                warn!("Failed to publish to {}: {}", platform, e);
                failure(e.to_string())
            }
        }
    }

    async fn check_rate_limit(
        &self,
        owner_id: &str,
        platform: PlatformId,
    ) -> Result<capabilities::RateLimitDecision> {
        let now = chrono::Utc::now().timestamp();
        let last_hour = self
            .db
            .count_successful_publishes_since(owner_id, platform, now - HOUR_SECS)
            .await?;
        let last_day = self
            .db
            .count_successful_publishes_since(owner_id, platform, now - DAY_SECS)
            .await?;
        Ok(capabilities::check_rate_limit(platform, last_hour, last_day))
    }

    /// Platforms whose most recent record for this post succeeded
    async fn platforms_already_published(&self, post_id: &str) -> Result<Vec<PlatformId>> {
        // records come back newest first
        let records = self.db.get_publish_records(post_id).await?;
        let mut seen = Vec::new();
        let mut succeeded = Vec::new();
        for record in records {
            if seen.contains(&record.platform) {
                continue;
            }
            seen.push(record.platform);
            if record.success {
                succeeded.push(record.platform);
            }
        }
        Ok(succeeded)
    }

    async fn get_owned_post(&self, owner_id: &str, post_id: &str) -> Result<Post> {
        let Some(post) = self.db.get_post(post_id).await? else {
            return Err(SyndicaError::InvalidInput(format!(
                "post not found: {}",
                post_id
            )));
        };
        if post.owner_id != owner_id {
            return Err(SyndicaError::Unauthorized(format!(
                "post {} does not belong to {}",
                post_id, owner_id
            )));
        }
        Ok(post)
    }

    async fn require_connected_credentials(
        &self,
        owner_id: &str,
        platforms: &[PlatformId],
    ) -> Result<()> {
        for &platform in platforms {
            let connected = self
                .db
                .get_credential(owner_id, platform)
                .await?
                .map(|c| c.status == CredentialStatus::Connected)
                .unwrap_or(false);
            if !connected {
                return Err(CredentialError::NotConnected(platform.to_string()).into());
            }
        }
        Ok(())
    }

    /// Validate the effective content against every target platform,
    /// collecting all problems into one error.
    fn validate_for_platforms(&self, post: &Post) -> Result<()> {
        let mut errors = Vec::new();
        for &platform in &post.platforms {
            let report = capabilities::validate(platform, &post.content_for(platform));
            errors.extend(report.errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyndicaError::InvalidInput(errors.join("; ")))
        }
    }
}
