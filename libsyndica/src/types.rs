//! Core types for Syndica

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier for a supported social network.
///
/// The set of platforms is closed: adding a network means adding a variant
/// here plus one driver implementation, never touching the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Mastodon,
    Linkedin,
}

impl PlatformId {
    pub const ALL: [PlatformId; 2] = [PlatformId::Mastodon, PlatformId::Linkedin];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Mastodon => "mastodon",
            PlatformId::Linkedin => "linkedin",
        }
    }
}

impl FromStr for PlatformId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mastodon" => Ok(PlatformId::Mastodon),
            "linkedin" => Ok(PlatformId::Linkedin),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

impl std::fmt::Display for PlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a post.
///
/// Transitions are strictly ordered: draft -> scheduled -> posting ->
/// published | failed. `deleted` is a terminal tombstone; rows are never
/// physically removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Posting,
    Published,
    Failed,
    Deleted,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Posting => "posting",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "posting" => Ok(PostStatus::Posting),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            "deleted" => Ok(PostStatus::Deleted),
            _ => Err(format!("Unknown post status: {}", s)),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Reference to a stored media asset.
///
/// The media pipeline is an external collaborator: Syndica only ever reads
/// the URL, MIME type, and size it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub alt_text: Option<String>,
}

/// Per-platform content replacement for a post.
///
/// Fields left as `None` fall back to the post's base content.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlatformOverride {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub hashtags: Option<Vec<String>>,
    #[serde(default)]
    pub mentions: Option<Vec<String>>,
}

/// The effective content the capability layer validates and formats for one
/// platform, after any override has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PostContent {
    pub body: String,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub media: Vec<MediaRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub media: Vec<MediaRef>,
    pub platforms: Vec<PlatformId>,
    pub overrides: HashMap<PlatformId, PlatformOverride>,
    pub priority: Priority,
    pub status: PostStatus,
    pub scheduled_at: Option<i64>,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn new(owner_id: String, content: String, platforms: Vec<PlatformId>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            content,
            hashtags: Vec::new(),
            mentions: Vec::new(),
            media: Vec::new(),
            platforms,
            overrides: HashMap::new(),
            priority: Priority::Normal,
            status: PostStatus::Draft,
            scheduled_at: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolve the effective content for one target platform, applying the
    /// per-platform override where present.
    pub fn content_for(&self, platform: PlatformId) -> PostContent {
        let ov = self.overrides.get(&platform);
        PostContent {
            body: ov
                .and_then(|o| o.content.clone())
                .unwrap_or_else(|| self.content.clone()),
            hashtags: ov
                .and_then(|o| o.hashtags.clone())
                .unwrap_or_else(|| self.hashtags.clone()),
            mentions: ov
                .and_then(|o| o.mentions.clone())
                .unwrap_or_else(|| self.mentions.clone()),
            media: self.media.clone(),
        }
    }

    /// Whether `publish` may proceed. A non-publishable status acts as an
    /// implicit lock against concurrent publish attempts.
    pub fn is_publishable(&self) -> bool {
        matches!(
            self.status,
            PostStatus::Draft | PostStatus::Scheduled | PostStatus::Failed
        )
    }
}

/// One platform's outcome for one publish attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRecord {
    pub id: Option<i64>,
    pub post_id: String,
    pub platform: PlatformId,
    pub success: bool,
    pub platform_post_id: Option<String>,
    pub url: Option<String>,
    pub error_message: Option<String>,
    pub posted_at: Option<i64>,
}

impl PublishRecord {
    pub fn success(
        post_id: String,
        platform: PlatformId,
        platform_post_id: String,
        url: Option<String>,
    ) -> Self {
        Self {
            id: None,
            post_id,
            platform,
            success: true,
            platform_post_id: Some(platform_post_id),
            url,
            error_message: None,
            posted_at: Some(chrono::Utc::now().timestamp()),
        }
    }

    pub fn failure(post_id: String, platform: PlatformId, error: String) -> Self {
        Self {
            id: None,
            post_id,
            platform,
            success: false,
            platform_post_id: None,
            url: None,
            error_message: Some(error),
            posted_at: None,
        }
    }
}

/// Connection status of a stored platform credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Connected,
    Disconnected,
    Expired,
    Error,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Connected => "connected",
            CredentialStatus::Disconnected => "disconnected",
            CredentialStatus::Expired => "expired",
            CredentialStatus::Error => "error",
        }
    }
}

impl FromStr for CredentialStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "connected" => Ok(CredentialStatus::Connected),
            "disconnected" => Ok(CredentialStatus::Disconnected),
            "expired" => Ok(CredentialStatus::Expired),
            "error" => Ok(CredentialStatus::Error),
            _ => Err(format!("Unknown credential status: {}", s)),
        }
    }
}

/// One user's authorization to post to one platform.
///
/// At most one `connected` credential exists per (owner, platform) pair;
/// the store enforces this with an upsert keyed on that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformCredential {
    pub owner_id: String,
    pub tenant_id: String,
    pub platform: PlatformId,
    pub status: CredentialStatus,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub account_id: Option<String>,
    pub account_username: Option<String>,
    pub display_name: Option<String>,
    pub scopes: Vec<String>,
    pub connected_at: i64,
    pub updated_at: i64,
}

impl PlatformCredential {
    /// Whether the stored access token is still usable without a refresh.
    pub fn token_is_fresh(&self, now: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            // No recorded expiry means the platform issued a non-expiring token.
            None => true,
        }
    }
}

/// Dispatcher-owned execution state for a scheduled post.
///
/// Decoupled from the post's own status so a crash mid-dispatch is
/// detectable: a stranded `processing` item means "unknown outcome".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::Processing => "processing",
            WorkItemStatus::Completed => "completed",
            WorkItemStatus::Failed => "failed",
            WorkItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Completed | WorkItemStatus::Failed)
    }
}

impl FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkItemStatus::Pending),
            "processing" => Ok(WorkItemStatus::Processing),
            "completed" => Ok(WorkItemStatus::Completed),
            "failed" => Ok(WorkItemStatus::Failed),
            "cancelled" => Ok(WorkItemStatus::Cancelled),
            _ => Err(format!("Unknown work item status: {}", s)),
        }
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledWorkItem {
    pub id: String,
    pub post_id: String,
    pub owner_id: String,
    pub due_at: i64,
    pub status: WorkItemStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledWorkItem {
    pub fn new(post_id: String, owner_id: String, due_at: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            post_id,
            owner_id,
            due_at,
            status: WorkItemStatus::Pending,
            attempts: 0,
            last_error: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_id_roundtrip() {
        for platform in PlatformId::ALL {
            let parsed: PlatformId = platform.as_str().parse().unwrap();
            assert_eq!(parsed, platform);
        }
        assert!("friendster".parse::<PlatformId>().is_err());
    }

    #[test]
    fn test_platform_id_parse_case_insensitive() {
        assert_eq!("Mastodon".parse::<PlatformId>().unwrap(), PlatformId::Mastodon);
        assert_eq!("LINKEDIN".parse::<PlatformId>().unwrap(), PlatformId::Linkedin);
    }

    #[test]
    fn test_post_status_roundtrip() {
        for status in [
            PostStatus::Draft,
            PostStatus::Scheduled,
            PostStatus::Posting,
            PostStatus::Published,
            PostStatus::Failed,
            PostStatus::Deleted,
        ] {
            let parsed: PostStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_post_new_defaults() {
        let post = Post::new(
            "user-1".to_string(),
            "Hello".to_string(),
            vec![PlatformId::Mastodon],
        );

        assert!(Uuid::parse_str(&post.id).is_ok());
        assert_eq!(post.status, PostStatus::Draft);
        assert_eq!(post.scheduled_at, None);
        assert_eq!(post.published_at, None);
        assert_eq!(post.priority, Priority::Normal);
        assert!(post.overrides.is_empty());
    }

    #[test]
    fn test_content_for_without_override() {
        let mut post = Post::new(
            "user-1".to_string(),
            "Base body".to_string(),
            vec![PlatformId::Mastodon, PlatformId::Linkedin],
        );
        post.hashtags = vec!["rust".to_string()];
        post.mentions = vec!["friend".to_string()];

        let content = post.content_for(PlatformId::Mastodon);
        assert_eq!(content.body, "Base body");
        assert_eq!(content.hashtags, vec!["rust".to_string()]);
        assert_eq!(content.mentions, vec!["friend".to_string()]);
    }

    #[test]
    fn test_content_for_with_override() {
        let mut post = Post::new(
            "user-1".to_string(),
            "Base body".to_string(),
            vec![PlatformId::Mastodon, PlatformId::Linkedin],
        );
        post.hashtags = vec!["rust".to_string()];
        post.overrides.insert(
            PlatformId::Linkedin,
            PlatformOverride {
                content: Some("Professional body".to_string()),
                hashtags: Some(vec!["career".to_string()]),
                mentions: None,
            },
        );

        let linkedin = post.content_for(PlatformId::Linkedin);
        assert_eq!(linkedin.body, "Professional body");
        assert_eq!(linkedin.hashtags, vec!["career".to_string()]);

        // Other platforms are unaffected by the override
        let mastodon = post.content_for(PlatformId::Mastodon);
        assert_eq!(mastodon.body, "Base body");
        assert_eq!(mastodon.hashtags, vec!["rust".to_string()]);
    }

    #[test]
    fn test_is_publishable() {
        let mut post = Post::new("u".to_string(), "c".to_string(), vec![PlatformId::Mastodon]);

        for (status, expected) in [
            (PostStatus::Draft, true),
            (PostStatus::Scheduled, true),
            (PostStatus::Failed, true),
            (PostStatus::Posting, false),
            (PostStatus::Published, false),
            (PostStatus::Deleted, false),
        ] {
            post.status = status;
            assert_eq!(post.is_publishable(), expected, "status {:?}", status);
        }
    }

    #[test]
    fn test_publish_record_success() {
        let record = PublishRecord::success(
            "post-1".to_string(),
            PlatformId::Mastodon,
            "109501".to_string(),
            Some("https://example.social/@user/109501".to_string()),
        );

        assert!(record.success);
        assert_eq!(record.platform_post_id, Some("109501".to_string()));
        assert!(record.posted_at.is_some());
        assert_eq!(record.error_message, None);
    }

    #[test]
    fn test_publish_record_failure() {
        let record = PublishRecord::failure(
            "post-1".to_string(),
            PlatformId::Linkedin,
            "network timeout".to_string(),
        );

        assert!(!record.success);
        assert_eq!(record.platform_post_id, None);
        assert_eq!(record.posted_at, None);
        assert_eq!(record.error_message, Some("network timeout".to_string()));
    }

    #[test]
    fn test_credential_token_freshness() {
        let now = chrono::Utc::now().timestamp();
        let mut credential = PlatformCredential {
            owner_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            platform: PlatformId::Mastodon,
            status: CredentialStatus::Connected,
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: Some(now + 600),
            account_id: None,
            account_username: None,
            display_name: None,
            scopes: vec![],
            connected_at: now,
            updated_at: now,
        };

        assert!(credential.token_is_fresh(now));

        credential.expires_at = Some(now - 1);
        assert!(!credential.token_is_fresh(now));

        credential.expires_at = None;
        assert!(credential.token_is_fresh(now));
    }

    #[test]
    fn test_work_item_new_is_pending() {
        let item = ScheduledWorkItem::new("post-1".to_string(), "user-1".to_string(), 1_900_000_000);
        assert_eq!(item.status, WorkItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.due_at, 1_900_000_000);
    }

    #[test]
    fn test_work_item_status_terminal() {
        assert!(WorkItemStatus::Completed.is_terminal());
        assert!(WorkItemStatus::Failed.is_terminal());
        assert!(!WorkItemStatus::Pending.is_terminal());
        assert!(!WorkItemStatus::Processing.is_terminal());
        assert!(!WorkItemStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_post_serialization_roundtrip() {
        let mut post = Post::new(
            "user-1".to_string(),
            "Hello world".to_string(),
            vec![PlatformId::Mastodon, PlatformId::Linkedin],
        );
        post.overrides.insert(
            PlatformId::Mastodon,
            PlatformOverride {
                content: Some("Fediverse hello".to_string()),
                ..Default::default()
            },
        );
        post.media.push(MediaRef {
            url: "https://cdn.example/a.png".to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 2048,
            width: Some(640),
            height: Some(480),
            alt_text: Some("a chart".to_string()),
        });

        let json = serde_json::to_string(&post).unwrap();
        let deserialized: Post = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, post.id);
        assert_eq!(deserialized.platforms, post.platforms);
        assert_eq!(deserialized.overrides, post.overrides);
        assert_eq!(deserialized.media, post.media);
    }
}
