//! Database operations for Syndica

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    CredentialStatus, PlatformCredential, PlatformId, Post, PostStatus, PublishRecord,
    ScheduledWorkItem, WorkItemStatus,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn parse_field<T>(value: String, what: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| DbError::DecodeError(format!("{}: {}", what, e)).into())
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ---- posts ----

    /// Insert a new post
    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, owner_id, content, hashtags, mentions, media, platforms,
                               overrides, priority, status, scheduled_at, published_at,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner_id)
        .bind(&post.content)
        .bind(serde_json::to_string(&post.hashtags).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.mentions).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.media).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.platforms).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.overrides).map_err(DbError::EncodingError)?)
        .bind(post.priority.as_str())
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(post.published_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Rewrite all mutable fields of an existing post
    pub async fn update_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET content = ?, hashtags = ?, mentions = ?, media = ?, platforms = ?,
                overrides = ?, priority = ?, status = ?, scheduled_at = ?,
                published_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&post.content)
        .bind(serde_json::to_string(&post.hashtags).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.mentions).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.media).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.platforms).map_err(DbError::EncodingError)?)
        .bind(serde_json::to_string(&post.overrides).map_err(DbError::EncodingError)?)
        .bind(post.priority.as_str())
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(post.published_at)
        .bind(post.updated_at)
        .bind(&post.id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Atomically claim a post for publishing.
    ///
    /// The conditional update is the publish lock: only one caller can move
    /// a publishable post into `posting`. Returns false when the post is
    /// missing, already claimed, or otherwise not publishable.
    pub async fn try_mark_posting(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'posting', updated_at = ?
            WHERE id = ? AND status IN ('draft', 'scheduled', 'failed')
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a post stranded in `posting` back to `failed`.
    /// Conditional so an in-flight publish that finishes first wins.
    pub async fn reset_posting(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'failed', updated_at = ?
            WHERE id = ? AND status = 'posting'
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, content, hashtags, mentions, media, platforms, overrides,
                   priority, status, scheduled_at, published_at, created_at, updated_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(map_post_row).transpose()
    }

    /// List an owner's posts, newest first
    pub async fn list_posts(&self, owner_id: &str, limit: usize) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, content, hashtags, mentions, media, platforms, overrides,
                   priority, status, scheduled_at, published_at, created_at, updated_at
            FROM posts
            WHERE owner_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_post_row).collect()
    }

    // ---- publish records ----

    /// Record one platform's outcome for a publish attempt
    pub async fn insert_publish_record(&self, record: &PublishRecord) -> Result<()> {
        let success = if record.success { 1 } else { 0 };

        sqlx::query(
            r#"
            INSERT INTO publish_records (post_id, platform, success, platform_post_id, url,
                                         error_message, posted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.post_id)
        .bind(record.platform.as_str())
        .bind(success)
        .bind(&record.platform_post_id)
        .bind(&record.url)
        .bind(&record.error_message)
        .bind(record.posted_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// All publish records for a post, newest first
    pub async fn get_publish_records(&self, post_id: &str) -> Result<Vec<PublishRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, platform, success, platform_post_id, url, error_message, posted_at
            FROM publish_records
            WHERE post_id = ?
            ORDER BY id DESC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter()
            .map(|r| {
                Ok(PublishRecord {
                    id: r.get("id"),
                    post_id: r.get("post_id"),
                    platform: parse_field(r.get::<String, _>("platform"), "platform")?,
                    success: r.get::<i32, _>("success") != 0,
                    platform_post_id: r.get("platform_post_id"),
                    url: r.get("url"),
                    error_message: r.get("error_message"),
                    posted_at: r.get("posted_at"),
                })
            })
            .collect()
    }

    /// Count an owner's successful publishes to one platform since a cutoff.
    /// Feeds the rate-limit check before each platform attempt.
    pub async fn count_successful_publishes_since(
        &self,
        owner_id: &str,
        platform: PlatformId,
        since: i64,
    ) -> Result<u32> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM publish_records pr
            JOIN posts p ON p.id = pr.post_id
            WHERE p.owner_id = ? AND pr.platform = ? AND pr.success = 1 AND pr.posted_at >= ?
            "#,
        )
        .bind(owner_id)
        .bind(platform.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get::<i64, _>("n") as u32)
    }

    // ---- credentials ----

    /// Insert or replace the credential for (owner, platform)
    pub async fn upsert_credential(&self, credential: &PlatformCredential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (owner_id, tenant_id, platform, status, access_token,
                                     refresh_token, expires_at, account_id, account_username,
                                     display_name, scopes, connected_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_id, platform) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                status = excluded.status,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                account_id = excluded.account_id,
                account_username = excluded.account_username,
                display_name = excluded.display_name,
                scopes = excluded.scopes,
                connected_at = excluded.connected_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.owner_id)
        .bind(&credential.tenant_id)
        .bind(credential.platform.as_str())
        .bind(credential.status.as_str())
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(&credential.account_id)
        .bind(&credential.account_username)
        .bind(&credential.display_name)
        .bind(serde_json::to_string(&credential.scopes).map_err(DbError::EncodingError)?)
        .bind(credential.connected_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get the credential for (owner, platform)
    pub async fn get_credential(
        &self,
        owner_id: &str,
        platform: PlatformId,
    ) -> Result<Option<PlatformCredential>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, tenant_id, platform, status, access_token, refresh_token,
                   expires_at, account_id, account_username, display_name, scopes,
                   connected_at, updated_at
            FROM credentials
            WHERE owner_id = ? AND platform = ?
            "#,
        )
        .bind(owner_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(map_credential_row).transpose()
    }

    /// All credentials stored for an owner
    pub async fn list_credentials(&self, owner_id: &str) -> Result<Vec<PlatformCredential>> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, tenant_id, platform, status, access_token, refresh_token,
                   expires_at, account_id, account_username, display_name, scopes,
                   connected_at, updated_at
            FROM credentials
            WHERE owner_id = ?
            ORDER BY platform
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_credential_row).collect()
    }

    /// Replace the token set after a refresh
    pub async fn update_credential_tokens(
        &self,
        owner_id: &str,
        platform: PlatformId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE credentials
            SET access_token = ?, refresh_token = ?, expires_at = ?, status = 'connected',
                updated_at = ?
            WHERE owner_id = ? AND platform = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(owner_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Update credential status only
    pub async fn set_credential_status(
        &self,
        owner_id: &str,
        platform: PlatformId,
        status: CredentialStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE credentials SET status = ?, updated_at = ? WHERE owner_id = ? AND platform = ?
            "#,
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(owner_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ---- work items ----

    /// Insert a work item, or re-arm the existing one for the same post.
    /// Rescheduling a post replaces its previous pending schedule.
    pub async fn upsert_work_item(&self, item: &ScheduledWorkItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_items (id, post_id, owner_id, due_at, status, attempts,
                                    last_error, completed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (post_id) DO UPDATE SET
                due_at = excluded.due_at,
                status = excluded.status,
                attempts = 0,
                last_error = NULL,
                completed_at = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.post_id)
        .bind(&item.owner_id)
        .bind(item.due_at)
        .bind(item.status.as_str())
        .bind(item.attempts as i64)
        .bind(&item.last_error)
        .bind(item.completed_at)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Pending items whose due time has passed, high-priority posts first
    pub async fn due_work_items(&self, now: i64, limit: u32) -> Result<Vec<ScheduledWorkItem>> {
        let rows = sqlx::query(
            r#"
            SELECT w.id, w.post_id, w.owner_id, w.due_at, w.status, w.attempts,
                   w.last_error, w.completed_at, w.created_at, w.updated_at
            FROM work_items w
            JOIN posts p ON p.id = w.post_id
            WHERE w.status = 'pending' AND w.due_at <= ?
            ORDER BY CASE p.priority WHEN 'high' THEN 0 ELSE 1 END, w.due_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_work_item_row).collect()
    }

    /// The work item tracking a post, if any
    pub async fn get_work_item_for_post(
        &self,
        post_id: &str,
    ) -> Result<Option<ScheduledWorkItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, post_id, owner_id, due_at, status, attempts, last_error,
                   completed_at, created_at, updated_at
            FROM work_items WHERE post_id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(map_work_item_row).transpose()
    }

    /// Claim an item for execution: pending -> processing, attempts + 1.
    /// Returns false if the item was no longer pending.
    pub async fn mark_work_item_processing(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'processing', attempts = attempts + 1, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Record an item's outcome. Terminal statuses also stamp completed_at.
    pub async fn set_work_item_status(
        &self,
        item_id: &str,
        status: WorkItemStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let completed_at = if status.is_terminal() { Some(now) } else { None };

        sqlx::query(
            r#"
            UPDATE work_items
            SET status = ?, last_error = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(completed_at)
        .bind(now)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Cancel the pending schedule for a post.
    /// Returns false when there was nothing pending to cancel.
    pub async fn cancel_work_item_for_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'cancelled', updated_at = ?
            WHERE post_id = ? AND status = 'pending'
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Items stranded in `processing`, e.g. after a crash mid-dispatch
    pub async fn stuck_processing_items(&self) -> Result<Vec<ScheduledWorkItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, owner_id, due_at, status, attempts, last_error,
                   completed_at, created_at, updated_at
            FROM work_items WHERE status = 'processing'
            ORDER BY due_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_work_item_row).collect()
    }
}

fn map_post_row(r: sqlx::sqlite::SqliteRow) -> Result<Post> {
    Ok(Post {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        content: r.get("content"),
        hashtags: serde_json::from_str(&r.get::<String, _>("hashtags"))
            .map_err(DbError::EncodingError)?,
        mentions: serde_json::from_str(&r.get::<String, _>("mentions"))
            .map_err(DbError::EncodingError)?,
        media: serde_json::from_str(&r.get::<String, _>("media"))
            .map_err(DbError::EncodingError)?,
        platforms: serde_json::from_str(&r.get::<String, _>("platforms"))
            .map_err(DbError::EncodingError)?,
        overrides: serde_json::from_str(&r.get::<String, _>("overrides"))
            .map_err(DbError::EncodingError)?,
        priority: parse_field(r.get::<String, _>("priority"), "priority")?,
        status: parse_field(r.get::<String, _>("status"), "status")?,
        scheduled_at: r.get("scheduled_at"),
        published_at: r.get("published_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn map_credential_row(r: sqlx::sqlite::SqliteRow) -> Result<PlatformCredential> {
    Ok(PlatformCredential {
        owner_id: r.get("owner_id"),
        tenant_id: r.get("tenant_id"),
        platform: parse_field(r.get::<String, _>("platform"), "platform")?,
        status: parse_field(r.get::<String, _>("status"), "status")?,
        access_token: r.get("access_token"),
        refresh_token: r.get("refresh_token"),
        expires_at: r.get("expires_at"),
        account_id: r.get("account_id"),
        account_username: r.get("account_username"),
        display_name: r.get("display_name"),
        scopes: serde_json::from_str(&r.get::<String, _>("scopes"))
            .map_err(DbError::EncodingError)?,
        connected_at: r.get("connected_at"),
        updated_at: r.get("updated_at"),
    })
}

fn map_work_item_row(r: sqlx::sqlite::SqliteRow) -> Result<ScheduledWorkItem> {
    Ok(ScheduledWorkItem {
        id: r.get("id"),
        post_id: r.get("post_id"),
        owner_id: r.get("owner_id"),
        due_at: r.get("due_at"),
        status: parse_field(r.get::<String, _>("status"), "status")?,
        attempts: r.get::<i64, _>("attempts") as u32,
        last_error: r.get("last_error"),
        completed_at: r.get("completed_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlatformOverride, PostStatus, Priority};

    fn test_post(owner: &str) -> Post {
        Post::new(
            owner.to_string(),
            "Test post content".to_string(),
            vec![PlatformId::Mastodon, PlatformId::Linkedin],
        )
    }

    fn test_credential(owner: &str, platform: PlatformId) -> PlatformCredential {
        let now = chrono::Utc::now().timestamp();
        PlatformCredential {
            owner_id: owner.to_string(),
            tenant_id: "tenant-1".to_string(),
            platform,
            status: CredentialStatus::Connected,
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(now + 3600),
            account_id: Some("acct-1".to_string()),
            account_username: Some("user".to_string()),
            display_name: Some("User".to_string()),
            scopes: vec!["write".to_string()],
            connected_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_retrieve_post() {
        let db = Database::in_memory().await.unwrap();

        let mut post = test_post("user-1");
        post.hashtags = vec!["rust".to_string()];
        post.overrides.insert(
            PlatformId::Linkedin,
            PlatformOverride {
                content: Some("Professional version".to_string()),
                ..Default::default()
            },
        );
        db.create_post(&post).await.unwrap();

        let retrieved = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(retrieved.id, post.id);
        assert_eq!(retrieved.owner_id, "user-1");
        assert_eq!(retrieved.content, post.content);
        assert_eq!(retrieved.hashtags, vec!["rust".to_string()]);
        assert_eq!(retrieved.platforms, post.platforms);
        assert_eq!(retrieved.status, PostStatus::Draft);
        assert_eq!(
            retrieved.overrides.get(&PlatformId::Linkedin).unwrap().content,
            Some("Professional version".to_string())
        );
    }

    #[tokio::test]
    async fn test_get_nonexistent_post_returns_none() {
        let db = Database::in_memory().await.unwrap();
        let result = db.get_post("no-such-post").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_update_post_rewrites_fields() {
        let db = Database::in_memory().await.unwrap();

        let mut post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        post.content = "Edited content".to_string();
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(1_900_000_000);
        db.update_post(&post).await.unwrap();

        let retrieved = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(retrieved.content, "Edited content");
        assert_eq!(retrieved.status, PostStatus::Scheduled);
        assert_eq!(retrieved.scheduled_at, Some(1_900_000_000));
    }

    #[tokio::test]
    async fn test_try_mark_posting_claims_once() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        assert!(db.try_mark_posting(&post.id).await.unwrap());
        // second claim loses: the post is already posting
        assert!(!db.try_mark_posting(&post.id).await.unwrap());

        let retrieved = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, PostStatus::Posting);
    }

    #[tokio::test]
    async fn test_try_mark_posting_rejects_non_publishable() {
        let db = Database::in_memory().await.unwrap();

        let mut post = test_post("user-1");
        post.status = PostStatus::Published;
        db.create_post(&post).await.unwrap();

        assert!(!db.try_mark_posting(&post.id).await.unwrap());
        assert!(!db.try_mark_posting("no-such-post").await.unwrap());

        let retrieved = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_reset_posting_only_moves_posting_posts() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        // not posting yet, nothing to reset
        assert!(!db.reset_posting(&post.id).await.unwrap());

        assert!(db.try_mark_posting(&post.id).await.unwrap());
        assert!(db.reset_posting(&post.id).await.unwrap());

        let retrieved = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn test_list_posts_scoped_to_owner() {
        let db = Database::in_memory().await.unwrap();

        db.create_post(&test_post("alice")).await.unwrap();
        db.create_post(&test_post("alice")).await.unwrap();
        db.create_post(&test_post("bob")).await.unwrap();

        let alice_posts = db.list_posts("alice", 10).await.unwrap();
        assert_eq!(alice_posts.len(), 2);
        assert!(alice_posts.iter().all(|p| p.owner_id == "alice"));
    }

    #[tokio::test]
    async fn test_publish_records_roundtrip() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        db.insert_publish_record(&PublishRecord::success(
            post.id.clone(),
            PlatformId::Mastodon,
            "109501".to_string(),
            Some("https://example.social/@user/109501".to_string()),
        ))
        .await
        .unwrap();
        db.insert_publish_record(&PublishRecord::failure(
            post.id.clone(),
            PlatformId::Linkedin,
            "network timeout".to_string(),
        ))
        .await
        .unwrap();

        let records = db.get_publish_records(&post.id).await.unwrap();
        assert_eq!(records.len(), 2);

        let mastodon = records
            .iter()
            .find(|r| r.platform == PlatformId::Mastodon)
            .unwrap();
        assert!(mastodon.success);
        assert_eq!(mastodon.platform_post_id, Some("109501".to_string()));

        let linkedin = records
            .iter()
            .find(|r| r.platform == PlatformId::Linkedin)
            .unwrap();
        assert!(!linkedin.success);
        assert_eq!(linkedin.error_message, Some("network timeout".to_string()));
    }

    #[tokio::test]
    async fn test_count_successful_publishes_since() {
        let db = Database::in_memory().await.unwrap();
        let now = chrono::Utc::now().timestamp();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let other = test_post("someone-else");
        db.create_post(&other).await.unwrap();

        // two recent successes, one old, one failure, one other-owner success
        for posted_at in [now - 10, now - 20] {
            let mut record = PublishRecord::success(
                post.id.clone(),
                PlatformId::Mastodon,
                "id".to_string(),
                None,
            );
            record.posted_at = Some(posted_at);
            db.insert_publish_record(&record).await.unwrap();
        }
        let mut old = PublishRecord::success(
            post.id.clone(),
            PlatformId::Mastodon,
            "id".to_string(),
            None,
        );
        old.posted_at = Some(now - 7200);
        db.insert_publish_record(&old).await.unwrap();
        db.insert_publish_record(&PublishRecord::failure(
            post.id.clone(),
            PlatformId::Mastodon,
            "boom".to_string(),
        ))
        .await
        .unwrap();
        let mut foreign = PublishRecord::success(
            other.id.clone(),
            PlatformId::Mastodon,
            "id".to_string(),
            None,
        );
        foreign.posted_at = Some(now - 5);
        db.insert_publish_record(&foreign).await.unwrap();

        let count = db
            .count_successful_publishes_since("user-1", PlatformId::Mastodon, now - 3600)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_credential_upsert_replaces_existing() {
        let db = Database::in_memory().await.unwrap();

        let mut credential = test_credential("user-1", PlatformId::Mastodon);
        db.upsert_credential(&credential).await.unwrap();

        credential.access_token = "access-2".to_string();
        credential.status = CredentialStatus::Connected;
        db.upsert_credential(&credential).await.unwrap();

        let stored = db
            .get_credential("user-1", PlatformId::Mastodon)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "access-2");

        // still exactly one row for the pair
        let all = db.list_credentials("user-1").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_update_credential_tokens_reconnects() {
        let db = Database::in_memory().await.unwrap();

        let mut credential = test_credential("user-1", PlatformId::Linkedin);
        credential.status = CredentialStatus::Expired;
        db.upsert_credential(&credential).await.unwrap();

        db.update_credential_tokens(
            "user-1",
            PlatformId::Linkedin,
            "fresh-access",
            Some("fresh-refresh"),
            Some(chrono::Utc::now().timestamp() + 3600),
        )
        .await
        .unwrap();

        let stored = db
            .get_credential("user-1", PlatformId::Linkedin)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "fresh-access");
        assert_eq!(stored.refresh_token, Some("fresh-refresh".to_string()));
        assert_eq!(stored.status, CredentialStatus::Connected);
    }

    #[tokio::test]
    async fn test_set_credential_status() {
        let db = Database::in_memory().await.unwrap();

        db.upsert_credential(&test_credential("user-1", PlatformId::Mastodon))
            .await
            .unwrap();
        db.set_credential_status("user-1", PlatformId::Mastodon, CredentialStatus::Disconnected)
            .await
            .unwrap();

        let stored = db
            .get_credential("user-1", PlatformId::Mastodon)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CredentialStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_work_item_upsert_rearms_existing() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        let item = ScheduledWorkItem::new(post.id.clone(), "user-1".to_string(), 1000);
        db.upsert_work_item(&item).await.unwrap();
        db.mark_work_item_processing(&item.id).await.unwrap();
        db.set_work_item_status(&item.id, WorkItemStatus::Failed, Some("boom"))
            .await
            .unwrap();

        // rescheduling the same post resets the item
        let rearmed = ScheduledWorkItem::new(post.id.clone(), "user-1".to_string(), 2000);
        db.upsert_work_item(&rearmed).await.unwrap();

        let stored = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Pending);
        assert_eq!(stored.due_at, 2000);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.last_error, None);
        assert_eq!(stored.completed_at, None);
        // the original row is reused, not replaced
        assert_eq!(stored.id, item.id);
    }

    #[tokio::test]
    async fn test_due_work_items_filters_and_orders() {
        let db = Database::in_memory().await.unwrap();

        let mut high = test_post("user-1");
        high.priority = Priority::High;
        let normal = test_post("user-1");
        let future = test_post("user-1");
        db.create_post(&high).await.unwrap();
        db.create_post(&normal).await.unwrap();
        db.create_post(&future).await.unwrap();

        db.upsert_work_item(&ScheduledWorkItem::new(
            normal.id.clone(),
            "user-1".to_string(),
            100,
        ))
        .await
        .unwrap();
        db.upsert_work_item(&ScheduledWorkItem::new(
            high.id.clone(),
            "user-1".to_string(),
            200,
        ))
        .await
        .unwrap();
        db.upsert_work_item(&ScheduledWorkItem::new(
            future.id.clone(),
            "user-1".to_string(),
            10_000,
        ))
        .await
        .unwrap();

        let due = db.due_work_items(500, 10).await.unwrap();
        assert_eq!(due.len(), 2);
        // high priority first despite the later due time
        assert_eq!(due[0].post_id, high.id);
        assert_eq!(due[1].post_id, normal.id);
    }

    #[tokio::test]
    async fn test_mark_work_item_processing_claims_once() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let item = ScheduledWorkItem::new(post.id.clone(), "user-1".to_string(), 100);
        db.upsert_work_item(&item).await.unwrap();

        assert!(db.mark_work_item_processing(&item.id).await.unwrap());
        // second claim fails: item is no longer pending
        assert!(!db.mark_work_item_processing(&item.id).await.unwrap());

        let stored = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Processing);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_work_item_only_when_pending() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let item = ScheduledWorkItem::new(post.id.clone(), "user-1".to_string(), 100);
        db.upsert_work_item(&item).await.unwrap();

        assert!(db.cancel_work_item_for_post(&post.id).await.unwrap());
        // already cancelled, nothing left to cancel
        assert!(!db.cancel_work_item_for_post(&post.id).await.unwrap());

        let stored = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_status_stamps_completed_at() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let item = ScheduledWorkItem::new(post.id.clone(), "user-1".to_string(), 100);
        db.upsert_work_item(&item).await.unwrap();
        db.mark_work_item_processing(&item.id).await.unwrap();
        db.set_work_item_status(&item.id, WorkItemStatus::Completed, None)
            .await
            .unwrap();

        let stored = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stuck_processing_items() {
        let db = Database::in_memory().await.unwrap();

        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let item = ScheduledWorkItem::new(post.id.clone(), "user-1".to_string(), 100);
        db.upsert_work_item(&item).await.unwrap();

        assert!(db.stuck_processing_items().await.unwrap().is_empty());

        db.mark_work_item_processing(&item.id).await.unwrap();

        let stuck = db.stuck_processing_items().await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].post_id, post.id);
    }
}
