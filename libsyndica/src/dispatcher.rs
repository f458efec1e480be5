//! Time-triggered dispatch of scheduled posts
//!
//! The dispatcher keeps its own work-item table rather than scanning posts:
//! a work item is the durable intent to publish at a point in time, with its
//! own pending/processing/completed lifecycle. Claiming an item is a
//! conditional update on `pending`, so a tick never double-claims even if a
//! previous tick is still in flight. Delivery is at-least-once: a crash
//! between claim and completion leaves the item in `processing`, which is
//! reported at startup for an operator to look at, never retried silently.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::orchestrator::PostOrchestrator;
use crate::types::{Post, PostStatus, ScheduledWorkItem, WorkItemStatus};

/// Queue facade over the work-item table.
#[derive(Clone)]
pub struct WorkQueue {
    db: Database,
}

impl WorkQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueue the work item for a scheduled post.
    pub async fn schedule(&self, post: &Post) -> Result<()> {
        self.arm(post, "work item scheduled").await
    }

    /// Re-arm the work item for a post whose publish time changed. The
    /// existing item row is kept and reset to pending at the new due time.
    pub async fn reschedule(&self, post: &Post) -> Result<()> {
        self.arm(post, "work item rescheduled").await
    }

    async fn arm(&self, post: &Post, what: &str) -> Result<()> {
        let Some(due_at) = post.scheduled_at else {
            return Ok(());
        };
        let item = ScheduledWorkItem::new(post.id.clone(), post.owner_id.clone(), due_at);
        self.db.upsert_work_item(&item).await?;
        info!(post_id = %post.id, due_at, "{}", what);
        Ok(())
    }

    /// Cancel the pending work item for a post, if any.
    pub async fn cancel(&self, post_id: &str) -> Result<bool> {
        let cancelled = self.db.cancel_work_item_for_post(post_id).await?;
        if cancelled {
            info!(post_id, "work item cancelled");
        }
        Ok(cancelled)
    }

    pub async fn item_for_post(&self, post_id: &str) -> Result<Option<ScheduledWorkItem>> {
        self.db.get_work_item_for_post(post_id).await
    }
}

/// Outcome counts for one dispatcher pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    db: Database,
    orchestrator: Arc<PostOrchestrator>,
    batch_size: u32,
    max_concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        orchestrator: Arc<PostOrchestrator>,
        batch_size: u32,
        max_concurrency: usize,
    ) -> Self {
        Self {
            db,
            orchestrator,
            batch_size,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Report items stranded in `processing` from a previous run.
    /// They are left alone; re-dispatching could double-post.
    pub async fn report_stuck_items(&self) -> Result<usize> {
        let stuck = self.db.stuck_processing_items().await?;
        for item in &stuck {
            warn!(
                item_id = %item.id,
                post_id = %item.post_id,
                attempts = item.attempts,
                "work item stuck in processing, manual review needed"
            );
        }
        Ok(stuck.len())
    }

    /// One dispatcher pass: claim due items and publish their posts.
    pub async fn tick(&self) -> Result<TickSummary> {
        let now = chrono::Utc::now().timestamp();
        let due = self.db.due_work_items(now, self.batch_size).await?;
        if due.is_empty() {
            return Ok(TickSummary::default());
        }

        info!("Found {} due work item(s)", due.len());

        // Claim sequentially so a concurrent dispatcher never processes the
        // same item; losing a claim just means someone else has it.
        let mut claimed = Vec::new();
        for item in due {
            if self.db.mark_work_item_processing(&item.id).await? {
                claimed.push(item);
            }
        }

        let mut summary = TickSummary {
            claimed: claimed.len(),
            ..TickSummary::default()
        };

        let outcomes: Vec<(String, WorkItemStatus, Option<String>)> = stream::iter(claimed)
            .map(|item| async move { self.process_item(item).await })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (item_id, status, error) in outcomes {
            if status == WorkItemStatus::Completed {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }
            if let Err(e) = self
                .db
                .set_work_item_status(&item_id, status, error.as_deref())
                .await
            {
                error!(item_id = %item_id, "failed to record work item outcome: {}", e);
            }
        }

        Ok(summary)
    }

    /// Publish one claimed item's post. Returns the terminal status to
    /// record; never propagates the publish error itself, the item carries
    /// it instead.
    async fn process_item(
        &self,
        item: ScheduledWorkItem,
    ) -> (String, WorkItemStatus, Option<String>) {
        info!(item_id = %item.id, post_id = %item.post_id, "dispatching work item");

        // The post may have moved on since this item was armed
        match self.db.get_post(&item.post_id).await {
            Ok(Some(post)) => match post.status {
                PostStatus::Published => {
                    info!(post_id = %item.post_id, "post already published, completing item");
                    return (item.id, WorkItemStatus::Completed, None);
                }
                PostStatus::Deleted => {
                    info!(post_id = %item.post_id, "post deleted, cancelling item");
                    return (item.id, WorkItemStatus::Cancelled, None);
                }
                _ => {}
            },
            Ok(None) => {
                return (
                    item.id,
                    WorkItemStatus::Failed,
                    Some(format!("post not found: {}", item.post_id)),
                );
            }
            Err(e) => {
                return (item.id, WorkItemStatus::Failed, Some(e.to_string()));
            }
        }

        match self.orchestrator.publish(&item.owner_id, &item.post_id).await {
            Ok(outcome) if outcome.post.status == PostStatus::Published => {
                (item.id, WorkItemStatus::Completed, None)
            }
            Ok(outcome) => {
                let errors: Vec<String> = outcome
                    .records
                    .iter()
                    .filter(|r| !r.success)
                    .map(|r| {
                        format!(
                            "{}: {}",
                            r.platform,
                            r.error_message.as_deref().unwrap_or("unknown error")
                        )
                    })
                    .collect();
                warn!(post_id = %item.post_id, "publish failed: {}", errors.join("; "));
                (item.id, WorkItemStatus::Failed, Some(errors.join("; ")))
            }
            Err(e) => {
                warn!(post_id = %item.post_id, "publish error: {}", e);
                (item.id, WorkItemStatus::Failed, Some(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialManager;
    use crate::drivers::mock::MockDriver;
    use crate::drivers::DriverRegistry;
    use crate::error::PlatformError;
    use crate::orchestrator::CreatePostRequest;
    use crate::types::{CredentialStatus, PlatformCredential, PlatformId};

    async fn connect(db: &Database, owner: &str, platform: PlatformId) {
        let now = chrono::Utc::now().timestamp();
        let credential = PlatformCredential {
            owner_id: owner.to_string(),
            tenant_id: "default".to_string(),
            platform,
            status: CredentialStatus::Connected,
            access_token: format!("{}-token", platform),
            refresh_token: None,
            expires_at: None,
            account_id: Some("acct-1".to_string()),
            account_username: Some("tester".to_string()),
            display_name: None,
            scopes: vec!["write".to_string()],
            connected_at: now,
            updated_at: now,
        };
        db.upsert_credential(&credential).await.unwrap();
    }

    fn build(db: &Database, registry: DriverRegistry) -> (Arc<PostOrchestrator>, Dispatcher) {
        let drivers = Arc::new(registry);
        let credentials = Arc::new(CredentialManager::new(db.clone(), drivers.clone()));
        let orchestrator = Arc::new(PostOrchestrator::new(
            db.clone(),
            credentials,
            drivers,
        ));
        let dispatcher = Dispatcher::new(db.clone(), orchestrator.clone(), 20, 4);
        (orchestrator, dispatcher)
    }

    fn scheduled_request(platform: PlatformId, due_at: i64) -> CreatePostRequest {
        CreatePostRequest {
            content: "Scheduled hello".to_string(),
            platforms: vec![platform],
            scheduled_at: Some(due_at),
            ..CreatePostRequest::default()
        }
    }

    #[tokio::test]
    async fn test_reschedule_rearms_existing_item() {
        let db = Database::in_memory().await.unwrap();
        let queue = WorkQueue::new(db.clone());

        let now = chrono::Utc::now().timestamp();
        let mut post = Post::new(
            "alice".to_string(),
            "hello".to_string(),
            vec![PlatformId::Mastodon],
        );
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(now + 60);
        db.create_post(&post).await.unwrap();

        queue.schedule(&post).await.unwrap();
        let first = queue.item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(first.due_at, now + 60);

        post.scheduled_at = Some(now + 600);
        queue.reschedule(&post).await.unwrap();
        let second = queue.item_for_post(&post.id).await.unwrap().unwrap();

        // same row, new due time, back to pending
        assert_eq!(second.id, first.id);
        assert_eq!(second.due_at, now + 600);
        assert_eq!(second.status, WorkItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_tick_with_no_due_items() {
        let db = Database::in_memory().await.unwrap();
        let (_, dispatcher) = build(&db, DriverRegistry::new());

        let summary = dispatcher.tick().await.unwrap();
        assert_eq!(summary, TickSummary::default());
    }

    #[tokio::test]
    async fn test_tick_publishes_due_post() {
        let db = Database::in_memory().await.unwrap();
        connect(&db, "alice", PlatformId::Mastodon).await;

        let mut registry = DriverRegistry::new();
        registry.insert(Arc::new(MockDriver::success(PlatformId::Mastodon)));
        let (orchestrator, dispatcher) = build(&db, registry);

        let due_at = chrono::Utc::now().timestamp() + 1;
        let post = orchestrator
            .create_post("alice", scheduled_request(PlatformId::Mastodon, due_at))
            .await
            .unwrap();
        assert_eq!(post.status, PostStatus::Scheduled);

        // not due yet
        let summary = dispatcher.tick().await.unwrap();
        assert_eq!(summary.claimed, 0);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let summary = dispatcher.tick().await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);

        let post = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Published);

        let item = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Completed);
        assert!(item.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_tick_records_failure_on_item() {
        let db = Database::in_memory().await.unwrap();
        connect(&db, "alice", PlatformId::Mastodon).await;

        let mut registry = DriverRegistry::new();
        registry.insert(Arc::new(MockDriver::publish_failure(
            PlatformId::Mastodon,
            PlatformError::Publishing("instance rejected the status".to_string()),
        )));
        let (orchestrator, dispatcher) = build(&db, registry);

        let due_at = chrono::Utc::now().timestamp() + 1;
        let post = orchestrator
            .create_post("alice", scheduled_request(PlatformId::Mastodon, due_at))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let summary = dispatcher.tick().await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.failed, 1);

        let post = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Failed);

        let item = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Failed);
        assert!(item
            .last_error
            .as_deref()
            .unwrap()
            .contains("instance rejected"));
    }

    #[tokio::test]
    async fn test_cancelled_item_is_not_dispatched() {
        let db = Database::in_memory().await.unwrap();
        connect(&db, "alice", PlatformId::Mastodon).await;

        let driver = MockDriver::success(PlatformId::Mastodon);
        let counters = driver.config().clone();
        let mut registry = DriverRegistry::new();
        registry.insert(Arc::new(driver));
        let (orchestrator, dispatcher) = build(&db, registry);

        let due_at = chrono::Utc::now().timestamp() + 1;
        let post = orchestrator
            .create_post("alice", scheduled_request(PlatformId::Mastodon, due_at))
            .await
            .unwrap();
        orchestrator.delete_post("alice", &post.id).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let summary = dispatcher.tick().await.unwrap();
        assert_eq!(summary.claimed, 0);
        assert_eq!(counters.publish_calls(), 0);

        let item = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_already_published_post_completes_item_without_calls() {
        let db = Database::in_memory().await.unwrap();
        connect(&db, "alice", PlatformId::Mastodon).await;

        let driver = MockDriver::success(PlatformId::Mastodon);
        let counters = driver.config().clone();
        let mut registry = DriverRegistry::new();
        registry.insert(Arc::new(driver));
        let (orchestrator, dispatcher) = build(&db, registry);

        let due_at = chrono::Utc::now().timestamp() + 1;
        let post = orchestrator
            .create_post("alice", scheduled_request(PlatformId::Mastodon, due_at))
            .await
            .unwrap();

        // Published manually before the schedule fires
        orchestrator.publish("alice", &post.id).await.unwrap();
        assert_eq!(counters.publish_calls(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let summary = dispatcher.tick().await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);
        // the item completed without a second platform call
        assert_eq!(counters.publish_calls(), 1);
    }

    #[tokio::test]
    async fn test_report_stuck_items() {
        let db = Database::in_memory().await.unwrap();
        connect(&db, "alice", PlatformId::Mastodon).await;

        let mut registry = DriverRegistry::new();
        registry.insert(Arc::new(MockDriver::success(PlatformId::Mastodon)));
        let (orchestrator, dispatcher) = build(&db, registry);

        let due_at = chrono::Utc::now().timestamp() + 1;
        let post = orchestrator
            .create_post("alice", scheduled_request(PlatformId::Mastodon, due_at))
            .await
            .unwrap();

        let item = db.get_work_item_for_post(&post.id).await.unwrap().unwrap();
        assert!(db.mark_work_item_processing(&item.id).await.unwrap());

        let stuck = dispatcher.report_stuck_items().await.unwrap();
        assert_eq!(stuck, 1);
    }
}
