//! Syndica - multi-platform social post syndication
//!
//! This library provides the post lifecycle engine behind the Syndica
//! tools: drafting and scheduling posts, OAuth credential management per
//! platform, capability-aware formatting, and time-triggered dispatch.

pub mod capabilities;
pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatcher;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use credentials::CredentialManager;
pub use db::Database;
pub use dispatcher::{Dispatcher, WorkQueue};
pub use error::{Result, SyndicaError};
pub use orchestrator::{CreatePostRequest, PostOrchestrator, PublishOutcome, UpdatePostRequest};
pub use types::{PlatformId, Post, PostStatus, PublishRecord};
