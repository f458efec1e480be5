//! Static per-platform capabilities and content rules
//!
//! This module is pure, in-memory logic: limits, validation, formatting,
//! and stateless rate-limit checks. It performs no I/O and is consulted
//! synchronously before any network work. Validation failures are returned
//! as error lists, never raised, so callers can aggregate across platforms.

use crate::types::{PlatformId, PostContent};

/// Constant limits and formatting preferences for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// Maximum post body length in characters.
    pub max_text_chars: usize,
    /// Maximum size of a single media attachment in bytes.
    pub max_media_bytes: u64,
    /// Maximum number of media attachments per post.
    pub max_media_items: usize,
    /// Accepted media MIME types.
    pub accepted_media_types: &'static [&'static str],
    /// Hourly post-rate ceiling.
    pub posts_per_hour: u32,
    /// Daily post-rate ceiling.
    pub posts_per_day: u32,
    /// Whether line breaks should be doubled for readability.
    pub double_space_line_breaks: bool,
}

const MASTODON_CAPABILITIES: PlatformCapabilities = PlatformCapabilities {
    max_text_chars: 500,
    max_media_bytes: 16 * 1024 * 1024,
    max_media_items: 4,
    accepted_media_types: &["image/jpeg", "image/png", "image/gif", "image/webp", "video/mp4"],
    posts_per_hour: 100,
    posts_per_day: 1000,
    double_space_line_breaks: false,
};

const LINKEDIN_CAPABILITIES: PlatformCapabilities = PlatformCapabilities {
    max_text_chars: 3000,
    max_media_bytes: 200 * 1024 * 1024,
    max_media_items: 9,
    accepted_media_types: &["image/jpeg", "image/png", "image/gif", "video/mp4"],
    posts_per_hour: 30,
    posts_per_day: 100,
    double_space_line_breaks: true,
};

/// Look up the capability record for a platform.
pub fn capabilities(platform: PlatformId) -> &'static PlatformCapabilities {
    match platform {
        PlatformId::Mastodon => &MASTODON_CAPABILITIES,
        PlatformId::Linkedin => &LINKEDIN_CAPABILITIES,
    }
}

/// Outcome of validating content against one platform's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

/// Validate content against a platform's limits.
///
/// All problems are collected into the report; nothing is raised, so the
/// orchestrator can aggregate reports across every target platform before
/// rejecting a create/update call.
pub fn validate(platform: PlatformId, content: &PostContent) -> ValidationReport {
    let caps = capabilities(platform);
    let mut report = ValidationReport::ok();
    let push = |error: String, report: &mut ValidationReport| {
        report.valid = false;
        report.errors.push(error);
    };

    if content.body.trim().is_empty() {
        push(
            format!("{}: content must not be empty", platform),
            &mut report,
        );
    }

    let chars = content.body.chars().count();
    if chars > caps.max_text_chars {
        push(
            format!(
                "{}: content exceeds maximum length of {} characters ({} provided)",
                platform, caps.max_text_chars, chars
            ),
            &mut report,
        );
    }

    if content.media.len() > caps.max_media_items {
        push(
            format!(
                "{}: too many media attachments ({} provided, maximum {})",
                platform,
                content.media.len(),
                caps.max_media_items
            ),
            &mut report,
        );
    }

    for media in &content.media {
        if media.size_bytes > caps.max_media_bytes {
            push(
                format!(
                    "{}: media {} exceeds maximum size of {} bytes",
                    platform, media.url, caps.max_media_bytes
                ),
                &mut report,
            );
        }
        if !accepts_media_type(platform, &media.mime_type) {
            push(
                format!(
                    "{}: media type {} is not supported",
                    platform, media.mime_type
                ),
                &mut report,
            );
        }
    }

    report
}

/// Whether a platform accepts the given media MIME type.
pub fn accepts_media_type(platform: PlatformId, mime_type: &str) -> bool {
    let mime = mime_type.to_lowercase();
    capabilities(platform)
        .accepted_media_types
        .iter()
        .any(|accepted| *accepted == mime)
}

/// Format content for a platform: hashtags and mentions appended per
/// convention, line breaks doubled where the platform rewards it, and a
/// truncate-with-ellipsis pass as a last resort.
pub fn format(platform: PlatformId, content: &PostContent) -> String {
    render(capabilities(platform), content)
}

/// Formatting against an explicit capability record. `format` delegates
/// here; tests use it to exercise limits no shipped platform carries.
pub fn render(caps: &PlatformCapabilities, content: &PostContent) -> String {
    let mut body = content.body.trim().to_string();

    if caps.double_space_line_breaks {
        let paragraphs: Vec<&str> = body
            .split('\n')
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .collect();
        body = paragraphs.join("\n\n");
    }

    let mentions: Vec<String> = content
        .mentions
        .iter()
        .map(|m| format!("@{}", m.trim_start_matches('@')))
        .collect();
    if !mentions.is_empty() {
        body.push_str("\n\n");
        body.push_str(&mentions.join(" "));
    }

    let hashtags: Vec<String> = content
        .hashtags
        .iter()
        .map(|h| format!("#{}", h.trim_start_matches('#')))
        .collect();
    if !hashtags.is_empty() {
        body.push_str("\n\n");
        body.push_str(&hashtags.join(" "));
    }

    truncate_with_ellipsis(&body, caps.max_text_chars)
}

/// Truncate to `max_chars` characters, ending in an ellipsis, when the
/// input is over the limit. Char-based, so multi-byte content is safe.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}\u{2026}", kept.trim_end())
}

/// Outcome of a stateless rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Check caller-supplied posting counters against the platform's ceilings.
///
/// Counting recent posts is the caller's responsibility; this is a pure
/// function of the provided numbers.
pub fn check_rate_limit(
    platform: PlatformId,
    posts_last_hour: u32,
    posts_last_day: u32,
) -> RateLimitDecision {
    let caps = capabilities(platform);

    if posts_last_hour >= caps.posts_per_hour {
        return RateLimitDecision {
            allowed: false,
            reason: Some(format!(
                "{}: hourly limit of {} posts reached",
                platform, caps.posts_per_hour
            )),
        };
    }

    if posts_last_day >= caps.posts_per_day {
        return RateLimitDecision {
            allowed: false,
            reason: Some(format!(
                "{}: daily limit of {} posts reached",
                platform, caps.posts_per_day
            )),
        };
    }

    RateLimitDecision {
        allowed: true,
        reason: None,
    }
}
