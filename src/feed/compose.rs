use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::Viewer;
use crate::error::FeedError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::store::Store;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_BODY_CHARS: usize = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDraft {
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrayerDraft {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// Trims `value` and checks it is non-empty and at most `max` characters.
pub fn validate_text(field: &str, value: &str, max: usize) -> Result<String, FeedError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FeedError::Validation(format!("{field} cannot be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(FeedError::Validation(format!("{field} must be at most {max} characters")));
    }
    Ok(trimmed.to_string())
}

pub async fn submit_thread(
    store: &dyn Store,
    limiter: Option<&RateLimiterFacade>,
    viewer: Option<&Viewer>,
    draft: ThreadDraft,
) -> Result<Thread, FeedError> {
    let viewer = viewer.ok_or(FeedError::AuthRequired)?;
    if draft.category == Category::Prayers {
        return Err(FeedError::Validation("Share prayer needs as a prayer request".into()));
    }
    let title = validate_text("Title", &draft.title, MAX_TITLE_CHARS)?;
    let content = validate_text("Message", &draft.content, MAX_BODY_CHARS)?;
    if limiter.is_some_and(|rl| !rl.allow_thread(viewer.id)) {
        return Err(FeedError::RateLimited(String::new()));
    }
    let thread = store
        .create_thread(NewThread {
            user_id: viewer.id,
            title,
            content,
            category: draft.category,
            is_anonymous: draft.is_anonymous,
        })
        .await?;
    info!(thread_id = %thread.id, category = %thread.category, "thread created");
    Ok(thread)
}

pub async fn submit_prayer(
    store: &dyn Store,
    limiter: Option<&RateLimiterFacade>,
    viewer: Option<&Viewer>,
    draft: PrayerDraft,
) -> Result<Prayer, FeedError> {
    let viewer = viewer.ok_or(FeedError::AuthRequired)?;
    let title = validate_text("Title", &draft.title, MAX_TITLE_CHARS)?;
    let content = validate_text("Prayer request", &draft.content, MAX_BODY_CHARS)?;
    if limiter.is_some_and(|rl| !rl.allow_prayer(viewer.id)) {
        return Err(FeedError::RateLimited(String::new()));
    }
    let prayer = store
        .create_prayer(NewPrayer {
            user_id: viewer.id,
            title,
            content,
            is_urgent: draft.is_urgent,
            is_anonymous: draft.is_anonymous,
        })
        .await?;
    info!(prayer_id = %prayer.id, urgent = prayer.is_urgent, "prayer request created");
    Ok(prayer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(validate_text("Title", "  Peace  ", 10).unwrap(), "Peace");
        assert!(matches!(validate_text("Title", "   ", 10), Err(FeedError::Validation(_))));
        assert!(matches!(validate_text("Title", &"x".repeat(11), 10), Err(FeedError::Validation(_))));
    }
}
