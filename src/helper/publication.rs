//! Publication lifecycle for news articles and gallery items.
//!
//! The functions here compute the persisted publication fields for a
//! transition; they never touch the store.

use crate::helper::permissions::{self, Action};
use crate::models::{ContentStatus, Role};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub status: ContentStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("You do not have permission to change the status of this content.")]
    Forbidden,
    #[error("'{0}' is not a valid status. Use 'draft' or 'published'.")]
    InvalidStatus(String),
}

/// Unrecognized or missing requests fall back to `draft`.
pub fn resolve_initial_status(requested: Option<&str>) -> ContentStatus {
    requested.and_then(ContentStatus::parse).unwrap_or(ContentStatus::Draft)
}

impl Publication {
    pub fn on_create(requested: Option<&str>, now: DateTime<Utc>) -> Publication {
        let status = resolve_initial_status(requested);
        Publication {
            status,
            published_at: (status == ContentStatus::Published).then_some(now),
            reviewed_by: None,
            reviewed_at: None,
            rejected_reason: None,
        }
    }

    /// Computes the fields after `actor` asks for `requested`.
    ///
    /// Entering `published` stamps `published_at` (unless one is supplied)
    /// and the review fields. Re-publishing an already published entity keeps
    /// its existing review fields.
    pub fn change_status(
        &self,
        actor_role: Option<Role>,
        actor_id: i64,
        author_id: Option<i64>,
        requested: &str,
        explicit_published_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Publication, TransitionError> {
        let target = ContentStatus::parse(requested);
        if !permissions::can_change_status(actor_role, self.status, target, actor_id, author_id) {
            return Err(match target {
                None if permissions::is_permitted(actor_role, Action::ChangeStatus) => {
                    TransitionError::InvalidStatus(requested.trim().to_string())
                }
                _ => TransitionError::Forbidden,
            });
        }
        // Guarded above: `can_change_status` is false for `None`.
        let target = target.unwrap_or(self.status);

        let mut next = self.clone();
        next.status = target;
        next.rejected_reason = None;

        if target == ContentStatus::Published {
            if self.status != ContentStatus::Published {
                next.published_at = Some(explicit_published_at.unwrap_or(now));
                next.reviewed_by = Some(actor_id);
                next.reviewed_at = Some(now);
            } else {
                if explicit_published_at.is_some() {
                    next.published_at = explicit_published_at;
                }
                if next.published_at.is_none() {
                    next.published_at = Some(now);
                }
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft() -> Publication {
        Publication::on_create(Some("draft"), Utc::now())
    }

    #[test]
    fn unknown_initial_status_falls_back_to_draft() {
        assert_eq!(resolve_initial_status(Some("archived")), ContentStatus::Draft);
        assert_eq!(resolve_initial_status(Some("rejected")), ContentStatus::Draft);
        assert_eq!(resolve_initial_status(None), ContentStatus::Draft);
        assert_eq!(resolve_initial_status(Some("published")), ContentStatus::Published);
    }

    #[test]
    fn create_published_stamps_published_at() {
        let now = Utc::now();
        let p = Publication::on_create(Some("published"), now);
        assert_eq!(p.status, ContentStatus::Published);
        assert_eq!(p.published_at, Some(now));

        let d = Publication::on_create(Some("draft"), now);
        assert!(d.published_at.is_none());
    }

    #[test]
    fn publishing_stamps_review_fields_and_timestamp() {
        let before = Utc::now();
        let next = draft()
            .change_status(Some(Role::Admin), 3, None, "published", None, Utc::now())
            .unwrap();
        assert_eq!(next.status, ContentStatus::Published);
        assert_eq!(next.reviewed_by, Some(3));
        let published_at = next.published_at.unwrap();
        assert!(published_at >= before && published_at <= Utc::now());
        assert!(next.reviewed_at.is_some());
    }

    #[test]
    fn explicit_published_at_is_kept() {
        let when = Utc::now() - Duration::days(2);
        let next = draft()
            .change_status(Some(Role::SuperAdmin), 1, None, "published", Some(when), Utc::now())
            .unwrap();
        assert_eq!(next.published_at, Some(when));
    }

    #[test]
    fn republishing_keeps_audit_fields() {
        let first = draft()
            .change_status(Some(Role::Admin), 3, None, "published", None, Utc::now())
            .unwrap();
        let again = first
            .change_status(Some(Role::SuperAdmin), 4, None, "published", None, Utc::now())
            .unwrap();
        assert_eq!(again.reviewed_by, Some(3));
        assert_eq!(again.reviewed_at, first.reviewed_at);
        assert_eq!(again.published_at, first.published_at);
    }

    #[test]
    fn unpublishing_is_allowed_and_clears_rejection_note() {
        let mut published = draft()
            .change_status(Some(Role::Admin), 3, None, "published", None, Utc::now())
            .unwrap();
        published.rejected_reason = Some("legacy note".to_string());
        let back = published
            .change_status(Some(Role::Admin), 3, None, "draft", None, Utc::now())
            .unwrap();
        assert_eq!(back.status, ContentStatus::Draft);
        assert!(back.rejected_reason.is_none());
    }

    #[test]
    fn unknown_role_is_forbidden() {
        let err = draft()
            .change_status(Role::parse("viewer"), 3, None, "published", None, Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::Forbidden);
    }

    #[test]
    fn unrecognized_target_is_invalid_for_known_roles() {
        let err = draft()
            .change_status(Some(Role::Admin), 3, None, "rejected", None, Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::InvalidStatus("rejected".to_string()));
    }
}
