//! Caller identity as seen by the query builders.
//!
//! The HTTP layer verifies session tokens and hands every component a
//! [`Viewer`]. Components only compare it against owner and relation
//! references; they never look at tokens themselves.

use libsql::{Connection, Value};

use crate::error::{ServiceError, ServiceResult};
use crate::ids::ObjectId;
use crate::models::{Video, find_video};
use crate::store::opt_id_value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewer(Option<ObjectId>);

impl Viewer {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn user(id: ObjectId) -> Self {
        Self(Some(id))
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_none()
    }

    /// The caller id, or `Unauthenticated` for anonymous callers.
    pub fn require(&self) -> ServiceResult<ObjectId> {
        self.0
            .ok_or_else(|| ServiceError::unauthenticated("unauthorized request"))
    }

    /// True when the caller is exactly `owner`. Anonymous callers own nothing.
    pub fn is(&self, owner: ObjectId) -> bool {
        self.0 == Some(owner)
    }

    /// Mutation guard: signed-in callers that are not `owner` get `Forbidden`.
    pub fn ensure_owner(&self, owner: ObjectId, what: &str) -> ServiceResult<ObjectId> {
        let caller = self.require()?;
        if caller != owner {
            return Err(ServiceError::forbidden(format!(
                "only the owner can modify this {what}"
            )));
        }
        Ok(caller)
    }

    /// Unpublished videos exist only for their owner.
    pub fn can_view(&self, video: &Video) -> bool {
        video.is_published || self.is(video.owner_id)
    }

    /// Bound into viewer-relative subqueries; NULL never matches a relation row.
    pub(crate) fn sql(&self) -> Value {
        opt_id_value(self.0)
    }
}

/// Loads a video through the publish gate. Missing and gated videos produce
/// the same `NotFound`.
pub(crate) async fn visible_video(
    conn: &Connection,
    id: ObjectId,
    viewer: &Viewer,
) -> ServiceResult<Video> {
    match find_video(conn, id).await? {
        Some(video) if viewer.can_view(&video) => Ok(video),
        _ => Err(ServiceError::not_found("video not found")),
    }
}

impl From<Option<ObjectId>> for Viewer {
    fn from(value: Option<ObjectId>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn video(owner: ObjectId, is_published: bool) -> Video {
        let now = Utc::now();
        Video {
            id: ObjectId::new(),
            owner_id: owner,
            video_file: "/media/v.mp4".into(),
            thumbnail: "/media/t.png".into(),
            title: "clip".into(),
            description: String::new(),
            tags: Vec::new(),
            duration: 12,
            views: 0,
            is_published,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unpublished_videos_are_visible_only_to_owner() {
        let owner = ObjectId::new();
        let draft = video(owner, false);
        assert!(Viewer::user(owner).can_view(&draft));
        assert!(!Viewer::user(ObjectId::new()).can_view(&draft));
        assert!(!Viewer::anonymous().can_view(&draft));
        assert!(Viewer::anonymous().can_view(&video(owner, true)));
    }

    #[test]
    fn ensure_owner_distinguishes_anonymous_from_strangers() {
        let owner = ObjectId::new();
        assert!(matches!(
            Viewer::anonymous().ensure_owner(owner, "post"),
            Err(ServiceError::Unauthenticated(_))
        ));
        assert!(matches!(
            Viewer::user(ObjectId::new()).ensure_owner(owner, "post"),
            Err(ServiceError::Forbidden(_))
        ));
        assert_eq!(Viewer::user(owner).ensure_owner(owner, "post").unwrap(), owner);
    }

    #[test]
    fn anonymous_viewer_binds_null() {
        assert!(matches!(Viewer::anonymous().sql(), Value::Null));
        let id = ObjectId::new();
        assert!(matches!(Viewer::user(id).sql(), Value::Text(text) if text == id.to_string()));
    }
}
