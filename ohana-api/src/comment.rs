use uuid::Uuid;

use crate::{PostId, Time, UserId, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// A persisted comment, as the server returns it. The reply hierarchy is
/// encoded only through `parent_id`; the server guarantees that a non-null
/// parent existed on the same post at creation time, so parent chains are
/// acyclic.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub date: Time,

    pub text: String,
    pub parent_id: Option<CommentId>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub text: String,
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::validate_text(&self.text)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub comment_id: CommentId,
    pub text: String,
}

impl EditComment {
    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::validate_text(&self.text)
    }
}
