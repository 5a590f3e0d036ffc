use crate::api::{self, CommentId, PostId, Time, UserId};

/// Session-local id handed to a comment between its optimistic insertion and
/// the server's answer. Monotonic, never reused within a session.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TempId(pub u64);

/// Identity of a comment in the local cache. Pending ids live in a separate
/// namespace from server-assigned ones, so confirming an optimistic create
/// can never mistake an unrelated comment for the placeholder.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommentKey {
    Committed(CommentId),
    Pending(TempId),
}

impl CommentKey {
    pub fn is_pending(&self) -> bool {
        matches!(self, CommentKey::Pending(_))
    }

    pub fn committed(&self) -> Option<CommentId> {
        match self {
            CommentKey::Committed(id) => Some(*id),
            CommentKey::Pending(_) => None,
        }
    }
}

/// A comment as the cache holds it: either a confirmed server record or an
/// optimistic placeholder awaiting its create response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Comment {
    pub key: CommentKey,
    pub post_id: PostId,
    pub author_id: UserId,
    pub date: Time,

    pub text: String,
    pub parent_id: Option<CommentId>,
}

impl From<api::Comment> for Comment {
    fn from(c: api::Comment) -> Comment {
        Comment {
            key: CommentKey::Committed(c.id),
            post_id: c.post_id,
            author_id: c.author_id,
            date: c.date,
            text: c.text,
            parent_id: c.parent_id,
        }
    }
}
