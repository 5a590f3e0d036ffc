use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod api;
pub use api::Api;

mod auth;
pub use auth::AuthToken;

mod comment;
pub use comment::{Comment, CommentId, EditComment, NewComment};

mod error;
pub use error::{ApiError, Error};

mod event;
pub use event::{ClientMessage, FeedEvent, FeedMessage, Scope};

mod post;
pub use post::{FamilyCode, FeedScope, Likes, Post, PostId};

mod user;
pub use user::{User, UserId};

pub const MAX_COMMENT_LEN: usize = 4096;

/// Validates user-provided text the same way the server does, so a mutation
/// that would be rejected can be refused before it is even sent.
pub fn validate_text(s: &str) -> Result<(), Error> {
    if s.trim().is_empty() {
        return Err(Error::EmptyText);
    }
    if s.len() > MAX_COMMENT_LEN {
        return Err(Error::TextTooLong(s.len()));
    }
    if s.contains('\0') {
        return Err(Error::Unknown(String::from("null byte in text")));
    }
    Ok(())
}
