use uuid::Uuid;

use crate::{Time, UserId, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

/// Family invite code, doubling as the key of that family's feed.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct FamilyCode(pub String);

/// Which feed listing a post belongs to.
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedScope {
    Family(FamilyCode),
    Public,
}

/// Like count and whether the requesting user is among the likers.
///
/// Kept as a single struct on purpose: the two fields must always change
/// together, so no code path can ever write one without the other.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Likes {
    pub count: i64,
    pub liked_by_me: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub date: Time,

    pub caption: String,
    pub media: Vec<String>,
    pub scope: FeedScope,

    pub likes: Likes,
    pub comment_count: usize,
}
