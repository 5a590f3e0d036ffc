use crate::{FeedScope, Likes, Post, PostId};

/// A room on the event feed. Joining one scopes which broadcasts the client
/// receives; join and leave are idempotent.
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Scope {
    Post(PostId),
    Feed(FeedScope),
}

/// One server-pushed change. Each variant carries exactly what the matching
/// cache operation needs: point-updates ship the authoritative fields,
/// invalidations only name what went stale.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedEvent {
    LikeChanged { post_id: PostId, likes: Likes },
    CommentCreated { post_id: PostId },
    CommentDeleted { post_id: PostId },
    PostCreated { feed: FeedScope },
    PostUpdated { post: Post },
    PostDeleted { post_id: PostId },
}

/// Server-to-client frame. Events carry the room they were broadcast on, so
/// a client that has since left that room can discard them.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Event { room: Scope, event: FeedEvent },
}

/// Client-to-server control frame. Room membership is not assumed to survive
/// a reconnect, so `Join`s are re-sent on every successful connection.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ClientMessage {
    Ping,
    Join(Scope),
    Leave(Scope),
}
