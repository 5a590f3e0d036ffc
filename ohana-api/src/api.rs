use async_trait::async_trait;

use crate::{
    ApiError, Comment, CommentId, EditComment, FeedScope, Likes, NewComment, Post, PostId,
};

/// The REST collaborators the sync engine talks to. Every mutating call
/// returns the authoritative entity so the optimistic local guess can be
/// reconciled against true server state.
#[async_trait]
pub trait Api: Send + Sync {
    async fn fetch_feed(&self, scope: &FeedScope) -> Result<Vec<Post>, ApiError>;

    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, ApiError>;

    async fn create_comment(&self, c: NewComment) -> Result<Comment, ApiError>;

    async fn edit_comment(&self, e: EditComment) -> Result<Comment, ApiError>;

    /// Deletes a comment and, server-side, its whole reply subtree.
    async fn delete_comment(&self, comment: CommentId) -> Result<(), ApiError>;

    /// Flips the calling user's like on `post` and returns the resulting
    /// authoritative pair, which may reflect other users' concurrent likes.
    async fn toggle_like(&self, post: PostId) -> Result<Likes, ApiError>;
}
