use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::api::{
    self, Api, ApiError, CommentId, EditComment, FeedScope, Likes, NewComment, PostId, UserId,
};
use crate::{removal_set, Comment, CommentKey, SharedCache, StaleKey, TempId};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("post {0:?} is not in the local cache")]
    UnknownPost(PostId),

    #[error("a like toggle for post {0:?} is already in flight")]
    LikeInFlight(PostId),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<api::Error> for ClientError {
    fn from(e: api::Error) -> ClientError {
        ClientError::Api(ApiError::Rejected(e))
    }
}

/// What is currently applied locally but not yet answered by the server.
/// In-memory only; lives exactly from optimistic apply to confirm/rollback.
#[derive(Debug, Default)]
struct PendingSet {
    /// Like pair as it was before the optimistic flip, per post.
    like_snapshots: HashMap<PostId, Likes>,
    /// Post each unconfirmed placeholder comment belongs to.
    creates: HashMap<TempId, PostId>,
}

/// Runs every locally-initiated write: apply to the cache first, fire the
/// request, then reconcile the cache with the authoritative answer or roll
/// the local change back. One instance per session.
pub struct Mutator<A> {
    api: A,
    cache: SharedCache,
    me: UserId,
    next_temp: AtomicU64,
    pending: Mutex<PendingSet>,
}

impl<A: Api> Mutator<A> {
    pub fn new(api: A, cache: SharedCache, me: UserId) -> Mutator<A> {
        Mutator {
            api,
            cache,
            me,
            next_temp: AtomicU64::new(1),
            pending: Mutex::new(PendingSet::default()),
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Flips the current user's like on `post_id`, reflecting it locally
    /// right away. The confirmed pair overwrites the local guess wholesale,
    /// since other users may have liked concurrently. A second toggle on the
    /// same post while one is in flight is refused so it cannot corrupt the
    /// rollback snapshot; toggles on different posts are independent.
    pub async fn toggle_like(&self, post_id: PostId) -> Result<Likes, ClientError> {
        let snapshot = {
            let mut pending = self.pending.lock().await;
            if pending.like_snapshots.contains_key(&post_id) {
                return Err(ClientError::LikeInFlight(post_id));
            }
            let mut cache = self.cache.write().await;
            let snapshot = match cache.post(&post_id) {
                Some(post) => post.likes,
                None => return Err(ClientError::UnknownPost(post_id)),
            };
            pending.like_snapshots.insert(post_id, snapshot);
            let delta = if snapshot.liked_by_me { -1 } else { 1 };
            cache.set_likes(
                &post_id,
                Likes {
                    count: snapshot.count + delta,
                    liked_by_me: !snapshot.liked_by_me,
                },
            );
            snapshot
        };

        let res = self.api.toggle_like(post_id).await;
        let outcome = match res {
            Ok(likes) => {
                self.cache.write().await.set_likes(&post_id, likes);
                Ok(likes)
            }
            Err(err) => {
                tracing::warn!(?post_id, ?err, "like toggle failed, rolling back");
                self.cache.write().await.set_likes(&post_id, snapshot);
                Err(err.into())
            }
        };
        self.pending.lock().await.like_snapshots.remove(&post_id);
        outcome
    }

    /// Creates a top-level comment, optimistically visible at the top of the
    /// post's comment list until the server answers.
    pub async fn create_comment(&self, post_id: PostId, text: &str) -> Result<CommentId, ClientError> {
        self.submit_comment(post_id, text, None).await
    }

    /// Same lifecycle as a create, with the parent attached.
    pub async fn reply(
        &self,
        post_id: PostId,
        parent_id: CommentId,
        text: &str,
    ) -> Result<CommentId, ClientError> {
        self.submit_comment(post_id, text, Some(parent_id)).await
    }

    async fn submit_comment(
        &self,
        post_id: PostId,
        text: &str,
        parent_id: Option<CommentId>,
    ) -> Result<CommentId, ClientError> {
        api::validate_text(text)?;
        let temp = TempId(self.next_temp.fetch_add(1, Ordering::Relaxed));
        let placeholder = Comment {
            key: CommentKey::Pending(temp),
            post_id,
            author_id: self.me,
            date: Utc::now(),
            text: text.to_string(),
            parent_id,
        };
        self.pending.lock().await.creates.insert(temp, post_id);
        self.cache.write().await.insert_comment(placeholder);

        let res = self
            .api
            .create_comment(NewComment {
                post_id,
                text: text.to_string(),
                parent_id,
            })
            .await;
        let confirmed = match res {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(?post_id, ?err, "comment creation failed, rolling back");
                self.cache
                    .write()
                    .await
                    .remove_comment(&post_id, &CommentKey::Pending(temp));
                self.pending.lock().await.creates.remove(&temp);
                return Err(err.into());
            }
        };
        let id = confirmed.id;
        // Replace the placeholder before dropping the pending entry, so a
        // refetch interleaved between the two still sees the comment.
        self.cache.write().await.confirm_comment(temp, confirmed);
        self.pending.lock().await.creates.remove(&temp);
        Ok(id)
    }

    /// Edits are not applied optimistically: the edit buffer is local UI
    /// state, and the server may normalize the text differently than the
    /// client typed it. On failure the list is left untouched.
    pub async fn edit_comment(
        &self,
        post_id: PostId,
        comment_id: CommentId,
        text: &str,
    ) -> Result<(), ClientError> {
        api::validate_text(text)?;
        let confirmed = self
            .api
            .edit_comment(EditComment {
                comment_id,
                text: text.to_string(),
            })
            .await?;
        self.cache
            .write()
            .await
            .replace_comment_text(&post_id, comment_id, confirmed.text);
        Ok(())
    }

    /// Deletes a comment and its whole reply subtree. The removal set is
    /// computed before the request but pruned only on success: wrongly
    /// deleting a subtree optimistically is much harder to undo visually
    /// than re-showing a failed create. Returns how many comments went away.
    pub async fn delete_comment(
        &self,
        post_id: PostId,
        comment_id: CommentId,
    ) -> Result<usize, ClientError> {
        let removal = {
            let cache = self.cache.read().await;
            removal_set(comment_id, cache.comments_for(&post_id))
        };
        self.api.delete_comment(comment_id).await?;
        Ok(self.cache.write().await.remove_comments(&post_id, &removal))
    }

    /// Refetches a post's comment list after an invalidation. The fresh list
    /// replaces committed comments wholesale but merges around placeholders
    /// whose create is still unanswered, so an invalidation racing an
    /// optimistic create can never erase the placeholder before its own
    /// request resolves.
    pub async fn refresh_comments(&self, post_id: PostId) -> Result<(), ClientError> {
        let fresh = self.api.fetch_comments(post_id).await?;
        let still_pending: HashSet<TempId> = self
            .pending
            .lock()
            .await
            .creates
            .iter()
            .filter(|(_, p)| **p == post_id)
            .map(|(t, _)| *t)
            .collect();
        self.cache
            .write()
            .await
            .merge_comments(post_id, fresh, &still_pending);
        Ok(())
    }

    pub async fn refresh_feed(&self, scope: &FeedScope) -> Result<(), ClientError> {
        let posts = self.api.fetch_feed(scope).await?;
        self.cache.write().await.set_feed(scope.clone(), posts);
        Ok(())
    }

    /// Resolves one staleness notification from the event feed.
    pub async fn refresh_stale(&self, key: &StaleKey) -> Result<(), ClientError> {
        match key {
            StaleKey::Comments(post_id) => self.refresh_comments(*post_id).await,
            StaleKey::Feed(scope) => self.refresh_feed(scope).await,
        }
    }
}
