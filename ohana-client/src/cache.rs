use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::api::{self, FeedEvent, FeedScope, Post, PostId};
use crate::{Comment, CommentKey, TempId};

/// Something an invalidation event marked as needing a refetch. Invalidations
/// never mutate content themselves; the next fetch wins on true server state.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum StaleKey {
    Comments(PostId),
    Feed(FeedScope),
}

/// The one addressable store of posts and comment lists for a session.
/// Everything else (mutator, event feed) holds a handle to this and never
/// keeps a second copy of entity state.
///
/// Cheap to clone: the UI layer snapshots it per render, and `Arc::make_mut`
/// keeps mutation copy-on-write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeedCache {
    pub posts: Arc<HashMap<PostId, Post>>,
    pub comments: Arc<HashMap<PostId, Vec<Comment>>>,
    pub feeds: Arc<HashMap<FeedScope, Vec<PostId>>>,
    stale_comments: HashSet<PostId>,
    stale_feeds: HashSet<FeedScope>,
}

impl FeedCache {
    pub fn new() -> FeedCache {
        FeedCache {
            posts: Arc::new(HashMap::new()),
            comments: Arc::new(HashMap::new()),
            feeds: Arc::new(HashMap::new()),
            stale_comments: HashSet::new(),
            stale_feeds: HashSet::new(),
        }
    }

    pub fn post(&self, id: &PostId) -> Option<&Post> {
        self.posts.get(id)
    }

    pub fn comments_for(&self, id: &PostId) -> &[Comment] {
        self.comments.get(id).map(|v| &v[..]).unwrap_or(&[])
    }

    /// Posts of one feed listing, in listing order.
    pub fn feed(&self, scope: &FeedScope) -> Vec<Post> {
        self.feeds
            .get(scope)
            .into_iter()
            .flatten()
            .filter_map(|id| self.posts.get(id).cloned())
            .collect()
    }

    pub fn comments_stale(&self, id: &PostId) -> bool {
        self.stale_comments.contains(id)
    }

    pub fn feed_stale(&self, scope: &FeedScope) -> bool {
        self.stale_feeds.contains(scope)
    }

    /// Replaces a feed listing with a fresh server fetch.
    pub fn set_feed(&mut self, scope: FeedScope, posts: Vec<Post>) {
        let ids = posts.iter().map(|p| p.id).collect();
        Arc::make_mut(&mut self.posts).extend(posts.into_iter().map(|p| (p.id, p)));
        Arc::make_mut(&mut self.feeds).insert(scope.clone(), ids);
        self.stale_feeds.remove(&scope);
    }

    /// Replaces a post's comment list with a fresh server fetch, keeping
    /// local placeholders whose create is still in flight: a refetch must
    /// never erase an optimistic comment before its own request resolves.
    pub fn merge_comments(
        &mut self,
        post_id: PostId,
        fresh: Vec<api::Comment>,
        still_pending: &HashSet<TempId>,
    ) {
        let comments = Arc::make_mut(&mut self.comments);
        let old = comments.remove(&post_id).unwrap_or_default();
        let committed_count = fresh.len();
        let (pending_roots, pending_replies): (Vec<_>, Vec<_>) = old
            .into_iter()
            .filter(|c| matches!(c.key, CommentKey::Pending(t) if still_pending.contains(&t)))
            .partition(|c| c.parent_id.is_none());
        // top-level is newest-first, so unconfirmed roots stay at the front
        let mut merged = pending_roots;
        merged.extend(fresh.into_iter().map(Comment::from));
        merged.extend(pending_replies);
        comments.insert(post_id, merged);
        if let Some(post) = Arc::make_mut(&mut self.posts).get_mut(&post_id) {
            post.comment_count = committed_count;
        }
        self.stale_comments.remove(&post_id);
    }

    /// Writes the like pair of an already-cached post; flag and count always
    /// move together.
    pub fn set_likes(&mut self, post_id: &PostId, likes: api::Likes) {
        if let Some(post) = Arc::make_mut(&mut self.posts).get_mut(post_id) {
            post.likes = likes;
        }
    }

    /// Optimistic insertion: top-level comments go to the front (newest
    /// first), replies to the back (oldest first among siblings).
    pub fn insert_comment(&mut self, comment: Comment) {
        let post_id = comment.post_id;
        let list = Arc::make_mut(&mut self.comments)
            .entry(post_id)
            .or_insert_with(Vec::new);
        match comment.parent_id {
            None => list.insert(0, comment),
            Some(_) => list.push(comment),
        }
        if let Some(post) = Arc::make_mut(&mut self.posts).get_mut(&post_id) {
            post.comment_count += 1;
        }
    }

    /// Swaps an optimistic placeholder for the authoritative server comment,
    /// in place. If a refetch already brought the confirmed row in, the
    /// placeholder is simply dropped instead of duplicating it.
    pub fn confirm_comment(&mut self, temp: TempId, confirmed: api::Comment) {
        let comments = Arc::make_mut(&mut self.comments);
        let list = match comments.get_mut(&confirmed.post_id) {
            Some(list) => list,
            None => return,
        };
        let already_fetched = list
            .iter()
            .any(|c| c.key == CommentKey::Committed(confirmed.id));
        if let Some(i) = list
            .iter()
            .position(|c| c.key == CommentKey::Pending(temp))
        {
            if already_fetched {
                list.remove(i);
            } else {
                list[i] = Comment::from(confirmed);
            }
        }
    }

    /// Rollback of a failed optimistic insertion.
    pub fn remove_comment(&mut self, post_id: &PostId, key: &CommentKey) -> bool {
        let comments = Arc::make_mut(&mut self.comments);
        let Some(list) = comments.get_mut(post_id) else {
            return false;
        };
        let Some(i) = list.iter().position(|c| c.key == *key) else {
            return false;
        };
        list.remove(i);
        if let Some(post) = Arc::make_mut(&mut self.posts).get_mut(post_id) {
            post.comment_count = post.comment_count.saturating_sub(1);
        }
        true
    }

    pub fn replace_comment_text(&mut self, post_id: &PostId, id: api::CommentId, text: String) {
        let comments = Arc::make_mut(&mut self.comments);
        if let Some(c) = comments
            .get_mut(post_id)
            .and_then(|list| list.iter_mut().find(|c| c.key == CommentKey::Committed(id)))
        {
            c.text = text;
        }
    }

    /// Prunes a whole removal set in one update; returns how many comments
    /// actually went away.
    pub fn remove_comments(&mut self, post_id: &PostId, removal: &HashSet<CommentKey>) -> usize {
        let comments = Arc::make_mut(&mut self.comments);
        let Some(list) = comments.get_mut(post_id) else {
            return 0;
        };
        let before = list.len();
        list.retain(|c| !removal.contains(&c.key));
        let removed = before - list.len();
        if let Some(post) = Arc::make_mut(&mut self.posts).get_mut(post_id) {
            post.comment_count = post.comment_count.saturating_sub(removed);
        }
        removed
    }

    /// Applies one inbound feed event, returning what became stale so the
    /// caller can schedule refetches. Point-updates only ever touch entries
    /// that already exist; an event for an id this client never fetched is
    /// dropped rather than resurrecting the entity half-populated.
    pub fn apply_event(&mut self, event: &FeedEvent) -> Vec<StaleKey> {
        match event {
            FeedEvent::LikeChanged { post_id, likes } => {
                match Arc::make_mut(&mut self.posts).get_mut(post_id) {
                    Some(post) => post.likes = *likes,
                    None => tracing::warn!(?post_id, "like-changed for post not in cache, dropping"),
                }
                Vec::new()
            }
            FeedEvent::CommentCreated { post_id } | FeedEvent::CommentDeleted { post_id } => {
                self.stale_comments.insert(*post_id);
                vec![StaleKey::Comments(*post_id)]
            }
            FeedEvent::PostCreated { feed } => {
                self.stale_feeds.insert(feed.clone());
                vec![StaleKey::Feed(feed.clone())]
            }
            FeedEvent::PostUpdated { post } => {
                match Arc::make_mut(&mut self.posts).get_mut(&post.id) {
                    Some(cached) => *cached = post.clone(),
                    None => tracing::warn!(post_id = ?post.id, "post-updated for post not in cache, dropping"),
                }
                Vec::new()
            }
            FeedEvent::PostDeleted { post_id } => {
                if Arc::make_mut(&mut self.posts).remove(post_id).is_some() {
                    Arc::make_mut(&mut self.comments).remove(post_id);
                }
                let mut stale = Vec::new();
                let feeds = Arc::make_mut(&mut self.feeds);
                for (scope, listing) in feeds.iter_mut() {
                    if listing.iter().any(|p| p == post_id) {
                        listing.retain(|p| p != post_id);
                        self.stale_feeds.insert(scope.clone());
                        stale.push(StaleKey::Feed(scope.clone()));
                    }
                }
                stale
            }
        }
    }
}

impl Default for FeedCache {
    fn default() -> FeedCache {
        FeedCache::new()
    }
}

/// Shared handle to the cache: the mutator and the event feed both write
/// through this, each field having exactly one terminal writer per event.
#[derive(Clone, Debug)]
pub struct SharedCache(Arc<RwLock<FeedCache>>);

impl SharedCache {
    pub fn new() -> SharedCache {
        SharedCache(Arc::new(RwLock::new(FeedCache::new())))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, FeedCache> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, FeedCache> {
        self.0.write().await
    }

    /// Clone of the current state, for rendering or comparing in tests.
    pub async fn snapshot(&self) -> FeedCache {
        self.0.read().await.clone()
    }
}

impl Default for SharedCache {
    fn default() -> SharedCache {
        SharedCache::new()
    }
}
