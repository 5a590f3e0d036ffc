use std::{
    collections::{BTreeMap, HashMap, HashSet},
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use futures::{channel::mpsc, Sink, StreamExt};
use tokio::sync::Semaphore;
use uuid::Uuid;

use ohana_client::api::{
    Api, ApiError, AuthToken, ClientMessage, Comment, CommentId, EditComment, Error, FeedEvent,
    FeedMessage, FeedScope, Likes, NewComment, Post, PostId, Scope, User, UserId,
};
use ohana_client::{Connector, FeedRx, FeedTx};

mod tests;

/// In-memory stand-in for the real backend: serves the REST surface and
/// relays feed events to connected endpoints, with knobs for injecting
/// failures and stalls that would be hard to reproduce against a live
/// server.
#[derive(Clone)]
pub struct MockServer {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    users: HashMap<UserId, User>,
    sessions: HashMap<AuthToken, UserId>,
    posts: BTreeMap<PostId, Post>,
    comments: HashMap<PostId, Vec<Comment>>,
    likers: HashMap<PostId, HashSet<UserId>>,
    feeds: Vec<FeedEndpoint>,

    reject_next: Option<Error>,
    refuse_connects: usize,
    mutation_gate: Option<Arc<Semaphore>>,
}

struct FeedEndpoint {
    id: Uuid,
    user: UserId,
    rooms: HashSet<Scope>,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            inner: Arc::new(Mutex::new(Inner {
                users: HashMap::new(),
                sessions: HashMap::new(),
                posts: BTreeMap::new(),
                comments: HashMap::new(),
                likers: HashMap::new(),
                feeds: Vec::new(),
                reject_next: None,
                refuse_connects: 0,
                mutation_gate: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock server lock poisoned")
    }

    pub fn add_user(&self, name: &str) -> UserId {
        let id = UserId(Uuid::new_v4());
        self.lock().users.insert(
            id,
            User {
                id,
                name: name.to_string(),
            },
        );
        id
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.lock().users.get(&id).cloned()
    }

    pub fn login(&self, user: UserId) -> AuthToken {
        let token = AuthToken(Uuid::new_v4());
        self.lock().sessions.insert(token, user);
        token
    }

    pub fn add_post(&self, author: UserId, scope: FeedScope, caption: &str) -> PostId {
        let id = PostId(Uuid::new_v4());
        let post = Post {
            id,
            author_id: author,
            date: Utc::now(),
            caption: caption.to_string(),
            media: Vec::new(),
            scope: scope.clone(),
            likes: Likes {
                count: 0,
                liked_by_me: false,
            },
            comment_count: 0,
        };
        let mut inner = self.lock();
        inner.posts.insert(id, post);
        inner.comments.insert(id, Vec::new());
        broadcast(&mut inner, Scope::Feed(scope.clone()), |_| FeedEvent::PostCreated {
            feed: scope.clone(),
        });
        id
    }

    /// Server-side fixture insertion, bypassing the REST surface.
    pub fn add_comment(
        &self,
        post_id: PostId,
        author: UserId,
        parent_id: Option<CommentId>,
        text: &str,
    ) -> CommentId {
        let id = CommentId(Uuid::new_v4());
        let comment = Comment {
            id,
            post_id,
            author_id: author,
            date: Utc::now(),
            text: text.to_string(),
            parent_id,
        };
        let mut inner = self.lock();
        inner
            .comments
            .entry(post_id)
            .or_insert_with(Vec::new)
            .push(comment);
        broadcast(&mut inner, Scope::Post(post_id), |_| FeedEvent::CommentCreated {
            post_id,
        });
        id
    }

    /// A like by some other client, pushed to every connected feed.
    pub fn force_like(&self, post_id: PostId, user: UserId) {
        let mut inner = self.lock();
        inner.likers.entry(post_id).or_default().insert(user);
        let likers = inner_snapshot_likers(&inner, post_id);
        let scope = inner.posts[&post_id].scope.clone();
        for room in [Scope::Post(post_id), Scope::Feed(scope)] {
            broadcast(&mut inner, room, |viewer| FeedEvent::LikeChanged {
                post_id,
                likes: likes_for(&likers, viewer),
            });
        }
    }

    pub fn edit_post(&self, post_id: PostId, caption: &str) {
        let mut inner = self.lock();
        let Some(post) = inner.posts.get_mut(&post_id) else {
            return;
        };
        post.caption = caption.to_string();
        let snapshot = post.clone();
        let likers = inner_snapshot_likers(&inner, post_id);
        let comment_count = inner.comments.get(&post_id).map(|c| c.len()).unwrap_or(0);
        for room in [Scope::Post(post_id), Scope::Feed(snapshot.scope.clone())] {
            broadcast(&mut inner, room, |viewer| {
                let mut post = snapshot.clone();
                post.likes = likes_for(&likers, viewer);
                post.comment_count = comment_count;
                FeedEvent::PostUpdated { post }
            });
        }
    }

    pub fn delete_post(&self, post_id: PostId) {
        let mut inner = self.lock();
        let Some(post) = inner.posts.remove(&post_id) else {
            return;
        };
        inner.comments.remove(&post_id);
        inner.likers.remove(&post_id);
        for room in [Scope::Post(post_id), Scope::Feed(post.scope.clone())] {
            broadcast(&mut inner, room, |_| FeedEvent::PostDeleted { post_id });
        }
    }

    /// Next mutating REST call answers with this rejection instead.
    pub fn reject_next(&self, e: Error) {
        self.lock().reject_next = Some(e);
    }

    /// Refuse the next `n` feed connection attempts.
    pub fn refuse_connects(&self, n: usize) {
        self.lock().refuse_connects = n;
    }

    /// Stalls every mutating call (create, toggle) until
    /// `release_mutations`, so tests can observe the optimistic state.
    pub fn hold_mutations(&self) {
        self.lock().mutation_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_mutations(&self) {
        if let Some(gate) = self.lock().mutation_gate.take() {
            gate.add_permits(1 << 20);
        }
    }

    async fn pass_mutation_gate(&self) {
        let gate = self.lock().mutation_gate.clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.expect("mutation gate closed");
            permit.forget();
        }
    }

    /// Drops every connected feed endpoint, as a server restart would.
    pub fn drop_feeds(&self) {
        self.lock().feeds.clear();
    }

    pub fn api_for(&self, user: UserId) -> MockApi {
        MockApi {
            server: self.clone(),
            user,
        }
    }

    pub fn connector(&self, token: AuthToken) -> MockConnector {
        MockConnector {
            server: self.clone(),
            token,
        }
    }

    fn open_feed(&self, token: AuthToken) -> anyhow::Result<(FeedTx, FeedRx)> {
        let mut inner = self.lock();
        if inner.refuse_connects > 0 {
            inner.refuse_connects -= 1;
            return Err(anyhow!("connection refused"));
        }
        let user = *inner
            .sessions
            .get(&token)
            .ok_or_else(|| anyhow!("invalid auth token"))?;
        let (sender, receiver) = mpsc::unbounded();
        let id = Uuid::new_v4();
        inner.feeds.push(FeedEndpoint {
            id,
            user,
            rooms: HashSet::new(),
            sender,
        });
        let tx: FeedTx = Box::pin(ControlSink {
            server: self.clone(),
            endpoint: id,
        });
        let rx: FeedRx = Box::pin(receiver.map(Ok::<_, anyhow::Error>));
        Ok((tx, rx))
    }

    fn handle_control(&self, endpoint: Uuid, msg: ClientMessage) -> anyhow::Result<()> {
        let mut inner = self.lock();
        let Some(feed) = inner.feeds.iter_mut().find(|f| f.id == endpoint) else {
            return Err(anyhow!("endpoint is gone"));
        };
        match msg {
            ClientMessage::Ping => {
                if feed.sender.unbounded_send(FeedMessage::Pong).is_err() {
                    return Err(anyhow!("endpoint receiver is gone"));
                }
            }
            ClientMessage::Join(room) => {
                feed.rooms.insert(room);
            }
            ClientMessage::Leave(room) => {
                feed.rooms.remove(&room);
            }
        }
        Ok(())
    }

    fn close_endpoint(&self, endpoint: Uuid) {
        self.lock().feeds.retain(|f| f.id != endpoint);
    }

    fn take_rejection(&self) -> Result<(), ApiError> {
        match self.lock().reject_next.take() {
            Some(e) => Err(ApiError::Rejected(e)),
            None => Ok(()),
        }
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

fn inner_snapshot_likers(inner: &Inner, post_id: PostId) -> HashSet<UserId> {
    inner.likers.get(&post_id).cloned().unwrap_or_default()
}

fn likes_for(likers: &HashSet<UserId>, viewer: UserId) -> Likes {
    Likes {
        count: likers.len() as i64,
        liked_by_me: likers.contains(&viewer),
    }
}

/// Sends `event(viewer)` to every endpoint joined to `room`, pruning
/// endpoints whose client went away.
fn broadcast(inner: &mut Inner, room: Scope, event: impl Fn(UserId) -> FeedEvent) {
    inner.feeds.retain_mut(|f| {
        if !f.rooms.contains(&room) {
            return true;
        }
        f.sender
            .unbounded_send(FeedMessage::Event {
                room: room.clone(),
                event: event(f.user),
            })
            .is_ok()
    });
}

/// One user's view of the mock REST surface.
#[derive(Clone)]
pub struct MockApi {
    server: MockServer,
    user: UserId,
}

#[async_trait]
impl Api for MockApi {
    async fn fetch_feed(&self, scope: &FeedScope) -> Result<Vec<Post>, ApiError> {
        let inner = self.server.lock();
        let mut posts: Vec<Post> = inner
            .posts
            .values()
            .filter(|p| p.scope == *scope)
            .cloned()
            .collect();
        for post in &mut posts {
            post.likes = likes_for(&inner_snapshot_likers(&inner, post.id), self.user);
            post.comment_count = inner.comments.get(&post.id).map(|c| c.len()).unwrap_or(0);
        }
        posts.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(posts)
    }

    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, ApiError> {
        let inner = self.server.lock();
        inner
            .comments
            .get(&post)
            .cloned()
            .ok_or(ApiError::Rejected(Error::NotFound(post.0)))
    }

    async fn create_comment(&self, c: NewComment) -> Result<Comment, ApiError> {
        self.server.pass_mutation_gate().await;
        self.server.take_rejection()?;
        c.validate()?;
        let comment = Comment {
            id: CommentId(Uuid::new_v4()),
            post_id: c.post_id,
            author_id: self.user,
            date: Utc::now(),
            // the server stores normalized text, not necessarily the exact
            // bytes the client typed
            text: c.text.trim().to_string(),
            parent_id: c.parent_id,
        };
        let mut inner = self.server.lock();
        let Some(list) = inner.comments.get_mut(&c.post_id) else {
            return Err(ApiError::Rejected(Error::NotFound(c.post_id.0)));
        };
        if let Some(parent) = c.parent_id {
            if !list.iter().any(|p| p.id == parent) {
                return Err(ApiError::Rejected(Error::NotFound(parent.0)));
            }
        }
        list.push(comment.clone());
        broadcast(&mut inner, Scope::Post(c.post_id), |_| {
            FeedEvent::CommentCreated { post_id: c.post_id }
        });
        Ok(comment)
    }

    async fn edit_comment(&self, e: EditComment) -> Result<Comment, ApiError> {
        self.server.take_rejection()?;
        e.validate()?;
        let mut inner = self.server.lock();
        for list in inner.comments.values_mut() {
            if let Some(c) = list.iter_mut().find(|c| c.id == e.comment_id) {
                if c.author_id != self.user {
                    return Err(ApiError::Rejected(Error::PermissionDenied));
                }
                c.text = e.text.trim().to_string();
                return Ok(c.clone());
            }
        }
        Err(ApiError::Rejected(Error::NotFound(e.comment_id.0)))
    }

    async fn delete_comment(&self, comment: CommentId) -> Result<(), ApiError> {
        self.server.take_rejection()?;
        let mut inner = self.server.lock();
        let mut found = None;
        for (post_id, list) in inner.comments.iter_mut() {
            if list.iter().any(|c| c.id == comment) {
                // the cascade is the server's job: drop the whole subtree
                let mut doomed: HashSet<CommentId> = HashSet::new();
                doomed.insert(comment);
                loop {
                    let more: Vec<CommentId> = list
                        .iter()
                        .filter(|c| {
                            c.parent_id.map_or(false, |p| doomed.contains(&p))
                                && !doomed.contains(&c.id)
                        })
                        .map(|c| c.id)
                        .collect();
                    if more.is_empty() {
                        break;
                    }
                    doomed.extend(more);
                }
                list.retain(|c| !doomed.contains(&c.id));
                found = Some(*post_id);
                break;
            }
        }
        match found {
            Some(post_id) => {
                broadcast(&mut inner, Scope::Post(post_id), |_| {
                    FeedEvent::CommentDeleted { post_id }
                });
                Ok(())
            }
            None => Err(ApiError::Rejected(Error::NotFound(comment.0))),
        }
    }

    async fn toggle_like(&self, post: PostId) -> Result<Likes, ApiError> {
        self.server.pass_mutation_gate().await;
        self.server.take_rejection()?;
        let mut inner = self.server.lock();
        if !inner.posts.contains_key(&post) {
            return Err(ApiError::Rejected(Error::NotFound(post.0)));
        }
        let likers = inner.likers.entry(post).or_default();
        if !likers.insert(self.user) {
            likers.remove(&self.user);
        }
        let likers = inner_snapshot_likers(&inner, post);
        let scope = inner.posts[&post].scope.clone();
        for room in [Scope::Post(post), Scope::Feed(scope)] {
            broadcast(&mut inner, room, |viewer| FeedEvent::LikeChanged {
                post_id: post,
                likes: likes_for(&likers, viewer),
            });
        }
        Ok(likes_for(&likers, self.user))
    }
}

pub struct MockConnector {
    server: MockServer,
    token: AuthToken,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&mut self) -> anyhow::Result<(FeedTx, FeedRx)> {
        self.server.open_feed(self.token)
    }
}

/// Client-to-server half of a mock feed connection. Control messages take
/// effect synchronously at send time, which keeps tests deterministic.
struct ControlSink {
    server: MockServer,
    endpoint: Uuid,
}

impl Sink<ClientMessage> for ControlSink {
    type Error = anyhow::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<anyhow::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, msg: ClientMessage) -> anyhow::Result<()> {
        self.server.handle_control(self.endpoint, msg)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<anyhow::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<anyhow::Result<()>> {
        self.server.close_endpoint(self.endpoint);
        Poll::Ready(Ok(()))
    }
}
