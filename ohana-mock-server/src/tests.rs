#![cfg(test)]

use std::sync::Arc;

use ohana_client::api::{Error, FamilyCode, FeedScope, Likes, PostId, Scope, UserId};
use ohana_client::{ClientError, Mutator, Notification, SharedCache};

use crate::{MockApi, MockServer};

fn family() -> FeedScope {
    FeedScope::Family(FamilyCode(String::from("smith42")))
}

fn init_logs() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
}

struct Harness {
    server: MockServer,
    mutator: Arc<Mutator<MockApi>>,
    me: UserId,
    post: PostId,
}

/// One family, one post, one logged-in user with the feed already fetched.
async fn harness() -> Harness {
    init_logs();
    let server = MockServer::new();
    let me = server.add_user("alice");
    let author = server.add_user("bob");
    let post = server.add_post(author, family(), "picnic photos");
    let mutator = Arc::new(Mutator::new(
        server.api_for(me),
        SharedCache::new(),
        me,
    ));
    mutator.refresh_feed(&family()).await.expect("fetching feed");
    mutator.refresh_comments(post).await.expect("fetching comments");
    Harness {
        server,
        mutator,
        me,
        post,
    }
}

/// Polls until `check` passes, yielding so spawned tasks make progress.
async fn eventually<F: Fn(&ohana_client::FeedCache) -> bool>(cache: &SharedCache, check: F) {
    for _ in 0..1000 {
        if check(&*cache.read().await) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

async fn yield_a_bit() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn optimistic_create_resolves_to_exactly_one_comment() {
    let h = harness().await;
    let id = h
        .mutator
        .create_comment(h.post, "lovely day")
        .await
        .expect("creating comment");

    let cache = h.mutator.cache().read().await;
    let comments = cache.comments_for(&h.post);
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].key.committed(), Some(id));
    assert!(!comments.iter().any(|c| c.key.is_pending()));
    assert_eq!(cache.post(&h.post).unwrap().comment_count, 1);
    assert_eq!(
        h.server.user(comments[0].author_id).map(|u| u.name),
        Some(String::from("alice"))
    );
}

#[tokio::test]
async fn failed_create_rolls_back_to_the_previous_state() {
    let h = harness().await;
    let before = h.mutator.cache().snapshot().await;

    h.server.reject_next(Error::PermissionDenied);
    let res = h.mutator.create_comment(h.post, "will be refused").await;
    assert!(matches!(res, Err(ClientError::Api(_))));

    assert_eq!(h.mutator.cache().snapshot().await, before);
}

#[tokio::test]
async fn invalid_text_is_refused_before_any_local_change() {
    let h = harness().await;
    let before = h.mutator.cache().snapshot().await;
    let res = h.mutator.create_comment(h.post, "   ").await;
    assert!(matches!(res, Err(ClientError::Api(_))));
    assert_eq!(h.mutator.cache().snapshot().await, before);
}

#[tokio::test]
async fn like_toggle_converges_on_the_authoritative_count() {
    let h = harness().await;
    // five likes from other users, visible after a refetch
    for i in 0..5 {
        let u = h.server.add_user(&format!("liker-{i}"));
        h.server.force_like(h.post, u);
    }
    h.mutator.refresh_feed(&family()).await.expect("fetching feed");
    {
        let cache = h.mutator.cache().read().await;
        assert_eq!(
            cache.post(&h.post).unwrap().likes,
            Likes {
                count: 5,
                liked_by_me: false
            }
        );
    }

    // hold the REST call so the optimistic state is observable
    h.server.hold_mutations();
    let mutator = h.mutator.clone();
    let post = h.post;
    let toggle = tokio::spawn(async move { mutator.toggle_like(post).await });
    eventually(h.mutator.cache(), |cache| {
        cache.post(&post).unwrap().likes
            == Likes {
                count: 6,
                liked_by_me: true,
            }
    })
    .await;

    // someone else likes while our toggle is in flight
    let rival = h.server.add_user("rival");
    h.server.force_like(h.post, rival);
    h.server.release_mutations();

    let likes = toggle
        .await
        .expect("joining toggle task")
        .expect("toggling like");
    assert_eq!(
        likes,
        Likes {
            count: 7,
            liked_by_me: true
        }
    );
    let cache = h.mutator.cache().read().await;
    assert_eq!(cache.post(&h.post).unwrap().likes, likes);
}

#[tokio::test]
async fn overlapping_like_toggles_on_one_post_are_refused() {
    let h = harness().await;
    h.server.hold_mutations();
    let mutator = h.mutator.clone();
    let post = h.post;
    let first = tokio::spawn(async move { mutator.toggle_like(post).await });
    eventually(h.mutator.cache(), |cache| {
        cache.post(&post).unwrap().likes.liked_by_me
    })
    .await;

    let res = h.mutator.toggle_like(h.post).await;
    assert!(matches!(res, Err(ClientError::LikeInFlight(_))));

    h.server.release_mutations();
    first
        .await
        .expect("joining toggle task")
        .expect("toggling like");
    // the refused second toggle must not have corrupted anything
    let cache = h.mutator.cache().read().await;
    assert_eq!(
        cache.post(&h.post).unwrap().likes,
        Likes {
            count: 1,
            liked_by_me: true
        }
    );
}

#[tokio::test]
async fn failed_like_toggle_rolls_back_the_pair() {
    let h = harness().await;
    h.server.reject_next(Error::PermissionDenied);
    let res = h.mutator.toggle_like(h.post).await;
    assert!(matches!(res, Err(ClientError::Api(_))));
    let cache = h.mutator.cache().read().await;
    assert_eq!(
        cache.post(&h.post).unwrap().likes,
        Likes {
            count: 0,
            liked_by_me: false
        }
    );
}

#[tokio::test]
async fn delete_prunes_the_whole_subtree() {
    let h = harness().await;
    let root = h.server.add_comment(h.post, h.me, None, "root");
    let reply_a = h.server.add_comment(h.post, h.me, Some(root), "first reply");
    h.server.add_comment(h.post, h.me, Some(root), "second reply");
    h.server.add_comment(h.post, h.me, Some(reply_a), "nested");
    h.mutator
        .refresh_comments(h.post)
        .await
        .expect("fetching comments");
    assert_eq!(h.mutator.cache().read().await.comments_for(&h.post).len(), 4);

    let removed = h
        .mutator
        .delete_comment(h.post, root)
        .await
        .expect("deleting comment");
    assert_eq!(removed, 4);
    let cache = h.mutator.cache().read().await;
    assert!(cache.comments_for(&h.post).is_empty());
    assert_eq!(cache.post(&h.post).unwrap().comment_count, 0);
}

#[tokio::test]
async fn failed_delete_changes_nothing() {
    let h = harness().await;
    let root = h.server.add_comment(h.post, h.me, None, "root");
    h.server.add_comment(h.post, h.me, Some(root), "reply");
    h.mutator
        .refresh_comments(h.post)
        .await
        .expect("fetching comments");
    let before = h.mutator.cache().snapshot().await;

    h.server.reject_next(Error::PermissionDenied);
    let res = h.mutator.delete_comment(h.post, root).await;
    assert!(matches!(res, Err(ClientError::Api(_))));
    assert_eq!(h.mutator.cache().snapshot().await, before);
}

#[tokio::test]
async fn edit_takes_the_server_normalized_text() {
    let h = harness().await;
    let id = h
        .mutator
        .create_comment(h.post, "tpyo here")
        .await
        .expect("creating comment");

    h.mutator
        .edit_comment(h.post, id, "  fixed now  ")
        .await
        .expect("editing comment");
    let cache = h.mutator.cache().read().await;
    // the mock trims text server-side
    assert_eq!(cache.comments_for(&h.post)[0].text, "fixed now");
}

#[tokio::test]
async fn failed_edit_leaves_the_list_unchanged() {
    let h = harness().await;
    let id = h
        .mutator
        .create_comment(h.post, "original")
        .await
        .expect("creating comment");
    let before = h.mutator.cache().snapshot().await;

    h.server.reject_next(Error::PermissionDenied);
    let res = h.mutator.edit_comment(h.post, id, "rewritten").await;
    assert!(matches!(res, Err(ClientError::Api(_))));
    assert_eq!(h.mutator.cache().snapshot().await, before);
}

#[tokio::test]
async fn reply_lands_under_its_parent() {
    let h = harness().await;
    let root = h
        .mutator
        .create_comment(h.post, "root")
        .await
        .expect("creating comment");
    let reply = h
        .mutator
        .reply(h.post, root, "reply")
        .await
        .expect("creating reply");

    let cache = h.mutator.cache().read().await;
    let tree = ohana_client::build_tree(cache.comments_for(&h.post));
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].comment.key.committed(), Some(root));
    assert_eq!(tree[0].replies.len(), 1);
    assert_eq!(tree[0].replies[0].comment.key.committed(), Some(reply));
    assert_eq!(ohana_client::count_all(&tree), 2);
}

#[tokio::test]
async fn refetch_keeps_an_unconfirmed_placeholder_until_it_resolves() {
    let h = harness().await;
    h.server.hold_mutations();
    let mutator = h.mutator.clone();
    let post = h.post;
    let create = tokio::spawn(async move { mutator.create_comment(post, "still in flight").await });
    eventually(h.mutator.cache(), |cache| {
        cache.comments_for(&post).iter().any(|c| c.key.is_pending())
    })
    .await;

    // an invalidation-driven refetch arrives while the create is unanswered
    let other = h.server.add_user("carol");
    h.server.add_comment(h.post, other, None, "from another client");
    h.mutator
        .refresh_comments(h.post)
        .await
        .expect("refetching comments");
    {
        let cache = h.mutator.cache().read().await;
        let comments = cache.comments_for(&h.post);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments.iter().filter(|c| c.key.is_pending()).count(), 1);
    }

    h.server.release_mutations();
    let id = create
        .await
        .expect("joining create task")
        .expect("creating comment");

    // the placeholder resolved to its real id and nothing dangles
    let cache = h.mutator.cache().read().await;
    let comments = cache.comments_for(&h.post);
    assert_eq!(comments.len(), 2);
    assert!(!comments.iter().any(|c| c.key.is_pending()));
    assert_eq!(
        comments
            .iter()
            .filter(|c| c.key.committed() == Some(id))
            .count(),
        1
    );
}

#[tokio::test]
async fn feed_events_point_update_joined_rooms_only() {
    let h = harness().await;
    let token = h.server.login(h.me);
    let (handle, mut notifications, task) = ohana_client::spawn_event_feed(
        h.server.connector(token),
        h.mutator.cache().clone(),
    );
    handle.join(Scope::Feed(family()));
    assert_eq!(notifications.recv().await, Some(Notification::Connected));
    yield_a_bit().await;

    let liker = h.server.add_user("dave");
    h.server.force_like(h.post, liker);
    let post = h.post;
    eventually(h.mutator.cache(), |cache| {
        cache.post(&post).unwrap().likes.count == 1
    })
    .await;

    handle.leave(Scope::Feed(family()));
    yield_a_bit().await;
    let other = h.server.add_user("erin");
    h.server.force_like(h.post, other);
    yield_a_bit().await;
    // left the room, so the second like never reaches the cache
    assert_eq!(
        h.mutator.cache().read().await.post(&h.post).unwrap().likes.count,
        1
    );

    handle.shutdown();
    task.await
        .expect("joining feed task")
        .expect("feed shut down cleanly");
}

#[tokio::test]
async fn comment_events_notify_staleness_for_refetch() {
    let h = harness().await;
    let token = h.server.login(h.me);
    let (handle, mut notifications, task) = ohana_client::spawn_event_feed(
        h.server.connector(token),
        h.mutator.cache().clone(),
    );
    handle.join(Scope::Post(h.post));
    assert_eq!(notifications.recv().await, Some(Notification::Connected));
    yield_a_bit().await;

    let other = h.server.add_user("carol");
    h.server.add_comment(h.post, other, None, "breaking news");
    let stale = notifications.recv().await;
    assert_eq!(
        stale,
        Some(Notification::Stale(ohana_client::StaleKey::Comments(
            h.post
        )))
    );
    // resolving the notification brings the comment in
    h.mutator
        .refresh_stale(&ohana_client::StaleKey::Comments(h.post))
        .await
        .expect("refetching after invalidation");
    assert_eq!(h.mutator.cache().read().await.comments_for(&h.post).len(), 1);

    handle.shutdown();
    task.await
        .expect("joining feed task")
        .expect("feed shut down cleanly");
}

#[tokio::test]
async fn post_updates_and_deletes_flow_through_the_feed() {
    let h = harness().await;
    let token = h.server.login(h.me);
    let (handle, mut notifications, task) = ohana_client::spawn_event_feed(
        h.server.connector(token),
        h.mutator.cache().clone(),
    );
    handle.join(Scope::Feed(family()));
    assert_eq!(notifications.recv().await, Some(Notification::Connected));
    yield_a_bit().await;

    h.server.edit_post(h.post, "picnic photos, day two");
    let post = h.post;
    eventually(h.mutator.cache(), |cache| {
        cache.post(&post).unwrap().caption == "picnic photos, day two"
    })
    .await;

    h.server.delete_post(h.post);
    assert_eq!(
        notifications.recv().await,
        Some(Notification::Stale(ohana_client::StaleKey::Feed(family())))
    );
    let cache = h.mutator.cache().read().await;
    assert!(cache.post(&h.post).is_none());
    assert!(cache.feed(&family()).is_empty());

    handle.shutdown();
    task.await
        .expect("joining feed task")
        .expect("feed shut down cleanly");
}

#[tokio::test]
async fn reconnect_rejoins_every_room() {
    let h = harness().await;
    let token = h.server.login(h.me);
    let (handle, mut notifications, task) = ohana_client::spawn_event_feed(
        h.server.connector(token),
        h.mutator.cache().clone(),
    );
    handle.join(Scope::Feed(family()));
    assert_eq!(notifications.recv().await, Some(Notification::Connected));
    yield_a_bit().await;

    // server restart: every endpoint is gone, membership with it
    h.server.drop_feeds();
    assert_eq!(notifications.recv().await, Some(Notification::Disconnected));
    assert_eq!(notifications.recv().await, Some(Notification::Connected));
    yield_a_bit().await;

    let liker = h.server.add_user("dave");
    h.server.force_like(h.post, liker);
    let post = h.post;
    eventually(h.mutator.cache(), |cache| {
        cache.post(&post).unwrap().likes.count == 1
    })
    .await;

    handle.shutdown();
    task.await
        .expect("joining feed task")
        .expect("feed shut down cleanly");
}

#[tokio::test(start_paused = true)]
async fn feed_gives_up_after_bounded_attempts() {
    init_logs();
    let server = MockServer::new();
    let user = server.add_user("alice");
    let token = server.login(user);
    server.refuse_connects(100);

    let (_handle, mut notifications, task) =
        ohana_client::spawn_event_feed(server.connector(token), SharedCache::new());
    let res = task.await.expect("joining feed task");
    assert!(res.is_err());
    assert_eq!(notifications.recv().await, Some(Notification::Disconnected));
}

#[tokio::test]
async fn invalid_token_cannot_open_a_feed() {
    let server = MockServer::new();
    let stale_token = ohana_client::api::AuthToken::stub();
    let mut connector = server.connector(stale_token);
    let res = ohana_client::Connector::connect(&mut connector).await;
    assert!(res.is_err());
}
