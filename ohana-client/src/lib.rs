mod cache;
pub use cache::{FeedCache, SharedCache, StaleKey};

mod cascade;
pub use cascade::{collect_descendants, removal_set};

mod channel;
pub use channel::{
    run_event_feed, spawn_event_feed, ChannelHandle, Command, Connector, FeedRx, FeedTx,
    Notification, WsConnector,
};

mod comment;
pub use comment::{Comment, CommentKey, TempId};

mod mutator;
pub use mutator::{ClientError, Mutator};

mod rest;
pub use rest::RestApi;

mod tree;
pub use tree::{build_tree, count_all, CommentNode};

pub mod api {
    pub use ohana_api::*;
}
