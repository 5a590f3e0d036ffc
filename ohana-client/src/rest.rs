use async_trait::async_trait;

use crate::api::{
    Api, ApiError, AuthToken, Comment, CommentId, EditComment, Error, FeedScope, Likes,
    NewComment, Post, PostId,
};

/// `Api` over plain HTTP. Token acquisition and refresh are the login flow's
/// concern; this just attaches whatever it was given.
pub struct RestApi {
    client: reqwest::Client,
    host: String,
    token: AuthToken,
}

impl RestApi {
    pub fn new(host: String, token: AuthToken) -> RestApi {
        RestApi {
            client: reqwest::Client::new(),
            host,
            token,
        }
    }

    async fn call<B, R>(&self, endpoint: &str, body: &B) -> Result<R, ApiError>
    where
        B: serde::Serialize + Sync,
        R: for<'de> serde::Deserialize<'de>,
    {
        let resp = self
            .client
            .post(format!("{}/api/{}", self.host, endpoint))
            .bearer_auth(self.token.0)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.into()))?;
        if resp.status().is_success() {
            resp.json()
                .await
                .map_err(|e| ApiError::Transport(e.into()))
        } else {
            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .map_err(|e| ApiError::Transport(e.into()))?;
            Err(ApiError::Rejected(Error::parse(&body).unwrap_or_else(
                |_| Error::Unknown(format!("server answered with status {status}")),
            )))
        }
    }
}

#[async_trait]
impl Api for RestApi {
    async fn fetch_feed(&self, scope: &FeedScope) -> Result<Vec<Post>, ApiError> {
        self.call("fetch-feed", scope).await
    }

    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, ApiError> {
        self.call("fetch-comments", &post).await
    }

    async fn create_comment(&self, c: NewComment) -> Result<Comment, ApiError> {
        c.validate().map_err(ApiError::Rejected)?;
        self.call("create-comment", &c).await
    }

    async fn edit_comment(&self, e: EditComment) -> Result<Comment, ApiError> {
        e.validate().map_err(ApiError::Rejected)?;
        self.call("edit-comment", &e).await
    }

    async fn delete_comment(&self, comment: CommentId) -> Result<(), ApiError> {
        self.call("delete-comment", &comment).await
    }

    async fn toggle_like(&self, post: PostId) -> Result<Likes, ApiError> {
        self.call("toggle-like", &post).await
    }
}
