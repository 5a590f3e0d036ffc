use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

/// An error the server deliberately answered a request with.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("No such entity {0}")]
    NotFound(Uuid),

    #[error("Text is empty")]
    EmptyText,

    #[error("Text is too long ({0} bytes)")]
    TextTooLong(usize),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::EmptyText => StatusCode::BAD_REQUEST,
            Error::TextTooLong(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotFound(u) => json!({
                "message": "no such entity",
                "type": "not-found",
                "uuid": u,
            }),
            Error::EmptyText => json!({
                "message": "text is empty",
                "type": "empty-text",
            }),
            Error::TextTooLong(len) => json!({
                "message": "text is too long",
                "type": "text-too-long",
                "len": len,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "permission-denied" => Error::PermissionDenied,
                "not-found" => Error::NotFound(
                    data.get("uuid")
                        .and_then(|uuid| uuid.as_str())
                        .and_then(|uuid| Uuid::from_str(uuid).ok())
                        .ok_or_else(|| anyhow!("not-found error without a proper uuid"))?,
                ),
                "empty-text" => Error::EmptyText,
                "text-too-long" => Error::TextTooLong(
                    data.get("len")
                        .and_then(|len| len.as_u64())
                        .ok_or_else(|| anyhow!("text-too-long error without a length"))?
                        as usize,
                ),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

/// Outcome of a REST call, seen from the client: either the transport failed
/// (worth retrying, never the user's fault) or the server answered with a
/// rejection (must be surfaced per-action).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed reaching the server")]
    Transport(#[source] anyhow::Error),

    #[error(transparent)]
    Rejected(#[from] Error),
}

impl ApiError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}
