use uuid::Uuid;

use crate::STUB_UUID;

/// Bearer token attached to every REST call and presented once when opening
/// the event feed. How it is obtained and refreshed is the login flow's
/// problem, not this crate's.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}
