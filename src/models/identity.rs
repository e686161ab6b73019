use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use uuid::Uuid;

/// Identifier of an authenticated user as issued by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The signed-in user together with the credential used for remote calls
///
/// Two identities are equal only if both the user and the token match, so a
/// refreshed token is observable as a transition.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    access_token: String,
}

impl Identity {
    pub fn new(user_id: UserId, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// True when both identities belong to the same user, regardless of token
    pub fn same_user(&self, other: &Identity) -> bool {
        self.user_id == other.user_id
    }
}

impl Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
