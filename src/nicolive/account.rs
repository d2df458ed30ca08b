//! Site account credentials.

use serde::{Deserialize, Serialize};

/// Credential and session bundle for the broadcast site.
///
/// Owned by the hub; the protocol layer only borrows it, except for
/// `login` which writes the new session back.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Login mail address.
    #[serde(default)]
    pub mail: String,
    /// Login password.
    #[serde(default)]
    pub pass: String,
    /// `user_session` cookie value from the last login.
    #[serde(default)]
    pub usersession: String,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("mail", &self.mail)
            .field("has_pass", &!self.pass.is_empty())
            .field("has_session", &!self.usersession.is_empty())
            .finish()
    }
}

impl Account {
    /// Whether a session token is present.
    pub fn has_session(&self) -> bool {
        !self.usersession.is_empty()
    }

    /// `Cookie` header value carrying the session.
    pub fn cookie_header(&self) -> String {
        format!("user_session={}", self.usersession)
    }
}
