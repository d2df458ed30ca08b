//! User records and the user store seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::account::Account;
use super::api::NicoApi;
use super::error::NicoError;
use crate::constants::USER_FETCH_INTERVAL;

/// A commenter as known to the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    /// User ID (numeric for registered users, hashed for `184` users).
    #[serde(rename = "ID")]
    pub id: String,
    /// Display name; empty if unknown.
    #[serde(default)]
    pub name: String,
    /// When this record was created.
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    /// Anonymous (`184`) commenter.
    #[serde(rename = "Is184", default)]
    pub is_184: bool,
    /// Avatar URL.
    #[serde(rename = "ThumbnailURL", default)]
    pub thumbnail_url: String,
}

impl User {
    /// Blank record for `id`, stamped now.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            create_time: Utc::now(),
            is_184: is_184_user_id(id),
            ..Self::default()
        }
    }
}

/// Anonymous commenters carry a non-numeric ID.
pub fn is_184_user_id(id: &str) -> bool {
    id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit())
}

/// Persistent user-record store.
///
/// `fetch` returns [`NicoError::UserNotFound`] for unknown IDs; callers
/// treat that as a normal outcome.
pub trait UserStore: Send + Sync {
    /// Look up a user.
    fn fetch(&self, id: &str) -> Result<User, NicoError>;
    /// Insert or replace a user.
    fn store(&self, user: &User) -> Result<(), NicoError>;
    /// Remove a user. Removing an unknown ID is not an error.
    fn remove(&self, id: &str) -> Result<(), NicoError>;
}

/// Process-local [`UserStore`].
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, User>>, NicoError> {
        self.users
            .lock()
            .map_err(|e| NicoError::Other(format!("user store poisoned: {e}")))
    }
}

impl UserStore for MemoryUserStore {
    fn fetch(&self, id: &str) -> Result<User, NicoError> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| NicoError::UserNotFound(id.to_string()))
    }

    fn store(&self, user: &User) -> Result<(), NicoError> {
        self.lock()?.insert(user.id.clone(), user.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), NicoError> {
        self.lock()?.remove(id);
        Ok(())
    }
}

/// Fetches user info from the site, at most one request per
/// [`USER_FETCH_INTERVAL`]. Anonymous IDs are never sent to the API.
pub struct UserFetcher {
    api: Arc<dyn NicoApi>,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl std::fmt::Debug for UserFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserFetcher").finish_non_exhaustive()
    }
}

impl UserFetcher {
    /// Wrap an API client.
    pub fn new(api: Arc<dyn NicoApi>) -> Self {
        Self {
            api,
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    /// Build a fresh record for `id`, asking the API for name and avatar.
    pub async fn fetch(&self, id: &str, account: &Account) -> Result<User, NicoError> {
        if is_184_user_id(id) {
            return Ok(User::new(id));
        }

        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            tokio::time::sleep_until(at + USER_FETCH_INTERVAL).await;
        }
        *last = Some(Instant::now());
        drop(last);

        let fetched = self.api.fetch_user_info(id, account).await?;
        Ok(User {
            name: fetched.name,
            thumbnail_url: fetched.thumbnail_url,
            ..User::new(id)
        })
    }
}
