//! User record commands. Every change is announced with `User.Update`.

use super::dispatch::Dispatcher;
use super::error::HubError;
use crate::message::command::{directngm, event};
use crate::message::content::{NotificationType, UserSetName};
use crate::nicolive::{is_184_user_id, NicoError, User};

impl Dispatcher {
    fn store_failed(&self, title: &str, err: &NicoError) {
        self.notify(NotificationType::Warn, title, &format!("DB error : {err}"));
    }

    pub(super) fn user_set(&self, user: User) -> Result<(), HubError> {
        if let Err(e) = self.users.store(&user) {
            self.store_failed("Storing the user info failed", &e);
            return Err(e.into());
        }
        self.emit(event::USER_UPDATE, &user)
    }

    pub(super) async fn user_set_name(&self, set: UserSetName) -> Result<(), HubError> {
        const TITLE: &str = "Storing the user name failed";

        if set.name.is_empty() {
            self.notify(NotificationType::Warn, "Blank name", "You can't set blank name");
            return Err(NicoError::Other("format error : Name is empty".to_string()).into());
        }

        let mut user = match self.users.fetch(&set.id) {
            Ok(user) => user,
            Err(NicoError::UserNotFound(_)) => {
                match self.fetcher.fetch(&set.id, &self.state.account).await {
                    Ok(user) => user,
                    Err(e) => {
                        self.store_failed(TITLE, &e);
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.store_failed(TITLE, &e);
                return Err(e.into());
            }
        };

        user.name = set.name;
        if let Err(e) = self.users.store(&user) {
            self.store_failed(TITLE, &e);
            return Err(e.into());
        }
        self.emit(event::USER_UPDATE, &user)
    }

    pub(super) fn user_delete(&self, id: &str) -> Result<(), HubError> {
        if let Err(e) = self.users.remove(id) {
            self.store_failed("Removing the user info failed", &e);
            return Err(e.into());
        }
        let blank = User {
            id: id.to_string(),
            is_184: is_184_user_id(id),
            ..User::default()
        };
        self.emit(event::USER_UPDATE, &blank)
    }

    /// Refresh name and avatar from the site, keeping the rest of any
    /// existing record.
    pub(super) async fn user_fetch(&self, id: &str) -> Result<(), HubError> {
        const TITLE: &str = "Fetching the user info failed";

        let fetched = match self.fetcher.fetch(id, &self.state.account).await {
            Ok(user) => user,
            Err(e) => {
                self.store_failed(TITLE, &e);
                return Err(e.into());
            }
        };

        let user = match self.users.fetch(id) {
            Ok(mut current) => {
                current.name = fetched.name;
                current.thumbnail_url = fetched.thumbnail_url;
                current
            }
            Err(NicoError::UserNotFound(_)) => fetched,
            Err(e) => {
                self.store_failed(TITLE, &e);
                return Err(e.into());
            }
        };

        if let Err(e) = self.users.store(&user) {
            self.store_failed(TITLE, &e);
            return Err(e.into());
        }
        self.emit(event::USER_UPDATE, &user)
    }

    pub(super) async fn user_get(&self, id: &str, source: Option<usize>) -> Result<(), HubError> {
        match self.users.fetch(id) {
            Ok(user) => self.reply(source, directngm::USER_GET, &user).await,
            Err(e) => {
                self.store_failed("Getting the user info failed", &e);
                Err(e.into())
            }
        }
    }
}
