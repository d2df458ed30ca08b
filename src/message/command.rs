//! Command names and typed command decoding.
//!
//! Incoming messages in the command domains are resolved through a table
//! keyed by `(Domain, Command)` and built once. Known pairs decode into a
//! typed variant; anything else becomes [`Command::Unknown`], which the hub
//! reports as a user error.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::content::{
    AccountSet, AntennaGot, BroadConnect, BroadSendComment, LogPrint, PlugEnable, PluginNo,
    UserRef, UserSetName,
};
use super::{Domain, Message};
use crate::config::{SettingsSlot, SettingsSlots};
use crate::nicolive::User;

/// `nagome_query` commands.
pub mod query {
    /// Resolve a broadcast and open its comment session.
    pub const BROAD_CONNECT: &str = "Broad.Connect";
    /// Close the comment session.
    pub const BROAD_DISCONNECT: &str = "Broad.Disconnect";
    /// Post a comment to the open broadcast.
    pub const BROAD_SEND_COMMENT: &str = "Broad.SendComment";
    /// Replace the non-empty account fields.
    pub const ACCOUNT_SET: &str = "Account.Set";
    /// Log in and store the session cookie.
    pub const ACCOUNT_LOGIN: &str = "Account.Login";
    /// Reload the account from the save directory.
    pub const ACCOUNT_LOAD: &str = "Account.Load";
    /// Write the account to the save directory.
    pub const ACCOUNT_SAVE: &str = "Account.Save";
    /// Write a line to the hub log.
    pub const LOG_PRINT: &str = "Log.Print";
    /// Replace the settings in effect.
    pub const SETTINGS_SET_CURRENT: &str = "Settings.SetCurrent";
    /// Replace every settings slot.
    pub const SETTINGS_SET_ALL: &str = "Settings.SetAll";
    /// Enable or disable a plugin.
    pub const PLUG_ENABLE: &str = "Plug.Enable";
    /// Store a user record.
    pub const USER_SET: &str = "User.Set";
    /// Rename a user, fetching the record if unknown.
    pub const USER_SET_NAME: &str = "User.SetName";
    /// Forget a user.
    pub const USER_DELETE: &str = "User.Delete";
    /// Refresh a user record from the site.
    pub const USER_FETCH: &str = "User.Fetch";
}

/// `nagome_direct` commands.
pub mod direct {
    /// TCP handshake naming the plugin's index.
    pub const NO: &str = "No";
    /// Ask for every plugin.
    pub const PLUG_LIST: &str = "Plug.List";
    /// Ask for the settings in effect.
    pub const SETTINGS_CURRENT: &str = "Settings.Current";
    /// Ask for every settings slot.
    pub const SETTINGS_ALL: &str = "Settings.All";
    /// Ask for the hub's name and version.
    pub const APP_VERSION: &str = "App.Version";
    /// Ask for one stored user.
    pub const USER_GET: &str = "User.Get";
}

/// `nagome_directngm` commands (hub to one plugin).
pub mod directngm {
    /// Reply to `Plug.List`.
    pub const PLUG_LIST: &str = "Plug.List";
    /// The plugin was enabled.
    pub const PLUG_ENABLED: &str = "Plug.Enabled";
    /// The plugin was disabled.
    pub const PLUG_DISABLED: &str = "Plug.Disabled";
    /// Reply to `Settings.Current`.
    pub const SETTINGS_CURRENT: &str = "Settings.Current";
    /// Reply to `Settings.All`.
    pub const SETTINGS_ALL: &str = "Settings.All";
    /// Reply to `App.Version`.
    pub const APP_VERSION: &str = "App.Version";
    /// Reply to `User.Get`.
    pub const USER_GET: &str = "User.Get";
}

/// `nagome_antenna` commands.
pub mod antenna {
    /// A followed community started a broadcast.
    pub const GOT: &str = "Got";
}

/// `nagome` events.
pub mod event {
    /// A comment session opened.
    pub const BROAD_OPEN: &str = "Broad.Open";
    /// The comment session closed.
    pub const BROAD_CLOSE: &str = "Broad.Close";
    /// One comment arrived.
    pub const COMMENT_GOT: &str = "Comment.Got";
    /// A user record changed.
    pub const USER_UPDATE: &str = "User.Update";
    /// Something to show the user.
    pub const UI_NOTIFICATION: &str = "UI.Notification";
}

/// A decoded `nagome_query` command.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryCommand {
    /// `Broad.Connect`.
    BroadConnect(BroadConnect),
    /// `Broad.Disconnect`.
    BroadDisconnect,
    /// `Broad.SendComment`.
    BroadSendComment(BroadSendComment),
    /// `Account.Set`.
    AccountSet(AccountSet),
    /// `Account.Login`.
    AccountLogin,
    /// `Account.Load`.
    AccountLoad,
    /// `Account.Save`.
    AccountSave,
    /// `Log.Print`.
    LogPrint(LogPrint),
    /// `Settings.SetCurrent`.
    SettingsSetCurrent(SettingsSlot),
    /// `Settings.SetAll`.
    SettingsSetAll(SettingsSlots),
    /// `Plug.Enable`.
    PlugEnable(PlugEnable),
    /// `User.Set`.
    UserSet(User),
    /// `User.SetName`.
    UserSetName(UserSetName),
    /// `User.Delete`.
    UserDelete(UserRef),
    /// `User.Fetch`.
    UserFetch(UserRef),
}

/// A decoded `nagome_direct` command.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectCommand {
    /// `No`, only valid as a TCP handshake.
    No(PluginNo),
    /// `Plug.List`.
    PlugList,
    /// `Settings.Current`.
    SettingsCurrent,
    /// `Settings.All`.
    SettingsAll,
    /// `App.Version`.
    AppVersion,
    /// `User.Get`.
    UserGet(UserRef),
}

/// A decoded `nagome_antenna` command.
#[derive(Debug, Clone, PartialEq)]
pub enum AntennaCommand {
    /// `Got`.
    Got(AntennaGot),
}

/// Any command the hub can execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Changes hub state or drives the broadcast protocol.
    Query(QueryCommand),
    /// Answered to the requesting plugin only.
    Direct(DirectCommand),
    /// Alert feed notice.
    Antenna(AntennaCommand),
    /// Well-formed message with no registered handler.
    Unknown {
        /// Message domain.
        domain: Domain,
        /// Message command.
        command: String,
    },
}

type Decoder = fn(&Value) -> Result<Command, serde_json::Error>;

fn entry(domain: Domain, command: &str, decode: Decoder) -> ((Domain, String), Decoder) {
    ((domain, command.to_string()), decode)
}

fn content<T: DeserializeOwned>(v: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(v)
}

static DECODERS: LazyLock<HashMap<(Domain, String), Decoder>> = LazyLock::new(|| {
    let entries = [
        entry(Domain::Query, query::BROAD_CONNECT, |v| Ok(Command::Query(QueryCommand::BroadConnect(content(v)?)))),
        entry(Domain::Query, query::BROAD_DISCONNECT, |_| Ok(Command::Query(QueryCommand::BroadDisconnect))),
        entry(Domain::Query, query::BROAD_SEND_COMMENT, |v| Ok(Command::Query(QueryCommand::BroadSendComment(content(v)?)))),
        entry(Domain::Query, query::ACCOUNT_SET, |v| Ok(Command::Query(QueryCommand::AccountSet(content(v)?)))),
        entry(Domain::Query, query::ACCOUNT_LOGIN, |_| Ok(Command::Query(QueryCommand::AccountLogin))),
        entry(Domain::Query, query::ACCOUNT_LOAD, |_| Ok(Command::Query(QueryCommand::AccountLoad))),
        entry(Domain::Query, query::ACCOUNT_SAVE, |_| Ok(Command::Query(QueryCommand::AccountSave))),
        entry(Domain::Query, query::LOG_PRINT, |v| Ok(Command::Query(QueryCommand::LogPrint(content(v)?)))),
        entry(Domain::Query, query::SETTINGS_SET_CURRENT, |v| Ok(Command::Query(QueryCommand::SettingsSetCurrent(content(v)?)))),
        entry(Domain::Query, query::SETTINGS_SET_ALL, |v| Ok(Command::Query(QueryCommand::SettingsSetAll(content(v)?)))),
        entry(Domain::Query, query::PLUG_ENABLE, |v| Ok(Command::Query(QueryCommand::PlugEnable(content(v)?)))),
        entry(Domain::Query, query::USER_SET, |v| Ok(Command::Query(QueryCommand::UserSet(content(v)?)))),
        entry(Domain::Query, query::USER_SET_NAME, |v| Ok(Command::Query(QueryCommand::UserSetName(content(v)?)))),
        entry(Domain::Query, query::USER_DELETE, |v| Ok(Command::Query(QueryCommand::UserDelete(content(v)?)))),
        entry(Domain::Query, query::USER_FETCH, |v| Ok(Command::Query(QueryCommand::UserFetch(content(v)?)))),
        entry(Domain::Direct, direct::NO, |v| Ok(Command::Direct(DirectCommand::No(content(v)?)))),
        entry(Domain::Direct, direct::PLUG_LIST, |_| Ok(Command::Direct(DirectCommand::PlugList))),
        entry(Domain::Direct, direct::SETTINGS_CURRENT, |_| Ok(Command::Direct(DirectCommand::SettingsCurrent))),
        entry(Domain::Direct, direct::SETTINGS_ALL, |_| Ok(Command::Direct(DirectCommand::SettingsAll))),
        entry(Domain::Direct, direct::APP_VERSION, |_| Ok(Command::Direct(DirectCommand::AppVersion))),
        entry(Domain::Direct, direct::USER_GET, |v| Ok(Command::Direct(DirectCommand::UserGet(content(v)?)))),
        entry(Domain::Antenna, antenna::GOT, |v| Ok(Command::Antenna(AntennaCommand::Got(content(v)?)))),
    ];
    entries.into_iter().collect()
});

impl Command {
    /// Resolve a message to a typed command.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the pair is known but `Content` does not
    /// match its schema.
    pub fn decode(msg: &Message) -> Result<Self, serde_json::Error> {
        match DECODERS.get(&(msg.domain.clone(), msg.command.clone())) {
            Some(decode) => decode(&msg.content),
            None => Ok(Self::Unknown {
                domain: msg.domain.clone(),
                command: msg.command.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(domain: Domain, command: &str, content: Value) -> Message {
        Message {
            domain,
            command: command.to_string(),
            content,
            source: Some(1),
        }
    }

    #[test]
    fn test_decode_known_query() {
        let cmd = Command::decode(&msg(
            Domain::Query,
            query::BROAD_CONNECT,
            json!({"BroadID": "https://live.example/watch/lv123", "RetryN": 1}),
        ))
        .unwrap();
        match cmd {
            Command::Query(QueryCommand::BroadConnect(ct)) => {
                assert_eq!(ct.retry_n, 1);
                assert!(ct.broad_id.ends_with("lv123"));
            }
            other => panic!("Expected BroadConnect, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unit_commands_ignore_content() {
        let cmd = Command::decode(&msg(Domain::Direct, direct::PLUG_LIST, Value::Null)).unwrap();
        assert_eq!(cmd, Command::Direct(DirectCommand::PlugList));
    }

    #[test]
    fn test_decode_bad_content_is_error() {
        assert!(Command::decode(&msg(Domain::Query, query::PLUG_ENABLE, json!({"No": "x"}))).is_err());
    }

    #[test]
    fn test_unknown_pairs_fall_back() {
        let cmd = Command::decode(&msg(Domain::Query, "Broad.Explode", json!({}))).unwrap();
        assert_eq!(
            cmd,
            Command::Unknown {
                domain: Domain::Query,
                command: "Broad.Explode".into()
            }
        );
        // Same command name in the wrong domain is unknown too.
        let cmd = Command::decode(&msg(Domain::Direct, query::BROAD_CONNECT, json!({}))).unwrap();
        assert!(matches!(cmd, Command::Unknown { .. }));
    }
}
