//! Typed `Content` payloads.

use serde::{Deserialize, Serialize};

use crate::plugin::PluginState;

/// `Broad.Connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BroadConnect {
    /// Free text containing a broadcast ID (`lv…` or `co…`).
    #[serde(rename = "BroadID")]
    pub broad_id: String,
    /// Failed attempts so far; set by the hub when it requeues.
    #[serde(default)]
    pub retry_n: u32,
}

/// How `Broad.SendComment` should be posted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendCommentType {
    /// Follow the `owner_comment` setting.
    #[default]
    #[serde(rename = "")]
    Auto,
    /// Owner comment when the account owns the broadcast.
    #[serde(rename = "owner")]
    Owner,
    /// Always a viewer comment.
    #[serde(rename = "viewer")]
    Viewer,
}

/// `Broad.SendComment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BroadSendComment {
    /// Comment text.
    pub text: String,
    /// Post anonymously.
    #[serde(default)]
    pub iyayo: bool,
    /// Owner or viewer path.
    #[serde(rename = "Type", default)]
    pub kind: SendCommentType,
}

/// `Account.Set`. Empty fields leave the current value unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AccountSet {
    /// Mail address.
    pub mail: String,
    /// Password.
    pub pass: String,
    /// Session token.
    pub usersession: String,
}

/// `Log.Print`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogPrint {
    /// Line to log.
    pub text: String,
}

/// `Plug.Enable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlugEnable {
    /// Plugin index.
    pub no: usize,
    /// Target state.
    pub enable: bool,
}

/// `Direct.No` handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginNo {
    /// Plugin index the connection fulfils.
    pub no: usize,
}

/// `User.SetName`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserSetName {
    /// User ID.
    #[serde(rename = "ID")]
    pub id: String,
    /// New display name.
    pub name: String,
}

/// Payload naming one user (`User.Delete`, `User.Fetch`, `User.Get`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// User ID.
    #[serde(rename = "ID")]
    pub id: String,
}

/// `Antenna.Got`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AntennaGot {
    /// Newly started broadcast.
    #[serde(rename = "BroadID")]
    pub broad_id: String,
    /// Its community.
    #[serde(rename = "CommunityID")]
    pub community_id: String,
    /// Its broadcaster.
    #[serde(rename = "UserID")]
    pub user_id: String,
}

/// Severity of a `UI.Notification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    /// Informational.
    Info,
    /// Something went wrong.
    Warn,
}

/// `UI.Notification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    /// Severity.
    #[serde(rename = "Type")]
    pub kind: NotificationType,
    /// Short title.
    pub title: String,
    /// Details.
    pub description: String,
}

/// `App.Version` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppVersion {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// One entry of a `Plug.List` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlugInfo {
    /// Plugin index.
    pub no: usize,
    /// Plugin name.
    pub name: String,
    /// Description from the manifest.
    pub description: String,
    /// Version from the manifest.
    pub version: String,
    /// Author from the manifest.
    pub author: String,
    /// Subscribed domains.
    pub subscribe: Vec<String>,
    /// Current state.
    pub state: PluginState,
}

/// `Plug.List` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlugList {
    /// Every registered plugin, by index.
    pub plugins: Vec<PlugInfo>,
}
