//! Broadcast metadata resolved by `FetchInformation`.
//!
//! A [`LiveWaku`] is everything the hub needs to open a comment session:
//! stream attributes, the viewing user, and the comment server address.
//! It is built from the site's `getplayerstatus` document:
//!
//! ```text
//! <getplayerstatus status="ok">
//!   <stream> id title description default_community owner_id ... </stream>
//!   <user>   user_id nickname is_premium </user>
//!   <ms>     addr port thread </ms>
//! </getplayerstatus>
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::NicoError;
use super::xml;

/// Attributes of the broadcast stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamInfo {
    /// Broadcast title.
    pub title: String,
    /// Broadcast description.
    pub description: String,
    /// Community the broadcast belongs to.
    #[serde(rename = "CommunityID")]
    pub community_id: String,
    /// User ID of the broadcaster.
    #[serde(rename = "OwnerID")]
    pub owner_id: String,
    /// Display name of the broadcaster.
    pub owner_name: String,
    /// Time the broadcast room opened. Comment `vpos` is relative to this.
    pub open_time: DateTime<Utc>,
    /// Time the broadcast started.
    pub start_time: DateTime<Utc>,
    /// Scheduled end time.
    pub end_time: DateTime<Utc>,
}

/// The viewing account as seen by the broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserInfo {
    /// Account user ID.
    #[serde(rename = "UserID")]
    pub user_id: String,
    /// Account nickname.
    pub nickname: String,
    /// Premium membership.
    pub is_premium: bool,
}

/// Comment server endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommentServer {
    /// Host name.
    pub addr: String,
    /// TCP port.
    pub port: u16,
    /// Thread ID of the broadcast's comment thread.
    pub thread: String,
}

/// Resolved broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LiveWaku {
    /// Broadcast ID (`lv…`).
    #[serde(rename = "BroadID")]
    pub broad_id: String,
    /// Stream attributes.
    pub stream: StreamInfo,
    /// Viewing user.
    pub user: UserInfo,
    /// Comment server endpoint.
    pub comment_server: CommentServer,
}

impl LiveWaku {
    /// Whether the logged-in account is the broadcaster.
    pub fn is_user_owner(&self) -> bool {
        !self.stream.owner_id.is_empty() && self.stream.owner_id == self.user.user_id
    }

    /// `host:port` of the comment server.
    pub fn comment_addr(&self) -> String {
        format!("{}:{}", self.comment_server.addr, self.comment_server.port)
    }
}

/// Map an API `status="fail"` error code to an error kind.
pub(crate) fn classify_fail_code(code: &str) -> NicoError {
    match code {
        "closed" => NicoError::ClosedBroadcast(code.to_string()),
        "notlogin" | "incorrect_account" => NicoError::IncorrectAccount(code.to_string()),
        _ => NicoError::Other(format!("api error: {code}")),
    }
}

/// Check the root `status` attribute of an API document.
pub(crate) fn check_status(doc: &str, root: &str) -> Result<(), NicoError> {
    match xml::root_attr(doc, root, "status").as_deref() {
        Some("ok") => Ok(()),
        Some("fail") => {
            let code = xml::section(doc, "error")
                .and_then(|e| xml::child_text(e, "code"))
                .unwrap_or_default();
            Err(classify_fail_code(&code))
        }
        _ => Err(NicoError::Protocol(format!("no <{root} status> in response"))),
    }
}

fn unix_time(section: &str, tag: &str) -> DateTime<Utc> {
    xml::child_text(section, tag)
        .and_then(|t| t.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_default()
}

/// Build a [`LiveWaku`] from a `getplayerstatus` document.
pub fn parse_player_status(broad_id: &str, doc: &str) -> Result<LiveWaku, NicoError> {
    check_status(doc, "getplayerstatus")?;

    let missing = |what: &str| NicoError::Protocol(format!("getplayerstatus: missing {what}"));
    let stream = xml::section(doc, "stream").ok_or_else(|| missing("stream"))?;
    let user = xml::section(doc, "user").ok_or_else(|| missing("user"))?;
    let ms = xml::section(doc, "ms").ok_or_else(|| missing("ms"))?;

    let text = |section: &str, tag: &str| xml::child_text(section, tag).unwrap_or_default();

    let port = text(ms, "port")
        .parse::<u16>()
        .map_err(|e| NicoError::Protocol(format!("getplayerstatus: bad port: {e}")))?;
    let addr = text(ms, "addr");
    let thread = text(ms, "thread");
    if addr.is_empty() || thread.is_empty() {
        return Err(missing("comment server"));
    }

    let id = text(stream, "id");
    Ok(LiveWaku {
        broad_id: if id.is_empty() { broad_id.to_string() } else { id },
        stream: StreamInfo {
            title: text(stream, "title"),
            description: text(stream, "description"),
            community_id: text(stream, "default_community"),
            owner_id: text(stream, "owner_id"),
            owner_name: text(stream, "owner_name"),
            open_time: unix_time(stream, "open_time"),
            start_time: unix_time(stream, "start_time"),
            end_time: unix_time(stream, "end_time"),
        },
        user: UserInfo {
            user_id: text(user, "user_id"),
            nickname: text(user, "nickname"),
            is_premium: text(user, "is_premium") == "1",
        },
        comment_server: CommentServer { addr, port, thread },
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A `getplayerstatus` document for tests.
    pub(crate) fn player_status(owner_id: &str, addr: &str, port: u16) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<getplayerstatus status="ok" time="1500000000">
<stream><id>lv12345</id><title>test &amp; stream</title><description>desc</description>
<default_community>co999</default_community><owner_id>{owner_id}</owner_id>
<owner_name>owner</owner_name><open_time>1500000000</open_time>
<start_time>1500000060</start_time><end_time>1500001800</end_time></stream>
<user><user_id>42</user_id><nickname>viewer</nickname><is_premium>1</is_premium></user>
<ms><addr>{addr}</addr><port>{port}</port><thread>1000</thread></ms>
</getplayerstatus>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_player_status() {
        let doc = fixtures::player_status("7", "msg.example.com", 2805);
        let waku = parse_player_status("lv12345", &doc).unwrap();
        assert_eq!(waku.broad_id, "lv12345");
        assert_eq!(waku.stream.title, "test & stream");
        assert_eq!(waku.stream.community_id, "co999");
        assert_eq!(waku.stream.open_time.timestamp(), 1_500_000_000);
        assert_eq!(waku.user.user_id, "42");
        assert!(waku.user.is_premium);
        assert_eq!(waku.comment_addr(), "msg.example.com:2805");
        assert_eq!(waku.comment_server.thread, "1000");
        assert!(!waku.is_user_owner());
    }

    #[test]
    fn test_owner_detection() {
        let doc = fixtures::player_status("42", "h", 1);
        assert!(parse_player_status("lv1", &doc).unwrap().is_user_owner());
    }

    #[test]
    fn test_fail_codes_are_classified() {
        let fail = |code: &str| {
            format!(r#"<getplayerstatus status="fail"><error><code>{code}</code></error></getplayerstatus>"#)
        };
        assert!(matches!(
            parse_player_status("lv1", &fail("closed")),
            Err(NicoError::ClosedBroadcast(_))
        ));
        assert!(matches!(
            parse_player_status("lv1", &fail("notlogin")),
            Err(NicoError::IncorrectAccount(_))
        ));
        assert!(matches!(
            parse_player_status("lv1", &fail("comingsoon")),
            Err(NicoError::Other(_))
        ));
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        assert!(matches!(
            parse_player_status("lv1", "<html>maintenance</html>"),
            Err(NicoError::Protocol(_))
        ));
    }

    #[test]
    fn test_wire_field_names() {
        let waku = LiveWaku {
            broad_id: "lv1".into(),
            ..LiveWaku::default()
        };
        let json = serde_json::to_value(&waku).unwrap();
        assert_eq!(json["BroadID"], "lv1");
        assert!(json["Stream"].get("CommunityID").is_some());
        assert!(json["User"].get("UserID").is_some());
        assert!(json["CommentServer"].get("Thread").is_some());
    }
}
