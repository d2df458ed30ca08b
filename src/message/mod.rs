//! Messages exchanged between plugins and the hub.
//!
//! Every boundary speaks the same unit, one JSON object per line:
//!
//! ```text
//! {"Domain":"nagome_query","Command":"Broad.Connect","Content":{"BroadID":"lv1","RetryN":0}}
//! ```
//!
//! `Domain` selects routing (event fan-out vs. command execution) and,
//! together with `Command`, the schema of `Content`. Typed decoding of
//! the known commands lives in [`command`]; payload structs in [`content`].

pub mod command;
pub mod content;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use command::{AntennaCommand, Command, DirectCommand, QueryCommand};

/// Routing domain of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Domain {
    /// Events broadcast from the hub to subscribed plugins.
    Nagome,
    /// Commands that change hub state or drive the broadcast protocol.
    Query,
    /// Requests answered only to the requesting plugin.
    Direct,
    /// Replies and notices addressed to a single plugin.
    Directngm,
    /// Notices from the broadcast alert feed.
    Antenna,
    /// Plugin-defined domain; routed by subscription only.
    Custom(String),
}

impl Domain {
    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Nagome => "nagome",
            Self::Query => "nagome_query",
            Self::Direct => "nagome_direct",
            Self::Directngm => "nagome_directngm",
            Self::Antenna => "nagome_antenna",
            Self::Custom(name) => name,
        }
    }

    /// Whether messages of this domain are executed by the hub's dispatcher
    /// rather than fanned out.
    pub fn is_command(&self) -> bool {
        matches!(self, Self::Query | Self::Direct | Self::Antenna)
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        match s.as_str() {
            "nagome" => Self::Nagome,
            "nagome_query" => Self::Query,
            "nagome_direct" => Self::Direct,
            "nagome_directngm" => Self::Directngm,
            "nagome_antenna" => Self::Antenna,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Domain> for String {
    fn from(d: Domain) -> Self {
        match d {
            Domain::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Routing domain.
    pub domain: Domain,
    /// Command within the domain.
    pub command: String,
    /// Payload; schema depends on `domain` and `command`.
    #[serde(default)]
    pub content: Value,
    /// Index of the plugin that sent this message, if any.
    #[serde(skip)]
    pub source: Option<usize>,
}

impl Message {
    /// Build a message with a serialized payload.
    pub fn new<T: Serialize>(
        domain: Domain,
        command: &str,
        content: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            domain,
            command: command.to_string(),
            content: serde_json::to_value(content)?,
            source: None,
        })
    }

    /// Build a message with an empty object payload.
    pub fn empty(domain: Domain, command: &str) -> Self {
        Self {
            domain,
            command: command.to_string(),
            content: Value::Object(serde_json::Map::new()),
            source: None,
        }
    }

    /// Tag the message with the plugin it came from.
    #[must_use]
    pub fn with_source(mut self, no: usize) -> Self {
        self.source = Some(no);
        self
    }

    /// Decode the payload.
    pub fn decode_content<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.content)
    }

    /// `UI.Notification` event.
    pub fn notification(
        kind: content::NotificationType,
        title: &str,
        description: &str,
    ) -> Self {
        let content = content::Notification {
            kind,
            title: title.to_string(),
            description: description.to_string(),
        };
        // A plain struct of strings always serializes.
        Self::new(Domain::Nagome, command::event::UI_NOTIFICATION, &content)
            .unwrap_or_else(|_| Self::empty(Domain::Nagome, command::event::UI_NOTIFICATION))
    }

    /// Serialize to one wire line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
