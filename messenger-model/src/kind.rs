use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The record types held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Chatroom,
    User,
    Message,
}

impl RecordKind {
    /// Every kind, in a stable order.
    pub const ALL: [RecordKind; 3] = [Self::Chatroom, Self::User, Self::Message];

    /// The name used in storage and in remote change notifications.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chatroom => "chatroom",
            Self::User => "user",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type name that does not match any [`RecordKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown record type: {0:?}")]
pub struct UnknownRecordKind(pub String);

impl FromStr for RecordKind {
    type Err = UnknownRecordKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chatroom" => Ok(Self::Chatroom),
            "user" => Ok(Self::User),
            "message" => Ok(Self::Message),
            _ => Err(UnknownRecordKind(s.to_string())),
        }
    }
}
