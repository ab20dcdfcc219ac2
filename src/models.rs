use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Code;

/// A user's rank inside one channel. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unknown,
    Subscriber,
    Member,
    Admin,
    Superadmin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Unknown,
        Role::Subscriber,
        Role::Member,
        Role::Admin,
        Role::Superadmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unknown => "unknown",
            Role::Subscriber => "subscriber",
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// Capabilities a role can hold inside a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Modify,
    Kick,
    Ban,
    AssignRole,
    RemoveChannel,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
            Permission::Modify => "modify",
            Permission::Kick => "kick",
            Permission::Ban => "ban",
            Permission::AssignRole => "assign_role",
            Permission::RemoveChannel => "remove_channel",
        };
        f.write_str(name)
    }
}

/// A registered account. Lives only in the user store and is never sent to clients.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub per_channel_role: HashMap<u64, Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserMessage {
    New { content: String },
    Edit { message_id: u64, content: String },
    Delete { message_id: u64 },
}

/// Channel configuration changes. The same shape is echoed back once applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigMessage {
    RenameChannel { new_name: String },
    ChangeRole { username: String, role: Role },
    PinMessage { message_id: u64 },
    SetPermission { permission: Permission, roles: Vec<Role> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMessage {
    User(UserMessage),
    Config(ConfigMessage),
}

/// One inbound message on a channel stream.
///
/// `username` may be left empty by clients; the stream fills it in from the
/// authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStreamRequest {
    #[serde(default)]
    pub username: String,
    pub channel_id: u64,
    pub msg: RequestMessage,
}

impl ChannelStreamRequest {
    pub fn new_message(channel_id: u64, content: impl Into<String>) -> Self {
        Self {
            username: String::new(),
            channel_id,
            msg: RequestMessage::User(UserMessage::New {
                content: content.into(),
            }),
        }
    }

    pub fn config(channel_id: u64, msg: ConfigMessage) -> Self {
        Self {
            username: String::new(),
            channel_id,
            msg: RequestMessage::Config(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserResponse {
    NewAndUpdate { timestamp: i64, content: String },
}

/// What a channel actor emits: broadcasts, or sender-only rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    User {
        message_id: u64,
        username: String,
        msg: UserResponse,
    },
    Config {
        username: String,
        msg: ConfigMessage,
    },
    Rejected {
        code: Code,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub code: Code,
    pub message: String,
}

/// One outbound frame on a channel stream. `Status` is always the last one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFrame {
    Event(ChannelEvent),
    Status(StreamStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: u64,
    pub name: String,
    pub is_public: bool,
}
