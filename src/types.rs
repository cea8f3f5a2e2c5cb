//! Workspace records as they are exported.
//!
//! Only the fields the exporter reasons about are modelled; everything else the
//! API returns is kept in `extra` so the written JSON stays close to Slack's
//! own export. `serde_json::Map` is key-sorted, which keeps output byte-stable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_bot: false,
            deleted: false,
            extra: Map::new(),
        }
    }
}

/// Users keyed by ID. Built once per run, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct UserIndex(HashMap<String, User>);

impl UserIndex {
    pub fn get(&self, id: &str) -> Option<&User> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[User]> for UserIndex {
    fn from(users: &[User]) -> Self {
        Self(users.iter().map(|u| (u.id.clone(), u.clone())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_normalized: String,
    #[serde(default)]
    pub is_im: bool,
    /// Peer user of a direct message channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Channel {
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            name_normalized: name.clone(),
            name,
            is_im: false,
            user: None,
            extra: Map::new(),
        }
    }

    pub fn im(id: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            name_normalized: String::new(),
            is_im: true,
            user: Some(peer.into()),
            extra: Map::new(),
        }
    }

    /// Human readable label for logs: the name if any, otherwise the ID.
    pub fn label(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private_download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl File {
    pub fn download_url(&self) -> Option<&str> {
        self.url_private_download
            .as_deref()
            .or(self.url_private.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(ts: impl Into<String>, user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            user: Some(user.into()),
            text: Some(text.into()),
            thread_ts: None,
            reply_count: None,
            files: Vec::new(),
            extra: Map::new(),
        }
    }

    /// A message that starts a thread with at least one reply.
    pub fn is_thread_parent(&self) -> bool {
        self.reply_count.unwrap_or(0) > 0 && self.thread_ts.as_deref() == Some(self.ts.as_str())
    }
}

/// A file discovered in a message, waiting to be downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    pub file_id: String,
    pub name: String,
    pub url: String,
    pub channel_id: String,
}

/// Collects the downloadable files of a batch of messages. Files without a
/// URL (e.g. external or tombstoned) are left out.
pub fn extract_files(messages: &[Message], channel_id: &str) -> Vec<AttachmentRef> {
    messages
        .iter()
        .flat_map(|m| m.files.iter())
        .filter_map(|f| {
            let url = f.download_url()?;
            Some(AttachmentRef {
                file_id: f.id.clone(),
                name: f.name.clone(),
                url: url.to_string(),
                channel_id: channel_id.to_string(),
            })
        })
        .collect()
}

/// Conversation categories requested from `conversations.list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Mpim,
    Im,
    Public,
    Private,
}

impl ChannelType {
    pub const ALL: [ChannelType; 4] = [
        ChannelType::Mpim,
        ChannelType::Im,
        ChannelType::Public,
        ChannelType::Private,
    ];
}

/// Lower and upper bound of the exported history, as Slack timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeWindow {
    pub oldest: Option<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UsersPage {
    pub users: Vec<User>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelsPage {
    pub channels: Vec<Channel>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MessagesPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}
