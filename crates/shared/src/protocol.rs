use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ContentUri, ConversationId, EventId, UserId};

pub const HTML_FORMAT: &str = "org.matrix.custom.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Message,
    Encrypted,
    MemberChange,
    Reaction,
    Redaction,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Reply,
    Edit,
    Reaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Relation {
    pub fn reply(target: impl Into<EventId>) -> Self {
        Self {
            kind: RelationKind::Reply,
            target: target.into(),
            key: None,
        }
    }

    pub fn edit(target: impl Into<EventId>) -> Self {
        Self {
            kind: RelationKind::Edit,
            target: target.into(),
            key: None,
        }
    }

    pub fn reaction(target: impl Into<EventId>, key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Reaction,
            target: target.into(),
            key: Some(key.into()),
        }
    }
}

/// One immutable record of a conversation's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub sender: UserId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub content: EventContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
    #[serde(default)]
    pub redacted: bool,
}

impl ConversationEvent {
    pub fn relation_kind(&self) -> Option<RelationKind> {
        self.relation.as_ref().map(|relation| relation.kind)
    }

    pub fn is_edit(&self) -> bool {
        self.relation_kind() == Some(RelationKind::Edit)
    }

    pub fn message(&self) -> Option<&RoomMessage> {
        match &self.content {
            EventContent::Message(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventContent {
    Message(RoomMessage),
    Membership(MembershipContent),
    Create(CreateContent),
    Redaction {
        redacts: EventId,
    },
    #[default]
    Empty,
}

/// Payload of a message (or decrypted encrypted) event. `content` is `None`
/// when no body could be produced, e.g. an undecryptable event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoomMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<MessageContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msgtype")]
pub enum MessageContent {
    #[serde(rename = "m.text")]
    Text(TextContent),
    #[serde(rename = "m.file")]
    File(FileContent),
    #[serde(rename = "m.image")]
    Image(ImageContent),
    #[serde(rename = "m.audio")]
    Audio(FileContent),
    #[serde(rename = "m.video")]
    Video(VideoContent),
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(TextContent {
            body: body.into(),
            format: None,
            formatted_body: None,
        })
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Text(content) => &content.body,
            Self::File(content) | Self::Audio(content) => &content.body,
            Self::Image(content) => &content.body,
            Self::Video(content) => &content.body,
        }
    }

    pub fn set_body(&mut self, body: String) {
        match self {
            Self::Text(content) => content.body = body,
            Self::File(content) | Self::Audio(content) => content.body = body,
            Self::Image(content) => content.body = body,
            Self::Video(content) => content.body = body,
        }
    }

    pub fn is_markdown(&self) -> bool {
        matches!(self, Self::Text(content) if content.format.as_deref() == Some(HTML_FORMAT))
    }

    pub fn media_source(&self) -> Option<&MediaSource> {
        match self {
            Self::Text(_) => None,
            Self::File(content) | Self::Audio(content) => Some(&content.source),
            Self::Image(content) => Some(&content.source),
            Self::Video(content) => Some(&content.source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaSource {
    Plain { url: ContentUri },
    Encrypted { file: EncryptedFile },
}

impl MediaSource {
    pub fn uri(&self) -> &ContentUri {
        match self {
            Self::Plain { url } => url,
            Self::Encrypted { file } => &file.url,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    pub body: String,
    #[serde(flatten)]
    pub source: MediaSource,
    #[serde(default)]
    pub info: FileInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub body: String,
    #[serde(flatten)]
    pub source: MediaSource,
    #[serde(default)]
    pub info: ImageInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<ContentUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_file: Option<EncryptedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_info: Option<ImageInfo>,
}

impl VideoInfo {
    pub fn thumbnail_uri(&self) -> Option<&ContentUri> {
        self.thumbnail_url
            .as_ref()
            .or_else(|| self.thumbnail_file.as_ref().map(|file| &file.url))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoContent {
    pub body: String,
    #[serde(flatten)]
    pub source: MediaSource,
    #[serde(default)]
    pub info: VideoInfo,
}

/// Key material and integrity hash needed to fetch and decrypt an
/// encrypted attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFile {
    pub url: ContentUri,
    pub alg: String,
    pub key: String,
    pub iv: String,
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    pub v: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Join,
    Leave,
    Invite,
    Ban,
    Knock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipContent {
    pub target: UserId,
    pub membership: Membership,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_membership: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<ContentUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_avatar_url: Option<ContentUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContent {
    pub creator: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<ContentUri>,
    #[serde(default)]
    pub encrypted: bool,
}

/// One page of older history. `next_token == None` means the start of the
/// conversation has been reached.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    pub events: Vec<ConversationEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}
