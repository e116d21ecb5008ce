use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ConversationId);
id_newtype!(EventId);
id_newtype!(UserId);
id_newtype!(ContentUri);

/// Identifies one in-flight upload so it can be cancelled later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadHandle(pub Uuid);

impl UploadHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ContentUri {
    /// Splits `mxc://<server>/<media id>` into its two parts.
    pub fn parts(&self) -> Option<(&str, &str)> {
        let rest = self.0.strip_prefix("mxc://")?;
        let (server, media_id) = rest.split_once('/')?;
        if server.is_empty() || media_id.is_empty() || media_id.contains('/') {
            return None;
        }
        Some((server, media_id))
    }

    pub fn http_url(&self, base: &Url) -> Option<Url> {
        let (server, media_id) = self.parts()?;
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments
                .pop_if_empty()
                .extend(["_matrix", "media", "r0", "download", server, media_id]);
        }
        Some(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    pub fn from_mime(mime_type: &str) -> Self {
        let top_level = mime_type
            .split_once('/')
            .map(|(top, _)| top)
            .unwrap_or(mime_type);
        match top_level.to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Other,
        }
    }
}
