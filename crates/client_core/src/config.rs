use std::{fs, path::Path};

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub group_window_minutes: i64,
    pub placeholder_count: usize,
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,
    pub utc_offset_minutes: i32,
    pub event_channel_capacity: usize,
    pub media_base_url: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            group_window_minutes: 5,
            placeholder_count: 3,
            thumbnail_max_width: 800,
            thumbnail_max_height: 600,
            utc_offset_minutes: 0,
            event_channel_capacity: 1024,
            media_base_url: None,
        }
    }
}

impl EngineSettings {
    /// Calendar used for day dividers and time labels. Out-of-range offsets
    /// fall back to UTC.
    pub fn display_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or(Utc.fix())
    }

    pub fn media_base_url(&self) -> Option<Url> {
        self.media_base_url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
    }
}

/// Defaults, then `client.toml` in the working directory (if present), then
/// `APP__*` environment variables.
pub fn load_settings() -> Result<EngineSettings, ConfigError> {
    let path = Path::new(DEFAULT_SETTINGS_FILE);
    let mut settings = if path.exists() {
        load_settings_file(path)?
    } else {
        EngineSettings::default()
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

pub fn load_settings_file(path: &Path) -> Result<EngineSettings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_settings(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn parse_settings(raw: &str) -> Result<EngineSettings, toml::de::Error> {
    toml::from_str(raw)
}

pub fn apply_env_overrides(
    settings: &mut EngineSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = lookup("APP__GROUP_WINDOW_MINUTES") {
        settings.group_window_minutes = parse_value("APP__GROUP_WINDOW_MINUTES", v)?;
    }
    if let Some(v) = lookup("APP__PLACEHOLDER_COUNT") {
        settings.placeholder_count = parse_value("APP__PLACEHOLDER_COUNT", v)?;
    }
    if let Some(v) = lookup("APP__THUMBNAIL_MAX_WIDTH") {
        settings.thumbnail_max_width = parse_value("APP__THUMBNAIL_MAX_WIDTH", v)?;
    }
    if let Some(v) = lookup("APP__THUMBNAIL_MAX_HEIGHT") {
        settings.thumbnail_max_height = parse_value("APP__THUMBNAIL_MAX_HEIGHT", v)?;
    }
    if let Some(v) = lookup("APP__UTC_OFFSET_MINUTES") {
        settings.utc_offset_minutes = parse_value("APP__UTC_OFFSET_MINUTES", v)?;
    }
    if let Some(v) = lookup("APP__EVENT_CHANNEL_CAPACITY") {
        settings.event_channel_capacity = parse_value("APP__EVENT_CHANNEL_CAPACITY", v)?;
    }
    if let Some(v) = lookup("APP__MEDIA_BASE_URL") {
        if Url::parse(&v).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "APP__MEDIA_BASE_URL",
                value: v,
            });
        }
        settings.media_base_url = Some(v);
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
