use shared::{domain::EventId, protocol::MessageContent};

use super::Timeline;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditResolution<'a> {
    Unedited,
    Edited(&'a MessageContent),
    /// The latest edit carries no replacement content; the target renders
    /// nothing rather than falling back to its pre-edit content.
    Suppressed,
}

/// Only the most recently appended edit counts.
pub fn resolve_edit<'a>(timeline: &'a Timeline, id: &EventId) -> EditResolution<'a> {
    let Some(latest) = timeline.edits_for(id).last() else {
        return EditResolution::Unedited;
    };
    match latest.message().and_then(|message| message.new_content.as_ref()) {
        Some(content) => EditResolution::Edited(content),
        None => EditResolution::Suppressed,
    }
}
