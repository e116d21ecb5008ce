use shared::domain::EventId;

use crate::timeline::Timeline;

/// Last state reported by a conversation's viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportState {
    pub at_bottom: bool,
    /// Content is taller than the viewport.
    pub scrollable: bool,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            at_bottom: true,
            scrollable: false,
        }
    }
}

/// The event to acknowledge, if any. Nothing is acknowledged while the
/// viewport is scrolled away from the bottom.
pub fn receipt_target(
    viewport: ViewportState,
    has_unread: bool,
    timeline: &Timeline,
) -> Option<EventId> {
    if !viewport.at_bottom || !has_unread {
        return None;
    }
    timeline.latest_event().map(|event| event.id.clone())
}
