use std::iter;

use shared::{
    domain::UserId,
    protocol::{ConversationEvent, ConversationSummary, EventKind},
};

use super::{
    classifier::{classify, ClassifyContext},
    display::{divider, intro_card, local_time, DisplayItem},
    IdentityResolver, Timeline,
};
use crate::config::EngineSettings;

/// Snapshot the display list is derived from.
pub struct AggregationInput<'a> {
    pub timeline: &'a Timeline,
    pub reached_start: bool,
    pub profile: &'a ConversationSummary,
    pub identity: &'a dyn IdentityResolver,
    pub local_user: &'a UserId,
    pub settings: &'a EngineSettings,
}

/// Pure and idempotent: the same input always yields the same list. Each
/// event is classified on its own, so a malformed event only drops its own
/// card.
pub fn build_display_items(input: &AggregationInput<'_>) -> Vec<DisplayItem> {
    let offset = input.settings.display_offset();
    let mut items = Vec::with_capacity(input.timeline.len() + input.settings.placeholder_count);
    let mut intro_rendered = false;

    let starts_at_creation = input
        .timeline
        .first_event()
        .is_some_and(|event| event.kind == EventKind::Create);
    if !starts_at_creation {
        if input.reached_start {
            items.push(DisplayItem::Intro(intro_card(input.profile, None)));
            intro_rendered = true;
        } else {
            items.extend(iter::repeat(DisplayItem::Placeholder).take(input.settings.placeholder_count));
        }
    }

    let mut previous: Option<&ConversationEvent> = None;
    for event in input.timeline.events() {
        let ctx = ClassifyContext {
            timeline: input.timeline,
            profile: input.profile,
            identity: input.identity,
            local_user: input.local_user,
            settings: input.settings,
            previous,
            intro_rendered,
        };
        let Some(item) = classify(event, &ctx) else {
            continue;
        };

        if let DisplayItem::Intro(_) = item {
            intro_rendered = true;
            items.push(item);
            continue;
        }

        let date = local_time(event.timestamp, offset).date_naive();
        if let Some(prev) = previous {
            if local_time(prev.timestamp, offset).date_naive() != date {
                items.push(divider(date));
            }
        }
        previous = Some(event);
        items.push(item);
    }

    items
}
