//! Per-conversation event store and the pure derivation of display items
//! from it.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{ContentUri, EventId, UserId},
    protocol::{ConversationEvent, EventContent, EventKind, RelationKind},
};
use tracing::debug;

use crate::error::TimelineError;

pub mod aggregator;
pub mod classifier;
pub mod display;
pub mod edits;
pub mod reactions;
pub mod reply;

pub use aggregator::{build_display_items, AggregationInput};
pub use display::{
    DisplayItem, DividerItem, IntroCard, MessageCard, ReplyHeader, TimelineChangeCard,
};
pub use reactions::ReactionSummary;

/// Resolves user ids to the names and avatars shown on cards.
pub trait IdentityResolver: Send + Sync {
    fn display_name(&self, user: &UserId) -> String;
    fn avatar(&self, user: &UserId) -> Option<ContentUri>;
}

/// Falls back to the localpart of the user id (`@alice:example.org` -> `alice`).
pub struct LocalpartResolver;

impl IdentityResolver for LocalpartResolver {
    fn display_name(&self, user: &UserId) -> String {
        let raw = user.as_str();
        let without_sigil = raw.strip_prefix('@').unwrap_or(raw);
        without_sigil
            .split_once(':')
            .map(|(localpart, _)| localpart)
            .unwrap_or(without_sigil)
            .to_string()
    }

    fn avatar(&self, _user: &UserId) -> Option<ContentUri> {
        None
    }
}

/// Chronological base sequence plus edit/reaction indexes keyed by the
/// target event id. Index lists are kept in edit (or reaction) order.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<ConversationEvent>,
    ids: HashSet<EventId>,
    edits: HashMap<EventId, Vec<ConversationEvent>>,
    reactions: HashMap<EventId, Vec<ConversationEvent>>,
    redactions: HashSet<EventId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_live(&mut self, event: ConversationEvent) -> Result<(), TimelineError> {
        if self.ids.contains(&event.id) {
            return Err(TimelineError::DuplicateEvent(event.id));
        }
        let mut edits = HashMap::new();
        let mut reactions = HashMap::new();
        self.index(&event, &mut edits, &mut reactions);
        for (target, list) in edits {
            self.edits.entry(target).or_default().extend(list);
        }
        for (target, list) in reactions {
            self.reactions.entry(target).or_default().extend(list);
        }
        self.ids.insert(event.id.clone());
        self.events.push(event);
        Ok(())
    }

    /// Prepends an older batch (given oldest first). Events already present
    /// are dropped. Returns how many events were inserted.
    pub fn prepend_history(&mut self, batch: Vec<ConversationEvent>) -> usize {
        let mut accepted = Vec::with_capacity(batch.len());
        let mut edits: HashMap<EventId, Vec<ConversationEvent>> = HashMap::new();
        let mut reactions: HashMap<EventId, Vec<ConversationEvent>> = HashMap::new();
        for event in batch {
            if !self.ids.insert(event.id.clone()) {
                debug!(event_id = %event.id, "timeline: dropping duplicate history event");
                continue;
            }
            self.index(&event, &mut edits, &mut reactions);
            accepted.push(event);
        }

        for (target, list) in edits {
            self.edits.entry(target).or_default().splice(0..0, list);
        }
        for (target, list) in reactions {
            self.reactions.entry(target).or_default().splice(0..0, list);
        }

        let inserted = accepted.len();
        self.events.splice(0..0, accepted);
        inserted
    }

    fn index(
        &mut self,
        event: &ConversationEvent,
        edits: &mut HashMap<EventId, Vec<ConversationEvent>>,
        reactions: &mut HashMap<EventId, Vec<ConversationEvent>>,
    ) {
        if let EventContent::Redaction { redacts } = &event.content {
            self.redactions.insert(redacts.clone());
        }
        let Some(relation) = &event.relation else {
            if event.kind == EventKind::Reaction {
                debug!(event_id = %event.id, "timeline: reaction without relation ignored");
            }
            return;
        };
        if event.kind == EventKind::Reaction {
            reactions
                .entry(relation.target.clone())
                .or_default()
                .push(event.clone());
        } else if relation.kind == RelationKind::Edit {
            edits
                .entry(relation.target.clone())
                .or_default()
                .push(event.clone());
        }
    }

    pub fn events(&self) -> &[ConversationEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.ids.contains(id)
    }

    pub fn first_event(&self) -> Option<&ConversationEvent> {
        self.events.first()
    }

    pub fn latest_event(&self) -> Option<&ConversationEvent> {
        self.events.last()
    }

    pub fn edits_for(&self, id: &EventId) -> &[ConversationEvent] {
        self.edits.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reactions_for(&self, id: &EventId) -> &[ConversationEvent] {
        self.reactions.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_redacted(&self, event: &ConversationEvent) -> bool {
        event.redacted || self.redactions.contains(&event.id)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn rejects_duplicate_live_events() {
        let mut timeline = Timeline::new();
        timeline
            .append_live(text("$1", "@alice:example.org", 0, "hello"))
            .expect("first insert");
        let err = timeline
            .append_live(text("$1", "@alice:example.org", 0, "hello"))
            .expect_err("duplicate id");
        assert_eq!(err, TimelineError::DuplicateEvent("$1".into()));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn prepends_history_before_live_events_and_skips_known_ids() {
        let mut timeline = Timeline::new();
        timeline
            .append_live(text("$3", "@alice:example.org", 3, "three"))
            .expect("live insert");
        let inserted = timeline.prepend_history(vec![
            text("$1", "@alice:example.org", 1, "one"),
            text("$2", "@alice:example.org", 2, "two"),
            text("$3", "@alice:example.org", 3, "three"),
        ]);
        assert_eq!(inserted, 2);
        let ids: Vec<_> = timeline.events().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["$1", "$2", "$3"]);
    }

    #[test]
    fn older_edits_are_indexed_before_newer_ones() {
        let mut timeline = Timeline::new();
        timeline
            .append_live(edit("$e2", "$m", "@alice:example.org", 5, Some("second")))
            .expect("live edit");
        timeline.prepend_history(vec![
            text("$m", "@alice:example.org", 0, "original"),
            edit("$e1", "$m", "@alice:example.org", 1, Some("first")),
        ]);
        let order: Vec<_> = timeline
            .edits_for(&"$m".into())
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(order, vec!["$e1", "$e2"]);
    }

    #[test]
    fn indexes_reactions_and_redactions() {
        let mut timeline = Timeline::new();
        timeline
            .append_live(text("$m", "@alice:example.org", 0, "hi"))
            .expect("message");
        timeline
            .append_live(reaction("$r", "$m", "@bob:example.org", "👍"))
            .expect("reaction");
        timeline
            .append_live(ConversationEvent {
                id: "$x".into(),
                kind: EventKind::Redaction,
                sender: "@alice:example.org".into(),
                timestamp: at(1),
                content: EventContent::Redaction {
                    redacts: "$m".into(),
                },
                relation: None,
                redacted: false,
            })
            .expect("redaction");

        assert_eq!(timeline.reactions_for(&"$m".into()).len(), 1);
        let message = &timeline.events()[0];
        assert!(timeline.is_redacted(message));
    }

    #[test]
    fn localpart_resolver_strips_sigil_and_server() {
        assert_eq!(
            LocalpartResolver.display_name(&"@alice:example.org".into()),
            "alice"
        );
        assert_eq!(LocalpartResolver.display_name(&"bob".into()), "bob");
    }
}
