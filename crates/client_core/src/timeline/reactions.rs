use std::collections::HashMap;

use serde::Serialize;
use shared::{domain::UserId, protocol::ConversationEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionSummary {
    pub key: String,
    pub count: usize,
    pub active: bool,
}

/// Tallies reactions by key in first-seen order. `active` becomes true once
/// any occurrence was sent by `local_user` and is never cleared afterwards.
/// Reactions without a key are skipped.
pub fn aggregate_reactions(
    reactions: &[ConversationEvent],
    local_user: &UserId,
) -> Vec<ReactionSummary> {
    let mut summaries: Vec<ReactionSummary> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for event in reactions {
        let Some(key) = event
            .relation
            .as_ref()
            .and_then(|relation| relation.key.as_deref())
        else {
            continue;
        };
        let mine = &event.sender == local_user;
        match positions.get(key) {
            Some(&index) => {
                let summary = &mut summaries[index];
                summary.count += 1;
                summary.active |= mine;
            }
            None => {
                positions.insert(key, summaries.len());
                summaries.push(ReactionSummary {
                    key: key.to_string(),
                    count: 1,
                    active: mine,
                });
            }
        }
    }

    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::fixtures::reaction;

    #[test]
    fn dedupes_by_key_in_first_seen_order() {
        let me: UserId = "@me:example.org".into();
        let events = vec![
            reaction("$r1", "$m", "@bob:example.org", "👍"),
            reaction("$r2", "$m", "@bob:example.org", "👍"),
            reaction("$r3", "$m", "@bob:example.org", "❤️"),
            reaction("$r4", "$m", "@bob:example.org", "👍"),
        ];
        let summaries = aggregate_reactions(&events, &me);
        assert_eq!(
            summaries,
            vec![
                ReactionSummary {
                    key: "👍".into(),
                    count: 3,
                    active: false,
                },
                ReactionSummary {
                    key: "❤️".into(),
                    count: 1,
                    active: false,
                },
            ]
        );
    }

    #[test]
    fn active_sticks_once_local_user_reacted() {
        let me: UserId = "@me:example.org".into();
        let events = vec![
            reaction("$r1", "$m", "@bob:example.org", "👍"),
            reaction("$r2", "$m", "@me:example.org", "👍"),
            reaction("$r3", "$m", "@carol:example.org", "👍"),
        ];
        let summaries = aggregate_reactions(&events, &me);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].count, 3);
        assert!(summaries[0].active);
    }

    #[test]
    fn skips_reactions_without_key() {
        let me: UserId = "@me:example.org".into();
        let mut keyless = reaction("$r1", "$m", "@bob:example.org", "👍");
        if let Some(relation) = keyless.relation.as_mut() {
            relation.key = None;
        }
        assert!(aggregate_reactions(&[keyless], &me).is_empty());
    }
}
