use serde::Serialize;
use shared::{
    domain::UserId,
    protocol::{
        ConversationEvent, ConversationSummary, EventContent, EventKind, Membership,
        MembershipContent, MessageContent, RelationKind,
    },
};

use super::{
    display::{intro_card, local_time, time_label, DisplayItem, MessageCard, ReplyHeader,
        TimelineChangeCard},
    edits::{resolve_edit, EditResolution},
    reactions::aggregate_reactions,
    reply::parse_reply,
    IdentityResolver, Timeline,
};
use crate::config::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeVariant {
    Join,
    Leave,
    Invite,
    RejectInvite,
    WithdrawInvite,
    Kick,
    Ban,
    Unban,
    NameChange,
    AvatarChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineChange {
    pub variant: ChangeVariant,
    pub text: String,
}

/// Everything the classifier may look at besides the event itself.
pub struct ClassifyContext<'a> {
    pub timeline: &'a Timeline,
    pub profile: &'a ConversationSummary,
    pub identity: &'a dyn IdentityResolver,
    pub local_user: &'a UserId,
    pub settings: &'a EngineSettings,
    /// Last event that produced a message or timeline-change card.
    pub previous: Option<&'a ConversationEvent>,
    pub intro_rendered: bool,
}

/// Maps one event to its card, or `None` when the event renders nothing.
/// Day dividers are the aggregator's concern.
pub fn classify(event: &ConversationEvent, ctx: &ClassifyContext<'_>) -> Option<DisplayItem> {
    if event.kind == EventKind::Create {
        if ctx.intro_rendered {
            return None;
        }
        let created = local_time(event.timestamp, ctx.settings.display_offset());
        return Some(DisplayItem::Intro(intro_card(ctx.profile, Some(created))));
    }

    if !matches!(
        event.kind,
        EventKind::Message | EventKind::Encrypted | EventKind::MemberChange
    ) {
        return None;
    }
    if event.is_edit() || ctx.timeline.is_redacted(event) {
        return None;
    }

    if event.kind == EventKind::MemberChange {
        let EventContent::Membership(content) = &event.content else {
            return None;
        };
        let change = timeline_change(event, content, ctx.identity)?;
        return Some(DisplayItem::TimelineChange(TimelineChangeCard {
            event_id: event.id.clone(),
            variant: change.variant,
            text: change.text,
            time: time_label(event.timestamp, ctx.settings.display_offset()),
        }));
    }

    message_card(event, ctx).map(DisplayItem::Message)
}

fn message_card(event: &ConversationEvent, ctx: &ClassifyContext<'_>) -> Option<MessageCard> {
    let original = event.message()?.content.as_ref()?;
    let mut content = original.clone();
    let mut markdown = original.is_markdown();

    let mut reply = None;
    if event.relation_kind() == Some(RelationKind::Reply) {
        if let Some(parsed) = parse_reply(original.body()) {
            reply = Some(ReplyHeader {
                author_name: ctx.identity.display_name(&parsed.author),
                author: parsed.author,
                body: parsed.quoted,
            });
            content.set_body(parsed.remainder);
        }
    }

    let mut edited = false;
    match resolve_edit(ctx.timeline, &event.id) {
        EditResolution::Unedited => {}
        EditResolution::Suppressed => return None,
        EditResolution::Edited(replacement) => {
            let body = match parse_reply(replacement.body()) {
                Some(parsed) => parsed.remainder,
                None => replacement.body().to_string(),
            };
            let both_text = matches!(
                (&content, replacement),
                (MessageContent::Text(_), MessageContent::Text(_))
            );
            if both_text {
                content = replacement.clone();
            }
            content.set_body(body);
            markdown = replacement.is_markdown();
            edited = true;
        }
    }

    let content_only = ctx.previous.is_some_and(|previous| {
        previous.kind != EventKind::MemberChange
            && previous.sender == event.sender
            && (event.timestamp - previous.timestamp).num_seconds().abs()
                <= ctx.settings.group_window_minutes * 60
    });

    Some(MessageCard {
        event_id: event.id.clone(),
        sender: event.sender.clone(),
        sender_name: ctx.identity.display_name(&event.sender),
        avatar: ctx.identity.avatar(&event.sender),
        time: time_label(event.timestamp, ctx.settings.display_offset()),
        content,
        markdown,
        reply,
        content_only,
        edited,
        reactions: aggregate_reactions(ctx.timeline.reactions_for(&event.id), ctx.local_user),
    })
}

/// Human-readable description of a membership change, or `None` when the
/// change has nothing to show (e.g. a re-join with identical profile).
pub fn timeline_change(
    event: &ConversationEvent,
    content: &MembershipContent,
    identity: &dyn IdentityResolver,
) -> Option<TimelineChange> {
    let sender = identity.display_name(&event.sender);
    let target = content
        .displayname
        .clone()
        .unwrap_or_else(|| identity.display_name(&content.target));
    let self_change = event.sender == content.target;

    let (variant, text) = match (content.membership, content.prev_membership) {
        (Membership::Join, Some(Membership::Join)) => {
            if content.displayname != content.prev_displayname {
                let previous = content
                    .prev_displayname
                    .clone()
                    .unwrap_or_else(|| identity.display_name(&content.target));
                let text = match &content.displayname {
                    Some(name) => format!("{previous} changed their display name to {name}"),
                    None => format!("{previous} removed their display name"),
                };
                (ChangeVariant::NameChange, text)
            } else if content.avatar_url != content.prev_avatar_url {
                (
                    ChangeVariant::AvatarChange,
                    format!("{target} changed their avatar"),
                )
            } else {
                return None;
            }
        }
        (Membership::Join, _) => (ChangeVariant::Join, format!("{target} joined the room")),
        (Membership::Invite, _) => (
            ChangeVariant::Invite,
            format!("{sender} invited {target}"),
        ),
        (Membership::Leave, Some(Membership::Invite)) if self_change => (
            ChangeVariant::RejectInvite,
            format!("{target} rejected the invitation"),
        ),
        (Membership::Leave, Some(Membership::Leave)) => return None,
        (Membership::Leave, _) if self_change => (
            ChangeVariant::Leave,
            with_reason(format!("{target} left the room"), content),
        ),
        (Membership::Leave, Some(Membership::Ban)) => (
            ChangeVariant::Unban,
            format!("{sender} unbanned {target}"),
        ),
        (Membership::Leave, Some(Membership::Invite)) => (
            ChangeVariant::WithdrawInvite,
            format!("{sender} canceled {target}'s invite"),
        ),
        (Membership::Leave, _) => (
            ChangeVariant::Kick,
            with_reason(format!("{sender} kicked {target}"), content),
        ),
        (Membership::Ban, _) => (
            ChangeVariant::Ban,
            with_reason(format!("{sender} banned {target}"), content),
        ),
        (Membership::Knock, _) => return None,
    };

    Some(TimelineChange { variant, text })
}

fn with_reason(text: String, content: &MembershipContent) -> String {
    match content.reason.as_deref() {
        Some(reason) if !reason.trim().is_empty() => format!("{text}: {reason}"),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{fixtures::*, LocalpartResolver};

    fn membership(event: &ConversationEvent) -> &MembershipContent {
        match &event.content {
            EventContent::Membership(content) => content,
            _ => panic!("expected membership content"),
        }
    }

    fn change(event: &ConversationEvent) -> Option<TimelineChange> {
        timeline_change(event, membership(event), &LocalpartResolver)
    }

    #[test]
    fn describes_join_leave_and_kick() {
        let join = member("$1", "@bob:x", "@bob:x", 0, Membership::Join, None);
        assert_eq!(change(&join).expect("join").text, "bob joined the room");

        let leave = member("$2", "@bob:x", "@bob:x", 0, Membership::Leave, Some(Membership::Join));
        assert_eq!(change(&leave).expect("leave").variant, ChangeVariant::Leave);

        let kick = member("$3", "@mod:x", "@bob:x", 0, Membership::Leave, Some(Membership::Join));
        let kick = change(&kick).expect("kick");
        assert_eq!(kick.variant, ChangeVariant::Kick);
        assert_eq!(kick.text, "mod kicked bob");
    }

    #[test]
    fn distinguishes_invite_outcomes() {
        let reject = member("$1", "@bob:x", "@bob:x", 0, Membership::Leave, Some(Membership::Invite));
        assert_eq!(change(&reject).expect("reject").variant, ChangeVariant::RejectInvite);

        let withdraw = member("$2", "@mod:x", "@bob:x", 0, Membership::Leave, Some(Membership::Invite));
        assert_eq!(change(&withdraw).expect("withdraw").variant, ChangeVariant::WithdrawInvite);

        let unban = member("$3", "@mod:x", "@bob:x", 0, Membership::Leave, Some(Membership::Ban));
        assert_eq!(change(&unban).expect("unban").variant, ChangeVariant::Unban);
    }

    #[test]
    fn profile_changes_and_no_ops() {
        let mut rename = member("$1", "@bob:x", "@bob:x", 0, Membership::Join, Some(Membership::Join));
        if let EventContent::Membership(content) = &mut rename.content {
            content.prev_displayname = Some("Bob".into());
            content.displayname = Some("Robert".into());
        }
        assert_eq!(
            change(&rename).expect("rename").text,
            "Bob changed their display name to Robert"
        );

        let rejoin = member("$2", "@bob:x", "@bob:x", 0, Membership::Join, Some(Membership::Join));
        assert!(change(&rejoin).is_none());
    }
}
