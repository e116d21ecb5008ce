use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use shared::{
    domain::{ContentUri, EventId, UserId},
    protocol::{ConversationSummary, MessageContent},
};

use super::{classifier::ChangeVariant, reactions::ReactionSummary};

/// One renderable entry of a conversation's display list. Derived on every
/// pass and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayItem {
    Placeholder,
    Divider(DividerItem),
    Intro(IntroCard),
    TimelineChange(TimelineChangeCard),
    Message(MessageCard),
}

impl DisplayItem {
    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            Self::TimelineChange(card) => Some(&card.event_id),
            Self::Message(card) => Some(&card.event_id),
            Self::Placeholder | Self::Divider(_) | Self::Intro(_) => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageCard> {
        match self {
            Self::Message(card) => Some(card),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DividerItem {
    pub date: NaiveDate,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntroCard {
    pub name: String,
    pub topic: Option<String>,
    pub avatar: Option<ContentUri>,
    pub heading: String,
    pub description: String,
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineChangeCard {
    pub event_id: EventId,
    pub variant: ChangeVariant,
    pub text: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyHeader {
    pub author: UserId,
    pub author_name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageCard {
    pub event_id: EventId,
    pub sender: UserId,
    pub sender_name: String,
    pub avatar: Option<ContentUri>,
    pub time: String,
    pub content: MessageContent,
    pub markdown: bool,
    pub reply: Option<ReplyHeader>,
    pub content_only: bool,
    pub edited: bool,
    pub reactions: Vec<ReactionSummary>,
}

pub(crate) fn local_time(timestamp: DateTime<Utc>, offset: FixedOffset) -> DateTime<FixedOffset> {
    timestamp.with_timezone(&offset)
}

pub(crate) fn divider(date: NaiveDate) -> DisplayItem {
    DisplayItem::Divider(DividerItem {
        date,
        text: date.format("%B %d, %Y").to_string(),
    })
}

pub(crate) fn time_label(timestamp: DateTime<Utc>, offset: FixedOffset) -> String {
    local_time(timestamp, offset).format("%I:%M %p").to_string()
}

pub(crate) fn intro_card(
    profile: &ConversationSummary,
    created: Option<DateTime<FixedOffset>>,
) -> IntroCard {
    let topic_suffix = profile
        .topic
        .as_deref()
        .map(|topic| format!(" Topic: {topic}"))
        .unwrap_or_default();
    IntroCard {
        name: profile.name.clone(),
        topic: profile.topic.clone(),
        avatar: profile.avatar.clone(),
        heading: format!("Welcome to {}", profile.name),
        description: format!(
            "This is the beginning of {} channel.{topic_suffix}",
            profile.name
        ),
        created: created.map(|at| format!("Created at {}", at.format("%d %B %Y, %I:%M %p"))),
    }
}
