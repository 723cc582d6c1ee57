//! Normalized events handed to the bot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::payload::{AttachmentRaw, ItemKind, Message, MessagingItem};

/// A user action, or a problem with an inbound request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The webhook was called with a request it could not accept.
    Error { text: String },
    /// The user sent text.
    Message {
        chat_id: i64,
        time: DateTime<Utc>,
        text: String,
        message_id: String,
    },
    /// The user tapped a quick reply or a postback button.
    ///
    /// `reference` is only set when a Get Started postback was reached
    /// through a referral link.
    Payload {
        chat_id: i64,
        time: DateTime<Utc>,
        payload: String,
        reference: String,
    },
    /// The user read everything sent up to `time`.
    Read { chat_id: i64, time: DateTime<Utc> },
    /// The user sent files, images, stickers or shared links.
    Attachment {
        chat_id: i64,
        time: DateTime<Utc>,
        message_id: String,
        attachments: Vec<Attachment>,
    },
    /// The user arrived through a referral (m.me link, ad, ...).
    Referral {
        chat_id: i64,
        time: DateTime<Utc>,
        reference: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Error,
    Message,
    Payload,
    Read,
    Attachment,
    Referral,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Error => write!(f, "error"),
            EventKind::Message => write!(f, "message"),
            EventKind::Payload => write!(f, "payload"),
            EventKind::Read => write!(f, "read"),
            EventKind::Attachment => write!(f, "attachment"),
            EventKind::Referral => write!(f, "referral"),
        }
    }
}

/// One attachment of an [`Event::Attachment`].
///
/// `kind` is one of "image", "video", "audio", "location", "file",
/// "feedback" or "fallback". Stickers arrive as "image" with a non-zero
/// `sticker_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub sticker_id: i64,
}

impl Event {
    pub(crate) fn error(text: impl Into<String>) -> Self {
        Event::Error { text: text.into() }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Error { .. } => EventKind::Error,
            Event::Message { .. } => EventKind::Message,
            Event::Payload { .. } => EventKind::Payload,
            Event::Read { .. } => EventKind::Read,
            Event::Attachment { .. } => EventKind::Attachment,
            Event::Referral { .. } => EventKind::Referral,
        }
    }

    /// The user the event belongs to; `None` for errors.
    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Event::Error { .. } => None,
            Event::Message { chat_id, .. }
            | Event::Payload { chat_id, .. }
            | Event::Read { chat_id, .. }
            | Event::Attachment { chat_id, .. }
            | Event::Referral { chat_id, .. } => Some(*chat_id),
        }
    }

    /// When the event happened; `None` for errors.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            Event::Error { .. } => None,
            Event::Message { time, .. }
            | Event::Payload { time, .. }
            | Event::Read { time, .. }
            | Event::Attachment { time, .. }
            | Event::Referral { time, .. } => Some(*time),
        }
    }
}

/// Turns one messaging item into the event the bot should see.
///
/// Returns `None` for echoes of the bot's own messages and for items that
/// carry nothing we understand.
pub fn classify(item: &MessagingItem) -> Option<Event> {
    let chat_id = item.sender_id;
    let time = ms_to_time(item.timestamp);

    match &item.kind {
        ItemKind::Postback(postback) => Some(Event::Payload {
            chat_id,
            time,
            payload: postback.payload.clone(),
            reference: postback
                .referral
                .as_ref()
                .map(|r| r.reference.clone())
                .unwrap_or_default(),
        }),
        ItemKind::Read(read) => Some(Event::Read {
            chat_id,
            time: ms_to_time(read.watermark),
        }),
        ItemKind::Referral(referral) => Some(Event::Referral {
            chat_id,
            time,
            reference: referral.reference.clone(),
        }),
        ItemKind::Message(message) => classify_message(chat_id, time, message),
        ItemKind::Unsupported => None,
    }
}

fn classify_message(chat_id: i64, time: DateTime<Utc>, message: &Message) -> Option<Event> {
    if message.is_echo {
        return None;
    }

    if let Some(quick_reply) = &message.quick_reply {
        return Some(Event::Payload {
            chat_id,
            time,
            payload: quick_reply.payload.clone(),
            reference: String::new(),
        });
    }

    let message_id = message.mid.clone().unwrap_or_default();

    match message.attachments.as_deref() {
        Some(attachments) if !attachments.is_empty() => Some(Event::Attachment {
            chat_id,
            time,
            message_id,
            attachments: attachments.iter().map(normalize_attachment).collect(),
        }),
        _ => Some(Event::Message {
            chat_id,
            time,
            text: message.text.clone().unwrap_or_default(),
            message_id,
        }),
    }
}

fn normalize_attachment(raw: &AttachmentRaw) -> Attachment {
    let payload = raw.payload.as_ref();
    let sticker_id = payload.and_then(|p| p.sticker_id).unwrap_or_default();

    // Shared links arrive as "fallback" with the URL beside the payload
    // instead of inside it. This is how the platform sends them.
    let url = if raw.kind == "fallback" {
        raw.url.clone()
    } else {
        payload.and_then(|p| p.url.clone())
    };

    Attachment {
        kind: raw.kind.clone(),
        url: url.unwrap_or_default(),
        sticker_id,
    }
}

/// Converts platform milliseconds to a UTC time, keeping the milliseconds.
///
/// Values outside chrono's range map to the Unix epoch.
pub fn ms_to_time(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}
