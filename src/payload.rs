//! Inbound webhook payload parser.
//!
//! A delivery is a batch of entries, each holding a list of messaging items.
//! On the wire every item is a flat record where at most one of `message`,
//! `postback`, `read` and `referral` is set. The parser turns that into
//! [`MessagingItem`] with an [`ItemKind`] sum type so that classification can
//! match exhaustively.
//!
//! Only the batch structure itself is mandatory. An item that does not
//! decode becomes [`ItemKind::Unsupported`] so the rest of the delivery is
//! still processed.

use std::fmt;

use serde::{de, Deserialize, Deserializer};
use thiserror::Error;
use tracing::warn;

/// Upper bound on how much of a rejected body is kept for diagnostics.
const SNIPPET_LIMIT: usize = 512;

/// A delivery that could not be decoded.
#[derive(Debug, Error)]
#[error("invalid JSON {snippet:?}: {source}")]
pub struct ParseError {
    snippet: String,
    #[source]
    source: serde_json::Error,
}

impl ParseError {
    fn new(body: &[u8], source: serde_json::Error) -> Self {
        let end = body.len().min(SNIPPET_LIMIT);
        Self {
            snippet: String::from_utf8_lossy(&body[..end]).into_owned(),
            source,
        }
    }

    /// Leading bytes of the rejected body, lossily decoded.
    pub fn snippet(&self) -> &str {
        &self.snippet
    }
}

/// Parses a delivery body into its entries and items.
///
/// Structural problems are errors. In particular a document without an
/// `entry` list is rejected rather than treated as an empty batch.
pub fn parse_batch(body: &[u8]) -> Result<RawEntryBatch, ParseError> {
    serde_json::from_slice::<WireBatch>(body)
        .map(RawEntryBatch::from)
        .map_err(|e| ParseError::new(body, e))
}

/// One webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntryBatch {
    pub entries: Vec<Entry>,
}

impl RawEntryBatch {
    /// All items of all entries, in delivery order.
    pub fn items(&self) -> impl Iterator<Item = &MessagingItem> {
        self.entries.iter().flat_map(|e| e.messaging.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub messaging: Vec<MessagingItem>,
}

/// One unit of user activity.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagingItem {
    pub sender_id: i64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub kind: ItemKind,
}

/// What a messaging item carries.
///
/// The platform promises only one sub-record per item. If a document
/// carries several anyway, the variant is picked in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Postback(Postback),
    Read(Read),
    Referral(Referral),
    Message(Message),
    /// None of the known sub-records, e.g. fields from other subscriptions.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub is_echo: bool,
    pub text: Option<String>,
    pub quick_reply: Option<QuickReply>,
    pub mid: Option<String>,
    pub attachments: Option<Vec<AttachmentRaw>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuickReply {
    #[serde(default)]
    pub payload: String,
}

/// An attachment as delivered.
///
/// `fallback` attachments (shared links) put their URL at the top level;
/// every other type nests it under `payload`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AttachmentRaw {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub url: Option<String>,
    pub payload: Option<AttachmentPayload>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AttachmentPayload {
    pub url: Option<String>,
    pub sticker_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Postback {
    #[serde(default)]
    pub payload: String,
    pub referral: Option<Referral>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Read {
    #[serde(default)]
    pub watermark: i64,
}

/// How a user reached the conversation.
///
/// `source` and `type` are kept for callers that want to tell ads from
/// links; classification only reads `ref`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Referral {
    #[serde(rename = "ref", default)]
    pub reference: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Deserialize)]
struct WireBatch {
    entry: Vec<WireEntry>,
}

#[derive(Deserialize)]
struct WireEntry {
    #[serde(default)]
    messaging: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct WireItem {
    sender: Option<WireSender>,
    #[serde(default)]
    timestamp: i64,
    message: Option<Message>,
    postback: Option<Postback>,
    read: Option<Read>,
    referral: Option<Referral>,
}

#[derive(Deserialize)]
struct WireSender {
    #[serde(deserialize_with = "deserialize_id")]
    id: i64,
}

impl From<WireBatch> for RawEntryBatch {
    fn from(batch: WireBatch) -> Self {
        let entries = batch
            .entry
            .into_iter()
            .map(|e| Entry {
                messaging: e.messaging.into_iter().map(decode_item).collect(),
            })
            .collect();
        RawEntryBatch { entries }
    }
}

fn decode_item(value: serde_json::Value) -> MessagingItem {
    match serde_json::from_value::<WireItem>(value) {
        Ok(item) => MessagingItem::from(item),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable messaging item");
            MessagingItem::unsupported(0, 0)
        }
    }
}

impl MessagingItem {
    fn unsupported(sender_id: i64, timestamp: i64) -> Self {
        MessagingItem {
            sender_id,
            timestamp,
            kind: ItemKind::Unsupported,
        }
    }
}

impl From<WireItem> for MessagingItem {
    fn from(item: WireItem) -> Self {
        // Plugin callbacks such as checkbox opt-ins have no sender.
        let Some(sender) = item.sender else {
            return MessagingItem::unsupported(0, item.timestamp);
        };
        let kind = match (item.postback, item.read, item.referral, item.message) {
            (Some(postback), _, _, _) => ItemKind::Postback(postback),
            (None, Some(read), _, _) => ItemKind::Read(read),
            (None, None, Some(referral), _) => ItemKind::Referral(referral),
            (None, None, None, Some(message)) => ItemKind::Message(message),
            (None, None, None, None) => ItemKind::Unsupported,
        };
        MessagingItem {
            sender_id: sender.id,
            timestamp: item.timestamp,
            kind,
        }
    }
}

/// User ids arrive as JSON strings; plain numbers are accepted too.
fn deserialize_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct IdVisitor;

    impl de::Visitor<'_> for IdVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a numeric user id as string or integer")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom(format!("user id {v} out of range")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.parse()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }

    deserializer.deserialize_any(IdVisitor)
}
