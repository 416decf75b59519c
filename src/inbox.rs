use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Conversation label as rendered by the client; doubles as the selection key
/// when opening a chat.
pub type ContactId = String;

/// Single space stands in for an empty text or time when matching. Two rows
/// that render the same text at the same display time are indistinguishable.
const SENTINEL: &str = " ";

/// One rendered message row. `time` is the raw display string, not a parsed
/// timestamp; message identity for diffing is `(text, time)` only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub time: String,
    #[serde(default)]
    pub inbound: bool,
}

impl Message {
    pub fn new(text: impl Into<String>, time: impl Into<String>) -> Self {
        Self { text: text.into(), time: time.into(), inbound: true }
    }

    fn match_key(&self) -> (&str, &str) {
        (non_empty(&self.text), non_empty(&self.time))
    }
}

fn non_empty(s: &str) -> &str {
    if s.is_empty() { SENTINEL } else { s }
}

/// What to report when the previously stored message is no longer in the
/// rendered window (scrolled out, edited, or deleted).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Treat the whole rendered sequence as new.
    #[default]
    FullHistory,
    /// Report only the most recent rendered message.
    LatestOnly,
}

impl FallbackPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "full-history" => Some(Self::FullHistory),
            "latest" | "latest-only" => Some(Self::LatestOnly),
            _ => None,
        }
    }
}

/// Suffix of `current` strictly after the last row matching `last_seen`.
///
/// With no stored message the whole sequence is new. With a stored message
/// that no longer matches any row, `policy` decides between the full sequence
/// and just the final element.
pub fn messages_after<'a>(
    last_seen: Option<&Message>,
    current: &'a [Message],
    policy: FallbackPolicy,
) -> &'a [Message] {
    let Some(prev) = last_seen else {
        return current;
    };
    let key = prev.match_key();
    match current.iter().rposition(|m| m.match_key() == key) {
        Some(idx) => &current[idx + 1..],
        None => match policy {
            FallbackPolicy::FullHistory => current,
            FallbackPolicy::LatestOnly => {
                current.last().map(std::slice::from_ref).unwrap_or(&[])
            }
        },
    }
}

/// Per-contact last-seen state. A contact appears only after at least one
/// successful poll; absence means never polled, not "no messages".
#[derive(Debug, Default)]
pub struct ConversationLog {
    seen: HashMap<ContactId, Message>,
}

impl ConversationLog {
    pub fn last_seen(&self, contact: &str) -> Option<&Message> {
        self.seen.get(contact)
    }

    /// Record the tail of a freshly read sequence. An empty read leaves the
    /// prior entry untouched so the log never points at a message that was
    /// not actually rendered.
    pub fn note(&mut self, contact: &str, sequence: &[Message]) {
        if let Some(last) = sequence.last() {
            self.seen.insert(contact.to_string(), last.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
