//! Conversation keys and their store-side string form.
//!
//! A conversation is tracked per `(chat id, user id)` pair. Document field names must be strings, so the pair is
//! rendered as `"(chat, user)"` and parsed back by stripping the parentheses and splitting on the comma.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    pub chat_id: i64,
    pub user_id: i64,
}

impl ConversationKey {
    pub const ARITY: usize = 2;

    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

impl From<(i64, i64)> for ConversationKey {
    fn from((chat_id, user_id): (i64, i64)) -> Self {
        Self { chat_id, user_id }
    }
}

impl From<ConversationKey> for (i64, i64) {
    fn from(key: ConversationKey) -> Self {
        (key.chat_id, key.user_id)
    }
}

impl Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.chat_id, self.user_id)
    }
}

impl FromStr for ConversationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

pub fn encode(key: &ConversationKey) -> String {
    key.to_string()
}

pub fn decode(encoded: &str) -> Result<ConversationKey> {
    let stripped = encoded.replace(['(', ')'], "");
    let parts = stripped.split(',').map(str::trim).collect::<Vec<_>>();

    if parts.len() != ConversationKey::ARITY {
        return Err(Error::malformed_key(
            encoded,
            format!("expected {} components, found {}", ConversationKey::ARITY, parts.len()),
        ));
    }

    let mut ids = [0i64; ConversationKey::ARITY];
    for (slot, part) in ids.iter_mut().zip(parts) {
        *slot = part
            .parse::<i64>()
            .map_err(|err| Error::malformed_key(encoded, format!("component '{part}': {err}")))?;
    }

    Ok(ConversationKey::new(ids[0], ids[1]))
}
