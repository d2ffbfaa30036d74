//! # Telegrams
//!
//! The immutable data record routed between applications and distributors.
//! Wire encoding is owned by the connection adapters; this module only defines
//! the fields the routing core inspects.

use serde::{Deserialize, Serialize};

use crate::entities::TopicKey;

/// Condition carried by a telegram.
///
/// Anything other than [`DataState::Data`] is an error-flagged status record
/// that tells a receiver why no payload is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataState {
    /// Regular record. The payload may still be absent ("empty record").
    #[default]
    Data,
    /// No source or sender is available for the topic.
    NoSource,
    /// The receiver lacks the rights to read the topic.
    NoRights,
    /// The registration conflicts with another one (second drain, ambiguous authority).
    InvalidSubscription,
}

impl DataState {
    /// True for status records that signal an error condition.
    pub fn is_error(self) -> bool {
        !matches!(self, DataState::Data)
    }
}

/// One data record of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telegram {
    /// Topic the record belongs to.
    pub topic: TopicKey,
    /// Data index assigned by the authoritative distributor (0 while unassigned).
    pub data_index: u64,
    /// Timestamp of the data in milliseconds since the Unix epoch.
    pub data_time: i64,
    /// Record was produced late and is not current data.
    pub delayed: bool,
    /// Status of the record.
    pub state: DataState,
    /// Serialized payload, absent for status and empty records.
    pub payload: Option<Vec<u8>>,
}

impl Telegram {
    /// Creates a data record that has not been index-assigned yet.
    pub fn data(topic: TopicKey, data_time: i64, payload: Vec<u8>) -> Self {
        Self {
            topic,
            data_index: 0,
            data_time,
            delayed: false,
            state: DataState::Data,
            payload: Some(payload),
        }
    }

    /// Creates a payload-less status record.
    pub fn status(topic: TopicKey, state: DataState, data_index: u64, data_time: i64) -> Self {
        Self {
            topic,
            data_index,
            data_time,
            delayed: false,
            state,
            payload: None,
        }
    }

    /// Returns the same record flagged as delayed.
    pub fn into_delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    /// Returns the same record with the given data index.
    pub fn with_index(mut self, data_index: u64) -> Self {
        self.data_index = data_index;
        self
    }

    /// True for error-flagged status records.
    pub fn is_error(&self) -> bool {
        self.state.is_error()
    }

    /// Length of the payload in bytes (0 when absent).
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }
}

/// Returns true if `next` carries exactly the same content as `previous`.
///
/// Batches are equal when they have the same number of records, none of them is
/// error-flagged and every payload matches byte for byte. Indices and
/// timestamps are ignored.
pub fn same_content(previous: &[Telegram], next: &[Telegram]) -> bool {
    previous.len() == next.len()
        && previous
            .iter()
            .zip(next)
            .all(|(old, new)| !old.is_error() && !new.is_error() && old.payload == new.payload)
}
