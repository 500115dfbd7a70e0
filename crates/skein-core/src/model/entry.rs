//! Timeline entries: persisted events and in-memory gap markers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use super::fragment::{Direction, FragmentId};
use crate::comparer::{FragmentIdComparer, UnorderableError};

/// Storage key of an event: its fragment plus its index within that fragment.
///
/// Indices grow forward from the first event written into a fragment and
/// may go negative when older history is prepended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub fragment_id: FragmentId,
    pub index: i64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fragment_id, self.index)
    }
}

/// A chat event as delivered by sync or pagination.
///
/// Only the envelope is interpreted; `content` is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub origin_server_ts: i64,
    /// Id of the event that immediately precedes this one in room order,
    /// when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<String>,
    #[serde(default)]
    pub content: Value,
}

/// A persisted event together with its storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    pub key: EventKey,
    pub event: TimelineEvent,
}

/// Marker for an unfilled boundary of a fragment.
///
/// A backward gap sits before every entry of its fragment; a forward gap
/// sits after every entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GapEntry {
    pub fragment_id: FragmentId,
    pub direction: Direction,
    pub token: String,
}

impl GapEntry {
    /// Index used when ordering the marker against events of its fragment.
    #[must_use]
    pub const fn sort_index(&self) -> i64 {
        match self.direction {
            Direction::Backward => i64::MIN,
            Direction::Forward => i64::MAX,
        }
    }
}

/// One element of the in-memory timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "lowercase")]
pub enum TimelineEntry {
    Event(EventEntry),
    Gap(GapEntry),
}

impl TimelineEntry {
    /// `(fragment, index)` pair used for ordering.
    #[must_use]
    pub const fn sort_position(&self) -> (FragmentId, i64) {
        match self {
            Self::Event(entry) => (entry.key.fragment_id, entry.key.index),
            Self::Gap(gap) => (gap.fragment_id, gap.sort_index()),
        }
    }

    #[must_use]
    pub const fn fragment_id(&self) -> FragmentId {
        self.sort_position().0
    }

    /// Order two entries through the comparer.
    ///
    /// # Errors
    ///
    /// Returns [`UnorderableError`] when the entries live in unlinked chains.
    pub fn compare(
        &self,
        other: &Self,
        comparer: &FragmentIdComparer,
    ) -> Result<Ordering, UnorderableError> {
        comparer.compare_positions(self.sort_position(), other.sort_position())
    }

    #[must_use]
    pub const fn as_event(&self) -> Option<&EventEntry> {
        match self {
            Self::Event(entry) => Some(entry),
            Self::Gap(_) => None,
        }
    }

    #[must_use]
    pub const fn as_gap(&self) -> Option<&GapEntry> {
        match self {
            Self::Gap(gap) => Some(gap),
            Self::Event(_) => None,
        }
    }

    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap(_))
    }
}

impl From<EventEntry> for TimelineEntry {
    fn from(entry: EventEntry) -> Self {
        Self::Event(entry)
    }
}

impl From<GapEntry> for TimelineEntry {
    fn from(gap: GapEntry) -> Self {
        Self::Gap(gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_deserializes_wire_shape() {
        let event: TimelineEvent = serde_json::from_str(
            r#"{"event_id":"$a","sender":"@al:hs","type":"m.room.message","origin_server_ts":12,"content":{"body":"hi"}}"#,
        )
        .expect("parse event");
        assert_eq!(event.event_id, "$a");
        assert_eq!(event.event_type, "m.room.message");
        assert_eq!(event.predecessor, None);
        assert_eq!(event.content["body"], "hi");
    }

    #[test]
    fn gap_markers_bracket_their_fragment() {
        let start = TimelineEntry::Gap(GapEntry {
            fragment_id: FragmentId(1),
            direction: Direction::Backward,
            token: "t".into(),
        });
        let end = TimelineEntry::Gap(GapEntry {
            fragment_id: FragmentId(1),
            direction: Direction::Forward,
            token: "t".into(),
        });
        assert_eq!(start.sort_position(), (FragmentId(1), i64::MIN));
        assert_eq!(end.sort_position(), (FragmentId(1), i64::MAX));
        assert!(start.is_gap() && start.as_event().is_none());
    }
}
