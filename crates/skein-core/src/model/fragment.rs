//! Fragments and the boundaries that close them off.
//!
//! A fragment's `previous_id`/`next_id` are not stored separately from its
//! boundaries: [`Boundary::Linked`] carries the neighbour id, so "a link is
//! set if and only if the boundary is linked" holds by construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Locally assigned fragment identifier.
///
/// Ids increase monotonically and are never reused, but they say nothing
/// about chronological order; use the comparer for that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub i64);

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pagination direction, relative to chronological room order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards older events (the fragment start).
    Backward,
    /// Towards newer events (the fragment end).
    Forward,
}

impl Direction {
    /// The wire spelling used by pagination endpoints.
    #[must_use]
    pub const fn as_api_str(self) -> &'static str {
        match self {
            Self::Backward => "b",
            Self::Forward => "f",
        }
    }

    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Backward => Self::Forward,
            Self::Forward => Self::Backward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backward => write!(f, "backward"),
            Self::Forward => write!(f, "forward"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "b" | "back" | "backward" | "backwards" => Ok(Self::Backward),
            "f" | "fwd" | "forward" | "forwards" => Ok(Self::Forward),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// One end of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Boundary {
    /// More history exists past this boundary; the token resumes pagination.
    Gap(String),
    /// Definitively the start (or end) of the room's history.
    Edge,
    /// Directly adjacent to another fragment in the same chain.
    Linked(FragmentId),
}

impl Boundary {
    /// Column spelling used by the store.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Gap(_) => "gap",
            Self::Edge => "edge",
            Self::Linked(_) => "linked",
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Gap(token) => Some(token),
            _ => None,
        }
    }

    #[must_use]
    pub const fn linked(&self) -> Option<FragmentId> {
        match self {
            Self::Linked(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap(_))
    }

    /// Rebuild a boundary from its stored columns.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch when the columns disagree, e.g.
    /// a `linked` kind without a neighbour id.
    pub fn from_columns(
        kind: &str,
        token: Option<String>,
        link: Option<i64>,
    ) -> Result<Self, String> {
        match (kind, token, link) {
            ("gap", Some(token), None) => Ok(Self::Gap(token)),
            ("edge", None, None) => Ok(Self::Edge),
            ("linked", None, Some(id)) => Ok(Self::Linked(FragmentId(id))),
            (kind, token, link) => Err(format!(
                "boundary kind '{kind}' inconsistent with token={token:?} link={link:?}"
            )),
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gap(token) => write!(f, "gap({token})"),
            Self::Edge => write!(f, "edge"),
            Self::Linked(id) => write!(f, "linked({id})"),
        }
    }
}

/// A persisted, contiguous run of entries discovered together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub room_id: String,
    pub start: Boundary,
    pub end: Boundary,
}

impl Fragment {
    #[must_use]
    pub const fn previous_id(&self) -> Option<FragmentId> {
        self.start.linked()
    }

    #[must_use]
    pub const fn next_id(&self) -> Option<FragmentId> {
        self.end.linked()
    }

    /// The boundary facing `direction`: the start for backward, the end for forward.
    #[must_use]
    pub const fn boundary(&self, direction: Direction) -> &Boundary {
        match direction {
            Direction::Backward => &self.start,
            Direction::Forward => &self.end,
        }
    }

    pub fn set_boundary(&mut self, direction: Direction, boundary: Boundary) {
        match direction {
            Direction::Backward => self.start = boundary,
            Direction::Forward => self.end = boundary,
        }
    }
}
