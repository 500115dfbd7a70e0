//! Persisted data shapes: fragments, their boundaries, and timeline entries.

pub mod entry;
pub mod fragment;

pub use entry::{EventEntry, EventKey, GapEntry, TimelineEntry, TimelineEvent};
pub use fragment::{Boundary, Direction, Fragment, FragmentId};
