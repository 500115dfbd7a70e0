//! skein-core library.
//!
//! A room timeline is persisted as a set of *fragments*: contiguous runs of
//! events discovered together, either by live sync or by paginating history.
//! Fragments are linked into chains as gaps between them are filled, and
//! [`comparer::FragmentIdComparer`] turns those links into a total order.
//!
//! # Conventions
//!
//! - **Errors**: library errors are `thiserror` enums that map onto a stable
//!   [`error::ErrorCode`]; config loading uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod comparer;
pub mod config;
pub mod error;
pub mod model;
pub mod observable;
pub mod pagination;
pub mod persist;
pub mod store;
pub mod timeline;

pub use comparer::{FragmentIdComparer, UnorderableError};
pub use error::{ErrorCode, TimelineError};
pub use model::{
    Boundary, Direction, EventEntry, EventKey, Fragment, FragmentId, GapEntry, TimelineEntry,
    TimelineEvent,
};
pub use store::{Store, StoreError};
pub use timeline::{FillOutcome, Timeline, TimelineParams, TimelineState};
