//! Reading and writing timeline fragments.
//!
//! [`reader::TimelineReader`] reconstructs ordered slices from the store.
//! [`gap_writer::GapWriter`] merges fetched history pages and
//! [`sync_writer::SyncWriter`] appends live sync batches. Writers register
//! fragment changes with the room's comparer only after their transaction
//! commits.

pub mod gap_writer;
pub mod reader;
pub mod sync_writer;

pub use gap_writer::{ContextFill, ContextPage, GapFill, GapWriter};
pub use reader::TimelineReader;
pub use sync_writer::{SyncBatch, SyncWrite, SyncWriter};
