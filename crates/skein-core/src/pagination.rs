//! Interface to the network collaborator that fetches history pages.
//!
//! Transport is out of scope here; implementors wrap whatever HTTP client
//! the embedding application uses. Duplicate events across pages are fine:
//! the gap writer suppresses them by event id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Direction, TimelineEvent};

/// One pagination request, resuming from a gap token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub room_id: String,
    pub from: String,
    pub direction: Direction,
    pub limit: usize,
}

/// One fetched page of history, in fetch order (newest first for backward
/// pagination, oldest first for forward pagination).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(alias = "chunk", default)]
    pub events: Vec<TimelineEvent>,
    /// Token for the next page; `None` means the edge of history was reached.
    #[serde(alias = "end", default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request failed or timed out at the transport level.
    #[error("connection error: {message}")]
    Connection { message: String, timed_out: bool },

    /// The request was aborted before it completed.
    #[error("request aborted")]
    Aborted,
}

#[async_trait]
pub trait PaginationSource: Send + Sync {
    /// Fetch up to `request.limit` events starting at `request.from`.
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError>;
}
