use std::fmt;

use crate::comparer::UnorderableError;
use crate::store::StoreError;

/// Machine-readable error codes for callers that branch on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    FragmentNotFound,
    CorruptFragment,
    UnorderableEntries,
    InvalidTimelineState,
    NetworkFailure,
    FetchTimeout,
    FetchAborted,
    StorageFailure,
    StorageTaskFailed,
    SchemaTooNew,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::FragmentNotFound => "E2001",
            Self::CorruptFragment => "E2002",
            Self::UnorderableEntries => "E2003",
            Self::InvalidTimelineState => "E2004",
            Self::NetworkFailure => "E4001",
            Self::FetchTimeout => "E4002",
            Self::FetchAborted => "E4003",
            Self::StorageFailure => "E5001",
            Self::StorageTaskFailed => "E5002",
            Self::SchemaTooNew => "E5003",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::FragmentNotFound => "Fragment not found",
            Self::CorruptFragment => "Corrupt fragment record",
            Self::UnorderableEntries => "Entries from unlinked chains compared",
            Self::InvalidTimelineState => "Timeline is not in the required state",
            Self::NetworkFailure => "Pagination request failed",
            Self::FetchTimeout => "Pagination request timed out",
            Self::FetchAborted => "Pagination request aborted",
            Self::StorageFailure => "Storage transaction failed",
            Self::StorageTaskFailed => "Storage task failed",
            Self::SchemaTooNew => "Store written by a newer skein",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .skein/config.toml and retry."),
            Self::FragmentNotFound => Some("Reopen the timeline; the room may have been purged."),
            Self::CorruptFragment => Some("Purge the room with `skein purge` and resync."),
            Self::UnorderableEntries => Some("Report a bug with logs; fragment links are inconsistent."),
            Self::InvalidTimelineState => Some("Call load() once before other timeline operations."),
            Self::NetworkFailure | Self::FetchTimeout => {
                Some("The gap is still open; retry the fill.")
            }
            Self::FetchAborted => None,
            Self::StorageFailure => Some("Check disk space and write permissions, then retry."),
            Self::StorageTaskFailed => Some("Retry once. If persistent, report a bug with logs."),
            Self::SchemaTooNew => Some("Upgrade skein, or point --db at a fresh database."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures surfaced by [`crate::timeline::Timeline`] operations.
///
/// A stale gap (another fill already advanced the boundary) is not an
/// error; it is reported through `GapFill::stale`.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    /// The pagination collaborator failed; the gap stays open.
    #[error("pagination failed: {message}")]
    Network { message: String, timed_out: bool },

    /// The fill was cancelled before anything was written.
    #[error("gap fill aborted")]
    Aborted,

    /// The storage transaction failed; nothing was spliced.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// Two entries from unlinked chains met in the in-memory timeline.
    #[error("timeline ordering violated: {0}")]
    Unorderable(#[from] UnorderableError),

    #[error("timeline is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

impl TimelineError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Network {
                timed_out: true, ..
            } => ErrorCode::FetchTimeout,
            Self::Network { .. } => ErrorCode::NetworkFailure,
            Self::Aborted => ErrorCode::FetchAborted,
            Self::Storage(err) => err.code(),
            Self::Unorderable(_) => ErrorCode::UnorderableEntries,
            Self::InvalidState { .. } => ErrorCode::InvalidTimelineState,
        }
    }

    /// Whether the same fill can simply be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Aborted)
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, TimelineError};
    use crate::comparer::UnorderableError;
    use crate::model::FragmentId;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::FragmentNotFound,
            ErrorCode::CorruptFragment,
            ErrorCode::UnorderableEntries,
            ErrorCode::InvalidTimelineState,
            ErrorCode::NetworkFailure,
            ErrorCode::FetchTimeout,
            ErrorCode::FetchAborted,
            ErrorCode::StorageFailure,
            ErrorCode::StorageTaskFailed,
            ErrorCode::SchemaTooNew,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::UnorderableEntries.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn timeline_errors_map_to_codes() {
        let timeout = TimelineError::Network {
            message: "slow".into(),
            timed_out: true,
        };
        assert_eq!(timeout.code(), ErrorCode::FetchTimeout);
        assert!(timeout.is_retryable());

        let unorderable = TimelineError::from(UnorderableError::UnknownFragment(FragmentId(3)));
        assert_eq!(unorderable.code(), ErrorCode::UnorderableEntries);
        assert!(!unorderable.is_retryable());
    }
}
