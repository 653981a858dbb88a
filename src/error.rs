//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Every failure the pipeline can surface is a distinct variant so callers
//! branch on kind, never on message text. Cancellation in particular is a
//! normal terminal outcome and must not be confused with an infrastructure
//! failure. Each variant has a short human summary (its `Display`) and
//! keeps the underlying technical detail separate for progressive
//! disclosure via [`Error::detail`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A remote message arrived without a usable identifier. Storing it
    /// under a synthetic key would break dedup, so it is rejected.
    #[error("message record has no identifier")]
    InvalidRecord,

    /// The local SQLite store failed. Fatal for the current batch;
    /// previously committed batches are untouched.
    #[error("local storage is unavailable")]
    StorageUnavailable(#[source] sqlx::Error),

    /// The embedding service could not be reached or returned an error.
    /// Treated like a storage failure by the orchestrator.
    #[error("embedding service is unavailable")]
    EmbeddingUnavailable(String),

    /// Collection finished with an empty identifier set.
    #[error("no messages were selected")]
    NoItemsSelected,

    /// The user cancelled the run. Not a failure; batches committed before
    /// the cancel remain stored and indexed.
    #[error("cancelled by user")]
    Cancelled,

    /// The text-completion service failed. Retrieved sources are still
    /// usable by the caller.
    #[error("answer synthesis failed")]
    SynthesisFailed(String),

    /// The remote mail source failed while listing or fetching messages.
    #[error("mail source request failed")]
    MailSource(String),

    /// Another ingestion run is already active on this pipeline.
    #[error("an ingestion run is already in progress")]
    RunInProgress,

    /// Passphrase missing, too short, or does not match the stored index.
    #[error("{0}")]
    Crypto(String),
}

impl Error {
    /// Technical detail behind the summary, when there is any.
    pub fn detail(&self) -> Option<String> {
        match self {
            Error::StorageUnavailable(e) => Some(e.to_string()),
            Error::EmbeddingUnavailable(d)
            | Error::SynthesisFailed(d)
            | Error::MailSource(d) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Stable machine-readable code, used by the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRecord => "invalid_record",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::NoItemsSelected => "no_items_selected",
            Error::Cancelled => "cancelled",
            Error::SynthesisFailed(_) => "synthesis_failed",
            Error::MailSource(_) => "mail_source",
            Error::RunInProgress => "run_in_progress",
            Error::Crypto(_) => "crypto",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::StorageUnavailable(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_checked_by_kind() {
        let err = Error::Cancelled;
        assert!(err.is_cancelled());
        assert!(!Error::NoItemsSelected.is_cancelled());
    }

    #[test]
    fn detail_kept_separate_from_summary() {
        let err = Error::EmbeddingUnavailable("connect refused on :11434".into());
        assert_eq!(err.to_string(), "embedding service is unavailable");
        assert_eq!(err.detail().as_deref(), Some("connect refused on :11434"));
        assert!(Error::NoItemsSelected.detail().is_none());
    }
}
