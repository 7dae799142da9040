use thiserror::Error;

/// Errors produced by persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading or writing the journal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A journal record in the middle of the file is unreadable.
    #[error("journal corrupt at byte {offset}: {reason}")]
    Corrupt {
        /// Byte offset of the bad record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// The background writer has stopped.
    #[error("store writer is closed")]
    Closed,
}
