use thiserror::Error;

/// Rejections of a malformed create or consume request. Raised before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("exactly one of text or file must be provided")]
    BothOrNeitherProvided,

    #[error("content is not a file")]
    NotAFile,

    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("maxViews must be a positive integer")]
    InvalidMaxViews,
}

/// Failures of the record store or the blob directory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("blob i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("gave up after {0} conflicting updates")]
    Contention(usize),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Every way a lifecycle operation can be refused.
///
/// `Expired` and `NotFound` stay distinct so callers can explain why content
/// is unavailable, even though the cleanup behind them is the same.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("content not found")]
    NotFound,

    #[error("content has expired")]
    Expired,

    #[error("password required")]
    NeedsPassword,

    #[error("incorrect password")]
    BadPassword,

    #[error("content is no longer viewable")]
    Exhausted,

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl ShareError {
    /// Stable machine-readable kind, safe to show to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ShareError::InvalidInput(_) => "InvalidInput",
            ShareError::NotFound => "NotFound",
            ShareError::Expired => "Expired",
            ShareError::NeedsPassword => "NeedsPassword",
            ShareError::BadPassword => "BadPassword",
            ShareError::Exhausted => "Exhausted",
            ShareError::Storage(_) => "StorageFailure",
        }
    }
}

impl From<std::io::Error> for ShareError {
    fn from(e: std::io::Error) -> Self {
        ShareError::Storage(StoreError::Io(e))
    }
}
