/// Broad classification of a [`ReadError`], used by callers that map failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedFormat,
    DecodingExhausted,
    EntryNotFound,
    PathTraversalRejected,
    UnderlyingIo,
}

/// Top-level error type. All public reader operations return this.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No decoding strategy could open {path} after {attempts} attempts (last error: {last_error})")]
    DecodingExhausted {
        path: String,
        attempts: usize,
        last_error: String,
    },

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Path traversal rejected: {path}")]
    PathTraversal { path: String },

    #[error("Malformed {format} file: {detail}")]
    Malformed { format: String, detail: String },

    #[error("Page rendering failed: {0}")]
    Render(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReadError {
    /// A 1-based page request outside `[1, count]`.
    pub fn page_out_of_range(page: usize, count: usize) -> Self {
        ReadError::EntryNotFound(format!(
            "page {page} is outside the valid range [1, {count}]"
        ))
    }

    pub(crate) fn malformed(format: &str, detail: impl Into<String>) -> Self {
        ReadError::Malformed {
            format: format.to_string(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            ReadError::DecodingExhausted { .. } | ReadError::Malformed { .. } => {
                ErrorKind::DecodingExhausted
            }
            ReadError::EntryNotFound(_) => ErrorKind::EntryNotFound,
            ReadError::PathTraversal { .. } => ErrorKind::PathTraversalRejected,
            ReadError::Render(_) | ReadError::Io(_) => ErrorKind::UnderlyingIo,
        }
    }

    /// Whether another decoding strategy might succeed where this attempt failed.
    /// Filesystem and sink failures are not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReadError::Malformed { .. } | ReadError::EntryNotFound(_)
        )
    }
}

pub(crate) fn zip_error(e: zip::result::ZipError) -> ReadError {
    ReadError::malformed("ZIP", e.to_string())
}
