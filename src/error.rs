//! Error taxonomy for the walk engine and its bundled default loader.

use std::sync::Arc;

/// Errors surfaced to the consumer via [`crate::events::WalkEvent::Error`], or returned
/// directly from fallible setup calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WalkError {
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("loader failed for `{url}`: {reason}")]
    Loader { url: String, reason: String },

    #[error("request to `{url}` failed with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("I/O error reading `{path}`: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse playlist at `{url}`: {reason}")]
    Parse { url: String, reason: String },

    #[error("expected a {expected} playlist at `{url}`, got the other kind")]
    WrongPlaylistKind { url: String, expected: &'static str },

    #[error("walk cancelled")]
    Cancelled,

    #[error("internal invariant violated: {reason}")]
    Internal { reason: String },
}

impl WalkError {
    pub fn loader(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Loader {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether the bundled default loader should retry this error.
    ///
    /// Retry policy is strictly a loader concern (see SPEC_FULL.md §7) — the walk engine
    /// never consults this itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Loader { .. } | Self::Io { .. } => true,
            Self::InvalidUrl { .. }
            | Self::Parse { .. }
            | Self::WrongPlaylistKind { .. }
            | Self::Cancelled
            | Self::Internal { .. } => false,
        }
    }
}

/// Wraps a [`reqwest::Error`] behind an `Arc` so [`WalkError`] stays `Clone`,
/// mirroring the grounding engine's `NetworkError { source: Arc<reqwest::Error> }` pattern.
pub fn reqwest_err(url: &str, err: reqwest::Error) -> WalkError {
    let shared: Arc<reqwest::Error> = Arc::new(err);
    WalkError::loader(url, shared.to_string())
}
