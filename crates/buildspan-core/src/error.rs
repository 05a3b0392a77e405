//! Error types for buildspan.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Build listing errors
    #[error("Build listing failed for {pipeline} (page {page}): {message}")]
    Listing {
        pipeline: String,
        page: u32,
        message: String,
    },

    #[error("Build listing unauthorized: {0}")]
    Unauthorized(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    // Dedup store errors
    #[error("Dedup store {path} could not be opened: {source}")]
    DedupOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dedup store {path} could not be written: {source}")]
    DedupWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Export errors
    #[error("Exporter initialization failed: {0}")]
    ExporterInit(String),

    #[error("Span export failed: {0}")]
    Export(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error must terminate the process rather than be retried.
    ///
    /// Configuration problems and dedup store I/O cannot heal between cycles;
    /// listing failures can.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Unauthorized(_)
                | Error::PipelineNotFound(_)
                | Error::DedupOpen { .. }
                | Error::DedupWrite { .. }
                | Error::ExporterInit(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("missing token".into()).is_fatal());
        assert!(Error::Unauthorized("401".into()).is_fatal());
        assert!(
            Error::DedupWrite {
                path: "/tmp/x".into(),
                source: std::io::Error::other("disk full"),
            }
            .is_fatal()
        );

        let listing = Error::Listing {
            pipeline: "app".into(),
            page: 2,
            message: "502 Bad Gateway".into(),
        };
        assert!(!listing.is_fatal());
        assert!(!Error::Export("channel full".into()).is_fatal());
    }

    #[test]
    fn test_listing_error_display() {
        let err = Error::Listing {
            pipeline: "app".into(),
            page: 3,
            message: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Build listing failed for app (page 3): timeout");
    }
}
