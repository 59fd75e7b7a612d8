//! Loader error handling
//!
//! One error type for the whole load pipeline, plus a context helper that
//! wraps io failures from thread and file plumbing.

use crate::stage::Stage;

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("could not open {locator}: {source}")]
    NotFound {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ASCII STLs are unsupported")]
    UnsupportedFormat,

    #[error("file size does not match triangle count (expected {expected} bytes, got {actual})")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("{context}: {source}")]
    Thread {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker thread {index} panicked")]
    WorkerPanicked { index: usize },

    #[error("loader thread panicked")]
    LoaderPanicked,

    #[error("loader finished without a destination buffer being published")]
    Abandoned,

    #[error("destination buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("a destination buffer was already published")]
    AlreadyPublished,

    #[error("load already failed: {}", .0.describe())]
    Failed(Stage),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LoaderError {
    /// Terminal stage a load ends in when it fails with this error.
    pub fn stage(&self) -> Stage {
        match self {
            LoaderError::NotFound { .. } => Stage::ErrorNoFile,
            LoaderError::UnsupportedFormat => Stage::ErrorAsciiStl,
            LoaderError::SizeMismatch { .. } => Stage::ErrorWrongSize,
            LoaderError::Failed(stage) if stage.is_error() => *stage,
            _ => Stage::Error,
        }
    }
}

impl From<toml::de::Error> for LoaderError {
    fn from(err: toml::de::Error) -> Self {
        LoaderError::Config(err.to_string())
    }
}

/// Attach context to io failures coming out of thread plumbing
pub trait LoaderErrorContext<T> {
    fn loader_context(self, context: &str) -> LoaderResult<T>;
}

impl<T> LoaderErrorContext<T> for std::io::Result<T> {
    fn loader_context(self, context: &str) -> LoaderResult<T> {
        self.map_err(|source| LoaderError::Thread {
            context: context.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_stages() {
        let not_found = LoaderError::NotFound {
            locator: "missing.stl".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(not_found.stage(), Stage::ErrorNoFile);
        assert_eq!(LoaderError::UnsupportedFormat.stage(), Stage::ErrorAsciiStl);
        assert_eq!(
            LoaderError::SizeMismatch { expected: 84, actual: 83 }.stage(),
            Stage::ErrorWrongSize
        );
        assert_eq!(LoaderError::WorkerPanicked { index: 3 }.stage(), Stage::Error);
        assert_eq!(LoaderError::Failed(Stage::ErrorAsciiStl).stage(), Stage::ErrorAsciiStl);
    }

    #[test]
    fn test_loader_context() {
        let result: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no threads left"));
        let err = result.loader_context("spawn worker 2").unwrap_err();
        assert_eq!(err.to_string(), "spawn worker 2: no threads left");
    }
}
