//! Error handling for the fabric-fractal pipeline
//!
//! This module defines the crate-level error type and a Result alias.
//! Errors raised by the hardware capability ([`FabricError`]), by the
//! wire decoder ([`ProtocolError`]) and by file I/O convert into
//! [`FractalError`] with `?`; [`ResultExt`] converts and wraps in one step.

use crate::fabric::FabricError;
use crate::protocol::ProtocolError;
use crate::types::NodeId;
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum FractalError {
    /// Errors reported by the fabric capability
    #[error("Fabric error: {0}")]
    Fabric(#[from] FabricError),

    /// No worker could be acquired or wired to an incoming channel
    #[error("No connectivity: {acquired} worker(s) acquired, none could be connected")]
    NoConnectivity { acquired: usize },

    /// A command write transferred fewer bytes than requested
    #[error("Partial write to node {node}: {written} of {expected} bytes")]
    PartialWrite {
        node: NodeId,
        expected: usize,
        written: usize,
    },

    /// Malformed scanline record
    #[error("Protocol desync: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation not allowed while the pipeline is running
    #[error("Pipeline is active")]
    Active,

    /// Image dimensions outside what the wire format can carry
    #[error("Invalid image size {width}x{height}: {reason}")]
    InvalidSize {
        width: u32,
        height: u32,
        reason: String,
    },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FractalError>,
    },
}

impl FractalError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FractalError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error only reflects a busy resource pool
    ///
    /// Looks through any context wrappers.
    pub fn is_exhaustion(&self) -> bool {
        match self {
            FractalError::Fabric(e) => e.is_exhaustion(),
            FractalError::WithContext { source, .. } => source.is_exhaustion(),
            _ => false,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, FractalError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<FractalError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FractalError::Config("zoom factor must be below 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: zoom factor must be below 1"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = FractalError::Active;
        let with_ctx = err.with_context("Failed to resize");
        assert!(with_ctx.to_string().contains("Failed to resize"));
        assert!(with_ctx.to_string().contains("Pipeline is active"));
    }

    #[test]
    fn test_partial_write_error() {
        let err = FractalError::PartialWrite {
            node: 5,
            expected: 56,
            written: 28,
        };
        let msg = err.to_string();
        assert!(msg.contains("node 5"));
        assert!(msg.contains("28 of 56"));
    }

    #[test]
    fn test_exhaustion_seen_through_context() {
        let err = FractalError::from(FabricError::NoDmaChannel).with_context("wiring worker 3");
        assert!(err.is_exhaustion());
        assert!(!FractalError::Active.is_exhaustion());
    }

    #[test]
    fn test_fabric_result_context() {
        let res: std::result::Result<(), FabricError> = Err(FabricError::NodeBusy(2));
        let err = res.context("acquiring mux").unwrap_err();
        assert!(err.to_string().starts_with("acquiring mux"));
    }

    #[test]
    fn test_io_result_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = res.with_context(|| "reading pipeline.toml".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "reading pipeline.toml: IO error: gone");
        match err {
            FractalError::WithContext { source, .. } => {
                assert!(matches!(*source, FractalError::Io(_)))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
