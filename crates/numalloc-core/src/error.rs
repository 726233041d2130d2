//! # Allocator Error Types
//!
//! Error types for topology-aware allocation.

/// Errors that can occur during placement or allocation.
#[derive(Debug, thiserror::Error)]
pub enum NumaError {
    /// Every node-targeted and untargeted attempt failed.
    ///
    /// The plain allocation entry points treat this as fatal and abort the
    /// process; only the `try_*` variants hand it back to the caller.
    #[error("Out of memory trying to allocate {size} bytes")]
    OutOfMemory {
        /// The payload size that was requested
        size: usize,
    },

    /// Invalid NUMA node
    #[error("Invalid NUMA node: {node} (system has {available} nodes)")]
    InvalidNode {
        /// The requested node
        node: usize,
        /// Number of addressable nodes (0 when topology is unavailable)
        available: usize,
    },

    /// Invalid allocator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Topology description could not be built
    #[error("Topology error: {0}")]
    TopologyError(String),

    /// The process-wide allocator was already initialized
    #[error("Global allocator already initialized")]
    AlreadyInitialized,

    /// Filesystem or system call failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NumaError {
    /// Returns `true` if this error means memory is exhausted.
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NumaError::InvalidNode {
            node: 7,
            available: 2,
        };
        assert!(err.to_string().contains('7'));
        assert!(err.to_string().contains("2 nodes"));

        let err = NumaError::OutOfMemory { size: 4096 };
        assert!(err.to_string().contains("4096"));
        assert!(err.is_out_of_memory());
        assert!(!NumaError::AlreadyInitialized.is_out_of_memory());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: NumaError = io.into();
        assert!(matches!(err, NumaError::Io(_)));
    }
}
