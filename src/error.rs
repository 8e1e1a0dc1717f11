//! Error types shared by the buffer pool, the collaborators and the control surface

use thiserror::Error;

use crate::buffer::NativeHandle;

/// Result codes returned to stream controllers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvsError {
    /// Malformed caller input; nothing changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another client took the camera; the session is dead.
    #[error("camera ownership lost")]
    OwnershipLost,

    #[error("video stream already running")]
    AlreadyRunning,

    /// Not enough graphics buffers; any partial growth has been rolled back.
    #[error("graphics buffers unavailable")]
    BufferUnavailable,

    #[error("invalid buffer return: {0}")]
    InvalidReturn(String),

    #[error("frame delivery failed: {0}")]
    DeliveryFailed(#[from] TransportError),

    #[error("operation not supported by this camera")]
    Unsupported,

    #[error("underlying service error: {0}")]
    UnderlyingService(String),
}

/// Why a buffer return was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnRejection {
    OutOfRange,
    NoHandle,
    AlreadyFree,
    StaleLease,
}

impl std::fmt::Display for ReturnRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            ReturnRejection::OutOfRange => "index out of range",
            ReturnRejection::NoHandle => "slot holds no buffer",
            ReturnRejection::AlreadyFree => "buffer is already free",
            ReturnRejection::StaleLease => "lease no longer matches the slot",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("buffer count {requested} outside the allowed range 1..={max}")]
    CapacityOutOfRange { requested: u32, max: u32 },

    #[error("allocated only {added} of {requested} buffers, growth rolled back")]
    AllocationFailed { requested: u32, added: u32 },

    #[error("buffer {index}: {reason}")]
    InvalidReturn { index: u32, reason: ReturnRejection },
}

impl From<PoolError> for EvsError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::CapacityOutOfRange { requested: 0, .. } => {
                EvsError::InvalidArgument("at least one buffer is required".into())
            }
            PoolError::CapacityOutOfRange { .. } | PoolError::AllocationFailed { .. } => {
                EvsError::BufferUnavailable
            }
            err @ PoolError::InvalidReturn { .. } => EvsError::InvalidReturn(err.to_string()),
        }
    }
}

/// Failures reported by a [`crate::buffer::GraphicsAllocator`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("graphics memory exhausted")]
    OutOfMemory,

    #[error("invalid buffer geometry {width}x{height} stride {stride}")]
    InvalidGeometry { width: u32, height: u32, stride: u32 },

    #[error("unknown buffer handle {0:?}")]
    UnknownHandle(NativeHandle),

    #[error("buffer handle {0:?} is already registered")]
    DuplicateHandle(NativeHandle),
}

/// Failures reported by a [`crate::pipeline::FrameTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("stream consumer is unreachable")]
    Disconnected,

    #[error("transport rejected the call: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_maps_to_invalid_argument() {
        let err: EvsError = PoolError::CapacityOutOfRange { requested: 0, max: 100 }.into();
        assert!(matches!(err, EvsError::InvalidArgument(_)));
    }

    #[test]
    fn oversized_or_failed_growth_maps_to_buffer_unavailable() {
        let over: EvsError = PoolError::CapacityOutOfRange { requested: 101, max: 100 }.into();
        let short: EvsError = PoolError::AllocationFailed { requested: 4, added: 2 }.into();
        assert_eq!(over, EvsError::BufferUnavailable);
        assert_eq!(short, EvsError::BufferUnavailable);
    }

    #[test]
    fn invalid_return_keeps_reason() {
        let err: EvsError = PoolError::InvalidReturn {
            index: 3,
            reason: ReturnRejection::AlreadyFree,
        }
        .into();
        assert_eq!(
            err,
            EvsError::InvalidReturn("buffer 3: buffer is already free".into())
        );
    }
}
