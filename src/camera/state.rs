use crate::error::EvsError;

/// Lifecycle of a camera's video stream.
///
/// `Dead` is terminal: the camera was handed to another client and nothing leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Stopped,
    Running,
    Stopping,
    Dead,
}

impl StreamState {
    /// Fails with `OwnershipLost` once the camera is dead.
    pub fn ensure_alive(self) -> Result<(), EvsError> {
        match self {
            StreamState::Dead => Err(EvsError::OwnershipLost),
            _ => Ok(()),
        }
    }

    /// Check that a stream may be started from this state.
    pub fn ensure_can_start(self) -> Result<(), EvsError> {
        match self {
            StreamState::Stopped => Ok(()),
            StreamState::Running | StreamState::Stopping => Err(EvsError::AlreadyRunning),
            StreamState::Dead => Err(EvsError::OwnershipLost),
        }
    }

    /// Move `Running` to `Stopping`. Returns false, leaving the state alone, otherwise.
    pub fn begin_stop(&mut self) -> bool {
        if *self == StreamState::Running {
            *self = StreamState::Stopping;
            true
        } else {
            false
        }
    }

    /// Settle a stop started with [`StreamState::begin_stop`].
    pub fn finish_stop(&mut self) {
        if *self == StreamState::Stopping {
            *self = StreamState::Stopped;
        }
    }

    pub fn kill(&mut self) {
        *self = StreamState::Dead;
    }

    pub fn is_running(self) -> bool {
        self == StreamState::Running
    }
}
