// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can occur while arbitrating control modes and
/// generating motions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServoException {
    /// InvalidCommand is returned if a command payload is empty, malformed or refers to a frame
    /// which cannot be resolved. The command is dropped for the current cycle.
    #[error("{message:?}")]
    InvalidCommand { message: String },

    /// UnsupportedControlMode is returned if a command or goal of a kind reaches a channel which
    /// cannot execute it.
    #[error("Unsupported control mode: {message:?}")]
    UnsupportedControlMode { message: String },

    /// TransitionException is returned if the execution engine rejects a strategy switch.
    #[error("{message:?}")]
    TransitionException { message: String },

    /// SplineException is returned if at least one segment of a spline could not be built.
    #[error("{message:?}")]
    SplineException { message: String },

    /// EngineException is returned if the execution engine fails outside of a transition.
    #[error("{message:?}")]
    EngineException { message: String },

    /// InvalidArgument is returned if a service call carries values outside their valid range.
    #[error("{message:?}")]
    InvalidArgument { message: String },

    /// ConfigException is returned if the driver configuration cannot be loaded or is invalid.
    #[error("{message:?}")]
    ConfigException { message: String },

    /// RealTimeException is returned if the real-time priority cannot be set
    #[error("{message:?}")]
    RealTimeException { message: String },

    /// JointCountMismatch is returned if a joint vector does not match the joint count of the robot.
    #[error("Expected {expected} joint values but got {actual}")]
    JointCountMismatch { expected: usize, actual: usize },
}

impl ServoException {
    /// True for errors caused by bad command input. Those are logged and treated as a no-op
    /// for the cycle they arrived in.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ServoException::InvalidCommand { .. } | ServoException::JointCountMismatch { .. }
        )
    }
}

/// creates an InvalidCommand from a static string slice
pub(crate) fn create_invalid_command(message: &'static str) -> ServoException {
    ServoException::InvalidCommand {
        message: message.to_string(),
    }
}

/// creates an InvalidArgument from a static string slice
pub(crate) fn create_invalid_argument(message: &'static str) -> ServoException {
    ServoException::InvalidArgument {
        message: message.to_string(),
    }
}

/// Result type which can have ServoException as Error
pub type ServoResult<T> = Result<T, ServoException>;

#[cfg(test)]
mod tests {
    use crate::exception::{create_invalid_argument, ServoException};

    #[test]
    fn invalid_input_classification() {
        assert!(ServoException::JointCountMismatch {
            expected: 7,
            actual: 6
        }
        .is_invalid_input());
        assert!(!create_invalid_argument("override out of range").is_invalid_input());
        assert!(!ServoException::TransitionException {
            message: "rejected".to_string()
        }
        .is_invalid_input());
    }

    #[test]
    fn joint_count_mismatch_message() {
        let error = ServoException::JointCountMismatch {
            expected: 7,
            actual: 3,
        };
        assert_eq!(error.to_string(), "Expected 7 joint values but got 3");
    }
}
