// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the contract of the motion execution engine and the types which are passed into it.
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::exception::{ServoException, ServoResult};
use crate::servo::command_types::StreamedMode;
use crate::servo::control_types::{CartesianPose, JointPositionVelocity, JointVector};
use crate::servo::speed_limits::{MotionLimits, StreamedJointLimits, StreamedLinearLimits};
use crate::servo::spline::{ImpedanceParameters, SplineSegment};

/// Identifies a streamed session created by the engine.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: u64,
    pub mode: StreamedMode,
}

/// A destination for the active streamed session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamedTarget {
    Joint(JointVector),
    JointWithVelocity(JointPositionVelocity),
    Cartesian(CartesianPose),
}

/// A run-to-completion motion.
#[derive(Debug, Clone, PartialEq)]
pub enum OneShotMotion {
    /// Point-to-point motion to a Cartesian pose.
    CartesianPointToPoint(CartesianPose),
    /// Straight line to a Cartesian pose.
    CartesianLinear(CartesianPose),
    /// Point-to-point motion to a joint position.
    JointPointToPoint(JointVector),
    /// Cartesian spline with all poses expressed in the robot base frame.
    CartesianSpline(Vec<SplineSegment>),
    /// Joint space spline executed with the given impedance parameters.
    JointSpline {
        points: Vec<JointVector>,
        impedance: ImpedanceParameters,
    },
}

/// A one-shot motion together with the speed ceilings it has to respect.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSpec {
    pub motion: OneShotMotion,
    pub limits: MotionLimits,
}

/// Final state of a one-shot motion.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionOutcome {
    Succeeded,
    Failed(String),
}

/// Called once by the engine when a one-shot motion finished.
pub type CompletionCallback = Box<dyn FnOnce(MotionOutcome) + Send>;

/// Controller used by a streamed session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlModeSpec {
    /// Stiff position control.
    Position,
    /// Per joint stiffness in \[Nm/rad\] and damping ratio.
    JointImpedance {
        stiffness: JointVector,
        damping: JointVector,
    },
    /// Stiffness along (x, y, z, a, b, c) and damping ratio per Cartesian degree of freedom.
    CartesianImpedance {
        stiffness: [f64; 6],
        damping: [f64; 6],
    },
}

impl Default for ControlModeSpec {
    fn default() -> Self {
        ControlModeSpec::Position
    }
}

impl ControlModeSpec {
    /// Two modes belong to the same family if they use the same controller, regardless of
    /// their parameters.
    pub fn same_family(&self, other: &ControlModeSpec) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Checks the controller parameters.
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::ServoException::InvalidArgument`) if a value is
    /// negative, not finite or a joint vector has the wrong length.
    pub fn validate(&self, joint_count: usize) -> ServoResult<()> {
        let check = |values: &[f64]| -> ServoResult<()> {
            if values.iter().all(|v| v.is_finite() && *v >= 0.) {
                Ok(())
            } else {
                Err(ServoException::InvalidArgument {
                    message: format!("Invalid impedance parameters {:?}", values),
                })
            }
        };
        match self {
            ControlModeSpec::Position => Ok(()),
            ControlModeSpec::JointImpedance { stiffness, damping } => {
                for vector in [stiffness, damping].iter() {
                    if vector.len() != joint_count {
                        return Err(ServoException::InvalidArgument {
                            message: format!(
                                "Joint impedance needs {} values, got {}",
                                joint_count,
                                vector.len()
                            ),
                        });
                    }
                    check(vector.as_slice())?;
                }
                Ok(())
            }
            ControlModeSpec::CartesianImpedance { stiffness, damping } => {
                check(stiffness)?;
                check(damping)
            }
        }
    }
}

/// Everything needed to build or resume a streamed session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamedSettings {
    pub control_mode: ControlModeSpec,
    pub joint_limits: StreamedJointLimits,
    pub linear_limits: StreamedLinearLimits,
    /// Frame which is moved to streamed Cartesian destinations.
    pub endpoint_frame: String,
}

/// The realtime motion execution engine of the robot.
///
/// Strategy transitions and service calls are made while the driver lock is held. Motion calls
/// of the control cycle are made after the lock was released and may block until the engine
/// accepted the motion. One-shot motions report through their [`CompletionCallback`].
#[cfg_attr(test, automock)]
pub trait ExecutionEngine: Send {
    /// Whether the robot currently accepts new destinations.
    fn is_ready_to_move(&self) -> bool;
    fn set_streamed_destination(
        &mut self,
        handle: StreamHandle,
        target: StreamedTarget,
    ) -> ServoResult<()>;
    /// The joint destination the streamed session is currently heading to.
    fn current_joint_destination(&self, handle: StreamHandle) -> ServoResult<JointVector>;
    /// The Cartesian destination of `frame_id` the streamed session is currently heading to.
    fn current_cartesian_destination(
        &self,
        handle: StreamHandle,
        frame_id: &str,
    ) -> ServoResult<CartesianPose>;
    fn submit_one_shot(
        &mut self,
        spec: MotionSpec,
        on_complete: Option<CompletionCallback>,
    ) -> ServoResult<()>;
    /// Builds a streamed session of mode `to`, stopping `from` if given.
    fn switch_streamed_strategy(
        &mut self,
        from: Option<StreamHandle>,
        to: StreamedMode,
        settings: &StreamedSettings,
    ) -> ServoResult<StreamHandle>;
    /// Resumes a suspended streamed session.
    fn enable_streamed(&mut self, handle: StreamHandle, settings: &StreamedSettings)
        -> ServoResult<()>;
    /// Suspends a streamed session so one-shot motions can run.
    fn disable_streamed(&mut self, handle: StreamHandle) -> ServoResult<()>;
    /// Changes the parameters of the running controller without rebuilding the session.
    fn change_control_mode_settings(
        &mut self,
        handle: StreamHandle,
        spec: &ControlModeSpec,
    ) -> ServoResult<()>;
    /// Rebuilds a streamed session of the same mode with new settings.
    fn reconfigure_streamed(
        &mut self,
        handle: StreamHandle,
        settings: &StreamedSettings,
    ) -> ServoResult<StreamHandle>;
    /// Applies a global speed override fraction in (0, 1] to the realtime layer.
    fn apply_override(&mut self, fraction: f64) -> ServoResult<()>;
    /// Remaining time in \[s\] until the streamed session reaches its destination.
    fn remaining_time(&self, handle: StreamHandle) -> ServoResult<f64>;
}

/// Stops every motion of the engine.
///
/// Called from service threads without any driver lock, possibly while the control cycle is
/// inside an [`ExecutionEngine`] call.
#[cfg_attr(test, automock)]
pub trait EmergencyHalt: Send + Sync {
    fn halt(&self) -> ServoResult<()>;
}

#[cfg(test)]
mod tests {
    use crate::servo::control_types::JointVector;
    use crate::servo::execution_engine::ControlModeSpec;

    #[test]
    fn families() {
        let soft = ControlModeSpec::CartesianImpedance {
            stiffness: [100.; 6],
            damping: [0.5; 6],
        };
        let stiff = ControlModeSpec::CartesianImpedance {
            stiffness: [4000.; 6],
            damping: [0.9; 6],
        };
        assert!(soft.same_family(&stiff));
        assert!(!soft.same_family(&ControlModeSpec::Position));
        assert!(!ControlModeSpec::JointImpedance {
            stiffness: JointVector::zeros(7),
            damping: JointVector::zeros(7)
        }
        .same_family(&soft));
    }

    #[test]
    fn spec_validation() {
        assert!(ControlModeSpec::Position.validate(7).is_ok());
        let joint = ControlModeSpec::JointImpedance {
            stiffness: JointVector::from_slice(&[500.; 7]),
            damping: JointVector::from_slice(&[0.7; 6]),
        };
        assert!(joint.validate(7).is_err());
        let cartesian = ControlModeSpec::CartesianImpedance {
            stiffness: [2000., 2000., 2000., 200., 200., -1.],
            damping: [0.7; 6],
        };
        assert!(cartesian.validate(7).is_err());
    }
}
