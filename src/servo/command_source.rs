// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the incoming motion commands and the source they are read from.
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::servo::command_types::CommandKind;
use crate::servo::control_types::{CartesianPose, JointPositionVelocity, JointVector, Twist};
use crate::servo::spline::{CartesianSpline, JointSpline};

/// A motion request of one [`CommandKind`] together with its payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MotionCommand {
    CartesianPose(CartesianPose),
    CartesianPoseLinear(CartesianPose),
    CartesianVelocity(Twist),
    JointPosition(JointVector),
    JointPositionVelocity(JointPositionVelocity),
    JointVelocity(JointVector),
    P2PCartesianPose(CartesianPose),
    P2PCartesianPoseLinear(CartesianPose),
    P2PJointPosition(JointVector),
    P2PCartesianSpline(CartesianSpline),
    P2PJointSpline(JointSpline),
}

impl MotionCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            MotionCommand::CartesianPose(_) => CommandKind::CartesianPose,
            MotionCommand::CartesianPoseLinear(_) => CommandKind::CartesianPoseLinear,
            MotionCommand::CartesianVelocity(_) => CommandKind::CartesianVelocity,
            MotionCommand::JointPosition(_) => CommandKind::JointPosition,
            MotionCommand::JointPositionVelocity(_) => CommandKind::JointPositionVelocity,
            MotionCommand::JointVelocity(_) => CommandKind::JointVelocity,
            MotionCommand::P2PCartesianPose(_) => CommandKind::P2PCartesianPose,
            MotionCommand::P2PCartesianPoseLinear(_) => CommandKind::P2PCartesianPoseLinear,
            MotionCommand::P2PJointPosition(_) => CommandKind::P2PJointPosition,
            MotionCommand::P2PCartesianSpline(_) => CommandKind::P2PCartesianSpline,
            MotionCommand::P2PJointSpline(_) => CommandKind::P2PJointSpline,
        }
    }

    /// Whether the command is a multi-segment joint spline.
    pub fn is_joint_spline(&self) -> bool {
        matches!(self, MotionCommand::P2PJointSpline(_))
    }
}

/// Yields the latest streamed command, at most one per cycle.
#[cfg_attr(test, automock)]
pub trait CommandSource: Send {
    /// Takes the pending command, leaving the source empty.
    fn take_pending(&mut self) -> Option<MotionCommand>;
}
