// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the command kinds, the control strategies and the table mapping one to the other.
use std::fmt::{Display, Formatter, Result};

use num_derive::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Kind of an incoming motion request.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[derive(FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandKind {
    CartesianPose,
    CartesianPoseLinear,
    CartesianVelocity,
    JointPosition,
    JointPositionVelocity,
    JointVelocity,
    P2PCartesianPose,
    P2PCartesianPoseLinear,
    P2PJointPosition,
    P2PCartesianSpline,
    P2PJointSpline,
}

/// Streamed (servo) session flavour.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamedMode {
    /// Destinations are reached on a path chosen by the engine.
    Nonlinear,
    /// Destinations are reached on straight Cartesian lines.
    Linear,
}

/// The execution strategy which is currently active on the engine.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlStrategy {
    None,
    StreamedNonlinear,
    StreamedLinear,
    PointToPoint,
}

/// Maps every [`CommandKind`] to the strategy it has to be executed with.
pub static STRATEGY_TABLE: [(CommandKind, ControlStrategy); 11] = [
    (CommandKind::CartesianPose, ControlStrategy::StreamedNonlinear),
    (CommandKind::CartesianPoseLinear, ControlStrategy::StreamedLinear),
    (CommandKind::CartesianVelocity, ControlStrategy::StreamedNonlinear),
    (CommandKind::JointPosition, ControlStrategy::StreamedNonlinear),
    (CommandKind::JointPositionVelocity, ControlStrategy::StreamedNonlinear),
    (CommandKind::JointVelocity, ControlStrategy::StreamedNonlinear),
    (CommandKind::P2PCartesianPose, ControlStrategy::PointToPoint),
    (CommandKind::P2PCartesianPoseLinear, ControlStrategy::PointToPoint),
    (CommandKind::P2PJointPosition, ControlStrategy::PointToPoint),
    (CommandKind::P2PCartesianSpline, ControlStrategy::PointToPoint),
    (CommandKind::P2PJointSpline, ControlStrategy::PointToPoint),
];

impl CommandKind {
    /// All command kinds in table order.
    pub fn all() -> impl Iterator<Item = CommandKind> {
        STRATEGY_TABLE.iter().map(|(kind, _)| *kind)
    }

    /// Looks up the strategy this kind has to be executed with.
    pub fn strategy(self) -> ControlStrategy {
        STRATEGY_TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, strategy)| *strategy)
            .unwrap_or(ControlStrategy::None)
    }

    pub fn is_streamed(self) -> bool {
        self.strategy().streamed_mode().is_some()
    }

    pub fn is_point_to_point(self) -> bool {
        self.strategy() == ControlStrategy::PointToPoint
    }

    /// Kinds which may arrive as action goals instead of streamed commands.
    pub fn is_goal_kind(self) -> bool {
        self.is_point_to_point() && self != CommandKind::P2PJointSpline
    }
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{:?}", self)
    }
}

impl ControlStrategy {
    /// The streamed mode behind this strategy, if it is a streamed one.
    pub fn streamed_mode(self) -> Option<StreamedMode> {
        match self {
            ControlStrategy::StreamedNonlinear => Some(StreamedMode::Nonlinear),
            ControlStrategy::StreamedLinear => Some(StreamedMode::Linear),
            ControlStrategy::None | ControlStrategy::PointToPoint => None,
        }
    }
}

impl From<StreamedMode> for ControlStrategy {
    fn from(mode: StreamedMode) -> Self {
        match mode {
            StreamedMode::Nonlinear => ControlStrategy::StreamedNonlinear,
            StreamedMode::Linear => ControlStrategy::StreamedLinear,
        }
    }
}

impl StreamedMode {
    pub fn other(self) -> StreamedMode {
        match self {
            StreamedMode::Nonlinear => StreamedMode::Linear,
            StreamedMode::Linear => StreamedMode::Nonlinear,
        }
    }
}

#[cfg(test)]
mod tests {
    use num_traits::FromPrimitive;

    use crate::servo::command_types::{CommandKind, ControlStrategy, StreamedMode};

    #[test]
    fn every_kind_has_a_strategy() {
        assert_eq!(CommandKind::all().count(), 11);
        for kind in CommandKind::all() {
            assert_ne!(kind.strategy(), ControlStrategy::None);
            assert!(kind.is_streamed() != kind.is_point_to_point());
        }
    }

    #[test]
    fn partition() {
        let streamed: Vec<CommandKind> = CommandKind::all().filter(|k| k.is_streamed()).collect();
        assert_eq!(
            streamed,
            vec![
                CommandKind::CartesianPose,
                CommandKind::CartesianPoseLinear,
                CommandKind::CartesianVelocity,
                CommandKind::JointPosition,
                CommandKind::JointPositionVelocity,
                CommandKind::JointVelocity,
            ]
        );
        assert_eq!(
            CommandKind::CartesianPoseLinear.strategy(),
            ControlStrategy::StreamedLinear
        );
        assert!(!CommandKind::P2PJointSpline.is_goal_kind());
        assert!(CommandKind::P2PCartesianSpline.is_goal_kind());
    }

    #[test]
    fn kinds_from_wire_codes() {
        assert_eq!(CommandKind::from_u8(0), Some(CommandKind::CartesianPose));
        assert_eq!(CommandKind::from_u8(10), Some(CommandKind::P2PJointSpline));
        assert_eq!(CommandKind::from_u8(11), None);
    }

    #[test]
    fn streamed_modes() {
        assert_eq!(
            ControlStrategy::from(StreamedMode::Linear).streamed_mode(),
            Some(StreamedMode::Linear)
        );
        assert_eq!(ControlStrategy::PointToPoint.streamed_mode(), None);
        assert_eq!(StreamedMode::Nonlinear.other(), StreamedMode::Linear);
    }
}
