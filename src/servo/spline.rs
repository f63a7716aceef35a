// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the spline types for Cartesian and joint space spline motions and the
//! impedance parameters which can be attached to joint splines.
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::Deserialize;
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::exception::{create_invalid_command, ServoException, ServoResult};
use crate::servo::control_types::{CartesianPose, JointVector};

/// Cartesian stiffness below this value in \[N/m\] is replaced by the default.
pub static MIN_CARTESIAN_STIFFNESS: f64 = 0.01;
/// Maximum Cartesian stiffness in \[N/m\].
pub static MAX_CARTESIAN_STIFFNESS: f64 = 5000.0;
/// Default Cartesian stiffness in \[N/m\].
pub static DEFAULT_CARTESIAN_STIFFNESS: f64 = 2000.0;
/// Maximum Cartesian damping ratio.
pub static MAX_CARTESIAN_DAMPING: f64 = 1.0;
/// Default Cartesian damping ratio, used for negative values.
pub static DEFAULT_CARTESIAN_DAMPING: f64 = 0.7;
/// Relative joint velocities below this value are replaced by the default.
pub static MIN_SPLINE_RELATIVE_VELOCITY: f64 = 0.01;
/// Default relative joint velocity of a joint spline.
pub static DEFAULT_SPLINE_RELATIVE_VELOCITY: f64 = 0.1;

/// Wire codes of Cartesian spline segments.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq)]
#[derive(FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum SegmentType {
    /// Smooth spline segment (SPL).
    Spl = 0,
    /// Straight line (LIN).
    Lin = 1,
    /// Circular arc through an auxiliary point (CIRC).
    Circ = 2,
}

/// One segment of a Cartesian spline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SplineSegment {
    Line {
        target: CartesianPose,
    },
    Smooth {
        target: CartesianPose,
    },
    Arc {
        target: CartesianPose,
        auxiliary: CartesianPose,
    },
}

impl SplineSegment {
    /// Creates a segment from its wire type code.
    /// # Errors
    /// * [`InvalidCommand`](`crate::exception::ServoException::InvalidCommand`) if the code is
    /// unknown or an arc has no auxiliary point.
    pub fn from_code(
        code: i32,
        target: CartesianPose,
        auxiliary: Option<CartesianPose>,
    ) -> ServoResult<Self> {
        match SegmentType::from_i32(code) {
            Some(SegmentType::Spl) => Ok(SplineSegment::Smooth { target }),
            Some(SegmentType::Lin) => Ok(SplineSegment::Line { target }),
            Some(SegmentType::Circ) => match auxiliary {
                Some(auxiliary) => Ok(SplineSegment::Arc { target, auxiliary }),
                None => Err(ServoException::InvalidCommand {
                    message: "Circular spline segment without auxiliary point".to_string(),
                }),
            },
            None => Err(ServoException::InvalidCommand {
                message: format!("Unknown spline segment type: {}", code),
            }),
        }
    }

    pub fn segment_type(&self) -> SegmentType {
        match self {
            SplineSegment::Line { .. } => SegmentType::Lin,
            SplineSegment::Smooth { .. } => SegmentType::Spl,
            SplineSegment::Arc { .. } => SegmentType::Circ,
        }
    }

    pub fn target(&self) -> &CartesianPose {
        match self {
            SplineSegment::Line { target }
            | SplineSegment::Smooth { target }
            | SplineSegment::Arc { target, .. } => target,
        }
    }

    pub fn auxiliary(&self) -> Option<&CartesianPose> {
        match self {
            SplineSegment::Arc { auxiliary, .. } => Some(auxiliary),
            _ => None,
        }
    }
}

/// An ordered sequence of Cartesian segments executed as one motion.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CartesianSpline {
    pub segments: Vec<SplineSegment>,
}

impl CartesianSpline {
    pub fn new(segments: Vec<SplineSegment>) -> Self {
        CartesianSpline { segments }
    }
}

/// Control mode a joint spline is executed with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ImpedanceParameters {
    /// Stiff position control.
    Position,
    /// Cartesian impedance along (x, y, z).
    CartesianImpedance {
        /// in \[N/m\]
        stiffness: [f64; 3],
        /// damping ratio
        damping: [f64; 3],
    },
    /// Impedance per joint.
    JointImpedance {
        /// in \[Nm/rad\]
        stiffness: JointVector,
        /// damping ratio
        damping: JointVector,
    },
}

impl Default for ImpedanceParameters {
    fn default() -> Self {
        ImpedanceParameters::Position
    }
}

fn clamp_cartesian_stiffness(stiffness: f64) -> f64 {
    if !(stiffness >= MIN_CARTESIAN_STIFFNESS) {
        DEFAULT_CARTESIAN_STIFFNESS
    } else {
        f64::min(stiffness, MAX_CARTESIAN_STIFFNESS)
    }
}

fn clamp_cartesian_damping(damping: f64) -> f64 {
    if !(damping >= 0.) {
        DEFAULT_CARTESIAN_DAMPING
    } else {
        f64::min(damping, MAX_CARTESIAN_DAMPING)
    }
}

impl ImpedanceParameters {
    /// Decodes impedance parameters packed into the auxiliary slots of the first two spline
    /// segments. A slot holds seven numbers laid out as (x, y, z, qw, qx, qy, qz).
    ///
    /// * mode `0`: Cartesian impedance, stiffness from (x, y, z) and damping from (qx, qy, qz)
    /// of the first slot.
    /// * mode `1`: joint impedance, stiffness from the first slot and damping from the second.
    /// * any other mode: position control.
    /// # Errors
    /// * [`InvalidCommand`](`crate::exception::ServoException::InvalidCommand`) if a slot needed
    /// by the mode is missing.
    pub fn from_auxiliary_slots(
        mode: i32,
        first: Option<&[f64; 7]>,
        second: Option<&[f64; 7]>,
    ) -> ServoResult<Self> {
        let missing = |slot: &str| ServoException::InvalidCommand {
            message: format!("Impedance mode {} requires the {} auxiliary slot", mode, slot),
        };
        match mode {
            0 => {
                let first = first.ok_or_else(|| missing("first"))?;
                Ok(ImpedanceParameters::CartesianImpedance {
                    stiffness: [first[0], first[1], first[2]],
                    damping: [first[4], first[5], first[6]],
                }
                .sanitized())
            }
            1 => {
                let first = first.ok_or_else(|| missing("first"))?;
                let second = second.ok_or_else(|| missing("second"))?;
                Ok(ImpedanceParameters::JointImpedance {
                    stiffness: JointVector::from_slice(first),
                    damping: JointVector::from_slice(second),
                })
            }
            _ => Ok(ImpedanceParameters::Position),
        }
    }

    /// Clamps Cartesian stiffness into \[0.01, 5000\] (default 2000 below the range) and
    /// damping into \[0, 1\] (default 0.7 below the range). Joint impedance values are
    /// passed on unchanged.
    pub fn sanitized(self) -> Self {
        match self {
            ImpedanceParameters::CartesianImpedance { stiffness, damping } => {
                let mut clamped_stiffness = [0.; 3];
                let mut clamped_damping = [0.; 3];
                for i in 0..3 {
                    clamped_stiffness[i] = clamp_cartesian_stiffness(stiffness[i]);
                    clamped_damping[i] = clamp_cartesian_damping(damping[i]);
                }
                ImpedanceParameters::CartesianImpedance {
                    stiffness: clamped_stiffness,
                    damping: clamped_damping,
                }
            }
            other => other,
        }
    }
}

/// One joint spline segment as it arrives from the commanding channel.
///
/// Only the first segment carries the impedance mode and the relative velocity. The auxiliary
/// slots of the first two segments hold the impedance parameters, see
/// [`ImpedanceParameters::from_auxiliary_slots`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointSplineSegmentMessage {
    pub point: JointVector,
    pub auxiliary: Option<[f64; 7]>,
    pub impedance_mode: i32,
    pub relative_velocity: Option<f64>,
}

/// A joint space spline through a sequence of joint positions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct JointSpline {
    pub points: Vec<JointVector>,
    /// Relative joint velocity requested for the spline.
    pub relative_velocity: Option<f64>,
    pub impedance: ImpedanceParameters,
}

impl JointSpline {
    /// Builds a joint spline from its segments and decodes the impedance parameters.
    /// # Errors
    /// * [`InvalidCommand`](`crate::exception::ServoException::InvalidCommand`) if there are no
    /// segments or an auxiliary slot needed by the impedance mode is missing.
    pub fn from_segments(segments: &[JointSplineSegmentMessage]) -> ServoResult<Self> {
        let first = segments
            .first()
            .ok_or_else(|| create_invalid_command("Joint spline without segments"))?;
        let impedance = ImpedanceParameters::from_auxiliary_slots(
            first.impedance_mode,
            first.auxiliary.as_ref(),
            segments.get(1).and_then(|segment| segment.auxiliary.as_ref()),
        )?;
        Ok(JointSpline {
            points: segments.iter().map(|segment| segment.point.clone()).collect(),
            relative_velocity: first.relative_velocity,
            impedance,
        })
    }

    /// Relative joint velocity the spline is executed with: 0.1 if missing or below 0.01,
    /// at most 1.
    pub fn effective_relative_velocity(&self) -> f64 {
        match self.relative_velocity {
            Some(velocity) if velocity >= MIN_SPLINE_RELATIVE_VELOCITY => f64::min(velocity, 1.),
            _ => DEFAULT_SPLINE_RELATIVE_VELOCITY,
        }
    }
}
