// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the value types used for joint space and Cartesian motion commands.

use std::ops::{Index, IndexMut};

use nalgebra::{DVector, Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::Deserialize;
use serde::Serialize;

use crate::exception::{create_invalid_command, ServoException, ServoResult};

/// Soft margin which is kept away from the hard joint limits: 1 degree in \[rad\].
pub static SOFT_JOINT_LIMIT: f64 = 0.0174533;

/// Ordered joint values (positions, velocities or displacements).
/// The length always equals the joint count of the robot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointVector(DVector<f64>);

impl JointVector {
    /// Creates a new JointVector from a slice.
    pub fn from_slice(values: &[f64]) -> Self {
        JointVector(DVector::from_column_slice(values))
    }
    /// Creates a JointVector of `joint_count` zeros.
    pub fn zeros(joint_count: usize) -> Self {
        JointVector(DVector::zeros(joint_count))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice()
    }
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }
    /// Returns this vector scaled by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        JointVector(&self.0 * factor)
    }

    /// Checks that the vector can be commanded on a robot with `joint_count` joints.
    /// # Errors
    /// * [`InvalidCommand`](`crate::exception::ServoException::InvalidCommand`) if empty or not finite.
    /// * [`JointCountMismatch`](`crate::exception::ServoException::JointCountMismatch`) if the length is wrong.
    pub fn validate(&self, joint_count: usize) -> ServoResult<()> {
        if self.is_empty() {
            return Err(create_invalid_command("Received an empty joint vector"));
        }
        if self.len() != joint_count {
            return Err(ServoException::JointCountMismatch {
                expected: joint_count,
                actual: self.len(),
            });
        }
        if !self.is_finite() {
            return Err(create_invalid_command(
                "Received a joint vector with infinite or NaN entries",
            ));
        }
        Ok(())
    }
}

impl From<Vec<f64>> for JointVector {
    fn from(values: Vec<f64>) -> Self {
        JointVector(DVector::from_vec(values))
    }
}

impl Index<usize> for JointVector {
    type Output = f64;
    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for JointVector {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

/// Hard joint limits of the robot together with the soft margin kept away from them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointLimits {
    min: JointVector,
    max: JointVector,
    soft_margin: f64,
}

impl JointLimits {
    /// Creates new JointLimits.
    /// # Arguments
    /// * `min` - Lower hard joint limits in \[rad\].
    /// * `max` - Upper hard joint limits in \[rad\].
    /// * `soft_margin` - Distance kept away from both limits in \[rad\].
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::ServoException::InvalidArgument`) if the vectors
    /// differ in length, are empty or if a range is empty after applying the margin.
    pub fn new(min: JointVector, max: JointVector, soft_margin: f64) -> ServoResult<Self> {
        if min.is_empty() || min.len() != max.len() {
            return Err(ServoException::InvalidArgument {
                message: format!(
                    "Joint limits must have matching non-zero lengths, got {} and {}",
                    min.len(),
                    max.len()
                ),
            });
        }
        if !soft_margin.is_finite() || soft_margin < 0. {
            return Err(ServoException::InvalidArgument {
                message: format!("Invalid soft joint limit margin {}", soft_margin),
            });
        }
        for i in 0..min.len() {
            if !(min[i] + soft_margin < max[i] - soft_margin) {
                return Err(ServoException::InvalidArgument {
                    message: format!(
                        "Joint {} has an empty range [{}, {}] with margin {}",
                        i, min[i], max[i], soft_margin
                    ),
                });
            }
        }
        Ok(JointLimits {
            min,
            max,
            soft_margin,
        })
    }

    /// Symmetric limits `[-limit[i], limit[i]]` using [`SOFT_JOINT_LIMIT`].
    pub fn symmetric(limit: &[f64]) -> ServoResult<Self> {
        let max = JointVector::from_slice(limit);
        JointLimits::new(max.scaled(-1.), max, SOFT_JOINT_LIMIT)
    }

    pub fn joint_count(&self) -> usize {
        self.min.len()
    }
    pub fn min(&self) -> &JointVector {
        &self.min
    }
    pub fn max(&self) -> &JointVector {
        &self.max
    }
    pub fn soft_margin(&self) -> f64 {
        self.soft_margin
    }

    /// Determines whether `position` lies inside the soft envelope of joint `joint`.
    pub fn accepts(&self, joint: usize, position: f64) -> bool {
        position >= self.min[joint] + self.soft_margin
            && position <= self.max[joint] - self.soft_margin
    }
}

/// Extra degree of freedom information which selects one of several joint space solutions
/// for the same Cartesian pose.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct RedundancyHint {
    /// Elbow (E1) angle in \[rad\].
    pub e1: f64,
    pub status: i32,
    pub turn: i32,
}

impl RedundancyHint {
    /// A hint with negative status or turn means "not specified".
    pub fn is_specified(&self) -> bool {
        self.status >= 0 && self.turn >= 0
    }
}

/// A Cartesian pose relative to a named reference frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CartesianPose {
    /// Name of the reference frame.
    pub frame_id: String,
    /// Position in \[m\] and orientation.
    pub pose: Isometry3<f64>,
    /// Optional redundancy information.
    pub redundancy: Option<RedundancyHint>,
}

impl CartesianPose {
    /// Creates a new CartesianPose.
    /// # Arguments
    /// * `frame_id` - Reference frame.
    /// * `position` - (x, y, z) in \[m\].
    /// * `orientation` - quaternion (w, x, y, z), normalized on construction.
    /// # Errors
    /// * [`InvalidCommand`](`crate::exception::ServoException::InvalidCommand`) if a value is not
    /// finite or the quaternion has zero norm.
    pub fn new(frame_id: &str, position: [f64; 3], orientation: [f64; 4]) -> ServoResult<Self> {
        if position.iter().chain(orientation.iter()).any(|x| !x.is_finite()) {
            return Err(create_invalid_command(
                "Cartesian pose contains infinite or NaN entries",
            ));
        }
        let quaternion = Quaternion::new(
            orientation[0],
            orientation[1],
            orientation[2],
            orientation[3],
        );
        if quaternion.norm() < 1e-9 {
            return Err(create_invalid_command(
                "Cartesian pose orientation is not a valid quaternion",
            ));
        }
        Ok(CartesianPose {
            frame_id: frame_id.to_string(),
            pose: Isometry3::from_parts(
                Translation3::new(position[0], position[1], position[2]),
                UnitQuaternion::from_quaternion(quaternion),
            ),
            redundancy: None,
        })
    }

    /// Attaches a redundancy hint to the pose.
    pub fn with_redundancy(mut self, redundancy: RedundancyHint) -> Self {
        self.redundancy = Some(redundancy);
        self
    }

    /// The redundancy hint, if one is attached and specified.
    pub fn effective_redundancy(&self) -> Option<RedundancyHint> {
        self.redundancy.filter(RedundancyHint::is_specified)
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.pose.translation.vector
    }
}

/// Linear and angular velocity relative to a named frame. Consumed once per cycle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Twist {
    pub frame_id: String,
    /// Linear velocity in \[m/s\].
    pub linear: Vector3<f64>,
    /// Angular velocity in \[rad/s\].
    pub angular: Vector3<f64>,
}

impl Twist {
    pub fn new(frame_id: &str, linear: [f64; 3], angular: [f64; 3]) -> Self {
        Twist {
            frame_id: frame_id.to_string(),
            linear: Vector3::from_column_slice(&linear),
            angular: Vector3::from_column_slice(&angular),
        }
    }
    pub fn is_finite(&self) -> bool {
        self.linear.iter().chain(self.angular.iter()).all(|x| x.is_finite())
    }
}

/// Joint positions together with the velocities at which they should be reached.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointPositionVelocity {
    /// Desired joint angles in \[rad\].
    pub position: JointVector,
    /// Desired joint velocities in \[rad/s\].
    pub velocity: JointVector,
}
