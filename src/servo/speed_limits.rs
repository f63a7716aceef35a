// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the speed ceilings which are applied to every generated motion.
//!
//! The [`SpeedPolicy`] is owned by the driver and only mutated while the driver lock is held.
//! Motions copy a [`MotionLimits`] snapshot out of it, so a motion never observes a partially
//! updated policy.
use serde::Deserialize;
use serde::Serialize;

use crate::exception::{ServoException, ServoResult};

/// Default relative joint velocity for point-to-point motions.
pub static DEFAULT_RELATIVE_VELOCITY: f64 = 0.1;
/// Default relative joint acceleration for point-to-point motions.
pub static DEFAULT_RELATIVE_ACCELERATION: f64 = 0.1;

/// Limits for point-to-point motions in joint space, relative to the robot maximum.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct PtpJointLimits {
    /// Relative joint velocity in (0, 1].
    pub relative_velocity: f64,
    /// Relative joint acceleration in (0, 1].
    pub relative_acceleration: f64,
}

impl Default for PtpJointLimits {
    fn default() -> Self {
        PtpJointLimits {
            relative_velocity: DEFAULT_RELATIVE_VELOCITY,
            relative_acceleration: DEFAULT_RELATIVE_ACCELERATION,
        }
    }
}

/// Limits for point-to-point motions in Cartesian space.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct PtpCartesianLimits {
    /// in \[m/s\]
    pub max_cartesian_velocity: f64,
    /// in \[rad/s\]
    pub max_orientation_velocity: f64,
    /// in \[m/s²\]
    pub max_cartesian_acceleration: f64,
    /// in \[rad/s²\]
    pub max_orientation_acceleration: f64,
    /// in \[m/s³\]
    pub max_cartesian_jerk: f64,
    /// in \[rad/s³\]
    pub max_orientation_jerk: f64,
}

impl Default for PtpCartesianLimits {
    fn default() -> Self {
        PtpCartesianLimits {
            max_cartesian_velocity: 0.1,
            max_orientation_velocity: 0.5,
            max_cartesian_acceleration: 0.2,
            max_orientation_acceleration: 0.5,
            max_cartesian_jerk: 1.0,
            max_orientation_jerk: 1.0,
        }
    }
}

/// Limits of the nonlinear streamed session, relative to the robot maximum.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct StreamedJointLimits {
    pub relative_velocity: f64,
    pub relative_acceleration: f64,
    pub override_acceleration: f64,
}

impl Default for StreamedJointLimits {
    fn default() -> Self {
        StreamedJointLimits {
            relative_velocity: DEFAULT_RELATIVE_VELOCITY,
            relative_acceleration: DEFAULT_RELATIVE_ACCELERATION,
            override_acceleration: 1.0,
        }
    }
}

/// Limits of the linear streamed session.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct StreamedLinearLimits {
    /// (x, y, z) in \[m/s\]
    pub max_translational_velocity: [f64; 3],
    /// (a, b, c) in \[rad/s\]
    pub max_rotational_velocity: [f64; 3],
}

impl Default for StreamedLinearLimits {
    fn default() -> Self {
        StreamedLinearLimits {
            max_translational_velocity: [0.1; 3],
            max_rotational_velocity: [0.5; 3],
        }
    }
}

/// Snapshot of the ceilings which apply to one point-to-point or spline motion.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct MotionLimits {
    pub override_reduction: f64,
    pub joint: PtpJointLimits,
    pub cartesian: PtpCartesianLimits,
}

/// Speed ceilings applied uniformly to every generated motion.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct SpeedPolicy {
    override_reduction: f64,
    ptp_joint: PtpJointLimits,
    ptp_cartesian: PtpCartesianLimits,
    streamed_joint: StreamedJointLimits,
    streamed_linear: StreamedLinearLimits,
}

impl Default for SpeedPolicy {
    fn default() -> Self {
        SpeedPolicy {
            override_reduction: 1.0,
            ptp_joint: PtpJointLimits::default(),
            ptp_cartesian: PtpCartesianLimits::default(),
            streamed_joint: StreamedJointLimits::default(),
            streamed_linear: StreamedLinearLimits::default(),
        }
    }
}

fn check_fraction(name: &str, value: f64) -> ServoResult<()> {
    if value.is_finite() && value > 0. && value <= 1. {
        Ok(())
    } else {
        Err(ServoException::InvalidArgument {
            message: format!("{} must be in (0, 1], got {}", name, value),
        })
    }
}

fn check_positive(name: &str, value: f64) -> ServoResult<()> {
    if value.is_finite() && value > 0. {
        Ok(())
    } else {
        Err(ServoException::InvalidArgument {
            message: format!("{} must be positive, got {}", name, value),
        })
    }
}

impl SpeedPolicy {
    pub fn override_reduction(&self) -> f64 {
        self.override_reduction
    }
    pub fn ptp_joint(&self) -> PtpJointLimits {
        self.ptp_joint
    }
    pub fn ptp_cartesian(&self) -> PtpCartesianLimits {
        self.ptp_cartesian
    }
    pub fn streamed_joint(&self) -> StreamedJointLimits {
        self.streamed_joint
    }
    pub fn streamed_linear(&self) -> StreamedLinearLimits {
        self.streamed_linear
    }

    /// Checks every ceiling of the policy.
    pub fn validate(&self) -> ServoResult<()> {
        check_fraction("override reduction", self.override_reduction)?;
        Self::check_ptp_joint(&self.ptp_joint)?;
        Self::check_ptp_cartesian(&self.ptp_cartesian)?;
        Self::check_streamed_joint(&self.streamed_joint)?;
        Self::check_streamed_linear(&self.streamed_linear)
    }

    /// Sets the global override fraction.
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::ServoException::InvalidArgument`) if not in (0, 1].
    pub fn set_override_reduction(&mut self, override_reduction: f64) -> ServoResult<()> {
        check_fraction("override reduction", override_reduction)?;
        self.override_reduction = override_reduction;
        Ok(())
    }

    pub fn set_ptp_joint(&mut self, limits: PtpJointLimits) -> ServoResult<()> {
        Self::check_ptp_joint(&limits)?;
        self.ptp_joint = limits;
        Ok(())
    }

    pub fn set_ptp_cartesian(&mut self, limits: PtpCartesianLimits) -> ServoResult<()> {
        Self::check_ptp_cartesian(&limits)?;
        self.ptp_cartesian = limits;
        Ok(())
    }

    pub fn set_streamed_joint(&mut self, limits: StreamedJointLimits) -> ServoResult<()> {
        Self::check_streamed_joint(&limits)?;
        self.streamed_joint = limits;
        Ok(())
    }

    pub fn set_streamed_linear(&mut self, limits: StreamedLinearLimits) -> ServoResult<()> {
        Self::check_streamed_linear(&limits)?;
        self.streamed_linear = limits;
        Ok(())
    }

    /// Copies the ceilings which apply to a point-to-point or spline motion.
    pub fn motion_limits(&self) -> MotionLimits {
        MotionLimits {
            override_reduction: self.override_reduction,
            joint: self.ptp_joint,
            cartesian: self.ptp_cartesian,
        }
    }

    fn check_ptp_joint(limits: &PtpJointLimits) -> ServoResult<()> {
        check_fraction("relative joint velocity", limits.relative_velocity)?;
        check_fraction("relative joint acceleration", limits.relative_acceleration)
    }

    fn check_ptp_cartesian(limits: &PtpCartesianLimits) -> ServoResult<()> {
        check_positive("max Cartesian velocity", limits.max_cartesian_velocity)?;
        check_positive("max orientation velocity", limits.max_orientation_velocity)?;
        check_positive("max Cartesian acceleration", limits.max_cartesian_acceleration)?;
        check_positive(
            "max orientation acceleration",
            limits.max_orientation_acceleration,
        )?;
        check_positive("max Cartesian jerk", limits.max_cartesian_jerk)?;
        check_positive("max orientation jerk", limits.max_orientation_jerk)
    }

    fn check_streamed_joint(limits: &StreamedJointLimits) -> ServoResult<()> {
        check_fraction("relative joint velocity", limits.relative_velocity)?;
        check_fraction("relative joint acceleration", limits.relative_acceleration)?;
        check_fraction("override joint acceleration", limits.override_acceleration)
    }

    fn check_streamed_linear(limits: &StreamedLinearLimits) -> ServoResult<()> {
        for &v in limits.max_translational_velocity.iter() {
            check_positive("max translational velocity", v)?;
        }
        for &v in limits.max_rotational_velocity.iter() {
            check_positive("max rotational velocity", v)?;
        }
        Ok(())
    }
}
