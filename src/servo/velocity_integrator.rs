// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains functions for turning joint and Cartesian velocity commands into position
//! destinations for streamed motions.

use std::time::Instant;

use nalgebra::{Translation3, UnitQuaternion};

use crate::exception::{ServoException, ServoResult};
use crate::servo::control_types::{CartesianPose, JointLimits, JointVector, Twist};

/// Sample intervals longer than this (in \[s\]) are considered a gap in the velocity stream.
pub static MAX_INTEGRATION_GAP: f64 = 1.0;

/// Timing state of consecutive velocity commands. Only written by the control cycle.
#[derive(Debug, Default, Clone)]
pub struct IntegrationState {
    last_cycle: Option<Instant>,
}

impl IntegrationState {
    pub fn new() -> Self {
        IntegrationState::default()
    }

    /// Time in \[s\] which passed since the last recorded velocity command.
    ///
    /// Returns 0 for the first command and after a gap longer than [`MAX_INTEGRATION_GAP`],
    /// so a stale interval is never applied.
    pub fn sample_time(&self, now: Instant) -> f64 {
        match self.last_cycle {
            None => 0.,
            Some(last) => {
                let delta_t = now.saturating_duration_since(last).as_secs_f64();
                if delta_t > MAX_INTEGRATION_GAP {
                    0.
                } else {
                    delta_t
                }
            }
        }
    }

    /// Records the time of a completed velocity command.
    pub fn record(&mut self, now: Instant) {
        self.last_cycle = Some(now);
    }
}

/// Integrates a joint velocity over one sample and keeps every joint inside its soft limits.
///
/// A joint whose integrated position would leave
/// `[min + soft_margin, max - soft_margin]` keeps its current target while all other joints move.
/// # Note
/// The resulting vector may combine moved and held joints, so it is not necessarily a point on
/// the commanded joint space path.
/// # Arguments
/// * `limits` - Joint limits including the soft margin.
/// * `current_target` - Joint destination of the previous cycle in \[rad\].
/// * `velocity` - Commanded joint velocities in \[rad/s\].
/// * `delta_t` - Sample time in \[s\], see [`IntegrationState::sample_time`].
/// # Errors
/// * [`JointCountMismatch`](`crate::exception::ServoException::JointCountMismatch`) if a vector
/// does not match the joint count of `limits`.
/// # Return
/// Next joint destination.
pub fn integrate_joint_velocity(
    limits: &JointLimits,
    current_target: &JointVector,
    velocity: &JointVector,
    delta_t: f64,
) -> ServoResult<JointVector> {
    let joint_count = limits.joint_count();
    for vector in [current_target, velocity].iter() {
        if vector.len() != joint_count {
            return Err(ServoException::JointCountMismatch {
                expected: joint_count,
                actual: vector.len(),
            });
        }
    }
    let delta_t = f64::max(delta_t, 0.);
    let mut next_target = current_target.clone();
    for i in 0..joint_count {
        let candidate = current_target[i] + velocity[i] * delta_t;
        if limits.accepts(i, candidate) {
            next_target[i] = candidate;
        }
    }
    Ok(next_target)
}

/// Integrates a twist over one sample.
///
/// Translation and the (roll, pitch, yaw) angles are advanced independently. No limits are
/// applied, the engine enforces its own Cartesian workspace.
/// # Arguments
/// * `current` - Cartesian destination of the previous cycle.
/// * `twist` - linear velocity in \[m/s\] and angular velocity in \[rad/s\].
/// * `delta_t` - Sample time in \[s\].
/// # Return
/// Next Cartesian destination in the frame of `current`.
pub fn integrate_cartesian_velocity(
    current: &CartesianPose,
    twist: &Twist,
    delta_t: f64,
) -> CartesianPose {
    let delta_t = f64::max(delta_t, 0.);
    let mut next = current.clone();
    next.pose.translation = Translation3::from(
        current.pose.translation.vector + twist.linear * delta_t,
    );
    let (roll, pitch, yaw) = current.pose.rotation.euler_angles();
    next.pose.rotation = UnitQuaternion::from_euler_angles(
        roll + twist.angular[0] * delta_t,
        pitch + twist.angular[1] * delta_t,
        yaw + twist.angular[2] * delta_t,
    );
    next
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;
    use std::time::{Duration, Instant};

    use nalgebra::UnitQuaternion;

    use crate::servo::control_types::{
        CartesianPose, JointLimits, JointVector, Twist, SOFT_JOINT_LIMIT,
    };
    use crate::servo::velocity_integrator::{
        integrate_cartesian_velocity, integrate_joint_velocity, IntegrationState,
    };

    fn degrees(value: f64) -> f64 {
        value * PI / 180.
    }

    fn float_compare(a: f64, b: f64, thresh: f64) {
        assert!((a - b).abs() < thresh, "{} != {}", a, b);
    }

    #[test]
    fn step_past_soft_limit_is_rejected() {
        let limits = JointLimits::symmetric(&[degrees(170.); 7]).unwrap();
        let current = JointVector::from_slice(&[degrees(169.9); 7]);
        let velocity = JointVector::from_slice(&[1.; 7]);
        let next = integrate_joint_velocity(&limits, &current, &velocity, 0.5).unwrap();
        assert_eq!(next, current);
    }

    #[test]
    fn joints_are_held_independently() {
        let limits = JointLimits::symmetric(&[1.0; 7]).unwrap();
        let current = JointVector::from_slice(&[0., 0.9, 0., -0.9, 0., 0., 0.5]);
        let velocity = JointVector::from_slice(&[0.2, 0.2, -0.2, -0.2, 0., 1., 1.]);
        let next = integrate_joint_velocity(&limits, &current, &velocity, 0.5).unwrap();
        float_compare(next[0], 0.1, 1e-12);
        assert_eq!(next[1], 0.9);
        float_compare(next[2], -0.1, 1e-12);
        assert_eq!(next[3], -0.9);
        assert_eq!(next[4], 0.);
        float_compare(next[5], 0.5, 1e-12);
        assert_eq!(next[6], 0.5);
    }

    #[test]
    fn integrated_positions_stay_inside_soft_limits() {
        let limits = JointLimits::symmetric(&[degrees(170.); 7]).unwrap();
        let mut target = JointVector::zeros(7);
        let velocity = JointVector::from_slice(&[1.5, -1.5, 0.7, -0.7, 3.0, -3.0, 0.1]);
        for _ in 0..2000 {
            target = integrate_joint_velocity(&limits, &target, &velocity, 0.01).unwrap();
            for i in 0..7 {
                assert!(target[i] <= limits.max()[i] - SOFT_JOINT_LIMIT);
                assert!(target[i] >= limits.min()[i] + SOFT_JOINT_LIMIT);
            }
        }
    }

    #[test]
    fn negative_sample_time_does_not_move() {
        let limits = JointLimits::symmetric(&[1.0; 2]).unwrap();
        let current = JointVector::from_slice(&[0.1, 0.2]);
        let next = integrate_joint_velocity(
            &limits,
            &current,
            &JointVector::from_slice(&[1., 1.]),
            -0.1,
        )
        .unwrap();
        assert_eq!(next, current);
    }

    #[test]
    fn mismatched_vectors_are_rejected() {
        let limits = JointLimits::symmetric(&[1.0; 7]).unwrap();
        let result = integrate_joint_velocity(
            &limits,
            &JointVector::zeros(7),
            &JointVector::zeros(6),
            0.1,
        );
        assert!(result.unwrap_err().is_invalid_input());
    }

    #[test]
    fn sample_time_resets_after_gap() {
        let start = Instant::now();
        let mut state = IntegrationState::new();
        assert_eq!(state.sample_time(start), 0.);
        state.record(start);
        float_compare(
            state.sample_time(start + Duration::from_millis(5)),
            0.005,
            1e-9,
        );
        assert_eq!(state.sample_time(start + Duration::from_millis(1500)), 0.);
        if let Some(earlier) = start.checked_sub(Duration::from_millis(5)) {
            assert_eq!(state.sample_time(earlier), 0.);
        }
    }

    #[test]
    fn twist_is_integrated_per_component() {
        let current = CartesianPose::new("iiwa_link_0", [0.5, 0., 0.4], [1., 0., 0., 0.]).unwrap();
        let twist = Twist::new("iiwa_link_0", [0.1, -0.2, 0.], [0., 0., 0.4]);
        let next = integrate_cartesian_velocity(&current, &twist, 0.5);
        float_compare(next.translation()[0], 0.55, 1e-12);
        float_compare(next.translation()[1], -0.1, 1e-12);
        float_compare(next.translation()[2], 0.4, 1e-12);
        let expected = UnitQuaternion::from_euler_angles(0., 0., 0.2);
        float_compare(next.pose.rotation.angle_to(&expected), 0., 1e-9);
        assert_eq!(next.frame_id, "iiwa_link_0");
    }
}
