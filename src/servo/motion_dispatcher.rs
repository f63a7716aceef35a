// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains [`Motions`], which turns every kind of [`MotionCommand`] into exactly one call
//! into the execution engine.
//!
//! Dispatching happens in two phases. [`Motions::prepare`] validates the payload and resolves
//! all frames without touching the engine, so a bad command never causes a strategy switch.
//! [`Motions::execute`] runs after the required strategy is active and generates the actual
//! destination or one-shot motion.
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::exception::{create_invalid_command, ServoException, ServoResult};
use crate::servo::command_source::MotionCommand;
use crate::servo::control_types::{CartesianPose, JointLimits, JointPositionVelocity, JointVector, Twist};
use crate::servo::execution_engine::{
    CompletionCallback, ExecutionEngine, MotionSpec, OneShotMotion, StreamHandle, StreamedTarget,
};
use crate::servo::frame_resolver::{resolve_into, FrameResolver};
use crate::servo::speed_limits::MotionLimits;
use crate::servo::spline::{CartesianSpline, ImpedanceParameters, JointSpline, SplineSegment};
use crate::servo::velocity_integrator::{
    integrate_cartesian_velocity, integrate_joint_velocity, IntegrationState,
};

/// A validated command whose frames are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedMotion {
    /// A destination which is passed to the streamed session as is.
    Streamed(StreamedTarget),
    /// Joint velocity in \[rad/s\] which is integrated into the current joint destination.
    JointVelocity(JointVector),
    /// Twist which is integrated into the current Cartesian destination of the endpoint frame.
    CartesianVelocity(Twist),
    /// A run-to-completion motion.
    OneShot {
        motion: OneShotMotion,
        /// Replaces the relative joint velocity of the applied limits.
        relative_velocity: Option<f64>,
    },
}

/// Everything [`Motions::execute`] needs from the driver for one command.
pub struct ExecutionContext<'a> {
    pub engine: &'a mut dyn ExecutionEngine,
    /// The active streamed session, if any.
    pub stream: Option<StreamHandle>,
    pub endpoint_frame: &'a str,
    /// Snapshot of the speed policy.
    pub limits: MotionLimits,
    pub on_complete: Option<CompletionCallback>,
    pub now: Instant,
}

/// Generates motions for all command kinds.
#[derive(Debug)]
pub struct Motions {
    joint_limits: JointLimits,
    base_frame: String,
    integration: IntegrationState,
}

impl Motions {
    /// Creates new Motions.
    /// # Arguments
    /// * `joint_limits` - Hard joint limits and soft margin used for joint velocity commands.
    /// * `base_frame` - Frame all one-shot Cartesian targets are expressed in.
    pub fn new(joint_limits: JointLimits, base_frame: &str) -> Self {
        Motions {
            joint_limits,
            base_frame: base_frame.to_string(),
            integration: IntegrationState::new(),
        }
    }

    pub fn joint_count(&self) -> usize {
        self.joint_limits.joint_count()
    }

    pub fn base_frame(&self) -> &str {
        &self.base_frame
    }

    /// Validates `command` and resolves its frames.
    /// # Errors
    /// * [`InvalidCommand`](`crate::exception::ServoException::InvalidCommand`) or
    /// [`JointCountMismatch`](`crate::exception::ServoException::JointCountMismatch`) for an
    /// empty, malformed or unresolvable payload.
    /// * [`SplineException`](`crate::exception::ServoException::SplineException`) if at least
    /// one Cartesian spline segment cannot be resolved. All segments are checked before.
    pub fn prepare(
        &self,
        command: &MotionCommand,
        resolver: &dyn FrameResolver,
    ) -> ServoResult<PreparedMotion> {
        let joint_count = self.joint_count();
        match command {
            MotionCommand::CartesianPose(pose) => Ok(PreparedMotion::Streamed(
                StreamedTarget::Cartesian(self.resolve_target(pose, resolver)?),
            )),
            MotionCommand::CartesianPoseLinear(pose) => Ok(PreparedMotion::Streamed(
                StreamedTarget::Cartesian(self.resolve_target(pose, resolver)?),
            )),
            MotionCommand::CartesianVelocity(twist) => {
                if !twist.is_finite() {
                    return Err(create_invalid_command(
                        "Cartesian velocity contains infinite or NaN entries",
                    ));
                }
                Ok(PreparedMotion::CartesianVelocity(twist.clone()))
            }
            MotionCommand::JointPosition(position) => {
                position.validate(joint_count)?;
                Ok(PreparedMotion::Streamed(StreamedTarget::Joint(
                    position.clone(),
                )))
            }
            MotionCommand::JointPositionVelocity(command) => {
                command.position.validate(joint_count)?;
                command.velocity.validate(joint_count)?;
                Ok(PreparedMotion::Streamed(StreamedTarget::JointWithVelocity(
                    command.clone(),
                )))
            }
            MotionCommand::JointVelocity(velocity) => {
                velocity.validate(joint_count)?;
                Ok(PreparedMotion::JointVelocity(velocity.clone()))
            }
            MotionCommand::P2PCartesianPose(pose) => Ok(one_shot(
                OneShotMotion::CartesianPointToPoint(self.resolve_target(pose, resolver)?),
            )),
            MotionCommand::P2PCartesianPoseLinear(pose) => Ok(one_shot(
                OneShotMotion::CartesianLinear(self.resolve_target(pose, resolver)?),
            )),
            MotionCommand::P2PJointPosition(position) => {
                position.validate(joint_count)?;
                Ok(one_shot(OneShotMotion::JointPointToPoint(position.clone())))
            }
            MotionCommand::P2PCartesianSpline(spline) => Ok(one_shot(
                OneShotMotion::CartesianSpline(self.resolve_spline(spline, resolver)?),
            )),
            MotionCommand::P2PJointSpline(spline) => self.prepare_joint_spline(spline),
        }
    }

    /// Executes a prepared command. Streamed destinations are only set while the engine is
    /// ready to move.
    /// # Errors
    /// * [`EngineException`](`crate::exception::ServoException::EngineException`) if a streamed
    /// command arrives without an active streamed session or the engine fails.
    pub fn execute(
        &mut self,
        prepared: PreparedMotion,
        context: ExecutionContext,
    ) -> ServoResult<()> {
        let ExecutionContext {
            engine,
            stream,
            endpoint_frame,
            limits,
            on_complete,
            now,
        } = context;
        match prepared {
            PreparedMotion::Streamed(target) => {
                let handle = require_stream(stream)?;
                if engine.is_ready_to_move() {
                    engine.set_streamed_destination(handle, target)?;
                }
                Ok(())
            }
            PreparedMotion::JointVelocity(velocity) => {
                let handle = require_stream(stream)?;
                let current = engine.current_joint_destination(handle)?;
                let delta_t = self.integration.sample_time(now);
                let next = integrate_joint_velocity(&self.joint_limits, &current, &velocity, delta_t)?;
                if engine.is_ready_to_move() {
                    engine.set_streamed_destination(
                        handle,
                        StreamedTarget::JointWithVelocity(JointPositionVelocity {
                            position: next,
                            velocity,
                        }),
                    )?;
                }
                self.integration.record(now);
                Ok(())
            }
            PreparedMotion::CartesianVelocity(twist) => {
                let handle = require_stream(stream)?;
                let current = engine.current_cartesian_destination(handle, endpoint_frame)?;
                let delta_t = self.integration.sample_time(now);
                let next = integrate_cartesian_velocity(&current, &twist, delta_t);
                if engine.is_ready_to_move() {
                    engine.set_streamed_destination(handle, StreamedTarget::Cartesian(next))?;
                }
                self.integration.record(now);
                Ok(())
            }
            PreparedMotion::OneShot {
                motion,
                relative_velocity,
            } => {
                let mut limits = limits;
                if let Some(relative_velocity) = relative_velocity {
                    limits.joint.relative_velocity = relative_velocity;
                }
                match &motion {
                    OneShotMotion::CartesianSpline(segments) => {
                        debug!("Executing spline with {} segments", segments.len())
                    }
                    OneShotMotion::JointSpline { points, .. } => info!(
                        "Executing joint spline with {} points at relative velocity {}",
                        points.len(),
                        limits.joint.relative_velocity
                    ),
                    _ => {}
                }
                engine.submit_one_shot(MotionSpec { motion, limits }, on_complete)
            }
        }
    }

    fn resolve_target(
        &self,
        pose: &CartesianPose,
        resolver: &dyn FrameResolver,
    ) -> ServoResult<CartesianPose> {
        if !pose.translation().iter().all(|x| x.is_finite())
            || !pose.pose.rotation.coords.iter().all(|x| x.is_finite())
        {
            return Err(create_invalid_command(
                "Cartesian pose contains infinite or NaN entries",
            ));
        }
        let mut resolved = resolve_into(resolver, pose, &self.base_frame).ok_or_else(|| {
            ServoException::InvalidCommand {
                message: format!(
                    "Cannot resolve frame {} into {}",
                    pose.frame_id, self.base_frame
                ),
            }
        })?;
        resolved.redundancy = pose.effective_redundancy();
        Ok(resolved)
    }

    fn resolve_spline(
        &self,
        spline: &CartesianSpline,
        resolver: &dyn FrameResolver,
    ) -> ServoResult<Vec<SplineSegment>> {
        if spline.segments.is_empty() {
            return Err(create_invalid_command("Received a spline without segments"));
        }
        let mut resolved = Vec::with_capacity(spline.segments.len());
        let mut failed = Vec::new();
        for (i, segment) in spline.segments.iter().enumerate() {
            let target = self.resolve_target(segment.target(), resolver).ok();
            let segment = match (segment, target) {
                (SplineSegment::Line { .. }, Some(target)) => Some(SplineSegment::Line { target }),
                (SplineSegment::Smooth { .. }, Some(target)) => {
                    Some(SplineSegment::Smooth { target })
                }
                (SplineSegment::Arc { auxiliary, .. }, Some(target)) => self
                    .resolve_target(auxiliary, resolver)
                    .ok()
                    .map(|auxiliary| SplineSegment::Arc { target, auxiliary }),
                (_, None) => None,
            };
            match segment {
                Some(segment) => resolved.push(segment),
                None => {
                    warn!("Invalid spline segment: {}", i);
                    failed.push(i);
                }
            }
        }
        if failed.is_empty() {
            Ok(resolved)
        } else {
            Err(ServoException::SplineException {
                message: format!(
                    "{} of {} spline segments could not be resolved: {:?}",
                    failed.len(),
                    spline.segments.len(),
                    failed
                ),
            })
        }
    }

    fn prepare_joint_spline(&self, spline: &JointSpline) -> ServoResult<PreparedMotion> {
        let joint_count = self.joint_count();
        if spline.points.is_empty() {
            return Err(create_invalid_command("Received a joint spline without points"));
        }
        for point in spline.points.iter() {
            point.validate(joint_count)?;
        }
        let impedance = spline.impedance.clone().sanitized();
        if let ImpedanceParameters::JointImpedance { stiffness, damping } = &impedance {
            stiffness.validate(joint_count)?;
            damping.validate(joint_count)?;
        }
        Ok(PreparedMotion::OneShot {
            motion: OneShotMotion::JointSpline {
                points: spline.points.clone(),
                impedance,
            },
            relative_velocity: Some(spline.effective_relative_velocity()),
        })
    }
}

fn one_shot(motion: OneShotMotion) -> PreparedMotion {
    PreparedMotion::OneShot {
        motion,
        relative_velocity: None,
    }
}

fn require_stream(stream: Option<StreamHandle>) -> ServoResult<StreamHandle> {
    stream.ok_or_else(|| ServoException::EngineException {
        message: "No active streamed session".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;
    use std::time::{Duration, Instant};

    use mockall::predicate::*;

    use crate::exception::ServoException;
    use crate::servo::command_source::MotionCommand;
    use crate::servo::command_types::StreamedMode;
    use crate::servo::control_types::{
        CartesianPose, JointLimits, JointVector, RedundancyHint, Twist,
    };
    use crate::servo::execution_engine::{
        MockExecutionEngine, OneShotMotion, StreamHandle, StreamedTarget,
    };
    use crate::servo::frame_resolver::MockFrameResolver;
    use crate::servo::motion_dispatcher::{ExecutionContext, Motions, PreparedMotion};
    use crate::servo::speed_limits::SpeedPolicy;
    use crate::servo::spline::{CartesianSpline, ImpedanceParameters, JointSpline, SplineSegment};

    const BASE: &str = "iiwa_link_0";

    fn motions() -> Motions {
        Motions::new(JointLimits::symmetric(&[170. * PI / 180.; 7]).unwrap(), BASE)
    }

    fn pose(frame: &str, x: f64) -> CartesianPose {
        CartesianPose::new(frame, [x, 0.1, 0.6], [0., 1., 0., 0.]).unwrap()
    }

    fn stream() -> StreamHandle {
        StreamHandle {
            id: 1,
            mode: StreamedMode::Nonlinear,
        }
    }

    fn context(engine: &mut MockExecutionEngine, now: Instant) -> ExecutionContext {
        ExecutionContext {
            engine,
            stream: Some(stream()),
            endpoint_frame: "iiwa_link_ee",
            limits: SpeedPolicy::default().motion_limits(),
            on_complete: None,
            now,
        }
    }

    /// Resolves the "world" frame by shifting x and rejects every other frame.
    fn world_resolver() -> MockFrameResolver {
        let mut resolver = MockFrameResolver::new();
        resolver.expect_resolve().returning(|pose, frame| {
            if pose.frame_id == "world" {
                let mut resolved = pose.clone();
                resolved.frame_id = frame.to_string();
                resolved.pose.translation.vector[0] += 1.0;
                Some(resolved)
            } else {
                None
            }
        });
        resolver
    }

    #[test]
    fn streamed_pose_waits_for_readiness() {
        let mut engine = MockExecutionEngine::new();
        engine.expect_is_ready_to_move().times(1).return_const(false);
        engine.expect_set_streamed_destination().times(0);
        let mut motions = motions();
        let prepared = motions
            .prepare(
                &MotionCommand::JointPosition(JointVector::zeros(7)),
                &world_resolver(),
            )
            .unwrap();
        motions
            .execute(prepared, context(&mut engine, Instant::now()))
            .unwrap();
    }

    #[test]
    fn redundancy_is_kept_only_when_specified() {
        let resolver = world_resolver();
        let hint = RedundancyHint {
            e1: 0.2,
            status: 2,
            turn: 17,
        };
        let with_hint = MotionCommand::CartesianPose(pose(BASE, 0.5).with_redundancy(hint));
        match motions().prepare(&with_hint, &resolver).unwrap() {
            PreparedMotion::Streamed(StreamedTarget::Cartesian(target)) => {
                assert_eq!(target.redundancy, Some(hint))
            }
            other => panic!("unexpected {:?}", other),
        }
        let unspecified = MotionCommand::P2PCartesianPose(pose(BASE, 0.5).with_redundancy(
            RedundancyHint {
                e1: 0.2,
                status: -1,
                turn: 17,
            },
        ));
        match motions().prepare(&unspecified, &resolver).unwrap() {
            PreparedMotion::OneShot {
                motion: OneShotMotion::CartesianPointToPoint(target),
                ..
            } => assert_eq!(target.redundancy, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_payloads_are_rejected_before_execution() {
        let resolver = world_resolver();
        let motions = motions();
        for command in vec![
            MotionCommand::JointPosition(JointVector::from_slice(&[])),
            MotionCommand::JointVelocity(JointVector::zeros(6)),
            MotionCommand::P2PCartesianPose(pose("unknown", 0.1)),
            MotionCommand::CartesianVelocity(Twist::new(BASE, [f64::NAN, 0., 0.], [0.; 3])),
            MotionCommand::P2PCartesianSpline(CartesianSpline::default()),
            MotionCommand::P2PJointSpline(JointSpline::default()),
        ] {
            let error = motions.prepare(&command, &resolver).unwrap_err();
            assert!(error.is_invalid_input(), "{:?} gave {:?}", command, error);
        }
    }

    #[test]
    fn spline_is_submitted_once_in_order() {
        let resolver = world_resolver();
        let spline = CartesianSpline::new(vec![
            SplineSegment::Line {
                target: pose("world", 0.1),
            },
            SplineSegment::Arc {
                target: pose(BASE, 0.2),
                auxiliary: pose("world", 0.3),
            },
            SplineSegment::Smooth {
                target: pose(BASE, 0.4),
            },
        ]);
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_submit_one_shot()
            .times(1)
            .withf(|spec, _| match &spec.motion {
                OneShotMotion::CartesianSpline(segments) => {
                    segments.len() == 3
                        && (segments[0].target().translation()[0] - 1.1).abs() < 1e-12
                        && (segments[1].auxiliary().unwrap().translation()[0] - 1.3).abs() < 1e-12
                        && (segments[2].target().translation()[0] - 0.4).abs() < 1e-12
                        && segments.iter().all(|s| s.target().frame_id == BASE)
                }
                _ => false,
            })
            .returning(|_, _| Ok(()));
        let mut motions = motions();
        let prepared = motions
            .prepare(&MotionCommand::P2PCartesianSpline(spline), &resolver)
            .unwrap();
        motions
            .execute(prepared, context(&mut engine, Instant::now()))
            .unwrap();
    }

    #[test]
    fn unresolvable_segment_scans_all_and_submits_nothing() {
        let mut resolver = MockFrameResolver::new();
        resolver.expect_resolve().times(3).returning(|_, _| None);
        let spline = CartesianSpline::new(vec![
            SplineSegment::Line {
                target: pose("camera", 0.1),
            },
            SplineSegment::Smooth {
                target: pose(BASE, 0.2),
            },
            SplineSegment::Smooth {
                target: pose("camera", 0.3),
            },
            SplineSegment::Arc {
                target: pose(BASE, 0.4),
                auxiliary: pose("camera", 0.5),
            },
        ]);
        let error = motions()
            .prepare(&MotionCommand::P2PCartesianSpline(spline), &resolver)
            .unwrap_err();
        match error {
            ServoException::SplineException { message } => assert!(message.contains("[0, 2, 3]")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn joint_spline_uses_its_own_velocity() {
        let spline = JointSpline {
            points: vec![JointVector::zeros(7), JointVector::from_slice(&[0.3; 7])],
            relative_velocity: Some(0.4),
            impedance: ImpedanceParameters::CartesianImpedance {
                stiffness: [9000., 100., 100.],
                damping: [0.5, -1., 0.5],
            },
        };
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_submit_one_shot()
            .times(1)
            .withf(|spec, _| {
                spec.limits.joint.relative_velocity == 0.4
                    && spec.limits.override_reduction == 1.0
                    && spec.motion
                        == OneShotMotion::JointSpline {
                            points: vec![JointVector::zeros(7), JointVector::from_slice(&[0.3; 7])],
                            impedance: ImpedanceParameters::CartesianImpedance {
                                stiffness: [5000., 100., 100.],
                                damping: [0.5, 0.7, 0.5],
                            },
                        }
            })
            .returning(|_, _| Ok(()));
        let mut motions = motions();
        let prepared = motions
            .prepare(&MotionCommand::P2PJointSpline(spline), &world_resolver())
            .unwrap();
        motions
            .execute(prepared, context(&mut engine, Instant::now()))
            .unwrap();
    }

    #[test]
    fn joint_velocity_is_integrated_between_cycles() {
        let start = Instant::now();
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_current_joint_destination()
            .with(eq(stream()))
            .returning(|_| Ok(JointVector::zeros(7)));
        engine.expect_is_ready_to_move().return_const(true);
        let mut seq = mockall::Sequence::new();
        engine
            .expect_set_streamed_destination()
            .withf(|_, target| match target {
                StreamedTarget::JointWithVelocity(command) => {
                    command.position == JointVector::zeros(7)
                }
                _ => false,
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        engine
            .expect_set_streamed_destination()
            .withf(|_, target| match target {
                StreamedTarget::JointWithVelocity(command) => {
                    (command.position[0] - 0.01).abs() < 1e-9
                        && command.velocity == JointVector::from_slice(&[0.1; 7])
                }
                _ => false,
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut motions = motions();
        let command = MotionCommand::JointVelocity(JointVector::from_slice(&[0.1; 7]));
        let prepared = motions.prepare(&command, &world_resolver()).unwrap();
        motions
            .execute(prepared.clone(), context(&mut engine, start))
            .unwrap();
        motions
            .execute(
                prepared,
                context(&mut engine, start + Duration::from_millis(100)),
            )
            .unwrap();
    }

    #[test]
    fn cartesian_velocity_uses_endpoint_destination() {
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_current_cartesian_destination()
            .with(eq(stream()), eq("iiwa_link_ee"))
            .times(1)
            .returning(|_, _| Ok(pose(BASE, 0.5)));
        engine.expect_is_ready_to_move().return_const(true);
        engine
            .expect_set_streamed_destination()
            .times(1)
            .returning(|_, _| Ok(()));
        let mut motions = motions();
        let prepared = motions
            .prepare(
                &MotionCommand::CartesianVelocity(Twist::new(BASE, [0.1, 0., 0.], [0.; 3])),
                &world_resolver(),
            )
            .unwrap();
        motions
            .execute(prepared, context(&mut engine, Instant::now()))
            .unwrap();
    }

    #[test]
    fn streamed_command_needs_session() {
        let mut engine = MockExecutionEngine::new();
        let mut motions = motions();
        let prepared = motions
            .prepare(
                &MotionCommand::JointPosition(JointVector::zeros(7)),
                &world_resolver(),
            )
            .unwrap();
        let mut context = context(&mut engine, Instant::now());
        context.stream = None;
        assert!(matches!(
            motions.execute(prepared, context),
            Err(ServoException::EngineException { .. })
        ));
    }
}
