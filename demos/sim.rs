// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! In-memory collaborators for running the driver without a robot.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use iiwa_servo::{
    CartesianPose, CommandSource, CompletionCallback, ControlModeSpec, EmergencyHalt,
    ExecutionEngine, FrameResolver, Goal, GoalTracker, JointVector, MotionCommand,
    MotionOutcome, MotionSpec, OneShotMotion, ServoException, ServoResult, StreamHandle,
    StreamedMode, StreamedSettings, StreamedTarget,
};
use parking_lot::Mutex;
use tracing::info;

/// State of the simulated robot, shared with the demo.
#[derive(Debug)]
pub struct SimulatedRobot {
    pub joints: JointVector,
    pub pose: CartesianPose,
    pub override_reduction: f64,
    pub calls: Vec<String>,
    next_id: u64,
}

/// An engine which reaches every destination immediately.
pub struct SimulatedEngine {
    robot: Arc<Mutex<SimulatedRobot>>,
}

impl SimulatedEngine {
    /// Creates the engine, the halt switch of the engine and the shared robot state.
    pub fn new(
        joints: JointVector,
        pose: CartesianPose,
    ) -> (Self, SimulatedHalt, Arc<Mutex<SimulatedRobot>>) {
        let robot = Arc::new(Mutex::new(SimulatedRobot {
            joints,
            pose,
            override_reduction: 1.0,
            calls: Vec::new(),
            next_id: 1,
        }));
        (
            SimulatedEngine {
                robot: Arc::clone(&robot),
            },
            SimulatedHalt {
                robot: Arc::clone(&robot),
            },
            robot,
        )
    }
}

/// Stops the simulated robot.
pub struct SimulatedHalt {
    robot: Arc<Mutex<SimulatedRobot>>,
}

impl EmergencyHalt for SimulatedHalt {
    fn halt(&self) -> ServoResult<()> {
        self.robot.lock().calls.push("halt".to_string());
        Ok(())
    }
}

impl ExecutionEngine for SimulatedEngine {
    fn is_ready_to_move(&self) -> bool {
        true
    }

    fn set_streamed_destination(
        &mut self,
        _handle: StreamHandle,
        target: StreamedTarget,
    ) -> ServoResult<()> {
        let mut robot = self.robot.lock();
        match target {
            StreamedTarget::Joint(joints) => robot.joints = joints,
            StreamedTarget::JointWithVelocity(command) => robot.joints = command.position,
            StreamedTarget::Cartesian(pose) => robot.pose = pose,
        }
        Ok(())
    }

    fn current_joint_destination(&self, _handle: StreamHandle) -> ServoResult<JointVector> {
        Ok(self.robot.lock().joints.clone())
    }

    fn current_cartesian_destination(
        &self,
        _handle: StreamHandle,
        _frame_id: &str,
    ) -> ServoResult<CartesianPose> {
        Ok(self.robot.lock().pose.clone())
    }

    fn submit_one_shot(
        &mut self,
        spec: MotionSpec,
        on_complete: Option<CompletionCallback>,
    ) -> ServoResult<()> {
        let mut robot = self.robot.lock();
        robot.calls.push(format!(
            "submit {} at override {}",
            describe(&spec.motion),
            spec.limits.override_reduction
        ));
        match spec.motion {
            OneShotMotion::JointPointToPoint(joints) => robot.joints = joints,
            OneShotMotion::JointSpline { mut points, .. } => {
                if let Some(last) = points.pop() {
                    robot.joints = last;
                }
            }
            OneShotMotion::CartesianPointToPoint(pose) | OneShotMotion::CartesianLinear(pose) => {
                robot.pose = pose
            }
            OneShotMotion::CartesianSpline(segments) => {
                if let Some(last) = segments.last() {
                    robot.pose = last.target().clone();
                }
            }
        }
        drop(robot);
        if let Some(on_complete) = on_complete {
            on_complete(MotionOutcome::Succeeded);
        }
        Ok(())
    }

    fn switch_streamed_strategy(
        &mut self,
        from: Option<StreamHandle>,
        to: StreamedMode,
        settings: &StreamedSettings,
    ) -> ServoResult<StreamHandle> {
        let mut robot = self.robot.lock();
        let handle = StreamHandle {
            id: robot.next_id,
            mode: to,
        };
        robot.next_id += 1;
        robot.calls.push(format!(
            "switch {:?} -> {:?} on {}",
            from.map(|handle| handle.mode),
            to,
            settings.endpoint_frame
        ));
        Ok(handle)
    }

    fn enable_streamed(
        &mut self,
        handle: StreamHandle,
        _settings: &StreamedSettings,
    ) -> ServoResult<()> {
        self.robot
            .lock()
            .calls
            .push(format!("enable {:?}", handle.mode));
        Ok(())
    }

    fn disable_streamed(&mut self, handle: StreamHandle) -> ServoResult<()> {
        self.robot
            .lock()
            .calls
            .push(format!("disable {:?}", handle.mode));
        Ok(())
    }

    fn change_control_mode_settings(
        &mut self,
        _handle: StreamHandle,
        spec: &ControlModeSpec,
    ) -> ServoResult<()> {
        self.robot
            .lock()
            .calls
            .push(format!("change settings {:?}", spec));
        Ok(())
    }

    fn reconfigure_streamed(
        &mut self,
        handle: StreamHandle,
        settings: &StreamedSettings,
    ) -> ServoResult<StreamHandle> {
        let mut robot = self.robot.lock();
        robot.calls.push(format!(
            "reconfigure {:?} with {:?}",
            handle.mode, settings.control_mode
        ));
        let id = robot.next_id;
        robot.next_id += 1;
        Ok(StreamHandle {
            id,
            mode: handle.mode,
        })
    }

    fn apply_override(&mut self, fraction: f64) -> ServoResult<()> {
        self.robot.lock().override_reduction = fraction;
        Ok(())
    }

    fn remaining_time(&self, _handle: StreamHandle) -> ServoResult<f64> {
        Ok(0.)
    }
}

fn describe(motion: &OneShotMotion) -> String {
    match motion {
        OneShotMotion::CartesianPointToPoint(_) => "PTP".to_string(),
        OneShotMotion::CartesianLinear(_) => "LIN".to_string(),
        OneShotMotion::JointPointToPoint(_) => "joint PTP".to_string(),
        OneShotMotion::CartesianSpline(segments) => format!("spline ({} segments)", segments.len()),
        OneShotMotion::JointSpline { points, impedance } => {
            format!("joint spline ({} points, {:?})", points.len(), impedance)
        }
    }
}

/// Hands out queued commands, one per cycle.
pub struct QueuedCommands {
    queue: Arc<Mutex<VecDeque<MotionCommand>>>,
}

impl QueuedCommands {
    pub fn new() -> (Self, Arc<Mutex<VecDeque<MotionCommand>>>) {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        (
            QueuedCommands {
                queue: Arc::clone(&queue),
            },
            queue,
        )
    }
}

impl CommandSource for QueuedCommands {
    fn take_pending(&mut self) -> Option<MotionCommand> {
        self.queue.lock().pop_front()
    }
}

/// Repeats the same command every cycle.
pub struct RepeatedCommand(pub MotionCommand);

impl CommandSource for RepeatedCommand {
    fn take_pending(&mut self) -> Option<MotionCommand> {
        Some(self.0.clone())
    }
}

/// Goal queue which records how every goal ended.
pub struct RecordingGoals {
    pending: Arc<Mutex<VecDeque<Goal>>>,
    current: Arc<Mutex<Option<u64>>>,
    results: Arc<Mutex<Vec<(u64, String)>>>,
}

impl RecordingGoals {
    pub fn new() -> (
        Self,
        Arc<Mutex<VecDeque<Goal>>>,
        Arc<Mutex<Vec<(u64, String)>>>,
    ) {
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let results = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingGoals {
                pending: Arc::clone(&pending),
                current: Arc::new(Mutex::new(None)),
                results: Arc::clone(&results),
            },
            pending,
            results,
        )
    }
}

impl GoalTracker for RecordingGoals {
    fn has_pending_goal(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    fn accept_next(&mut self) -> Option<Goal> {
        let goal = self.pending.lock().pop_front()?;
        *self.current.lock() = Some(goal.id);
        Some(goal)
    }

    fn has_current_goal(&self) -> bool {
        self.current.lock().is_some()
    }

    fn mark_failed(&mut self, reason: &str) {
        if let Some(id) = self.current.lock().take() {
            info!("Goal {} failed: {}", id, reason);
            self.results.lock().push((id, reason.to_string()));
        }
    }

    fn completion_callback(&mut self) -> CompletionCallback {
        let current = Arc::clone(&self.current);
        let results = Arc::clone(&self.results);
        Box::new(move |outcome| {
            if let Some(id) = current.lock().take() {
                let result = match outcome {
                    MotionOutcome::Succeeded => "succeeded".to_string(),
                    MotionOutcome::Failed(reason) => reason,
                };
                results.lock().push((id, result));
            }
        })
    }
}

/// Knows the robot base frame and a "world" frame shifted by `world_offset` along x.
pub struct ShiftedWorld {
    pub world_offset: f64,
}

impl FrameResolver for ShiftedWorld {
    fn resolve(&self, pose: &CartesianPose, reference_frame: &str) -> Option<CartesianPose> {
        if pose.frame_id != "world" {
            return None;
        }
        let mut resolved = pose.clone();
        resolved.frame_id = reference_frame.to_string();
        resolved.pose.translation.vector[0] -= self.world_offset;
        Some(resolved)
    }
}

/// Returns an error for use in demo `main` functions.
pub fn demo_error(message: &str) -> ServoException {
    ServoException::InvalidArgument {
        message: message.to_string(),
    }
}
