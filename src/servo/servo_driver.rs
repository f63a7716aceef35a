// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`SmartServoDriver`], which runs one dispatch per control cycle, and
//! [`DriverServices`], the handle used to reconfigure the driver from other threads.
//!
//! The control strategy, the speed policy, the endpoint frame and the goals live behind one
//! mutex, the engine behind a second one which is always locked after the first. The cycle holds
//! both for validation and strategy transition, then releases the driver lock before it passes
//! the motion to the engine. An emergency stop halts the engine through [`EmergencyHalt`] before
//! it takes any lock. The velocity integration state is owned by the cycle alone.
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::DriverConfig;
use crate::exception::{ServoException, ServoResult};
use crate::servo::command_source::{CommandSource, MotionCommand};
use crate::servo::command_types::{CommandKind, ControlStrategy, StreamedMode};
use crate::servo::control_mode::ControlModeStateMachine;
use crate::servo::execution_engine::{
    CompletionCallback, ControlModeSpec, EmergencyHalt, ExecutionEngine, StreamHandle,
    StreamedSettings,
};
use crate::servo::frame_resolver::FrameResolver;
use crate::servo::goal_tracker::GoalTracker;
use crate::servo::motion_dispatcher::{ExecutionContext, Motions, PreparedMotion};
use crate::servo::speed_limits::{
    MotionLimits, PtpCartesianLimits, PtpJointLimits, SpeedPolicy, StreamedJointLimits,
    StreamedLinearLimits,
};

/// Reason given to a goal which is replaced by a newer goal.
pub static NEW_GOAL_REASON: &str = "Received new goal. Dropping old task.";
/// Reason given to a goal which is replaced by a streamed command.
pub static NEW_COMMAND_REASON: &str = "Received new command. Dropping old task.";
/// Reason given to a goal which is aborted by an emergency stop.
pub static EMERGENCY_STOP_REASON: &str = "Emergency stop. Dropping current task.";

/// What happened during one control cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Neither a goal nor a command was pending.
    Idle,
    /// A command of this kind was passed to the engine.
    Executed(CommandKind),
    /// A command of this kind was dropped because of invalid input.
    Rejected(CommandKind),
}

struct ServoCore {
    goals: Box<dyn GoalTracker>,
    machine: ControlModeStateMachine,
    policy: SpeedPolicy,
    control_mode: ControlModeSpec,
    endpoint_frame: String,
}

struct Shared {
    core: Mutex<ServoCore>,
    engine: Mutex<Box<dyn ExecutionEngine>>,
    halt: Box<dyn EmergencyHalt>,
    tool_frame: String,
    joint_count: usize,
}

/// A validated command whose strategy is active, ready to be passed to the engine.
struct StagedMotion {
    prepared: PreparedMotion,
    stream: Option<StreamHandle>,
    endpoint_frame: String,
    limits: MotionLimits,
}

impl ServoCore {
    fn streamed_settings(&self) -> StreamedSettings {
        StreamedSettings {
            control_mode: self.control_mode.clone(),
            joint_limits: self.policy.streamed_joint(),
            linear_limits: self.policy.streamed_linear(),
            endpoint_frame: self.endpoint_frame.clone(),
        }
    }

    /// Validates `command` and activates its strategy. Invalid input changes nothing.
    fn stage(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        motions: &Motions,
        resolver: &dyn FrameResolver,
        command: &MotionCommand,
    ) -> ServoResult<StagedMotion> {
        let prepared = motions.prepare(command, resolver)?;
        let settings = self.streamed_settings();
        self.machine
            .request_mode(engine, command.kind(), &settings)?;
        Ok(StagedMotion {
            prepared,
            stream: self.machine.active_stream(),
            endpoint_frame: self.endpoint_frame.clone(),
            limits: self.policy.motion_limits(),
        })
    }

    /// Picks what the cycle dispatches: the newest pending goal, otherwise the pending command.
    /// Every goal which is replaced on the way is marked failed.
    fn next_dispatch(
        &mut self,
        commands: &mut dyn CommandSource,
    ) -> ServoResult<Option<(MotionCommand, Option<CompletionCallback>)>> {
        let mut goal = None;
        while self.goals.has_pending_goal() {
            if self.goals.has_current_goal() {
                self.goals.mark_failed(NEW_GOAL_REASON);
            }
            match self.goals.accept_next() {
                Some(accepted) => goal = Some(accepted),
                None => break,
            }
        }
        if let Some(goal) = goal {
            let kind = goal.command.kind();
            if !kind.is_goal_kind() {
                let error = ServoException::UnsupportedControlMode {
                    message: format!("Goal {} carries a {} command", goal.id, kind),
                };
                self.goals.mark_failed(&error.to_string());
                return Err(error);
            }
            let on_complete = self.goals.completion_callback();
            return Ok(Some((goal.command, Some(on_complete))));
        }
        match commands.take_pending() {
            Some(command) => {
                if self.goals.has_current_goal() {
                    self.goals.mark_failed(NEW_COMMAND_REASON);
                }
                let kind = command.kind();
                if kind.is_streamed() || command.is_joint_spline() {
                    Ok(Some((command, None)))
                } else {
                    Err(ServoException::UnsupportedControlMode {
                        message: format!("{} is only accepted as a goal", kind),
                    })
                }
            }
            None => Ok(None),
        }
    }
}

/// Invalid input and unresolvable splines drop the command for this cycle, everything else is
/// returned to the caller.
fn classify(kind: CommandKind, result: ServoResult<()>) -> ServoResult<CycleOutcome> {
    match result {
        Ok(()) => Ok(CycleOutcome::Executed(kind)),
        Err(error) if error.is_invalid_input() => {
            warn!("Dropping {} command: {}", kind, error);
            Ok(CycleOutcome::Rejected(kind))
        }
        Err(error @ ServoException::SplineException { .. }) => {
            warn!("Dropping {} command: {}", kind, error);
            Ok(CycleOutcome::Rejected(kind))
        }
        Err(error) => {
            error!("Failed to execute {} command: {}", kind, error);
            Err(error)
        }
    }
}

/// Arbitrates the control strategy and dispatches goals and commands once per cycle.
pub struct SmartServoDriver {
    shared: Arc<Shared>,
    commands: Box<dyn CommandSource>,
    resolver: Box<dyn FrameResolver>,
    motions: Motions,
}

impl SmartServoDriver {
    /// Creates a new driver. No engine call is made until the first command arrives.
    /// # Errors
    /// * [`ConfigException`](`crate::exception::ServoException::ConfigException`) if `config`
    /// is invalid.
    pub fn new(
        config: &DriverConfig,
        engine: Box<dyn ExecutionEngine>,
        halt: Box<dyn EmergencyHalt>,
        goals: Box<dyn GoalTracker>,
        commands: Box<dyn CommandSource>,
        resolver: Box<dyn FrameResolver>,
    ) -> ServoResult<Self> {
        config.validate()?;
        let joint_limits = config.robot.joint_limits()?;
        let core = ServoCore {
            goals,
            machine: ControlModeStateMachine::new(),
            policy: config.speed_limits,
            control_mode: ControlModeSpec::Position,
            endpoint_frame: config.robot.tool_frame_id.clone(),
        };
        Ok(SmartServoDriver {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                engine: Mutex::new(engine),
                halt,
                tool_frame: config.robot.tool_frame_id.clone(),
                joint_count: joint_limits.joint_count(),
            }),
            commands,
            resolver,
            motions: Motions::new(joint_limits, &config.robot.base_frame_id),
        })
    }

    /// A handle for service calls which can be used from other threads.
    pub fn services(&self) -> DriverServices {
        DriverServices {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs one control cycle.
    ///
    /// Pending goals are accepted first, each one replacing the current goal, which is marked
    /// failed. The last accepted goal is dispatched. Without new goals, the pending streamed
    /// command is dispatched and replaces the current goal.
    ///
    /// The driver lock is released before the motion is passed to the engine, so service calls
    /// which do not need the engine are not delayed by it.
    /// # Errors
    /// * [`UnsupportedControlMode`](`crate::exception::ServoException::UnsupportedControlMode`)
    /// if a goal or command arrives on a channel which cannot carry its kind.
    /// * [`TransitionException`](`crate::exception::ServoException::TransitionException`) if the
    /// engine rejects the strategy switch.
    /// * [`EngineException`](`crate::exception::ServoException::EngineException`) if the engine
    /// fails to execute the motion.
    pub fn run_cycle(&mut self) -> ServoResult<CycleOutcome> {
        let mut core = self.shared.core.lock();
        let (command, on_complete) = match core.next_dispatch(self.commands.as_mut()) {
            Ok(Some(next)) => next,
            Ok(None) => return Ok(CycleOutcome::Idle),
            Err(error) => {
                error!("{}", error);
                return Err(error);
            }
        };
        let kind = command.kind();
        let is_goal = on_complete.is_some();
        let mut engine = self.shared.engine.lock();
        let staged = match core.stage(
            engine.as_mut(),
            &self.motions,
            self.resolver.as_ref(),
            &command,
        ) {
            Ok(staged) => staged,
            Err(error) => {
                if is_goal {
                    core.goals.mark_failed(&error.to_string());
                }
                return classify(kind, Err(error));
            }
        };
        drop(core);

        let result = self.motions.execute(
            staged.prepared,
            ExecutionContext {
                engine: engine.as_mut(),
                stream: staged.stream,
                endpoint_frame: &staged.endpoint_frame,
                limits: staged.limits,
                on_complete,
                now: Instant::now(),
            },
        );
        drop(engine);
        if let Err(error) = &result {
            let mut core = self.shared.core.lock();
            // an emergency stop may have failed the goal in the meantime
            if is_goal && core.goals.has_current_goal() {
                core.goals.mark_failed(&error.to_string());
            }
        }
        classify(kind, result)
    }
}

/// Service calls of the driver. Every call is serialized against the strategy transitions of
/// the control cycle.
#[derive(Clone)]
pub struct DriverServices {
    shared: Arc<Shared>,
}

impl DriverServices {
    /// Sets the global speed override and applies it to the engine's realtime layer.
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::ServoException::InvalidArgument`) if not in (0, 1].
    pub fn set_speed_override(&self, override_reduction: f64) -> ServoResult<()> {
        let mut core = self.shared.core.lock();
        let mut policy = core.policy;
        policy.set_override_reduction(override_reduction)?;
        self.shared
            .engine
            .lock()
            .apply_override(override_reduction)?;
        core.policy = policy;
        info!("Speed override set to {}", override_reduction);
        Ok(())
    }

    pub fn set_ptp_joint_limits(&self, limits: PtpJointLimits) -> ServoResult<()> {
        self.shared.core.lock().policy.set_ptp_joint(limits)
    }

    pub fn set_ptp_cartesian_limits(&self, limits: PtpCartesianLimits) -> ServoResult<()> {
        self.shared.core.lock().policy.set_ptp_cartesian(limits)
    }

    /// Updates the streamed joint limits and rebuilds an active nonlinear streamed session.
    pub fn set_streamed_joint_limits(&self, limits: StreamedJointLimits) -> ServoResult<()> {
        self.update_streamed_limits(StreamedMode::Nonlinear, |policy| {
            policy.set_streamed_joint(limits)
        })
    }

    /// Updates the streamed linear limits and rebuilds an active linear streamed session.
    pub fn set_streamed_linear_limits(&self, limits: StreamedLinearLimits) -> ServoResult<()> {
        self.update_streamed_limits(StreamedMode::Linear, |policy| {
            policy.set_streamed_linear(limits)
        })
    }

    fn update_streamed_limits<F>(&self, mode: StreamedMode, update: F) -> ServoResult<()>
    where
        F: FnOnce(&mut SpeedPolicy) -> ServoResult<()>,
    {
        let mut core = self.shared.core.lock();
        let previous = core.policy;
        update(&mut core.policy)?;
        let settings = core.streamed_settings();
        let mut engine = self.shared.engine.lock();
        if let Err(error) = core
            .machine
            .reconfigure_active(engine.as_mut(), mode, &settings)
        {
            core.policy = previous;
            return Err(error);
        }
        Ok(())
    }

    /// Changes the controller of the streamed session.
    ///
    /// If the active streamed session already uses the same controller family, only its
    /// parameters are changed (nothing to do for position control). Otherwise the session is
    /// rebuilt. Without an active streamed session the mode is stored and used for the next one.
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::ServoException::InvalidArgument`) if the mode
    /// parameters are invalid.
    pub fn request_control_mode(&self, spec: ControlModeSpec) -> ServoResult<()> {
        spec.validate(self.shared.joint_count)?;
        let mut core = self.shared.core.lock();
        if let Some(handle) = core.machine.active_stream() {
            let mut engine = self.shared.engine.lock();
            if core.control_mode.same_family(&spec) {
                if spec != ControlModeSpec::Position {
                    engine.change_control_mode_settings(handle, &spec)?;
                }
            } else {
                let mut settings = core.streamed_settings();
                settings.control_mode = spec.clone();
                core.machine
                    .reconfigure_active(engine.as_mut(), handle.mode, &settings)?;
            }
        }
        info!("Control mode set to {:?}", spec);
        core.control_mode = spec;
        Ok(())
    }

    /// Sets the frame which is moved by streamed Cartesian commands. An empty id selects the
    /// configured tool frame. An active streamed session is rebuilt on the new frame.
    pub fn set_endpoint_frame(&self, frame_id: &str) -> ServoResult<()> {
        let frame_id = if frame_id.is_empty() {
            self.shared.tool_frame.as_str()
        } else {
            frame_id
        };
        let mut core = self.shared.core.lock();
        let previous = std::mem::replace(&mut core.endpoint_frame, frame_id.to_string());
        let settings = core.streamed_settings();
        let mut engine = self.shared.engine.lock();
        if let Err(error) = core
            .machine
            .cycle_streamed_session(engine.as_mut(), &settings)
        {
            error!(
                "Error while setting endpoint frame to \"{}\": {}",
                frame_id, error
            );
            core.endpoint_frame = previous;
            return Err(error);
        }
        info!("Endpoint frame set to {}", frame_id);
        Ok(())
    }

    /// Halts the engine and fails the current goal.
    ///
    /// The halt does not wait for the control cycle or other service calls.
    pub fn emergency_stop(&self) -> ServoResult<()> {
        let result = self.shared.halt.halt();
        match &result {
            Ok(()) => warn!("Emergency stop"),
            Err(error) => error!("Emergency stop failed: {}", error),
        }
        let mut core = self.shared.core.lock();
        if core.goals.has_current_goal() {
            core.goals.mark_failed(EMERGENCY_STOP_REASON);
        }
        result
    }

    /// Remaining time in \[s\] of the active streamed session, `None` if there is no session
    /// or the engine cannot tell.
    pub fn time_to_destination(&self) -> Option<f64> {
        let core = self.shared.core.lock();
        let handle = core.machine.active_stream()?;
        let remaining = self.shared.engine.lock().remaining_time(handle);
        remaining.ok()
    }

    pub fn strategy(&self) -> ControlStrategy {
        self.shared.core.lock().machine.strategy()
    }

    pub fn last_kind(&self) -> Option<CommandKind> {
        self.shared.core.lock().machine.last_kind()
    }

    pub fn speed_policy(&self) -> SpeedPolicy {
        self.shared.core.lock().policy
    }

    pub fn endpoint_frame(&self) -> String {
        self.shared.core.lock().endpoint_frame.clone()
    }

    pub fn control_mode(&self) -> ControlModeSpec {
        self.shared.core.lock().control_mode.clone()
    }
}
