// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the state machine which decides which control strategy has to be active on the
//! execution engine and performs the transitions between strategies.
//!
//! Transitions are planned by the pure function [`plan_transition`] and afterwards executed
//! step by step by [`ControlModeStateMachine::request_mode`].
use tracing::debug;

use crate::exception::{ServoException, ServoResult};
use crate::servo::command_types::{CommandKind, ControlStrategy, StreamedMode};
use crate::servo::execution_engine::{ExecutionEngine, StreamHandle, StreamedSettings};

/// One call into the execution engine which is part of a transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionStep {
    /// Build a streamed session of the given mode, replacing the current one.
    SwitchStreamed(StreamedMode),
    /// Resume the suspended streamed session.
    EnableStreamed,
    /// Suspend the active streamed session.
    DisableStreamed,
}

/// Steps needed to go from `current` to `target`.
/// `session` is the mode of the streamed session owned by the state machine, active or
/// suspended.
fn steps_towards(
    current: ControlStrategy,
    session: Option<StreamedMode>,
    target: ControlStrategy,
) -> Vec<TransitionStep> {
    if current == target {
        return Vec::new();
    }
    match (target.streamed_mode(), current) {
        (Some(mode), ControlStrategy::PointToPoint) if session == Some(mode) => {
            vec![TransitionStep::EnableStreamed]
        }
        (Some(mode), _) => vec![TransitionStep::SwitchStreamed(mode)],
        (None, ControlStrategy::StreamedNonlinear) | (None, ControlStrategy::StreamedLinear) => {
            vec![TransitionStep::DisableStreamed]
        }
        // a cold start directly into point-to-point stalls the engine
        (None, _) => vec![
            TransitionStep::SwitchStreamed(StreamedMode::Linear),
            TransitionStep::DisableStreamed,
        ],
    }
}

/// Plans the engine calls needed before a command of `kind` can be executed.
///
/// # Arguments
/// * `current` - Currently active strategy.
/// * `session` - Mode of the streamed session owned by the state machine, if any.
/// * `last_kind` - Kind of the previously executed command.
/// * `kind` - Kind of the command which is about to be executed.
/// # Return
/// The steps in execution order. Empty if the active strategy already fits, except for a
/// Cartesian spline following a Cartesian spline, which always detours through the linear
/// streamed mode because two splines in a row stall the engine.
pub fn plan_transition(
    current: ControlStrategy,
    session: Option<StreamedMode>,
    last_kind: Option<CommandKind>,
    kind: CommandKind,
) -> Vec<TransitionStep> {
    let target = kind.strategy();
    if current == target
        && kind == CommandKind::P2PCartesianSpline
        && last_kind == Some(CommandKind::P2PCartesianSpline)
    {
        let linear = ControlStrategy::StreamedLinear;
        let mut steps = steps_towards(current, session, linear);
        steps.extend(steps_towards(linear, Some(StreamedMode::Linear), target));
        return steps;
    }
    steps_towards(current, session, target)
}

/// Tracks the active control strategy and the streamed session handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlModeStateMachine {
    strategy: ControlStrategy,
    handle: Option<StreamHandle>,
    last_kind: Option<CommandKind>,
}

impl Default for ControlModeStateMachine {
    fn default() -> Self {
        ControlModeStateMachine {
            strategy: ControlStrategy::None,
            handle: None,
            last_kind: None,
        }
    }
}

impl ControlModeStateMachine {
    pub fn new() -> Self {
        ControlModeStateMachine::default()
    }

    pub fn strategy(&self) -> ControlStrategy {
        self.strategy
    }

    pub fn last_kind(&self) -> Option<CommandKind> {
        self.last_kind
    }

    /// The handle of the streamed session, active or suspended.
    pub fn handle(&self) -> Option<StreamHandle> {
        self.handle
    }

    /// The handle of the streamed session if it is currently active.
    pub fn active_stream(&self) -> Option<StreamHandle> {
        match self.strategy.streamed_mode() {
            Some(_) => self.handle,
            None => None,
        }
    }

    /// Makes the strategy required by `kind` active on `engine`.
    ///
    /// # Errors
    /// * [`TransitionException`](`crate::exception::ServoException::TransitionException`) if
    /// the engine rejects a step. Strategy, handle and last command kind are left as they were
    /// before the call.
    pub fn request_mode(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        kind: CommandKind,
        settings: &StreamedSettings,
    ) -> ServoResult<()> {
        let steps = plan_transition(
            self.strategy,
            self.handle.map(|handle| handle.mode),
            self.last_kind,
            kind,
        );
        if !steps.is_empty() {
            debug!(
                "Switching control mode from {:?} to {} ({:?})",
                self.last_kind, kind, steps
            );
        }
        self.execute(engine, &steps, settings)?;
        self.last_kind = Some(kind);
        Ok(())
    }

    /// Rebuilds the active streamed session by switching to the other streamed mode and back.
    /// Does nothing if no streamed strategy is active.
    pub fn cycle_streamed_session(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        settings: &StreamedSettings,
    ) -> ServoResult<()> {
        if let Some(mode) = self.strategy.streamed_mode() {
            let steps = [
                TransitionStep::SwitchStreamed(mode.other()),
                TransitionStep::SwitchStreamed(mode),
            ];
            self.execute(engine, &steps, settings)?;
        }
        Ok(())
    }

    /// Rebuilds the active streamed session with new settings if it runs in `mode`.
    pub fn reconfigure_active(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        mode: StreamedMode,
        settings: &StreamedSettings,
    ) -> ServoResult<()> {
        match self.active_stream() {
            Some(handle) if handle.mode == mode => {
                let new_handle = engine
                    .reconfigure_streamed(handle, settings)
                    .map_err(|error| transition_error("reconfigure", error))?;
                self.handle = Some(new_handle);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn execute(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        steps: &[TransitionStep],
        settings: &StreamedSettings,
    ) -> ServoResult<()> {
        let snapshot = (self.strategy, self.handle);
        for step in steps {
            if let Err(error) = self.execute_step(engine, *step, settings) {
                self.strategy = snapshot.0;
                self.handle = snapshot.1;
                return Err(error);
            }
        }
        Ok(())
    }

    fn execute_step(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        step: TransitionStep,
        settings: &StreamedSettings,
    ) -> ServoResult<()> {
        match step {
            TransitionStep::SwitchStreamed(mode) => {
                let handle = engine
                    .switch_streamed_strategy(self.handle, mode, settings)
                    .map_err(|error| transition_error("switch", error))?;
                self.handle = Some(handle);
                self.strategy = ControlStrategy::from(mode);
            }
            TransitionStep::EnableStreamed => {
                let handle = self.require_handle(step)?;
                engine
                    .enable_streamed(handle, settings)
                    .map_err(|error| transition_error("enable", error))?;
                self.strategy = ControlStrategy::from(handle.mode);
            }
            TransitionStep::DisableStreamed => {
                let handle = self.require_handle(step)?;
                engine
                    .disable_streamed(handle)
                    .map_err(|error| transition_error("disable", error))?;
                self.strategy = ControlStrategy::PointToPoint;
            }
        }
        Ok(())
    }

    fn require_handle(&self, step: TransitionStep) -> ServoResult<StreamHandle> {
        self.handle.ok_or_else(|| ServoException::TransitionException {
            message: format!("{:?} requires a streamed session", step),
        })
    }
}

fn transition_error(action: &str, error: ServoException) -> ServoException {
    match error {
        ServoException::TransitionException { .. } => error,
        other => ServoException::TransitionException {
            message: format!("Engine rejected {} of streamed session: {}", action, other),
        },
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::*;
    use mockall::Sequence;

    use crate::exception::ServoException;
    use crate::servo::command_types::{CommandKind, ControlStrategy, StreamedMode};
    use crate::servo::control_mode::{plan_transition, ControlModeStateMachine, TransitionStep};
    use crate::servo::execution_engine::{
        ControlModeSpec, MockExecutionEngine, StreamHandle, StreamedSettings,
    };
    use crate::servo::speed_limits::{StreamedJointLimits, StreamedLinearLimits};

    fn settings() -> StreamedSettings {
        StreamedSettings {
            control_mode: ControlModeSpec::Position,
            joint_limits: StreamedJointLimits::default(),
            linear_limits: StreamedLinearLimits::default(),
            endpoint_frame: "iiwa_link_ee".to_string(),
        }
    }

    fn handle(id: u64, mode: StreamedMode) -> StreamHandle {
        StreamHandle { id, mode }
    }

    #[test]
    fn plans_from_none() {
        assert_eq!(
            plan_transition(ControlStrategy::None, None, None, CommandKind::JointPosition),
            vec![TransitionStep::SwitchStreamed(StreamedMode::Nonlinear)]
        );
        assert_eq!(
            plan_transition(
                ControlStrategy::None,
                None,
                None,
                CommandKind::CartesianPoseLinear
            ),
            vec![TransitionStep::SwitchStreamed(StreamedMode::Linear)]
        );
        assert_eq!(
            plan_transition(ControlStrategy::None, None, None, CommandKind::P2PJointPosition),
            vec![
                TransitionStep::SwitchStreamed(StreamedMode::Linear),
                TransitionStep::DisableStreamed
            ]
        );
    }

    #[test]
    fn plans_between_strategies() {
        let nonlinear = Some(StreamedMode::Nonlinear);
        assert_eq!(
            plan_transition(
                ControlStrategy::StreamedNonlinear,
                nonlinear,
                Some(CommandKind::JointPosition),
                CommandKind::P2PCartesianPose
            ),
            vec![TransitionStep::DisableStreamed]
        );
        assert_eq!(
            plan_transition(
                ControlStrategy::PointToPoint,
                nonlinear,
                Some(CommandKind::P2PCartesianPose),
                CommandKind::CartesianVelocity
            ),
            vec![TransitionStep::EnableStreamed]
        );
        assert_eq!(
            plan_transition(
                ControlStrategy::PointToPoint,
                nonlinear,
                Some(CommandKind::P2PCartesianPose),
                CommandKind::CartesianPoseLinear
            ),
            vec![TransitionStep::SwitchStreamed(StreamedMode::Linear)]
        );
        assert_eq!(
            plan_transition(
                ControlStrategy::StreamedLinear,
                Some(StreamedMode::Linear),
                Some(CommandKind::CartesianPoseLinear),
                CommandKind::JointVelocity
            ),
            vec![TransitionStep::SwitchStreamed(StreamedMode::Nonlinear)]
        );
    }

    #[test]
    fn same_strategy_is_idempotent() {
        for kind in CommandKind::all() {
            let strategy = kind.strategy();
            let session = strategy.streamed_mode().or(Some(StreamedMode::Nonlinear));
            let steps = plan_transition(strategy, session, Some(kind), kind);
            if kind == CommandKind::P2PCartesianSpline {
                assert_eq!(
                    steps,
                    vec![
                        TransitionStep::SwitchStreamed(StreamedMode::Linear),
                        TransitionStep::DisableStreamed
                    ]
                );
            } else {
                assert!(steps.is_empty(), "{} planned {:?}", kind, steps);
            }
        }
    }

    #[test]
    fn spline_after_spline_enables_suspended_linear_session() {
        assert_eq!(
            plan_transition(
                ControlStrategy::PointToPoint,
                Some(StreamedMode::Linear),
                Some(CommandKind::P2PCartesianSpline),
                CommandKind::P2PCartesianSpline
            ),
            vec![TransitionStep::EnableStreamed, TransitionStep::DisableStreamed]
        );
        assert!(plan_transition(
            ControlStrategy::PointToPoint,
            Some(StreamedMode::Linear),
            Some(CommandKind::P2PJointPosition),
            CommandKind::P2PCartesianSpline
        )
        .is_empty());
    }

    #[test]
    fn nonlinear_to_ptp_and_back_disables_then_enables() {
        let mut engine = MockExecutionEngine::new();
        let mut seq = Sequence::new();
        let session = handle(1, StreamedMode::Nonlinear);
        engine
            .expect_switch_streamed_strategy()
            .with(eq(None), eq(StreamedMode::Nonlinear), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _, _| Ok(session));
        engine
            .expect_disable_streamed()
            .with(eq(session))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_enable_streamed()
            .with(eq(session), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut machine = ControlModeStateMachine::new();
        machine
            .request_mode(&mut engine, CommandKind::JointPosition, &settings())
            .unwrap();
        assert_eq!(machine.strategy(), ControlStrategy::StreamedNonlinear);
        machine
            .request_mode(&mut engine, CommandKind::P2PJointPosition, &settings())
            .unwrap();
        assert_eq!(machine.strategy(), ControlStrategy::PointToPoint);
        assert_eq!(machine.last_kind(), Some(CommandKind::P2PJointPosition));
        assert_eq!(machine.active_stream(), None);
        machine
            .request_mode(&mut engine, CommandKind::JointVelocity, &settings())
            .unwrap();
        assert_eq!(machine.strategy(), ControlStrategy::StreamedNonlinear);
        assert_eq!(machine.last_kind(), Some(CommandKind::JointVelocity));
        assert_eq!(machine.active_stream(), Some(session));
    }

    #[test]
    fn repeated_request_does_not_touch_engine() {
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_switch_streamed_strategy()
            .times(1)
            .returning(|_, mode, _| Ok(StreamHandle { id: 3, mode }));
        let mut machine = ControlModeStateMachine::new();
        for _ in 0..5 {
            machine
                .request_mode(&mut engine, CommandKind::CartesianPoseLinear, &settings())
                .unwrap();
        }
        machine
            .request_mode(&mut engine, CommandKind::CartesianPoseLinear, &settings())
            .unwrap();
        assert_eq!(machine.strategy(), ControlStrategy::StreamedLinear);
    }

    #[test]
    fn second_spline_detours_through_linear_session() {
        let mut engine = MockExecutionEngine::new();
        let mut seq = Sequence::new();
        let first = handle(1, StreamedMode::Linear);
        engine
            .expect_switch_streamed_strategy()
            .with(eq(None), eq(StreamedMode::Linear), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _, _| Ok(first));
        engine
            .expect_disable_streamed()
            .with(eq(first))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_enable_streamed()
            .with(eq(first), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        engine
            .expect_disable_streamed()
            .with(eq(first))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut machine = ControlModeStateMachine::new();
        machine
            .request_mode(&mut engine, CommandKind::P2PCartesianSpline, &settings())
            .unwrap();
        machine
            .request_mode(&mut engine, CommandKind::P2PCartesianSpline, &settings())
            .unwrap();
        assert_eq!(machine.strategy(), ControlStrategy::PointToPoint);
        assert_eq!(machine.last_kind(), Some(CommandKind::P2PCartesianSpline));
    }

    #[test]
    fn failed_transition_keeps_state() {
        let mut engine = MockExecutionEngine::new();
        let session = handle(7, StreamedMode::Nonlinear);
        engine
            .expect_switch_streamed_strategy()
            .times(1)
            .returning(move |_, _, _| Ok(session));
        engine.expect_disable_streamed().times(1).returning(|_| {
            Err(ServoException::EngineException {
                message: "motion still running".to_string(),
            })
        });
        let mut machine = ControlModeStateMachine::new();
        machine
            .request_mode(&mut engine, CommandKind::JointPosition, &settings())
            .unwrap();
        let before = machine.clone();
        let result = machine.request_mode(&mut engine, CommandKind::P2PCartesianPose, &settings());
        assert!(matches!(
            result,
            Err(ServoException::TransitionException { .. })
        ));
        assert_eq!(machine, before);
        assert_eq!(machine.last_kind(), Some(CommandKind::JointPosition));
    }

    #[test]
    fn failed_cold_start_restores_none() {
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_switch_streamed_strategy()
            .times(1)
            .returning(|_, mode, _| Ok(StreamHandle { id: 1, mode }));
        engine.expect_disable_streamed().times(1).returning(|_| {
            Err(ServoException::EngineException {
                message: "busy".to_string(),
            })
        });
        let mut machine = ControlModeStateMachine::new();
        assert!(machine
            .request_mode(&mut engine, CommandKind::P2PJointPosition, &settings())
            .is_err());
        assert_eq!(machine, ControlModeStateMachine::new());
    }

    #[test]
    fn cycling_rebuilds_active_session() {
        let mut engine = MockExecutionEngine::new();
        let mut seq = Sequence::new();
        engine
            .expect_switch_streamed_strategy()
            .with(eq(None), eq(StreamedMode::Linear), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, mode, _| Ok(StreamHandle { id: 1, mode }));
        engine
            .expect_switch_streamed_strategy()
            .with(
                eq(Some(handle(1, StreamedMode::Linear))),
                eq(StreamedMode::Nonlinear),
                always(),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, mode, _| Ok(StreamHandle { id: 2, mode }));
        engine
            .expect_switch_streamed_strategy()
            .with(
                eq(Some(handle(2, StreamedMode::Nonlinear))),
                eq(StreamedMode::Linear),
                always(),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, mode, _| Ok(StreamHandle { id: 3, mode }));
        let mut machine = ControlModeStateMachine::new();
        machine
            .request_mode(&mut engine, CommandKind::CartesianPoseLinear, &settings())
            .unwrap();
        machine
            .cycle_streamed_session(&mut engine, &settings())
            .unwrap();
        assert_eq!(machine.active_stream(), Some(handle(3, StreamedMode::Linear)));
        assert_eq!(machine.last_kind(), Some(CommandKind::CartesianPoseLinear));
    }

    #[test]
    fn reconfigure_only_touches_matching_active_session() {
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_switch_streamed_strategy()
            .times(1)
            .returning(|_, mode, _| Ok(StreamHandle { id: 1, mode }));
        engine
            .expect_reconfigure_streamed()
            .times(1)
            .returning(|handle, _| {
                Ok(StreamHandle {
                    id: handle.id + 1,
                    mode: handle.mode,
                })
            });
        let mut machine = ControlModeStateMachine::new();
        machine
            .request_mode(&mut engine, CommandKind::JointPosition, &settings())
            .unwrap();
        machine
            .reconfigure_active(&mut engine, StreamedMode::Linear, &settings())
            .unwrap();
        machine
            .reconfigure_active(&mut engine, StreamedMode::Nonlinear, &settings())
            .unwrap();
        assert_eq!(
            machine.active_stream(),
            Some(handle(2, StreamedMode::Nonlinear))
        );
    }
}
