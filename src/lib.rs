// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # iiwa-servo-rs
//! iiwa-servo-rs is the control-mode arbitration and motion generation core of a driver for
//! KUKA LBR iiwa robots. It sits between a remote commanding channel and the realtime motion
//! execution engine of the robot.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE CONTROLLING THE ROBOT!**
//!
//! ## Design
//! Every control cycle the [`SmartServoDriver`] takes the latest goal or command, makes sure the
//! matching control strategy is active on the engine and passes exactly one destination or
//! one-shot motion to it. The strategies are
//! * streamed nonlinear: destinations are updated every cycle, the engine chooses the path.
//! * streamed linear: destinations are updated every cycle and reached on straight lines.
//! * point-to-point: one motion (PTP, LIN or spline) runs to completion.
//!
//! Velocity commands are integrated into position destinations every cycle while keeping every
//! joint inside its soft limits.
//!
//! The transport, the action-goal queue, frame lookup and the engine itself are collaborators
//! behind the traits [`CommandSource`], [`GoalTracker`], [`FrameResolver`],
//! [`ExecutionEngine`] and [`EmergencyHalt`].
//!
//! The library is divided into the modules:
//! * [servo](`crate::servo`) - command types, state machine, motion generation and the driver.
//! * [config](`crate::config`) - driver configuration loaded from TOML.
//! * [logging](`crate::logging`) - tracing setup.
//! * [exception](`crate::exception`) - the error type.
//!
//! # Example:
//!```no_run
//! use std::sync::atomic::AtomicBool;
//! use iiwa_servo::{
//!     CommandSource, DriverConfig, EmergencyHalt, ExecutionEngine, FrameResolver, GoalTracker,
//!     ServoLoop, ServoResult, SmartServoDriver,
//! };
//! # fn collaborators() -> (Box<dyn ExecutionEngine>, Box<dyn EmergencyHalt>,
//! #     Box<dyn GoalTracker>, Box<dyn CommandSource>, Box<dyn FrameResolver>) {
//! #     unimplemented!()
//! # }
//! fn main() -> ServoResult<()> {
//!     let config = DriverConfig::from_file("iiwa_servo.toml")?;
//!     iiwa_servo::logging::init_tracing(&config.logging.level)?;
//!     let (engine, halt, goals, commands, resolver) = collaborators();
//!     let driver = SmartServoDriver::new(&config, engine, halt, goals, commands, resolver)?;
//!     let services = driver.services();
//!     services.set_speed_override(0.5)?;
//!     let running = AtomicBool::new(true);
//!     ServoLoop::new(driver, &config.control_loop).run(&running)?;
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod exception;
pub mod logging;
pub mod servo;

pub use config::DriverConfig;
pub use exception::{ServoException, ServoResult};
pub use servo::command_source::{CommandSource, MotionCommand};
pub use servo::command_types::{CommandKind, ControlStrategy, StreamedMode};
pub use servo::control_loop::{RealtimeConfig, ServoLoop};
pub use servo::control_mode::{plan_transition, ControlModeStateMachine, TransitionStep};
pub use servo::control_types::{
    CartesianPose, JointLimits, JointPositionVelocity, JointVector, RedundancyHint, Twist,
};
pub use servo::execution_engine::{
    CompletionCallback, ControlModeSpec, EmergencyHalt, ExecutionEngine, MotionOutcome,
    MotionSpec, OneShotMotion, StreamHandle, StreamedSettings, StreamedTarget,
};
pub use servo::frame_resolver::FrameResolver;
pub use servo::goal_tracker::{Goal, GoalTracker};
pub use servo::servo_driver::{CycleOutcome, DriverServices, SmartServoDriver};
pub use servo::speed_limits::{
    MotionLimits, PtpCartesianLimits, PtpJointLimits, SpeedPolicy, StreamedJointLimits,
    StreamedLinearLimits,
};
pub use servo::spline::{
    CartesianSpline, ImpedanceParameters, JointSpline, JointSplineSegmentMessage, SplineSegment,
};
