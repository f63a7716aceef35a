// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

mod sim;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use iiwa_servo::logging::init_tracing;
use iiwa_servo::{
    CartesianPose, DriverConfig, JointVector, MotionCommand, ServoLoop, ServoResult,
    SmartServoDriver,
};
use sim::{RecordingGoals, RepeatedCommand, ShiftedWorld, SimulatedEngine};

/// Streams a constant joint velocity to a simulated robot.
///
/// The joints stop at the soft limits instead of running into the hard limits.
#[derive(Parser, Debug)]
#[clap(author, version, name = "simulated_joint_velocity")]
struct CommandLineArguments {
    /// Velocity of every joint in [rad/s]
    #[clap(long, default_value = "0.5")]
    pub velocity: f64,
    /// Duration of the motion in [s]
    #[clap(long, default_value = "2.0")]
    pub duration: f64,
    /// Optional TOML configuration of the driver
    #[clap(long)]
    pub config: Option<String>,
}

fn main() -> ServoResult<()> {
    let args = CommandLineArguments::parse();
    let config = match &args.config {
        Some(path) => DriverConfig::from_file(path)?,
        None => DriverConfig::default(),
    };
    init_tracing(&config.logging.level)?;

    let joint_count = config.robot.joint_count;
    let start_pose =
        CartesianPose::new(&config.robot.base_frame_id, [0.5, 0., 0.5], [1., 0., 0., 0.])?;
    let (engine, halt, robot) = SimulatedEngine::new(JointVector::zeros(joint_count), start_pose);
    let (goals, _pending, _results) = RecordingGoals::new();
    let command = MotionCommand::JointVelocity(JointVector::from_slice(&vec![
        args.velocity;
        joint_count
    ]));
    let driver = SmartServoDriver::new(
        &config,
        Box::new(engine),
        Box::new(halt),
        Box::new(goals),
        Box::new(RepeatedCommand(command)),
        Box::new(ShiftedWorld { world_offset: 0. }),
    )?;
    let services = driver.services();

    let running = Arc::new(AtomicBool::new(true));
    let loop_running = Arc::clone(&running);
    let control_loop = config.control_loop.clone();
    let handle = thread::Builder::new()
        .name("servo".to_string())
        .spawn(move || ServoLoop::new(driver, &control_loop).run(&loop_running))
        .map_err(|error| sim::demo_error(&error.to_string()))?;

    thread::sleep(Duration::from_secs_f64(args.duration));
    running.store(false, Ordering::Release);
    let cycles = handle
        .join()
        .map_err(|_| sim::demo_error("control loop panicked"))??;

    println!("Ran {} cycles in {:?} strategy", cycles, services.strategy());
    let limits = config.robot.joint_limits()?;
    let joints = robot.lock().joints.clone();
    for (joint, position) in joints.as_slice().iter().enumerate() {
        println!(
            "joint {}: {:.4} rad (upper hard limit {:.4} rad)",
            joint + 1,
            position,
            limits.max().as_slice()[joint]
        );
    }
    Ok(())
}
