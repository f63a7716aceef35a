// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

mod sim;

use clap::Parser;
use iiwa_servo::logging::init_tracing;
use iiwa_servo::servo::spline::SegmentType;
use iiwa_servo::{
    CartesianPose, CartesianSpline, ControlModeSpec, DriverConfig, Goal, JointSpline,
    JointSplineSegmentMessage, JointVector, MotionCommand, ServoResult, SmartServoDriver,
    SplineSegment, Twist,
};
use sim::{QueuedCommands, RecordingGoals, ShiftedWorld, SimulatedEngine};

/// Walks a simulated robot through every control strategy and prints the engine calls the
/// driver makes on the way.
#[derive(Parser, Debug)]
#[clap(author, version, name = "mode_switching")]
struct CommandLineArguments {
    /// Speed override applied before the first command
    #[clap(long, default_value = "0.5")]
    pub speed_override: f64,
}

fn main() -> ServoResult<()> {
    let args = CommandLineArguments::parse();
    let config = DriverConfig::default();
    init_tracing("debug")?;

    let base = config.robot.base_frame_id.clone();
    let pose = |x: f64| CartesianPose::new(&base, [x, 0., 0.5], [0., 1., 0., 0.]);
    let (engine, halt, robot) = SimulatedEngine::new(JointVector::zeros(7), pose(0.5)?);
    let (commands, queue) = QueuedCommands::new();
    let (goals, pending, results) = RecordingGoals::new();
    let mut driver = SmartServoDriver::new(
        &config,
        Box::new(engine),
        Box::new(halt),
        Box::new(goals),
        Box::new(commands),
        Box::new(ShiftedWorld { world_offset: 0.2 }),
    )?;
    let services = driver.services();
    services.set_speed_override(args.speed_override)?;

    let spline = CartesianSpline::new(vec![
        SplineSegment::from_code(SegmentType::Spl as i32, pose(0.55)?, None)?,
        SplineSegment::from_code(SegmentType::Lin as i32, pose(0.6)?, None)?,
    ]);
    // joint impedance: stiffness in the first auxiliary slot, damping in the second
    let joint_spline = JointSpline::from_segments(&[
        JointSplineSegmentMessage {
            point: JointVector::from_slice(&[0.2; 7]),
            auxiliary: Some([500.; 7]),
            impedance_mode: 1,
            relative_velocity: Some(0.25),
        },
        JointSplineSegmentMessage {
            point: JointVector::from_slice(&[0.3; 7]),
            auxiliary: Some([0.7; 7]),
            impedance_mode: 1,
            relative_velocity: None,
        },
    ])?;
    let steps: Vec<(&str, Option<MotionCommand>, Option<MotionCommand>)> = vec![
        (
            "streamed joint position",
            Some(MotionCommand::JointPosition(JointVector::from_slice(&[0.1; 7]))),
            None,
        ),
        (
            "streamed linear pose",
            Some(MotionCommand::CartesianPoseLinear(pose(0.45)?)),
            None,
        ),
        (
            "Cartesian velocity",
            Some(MotionCommand::CartesianVelocity(Twist::new(
                "",
                [0.05, 0., 0.],
                [0.; 3],
            ))),
            None,
        ),
        (
            "point-to-point goal in world frame",
            None,
            Some(MotionCommand::P2PCartesianPose(CartesianPose::new(
                "world",
                [0.7, 0., 0.4],
                [0., 1., 0., 0.],
            )?)),
        ),
        ("spline goal", None, Some(MotionCommand::P2PCartesianSpline(spline.clone()))),
        ("second spline goal", None, Some(MotionCommand::P2PCartesianSpline(spline))),
        (
            "joint spline with joint impedance",
            Some(MotionCommand::P2PJointSpline(joint_spline)),
            None,
        ),
        (
            "back to streamed linear pose",
            Some(MotionCommand::CartesianPoseLinear(pose(0.5)?)),
            None,
        ),
    ];

    for (id, (label, command, goal)) in steps.into_iter().enumerate() {
        if let Some(command) = command {
            queue.lock().push_back(command);
        }
        if let Some(command) = goal {
            pending.lock().push_back(Goal {
                id: id as u64,
                command,
            });
        }
        let outcome = driver.run_cycle();
        println!("== {}: {:?}, strategy {:?}", label, outcome, services.strategy());
        for call in robot.lock().calls.drain(..) {
            println!("   {}", call);
        }
    }

    services.request_control_mode(ControlModeSpec::CartesianImpedance {
        stiffness: [2000., 2000., 2000., 200., 200., 200.],
        damping: [0.7; 6],
    })?;
    services.set_endpoint_frame("")?;
    services.emergency_stop()?;
    println!("== services");
    for call in robot.lock().calls.drain(..) {
        println!("   {}", call);
    }
    for (goal, result) in results.lock().iter() {
        println!("goal {}: {}", goal, result);
    }
    Ok(())
}
