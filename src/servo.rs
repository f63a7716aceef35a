// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the control-mode arbitration and motion generation of the driver.

pub mod command_source;
pub mod command_types;
pub mod control_loop;
pub mod control_mode;
mod control_tools;
pub mod control_types;
pub mod execution_engine;
pub mod frame_resolver;
pub mod goal_tracker;
pub mod motion_dispatcher;
pub mod servo_driver;
pub mod speed_limits;
pub mod spline;
pub mod velocity_integrator;
