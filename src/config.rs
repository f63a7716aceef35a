// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Configuration of the driver, loaded from a TOML file.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::exception::{ServoException, ServoResult};
use crate::servo::control_loop::RealtimeConfig;
use crate::servo::control_types::{JointLimits, JointVector, SOFT_JOINT_LIMIT};
use crate::servo::speed_limits::SpeedPolicy;

/// Hard joint limits of the LBR iiwa 14 R820 in \[deg\].
static IIWA14_JOINT_LIMITS_DEG: [f64; 7] = [170., 120., 170., 120., 170., 120., 175.];

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub robot: RobotConfig,
    pub control_loop: ControlLoopConfig,
    pub speed_limits: SpeedPolicy,
    pub logging: LoggingConfig,
}

/// Kinematic description of the robot and its frames
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    pub joint_count: usize,
    /// Lower hard joint limits in \[rad\]
    pub min_joint_positions: Vec<f64>,
    /// Upper hard joint limits in \[rad\]
    pub max_joint_positions: Vec<f64>,
    /// Margin kept away from the hard limits in \[rad\]
    pub soft_joint_limit: f64,
    /// Frame one-shot Cartesian targets are expressed in
    pub base_frame_id: String,
    /// Endpoint frame used when an empty frame id is requested
    pub tool_frame_id: String,
}

/// Timing of the control cycle
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlLoopConfig {
    /// Cycle period in \[s\]
    pub cycle_period: f64,
    pub realtime: RealtimeConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for RobotConfig {
    fn default() -> Self {
        let max: Vec<f64> = IIWA14_JOINT_LIMITS_DEG
            .iter()
            .map(|limit| limit.to_radians())
            .collect();
        RobotConfig {
            joint_count: max.len(),
            min_joint_positions: max.iter().map(|limit| -limit).collect(),
            max_joint_positions: max,
            soft_joint_limit: SOFT_JOINT_LIMIT,
            base_frame_id: "iiwa_link_0".to_string(),
            tool_frame_id: "iiwa_link_ee".to_string(),
        }
    }
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        ControlLoopConfig {
            cycle_period: 0.005,
            realtime: RealtimeConfig::Ignore,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            robot: RobotConfig::default(),
            control_loop: ControlLoopConfig::default(),
            speed_limits: SpeedPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RobotConfig {
    /// Builds the joint limits described by this configuration.
    /// # Errors
    /// * [`ConfigException`](`crate::exception::ServoException::ConfigException`) if the limit
    /// vectors do not match `joint_count` or a range is empty after applying the margin.
    pub fn joint_limits(&self) -> ServoResult<JointLimits> {
        for (name, limits) in [
            ("min_joint_positions", &self.min_joint_positions),
            ("max_joint_positions", &self.max_joint_positions),
        ]
        .iter()
        {
            if limits.len() != self.joint_count {
                return Err(ServoException::ConfigException {
                    message: format!(
                        "{} has {} entries but joint_count is {}",
                        name,
                        limits.len(),
                        self.joint_count
                    ),
                });
            }
        }
        JointLimits::new(
            JointVector::from_slice(&self.min_joint_positions),
            JointVector::from_slice(&self.max_joint_positions),
            self.soft_joint_limit,
        )
        .map_err(|error| ServoException::ConfigException {
            message: error.to_string(),
        })
    }
}

impl DriverConfig {
    /// Loads and validates the configuration from a TOML file.
    ///
    /// # Example
    /// ```no_run
    /// use iiwa_servo::config::DriverConfig;
    ///
    /// let config = DriverConfig::from_file("iiwa_servo.toml")?;
    /// # Ok::<(), iiwa_servo::ServoException>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServoResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|error| ServoException::ConfigException {
            message: format!("Cannot read {}: {}", path.display(), error),
        })?;
        DriverConfig::from_toml_str(&contents)
    }

    /// Parses and validates the configuration. Missing sections and keys take their defaults.
    pub fn from_toml_str(contents: &str) -> ServoResult<Self> {
        let config: DriverConfig =
            toml::from_str(contents).map_err(|error| ServoException::ConfigException {
                message: error.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> ServoResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|error| ServoException::ConfigException {
                message: error.to_string(),
            })?;
        fs::write(path, contents).map_err(|error| ServoException::ConfigException {
            message: error.to_string(),
        })
    }

    pub fn validate(&self) -> ServoResult<()> {
        self.robot.joint_limits()?;
        if !(self.control_loop.cycle_period.is_finite() && self.control_loop.cycle_period > 0.) {
            return Err(ServoException::ConfigException {
                message: format!(
                    "cycle_period must be positive, got {}",
                    self.control_loop.cycle_period
                ),
            });
        }
        if self.robot.tool_frame_id.is_empty() {
            return Err(ServoException::ConfigException {
                message: "tool_frame_id must not be empty".to_string(),
            });
        }
        self.speed_limits
            .validate()
            .map_err(|error| ServoException::ConfigException {
                message: error.to_string(),
            })
    }
}
