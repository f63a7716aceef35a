// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::config::ControlLoopConfig;
use crate::exception::ServoResult;
use crate::servo::control_tools::enforce_realtime;
use crate::servo::servo_driver::SmartServoDriver;

/// Determines whether the control loop has to run with realtime priority.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RealtimeConfig {
    /// Fail if the thread cannot get realtime priority.
    Enforce,
    Ignore,
}

/// Calls [`SmartServoDriver::run_cycle`] at a fixed rate.
pub struct ServoLoop {
    driver: SmartServoDriver,
    cycle_period: Duration,
    realtime: RealtimeConfig,
}

impl ServoLoop {
    pub fn new(driver: SmartServoDriver, config: &ControlLoopConfig) -> Self {
        ServoLoop {
            driver,
            cycle_period: Duration::from_secs_f64(config.cycle_period),
            realtime: config.realtime,
        }
    }

    pub fn driver(&self) -> &SmartServoDriver {
        &self.driver
    }

    pub fn into_driver(self) -> SmartServoDriver {
        self.driver
    }

    /// Runs cycles on the current thread while `running` is set.
    ///
    /// A failing cycle is logged and the loop continues with the next one.
    /// # Errors
    /// * [`RealTimeException`](`crate::exception::ServoException::RealTimeException`) if
    /// realtime priority is enforced but cannot be set.
    /// # Return
    /// The number of executed cycles.
    pub fn run(&mut self, running: &AtomicBool) -> ServoResult<u64> {
        if self.realtime == RealtimeConfig::Enforce {
            enforce_realtime()?;
        }
        let mut cycles = 0;
        let mut next_cycle = Instant::now();
        while running.load(Ordering::Acquire) {
            match self.driver.run_cycle() {
                Ok(outcome) => trace!("Cycle {}: {:?}", cycles, outcome),
                Err(exception) => error!("Cycle {} failed: {}", cycles, exception),
            }
            cycles += 1;
            next_cycle += self.cycle_period;
            let now = Instant::now();
            if next_cycle > now {
                thread::sleep(next_cycle - now);
            } else {
                // overrun, do not try to catch up
                next_cycle = now;
            }
        }
        Ok(cycles)
    }
}
