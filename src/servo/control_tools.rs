// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Realtime scheduling of the servo loop thread.
use std::path::Path;

use tracing::info;

use crate::exception::{ServoException, ServoResult};

/// Exists on kernels built with the PREEMPT_RT patch.
static REALTIME_KERNEL_FLAG: &str = "/sys/kernel/realtime";

/// Kernel threads such as interrupt handlers keep priorities above the servo loop.
static PRIORITY_BELOW_MAXIMUM: libc::c_int = 1;

fn realtime_error(step: &str) -> ServoException {
    ServoException::RealTimeException {
        message: format!("Servo loop thread: {}", step),
    }
}

pub fn has_realtime_kernel() -> bool {
    Path::new(REALTIME_KERNEL_FLAG).exists()
}

/// Switches the current thread to FIFO scheduling just below the maximum priority and locks
/// the process memory.
///
/// The user running the driver needs an `rtprio` entry in `/etc/security/limits.conf`.
pub fn set_current_thread_to_highest_scheduler_priority() -> ServoResult<libc::c_int> {
    // SAFETY: plain libc calls on the current thread with a fully initialized sched_param.
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority == -1 {
            return Err(realtime_error("maximum FIFO priority is unknown"));
        }
        let priority = max_priority - PRIORITY_BELOW_MAXIMUM;
        let parameters = libc::sched_param {
            sched_priority: priority,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &parameters) != 0 {
            return Err(realtime_error("FIFO scheduling was refused"));
        }
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            return Err(realtime_error("memory could not be locked"));
        }
        Ok(priority)
    }
}

/// Makes the current thread a realtime thread.
/// # Errors
/// * [`RealTimeException`](`crate::exception::ServoException::RealTimeException`) on a kernel
/// without realtime support or if the scheduler refuses the priority.
pub fn enforce_realtime() -> ServoResult<()> {
    if !has_realtime_kernel() {
        return Err(realtime_error("the running kernel has no realtime support"));
    }
    let priority = set_current_thread_to_highest_scheduler_priority()?;
    info!("Servo loop runs with FIFO priority {}", priority);
    Ok(())
}
