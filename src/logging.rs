// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Tracing initialization for applications using the driver.
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::exception::{ServoException, ServoResult};

/// Installs the process-wide tracing subscriber, so events of the control loop thread and of
/// service threads end up in the same output.
///
/// `RUST_LOG` takes precedence over `level`. An unparsable level falls back to `info`.
///
/// # Errors
/// * [`ConfigException`](`crate::exception::ServoException::ConfigException`) if a global
/// subscriber is already installed.
///
/// # Example
/// ```no_run
/// iiwa_servo::logging::init_tracing("debug").unwrap();
/// ```
pub fn init_tracing(level: &str) -> ServoResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_names(true);

    tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|error| ServoException::ConfigException {
            message: format!("Could not install the log subscriber: {}", error),
        })
}
