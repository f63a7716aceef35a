// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
#[cfg(test)]
use mockall::automock;

use crate::servo::command_source::MotionCommand;
use crate::servo::execution_engine::CompletionCallback;

/// A point-to-point request which is tracked until it succeeds or fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    pub id: u64,
    pub command: MotionCommand,
}

/// The queue of action goals and the goal currently being executed.
#[cfg_attr(test, automock)]
pub trait GoalTracker: Send {
    fn has_pending_goal(&self) -> bool;
    /// Makes the next pending goal the current one.
    fn accept_next(&mut self) -> Option<Goal>;
    fn has_current_goal(&self) -> bool;
    /// Fails the current goal with `reason`. Does nothing without a current goal.
    fn mark_failed(&mut self, reason: &str);
    /// A callback which finishes the current goal with the outcome of its motion.
    fn completion_callback(&mut self) -> CompletionCallback;
}
