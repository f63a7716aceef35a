// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
#[cfg(test)]
use mockall::automock;

use crate::servo::control_types::CartesianPose;

/// Looks up coordinate frames and transforms poses between them.
#[cfg_attr(test, automock)]
pub trait FrameResolver: Send {
    /// Expresses `pose` relative to `reference_frame`.
    ///
    /// Returns `None` if one of the frames is unknown.
    fn resolve(&self, pose: &CartesianPose, reference_frame: &str) -> Option<CartesianPose>;
}

/// Resolves a pose into `reference_frame`, skipping the lookup if it already is expressed
/// there. An empty frame id is read as `reference_frame`.
pub fn resolve_into(
    resolver: &dyn FrameResolver,
    pose: &CartesianPose,
    reference_frame: &str,
) -> Option<CartesianPose> {
    if pose.frame_id.is_empty() || pose.frame_id == reference_frame {
        let mut resolved = pose.clone();
        resolved.frame_id = reference_frame.to_string();
        Some(resolved)
    } else {
        resolver.resolve(pose, reference_frame)
    }
}
