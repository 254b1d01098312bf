//! Error types for configuration and per-cycle contract checks.
//!
//! Recoverable conditions (missing embeddings, stale or absent frames) are
//! never errors; they are reported through [`crate::metrics::CycleStats`].

use crate::types::{CameraId, LocalTrackId};

/// Errors surfaced by the tracking coordinator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    /// Invalid tunables; fatal at startup.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A collaborator broke its contract; the current cycle is aborted.
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
}

/// Ways a frame batch or a per-camera tracker can break the orchestrator's contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("unknown camera {camera}")]
    UnknownCamera { camera: CameraId },

    #[error("camera {camera} delivered more than one frame in a cycle")]
    DuplicateFrame { camera: CameraId },

    #[error("data tagged with camera {found} reported through camera {expected}")]
    CameraMismatch { expected: CameraId, found: CameraId },

    #[error("camera {camera} reported local track {local_id} twice")]
    DuplicateLocalId {
        camera: CameraId,
        local_id: LocalTrackId,
    },

    #[error("camera {camera} published local track {local_id} absent from its snapshot")]
    UnknownLocalId {
        camera: CameraId,
        local_id: LocalTrackId,
    },

    #[error("camera {camera} reported a non-finite box for local track {local_id}")]
    NonFiniteBox {
        camera: CameraId,
        local_id: LocalTrackId,
    },

    #[error("cycle {cycle} is not after the last processed cycle {last}")]
    NonMonotonicCycle { cycle: u64, last: u64 },

    #[error("camera {camera} output lengths differ: {bboxes} boxes, {labels} labels, {ids} ids")]
    LengthMismatch {
        camera: CameraId,
        bboxes: usize,
        labels: usize,
        ids: usize,
    },
}

pub type Result<T> = std::result::Result<T, TrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_converts_and_formats() {
        let err: TrackingError = ContractViolation::LengthMismatch {
            camera: CameraId(2),
            bboxes: 3,
            labels: 2,
            ids: 3,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "contract violation: camera C2 output lengths differ: 3 boxes, 2 labels, 3 ids"
        );
        let err: TrackingError = ContractViolation::NonMonotonicCycle { cycle: 5, last: 11 }.into();
        assert_eq!(
            err.to_string(),
            "contract violation: cycle 5 is not after the last processed cycle 11"
        );
    }
}
