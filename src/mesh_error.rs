//! MeshError: Unified error type for mesh-narray public APIs
//!
//! Construction errors (index-space or axis count mismatches, asymmetric ghost
//! intervals) are fatal for the whole process group; see
//! [`fatal::abort_group`](crate::fatal::abort_group). Lookup errors are local and
//! recoverable by the caller.

use crate::data::field_info::FieldKey;
use thiserror::Error;

/// Unified error type for mesh-narray operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The topology declares a different number of index spaces than the coloring supplies.
    #[error("coloring supplies {actual} index spaces, topology declares {expected}")]
    IndexSpaceMismatch { expected: usize, actual: usize },
    /// A per-axis array does not match the declared dimensionality.
    #[error("invalid #axes for {what} ({actual}), must be: {expected}")]
    AxisCountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Two colors disagree on the ghost intervals they share. Counts are ghost slots.
    #[error(
        "color {color} expects {expected} ghost slots from color {peer}, but {peer} would send {actual}"
    )]
    AsymmetricIntervals {
        color: usize,
        peer: usize,
        expected: usize,
        actual: usize,
    },
    /// Colors are mapped 1:1 to processes.
    #[error("coloring has {colors} colors but the process group has {processes} processes")]
    ColorCountMismatch { colors: usize, processes: usize },
    /// The coloring specification cannot be realized.
    #[error("invalid coloring: {0}")]
    InvalidColoring(String),
    /// Metadata received from the root disagrees with the local derivation.
    #[error("color {color} metadata for index space {space} disagrees with the root's coloring")]
    MetadataMismatch { color: usize, space: usize },
    /// Registry lookup on a key that was never registered.
    #[error("fid lookup failed for {0}")]
    FieldNotFound(FieldKey),
    /// Registry insertion under an already-registered key.
    #[error("field key {0} is already registered")]
    DuplicateFieldKey(FieldKey),
    /// The field belongs to another index space than the one addressed.
    #[error("field {fid} lives on index space {actual}, not {expected}")]
    FieldSpaceMismatch {
        fid: usize,
        expected: usize,
        actual: usize,
    },
    /// The element type used to view a field has the wrong size.
    #[error("field {fid} has {expected}-byte elements, viewed as {actual}-byte elements")]
    FieldTypeSize {
        fid: usize,
        expected: usize,
        actual: usize,
    },
    /// A read-only view of a field that has never been written.
    #[error("field {fid} has no storage yet")]
    FieldUnallocated { fid: usize },
    /// Index space id out of range for this topology.
    #[error("index space {space} out of range ({count} declared)")]
    IndexSpaceOutOfRange { space: usize, count: usize },
    /// Axis id out of range for this topology.
    #[error("axis {axis} out of range (dimension {dimension})")]
    AxisOutOfRange { axis: usize, dimension: usize },
    /// Communication failure or malformed message from a neighbor.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Serializer failure while packing or unpacking a payload.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The process-wide field registry has already been installed.
    #[error("the process-wide field registry is already installed")]
    RegistryInstalled,
    /// The process-wide field registry was queried before installation.
    #[error("the process-wide field registry has not been installed")]
    RegistryNotInstalled,
    /// A structural invariant does not hold.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl MeshError {
    /// Whether the error is fatal for the whole process group.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            MeshError::IndexSpaceMismatch { .. }
                | MeshError::AxisCountMismatch { .. }
                | MeshError::AsymmetricIntervals { .. }
                | MeshError::ColorCountMismatch { .. }
                | MeshError::InvalidColoring(_)
                | MeshError::MetadataMismatch { .. }
        )
    }
}

impl From<bincode::Error> for MeshError {
    fn from(e: bincode::Error) -> Self {
        MeshError::Serialization(e.to_string())
    }
}

/// Free-form message used as the `source` of a [`MeshError::CommError`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CommError(pub String);

impl MeshError {
    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        MeshError::CommError {
            neighbor,
            source: Box::new(CommError(msg.into())),
        }
    }
}
