//! Structured-mesh topology.
//!
//! - [`coloring`]: per-axis block distribution and per-color metadata
//! - [`partition`]: per-color allocation sizes
//! - [`copy_plan`]: cached ghost-refresh protocol
//! - [`mesh`]: mesh specializations
//! - [`narray`]: the topology bound to one color

pub mod coloring;
pub mod copy_plan;
pub mod mesh;
pub mod narray;
pub mod partition;

pub use coloring::{AxisDefinition, ColorMeta, Coloring, ColoringDefinition, ColoringSpec, IndexColoring};
pub use copy_plan::{CopyPlan, GhostRun};
pub use mesh::{ExplicitMesh, MeshKind, UniformMesh};
pub use narray::{Domain, NArray, Specialization};
pub use partition::{Partition, make_partitions};
