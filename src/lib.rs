#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-narray
//!
//! mesh-narray is the data-partitioning and ghost-synchronization core for
//! structured-mesh codes run in SPMD style, one color per process.
//!
//! ## Features
//! - Block coloring of n-dimensional regular index spaces with halo and boundary
//!   padding, periodic axes and per-color face classification
//! - Copy plans that refresh ghost data from neighbor colors (faces, edges and
//!   corners), verified across the group at construction
//! - Privilege packs that decide per access whether ghosts must be refreshed
//! - A field registry keyed by `(namespace, name, version)`
//! - `one_to_allv` / `all_to_allv` collectives over serial, in-process threaded
//!   and MPI (`mpi-support`) backends
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-narray = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use mesh_narray::prelude::*;
//!
//! let mesh = UniformMesh::new(vec![8, 8]);
//! let mut topo = NArray::new(NoComm, &mesh).unwrap();
//! let u = FieldInfo::of::<f64>(0, UniformMesh::CELLS);
//! topo.access(&u, privilege_pack![wo]).unwrap();
//! assert_eq!(topo.field::<f64>(&u).unwrap().len(), 64);
//! ```
//!
//! ## Collective calls
//! Topology construction, copy-plan issue and both collectives must be called
//! by every rank in the same order. There are no timeouts: a mismatch hangs.

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod fatal;
pub mod mesh_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use mesh_error::MeshError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::collective::{AllToAllv, Outbox, all_to_allv, one_to_allv};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    pub use crate::data::field_info::{FieldInfo, FieldKey, FieldRegistry};
    pub use crate::data::privilege::{Privilege, PrivilegePack};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::fatal::OrAbort;
    pub use crate::mesh_error::MeshError;
    pub use crate::privilege_pack;
    pub use crate::topology::coloring::{Coloring, ColoringDefinition, ColoringSpec};
    pub use crate::topology::copy_plan::CopyPlan;
    pub use crate::topology::mesh::{MeshKind, UniformMesh};
    pub use crate::topology::narray::{Domain, NArray, Specialization};
}
