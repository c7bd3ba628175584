//! Structured-mesh topology.
//!
//! [`NArray`] binds one color (this rank) of a colored n-dimensional mesh: its
//! metadata per index space, the partition sizes, the copy plans and the local
//! field storage. Construction is collective:
//!
//! 1. rank 0 asks the [`Specialization`] for a [`ColoringSpec`], colors it, and
//!    sends each rank the coloring plus that rank's [`ColorMeta`] via `one_to_allv`;
//! 2. every rank re-derives its metadata from the coloring and checks it against what
//!    the root sent;
//! 3. every rank builds and cross-checks one [`CopyPlan`] per index space.
//!
//! Field access goes through privilege packs. [`NArray::access`] refreshes the
//! ghosts of a field only when the pack needs current ghost values and they are
//! stale, and marks them stale when the pack writes.

use crate::algs::collective::one_to_allv;
use crate::algs::communicator::Communicator;
use crate::data::field_info::{self, FieldInfo, FieldKey};
use crate::data::privilege::PrivilegePack;
use crate::data::region::Region;
use crate::fatal::OrAbort;
use crate::mesh_error::MeshError;
use crate::topology::coloring::{ColorMeta, Coloring, ColoringSpec, IndexColoring};
use crate::topology::copy_plan::CopyPlan;
use crate::topology::partition::{Partition, make_partitions};
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// What a mesh kind provides to build a topology.
pub trait Specialization {
    /// Number of index spaces the mesh declares.
    fn index_spaces(&self) -> usize;
    fn dimension(&self) -> usize;
    /// Coloring input for a group of `processes` processes.
    fn color(&self, processes: usize) -> Result<ColoringSpec, MeshError>;
}

/// Subsets of one axis of local storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Owned indices.
    Logical,
    /// Owned indices plus boundary padding.
    Extended,
    /// The whole local storage.
    All,
    BoundaryLow,
    BoundaryHigh,
    GhostLow,
    GhostHigh,
    /// The global index space: `size` is the global extent, `offset` the global
    /// position of the first owned index.
    Global,
}

impl Domain {
    /// `(offset, size)` of the domain on `axis` of `ic`.
    fn bounds(self, ic: &IndexColoring, axis: usize) -> (usize, usize) {
        let (gl, gh) = ic.ghosts(axis);
        let (bl, bh) = (ic.boundary_low(axis), ic.boundary_high(axis));
        let owned = ic.owned(axis);
        match self {
            Domain::Logical => (gl + bl, owned),
            Domain::Extended => (gl, bl + owned + bh),
            Domain::All => (0, ic.extents[axis]),
            Domain::BoundaryLow => (gl, bl),
            Domain::BoundaryHigh => (gl + bl + owned, bh),
            Domain::GhostLow => (0, gl),
            Domain::GhostHigh => (ic.extents[axis] - gh, gh),
            Domain::Global => (ic.offset[axis], ic.global[axis]),
        }
    }
}

struct Parts {
    spec: ColoringSpec,
    meta: ColorMeta,
    partitions: Vec<Partition>,
    plans: Vec<CopyPlan>,
}

type Dissemination = Result<(ColoringSpec, ColorMeta), String>;

/// One color of a structured mesh.
pub struct NArray<C: Communicator> {
    comm: C,
    spec: ColoringSpec,
    meta: ColorMeta,
    partitions: Vec<Partition>,
    plans: Vec<CopyPlan>,
    regions: Vec<Region>,
}

impl<C: Communicator> std::fmt::Debug for NArray<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NArray")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .field("meta", &self.meta)
            .field("regions", &self.regions)
            .finish()
    }
}

impl<C: Communicator> NArray<C> {
    /// Color the mesh described by `mesh` over the group and bind this rank's
    /// color. Collective.
    ///
    /// # Errors
    /// Construction errors are reported on every rank when they follow from the
    /// coloring input. Use [`NArray::new_or_abort`] to terminate the group instead.
    pub fn new<S: Specialization>(comm: C, mesh: &S) -> Result<Self, MeshError> {
        let parts = Self::build(&comm, mesh)?;
        Ok(Self::assemble(comm, parts))
    }

    /// [`NArray::new`], aborting the whole group on a construction error.
    pub fn new_or_abort<S: Specialization>(comm: C, mesh: &S) -> Self {
        let parts = Self::build(&comm, mesh).or_abort(&comm);
        Self::assemble(comm, parts)
    }

    /// Bind this rank's color of a coloring every rank already holds. Collective.
    pub fn from_coloring(comm: C, coloring: &Coloring, index_spaces: usize) -> Result<Self, MeshError> {
        let parts = Self::parts(&comm, coloring, index_spaces)?;
        Ok(Self::assemble(comm, parts))
    }

    fn build<S: Specialization>(comm: &C, mesh: &S) -> Result<Parts, MeshError> {
        let rank = comm.rank();
        let size = comm.size();

        let built = (rank == 0).then(|| -> Result<Coloring, MeshError> {
            let coloring = Coloring::new(mesh.color(size)?)?;
            if coloring.colors != size {
                return Err(MeshError::ColorCountMismatch {
                    colors: coloring.colors,
                    processes: size,
                });
            }
            Ok(coloring)
        });
        let received: Dissemination = one_to_allv(comm, |r, _| match &built {
            Some(Ok(c)) => Ok((c.spec.clone(), c.color_meta(r))),
            Some(Err(e)) => Err(e.to_string()),
            None => Err("metadata requested from a non-root rank".into()),
        })?;
        let (spec, meta) = match (built, received) {
            (Some(Err(e)), _) => return Err(e),
            (_, Err(msg)) => return Err(MeshError::InvalidColoring(msg)),
            (_, Ok(v)) => v,
        };

        // the coloring is deterministic: every rank must derive the same metadata
        let coloring = Coloring::new(spec)?;
        let local = coloring.color_meta(rank);
        if let Some(space) = (0..local.spaces.len().max(meta.spaces.len()))
            .find(|&s| local.spaces.get(s) != meta.spaces.get(s))
        {
            return Err(MeshError::MetadataMismatch { color: rank, space });
        }
        if meta.color != rank {
            return Err(MeshError::MetadataMismatch { color: rank, space: 0 });
        }
        Self::parts(comm, &coloring, mesh.index_spaces())
    }

    fn parts(comm: &C, coloring: &Coloring, index_spaces: usize) -> Result<Parts, MeshError> {
        if coloring.colors != comm.size() {
            return Err(MeshError::ColorCountMismatch {
                colors: coloring.colors,
                processes: comm.size(),
            });
        }
        let partitions = make_partitions(coloring, index_spaces)?;
        let plans = (0..index_spaces)
            .map(|s| CopyPlan::new(comm, coloring, s))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "rank {} bound color {} of {} ({} index spaces)",
            comm.rank(),
            comm.rank(),
            coloring.colors,
            index_spaces
        );
        Ok(Parts {
            spec: coloring.spec.clone(),
            meta: coloring.color_meta(comm.rank()),
            partitions,
            plans,
        })
    }

    fn assemble(comm: C, parts: Parts) -> Self {
        let color = comm.rank();
        let regions = parts.partitions.iter().map(|p| p.region(color)).collect();
        NArray {
            comm,
            spec: parts.spec,
            meta: parts.meta,
            partitions: parts.partitions,
            plans: parts.plans,
            regions,
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Number of colors.
    pub fn colors(&self) -> usize {
        self.comm.size()
    }

    /// This rank's color.
    pub fn color(&self) -> usize {
        self.meta.color
    }

    pub fn index_spaces(&self) -> usize {
        self.meta.spaces.len()
    }

    pub fn dimension(&self) -> usize {
        self.spec.dimension()
    }

    pub fn spec(&self) -> &ColoringSpec {
        &self.spec
    }

    pub fn meta(&self) -> &ColorMeta {
        &self.meta
    }

    pub fn partition(&self, space: usize) -> Result<&Partition, MeshError> {
        self.check_space(space)?;
        Ok(&self.partitions[space])
    }

    pub fn copy_plan(&self, space: usize) -> Result<&CopyPlan, MeshError> {
        self.check_space(space)?;
        Ok(&self.plans[space])
    }

    pub fn region(&self, space: usize) -> Result<&Region, MeshError> {
        self.check_space(space)?;
        Ok(&self.regions[space])
    }

    fn check_space(&self, space: usize) -> Result<(), MeshError> {
        if space >= self.index_spaces() {
            return Err(MeshError::IndexSpaceOutOfRange {
                space,
                count: self.index_spaces(),
            });
        }
        Ok(())
    }

    fn axis_meta(&self, space: usize, axis: usize) -> Result<&IndexColoring, MeshError> {
        self.check_space(space)?;
        let ic = &self.meta.spaces[space];
        if axis >= ic.dimension() {
            return Err(MeshError::AxisOutOfRange {
                axis,
                dimension: ic.dimension(),
            });
        }
        Ok(ic)
    }

    pub fn is_low(&self, space: usize, axis: usize) -> Result<bool, MeshError> {
        Ok(self.axis_meta(space, axis)?.is_low(axis))
    }

    pub fn is_high(&self, space: usize, axis: usize) -> Result<bool, MeshError> {
        Ok(self.axis_meta(space, axis)?.is_high(axis))
    }

    pub fn is_interior(&self, space: usize, axis: usize) -> Result<bool, MeshError> {
        Ok(self.axis_meta(space, axis)?.is_interior(axis))
    }

    pub fn size(&self, space: usize, axis: usize, domain: Domain) -> Result<usize, MeshError> {
        Ok(domain.bounds(self.axis_meta(space, axis)?, axis).1)
    }

    pub fn offset(&self, space: usize, axis: usize, domain: Domain) -> Result<usize, MeshError> {
        Ok(domain.bounds(self.axis_meta(space, axis)?, axis).0)
    }

    /// Indices of `domain` on `axis`. Local storage frame, except for
    /// [`Domain::Global`], which yields the owned block in global indices.
    pub fn range(&self, space: usize, axis: usize, domain: Domain) -> Result<Range<usize>, MeshError> {
        let ic = self.axis_meta(space, axis)?;
        let (offset, size) = match domain {
            Domain::Global => (ic.offset[axis], ic.owned(axis)),
            d => d.bounds(ic, axis),
        };
        Ok(offset..offset + size)
    }

    /// Global index of local storage index `local` on `axis`. Negative or past
    /// the global extent inside boundary padding.
    pub fn global_id(&self, space: usize, axis: usize, local: usize) -> Result<i64, MeshError> {
        let ic = self.axis_meta(space, axis)?;
        Ok(ic.logical.low[axis] - ic.local_logical(axis).start as i64 + local as i64)
    }

    /// Resolve `key` in the process-wide field registry.
    pub fn field_info(&self, key: FieldKey) -> Result<FieldInfo, MeshError> {
        let fi = *field_info::global()?.get(key)?;
        self.check_space(fi.index_space)?;
        Ok(fi)
    }

    /// Fill the ghost slots of `fi` unconditionally. Collective.
    pub fn ghost_copy(&mut self, fi: &FieldInfo) -> Result<(), MeshError> {
        self.check_space(fi.index_space)?;
        let space = fi.index_space;
        self.plans[space].issue(&self.comm, &mut self.regions[space], fi)?;
        self.regions[space].set_ghosts_valid(fi.fid, true);
        Ok(())
    }

    /// Prepare `fi` for a task accessing it with `pack`, and report whether a
    /// ghost copy ran. Collective whenever a copy is needed, which every color
    /// decides identically given the same sequence of accesses.
    pub fn access(&mut self, fi: &FieldInfo, pack: PrivilegePack) -> Result<bool, MeshError> {
        self.check_space(fi.index_space)?;
        let region = &mut self.regions[fi.index_space];
        region.bytes_mut(fi)?;
        let refresh = pack.should_refresh() && !region.ghosts_valid(fi.fid);
        if refresh {
            self.ghost_copy(fi)?;
        }
        if pack.allows_write() {
            self.regions[fi.index_space].set_ghosts_valid(fi.fid, false);
        }
        Ok(refresh)
    }

    /// Run `f` on the local storage of the field registered under `key`, with
    /// ghost handling per `pack`.
    pub fn with_field<T: Pod, R>(
        &mut self,
        key: FieldKey,
        pack: PrivilegePack,
        f: impl FnOnce(&mut [T]) -> R,
    ) -> Result<R, MeshError> {
        let fi = self.field_info(key)?;
        self.access(&fi, pack)?;
        let data = self.regions[fi.index_space].view_mut::<T>(&fi)?;
        Ok(f(data))
    }

    /// Read-only view of a field's local storage, ghosts as last copied.
    pub fn field<T: Pod>(&self, fi: &FieldInfo) -> Result<&[T], MeshError> {
        self.check_space(fi.index_space)?;
        self.regions[fi.index_space].view(fi)
    }

    /// Mutable view of a field's local storage; marks its ghosts stale.
    pub fn field_mut<T: Pod>(&mut self, fi: &FieldInfo) -> Result<&mut [T], MeshError> {
        self.check_space(fi.index_space)?;
        let region = &mut self.regions[fi.index_space];
        region.bytes_mut(fi)?;
        region.set_ghosts_valid(fi.fid, false);
        region.view_mut(fi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};
    use crate::data::privilege::Privilege;
    use crate::privilege_pack;
    use crate::topology::mesh::UniformMesh;

    #[test]
    fn serial_uniform_mesh() {
        let m = NArray::new(NoComm, &UniformMesh::new(vec![4, 3]).with_boundary(1)).unwrap();
        assert_eq!(m.colors(), 1);
        assert_eq!(m.index_spaces(), 2);
        assert!(m.is_low(UniformMesh::CELLS, 0).unwrap());
        assert!(m.is_high(UniformMesh::CELLS, 1).unwrap());
        assert_eq!(m.size(UniformMesh::CELLS, 0, Domain::Logical).unwrap(), 4);
        assert_eq!(m.size(UniformMesh::CELLS, 0, Domain::Extended).unwrap(), 6);
        assert_eq!(m.range(UniformMesh::CELLS, 0, Domain::Logical).unwrap(), 1..5);
        assert_eq!(m.range(UniformMesh::VERTICES, 1, Domain::BoundaryHigh).unwrap(), 5..6);
        assert_eq!(m.size(UniformMesh::CELLS, 1, Domain::GhostLow).unwrap(), 0);
        assert_eq!(m.size(UniformMesh::VERTICES, 0, Domain::Global).unwrap(), 5);
        assert_eq!(m.global_id(UniformMesh::CELLS, 0, 0).unwrap(), -1);
        assert!(matches!(
            m.size(2, 0, Domain::All),
            Err(MeshError::IndexSpaceOutOfRange { space: 2, count: 2 })
        ));
        assert!(matches!(
            m.is_low(0, 2),
            Err(MeshError::AxisOutOfRange { axis: 2, dimension: 2 })
        ));
    }

    #[test]
    fn color_count_must_match_group() {
        let mesh = UniformMesh::new(vec![8]).with_colors(vec![2]);
        assert!(matches!(
            NArray::new(NoComm, &mesh),
            Err(MeshError::ColorCountMismatch { colors: 2, processes: 1 })
        ));
    }

    #[test]
    fn root_errors_reach_every_rank() {
        let mesh = UniformMesh::new(vec![8]).with_colors(vec![3]);
        let errs = ThreadComm::run(2, |comm| NArray::new(comm, &mesh).unwrap_err());
        assert!(matches!(errs[0], MeshError::ColorCountMismatch { colors: 3, processes: 2 }));
        assert!(matches!(errs[1], MeshError::InvalidColoring(_)));
    }

    #[test]
    fn access_refreshes_only_stale_ghosts() {
        let counts = ThreadComm::run(2, |comm| {
            let mut m = NArray::new(comm, &UniformMesh::new(vec![8])).unwrap();
            let fi = FieldInfo::of::<f64>(0, UniformMesh::CELLS);
            let rank = m.color();
            let owned = m.range(UniformMesh::CELLS, 0, Domain::Logical).unwrap();
            let first = m.access(&fi, privilege_pack![wo]).unwrap();
            for i in owned.clone() {
                m.field_mut::<f64>(&fi).unwrap()[i] = (10 * rank + i) as f64;
            }
            let second = m.access(&fi, privilege_pack![ro]).unwrap();
            let third = m.access(&fi, privilege_pack![ro]).unwrap();
            let ghosts = if rank == 0 { 4 } else { 0 };
            let ghost = m.field::<f64>(&fi).unwrap()[ghosts];
            (first, second, third, ghost)
        });
        assert_eq!(counts[0], (false, true, false, 11.0));
        assert_eq!(counts[1], (false, true, false, 3.0));
    }

    #[test]
    fn merge_of_access_pack() {
        let p = PrivilegePack::new(&[Privilege::Ro, Privilege::Rw]);
        assert_eq!(p.merge(), Privilege::Rw);
    }
}
