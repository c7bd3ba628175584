//! Partition builder: per index space, the allocation size of every color.

use crate::data::region::Region;
use crate::mesh_error::MeshError;
use crate::topology::coloring::Coloring;

/// Allocation sizes of one index space, indexed by color.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    index_space: usize,
    extents: Vec<Vec<usize>>,
    sizes: Vec<usize>,
}

impl Partition {
    pub fn index_space(&self) -> usize {
        self.index_space
    }

    pub fn colors(&self) -> usize {
        self.sizes.len()
    }

    /// Full local extent of `color`, per axis.
    pub fn extents(&self, color: usize) -> &[usize] {
        &self.extents[color]
    }

    /// Number of storage slots of `color`.
    pub fn size(&self, color: usize) -> usize {
        self.sizes[color]
    }

    /// Sum of all colors' storage.
    pub fn total(&self) -> usize {
        self.sizes.iter().sum()
    }

    /// Empty storage for `color`.
    pub fn region(&self, color: usize) -> Region {
        Region::new(self.index_space, color, self.sizes[color])
    }
}

/// Build one [`Partition`] per index space.
///
/// # Errors
/// `IndexSpaceMismatch` if `coloring` does not supply exactly `index_spaces`
/// index spaces.
pub fn make_partitions(coloring: &Coloring, index_spaces: usize) -> Result<Vec<Partition>, MeshError> {
    if coloring.index_spaces() != index_spaces {
        return Err(MeshError::IndexSpaceMismatch {
            expected: index_spaces,
            actual: coloring.index_spaces(),
        });
    }
    Ok(coloring
        .idx_colorings
        .iter()
        .enumerate()
        .map(|(index_space, per_color)| {
            let extents: Vec<Vec<usize>> = per_color.iter().map(|ic| ic.extents.clone()).collect();
            let sizes = extents.iter().map(|e| e.iter().product()).collect();
            Partition {
                index_space,
                extents,
                sizes,
            }
        })
        .collect())
}
