//! Mesh specializations: the capability sets that turn a mesh description into a
//! [`ColoringSpec`].

use crate::mesh_error::MeshError;
use crate::topology::coloring::{AxisDefinition, ColoringDefinition, ColoringSpec};
use crate::topology::narray::Specialization;
use serde::{Deserialize, Serialize};

/// Split `processes` colors over axes of the given extents.
///
/// Prime factors of `processes`, largest first, go to the axis that currently
/// has the most indices per color. Ties go to the lower axis.
pub fn factor_colors(processes: usize, extents: &[usize]) -> Vec<usize> {
    let mut colors = vec![1usize; extents.len()];
    if extents.is_empty() {
        return colors;
    }
    for p in prime_factors(processes).into_iter().rev() {
        let axis = (0..extents.len())
            .rev()
            .max_by(|&a, &b| {
                let (ea, eb) = (extents[a] * colors[b], extents[b] * colors[a]);
                ea.cmp(&eb)
            })
            .unwrap_or(0);
        colors[axis] *= p;
    }
    colors
}

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            out.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        out.push(n);
    }
    out
}

/// An n-dimensional regular mesh with a cell and a vertex index space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformMesh {
    /// Cells per axis.
    pub cells: Vec<usize>,
    pub halo: usize,
    pub boundary: usize,
    pub periodic: Vec<bool>,
    /// Colors per axis; derived from the process count when absent.
    #[serde(default)]
    pub axis_colors: Option<Vec<usize>>,
}

impl UniformMesh {
    pub const CELLS: usize = 0;
    pub const VERTICES: usize = 1;

    /// A non-periodic mesh with one ghost layer and no boundary padding.
    pub fn new(cells: Vec<usize>) -> Self {
        let periodic = vec![false; cells.len()];
        UniformMesh {
            cells,
            halo: 1,
            boundary: 0,
            periodic,
            axis_colors: None,
        }
    }

    pub fn with_halo(mut self, halo: usize) -> Self {
        self.halo = halo;
        self
    }

    pub fn with_boundary(mut self, boundary: usize) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_periodic(mut self, periodic: Vec<bool>) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn with_colors(mut self, axis_colors: Vec<usize>) -> Self {
        self.axis_colors = Some(axis_colors);
        self
    }

    fn space(&self, axis_colors: &[usize], vertices: bool) -> ColoringDefinition {
        let axes: Vec<AxisDefinition> = self
            .cells
            .iter()
            .zip(&self.periodic)
            .zip(axis_colors)
            .map(|((&cells, &periodic), &colors)| AxisDefinition {
                colors,
                // a periodic axis shares its last vertex with the first
                extent: cells + usize::from(vertices && !periodic),
                halo: self.halo,
                boundary: self.boundary,
                periodic,
            })
            .collect();
        ColoringDefinition::from_axes(&axes)
    }
}

impl Specialization for UniformMesh {
    fn index_spaces(&self) -> usize {
        2
    }

    fn dimension(&self) -> usize {
        self.cells.len()
    }

    fn color(&self, processes: usize) -> Result<ColoringSpec, MeshError> {
        let dim = self.dimension();
        if self.periodic.len() != dim {
            return Err(MeshError::AxisCountMismatch {
                what: "periodic",
                expected: dim,
                actual: self.periodic.len(),
            });
        }
        let axis_colors = match &self.axis_colors {
            Some(c) if c.len() != dim => {
                return Err(MeshError::AxisCountMismatch {
                    what: "axis_colors",
                    expected: dim,
                    actual: c.len(),
                });
            }
            Some(c) => c.clone(),
            None => factor_colors(processes, &self.cells),
        };
        let spec = ColoringSpec::new(vec![
            self.space(&axis_colors, false),
            self.space(&axis_colors, true),
        ]);
        spec.validate()?;
        Ok(spec)
    }
}

/// A mesh given directly by its coloring input, e.g. loaded from a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitMesh {
    pub spec: ColoringSpec,
}

impl Specialization for ExplicitMesh {
    fn index_spaces(&self) -> usize {
        self.spec.index_spaces.len()
    }

    fn dimension(&self) -> usize {
        self.spec.dimension()
    }

    fn color(&self, _processes: usize) -> Result<ColoringSpec, MeshError> {
        self.spec.validate()?;
        Ok(self.spec.clone())
    }
}

/// Specialization selected at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeshKind {
    Uniform(UniformMesh),
    Explicit(ExplicitMesh),
}

impl Specialization for MeshKind {
    fn index_spaces(&self) -> usize {
        match self {
            MeshKind::Uniform(m) => m.index_spaces(),
            MeshKind::Explicit(m) => m.index_spaces(),
        }
    }

    fn dimension(&self) -> usize {
        match self {
            MeshKind::Uniform(m) => m.dimension(),
            MeshKind::Explicit(m) => m.dimension(),
        }
    }

    fn color(&self, processes: usize) -> Result<ColoringSpec, MeshError> {
        match self {
            MeshKind::Uniform(m) => m.color(processes),
            MeshKind::Explicit(m) => m.color(processes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_go_to_long_axes() {
        assert_eq!(factor_colors(1, &[8, 8]), vec![1, 1]);
        assert_eq!(factor_colors(4, &[8, 8]), vec![2, 2]);
        assert_eq!(factor_colors(6, &[30, 10]), vec![6, 1]);
        assert_eq!(factor_colors(6, &[12, 12]), vec![3, 2]);
        assert_eq!(factor_colors(7, &[4, 100, 4]), vec![1, 7, 1]);
        assert_eq!(prime_factors(12), vec![2, 2, 3]);
    }

    #[test]
    fn uniform_mesh_spaces() {
        let m = UniformMesh::new(vec![8, 4]).with_periodic(vec![true, false]);
        let spec = m.color(2).unwrap();
        assert_eq!(spec.index_spaces.len(), 2);
        let cells = &spec.index_spaces[UniformMesh::CELLS];
        let verts = &spec.index_spaces[UniformMesh::VERTICES];
        assert_eq!(cells.axis_colors, vec![2, 1]);
        assert_eq!(cells.axis_extents, vec![8, 4]);
        assert_eq!(verts.axis_extents, vec![8, 5]);
        assert_eq!(verts.periodic, vec![true, false]);
    }

    #[test]
    fn uniform_mesh_rejects_bad_axes() {
        let m = UniformMesh::new(vec![8, 4]).with_colors(vec![2]);
        assert!(matches!(
            m.color(2),
            Err(MeshError::AxisCountMismatch { what: "axis_colors", expected: 2, actual: 1 })
        ));
        let m = UniformMesh::new(vec![2]).with_halo(3);
        assert!(matches!(m.color(2), Err(MeshError::InvalidColoring(_))));
    }

    #[test]
    fn mesh_kind_from_json() {
        let json = r#"{"kind":"uniform","cells":[16],"halo":2,"boundary":1,"periodic":[false]}"#;
        let kind: MeshKind = serde_json::from_str(json).unwrap();
        assert_eq!(kind.index_spaces(), 2);
        assert_eq!(kind.dimension(), 1);
        let spec = kind.color(4).unwrap();
        assert_eq!(spec.index_spaces[0].axis_colors, vec![4]);
        assert_eq!(spec.index_spaces[0].boundary_depths, vec![1]);
    }
}
