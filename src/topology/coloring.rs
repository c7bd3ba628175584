//! Structured-mesh coloring.
//!
//! A [`ColoringDefinition`] describes one index space of an n-dimensional regular
//! grid: per axis, the number of colors, the global extent, the halo depth (ghost
//! width at faces shared with another color), the boundary depth (padding at the
//! global domain edge) and periodicity. Every axis is split independently; a
//! color's id is the linearization of its per-axis positions, axis 0 fastest.
//!
//! Per axis, extent `E` over `C` colors gives each color `E / C` indices and the
//! first `E % C` colors one more. For a color at position `c` with block `[o, o+b)`:
//!
//! ```text
//!        ghost_low  boundary_low     logical      boundary_high  ghost_high
//!      |-----------|-----------|-----------------|-----------|------------|
//!      0                       o - g0        ...                    extents
//! ```
//!
//! Only one of `ghost_low`/`boundary_low` is nonzero: a face touching the global
//! edge (and not periodic) gets `boundary_depth` padding, any other face gets
//! `halo_depth` ghosts.
//!
//! `logical` and `extended` bounds are reported in global index coordinates and
//! are signed, since boundary padding at a low edge lies below index 0.

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Face bit: the color touches the low global edge of an axis.
pub const LOW: u32 = 0b01;
/// Face bit: the color touches the high global edge of an axis.
pub const HIGH: u32 = 0b10;
/// Bits per axis in a face mask.
pub const FACE_BITS: usize = 2;
/// Largest dimensionality a `u32` face mask can describe.
pub const MAX_DIMENSION: usize = u32::BITS as usize / FACE_BITS;

/// Coloring input for one axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisDefinition {
    pub colors: usize,
    pub extent: usize,
    pub halo: usize,
    pub boundary: usize,
    pub periodic: bool,
}

/// Coloring input for one index space, one entry per axis in every array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoringDefinition {
    pub axis_colors: Vec<usize>,
    pub axis_extents: Vec<usize>,
    pub halo_depths: Vec<usize>,
    pub boundary_depths: Vec<usize>,
    pub periodic: Vec<bool>,
}

impl ColoringDefinition {
    /// Build from per-axis definitions.
    pub fn from_axes(axes: &[AxisDefinition]) -> Self {
        ColoringDefinition {
            axis_colors: axes.iter().map(|a| a.colors).collect(),
            axis_extents: axes.iter().map(|a| a.extent).collect(),
            halo_depths: axes.iter().map(|a| a.halo).collect(),
            boundary_depths: axes.iter().map(|a| a.boundary).collect(),
            periodic: axes.iter().map(|a| a.periodic).collect(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.axis_colors.len()
    }

    /// Total number of colors.
    pub fn colors(&self) -> usize {
        self.axis_colors.iter().product()
    }

    /// The definition of axis `a`. The definition must have been validated.
    pub fn axis(&self, a: usize) -> AxisDefinition {
        AxisDefinition {
            colors: self.axis_colors[a],
            extent: self.axis_extents[a],
            halo: self.halo_depths[a],
            boundary: self.boundary_depths[a],
            periodic: self.periodic[a],
        }
    }

    /// Check array lengths and that every axis can be realized.
    pub fn validate(&self) -> Result<(), MeshError> {
        let dim = self.dimension();
        let lens = [
            ("axis_extents", self.axis_extents.len()),
            ("halo_depths", self.halo_depths.len()),
            ("boundary_depths", self.boundary_depths.len()),
            ("periodic", self.periodic.len()),
        ];
        for (what, actual) in lens {
            if actual != dim {
                return Err(MeshError::AxisCountMismatch {
                    what,
                    expected: dim,
                    actual,
                });
            }
        }
        if dim == 0 || dim > MAX_DIMENSION {
            return Err(MeshError::InvalidColoring(format!(
                "dimension {dim} outside 1..={MAX_DIMENSION}"
            )));
        }
        for a in 0..dim {
            let ax = self.axis(a);
            if ax.colors == 0 {
                return Err(MeshError::InvalidColoring(format!("axis {a} has zero colors")));
            }
            if ax.extent < ax.colors {
                return Err(MeshError::InvalidColoring(format!(
                    "axis {a}: {} indices cannot be split over {} colors",
                    ax.extent, ax.colors
                )));
            }
            // the smallest block on an axis is extent / colors
            let has_ghosts = ax.colors > 1 || ax.periodic;
            if has_ghosts && ax.halo > ax.extent / ax.colors {
                return Err(MeshError::InvalidColoring(format!(
                    "axis {a}: halo depth {} exceeds the smallest block ({})",
                    ax.halo,
                    ax.extent / ax.colors
                )));
            }
        }
        Ok(())
    }
}

/// Coloring input for every index space of a topology.
///
/// All index spaces share one color grid (`axis_colors`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoringSpec {
    pub index_spaces: Vec<ColoringDefinition>,
}

impl ColoringSpec {
    pub fn new(index_spaces: Vec<ColoringDefinition>) -> Self {
        ColoringSpec { index_spaces }
    }

    /// Validate every index space and check they share one color grid.
    pub fn validate(&self) -> Result<(), MeshError> {
        let first = self
            .index_spaces
            .first()
            .ok_or_else(|| MeshError::InvalidColoring("no index spaces".into()))?;
        for (s, def) in self.index_spaces.iter().enumerate() {
            def.validate()?;
            if def.dimension() != first.dimension() {
                return Err(MeshError::AxisCountMismatch {
                    what: "index space axes",
                    expected: first.dimension(),
                    actual: def.dimension(),
                });
            }
            if def.axis_colors != first.axis_colors {
                return Err(MeshError::InvalidColoring(format!(
                    "index space {s} uses color grid {:?}, index space 0 uses {:?}",
                    def.axis_colors, first.axis_colors
                )));
            }
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.index_spaces.first().map_or(0, ColoringDefinition::dimension)
    }

    pub fn axis_colors(&self) -> &[usize] {
        self.index_spaces
            .first()
            .map_or(&[][..], |d| d.axis_colors.as_slice())
    }

    pub fn colors(&self) -> usize {
        self.index_spaces.first().map_or(0, ColoringDefinition::colors)
    }
}

/// Block size and offset of color `c` when `extent` indices are split over `colors`.
#[inline]
pub fn block(extent: usize, colors: usize, c: usize) -> (usize, usize) {
    let base = extent / colors;
    let rem = extent % colors;
    let size = base + usize::from(c < rem);
    let offset = c * base + c.min(rem);
    (offset, size)
}

/// Block sizes of all colors on one axis.
pub fn distribute(extent: usize, colors: usize) -> Vec<usize> {
    (0..colors).map(|c| block(extent, colors, c).1).collect()
}

/// Per-axis positions of `color`, axis 0 fastest.
pub fn color_coords(axis_colors: &[usize], mut color: usize) -> Vec<usize> {
    axis_colors
        .iter()
        .map(|&n| {
            let c = color % n;
            color /= n;
            c
        })
        .collect()
}

/// Color id of per-axis positions `coords`, axis 0 fastest.
pub fn color_id(axis_colors: &[usize], coords: &[usize]) -> usize {
    axis_colors
        .iter()
        .zip(coords)
        .rev()
        .fold(0, |acc, (&n, &c)| acc * n + c)
}

/// Low and high corners of an axis-aligned box.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypercube {
    pub low: Vec<i64>,
    pub high: Vec<i64>,
}

/// The coloring of one index space for one color.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColoring {
    /// Global extent per axis.
    pub global: Vec<usize>,
    /// Offset of the owned block into the global index space.
    pub offset: Vec<usize>,
    /// Full local extent: owned + boundary padding + ghosts.
    pub extents: Vec<usize>,
    /// Owned region, `[low, high)` in global coordinates.
    pub logical: Hypercube,
    /// Owned region plus boundary padding, in global coordinates.
    pub extended: Hypercube,
    /// [`LOW`]/[`HIGH`] bits, [`FACE_BITS`] per axis.
    pub faces: u32,
}

impl IndexColoring {
    /// Derive the coloring of `color` from `def` (validated).
    pub fn new(def: &ColoringDefinition, color: usize) -> Self {
        let dim = def.dimension();
        let coords = color_coords(&def.axis_colors, color);
        let mut out = IndexColoring {
            global: Vec::with_capacity(dim),
            offset: Vec::with_capacity(dim),
            extents: Vec::with_capacity(dim),
            logical: Hypercube {
                low: Vec::with_capacity(dim),
                high: Vec::with_capacity(dim),
            },
            extended: Hypercube {
                low: Vec::with_capacity(dim),
                high: Vec::with_capacity(dim),
            },
            faces: 0,
        };
        for (a, &c) in coords.iter().enumerate() {
            let ax = def.axis(a);
            let (offset, size) = block(ax.extent, ax.colors, c);
            let low = !ax.periodic && offset == 0;
            let high = !ax.periodic && offset + size == ax.extent;
            let (bl, bh) = (
                if low { ax.boundary } else { 0 },
                if high { ax.boundary } else { 0 },
            );
            let (gl, gh) = (
                if low { 0 } else { ax.halo },
                if high { 0 } else { ax.halo },
            );

            out.global.push(ax.extent);
            out.offset.push(offset);
            out.extents.push(gl + bl + size + bh + gh);
            out.logical.low.push(offset as i64);
            out.logical.high.push((offset + size) as i64);
            out.extended.low.push(offset as i64 - bl as i64);
            out.extended.high.push((offset + size + bh) as i64);
            out.faces |= (u32::from(low) * LOW | u32::from(high) * HIGH) << (a * FACE_BITS);
        }
        out
    }

    pub fn dimension(&self) -> usize {
        self.global.len()
    }

    /// Whether the color touches the low global edge of `axis`.
    #[inline]
    pub fn is_low(&self, axis: usize) -> bool {
        (self.faces >> (axis * FACE_BITS)) & LOW != 0
    }

    /// Whether the color touches the high global edge of `axis`.
    #[inline]
    pub fn is_high(&self, axis: usize) -> bool {
        (self.faces >> (axis * FACE_BITS)) & HIGH != 0
    }

    #[inline]
    pub fn is_interior(&self, axis: usize) -> bool {
        !self.is_low(axis) && !self.is_high(axis)
    }

    /// Number of owned indices on `axis`.
    pub fn owned(&self, axis: usize) -> usize {
        (self.logical.high[axis] - self.logical.low[axis]) as usize
    }

    pub fn boundary_low(&self, axis: usize) -> usize {
        (self.logical.low[axis] - self.extended.low[axis]) as usize
    }

    pub fn boundary_high(&self, axis: usize) -> usize {
        (self.extended.high[axis] - self.logical.high[axis]) as usize
    }

    /// Ghost widths below and above the extended region.
    pub fn ghosts(&self, axis: usize) -> (usize, usize) {
        let pad = self.extents[axis] - self.extended_len(axis);
        match (self.is_low(axis), self.is_high(axis)) {
            (true, true) => (0, 0),
            (true, false) => (0, pad),
            (false, true) => (pad, 0),
            // both faces interior: same halo on either side
            (false, false) => (pad / 2, pad / 2),
        }
    }

    pub fn ghost_low(&self, axis: usize) -> usize {
        self.ghosts(axis).0
    }

    pub fn ghost_high(&self, axis: usize) -> usize {
        self.ghosts(axis).1
    }

    fn extended_len(&self, axis: usize) -> usize {
        (self.extended.high[axis] - self.extended.low[axis]) as usize
    }

    /// Owned region in the local storage frame.
    pub fn local_logical(&self, axis: usize) -> Range<usize> {
        let start = self.ghost_low(axis) + self.boundary_low(axis);
        start..start + self.owned(axis)
    }

    /// Owned region plus boundary padding in the local storage frame.
    pub fn local_extended(&self, axis: usize) -> Range<usize> {
        let start = self.ghost_low(axis);
        start..start + self.extended_len(axis)
    }

    /// Number of local storage slots.
    pub fn len(&self) -> usize {
        self.extents.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear storage index of local coordinates, axis 0 fastest.
    pub fn linear(&self, local: &[usize]) -> usize {
        linear_index(&self.extents, local)
    }
}

/// Linear index of `coords` in a box of `extents`, axis 0 fastest.
pub fn linear_index(extents: &[usize], coords: &[usize]) -> usize {
    extents
        .iter()
        .zip(coords)
        .rev()
        .fold(0, |acc, (&e, &c)| acc * e + c)
}

/// The metadata of one color across all index spaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorMeta {
    pub color: usize,
    pub spaces: Vec<IndexColoring>,
}

impl ColorMeta {
    /// Derive the metadata of `color` from a validated spec.
    pub fn new(spec: &ColoringSpec, color: usize) -> Self {
        ColorMeta {
            color,
            spaces: spec
                .index_spaces
                .iter()
                .map(|def| IndexColoring::new(def, color))
                .collect(),
        }
    }
}

/// The coloring of every color and index space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coloring {
    pub spec: ColoringSpec,
    pub colors: usize,
    /// `idx_colorings[space][color]`.
    pub idx_colorings: Vec<Vec<IndexColoring>>,
}

impl Coloring {
    /// Validate `spec` and color every index space.
    pub fn new(spec: ColoringSpec) -> Result<Self, MeshError> {
        spec.validate()?;
        let colors = spec.colors();
        let idx_colorings = spec
            .index_spaces
            .iter()
            .map(|def| (0..colors).map(|c| IndexColoring::new(def, c)).collect())
            .collect();
        let coloring = Coloring {
            spec,
            colors,
            idx_colorings,
        };
        coloring.debug_assert_invariants();
        log::debug!(
            "colored {} index spaces over {} colors (grid {:?})",
            coloring.index_spaces(),
            colors,
            coloring.spec.axis_colors()
        );
        Ok(coloring)
    }

    pub fn index_spaces(&self) -> usize {
        self.idx_colorings.len()
    }

    pub fn dimension(&self) -> usize {
        self.spec.dimension()
    }

    /// Metadata of one color.
    pub fn color_meta(&self, color: usize) -> ColorMeta {
        ColorMeta {
            color,
            spaces: self
                .idx_colorings
                .iter()
                .map(|per_color| per_color[color].clone())
                .collect(),
        }
    }

    pub fn color_coords(&self, color: usize) -> Vec<usize> {
        color_coords(self.spec.axis_colors(), color)
    }
}

impl DebugInvariants for Coloring {
    fn validate_invariants(&self) -> Result<(), MeshError> {
        for (s, def) in self.spec.index_spaces.iter().enumerate() {
            let per_color = &self.idx_colorings[s];
            if per_color.len() != self.colors {
                return Err(MeshError::Invariant(format!(
                    "index space {s} has {} colorings for {} colors",
                    per_color.len(),
                    self.colors
                )));
            }
            for a in 0..def.dimension() {
                // walk the colors along axis a with all other positions at 0
                let mut next = 0i64;
                for c in 0..def.axis_colors[a] {
                    let mut coords = vec![0; def.dimension()];
                    coords[a] = c;
                    let ic = &per_color[color_id(&def.axis_colors, &coords)];
                    if ic.logical.low[a] != next {
                        return Err(MeshError::Invariant(format!(
                            "space {s} axis {a}: color position {c} starts at {} instead of {next}",
                            ic.logical.low[a]
                        )));
                    }
                    next = ic.logical.high[a];
                }
                if next != def.axis_extents[a] as i64 {
                    return Err(MeshError::Invariant(format!(
                        "space {s} axis {a}: logical blocks end at {next}, extent is {}",
                        def.axis_extents[a]
                    )));
                }
            }
            for ic in per_color {
                for a in 0..ic.dimension() {
                    let halo = def.halo_depths[a];
                    let expected = (
                        if ic.is_low(a) { 0 } else { halo },
                        if ic.is_high(a) { 0 } else { halo },
                    );
                    if ic.ghosts(a) != expected {
                        return Err(MeshError::Invariant(format!(
                            "space {s} axis {a}: ghost widths {:?}, halo depth is {halo}",
                            ic.ghosts(a)
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
