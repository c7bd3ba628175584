use mesh_narray::algs::communicator::NoComm;
use mesh_narray::mesh_error::MeshError;
use mesh_narray::topology::coloring::{
    AxisDefinition, Coloring, ColoringDefinition, ColoringSpec, HIGH, LOW,
};
use mesh_narray::topology::mesh::{MeshKind, UniformMesh};
use mesh_narray::topology::narray::{Domain, NArray, Specialization};
use mesh_narray::topology::partition::make_partitions;

fn one_axis(colors: usize, extent: usize, halo: usize) -> ColoringSpec {
    ColoringSpec::new(vec![ColoringDefinition::from_axes(&[AxisDefinition {
        colors,
        extent,
        halo,
        boundary: 0,
        periodic: false,
    }])])
}

#[test]
fn scenario_single_color() {
    let c = Coloring::new(one_axis(1, 10, 1)).unwrap();
    let ic = &c.idx_colorings[0][0];
    assert_eq!((ic.logical.low[0], ic.logical.high[0]), (0, 10));
    assert_eq!(ic.extended, ic.logical);
    assert_eq!(ic.faces, LOW | HIGH);
    assert_eq!(ic.extents, vec![10]);
}

#[test]
fn scenario_two_colors() {
    let c = Coloring::new(one_axis(2, 10, 1)).unwrap();
    let c0 = &c.idx_colorings[0][0];
    assert_eq!(c0.offset, vec![0]);
    assert_eq!((c0.logical.low[0], c0.logical.high[0]), (0, 5));
    assert_eq!(c0.faces, LOW);
    assert_eq!(c0.extents, vec![6]);
    let c1 = &c.idx_colorings[0][1];
    assert_eq!(c1.offset, vec![5]);
    assert_eq!((c1.logical.low[0], c1.logical.high[0]), (5, 10));
    assert_eq!(c1.faces, HIGH);
    assert_eq!(c1.extents, vec![6]);

    let parts = make_partitions(&c, 1).unwrap();
    assert_eq!(parts[0].size(0), 6);
    assert_eq!(parts[0].size(1), 6);
}

#[test]
fn remainder_goes_to_lower_colors() {
    let c = Coloring::new(one_axis(4, 10, 1)).unwrap();
    let blocks: Vec<(i64, i64)> = c.idx_colorings[0]
        .iter()
        .map(|ic| (ic.logical.low[0], ic.logical.high[0]))
        .collect();
    assert_eq!(blocks, vec![(0, 3), (3, 6), (6, 8), (8, 10)]);
}

#[test]
fn declared_space_count_must_match() {
    let c = Coloring::new(one_axis(1, 4, 0)).unwrap();
    assert!(matches!(
        NArray::from_coloring(NoComm, &c, 2),
        Err(MeshError::IndexSpaceMismatch { expected: 2, actual: 1 })
    ));
}

#[test]
fn axis_arrays_must_match_dimension() {
    let mut def = ColoringDefinition::from_axes(&[AxisDefinition {
        colors: 1,
        extent: 4,
        halo: 0,
        boundary: 0,
        periodic: false,
    }]);
    def.periodic = vec![false, true];
    let err = Coloring::new(ColoringSpec::new(vec![def])).unwrap_err();
    assert!(matches!(err, MeshError::AxisCountMismatch { what: "periodic", expected: 1, actual: 2 }));
    assert!(err.is_construction_error());
}

#[test]
fn range_queries_on_a_boundary_padded_mesh() {
    let mesh = UniformMesh::new(vec![6]).with_halo(2).with_boundary(1);
    let m = NArray::new(NoComm, &mesh).unwrap();
    let s = UniformMesh::CELLS;
    assert!(m.is_low(s, 0).unwrap() && m.is_high(s, 0).unwrap());
    assert!(!m.is_interior(s, 0).unwrap());
    assert_eq!(m.range(s, 0, Domain::All).unwrap(), 0..8);
    assert_eq!(m.range(s, 0, Domain::BoundaryLow).unwrap(), 0..1);
    assert_eq!(m.range(s, 0, Domain::Logical).unwrap(), 1..7);
    assert_eq!(m.range(s, 0, Domain::Extended).unwrap(), 0..8);
    assert_eq!(m.range(s, 0, Domain::BoundaryHigh).unwrap(), 7..8);
    assert_eq!(m.range(s, 0, Domain::GhostLow).unwrap(), 0..0);
    assert_eq!(m.range(s, 0, Domain::Global).unwrap(), 0..6);
    assert_eq!(m.offset(s, 0, Domain::Global).unwrap(), 0);
    assert_eq!(m.size(s, 0, Domain::Global).unwrap(), 6);
    assert_eq!(m.global_id(s, 0, 7).unwrap(), 6);
}

#[test]
fn coloring_spec_json_round_trip() {
    let spec = UniformMesh::new(vec![12, 5])
        .with_periodic(vec![false, true])
        .with_colors(vec![3, 1])
        .color(3)
        .unwrap();
    let json = serde_json::to_string(&spec).unwrap();
    let back: ColoringSpec = serde_json::from_str(&json).unwrap();
    assert_eq!(back, spec);
    assert_eq!(Coloring::new(back).unwrap(), Coloring::new(spec).unwrap());
}

#[test]
fn mesh_kind_selects_the_specialization() {
    let kinds: Vec<MeshKind> = serde_json::from_str(
        r#"[
            {"kind": "uniform", "cells": [4], "halo": 1, "boundary": 0, "periodic": [false]},
            {"kind": "explicit", "spec": {"index_spaces": [{
                "axis_colors": [1], "axis_extents": [7], "halo_depths": [0],
                "boundary_depths": [2], "periodic": [false]}]}}
        ]"#,
    )
    .unwrap();
    assert_eq!(kinds[0].index_spaces(), 2);
    assert_eq!(kinds[1].index_spaces(), 1);
    let m = NArray::new(NoComm, &kinds[1]).unwrap();
    assert_eq!(m.size(0, 0, Domain::All).unwrap(), 11);
}
