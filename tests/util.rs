#![allow(dead_code)]
use mesh_narray::algs::communicator::Communicator;
use mesh_narray::data::field_info::FieldInfo;
use mesh_narray::topology::narray::{Domain, NArray};

/// Value stored at global coordinates `g`.
pub fn value_at(g: &[i64]) -> f64 {
    1.0 + g.iter().rev().fold(0i64, |acc, &c| acc * 1000 + c) as f64
}

fn extents<C: Communicator>(m: &NArray<C>, space: usize) -> Vec<usize> {
    (0..m.dimension())
        .map(|a| m.size(space, a, Domain::All).unwrap())
        .collect()
}

/// Local coordinates of every storage slot, in storage order (axis 0 fastest).
pub fn local_coords<C: Communicator>(m: &NArray<C>, space: usize) -> Vec<Vec<usize>> {
    let ext = extents(m, space);
    let len: usize = ext.iter().product();
    (0..len)
        .map(|mut i| {
            ext.iter()
                .map(|&e| {
                    let c = i % e;
                    i /= e;
                    c
                })
                .collect()
        })
        .collect()
}

fn in_domain<C: Communicator>(m: &NArray<C>, space: usize, axis: usize, i: usize, d: Domain) -> bool {
    m.range(space, axis, d).unwrap().contains(&i)
}

/// Write `value_at` of the global coordinates into every owned slot.
pub fn fill_owned<C: Communicator>(m: &mut NArray<C>, fi: &FieldInfo) {
    let space = fi.index_space;
    let coords = local_coords(m, space);
    let values: Vec<Option<f64>> = coords
        .iter()
        .map(|c| {
            let owned = c
                .iter()
                .enumerate()
                .all(|(a, &i)| in_domain(m, space, a, i, Domain::Logical));
            owned.then(|| {
                let g: Vec<i64> = c
                    .iter()
                    .enumerate()
                    .map(|(a, &i)| m.global_id(space, a, i).unwrap())
                    .collect();
                value_at(&g)
            })
        })
        .collect();
    let data = m.field_mut::<f64>(fi).unwrap();
    for (slot, v) in data.iter_mut().zip(values) {
        if let Some(v) = v {
            *slot = v;
        }
    }
}

/// Check every slot after a ghost copy: owned and ghost slots hold the value of
/// their (wrapped) global coordinates, boundary padding is untouched. Returns
/// the number of ghost slots seen.
pub fn check_ghosts<C: Communicator>(m: &NArray<C>, fi: &FieldInfo, periodic: &[bool]) -> usize {
    let space = fi.index_space;
    let data = m.field::<f64>(fi).unwrap();
    let mut ghosts = 0;
    for (slot, c) in local_coords(m, space).iter().enumerate() {
        let boundary = c.iter().enumerate().any(|(a, &i)| {
            in_domain(m, space, a, i, Domain::BoundaryLow)
                || in_domain(m, space, a, i, Domain::BoundaryHigh)
        });
        let owned = c
            .iter()
            .enumerate()
            .all(|(a, &i)| in_domain(m, space, a, i, Domain::Logical));
        let expected = if boundary {
            0.0
        } else {
            let g: Vec<i64> = c
                .iter()
                .enumerate()
                .map(|(a, &i)| {
                    let g = m.global_id(space, a, i).unwrap();
                    let n = m.size(space, a, Domain::Global).unwrap() as i64;
                    if periodic[a] { g.rem_euclid(n) } else { g }
                })
                .collect();
            value_at(&g)
        };
        if !boundary && !owned {
            ghosts += 1;
        }
        assert_eq!(
            data[slot], expected,
            "color {} space {space} slot {slot} local {c:?}",
            m.color()
        );
    }
    ghosts
}
