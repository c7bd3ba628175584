//! Copy plan: the cached ghost-refresh protocol of one index space.
//!
//! On a structured grid the neighbors of a color are fixed by its position in the
//! color grid, so both sides of every ghost exchange can be derived locally:
//!
//! 1. **Interval discovery.** For each of the `3^d - 1` directions whose nonzero
//!    components all point through ghost faces, the neighbor color is the color
//!    one step away in that direction (wrapping on periodic axes). The ghost slab
//!    is the cross product, per axis, of the low ghosts (`-1`), the high ghosts
//!    (`+1`) or the owned range (`0`).
//! 2. **Materialization.** Each slab is cut into rows along axis 0, the
//!    unit-stride axis. A row becomes a [`GhostRun`]: destination offset in local
//!    storage, length, source color and source offset in the source's storage.
//!    Consecutive rows that are contiguous on both sides are merged.
//!
//! The receive table groups runs by source color. The send table is the same
//! computation done for each neighbor, keeping the runs it expects from this
//! color, so both tables list shared runs in the same order and a single message
//! per neighbor carries them all.
//!
//! [`CopyPlan::new`] checks that the tables agree across the group with one
//! `all_to_allv` of [`IntervalSummary`] records before the plan is used.

use crate::algs::collective::{Outbox, all_to_allv_ranked};
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{IntervalSummary, expect_exact_len};
use crate::data::field_info::FieldInfo;
use crate::data::region::Region;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::coloring::{Coloring, IndexColoring, color_coords, color_id, linear_index};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// First tag of ghost payload messages; index space `s` uses `GHOST_TAG + s`.
pub const GHOST_TAG: CommTag = CommTag::new(0x0C00);

/// One contiguous run of ghost slots and where its values come from.
///
/// Offsets and lengths count elements, not bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GhostRun {
    /// First ghost slot in the receiver's local storage.
    pub dest: usize,
    pub len: usize,
    /// Color that owns the values.
    pub source: usize,
    /// First slot in the source's local storage.
    pub src: usize,
}

impl GhostRun {
    pub fn dest_range(&self) -> Range<usize> {
        self.dest..self.dest + self.len
    }

    pub fn src_range(&self) -> Range<usize> {
        self.src..self.src + self.len
    }
}

#[derive(Clone, Copy, Debug)]
struct Span {
    dest: usize,
    src: usize,
    width: usize,
}

fn neighbor_coords(coloring: &Coloring, space: usize, coords: &[usize], dir: &[i8]) -> Vec<usize> {
    let def = &coloring.spec.index_spaces[space];
    coords
        .iter()
        .zip(dir)
        .zip(&def.axis_colors)
        .map(|((&c, &d), &n)| match d {
            -1 => (c + n - 1) % n,
            1 => (c + 1) % n,
            _ => c,
        })
        .collect()
}

/// Per-axis slab of direction `dir`, or `None` if `dir` leaves through a face
/// without ghosts.
fn slab(me: &IndexColoring, nb: &IndexColoring, dir: &[i8]) -> Option<Vec<Span>> {
    dir.iter()
        .enumerate()
        .map(|(a, &d)| {
            let owned = nb.local_logical(a);
            let span = match d {
                -1 => {
                    let width = me.ghost_low(a);
                    Span { dest: 0, src: owned.end - width, width }
                }
                1 => {
                    let width = me.ghost_high(a);
                    Span { dest: me.extents[a] - width, src: owned.start, width }
                }
                _ => Span {
                    dest: me.local_logical(a).start,
                    src: owned.start,
                    width: me.owned(a),
                },
            };
            (span.width > 0).then_some(span)
        })
        .collect()
}

fn push_run(runs: &mut Vec<GhostRun>, run: GhostRun) {
    if let Some(last) = runs.last_mut() {
        if last.source == run.source
            && last.dest + last.len == run.dest
            && last.src + last.len == run.src
        {
            last.len += run.len;
            return;
        }
    }
    runs.push(run);
}

fn directions(dimension: usize) -> impl Iterator<Item = Vec<i8>> {
    (0..dimension)
        .map(|_| -1i8..=1)
        .multi_cartesian_product()
        .filter(|dir| dir.iter().any(|&d| d != 0))
}

/// The ghost runs `color` receives on index space `space`, in discovery order.
pub fn ghost_intervals(coloring: &Coloring, space: usize, color: usize) -> Vec<GhostRun> {
    let def = &coloring.spec.index_spaces[space];
    let per_color = &coloring.idx_colorings[space];
    let me = &per_color[color];
    let dim = def.dimension();
    let coords = color_coords(&def.axis_colors, color);

    let mut runs = Vec::new();
    for dir in directions(dim) {
        let source = color_id(&def.axis_colors, &neighbor_coords(coloring, space, &coords, &dir));
        let nb = &per_color[source];
        let Some(spans) = slab(me, nb, &dir) else {
            continue;
        };

        // odometer over axes 1.., one row along axis 0 per step
        let mut idx = vec![0usize; dim];
        'rows: loop {
            let dest: Vec<usize> = spans.iter().zip(&idx).map(|(s, i)| s.dest + i).collect();
            let src: Vec<usize> = spans.iter().zip(&idx).map(|(s, i)| s.src + i).collect();
            push_run(
                &mut runs,
                GhostRun {
                    dest: linear_index(&me.extents, &dest),
                    len: spans[0].width,
                    source,
                    src: linear_index(&nb.extents, &src),
                },
            );
            let mut a = 1;
            loop {
                if a == dim {
                    break 'rows;
                }
                idx[a] += 1;
                if idx[a] < spans[a].width {
                    break;
                }
                idx[a] = 0;
                a += 1;
            }
        }
    }
    runs
}

/// Colors one step away from `color` in any direction.
fn neighbors(coloring: &Coloring, space: usize, color: usize) -> BTreeSet<usize> {
    let def = &coloring.spec.index_spaces[space];
    let coords = color_coords(&def.axis_colors, color);
    directions(def.dimension())
        .map(|dir| color_id(&def.axis_colors, &neighbor_coords(coloring, space, &coords, &dir)))
        .collect()
}

fn summary(runs: &[GhostRun]) -> IntervalSummary {
    IntervalSummary {
        runs: runs.len() as u64,
        elements: runs.iter().map(|r| r.len as u64).sum(),
    }
}

/// Ghost-refresh protocol of one index space on one color.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyPlan {
    index_space: usize,
    color: usize,
    len: usize,
    tag: CommTag,
    /// Runs filled by each source color.
    recv: BTreeMap<usize, Vec<GhostRun>>,
    /// Runs each destination color expects from this color.
    send: BTreeMap<usize, Vec<GhostRun>>,
}

impl CopyPlan {
    /// Derive the plan of `color` without consulting the other colors.
    pub fn local(coloring: &Coloring, space: usize, color: usize) -> Result<Self, MeshError> {
        if space >= coloring.index_spaces() {
            return Err(MeshError::IndexSpaceOutOfRange {
                space,
                count: coloring.index_spaces(),
            });
        }
        let mut recv: BTreeMap<usize, Vec<GhostRun>> = BTreeMap::new();
        for run in ghost_intervals(coloring, space, color) {
            recv.entry(run.source).or_default().push(run);
        }
        let mut send = BTreeMap::new();
        for dest in neighbors(coloring, space, color) {
            let runs: Vec<GhostRun> = ghost_intervals(coloring, space, dest)
                .into_iter()
                .filter(|r| r.source == color)
                .collect();
            if !runs.is_empty() {
                send.insert(dest, runs);
            }
        }
        let plan = CopyPlan {
            index_space: space,
            color,
            len: coloring.idx_colorings[space][color].len(),
            tag: GHOST_TAG.offset(space as u16),
            recv,
            send,
        };
        plan.debug_assert_invariants();
        Ok(plan)
    }

    /// Build the plan of this rank's color and verify it against every other
    /// color. Collective.
    ///
    /// # Errors
    /// `AsymmetricIntervals` if a neighbor expects other runs than this color
    /// would send it.
    pub fn new<C: Communicator>(comm: &C, coloring: &Coloring, space: usize) -> Result<Self, MeshError> {
        let plan = Self::local(coloring, space, comm.rank())?;
        plan.verify(comm)?;
        log::debug!(
            "copy plan space={} color={}: {} ghost slots from {} sources, {} destinations",
            space,
            plan.color,
            plan.ghost_len(),
            plan.recv.len(),
            plan.send.len()
        );
        Ok(plan)
    }

    /// Exchange [`IntervalSummary`] records and compare with the send table.
    /// Collective.
    pub fn verify<C: Communicator>(&self, comm: &C) -> Result<(), MeshError> {
        let items = (0..comm.size())
            .map(|src| self.recv.get(&src).map(|runs| summary(runs)))
            .collect();
        let expected = all_to_allv_ranked(comm, &Outbox::new(items)?)?;

        let mut seen = BTreeSet::new();
        for (dest, want) in expected {
            seen.insert(dest);
            let have = self.send.get(&dest).map_or_else(IntervalSummary::default, |r| summary(r));
            if have != want {
                return Err(self.asymmetric(dest, want, have));
            }
        }
        if let Some((&dest, runs)) = self.send.iter().find(|(d, _)| !seen.contains(d)) {
            return Err(self.asymmetric(dest, IntervalSummary::default(), summary(runs)));
        }
        Ok(())
    }

    fn asymmetric(&self, dest: usize, want: IntervalSummary, have: IntervalSummary) -> MeshError {
        log::error!(
            "color {dest} expects {want:?} from color {}, which would send {have:?}",
            self.color
        );
        MeshError::AsymmetricIntervals {
            color: dest,
            peer: self.color,
            expected: want.elements as usize,
            actual: have.elements as usize,
        }
    }

    pub fn index_space(&self) -> usize {
        self.index_space
    }

    pub fn color(&self) -> usize {
        self.color
    }

    /// All runs this color receives, grouped by increasing source color.
    pub fn runs(&self) -> impl Iterator<Item = &GhostRun> + '_ {
        self.recv.values().flatten()
    }

    /// Source colors, increasing.
    pub fn sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.recv.keys().copied()
    }

    /// Runs `dest` receives from this color, in the order they are packed.
    pub fn sends_to(&self, dest: usize) -> &[GhostRun] {
        self.send.get(&dest).map_or(&[][..], Vec::as_slice)
    }

    /// Destination colors, increasing.
    pub fn destinations(&self) -> impl Iterator<Item = usize> + '_ {
        self.send.keys().copied()
    }

    /// Number of ghost slots this plan fills.
    pub fn ghost_len(&self) -> usize {
        self.runs().map(|r| r.len).sum()
    }

    /// Fill the ghost slots of `fi` in `region` from the owning colors.
    /// Collective: every color of the index space calls it for the same field.
    pub fn issue<C: Communicator>(
        &self,
        comm: &C,
        region: &mut Region,
        fi: &FieldInfo,
    ) -> Result<(), MeshError> {
        if region.color() != self.color || region.len() != self.len {
            return Err(MeshError::Invariant(format!(
                "copy plan for color {} ({} slots) applied to a region of color {} ({} slots)",
                self.color,
                self.len,
                region.color(),
                region.len()
            )));
        }
        let ts = fi.type_size;
        let data = region.bytes_mut(fi)?;
        log::trace!(
            "ghost copy space={} fid={} color={}: {} slots",
            self.index_space,
            fi.fid,
            self.color,
            self.ghost_len()
        );

        let mut recvs = Vec::with_capacity(self.recv.len());
        for (&src, runs) in self.recv.iter().filter(|(s, _)| **s != self.color) {
            let n = summary(runs).elements as usize * ts;
            let mut buf = vec![0u8; n];
            recvs.push((src, n, runs, comm.irecv(src, self.tag.as_u16(), &mut buf)));
        }

        let mut pending = Vec::with_capacity(self.send.len());
        for (&dest, runs) in self.send.iter().filter(|(d, _)| **d != self.color) {
            let mut out = Vec::with_capacity(summary(runs).elements as usize * ts);
            for r in runs {
                out.extend_from_slice(&data[r.src * ts..(r.src + r.len) * ts]);
            }
            pending.push(comm.isend(dest, self.tag.as_u16(), &out));
        }

        // periodic wrap onto this color; sources are owned slots, never ghosts
        for r in self.recv.get(&self.color).into_iter().flatten() {
            data.copy_within(r.src * ts..(r.src + r.len) * ts, r.dest * ts);
        }

        let mut maybe_err = None;
        for (src, n, runs, h) in recvs {
            let Some(buf) = h.wait() else {
                maybe_err.get_or_insert(MeshError::comm(src, "ghost payload never arrived"));
                continue;
            };
            if let Err(e) = expect_exact_len(buf.len(), n) {
                maybe_err.get_or_insert(MeshError::comm(src, e));
                continue;
            }
            let mut at = 0;
            for r in runs {
                let bytes = r.len * ts;
                data[r.dest * ts..r.dest * ts + bytes].copy_from_slice(&buf[at..at + bytes]);
                at += bytes;
            }
        }
        for s in pending {
            let _ = s.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl DebugInvariants for CopyPlan {
    fn validate_invariants(&self) -> Result<(), MeshError> {
        let mut dests: Vec<Range<usize>> = self.runs().map(GhostRun::dest_range).collect();
        dests.sort_unstable_by_key(|r| r.start);
        for w in dests.windows(2) {
            if w[0].end > w[1].start {
                return Err(MeshError::Invariant(format!(
                    "ghost runs {:?} and {:?} overlap",
                    w[0], w[1]
                )));
            }
        }
        if let Some(r) = dests.last().filter(|r| r.end > self.len) {
            return Err(MeshError::Invariant(format!(
                "ghost run {r:?} exceeds local storage of {} slots",
                self.len
            )));
        }
        Ok(())
    }
}
