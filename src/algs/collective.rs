//! Variable-size collectives over a [`Communicator`].
//!
//! - [`one_to_allv`]: rank 0 computes one value per rank and sends each rank its
//!   own, as a length prefix followed by the serialized payload.
//! - [`all_to_allv`]: every rank sends a (possibly empty) value to every rank.
//!   Byte counts are exchanged first with a fixed-width all-to-all, so payloads
//!   are only posted where a nonzero count was announced. Each payload travels
//!   behind a status byte.
//!
//! A rank that fails to pack a value still sends a message of the announced
//! shape, so every receiver returns an error instead of waiting forever.
//!
//! Both are collective: every rank of the group must call them in the same
//! relative order, or the group blocks. Payloads are serialized with `bincode`.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireLen, expect_exact_len, failed_frame, frame, open_frame};
use crate::mesh_error::MeshError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Tag of the length prefix and payload messages of [`one_to_allv`].
pub const ONE_TO_ALLV_TAG: CommTag = CommTag::new(0x0A11);
/// Tag of the count exchange of [`all_to_allv`]; the payloads use the next tag.
pub const ALL_TO_ALLV_TAG: CommTag = CommTag::new(0x0A20);

/// Serialize `value` into an opaque byte buffer.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, MeshError> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a buffer produced by [`pack`].
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MeshError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Exact length of `pack(value)`.
pub fn packed_len<T: Serialize + ?Sized>(value: &T) -> Result<usize, MeshError> {
    Ok(bincode::serialized_size(value)? as usize)
}

/// One-to-all (variable): every rank receives `f(rank, size)` as evaluated on rank 0.
///
/// Rank 0 returns `f(0, size)` directly, without serializing it, once all of
/// its sends have completed. Every other rank blocks until its value arrives.
pub fn one_to_allv<C, T, F>(comm: &C, f: F) -> Result<T, MeshError>
where
    C: Communicator,
    T: Serialize + DeserializeOwned,
    F: Fn(usize, usize) -> T,
{
    one_to_allv_with_tag(comm, ONE_TO_ALLV_TAG, f)
}

/// [`one_to_allv`] on an explicit tag.
pub fn one_to_allv_with_tag<C, T, F>(comm: &C, tag: CommTag, f: F) -> Result<T, MeshError>
where
    C: Communicator,
    T: Serialize + DeserializeOwned,
    F: Fn(usize, usize) -> T,
{
    let rank = comm.rank();
    let size = comm.size();

    if rank == 0 {
        let mut pending = Vec::with_capacity(2 * size.saturating_sub(1));
        let mut maybe_err = None;
        for r in 1..size {
            match pack(&f(r, size)) {
                Ok(data) => {
                    let len = WireLen::new(data.len() as u64);
                    pending.push(comm.isend(r, tag.as_u16(), len.as_bytes()));
                    pending.push(comm.isend(r, tag.as_u16(), &data));
                }
                Err(e) => {
                    log::error!("one_to_allv: cannot pack the value for rank {r}: {e}");
                    let failed = WireLen::new(WireLen::FAILED);
                    pending.push(comm.isend(r, tag.as_u16(), failed.as_bytes()));
                    maybe_err.get_or_insert(e);
                }
            }
        }
        for s in pending {
            let _ = s.wait();
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }
        return Ok(f(0, size));
    }

    let mut hdr = [0u8; WireLen::SIZE];
    let raw = comm
        .irecv(0, tag.as_u16(), &mut hdr)
        .wait()
        .ok_or_else(|| MeshError::comm(0, "missing length prefix"))?;
    let len = WireLen::decode(&raw).map_err(|e| MeshError::comm(0, e))?.get();
    if len == WireLen::FAILED {
        return Err(MeshError::comm(0, format!("root failed to pack the value for rank {rank}")));
    }
    let len = len as usize;

    let mut payload = vec![0u8; len];
    let raw = comm
        .irecv(0, tag.as_u16(), &mut payload)
        .wait()
        .ok_or_else(|| MeshError::comm(0, format!("missing {len}-byte payload")))?;
    expect_exact_len(raw.len(), len).map_err(|e| MeshError::comm(0, e))?;
    unpack(&raw)
}

/// Packing functor for [`all_to_allv`].
pub trait AllToAllv {
    type Item: Serialize + DeserializeOwned;

    /// Exact packed byte length of the value destined for `dest`; `0` sends nothing.
    fn count(&self, dest: usize) -> usize;

    /// The value destined for `dest`. Only called where `count(dest) > 0`.
    fn pack(&self, dest: usize, size: usize) -> Self::Item;
}

/// A ready-made [`AllToAllv`] functor over one optional value per destination.
#[derive(Clone, Debug)]
pub struct Outbox<T> {
    items: Vec<Option<T>>,
    lens: Vec<usize>,
}

impl<T: Serialize + DeserializeOwned + Clone> Outbox<T> {
    /// `items[r]` goes to rank `r`; `None` sends nothing.
    pub fn new(items: Vec<Option<T>>) -> Result<Self, MeshError> {
        let lens = items
            .iter()
            .map(|it| it.as_ref().map_or(Ok(0), packed_len))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { items, lens })
    }
}

impl<T: Serialize + DeserializeOwned + Clone> AllToAllv for Outbox<T> {
    type Item = T;

    fn count(&self, dest: usize) -> usize {
        self.lens.get(dest).copied().unwrap_or(0)
    }

    fn pack(&self, dest: usize, _size: usize) -> T {
        match self.items.get(dest) {
            Some(Some(v)) => v.clone(),
            _ => unreachable!("pack called for rank {dest} with a zero count"),
        }
    }
}

/// All-to-all (variable): the values sent to this rank, ordered by increasing
/// source rank. Sources that announced zero bytes are omitted.
pub fn all_to_allv<C, F>(comm: &C, f: &F) -> Result<Vec<F::Item>, MeshError>
where
    C: Communicator,
    F: AllToAllv,
{
    Ok(all_to_allv_ranked(comm, f)?
        .into_iter()
        .map(|(_, item)| item)
        .collect())
}

/// [`all_to_allv`], keeping the source rank of every value.
pub fn all_to_allv_ranked<C, F>(comm: &C, f: &F) -> Result<Vec<(usize, F::Item)>, MeshError>
where
    C: Communicator,
    F: AllToAllv,
{
    all_to_allv_with_tag(comm, ALL_TO_ALLV_TAG, f)
}

/// [`all_to_allv_ranked`] on an explicit tag pair (`tag` for counts, `tag + 1`
/// for payloads).
pub fn all_to_allv_with_tag<C, F>(
    comm: &C,
    tag: CommTag,
    f: &F,
) -> Result<Vec<(usize, F::Item)>, MeshError>
where
    C: Communicator,
    F: AllToAllv,
{
    let rank = comm.rank();
    let size = comm.size();
    let data_tag = tag.offset(1);

    // 1) fixed-width count exchange
    let counts: Vec<u64> = (0..size).map(|r| f.count(r) as u64).collect();
    let bytes = comm.all_to_all_counts(tag, &counts)?;

    // 2) post receives for every nonzero incoming count, one status byte ahead
    let mut recvs = Vec::new();
    for (src, &n) in bytes.iter().enumerate() {
        if src != rank && n > 0 {
            let mut buf = vec![0u8; n as usize + 1];
            recvs.push((src, n as usize, comm.irecv(src, data_tag.as_u16(), &mut buf)));
        }
    }

    // 3) pack lazily and post a frame of the announced size for every nonzero
    //    outgoing count, even when packing fails
    let mut pending = Vec::new();
    let mut local = None;
    let mut maybe_err = None;
    for (dest, &n) in counts.iter().enumerate() {
        if n == 0 {
            continue;
        }
        let n = n as usize;
        let packed = pack(&f.pack(dest, size)).and_then(|data| {
            expect_exact_len(data.len(), n)
                .map(|()| data)
                .map_err(|e| MeshError::comm(dest, format!("announced count mismatch: {e}")))
        });
        let framed = match packed {
            Ok(data) => frame(&data),
            Err(e) => {
                log::error!("all_to_allv: rank {rank} cannot pack the value for rank {dest}: {e}");
                maybe_err.get_or_insert(e);
                failed_frame(n)
            }
        };
        if dest == rank {
            local = Some(framed);
        } else {
            pending.push(comm.isend(dest, data_tag.as_u16(), &framed));
        }
    }

    // 4) wait for everything before reporting errors
    let mut received = Vec::with_capacity(recvs.len() + 1);
    for (src, n, h) in recvs {
        match h.wait() {
            Some(data) => match open_frame(&data, n) {
                Ok(payload) => received.push((src, payload.to_vec())),
                Err(e) => {
                    maybe_err.get_or_insert(MeshError::comm(src, e));
                }
            },
            None => {
                maybe_err.get_or_insert(MeshError::comm(
                    src,
                    format!("failed to receive {n} bytes from rank {src}"),
                ));
            }
        }
    }
    for s in pending {
        let _ = s.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }

    if let Some(framed) = local {
        received.push((rank, framed[1..].to_vec()));
    }
    received.sort_unstable_by_key(|(src, _)| *src);
    received
        .into_iter()
        .map(|(src, data)| Ok((src, unpack(&data)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    #[test]
    fn pack_len_matches() {
        let v = (3u32, vec![1u64, 2, 3], String::from("abc"));
        assert_eq!(packed_len(&v).unwrap(), pack(&v).unwrap().len());
        let back: (u32, Vec<u64>, String) = unpack(&pack(&v).unwrap()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn serial_one_to_allv_is_local() {
        let got = one_to_allv(&NoComm, |r, s| (r, s)).unwrap();
        assert_eq!(got, (0, 1));
    }

    #[test]
    fn serial_all_to_allv_self_only() {
        let out = Outbox::new(vec![Some(vec![7u8, 8])]).unwrap();
        assert_eq!(all_to_allv(&NoComm, &out).unwrap(), vec![vec![7u8, 8]]);
        let empty = Outbox::<u32>::new(vec![None]).unwrap();
        assert!(all_to_allv(&NoComm, &empty).unwrap().is_empty());
    }

    #[test]
    fn one_to_allv_four_ranks() {
        let got = ThreadComm::run(4, |comm| {
            one_to_allv(&comm, |r, s| vec![r as u64; r + s]).unwrap()
        });
        for (r, v) in got.iter().enumerate() {
            assert_eq!(v, &vec![r as u64; r + 4]);
        }
    }

    struct Sparse;

    impl AllToAllv for Sparse {
        type Item = (usize, String);
        fn count(&self, dest: usize) -> usize {
            // rank 1 receives nothing
            if dest == 1 {
                0
            } else {
                packed_len(&(0usize, format!("to {dest}"))).unwrap()
            }
        }
        fn pack(&self, dest: usize, _size: usize) -> Self::Item {
            (0, format!("to {dest}"))
        }
    }

    #[test]
    fn all_to_allv_omits_empty_sources() {
        let got = ThreadComm::run(3, |comm| all_to_allv_ranked(&comm, &Sparse).unwrap());
        assert!(got[1].is_empty());
        for dest in [0, 2] {
            let srcs: Vec<usize> = got[dest].iter().map(|(s, _)| *s).collect();
            assert_eq!(srcs, vec![0, 1, 2]);
            for (_, (_, msg)) in &got[dest] {
                assert_eq!(msg, &format!("to {dest}"));
            }
        }
    }

    /// Announces eight bytes for every rank but cannot be serialized.
    #[derive(serde::Deserialize)]
    struct Unpackable;

    impl Serialize for Unpackable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("unpackable"))
        }
    }

    struct FailsOnRoot {
        rank: usize,
    }

    impl AllToAllv for FailsOnRoot {
        type Item = Result<u64, Unpackable>;
        fn count(&self, _dest: usize) -> usize {
            packed_len(&Ok::<u64, Unpackable>(0)).unwrap()
        }
        fn pack(&self, _dest: usize, _size: usize) -> Self::Item {
            if self.rank == 0 { Err(Unpackable) } else { Ok(self.rank as u64) }
        }
    }

    #[test]
    fn all_to_allv_pack_failure_reaches_every_rank() {
        let got = ThreadComm::run(3, |comm| {
            all_to_allv_ranked(&comm, &FailsOnRoot { rank: comm.rank() })
        });
        assert!(matches!(got[0], Err(MeshError::Serialization(_))));
        for r in 1..3 {
            assert!(
                matches!(got[r], Err(MeshError::CommError { neighbor: 0, .. })),
                "rank {r}: {:?}",
                got[r].as_ref().err()
            );
        }
    }

    #[test]
    fn one_to_allv_pack_failure_reaches_every_rank() {
        let got = ThreadComm::run(3, |comm| {
            one_to_allv(&comm, |r, _| if r == 2 { Err(Unpackable) } else { Ok(r as u64) })
                .map(|v: Result<u64, Unpackable>| v.is_ok())
        });
        assert!(matches!(got[0], Err(MeshError::Serialization(_))));
        assert!(matches!(got[1], Ok(true)));
        assert!(matches!(got[2], Err(MeshError::CommError { neighbor: 0, .. })));
    }
}
