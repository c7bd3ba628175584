//! Thin façade over the process group: point-to-point byte messages between ranks.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All handles are
//! **waitable** but non-blocking; callers `.wait()` before trusting a buffer.
//! Messages between one `(source, destination, tag)` triple are delivered in the
//! order they were sent; nothing is promised across different triples.
//!
//! Backends:
//! - [`NoComm`]: a single process, rank 0 of 1.
//! - [`ThreadComm`]: `N` ranks inside one process, one thread per rank.
//! - `MpiComm` (feature `mpi-support`): the MPI world communicator.
//!
//! There are no timeouts. A rank that waits for a message nobody sends blocks
//! forever.

use crate::algs::wire::WireLen;
use crate::mesh_error::MeshError;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(v: u16) -> Self {
        CommTag(v)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Derive a tag `k` steps away, wrapping at `u16::MAX`.
    #[inline]
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Non-blocking communication interface over an explicit process group.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This process's rank in the group.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of `buf.len()` bytes; the data is returned by `wait`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Fixed-width all-to-all: entry `r` of `counts` goes to rank `r`; entry `r`
    /// of the result came from rank `r`.
    fn all_to_all_counts(&self, tag: CommTag, counts: &[u64]) -> Result<Vec<u64>, MeshError> {
        let me = self.rank();
        let size = self.size();
        if counts.len() != size {
            return Err(MeshError::Invariant(format!(
                "all_to_all_counts needs {size} entries, got {}",
                counts.len()
            )));
        }

        // 1) post all receives
        let mut recvs = Vec::with_capacity(size.saturating_sub(1));
        for peer in (0..size).filter(|&r| r != me) {
            let mut buf = [0u8; WireLen::SIZE];
            recvs.push((peer, self.irecv(peer, tag.as_u16(), &mut buf)));
        }

        // 2) post all sends
        let mut pending = Vec::with_capacity(size.saturating_sub(1));
        for peer in (0..size).filter(|&r| r != me) {
            let w = WireLen::new(counts[peer]);
            pending.push(self.isend(peer, tag.as_u16(), w.as_bytes()));
        }

        // 3) wait for all recvs (but do not early-return)
        let mut out = vec![0u64; size];
        out[me] = counts[me];
        let mut maybe_err = None;
        for (peer, h) in recvs {
            match h.wait() {
                Some(data) => match WireLen::decode(&data) {
                    Ok(w) => out[peer] = w.get(),
                    Err(e) if maybe_err.is_none() => maybe_err = Some(MeshError::comm(peer, e)),
                    Err(_) => {}
                },
                None if maybe_err.is_none() => {
                    maybe_err = Some(MeshError::comm(
                        peer,
                        format!("failed to receive count from rank {peer}"),
                    ));
                }
                None => {}
            }
        }

        // 4) always drain all send handles before returning
        for s in pending {
            let _ = s.wait();
        }

        match maybe_err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Terminate every process in the group.
    fn abort(&self, code: i32) -> ! {
        log::error!("rank {} aborting process group with code {code}", self.rank());
        std::process::abort()
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Single-process communicator: rank 0 of a group of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) -> Self::SendHandle {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {}
}

// --- ThreadComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug, Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
}

/// One rank of an in-process group; ranks run on separate threads and exchange
/// messages through a shared mailbox.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl ThreadComm {
    /// Create the `size` ranks of a new group.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Run `f` on every rank of a fresh `size`-rank group, one scoped thread per
    /// rank, and collect the results in rank order.
    ///
    /// A panic on any rank is propagated once all threads have been joined; ranks
    /// blocked on a message from the panicking rank never return.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        let comms = Self::world(size);
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    s.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(p) => std::panic::resume_unwind(p),
                })
                .collect()
        })
    }
}

/// Pending receive on a [`ThreadComm`].
pub struct ThreadRecv {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
}

impl Wait for ThreadRecv {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.slots.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    let n = self.len.min(bytes.len());
                    return Some(bytes[..n].to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = ThreadRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .slots
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        ThreadRecv {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn abort(&self, code: i32) -> ! {
        log::error!("rank {} aborting process group with code {code}", self.rank);
        panic!("rank {} aborted the process group (code {code})", self.rank)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{CommTag, Wait};
    use crate::mesh_error::MeshError;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{
        Communicator as _, CommunicatorCollectives as _, Destination as _, Source as _,
    };

    /// The MPI world communicator.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Option<Universe>,
    }

    impl MpiComm {
        /// Initialize MPI and wrap the world communicator. `None` if MPI was
        /// already initialized.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            Some(Self {
                rank: world.rank() as usize,
                size: world.size() as usize,
                world,
                _universe: Some(universe),
            })
        }

        /// Wrap a communicator from an MPI environment owned elsewhere.
        pub fn from_communicator(world: SimpleCommunicator) -> Self {
            Self {
                rank: world.rank() as usize,
                size: world.size() as usize,
                world,
                _universe: None,
            }
        }

        pub fn world(&self) -> &SimpleCommunicator {
            &self.world
        }
    }

    /// Pending MPI request over a leaked buffer that is reclaimed on `wait`.
    pub struct MpiHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
        returns_data: bool,
    }

    impl Wait for MpiHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `buf` came from `Box::leak` in `isend`/`irecv` and the only
            // borrow of it ended when the request completed above.
            let owned = unsafe { Box::from_raw(self.buf) };
            self.returns_data.then(|| owned.into_vec())
        }
    }

    impl super::Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the allocation stays alive until `wait` reclaims it.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiHandle {
                req: Some(req),
                buf: ptr,
                returns_data: false,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(vec![0u8; buf.len()].into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the allocation stays alive until `wait` reclaims it.
            let data: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, data, tag as i32);
            MpiHandle {
                req: Some(req),
                buf: ptr,
                returns_data: true,
            }
        }

        fn all_to_all_counts(&self, _tag: CommTag, counts: &[u64]) -> Result<Vec<u64>, MeshError> {
            if counts.len() != self.size {
                return Err(MeshError::Invariant(format!(
                    "all_to_all_counts needs {} entries, got {}",
                    self.size,
                    counts.len()
                )));
            }
            let mut out = vec![0u64; self.size];
            self.world.all_to_all_into(counts, &mut out[..]);
            Ok(out)
        }

        fn abort(&self, code: i32) -> ! {
            log::error!("rank {} aborting process group with code {code}", self.rank);
            self.world.abort(code)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
