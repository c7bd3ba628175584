//! Fixed-width, little-endian wire records for the collective paths.
//!
//! Variable payloads are opaque byte buffers produced by the serializer (see
//! [`collective::pack`](crate::algs::collective::pack)); the only fixed-width
//! records on the wire are the length prefixes and the byte counts pre-exchanged
//! by `all_to_allv`, plus the per-peer summary exchanged when a copy plan is
//! verified. A sender that fails to pack still sends what it announced (a
//! [`WireLen::FAILED`] prefix or a failed frame) so that no receiver blocks.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// A message length or byte count, `u64` little-endian on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}

impl WireLen {
    pub const SIZE: usize = size_of::<WireLen>();
    /// Sent in place of a length prefix when the sender could not pack the payload.
    pub const FAILED: u64 = u64::MAX;

    pub fn new(n: u64) -> Self {
        Self { n_le: n.to_le() }
    }

    pub fn get(&self) -> u64 {
        u64::from_le(self.n_le)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode from a received buffer, which must be exactly [`WireLen::SIZE`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        expect_exact_len(bytes.len(), Self::SIZE)?;
        bytemuck::try_pod_read_unaligned(bytes).map_err(|e| format!("{e:?}"))
    }
}

const_assert_eq!(size_of::<WireLen>(), 8);

/// Status byte leading every `all_to_allv` payload.
pub const FRAME_OK: u8 = 0;
/// The sender failed to pack; the rest of the frame is zero fill.
pub const FRAME_FAILED: u8 = 1;

/// Frame `payload`, which was announced as `n` bytes, into `n + 1` bytes.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(FRAME_OK);
    out.extend_from_slice(payload);
    out
}

/// A frame of the announced size that tells the receiver to fail.
pub fn failed_frame(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n + 1];
    out[0] = FRAME_FAILED;
    out
}

/// The payload of a frame announced as `n` bytes.
pub fn open_frame(frame: &[u8], n: usize) -> Result<&[u8], String> {
    expect_exact_len(frame.len(), n + 1)?;
    match frame[0] {
        FRAME_OK => Ok(&frame[1..]),
        FRAME_FAILED => Err("sender failed to pack its payload".into()),
        other => Err(format!("bad frame status {other}")),
    }
}

/// What a color expects to receive from one source when a copy plan is built:
/// the number of runs and the number of elements they cover.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable, serde::Serialize, serde::Deserialize,
)]
pub struct IntervalSummary {
    pub runs: u64,
    pub elements: u64,
}

const_assert_eq!(size_of::<IntervalSummary>(), 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_frame_is_rejected() {
        assert_eq!(open_frame(&frame(&[4, 5]), 2).unwrap(), &[4u8, 5][..]);
        assert!(open_frame(&failed_frame(2), 2).is_err());
        assert!(open_frame(&frame(&[4]), 2).is_err());
    }

    #[test]
    fn len_is_little_endian() {
        let w = WireLen::new(0x0102);
        assert_eq!(&w.as_bytes()[..2], &[0x02, 0x01]);
        assert_eq!(WireLen::decode(w.as_bytes()).unwrap().get(), 0x0102);
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert!(WireLen::decode(&[1, 2, 3]).is_err());
        assert!(expect_exact_len(3, 4).is_err());
        assert!(expect_exact_len(4, 4).is_ok());
    }
}
