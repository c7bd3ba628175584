//! Per-color field storage.
//!
//! A [`Region`] holds the local storage of one index space on one color: every
//! field registered on that space gets a buffer of `len * type_size` bytes,
//! allocated zeroed on first mutable access. Buffers are 16-byte aligned so they
//! can be viewed as any `Pod` element type of matching size.

use crate::data::field_info::{FieldId, FieldInfo};
use crate::mesh_error::MeshError;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

#[repr(C, align(16))]
#[derive(Copy, Clone)]
struct Chunk([u8; 16]);

// SAFETY: a 16-byte array with 16-byte alignment has no padding, and every bit
// pattern is valid.
unsafe impl Zeroable for Chunk {}
unsafe impl Pod for Chunk {}

const CHUNK: usize = std::mem::size_of::<Chunk>();

#[derive(Clone)]
struct FieldBuffer {
    chunks: Vec<Chunk>,
    len_bytes: usize,
    type_size: usize,
    ghosts_valid: bool,
}

impl FieldBuffer {
    fn zeroed(len_bytes: usize, type_size: usize) -> Self {
        FieldBuffer {
            chunks: vec![Chunk::zeroed(); len_bytes.div_ceil(CHUNK)],
            len_bytes,
            type_size,
            ghosts_valid: false,
        }
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.chunks)[..self.len_bytes]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.chunks)[..self.len_bytes]
    }
}

/// Local storage of one index space on one color.
#[derive(Clone)]
pub struct Region {
    index_space: usize,
    color: usize,
    len: usize,
    fields: HashMap<FieldId, FieldBuffer>,
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fids: Vec<_> = self.fields.keys().collect();
        fids.sort_unstable();
        f.debug_struct("Region")
            .field("index_space", &self.index_space)
            .field("color", &self.color)
            .field("len", &self.len)
            .field("fields", &fids)
            .finish()
    }
}

impl Region {
    /// Storage for `len` elements per field.
    pub fn new(index_space: usize, color: usize, len: usize) -> Self {
        Region {
            index_space,
            color,
            len,
            fields: HashMap::new(),
        }
    }

    pub fn index_space(&self) -> usize {
        self.index_space
    }

    pub fn color(&self) -> usize {
        self.color
    }

    /// Elements per field.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether storage for `fid` has been allocated.
    pub fn is_allocated(&self, fid: FieldId) -> bool {
        self.fields.contains_key(&fid)
    }

    fn check_space(&self, fi: &FieldInfo) -> Result<(), MeshError> {
        if fi.index_space != self.index_space {
            return Err(MeshError::FieldSpaceMismatch {
                fid: fi.fid,
                expected: self.index_space,
                actual: fi.index_space,
            });
        }
        Ok(())
    }

    fn buffer(&self, fi: &FieldInfo) -> Result<&FieldBuffer, MeshError> {
        self.check_space(fi)?;
        self.fields
            .get(&fi.fid)
            .ok_or(MeshError::FieldUnallocated { fid: fi.fid })
    }

    fn buffer_mut(&mut self, fi: &FieldInfo) -> Result<&mut FieldBuffer, MeshError> {
        self.check_space(fi)?;
        let len_bytes = self.len * fi.type_size;
        let buf = self.fields.entry(fi.fid).or_insert_with(|| {
            log::trace!(
                "allocating {len_bytes} bytes for field {} on space {} color {}",
                fi.fid,
                fi.index_space,
                self.color
            );
            FieldBuffer::zeroed(len_bytes, fi.type_size)
        });
        if buf.type_size != fi.type_size {
            return Err(MeshError::FieldTypeSize {
                fid: fi.fid,
                expected: buf.type_size,
                actual: fi.type_size,
            });
        }
        Ok(buf)
    }

    /// Raw bytes of an allocated field.
    pub fn bytes(&self, fi: &FieldInfo) -> Result<&[u8], MeshError> {
        Ok(self.buffer(fi)?.bytes())
    }

    /// Raw bytes of a field, allocating it zeroed if needed.
    pub fn bytes_mut(&mut self, fi: &FieldInfo) -> Result<&mut [u8], MeshError> {
        Ok(self.buffer_mut(fi)?.bytes_mut())
    }

    /// Typed view of an allocated field.
    pub fn view<T: Pod>(&self, fi: &FieldInfo) -> Result<&[T], MeshError> {
        check_elem::<T>(fi)?;
        cast(fi, self.bytes(fi)?)
    }

    /// Mutable typed view of a field, allocating it zeroed if needed.
    pub fn view_mut<T: Pod>(&mut self, fi: &FieldInfo) -> Result<&mut [T], MeshError> {
        check_elem::<T>(fi)?;
        let fid = fi.fid;
        bytemuck::try_cast_slice_mut(self.bytes_mut(fi)?)
            .map_err(|e| MeshError::Invariant(format!("field {fid}: {e:?}")))
    }

    /// Whether the ghost slots of `fid` hold current values.
    pub fn ghosts_valid(&self, fid: FieldId) -> bool {
        self.fields.get(&fid).is_some_and(|b| b.ghosts_valid)
    }

    pub fn set_ghosts_valid(&mut self, fid: FieldId, valid: bool) {
        if let Some(b) = self.fields.get_mut(&fid) {
            b.ghosts_valid = valid;
        }
    }
}

fn check_elem<T>(fi: &FieldInfo) -> Result<(), MeshError> {
    let actual = std::mem::size_of::<T>();
    if actual != fi.type_size {
        return Err(MeshError::FieldTypeSize {
            fid: fi.fid,
            expected: fi.type_size,
            actual,
        });
    }
    Ok(())
}

fn cast<'a, T: Pod>(fi: &FieldInfo, bytes: &'a [u8]) -> Result<&'a [T], MeshError> {
    bytemuck::try_cast_slice(bytes)
        .map_err(|e| MeshError::Invariant(format!("field {}: {e:?}", fi.fid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_zeroed() {
        let fi = FieldInfo::of::<f64>(0, 1);
        let mut r = Region::new(1, 0, 5);
        assert!(!r.is_allocated(0));
        assert!(matches!(r.view::<f64>(&fi), Err(MeshError::FieldUnallocated { fid: 0 })));
        assert_eq!(r.view_mut::<f64>(&fi).unwrap(), &[0.0; 5]);
        r.view_mut::<f64>(&fi).unwrap()[3] = 2.5;
        assert_eq!(r.view::<f64>(&fi).unwrap()[3], 2.5);
        assert_eq!(r.bytes(&fi).unwrap().len(), 40);
    }

    #[test]
    fn rejects_wrong_space_and_type() {
        let fi = FieldInfo::of::<u32>(2, 0);
        let mut r = Region::new(1, 0, 3);
        assert!(matches!(
            r.bytes_mut(&fi),
            Err(MeshError::FieldSpaceMismatch { fid: 2, expected: 1, actual: 0 })
        ));
        let fi = FieldInfo::of::<u32>(2, 1);
        assert!(matches!(
            r.view_mut::<u64>(&fi),
            Err(MeshError::FieldTypeSize { fid: 2, expected: 4, actual: 8 })
        ));
    }

    #[test]
    fn ghost_flag_starts_stale() {
        let fi = FieldInfo::of::<u8>(0, 0);
        let mut r = Region::new(0, 0, 2);
        r.set_ghosts_valid(0, true);
        assert!(!r.ghosts_valid(0));
        r.bytes_mut(&fi).unwrap();
        assert!(!r.ghosts_valid(0));
        r.set_ghosts_valid(0, true);
        assert!(r.ghosts_valid(0));
    }
}
