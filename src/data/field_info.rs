//! Field metadata registry.
//!
//! A field is identified by a [`FieldKey`], a hash of `(namespace, name, version)`
//! that every process derives identically. [`FieldInfoStore`] maps keys to
//! [`FieldInfo`] descriptors (field id, owning index space, element size) and keeps
//! the descriptors in registration order for enumeration.
//!
//! Registration happens in one explicit phase: a [`FieldRegistry`] is populated,
//! then [`FieldRegistry::install`] freezes it into the process-wide store. Lookups
//! through [`global`] fail until that has happened, so there is no dependence on
//! static-initialization order.

use crate::mesh_error::MeshError;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;

/// Identifier of a field within its index space's storage.
pub type FieldId = usize;

// Fixed seeds: the key of a field must agree on every process in the group.
const KEY_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Hash key of a field: `(namespace, name, version)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct FieldKey(u64);

impl FieldKey {
    /// Hash `(namespace, name, version)` into a key.
    pub fn new(namespace: &str, name: &str, version: u32) -> Self {
        let state = ahash::RandomState::with_seeds(KEY_SEEDS[0], KEY_SEEDS[1], KEY_SEEDS[2], KEY_SEEDS[3]);
        FieldKey(state.hash_one((namespace, name, version)))
    }

    /// Wrap an externally computed hash.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        FieldKey(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Runtime descriptor of a registered field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FieldInfo {
    pub fid: FieldId,
    pub index_space: usize,
    /// Element size in bytes.
    pub type_size: usize,
}

impl FieldInfo {
    /// Descriptor for elements of type `T`.
    pub fn of<T>(fid: FieldId, index_space: usize) -> Self {
        FieldInfo {
            fid,
            index_space,
            type_size: std::mem::size_of::<T>(),
        }
    }
}

/// Append-only store of field descriptors with key lookup.
#[derive(Clone, Debug, Default)]
pub struct FieldInfoStore {
    data: Vec<FieldInfo>,
    key_lookup: HashMap<FieldKey, usize>,
}

impl FieldInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fi` under `key`.
    ///
    /// # Errors
    /// `DuplicateFieldKey` if `key` is already mapped; the store is unchanged.
    pub fn add(&mut self, fi: FieldInfo, key: FieldKey) -> Result<(), MeshError> {
        if self.key_lookup.contains_key(&key) {
            return Err(MeshError::DuplicateFieldKey(key));
        }
        log::debug!(
            "Registering field info key={key} fid={} index_space={} type_size={}",
            fi.fid,
            fi.index_space,
            fi.type_size
        );
        self.data.push(fi);
        self.key_lookup.insert(key, self.data.len() - 1);
        Ok(())
    }

    /// Look up the descriptor registered under `key`.
    pub fn get(&self, key: FieldKey) -> Result<&FieldInfo, MeshError> {
        self.key_lookup
            .get(&key)
            .map(|&i| &self.data[i])
            .ok_or(MeshError::FieldNotFound(key))
    }

    /// All descriptors in registration order.
    pub fn all(&self) -> &[FieldInfo] {
        &self.data
    }

    /// Descriptors that live on `index_space`, in registration order.
    pub fn on_space(&self, index_space: usize) -> impl Iterator<Item = &FieldInfo> + '_ {
        self.data.iter().filter(move |fi| fi.index_space == index_space)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Builder for a [`FieldInfoStore`] that hands out field ids.
///
/// Field ids are assigned sequentially in definition order, so every process
/// that defines the same fields in the same order agrees on them.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    store: FieldInfoStore,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a field of element type `T` on `index_space` and return its key.
    pub fn define<T>(
        &mut self,
        namespace: &str,
        name: &str,
        version: u32,
        index_space: usize,
    ) -> Result<FieldKey, MeshError> {
        let key = FieldKey::new(namespace, name, version);
        let fi = FieldInfo::of::<T>(self.store.len(), index_space);
        self.store.add(fi, key)?;
        Ok(key)
    }

    /// Freeze the definitions.
    pub fn finish(self) -> FieldInfoStore {
        self.store
    }

    /// Freeze the definitions and install them as the process-wide store.
    pub fn install(self) -> Result<&'static FieldInfoStore, MeshError> {
        install(self.finish())
    }
}

static GLOBAL: OnceCell<FieldInfoStore> = OnceCell::new();

/// Install `store` as the process-wide registry. Can happen once.
pub fn install(store: FieldInfoStore) -> Result<&'static FieldInfoStore, MeshError> {
    GLOBAL.set(store).map_err(|_| MeshError::RegistryInstalled)?;
    GLOBAL.get().ok_or(MeshError::RegistryNotInstalled)
}

/// The process-wide registry.
pub fn global() -> Result<&'static FieldInfoStore, MeshError> {
    GLOBAL.get().ok_or(MeshError::RegistryNotInstalled)
}
