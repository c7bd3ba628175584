//! Data module: privileges, field metadata and field storage.

pub mod field_info;
pub mod privilege;
pub mod region;

pub use field_info::{FieldId, FieldInfo, FieldInfoStore, FieldKey, FieldRegistry};
pub use privilege::{Privilege, PrivilegePack};
pub use region::Region;
