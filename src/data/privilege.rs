//! Access privileges and privilege packs.
//!
//! A [`Privilege`] is one of four access modes (`na`, `ro`, `wo`, `rw`) encoded in
//! [`PRIVILEGE_BITS`] bits: bit 0 grants reading, bit 1 grants writing. A
//! [`PrivilegePack`] stores an ordered sequence of modes, earliest access first,
//! in a single `u32` behind a leading sentinel bit, so that the number of modes can
//! be recovered from the bit width alone:
//!
//! ```text
//! pack(ro, wo) = 0b1_01_10
//!                  ^ sentinel
//! ```
//!
//! Packs are immutable values, normally built in `const` context with
//! [`privilege_pack!`](crate::privilege_pack). The predicates on a pack are the
//! sole decision point for whether a ghost refresh must run before a task; see
//! [`PrivilegePack::should_refresh`].

use std::fmt;

/// Width of one access-mode code inside a pack.
pub const PRIVILEGE_BITS: u32 = 2;

const CODE_MASK: u32 = (1 << PRIVILEGE_BITS) - 1;

/// Largest number of modes a `u32` pack can hold next to its sentinel bit.
pub const MAX_PRIVILEGES: u16 = ((u32::BITS - 1) / PRIVILEGE_BITS) as u16;

/// Number of modes stored in a pack.
pub type PrivilegeCount = u16;

/// Access mode for one part of a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Privilege {
    /// No access: the consistency update is coalesced with the next access.
    Na = 0b00,
    /// Read-only: data are brought up to date but not written.
    Ro = 0b01,
    /// Write-only: no update is performed and the data are overwritten.
    Wo = 0b10,
    /// Read-write: data are brought up to date and may be written.
    Rw = 0b11,
}

impl Privilege {
    const fn from_code(code: u32) -> Self {
        match code & CODE_MASK {
            0b00 => Privilege::Na,
            0b01 => Privilege::Ro,
            0b10 => Privilege::Wo,
            _ => Privilege::Rw,
        }
    }

    /// Raw 2-bit code.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Whether this mode allows reading without writing first.
    #[inline]
    pub const fn reads(self) -> bool {
        self.code() & 0b01 != 0
    }

    /// Whether this mode allows writing.
    #[inline]
    pub const fn writes(self) -> bool {
        self.code() & 0b10 != 0
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Privilege::Na => "na",
            Privilege::Ro => "ro",
            Privilege::Wo => "wo",
            Privilege::Rw => "rw",
        })
    }
}

/// An ordered sequence of [`Privilege`]s packed into one integer.
///
/// # Invariants
/// - The raw value is either `0` (degenerate, zero modes) or has its highest set
///   bit at position `count * PRIVILEGE_BITS` (the sentinel).
/// - `count <= MAX_PRIVILEGES`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PrivilegePack(u32);

impl PrivilegePack {
    /// The pack with no modes (sentinel only).
    pub const EMPTY: PrivilegePack = PrivilegePack(1);

    /// Pack `modes`, earliest access first.
    ///
    /// # Panics
    /// Panics (at compile time in `const` context) if more than
    /// [`MAX_PRIVILEGES`] modes are supplied.
    pub const fn new(modes: &[Privilege]) -> Self {
        assert!(
            modes.len() <= MAX_PRIVILEGES as usize,
            "too many privileges for one pack"
        );
        let mut ret = 1u32;
        let mut i = 0;
        while i < modes.len() {
            ret = (ret << PRIVILEGE_BITS) | modes[i].code();
            i += 1;
        }
        PrivilegePack(ret)
    }

    /// Reinterpret a raw packed integer.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        PrivilegePack(raw)
    }

    /// The raw packed integer.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Number of modes encoded; `0` for the empty or degenerate pack.
    #[inline]
    pub const fn count(self) -> PrivilegeCount {
        let width = u32::BITS - self.0.leading_zeros();
        if width == 0 {
            return 0;
        }
        ((width - 1) / PRIVILEGE_BITS) as PrivilegeCount
    }

    /// The `i`-th mode in temporal order.
    ///
    /// `i` must be less than [`count`](Self::count); this is checked in debug
    /// builds only.
    #[inline]
    pub const fn get(self, i: PrivilegeCount) -> Privilege {
        let n = self.count();
        debug_assert!(i < n, "privilege index out of range");
        let shift = (n as u32)
            .wrapping_sub(1)
            .wrapping_sub(i as u32)
            .wrapping_mul(PRIVILEGE_BITS);
        Privilege::from_code(self.0.wrapping_shr(shift))
    }

    /// Iterate over the modes, earliest first.
    pub fn iter(self) -> impl Iterator<Item = Privilege> {
        (0..self.count()).map(move |i| self.get(i))
    }

    /// True iff some mode permits reading without a prior write.
    pub const fn allows_read_without_write(self) -> bool {
        let mut i = self.count();
        while i > 0 {
            i -= 1;
            if self.get(i).reads() {
                return true;
            }
        }
        false
    }

    /// True iff some mode permits writing.
    pub const fn allows_write(self) -> bool {
        let mut i = self.count();
        while i > 0 {
            i -= 1;
            if self.get(i).writes() {
                return true;
            }
        }
        false
    }

    /// True iff the accesses overwrite the data before anything reads it.
    ///
    /// That holds when every mode is `wo`, or `na` standing next to the
    /// write-only accesses: `(wo)`, `(wo, na)` and `(na, wo)` discard, while
    /// `(na)` alone or any `ro`/`rw` does not. The empty pack does not discard.
    pub const fn discards_existing_data(self) -> bool {
        let mut writes = false;
        let mut i = self.count();
        while i > 0 {
            i -= 1;
            match self.get(i) {
                Privilege::Wo => writes = true,
                Privilege::Na => {}
                _ => return false,
            }
        }
        writes
    }

    /// Collapse the pack to one representative mode.
    pub const fn merge(self) -> Privilege {
        if self.discards_existing_data() {
            Privilege::Wo
        } else if self.allows_write() {
            Privilege::Rw
        } else if self.allows_read_without_write() {
            Privilege::Ro
        } else {
            Privilege::Na
        }
    }

    /// Whether a ghost refresh must be issued before a task using this pack.
    pub const fn should_refresh(self) -> bool {
        self.allows_read_without_write()
            || (self.allows_write() && !self.discards_existing_data())
    }

    /// The modes of `self` followed by the modes of `other`.
    pub const fn concat(self, other: PrivilegePack) -> Self {
        let n = other.count() as u32 * PRIVILEGE_BITS;
        debug_assert!(
            self.count() as u32 + other.count() as u32 <= MAX_PRIVILEGES as u32,
            "too many privileges for one pack"
        );
        let low = if n == 0 { 0 } else { other.0 & ((1u32 << n) - 1) };
        PrivilegePack((self.0 << n) | low)
    }

    /// `n` copies of `mode`.
    pub const fn repeat(mode: Privilege, n: PrivilegeCount) -> Self {
        assert!(n <= MAX_PRIVILEGES, "too many privileges for one pack");
        let mut ret = 1u32;
        let mut i = 0;
        while i < n {
            ret = (ret << PRIVILEGE_BITS) | mode.code();
            i += 1;
        }
        PrivilegePack(ret)
    }
}

impl Default for PrivilegePack {
    fn default() -> Self {
        PrivilegePack::EMPTY
    }
}

impl From<Privilege> for PrivilegePack {
    fn from(p: Privilege) -> Self {
        PrivilegePack::new(&[p])
    }
}

impl fmt::Debug for PrivilegePack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl fmt::Display for PrivilegePack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (i, p) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(">")
    }
}

/// Build a [`PrivilegePack`] from lowercase mode names, usable in `const` items.
///
/// ```rust
/// use mesh_narray::privilege_pack;
/// use mesh_narray::data::privilege::{Privilege, PrivilegePack};
/// const P: PrivilegePack = privilege_pack![ro, wo];
/// assert_eq!(P.count(), 2);
/// assert_eq!(P.get(1), Privilege::Wo);
/// ```
#[macro_export]
macro_rules! privilege_pack {
    (@mode na) => { $crate::data::privilege::Privilege::Na };
    (@mode ro) => { $crate::data::privilege::Privilege::Ro };
    (@mode wo) => { $crate::data::privilege::Privilege::Wo };
    (@mode rw) => { $crate::data::privilege::Privilege::Rw };
    ($($m:ident),* $(,)?) => {
        $crate::data::privilege::PrivilegePack::new(&[$($crate::privilege_pack!(@mode $m)),*])
    };
}
