//! Firewall session keys, values and the closed function registry.
//!
//! The table itself is untyped (fixed key/value byte sizes); behavior
//! comes from functions selected *by name* from the closed sets below.
//! The constructor refuses combinations it does not know, so a table
//! can never be instantiated with mismatched comparison or merge
//! semantics.

use crate::error::{FwmapError, FwmapResult};

/// IPv4 5-tuple session key.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fw4Key {
    pub src: u32,
    pub dst: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: u8,
    pub _pad: [u8; 3],
}

/// IPv6 5-tuple session key.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fw6Key {
    pub src: [u8; 16],
    pub dst: [u8; 16],
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: u8,
    pub _pad: [u8; 3],
}

/// TCP/UDP flag bits observed on a session, per direction.
///
/// Bits 0..8 are forward-direction TCP flags, bits 8..16 backward.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwStateFlags(pub u64);

impl FwStateFlags {
    /// Fold TCP flags seen in one direction into the bitset.
    #[must_use]
    pub fn from_tcp(tcp_flags: u8, backward: bool) -> Self {
        let shift = if backward { 8 } else { 0 };
        Self(u64::from(tcp_flags) << shift)
    }

    /// Union of two observations.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Forward-direction TCP flags.
    #[must_use]
    pub fn forward(self) -> u8 {
        self.0 as u8
    }

    /// Backward-direction TCP flags.
    #[must_use]
    pub fn backward(self) -> u8 {
        (self.0 >> 8) as u8
    }
}

/// Firewall session value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwstateValue {
    pub flags: FwStateFlags,
    pub packets_fwd: u64,
    pub packets_bwd: u64,
    /// When this session was last touched, monotonic nanoseconds.
    pub last_update_ns: u64,
    /// IP protocol of the session.
    pub proto: u8,
    /// Set when the write originated from a peer firewall's sync
    /// frame rather than local traffic.
    pub external: u8,
    pub _pad: [u8; 6],
}

impl FwstateValue {
    /// Byte view of the value for table writes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: FwstateValue is repr(C), fully initialized plain
        // data with no padding-dependent semantics on read-back.
        unsafe {
            std::slice::from_raw_parts(std::ptr::from_ref(self).cast::<u8>(), size_of::<Self>())
        }
    }

    /// Rebuild from a table read.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), size_of::<Self>());
        let mut value = Self::default();
        // SAFETY: same layout both sides, length checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                std::ptr::from_mut(&mut value).cast::<u8>(),
                size_of::<Self>(),
            );
        }
        value
    }
}

/// The firewall merge: OR the flags, sum the directional counters,
/// let the newer write own external/proto/timestamp.
///
/// Commutative in the fields that matter for convergence (flags and
/// counters), which is what the at-least-once sync protocol needs.
#[must_use]
pub fn merge_fwstate(new: &FwstateValue, old: &FwstateValue) -> FwstateValue {
    FwstateValue {
        flags: new.flags.merge(old.flags),
        packets_fwd: new.packets_fwd.wrapping_add(old.packets_fwd),
        packets_bwd: new.packets_bwd.wrapping_add(old.packets_bwd),
        last_update_ns: new.last_update_ns.max(old.last_update_ns),
        proto: new.proto,
        external: new.external,
        _pad: [0; 6],
    }
}

// --- closed function registry ----------------------------------------------

/// Key comparison functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FwmapKeyEqual {
    /// Byte comparison of [`Fw4Key`].
    Fw4 = 1,
    /// Byte comparison of [`Fw6Key`].
    Fw6 = 2,
}

/// Value copy functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FwmapCopyValue {
    /// Plain copy of [`FwstateValue`].
    Fwstate = 1,
}

/// Value merge functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FwmapMergeValue {
    /// [`merge_fwstate`].
    Fwstate = 1,
}

/// Key hash functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FwmapHash {
    /// Seeded FNV-1a over the key bytes.
    Fnv1a = 1,
}

/// Seed sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FwmapRand {
    /// Process RNG at construction time.
    Default = 1,
}

/// The function combination of one table instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwmapFuncs {
    pub key_equal: FwmapKeyEqual,
    pub copy_value: FwmapCopyValue,
    pub merge_value: FwmapMergeValue,
    pub hash: FwmapHash,
    pub rand: FwmapRand,
}

impl FwmapFuncs {
    /// Validate the combination against the key/value sizes.
    ///
    /// Only the combinations below exist; anything else is refused at
    /// construction.
    pub fn validate(&self, key_size: u32, value_size: u32) -> FwmapResult<()> {
        let expected_key = match self.key_equal {
            FwmapKeyEqual::Fw4 => size_of::<Fw4Key>() as u32,
            FwmapKeyEqual::Fw6 => size_of::<Fw6Key>() as u32,
        };
        if key_size != expected_key {
            return Err(FwmapError::bad_spec(format!(
                "key size {key_size} does not fit {:?} (need {expected_key})",
                self.key_equal
            )));
        }
        match (self.copy_value, self.merge_value) {
            (FwmapCopyValue::Fwstate, FwmapMergeValue::Fwstate) => {
                let expected = size_of::<FwstateValue>() as u32;
                if value_size != expected {
                    return Err(FwmapError::bad_spec(format!(
                        "value size {value_size} does not fit fwstate (need {expected})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply the configured merge to raw value bytes.
    pub(crate) fn merge(&self, existing: &mut [u8], incoming: &[u8]) {
        match self.merge_value {
            FwmapMergeValue::Fwstate => {
                let merged = merge_fwstate(
                    &FwstateValue::from_bytes(incoming),
                    &FwstateValue::from_bytes(existing),
                );
                existing.copy_from_slice(merged.as_bytes());
            }
        }
    }

    /// Hash raw key bytes with the configured function.
    pub(crate) fn hash_key(&self, seed: u64, key: &[u8]) -> u64 {
        match self.hash {
            FwmapHash::Fnv1a => fnv1a(seed, key),
        }
    }
}

/// Seeded FNV-1a. Stable across processes sharing one table (the seed
/// lives in the table header).
#[must_use]
pub fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = 0xcbf2_9ce4_8422_2325 ^ seed;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Byte view helpers for the fixed-layout keys.
macro_rules! key_bytes {
    ($ty:ty) => {
        impl $ty {
            /// Byte view of the key for table operations.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                // SAFETY: repr(C) plain data, size known.
                unsafe {
                    std::slice::from_raw_parts(
                        std::ptr::from_ref(self).cast::<u8>(),
                        size_of::<Self>(),
                    )
                }
            }
        }
    };
}

key_bytes!(Fw4Key);
key_bytes!(Fw6Key);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_sizes_are_wire_stable() {
        assert_eq!(size_of::<Fw4Key>(), 16);
        assert_eq!(size_of::<Fw6Key>(), 40);
        assert_eq!(size_of::<FwstateValue>(), 40);
    }

    #[test]
    fn merge_is_commutative_in_flags_and_counters() {
        let a = FwstateValue {
            flags: FwStateFlags(0b0011),
            packets_fwd: 10,
            packets_bwd: 1,
            last_update_ns: 100,
            proto: 6,
            external: 0,
            _pad: [0; 6],
        };
        let b = FwstateValue {
            flags: FwStateFlags(0b0110),
            packets_fwd: 5,
            packets_bwd: 2,
            last_update_ns: 200,
            proto: 6,
            external: 1,
            _pad: [0; 6],
        };
        let ab = merge_fwstate(&a, &b);
        let ba = merge_fwstate(&b, &a);
        assert_eq!(ab.flags, ba.flags);
        assert_eq!(ab.packets_fwd, ba.packets_fwd);
        assert_eq!(ab.packets_bwd, ba.packets_bwd);
        assert_eq!(ab.last_update_ns, ba.last_update_ns);
    }

    #[test]
    fn merge_is_idempotent_in_flags() {
        let a = FwstateValue {
            flags: FwStateFlags(0xFF),
            last_update_ns: 7,
            ..FwstateValue::default()
        };
        let merged = merge_fwstate(&a, &a);
        assert_eq!(merged.flags, a.flags);
        assert_eq!(merged.last_update_ns, 7);
    }

    #[test]
    fn func_validation_rejects_mismatches() {
        let funcs = FwmapFuncs {
            key_equal: FwmapKeyEqual::Fw4,
            copy_value: FwmapCopyValue::Fwstate,
            merge_value: FwmapMergeValue::Fwstate,
            hash: FwmapHash::Fnv1a,
            rand: FwmapRand::Default,
        };
        funcs.validate(16, 40).unwrap();
        assert!(funcs.validate(40, 40).is_err());
        assert!(funcs.validate(16, 32).is_err());
    }

    #[test]
    fn directional_flags() {
        let fwd = FwStateFlags::from_tcp(0x02, false);
        let bwd = FwStateFlags::from_tcp(0x12, true);
        let both = fwd.merge(bwd);
        assert_eq!(both.forward(), 0x02);
        assert_eq!(both.backward(), 0x12);
    }
}
