//! 128-bit identifiers
//!
//! Three flavors share the same [`Uid`] representation:
//! - [`TypeId`] identifies the runtime type of a value stored in a [`TypedValue`](crate::TypedValue)
//! - [`ObjectId`] identifies a registered class or any builder
//! - [`InstanceId`] identifies a live object instance (or task queue)
//!
//! The all-zero uid is invalid. `Default` produces it, and it never compares
//! equal to a valid id.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

const FNV_OFFSET: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV_PRIME: u128 = 0x0000000001000000000000000000013b;

/// Prefix for generated instance ids ("prism" in ASCII)
const INSTANCE_PREFIX: u128 = 0x7072_6973_6d00_0000 << 64;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Raw 128-bit identifier
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(u128);

/// Error returned when parsing a uid from its string form fails
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid uid string: {0:?}")]
pub struct ParseUidError(String);

impl Uid {
    /// The invalid (all-zero) uid
    pub const INVALID: Uid = Uid(0);

    pub const fn from_u128(raw: u128) -> Self {
        Uid(raw)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Derive a uid from a name using 128-bit FNV-1a
    ///
    /// Never returns the invalid uid.
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = FNV_OFFSET;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u128;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        if hash == 0 {
            hash = 1;
        }
        Uid(hash)
    }

    /// Big-endian byte representation
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Uid(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff
        )
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({self})")
    }
}

impl FromStr for Uid {
    type Err = ParseUidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(ParseUidError(s.to_string()));
        }
        u128::from_str_radix(&hex, 16)
            .map(Uid)
            .map_err(|_| ParseUidError(s.to_string()))
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

macro_rules! uid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uid);

        impl $name {
            pub const INVALID: $name = $name(Uid::INVALID);

            pub const fn new(uid: Uid) -> Self {
                $name(uid)
            }

            pub const fn uid(self) -> Uid {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0.is_valid()
            }
        }

        impl From<Uid> for $name {
            fn from(uid: Uid) -> Self {
                $name(uid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseUidError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map($name)
            }
        }
    };
}

uid_newtype! {
    /// Identifies the runtime type of a stored value
    TypeId
}

uid_newtype! {
    /// Identifies a registered class or any builder
    ObjectId
}

uid_newtype! {
    /// Identifies a live object instance
    InstanceId
}

impl TypeId {
    /// Type id of a Rust type, derived from its type name
    ///
    /// Stable for the lifetime of a build.
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeId(Uid::from_name(std::any::type_name::<T>()))
    }
}

impl ObjectId {
    pub const fn from_name(name: &str) -> Self {
        ObjectId(Uid::from_name(name))
    }

    /// Object id of the default any builder for `T`
    pub fn for_any<T: ?Sized + 'static>() -> Self {
        ObjectId(Uid::from_name(&format!(
            "prism.any.{}",
            std::any::type_name::<T>()
        )))
    }
}

impl InstanceId {
    /// Generate a process-unique instance id
    pub fn generate() -> Self {
        let n = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        InstanceId(Uid(INSTANCE_PREFIX | n as u128))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ids_are_invalid() {
        assert!(!TypeId::default().is_valid());
        assert!(!ObjectId::default().is_valid());
        assert!(!InstanceId::default().is_valid());
        assert_ne!(TypeId::default(), TypeId::of::<f32>());
    }

    #[test]
    fn test_type_ids_distinguish_types() {
        assert_eq!(TypeId::of::<f32>(), TypeId::of::<f32>());
        assert_ne!(TypeId::of::<f32>(), TypeId::of::<f64>());
        assert_ne!(ObjectId::for_any::<f32>().uid(), TypeId::of::<f32>().uid());
    }

    #[test]
    fn test_uid_string_roundtrip() {
        let uid = Uid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        let text = uid.to_string();
        assert_eq!(text, "01234567-89ab-cdef-0011-223344556677");
        assert_eq!(text.parse::<Uid>(), Ok(uid));
        assert!("not-a-uid".parse::<Uid>().is_err());
    }

    #[test]
    fn test_generated_instances_unique() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert!(a.is_valid());
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_bytes_match_equality() {
        let a = ObjectId::from_name("Node");
        let b = ObjectId::from_name("Node");
        assert_eq!(a, b);
        assert_eq!(a.uid().to_bytes(), b.uid().to_bytes());
        assert_eq!(Uid::from_bytes(a.uid().to_bytes()), a.uid());
    }
}
