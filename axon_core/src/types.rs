//! Fixed-width identifiers used across the channel subsystem.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generate a 16-byte identifier newtype with ordering, hashing, hex display
/// and random construction.
macro_rules! fixed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name([u8; 16]);

        impl $name {
            /// Identifier width in bytes.
            pub const LEN: usize = 16;

            /// A fresh random identifier.
            pub fn random() -> Self {
                Self(*uuid::Uuid::new_v4().as_bytes())
            }

            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Lower-case hex rendering, 32 characters.
            pub fn to_hex(&self) -> String {
                use std::fmt::Write;
                let mut out = String::with_capacity(Self::LEN * 2);
                for b in self.0 {
                    let _ = write!(out, "{:02x}", b);
                }
                out
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }
    };
}

fixed_id! {
    /// Identity of one mutable object (and of its channel).
    ObjectId
}

fixed_id! {
    /// Identity of a node in the cluster.
    NodeId
}
