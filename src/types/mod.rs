//! Shared value types.

mod hash;

pub use hash::Sha256Hash;
