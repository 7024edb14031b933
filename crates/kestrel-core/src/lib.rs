#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Kestrel core: canonical types, constants, hashing, and serialization helpers.

pub mod constants;
pub mod merkle;
pub mod serialization;
pub mod types;

pub use constants::*;
pub use merkle::*;
pub use serialization::*;
pub use types::*;
