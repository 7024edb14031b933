#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Kestrel consensus rules for proof-of-work blocks.
//!
//! This crate is responsible for:
//! - compact difficulty target encoding/decoding (`bits`)
//! - per-block work and proof-of-work validation
//! - context-free block checks and header timestamp/difficulty rules
//! - difficulty retargeting and per-network chain parameters
//!
//! It intentionally does **not** hold chain state; see `kestrel-chain`.

pub mod difficulty;
pub mod error;
pub mod params;
pub mod pow;
pub mod retarget;
pub mod validate;
pub mod work;

pub use difficulty::*;
pub use error::*;
pub use params::*;
pub use pow::*;
pub use retarget::*;
pub use validate::*;
pub use work::*;
