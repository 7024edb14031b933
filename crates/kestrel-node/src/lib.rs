#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Support code for the `kestrel-node` and `mine-regtest` binaries.

pub mod blockfile;
pub mod config;
pub mod import;

pub use blockfile::{write_block, BlockFileError, BlockReader};
pub use config::{resolve_config, Config, ResolvedConfig};
pub use import::{import_blocks, ImportStats};
