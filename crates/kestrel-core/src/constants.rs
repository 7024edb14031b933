//! Protocol-wide constants.

/// Protocol version carried by headers and transactions.
pub const PROTOCOL_VERSION: u16 = 1;

/// Length in bytes of a 32-byte hash.
pub const HASH32_LEN: usize = 32;

/// Number of atomic units per one coin.
pub const ATOMS_PER_COIN: u64 = 100_000_000;

/// Upper bound on any single amount or sum of amounts (21M coins).
pub const MAX_MONEY_ATOMS: u64 = 21_000_000 * ATOMS_PER_COIN;

/// Maximum number of inputs allowed in a single transaction.
pub const MAX_INPUTS_PER_TX: usize = 1_000;

/// Maximum number of outputs allowed in a single transaction.
pub const MAX_OUTPUTS_PER_TX: usize = 1_000;

/// Maximum serialized transaction size in bytes.
pub const MAX_TX_BYTES: usize = 100_000;

/// Coinbase unlock payload bounds (height tag + arbitrary miner data).
pub const MIN_COINBASE_UNLOCK_LEN: usize = 2;
/// See [`MIN_COINBASE_UNLOCK_LEN`].
pub const MAX_COINBASE_UNLOCK_LEN: usize = 100;

/// Domain separator used when hashing block headers.
pub const DS_BLOCK_HEADER: &[u8] = b"KESTREL::BLOCK_HEADER::V1";

/// Domain separator used when hashing transactions.
pub const DS_TX: &[u8] = b"KESTREL::TX::V1";

/// Domain separator for interior merkle nodes.
pub const DS_MERKLE_NODE: &[u8] = b"KESTREL::MERKLE_NODE::V1";

/// Domain separator for merkle leaves.
pub const DS_MERKLE_LEAF: &[u8] = b"KESTREL::MERKLE_LEAF::V1";

/// Domain separator for padding nodes of incomplete merkle levels.
pub const DS_MERKLE_EMPTY: &[u8] = b"KESTREL::MERKLE_EMPTY::V1";
