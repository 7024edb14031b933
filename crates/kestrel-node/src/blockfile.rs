//! Block files: a sequence of `u32` little-endian length prefixes, each
//! followed by that many bytes of a Borsh-encoded block.

use std::io::{self, Read, Write};

use borsh::BorshDeserialize;
use kestrel_core::Block;
use thiserror::Error;

/// Largest accepted record.
pub const MAX_RECORD_BYTES: u32 = 8 * 1024 * 1024;

/// Failure reading or writing a block file.
#[derive(Debug, Error)]
pub enum BlockFileError {
    /// Underlying I/O error.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// A record declares an implausible length.
    #[error("record {index} declares {len} bytes (max {max})", max = MAX_RECORD_BYTES)]
    TooLarge {
        /// Zero-based record number.
        index: usize,
        /// Declared length.
        len: u64,
    },
    /// The file ends inside a record.
    #[error("record {index} is truncated")]
    Truncated {
        /// Zero-based record number.
        index: usize,
    },
    /// A record is not a valid block encoding.
    #[error("record {index} does not decode: {reason}")]
    Decode {
        /// Zero-based record number.
        index: usize,
        /// Decoder message.
        reason: String,
    },
}

/// Append one block.
pub fn write_block<W: Write>(out: &mut W, block: &Block) -> Result<(), BlockFileError> {
    let bytes = borsh::to_vec(block)?;
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_BYTES)
        .ok_or(BlockFileError::TooLarge {
            index: 0,
            len: bytes.len() as u64,
        })?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&bytes)?;
    Ok(())
}

/// Iterator over the blocks of a file. Stops after the first error.
pub struct BlockReader<R> {
    inner: R,
    index: usize,
    done: bool,
}

impl<R: Read> BlockReader<R> {
    /// Read from `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            index: 0,
            done: false,
        }
    }

    fn read_record(&mut self) -> Result<Option<Block>, BlockFileError> {
        let mut prefix = [0u8; 4];
        let mut filled = 0;
        while filled < prefix.len() {
            match self.inner.read(&mut prefix[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        let index = self.index;
        if filled < prefix.len() {
            return Err(BlockFileError::Truncated { index });
        }

        let len = u32::from_le_bytes(prefix);
        if len > MAX_RECORD_BYTES {
            return Err(BlockFileError::TooLarge {
                index,
                len: len.into(),
            });
        }
        let mut body = vec![0u8; len as usize];
        self.inner.read_exact(&mut body).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => BlockFileError::Truncated { index },
            _ => e.into(),
        })?;
        let block = Block::try_from_slice(&body).map_err(|e| BlockFileError::Decode {
            index,
            reason: e.to_string(),
        })?;
        self.index += 1;
        Ok(Some(block))
    }
}

impl<R: Read> Iterator for BlockReader<R> {
    type Item = Result<Block, BlockFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus::ChainParams;

    #[test]
    fn reads_back_what_was_written() {
        let a = ChainParams::regtest().genesis;
        let b = ChainParams::mainnet().genesis;
        let mut buf = Vec::new();
        write_block(&mut buf, &a).unwrap();
        write_block(&mut buf, &b).unwrap();

        let blocks: Vec<Block> = BlockReader::new(buf.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(blocks, vec![a, b]);
        assert_eq!(BlockReader::new(&[][..]).count(), 0);
    }

    #[test]
    fn truncated_record_is_reported_once() {
        let mut buf = Vec::new();
        write_block(&mut buf, &ChainParams::regtest().genesis).unwrap();
        write_block(&mut buf, &ChainParams::regtest().genesis).unwrap();
        buf.truncate(buf.len() - 3);

        let items: Vec<_> = BlockReader::new(buf.as_slice()).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(BlockFileError::Truncated { index: 1 })));
    }

    #[test]
    fn oversized_and_garbage_records_fail() {
        let huge = (MAX_RECORD_BYTES + 1).to_le_bytes();
        let mut reader = BlockReader::new(&huge[..]);
        assert!(matches!(reader.next(), Some(Err(BlockFileError::TooLarge { index: 0, .. }))));
        assert!(reader.next().is_none());

        let mut garbage = 3u32.to_le_bytes().to_vec();
        garbage.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            BlockReader::new(garbage.as_slice()).next(),
            Some(Err(BlockFileError::Decode { index: 0, .. }))
        ));
    }
}
