//! The index metadata page.
//!
//! The first page allocated in a store records the tree shape. It is
//! rewritten as the last page of every committed write, after all node pages
//! it may point to are in place.

use serde::{Deserialize, Serialize};

use crate::constants::{FORMAT_VERSION, META_MAGIC};
use crate::errors::{IndexError, IndexResult};
use crate::node::NodeCodec;
use crate::store::PageId;

const CHECKSUM_LEN: usize = 4;

/// Persisted shape of an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub magic: u32,
    pub version: u32,
    pub dimension: u32,
    pub page_size: u32,
    pub capacity: u32,
    pub min_entries: u32,
    pub root_id: PageId,
    /// Level of the root node (0 while the root is a leaf)
    pub height: u32,
    pub entry_count: u64,
}

impl IndexMetadata {
    pub fn new(codec: &NodeCodec, root_id: PageId) -> Self {
        Self {
            magic: META_MAGIC,
            version: FORMAT_VERSION,
            dimension: codec.dimension(),
            page_size: codec.page_size(),
            capacity: codec.capacity(),
            min_entries: codec.min_entries(),
            root_id,
            height: 0,
            entry_count: 0,
        }
    }

    /// Encodes as `crc32 | bincode(self)`.
    pub fn encode(&self) -> IndexResult<Vec<u8>> {
        let body = bincode::serde::encode_to_vec(self, bincode::config::legacy())?;
        let mut bytes = Vec::with_capacity(CHECKSUM_LEN + body.len());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decodes and validates a metadata page. Every failure is `CorruptMetadata`.
    pub fn decode(bytes: &[u8]) -> IndexResult<Self> {
        if bytes.len() < CHECKSUM_LEN {
            return Err(IndexError::CorruptMetadata(
                "metadata page is truncated".into(),
            ));
        }
        let (checksum, body) = bytes.split_at(CHECKSUM_LEN);
        let mut stored = [0u8; CHECKSUM_LEN];
        stored.copy_from_slice(checksum);

        let (meta, consumed): (IndexMetadata, usize) =
            bincode::serde::decode_from_slice(body, bincode::config::legacy())
                .map_err(|e| IndexError::CorruptMetadata(e.to_string()))?;

        if crc32fast::hash(&body[..consumed]) != u32::from_le_bytes(stored) {
            return Err(IndexError::CorruptMetadata(
                "metadata checksum mismatch".into(),
            ));
        }
        meta.validate()?;
        Ok(meta)
    }

    fn validate(&self) -> IndexResult<()> {
        if self.magic != META_MAGIC {
            return Err(IndexError::CorruptMetadata(format!(
                "invalid magic number {:#x}",
                self.magic
            )));
        }
        if self.version > FORMAT_VERSION {
            return Err(IndexError::CorruptMetadata(format!(
                "unsupported format version {}",
                self.version
            )));
        }
        if self.dimension == 0 || self.root_id == 0 {
            return Err(IndexError::CorruptMetadata(format!(
                "dimension {} with root page {}",
                self.dimension, self.root_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndexMetadata {
        let codec = NodeCodec::new(4096, 2, 0.4).unwrap();
        let mut meta = IndexMetadata::new(&codec, 2);
        meta.height = 3;
        meta.entry_count = 1000;
        meta
    }

    #[test]
    fn test_encode_decode() {
        let meta = sample();
        let mut page = meta.encode().unwrap();
        page.resize(4096, 0);
        assert_eq!(IndexMetadata::decode(&page).unwrap(), meta);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = sample().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            IndexMetadata::decode(&bytes),
            Err(IndexError::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut meta = sample();
        meta.magic = 0xDEADBEEF;
        let bytes = meta.encode().unwrap();
        assert!(matches!(
            IndexMetadata::decode(&bytes),
            Err(IndexError::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_garbage_and_truncated() {
        assert!(IndexMetadata::decode(&[1, 2]).is_err());
        assert!(IndexMetadata::decode(&[0u8; 64]).is_err());
        assert!(IndexMetadata::decode(&[0xFFu8; 64]).is_err());
    }
}
