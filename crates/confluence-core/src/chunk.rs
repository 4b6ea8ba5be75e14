//! The chunk: unit of merging, deduplication, and playout.
//!
//! A chunk is exactly `CHUNK_SIZE` bytes of raw stream content. Two chunks
//! are equal iff their bytes are equal; no sequence number or origin is
//! carried, so identical content delivered by several peers collapses.

use std::fmt;

use bytes::Bytes;

/// Size of every chunk, and of every network receive unit.
pub const CHUNK_SIZE: usize = 1024;

/// A fixed-size, immutable slice of stream content.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Chunk(Bytes);

#[derive(Debug, thiserror::Error)]
#[error("chunk must be exactly {CHUNK_SIZE} bytes, got {0}")]
pub struct ChunkSizeError(pub usize);

impl Chunk {
    /// Wrap exactly `CHUNK_SIZE` bytes.
    pub fn new(bytes: Bytes) -> Result<Self, ChunkSizeError> {
        if bytes.len() != CHUNK_SIZE {
            return Err(ChunkSizeError(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// BLAKE3 digest of the content. Used for logging and replay history.
    pub fn digest(&self) -> [u8; 32] {
        *blake3::hash(&self.0).as_bytes()
    }
}

impl TryFrom<&[u8]> for Chunk {
    type Error = ChunkSizeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::new(Bytes::copy_from_slice(value))
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest = self.digest();
        write!(f, "Chunk(")?;
        for b in &digest[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_size() {
        assert!(Chunk::new(Bytes::from_static(b"short")).is_err());
        assert!(Chunk::try_from(&[0u8; CHUNK_SIZE + 1][..]).is_err());
        assert!(Chunk::try_from(&[0u8; CHUNK_SIZE][..]).is_ok());
    }

    #[test]
    fn equality_is_by_content() {
        let a = Chunk::try_from(&[7u8; CHUNK_SIZE][..]).unwrap();
        let b = Chunk::new(Bytes::from(vec![7u8; CHUNK_SIZE])).unwrap();
        let c = Chunk::try_from(&[8u8; CHUNK_SIZE][..]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a, c);
    }
}
