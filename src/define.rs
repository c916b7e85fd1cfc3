use std::fmt;

/// A SHA-1 hash digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// The length of a [`Sha1Hash`] in bytes.
pub const HASH_LEN: usize = 20;

/// The hash of an absent tree node. Leaf layers are padded with this value
/// up to the next power of two so a file always yields the same root.
pub const ZERO_HASH: Sha1Hash = [0; 20];

/// The peer ID is an arbitrary 20 byte string, advertised to trackers.
pub type PeerId = [u8; 20];

/// The default transfer chunk size in bytes.
///
/// Content is hashed and verified at this granularity. Interoperability
/// depends on both sides agreeing on it, so it is a fixed constant rather
/// than a guess.
pub const CHUNK_LEN: u32 = 1024;

/// Index of a chunk within a swarm's content.
pub type ChunkIndex = u64;

/// Handle assigned to every submitted command, used to poll for its
/// eventual result. Monotonically increasing, unique for the process
/// lifetime.
pub type CallId = u64;

/// A swarm's internal transfer descriptor, unique within one engine.
pub type TransferId = u32;

/// Bitmap of verified chunks.
pub type Bitfield = bitvec::prelude::BitVec<u8, bitvec::prelude::Msb0>;

/// Identifies one swarm: the root hash of its content.
///
/// Exchanged at the boundary as 40 hex digits. The all-zero value is a
/// reserved sentinel meaning "derive the identifier from the content".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwarmId(Sha1Hash);

impl SwarmId {
    /// The all-zero sentinel.
    pub const ZERO: SwarmId = SwarmId(ZERO_HASH);

    pub fn new(hash: Sha1Hash) -> Self {
        SwarmId(hash)
    }

    /// Parses an identifier from its boundary form, 40 hex digits.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut hash = ZERO_HASH;
        if s.len() != 2 * HASH_LEN {
            return None;
        }
        hex::decode_to_slice(s, &mut hash).ok()?;
        Some(SwarmId(hash))
    }

    /// The boundary form: lowercase hex text.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the "derive from content" sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_HASH
    }

    pub fn as_bytes(&self) -> &Sha1Hash {
        &self.0
    }
}

impl From<Sha1Hash> for SwarmId {
    fn from(hash: Sha1Hash) -> Self {
        SwarmId(hash)
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwarmId({})", self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swarm_id_hex_round_trip() {
        let id = SwarmId::new([0xab; 20]);
        assert_eq!(id.hex(), "ab".repeat(20));
        assert_eq!(SwarmId::from_hex(&id.hex()), Some(id));
    }

    #[test]
    fn test_swarm_id_rejects_malformed_hex() {
        assert_eq!(SwarmId::from_hex(""), None);
        assert_eq!(SwarmId::from_hex("abcd"), None);
        // right length, bad digit
        let mut s = "ab".repeat(20);
        s.replace_range(0..2, "zz");
        assert_eq!(SwarmId::from_hex(&s), None);
    }

    #[test]
    fn test_zero_sentinel() {
        assert!(SwarmId::ZERO.is_zero());
        assert!(SwarmId::from_hex(&"0".repeat(40)).unwrap().is_zero());
        assert!(!SwarmId::new([1; 20]).is_zero());
    }
}
