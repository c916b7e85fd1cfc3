//! Live swarm source state.
//!
//! A live swarm has no fixed size and no tree: integrity is a hash chain.
//! Every appended unit is hashed and folded into the chain head with
//! `chain' = sha1(chain || sha1(unit))`, anchored at the swarm id supplied
//! when the source was created. A unit can therefore only be validated
//! once its predecessor is known, which is why appends are accepted
//! strictly in offset order.
//!
//! Live data is transient by design: no checkpoint is ever persisted and
//! progress reports use `0/0` ("unbounded") semantics.

use crate::error::live::{LiveError, Result};
use crate::hashtree::{leaf_hash, pair_hash};
use crate::Sha1Hash;

#[derive(Debug)]
pub struct LiveSource {
    /// The chain anchor, the swarm's identifier.
    anchor: Sha1Hash,
    /// Current chain head, covering every accepted unit.
    chain: Sha1Hash,
    /// The byte offset the next append must carry.
    next_offset: u64,
    /// Accepted units so far.
    units: u64,
}

impl LiveSource {
    pub fn new(anchor: Sha1Hash) -> Self {
        LiveSource {
            anchor,
            chain: anchor,
            next_offset: 0,
            units: 0,
        }
    }

    pub fn anchor(&self) -> &Sha1Hash {
        &self.anchor
    }

    /// The current chain head.
    pub fn chain(&self) -> &Sha1Hash {
        &self.chain
    }

    /// The offset at which the next unit must start.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    /// Accepts the next unit of the stream.
    ///
    /// `offset` must equal [`next_offset`](Self::next_offset); anything
    /// else is rejected with [`LiveError::OutOfOrder`] and the accepted
    /// state is left exactly as it was.
    pub fn append(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(LiveError::Empty);
        }
        if offset != self.next_offset {
            return Err(LiveError::OutOfOrder {
                expected: self.next_offset,
                got: offset,
            });
        }
        self.chain = pair_hash(&self.chain, &leaf_hash(data));
        self.next_offset += data.len() as u64;
        self.units += 1;
        Ok(())
    }
}
