//! The Merkle hash tree that carries a static swarm's integrity state,
//! and its on-disk checkpoint form.
//!
//! Content is partitioned into fixed-size chunks (the last one may be
//! shorter and is hashed as-is). Leaf hashes are padded with
//! [`ZERO_HASH`] up to the next power of two and every interior node is
//! `sha1(left || right)` with no special cases, so an unmodified file
//! yields the same root across process restarts.
//!
//! A checkpoint is a pair of sidecar files next to the content file:
//! `<file>.mhash` holds the raw node array, `<file>.mbmap` a versioned
//! header plus the verified-chunk bitmap. A checkpoint that disagrees with
//! the file in any way is invalid as a whole; there is no partial trust.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::{Buf, BufMut};
use sha1::{Digest, Sha1};

use crate::error::hashtree::{CheckpointError, Result};
use crate::{Bitfield, ChunkIndex, Sha1Hash, HASH_LEN, ZERO_HASH};

/// Suffix of the sidecar file holding the serialized node array.
pub const HASH_SUFFIX: &str = "mhash";
/// Suffix of the sidecar file holding the header and verified bitmap.
pub const BITMAP_SUFFIX: &str = "mbmap";

const BITMAP_MAGIC: &[u8; 4] = b"SWCK";
/// Bumped whenever the checkpoint layout changes; loaders reject anything
/// newer than they understand.
const FORMAT_VERSION: u16 = 1;

/// Byte length of the fixed `.mbmap` header up to the bitmap payload.
const HEADER_LEN: usize = 4 + 2 + 4 + 8 + 8 + 4 + 8 + 8 + HASH_LEN + 4;

/// Returns the number of chunks content of the given size occupies.
pub fn chunk_count(size: u64, chunk_len: u32) -> u64 {
    // the last chunk may be shorter, so round up before dividing
    (size + (chunk_len as u64 - 1)) / chunk_len as u64
}

/// Returns the length of the chunk at the index in content of the given
/// size.
///
/// # Panics
///
/// Panics if the index multiplied by the chunk length would exceed the
/// content size.
pub fn chunk_len_at(size: u64, chunk_len: u32, index: ChunkIndex) -> u32 {
    let offset = index * chunk_len as u64;
    assert!(size > offset);
    std::cmp::min(size - offset, chunk_len as u64) as u32
}

/// The hash of one content chunk.
pub fn leaf_hash(data: &[u8]) -> Sha1Hash {
    Sha1::digest(data).into()
}

/// The hash of an interior node over its two children.
pub fn pair_hash(left: &Sha1Hash, right: &Sha1Hash) -> Sha1Hash {
    let mut hasher = Sha1::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// A swarm's hash tree plus the bitmap of chunks whose data has been
/// verified against it.
#[derive(Debug, Clone)]
pub struct HashTree {
    chunk_len: u32,
    /// Content length in bytes.
    size: u64,
    chunk_count: u64,
    /// Width of the padded leaf layer, `chunk_count` rounded up to a
    /// power of two.
    leaf_width: u64,
    /// The full binary tree in heap order: root at 0, children of `i` at
    /// `2i + 1` and `2i + 2`, leaves in the last `leaf_width` slots.
    nodes: Vec<Sha1Hash>,
    /// One bit per content chunk.
    verified: Bitfield,
    /// Verified bytes.
    complete: u64,
    /// Verified chunks.
    completec: u64,
}

impl HashTree {
    /// Creates an empty tree for content of the given size. All nodes
    /// start as [`ZERO_HASH`] and nothing is verified.
    pub fn new(size: u64, chunk_len: u32) -> Self {
        let chunk_count = chunk_count(size, chunk_len);
        let leaf_width = chunk_count.next_power_of_two().max(1);
        HashTree {
            chunk_len,
            size,
            chunk_count,
            leaf_width,
            nodes: vec![ZERO_HASH; (2 * leaf_width - 1) as usize],
            verified: Bitfield::repeat(false, chunk_count as usize),
            complete: 0,
            completec: 0,
        }
    }

    pub fn chunk_len(&self) -> u32 {
        self.chunk_len
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// The root hash. Meaningful once all leaves are in place and
    /// [`build_interior`](Self::build_interior) has run.
    pub fn root(&self) -> Sha1Hash {
        self.nodes[0]
    }

    /// Verified bytes.
    pub fn complete_bytes(&self) -> u64 {
        self.complete
    }

    /// Verified chunks.
    pub fn complete_chunks(&self) -> u64 {
        self.completec
    }

    pub fn is_complete(&self) -> bool {
        self.completec == self.chunk_count
    }

    /// Bytes verified in sequence from offset zero, the figure a
    /// streaming gateway client cares about.
    pub fn seq_complete(&self) -> u64 {
        match self.verified.iter_zeros().next() {
            None => self.size,
            Some(first_gap) => first_gap as u64 * self.chunk_len as u64,
        }
    }

    pub fn is_verified(&self, index: ChunkIndex) -> bool {
        self.verified
            .get(index as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }

    fn leaf_slot(&self, index: ChunkIndex) -> usize {
        (self.leaf_width - 1 + index) as usize
    }

    /// Places a leaf hash. Used while building; does not touch the
    /// verified bitmap.
    pub fn set_leaf(&mut self, index: ChunkIndex, hash: Sha1Hash) {
        let slot = self.leaf_slot(index);
        self.nodes[slot] = hash;
    }

    pub fn leaf(&self, index: ChunkIndex) -> Sha1Hash {
        self.nodes[self.leaf_slot(index)]
    }

    /// Recomputes every interior node from the leaf layer, bottom up.
    pub fn build_interior(&mut self) {
        for i in (0..self.leaf_width - 1).rev() {
            let i = i as usize;
            self.nodes[i] = pair_hash(&self.nodes[2 * i + 1], &self.nodes[2 * i + 2]);
        }
    }

    /// Marks a chunk verified and updates the progress counters. Setting
    /// an already-verified chunk is a no-op.
    pub fn mark_verified(&mut self, index: ChunkIndex) {
        if !self.is_verified(index) {
            self.verified.set(index as usize, true);
            self.complete += chunk_len_at(self.size, self.chunk_len, index) as u64;
            self.completec += 1;
        }
    }

    /// Marks every chunk verified, the checkpoint fast path.
    pub fn mark_all_verified(&mut self) {
        self.verified.fill(true);
        self.complete = self.size;
        self.completec = self.chunk_count;
    }

    /// Checks chunk data against the stored leaf hash.
    ///
    /// On a match the chunk is marked verified. On a mismatch only this
    /// chunk's verified bit is cleared; sibling state is untouched.
    pub fn verify_chunk(&mut self, index: ChunkIndex, data: &[u8]) -> bool {
        if leaf_hash(data) == self.leaf(index) {
            self.mark_verified(index);
            true
        } else {
            if self.is_verified(index) {
                self.verified.set(index as usize, false);
                self.complete -= chunk_len_at(self.size, self.chunk_len, index) as u64;
                self.completec -= 1;
            }
            false
        }
    }

    /// Computes the full tree for a file by reading it start to end.
    ///
    /// Deterministic: repeated calls on an unmodified file yield an
    /// identical root. The engine prefers the incremental [`TreeBuilder`];
    /// this is the one-shot form.
    pub fn build_from_file(path: &Path, chunk_len: u32) -> std::io::Result<HashTree> {
        let size = fs::metadata(path)?.len();
        let mut builder = TreeBuilder::new(size, chunk_len);
        let mut file = fs::File::open(path)?;
        let mut buf = vec![0u8; chunk_len as usize];
        while !builder.is_done() {
            let want = chunk_len_at(size, chunk_len, builder.next_chunk()) as usize;
            file.read_exact(&mut buf[..want])?;
            builder.add_chunk(&buf[..want]);
        }
        Ok(builder.finish())
    }

    /// The sidecar paths for a content file, fixed naming convention.
    pub fn checkpoint_paths(content_path: &Path) -> (PathBuf, PathBuf) {
        let mut hash_path = content_path.as_os_str().to_owned();
        hash_path.push(".");
        hash_path.push(HASH_SUFFIX);
        let mut bitmap_path = content_path.as_os_str().to_owned();
        bitmap_path.push(".");
        bitmap_path.push(BITMAP_SUFFIX);
        (hash_path.into(), bitmap_path.into())
    }

    /// Persists the tree and verified bitmap next to the content file.
    pub fn save_checkpoint(&self, content_path: &Path) -> Result<()> {
        let (hash_path, bitmap_path) = Self::checkpoint_paths(content_path);

        let meta = fs::metadata(content_path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut nodes = Vec::with_capacity(self.nodes.len() * HASH_LEN);
        for hash in &self.nodes {
            nodes.put_slice(hash);
        }

        let bitmap = self.verified.as_raw_slice();
        let mut header = Vec::with_capacity(HEADER_LEN + bitmap.len());
        header.put_slice(BITMAP_MAGIC);
        header.put_u16_le(FORMAT_VERSION);
        header.put_u32_le(self.chunk_len);
        header.put_u64_le(self.size);
        header.put_u64_le(mtime.as_secs());
        header.put_u32_le(mtime.subsec_nanos());
        header.put_u64_le(self.complete);
        header.put_u64_le(self.completec);
        header.put_slice(&self.nodes[0]);
        header.put_u32_le(bitmap.len() as u32);
        header.put_slice(bitmap);

        fs::write(hash_path, nodes)?;
        fs::write(bitmap_path, header)?;
        Ok(())
    }

    /// Reads a checkpoint back, validating it against the content file's
    /// current state.
    ///
    /// `expected_root` is the id the caller wants this content to have;
    /// pass `None` when any root is acceptable (the zero-id open). Every
    /// failure invalidates the checkpoint as a whole; the caller removes
    /// the sidecars and rebuilds from content.
    pub fn load_checkpoint(
        content_path: &Path,
        expected_root: Option<&Sha1Hash>,
        chunk_len: u32,
    ) -> Result<HashTree> {
        let (hash_path, bitmap_path) = Self::checkpoint_paths(content_path);
        if !hash_path.exists() || !bitmap_path.exists() {
            return Err(CheckpointError::Missing);
        }

        let header = fs::read(bitmap_path)?;
        if header.len() < HEADER_LEN {
            return Err(CheckpointError::Truncated);
        }
        let mut buf = header.as_slice();
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != BITMAP_MAGIC {
            return Err(CheckpointError::BadMagic);
        }
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(CheckpointError::BadVersion(version));
        }
        if buf.get_u32_le() != chunk_len {
            return Err(CheckpointError::ChunkSizeMismatch);
        }
        let size = buf.get_u64_le();
        let mtime_secs = buf.get_u64_le();
        let mtime_nanos = buf.get_u32_le();
        let complete = buf.get_u64_le();
        let completec = buf.get_u64_le();
        let mut root = ZERO_HASH;
        buf.copy_to_slice(&mut root);
        let bitmap_len = buf.get_u32_le() as usize;
        if buf.remaining() < bitmap_len {
            return Err(CheckpointError::Truncated);
        }

        // the checkpoint speaks for one exact file state: length first,
        // then the modification stamp taken at checkpoint time
        let meta = fs::metadata(content_path)?;
        if meta.len() != size {
            return Err(CheckpointError::SizeMismatch);
        }
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        if mtime.as_secs() != mtime_secs || mtime.subsec_nanos() != mtime_nanos {
            return Err(CheckpointError::Modified);
        }

        let mut tree = HashTree::new(size, chunk_len);
        if bitmap_len != tree.verified.as_raw_slice().len() {
            return Err(CheckpointError::Truncated);
        }
        tree.verified = Bitfield::from_slice(&buf[..bitmap_len]);
        tree.verified.truncate(tree.chunk_count as usize);

        let nodes = fs::read(hash_path)?;
        if nodes.len() != tree.nodes.len() * HASH_LEN {
            return Err(CheckpointError::Truncated);
        }
        for (slot, raw) in tree.nodes.iter_mut().zip(nodes.chunks_exact(HASH_LEN)) {
            slot.copy_from_slice(raw);
        }

        // the interior must reduce from the stored leaves to the stored
        // root; a stray node anywhere shows up as a root mismatch
        let stored = tree.nodes.clone();
        tree.build_interior();
        if tree.nodes != stored || tree.root() != root {
            return Err(CheckpointError::RootMismatch);
        }
        if let Some(expected) = expected_root {
            if &tree.root() != expected {
                return Err(CheckpointError::RootMismatch);
            }
        }

        // counters must agree with the bitmap they were saved with
        tree.complete = 0;
        tree.completec = 0;
        let set: Vec<usize> = tree.verified.iter_ones().collect();
        for index in set {
            tree.complete += chunk_len_at(size, chunk_len, index as u64) as u64;
            tree.completec += 1;
        }
        if tree.complete != complete || tree.completec != completec {
            return Err(CheckpointError::CounterMismatch);
        }

        Ok(tree)
    }

    /// Removes a checkpoint's sidecar files. Missing files are fine; this
    /// is called exactly when the checkpoint is not to be trusted.
    pub fn invalidate_checkpoint(content_path: &Path) {
        let (hash_path, bitmap_path) = Self::checkpoint_paths(content_path);
        let _ = fs::remove_file(hash_path);
        let _ = fs::remove_file(bitmap_path);
    }
}

/// Builds a [`HashTree`] leaf by leaf so the engine loop can spread the
/// hashing of a large file over many ticks.
#[derive(Debug)]
pub struct TreeBuilder {
    tree: HashTree,
    next: ChunkIndex,
}

impl TreeBuilder {
    pub fn new(size: u64, chunk_len: u32) -> Self {
        TreeBuilder {
            tree: HashTree::new(size, chunk_len),
            next: 0,
        }
    }

    /// The index of the chunk [`add_chunk`](Self::add_chunk) expects next.
    pub fn next_chunk(&self) -> ChunkIndex {
        self.next
    }

    pub fn is_done(&self) -> bool {
        self.next == self.tree.chunk_count()
    }

    /// Hashes the next chunk's data into its leaf slot.
    pub fn add_chunk(&mut self, data: &[u8]) {
        debug_assert!(!self.is_done());
        let index = self.next;
        self.tree.set_leaf(index, leaf_hash(data));
        self.next += 1;
    }

    /// Reduces the finished leaf layer to a root and marks everything
    /// verified; we hashed the content ourselves.
    pub fn finish(mut self) -> HashTree {
        debug_assert!(self.is_done());
        self.tree.build_interior();
        self.tree.mark_all_verified();
        self.tree
    }
}
