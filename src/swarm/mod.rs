//! One swarm's session state and its lifecycle state machine.
//!
//! `Created → Verifying → {Ready, Failed}`; `Ready → Seeding | Downloading
//! → Closed`. `Failed` and `Closed` are terminal. Only the three active
//! states accept live appends or network work; everything else is
//! rejected with an invalid-state error. Sessions are owned exclusively
//! by the store and touched only from the engine loop.

use std::path::Path;
use std::time::Instant;

use url::Url;

use crate::conf::SwarmConf;
use crate::counter::ChannelCounters;
use crate::error::hashtree::CheckpointError;
use crate::error::live::LiveError;
use crate::error::swarm::{Result, SwarmError};
use crate::hashtree::{chunk_len_at, HashTree, TreeBuilder};
use crate::live::LiveSource;
use crate::swarm::file::ContentFile;
use crate::swarm::stats::{ProgressSnapshot, StatsSnapshot};
use crate::{CallId, Sha1Hash, SwarmId, TransferId};

pub mod file;
pub mod stats;

/// The lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    /// Content is being hashed against the tree, a slice per tick.
    Verifying,
    /// Verification settled; about to pick a transfer direction.
    Ready,
    Seeding,
    Downloading,
    /// Terminal: content did not match the requested identifier.
    Failed,
    /// Terminal: resources released, checkpoint flushed.
    Closed,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Created => "created",
            State::Verifying => "verifying",
            State::Ready => "ready",
            State::Seeding => "seeding",
            State::Downloading => "downloading",
            State::Failed => "failed",
            State::Closed => "closed",
        }
    }

    /// Whether the state accepts appends and network work.
    pub fn is_active(&self) -> bool {
        matches!(self, State::Ready | State::Seeding | State::Downloading)
    }
}

/// Whether the session ended up offering or fetching content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Seed,
    Download,
}

/// What an open resolved to.
#[derive(Debug)]
pub enum OpenOutcome {
    /// The identifier is already settled; the result can complete now.
    Ready(SwarmId),
    /// Hashing is in progress; the result completes on a later tick.
    Verifying,
}

/// A static session's integrity state.
#[derive(Debug)]
struct StaticContent {
    /// Present once verification settled or a checkpoint was accepted.
    /// Absent for an empty download target whose size is still unknown.
    tree: Option<HashTree>,
    /// Present while the session is `Verifying`.
    builder: Option<TreeBuilder>,
    /// The root the content must hash to, when the caller named one.
    check_against: Option<Sha1Hash>,
}

#[derive(Debug)]
enum Content {
    Static(StaticContent),
    Live(LiveSource),
}

/// One content swarm's state, owned by the store.
#[derive(Debug)]
pub struct SwarmSession {
    pub td: TransferId,
    id: SwarmId,
    tracker: Option<Url>,
    state: State,
    mode: Mode,
    file: ContentFile,
    content: Content,
    chunk_len: u32,
    /// Byte counters backing the stats query.
    pub counters: ChannelCounters,
    /// Peer counts from the last tracker announce.
    pub seeders: u32,
    pub leechers: u32,
    /// The open command waiting for this session's identifier, if its
    /// verification is still running.
    pub open_call: Option<CallId>,
    /// When the session last announced to its tracker.
    pub last_announce: Option<Instant>,
}

impl SwarmSession {
    /// Opens a static swarm session.
    ///
    /// Resolution order: a valid checkpoint short-circuits hashing
    /// entirely; otherwise existing content is queued for incremental
    /// verification; an empty or absent file with a known identifier
    /// becomes a download target. An empty file with the zero identifier
    /// is refused since there is nothing to derive the identifier from.
    pub fn open(
        td: TransferId,
        id: SwarmId,
        tracker: Option<Url>,
        path: &Path,
        conf: &SwarmConf,
    ) -> Result<(Self, OpenOutcome)> {
        let expected = (!id.is_zero()).then(|| *id.as_bytes());

        if !path.exists() && id.is_zero() {
            return Err(SwarmError::EmptyFile);
        }
        let file = ContentFile::open(path)?;

        let mut session = SwarmSession {
            td,
            id,
            tracker,
            state: State::Created,
            mode: Mode::Download,
            file,
            content: Content::Static(StaticContent {
                tree: None,
                builder: None,
                check_against: expected,
            }),
            chunk_len: conf.chunk_len,
            counters: ChannelCounters::new(),
            seeders: 0,
            leechers: 0,
            open_call: None,
            last_announce: None,
        };

        if session.file.is_empty() {
            if id.is_zero() {
                return Err(SwarmError::EmptyFile);
            }
            // nothing local yet; await content from the swarm
            session.state = State::Ready;
            session.promote();
            return Ok((session, OpenOutcome::Ready(id)));
        }

        match HashTree::load_checkpoint(path, expected.as_ref(), conf.chunk_len) {
            Ok(tree) => {
                // fast path: trust the checkpoint, skip hashing
                log::info!("swarm {}: restored from checkpoint", tree_id(&tree));
                let root = SwarmId::from(tree.root());
                session.id = root;
                session.set_tree(tree);
                session.state = State::Ready;
                session.promote();
                Ok((session, OpenOutcome::Ready(root)))
            }
            Err(e) => {
                if !matches!(e, CheckpointError::Missing) {
                    log::warn!("swarm: discarding checkpoint for {:?}: {}", path, e);
                    HashTree::invalidate_checkpoint(path);
                }
                let size = session.file.len();
                session.set_builder(TreeBuilder::new(size, conf.chunk_len));
                session.state = State::Verifying;
                Ok((session, OpenOutcome::Verifying))
            }
        }
    }

    /// Creates a live swarm session anchored at the given identifier.
    pub fn create_live(td: TransferId, id: SwarmId, path: &Path) -> Result<Self> {
        let file = ContentFile::open(path)?;
        let mut session = SwarmSession {
            td,
            id,
            tracker: None,
            state: State::Ready,
            mode: Mode::Seed,
            file,
            content: Content::Live(LiveSource::new(*id.as_bytes())),
            chunk_len: crate::CHUNK_LEN,
            counters: ChannelCounters::new(),
            seeders: 0,
            leechers: 0,
            open_call: None,
            last_announce: None,
        };
        // a live source always offers, never fetches
        session.state = State::Seeding;
        Ok(session)
    }

    pub fn id(&self) -> SwarmId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn tracker(&self) -> Option<&Url> {
        self.tracker.as_ref()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_live(&self) -> bool {
        matches!(self.content, Content::Live(_))
    }

    fn set_tree(&mut self, tree: HashTree) {
        if let Content::Static(sc) = &mut self.content {
            sc.tree = Some(tree);
        }
    }

    fn set_builder(&mut self, builder: TreeBuilder) {
        if let Content::Static(sc) = &mut self.content {
            sc.builder = Some(builder);
        }
    }

    /// Leaves `Ready` for the transfer state the content dictates:
    /// complete content seeds, anything else downloads.
    fn promote(&mut self) {
        debug_assert_eq!(self.state, State::Ready);
        let complete = match &self.content {
            Content::Live(_) => true,
            Content::Static(sc) => sc.tree.as_ref().map(|t| t.is_complete()).unwrap_or(false),
        };
        self.mode = if complete { Mode::Seed } else { Mode::Download };
        self.state = if complete {
            State::Seeding
        } else {
            State::Downloading
        };
    }

    /// Advances verification by at most `max_chunks` chunks.
    ///
    /// Returns `None` while there is nothing to conclude, `Some(Ok(id))`
    /// once the session settled on its identifier, and `Some(Err(_))`
    /// when verification failed. Errors here affect only this session.
    pub fn tick_verify(&mut self, max_chunks: u32) -> Option<Result<SwarmId>> {
        if self.state != State::Verifying {
            return None;
        }
        let Content::Static(sc) = &mut self.content else {
            return None;
        };
        let builder = sc.builder.as_mut()?;

        let size = self.file.len();
        let mut failure = None;
        for _ in 0..max_chunks {
            if builder.is_done() {
                break;
            }
            let index = builder.next_chunk();
            let want = chunk_len_at(size, self.chunk_len, index) as usize;
            let offset = index * self.chunk_len as u64;
            match self.file.read_at(offset, want) {
                Ok(data) => builder.add_chunk(&data),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            self.state = State::Failed;
            sc.builder = None;
            return Some(Err(e.into()));
        }
        if !sc.builder.as_ref().map(TreeBuilder::is_done).unwrap_or(false) {
            return None;
        }

        let tree = sc.builder.take().map(TreeBuilder::finish)?;
        let computed = SwarmId::from(tree.root());
        if let Some(expected) = sc.check_against {
            if tree.root() != expected {
                log::warn!(
                    "swarm: content at {:?} hashes to {}, wanted {}",
                    self.file.path(),
                    computed,
                    SwarmId::from(expected)
                );
                self.state = State::Failed;
                return Some(Err(SwarmError::HashMismatch {
                    expected: SwarmId::from(expected),
                    computed,
                }));
            }
        }

        self.id = computed;
        if let Err(e) = self.file.sync().map_err(SwarmError::from).and_then(|_| {
            tree.save_checkpoint(self.file.path())
                .map_err(SwarmError::from)
        }) {
            // progress is only lost on restart, the session itself is fine
            log::warn!("swarm {}: cannot write checkpoint: {}", computed, e);
        }
        sc.tree = Some(tree);
        self.state = State::Ready;
        self.promote();
        log::info!("swarm {}: verified, now {}", computed, self.state.name());
        Some(Ok(computed))
    }

    /// Appends the next unit of a live stream.
    pub fn live_append(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.state.is_active() {
            return Err(SwarmError::InvalidState(self.state.name()));
        }
        let Content::Live(src) = &mut self.content else {
            return Err(SwarmError::NotLive);
        };

        // validate before touching the file so a rejected append leaves
        // both the chain and the content bytes untouched
        if data.is_empty() {
            return Err(LiveError::Empty.into());
        }
        let expected = src.next_offset();
        if offset != expected {
            return Err(LiveError::OutOfOrder {
                expected,
                got: offset,
            }
            .into());
        }

        self.file.write_at(offset, data)?;
        src.append(offset, data)?;
        self.counters.content_down.record(data.len() as u64);
        Ok(())
    }

    /// The `written/total` snapshot. Live swarms report `0/0`, the
    /// unbounded signal.
    pub fn http_progress(&self) -> ProgressSnapshot {
        match &self.content {
            Content::Live(_) => ProgressSnapshot {
                written: 0,
                total: 0,
            },
            Content::Static(sc) => match &sc.tree {
                Some(tree) => ProgressSnapshot {
                    written: tree.seq_complete(),
                    total: tree.size(),
                },
                None => ProgressSnapshot {
                    written: 0,
                    total: 0,
                },
            },
        }
    }

    /// The six-field stats snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::from_counters(&self.counters, self.leechers, self.seeders)
    }

    /// The progress triple a tracker announce reports.
    pub fn announce_progress(&self) -> (u64, u64, u64) {
        let (downloaded, left) = match &self.content {
            Content::Live(src) => (src.next_offset(), 0),
            Content::Static(sc) => match &sc.tree {
                Some(tree) => (tree.complete_bytes(), tree.size() - tree.complete_bytes()),
                None => (0, 0),
            },
        };
        (downloaded, self.counters.content_up.total(), left)
    }

    /// Closes the session: flushes the checkpoint for settled static
    /// content and enters the terminal state. Closing a closed session is
    /// a no-op.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        if self.state != State::Failed {
            if let Content::Static(sc) = &self.content {
                if let Some(tree) = &sc.tree {
                    if let Err(e) = self
                        .file
                        .sync()
                        .map_err(SwarmError::from)
                        .and_then(|_| tree.save_checkpoint(self.file.path()).map_err(Into::into))
                    {
                        log::warn!("swarm {}: checkpoint flush on close failed: {}", self.id, e);
                    }
                }
            }
        }
        log::info!("swarm {}: closed", self.id);
        self.state = State::Closed;
    }
}

fn tree_id(tree: &HashTree) -> SwarmId {
    SwarmId::from(tree.root())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;

    fn conf() -> SwarmConf {
        SwarmConf::default()
    }

    fn write_content(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    /// Drives verification to its conclusion, as the engine tick would.
    fn drive(session: &mut SwarmSession) -> Result<SwarmId> {
        loop {
            if let Some(outcome) = session.tick_verify(64) {
                return outcome;
            }
        }
    }

    #[test]
    fn test_zero_id_open_derives_root_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![0xabu8; 3 * 1024 + 50];
        let path = write_content(&dir, "a.bin", &data);

        let (mut session, outcome) =
            SwarmSession::open(1, SwarmId::ZERO, None, &path, &conf()).unwrap();
        assert!(matches!(outcome, OpenOutcome::Verifying));
        assert_eq!(session.state(), State::Verifying);

        let id = drive(&mut session).unwrap();
        let independent = HashTree::build_from_file(&path, conf().chunk_len).unwrap();
        assert_eq!(id, SwarmId::from(independent.root()));
        assert_eq!(session.state(), State::Seeding);
        assert_eq!(session.mode(), Mode::Seed);
    }

    #[test]
    fn test_open_with_wrong_id_fails_with_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_content(&dir, "a.bin", &[1u8; 2048]);

        let wrong = SwarmId::new([0x77; 20]);
        let (mut session, outcome) =
            SwarmSession::open(1, wrong, None, &path, &conf()).unwrap();
        assert!(matches!(outcome, OpenOutcome::Verifying));

        match drive(&mut session) {
            Err(SwarmError::HashMismatch { expected, .. }) => assert_eq!(expected, wrong),
            other => panic!("expected HashMismatch, got {other:?}"),
        }
        assert_eq!(session.state(), State::Failed);
    }

    #[test]
    fn test_reopen_uses_checkpoint_fast_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_content(&dir, "a.bin", &[9u8; 8 * 1024]);

        let (mut first, _) = SwarmSession::open(1, SwarmId::ZERO, None, &path, &conf()).unwrap();
        let id = drive(&mut first).unwrap();
        first.close();

        // second open must resolve without any tick_verify driving
        let (second, outcome) = SwarmSession::open(2, id, None, &path, &conf()).unwrap();
        match outcome {
            OpenOutcome::Ready(ready_id) => assert_eq!(ready_id, id),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(second.state(), State::Seeding);
        assert_eq!(second.http_progress().written, 8 * 1024);
    }

    #[test]
    fn test_open_missing_file_with_zero_id_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        match SwarmSession::open(1, SwarmId::ZERO, None, &path, &conf()) {
            Err(SwarmError::EmptyFile) => {}
            other => panic!("expected EmptyFile, got {other:?}"),
        }
        // the refused open must not leave a file behind
        assert!(!path.exists());
    }

    #[test]
    fn test_open_missing_file_with_known_id_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incoming.bin");
        let id = SwarmId::new([0x55; 20]);

        let (session, outcome) = SwarmSession::open(1, id, None, &path, &conf()).unwrap();
        match outcome {
            OpenOutcome::Ready(ready_id) => assert_eq!(ready_id, id),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(session.state(), State::Downloading);
        assert_eq!(session.http_progress().to_string(), "0/0");
    }

    #[test]
    fn test_live_session_appends_and_reports_unbounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.dat");
        let id = SwarmId::new([0x66; 20]);

        let mut session = SwarmSession::create_live(1, id, &path).unwrap();
        assert_eq!(session.state(), State::Seeding);
        assert!(session.is_live());

        session.live_append(0, &[1u8; 1024]).unwrap();
        session.live_append(1024, &[2u8; 1024]).unwrap();
        match session.live_append(0, &[1u8; 1024]) {
            Err(SwarmError::Live(LiveError::OutOfOrder { expected, got })) => {
                assert_eq!(expected, 2048);
                assert_eq!(got, 0);
            }
            other => panic!("expected OutOfOrder, got {other:?}"),
        }

        assert_eq!(session.http_progress().to_string(), "0/0");
        assert_eq!(fs::metadata(&path).unwrap().len(), 2048);
    }

    #[test]
    fn test_live_append_on_static_session_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_content(&dir, "a.bin", &[1u8; 1024]);
        let (mut session, _) = SwarmSession::open(1, SwarmId::ZERO, None, &path, &conf()).unwrap();
        drive(&mut session).unwrap();

        match session.live_append(0, b"data") {
            Err(SwarmError::NotLive) => {}
            other => panic!("expected NotLive, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_session_rejects_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.dat");
        let mut session = SwarmSession::create_live(1, SwarmId::new([3; 20]), &path).unwrap();
        session.close();
        session.close(); // no-op

        match session.live_append(0, b"data") {
            Err(SwarmError::InvalidState("closed")) => {}
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }
}
