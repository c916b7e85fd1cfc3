//! The swarm store: owns every open session and its lifecycle.
//!
//! Sessions are keyed by a small transfer descriptor handed out at open
//! time, with a side index from swarm identifier. The indirection exists
//! because a zero-identifier open has no identifier until its content is
//! hashed; the descriptor gives it a home in the meantime.

use std::collections::HashMap;
use std::path::Path;

use url::Url;

use crate::conf::SwarmConf;
use crate::error::swarm::{Result, SwarmError};
use crate::swarm::{OpenOutcome, SwarmSession};
use crate::{SwarmId, TransferId};

#[derive(Debug)]
pub struct SwarmStore {
    sessions: HashMap<TransferId, SwarmSession>,
    by_id: HashMap<SwarmId, TransferId>,
    next_td: TransferId,
    conf: SwarmConf,
}

impl SwarmStore {
    pub fn new(conf: SwarmConf) -> Self {
        SwarmStore {
            sessions: HashMap::new(),
            by_id: HashMap::new(),
            next_td: 1,
            conf,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn alloc_td(&mut self) -> TransferId {
        let td = self.next_td;
        self.next_td += 1;
        td
    }

    /// Opens a static swarm, or returns the existing session when the
    /// identifier is already open.
    pub fn open(
        &mut self,
        id: SwarmId,
        tracker: Option<Url>,
        path: &Path,
    ) -> Result<(TransferId, OpenOutcome)> {
        if !id.is_zero() {
            if let Some(&td) = self.by_id.get(&id) {
                log::info!("swarm {}: already open as transfer {}", id, td);
                return Ok((td, OpenOutcome::Ready(id)));
            }
        }

        let td = self.alloc_td();
        let (session, outcome) = SwarmSession::open(td, id, tracker, path, &self.conf)?;
        if let OpenOutcome::Ready(ready_id) = &outcome {
            self.by_id.insert(*ready_id, td);
        } else if !id.is_zero() {
            // addressable by the requested identifier while hashing runs
            self.by_id.insert(id, td);
        }
        self.sessions.insert(td, session);
        Ok((td, outcome))
    }

    /// Creates a live swarm, or returns the existing session for the
    /// identifier.
    pub fn live_create(&mut self, id: SwarmId, path: &Path) -> Result<TransferId> {
        if let Some(&td) = self.by_id.get(&id) {
            log::info!("live swarm {}: already open as transfer {}", id, td);
            return Ok(td);
        }
        let td = self.alloc_td();
        let session = SwarmSession::create_live(td, id, path)?;
        self.by_id.insert(id, td);
        self.sessions.insert(td, session);
        Ok(td)
    }

    /// Registers the identifier a zero-id open settled on.
    pub fn register_id(&mut self, td: TransferId, id: SwarmId) {
        if let Some(&existing) = self.by_id.get(&id) {
            if existing != td {
                // same content opened twice before either settled; the
                // first keeps the identifier, the second stays reachable
                // by descriptor only
                log::warn!(
                    "swarm {}: already indexed to transfer {}, keeping it",
                    id,
                    existing
                );
                return;
            }
        }
        self.by_id.insert(id, td);
    }

    pub fn lookup(&self, id: &SwarmId) -> Result<&SwarmSession> {
        self.by_id
            .get(id)
            .and_then(|td| self.sessions.get(td))
            .ok_or(SwarmError::NotFound)
    }

    pub fn lookup_mut(&mut self, id: &SwarmId) -> Result<&mut SwarmSession> {
        let td = *self.by_id.get(id).ok_or(SwarmError::NotFound)?;
        self.sessions.get_mut(&td).ok_or(SwarmError::NotFound)
    }

    pub fn get_mut(&mut self, td: TransferId) -> Option<&mut SwarmSession> {
        self.sessions.get_mut(&td)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SwarmSession> + '_ {
        self.sessions.values_mut()
    }

    /// Closes and removes the session for an identifier. Closing an
    /// unknown identifier is a no-op, which makes double-close harmless.
    pub fn close(&mut self, id: &SwarmId) -> bool {
        match self.by_id.remove(id) {
            Some(td) => {
                if let Some(mut session) = self.sessions.remove(&td) {
                    session.close();
                }
                true
            }
            None => false,
        }
    }

    /// Closes every session, flushing checkpoints. Engine shutdown path.
    pub fn close_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
        self.by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::swarm::State;

    fn store() -> SwarmStore {
        SwarmStore::new(SwarmConf::default())
    }

    fn settle(store: &mut SwarmStore, td: TransferId) -> SwarmId {
        loop {
            let session = store.get_mut(td).unwrap();
            if let Some(outcome) = session.tick_verify(256) {
                let id = outcome.unwrap();
                store.register_id(td, id);
                return id;
            }
        }
    }

    #[test]
    fn test_open_close_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, vec![1u8; 4096]).unwrap();

        let mut store = store();
        let (td, outcome) = store.open(SwarmId::ZERO, None, &path).unwrap();
        assert!(matches!(outcome, OpenOutcome::Verifying));
        let id = settle(&mut store, td);

        assert_eq!(store.lookup(&id).unwrap().td, td);
        assert!(store.close(&id));
        assert!(matches!(store.lookup(&id), Err(SwarmError::NotFound)));
        // double close is a no-op
        assert!(!store.close(&id));
    }

    #[test]
    fn test_open_same_id_twice_returns_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, vec![2u8; 2048]).unwrap();

        let mut store = store();
        let (td, _) = store.open(SwarmId::ZERO, None, &path).unwrap();
        let id = settle(&mut store, td);

        let (second_td, outcome) = store.open(id, None, &path).unwrap();
        assert_eq!(second_td, td);
        assert!(matches!(outcome, OpenOutcome::Ready(ready) if ready == id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_id_is_not_found() {
        let store = store();
        assert!(matches!(
            store.lookup(&SwarmId::new([9; 20])),
            Err(SwarmError::NotFound)
        ));
    }

    #[test]
    fn test_verifying_session_reachable_by_requested_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, vec![3u8; 8 * 1024]).unwrap();

        let mut store = store();
        let wanted = SwarmId::new([0x10; 20]);
        let (_td, outcome) = store.open(wanted, None, &path).unwrap();
        assert!(matches!(outcome, OpenOutcome::Verifying));
        assert_eq!(store.lookup(&wanted).unwrap().state(), State::Verifying);
    }

    #[test]
    fn test_close_all_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        fs::write(&a, vec![1u8; 1024]).unwrap();
        let mut store = store();
        let (td, _) = store.open(SwarmId::ZERO, None, &a).unwrap();
        settle(&mut store, td);
        store
            .live_create(SwarmId::new([7; 20]), &dir.path().join("live.dat"))
            .unwrap();

        assert_eq!(store.len(), 2);
        store.close_all();
        assert!(store.is_empty());
    }
}
