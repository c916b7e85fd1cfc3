//! The engine loop: one logical thread of control that owns every swarm.
//!
//! All engine state is touched only from [`Engine::run`]. External
//! callers reach it exclusively through the [`CommandBus`]: commands are
//! drained in submission order once per tick, each tick then advances
//! verification a slice per swarm, drains pending datagrams and tracker
//! responses, and refreshes the counters behind the progress queries.
//! An error in one swarm never aborts processing of the others.
//!
//! Tracker announces run as short-lived spawned tasks; their results come
//! back over a channel the tick drains, so sessions are still only ever
//! mutated from the loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task;
use url::Url;

use crate::bus::CommandBus;
use crate::conf::Conf;
use crate::counter::ChannelCounters;
use crate::error::engine::Result as EngineResult;
use crate::error::swarm::{Result as SwarmResult, SwarmError};
use crate::error::tracker::Result as TrackerResult;
use crate::store::SwarmStore;
use crate::swarm::{OpenOutcome, State};
use crate::tracker::announce::{Announce, Event};
use crate::tracker::response::Response;
use crate::tracker::tracker::Tracker;
use crate::{CallId, SwarmId, TransferId};

/// The bus this engine drains. Callers hold a clone of the `Arc`.
pub type Bus = CommandBus<Command>;

/// Result string for commands that succeed without a value to report.
pub const RESULT_OK: &str = "ok";
/// Result string for the shutdown command.
pub const RESULT_STOPPED: &str = "stopped";
/// Result string for commands left in the queue when the loop exits.
pub const RESULT_ENGINE_STOPPED: &str = "engine stopped";

/// The commands the engine can execute. Every variant is answered with a
/// result string under the submission's call id; failures travel the same
/// channel as successes.
#[derive(Debug)]
pub enum Command {
    /// Open a static swarm. Answered with the swarm's root hash in hex,
    /// once known.
    Open {
        id: SwarmId,
        tracker: Option<Url>,
        path: PathBuf,
    },
    /// Close a swarm, flushing its checkpoint. Closing an unknown
    /// identifier is a no-op.
    Close { id: SwarmId },
    /// Create a live swarm anchored at the given identifier. Answered
    /// with the identifier in hex.
    LiveCreate { id: SwarmId, path: PathBuf },
    /// Append the next unit to a live swarm.
    LiveAppend {
        id: SwarmId,
        offset: u64,
        data: Vec<u8>,
    },
    /// Query the `written/total` progress pair.
    HttpProgress { id: SwarmId },
    /// Query the six-field stats summary.
    Stats { id: SwarmId },
    /// Gracefully stop the loop: drain in-flight verification, flush
    /// every checkpoint, then return.
    Shutdown,
}

/// What an announce task reports back to the loop.
struct AnnounceOutcome {
    td: TransferId,
    result: TrackerResult<Response>,
}

pub struct Engine {
    /// All currently open swarms.
    store: SwarmStore,
    /// The port on which API consumers send the engine commands.
    bus: Arc<Bus>,
    /// Where announce tasks post their responses.
    announce_tx: UnboundedSender<AnnounceOutcome>,
    announce_rx: UnboundedReceiver<AnnounceOutcome>,
    /// The peer-wire socket. Datagrams are drained into the raw counters;
    /// decoding them is the wire protocol's business, not ours.
    socket: Option<UdpSocket>,
    /// Engine-wide raw traffic counters; content counters live per swarm.
    raw: ChannelCounters,
    conf: Conf,
}

impl Engine {
    /// Creates a new engine and the bus callers submit through.
    pub fn new(conf: Conf) -> (Self, Arc<Bus>) {
        let bus = Arc::new(CommandBus::new(conf.engine.result_retention.clone()));
        let (announce_tx, announce_rx) = mpsc::unbounded_channel();
        let engine = Engine {
            store: SwarmStore::new(conf.swarm.clone()),
            bus: Arc::clone(&bus),
            announce_tx,
            announce_rx,
            socket: None,
            raw: ChannelCounters::new(),
            conf,
        };
        (engine, bus)
    }

    /// Runs the loop until a shutdown command is observed.
    pub async fn run(mut self) -> EngineResult<()> {
        log::info!("Starting engine");

        match UdpSocket::bind(self.conf.engine.listen_addr).await {
            Ok(socket) => {
                log::info!("engine: listening on {:?}", socket.local_addr());
                self.socket = Some(socket);
            }
            // swarms that only hash and seed locally still work
            Err(e) => log::warn!(
                "engine: cannot bind {}: {}",
                self.conf.engine.listen_addr,
                e
            ),
        }

        let mut tick = tokio::time::interval(self.conf.engine.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tick.tick().await;
            let now = Instant::now();
            let elapsed = now.duration_since(last_tick);
            last_tick = now;

            self.drain_socket();
            self.drain_announces();
            let shutdown = self.apply_commands();
            self.advance_swarms(elapsed.max(std::time::Duration::from_millis(1)));

            if shutdown {
                self.shutdown();
                return Ok(());
            }
        }
    }

    /// Applies every queued command in submission order. Returns whether
    /// a shutdown was observed.
    fn apply_commands(&mut self) -> bool {
        let mut shutdown = false;
        for pending in self.bus.drain() {
            let call_id = pending.call_id;
            match pending.payload {
                Command::Open { id, tracker, path } => self.open(call_id, id, tracker, &path),
                Command::Close { id } => {
                    self.store.close(&id);
                    self.bus.complete(call_id, RESULT_OK);
                }
                Command::LiveCreate { id, path } => {
                    match self.store.live_create(id, &path) {
                        Ok(_) => self.bus.complete(call_id, id.hex()),
                        Err(e) => self.complete_err(call_id, &e),
                    }
                }
                Command::LiveAppend { id, offset, data } => {
                    let outcome = self
                        .store
                        .lookup_mut(&id)
                        .and_then(|session| session.live_append(offset, &data));
                    match outcome {
                        Ok(()) => self.bus.complete(call_id, RESULT_OK),
                        Err(e) => self.complete_err(call_id, &e),
                    }
                }
                Command::HttpProgress { id } => match self.store.lookup(&id) {
                    Ok(session) => {
                        self.bus.complete(call_id, session.http_progress().to_string())
                    }
                    Err(e) => self.complete_err(call_id, &e),
                },
                Command::Stats { id } => match self.store.lookup(&id) {
                    Ok(session) => {
                        // raw traffic is engine-wide; content figures and
                        // peer counts are the session's own
                        let mut snap = session.stats();
                        snap.down_kbps = self.raw.raw_down.rate_kbps();
                        snap.up_kbps = self.raw.raw_up.rate_kbps();
                        self.bus.complete(call_id, snap.to_string());
                    }
                    Err(e) => self.complete_err(call_id, &e),
                },
                Command::Shutdown => {
                    self.bus.complete(call_id, RESULT_STOPPED);
                    shutdown = true;
                }
            }
        }
        shutdown
    }

    fn open(&mut self, call_id: CallId, id: SwarmId, tracker: Option<Url>, path: &PathBuf) {
        match self.store.open(id, tracker, path) {
            Ok((_, OpenOutcome::Ready(ready_id))) => self.bus.complete(call_id, ready_id.hex()),
            Ok((td, OpenOutcome::Verifying)) => {
                // answered when verification settles on a later tick
                if let Some(session) = self.store.get_mut(td) {
                    session.open_call = Some(call_id);
                }
            }
            Err(e) => self.complete_err(call_id, &e),
        }
    }

    fn complete_err(&self, call_id: CallId, e: &SwarmError) {
        self.bus.complete(call_id, e.to_string());
    }

    /// One slice of work per swarm: advance verification, fold counters,
    /// fire due tracker announces.
    fn advance_swarms(&mut self, elapsed: std::time::Duration) {
        let tx = self.announce_tx.clone();
        let client_id = self.conf.engine.client_id;
        let port = self.conf.engine.listen_addr.port();
        let interval = self.conf.swarm.announce_interval;
        let slice = self.conf.swarm.hash_slice;
        let now = Instant::now();

        self.raw.tick(elapsed);

        let mut settled: Vec<(TransferId, Option<CallId>, SwarmResult<SwarmId>)> = Vec::new();
        for session in self.store.iter_mut() {
            if let Some(outcome) = session.tick_verify(slice) {
                settled.push((session.td, session.open_call.take(), outcome));
            }
            session.counters.tick(elapsed);

            if session.state().is_active() {
                if let Some(url) = session.tracker().cloned() {
                    let due = session
                        .last_announce
                        .map(|at| now.duration_since(at) >= interval)
                        .unwrap_or(true);
                    if due {
                        let (downloaded, uploaded, left) = session.announce_progress();
                        let params = Announce {
                            swarm_id: *session.id().as_bytes(),
                            peer_id: client_id,
                            port,
                            ip: None,
                            downloaded,
                            uploaded,
                            left,
                            peer_count: Some(50),
                            event: session.last_announce.is_none().then_some(Event::Started),
                        };
                        let td = session.td;
                        let tx = tx.clone();
                        task::spawn(async move {
                            let result = Tracker::new(url).announce(params).await;
                            let _ = tx.send(AnnounceOutcome { td, result });
                        });
                        session.last_announce = Some(now);
                    }
                }
            }
        }

        for (td, open_call, outcome) in settled {
            match outcome {
                Ok(id) => {
                    self.store.register_id(td, id);
                    if let Some(call_id) = open_call {
                        self.bus.complete(call_id, id.hex());
                    }
                }
                Err(e) => {
                    if let Some(call_id) = open_call {
                        self.bus.complete(call_id, e.to_string());
                    }
                }
            }
        }
    }

    /// Drains pending datagrams into the raw counters.
    fn drain_socket(&mut self) {
        let Some(socket) = &self.socket else {
            return;
        };
        let mut buf = [0u8; 2048];
        let mut received = 0u64;
        loop {
            match socket.try_recv_from(&mut buf) {
                Ok((n, _)) => received += n as u64,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::trace!("engine: socket recv error: {}", e);
                    break;
                }
            }
        }
        if received > 0 {
            self.raw.raw_down.record(received);
        }
    }

    /// Folds announce responses into their sessions' peer counts.
    fn drain_announces(&mut self) {
        while let Ok(AnnounceOutcome { td, result }) = self.announce_rx.try_recv() {
            let Some(session) = self.store.get_mut(td) else {
                continue;
            };
            match result {
                Ok(resp) => {
                    if let Some(reason) = resp.failure_reason {
                        log::warn!("swarm {}: tracker refused announce: {}", session.id(), reason);
                        continue;
                    }
                    session.seeders = resp.seeder_count.unwrap_or(0) as u32;
                    session.leechers = resp.leecher_count.unwrap_or(0) as u32;
                    log::trace!(
                        "swarm {}: tracker reports {} seeders / {} leechers, {} peers",
                        session.id(),
                        session.seeders,
                        session.leechers,
                        resp.peers.len()
                    );
                }
                Err(e) => log::warn!("swarm {}: announce failed: {}", session.id(), e),
            }
        }
    }

    /// Cooperative shutdown: in-flight verification is driven to its
    /// conclusion, every session is closed with its checkpoint flushed,
    /// and whatever raced into the queue is answered on the way out.
    fn shutdown(&mut self) {
        log::info!("Engine shutting down");

        let slice = self.conf.swarm.hash_slice;
        loop {
            let mut settled: Vec<(TransferId, Option<CallId>, SwarmResult<SwarmId>)> = Vec::new();
            let mut verifying = false;
            for session in self.store.iter_mut() {
                if session.state() == State::Verifying {
                    verifying = true;
                    if let Some(outcome) = session.tick_verify(slice) {
                        settled.push((session.td, session.open_call.take(), outcome));
                    }
                }
            }
            for (td, open_call, outcome) in settled {
                match outcome {
                    Ok(id) => {
                        self.store.register_id(td, id);
                        if let Some(call_id) = open_call {
                            self.bus.complete(call_id, id.hex());
                        }
                    }
                    Err(e) => {
                        if let Some(call_id) = open_call {
                            self.bus.complete(call_id, e.to_string());
                        }
                    }
                }
            }
            if !verifying {
                break;
            }
        }

        self.store.close_all();

        for pending in self.bus.close() {
            self.bus.complete(pending.call_id, RESULT_ENGINE_STOPPED);
        }
        log::info!("Engine stopped");
    }
}
