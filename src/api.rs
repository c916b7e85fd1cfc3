//! The string-typed call surface onto the engine.
//!
//! This is the boundary an embedding (a JNI shim, an FFI layer, a test
//! harness) talks to: identifiers are hex text, commands return an
//! integer call id (or -1 when validation rejects the submission
//! outright), and results are polled as strings with `"n/a"` standing in
//! until the loop has produced a value. Failures travel the same result
//! channel as successes and are told apart by content.
//!
//! Process lifecycle is explicit: [`init`] exactly once, one caller
//! blocks in [`run_loop`], [`shutdown`] from anywhere, idempotent. The
//! process-wide state lives in a single-assignment cell, not in scattered
//! mutable globals.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Context};
use once_cell::sync::OnceCell;
use url::Url;

use crate::bus::FetchOutcome;
use crate::conf::Conf;
use crate::engine::{Bus, Command, Engine, RESULT_STOPPED};
use crate::error::engine::EngineError;
use crate::{CallId, SwarmId};

/// The sentinel a fetch returns while a result is not yet available.
pub const RESULT_PENDING: &str = "n/a";

/// Everything the boundary needs once the engine exists. Assigned once.
struct ApiState {
    bus: Arc<Bus>,
    /// Taken by the single `run_loop` caller; `None` afterwards, which is
    /// what makes a second entry detectable.
    engine: Mutex<Option<Engine>>,
}

static STATE: OnceCell<ApiState> = OnceCell::new();

/// Initializes the engine. Must be called exactly once before any other
/// operation; a second call reports an error. Returns the empty string on
/// success, a descriptive error otherwise.
pub fn init(listen_addr: &str, gateway_addr: &str) -> String {
    let conf = match parse_init(listen_addr, gateway_addr) {
        Ok(conf) => conf,
        Err(e) => return format!("{e:#}"),
    };
    let (engine, bus) = Engine::new(conf);
    let state = ApiState {
        bus,
        engine: Mutex::new(Some(engine)),
    };
    match STATE.set(state) {
        Ok(()) => String::new(),
        Err(_) => "already initialized".to_string(),
    }
}

fn parse_init(listen_addr: &str, gateway_addr: &str) -> anyhow::Result<Conf> {
    let listen: SocketAddr = listen_addr
        .parse()
        .context("listen address must be ip:port")?;
    let gateway: SocketAddr = gateway_addr
        .parse()
        .context("gateway address must be ip:port")?;
    Ok(Conf::new(listen, gateway))
}

/// Runs the engine loop, blocking the calling context until shutdown.
/// Exactly one caller may enter; any further call reports the reentrancy
/// error. Returns the empty string on a clean exit.
pub fn run_loop() -> String {
    let Some(state) = STATE.get() else {
        return EngineError::NotInitialized.to_string();
    };
    let engine = state
        .engine
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let Some(engine) = engine else {
        return EngineError::AlreadyRunning.to_string();
    };

    // the engine's single dedicated execution context
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return e.to_string(),
    };
    match runtime.block_on(engine.run()) {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    }
}

/// Requests a graceful engine shutdown. Safe from any thread and
/// idempotent: once the loop has stopped, further calls keep reporting
/// the stopped state.
pub fn shutdown() -> String {
    let Some(state) = STATE.get() else {
        return EngineError::NotInitialized.to_string();
    };
    // a stopped bus means the loop is already gone, which is the goal
    let _ = state.bus.submit(Command::Shutdown);
    RESULT_STOPPED.to_string()
}

/// Opens a static swarm. The all-zero identifier derives the identifier
/// from the content. Returns the call id, or -1 on validation failure.
pub fn open(id_hex: &str, tracker: &str, path: &str) -> i64 {
    submit_checked(|| {
        Ok(Command::Open {
            id: parse_id(id_hex)?,
            tracker: parse_tracker(tracker)?,
            path: parse_path(path)?,
        })
    })
}

/// Closes a swarm, flushing its checkpoint.
pub fn close(id_hex: &str) -> i64 {
    submit_checked(|| Ok(Command::Close { id: parse_id(id_hex)? }))
}

/// Creates a live swarm anchored at the given identifier.
pub fn live_create(id_hex: &str, path: &str) -> i64 {
    submit_checked(|| {
        let id = parse_id(id_hex)?;
        if id.is_zero() {
            return Err(anyhow!("live swarm needs a non-zero identifier"));
        }
        Ok(Command::LiveCreate {
            id,
            path: parse_path(path)?,
        })
    })
}

/// Appends the next unit to a live swarm.
pub fn live_append(id_hex: &str, offset: u64, data: &[u8]) -> i64 {
    submit_checked(|| {
        Ok(Command::LiveAppend {
            id: parse_id(id_hex)?,
            offset,
            data: data.to_vec(),
        })
    })
}

/// Queries the `written/total` progress pair of a swarm.
pub fn http_progress(id_hex: &str) -> i64 {
    submit_checked(|| Ok(Command::HttpProgress { id: parse_id(id_hex)? }))
}

/// Queries the six-field stats summary of a swarm.
pub fn stats(id_hex: &str) -> i64 {
    submit_checked(|| Ok(Command::Stats { id: parse_id(id_hex)? }))
}

/// Polls for the result of a submitted command. Never blocks; answers
/// [`RESULT_PENDING`] until the result exists. A ready result is stable
/// across repeated fetches until the retention policy reclaims it.
pub fn fetch_result(call_id: i64) -> String {
    let Some(state) = STATE.get() else {
        return RESULT_PENDING.to_string();
    };
    if call_id < 0 {
        return RESULT_PENDING.to_string();
    }
    match state.bus.fetch_result(call_id as CallId) {
        FetchOutcome::Ready(value) => value,
        FetchOutcome::NotYetAvailable => RESULT_PENDING.to_string(),
    }
}

/// Validates, then submits. Validation failures never enter the loop;
/// they are reported as -1 right here.
fn submit_checked(build: impl FnOnce() -> anyhow::Result<Command>) -> i64 {
    let command = match build() {
        Ok(command) => command,
        Err(e) => {
            log::warn!("api: rejected command: {e:#}");
            return -1;
        }
    };
    let Some(state) = STATE.get() else {
        log::warn!("api: command submitted before init");
        return -1;
    };
    match state.bus.submit(command) {
        Ok(call_id) => call_id as i64,
        Err(e) => {
            log::warn!("api: {e}");
            -1
        }
    }
}

fn parse_id(id_hex: &str) -> anyhow::Result<SwarmId> {
    SwarmId::from_hex(id_hex).ok_or_else(|| anyhow!("identifier must be 40 hex symbols"))
}

fn parse_tracker(tracker: &str) -> anyhow::Result<Option<Url>> {
    if tracker.is_empty() {
        return Ok(None);
    }
    let url = Url::parse(tracker).context("tracker must be a valid url")?;
    Ok(Some(url))
}

fn parse_path(path: &str) -> anyhow::Result<PathBuf> {
    if path.is_empty() {
        return Err(anyhow!("path must not be empty"));
    }
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hashtree::HashTree;

    fn zero_hex() -> String {
        "0".repeat(40)
    }

    /// Polls until the result is ready.
    fn fetch_blocking(call_id: i64) -> String {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            let result = fetch_result(call_id);
            if result != RESULT_PENDING {
                return result;
            }
            assert!(Instant::now() < deadline, "result never arrived");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_malformed_arguments_are_rejected_synchronously() {
        // never reaches the bus, initialized or not
        assert_eq!(open("not-hex", "", "/tmp/x"), -1);
        assert_eq!(open(&"a".repeat(39), "", "/tmp/x"), -1);
        assert_eq!(open(&zero_hex(), "", ""), -1);
        assert_eq!(open(&zero_hex(), "::not a url::", "/tmp/x"), -1);
        assert_eq!(live_create(&zero_hex(), "/tmp/x"), -1);
        assert_eq!(close("xyz"), -1);
        assert_eq!(stats(""), -1);
        assert_eq!(fetch_result(-1), RESULT_PENDING);
    }

    /// The one test that owns the process-wide engine: the init guard
    /// allows a single lifecycle per process.
    #[test]
    fn test_boundary_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        fs::write(&path, vec![0x42u8; 16 * 1024]).unwrap();

        assert_eq!(init("127.0.0.1:0", "127.0.0.1:0"), "");
        assert_ne!(init("127.0.0.1:0", "127.0.0.1:0"), "");

        let loop_thread = std::thread::spawn(run_loop);

        // zero-id open settles on the content's true root hash
        let open_call = open(&zero_hex(), "", path.to_str().unwrap());
        assert!(open_call > 0);
        assert_eq!(fetch_result(open_call + 1000), RESULT_PENDING);
        let root_hex = fetch_blocking(open_call);
        let independent = HashTree::build_from_file(&path, crate::CHUNK_LEN).unwrap();
        assert_eq!(root_hex, SwarmId::from(independent.root()).hex());

        // a second entry into the loop is refused while one is active
        assert_eq!(run_loop(), EngineError::AlreadyRunning.to_string());

        let progress_call = http_progress(&root_hex);
        assert_eq!(fetch_blocking(progress_call), "16384/16384");

        assert_eq!(shutdown(), RESULT_STOPPED);
        assert_eq!(loop_thread.join().unwrap(), "");
        // idempotent after the loop is gone
        assert_eq!(shutdown(), RESULT_STOPPED);

        // the bus refuses new work once stopped
        assert_eq!(open(&zero_hex(), "", path.to_str().unwrap()), -1);
    }
}
