//! Shared fixtures for the service integration tests.
//!
//! The engine is replaced by an always-running fake process and a
//! connector whose sockets record every byte written, so tests can assert
//! on the exact command lines the service sent. Engine progress comes from
//! a scripted [`StatusSource`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use spinw_core::registry::JobRegistry;
use spinw_core::types::{JobId, UserId};
use spinw_db::MemoryStore;
use spinw_engine::config::Endpoint;
use spinw_engine::connector::{Connector, EngineStream};
use spinw_engine::process::{Launch, ProcessSupervisor};
use spinw_engine::{EngineConfig, EngineConnection, EngineError, EngineReport, StatusSource};
use spinw_server::DispatchFacade;

pub const ALICE: UserId = 1;
pub const BOB: UserId = 2;

// ---------------------------------------------------------------------------
// Engine fakes
// ---------------------------------------------------------------------------

/// Process that is always up, so no settle delay applies.
struct ResidentProcess;

#[async_trait]
impl ProcessSupervisor for ResidentProcess {
    async fn ensure_running(&mut self) -> Result<Launch, EngineError> {
        Ok(Launch::AlreadyRunning)
    }

    fn is_alive(&mut self) -> bool {
        true
    }

    async fn terminate(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Process that is down until the first command, so that command waits
/// out the settle interval.
#[derive(Default)]
struct LaunchOnce {
    alive: bool,
}

#[async_trait]
impl ProcessSupervisor for LaunchOnce {
    async fn ensure_running(&mut self) -> Result<Launch, EngineError> {
        if self.alive {
            return Ok(Launch::AlreadyRunning);
        }
        self.alive = true;
        Ok(Launch::Started { pid: Some(4242) })
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn terminate(&mut self) -> Result<(), EngineError> {
        self.alive = false;
        Ok(())
    }
}

/// Socket that appends everything written to a shared buffer.
struct RecordingSocket {
    sink: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for RecordingSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sink.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Engine endpoint that can be switched between reachable and refusing.
#[derive(Clone)]
pub struct FakeEngine {
    reachable: Arc<AtomicBool>,
    sink: Arc<Mutex<Vec<u8>>>,
    attempts: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
            sink: Arc::default(),
            attempts: Arc::default(),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every command line received so far, without newlines.
    pub fn commands(&self) -> Vec<String> {
        let bytes = self.sink.lock().unwrap().clone();
        String::from_utf8(bytes)
            .expect("commands are UTF-8")
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Connection to an engine that is already running.
    pub fn connection(&self) -> Arc<EngineConnection> {
        self.connection_with(Box::new(ResidentProcess))
    }

    /// Connection whose first command launches the engine and waits the
    /// default settle interval.
    pub fn cold_connection(&self) -> Arc<EngineConnection> {
        self.connection_with(Box::new(LaunchOnce::default()))
    }

    fn connection_with(&self, process: Box<dyn ProcessSupervisor>) -> Arc<EngineConnection> {
        let config = EngineConfig::new("fake-engine", "/srv/uploads");
        Arc::new(EngineConnection::with_parts(
            &config,
            process,
            Box::new(self.clone()),
        ))
    }
}

#[async_trait]
impl Connector for FakeEngine {
    async fn connect(&self, _endpoint: &Endpoint) -> io::Result<EngineStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }
        Ok(Box::new(RecordingSocket {
            sink: Arc::clone(&self.sink),
        }))
    }
}

/// Status source answering from a table the test fills in.
#[derive(Default)]
pub struct ScriptedStatus {
    reports: Mutex<HashMap<JobId, EngineReport>>,
    unreachable: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedStatus {
    pub fn set(&self, job_id: JobId, report: EngineReport) {
        self.reports.lock().unwrap().insert(job_id, report);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedStatus {
    async fn report(&self, job_id: JobId) -> Result<Option<EngineReport>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(EngineError::Unreachable("scripted outage".into()));
        }
        Ok(self.reports.lock().unwrap().get(&job_id).copied())
    }
}

// ---------------------------------------------------------------------------
// Service fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub registry: Arc<JobRegistry>,
    pub engine: FakeEngine,
    pub connection: Arc<EngineConnection>,
    pub status: Arc<ScriptedStatus>,
    pub facade: DispatchFacade,
}

/// Registry over an in-memory store with ALICE and BOB registered.
pub fn fixture(quota_total: i32, engine_reachable: bool) -> Fixture {
    let engine = FakeEngine::new(engine_reachable);
    let connection = engine.connection();
    assemble(quota_total, engine, connection)
}

/// Like [`fixture`], but the engine is launched by the first command.
pub fn cold_fixture(quota_total: i32) -> Fixture {
    let engine = FakeEngine::new(true);
    let connection = engine.cold_connection();
    assemble(quota_total, engine, connection)
}

fn assemble(quota_total: i32, engine: FakeEngine, connection: Arc<EngineConnection>) -> Fixture {
    let store = Arc::new(
        MemoryStore::new()
            .with_user(ALICE, quota_total)
            .with_user(BOB, quota_total),
    );
    let registry = Arc::new(JobRegistry::new(store.clone(), store));
    let facade = DispatchFacade::new(Arc::clone(&registry), Arc::clone(&connection));

    Fixture {
        registry,
        engine,
        connection,
        status: Arc::new(ScriptedStatus::default()),
        facade,
    }
}
