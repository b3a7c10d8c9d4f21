//! Mock collaborators and engine harness shared by the integration
//! tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chunkd::{
    ChunkInfo, ChunkMetadata, ChunkStore, EngineParams, MetaClient, MetaSession, OpenParams,
    PeerClient, PeerConnector, ReplicationEngine, ReplicatorConfig, StripeReadError, StripeReader,
    StripeReaderFactory,
};
use chunkfs_proto::{
    ChunkError, ChunkId, ChunkResult, ChunkVersion, FileId, ReplicateChunkOp, SeqNum,
    ServerLocation, StriperType,
};
use tokio::sync::mpsc;

/// Capture engine log output in test failures.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Deterministic chunk content for a given length.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ---------------------------------------------------------------------------
// Chunk store

#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub version: ChunkVersion,
    pub stable: bool,
    pub data: Vec<u8>,
    pub replication_in_progress: bool,
}

/// In-memory chunk store that records every write for alignment
/// assertions.
#[derive(Default)]
pub struct MemChunkStore {
    chunks: Mutex<HashMap<ChunkId, ChunkRecord>>,
    writes: Mutex<Vec<(ChunkId, i64, usize)>>,
    done_calls: Mutex<Vec<(ChunkId, i32)>>,
    fail_write_at: Mutex<Option<i64>>,
}

impl MemChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes at or past this offset fail with an I/O error.
    pub fn fail_write_at(&self, offset: i64) {
        *self.fail_write_at.lock().unwrap() = Some(offset);
    }

    pub fn chunk(&self, chunk_id: ChunkId) -> Option<ChunkRecord> {
        self.chunks.lock().unwrap().get(&chunk_id).cloned()
    }

    /// Every `(chunk, offset, len)` handed to `write_chunk`, in order.
    pub fn writes(&self) -> Vec<(ChunkId, i64, usize)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn done_calls(&self) -> Vec<(ChunkId, i32)> {
        self.done_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkStore for MemChunkStore {
    async fn alloc_chunk(
        &self,
        _fid: FileId,
        chunk_id: ChunkId,
        version: ChunkVersion,
        replication_in_progress: bool,
    ) -> ChunkResult<()> {
        self.chunks.lock().unwrap().insert(
            chunk_id,
            ChunkRecord {
                version,
                stable: false,
                data: Vec::new(),
                replication_in_progress,
            },
        );
        Ok(())
    }

    async fn stale_chunk(&self, chunk_id: ChunkId, _delete_ok: bool) {
        self.chunks.lock().unwrap().remove(&chunk_id);
    }

    async fn write_chunk(
        &self,
        chunk_id: ChunkId,
        offset: i64,
        data: &[u8],
        _from_replication: bool,
    ) -> ChunkResult<usize> {
        if let Some(fail_at) = *self.fail_write_at.lock().unwrap() {
            if offset >= fail_at {
                return Err(ChunkError::Eio);
            }
        }
        let mut chunks = self.chunks.lock().unwrap();
        let record = chunks.get_mut(&chunk_id).ok_or(ChunkError::NoChunk)?;
        let end = offset as usize + data.len();
        if record.data.len() < end {
            record.data.resize(end, 0);
        }
        record.data[offset as usize..end].copy_from_slice(data);
        self.writes
            .lock()
            .unwrap()
            .push((chunk_id, offset, data.len()));
        Ok(data.len())
    }

    async fn change_chunk_vers(
        &self,
        chunk_id: ChunkId,
        version: ChunkVersion,
        stable: bool,
    ) -> ChunkResult<()> {
        let mut chunks = self.chunks.lock().unwrap();
        let record = chunks.get_mut(&chunk_id).ok_or(ChunkError::NoChunk)?;
        record.version = version;
        record.stable = stable;
        record.replication_in_progress = false;
        Ok(())
    }

    async fn replication_done(&self, chunk_id: ChunkId, status: i32) {
        self.done_calls.lock().unwrap().push((chunk_id, status));
    }

    async fn get_chunk_info(&self, chunk_id: ChunkId) -> Option<ChunkInfo> {
        self.chunks.lock().unwrap().get(&chunk_id).map(|r| ChunkInfo {
            chunk_id,
            version: r.version,
            size: r.data.len() as i64,
        })
    }
}

// ---------------------------------------------------------------------------
// Peer transport

/// Scriptable peer holding one chunk replica.
pub struct MockPeer {
    location: ServerLocation,
    meta: ChunkResult<ChunkMetadata>,
    data: Vec<u8>,
    fail_read_at: Option<i64>,
    short_read_at: Option<i64>,
    hang_reads: bool,
    reads: AtomicUsize,
}

impl MockPeer {
    /// A healthy peer serving `size` pattern bytes at `version`.
    pub fn healthy(location: ServerLocation, size: usize, version: ChunkVersion) -> Self {
        Self {
            location,
            meta: Ok(ChunkMetadata {
                chunk_size: size as i64,
                chunk_version: version,
            }),
            data: pattern(size),
            fail_read_at: None,
            short_read_at: None,
            hang_reads: false,
            reads: AtomicUsize::new(0),
        }
    }

    /// Reads at or past `offset` fail with an I/O error.
    pub fn with_read_failure_at(mut self, offset: i64) -> Self {
        self.fail_read_at = Some(offset);
        self
    }

    /// The read at `offset` returns one byte fewer than requested.
    pub fn with_short_read_at(mut self, offset: i64) -> Self {
        self.short_read_at = Some(offset);
        self
    }

    /// Reads never complete (for cancellation tests).
    pub fn with_hanging_reads(mut self) -> Self {
        self.hang_reads = true;
        self
    }

    /// Report a bogus chunk size in metadata.
    pub fn with_reported_size(mut self, size: i64) -> Self {
        if let Ok(meta) = &mut self.meta {
            meta.chunk_size = size;
        }
        self
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[async_trait]
impl PeerClient for MockPeer {
    async fn get_chunk_metadata(&self, _chunk_id: ChunkId) -> ChunkResult<ChunkMetadata> {
        self.meta
    }

    async fn read(
        &self,
        _chunk_id: ChunkId,
        _chunk_version: ChunkVersion,
        offset: i64,
        num_bytes: usize,
    ) -> ChunkResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.hang_reads {
            std::future::pending::<()>().await;
        }
        if let Some(fail_at) = self.fail_read_at {
            if offset >= fail_at {
                return Err(ChunkError::Eio);
            }
        }
        let start = offset as usize;
        let end = (start + num_bytes).min(self.data.len());
        let mut out = self.data[start..end].to_vec();
        if self.short_read_at == Some(offset) {
            out.pop();
        }
        Ok(out)
    }

    fn location(&self) -> &ServerLocation {
        &self.location
    }
}

/// Connector resolving locations against a fixed peer map.
#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<HashMap<String, Arc<MockPeer>>>,
    dials: AtomicUsize,
}

impl MockConnector {
    pub fn add_peer(&self, peer: MockPeer) {
        self.peers
            .lock()
            .unwrap()
            .insert(peer.location.to_string(), Arc::new(peer));
    }

    pub fn peer(&self, location: &ServerLocation) -> Option<Arc<MockPeer>> {
        self.peers.lock().unwrap().get(&location.to_string()).cloned()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(&self, location: &ServerLocation) -> ChunkResult<Arc<dyn PeerClient>> {
        self.dials.fetch_add(1, Ordering::Relaxed);
        match self.peers.lock().unwrap().get(&location.to_string()) {
            Some(peer) => Ok(peer.clone() as Arc<dyn PeerClient>),
            None => Err(ChunkError::NoPeer),
        }
    }
}

// ---------------------------------------------------------------------------
// Stripe reader

/// Shared inspection window into a scripted reader after the engine has
/// consumed it.
#[derive(Default, Clone)]
pub struct ReaderProbe(Arc<Mutex<ReaderProbeState>>);

#[derive(Default, Clone)]
pub struct ReaderProbeState {
    pub open_params: Option<OpenParams>,
    pub reads: u32,
    pub closes: u32,
    pub shutdowns: u32,
}

impl ReaderProbe {
    pub fn state(&self) -> ReaderProbeState {
        self.0.lock().unwrap().clone()
    }
}

/// Stripe reader serving a fixed logical chunk image, with optional
/// scripted failure.
pub struct ScriptedStripeReader {
    data: Vec<u8>,
    fail_at: Option<(i64, StripeReadError)>,
    hang_reads: bool,
    probe: ReaderProbe,
}

impl ScriptedStripeReader {
    pub fn serving(data: Vec<u8>) -> (Self, ReaderProbe) {
        let probe = ReaderProbe::default();
        (
            Self {
                data,
                fail_at: None,
                hang_reads: false,
                probe: probe.clone(),
            },
            probe,
        )
    }

    /// Reads at or past `offset` fail with `status` and the given
    /// invalid-stripe report bytes.
    pub fn failing_at(mut self, offset: i64, status: i32, report: Vec<u8>) -> Self {
        self.fail_at = Some((offset, StripeReadError { status, report }));
        self
    }

    pub fn with_hanging_reads(mut self) -> Self {
        self.hang_reads = true;
        self
    }
}

#[async_trait]
impl StripeReader for ScriptedStripeReader {
    async fn open(&mut self, params: OpenParams) -> ChunkResult<()> {
        self.probe.0.lock().unwrap().open_params = Some(params);
        Ok(())
    }

    async fn read(&mut self, num_bytes: usize, offset: i64) -> Result<Vec<u8>, StripeReadError> {
        self.probe.0.lock().unwrap().reads += 1;
        if self.hang_reads {
            std::future::pending::<()>().await;
        }
        if let Some((fail_at, err)) = &self.fail_at {
            if offset >= *fail_at {
                return Err(err.clone());
            }
        }
        let start = offset as usize;
        let end = (start + num_bytes).min(self.data.len());
        Ok(self.data[start.min(end)..end].to_vec())
    }

    async fn close(&mut self) {
        self.probe.0.lock().unwrap().closes += 1;
    }

    fn is_active(&self) -> bool {
        let state = self.probe.0.lock().unwrap();
        state.closes > 0 && state.shutdowns == 0
    }

    async fn shutdown(&mut self) {
        self.probe.0.lock().unwrap().shutdowns += 1;
    }
}

/// Reader that fails to open; handed out when the script queue is
/// empty.
struct NoReader;

#[async_trait]
impl StripeReader for NoReader {
    async fn open(&mut self, _params: OpenParams) -> ChunkResult<()> {
        Err(ChunkError::Eio)
    }

    async fn read(&mut self, _num_bytes: usize, _offset: i64) -> Result<Vec<u8>, StripeReadError> {
        Err(StripeReadError::new(ChunkError::Eio.status_code()))
    }

    async fn close(&mut self) {}

    fn is_active(&self) -> bool {
        false
    }

    async fn shutdown(&mut self) {}
}

/// Hands out scripted readers in order and records the metaserver
/// sessions they were bound to.
#[derive(Default)]
pub struct MockReaderFactory {
    queue: Mutex<VecDeque<Box<dyn StripeReader>>>,
    sessions: Mutex<Vec<(SeqNum, String)>>,
}

impl MockReaderFactory {
    pub fn push(&self, reader: impl StripeReader + 'static) {
        self.queue.lock().unwrap().push_back(Box::new(reader));
    }

    pub fn sessions(&self) -> Vec<(SeqNum, String)> {
        self.sessions.lock().unwrap().clone()
    }
}

impl StripeReaderFactory for MockReaderFactory {
    fn create(&self, session: MetaSession) -> Box<dyn StripeReader> {
        self.sessions
            .lock()
            .unwrap()
            .push((session.initial_seq, session.log_prefix.clone()));
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Box::new(NoReader))
    }
}

// ---------------------------------------------------------------------------
// Metaserver client

#[derive(Default)]
pub struct NullMetaClient {
    set_calls: Mutex<Vec<ServerLocation>>,
    stops: AtomicUsize,
}

impl NullMetaClient {
    pub fn set_server_calls(&self) -> Vec<ServerLocation> {
        self.set_calls.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetaClient for NullMetaClient {
    async fn set_server(&self, location: &ServerLocation) -> ChunkResult<()> {
        self.set_calls.lock().unwrap().push(location.clone());
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Engine harness

pub struct TestEngine {
    pub engine: ReplicationEngine,
    pub store: Arc<MemChunkStore>,
    pub connector: Arc<MockConnector>,
    pub readers: Arc<MockReaderFactory>,
    pub meta: Arc<NullMetaClient>,
    responses: mpsc::UnboundedReceiver<ReplicateChunkOp>,
}

impl TestEngine {
    /// Engine with explicit buffer quotas.
    pub fn with_quota(buffer_total: i64, max_client_quota: i64) -> Self {
        let store = Arc::new(MemChunkStore::new());
        let connector = Arc::new(MockConnector::default());
        let readers = Arc::new(MockReaderFactory::default());
        let meta = Arc::new(NullMetaClient::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = ReplicationEngine::new(EngineParams {
            store: store.clone(),
            connector: connector.clone(),
            reader_factory: readers.clone(),
            meta_client: meta.clone(),
            meta_host: "meta-host".to_string(),
            buffer_total,
            max_client_quota,
            responses: tx,
            config: ReplicatorConfig::default(),
        });
        Self {
            engine,
            store,
            connector,
            readers,
            meta,
            responses: rx,
        }
    }

    /// Engine with quotas comfortable for full-size chunks.
    pub fn new() -> Self {
        Self::with_quota(64 << 20, 32 << 20)
    }

    /// Next completed op, with a hang guard.
    pub async fn response(&mut self) -> ReplicateChunkOp {
        tokio::time::timeout(Duration::from_secs(30), self.responses.recv())
            .await
            .expect("timed out waiting for a replication response")
            .expect("response channel closed")
    }
}

// ---------------------------------------------------------------------------
// Request builders

pub fn direct_op(
    chunk_id: i64,
    version: ChunkVersion,
    host: &str,
    port: u16,
) -> ReplicateChunkOp {
    let mut op = ReplicateChunkOp::new(1, ChunkId::new(chunk_id), version);
    op.location = ServerLocation::new(host, port);
    op
}

pub fn recovery_op(chunk_id: i64, version: ChunkVersion, meta_port: u16) -> ReplicateChunkOp {
    let mut op = ReplicateChunkOp::new(1, ChunkId::new(chunk_id), version);
    op.location = ServerLocation::new("", meta_port);
    op.path = "/striped/file".to_string();
    op.file_size = 64 << 20;
    op.chunk_offset = 0;
    op.striper_type = StriperType::Rs;
    op.stripe_size = 64 << 10;
    op.num_stripes = 6;
    op.num_recovery_stripes = 3;
    op
}
