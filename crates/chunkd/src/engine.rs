//! Replication engine: request validation, strategy selection, and
//! shared process-wide state.
//!
//! The engine is a factory producing one replicator per request. A
//! request with a dialable source location runs direct replication; any
//! other request runs RS recovery after strict validation of its
//! striping parameters. Immediate failures (no peer, invalid request)
//! are answered without creating a replicator.
//!
//! All shared state (registry, counters, config, buffer quota, peer
//! pool, shared metaserver client) lives in the engine context and is
//! threaded into replicators explicitly; there are no hidden globals.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chunkfs_core::buffer_manager::BufferManager;
use chunkfs_proto::constants::{
    CHUNK_SIZE, MAX_STRIPE_SIZE, MIN_STRIPE_SIZE, STRIPE_ALIGNMENT,
};
use chunkfs_proto::{ChunkError, ReplicateChunkOp, StriperType};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};

use crate::config::ReplicatorConfig;
use crate::counters::{Counters, CountersSnapshot};
use crate::meta::{MetaClient, SharedMetaClient};
use crate::peer::{PeerClientPool, PeerConnector};
use crate::reader::{MetaSession, StripeReaderFactory};
use crate::recovery::{recovery_read_size, RsReplicator};
use crate::registry::InFlightRegistry;
use crate::replicator::DirectReplicator;
use crate::store::ChunkStore;

/// Everything the engine needs at startup.
pub struct EngineParams {
    pub store: Arc<dyn ChunkStore>,
    pub connector: Arc<dyn PeerConnector>,
    pub reader_factory: Arc<dyn StripeReaderFactory>,
    pub meta_client: Arc<dyn MetaClient>,
    /// Metaserver host this node registered with; recovery requests
    /// carry only the port.
    pub meta_host: String,
    /// Total buffer quota bytes shared by all replicators.
    pub buffer_total: i64,
    /// Per-replicator buffer ceiling.
    pub max_client_quota: i64,
    /// Egress for completed ops, back to the request source.
    pub responses: mpsc::UnboundedSender<ReplicateChunkOp>,
    pub config: ReplicatorConfig,
}

/// Process-wide engine state shared with every replicator.
pub(crate) struct EngineShared {
    pub(crate) store: Arc<dyn ChunkStore>,
    pub(crate) buffers: BufferManager,
    pub(crate) registry: InFlightRegistry,
    pub(crate) counters: Counters,
    pub(crate) config: RwLock<ReplicatorConfig>,
    pub(crate) pool: PeerClientPool,
    pub(crate) reader_factory: Arc<dyn StripeReaderFactory>,
    pub(crate) meta: SharedMetaClient,
    pub(crate) responses: mpsc::UnboundedSender<ReplicateChunkOp>,
    pub(crate) next_instance: AtomicU64,
}

/// The chunk replication and recovery engine.
pub struct ReplicationEngine {
    shared: Arc<EngineShared>,
}

impl ReplicationEngine {
    pub fn new(params: EngineParams) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                store: params.store,
                buffers: BufferManager::new(params.buffer_total, params.max_client_quota),
                registry: InFlightRegistry::new(),
                counters: Counters::default(),
                config: RwLock::new(params.config),
                pool: PeerClientPool::new(params.connector),
                reader_factory: params.reader_factory,
                meta: SharedMetaClient::new(params.meta_client, params.meta_host),
                responses: params.responses,
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Dispatch a replication request: validate, select direct vs. RS
    /// recovery, and launch the replicator. Every accepted request
    /// produces exactly one response on the engine's response channel;
    /// rejected requests are answered immediately.
    pub async fn run(&self, mut op: ReplicateChunkOp) {
        debug!("{op}");
        if op.location.is_valid() {
            self.shared.counters.incr_replication();
            let use_pool = self.shared.config.read().await.use_connection_pool;
            let peer = if use_pool {
                self.shared.pool.get_or_connect(&op.location).await
            } else {
                self.shared.pool.connect_fresh(&op.location).await
            };
            let peer = match peer {
                Ok(peer) => peer,
                Err(e) => {
                    error!(
                        "replication: unable to find peer: {} error: {} {}",
                        op.location, e, op
                    );
                    op.status = -1;
                    self.shared.counters.count_terminal(true, false);
                    let _ = self.shared.responses.send(op);
                    return;
                }
            };
            let mut replicator = DirectReplicator::new(self.shared.clone(), op, peer);
            let registered = replicator.register();
            tokio::spawn(replicator.run(registered));
        } else {
            self.shared.counters.incr_recovery();
            if !is_valid_recovery_request(&op) {
                error!("replication: invalid request: {}", op);
                op.status = ChunkError::InvalidParms.status_code();
                self.shared.counters.count_terminal(false, false);
                let _ = self.shared.responses.send(op);
                return;
            }
            let config = self.shared.config.read().await.clone();
            let initial_seq = match self.shared.meta.attach(op.location.port).await {
                Ok(seq) => seq,
                Err(e) => {
                    error!(
                        "recovery: chunk: {} metaserver client unavailable: error: {}",
                        op.chunk_id, e
                    );
                    op.status = e.status_code();
                    self.shared.counters.count_terminal(false, false);
                    let _ = self.shared.responses.send(op);
                    return;
                }
            };
            let session = MetaSession {
                client: self.shared.meta.client(),
                initial_seq,
                log_prefix: format!("CR: {}", op.chunk_id),
                config: config.reader.clone(),
            };
            let reader = self.shared.reader_factory.create(session);
            let read_size = recovery_read_size(
                op.stripe_size,
                op.num_stripes,
                config.reader.max_read_size,
                self.shared.buffers.max_client_quota(),
            );
            let mut replicator = RsReplicator::new(self.shared.clone(), op, reader, read_size);
            let registered = replicator.register();
            tokio::spawn(replicator.run(registered));
        }
    }

    /// Apply configuration properties atomically.
    pub async fn set_parameters(&self, props: &crate::config::Properties) {
        self.shared.config.write().await.set_parameters(props);
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> ReplicatorConfig {
        self.shared.config.read().await.clone()
    }

    /// Cancel every in-flight replication and stop the shared
    /// metaserver client.
    pub async fn cancel_all(&self) {
        self.shared.registry.cancel_all();
        self.shared.meta.stop().await;
    }

    /// Number of in-flight replications.
    pub fn num_replications(&self) -> i64 {
        self.shared.registry.num_replications()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.shared.counters.snapshot()
    }

    /// The shared metaserver client (lifecycle inspection).
    pub fn meta(&self) -> &SharedMetaClient {
        &self.shared.meta
    }
}

/// Strict validation of a recovery request's striping parameters.
fn is_valid_recovery_request(op: &ReplicateChunkOp) -> bool {
    op.chunk_offset >= 0
        && op.chunk_offset % CHUNK_SIZE == 0
        && op.striper_type == StriperType::Rs
        && op.num_stripes > 0
        && op.num_recovery_stripes > 0
        && op.stripe_size >= MIN_STRIPE_SIZE
        && op.stripe_size <= MAX_STRIPE_SIZE
        && CHUNK_SIZE % i64::from(op.stripe_size) == 0
        && op.stripe_size % STRIPE_ALIGNMENT == 0
        && op.location.port > 0
}
