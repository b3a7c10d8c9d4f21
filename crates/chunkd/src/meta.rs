//! Shared metaserver client for stripe location lookups.
//!
//! All recovery readers in the process share one client connection to
//! the metadata coordinator. The wrapper here owns its lifecycle: the
//! connection is established lazily on first use, retargeted when a
//! request names a different metaserver port, and stopped explicitly on
//! engine shutdown. Each replicator gets its own initial sequence
//! number, spaced out from a randomized seed so concurrent readers
//! never collide.

use std::sync::Arc;

use async_trait::async_trait;
use chunkfs_proto::{ChunkResult, SeqNum, ServerLocation};
use tokio::sync::Mutex;
use tracing::info;

/// Transport to the metadata coordinator.
#[async_trait]
pub trait MetaClient: Send + Sync {
    /// Point the client at a metaserver, (re)establishing the
    /// connection.
    async fn set_server(&self, location: &ServerLocation) -> ChunkResult<()>;

    /// Drop the connection and abandon queued operations.
    async fn stop(&self);
}

struct MetaState {
    port: Option<u16>,
    next_seq: SeqNum,
    next_rand: u32,
}

/// Process-wide metaserver client shared by all recovery readers.
pub struct SharedMetaClient {
    client: Arc<dyn MetaClient>,
    host: String,
    state: Mutex<MetaState>,
}

impl SharedMetaClient {
    /// Wrap `client`; `host` is the metaserver host this node is
    /// registered with (requests carry only the port).
    pub fn new(client: Arc<dyn MetaClient>, host: impl Into<String>) -> Self {
        let seed = rand::random::<u32>();
        Self {
            client,
            host: host.into(),
            state: Mutex::new(MetaState {
                port: None,
                next_seq: SeqNum::from(seed),
                next_rand: seed,
            }),
        }
    }

    /// The wrapped client, for handing to recovery readers.
    pub fn client(&self) -> Arc<dyn MetaClient> {
        self.client.clone()
    }

    /// Bind the shared client to `port` (connecting lazily, retargeting
    /// on change) and allocate an initial sequence number for one
    /// replicator's reader session.
    pub async fn attach(&self, port: u16) -> ChunkResult<SeqNum> {
        let mut state = self.state.lock().await;
        if state.port != Some(port) {
            if let Some(prev) = state.port {
                info!(
                    "recovery: metaserver client port has changed from: {} to: {}",
                    prev, port
                );
            }
            self.client
                .set_server(&ServerLocation::new(self.host.clone(), port))
                .await?;
            state.port = Some(port);
        }
        // Advance by a randomized stride so concurrent reader sessions
        // use disjoint sequence ranges.
        state.next_rand = state.next_rand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        state.next_seq += 100_000 + SeqNum::from((state.next_rand / 65_536) % 32_768);
        Ok(state.next_seq)
    }

    /// Stop the shared client. The next `attach` reconnects.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.port.take().is_some() {
            self.client.stop().await;
        }
    }

    /// Port the client is currently bound to, if any.
    pub async fn port(&self) -> Option<u16> {
        self.state.lock().await.port
    }
}
