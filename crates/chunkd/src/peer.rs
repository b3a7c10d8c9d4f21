//! Peer storage node transport contract and connection pool.
//!
//! Direct replication streams chunk bytes from a single peer that holds
//! a healthy replica. The transport (framing, retries, timeouts) lives
//! behind [`PeerClient`]; the engine either dials a fresh connection per
//! replication or reuses pooled clients, per configuration.

use std::sync::Arc;

use async_trait::async_trait;
use chunkfs_proto::{ChunkId, ChunkResult, ChunkVersion, ServerLocation};
use dashmap::DashMap;

/// Chunk size and version reported by the peer holding the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub chunk_size: i64,
    pub chunk_version: ChunkVersion,
}

/// Transport to a single peer storage node.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetch the authoritative size and version of the peer's replica.
    async fn get_chunk_metadata(&self, chunk_id: ChunkId) -> ChunkResult<ChunkMetadata>;

    /// Read up to `num_bytes` at `offset`. A return shorter than
    /// requested is only legal at the end of the chunk.
    async fn read(
        &self,
        chunk_id: ChunkId,
        chunk_version: ChunkVersion,
        offset: i64,
        num_bytes: usize,
    ) -> ChunkResult<Vec<u8>>;

    /// Peer address, for logging.
    fn location(&self) -> &ServerLocation;
}

/// Dials a fresh connection to a peer.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, location: &ServerLocation) -> ChunkResult<Arc<dyn PeerClient>>;
}

/// A pool of peer clients keyed by location, for reuse across
/// replications when the connection-pool option is on.
pub struct PeerClientPool {
    pool: DashMap<String, Arc<dyn PeerClient>>,
    connector: Arc<dyn PeerConnector>,
}

impl PeerClientPool {
    pub fn new(connector: Arc<dyn PeerConnector>) -> Self {
        Self {
            pool: DashMap::new(),
            connector,
        }
    }

    /// Get a cached client for the peer, or None.
    pub fn get(&self, location: &ServerLocation) -> Option<Arc<dyn PeerClient>> {
        self.pool.get(&location.to_string()).map(|e| e.value().clone())
    }

    /// Get a pooled client, dialing and caching one if none exists.
    pub async fn get_or_connect(
        &self,
        location: &ServerLocation,
    ) -> ChunkResult<Arc<dyn PeerClient>> {
        if let Some(client) = self.get(location) {
            return Ok(client);
        }
        let client = self.connector.connect(location).await?;
        self.pool.insert(location.to_string(), client.clone());
        Ok(client)
    }

    /// Dial a fresh connection, bypassing the pool.
    pub async fn connect_fresh(
        &self,
        location: &ServerLocation,
    ) -> ChunkResult<Arc<dyn PeerClient>> {
        self.connector.connect(location).await
    }

    /// Drop the cached client for a peer.
    pub fn clear_node(&self, location: &ServerLocation) {
        self.pool.remove(&location.to_string());
    }

    /// Drop all cached clients.
    pub fn clear_all(&self) {
        self.pool.clear();
    }
}
