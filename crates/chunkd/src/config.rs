//! Replication engine configuration.
//!
//! Options arrive as string properties from the node's configuration
//! file and are applied atomically at startup and on reconfiguration.
//! Unrecognized keys are ignored; a recognized key keeps its current
//! value when absent, so repeated application of the same property set
//! is a no-op.

use std::collections::HashMap;

use chunkfs_core::numeric::align_up;
use chunkfs_proto::constants::{CHECKSUM_BLOCK_SIZE, DEFAULT_REPLICATION_READ_SIZE};

/// A flat string key/value property bag with typed getters.
#[derive(Debug, Clone, Default)]
pub struct Properties(HashMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get_i32(&self, key: &str, default: i32) -> i32 {
        self.0
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.0
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Booleans accept `true`/`false` or any integer (nonzero is true).
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.0.get(key).map(|v| v.trim()) {
            None => default,
            Some("true") => true,
            Some("false") => false,
            Some(v) => v.parse::<i64>().map(|n| n != 0).unwrap_or(default),
        }
    }
}

/// Tuning for the recovery stripe reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub max_retry_count: i32,
    pub time_sec_between_retries: i32,
    pub op_timeout_sec: i32,
    pub idle_timeout_sec: i32,
    /// Upper bound on a single recovery read; always a checksum block
    /// multiple.
    pub max_read_size: i64,
    pub max_chunk_read_size: i64,
    pub lease_retry_timeout: i32,
    pub lease_wait_timeout: i32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            time_sec_between_retries: 10,
            op_timeout_sec: 30,
            idle_timeout_sec: 5 * 30,
            max_read_size: DEFAULT_REPLICATION_READ_SIZE,
            max_chunk_read_size: DEFAULT_REPLICATION_READ_SIZE.max(1 << 20),
            lease_retry_timeout: 3,
            lease_wait_timeout: 30,
        }
    }
}

/// Tuning for the shared metaserver client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaConfig {
    pub max_retry_count: i32,
    pub time_sec_between_retries: i32,
    pub op_timeout_sec: i32,
    pub idle_timeout_sec: i32,
    pub reset_connection_on_op_timeout: bool,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            max_retry_count: 2,
            time_sec_between_retries: 10,
            op_timeout_sec: 4 * 60,
            idle_timeout_sec: 5 * 60,
            reset_connection_on_op_timeout: true,
        }
    }
}

/// All replication engine tunables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicatorConfig {
    /// Reuse pooled peer connections for direct replication instead of
    /// dialing per request.
    pub use_connection_pool: bool,
    pub reader: ReaderConfig,
    pub meta: MetaConfig,
}

impl ReplicatorConfig {
    /// Apply recognized properties over the current values.
    pub fn set_parameters(&mut self, props: &Properties) {
        self.use_connection_pool = props.get_bool(
            "chunkServer.replication.useConnectionPool",
            self.use_connection_pool,
        );

        let r = &mut self.reader;
        r.max_retry_count =
            props.get_i32("chunkServer.rsReader.maxRetryCount", r.max_retry_count);
        r.time_sec_between_retries = props.get_i32(
            "chunkServer.rsReader.timeSecBetweenRetries",
            r.time_sec_between_retries,
        );
        r.op_timeout_sec = props.get_i32("chunkServer.rsReader.opTimeoutSec", r.op_timeout_sec);
        r.idle_timeout_sec =
            props.get_i32("chunkServer.rsReader.idleTimeoutSec", r.idle_timeout_sec);
        r.max_read_size = align_up(
            props
                .get_i64("chunkServer.rsReader.maxReadSize", r.max_read_size)
                .max(1),
            CHECKSUM_BLOCK_SIZE,
        );
        r.max_chunk_read_size = props.get_i64(
            "chunkServer.rsReader.maxChunkReadSize",
            r.max_chunk_read_size.max(r.max_read_size),
        );
        r.lease_retry_timeout = props.get_i32(
            "chunkServer.rsReader.leaseRetryTimeout",
            r.lease_retry_timeout,
        );
        r.lease_wait_timeout = props.get_i32(
            "chunkServer.rsReader.leaseWaitTimeout",
            r.lease_wait_timeout,
        );

        let m = &mut self.meta;
        m.max_retry_count =
            props.get_i32("chunkServer.rsReader.meta.maxRetryCount", m.max_retry_count);
        m.time_sec_between_retries = props.get_i32(
            "chunkServer.rsReader.meta.timeSecBetweenRetries",
            m.time_sec_between_retries,
        );
        m.op_timeout_sec =
            props.get_i32("chunkServer.rsReader.meta.opTimeoutSec", m.op_timeout_sec);
        m.idle_timeout_sec =
            props.get_i32("chunkServer.rsReader.meta.idleTimeoutSec", m.idle_timeout_sec);
        m.reset_connection_on_op_timeout = props.get_bool(
            "chunkServer.rsReader.meta.resetConnectionOnOpTimeoutFlag",
            m.reset_connection_on_op_timeout,
        );
    }
}
