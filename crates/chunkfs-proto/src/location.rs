/// Network address of a storage node or the metadata coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `host:port` pair identifying a server.
///
/// An empty host or a zero port makes the location invalid; replication
/// requests use an invalid location to select RS recovery mode, in which
/// case only `port` is meaningful (it names the metaserver port for
/// stripe location lookups).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerLocation {
    pub host: String,
    pub port: u16,
}

impl ServerLocation {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// A location is valid when it can be dialed.
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
