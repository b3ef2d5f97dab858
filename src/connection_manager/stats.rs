//! Connection statistics

use serde::Serialize;

/// Connection statistics of this process
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub established_connections: usize,
}
