mod registry;
mod stats;
mod types;

pub use registry::ConnectionManager;
pub use stats::ConnectionStats;
pub use types::{generate_socket_id, Connection, ConnectionState};
