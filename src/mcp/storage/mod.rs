//! Concurrent bookkeeping for the tunnel.
//!
//! Forwarded connections live in a lock-free DashMap so that the accept loop,
//! per-connection relay tasks and `close()` can all touch it concurrently.

mod connections;

pub use connections::{ConnectionRegistry, ForwardedConnection};
