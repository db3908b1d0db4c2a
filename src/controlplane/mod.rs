//! First-run setup gate in front of a single supervised worker.
//!
//! ```text
//!   request ─► api::router ─┬─ /api/*, /setup ─► handlers
//!                           └─ anything else ─► gate
//!                                                 │ status != READY → 302 /setup
//!                                                 └ READY → supervisor.start() → proxy
//! ```
//!
//! - `status`: `ConfigStatus` state machine
//! - `db`: SQLite key/value store holding status, domain and repository
//! - `supervisor`: worker child process lifecycle
//! - `proxy`: HTTP and WebSocket forwarding to the worker

pub mod api;
pub mod db;
pub mod proxy;
pub mod server;
pub mod status;
pub mod supervisor;
