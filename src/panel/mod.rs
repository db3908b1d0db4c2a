//! Project management panel.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  HTTP  ┌────────────────────────────────────────────────────┐
//! │  Browser │ ─────> │  server.rs  (axum Router, embedded UI)             │
//! └──────────┘        │    └─ api.rs  (route handlers, AppState)           │
//!                     │         │                                          │
//!                     │         ├─ service.rs    (ProjectService)          │
//!                     │         │     ├─ github.rs   (GitHub trait)        │
//!                     │         │     ├─ git.rs      (RepoCloner trait)    │
//!                     │         │     ├─ runtime.rs  (ContainerRuntime)    │
//!                     │         │     └─ ports.rs    (host port scan)      │
//!                     │         │                                          │
//!                     │         └─ providers.rs  (ProviderService)         │
//!                     └────────────────────────────────────────────────────┘
//! ```
//!
//! State lives on disk only: one `.opencode-meta.json` per workspace
//! (`meta`) and the global `.providers.json` (`providers`).

pub mod api;
pub mod git;
pub mod github;
pub mod meta;
pub mod names;
pub mod ports;
pub mod providers;
pub mod runtime;
pub mod server;
pub mod service;

#[cfg(test)]
pub(crate) mod fakes;
