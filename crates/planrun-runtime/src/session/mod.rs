//! Active sessions and their lifecycle.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `session` | One run: parameters, cancellation scopes, locked mutable state |
//! | `hub` | Subscriber fan-out and the coalescing output buffer |
//! | `registry` | Concurrent `(plan, branch)` → session map, deletion, shutdown |
//! | `supervisor` | Turns a session's terminal outcome into status, message, and deletion |
//!
//! ## Lifecycle
//!
//! created → running (iterations) → terminal outcome or root cancellation →
//! supervisor side effects → destroyed. A session is destroyed exactly once.

pub mod hub;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;
pub(crate) mod supervisor;
