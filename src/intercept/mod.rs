//! Interception layer between callers and the backing filesystem
//!
//! - `hooks` - open/create/read/write/rename/unlink entry points
//! - `handle` - open file handles and their per-handle lock
//! - `locks` - path-scoped locks for rename/unlink
//! - `backing` - the primitives the hooks delegate to

pub mod backing;
pub mod handle;
pub mod hooks;
pub mod locks;

pub use backing::{BackingStore, PassthroughStore};
pub use handle::GuardedFile;
pub use hooks::{CallerContext, Interceptor};
pub use locks::PathLocks;
