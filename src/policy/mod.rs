//! Policy decisions for intercepted filesystem operations
//!
//! # Decision Order
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  decide(pid, op)                                                │
//! │                                                                 │
//! │  1. pid ∈ block set ──────────────────────────► DENY            │
//! │  2. pid ∈ allow set ──────────────────────────► ALLOW           │
//! │  3. delay enabled && op modifies ─────────────► DELAY           │
//! │  4. classifier verdict contains pid ──► block ► DENY            │
//! │  5. otherwise ────────────────────────────────► ALLOW           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A denied operation is never reported to the caller as a failure: the
//! hook drops it and returns success, so the process cannot tell it has
//! been caught.
//!
//! # Known limitation
//!
//! Process identifiers are opaque. Once a pid is block-listed it stays
//! block-listed for the lifetime of this process, so if the OS recycles that
//! pid for an unrelated process, the new process inherits the block.

pub mod engine;
pub mod lists;
pub mod verdict;

pub use engine::{Decision, PolicyEngine};
pub use lists::ProcessSet;
pub use verdict::{VerdictFile, VerdictSource};

/// Process identifier as reported by the filesystem protocol layer
pub type Pid = u32;
