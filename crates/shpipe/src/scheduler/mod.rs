//! Flusher registry and the flush-all orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         State                               │
//! │  pending: Vec<PendingFlush>                                 │
//! │   [0] exec sh   closers: []          waits_for: []          │
//! │   [1] exec sed  closers: [junction]  waits_for: []          │
//! │   [2] write     closers: []          waits_for: [0, 1]      │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ flush_all
//! ┌──────────────────────────▼──────────────────────────────────┐
//! │  one task per entry, gated by its predecessors              │
//! │  first error → kill every flusher once                      │
//! │  completion  → RefCloser::release on each held endpoint     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod closer;
mod flush_all;
mod pending;

pub use closer::{Close, RefCloser};
pub use pending::PendingFlush;

pub(crate) use flush_all::flush_all;
