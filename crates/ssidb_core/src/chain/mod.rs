//! Per-key version and commit-trace chains.

mod arena;
mod trace_chain;
mod version_chain;

pub use arena::{Arena, SlotId};
pub use trace_chain::{CommitRecord, TraceChain};
pub use version_chain::{AppendOutcome, ChainLookup, VersionChain, VersionedBody};
