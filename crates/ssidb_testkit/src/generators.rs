//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values, versions and small transactional
//! workloads.

use proptest::prelude::*;
use ssidb_core::{DistributedVersion, Key, Value, NON_EXISTING};

use crate::fixtures::TEST_VIEW;

/// Strategy for keys drawn from a small alphabet so workloads collide.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop::sample::select(vec!["a", "b", "c", "d", "x", "y", "z"]).prop_map(Key::from)
}

/// Strategy for payloads.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec(any::<u8>(), 0..32)
}

/// Strategy for vectors of `members` coordinates, some of them unknown.
pub fn version_strategy(members: usize) -> impl Strategy<Value = DistributedVersion> {
    prop::collection::vec(
        prop_oneof![
            1 => Just(NON_EXISTING),
            9 => 0i64..64,
        ],
        members,
    )
    .prop_map(|counters| DistributedVersion::new(TEST_VIEW, counters))
}

/// One step of a generated workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadOp {
    /// Read a key.
    Read(Key),
    /// Put a value.
    Put(Key, Value),
    /// Remove a key.
    Remove(Key),
}

/// Strategy for a single workload step. Reads are twice as likely as writes.
pub fn workload_op_strategy() -> impl Strategy<Value = WorkloadOp> {
    prop_oneof![
        2 => key_strategy().prop_map(WorkloadOp::Read),
        2 => (key_strategy(), value_strategy()).prop_map(|(k, v)| WorkloadOp::Put(k, v)),
        1 => key_strategy().prop_map(WorkloadOp::Remove),
    ]
}

/// Strategy for a transaction body of up to `max_ops` steps.
pub fn transaction_strategy(max_ops: usize) -> impl Strategy<Value = Vec<WorkloadOp>> {
    prop::collection::vec(workload_op_strategy(), 1..=max_ops.max(1))
}

/// Strategy for a sequence of committed single-key values.
pub fn history_strategy(max_len: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(value_strategy(), 1..=max_len.max(1))
}
