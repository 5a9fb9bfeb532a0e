//! Per-transaction context.
//!
//! A [`Transaction`] carries everything the protocol needs between calls:
//! begin and working versions, the nodes already read from, the read and
//! write sets, the dependency edges found at prepare and the final commit
//! vector. Nothing is kept in ambient state.

mod state;

pub use state::{Modification, Transaction, TransactionState, WriteOp};
