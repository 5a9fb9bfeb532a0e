//! Concurrent stress workloads.
//!
//! The transfer workload moves one unit between random accounts from many
//! threads at once. Under serializable isolation the total balance never
//! changes, whatever aborts.

use crate::fixtures::TestCluster;
use rand::Rng;
use ssidb_core::{CoreResult, Key};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transactions attempted.
    pub total_txs: usize,
    /// Transactions committed.
    pub committed: usize,
    /// Transactions aborted.
    pub aborted: usize,
    /// Total duration.
    pub duration: Duration,
    /// Commits per second.
    pub commits_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(committed: usize, aborted: usize, duration: Duration) -> Self {
        let commits_per_second = if duration.as_secs_f64() > 0.0 {
            committed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            total_txs: committed + aborted,
            committed,
            aborted,
            duration,
            commits_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Transactions: {}", self.total_txs);
        println!("Committed: {}", self.committed);
        println!("Aborted: {}", self.aborted);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub transactions: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct accounts.
    pub accounts: usize,
    /// Starting balance of every account.
    pub initial_balance: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            transactions: 200,
            threads: 4,
            accounts: 8,
            initial_balance: 100,
        }
    }
}

/// Key of account `index`.
pub fn account_key(index: usize) -> Key {
    Key::from(format!("account:{index}"))
}

fn encode_balance(balance: u64) -> Vec<u8> {
    balance.to_le_bytes().to_vec()
}

/// Decodes a balance; anything malformed reads as zero.
pub fn decode_balance(bytes: Option<&[u8]>) -> u64 {
    bytes
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map_or(0, u64::from_le_bytes)
}

/// Creates every account with the initial balance in one transaction.
pub fn seed_accounts(cluster: &TestCluster, config: &StressConfig) -> CoreResult<()> {
    let coordinator = cluster.coordinator(0);
    let mut tx = coordinator.begin()?;
    for index in 0..config.accounts {
        coordinator.write(
            &mut tx,
            account_key(index),
            encode_balance(config.initial_balance),
        )?;
    }
    coordinator.commit(&mut tx).map(|_| ())
}

/// Sum of the newest committed balance of every account.
pub fn total_balance(cluster: &TestCluster, config: &StressConfig) -> u64 {
    (0..config.accounts)
        .map(|index| {
            let key = account_key(index);
            decode_balance(cluster.read_latest(&key.to_string()).as_deref())
        })
        .sum()
}

fn transfer(cluster: &TestCluster, coordinator: usize, from: Key, to: Key) -> CoreResult<()> {
    let coordinator = cluster.coordinator(coordinator);
    let mut tx = coordinator.begin()?;
    let source = decode_balance(coordinator.read(&mut tx, &from)?.as_deref());
    let target = decode_balance(coordinator.read(&mut tx, &to)?.as_deref());
    if source == 0 {
        return coordinator.commit(&mut tx).map(|_| ());
    }
    coordinator.write(&mut tx, from, encode_balance(source - 1))?;
    coordinator.write(&mut tx, to, encode_balance(target + 1))?;
    coordinator.commit(&mut tx).map(|_| ())
}

/// Runs concurrent transfers between random accounts. Threads coordinate on
/// every node in turn.
pub fn stress_transfers(cluster: &TestCluster, config: &StressConfig) -> StressTestResult {
    let committed = AtomicUsize::new(0);
    let aborted = AtomicUsize::new(0);
    let accounts = config.accounts.max(2);
    let start = Instant::now();

    thread::scope(|scope| {
        for thread_index in 0..config.threads {
            let committed = &committed;
            let aborted = &aborted;
            scope.spawn(move || {
                let mut rng = rand::thread_rng();
                for i in 0..config.transactions {
                    let from = rng.gen_range(0..accounts);
                    let to = (from + rng.gen_range(1..accounts)) % accounts;
                    let coordinator = (thread_index + i) % cluster.len();
                    match transfer(cluster, coordinator, account_key(from), account_key(to)) {
                        Ok(()) => committed.fetch_add(1, Ordering::Relaxed),
                        Err(err) => {
                            assert!(err.is_abort(), "unexpected failure: {err}");
                            aborted.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            });
        }
    });

    let result = StressTestResult::new(
        committed.load(Ordering::Relaxed),
        aborted.load(Ordering::Relaxed),
        start.elapsed(),
    );
    tracing::info!(
        committed = result.committed,
        aborted = result.aborted,
        "transfer stress finished"
    );
    result
}
