//! Simulate command implementation.

use super::CommandError;
use serde::Serialize;
use ssidb_core::{CoreConfig, CoreError, CoreResult, Key, LocalCluster, StatsSnapshot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Starting balance of every account.
const INITIAL_BALANCE: u64 = 100;

/// Workload shape for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of nodes.
    pub nodes: usize,
    /// Client threads.
    pub threads: usize,
    /// Transactions per thread.
    pub transactions: usize,
    /// Number of accounts.
    pub accounts: usize,
}

/// Outcome of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Validation mode used.
    pub mode: String,
    /// Ordering mode used.
    pub ordering: String,
    /// Number of nodes.
    pub nodes: usize,
    /// Transactions committed.
    pub committed: usize,
    /// Transactions aborted.
    pub aborted: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u128,
    /// Commit throughput.
    pub commits_per_second: f64,
    /// Balance that every run must preserve.
    pub expected_balance: u64,
    /// Balance observed after the run.
    pub total_balance: u64,
    /// Slots reclaimed by the final garbage collection.
    pub reclaimed: usize,
    /// Statistics summed over every node.
    pub stats: StatsSnapshot,
}

/// Runs the simulate command.
pub fn run(
    config: CoreConfig,
    options: &SimulateOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if options.nodes == 0 || options.threads == 0 {
        return Err(CommandError::InvalidArgument("nodes and threads must be positive".into()).into());
    }
    if options.accounts < 2 {
        return Err(CommandError::InvalidArgument("at least two accounts are needed".into()).into());
    }
    if format != "text" && format != "json" {
        return Err(CommandError::UnknownFormat(format.to_string()).into());
    }

    let report = simulate(config, options)?;
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.total_balance != report.expected_balance {
        return Err(CommandError::Invariant(format!(
            "balance drifted from {} to {}",
            report.expected_balance, report.total_balance
        ))
        .into());
    }
    Ok(())
}

fn account(index: usize) -> Key {
    Key::from(format!("account:{index}"))
}

fn encode(balance: u64) -> Vec<u8> {
    balance.to_le_bytes().to_vec()
}

fn decode(bytes: Option<&[u8]>) -> u64 {
    bytes
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map_or(0, u64::from_le_bytes)
}

fn seed(cluster: &LocalCluster, accounts: usize) -> CoreResult<()> {
    let coordinator = cluster.coordinator(0);
    let mut tx = coordinator.begin()?;
    for index in 0..accounts {
        coordinator.write(&mut tx, account(index), encode(INITIAL_BALANCE))?;
    }
    coordinator.commit(&mut tx).map(|_| ())
}

fn transfer(cluster: &LocalCluster, coordinator: usize, from: Key, to: Key) -> CoreResult<()> {
    let coordinator = cluster.coordinator(coordinator);
    let mut tx = coordinator.begin()?;
    let source = decode(coordinator.read(&mut tx, &from)?.as_deref());
    let target = decode(coordinator.read(&mut tx, &to)?.as_deref());
    if source > 0 {
        coordinator.write(&mut tx, from, encode(source - 1))?;
        coordinator.write(&mut tx, to, encode(target + 1))?;
    }
    coordinator.commit(&mut tx).map(|_| ())
}

/// Counts of a transfer run.
struct Transfers {
    committed: usize,
    aborted: usize,
    duration: Duration,
}

/// Runs every thread's transfers concurrently. Thread `t` moves a unit from
/// account `t + i` to the account `1 + i % (accounts - 1)` places after it
/// and coordinates on the nodes in turn.
fn run_transfers(cluster: &LocalCluster, options: &SimulateOptions) -> CoreResult<Transfers> {
    let committed = AtomicUsize::new(0);
    let aborted = AtomicUsize::new(0);
    let accounts = options.accounts;
    let start = Instant::now();

    let failures: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..options.threads)
            .map(|thread_index| {
                let committed = &committed;
                let aborted = &aborted;
                scope.spawn(move || -> CoreResult<()> {
                    for i in 0..options.transactions {
                        let from = (thread_index + i) % accounts;
                        let to = (from + 1 + i % (accounts - 1)) % accounts;
                        let node = (thread_index + i) % cluster.len();
                        match transfer(cluster, node, account(from), account(to)) {
                            Ok(()) => committed.fetch_add(1, Ordering::Relaxed),
                            Err(err) if err.is_abort() => aborted.fetch_add(1, Ordering::Relaxed),
                            Err(err) => return Err(err),
                        };
                    }
                    Ok(())
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| {
                    Err(CoreError::invalid_operation("transfer thread panicked"))
                })
            })
            .filter_map(Result::err)
            .collect()
    });
    if let Some(err) = failures.into_iter().next() {
        return Err(err);
    }

    Ok(Transfers {
        committed: committed.load(Ordering::Relaxed),
        aborted: aborted.load(Ordering::Relaxed),
        duration: start.elapsed(),
    })
}

fn total_balance(cluster: &LocalCluster, accounts: usize) -> CoreResult<u64> {
    (0..accounts)
        .map(|index| -> CoreResult<u64> {
            Ok(decode(cluster.read_latest(&account(index))?.as_deref()))
        })
        .sum()
}

fn simulate(
    config: CoreConfig,
    options: &SimulateOptions,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let mode = config.validation_mode.to_string();
    let ordering = config.ordering_mode.to_string();
    let cluster = LocalCluster::builder()
        .nodes(options.nodes)
        .config(config)
        .build()?;

    seed(&cluster, options.accounts)?;
    tracing::info!(nodes = options.nodes, threads = options.threads, %mode, %ordering, "starting simulation");
    let transfers = run_transfers(&cluster, options)?;
    let reclaimed = cluster.collect_garbage()?;
    let seconds = transfers.duration.as_secs_f64();
    tracing::info!(
        committed = transfers.committed,
        aborted = transfers.aborted,
        reclaimed,
        "simulation finished"
    );

    Ok(SimulationReport {
        mode,
        ordering,
        nodes: cluster.len(),
        committed: transfers.committed,
        aborted: transfers.aborted,
        duration_ms: transfers.duration.as_millis(),
        commits_per_second: if seconds > 0.0 {
            transfers.committed as f64 / seconds
        } else {
            0.0
        },
        expected_balance: INITIAL_BALANCE * options.accounts as u64,
        total_balance: total_balance(&cluster, options.accounts)?,
        reclaimed,
        stats: cluster.stats(),
    })
}

fn print_report(report: &SimulationReport) {
    println!(
        "Simulated {} nodes ({}, {})",
        report.nodes, report.mode, report.ordering
    );
    println!();
    println!("  Committed:   {}", report.committed);
    println!("  Aborted:     {}", report.aborted);
    println!("  Duration:    {} ms", report.duration_ms);
    println!("  Throughput:  {:.2} commits/sec", report.commits_per_second);
    println!(
        "  Balance:     {} (expected {})",
        report.total_balance, report.expected_balance
    );
    println!("  Reclaimed:   {} slots", report.reclaimed);
    println!();
    println!("Aborts by reason:");
    println!("  validation:  {}", report.stats.aborts_validation);
    println!("  cycle:       {}", report.stats.aborts_cycle);
    println!("  remote:      {}", report.stats.aborts_remote);
    println!("  commit:      {}", report.stats.aborts_commit);
    println!("Queue waits:   {}", report.stats.queue_waits);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_simulation_preserves_balance() {
        let options = SimulateOptions {
            nodes: 2,
            threads: 2,
            transactions: 20,
            accounts: 4,
        };
        let report = simulate(CoreConfig::default(), &options).unwrap();
        assert_eq!(report.committed + report.aborted, 40);
        assert_eq!(report.total_balance, report.expected_balance);
        assert!(serde_json::to_string(&report).unwrap().contains("\"mode\":\"ssi\""));
    }

    #[test]
    fn single_thread_never_aborts() {
        let options = SimulateOptions {
            nodes: 3,
            threads: 1,
            transactions: 15,
            accounts: 3,
        };
        let report = simulate(CoreConfig::default(), &options).unwrap();
        assert_eq!(report.committed, 15);
        assert_eq!(report.aborted, 0);
        assert_eq!(report.total_balance, 300);
        assert_eq!(decode(Some(&encode(7))), 7);
        assert_eq!(decode(Some(b"bad")), 0);
    }

    #[test]
    fn rejects_bad_arguments() {
        let options = SimulateOptions {
            nodes: 2,
            threads: 1,
            transactions: 1,
            accounts: 1,
        };
        assert!(run(CoreConfig::default(), &options, "text").is_err());
        let options = SimulateOptions {
            accounts: 4,
            ..options
        };
        assert!(run(CoreConfig::default(), &options, "yaml").is_err());
    }
}
