//! Concurrent transfer workloads.

use ssidb_core::{CoreConfig, OrderingMode, ValidationMode};
use ssidb_testkit::prelude::*;

fn run(cluster: &TestCluster, name: &str) {
    let config = StressConfig {
        transactions: 100,
        threads: 4,
        accounts: 6,
        initial_balance: 50,
    };
    seed_accounts(cluster, &config).unwrap();

    let result = stress_transfers(cluster, &config);
    result.print_summary(name);

    assert_eq!(result.total_txs, config.transactions * config.threads);
    assert!(result.committed > 0);
    assert_eq!(
        total_balance(cluster, &config),
        config.initial_balance * config.accounts as u64
    );
    for node in cluster.nodes() {
        assert_eq!(node.in_flight(), 0);
        assert!(node.scheduler().is_empty());
    }
    cluster.collect_garbage();
    assert_eq!(
        total_balance(cluster, &config),
        config.initial_balance * config.accounts as u64
    );
}

#[test]
fn ssi_transfers_conserve_money() {
    let cluster = TestCluster::builder().nodes(3).build();
    run(&cluster, "ssi / two-phase");
}

#[test]
fn plain_total_order_transfers_conserve_money() {
    let config = CoreConfig::default()
        .validation_mode(ValidationMode::Plain)
        .ordering_mode(OrderingMode::TotalOrder);
    let cluster = TestCluster::builder().nodes(3).config(config).build();
    run(&cluster, "plain / total-order");
}
