//! Cluster-level transaction scenarios.

use ssidb_core::{
    AbortReason, ClusterSnapshot, CommitRequest, CoreConfig, CoreError, DistributedVersion,
    EntryCreationVersion, EntryState, GlobalTxId, Key, Modification, NodeEngine, OrderingMode, PrepareRequest,
    PrepareVote, QueueState, ValidationMode, ViewId,
};
use ssidb_testkit::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn key(name: &str) -> Key {
    Key::from(name)
}

fn put(name: &str, value: &str) -> Modification {
    Modification::Put {
        key: key(name),
        value: value.as_bytes().to_vec(),
        lifespan_ms: None,
    }
}

fn prepare_request(
    tx: GlobalTxId,
    version: &DistributedVersion,
    modifications: Vec<Modification>,
) -> PrepareRequest {
    PrepareRequest {
        tx,
        coordinator: node_address(0),
        tx_version: version.clone(),
        begin_version: version.clone(),
        read_from: BTreeMap::new(),
        reads: Vec::new(),
        modifications,
        total_order_sequence: None,
    }
}

fn commit_request(tx: GlobalTxId, votes: &[PrepareVote], owners: &[usize]) -> CommitRequest {
    let merged = DistributedVersion::merge_max(votes.iter().map(|vote| &vote.version)).unwrap();
    let commit = merged.commit_version(owners);
    CommitRequest {
        tx,
        computed_deps: commit.clone(),
        commit_version: commit,
        has_outgoing_edge: false,
    }
}

fn commit_on(node: &NodeEngine, request: &CommitRequest) {
    node.commit(request).unwrap();
}

#[test]
fn stale_read_with_concurrent_writer_is_a_cycle() {
    for ordering in [OrderingMode::TwoPhase, OrderingMode::TotalOrder] {
        let cluster = TestCluster::two_node_with(CoreConfig::default().ordering_mode(ordering));

        let t0 = cluster.commit_writes(0, &[("x", "1"), ("y", "1")]).unwrap();
        assert_eq!(t0, cluster.version(&[1, 1]));

        let coordinator = cluster.coordinator(0);
        let mut t1 = coordinator.begin().unwrap();
        assert_eq!(
            coordinator.read(&mut t1, &key("x")).unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(t1.tx_version(), &cluster.version(&[1, 1]));

        let t2 = cluster.commit_writes(1, &[("x", "2"), ("y", "2")]).unwrap();
        assert_eq!(t2, cluster.version(&[2, 2]));

        coordinator.write(&mut t1, key("y"), b"3".to_vec()).unwrap();
        let err = coordinator.commit(&mut t1).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(&AbortReason::CycleDetected),
            "{ordering}: {err}"
        );

        assert_eq!(cluster.read_latest("x"), Some(b"2".to_vec()));
        assert_eq!(cluster.read_latest("y"), Some(b"2".to_vec()));
        assert!(cluster.stats().aborts_cycle >= 1);
        for node in cluster.nodes() {
            assert_eq!(node.in_flight(), 0);
            assert!(node.scheduler().is_empty());
        }
    }
}

#[test]
fn plain_mode_reports_the_same_conflict_as_a_stale_read() {
    let cluster =
        TestCluster::two_node_with(CoreConfig::default().validation_mode(ValidationMode::Plain));
    cluster.commit_writes(0, &[("x", "1"), ("y", "1")]).unwrap();

    let coordinator = cluster.coordinator(0);
    let mut t1 = coordinator.begin().unwrap();
    coordinator.read(&mut t1, &key("x")).unwrap();
    cluster.commit_writes(1, &[("x", "2"), ("y", "2")]).unwrap();

    coordinator.write(&mut t1, key("y"), b"3".to_vec()).unwrap();
    let err = coordinator.commit(&mut t1).unwrap_err();
    assert_eq!(err.abort_reason(), Some(&AbortReason::ValidationFailure));
}

#[test]
fn pivot_with_both_edges_aborts() {
    let cluster = TestCluster::two_node();
    cluster
        .commit_writes(0, &[("x", "0"), ("y", "0"), ("z", "0")])
        .unwrap();

    // t1 reads y, then t2 overwrites y behind its back.
    let coordinator = cluster.coordinator(0);
    let mut t1 = coordinator.begin().unwrap();
    coordinator.read(&mut t1, &key("y")).unwrap();
    cluster.commit_writes(1, &[("y", "2")]).unwrap();

    // t3 reads z at t1's snapshot, so t1's write of z is invisible to it.
    let reader = cluster.coordinator(1);
    let mut t3 = reader.begin().unwrap();
    assert_eq!(reader.read(&mut t3, &key("z")).unwrap(), Some(b"0".to_vec()));
    reader.commit(&mut t3).unwrap();

    coordinator.write(&mut t1, key("x"), b"1".to_vec()).unwrap();
    coordinator.write(&mut t1, key("z"), b"1".to_vec()).unwrap();
    let err = coordinator.commit(&mut t1).unwrap_err();
    assert_eq!(err.abort_reason(), Some(&AbortReason::CycleDetected));
    assert_eq!(cluster.read_latest("z"), Some(b"0".to_vec()));
}

#[test]
fn one_edge_alone_commits() {
    let cluster = TestCluster::two_node();
    cluster.commit_writes(0, &[("x", "0"), ("y", "0")]).unwrap();

    let coordinator = cluster.coordinator(0);
    let mut t1 = coordinator.begin().unwrap();
    coordinator.read(&mut t1, &key("y")).unwrap();
    cluster.commit_writes(1, &[("y", "2")]).unwrap();

    coordinator.write(&mut t1, key("x"), b"1".to_vec()).unwrap();
    coordinator.commit(&mut t1).unwrap();
    assert!(t1.has_outgoing_edge());
    assert!(!t1.has_incoming_edge());
    assert_eq!(cluster.read_latest("x"), Some(b"1".to_vec()));
}

#[test]
fn commits_apply_in_version_order_on_every_node() {
    let cluster = TestCluster::two_node();
    let (n0, n1) = (cluster.node(0), cluster.node(1));
    let zero = cluster.version(&[0, 0]);
    let (a, b) = (GlobalTxId::new(), GlobalTxId::new());

    let a_votes = [
        n0.prepare(&prepare_request(a, &zero, vec![put("x", "a")])).unwrap(),
        n1.prepare(&prepare_request(a, &zero, vec![put("y", "a")])).unwrap(),
    ];
    let b_votes = [
        n0.prepare(&prepare_request(b, &zero, vec![put("x", "b")])).unwrap(),
        n1.prepare(&prepare_request(b, &zero, vec![put("y", "b")])).unwrap(),
    ];
    let a_commit = commit_request(a, &a_votes, &[0, 1]);
    let b_commit = commit_request(b, &b_votes, &[0, 1]);
    assert_eq!(a_commit.commit_version, cluster.version(&[1, 1]));
    assert_eq!(b_commit.commit_version, cluster.version(&[2, 2]));

    let b_done = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            thread::scope(|inner| {
                inner.spawn(|| commit_on(n0, &b_commit));
                inner.spawn(|| commit_on(n1, &b_commit));
            });
            b_done.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!b_done.load(Ordering::SeqCst));
        assert_eq!(n0.scheduler().state_of(b), Some(QueueState::Queued));
        assert_eq!(
            n1.container().read(&key("y"), None, 0).state,
            EntryState::NeverExisted
        );

        commit_on(n1, &a_commit);
        commit_on(n0, &a_commit);
    });

    assert!(b_done.load(Ordering::SeqCst));
    for (node, name) in [(n0, "x"), (n1, "y")] {
        let history: Vec<_> = node
            .container()
            .history(&key(name))
            .into_iter()
            .map(|body| body.value)
            .collect();
        assert_eq!(history, vec![Some(b"b".to_vec()), Some(b"a".to_vec())]);
        assert_eq!(node.current_vector(), cluster.version(&[2, 2]));
        assert!(node.stats().snapshot().queue_waits >= 1);
    }
}

#[test]
fn read_only_commit_waits_for_an_earlier_writer() {
    let cluster = TestCluster::two_node();
    cluster.commit_writes(0, &[("y", "0")]).unwrap();
    let n1 = cluster.node(1);

    let writer = GlobalTxId::new();
    let current = n1.current_vector();
    let vote = n1
        .prepare(&prepare_request(writer, &current, vec![put("y", "1")]))
        .unwrap();

    let coordinator = cluster.coordinator(0);
    let mut reader = coordinator.begin().unwrap();
    assert_eq!(coordinator.read(&mut reader, &key("y")).unwrap(), Some(b"0".to_vec()));

    let reader_done = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            coordinator.commit(&mut reader).unwrap();
            reader_done.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!reader_done.load(Ordering::SeqCst));

        commit_on(n1, &commit_request(writer, &[vote], &[1]));
    });

    assert!(reader_done.load(Ordering::SeqCst));
    assert_eq!(n1.stats().snapshot().read_only_commits, 1);
    let watermark = n1.container().entry(&key("y")).unwrap().visible_read();
    assert_eq!(watermark, 1);
    assert!(n1.container().was_read_since(&key("y"), 1));
}

#[test]
fn prepared_then_rolled_back_leaves_nothing() {
    let cluster = TestCluster::two_node();
    let coordinator = cluster.coordinator(0);
    let mut tx = coordinator.begin().unwrap();
    coordinator.write(&mut tx, key("x"), b"1".to_vec()).unwrap();
    coordinator.write(&mut tx, key("y"), b"1".to_vec()).unwrap();

    let votes = coordinator.prepare(&mut tx).unwrap();
    assert_eq!(votes.len(), 2);
    for (node, name) in [(cluster.node(0), "x"), (cluster.node(1), "y")] {
        assert_eq!(node.container().with_trace(&key(name), |t| t.len()), Some(1));
        assert_eq!(node.scheduler().len(), 1);
    }

    coordinator.rollback(&mut tx).unwrap();
    for (node, name) in [(cluster.node(0), "x"), (cluster.node(1), "y")] {
        assert_eq!(node.container().with_trace(&key(name), |t| t.len()), Some(0));
        assert!(node.scheduler().is_empty());
        assert_eq!(node.in_flight(), 0);
    }
    assert_eq!(cluster.read_latest("x"), None);
    assert!(cluster.node(0).min_active_snapshot().is_none());

    // The prepare clock moved on, but a fresh writer still commits.
    cluster.commit_writes(1, &[("x", "2")]).unwrap();
    assert_eq!(cluster.read_latest("x"), Some(b"2".to_vec()));
}

#[test]
fn failing_sink_never_aborts_a_commit() {
    let cluster = TestCluster::builder()
        .nodes(2)
        .place("x", &[0])
        .place("y", &[1])
        .sink(Arc::new(FailingSink))
        .build();

    cluster.commit_writes(0, &[("x", "1"), ("y", "1")]).unwrap();
    assert_eq!(cluster.read_latest("x"), Some(b"1".to_vec()));
    assert_eq!(cluster.read_latest("y"), Some(b"1".to_vec()));
    assert_eq!(cluster.stats().sink_failures, 2);
    assert_eq!(cluster.stats().aborts(), 0);
}

#[test]
fn sink_hears_each_commit_once_per_node() {
    let sink = Arc::new(RecordingSink::new());
    let cluster = TestCluster::builder()
        .nodes(2)
        .place("x", &[0])
        .place("y", &[1])
        .sink(sink.clone())
        .build();

    let coordinator = cluster.coordinator(0);
    let mut tx = coordinator.begin().unwrap();
    coordinator.write(&mut tx, key("x"), vec![1]).unwrap();
    coordinator.write(&mut tx, key("y"), vec![1]).unwrap();
    coordinator.commit(&mut tx).unwrap();
    assert_eq!(sink.commits_of(tx.id()), 2);
}

#[test]
fn prepares_from_another_view_are_refused() {
    let cluster = TestCluster::two_node();
    let old = cluster.version(&[0, 0]);
    cluster.views().install(ClusterSnapshot::new(
        ViewId::new(2),
        vec![node_address(0), node_address(1)],
    ));

    let err = cluster
        .node(0)
        .prepare(&prepare_request(GlobalTxId::new(), &old, vec![put("x", "1")]))
        .unwrap_err();
    assert!(matches!(err, CoreError::IncompatibleView { .. }));

    let newer = DistributedVersion::zero(ViewId::new(2), 2);
    assert!(matches!(
        DistributedVersion::merge_max([&old, &newer]),
        Err(CoreError::IncompatibleView { .. })
    ));
}

#[test]
fn unreachable_participant_aborts_everywhere() {
    let cluster = TestCluster::two_node();
    cluster.transport().set_down(&node_address(1), true);

    let coordinator = cluster.coordinator(0);
    let mut tx = coordinator.begin().unwrap();
    coordinator.write(&mut tx, key("x"), vec![1]).unwrap();
    coordinator.write(&mut tx, key("y"), vec![1]).unwrap();
    let err = coordinator.commit(&mut tx).unwrap_err();
    assert!(matches!(
        err.abort_reason(),
        Some(AbortReason::RemoteParticipantFailure { node, .. }) if *node == node_address(1)
    ));
    assert_eq!(cluster.node(0).in_flight(), 0);
    assert!(cluster.node(0).scheduler().is_empty());
}

#[test]
fn expired_values_read_as_absent() {
    let cluster = TestCluster::two_node();
    let coordinator = cluster.coordinator(0);
    let mut tx = coordinator.begin().unwrap();
    coordinator
        .write_with_lifespan(&mut tx, key("x"), vec![1], Duration::from_millis(1))
        .unwrap();
    coordinator.commit(&mut tx).unwrap();
    thread::sleep(Duration::from_millis(5));

    let mut reader = coordinator.begin().unwrap();
    assert_eq!(coordinator.read(&mut reader, &key("x")).unwrap(), None);
    assert_eq!(
        cluster.node(0).purge_expired(ssidb_core::node::now_millis()),
        1
    );
}

#[test]
fn partial_commit_reports_where_it_landed() {
    let cluster = TestCluster::two_node();
    cluster
        .node(1)
        .container()
        .write(
            &key("y"),
            Some(b"stray".to_vec()),
            Some(EntryCreationVersion::new(TEST_VIEW, 1, 9, 0, vec![0, 9])),
            false,
            None,
        )
        .unwrap();

    let coordinator = cluster.coordinator(0);
    let mut tx = coordinator.begin().unwrap();
    coordinator.write(&mut tx, key("x"), b"1".to_vec()).unwrap();
    coordinator.write(&mut tx, key("y"), b"1".to_vec()).unwrap();
    let err = coordinator.commit(&mut tx).unwrap_err();

    assert!(matches!(
        err.abort_reason(),
        Some(AbortReason::CommitFailed { applied }) if applied == &[node_address(0)]
    ));
    assert_eq!(cluster.read_latest("x"), Some(b"1".to_vec()));
    assert_eq!(cluster.read_latest("y"), Some(b"stray".to_vec()));
    for node in cluster.nodes() {
        assert!(node.scheduler().is_empty());
        assert_eq!(node.in_flight(), 0);
    }
}

#[test]
fn collection_waits_for_pinned_readers() {
    let cluster = TestCluster::two_node();
    cluster.commit_writes(0, &[("x", "1"), ("y", "1")]).unwrap();

    let reader_node = cluster.coordinator(1);
    let mut reader = reader_node.begin().unwrap();
    assert_eq!(reader_node.read(&mut reader, &key("y")).unwrap(), Some(b"1".to_vec()));
    for value in ["2", "3", "4"] {
        cluster.commit_writes(0, &[("x", value), ("y", value)]).unwrap();
    }

    cluster.collect_garbage();
    assert_eq!(reader_node.read(&mut reader, &key("y")).unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader_node.read(&mut reader, &key("x")).unwrap(), Some(b"1".to_vec()));
    reader_node.rollback(&mut reader).unwrap();

    assert!(cluster.collect_garbage() > 0);
    assert_eq!(cluster.read_latest("y"), Some(b"4".to_vec()));
}
