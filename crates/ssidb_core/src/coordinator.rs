//! Transaction coordination.
//!
//! A [`Coordinator`] runs next to one [`NodeEngine`] and drives the
//! transactions started there: snapshot reads on the keys' owners, buffered
//! writes, the prepare round, the vote merge and the commit or rollback
//! broadcast. Participants are reached only through a [`ClusterTransport`].

use crate::config::OrderingMode;
use crate::error::{CoreError, CoreResult};
use crate::messages::{CommitRequest, PrepareRequest, PrepareVote, ReadRequest, RollbackRequest};
use crate::node::NodeEngine;
use crate::total_order::TotalOrderSequencer;
use crate::transaction::{Transaction, TransactionState, WriteOp};
use crate::transport::ClusterTransport;
use crate::types::{GlobalTxId, Key, NodeAddress, Value};
use crate::version::{ClusterSnapshot, DistributedVersion, Version};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Coordinates transactions begun on one node.
pub struct Coordinator {
    node: Arc<NodeEngine>,
    transport: Arc<dyn ClusterTransport>,
    sequencer: Option<Arc<TotalOrderSequencer>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("node", self.node.address())
            .field("sequenced", &self.sequencer.is_some())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Creates a coordinator for `node`.
    pub fn new(node: Arc<NodeEngine>, transport: Arc<dyn ClusterTransport>) -> Self {
        Self {
            node,
            transport,
            sequencer: None,
        }
    }

    /// Uses `sequencer` to order prepares. Required under
    /// [`OrderingMode::TotalOrder`].
    #[must_use]
    pub fn with_sequencer(mut self, sequencer: Arc<TotalOrderSequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    /// Returns the local node.
    pub fn node(&self) -> &Arc<NodeEngine> {
        &self.node
    }

    /// Begins a transaction at the local node's current vector.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.begin_after(None)
    }

    /// Begins a transaction that also observes `last_commit`, typically the
    /// commit version of the caller's previous transaction.
    pub fn begin_after(&self, last_commit: Option<&DistributedVersion>) -> CoreResult<Transaction> {
        let current = self.node.current_vector();
        let begin = match last_commit {
            Some(last) => DistributedVersion::merge_max([&current, last])?,
            None => current,
        };
        let tx = Transaction::new(GlobalTxId::new(), self.node.address().clone(), begin);
        self.node.register_snapshot(tx.id(), tx.begin_version().clone());
        tracing::trace!(tx = %tx.id(), begin = %tx.begin_version(), "began transaction");
        Ok(tx)
    }

    /// Reads `key`. Buffered writes of the transaction win over the store.
    ///
    /// Any error rolls the transaction back.
    pub fn read(&self, tx: &mut Transaction, key: &Key) -> CoreResult<Option<Value>> {
        tx.ensure_active()?;
        match tx.pending_write(key) {
            Some(WriteOp::Put { value, .. }) => return Ok(Some(value.clone())),
            Some(WriteOp::Remove) => return Ok(None),
            None => {}
        }
        match self.read_remote(tx, key) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.abort(tx, &err);
                Err(err)
            }
        }
    }

    fn read_remote(&self, tx: &mut Transaction, key: &Key) -> CoreResult<Option<Value>> {
        let view = self.node.view()?;
        let owner = self
            .node
            .ownership()
            .primary_owner(key, &view)
            .ok_or_else(|| CoreError::invalid_operation(format!("no owner for key {key}")))?;
        let target = member(&view, owner)?;

        let request = ReadRequest {
            tx: tx.id(),
            key: key.clone(),
            tx_version: tx.tx_version().clone(),
            read_from: tx.read_from().clone(),
            from_write_tx: !tx.is_read_only(),
        };
        let response = self.transport.read(target, &request).into_result(target)?;

        // Recorded first so a rollback reaches the node that now pins the
        // transaction.
        tx.record_read(key.clone());
        tx.record_snapshot(response.node_index, response.position, &response.snapshot)?;

        if !response.most_recent && !tx.is_read_only() {
            let config = self.node.config();
            if !config.is_ssi() {
                return Err(CoreError::validation_failure(Some(key.clone())));
            }
            if config.is_total_order() && response.has_outgoing_edge {
                return Err(CoreError::cycle_detected(Some(key.clone())));
            }
        }
        Ok(response.state.into_value())
    }

    /// Buffers a put.
    pub fn write(&self, tx: &mut Transaction, key: Key, value: Value) -> CoreResult<()> {
        tx.put(key, value, None)
    }

    /// Buffers a put that expires `lifespan` after commit.
    pub fn write_with_lifespan(
        &self,
        tx: &mut Transaction,
        key: Key,
        value: Value,
        lifespan: Duration,
    ) -> CoreResult<()> {
        tx.put(key, value, Some(lifespan))
    }

    /// Buffers a removal.
    pub fn remove(&self, tx: &mut Transaction, key: Key) -> CoreResult<()> {
        tx.remove(key)
    }

    /// Sends the prepare to every participant and collects the votes.
    ///
    /// The votes are also kept on the transaction, so a later
    /// [`Coordinator::commit`] can finish it. Stops at the first refusal and
    /// rolls the transaction back.
    pub fn prepare(&self, tx: &mut Transaction) -> CoreResult<Vec<PrepareVote>> {
        tx.mark_preparing()?;
        match self.collect_votes(tx) {
            Ok(votes) => {
                tx.record_votes(votes.clone());
                Ok(votes)
            }
            Err(err) => {
                self.abort(tx, &err);
                Err(err)
            }
        }
    }

    fn collect_votes(&self, tx: &Transaction) -> CoreResult<Vec<PrepareVote>> {
        let view = self.node.view()?;
        let participants = self.participants(tx, &view)?;
        let mut request = PrepareRequest {
            tx: tx.id(),
            coordinator: self.node.address().clone(),
            tx_version: tx.tx_version().clone(),
            begin_version: tx.begin_version().clone(),
            read_from: tx.read_from().clone(),
            reads: tx.read_set().iter().cloned().collect(),
            modifications: tx.modifications(),
            total_order_sequence: None,
        };

        let send = |request: &PrepareRequest| -> CoreResult<Vec<PrepareVote>> {
            participants
                .iter()
                .map(|target| self.transport.prepare(target, request).into_result(target))
                .collect()
        };

        match self.node.config().ordering_mode {
            OrderingMode::TwoPhase => send(&request),
            OrderingMode::TotalOrder => {
                let sequencer = self.sequencer.as_ref().ok_or_else(|| {
                    CoreError::invalid_operation("total-order prepare without a sequencer")
                })?;
                sequencer.deliver(|sequence| {
                    request.total_order_sequence = Some(sequence);
                    send(&request)
                })
            }
        }
    }

    /// Combines the votes into the final commit version.
    ///
    /// Edge flags are OR-ed and a transaction with both edges aborts with
    /// `CycleDetected`. The dependency vectors are merged by minimum and
    /// capped by the commit version; coordinates no vote bounded take the
    /// commit version's value.
    ///
    /// Any error rolls the transaction back.
    pub fn merge_votes(
        &self,
        tx: &mut Transaction,
        votes: &[PrepareVote],
    ) -> CoreResult<DistributedVersion> {
        match self.merge(tx, votes) {
            Ok(commit) => Ok(commit),
            Err(err) => {
                self.abort(tx, &err);
                Err(err)
            }
        }
    }

    fn merge(&self, tx: &mut Transaction, votes: &[PrepareVote]) -> CoreResult<DistributedVersion> {
        let incoming = tx.has_incoming_edge() || votes.iter().any(|v| v.has_incoming_edge);
        let outgoing = tx.has_outgoing_edge() || votes.iter().any(|v| v.has_outgoing_edge);
        if self.node.config().is_ssi() && incoming && outgoing {
            tracing::debug!(tx = %tx.id(), "both dependency edges present");
            return Err(CoreError::cycle_detected(None));
        }

        let merged = if votes.is_empty() {
            tx.tx_version().clone()
        } else {
            DistributedVersion::merge_max(votes.iter().map(|vote| &vote.version))?
        };
        let view = self.node.view()?;
        let owners = self.write_owners(tx, &view);
        let commit = match self
            .node
            .generator()
            .calculate_commit_version(Some(&Version::Distributed(merged)), &owners)?
        {
            Version::Distributed(commit) => commit,
            other => return Err(CoreError::incompatible_view("distributed", other.kind())),
        };

        let deps = DistributedVersion::merge_min(
            std::iter::once(tx.computed_deps()).chain(votes.iter().map(|vote| &vote.computed_deps)),
        )?;
        let filled = (0..commit.len())
            .map(|index| match deps.get(index) {
                i64::MAX => commit.get(index),
                dep => dep.min(commit.get(index)),
            })
            .collect();
        let deps = DistributedVersion::new(commit.view_id(), filled);

        tracing::debug!(
            tx = %tx.id(),
            votes = votes.len(),
            commit = %commit,
            deps = %deps,
            incoming,
            outgoing,
            "merged votes"
        );
        tx.record_dependencies(incoming, outgoing, deps);
        Ok(commit)
    }

    /// Prepares, merges and commits `tx`. Returns the commit version.
    ///
    /// A transaction already prepared with [`Coordinator::prepare`] is
    /// finished from its kept votes. On any failure every participant is
    /// told to roll back and the abort is returned.
    pub fn commit(&self, tx: &mut Transaction) -> CoreResult<DistributedVersion> {
        let votes = match tx.state() {
            TransactionState::Active => {
                let participants = self
                    .node
                    .view()
                    .and_then(|view| self.participants(tx, &view));
                match participants {
                    Ok(participants) if participants.is_empty() => {
                        let commit = tx.tx_version().clone();
                        tx.mark_committed(commit.clone());
                        self.node.release_snapshot(tx.id());
                        return Ok(commit);
                    }
                    Ok(_) => self.prepare(tx)?,
                    Err(err) => {
                        self.abort(tx, &err);
                        return Err(err);
                    }
                }
            }
            TransactionState::Preparing => match tx.take_votes() {
                Some(votes) => votes,
                None => {
                    let err = CoreError::invalid_operation("prepared transaction has no votes");
                    self.abort(tx, &err);
                    return Err(err);
                }
            },
            TransactionState::Committed => {
                return Err(CoreError::invalid_operation("transaction already committed"));
            }
            TransactionState::Aborted => {
                return Err(CoreError::invalid_operation("transaction already aborted"));
            }
        };

        let commit = self.merge_votes(tx, &votes)?;
        self.commit_at(tx, commit)
    }

    /// Commits a prepared transaction at `commit`, the version returned by
    /// [`Coordinator::merge_votes`].
    ///
    /// Every participant applies the transaction once its own queue releases
    /// it. If some participant fails, the rest are told to roll back; the
    /// ones that had already applied keep the commit and are named in the
    /// `CommitFailed` abort.
    pub fn commit_at(
        &self,
        tx: &mut Transaction,
        commit: DistributedVersion,
    ) -> CoreResult<DistributedVersion> {
        if tx.state() != TransactionState::Preparing {
            return Err(CoreError::invalid_operation(format!(
                "only prepared transactions commit, {} is {:?}",
                tx.id(),
                tx.state()
            )));
        }
        tx.take_votes();
        match self.send_commit(tx, &commit) {
            Ok(()) => {
                tx.mark_committed(commit.clone());
                self.node.release_snapshot(tx.id());
                tracing::debug!(tx = %tx.id(), commit = %commit, "transaction committed");
                Ok(commit)
            }
            Err(err) => {
                self.abort(tx, &err);
                Err(err)
            }
        }
    }

    fn send_commit(&self, tx: &Transaction, commit: &DistributedVersion) -> CoreResult<()> {
        let view = self.node.view()?;
        let participants = self.participants(tx, &view)?;
        let request = CommitRequest {
            tx: tx.id(),
            commit_version: commit.clone(),
            computed_deps: tx.computed_deps().clone(),
            has_outgoing_edge: tx.has_outgoing_edge(),
        };
        // Each participant blocks until its own queue releases the
        // transaction, so the commits must not be sent one after another.
        let results: Vec<CoreResult<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = participants
                .iter()
                .map(|target| {
                    let request = &request;
                    scope.spawn(move || self.transport.commit(target, request).into_result(target))
                })
                .collect();
            handles
                .into_iter()
                .zip(&participants)
                .map(|(handle, target)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(CoreError::remote_failure(target.clone(), "commit panicked"))
                    })
                })
                .collect()
        });

        let mut applied = Vec::new();
        let mut failure = None;
        for (target, result) in participants.into_iter().zip(results) {
            match result {
                Ok(()) => applied.push(target),
                Err(err) => {
                    tracing::error!(tx = %tx.id(), node = %target, error = %err, "participant failed to commit");
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            None => Ok(()),
            Some(err) if applied.is_empty() => Err(err),
            Some(err) => {
                let key = match err {
                    CoreError::TransactionAborted { key, .. } => key,
                    _ => None,
                };
                Err(CoreError::commit_failed(key, applied))
            }
        }
    }

    /// Rolls `tx` back on every participant.
    pub fn rollback(&self, tx: &mut Transaction) -> CoreResult<()> {
        if !tx.is_active() && tx.state() != TransactionState::Preparing {
            return Err(CoreError::invalid_operation("transaction already finished"));
        }
        self.broadcast_rollback(tx);
        tx.mark_aborted();
        self.node.release_snapshot(tx.id());
        Ok(())
    }

    fn abort(&self, tx: &mut Transaction, err: &CoreError) {
        if err.is_abort() {
            self.node.record_abort(err);
        }
        tracing::warn!(tx = %tx.id(), error = %err, "transaction aborted");
        self.broadcast_rollback(tx);
        tx.mark_aborted();
        self.node.release_snapshot(tx.id());
    }

    fn broadcast_rollback(&self, tx: &Transaction) {
        let Ok(view) = self.node.view() else { return };
        let Ok(participants) = self.participants(tx, &view) else {
            return;
        };
        let request = RollbackRequest { tx: tx.id() };
        for target in &participants {
            if let Err(err) = self.transport.rollback(target, &request).into_result(target) {
                tracing::warn!(tx = %tx.id(), node = %target, error = %err, "rollback not delivered");
            }
        }
    }

    /// Addresses of the owners of every key `tx` read or wrote.
    pub fn participants(
        &self,
        tx: &Transaction,
        view: &ClusterSnapshot,
    ) -> CoreResult<Vec<NodeAddress>> {
        let ownership = self.node.ownership();
        let indexes: BTreeSet<usize> = tx
            .read_set()
            .iter()
            .chain(tx.writes().keys())
            .flat_map(|key| ownership.owners(key, view))
            .collect();
        indexes
            .into_iter()
            .map(|index| member(view, index).cloned())
            .collect()
    }

    /// Coordinates of the owners of every key `tx` wrote.
    pub fn write_owners(&self, tx: &Transaction, view: &ClusterSnapshot) -> Vec<usize> {
        let ownership = self.node.ownership();
        let owners: BTreeSet<usize> = tx
            .writes()
            .keys()
            .flat_map(|key| ownership.owners(key, view))
            .collect();
        owners.into_iter().collect()
    }
}

fn member(view: &ClusterSnapshot, index: usize) -> CoreResult<&NodeAddress> {
    view.member(index).ok_or_else(|| {
        CoreError::invalid_operation(format!("{} has no member {index}", view.view_id()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoreConfig, ValidationMode};
    use crate::error::AbortReason;
    use crate::ownership::ExplicitOwnership;
    use crate::transport::LoopbackTransport;
    use crate::types::ViewId;
    use crate::version::{EntryCreationVersion, ViewRegistry};

    const VIEW: ViewId = ViewId::new(1);

    struct Cluster {
        transport: Arc<LoopbackTransport>,
        coordinators: Vec<Coordinator>,
    }

    fn cluster(config: CoreConfig) -> Cluster {
        let members = vec![NodeAddress::from("n0"), NodeAddress::from("n1")];
        let views = Arc::new(ViewRegistry::with_view(ClusterSnapshot::new(
            VIEW,
            members.clone(),
        )));
        let ownership = Arc::new(
            ExplicitOwnership::default()
                .place("x", &["n0"])
                .place("y", &["n1"]),
        );
        let transport = Arc::new(LoopbackTransport::new());
        let sequencer = Arc::new(TotalOrderSequencer::new());
        let coordinators = members
            .into_iter()
            .map(|address| {
                let node = Arc::new(
                    NodeEngine::new(
                        config.clone(),
                        address,
                        Arc::clone(&views),
                        ownership.clone(),
                    )
                    .unwrap(),
                );
                transport.register(Arc::clone(&node));
                Coordinator::new(node, transport.clone()).with_sequencer(Arc::clone(&sequencer))
            })
            .collect();
        Cluster {
            transport,
            coordinators,
        }
    }

    fn v(counters: &[i64]) -> DistributedVersion {
        DistributedVersion::new(VIEW, counters.to_vec())
    }

    fn vote(version: &[i64], incoming: bool, outgoing: bool, deps: &[i64]) -> PrepareVote {
        PrepareVote {
            node: NodeAddress::from("n0"),
            node_index: 0,
            version: v(version),
            has_incoming_edge: incoming,
            has_outgoing_edge: outgoing,
            computed_deps: v(deps),
            read_only: false,
        }
    }

    #[test]
    fn write_then_read_across_nodes() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];

        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("x"), b"1".to_vec()).unwrap();
        coord.write(&mut tx, Key::from("y"), b"1".to_vec()).unwrap();
        assert_eq!(coord.read(&mut tx, &Key::from("x")).unwrap(), Some(b"1".to_vec()));
        let commit = coord.commit(&mut tx).unwrap();
        assert_eq!(commit, v(&[1, 1]));

        let other = &cluster.coordinators[1];
        let mut reader = other.begin().unwrap();
        assert_eq!(other.read(&mut reader, &Key::from("x")).unwrap(), Some(b"1".to_vec()));
        assert_eq!(other.read(&mut reader, &Key::from("y")).unwrap(), Some(b"1".to_vec()));
        other.commit(&mut reader).unwrap();
        assert_eq!(other.node().stats().snapshot().read_only_commits, 1);
    }

    #[test]
    fn empty_transaction_commits_locally() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        let mut tx = coord.begin().unwrap();
        assert_eq!(coord.commit(&mut tx).unwrap(), v(&[0, 0]));
        assert!(coord.node().min_active_snapshot().is_none());
    }

    #[test]
    fn merge_rejects_both_edges() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        let mut tx = coord.begin().unwrap();
        let votes = [
            vote(&[1, 0], true, false, &[i64::MAX, i64::MAX]),
            vote(&[0, 1], false, true, &[i64::MAX, i64::MAX]),
        ];
        let err = coord.merge_votes(&mut tx, &votes).unwrap_err();
        assert_eq!(err.abort_reason(), Some(&AbortReason::CycleDetected));
    }

    #[test]
    fn merge_fills_deps_from_commit() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("x"), vec![1]).unwrap();
        coord.write(&mut tx, Key::from("y"), vec![1]).unwrap();
        let votes = [
            vote(&[3, 1], false, true, &[i64::MAX, 1]),
            vote(&[0, 5], false, false, &[i64::MAX, i64::MAX]),
        ];
        let commit = coord.merge_votes(&mut tx, &votes).unwrap();
        assert_eq!(commit, v(&[5, 5]));
        assert_eq!(tx.computed_deps(), &v(&[5, 1]));
        assert!(tx.has_outgoing_edge());
    }

    #[test]
    fn plain_mode_aborts_stale_reads_of_writers() {
        let cluster = cluster(CoreConfig::default().validation_mode(ValidationMode::Plain));
        let coord = &cluster.coordinators[0];

        let mut seed = coord.begin().unwrap();
        coord.write(&mut seed, Key::from("x"), vec![1]).unwrap();
        coord.write(&mut seed, Key::from("y"), vec![1]).unwrap();
        coord.commit(&mut seed).unwrap();

        let mut t1 = coord.begin().unwrap();
        coord.read(&mut t1, &Key::from("x")).unwrap();
        coord.write(&mut t1, Key::from("z"), vec![9]).unwrap();

        let mut t2 = coord.begin().unwrap();
        coord.write(&mut t2, Key::from("x"), vec![2]).unwrap();
        coord.write(&mut t2, Key::from("y"), vec![2]).unwrap();
        coord.commit(&mut t2).unwrap();

        // t1 is pinned on n0 before t2, so n1 hides t2's write of y.
        let err = coord.read(&mut t1, &Key::from("y")).unwrap_err();
        assert_eq!(err.abort_reason(), Some(&AbortReason::ValidationFailure));
        assert!(!t1.is_active());
    }

    #[test]
    fn unreachable_participant_aborts() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        cluster.transport.set_down(&NodeAddress::from("n1"), true);

        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("y"), vec![1]).unwrap();
        let err = coord.commit(&mut tx).unwrap_err();
        assert!(matches!(
            err.abort_reason(),
            Some(AbortReason::RemoteParticipantFailure { .. })
        ));
        assert_eq!(coord.node().stats().snapshot().aborts_remote, 1);
    }

    #[test]
    fn total_order_requires_a_sequencer() {
        let cluster = cluster(CoreConfig::default().ordering_mode(OrderingMode::TotalOrder));
        let node = Arc::clone(cluster.coordinators[0].node());
        let bare = Coordinator::new(node, cluster.transport.clone());
        let mut tx = bare.begin().unwrap();
        bare.write(&mut tx, Key::from("x"), vec![1]).unwrap();
        assert!(matches!(
            bare.commit(&mut tx),
            Err(CoreError::InvalidOperation { .. })
        ));

        let coord = &cluster.coordinators[0];
        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("x"), vec![1]).unwrap();
        coord.commit(&mut tx).unwrap();
    }

    #[test]
    fn own_writes_are_read_back() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("x"), vec![7]).unwrap();
        assert_eq!(coord.read(&mut tx, &Key::from("x")).unwrap(), Some(vec![7]));
        coord.remove(&mut tx, Key::from("x")).unwrap();
        assert_eq!(coord.read(&mut tx, &Key::from("x")).unwrap(), None);
        assert!(tx.read_set().is_empty());
        coord.rollback(&mut tx).unwrap();
        assert!(coord.rollback(&mut tx).is_err());
    }

    #[test]
    fn prepared_transaction_commits_later() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("x"), vec![1]).unwrap();
        coord.write(&mut tx, Key::from("y"), vec![1]).unwrap();

        let votes = coord.prepare(&mut tx).unwrap();
        assert_eq!(votes.len(), 2);
        assert_eq!(tx.state(), TransactionState::Preparing);
        assert!(coord.prepare(&mut tx).is_err());

        assert_eq!(coord.commit(&mut tx).unwrap(), v(&[1, 1]));
        assert_eq!(tx.state(), TransactionState::Committed);
        for coordinator in &cluster.coordinators {
            assert!(coordinator.node().scheduler().is_empty());
        }
        assert!(coord.commit(&mut tx).is_err());
    }

    #[test]
    fn split_commit_uses_the_merged_version() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("x"), vec![1]).unwrap();

        let active = coord.commit_at(&mut tx, v(&[1, 0])).unwrap_err();
        assert!(matches!(active, CoreError::InvalidOperation { .. }));
        assert!(tx.is_active());

        let votes = coord.prepare(&mut tx).unwrap();
        let commit = coord.merge_votes(&mut tx, &votes).unwrap();
        assert_eq!(coord.commit_at(&mut tx, commit).unwrap(), v(&[1, 0]));
        assert_eq!(coord.node().current_vector(), v(&[1, 0]));
    }

    #[test]
    fn partial_commit_names_the_applied_participants() {
        let cluster = cluster(CoreConfig::default());
        let coord = &cluster.coordinators[0];
        let n1 = cluster.coordinators[1].node();
        n1.container()
            .write(
                &Key::from("y"),
                Some(vec![9]),
                Some(EntryCreationVersion::new(VIEW, 1, 9, 0, vec![0, 9])),
                false,
                None,
            )
            .unwrap();

        let mut tx = coord.begin().unwrap();
        coord.write(&mut tx, Key::from("x"), vec![1]).unwrap();
        coord.write(&mut tx, Key::from("y"), vec![1]).unwrap();
        let err = coord.commit(&mut tx).unwrap_err();

        assert!(matches!(
            err.abort_reason(),
            Some(AbortReason::CommitFailed { applied }) if applied == &[NodeAddress::from("n0")]
        ));
        assert_eq!(tx.state(), TransactionState::Aborted);
        assert_eq!(coord.node().container().history(&Key::from("x")).len(), 1);
        assert_eq!(n1.container().history(&Key::from("y")).len(), 1);
        assert_eq!(n1.log().len(), 1);
        assert!(n1.scheduler().is_empty());
    }
}
