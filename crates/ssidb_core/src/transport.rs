//! Transport seam between coordinators and participants.

use crate::error::{CoreError, CoreResult};
use crate::messages::{
    CommitRequest, PrepareRequest, PrepareVote, ReadRequest, ReadResponse, Response,
    RollbackRequest, SnapshotFloorRequest,
};
use crate::node::NodeEngine;
use crate::types::NodeAddress;
use crate::version::DistributedVersion;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Carries protocol calls to cluster members.
///
/// Implementations never fail outright: transport problems are reported as
/// [`Response::Exception`] or [`Response::Unsuccessful`].
pub trait ClusterTransport: Send + Sync {
    /// Snapshot read on `target`.
    fn read(&self, target: &NodeAddress, request: &ReadRequest) -> Response<ReadResponse>;

    /// Prepare on `target`.
    fn prepare(&self, target: &NodeAddress, request: &PrepareRequest) -> Response<PrepareVote>;

    /// Commit on `target`. May block until the target's queue releases the
    /// transaction.
    fn commit(&self, target: &NodeAddress, request: &CommitRequest) -> Response<()>;

    /// Rollback on `target`.
    fn rollback(&self, target: &NodeAddress, request: &RollbackRequest) -> Response<()>;

    /// Oldest live snapshot coordinated on `target`.
    fn snapshot_floor(
        &self,
        target: &NodeAddress,
        request: &SnapshotFloorRequest,
    ) -> Response<DistributedVersion>;
}

/// Encodes a message as CBOR.
pub fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|err| CoreError::transport(format!("encode failed: {err}")))?;
    Ok(bytes)
}

/// Decodes a CBOR message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes)
        .map_err(|err| CoreError::transport(format!("decode failed: {err}")))
}

fn round_trip<T: Serialize + DeserializeOwned>(value: &T) -> CoreResult<T> {
    decode(&encode(value)?)
}

/// In-process transport that routes calls to registered engines.
///
/// Every request and response is encoded to CBOR and decoded again so only
/// what survives serialization crosses the seam. Nodes can be marked down to
/// simulate unreachable participants.
#[derive(Default)]
pub struct LoopbackTransport {
    nodes: RwLock<HashMap<NodeAddress, Arc<NodeEngine>>>,
    down: RwLock<HashSet<NodeAddress>>,
}

impl LoopbackTransport {
    /// Creates a transport with no nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `node` reachable at its address.
    pub fn register(&self, node: Arc<NodeEngine>) {
        self.nodes.write().insert(node.address().clone(), node);
    }

    /// Returns the engine at `address`.
    pub fn node(&self, address: &NodeAddress) -> Option<Arc<NodeEngine>> {
        self.nodes.read().get(address).cloned()
    }

    /// Marks `address` unreachable or reachable again.
    pub fn set_down(&self, address: &NodeAddress, down: bool) {
        let mut set = self.down.write();
        if down {
            set.insert(address.clone());
        } else {
            set.remove(address);
        }
    }

    fn call<Req, Resp>(
        &self,
        target: &NodeAddress,
        request: &Req,
        handler: impl FnOnce(&NodeEngine, &Req) -> CoreResult<Resp>,
    ) -> Response<Resp>
    where
        Req: Serialize + DeserializeOwned,
        Resp: Serialize + DeserializeOwned,
    {
        if self.down.read().contains(target) {
            return Response::Unsuccessful;
        }
        let Some(node) = self.node(target) else {
            return Response::Unsuccessful;
        };
        let request = match round_trip(request) {
            Ok(request) => request,
            Err(err) => return Response::Exception(err.to_string()),
        };
        let response = Response::from_result(handler(&node, &request));
        round_trip(&response).unwrap_or_else(|err| Response::Exception(err.to_string()))
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("nodes", &self.nodes.read().len())
            .field("down", &self.down.read().len())
            .finish()
    }
}

impl ClusterTransport for LoopbackTransport {
    fn read(&self, target: &NodeAddress, request: &ReadRequest) -> Response<ReadResponse> {
        self.call(target, request, NodeEngine::read)
    }

    fn prepare(&self, target: &NodeAddress, request: &PrepareRequest) -> Response<PrepareVote> {
        self.call(target, request, NodeEngine::prepare)
    }

    fn commit(&self, target: &NodeAddress, request: &CommitRequest) -> Response<()> {
        self.call(target, request, NodeEngine::commit)
    }

    fn rollback(&self, target: &NodeAddress, request: &RollbackRequest) -> Response<()> {
        self.call(target, request, NodeEngine::rollback)
    }

    fn snapshot_floor(
        &self,
        target: &NodeAddress,
        request: &SnapshotFloorRequest,
    ) -> Response<DistributedVersion> {
        self.call(target, request, NodeEngine::snapshot_floor)
    }
}
