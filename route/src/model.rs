//! Nodes, endpoints and routes.

use heapless::Vec;

use ringnet_abi::{RouteState, Script, Signature};

/// Nodes the engine can manage.
pub const MAX_NODES: usize = 16;

/// Routes the engine can supervise.
pub const MAX_ROUTES: usize = 16;

/// Scripts per node.
pub const MAX_NODE_SCRIPTS: usize = 8;

/// Resource descriptors per endpoint job list.
pub const MAX_JOBS: usize = 8;

/// Direction of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    Source,
    Sink,
}

/// A managed node: identity, configuration scripts, availability.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub signature: Signature,
    pub scripts: Vec<Script, MAX_NODE_SCRIPTS>,
    pub available: bool,
}

impl Node {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            scripts: Vec::new(),
            available: false,
        }
    }

    /// Operational address of the node.
    pub fn address(&self) -> u16 {
        self.signature.node_address
    }
}

/// One end of a route, anchored to a node by address.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub node_address: u16,
    /// Opaque resource descriptors consumed when the route is built.
    pub jobs: Vec<u16, MAX_JOBS>,
}

impl Endpoint {
    pub fn new(kind: EndpointKind, node_address: u16) -> Self {
        Self {
            kind,
            node_address,
            jobs: Vec::new(),
        }
    }
}

/// A source-to-sink connection with an application-chosen id.
#[derive(Clone, Debug)]
pub struct Route {
    pub route_id: u16,
    pub source: Endpoint,
    pub sink: Endpoint,
    pub active: bool,
    pub state: RouteState,
}

impl Route {
    pub fn new(route_id: u16, source: Endpoint, sink: Endpoint) -> Self {
        Self {
            route_id,
            source,
            sink,
            active: true,
            state: RouteState::Idle,
        }
    }
}
