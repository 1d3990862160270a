//! Route supervision.
//!
//! Route state is a function of `(source available, sink available,
//! active)`: a route is built exactly while both endpoint nodes are
//! available and the route is active. When an endpoint node drops out
//! of a built route the route suspends, and every state change is
//! reported exactly once.

use heapless::Vec;

use ringnet_abi::{ApiError, RouteState, is_valid_node_address};

use crate::model::{MAX_NODES, MAX_ROUTES, Node, Route};

/// One route state change to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteChange {
    pub route_id: u16,
    pub state: RouteState,
}

#[derive(Default)]
pub struct RouteMgr {
    nodes: Vec<Node, MAX_NODES>,
    routes: Vec<Route, MAX_ROUTES>,
}

impl RouteMgr {
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            routes: Vec::new(),
        }
    }

    // --- registration -----------------------------------------------------

    /// Registers a managed node. The address must be valid and unused.
    pub fn add_node(&mut self, node: Node) -> Result<(), ApiError> {
        if !is_valid_node_address(node.address()) {
            return Err(ApiError::Parameter);
        }
        if self.node(node.address()).is_some() {
            return Err(ApiError::AlreadySet);
        }
        self.nodes.push(node).map_err(|_| ApiError::BufferOverflow)
    }

    /// Registers a route. Route ids are application-chosen but unique.
    pub fn add_route(&mut self, route: Route) -> Result<(), ApiError> {
        if self.routes.iter().any(|r| r.route_id == route.route_id) {
            return Err(ApiError::AlreadySet);
        }
        self.routes.push(route).map_err(|_| ApiError::BufferOverflow)
    }

    // --- lookup -----------------------------------------------------------

    pub fn node(&self, address: u16) -> Option<&Node> {
        self.nodes.iter().find(|n| n.address() == address)
    }

    pub fn node_mut(&mut self, address: u16) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.address() == address)
    }

    /// Finds the registered node matching a discovered signature by
    /// MAC identity (manager mode).
    pub fn node_by_mac(&self, sig: &ringnet_abi::Signature) -> Option<&Node> {
        self.nodes.iter().find(|n| {
            n.signature.mac_47_32 == sig.mac_47_32
                && n.signature.mac_31_16 == sig.mac_31_16
                && n.signature.mac_15_0 == sig.mac_15_0
        })
    }

    pub fn route(&self, route_id: u16) -> Option<&Route> {
        self.routes.iter().find(|r| r.route_id == route_id)
    }

    // --- state ------------------------------------------------------------

    /// Flags a node (un)available and returns the route state changes
    /// that follow.
    pub fn set_node_available(
        &mut self,
        address: u16,
        available: bool,
    ) -> Result<Vec<RouteChange, MAX_ROUTES>, ApiError> {
        let node = self
            .node_mut(address)
            .ok_or(ApiError::Parameter)?;
        if node.available == available {
            return Ok(Vec::new());
        }
        node.available = available;
        log::info!(
            "route: node {:#x} {}",
            address,
            if available { "available" } else { "unavailable" }
        );
        Ok(self.recompute())
    }

    /// (De)activates a route and returns the state changes.
    pub fn set_route_active(
        &mut self,
        route_id: u16,
        active: bool,
    ) -> Result<Vec<RouteChange, MAX_ROUTES>, ApiError> {
        let route = self
            .routes
            .iter_mut()
            .find(|r| r.route_id == route_id)
            .ok_or(ApiError::Parameter)?;
        if route.active == active {
            return Ok(Vec::new());
        }
        route.active = active;
        Ok(self.recompute())
    }

    /// Flags every node unavailable (net-off) and suspends what was
    /// built.
    pub fn all_nodes_unavailable(&mut self) -> Vec<RouteChange, MAX_ROUTES> {
        for node in self.nodes.iter_mut() {
            node.available = false;
        }
        self.recompute()
    }

    fn recompute(&mut self) -> Vec<RouteChange, MAX_ROUTES> {
        let mut changes = Vec::new();
        for i in 0..self.routes.len() {
            let both_available = {
                let r = &self.routes[i];
                let src = self.nodes.iter().find(|n| n.address() == r.source.node_address);
                let snk = self.nodes.iter().find(|n| n.address() == r.sink.node_address);
                src.is_some_and(|n| n.available) && snk.is_some_and(|n| n.available)
            };
            let r = &mut self.routes[i];
            let next = if r.active && both_available {
                RouteState::Built
            } else if !r.active {
                RouteState::Idle
            } else if matches!(r.state, RouteState::Built | RouteState::Suspended) {
                RouteState::Suspended
            } else {
                RouteState::Idle
            };
            if next != r.state {
                r.state = next;
                // capacity matches the route table
                let _ = changes.push(RouteChange {
                    route_id: r.route_id,
                    state: next,
                });
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Endpoint, EndpointKind};
    use ringnet_abi::Signature;

    fn node(addr: u16) -> Node {
        Node::new(Signature {
            node_address: addr,
            mac_15_0: addr,
            ..Signature::default()
        })
    }

    fn mgr_with_route() -> RouteMgr {
        let mut mgr = RouteMgr::new();
        mgr.add_node(node(0x0101)).unwrap();
        mgr.add_node(node(0x0102)).unwrap();
        mgr.add_route(Route::new(
            7,
            Endpoint::new(EndpointKind::Source, 0x0101),
            Endpoint::new(EndpointKind::Sink, 0x0102),
        ))
        .unwrap();
        mgr
    }

    #[test]
    fn builds_when_both_available_and_active() {
        let mut mgr = mgr_with_route();
        assert!(mgr.set_node_available(0x0101, true).unwrap().is_empty());
        let changes = mgr.set_node_available(0x0102, true).unwrap();
        assert_eq!(
            changes.as_slice(),
            &[RouteChange {
                route_id: 7,
                state: RouteState::Built
            }]
        );
    }

    #[test]
    fn availability_drop_suspends_once() {
        let mut mgr = mgr_with_route();
        mgr.set_node_available(0x0101, true).unwrap();
        mgr.set_node_available(0x0102, true).unwrap();
        let changes = mgr.set_node_available(0x0102, false).unwrap();
        assert_eq!(
            changes.as_slice(),
            &[RouteChange {
                route_id: 7,
                state: RouteState::Suspended
            }]
        );
        // repeating the flip reports nothing new
        assert!(mgr.set_node_available(0x0102, false).unwrap().is_empty());
        // recovery rebuilds
        let changes = mgr.set_node_available(0x0102, true).unwrap();
        assert_eq!(changes[0].state, RouteState::Built);
    }

    #[test]
    fn deactivation_idles() {
        let mut mgr = mgr_with_route();
        mgr.set_node_available(0x0101, true).unwrap();
        mgr.set_node_available(0x0102, true).unwrap();
        let changes = mgr.set_route_active(7, false).unwrap();
        assert_eq!(changes[0].state, RouteState::Idle);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut mgr = mgr_with_route();
        assert_eq!(mgr.add_node(node(0x0101)), Err(ApiError::AlreadySet));
        assert_eq!(
            mgr.add_node(node(0x0300)),
            Err(ApiError::Parameter)
        );
    }

    #[test]
    fn net_off_suspends_everything() {
        let mut mgr = mgr_with_route();
        mgr.set_node_available(0x0101, true).unwrap();
        mgr.set_node_available(0x0102, true).unwrap();
        let changes = mgr.all_nodes_unavailable();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].state, RouteState::Suspended);
    }
}
