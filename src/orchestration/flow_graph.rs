//! Static, validated topology: which steps exist per flow, which transitions are legal,
//! and which utility flows may interrupt which others.
//!
//! A graph is only ever handed to the router after [`FlowGraph::validate`] passes; an
//! invalid graph is a load-time failure, never a runtime degradation.

use crate::config::{EdgeGuard, FlowConfig, KernelConfig, TerminalKind};
use crate::orchestration::error::RoutingError;
use crate::orchestration::evidence::NarrativeStatus;
use crate::shared::ids::{FlowKey, NodeId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub guard: Option<EdgeGuard>,
    pub max_iterations: Option<u32>,
}

impl Edge {
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    pub fn admits(&self, status: Option<NarrativeStatus>) -> bool {
        match (self.guard, status) {
            (None, _) => true,
            (Some(guard), Some(status)) => guard.admits(status),
            (Some(_), None) => false,
        }
    }

    pub fn describe(&self) -> String {
        match self.guard {
            Some(guard) => format!("{} -> {} [{}]", self.from, self.to, guard.label()),
            None => format!("{} -> {}", self.from, self.to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub key: FlowKey,
    pub entry: NodeId,
    nodes: BTreeMap<NodeId, Option<TerminalKind>>,
    edges: Vec<Edge>,
    injectable: BTreeSet<FlowKey>,
    reverify: Vec<NodeId>,
}

impl Flow {
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn terminals(&self) -> Vec<(&NodeId, TerminalKind)> {
        self.nodes
            .iter()
            .filter_map(|(id, kind)| kind.map(|kind| (id, kind)))
            .collect()
    }

    pub fn reverify_chain(&self) -> &[NodeId] {
        &self.reverify
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no flows are declared")]
    NoFlows,
    #[error("flow `{flow}` is declared more than once")]
    DuplicateFlow { flow: FlowKey },
    #[error("flow `{flow}` declares node `{node}` more than once")]
    DuplicateNode { flow: FlowKey, node: NodeId },
    #[error("flow `{flow}` entry `{entry}` is not a declared node")]
    MissingEntry { flow: FlowKey, entry: NodeId },
    #[error("flow `{flow}` has no terminal node")]
    NoTerminal { flow: FlowKey },
    #[error("flow `{flow}` edge `{from} -> {to}` references undeclared node `{node}`")]
    UnknownEdgeEndpoint {
        flow: FlowKey,
        from: NodeId,
        to: NodeId,
        node: NodeId,
    },
    #[error("flow `{flow}` declares edge `{from} -> {to}` more than once")]
    DuplicateEdge {
        flow: FlowKey,
        from: NodeId,
        to: NodeId,
    },
    #[error("flow `{flow}` node `{node}` is an orphan with no edges")]
    OrphanNode { flow: FlowKey, node: NodeId },
    #[error("flow `{flow}` node `{node}` is unreachable from entry")]
    UnreachableNode { flow: FlowKey, node: NodeId },
    #[error("flow `{flow}` non-terminal node `{node}` has no outgoing edge")]
    DeadEnd { flow: FlowKey, node: NodeId },
    #[error("flow `{flow}` terminal node `{node}` has an outgoing edge")]
    TerminalWithOutgoing { flow: FlowKey, node: NodeId },
    #[error("flow `{flow}` self-loop on `{node}` requires `max_iterations`")]
    SelfLoopWithoutCap { flow: FlowKey, node: NodeId },
    #[error("flow `{flow}` self-loop on `{node}` has `max_iterations` 0")]
    ZeroIterationCap { flow: FlowKey, node: NodeId },
    #[error("flow `{flow}` edge `{from} -> {to}` carries `max_iterations` but is not a self-loop")]
    CapOnNonLoopEdge {
        flow: FlowKey,
        from: NodeId,
        to: NodeId,
    },
    #[error("flow `{flow}` contains a cycle: {}", render_path(.path))]
    Cycle { flow: FlowKey, path: Vec<NodeId> },
    #[error("flow `{flow}` lists unknown injectable flow `{target}`")]
    UnknownInjectableFlow { flow: FlowKey, target: FlowKey },
    #[error("flow `{flow}` lists itself as injectable")]
    SelfInjection { flow: FlowKey },
    #[error("flow `{flow}` re-verification chain references unknown station `{station}`")]
    UnknownReverifyStation { flow: FlowKey, station: NodeId },
    #[error("station `{station}` is declared more than once")]
    DuplicateStation { station: NodeId },
}

fn render_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowGraph {
    flows: BTreeMap<FlowKey, Flow>,
    stations: BTreeSet<NodeId>,
}

impl FlowGraph {
    /// Builds and validates the graph; any error refuses startup.
    pub fn from_config(config: &KernelConfig) -> Result<Self, RoutingError> {
        let (graph, mut errors) = Self::assemble(&config.flows, &config.stations);
        errors.extend(graph.validate().err().unwrap_or_default());
        if errors.is_empty() {
            Ok(graph)
        } else {
            Err(RoutingError::GraphValidation(errors))
        }
    }

    fn assemble(flows: &[FlowConfig], stations: &[NodeId]) -> (Self, Vec<ValidationError>) {
        let mut errors = Vec::new();
        let mut station_set = BTreeSet::new();
        for station in stations {
            if !station_set.insert(station.clone()) {
                errors.push(ValidationError::DuplicateStation {
                    station: station.clone(),
                });
            }
        }

        let mut built = BTreeMap::new();
        for flow in flows {
            if built.contains_key(&flow.key) {
                errors.push(ValidationError::DuplicateFlow {
                    flow: flow.key.clone(),
                });
                continue;
            }
            let mut nodes = BTreeMap::new();
            for node in &flow.nodes {
                if nodes.insert(node.id.clone(), node.terminal).is_some() {
                    errors.push(ValidationError::DuplicateNode {
                        flow: flow.key.clone(),
                        node: node.id.clone(),
                    });
                }
            }
            let mut seen_edges = BTreeSet::new();
            let mut edges = Vec::new();
            for edge in &flow.edges {
                if !seen_edges.insert((edge.from.clone(), edge.to.clone())) {
                    errors.push(ValidationError::DuplicateEdge {
                        flow: flow.key.clone(),
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                    });
                    continue;
                }
                edges.push(Edge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    guard: edge.guard,
                    max_iterations: edge.max_iterations,
                });
            }
            built.insert(
                flow.key.clone(),
                Flow {
                    key: flow.key.clone(),
                    entry: flow.entry.clone(),
                    nodes,
                    edges,
                    injectable: flow.injectable.iter().cloned().collect(),
                    reverify: flow.reverify.clone(),
                },
            );
        }

        (
            Self {
                flows: built,
                stations: station_set,
            },
            errors,
        )
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.flows.is_empty() {
            errors.push(ValidationError::NoFlows);
        }
        for flow in self.flows.values() {
            self.validate_flow(flow, &mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_flow(&self, flow: &Flow, errors: &mut Vec<ValidationError>) {
        let key = &flow.key;
        let entry_known = flow.nodes.contains_key(&flow.entry);
        if !entry_known {
            errors.push(ValidationError::MissingEntry {
                flow: key.clone(),
                entry: flow.entry.clone(),
            });
        }
        if flow.nodes.values().all(Option::is_none) {
            errors.push(ValidationError::NoTerminal { flow: key.clone() });
        }

        let mut edges_ok = true;
        for edge in &flow.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !flow.nodes.contains_key(endpoint) {
                    edges_ok = false;
                    errors.push(ValidationError::UnknownEdgeEndpoint {
                        flow: key.clone(),
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
            match (edge.is_self_loop(), edge.max_iterations) {
                (true, None) => errors.push(ValidationError::SelfLoopWithoutCap {
                    flow: key.clone(),
                    node: edge.from.clone(),
                }),
                (true, Some(0)) => errors.push(ValidationError::ZeroIterationCap {
                    flow: key.clone(),
                    node: edge.from.clone(),
                }),
                (false, Some(_)) => errors.push(ValidationError::CapOnNonLoopEdge {
                    flow: key.clone(),
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                }),
                _ => {}
            }
        }

        for (node, terminal) in &flow.nodes {
            let outgoing = flow.edges.iter().any(|edge| &edge.from == node);
            let incoming = flow.edges.iter().any(|edge| &edge.to == node);
            if *node != flow.entry && !outgoing && !incoming {
                errors.push(ValidationError::OrphanNode {
                    flow: key.clone(),
                    node: node.clone(),
                });
                continue;
            }
            match terminal {
                Some(_) if outgoing => errors.push(ValidationError::TerminalWithOutgoing {
                    flow: key.clone(),
                    node: node.clone(),
                }),
                None if !outgoing => errors.push(ValidationError::DeadEnd {
                    flow: key.clone(),
                    node: node.clone(),
                }),
                _ => {}
            }
        }

        if entry_known && edges_ok {
            let reachable = reachable_from(flow);
            for node in flow.nodes.keys() {
                let orphan = *node != flow.entry
                    && !flow
                        .edges
                        .iter()
                        .any(|edge| &edge.from == node || &edge.to == node);
                if !orphan && !reachable.contains(node) {
                    errors.push(ValidationError::UnreachableNode {
                        flow: key.clone(),
                        node: node.clone(),
                    });
                }
            }
            if let Some(path) = find_cycle(flow) {
                errors.push(ValidationError::Cycle {
                    flow: key.clone(),
                    path,
                });
            }
        }

        for target in &flow.injectable {
            if target == key {
                errors.push(ValidationError::SelfInjection { flow: key.clone() });
            } else if !self.flows.contains_key(target) {
                errors.push(ValidationError::UnknownInjectableFlow {
                    flow: key.clone(),
                    target: target.clone(),
                });
            }
        }
        for station in &flow.reverify {
            if !self.is_known_station(station) {
                errors.push(ValidationError::UnknownReverifyStation {
                    flow: key.clone(),
                    station: station.clone(),
                });
            }
        }
    }

    pub fn flow(&self, flow_key: &FlowKey) -> Option<&Flow> {
        self.flows.get(flow_key)
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn entry(&self, flow_key: &FlowKey) -> Option<&NodeId> {
        self.flows.get(flow_key).map(|flow| &flow.entry)
    }

    pub fn contains_node(&self, flow_key: &FlowKey, node_id: &NodeId) -> bool {
        self.flows
            .get(flow_key)
            .is_some_and(|flow| flow.nodes.contains_key(node_id))
    }

    /// Outgoing edges in declaration order; the order drives CONTINUE priority.
    pub fn outgoing(&self, flow_key: &FlowKey, node_id: &NodeId) -> Vec<&Edge> {
        self.flows
            .get(flow_key)
            .map(|flow| {
                flow.edges
                    .iter()
                    .filter(|edge| &edge.from == node_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn legal_transitions(&self, flow_key: &FlowKey, node_id: &NodeId) -> BTreeSet<NodeId> {
        self.outgoing(flow_key, node_id)
            .into_iter()
            .map(|edge| edge.to.clone())
            .collect()
    }

    pub fn is_terminal(&self, flow_key: &FlowKey, node_id: &NodeId) -> bool {
        self.terminal_kind(flow_key, node_id).is_some()
    }

    pub fn terminal_kind(&self, flow_key: &FlowKey, node_id: &NodeId) -> Option<TerminalKind> {
        self.flows
            .get(flow_key)
            .and_then(|flow| flow.nodes.get(node_id).copied().flatten())
    }

    pub fn injectable_flows(&self, flow_key: &FlowKey) -> BTreeSet<FlowKey> {
        self.flows
            .get(flow_key)
            .map(|flow| flow.injectable.clone())
            .unwrap_or_default()
    }

    pub fn reverify_chain(&self, flow_key: &FlowKey) -> &[NodeId] {
        self.flows
            .get(flow_key)
            .map(Flow::reverify_chain)
            .unwrap_or_default()
    }

    /// A station is runnable inline when it is a node of any flow or a declared utility station.
    pub fn is_known_station(&self, station: &NodeId) -> bool {
        self.stations.contains(station)
            || self
                .flows
                .values()
                .any(|flow| flow.nodes.contains_key(station))
    }
}

fn reachable_from(flow: &Flow) -> BTreeSet<NodeId> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![flow.entry.clone()];
    while let Some(node) = pending.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        for edge in flow.edges.iter().filter(|edge| edge.from == node) {
            if !seen.contains(&edge.to) {
                pending.push(edge.to.clone());
            }
        }
    }
    seen
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search for a cycle, ignoring self-loops (bounded microloops).
fn find_cycle(flow: &Flow) -> Option<Vec<NodeId>> {
    let mut marks: BTreeMap<&NodeId, Mark> = BTreeMap::new();
    for start in flow.nodes.keys() {
        if marks.contains_key(start) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = visit(flow, start, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    flow: &'a Flow,
    node: &'a NodeId,
    marks: &mut BTreeMap<&'a NodeId, Mark>,
    path: &mut Vec<&'a NodeId>,
) -> Option<Vec<NodeId>> {
    marks.insert(node, Mark::Visiting);
    path.push(node);
    for edge in flow
        .edges
        .iter()
        .filter(|edge| &edge.from == node && !edge.is_self_loop())
    {
        match marks.get(&edge.to) {
            Some(Mark::Visiting) => {
                let start = path.iter().position(|entry| *entry == &edge.to).unwrap_or(0);
                let mut cycle = path[start..]
                    .iter()
                    .map(|entry| (*entry).clone())
                    .collect::<Vec<_>>();
                cycle.push(edge.to.clone());
                return Some(cycle);
            }
            Some(Mark::Done) => {}
            None => {
                if let Some(cycle) = visit(flow, &edge.to, marks, path) {
                    return Some(cycle);
                }
            }
        }
    }
    path.pop();
    marks.insert(node, Mark::Done);
    None
}
