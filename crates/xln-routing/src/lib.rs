//! Gossip path lookup (spec §4.8).
//!
//! The consensus core never maintains a gossip graph itself; it only
//! consumes one through the [`RouteFinder`] capability, injected at
//! construction time into whichever entity replica originates a payment.
//! Production gossip transport and graph maintenance are out of scope.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use xln_types::EntityId;

/// Read-only path lookup: given `from` and `to`, return every known route
/// between them, in preference order. The first route is the one used; a
/// payment with no route is aborted by the caller rather than partially
/// forwarded (spec §4.8).
pub trait RouteFinder: Send + Sync {
    fn find_paths(&self, from: EntityId, to: EntityId) -> Vec<Vec<EntityId>>;
}

/// An in-memory adjacency-list graph, good enough to drive the multi-hop
/// scenarios in the testable-properties section. Edges are undirected:
/// an account between two entities can forward in either direction.
#[derive(Debug, Clone, Default)]
pub struct GossipGraph {
    edges: BTreeMap<EntityId, BTreeSet<EntityId>>,
}

impl GossipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bilateral account as a usable hop in both directions.
    pub fn add_edge(&mut self, a: EntityId, b: EntityId) {
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    /// Breadth-first search for the shortest path; BFS naturally yields the
    /// fewest-hops route first, which is the only ordering preference this
    /// implementation makes.
    fn shortest_path(&self, from: EntityId, to: EntityId) -> Option<Vec<EntityId>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut visited = BTreeSet::new();
        visited.insert(from);
        let mut queue = VecDeque::new();
        queue.push_back(vec![from]);
        while let Some(path) = queue.pop_front() {
            let last = *path.last().unwrap();
            let Some(neighbors) = self.edges.get(&last) else { continue };
            for &next in neighbors {
                if next == to {
                    let mut full = path.clone();
                    full.push(next);
                    return Some(full);
                }
                if visited.insert(next) {
                    let mut extended = path.clone();
                    extended.push(next);
                    queue.push_back(extended);
                }
            }
        }
        None
    }
}

impl RouteFinder for GossipGraph {
    fn find_paths(&self, from: EntityId, to: EntityId) -> Vec<Vec<EntityId>> {
        self.shortest_path(from, to).into_iter().collect()
    }
}
