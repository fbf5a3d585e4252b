//! Network topology, link properties and the routing tree over them.

use std::collections::BTreeMap;

use grayhole::{Duration, NodeId, Rank};
use hashbrown::{HashMap, HashSet};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Rank of the tree anchor.
pub const ROOT_RANK: Rank = 256;

/// Rank added per hop away from the anchor.
pub const MIN_HOP_RANK_INCREASE: Rank = 256;

/// Properties of a network link between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Packet loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay: Duration::from_millis(10),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Network topology defining connectivity between nodes.
///
/// Links are bidirectional and stored once under their canonical pair.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(NodeId, NodeId), Link>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pair of nodes linked.
    pub fn fully_connected(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Each node linked only to its neighbors in the slice.
    pub fn chain(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// First node is the hub, linked to all others.
    pub fn star(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Random geometric topology in the unit square.
    ///
    /// Nodes are placed at seeded positions and linked when their distance is
    /// at most `radius`. A disconnected result is patched with the shortest
    /// bridging edges until every node is reachable.
    pub fn random_geometric(nodes: &[NodeId], seed: u64, radius: f64) -> Self {
        let mut topo = Self::new();
        if nodes.len() <= 1 {
            return topo;
        }

        let positions = generate_positions(nodes.len(), seed);

        let mut all_edges: Vec<(usize, usize, f64)> = Vec::new();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let dx = positions[i].0 - positions[j].0;
                let dy = positions[i].1 - positions[j].1;
                let dist = dx.hypot(dy);
                all_edges.push((i, j, dist));

                if dist <= radius {
                    topo.add_link(nodes[i], nodes[j], Link::default());
                }
            }
        }

        ensure_connectivity(&mut topo, nodes, &mut all_edges);
        topo
    }

    /// Add a bidirectional link between two nodes, replacing any existing one.
    pub fn add_link(&mut self, a: NodeId, b: NodeId, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn get_link(&self, a: NodeId, b: NodeId) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: NodeId, b: NodeId) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Check if two nodes are connected (link exists and is active).
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable over one active link, in ascending order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Number of links, active or not.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Disable all links crossing between partition groups.
    ///
    /// A node listed in no group is isolated from every grouped node.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    fn canonical_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

/// Seeded positions in the unit square.
fn generate_positions(count: usize, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.gen::<f64>(), rng.gen::<f64>()))
        .collect()
}

/// Add the shortest edges joining disconnected components (Kruskal over
/// union-find) until the graph is connected.
fn ensure_connectivity(topo: &mut Topology, nodes: &[NodeId], edges: &mut [(usize, usize, f64)]) {
    if nodes.len() <= 1 {
        return;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut parent: Vec<usize> = (0..nodes.len()).collect();
    let mut rank: Vec<usize> = vec![0; nodes.len()];

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        while parent[x] != root {
            let next = parent[x];
            parent[x] = root;
            x = next;
        }
        root
    }

    fn union(parent: &mut [usize], rank: &mut [usize], x: usize, y: usize) -> bool {
        let px = find(parent, x);
        let py = find(parent, y);
        if px == py {
            return false;
        }
        match rank[px].cmp(&rank[py]) {
            std::cmp::Ordering::Less => parent[px] = py,
            std::cmp::Ordering::Greater => parent[py] = px,
            std::cmp::Ordering::Equal => {
                parent[py] = px;
                rank[px] += 1;
            }
        }
        true
    }

    let mut components = nodes.len();
    for &(i, j, _) in edges.iter() {
        if topo.is_connected(nodes[i], nodes[j]) && union(&mut parent, &mut rank, i, j) {
            components -= 1;
        }
    }

    for &(i, j, _) in edges.iter() {
        if components == 1 {
            return;
        }
        if union(&mut parent, &mut rank, i, j) {
            topo.add_link(nodes[i], nodes[j], Link::default());
            components -= 1;
        }
    }
}

/// Shortest-hop routing tree rooted at the anchor.
///
/// Built breadth-first over active links. A node at depth `d + 1` adjacent
/// to several depth-`d` nodes takes the lowest identifier as its parent, so
/// the tree is a pure function of the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTree {
    root: NodeId,
    parents: BTreeMap<NodeId, NodeId>,
    depths: BTreeMap<NodeId, u16>,
}

impl RoutingTree {
    /// Compute the tree over `nodes`, anchored at `root`.
    ///
    /// A root outside `nodes` yields an empty tree.
    pub fn compute(topology: &Topology, nodes: &[NodeId], root: NodeId) -> Self {
        let members: HashSet<NodeId> = nodes.iter().copied().collect();
        let mut parents = BTreeMap::new();
        let mut depths = BTreeMap::new();

        if members.contains(&root) {
            depths.insert(root, 0u16);
            let mut level = vec![root];
            let mut depth = 0u16;
            while !level.is_empty() {
                depth = depth.saturating_add(1);
                level.sort_unstable();
                let mut next = Vec::new();
                for &node in &level {
                    for neighbor in topology.neighbors(node) {
                        if members.contains(&neighbor) && !depths.contains_key(&neighbor) {
                            depths.insert(neighbor, depth);
                            parents.insert(neighbor, node);
                            next.push(neighbor);
                        }
                    }
                }
                level = next;
            }
        }

        Self {
            root,
            parents,
            depths,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Whether `node` can reach the anchor.
    pub fn contains(&self, node: NodeId) -> bool {
        self.depths.contains_key(&node)
    }

    /// Preferred parent, `None` for the anchor and unreachable nodes.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(&node).copied()
    }

    /// Hop count to the anchor.
    pub fn depth(&self, node: NodeId) -> Option<u16> {
        self.depths.get(&node).copied()
    }

    pub fn rank(&self, node: NodeId) -> Option<Rank> {
        self.depth(node)
            .map(|d| ROOT_RANK.saturating_add(MIN_HOP_RANK_INCREASE.saturating_mul(d)))
    }

    /// Members of the tree in ascending order.
    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.depths.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    /// Path from `node` up to the anchor, both ends included.
    ///
    /// Empty when `node` is not in the tree.
    pub fn path_to_root(&self, node: NodeId) -> Vec<NodeId> {
        if !self.contains(node) {
            return Vec::new();
        }
        let mut path = vec![node];
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            path.push(parent);
            current = parent;
        }
        path
    }

    /// Next hop from `from` toward `to` along the tree.
    ///
    /// Packets climb toward the anchor until they reach an ancestor of the
    /// destination, then descend.
    pub fn next_hop(&self, from: NodeId, to: NodeId) -> Option<NodeId> {
        if from == to || !self.contains(from) || !self.contains(to) {
            return None;
        }
        let down = self.path_to_root(to);
        match down.iter().position(|&n| n == from) {
            // `from` is an ancestor of `to`: step to the child on the path.
            Some(idx) if idx > 0 => Some(down[idx - 1]),
            _ => self.parent(from),
        }
    }
}
