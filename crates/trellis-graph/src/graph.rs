use std::collections::HashMap;

use tracing::{debug, info};

use trellis_core::error::{Result, TrellisError};
use trellis_core::store::ContextStore;

use crate::compose::DepSnapshot;
use crate::mutation::GraphMutation;
use crate::node::Node;

/// A DAG of prompt nodes with a round-scoped temporary overlay.
///
/// Permanent nodes and edges are declared up front; validators may grow
/// or shrink the graph while a round runs through [`GraphMutation`]s.
/// Every temporary change is reverted when the round finalizes, so the
/// permanent topology is byte-identical across rounds.
///
/// All structural preconditions are contract violations, not runtime
/// conditions: breaking one panics.
pub struct Graph {
    nodes: HashMap<String, Node>,
    /// Permanent keys in insertion order; queue seeding and scanning stay
    /// deterministic.
    node_order: Vec<String>,
    temporary_nodes: HashMap<String, Node>,
    temporary_edges: Vec<(String, String)>,
    temporary_removed_edges: Vec<(String, String)>,
    queue: Vec<String>,
    round_results: HashMap<String, String>,
    order: Vec<String>,
    history: Vec<HashMap<String, String>>,
    rounds: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            node_order: Vec::new(),
            temporary_nodes: HashMap::new(),
            temporary_edges: Vec::new(),
            temporary_removed_edges: Vec::new(),
            queue: Vec::new(),
            round_results: HashMap::new(),
            order: Vec::new(),
            history: Vec::new(),
            rounds: 0,
        }
    }

    /// Add a permanent node.
    ///
    /// # Panics
    ///
    /// Panics if the key already exists.
    pub fn add_node(&mut self, node: Node) {
        let key = node.key().to_string();
        assert!(
            !self.nodes.contains_key(&key),
            "Node '{}' already exists",
            key
        );
        self.node_order.push(key.clone());
        self.nodes.insert(key, node);
    }

    /// Add a permanent dependency edge: `to` consumes `from`'s result.
    /// `prepend` puts `from` first in `to`'s dependency list.
    ///
    /// # Panics
    ///
    /// Panics if either endpoint is missing from the permanent graph or
    /// the edge already exists.
    pub fn add_edge(&mut self, from: &str, to: &str, prepend: bool) {
        assert!(
            self.nodes.contains_key(from) && self.nodes.contains_key(to),
            "Node ('{}', '{}') not found in graph",
            from,
            to
        );
        assert!(
            !self.has_edge(from, to),
            "Edge ('{}', '{}') already exists",
            from,
            to
        );
        self.link(from, to, prepend);
    }

    /// Add a permanent order-only constraint: `to` waits for `from` but
    /// no data flows.
    ///
    /// # Panics
    ///
    /// Panics if either endpoint is missing or a dependency edge already
    /// covers the pair (an edge already implies the ordering).
    pub fn add_order(&mut self, from: &str, to: &str) {
        assert!(
            self.nodes.contains_key(from) && self.nodes.contains_key(to),
            "Node ('{}', '{}') not found in graph",
            from,
            to
        );
        assert!(
            !self.has_edge(from, to),
            "Edge ('{}', '{}') already exists. No need to specify order",
            from,
            to
        );
        self.any_node_mut(to).evaluate_after.push(from.to_string());
    }

    /// Look up a node across the permanent and temporary sets.
    pub fn node(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key).or_else(|| self.temporary_nodes.get(key))
    }

    /// Whether a dependency edge exists, considering the temporary
    /// overlay.
    ///
    /// # Panics
    ///
    /// Panics if either endpoint is missing.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.any_node(from);
        self.any_node(to)
            .adjacent_from
            .iter()
            .any(|key| key == from)
    }

    /// Results of completed rounds, oldest first. One map per round; keys
    /// are exactly the node ids evaluated that round.
    pub fn history(&self) -> &[HashMap<String, String>] {
        &self.history
    }

    /// Node keys in the order they were selected during the last round.
    pub fn selection_order(&self) -> &[String] {
        &self.order
    }

    /// Number of completed rounds; always equals `history().len()`.
    /// Stalled or failed rounds are not counted.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Evaluate every node once, respecting dependency and order
    /// constraints, and return the round's `id -> result` map.
    ///
    /// Nodes run strictly sequentially. A node's validator may mutate the
    /// graph mid-round; mutations are applied by this driver immediately
    /// after the requesting node completes. When no more work is
    /// selectable the temporary overlay is reverted and the results are
    /// snapshotted into [`Self::history`].
    ///
    /// Unevaluated nodes remaining at quiescence mean a dependency cycle
    /// (or an edge into the round from a node that never ran):
    /// [`TrellisError::GraphStalled`] is returned after the permanent
    /// topology has been restored. A node evaluation error likewise
    /// discards the partial round and restores the topology before
    /// propagating, so the graph stays usable for another round.
    ///
    /// # Panics
    ///
    /// Panics if a previous round left temporary state behind, or if a
    /// validator mutation violates a graph invariant.
    pub async fn evaluate(&mut self, store: &mut ContextStore) -> Result<HashMap<String, String>> {
        assert!(
            self.temporary_nodes.is_empty()
                && self.temporary_edges.is_empty()
                && self.temporary_removed_edges.is_empty(),
            "Temporary state must be cleared before calling evaluate()"
        );
        assert!(
            self.round_results.is_empty(),
            "A round is already in progress"
        );

        self.queue = self
            .node_order
            .iter()
            .filter(|key| self.nodes[key.as_str()].adjacent_from.is_empty())
            .cloned()
            .collect();
        self.order.clear();

        while let Some(key) = self.find_ready() {
            let position = self
                .queue
                .iter()
                .position(|queued| *queued == key)
                .expect("selected node is queued");
            self.queue.remove(position);
            self.order.push(key.clone());
            info!(node = %key, "Evaluating node");

            let deps = self.dependency_snapshots(&key);
            let node = self.any_node_mut(&key);
            let (result, mutations) = match node.evaluate(&deps, store).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.abort_round();
                    return Err(e);
                }
            };
            self.round_results.insert(key.clone(), result);

            for mutation in mutations {
                self.apply(mutation);
            }

            let successors = self.any_node(&key).adjacent_to.clone();
            for successor in successors {
                if !self.round_results.contains_key(&successor)
                    && !self.queue.contains(&successor)
                {
                    debug!(node = %successor, "Enqueueing successor");
                    self.queue.push(successor);
                }
            }
        }

        let stalled: Vec<String> = self
            .node_order
            .iter()
            .chain(self.temporary_nodes.keys())
            .filter(|key| !self.round_results.contains_key(key.as_str()))
            .cloned()
            .collect();

        let results = std::mem::take(&mut self.round_results);
        self.queue.clear();
        self.revert_temporary();

        if !stalled.is_empty() {
            return Err(TrellisError::GraphStalled { remaining: stalled });
        }

        self.history.push(results.clone());
        self.rounds += 1;
        Ok(results)
    }

    /// First queued node (in insertion order) whose dependencies and
    /// order constraints are all satisfied this round.
    fn find_ready(&self) -> Option<String> {
        self.queue
            .iter()
            .find(|key| {
                let node = self.any_node(key.as_str());
                node.adjacent_from
                    .iter()
                    .chain(node.evaluate_after.iter())
                    .all(|ancestor| self.round_results.contains_key(ancestor))
            })
            .cloned()
    }

    fn dependency_snapshots(&self, key: &str) -> Vec<DepSnapshot> {
        let node = self.any_node(key);
        node.adjacent_from
            .iter()
            .map(|dep_key| {
                let dep = self.any_node(dep_key);
                let result = dep
                    .result()
                    .unwrap_or_else(|| {
                        panic!("Dependency '{}' of '{}' has not been evaluated", dep_key, key)
                    })
                    .to_string();
                DepSnapshot {
                    key: dep_key.clone(),
                    prompt: dep.prompt().to_string(),
                    rendered_prompt: dep.rendered_prompt().map(str::to_string),
                    result,
                }
            })
            .collect()
    }

    fn apply(&mut self, mutation: GraphMutation) {
        match mutation {
            GraphMutation::AddTemporaryNode(node) => self.add_temporary_node(node),
            GraphMutation::AddTemporaryEdge { from, to, prepend } => {
                self.add_temporary_edge(&from, &to, prepend)
            }
            GraphMutation::RemoveTemporaryEdge { from, to } => {
                self.remove_temporary_edge(&from, &to)
            }
            GraphMutation::SkipNodes(keys) => self.skip_nodes(&keys),
        }
    }

    fn add_temporary_node(&mut self, node: Node) {
        let key = node.key().to_string();
        assert!(
            !self.nodes.contains_key(&key),
            "Node '{}' already exists in permanent graph",
            key
        );
        assert!(
            !self.temporary_nodes.contains_key(&key),
            "Node '{}' already exists in temporary graph",
            key
        );
        debug!(node = %key, "Adding temporary node");
        self.temporary_nodes.insert(key, node);
    }

    fn add_temporary_edge(&mut self, from: &str, to: &str, prepend: bool) {
        assert!(
            !self.has_edge(from, to),
            "Edge ('{}', '{}') already exists",
            from,
            to
        );
        assert!(
            !self.round_results.contains_key(to),
            "Cannot add edge to a node ('{}') that has already been evaluated",
            to
        );
        debug!(from, to, prepend, "Adding temporary edge");
        self.link(from, to, prepend);
        if let Some(position) = self
            .temporary_removed_edges
            .iter()
            .position(|(f, t)| f == from && t == to)
        {
            // Re-adding a temporarily removed edge cancels the removal.
            self.temporary_removed_edges.remove(position);
        } else {
            self.temporary_edges
                .push((from.to_string(), to.to_string()));
        }
        if self.round_results.contains_key(from) && !self.queue.iter().any(|key| key == to) {
            self.queue.push(to.to_string());
        }
    }

    fn remove_temporary_edge(&mut self, from: &str, to: &str) {
        assert!(
            self.has_edge(from, to),
            "Edge ('{}', '{}') does not exist",
            from,
            to
        );
        assert!(
            !self.round_results.contains_key(from) && !self.round_results.contains_key(to),
            "Cannot remove edge ('{}', '{}') touching an already-evaluated node",
            from,
            to
        );
        debug!(from, to, "Removing edge for this round");
        self.unlink(from, to);
        if let Some(position) = self
            .temporary_edges
            .iter()
            .position(|(f, t)| f == from && t == to)
        {
            // Removing an edge added this round cancels the addition.
            self.temporary_edges.remove(position);
        } else {
            self.temporary_removed_edges
                .push((from.to_string(), to.to_string()));
        }
    }

    fn skip_nodes(&mut self, keys: &[String]) {
        for key in keys {
            assert!(
                !self.temporary_nodes.contains_key(key),
                "Cannot skip temporary node '{}'",
                key
            );
            assert!(
                !self.round_results.contains_key(key),
                "Cannot skip node '{}'. It has already been evaluated",
                key
            );
            debug!(node = %key, "Marking node to reuse its previous result");
            self.any_node_mut(key).mark_skip();
        }
    }

    /// Discard a failed round so the graph is immediately reusable:
    /// partial results and queued work are dropped and the permanent
    /// topology is restored. The failed round is not counted.
    fn abort_round(&mut self) {
        self.round_results.clear();
        self.queue.clear();
        self.revert_temporary();
    }

    /// Restore the exact permanent topology: unwire edges added this
    /// round, rewire edges removed this round, drop temporary nodes.
    fn revert_temporary(&mut self) {
        let added = std::mem::take(&mut self.temporary_edges);
        for (from, to) in added {
            self.unlink(&from, &to);
        }
        let removed = std::mem::take(&mut self.temporary_removed_edges);
        for (from, to) in removed {
            self.link(&from, &to, false);
        }
        self.temporary_nodes.clear();
    }

    fn link(&mut self, from: &str, to: &str, prepend: bool) {
        self.any_node_mut(from).adjacent_to.push(to.to_string());
        let target = self.any_node_mut(to);
        if prepend {
            target.adjacent_from.insert(0, from.to_string());
        } else {
            target.adjacent_from.push(from.to_string());
        }
    }

    fn unlink(&mut self, from: &str, to: &str) {
        let source = self.any_node_mut(from);
        let position = source
            .adjacent_to
            .iter()
            .position(|key| key == to)
            .unwrap_or_else(|| panic!("Edge ('{}', '{}') not wired", from, to));
        source.adjacent_to.remove(position);

        let target = self.any_node_mut(to);
        let position = target
            .adjacent_from
            .iter()
            .position(|key| key == from)
            .unwrap_or_else(|| panic!("Edge ('{}', '{}') not wired", from, to));
        target.adjacent_from.remove(position);
    }

    fn any_node(&self, key: &str) -> &Node {
        self.node(key)
            .unwrap_or_else(|| panic!("Node '{}' not found in graph", key))
    }

    fn any_node_mut(&mut self, key: &str) -> &mut Node {
        if self.nodes.contains_key(key) {
            self.nodes.get_mut(key).expect("checked above")
        } else {
            self.temporary_nodes
                .get_mut(key)
                .unwrap_or_else(|| panic!("Node '{}' not found in graph", key))
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
