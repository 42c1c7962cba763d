use crate::node::Node;

/// A graph change requested by a validator.
///
/// Validators never touch the graph directly; they return a list of these
/// and the evaluation driver applies them right after the requesting node
/// completes, keeping the traversal the sole owner of ordering invariants.
/// Every temporary change is reverted when the round ends.
#[derive(Debug)]
pub enum GraphMutation {
    /// Insert a node that lives only until the end of the current round.
    /// It is only reachable through a temporary edge added alongside it.
    AddTemporaryNode(Node),
    /// Add a dependency edge for the current round. `prepend` puts the
    /// source first in the target's dependency list, giving it
    /// composition priority.
    AddTemporaryEdge {
        from: String,
        to: String,
        prepend: bool,
    },
    /// Suspend a permanent edge for the current round.
    RemoveTemporaryEdge { from: String, to: String },
    /// Reuse the previous result of these nodes this round instead of
    /// querying the model again.
    SkipNodes(Vec<String>),
}

impl GraphMutation {
    /// Convenience constructor for the common non-prepending edge.
    pub fn add_edge(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::AddTemporaryEdge {
            from: from.into(),
            to: to.into(),
            prepend: false,
        }
    }

    pub fn remove_edge(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::RemoveTemporaryEdge {
            from: from.into(),
            to: to.into(),
        }
    }
}
