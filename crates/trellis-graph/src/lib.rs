pub mod after_query;
pub mod compose;
pub mod graph;
pub mod json;
pub mod mutation;
pub mod node;

pub use after_query::{AfterQuery, JsonContainer, JsonValidator, Validated};
pub use compose::{
    render_placeholders, BasicComposer, ComposePrompt, Composed, DepSnapshot, StoreComposer,
};
pub use graph::Graph;
pub use json::extract_json_values;
pub use mutation::GraphMutation;
pub use node::{Node, NodeUsage, DEGRADED_RESULT};
