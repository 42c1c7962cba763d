use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use trellis_core::store::ContextStore;
use trellis_core::types::ChatMessage;

/// Snapshot of an already-evaluated dependency, taken by the graph right
/// before the dependent node runs.
#[derive(Debug, Clone)]
pub struct DepSnapshot {
    pub key: String,
    pub prompt: String,
    /// The dependency's prompt after placeholder resolution. Present once
    /// the dependency has been evaluated by a store-aware composer.
    pub rendered_prompt: Option<String>,
    pub result: String,
}

/// Output of one prompt composition.
#[derive(Debug, Clone)]
pub struct Composed {
    pub messages: Vec<ChatMessage>,
    /// Message position truncated first when over the context budget.
    pub shrink_idx: usize,
    /// The node prompt after placeholder resolution.
    pub rendered_prompt: String,
    /// `(path, resolved display)` pairs, for observability.
    pub lookups: Vec<(String, String)>,
}

/// Builds the message sequence sent to the model.
///
/// Deterministic in its inputs: reads the dependency results and the
/// store, performs no I/O, and always succeeds. A prompt must always be
/// completable, so lookup misses degrade to a placeholder value instead of
/// failing.
pub trait ComposePrompt: Send + Sync {
    fn compose(&self, deps: &[DepSnapshot], prompt: &str, store: &ContextStore) -> Composed;
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// System prompt, dependency question/answer pairs, then the node prompt
/// untouched.
pub struct BasicComposer {
    system_prompt: String,
}

impl BasicComposer {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }
}

impl Default for BasicComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl ComposePrompt for BasicComposer {
    fn compose(&self, deps: &[DepSnapshot], prompt: &str, _store: &ContextStore) -> Composed {
        let mut messages = vec![ChatMessage::system(&self.system_prompt)];
        for dep in deps {
            messages.push(ChatMessage::user(&dep.prompt));
            messages.push(ChatMessage::assistant(&dep.result));
        }
        messages.push(ChatMessage::user(prompt));
        Composed {
            messages,
            shrink_idx: 1,
            rendered_prompt: prompt.to_string(),
            lookups: Vec::new(),
        }
    }
}

/// Store-aware composer: resolves `$db.path$` placeholders in the node
/// prompt and summarizes shorthand dependencies as a single system note.
pub struct StoreComposer {
    system_prompt: String,
    shrink_idx: usize,
}

impl StoreComposer {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            shrink_idx: 1,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Which message a truncation pass targets first. Defaults to 1, the
    /// oldest dependency turn.
    pub fn with_shrink_idx(mut self, shrink_idx: usize) -> Self {
        self.shrink_idx = shrink_idx;
        self
    }
}

impl Default for StoreComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl ComposePrompt for StoreComposer {
    fn compose(&self, deps: &[DepSnapshot], prompt: &str, store: &ContextStore) -> Composed {
        let mut messages = vec![ChatMessage::system(&self.system_prompt)];
        for dep in deps {
            if let Some(shorthand) = store.shorthands.get(&dep.key) {
                // Summarized dependency: one system note instead of a
                // full question/answer pair.
                messages.push(ChatMessage::system(format!(
                    "{}:\n\n{}",
                    shorthand, dep.result
                )));
            } else {
                let rendered = dep.rendered_prompt.as_deref().unwrap_or_else(|| {
                    panic!("Rendered prompt missing for dependency '{}'", dep.key)
                });
                messages.push(ChatMessage::user(rendered));
                messages.push(ChatMessage::assistant(&dep.result));
            }
        }

        let (rendered_prompt, lookups) = render_placeholders(prompt, store);
        messages.push(ChatMessage::user(&rendered_prompt));

        Composed {
            messages,
            shrink_idx: self.shrink_idx,
            rendered_prompt,
            lookups,
        }
    }
}

/// Replace `$db.<dot.path>$` placeholders in `text` with store values.
///
/// A resolved JSON string is substituted verbatim; numbers, booleans, and
/// containers use their JSON display. A path missing at any segment
/// substitutes the literal `'NA'`. Also returns the `(path, display)`
/// pairs in resolution order.
pub fn render_placeholders(text: &str, store: &ContextStore) -> (String, Vec<(String, String)>) {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\$db\.(.*?)\$").expect("valid regex"));

    let mut lookups = Vec::new();
    let rendered = re
        .replace_all(text, |caps: &Captures| {
            let path = &caps[1];
            let display = match store.get_path(path) {
                Some(Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => "'NA'".to_string(),
            };
            lookups.push((path.to_string(), display.clone()));
            display
        })
        .into_owned();
    (rendered, lookups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_core::types::Role;

    fn store() -> ContextStore {
        let mut store = ContextStore::new();
        store.environment = json!({"biome": "forest", "daytime": true, "hp": 9});
        store.knowledge = json!({"subgoals": {"current": "find water"}});
        store
    }

    #[test]
    fn test_render_resolves_string_verbatim() {
        let (text, lookups) =
            render_placeholders("You are in a $db.environment.biome$.", &store());
        assert_eq!(text, "You are in a forest.");
        assert_eq!(
            lookups,
            vec![("environment.biome".to_string(), "forest".to_string())]
        );
    }

    #[test]
    fn test_render_stringifies_scalars() {
        let (text, _) = render_placeholders(
            "Daytime: $db.environment.daytime$, HP: $db.environment.hp$",
            &store(),
        );
        assert_eq!(text, "Daytime: true, HP: 9");
    }

    #[test]
    fn test_render_missing_path_is_na() {
        let (text, lookups) =
            render_placeholders("Goal: '$db.knowledge.subgoals.next$'", &store());
        assert_eq!(text, "Goal: ''NA''");
        assert_eq!(lookups[0].1, "'NA'");
    }

    #[test]
    fn test_render_multiple_placeholders() {
        let (text, lookups) = render_placeholders(
            "$db.knowledge.subgoals.current$ in the $db.environment.biome$",
            &store(),
        );
        assert_eq!(text, "find water in the forest");
        assert_eq!(lookups.len(), 2);
    }

    #[test]
    fn test_basic_composer_shape() {
        let deps = vec![DepSnapshot {
            key: "obs".into(),
            prompt: "What do you see?".into(),
            rendered_prompt: None,
            result: "A river.".into(),
        }];
        let composed = BasicComposer::new().compose(&deps, "What next?", &ContextStore::new());

        let roles: Vec<Role> = composed.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(composed.messages[2].content, "A river.");
        assert_eq!(composed.messages[3].content, "What next?");
        assert_eq!(composed.shrink_idx, 1);
    }

    #[test]
    fn test_store_composer_renders_prompt() {
        let composed = StoreComposer::new().compose(
            &[],
            "Plan around the $db.environment.biome$.",
            &store(),
        );
        assert_eq!(composed.rendered_prompt, "Plan around the forest.");
        assert_eq!(
            composed.messages.last().unwrap().content,
            "Plan around the forest."
        );
    }

    #[test]
    fn test_store_composer_shorthand_becomes_system_note() {
        let mut store = store();
        store
            .shorthands
            .insert("obs".to_string(), "Current observation".to_string());
        let deps = vec![DepSnapshot {
            key: "obs".into(),
            prompt: "What do you see?".into(),
            rendered_prompt: Some("What do you see?".into()),
            result: "A river.".into(),
        }];
        let composed = StoreComposer::new().compose(&deps, "What next?", &store);

        assert_eq!(composed.messages.len(), 3);
        assert_eq!(composed.messages[1].role, Role::System);
        assert_eq!(
            composed.messages[1].content,
            "Current observation:\n\nA river."
        );
    }

    #[test]
    fn test_store_composer_uses_rendered_dependency_prompt() {
        let deps = vec![DepSnapshot {
            key: "obs".into(),
            prompt: "Look at the $db.environment.biome$.".into(),
            rendered_prompt: Some("Look at the forest.".into()),
            result: "Trees everywhere.".into(),
        }];
        let composed = StoreComposer::new().compose(&deps, "What next?", &store());
        assert_eq!(composed.messages[1].content, "Look at the forest.");
    }

    #[test]
    #[should_panic(expected = "Rendered prompt missing")]
    fn test_store_composer_panics_without_rendered_dependency() {
        let deps = vec![DepSnapshot {
            key: "obs".into(),
            prompt: "Look.".into(),
            rendered_prompt: None,
            result: "ok".into(),
        }];
        StoreComposer::new().compose(&deps, "What next?", &store());
    }
}
