use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shared blackboard consulted by prompt composers and mutated by
/// after-query validators.
///
/// The store is caller-owned and opaque to the engine: nodes read from it
/// during prompt composition and validators write to it after each reply.
/// It is split into named object sections instead of one loosely typed
/// map; the dot-path facade below exists only for placeholder resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStore {
    pub environment: Value,
    pub knowledge: Value,
    pub skills: Value,
    pub feedback: Value,
    /// Free-form section for anything the caller's validators need.
    pub scratch: Value,
    /// Dependency keys summarized as a single system note by the
    /// store-aware composer, mapped to the note's heading.
    #[serde(default)]
    pub shorthands: HashMap<String, String>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self {
            environment: Value::Object(Map::new()),
            knowledge: Value::Object(Map::new()),
            skills: Value::Object(Map::new()),
            feedback: Value::Object(Map::new()),
            scratch: Value::Object(Map::new()),
            shorthands: HashMap::new(),
        }
    }
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn section(&self, name: &str) -> Option<&Value> {
        match name {
            "environment" => Some(&self.environment),
            "knowledge" => Some(&self.knowledge),
            "skills" => Some(&self.skills),
            "feedback" => Some(&self.feedback),
            "scratch" => Some(&self.scratch),
            _ => None,
        }
    }

    fn section_mut(&mut self, name: &str) -> Option<&mut Value> {
        match name {
            "environment" => Some(&mut self.environment),
            "knowledge" => Some(&mut self.knowledge),
            "skills" => Some(&mut self.skills),
            "feedback" => Some(&mut self.feedback),
            "scratch" => Some(&mut self.scratch),
            _ => None,
        }
    }

    /// Dot-path read. The first segment names a section; the rest walk
    /// nested objects. Returns `None` at the first missing segment.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut value = self.section(parts.next()?)?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        Some(value)
    }

    /// Dot-path write, creating intermediate objects as needed.
    ///
    /// # Panics
    ///
    /// Panics if the first segment does not name a section, or if the path
    /// descends through an existing non-object value.
    pub fn set_path(&mut self, path: &str, new: Value) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let head = parts.remove(0);
        let last = parts
            .pop()
            .unwrap_or_else(|| panic!("Path '{}' must have at least two segments", path));
        let mut value = self
            .section_mut(head)
            .unwrap_or_else(|| panic!("Unknown store section '{}'", head));
        for part in parts {
            value = value
                .as_object_mut()
                .unwrap_or_else(|| panic!("Path '{}' descends through a non-object", path))
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        value
            .as_object_mut()
            .unwrap_or_else(|| panic!("Path '{}' descends through a non-object", path))
            .insert(last.to_string(), new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path_hit() {
        let mut store = ContextStore::new();
        store.environment = json!({"biome": {"name": "forest"}});
        assert_eq!(
            store.get_path("environment.biome.name"),
            Some(&json!("forest"))
        );
    }

    #[test]
    fn test_get_path_miss() {
        let mut store = ContextStore::new();
        store.environment = json!({"biome": {}});
        assert_eq!(store.get_path("environment.biome.name"), None);
        assert_eq!(store.get_path("environment.weather"), None);
        assert_eq!(store.get_path("no_such_section.x"), None);
    }

    #[test]
    fn test_get_path_non_string_values() {
        let mut store = ContextStore::new();
        store.skills = json!({"axe": {"cost": 3, "ready": true}});
        assert_eq!(store.get_path("skills.axe.cost"), Some(&json!(3)));
        assert_eq!(store.get_path("skills.axe.ready"), Some(&json!(true)));
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut store = ContextStore::new();
        store.set_path("scratch.subgoals.current", json!("find water"));
        assert_eq!(
            store.get_path("scratch.subgoals.current"),
            Some(&json!("find water"))
        );
    }

    #[test]
    fn test_set_path_overwrites() {
        let mut store = ContextStore::new();
        store.set_path("feedback.last", json!("too slow"));
        store.set_path("feedback.last", json!("better"));
        assert_eq!(store.get_path("feedback.last"), Some(&json!("better")));
    }

    #[test]
    #[should_panic(expected = "Unknown store section")]
    fn test_set_path_unknown_section_panics() {
        let mut store = ContextStore::new();
        store.set_path("bogus.key", json!(1));
    }
}
