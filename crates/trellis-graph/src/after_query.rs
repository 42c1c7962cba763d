use serde_json::Value;

use trellis_core::error::ValidationError;
use trellis_core::store::ContextStore;

use crate::json::extract_json_values;
use crate::mutation::GraphMutation;

/// Outcome of a successful validation pass.
#[derive(Debug)]
pub struct Validated {
    /// Replacement result text; `None` keeps the raw model output.
    pub text: Option<String>,
    /// Graph changes to apply before the round continues.
    pub mutations: Vec<GraphMutation>,
}

impl Validated {
    /// Accept the raw output as-is.
    pub fn keep() -> Self {
        Self {
            text: None,
            mutations: Vec::new(),
        }
    }

    /// Accept but replace the result with a normalized form.
    pub fn rewrite(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            mutations: Vec::new(),
        }
    }

    pub fn with_mutations(mut self, mutations: Vec<GraphMutation>) -> Self {
        self.mutations = mutations;
        self
    }
}

/// Post-response checker run after each model reply ("after-query").
///
/// May normalize the node's result, mutate the shared store, and request
/// graph changes for the rest of the round. Signals a typed failure when
/// the reply is unusable; the node retries with the failure's feedback
/// injected as a corrective turn.
pub trait AfterQuery: Send + Sync {
    fn validate(
        &self,
        raw: &str,
        store: &mut ContextStore,
    ) -> Result<Validated, ValidationError>;
}

/// Container type expected by a [`JsonValidator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonContainer {
    Object,
    Array,
}

impl JsonContainer {
    fn name(&self) -> &'static str {
        match self {
            Self::Object => "an object",
            Self::Array => "an array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

type ApplyFn = dyn Fn(&Value, &mut ContextStore) -> Validated + Send + Sync;

/// Structured after-query: the reply must contain a parseable JSON value
/// of a specific shape; the last balanced-bracket span wins.
///
/// Failure feedback names the exact violation so the model can
/// self-correct on retry.
pub struct JsonValidator {
    container: JsonContainer,
    required_keys: Vec<String>,
    expected_len: Option<usize>,
    apply: Option<Box<ApplyFn>>,
}

impl JsonValidator {
    pub fn object() -> Self {
        Self {
            container: JsonContainer::Object,
            required_keys: Vec::new(),
            expected_len: None,
            apply: None,
        }
    }

    pub fn array() -> Self {
        Self {
            container: JsonContainer::Array,
            ..Self::object()
        }
    }

    /// Keys that must be present (objects only).
    pub fn require_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Exact number of entries the container must hold.
    pub fn expect_len(mut self, len: usize) -> Self {
        self.expected_len = Some(len);
        self
    }

    /// Hook run on the parsed value after all shape checks pass. This is
    /// where callers write to the store and request graph mutations.
    pub fn on_valid(
        mut self,
        apply: impl Fn(&Value, &mut ContextStore) -> Validated + Send + Sync + 'static,
    ) -> Self {
        self.apply = Some(Box::new(apply));
        self
    }

    /// Parse the reply and run the shape checks, without the apply hook.
    pub fn parse(&self, raw: &str) -> Result<Value, ValidationError> {
        let values = extract_json_values(raw);
        let Some(last) = values.last() else {
            return Err(ValidationError::new(
                "Failed to parse answer",
                "Error: No json objects found",
            ));
        };

        if !self.container.matches(last) {
            return Err(ValidationError::new(
                "Invalid answer",
                format!(
                    "Invalid Type: Expecting the last Json object to be {}, got {} instead.",
                    self.container.name(),
                    json_type_name(last)
                ),
            ));
        }

        if let Some(expected) = self.expected_len {
            let actual = match last {
                Value::Object(map) => map.len(),
                Value::Array(items) => items.len(),
                _ => unreachable!("container check passed"),
            };
            if actual != expected {
                return Err(ValidationError::new(
                    "Invalid answer",
                    format!("Expecting length {}, got {} instead.", expected, actual),
                ));
            }
        }

        if let Some(map) = last.as_object() {
            for key in &self.required_keys {
                if !map.contains_key(key) {
                    return Err(ValidationError::new(
                        "Invalid answer",
                        format!("Expecting '{}' in the keys.", key),
                    ));
                }
            }
        }

        Ok(last.clone())
    }
}

impl AfterQuery for JsonValidator {
    fn validate(
        &self,
        raw: &str,
        store: &mut ContextStore,
    ) -> Result<Validated, ValidationError> {
        let value = self.parse(raw)?;
        Ok(match &self.apply {
            Some(apply) => apply(&value, store),
            None => Validated::keep(),
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_trailing_object() {
        let validator = JsonValidator::object().require_keys(["action"]);
        let mut store = ContextStore::new();
        let outcome = validator
            .validate("I will chop wood.\n{\"action\": \"chop\"}", &mut store)
            .unwrap();
        assert!(outcome.text.is_none());
        assert!(outcome.mutations.is_empty());
    }

    #[test]
    fn test_no_json_fails_with_feedback() {
        let validator = JsonValidator::object();
        let mut store = ContextStore::new();
        let err = validator.validate("no structure here", &mut store).unwrap_err();
        assert_eq!(err.diagnostic, "Failed to parse answer");
        assert_eq!(err.feedback, "Error: No json objects found");
    }

    #[test]
    fn test_wrong_container_fails() {
        let validator = JsonValidator::object();
        let mut store = ContextStore::new();
        let err = validator.validate("[1, 2, 3]", &mut store).unwrap_err();
        assert!(err.feedback.contains("Expecting the last Json object to be an object"));
        assert!(err.feedback.contains("got an array"));
    }

    #[test]
    fn test_missing_key_fails() {
        let validator = JsonValidator::object().require_keys(["action", "target"]);
        let mut store = ContextStore::new();
        let err = validator
            .validate("{\"action\": \"chop\"}", &mut store)
            .unwrap_err();
        assert_eq!(err.feedback, "Expecting 'target' in the keys.");
    }

    #[test]
    fn test_wrong_length_fails() {
        let validator = JsonValidator::array().expect_len(3);
        let mut store = ContextStore::new();
        let err = validator.validate("[1, 2]", &mut store).unwrap_err();
        assert_eq!(err.feedback, "Expecting length 3, got 2 instead.");
    }

    #[test]
    fn test_last_json_value_wins() {
        let validator = JsonValidator::object();
        let mut store = ContextStore::new();
        // The earlier array would fail; the trailing object passes.
        assert!(validator
            .validate("[1, 2] final answer: {\"ok\": true}", &mut store)
            .is_ok());
    }

    #[test]
    fn test_apply_hook_writes_store_and_rewrites() {
        let validator = JsonValidator::object().require_keys(["subgoal"]).on_valid(
            |value, store| {
                store.set_path("knowledge.subgoals.current", value["subgoal"].clone());
                Validated::rewrite(value["subgoal"].as_str().unwrap_or_default().to_string())
            },
        );
        let mut store = ContextStore::new();
        let outcome = validator
            .validate("{\"subgoal\": \"find water\"}", &mut store)
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("find water"));
        assert_eq!(
            store.get_path("knowledge.subgoals.current"),
            Some(&json!("find water"))
        );
    }
}
