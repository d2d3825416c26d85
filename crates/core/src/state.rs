use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Accumulated workflow context threaded from a node to its descendants.
///
/// A `State` is never mutated once handed to a branch; merging always
/// produces a new value scoped to a single lineage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

impl State {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Get a field as a string slice, if it holds a JSON string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Shallow merge: fields of `partial` overwrite same-named fields of `self`
    pub fn merged(&self, partial: &State) -> State {
        let mut merged = self.0.clone();
        for (field, value) in &partial.0 {
            merged.insert(field.clone(), value.clone());
        }
        State(merged)
    }

    /// Build a state from a JSON value; only objects are accepted
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for State {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for State {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_prefers_partial_fields() {
        let inherited = State::new().with("prompt", "a cat").with("image_url", "old.png");
        let partial = State::new().with("image_url", "new.png");

        let merged = inherited.merged(&partial);

        assert_eq!(merged.get_str("prompt"), Some("a cat"));
        assert_eq!(merged.get_str("image_url"), Some("new.png"));
        // inputs stay untouched
        assert_eq!(inherited.get_str("image_url"), Some("old.png"));
        assert_eq!(partial.len(), 1);
    }

    #[test]
    fn test_merge_is_shallow() {
        let inherited = State::new().with("meta", json!({"a": 1, "b": 2}));
        let partial = State::new().with("meta", json!({"c": 3}));

        let merged = inherited.merged(&partial);
        assert_eq!(merged.get("meta"), Some(&json!({"c": 3})));
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(State::from_value(json!([1, 2])).is_none());
        let state = State::from_value(json!({"video_url": "v.mp4"})).unwrap();
        assert!(state.contains("video_url"));
        assert_eq!(state.into_value(), json!({"video_url": "v.mp4"}));
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let state: State = [("image_url", "http://x/1.png")].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"image_url": "http://x/1.png"})
        );
    }
}
