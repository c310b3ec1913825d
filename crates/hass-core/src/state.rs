//! State type representing an entity's current state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, STATE_OFF, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// The state of an entity at a point in time.
///
/// The state value is a string (e.g. `"cool"`, `"on"`, `"23.5"`,
/// `"unavailable"`) plus a free-form JSON attribute map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The entity this state belongs to
    pub entity_id: EntityId,

    /// The state value
    pub state: String,

    /// Additional attributes associated with the state
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the state was last written, even if unchanged
    pub last_updated: DateTime<Utc>,

    /// Context of the change that created this state
    pub context: Context,
}

impl State {
    /// Create a new state with the current timestamp
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// Create an updated state, preserving `last_changed` if the value is the same
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = new_state.into();
        let changed = self.state != new_state;

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if changed { now } else { self.last_changed },
            last_updated: now,
            context,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// A state that may be acted on: neither `unknown` nor `unavailable`.
    pub fn is_valid(&self) -> bool {
        !self.is_unknown() && !self.is_unavailable()
    }

    pub fn is_off(&self) -> bool {
        self.state == STATE_OFF
    }

    /// Parse the state value as a number.
    pub fn numeric(&self) -> Option<f64> {
        self.state.trim().parse().ok()
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get an attribute as a float, accepting both numbers and numeric strings.
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get a string attribute.
    pub fn attr_str(&self, key: &str) -> Option<String> {
        self.attributes
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make(state: &str, attrs: HashMap<String, serde_json::Value>) -> State {
        State::new(
            EntityId::new("climate", "test").unwrap(),
            state,
            attrs,
            Context::new(),
        )
    }

    #[test]
    fn validity_helpers() {
        assert!(make("cool", HashMap::new()).is_valid());
        assert!(!make("unknown", HashMap::new()).is_valid());
        assert!(!make("unavailable", HashMap::new()).is_valid());
        assert!(make("off", HashMap::new()).is_off());
    }

    #[test]
    fn numeric_parsing() {
        assert_eq!(make("21.5", HashMap::new()).numeric(), Some(21.5));
        assert_eq!(make("cool", HashMap::new()).numeric(), None);
    }

    #[test]
    fn attr_f64_accepts_strings() {
        let attrs = HashMap::from([
            ("temperature".to_string(), json!(24)),
            ("current_temperature".to_string(), json!("22.5")),
            ("fan_mode".to_string(), json!("medium")),
        ]);
        let state = make("cool", attrs);
        assert_eq!(state.attr_f64("temperature"), Some(24.0));
        assert_eq!(state.attr_f64("current_temperature"), Some(22.5));
        assert_eq!(state.attr_f64("fan_mode"), None);
        assert_eq!(state.attr_str("fan_mode").as_deref(), Some("medium"));
    }

    #[test]
    fn with_update_preserves_last_changed() {
        let first = make("cool", HashMap::new());
        let same = first.with_update("cool", HashMap::new(), Context::new());
        assert_eq!(first.last_changed, same.last_changed);
        let changed = same.with_update("heat", HashMap::new(), Context::new());
        assert!(changed.last_changed >= same.last_changed);
    }
}
