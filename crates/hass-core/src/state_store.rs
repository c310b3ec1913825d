//! Entity state storage firing state_changed events

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::events::StateChangedData;
use crate::{Context, EntityId, EventBus, State};

/// Tracks the current state of all entities and fires `state_changed` events
/// on every write.
pub struct StateStore {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Event bus for firing state change events
    event_bus: Arc<EventBus>,
}

impl StateStore {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            event_bus,
        }
    }

    /// Set the state of an entity.
    ///
    /// `last_changed` is only updated if the state value actually changed.
    /// Fires a `state_changed` event with the old and new state, but only
    /// when the value or the attributes really differ: a write that changes
    /// nothing is recorded silently, like the host does.
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let entity_id_str = entity_id.to_string();

        let old_state = self.states.get(&entity_id_str).map(|s| s.clone());
        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        let changed = match &old_state {
            Some(old) => old.state != new_state.state || old.attributes != new_state.attributes,
            None => true,
        };

        debug!(
            entity_id = %entity_id,
            state = %new_state.state,
            changed,
            "Setting entity state"
        );

        self.states.insert(entity_id_str, new_state.clone());

        if changed {
            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id,
                    old_state,
                    new_state: Some(new_state.clone()),
                },
                context,
            );
        }

        new_state
    }

    /// Get the current state of an entity.
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string.
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// Check if an entity is in a specific state.
    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Remove an entity's state, firing a `state_changed` event with
    /// `new_state: None`.
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let old_state = self.states.remove(&entity_id.to_string()).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!(entity_id = %entity_id, "Removing entity state");
            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    /// Total number of tracked entities.
    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_store() -> (Arc<EventBus>, StateStore) {
        let bus = Arc::new(EventBus::new());
        let store = StateStore::new(bus.clone());
        (bus, store)
    }

    #[test]
    fn set_and_get() {
        let (_, store) = make_store();
        let id = EntityId::new("climate", "living_room").unwrap();
        store.set(
            id,
            "cool",
            HashMap::from([("temperature".to_string(), json!(24))]),
            Context::new(),
        );

        let state = store.get("climate.living_room").unwrap();
        assert_eq!(state.state, "cool");
        assert_eq!(state.attr_f64("temperature"), Some(24.0));
        assert!(store.is_state("climate.living_room", "cool"));
    }

    #[tokio::test]
    async fn fires_state_changed() {
        let (bus, store) = make_store();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        let id = EntityId::new("binary_sensor", "window").unwrap();
        store.set(id.clone(), "on", HashMap::new(), Context::new());
        store.set(id, "off", HashMap::new(), Context::new());

        let first = rx.recv().await.unwrap().data;
        assert!(first.old_state.is_none());
        assert_eq!(first.new_state.unwrap().state, "on");

        let second = rx.recv().await.unwrap().data;
        assert_eq!(second.old_state.unwrap().state, "on");
        assert_eq!(second.new_state.unwrap().state, "off");
    }

    #[test]
    fn identical_write_is_silent() {
        let (bus, store) = make_store();
        let id = EntityId::new("sensor", "temp").unwrap();
        store.set(id.clone(), "21", HashMap::new(), Context::new());

        let mut rx = bus.subscribe(crate::events::STATE_CHANGED);
        store.set(id.clone(), "21", HashMap::new(), Context::new());
        assert!(rx.try_recv().is_err(), "no event for a no-op write");

        store.set(id, "22", HashMap::new(), Context::new());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn remove_clears_state() {
        let (_, store) = make_store();
        let id = EntityId::new("sensor", "temp").unwrap();
        store.set(id.clone(), "21", HashMap::new(), Context::new());
        assert!(store.remove(&id, Context::new()).is_some());
        assert!(store.get("sensor.temp").is_none());
    }
}
