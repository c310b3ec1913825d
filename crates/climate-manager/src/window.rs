//! Aggregate window monitor
//!
//! Folds any number of window sensors into a single open/closed signal.
//! Sensors that go unavailable keep contributing their last valid reading;
//! sensors that have never reported count as closed.

use hass_core::{StateStore, STATE_ON};
use std::collections::HashMap;
use tracing::{debug, info};

/// Edge produced by an aggregate recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEdge {
    Opened,
    Closed,
    /// Sensor churn that did not flip the aggregate
    Unchanged,
}

pub struct WindowMonitor {
    sensors: Vec<String>,
    last_valid: HashMap<String, bool>,
    any_open: bool,
}

impl WindowMonitor {
    pub fn new(sensors: Vec<String>) -> Self {
        Self {
            sensors,
            last_valid: HashMap::new(),
            any_open: false,
        }
    }

    /// Current aggregate without recomputing.
    pub fn any_open(&self) -> bool {
        self.any_open
    }

    pub fn sensors(&self) -> &[String] {
        &self.sensors
    }

    pub fn watches(&self, entity_id: &str) -> bool {
        self.sensors.iter().any(|s| s == entity_id)
    }

    /// Replace the sensor set (reconfiguration); the fallback cache is kept
    /// for sensors that remain.
    pub fn set_sensors(&mut self, sensors: Vec<String>) {
        self.last_valid.retain(|id, _| sensors.contains(id));
        self.sensors = sensors;
    }

    /// Recompute the aggregate from current entity states and return the edge.
    ///
    /// With no sensors configured the previous aggregate is kept.
    pub fn observe(&mut self, states: &StateStore) -> WindowEdge {
        if self.sensors.is_empty() {
            return WindowEdge::Unchanged;
        }

        let mut any_open = false;
        for sensor in &self.sensors {
            let open = match states.get(sensor) {
                Some(state) if state.is_valid() => {
                    let open = state.state == STATE_ON;
                    self.last_valid.insert(sensor.clone(), open);
                    open
                }
                // Offline sensor: fall back to the last valid reading
                _ => *self.last_valid.get(sensor).unwrap_or(&false),
            };
            any_open |= open;
        }

        if any_open == self.any_open {
            return WindowEdge::Unchanged;
        }
        self.any_open = any_open;
        if any_open {
            info!(sensors = ?self.open_sensors(states), "Window opened");
            WindowEdge::Opened
        } else {
            debug!("All windows closed");
            WindowEdge::Closed
        }
    }

    fn open_sensors(&self, states: &StateStore) -> Vec<&str> {
        self.sensors
            .iter()
            .filter(|s| states.is_state(s, STATE_ON))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hass_core::{Context, EntityId, EventBus, StateStore};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn store() -> StateStore {
        StateStore::new(Arc::new(EventBus::new()))
    }

    fn set(store: &StateStore, id: &str, value: &str) {
        store.set(
            id.parse::<EntityId>().unwrap(),
            value,
            HashMap::new(),
            Context::new(),
        );
    }

    #[test]
    fn aggregate_is_or() {
        let states = store();
        set(&states, "binary_sensor.w1", "off");
        set(&states, "binary_sensor.w2", "off");
        let mut monitor = WindowMonitor::new(vec![
            "binary_sensor.w1".to_string(),
            "binary_sensor.w2".to_string(),
        ]);

        assert_eq!(monitor.observe(&states), WindowEdge::Unchanged);

        set(&states, "binary_sensor.w2", "on");
        assert_eq!(monitor.observe(&states), WindowEdge::Opened);
        assert!(monitor.any_open());

        // The other sensor flapping does not produce a new edge
        set(&states, "binary_sensor.w1", "on");
        assert_eq!(monitor.observe(&states), WindowEdge::Unchanged);

        set(&states, "binary_sensor.w1", "off");
        set(&states, "binary_sensor.w2", "off");
        assert_eq!(monitor.observe(&states), WindowEdge::Closed);
    }

    #[test]
    fn unavailable_sensor_uses_last_valid() {
        let states = store();
        set(&states, "binary_sensor.w1", "on");
        let mut monitor = WindowMonitor::new(vec!["binary_sensor.w1".to_string()]);
        assert_eq!(monitor.observe(&states), WindowEdge::Opened);

        // Sensor drops off: the cached open state holds
        set(&states, "binary_sensor.w1", "unavailable");
        assert_eq!(monitor.observe(&states), WindowEdge::Unchanged);
        assert!(monitor.any_open());

        // Sensor returns closed
        set(&states, "binary_sensor.w1", "off");
        assert_eq!(monitor.observe(&states), WindowEdge::Closed);
    }

    #[test]
    fn never_seen_sensor_counts_closed() {
        let states = store();
        let mut monitor = WindowMonitor::new(vec!["binary_sensor.ghost".to_string()]);
        assert_eq!(monitor.observe(&states), WindowEdge::Unchanged);
        assert!(!monitor.any_open());

        set(&states, "binary_sensor.ghost", "unknown");
        assert_eq!(monitor.observe(&states), WindowEdge::Unchanged);
        assert!(!monitor.any_open());
    }

    #[test]
    fn no_sensors_keeps_state() {
        let states = store();
        let mut monitor = WindowMonitor::new(Vec::new());
        assert_eq!(monitor.observe(&states), WindowEdge::Unchanged);
        assert!(!monitor.any_open());
    }

    #[test]
    fn set_sensors_prunes_cache() {
        let states = store();
        set(&states, "binary_sensor.w1", "on");
        let mut monitor = WindowMonitor::new(vec!["binary_sensor.w1".to_string()]);
        monitor.observe(&states);

        monitor.set_sensors(vec!["binary_sensor.w2".to_string()]);
        set(&states, "binary_sensor.w2", "off");
        assert_eq!(monitor.observe(&states), WindowEdge::Closed);
        assert!(!monitor.any_open());
    }
}
