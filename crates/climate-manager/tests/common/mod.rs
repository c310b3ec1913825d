//! Test harness: an isolated host with a mock climate device and captured
//! notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use climate_manager::{ClimateManager, ConfigEntry, Coordinator};
use hass_core::{Context, EntityId, Hass};
use serde_json::{json, Value};

pub const CLIMATE: &str = "climate.bedroom";
pub const WINDOW: &str = "binary_sensor.bedroom_window";
pub const TEMP_SENSOR: &str = "sensor.bedroom_temperature";
pub const PUSH_TARGET: &str = "mobile_app_test";

/// A host instance wired with one Climate Manager entry, a mock climate
/// device whose service handlers mutate the state store, and notification
/// capture.
pub struct TestHarness {
    pub hass: Hass,
    pub manager: Arc<ClimateManager>,
    pub coordinator: Arc<Coordinator>,
    pub entry_id: String,
    climate_calls: Arc<Mutex<Vec<(String, Value)>>>,
    notifications: Arc<Mutex<Vec<Value>>>,
}

/// Opt-in log output for debugging test runs: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

impl TestHarness {
    /// Spin up the harness. `overrides` are merged into the entry data after
    /// the defaults (windowless notification hours, the mock entities, push
    /// capture target).
    pub async fn start(overrides: &[(&str, Value)]) -> Self {
        init_tracing();
        let hass = Hass::new();
        let climate_calls = Arc::new(Mutex::new(Vec::new()));
        let notifications = Arc::new(Mutex::new(Vec::new()));

        register_mock_climate(&hass, climate_calls.clone());
        register_notify_capture(&hass, PUSH_TARGET, notifications.clone());

        // Window closed, climate off unless a test says otherwise
        set_entity(&hass, WINDOW, "off", json!({}));
        set_entity(&hass, CLIMATE, "off", json!(default_climate_attributes()));

        let mut data: HashMap<String, Value> = HashMap::from([
            ("climate_entity".to_string(), json!(CLIMATE)),
            ("window_sensors".to_string(), json!([WINDOW])),
            ("push_targets".to_string(), json!(PUSH_TARGET)),
            // start == end: notifications allowed around the clock
            ("notification_time_start_push".to_string(), json!("00:00")),
            ("notification_time_end_push".to_string(), json!("00:00")),
            ("notification_time_start_alexa".to_string(), json!("00:00")),
            ("notification_time_end_alexa".to_string(), json!("00:00")),
            ("room_name".to_string(), json!("Bedroom")),
        ]);
        for (key, value) in overrides {
            data.insert(key.to_string(), value.clone());
        }

        let entry = ConfigEntry::new("Bedroom").with_data(data);
        let manager = ClimateManager::setup(hass.clone());
        let coordinator = manager.async_setup_entry(&entry).await.unwrap();

        Self {
            hass,
            manager,
            coordinator,
            entry_id: entry.entry_id.clone(),
            climate_calls,
            notifications,
        }
    }

    /// Write an entity state, firing the state_changed event.
    pub fn set_state(&self, entity_id: &str, state: &str, attributes: Value) {
        set_entity(&self.hass, entity_id, state, attributes);
    }

    /// Write a state keeping the entity's current attributes.
    pub fn set_state_keep_attrs(&self, entity_id: &str, state: &str) {
        let attrs = self
            .hass
            .states
            .get(entity_id)
            .map(|s| s.attributes)
            .unwrap_or_default();
        self.hass.states.set(
            entity_id.parse::<EntityId>().unwrap(),
            state,
            attrs,
            Context::new(),
        );
    }

    pub fn open_window(&self) {
        self.set_state(WINDOW, "on", json!({}));
    }

    pub fn close_window(&self) {
        self.set_state(WINDOW, "off", json!({}));
    }

    /// Turn the climate on as an outside actor (user, remote, other app).
    pub fn climate_on_externally(&self, mode: &str) {
        let mut attrs = default_climate_attributes();
        attrs.insert("temperature".to_string(), json!(24.0));
        attrs.insert("fan_mode".to_string(), json!("medium"));
        self.set_state(CLIMATE, mode, json!(attrs));
    }

    /// Turn the climate off as an outside actor.
    pub fn climate_off_externally(&self) {
        self.set_state_keep_attrs(CLIMATE, "off");
    }

    pub fn climate_state(&self) -> String {
        self.hass.states.get_state(CLIMATE).unwrap_or_default()
    }

    pub fn climate_attr_f64(&self, key: &str) -> Option<f64> {
        self.hass.states.get(CLIMATE).and_then(|s| s.attr_f64(key))
    }

    /// Service calls received by the mock climate device, `(service, data)`.
    pub fn climate_calls(&self) -> Vec<(String, Value)> {
        self.climate_calls.lock().unwrap().clone()
    }

    pub fn count_climate_calls(&self, service: &str) -> usize {
        self.climate_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == service)
            .count()
    }

    /// Captured push notification payloads.
    pub fn notifications(&self) -> Vec<Value> {
        self.notifications.lock().unwrap().clone()
    }

    /// Notifications whose message contains `needle`.
    pub fn notifications_containing(&self, needle: &str) -> Vec<Value> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|payload| {
                payload["message"]
                    .as_str()
                    .map(|m| m.contains(needle))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Fire an interactive notification action event.
    pub fn fire_action(&self, action: &str) {
        self.hass.bus.fire_typed(
            hass_core::events::NotificationActionData {
                action: action.to_string(),
                action_data: json!({}),
            },
            Context::new(),
        );
    }
}

pub fn default_climate_attributes() -> serde_json::Map<String, Value> {
    json!({
        "hvac_modes": ["off", "cool", "heat", "dry", "fan_only"],
        "fan_modes": ["auto", "low", "medium", "high"],
        "current_temperature": 26.0,
    })
    .as_object()
    .unwrap()
    .clone()
}

fn set_entity(hass: &Hass, entity_id: &str, state: &str, attributes: Value) {
    let attrs: HashMap<String, Value> = match attributes {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };
    hass.states.set(
        entity_id.parse::<EntityId>().unwrap(),
        state,
        attrs,
        Context::new(),
    );
}

/// Mock climate integration: handlers mutate the state store the way a real
/// device integration would.
fn register_mock_climate(hass: &Hass, calls: Arc<Mutex<Vec<(String, Value)>>>) {
    let apply = |hass: Hass,
                 calls: Arc<Mutex<Vec<(String, Value)>>>,
                 service: &'static str| {
        move |call: hass_core::ServiceCall| {
            let hass = hass.clone();
            let calls = calls.clone();
            async move {
                calls
                    .lock()
                    .unwrap()
                    .push((service.to_string(), call.service_data.clone()));

                let entity = call
                    .entity_ids()
                    .into_iter()
                    .next()
                    .ok_or_else(|| hass_core::ServiceError::InvalidData("entity_id".into()))?;
                let current = hass.states.get(&entity);
                let mut attrs = current.as_ref().map(|s| s.attributes.clone()).unwrap_or_default();
                let mut state = current.map(|s| s.state).unwrap_or_else(|| "off".to_string());

                match service {
                    "set_hvac_mode" => {
                        state = call.get::<String>("hvac_mode").unwrap_or(state);
                    }
                    "turn_off" => {
                        state = "off".to_string();
                    }
                    "set_temperature" => {
                        if let Some(t) = call.get::<f64>("temperature") {
                            attrs.insert("temperature".to_string(), json!(t));
                        }
                    }
                    "set_fan_mode" => {
                        if let Some(f) = call.get::<String>("fan_mode") {
                            attrs.insert("fan_mode".to_string(), json!(f));
                        }
                    }
                    "set_preset_mode" => {
                        if let Some(p) = call.get::<String>("preset_mode") {
                            attrs.insert("preset_mode".to_string(), json!(p));
                        }
                    }
                    _ => {}
                }

                hass.states.set(
                    entity.parse::<EntityId>().unwrap(),
                    state,
                    attrs,
                    Context::new(),
                );
                Ok(None)
            }
        }
    };

    for service in ["set_hvac_mode", "set_temperature", "set_fan_mode", "set_preset_mode", "turn_off"] {
        hass.services.register(
            "climate",
            service,
            apply(hass.clone(), calls.clone(), service),
        );
    }
}

fn register_notify_capture(hass: &Hass, target: &str, captured: Arc<Mutex<Vec<Value>>>) {
    hass.services.register("notify", target, move |call| {
        let captured = captured.clone();
        async move {
            captured.lock().unwrap().push(call.service_data.clone());
            Ok(None)
        }
    });
}
