//! Config entry and layered option store
//!
//! Options are JSON values in two layers: the immutable entry `data` written
//! by the setup flow, and a mutable `options` overlay updated at runtime by
//! the `climate_manager.*` services. Reads always prefer the overlay.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

/// Sentinel the setup flow stores for "no sensor selected"
const NONE_SENTINEL: &str = "__NONE__";

/// Errors in a config entry's content
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config entry names no climate_entity")]
    MissingClimateEntity,
}

/// A single instance of the integration's configuration.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Human-readable display name
    pub title: String,

    /// Immutable configuration data
    pub data: HashMap<String, Value>,

    /// User-configurable options overlay
    pub options: HashMap<String, Value>,
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
        }
    }

    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_options(mut self, options: HashMap<String, Value>) -> Self {
        self.options = options;
        self
    }
}

/// External entity references this coordinator watches and commands.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRefs {
    pub climate: String,
    pub window_sensors: Vec<String>,
    pub temperature_sensor: Option<String>,
    pub power_sensor: Option<String>,
    /// Media players used to derive voice notification targets
    pub media_players: Vec<String>,
}

/// Layered option store with overlay-first precedence.
pub struct OptionsStore {
    data: HashMap<String, Value>,
    options: RwLock<HashMap<String, Value>>,
    updates: watch::Sender<u64>,
}

impl OptionsStore {
    pub fn new(data: HashMap<String, Value>, options: HashMap<String, Value>) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            data,
            options: RwLock::new(options),
            updates,
        }
    }

    pub fn from_entry(entry: &ConfigEntry) -> Self {
        Self::new(entry.data.clone(), entry.options.clone())
    }

    /// Raw option lookup: overlay first, then entry data.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.options.read().unwrap().get(key) {
            return Some(v.clone());
        }
        self.data.get(key).cloned()
    }

    /// Merge updates into the overlay and notify subscribers.
    pub fn update(&self, updates: HashMap<String, Value>) {
        {
            let mut options = self.options.write().unwrap();
            for (key, value) in updates {
                options.insert(key, value);
            }
        }
        self.updates.send_modify(|rev| *rev += 1);
    }

    /// Replace the whole overlay (host pushed new entry options).
    pub fn replace(&self, options: HashMap<String, Value>) {
        *self.options.write().unwrap() = options;
        self.updates.send_modify(|rev| *rev += 1);
    }

    /// Subscribe to option revisions.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    // Typed getters. Host options frequently arrive as strings ("21" for 21),
    // so the numeric getters coerce.

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        let value = self.get_f64(key, default as f64);
        if value < 0.0 {
            default
        } else {
            value as u64
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => match s.as_str() {
                "true" | "on" | "yes" => true,
                "false" | "off" | "no" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => default.to_string(),
        }
    }

    pub fn get_opt_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) if !s.is_empty() && s != NONE_SENTINEL => Some(s),
            _ => None,
        }
    }

    /// A map-valued option, empty when missing or malformed.
    pub fn get_map(&self, key: &str) -> HashMap<String, Value> {
        match self.get(key) {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }

    // Integration-specific accessors, defaults matching the setup flow.

    /// Seconds to wait before turning off after a window opens.
    pub fn delay_before_off(&self) -> u64 {
        self.get_u64("delay_before_off", 0)
    }

    /// Seconds to wait before restoring after the window closes.
    pub fn delay_before_on(&self) -> u64 {
        self.get_u64("delay_before_on", 0)
    }

    /// Window-open timeout in seconds; 0 disables the timeout timer.
    /// Configured in minutes under the `timeout` key.
    pub fn window_open_timeout(&self) -> u64 {
        self.get_u64("timeout", 15) * 60
    }

    pub fn timer_on_minutes(&self) -> u64 {
        self.get_u64("timer_on_minutes", 10)
    }

    pub fn timer_off_minutes(&self) -> u64 {
        self.get_u64("timer_off_minutes", 60)
    }

    /// Minutes of continuous "on" time before the interactive notification;
    /// 0 disables the counter.
    pub fn timer_on_notification_minutes(&self) -> u64 {
        self.get_u64("timer_on_notification_minutes", 0)
    }

    /// Target mode the cyclic turn-off timer applies on expiry.
    pub fn timer_off_hvac_mode(&self) -> String {
        self.get_str("timer_off_hvac_mode", "off")
    }

    /// Fan mode for the cyclic timer; "auto" follows the seasonal fan mode.
    pub fn timer_off_fan_mode(&self) -> String {
        self.get_str("timer_off_fan_mode", "auto")
    }

    /// Start the turn-off timer automatically after each configuration.
    pub fn auto_timer(&self) -> bool {
        self.get_bool("auto_timer", false)
    }

    pub fn language(&self) -> String {
        self.get_str("language", "en")
    }

    pub fn room_name(&self, fallback: &str) -> String {
        self.get_str("room_name", fallback)
    }

    /// Comma-separated push notification targets, `notify.` prefix tolerated.
    pub fn push_targets(&self) -> Vec<String> {
        parse_id_list(self.get("push_targets"))
            .into_iter()
            .map(|t| t.trim_start_matches("notify.").to_string())
            .collect()
    }

    /// Custom message template for a key, if configured.
    pub fn custom_message(&self, key: &str) -> Option<String> {
        match self.get_map("messages").get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Whether a message key is enabled on a channel (default on).
    pub fn message_enabled(&self, channel_key: &str, msg_key: &str) -> bool {
        match self.get_map(channel_key).get(msg_key) {
            Some(Value::Bool(b)) => *b,
            _ => true,
        }
    }

    /// Entity references, failing when the mandatory climate entity is absent.
    pub fn require_entity_refs(&self) -> Result<EntityRefs, ConfigError> {
        self.entity_refs().ok_or(ConfigError::MissingClimateEntity)
    }

    /// Parse the entity references from data + overlay.
    pub fn entity_refs(&self) -> Option<EntityRefs> {
        let climate = self.get_opt_str("climate_entity")?;
        let window_sensors = parse_id_list(self.get("window_sensors"));
        let temperature_sensor = self.get_opt_str("temperature_sensor");
        let power_sensor = self.get_opt_str("climate_power_sensor");
        let media_players = parse_id_list(self.get("media_players"));
        Some(EntityRefs {
            climate,
            window_sensors,
            temperature_sensor,
            power_sensor,
            media_players,
        })
    }
}

/// Entity lists arrive either as JSON arrays or comma-separated strings.
fn parse_id_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(data: &[(&str, Value)], options: &[(&str, Value)]) -> OptionsStore {
        OptionsStore::new(
            data.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            options
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn overlay_wins_over_data() {
        let s = store(
            &[("delay_before_off", json!(10))],
            &[("delay_before_off", json!(30))],
        );
        assert_eq!(s.delay_before_off(), 30);
    }

    #[test]
    fn defaults_apply() {
        let s = store(&[], &[]);
        assert_eq!(s.delay_before_off(), 0);
        assert_eq!(s.window_open_timeout(), 15 * 60);
        assert_eq!(s.timer_off_minutes(), 60);
        assert_eq!(s.timer_on_notification_minutes(), 0);
        assert_eq!(s.timer_off_hvac_mode(), "off");
        assert_eq!(s.language(), "en");
        assert!(s.message_enabled("enable_msgs_push", "window_open"));
    }

    #[test]
    fn numeric_strings_coerce() {
        let s = store(&[("timeout", json!("5")), ("temperature_summer", json!("23.5"))], &[]);
        assert_eq!(s.window_open_timeout(), 300);
        assert_eq!(s.get_f64("temperature_summer", 21.0), 23.5);
    }

    #[test]
    fn update_notifies_subscribers() {
        let s = store(&[], &[]);
        let mut rx = s.subscribe();
        assert_eq!(*rx.borrow(), 0);
        s.update(HashMap::from([("timeout".to_string(), json!(1))]));
        assert!(rx.has_changed().unwrap());
        assert_eq!(s.window_open_timeout(), 60);
    }

    #[test]
    fn window_sensor_list_forms() {
        let s = store(
            &[("window_sensors", json!("binary_sensor.a, binary_sensor.b"))],
            &[],
        );
        assert_eq!(
            parse_id_list(s.get("window_sensors")),
            vec!["binary_sensor.a", "binary_sensor.b"]
        );

        let s = store(
            &[("window_sensors", json!(["binary_sensor.a", "binary_sensor.b"]))],
            &[],
        );
        assert_eq!(parse_id_list(s.get("window_sensors")).len(), 2);
    }

    #[test]
    fn none_sentinel_is_absent() {
        let s = store(
            &[
                ("climate_entity", json!("climate.bedroom")),
                ("temperature_sensor", json!("__NONE__")),
                ("climate_power_sensor", json!("")),
            ],
            &[],
        );
        let refs = s.entity_refs().unwrap();
        assert_eq!(refs.climate, "climate.bedroom");
        assert!(refs.temperature_sensor.is_none());
        assert!(refs.power_sensor.is_none());
    }

    #[test]
    fn push_targets_strip_prefix() {
        let s = store(
            &[("push_targets", json!("notify.mobile_app_phone, telegram_bot"))],
            &[],
        );
        assert_eq!(s.push_targets(), vec!["mobile_app_phone", "telegram_bot"]);
    }

    #[test]
    fn message_enable_map() {
        let s = store(
            &[(
                "enable_msgs_push",
                json!({"window_open": false, "resume": true}),
            )],
            &[],
        );
        assert!(!s.message_enabled("enable_msgs_push", "window_open"));
        assert!(s.message_enabled("enable_msgs_push", "resume"));
        assert!(s.message_enabled("enable_msgs_push", "climate_on_ok"));
    }
}
