//! Window-aware climate automation
//!
//! Manages an air conditioner / heater based on window state, seasonal
//! configuration, temperature thresholds and timers. The component runs
//! against a Home Assistant-style host modeled by `hass-core`: it reads
//! entity states, subscribes to state-change events, issues `climate.*`
//! service calls and delivers `notify.*` messages.
//!
//! The interesting part is the [`coordinator::Coordinator`]: an explicit
//! state machine orchestrating overlapping timers (window timeout, off/on
//! delays, the turn-on notification counter, the cyclic turn-off timer)
//! while distinguishing automation-driven from manual state changes.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod messages;
pub mod notify;
pub mod season;
pub mod timer;
pub mod window;

pub use config::{ConfigEntry, ConfigError, OptionsStore};
pub use coordinator::{AutomationState, ClimatePhase, Coordinator, StatusSnapshot};
pub use device::{ClimateDevice, ClimateTarget};
pub use season::{Season, SeasonMode};

use std::collections::HashMap;

use dashmap::DashMap;
use hass_core::{Hass, ServiceCall, ServiceError};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Integration domain
pub const DOMAIN: &str = "climate_manager";

/// Component instance: owns the per-entry coordinators and the
/// `climate_manager.*` services.
pub struct ClimateManager {
    hass: Hass,
    entries: DashMap<String, Arc<Coordinator>>,
}

impl ClimateManager {
    /// Set the component up and register its services on the host.
    pub fn setup(hass: Hass) -> Arc<Self> {
        let manager = Arc::new(Self {
            hass,
            entries: DashMap::new(),
        });
        manager.register_services();
        manager
    }

    /// Set up one config entry: build and wire its coordinator.
    pub async fn async_setup_entry(
        &self,
        entry: &ConfigEntry,
    ) -> anyhow::Result<Arc<Coordinator>> {
        let coordinator = Coordinator::new(self.hass.clone(), entry)?;
        coordinator.setup().await;
        self.entries
            .insert(entry.entry_id.clone(), coordinator.clone());
        info!(entry_id = %entry.entry_id, title = %entry.title, "Climate Manager entry set up");
        Ok(coordinator)
    }

    /// Unload a config entry, tearing its coordinator down.
    pub async fn async_unload_entry(&self, entry_id: &str) -> bool {
        match self.entries.remove(entry_id) {
            Some((_, coordinator)) => {
                coordinator.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, entry_id: &str) -> Option<Arc<Coordinator>> {
        self.entries.get(entry_id).map(|e| e.value().clone())
    }

    /// Locate the coordinator a service call addresses, by `entry_id` or by
    /// the managed climate `entity_id`.
    fn resolve(&self, call: &ServiceCall) -> Result<Arc<Coordinator>, ServiceError> {
        if let Some(entry_id) = call.get::<String>("entry_id") {
            return self.get(&entry_id).ok_or_else(|| {
                ServiceError::InvalidData(format!("unknown entry_id {entry_id}"))
            });
        }
        if let Some(entity_id) = call.get::<String>("entity_id") {
            for entry in self.entries.iter() {
                if entry.value().climate_entity() == entity_id {
                    return Ok(entry.value().clone());
                }
            }
            return Err(ServiceError::InvalidData(format!(
                "no coordinator manages {entity_id}"
            )));
        }
        Err(ServiceError::InvalidData(
            "entry_id or entity_id required".to_string(),
        ))
    }

    fn register_services(self: &Arc<Self>) {
        let services = self.hass.services.clone();

        // Services that forward call parameters straight into the options
        // overlay, parameter name -> option key.
        type KeyMap = &'static [(&'static str, &'static str)];
        static OPTION_SERVICES: &[(&str, KeyMap)] = &[
            (
                "set_timer",
                &[
                    ("timeout", "timeout"),
                    ("delay_before_off", "delay_before_off"),
                    ("delay_before_on", "delay_before_on"),
                ],
            ),
            (
                "set_fan_mode",
                &[
                    ("fan_mode_summer", "fan_mode_summer"),
                    ("fan_mode_winter", "fan_mode_winter"),
                ],
            ),
            (
                "set_temperature",
                &[
                    ("temperature_summer", "temperature_summer"),
                    ("temperature_winter", "temperature_winter"),
                ],
            ),
            (
                "set_hvac_mode",
                &[
                    ("hvac_mode_summer", "hvac_mode_summer"),
                    ("hvac_mode_winter", "hvac_mode_winter"),
                ],
            ),
            (
                "set_preset_mode",
                &[
                    ("preset_mode_summer", "preset_mode_summer"),
                    ("preset_mode_winter", "preset_mode_winter"),
                ],
            ),
            (
                "set_notification_time_range",
                &[
                    ("start_push", "notification_time_start_push"),
                    ("end_push", "notification_time_end_push"),
                    ("start_alexa", "notification_time_start_alexa"),
                    ("end_alexa", "notification_time_end_alexa"),
                ],
            ),
            ("set_push_targets", &[("targets", "push_targets")]),
            ("set_room_name", &[("room_name", "room_name")]),
        ];

        for (service, keys) in OPTION_SERVICES {
            let manager = self.clone();
            services.register(DOMAIN, *service, move |call| {
                let manager = manager.clone();
                async move {
                    let coordinator = manager.resolve(&call)?;
                    let updates: HashMap<String, Value> = keys
                        .iter()
                        .filter_map(|(param, option)| {
                            call.service_data
                                .get(*param)
                                .map(|v| (option.to_string(), v.clone()))
                        })
                        .collect();
                    if !updates.is_empty() {
                        coordinator.update_options(updates).await;
                    }
                    Ok(None)
                }
            });
        }

        let manager = self.clone();
        services.register(DOMAIN, "set_season", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                let season: String = call
                    .get("season")
                    .ok_or_else(|| ServiceError::InvalidData("season required".to_string()))?;
                coordinator.set_season(&season).await;
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "set_option", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                let key: String = call
                    .get("key")
                    .ok_or_else(|| ServiceError::InvalidData("key required".to_string()))?;
                let value = call
                    .service_data
                    .get("value")
                    .cloned()
                    .ok_or_else(|| ServiceError::InvalidData("value required".to_string()))?;
                coordinator
                    .update_options(HashMap::from([(key, value)]))
                    .await;
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "set_message", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                let key: String = call
                    .get("key")
                    .ok_or_else(|| ServiceError::InvalidData("key required".to_string()))?;
                let value: String = call
                    .get("value")
                    .ok_or_else(|| ServiceError::InvalidData("value required".to_string()))?;
                let mut messages = coordinator.options().get_map("messages");
                messages.insert(key, Value::String(value));
                coordinator
                    .update_options(HashMap::from([(
                        "messages".to_string(),
                        Value::Object(messages.into_iter().collect()),
                    )]))
                    .await;
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "set_notification_switch", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                let msg_type: String = call
                    .get("msg_type")
                    .ok_or_else(|| ServiceError::InvalidData("msg_type required".to_string()))?;
                let channel: String = call
                    .get("channel")
                    .ok_or_else(|| ServiceError::InvalidData("channel required".to_string()))?;
                let value: bool = call
                    .get("value")
                    .ok_or_else(|| ServiceError::InvalidData("value required".to_string()))?;
                if channel != "alexa" && channel != "push" {
                    return Err(ServiceError::InvalidData(format!(
                        "unknown channel {channel}"
                    )));
                }
                let option = format!("enable_msgs_{channel}");
                let mut enables = coordinator.options().get_map(&option);
                enables.insert(msg_type, Value::Bool(value));
                coordinator
                    .update_options(HashMap::from([(
                        option,
                        Value::Object(enables.into_iter().collect()),
                    )]))
                    .await;
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "enable_automations", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                coordinator.enable_automations(true).await;
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "disable_automations", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                coordinator.disable_automations().await;
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "set_settings_lock", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                let locked: bool = call
                    .get("locked")
                    .ok_or_else(|| ServiceError::InvalidData("locked required".to_string()))?;
                coordinator.set_settings_lock(locked).await;
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "start_timer", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                match call.get::<String>("timer").as_deref() {
                    Some("on") => coordinator.start_timer_on(),
                    Some("off") => coordinator.start_timer_off(),
                    other => {
                        return Err(ServiceError::InvalidData(format!(
                            "timer must be \"on\" or \"off\", got {other:?}"
                        )))
                    }
                }
                Ok(None)
            }
        });

        let manager = self.clone();
        services.register(DOMAIN, "stop_timer", move |call| {
            let manager = manager.clone();
            async move {
                let coordinator = manager.resolve(&call)?;
                match call.get::<String>("timer").as_deref() {
                    Some("on") => coordinator.stop_timer_on(),
                    Some("off") => coordinator.stop_timer_off().await,
                    other => {
                        return Err(ServiceError::InvalidData(format!(
                            "timer must be \"on\" or \"off\", got {other:?}"
                        )))
                    }
                }
                Ok(None)
            }
        });
    }
}
