//! Climate device abstraction
//!
//! Wraps the host handle with typed reads and fail-soft commands for one
//! climate entity. Transient desync with flaky physical devices is handled by
//! the bounded verify-and-retry loop, not by error propagation: a failed fan
//! command never blocks the temperature command that follows it.

use hass_core::{events::StateChangedData, Hass, State, STATE_OFF};
use serde_json::json;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::season::SeasonalTarget;

/// Settle delay between sequential setting commands
const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// First verification happens after the device had time to sync
const VERIFY_FIRST_DELAY: Duration = Duration::from_secs(2);

/// Interval between verification attempts
const VERIFY_INTERVAL: Duration = Duration::from_secs(5);

/// 24 attempts at 5 s ≈ two minutes of retrying
const VERIFY_MAX_ATTEMPTS: u32 = 24;

/// Acceptable target temperature mismatch
const TEMP_TOLERANCE: f64 = 0.5;

/// Attribute names that may carry the room temperature, in priority order.
/// `temp` comes last and only counts when it differs from the target.
const TEMP_ATTRIBUTES: &[&str] = &[
    "current_temperature",
    "current_temp",
    "ambient_temperature",
    "room_temperature",
    "inside_temperature",
    "temp",
];

/// Room temperature carried by a climate state's own attributes, in priority
/// order. `temp` only counts when it does not mirror the target temperature.
pub fn temperature_from_attributes(state: &State) -> Option<f64> {
    for attr in TEMP_ATTRIBUTES {
        let Some(value) = state.attr_f64(attr) else {
            continue;
        };
        if *attr == "temp" {
            if let Some(target) = state.attr_f64("temperature") {
                if (value - target).abs() < 0.1 {
                    continue;
                }
            }
        }
        return Some(value);
    }
    None
}

/// Target settings to apply and verify on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateTarget {
    pub hvac_mode: String,
    pub temperature: Option<f64>,
    pub fan_mode: Option<String>,
    pub preset_mode: Option<String>,
}

impl From<SeasonalTarget> for ClimateTarget {
    fn from(target: SeasonalTarget) -> Self {
        Self {
            hvac_mode: target.hvac_mode,
            temperature: Some(target.temperature),
            fan_mode: target.fan_mode,
            preset_mode: target.preset_mode,
        }
    }
}

#[derive(Clone)]
pub struct ClimateDevice {
    hass: Hass,
    entity_id: String,
    temperature_sensor: Option<String>,
    power_sensor: Option<String>,
}

impl ClimateDevice {
    pub fn new(
        hass: Hass,
        entity_id: String,
        temperature_sensor: Option<String>,
        power_sensor: Option<String>,
    ) -> Self {
        Self {
            hass,
            entity_id,
            temperature_sensor,
            power_sensor,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn power_sensor(&self) -> Option<&str> {
        self.power_sensor.as_deref()
    }

    pub fn state(&self) -> Option<State> {
        self.hass.states.get(&self.entity_id)
    }

    pub fn is_off(&self) -> bool {
        self.state().map(|s| s.is_off()).unwrap_or(true)
    }

    fn modes_attribute(&self, key: &str) -> Vec<String> {
        self.state()
            .and_then(|s| s.attribute::<Vec<String>>(key))
            .unwrap_or_default()
    }

    pub fn hvac_modes(&self) -> Vec<String> {
        self.modes_attribute("hvac_modes")
    }

    pub fn supports_hvac_mode(&self, mode: &str) -> bool {
        self.hvac_modes().iter().any(|m| m == mode)
    }

    pub fn supports_fan_mode(&self, mode: &str) -> bool {
        self.modes_attribute("fan_modes").iter().any(|m| m == mode)
    }

    pub fn supports_preset_mode(&self, mode: &str) -> bool {
        self.modes_attribute("preset_modes").iter().any(|m| m == mode)
    }

    /// Room temperature: external sensor first, then the climate entity's
    /// own attributes in priority order.
    pub fn current_temperature(&self) -> Option<f64> {
        if let Some(sensor) = &self.temperature_sensor {
            if let Some(state) = self.hass.states.get(sensor) {
                if state.is_valid() {
                    if let Some(value) = state.numeric() {
                        return Some(value);
                    }
                }
            }
        }

        temperature_from_attributes(&self.state()?)
    }

    /// Snapshot of the settings currently on the device.
    pub fn snapshot(&self) -> Option<ClimateTarget> {
        let state = self.state()?;
        if state.is_off() || !state.is_valid() {
            return None;
        }
        Some(ClimateTarget {
            hvac_mode: state.state.clone(),
            temperature: state.attr_f64("temperature"),
            fan_mode: state.attr_str("fan_mode"),
            preset_mode: state.attr_str("preset_mode"),
        })
    }

    fn entity_data(&self) -> serde_json::Value {
        json!({ "entity_id": self.entity_id })
    }

    pub async fn set_hvac_mode(&self, mode: &str) -> bool {
        self.hass
            .call_service_soft(
                "climate",
                "set_hvac_mode",
                json!({ "entity_id": self.entity_id, "hvac_mode": mode }),
            )
            .await
    }

    pub async fn set_temperature(&self, temperature: f64) -> bool {
        self.hass
            .call_service_soft(
                "climate",
                "set_temperature",
                json!({ "entity_id": self.entity_id, "temperature": temperature }),
            )
            .await
    }

    pub async fn set_fan_mode(&self, mode: &str) -> bool {
        self.hass
            .call_service_soft(
                "climate",
                "set_fan_mode",
                json!({ "entity_id": self.entity_id, "fan_mode": mode }),
            )
            .await
    }

    pub async fn set_preset_mode(&self, mode: &str) -> bool {
        self.hass
            .call_service_soft(
                "climate",
                "set_preset_mode",
                json!({ "entity_id": self.entity_id, "preset_mode": mode }),
            )
            .await
    }

    /// Turn the device off, falling back to `set_hvac_mode: off` when the
    /// `turn_off` service is not available.
    pub async fn turn_off(&self) -> bool {
        match self
            .hass
            .call_service("climate", "turn_off", self.entity_data())
            .await
        {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "climate.turn_off failed, falling back to set_hvac_mode");
                self.set_hvac_mode(STATE_OFF).await
            }
        }
    }

    /// Apply mode, temperature and fan sequentially with settle delays.
    pub async fn apply_settings(&self, target: &ClimateTarget) {
        self.set_hvac_mode(&target.hvac_mode).await;
        sleep(SETTLE_DELAY).await;

        if let Some(temperature) = target.temperature {
            self.set_temperature(temperature).await;
            sleep(SETTLE_DELAY).await;
        }

        if let Some(fan) = &target.fan_mode {
            self.set_fan_mode(fan).await;
            sleep(SETTLE_DELAY).await;
        }

        if let Some(preset) = &target.preset_mode {
            self.set_preset_mode(preset).await;
            sleep(SETTLE_DELAY).await;
        }
    }

    /// Which parts of the target the device currently disagrees with.
    fn mismatches(&self, target: &ClimateTarget) -> Option<(bool, bool, bool)> {
        let state = self.state()?;
        if state.is_off() || !state.is_valid() {
            return None;
        }
        let hvac_ok = state.state == target.hvac_mode;
        let temp_ok = match target.temperature {
            Some(expected) => state
                .attr_f64("temperature")
                .map(|actual| (actual - expected).abs() < TEMP_TOLERANCE)
                .unwrap_or(false),
            None => true,
        };
        let fan_ok = match &target.fan_mode {
            Some(expected) => state.attr_str("fan_mode").as_deref() == Some(expected),
            None => true,
        };
        Some((hvac_ok, temp_ok, fan_ok))
    }

    /// Bounded verify-and-retry loop: reapply every setting that does not
    /// match until everything agrees or the attempts run out.
    pub async fn verify_and_retry(&self, target: &ClimateTarget) -> bool {
        for attempt in 1..=VERIFY_MAX_ATTEMPTS {
            if attempt == 1 {
                sleep(VERIFY_FIRST_DELAY).await;
            } else {
                sleep(VERIFY_INTERVAL).await;
            }

            let Some((hvac_ok, temp_ok, fan_ok)) = self.mismatches(target) else {
                warn!(
                    entity_id = %self.entity_id,
                    attempt,
                    max = VERIFY_MAX_ATTEMPTS,
                    "Climate unavailable during settings verification"
                );
                continue;
            };

            if hvac_ok && temp_ok && fan_ok {
                info!(entity_id = %self.entity_id, attempt, "Climate settings verified");
                return true;
            }

            if attempt < VERIFY_MAX_ATTEMPTS {
                warn!(
                    entity_id = %self.entity_id,
                    attempt,
                    hvac_ok,
                    temp_ok,
                    fan_ok,
                    "Climate settings drifted, reapplying"
                );
                if !hvac_ok {
                    self.set_hvac_mode(&target.hvac_mode).await;
                    sleep(SETTLE_DELAY).await;
                }
                if !temp_ok {
                    if let Some(temperature) = target.temperature {
                        self.set_temperature(temperature).await;
                        sleep(SETTLE_DELAY).await;
                    }
                }
                if !fan_ok {
                    if let Some(fan) = &target.fan_mode {
                        self.set_fan_mode(fan).await;
                        sleep(SETTLE_DELAY).await;
                    }
                }
            }
        }

        error!(
            entity_id = %self.entity_id,
            attempts = VERIFY_MAX_ATTEMPTS,
            "Climate settings could not be applied"
        );
        false
    }

    /// Wait for the device to report off: a state-change listener raced
    /// against a 500 ms poll, bounded by a safety timeout.
    pub async fn wait_for_off(&self, safety_timeout: Duration) -> bool {
        let mut rx = self.hass.bus.subscribe_typed::<StateChangedData>();

        if self.is_off() {
            return true;
        }

        let entity_id = self.entity_id.clone();
        let wait = async {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        if let Ok(event) = event {
                            if event.data.entity_id.to_string() == entity_id {
                                if let Some(new_state) = &event.data.new_state {
                                    if new_state.is_off() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    _ = sleep(Duration::from_millis(500)) => {
                        if self.is_off() {
                            return;
                        }
                    }
                }
            }
        };

        if timeout(safety_timeout, wait).await.is_err() {
            warn!(entity_id = %self.entity_id, "Timed out waiting for climate to turn off");
            return self.is_off();
        }
        true
    }

    /// Poll the power sensor until it reports the expected state.
    pub async fn wait_for_power_state(&self, expected: &str, safety_timeout: Duration) -> bool {
        let Some(sensor) = &self.power_sensor else {
            return false;
        };
        let deadline = Instant::now() + safety_timeout;
        while Instant::now() < deadline {
            sleep(Duration::from_millis(200)).await;
            if let Some(state) = self.hass.states.get(sensor) {
                if state.is_valid() && state.state == expected {
                    return true;
                }
            }
        }
        warn!(sensor, expected, "Timed out waiting for power sensor");
        false
    }
}
