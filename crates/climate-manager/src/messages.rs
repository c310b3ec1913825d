//! Notification message catalog and template rendering
//!
//! Messages are minijinja templates with `{{room}}`, `{{mode}}`, `{{temp}}`,
//! ... placeholders. Built-in Italian and English catalogs can be overridden
//! per key through the `messages` option. Numeric placeholders are rendered
//! rounded to the nearest integer with a degree suffix.

use std::collections::HashMap;
use std::sync::Arc;

use minijinja::Environment;
use tracing::warn;

use crate::config::OptionsStore;

/// Every message the integration can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    WindowOpen,
    Resume,
    WindowOpenLong,
    WindowBlocked,
    ClimateBlockedTemp,
    ClimateBlockedSummer,
    ClimateBlockedWinter,
    ClimateOnOk,
    TimerOffExecuted,
    TimerOffModeExecuted,
    TimerOnNotification,
}

impl MessageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::WindowOpen => "window_open",
            MessageKey::Resume => "resume",
            MessageKey::WindowOpenLong => "window_open_long",
            MessageKey::WindowBlocked => "window_blocked",
            MessageKey::ClimateBlockedTemp => "climate_blocked_temp",
            MessageKey::ClimateBlockedSummer => "climate_blocked_summer",
            MessageKey::ClimateBlockedWinter => "climate_blocked_winter",
            MessageKey::ClimateOnOk => "climate_on_ok",
            MessageKey::TimerOffExecuted => "timer_off_executed",
            MessageKey::TimerOffModeExecuted => "timer_off_mode_executed",
            MessageKey::TimerOnNotification => "timer_on_notification",
        }
    }
}

fn builtin(lang: &str, key: MessageKey) -> &'static str {
    match lang {
        "it" => match key {
            MessageKey::WindowOpen => "Clima spento in {{room}}, finestra aperta.",
            MessageKey::Resume => "Clima ripristinato in {{room}}, {{mode}}, ventola {{fan}}, {{temp}}.",
            MessageKey::WindowOpenLong => "Automazione spenta in {{room}}.",
            MessageKey::WindowBlocked => "Clima bloccato per finestra aperta in {{room}}.",
            MessageKey::ClimateBlockedTemp => "Temperatura non valida in {{room}}, {{sensor}}.",
            MessageKey::ClimateBlockedSummer => {
                "Temperatura {{sensor}} in {{room}} sotto soglia {{threshold}}, clima non acceso."
            }
            MessageKey::ClimateBlockedWinter => {
                "Temperatura {{sensor}} in {{room}} sopra soglia {{threshold}}, clima non acceso."
            }
            MessageKey::ClimateOnOk => "Clima acceso in {{room}}, {{mode}} {{fan}} {{temp}}.",
            MessageKey::TimerOffExecuted => {
                "Timer di spegnimento eseguito in {{room}}, clima spento."
            }
            MessageKey::TimerOffModeExecuted => {
                "Timer di spegnimento eseguito in {{room}}, passaggio a modalità {{mode}}."
            }
            MessageKey::TimerOnNotification => "Clima acceso da {{minutes}} minuti in {{room}}",
        },
        _ => match key {
            MessageKey::WindowOpen => "Climate off in {{room}}, window open.",
            MessageKey::Resume => {
                "Climate restored in {{room}}, {{mode_en}}, fan {{fan_en}}, {{temp_en}}."
            }
            MessageKey::WindowOpenLong => "Automation turned off in {{room}}.",
            MessageKey::WindowBlocked => "Climate blocked for open window in {{room}}.",
            MessageKey::ClimateBlockedTemp => {
                "Climate blocked in {{room}}, invalid temp, {{sensor_en}}."
            }
            MessageKey::ClimateBlockedSummer => {
                "Climate blocked in {{room}}, temp {{sensor_en}} below threshold {{threshold}}, climate off."
            }
            MessageKey::ClimateBlockedWinter => {
                "Climate blocked in {{room}}, temp {{sensor_en}} above threshold {{threshold}}, climate off."
            }
            MessageKey::ClimateOnOk => "Climate on in {{room}}, {{mode_en}} {{fan_en}} {{temp_en}}.",
            MessageKey::TimerOffExecuted => "Turn-off timer executed in {{room}}, climate turned off.",
            MessageKey::TimerOffModeExecuted => {
                "Turn-off timer executed in {{room}}, switching to {{mode}} mode."
            }
            MessageKey::TimerOnNotification => "Climate on for {{minutes}} minutes in {{room}}",
        },
    }
}

fn translate_mode(mode: &str, lang: &str) -> String {
    let translated = match lang {
        "it" => match mode {
            "auto" => "automatico",
            "cool" => "raffrescamento",
            "heat" => "riscaldamento",
            "heat_cool" => "riscaldamento/raffrescamento",
            "fan_only" => "ventilazione",
            "dry" => "deumidificazione",
            "off" => "spento",
            "summer" => "estate",
            "winter" => "inverno",
            other => other,
        },
        _ => match mode {
            "cool" => "cooling",
            "heat" => "heating",
            "heat_cool" => "heating/cooling",
            "fan_only" => "fan only",
            other => other,
        },
    };
    translated.to_string()
}

fn translate_fan(fan: &str, lang: &str) -> String {
    let translated = match lang {
        "it" => match fan {
            "auto" => "automatico",
            "low" => "bassa",
            "medium" => "media",
            "high" => "alta",
            other => other,
        },
        _ => fan,
    };
    translated.to_string()
}

/// Round to the nearest integer and attach the degree suffix.
fn degrees(value: f64) -> String {
    format!("{} °", value.round() as i64)
}

/// Values available to a message template.
#[derive(Debug, Default, Clone)]
pub struct MessageArgs {
    pub mode: Option<String>,
    pub temp: Option<f64>,
    pub fan: Option<String>,
    pub sensor: Option<f64>,
    pub threshold: Option<f64>,
    pub room: Option<String>,
    pub minutes: Option<u64>,
    pub extra: HashMap<String, String>,
}

impl MessageArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn temp(mut self, temp: f64) -> Self {
        self.temp = Some(temp);
        self
    }

    pub fn fan(mut self, fan: impl Into<String>) -> Self {
        self.fan = Some(fan.into());
        self
    }

    pub fn fan_opt(mut self, fan: Option<String>) -> Self {
        self.fan = fan;
        self
    }

    pub fn sensor(mut self, sensor: Option<f64>) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn minutes(mut self, minutes: u64) -> Self {
        self.minutes = Some(minutes);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Renders catalog or user-provided templates for one coordinator instance.
pub struct MessageRenderer {
    options: Arc<OptionsStore>,
    /// Room fallback when neither args nor options provide one
    default_room: String,
    env: Environment<'static>,
}

impl MessageRenderer {
    pub fn new(options: Arc<OptionsStore>, default_room: impl Into<String>) -> Self {
        Self {
            options,
            default_room: default_room.into(),
            env: Environment::new(),
        }
    }

    /// Render the message for `key` with the given arguments.
    pub fn render(&self, key: MessageKey, args: &MessageArgs) -> String {
        let lang = self.options.language();
        let template = self
            .options
            .custom_message(key.as_str())
            .unwrap_or_else(|| builtin(&lang, key).to_string());
        self.render_template(&template, &lang, args)
    }

    fn render_template(&self, template: &str, lang: &str, args: &MessageArgs) -> String {
        let mut ctx: HashMap<String, String> = HashMap::new();

        let room = args
            .room
            .clone()
            .unwrap_or_else(|| self.options.room_name(&self.default_room));
        ctx.insert("room".to_string(), room);

        if let Some(mode) = &args.mode {
            ctx.insert("mode".to_string(), translate_mode(mode, lang));
            ctx.insert("mode_en".to_string(), translate_mode(mode, "en"));
        }
        if let Some(fan) = &args.fan {
            ctx.insert("fan".to_string(), translate_fan(fan, lang));
            ctx.insert("fan_en".to_string(), translate_fan(fan, "en"));
        }
        if let Some(temp) = args.temp {
            ctx.insert("temp".to_string(), degrees(temp));
            ctx.insert("temp_en".to_string(), degrees(temp));
        }
        if let Some(sensor) = args.sensor {
            ctx.insert("sensor".to_string(), degrees(sensor));
            ctx.insert("sensor_en".to_string(), degrees(sensor));
        }
        if let Some(threshold) = args.threshold {
            ctx.insert("threshold".to_string(), degrees(threshold));
        }
        if let Some(minutes) = args.minutes {
            ctx.insert("minutes".to_string(), minutes.to_string());
        }
        for (key, value) in &args.extra {
            ctx.insert(key.clone(), value.clone());
        }

        match self.env.render_str(template, &ctx) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(error = %err, template, "Message template failed to render");
                template.to_string()
            }
        }
    }
}

/// Confirmation text for the "turn off" interactive action.
pub fn confirmation_turned_off(lang: &str, room: &str) -> String {
    match lang {
        "it" => format!("✅ Clima spento in {room}"),
        _ => format!("✅ Climate turned off in {room}"),
    }
}

/// Confirmation text for the "leave on" interactive action.
pub fn confirmation_left_on(lang: &str, room: &str) -> String {
    match lang {
        "it" => format!("ℹ️ Clima lasciato acceso in {room}"),
        _ => format!("ℹ️ Climate left on in {room}"),
    }
}

/// Button labels for the interactive notification.
pub fn action_titles(lang: &str) -> (&'static str, &'static str) {
    match lang {
        "it" => ("SPEGNI", "LASCIA ACCESO"),
        _ => ("TURN OFF", "LEAVE ON"),
    }
}
