//! Season resolution and per-season target settings
//!
//! The effective season selects the hvac mode, temperature, fan mode and
//! threshold direction the automation applies. It is either forced by
//! configuration or derived from the calendar and refreshed nightly.

use std::sync::RwLock;

use chrono::{Datelike, Local, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OptionsStore;

/// Operating profile of the automation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Summer,
    Winter,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Summer => "summer",
            Season::Winter => "winter",
        }
    }
}

/// Configured season mode: forced profile or calendar-driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonMode {
    #[default]
    Auto,
    Summer,
    Winter,
}

impl SeasonMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "summer" => SeasonMode::Summer,
            "winter" => SeasonMode::Winter,
            _ => SeasonMode::Auto,
        }
    }
}

/// Calendar rule: April through September is summer.
pub fn season_for_month(month: u32) -> Season {
    if (4..=9).contains(&month) {
        Season::Summer
    } else {
        Season::Winter
    }
}

/// Target device settings for one season
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalTarget {
    pub hvac_mode: String,
    pub temperature: f64,
    pub fan_mode: Option<String>,
    pub preset_mode: Option<String>,
}

/// Caches the resolved season, recomputing on demand and on the nightly
/// refresh schedule.
pub struct SeasonResolver {
    resolved: RwLock<Season>,
}

impl SeasonResolver {
    pub fn new(mode: SeasonMode) -> Self {
        Self {
            resolved: RwLock::new(resolve(mode, Local::now().month())),
        }
    }

    /// The cached effective season.
    pub fn resolved(&self) -> Season {
        *self.resolved.read().unwrap()
    }

    /// Recompute the effective season from the given mode and current month.
    pub fn refresh(&self, mode: SeasonMode) -> Season {
        let season = resolve(mode, Local::now().month());
        *self.resolved.write().unwrap() = season;
        debug!(season = season.as_str(), "Season refreshed");
        season
    }

    /// Seconds until the next nightly refresh (03:00 local).
    pub fn seconds_until_refresh(&self) -> u64 {
        let now = Local::now();
        let three = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let today: NaiveDate = now.date_naive();
        let mut next = today.and_time(three);
        if now.naive_local() >= next {
            next += chrono::Duration::days(1);
        }
        match Local.from_local_datetime(&next).earliest() {
            Some(next) => (next - now).num_seconds().max(60) as u64,
            // Ambiguous local time around a DST jump: fall back to a day.
            None => 24 * 3600,
        }
    }
}

fn resolve(mode: SeasonMode, month: u32) -> Season {
    match mode {
        SeasonMode::Summer => Season::Summer,
        SeasonMode::Winter => Season::Winter,
        SeasonMode::Auto => season_for_month(month),
    }
}

/// Read the seasonal target settings for `season` from the options.
pub fn seasonal_target(options: &OptionsStore, season: Season) -> SeasonalTarget {
    match season {
        Season::Summer => SeasonalTarget {
            hvac_mode: options.get_str("hvac_mode_summer", "cool"),
            temperature: options.get_f64("temperature_summer", 21.0),
            fan_mode: Some(options.get_str("fan_mode_summer", "medium")),
            preset_mode: options.get_opt_str("preset_mode_summer"),
        },
        Season::Winter => SeasonalTarget {
            hvac_mode: options.get_str("hvac_mode_winter", "heat"),
            temperature: options.get_f64("temperature_winter", 21.0),
            fan_mode: Some(options.get_str("fan_mode_winter", "medium")),
            preset_mode: options.get_opt_str("preset_mode_winter"),
        },
    }
}

/// Threshold check: is `reading` outside the allowed band for `season`?
///
/// Summer blocks when the room is already colder than the threshold, winter
/// when it is already warmer.
pub fn threshold_violation(options: &OptionsStore, season: Season, reading: f64) -> Option<f64> {
    match season {
        Season::Summer => {
            let threshold = options.get_f64("summer_temp_threshold", 19.0);
            (reading < threshold).then_some(threshold)
        }
        Season::Winter => {
            let threshold = options.get_f64("winter_temp_threshold", 25.0);
            (reading > threshold).then_some(threshold)
        }
    }
}
