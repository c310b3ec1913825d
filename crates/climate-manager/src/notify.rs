//! Notification dispatcher
//!
//! Routes rendered messages to the configured voice and push channels,
//! honoring per-key enable flags and per-channel time-of-day windows, and
//! absorbing duplicate interactive notifications and duplicate inbound action
//! events with short debounce windows.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{Local, NaiveTime};
use dashmap::{DashMap, DashSet};
use hass_core::Hass;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::OptionsStore;
use crate::messages::{action_titles, MessageKey};

/// Debounce window for identical interactive notifications
const INTERACTIVE_DEBOUNCE: Duration = Duration::from_secs(5);

/// Debounce window for inbound action events (double-delivery from the bus)
const ACTION_DEBOUNCE: Duration = Duration::from_secs(2);

/// Debounce window for action confirmation pushes
const CONFIRM_DEBOUNCE: Duration = Duration::from_secs(3);

/// A named delivery target class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Alexa,
    Push,
}

impl Channel {
    fn enable_key(&self) -> &'static str {
        match self {
            Channel::Alexa => "enable_msgs_alexa",
            Channel::Push => "enable_msgs_push",
        }
    }

    fn window_keys(&self) -> (&'static str, &'static str) {
        match self {
            Channel::Alexa => ("notification_time_start_alexa", "notification_time_end_alexa"),
            Channel::Push => ("notification_time_start_push", "notification_time_end_push"),
        }
    }
}

/// Is `now` inside the allowed window? `end < start` spans midnight;
/// `start == end` means always allowed.
pub fn window_allows(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start == end {
        true
    } else if start < end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

fn parse_time(value: &str, default: NaiveTime) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").unwrap_or(default)
}

pub struct Notifier {
    hass: Hass,
    options: Arc<OptionsStore>,
    entry_id: String,
    title: String,
    interactive_sent: DashMap<u64, Instant>,
    confirms_sent: DashMap<u64, Instant>,
    actions_seen: DashMap<String, Instant>,
    callbacks_seen: DashSet<String>,
}

impl Notifier {
    pub fn new(hass: Hass, options: Arc<OptionsStore>, entry_id: String, title: String) -> Self {
        Self {
            hass,
            options,
            entry_id,
            title,
            interactive_sent: DashMap::new(),
            confirms_sent: DashMap::new(),
            actions_seen: DashMap::new(),
            callbacks_seen: DashSet::new(),
        }
    }

    /// Stable tag used to address (and later clear) the interactive notification.
    pub fn notification_tag(&self) -> String {
        format!("climate_timer_{}", self.entry_id)
    }

    fn is_enabled(&self, key: MessageKey, channel: Channel) -> bool {
        self.options.message_enabled(channel.enable_key(), key.as_str())
    }

    fn in_window(&self, channel: Channel) -> bool {
        let (start_key, end_key) = channel.window_keys();
        let start = parse_time(
            &self.options.get_str(start_key, "08:00"),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        );
        let end = parse_time(
            &self.options.get_str(end_key, "22:00"),
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        );
        window_allows(Local::now().time(), start, end)
    }

    /// Whether at least one channel would accept this message key.
    pub fn any_channel_enabled(&self, key: MessageKey) -> bool {
        self.is_enabled(key, Channel::Alexa) || self.is_enabled(key, Channel::Push)
    }

    /// Deliver a rendered message to every configured, enabled channel.
    ///
    /// Per-target failures are logged and never abort the remaining targets.
    pub async fn send(&self, key: MessageKey, message: &str) {
        if self.is_enabled(key, Channel::Alexa) && self.in_window(Channel::Alexa) {
            for player in self.media_players() {
                self.send_voice(&player, message).await;
            }
        }

        if self.is_enabled(key, Channel::Push) && self.in_window(Channel::Push) {
            for target in self.options.push_targets() {
                if !self
                    .hass
                    .call_service_soft("notify", &target, json!({ "message": message }))
                    .await
                {
                    warn!(target, key = key.as_str(), "Push notification failed");
                }
            }
        }
    }

    /// Voice delivery: prefer the new `notify.<device>_speak`/`_announce`
    /// entities when present, fall back to the legacy per-device service.
    async fn send_voice(&self, media_player: &str, message: &str) {
        let device = media_player.rsplit('.').next().unwrap_or(media_player);

        for suffix in ["speak", "announce"] {
            let entity = format!("notify.{device}_{suffix}");
            if self.hass.states.get(&entity).is_some() {
                self.hass
                    .call_service_soft(
                        "notify",
                        "send_message",
                        json!({ "message": message, "entity_id": entity }),
                    )
                    .await;
                return;
            }
        }

        let legacy = format!("alexa_media_{device}");
        self.hass
            .call_service_soft("notify", &legacy, json!({ "message": message }))
            .await;
    }

    fn media_players(&self) -> Vec<String> {
        self.options
            .entity_refs()
            .map(|refs| refs.media_players)
            .unwrap_or_default()
    }

    /// Send the interactive "climate still on" notification with turn-off /
    /// leave-on actions. Push only; duplicates within a short window are
    /// suppressed by content hash.
    pub async fn send_interactive(&self, message: &str, room: &str) {
        let mut hasher = DefaultHasher::new();
        (message, &self.entry_id, room).hash(&mut hasher);
        if !self.debounce(&self.interactive_sent, hasher.finish(), INTERACTIVE_DEBOUNCE) {
            debug!(room, "Interactive notification suppressed (debounce)");
            return;
        }

        if !self.in_window(Channel::Push) {
            return;
        }

        let targets = self.options.push_targets();
        if targets.is_empty() {
            warn!(room, "No push targets configured for interactive notification");
            return;
        }

        let lang = self.options.language();
        let (turn_off, leave_on) = action_titles(&lang);
        let turn_off_action = format!("TURN_OFF_CLIMATE_{}", self.entry_id);
        let leave_on_action = format!("IGNORE_CLIMATE_{}", self.entry_id);
        let title = format!("🔥 Climate Manager - {room}");

        for target in targets {
            let data = if target.to_lowercase().contains("telegram") {
                // Bot targets get inline keyboard commands instead of actions
                json!({
                    "title": title,
                    "message": message,
                    "data": {
                        "inline_keyboard": [format!(
                            "{turn_off}:/turn_off_climate_{id}, {leave_on}:/ignore_climate_{id}",
                            id = self.entry_id
                        )],
                    },
                })
            } else {
                json!({
                    "title": title,
                    "message": message,
                    "data": {
                        "tag": self.notification_tag(),
                        "persistent": true,
                        "category": "actionable",
                        "actions": [
                            { "action": turn_off_action, "title": turn_off },
                            { "action": leave_on_action, "title": leave_on },
                        ],
                    },
                })
            };
            if !self.hass.call_service_soft("notify", &target, data).await {
                warn!(target, "Interactive notification failed");
            }
        }
    }

    /// Push-only confirmation after an interactive action, debounced.
    pub async fn send_confirmation(&self, message: &str) {
        let mut hasher = DefaultHasher::new();
        (message, &self.entry_id).hash(&mut hasher);
        if !self.debounce(&self.confirms_sent, hasher.finish(), CONFIRM_DEBOUNCE) {
            return;
        }
        if !self.in_window(Channel::Push) {
            return;
        }
        let title = format!("🔥 Climate Manager - {}", self.title);
        for target in self.options.push_targets() {
            self.hass
                .call_service_soft(
                    "notify",
                    &target,
                    json!({ "message": message, "title": title }),
                )
                .await;
        }
    }

    /// Clear the interactive notification on non-bot push targets.
    pub async fn clear_notification(&self) {
        for target in self.options.push_targets() {
            if target.to_lowercase().contains("telegram") {
                // Bot messages cannot be recalled
                continue;
            }
            self.hass
                .call_service_soft(
                    "notify",
                    &target,
                    json!({
                        "message": "clear_notification",
                        "data": { "tag": self.notification_tag() },
                    }),
                )
                .await;
        }
    }

    /// Absorb double-delivered inbound action events. Returns true when the
    /// event should be processed.
    pub fn accept_action(&self, action: &str, target: &str) -> bool {
        let key = format!("{action}_{target}");
        let now = Instant::now();
        if let Some(seen) = self.actions_seen.get(&key) {
            if now.duration_since(*seen) < ACTION_DEBOUNCE {
                debug!(action, "Action event suppressed (debounce)");
                return false;
            }
        }
        self.actions_seen.insert(key, now);
        self.actions_seen
            .retain(|_, at| now.duration_since(*at) < Duration::from_secs(10));
        true
    }

    /// Bot callbacks are deduplicated by chat/message/command, which is
    /// unique per button press.
    pub fn accept_callback(&self, chat_id: Option<i64>, message_id: Option<i64>, command: &str) -> bool {
        let key = format!("{chat_id:?}_{message_id:?}_{command}");
        self.callbacks_seen.insert(key)
    }

    fn debounce(&self, cache: &DashMap<u64, Instant>, hash: u64, window: Duration) -> bool {
        let now = Instant::now();
        if let Some(sent) = cache.get(&hash) {
            if now.duration_since(*sent) < window {
                return false;
            }
        }
        cache.insert(hash, now);
        cache.retain(|_, at| now.duration_since(*at) < Duration::from_secs(60));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn plain_window() {
        let (start, end) = (t(8, 0), t(22, 0));
        assert!(window_allows(t(8, 0), start, end));
        assert!(window_allows(t(12, 0), start, end));
        assert!(window_allows(t(22, 0), start, end));
        assert!(!window_allows(t(7, 59), start, end));
        assert!(!window_allows(t(23, 0), start, end));
    }

    #[test]
    fn window_wraps_midnight() {
        let (start, end) = (t(22, 0), t(6, 0));
        assert!(window_allows(t(23, 30), start, end));
        assert!(window_allows(t(2, 0), start, end));
        assert!(window_allows(t(6, 0), start, end));
        assert!(!window_allows(t(12, 0), start, end));
    }

    #[test]
    fn equal_bounds_always_allow() {
        assert!(window_allows(t(3, 33), t(0, 0), t(0, 0)));
        assert!(window_allows(t(15, 0), t(9, 0), t(9, 0)));
    }

    fn notifier() -> Notifier {
        let options = Arc::new(OptionsStore::new(HashMap::new(), HashMap::new()));
        Notifier::new(Hass::new(), options, "entry1".to_string(), "Bedroom".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn action_debounce_expires() {
        let n = notifier();
        assert!(n.accept_action("TURN_OFF_CLIMATE_entry1", "mobile"));
        assert!(!n.accept_action("TURN_OFF_CLIMATE_entry1", "mobile"));
        // Different target is a different key
        assert!(n.accept_action("TURN_OFF_CLIMATE_entry1", "other"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(n.accept_action("TURN_OFF_CLIMATE_entry1", "mobile"));
    }

    #[test]
    fn callback_dedup_is_permanent() {
        let n = notifier();
        assert!(n.accept_callback(Some(1), Some(10), "/turn_off_climate_entry1"));
        assert!(!n.accept_callback(Some(1), Some(10), "/turn_off_climate_entry1"));
        assert!(n.accept_callback(Some(1), Some(11), "/turn_off_climate_entry1"));
    }
}
