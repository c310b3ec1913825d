//! Host-interface types for the Climate Manager integration
//!
//! This crate models the narrow slice of a Home Assistant-style host that the
//! integration consumes: entity identifiers and states, the event bus,
//! service dispatch, and the standard event payloads the coordinator listens
//! for. The host itself (entity lifecycle, persistence, UI) stays external.

mod context;
mod entity_id;
mod event;
mod event_bus;
mod service_call;
mod service_registry;
mod state;
mod state_store;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use event_bus::{EventBus, TypedEventReceiver};
pub use service_call::ServiceCall;
pub use service_registry::{ServiceError, ServiceFuture, ServiceHandler, ServiceRegistry, ServiceResult};
pub use state::State;
pub use state_store::StateStore;

use std::sync::Arc;

/// State value for an entity that has never reported
pub const STATE_UNKNOWN: &str = "unknown";

/// State value for an entity that is offline
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Binary sensor "on" state
pub const STATE_ON: &str = "on";

/// Off state shared by binary sensors and climate devices
pub const STATE_OFF: &str = "off";

/// Standard event types and payloads used by the integration
pub mod events {
    use super::*;
    use serde::{Deserialize, Serialize};

    /// Event type for entity state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for interactive notification actions (mobile app buttons)
    pub const MOBILE_APP_NOTIFICATION_ACTION: &str = "mobile_app_notification_action";

    /// Event type for third-party bot callbacks (inline keyboard presses)
    pub const TELEGRAM_CALLBACK: &str = "telegram_callback";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for interactive notification action events
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NotificationActionData {
        /// Action identifier embedded in the notification button
        pub action: String,

        /// Free-form data attached by the notifying app
        #[serde(default)]
        pub action_data: serde_json::Value,
    }

    impl EventData for NotificationActionData {
        fn event_type() -> &'static str {
            MOBILE_APP_NOTIFICATION_ACTION
        }
    }

    /// Data for bot callback events
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BotCallbackData {
        /// Slash command carried by the callback (e.g. `/turn_off_climate_<id>`)
        pub command: String,

        /// Chat the callback originated from
        #[serde(default)]
        pub chat_id: Option<i64>,

        /// Message the inline keyboard was attached to
        #[serde(default)]
        pub message_id: Option<i64>,
    }

    impl EventData for BotCallbackData {
        fn event_type() -> &'static str {
            TELEGRAM_CALLBACK
        }
    }
}

/// Handle to the host runtime: event bus, state store and service registry.
///
/// Integrations receive a `Hass` at setup and hold typed references to it;
/// sibling lookups by naming convention are not part of this model.
#[derive(Clone)]
pub struct Hass {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub services: Arc<ServiceRegistry>,
}

impl Hass {
    /// Create a standalone host handle with fresh bus, store and registry.
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::new());
        Self {
            bus,
            states,
            services,
        }
    }

    /// Call a service and propagate the result.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> ServiceResult {
        self.services
            .call(ServiceCall::new(domain, service, data, Context::new()))
            .await
    }

    /// Call a service, logging and swallowing any failure.
    ///
    /// Device commands in this integration fail soft: a failed fan command
    /// must never block the temperature command that follows it.
    pub async fn call_service_soft(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> bool {
        match self.call_service(domain, service, data).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(domain, service, error = %err, "Service call failed");
                false
            }
        }
    }
}

impl Default for Hass {
    fn default() -> Self {
        Self::new()
    }
}
