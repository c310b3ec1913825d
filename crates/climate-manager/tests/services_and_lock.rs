//! Custom services, live option updates, settings lock and auto timer

mod common;

use common::{TestHarness, CLIMATE};
use hass_core::{Context, ServiceCall};
use serde_json::json;
use tokio::time::{sleep, Duration};

async fn call(h: &TestHarness, service: &str, data: serde_json::Value) {
    h.hass
        .services
        .call(ServiceCall::new(
            climate_manager::DOMAIN,
            service,
            data,
            Context::new(),
        ))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn services_update_options_by_entry_or_entity() {
    let h = TestHarness::start(&[]).await;

    call(
        &h,
        "set_timer",
        json!({"entry_id": h.entry_id, "delay_before_off": 45}),
    )
    .await;
    assert_eq!(h.coordinator.options().delay_before_off(), 45);

    // Addressing by the managed climate entity works too
    call(
        &h,
        "set_temperature",
        json!({"entity_id": CLIMATE, "temperature_summer": 23}),
    )
    .await;
    assert_eq!(h.coordinator.options().get_f64("temperature_summer", 21.0), 23.0);

    call(
        &h,
        "set_season",
        json!({"entry_id": h.entry_id, "season": "winter"}),
    )
    .await;
    assert_eq!(
        h.coordinator.options().get_str("season", "auto"),
        "winter"
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_target_is_rejected() {
    let h = TestHarness::start(&[]).await;
    let result = h
        .hass
        .services
        .call(ServiceCall::new(
            climate_manager::DOMAIN,
            "set_season",
            json!({"entry_id": "nope", "season": "summer"}),
            Context::new(),
        ))
        .await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn disabled_message_key_suppresses_channel() {
    let h = TestHarness::start(&[]).await;

    call(
        &h,
        "set_notification_switch",
        json!({
            "entry_id": h.entry_id,
            "msg_type": "window_open",
            "channel": "push",
            "value": false,
        }),
    )
    .await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;
    h.open_window();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(h.climate_state(), "off", "automation still acts");
    assert!(
        h.notifications_containing("window open").is_empty(),
        "disabled key is not delivered"
    );
}

#[tokio::test(start_paused = true)]
async fn settings_lock_reasserts_seasonal_settings() {
    let h = TestHarness::start(&[("season", json!("summer"))]).await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.climate_state(), "cool");

    call(
        &h,
        "set_settings_lock",
        json!({"entry_id": h.entry_id, "locked": true}),
    )
    .await;

    // Someone switches the device to dry: the lock corrects the drift
    h.set_state_keep_attrs(CLIMATE, "dry");
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.climate_state(), "cool");
}

#[tokio::test(start_paused = true)]
async fn settings_lock_protects_timer_override() {
    let h = TestHarness::start(&[
        ("season", json!("summer")),
        ("timer_off_minutes", json!(1)),
        ("timer_off_hvac_mode", json!("heat")),
    ])
    .await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;

    call(
        &h,
        "set_settings_lock",
        json!({"entry_id": h.entry_id, "locked": true}),
    )
    .await;

    call(
        &h,
        "start_timer",
        json!({"entry_id": h.entry_id, "timer": "off"}),
    )
    .await;

    // Cyclic expiry switches to heat and records the override
    sleep(Duration::from_secs(70)).await;
    assert_eq!(h.climate_state(), "heat");

    // Past the timer's priority hold, a drift is corrected to the timer's
    // choice, not back to the seasonal cool.
    sleep(Duration::from_secs(10)).await;
    h.set_state_keep_attrs(CLIMATE, "cool");
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.climate_state(), "heat");
}

#[tokio::test(start_paused = true)]
async fn auto_timer_arms_after_configuration() {
    let h = TestHarness::start(&[
        ("auto_timer", json!(true)),
        ("timer_off_minutes", json!(30)),
    ])
    .await;

    assert!(!h.coordinator.status().timer_off_running);

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(15)).await;

    assert!(
        h.coordinator.status().timer_off_running,
        "turn-off timer armed automatically after a successful configuration"
    );
}

#[tokio::test(start_paused = true)]
async fn disable_automations_service_stops_everything() {
    let h = TestHarness::start(&[("timer_on_notification_minutes", json!(5))]).await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;
    h.coordinator.start_timer_off();
    assert!(h.coordinator.status().counter_running);
    assert!(h.coordinator.status().timer_off_running);

    call(&h, "disable_automations", json!({"entry_id": h.entry_id})).await;
    sleep(Duration::from_secs(2)).await;

    let status = h.coordinator.status();
    assert!(!status.timer_off_running);
    assert!(!status.counter_running);

    // A raw turn-on does not re-enable a manual disable
    h.climate_off_externally();
    sleep(Duration::from_secs(2)).await;
    h.climate_on_externally("cool");
    sleep(Duration::from_secs(5)).await;
    assert_eq!(
        h.coordinator.status().automation,
        climate_manager::AutomationState::DisabledManually
    );
}
