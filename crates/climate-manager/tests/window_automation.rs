//! Window open/close automation scenarios

mod common;

use common::TestHarness;
use serde_json::json;
use tokio::time::{sleep, Duration};

use climate_manager::{AutomationState, ClimatePhase};

#[tokio::test(start_paused = true)]
async fn open_window_with_climate_off_stays_idle() {
    let h = TestHarness::start(&[]).await;

    h.open_window();
    sleep(Duration::from_secs(5)).await;

    let status = h.coordinator.status();
    assert!(status.window_open);
    assert!(status.saved_state.is_none(), "no snapshot for an off climate");
    assert_eq!(status.phase, ClimatePhase::Idle);
    assert!(h.climate_calls().is_empty(), "no commands issued");
    assert!(h.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn open_window_turns_off_and_notifies_once() {
    let h = TestHarness::start(&[("delay_before_off", json!(0))]).await;

    h.climate_on_externally("cool");
    // Let the turn-on configuration settle
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.climate_state(), "cool");

    h.open_window();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(h.climate_state(), "off");
    assert_eq!(h.count_climate_calls("turn_off"), 1);
    assert_eq!(
        h.notifications_containing("window open").len(),
        1,
        "exactly one window_open notification"
    );

    let status = h.coordinator.status();
    assert_eq!(status.phase, ClimatePhase::WindowBlocked);
    let saved = status.saved_state.expect("snapshot saved");
    assert_eq!(saved.hvac_mode, "cool");
    // Automation stays enabled: this was an internal shutdown
    assert_eq!(status.automation, AutomationState::Enabled);
}

#[tokio::test(start_paused = true)]
async fn closing_window_restores_saved_settings() {
    let h = TestHarness::start(&[]).await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;

    h.open_window();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.climate_state(), "off");
    let saved = h.coordinator.status().saved_state.expect("snapshot saved");

    h.close_window();
    sleep(Duration::from_secs(20)).await;

    assert_eq!(h.climate_state(), saved.hvac_mode);
    assert_eq!(h.climate_attr_f64("temperature"), saved.temperature);
    assert_eq!(h.notifications_containing("restored").len(), 1);
    let status = h.coordinator.status();
    assert!(status.saved_state.is_none(), "snapshot cleared after restore");
    assert_eq!(status.phase, ClimatePhase::Running);
    assert_eq!(status.automation, AutomationState::Enabled);
}

#[tokio::test(start_paused = true)]
async fn delayed_off_is_cancelled_when_window_closes_quickly() {
    let h = TestHarness::start(&[("delay_before_off", json!(60))]).await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;

    h.open_window();
    sleep(Duration::from_secs(5)).await;
    // Delay not elapsed: still running
    assert_eq!(h.climate_state(), "cool");

    h.close_window();
    sleep(Duration::from_secs(120)).await;

    // The pending off never fired and no restore was needed
    assert_eq!(h.climate_state(), "cool");
    assert_eq!(h.count_climate_calls("turn_off"), 0);
    assert!(h.notifications_containing("window open").is_empty());
    let status = h.coordinator.status();
    assert!(status.saved_state.is_none());
    assert_eq!(status.phase, ClimatePhase::Running);
}

#[tokio::test(start_paused = true)]
async fn window_timeout_abandons_restore() {
    // One minute timeout
    let h = TestHarness::start(&[("timeout", json!(1))]).await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;

    h.open_window();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.climate_state(), "off");

    // Timeout expires before the window closes
    sleep(Duration::from_secs(90)).await;
    assert_eq!(h.notifications_containing("Automation turned off").len(), 1);
    let status = h.coordinator.status();
    assert!(status.window_timeout_expired);
    assert!(status.saved_state.is_none(), "snapshot discarded on timeout");

    h.close_window();
    sleep(Duration::from_secs(30)).await;

    // Idempotent abandonment: no restore even though the window closed
    assert_eq!(h.climate_state(), "off");
    assert!(h.notifications_containing("restored").is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_episode_restores_after_an_expired_one() {
    let h = TestHarness::start(&[("timeout", json!(1))]).await;

    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;

    // First episode: expires
    h.open_window();
    sleep(Duration::from_secs(90)).await;
    h.close_window();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.climate_state(), "off");

    // User restarts the climate manually
    h.climate_on_externally("cool");
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.climate_state(), "cool");

    // Second episode: closes in time, restore must happen again
    h.open_window();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.climate_state(), "off");
    h.close_window();
    sleep(Duration::from_secs(20)).await;
    assert_eq!(h.climate_state(), "cool");
}
