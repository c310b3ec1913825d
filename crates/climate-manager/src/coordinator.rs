//! Coordinator state machine
//!
//! One coordinator manages one climate device. It reacts to window, climate,
//! temperature and power-sensor transitions, decides when to turn the device
//! off, restore it or configure it seasonally, and drives the timer subsystem
//! and the notification dispatcher.
//!
//! The conceptual state lives in two explicit enums ([`ClimatePhase`],
//! [`AutomationState`]) plus a small set of single-shot suppressors that
//! absorb the feedback events our own commands generate. All mutable state
//! sits behind one non-async mutex that is never held across a suspension
//! point; long-running work (off sequences, restores, configuration,
//! countdown loops) runs in spawned tasks that re-check liveness after every
//! await.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};

use hass_core::events::{BotCallbackData, NotificationActionData, StateChangedData};
use hass_core::{Hass, STATE_OFF, STATE_ON};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{ConfigEntry, EntityRefs, OptionsStore};
use crate::device::{temperature_from_attributes, ClimateDevice, ClimateTarget};
use crate::messages::{
    confirmation_left_on, confirmation_turned_off, MessageArgs, MessageKey, MessageRenderer,
};
use crate::notify::Notifier;
use crate::season::{seasonal_target, threshold_violation, Season, SeasonMode, SeasonResolver};
use crate::timer::{CounterGuard, DelayTimer, OnCounter, TimerCore, TimerGuard};
use crate::window::{WindowEdge, WindowMonitor};

/// Safety timeout for off/power confirmation waits
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a shutdown episode latch stays valid waiting for its second
/// correlated event before a fresh decision is forced
const SHUTDOWN_LATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Debounce for duplicate raw turn-on handling in the same context
const TURN_ON_DUPLICATE_WINDOW: Duration = Duration::from_secs(1);

/// Suppression window for turn-on events generated by a restore
const RESTORE_SUPPRESS_WINDOW: Duration = Duration::from_secs(10);

/// Delay before re-asserting locked settings after a drift event
const LOCK_DEBOUNCE: Duration = Duration::from_secs(2);

/// Delay before the startup check runs after setup
const STARTUP_CHECK_DELAY: Duration = Duration::from_secs(5);

/// How long the cyclic timer holds priority over the settings lock
const TIMER_ACTION_HOLD: Duration = Duration::from_secs(5);

/// Conceptual phase of the managed climate device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimatePhase {
    /// Device off, nothing pending
    Idle,
    /// Device on, automation idle
    Running,
    /// Running suppressed by an open window, snapshot held
    WindowBlocked,
    /// Reapplying the snapshot after the window closed
    Restoring,
    /// Applying seasonal settings after a raw turn-on
    Configuring,
}

/// Whether the automation may act, and why not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationState {
    Enabled,
    /// Disabled because a manual power-off was detected
    DisabledByShutdown,
    /// Disabled explicitly by the user
    DisabledManually,
}

struct CoordState {
    phase: ClimatePhase,
    automation: AutomationState,
    /// Settings present right before the first open transition of an episode
    saved: Option<ClimateTarget>,
    window_open: bool,
    window_timeout_expired: bool,
    /// Swallows the next state-change event our own command generates
    ignore_next_state_change: bool,
    /// Marks the next off event as automation-issued
    internal_shutdown: bool,
    /// First off event of a shutdown episode was processed at this instant
    shutdown_latch: Option<Instant>,
    settings_locked: bool,
    /// Timer-chosen settings the lock protects instead of the seasonal ones
    locked_override: Option<ClimateTarget>,
    /// A timer is applying its own settings; the lock must not fight it
    timer_in_action: bool,
    /// Raw turn-on handling suppressed until this instant (restore in flight)
    suppress_turn_on_until: Option<Instant>,
    /// Last raw turn-on handled: (when, window-open context)
    last_turn_on: Option<(Instant, bool)>,
    /// Virtual sync from the power sensor in progress
    syncing_from_power: bool,
}

/// Observable status snapshot, published on every relevant transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub phase: ClimatePhase,
    pub automation: AutomationState,
    pub window_open: bool,
    pub window_timeout_expired: bool,
    pub saved_state: Option<ClimateTarget>,
    pub settings_locked: bool,
    pub timer_on_running: bool,
    pub timer_off_running: bool,
    pub counter_running: bool,
    pub counter_paused: bool,
}

pub struct Coordinator {
    hass: Hass,
    entry_id: String,
    title: String,
    options: Arc<OptionsStore>,
    refs: RwLock<EntityRefs>,
    windows: Mutex<WindowMonitor>,
    season: SeasonResolver,
    renderer: MessageRenderer,
    notifier: Notifier,
    state: Mutex<CoordState>,

    window_off_timer: DelayTimer,
    window_on_timer: DelayTimer,
    window_timeout_timer: DelayTimer,
    timer_on: TimerCore,
    timer_off: TimerCore,
    on_counter: OnCounter,

    status_tx: watch::Sender<StatusSnapshot>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Build a coordinator for a config entry. Fails when the entry names no
    /// climate entity.
    pub fn new(hass: Hass, entry: &ConfigEntry) -> anyhow::Result<Arc<Self>> {
        let options = Arc::new(OptionsStore::from_entry(entry));
        let refs = options.require_entity_refs()?;

        let season_mode = SeasonMode::parse(&options.get_str("season", "auto"));
        let automation = if options.get_bool("automation_enabled", true) {
            AutomationState::Enabled
        } else {
            AutomationState::DisabledManually
        };

        let windows = WindowMonitor::new(refs.window_sensors.clone());
        let renderer = MessageRenderer::new(options.clone(), entry.title.clone());
        let notifier = Notifier::new(
            hass.clone(),
            options.clone(),
            entry.entry_id.clone(),
            entry.title.clone(),
        );

        let state = CoordState {
            phase: ClimatePhase::Idle,
            automation,
            saved: None,
            window_open: false,
            window_timeout_expired: false,
            ignore_next_state_change: false,
            internal_shutdown: false,
            shutdown_latch: None,
            settings_locked: options.get_bool("settings_locked", false),
            locked_override: None,
            timer_in_action: false,
            suppress_turn_on_until: None,
            last_turn_on: None,
            syncing_from_power: false,
        };

        let initial = StatusSnapshot {
            phase: state.phase,
            automation: state.automation,
            window_open: false,
            window_timeout_expired: false,
            saved_state: None,
            settings_locked: state.settings_locked,
            timer_on_running: false,
            timer_off_running: false,
            counter_running: false,
            counter_paused: false,
        };
        let (status_tx, _) = watch::channel(initial);

        Ok(Arc::new(Self {
            hass,
            entry_id: entry.entry_id.clone(),
            title: entry.title.clone(),
            options,
            refs: RwLock::new(refs),
            windows: Mutex::new(windows),
            season: SeasonResolver::new(season_mode),
            renderer,
            notifier,
            state: Mutex::new(state),
            window_off_timer: DelayTimer::new("window_off_delay"),
            window_on_timer: DelayTimer::new("window_restore_delay"),
            window_timeout_timer: DelayTimer::new("window_timeout"),
            timer_on: TimerCore::new("timer_on"),
            timer_off: TimerCore::new("timer_off"),
            on_counter: OnCounter::new(),
            status_tx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn climate_entity(&self) -> String {
        self.refs.read().unwrap().climate.clone()
    }

    pub fn options(&self) -> &Arc<OptionsStore> {
        &self.options
    }

    /// Subscribe to status snapshots.
    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    /// Wire the event listeners and background schedules. Subscriptions are
    /// created before the tasks spawn, so no event fired after setup returns
    /// can be missed.
    pub async fn setup(self: &Arc<Self>) {
        // Prime the aggregate from current sensor states
        let any_open = {
            let mut windows = self.windows.lock().unwrap();
            windows.observe(&self.hass.states);
            windows.any_open()
        };
        let running = !self.device().is_off();
        {
            let mut s = self.state_mut();
            s.window_open = any_open;
            if running {
                s.phase = ClimatePhase::Running;
            }
        }

        let mut state_rx = self.hass.bus.subscribe_typed::<StateChangedData>();
        let mut action_rx = self.hass.bus.subscribe_typed::<NotificationActionData>();
        let mut bot_rx = self.hass.bus.subscribe_typed::<BotCallbackData>();

        let mut tasks = Vec::new();

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Ok(event) = state_rx.recv().await {
                this.dispatch_state_change(event.data).await;
            }
        }));

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Ok(event) = action_rx.recv().await {
                this.handle_notification_action(event.data).await;
            }
        }));

        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Ok(event) = bot_rx.recv().await {
                this.handle_bot_callback(event.data).await;
            }
        }));

        // Nightly season refresh
        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let secs = this.season.seconds_until_refresh();
                sleep(Duration::from_secs(secs)).await;
                this.season.refresh(this.season_mode());
            }
        }));

        // Startup check: climate already on after a host restart
        let this = self.clone();
        tasks.push(tokio::spawn(async move {
            sleep(STARTUP_CHECK_DELAY).await;
            this.restore_after_restart().await;
        }));

        *self.tasks.lock().unwrap() = tasks;
        self.push_status();
    }

    /// Tear down: detach listeners, cancel every pending timer and task.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.window_off_timer.cancel();
        self.window_on_timer.cancel();
        self.window_timeout_timer.cancel();
        self.timer_on.disarm();
        self.timer_off.disarm();
        self.on_counter.stop();
        info!(entry_id = %self.entry_id, "Coordinator unloaded");
    }

    // ---- helpers ----------------------------------------------------------

    fn state_mut(&self) -> MutexGuard<'_, CoordState> {
        self.state.lock().unwrap()
    }

    fn refs(&self) -> EntityRefs {
        self.refs.read().unwrap().clone()
    }

    fn device(&self) -> ClimateDevice {
        let refs = self.refs();
        ClimateDevice::new(
            self.hass.clone(),
            refs.climate,
            refs.temperature_sensor,
            refs.power_sensor,
        )
    }

    fn season_mode(&self) -> SeasonMode {
        SeasonMode::parse(&self.options.get_str("season", "auto"))
    }

    fn season_threshold(&self, season: Season) -> f64 {
        match season {
            Season::Summer => self.options.get_f64("summer_temp_threshold", 19.0),
            Season::Winter => self.options.get_f64("winter_temp_threshold", 25.0),
        }
    }

    pub fn automation_enabled(&self) -> bool {
        self.state_mut().automation == AutomationState::Enabled
    }

    fn room(&self) -> String {
        self.options.room_name(&self.title)
    }

    fn push_status(&self) {
        let snapshot = {
            let s = self.state_mut();
            StatusSnapshot {
                phase: s.phase,
                automation: s.automation,
                window_open: s.window_open,
                window_timeout_expired: s.window_timeout_expired,
                saved_state: s.saved.clone(),
                settings_locked: s.settings_locked,
                timer_on_running: self.timer_on.is_running(),
                timer_off_running: self.timer_off.is_running(),
                counter_running: self.on_counter.is_running(),
                counter_paused: self.on_counter.is_paused(),
            }
        };
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn send_message(&self, key: MessageKey, args: MessageArgs) {
        if !self.notifier.any_channel_enabled(key) {
            return;
        }
        let message = self.renderer.render(key, &args);
        self.notifier.send(key, &message).await;
    }

    /// Message arguments carrying the seasonal context (mode, target temp,
    /// fan, current reading, threshold).
    fn seasonal_args(&self, sensor: Option<f64>) -> MessageArgs {
        let season = self.season.resolved();
        let target = seasonal_target(&self.options, season);
        MessageArgs::new()
            .mode(season.as_str())
            .temp(target.temperature)
            .fan_opt(target.fan_mode)
            .sensor(sensor)
            .threshold(self.season_threshold(season))
    }

    // ---- event dispatch ---------------------------------------------------

    async fn dispatch_state_change(self: &Arc<Self>, data: StateChangedData) {
        let entity_id = data.entity_id.to_string();
        let refs = self.refs();

        if refs.window_sensors.iter().any(|s| *s == entity_id) {
            self.handle_window_event().await;
        } else if entity_id == refs.climate {
            self.handle_climate_event(&data).await;
        } else if refs.temperature_sensor.as_deref() == Some(entity_id.as_str()) {
            self.handle_temperature_event(&data).await;
        } else if refs.power_sensor.as_deref() == Some(entity_id.as_str()) {
            self.handle_power_event(&data).await;
        }
    }

    // ---- window handling --------------------------------------------------

    async fn handle_window_event(self: &Arc<Self>) {
        let edge = {
            let mut windows = self.windows.lock().unwrap();
            windows.observe(&self.hass.states)
        };
        match edge {
            WindowEdge::Opened => self.on_window_opened().await,
            WindowEdge::Closed => self.on_window_closed().await,
            WindowEdge::Unchanged => {}
        }
    }

    async fn on_window_opened(self: &Arc<Self>) {
        self.state_mut().window_open = true;
        self.on_counter.pause();

        if !self.automation_enabled() {
            info!(entry_id = %self.entry_id, "Window opened, automation disabled");
            self.push_status();
            return;
        }

        // A pending restore belongs to the previous episode
        self.window_on_timer.cancel();

        let device = self.device();
        let Some(snapshot) = device.snapshot() else {
            info!(entry_id = %self.entry_id, "Window opened, climate already off");
            self.push_status();
            return;
        };

        info!(
            entry_id = %self.entry_id,
            mode = %snapshot.hvac_mode,
            temperature = ?snapshot.temperature,
            "Window opened while running, settings saved"
        );
        {
            let mut s = self.state_mut();
            s.saved = Some(snapshot);
            s.phase = ClimatePhase::WindowBlocked;
            s.window_timeout_expired = false;
            s.internal_shutdown = true;
        }
        self.window_timeout_timer.cancel();

        let delay = self.options.delay_before_off();
        if delay == 0 {
            self.clone().window_off_sequence(MessageKey::WindowOpen).await;
        } else {
            let this = self.clone();
            self.window_off_timer.start(Duration::from_secs(delay), async move {
                this.window_off_sequence(MessageKey::WindowOpen).await;
            });
        }

        let timeout = self.options.window_open_timeout();
        if timeout > 0 {
            let this = self.clone();
            self.window_timeout_timer
                .start(Duration::from_secs(timeout), async move {
                    this.on_window_timeout().await;
                });
        }
        self.push_status();
    }

    /// Turn the device off, wait until it has actually powered down, then
    /// notify. The wait avoids a false notification while the device is still
    /// spinning down.
    async fn window_off_sequence(self: Arc<Self>, key: MessageKey) {
        let device = self.device();
        let sensor = device.current_temperature();

        if !device.turn_off().await {
            warn!(entry_id = %self.entry_id, "Off command failed, no notification sent");
            return;
        }

        sleep(Duration::from_millis(500)).await;
        if !device.is_off() {
            device.wait_for_off(CONFIRM_TIMEOUT).await;
        }
        if device.power_sensor().is_some() {
            device.wait_for_power_state(STATE_OFF, CONFIRM_TIMEOUT).await;
        }

        self.send_message(key, self.seasonal_args(sensor)).await;
        self.push_status();
    }

    async fn on_window_closed(self: &Arc<Self>) {
        self.state_mut().window_open = false;
        self.on_counter.resume();

        if !self.automation_enabled() {
            info!(entry_id = %self.entry_id, "Window closed, automation disabled");
            self.push_status();
            return;
        }

        self.window_timeout_timer.cancel();
        if self.window_off_timer.cancel() {
            // The off never happened; its internal marker must not leak into
            // an unrelated off event later.
            self.state_mut().internal_shutdown = false;
        }

        let device = self.device();
        let Some(state) = device.state() else {
            warn!(entry_id = %self.entry_id, "Climate state unavailable on window close");
            return;
        };

        if !state.is_off() {
            // The off delay had not fired: the episode ends without a restore
            let mut s = self.state_mut();
            s.window_timeout_expired = false;
            s.saved = None;
            s.phase = ClimatePhase::Running;
            drop(s);
            info!(entry_id = %self.entry_id, "Window closed, climate still running");
            self.push_status();
            return;
        }

        let expired = {
            let mut s = self.state_mut();
            if s.window_timeout_expired {
                // Idempotent abandonment: the timeout already gave up on this
                // episode, closing the window later must not revive it.
                s.saved = None;
                true
            } else {
                false
            }
        };
        if expired {
            info!(entry_id = %self.entry_id, "Window closed after timeout, no restore");
            self.push_status();
            return;
        }

        if self.state_mut().saved.is_none() {
            info!(entry_id = %self.entry_id, "Window closed, nothing to restore");
            return;
        }

        let delay = self.options.delay_before_on();
        info!(entry_id = %self.entry_id, delay, "Window closed, restore scheduled");
        if delay == 0 {
            let this = self.clone();
            tokio::spawn(async move { this.restore_sequence().await });
        } else {
            let this = self.clone();
            self.window_on_timer.start(Duration::from_secs(delay), async move {
                this.restore_sequence().await;
            });
        }
        self.push_status();
    }

    /// Reapply the saved snapshot: mode, temperature, fan, each verified with
    /// a settle delay, then notify. Incompatible saved modes abandon the
    /// restore silently.
    async fn restore_sequence(self: Arc<Self>) {
        let Some(snapshot) = ({
            let mut s = self.state_mut();
            match s.saved.clone() {
                Some(snapshot) => {
                    s.phase = ClimatePhase::Restoring;
                    s.suppress_turn_on_until = Some(Instant::now() + RESTORE_SUPPRESS_WINDOW);
                    Some(snapshot)
                }
                None => None,
            }
        }) else {
            return;
        };

        let device = self.device();
        let sensor = device.current_temperature();

        if snapshot.hvac_mode == STATE_OFF || !device.supports_hvac_mode(&snapshot.hvac_mode) {
            debug!(
                entry_id = %self.entry_id,
                mode = %snapshot.hvac_mode,
                "Saved mode not restorable, snapshot discarded"
            );
            let mut s = self.state_mut();
            s.saved = None;
            s.phase = ClimatePhase::Idle;
            drop(s);
            self.push_status();
            return;
        }

        let temp_ok = snapshot
            .temperature
            .map(|t| (10.0..=35.0).contains(&t))
            .unwrap_or(false);
        let fan_ok = snapshot
            .fan_mode
            .as_deref()
            .map(|f| device.supports_fan_mode(f))
            .unwrap_or(false);

        device.set_hvac_mode(&snapshot.hvac_mode).await;
        sleep(Duration::from_millis(500)).await;

        let mode_applied = device
            .state()
            .map(|s| s.state == snapshot.hvac_mode)
            .unwrap_or(false);

        if mode_applied {
            if temp_ok {
                device.set_temperature(snapshot.temperature.unwrap()).await;
                sleep(Duration::from_millis(300)).await;
            }
            if fan_ok {
                device.set_fan_mode(snapshot.fan_mode.as_deref().unwrap()).await;
                sleep(Duration::from_millis(300)).await;
            }
            sleep(Duration::from_secs(1)).await;

            let restored = device
                .state()
                .map(|s| s.is_valid() && !s.is_off())
                .unwrap_or(false);
            if restored {
                if device.power_sensor().is_some() {
                    device.wait_for_power_state(STATE_ON, CONFIRM_TIMEOUT).await;
                }
                let args = MessageArgs::new()
                    .mode(&snapshot.hvac_mode)
                    .fan_opt(snapshot.fan_mode.clone())
                    .sensor(sensor)
                    .threshold(self.season_threshold(self.season.resolved()));
                let args = match snapshot.temperature {
                    Some(t) => args.temp(t),
                    None => args,
                };
                self.send_message(MessageKey::Resume, args).await;
                info!(entry_id = %self.entry_id, "Climate restored");
            } else {
                warn!(entry_id = %self.entry_id, "Restore did not leave the climate running");
            }
        } else {
            warn!(entry_id = %self.entry_id, mode = %snapshot.hvac_mode, "Restore mode not applied");
        }

        // The suppression window is left to expire on its own so the turn-on
        // event generated by this restore is swallowed even when it is
        // dispatched after the cleanup below.
        {
            let mut s = self.state_mut();
            s.saved = None;
            s.phase = if device.is_off() {
                ClimatePhase::Idle
            } else {
                ClimatePhase::Running
            };
        }
        self.push_status();
    }

    /// The window stayed open too long: abandon the pending restore for this
    /// episode and stop counting the on-time.
    async fn on_window_timeout(self: Arc<Self>) {
        if !self.automation_enabled() {
            return;
        }
        info!(entry_id = %self.entry_id, "Window open timeout expired, restore abandoned");

        self.window_on_timer.cancel();
        self.on_counter.stop();

        let sensor = self.device().current_temperature();
        self.send_message(MessageKey::WindowOpenLong, self.seasonal_args(sensor))
            .await;

        {
            let mut s = self.state_mut();
            s.saved = None;
            s.window_timeout_expired = true;
            s.phase = ClimatePhase::Idle;
        }
        self.push_status();
    }

    // ---- climate entity events --------------------------------------------

    async fn handle_climate_event(self: &Arc<Self>, data: &StateChangedData) {
        {
            let mut s = self.state_mut();
            if s.syncing_from_power {
                return;
            }
            if s.ignore_next_state_change {
                s.ignore_next_state_change = false;
                return;
            }
        }

        let (Some(old), Some(new)) = (&data.old_state, &data.new_state) else {
            return;
        };
        if !new.is_valid() {
            return;
        }

        let refs = self.refs();

        // No external sensor: derive temperature transitions from the climate
        // entity's own attributes.
        if refs.temperature_sensor.is_none() && !new.is_off() && !old.is_off() {
            let old_temp = temperature_from_attributes(old);
            let new_temp = temperature_from_attributes(new);
            if let Some(reading) = new_temp {
                if old_temp != new_temp {
                    self.check_thresholds(reading).await;
                }
            }
        }

        if old.is_off() && !new.is_off() {
            // With a power sensor the physical confirmation drives turn-on
            // handling, avoiding double notifications.
            if refs.power_sensor.is_none() {
                self.on_climate_turned_on().await;
                self.start_on_counter_if_needed();
            }
        } else if !old.is_off() && new.is_off() {
            self.handle_off_event().await;
        }

        // Settings lock: drift on a running device is corrected after a short
        // debounce, unless a timer action is in flight (timer wins).
        let reassert = {
            let s = self.state_mut();
            s.settings_locked && !new.is_off() && !s.timer_in_action
        };
        if reassert {
            let this = self.clone();
            tokio::spawn(async move {
                sleep(LOCK_DEBOUNCE).await;
                this.enforce_lock_target().await;
            });
        }
    }

    /// Disambiguate internal (automation-issued) from external (manual) off
    /// events, deferring to the power sensor's confirming event when one is
    /// configured.
    async fn handle_off_event(self: &Arc<Self>) {
        let has_power_sensor = self.refs().power_sensor.is_some();
        enum OffDecision {
            Duplicate,
            InternalFirst,
            InternalConfirmed,
            ManualFirst,
            ManualConfirmed,
        }

        let decision = {
            let mut s = self.state_mut();
            let now = Instant::now();

            // A latch whose second event never arrived expires and forces a
            // fresh decision.
            if let Some(at) = s.shutdown_latch {
                if now.duration_since(at) > SHUTDOWN_LATCH_TIMEOUT {
                    debug!(entry_id = %self.entry_id, "Shutdown latch expired");
                    s.shutdown_latch = None;
                    s.internal_shutdown = false;
                }
            }

            if s.shutdown_latch.is_some() {
                if has_power_sensor {
                    s.shutdown_latch = None;
                    if s.internal_shutdown {
                        s.internal_shutdown = false;
                        OffDecision::InternalConfirmed
                    } else {
                        OffDecision::ManualConfirmed
                    }
                } else {
                    OffDecision::Duplicate
                }
            } else {
                s.shutdown_latch = Some(now);
                if s.internal_shutdown {
                    if !has_power_sensor {
                        // Consumed by exactly this off event
                        s.internal_shutdown = false;
                    }
                    if s.saved.is_none() {
                        s.phase = ClimatePhase::Idle;
                    }
                    OffDecision::InternalFirst
                } else {
                    s.phase = ClimatePhase::Idle;
                    OffDecision::ManualFirst
                }
            }
        };

        match decision {
            OffDecision::Duplicate => {
                debug!(entry_id = %self.entry_id, "Duplicate off event ignored");
            }
            OffDecision::InternalFirst => {
                info!(entry_id = %self.entry_id, "Automation shutdown, user timers kept");
                self.push_status();
            }
            OffDecision::InternalConfirmed => {
                info!(entry_id = %self.entry_id, "Automation shutdown confirmed by power sensor");
            }
            OffDecision::ManualFirst => {
                info!(entry_id = %self.entry_id, "Manual shutdown detected, user timers stopped");
                self.stop_user_timers();
                if !has_power_sensor {
                    self.disable_automations_by_shutdown();
                }
                self.push_status();
            }
            OffDecision::ManualConfirmed => {
                info!(entry_id = %self.entry_id, "Manual shutdown confirmed by power sensor");
                self.disable_automations_by_shutdown();
            }
        }
    }

    // ---- raw turn-on ------------------------------------------------------

    pub(crate) async fn on_climate_turned_on(self: &Arc<Self>) {
        let window_open = {
            let mut s = self.state_mut();
            // A turn-on opens a new shutdown episode
            s.shutdown_latch = None;

            if s.automation == AutomationState::DisabledByShutdown {
                if s.phase == ClimatePhase::Restoring {
                    // A window restore must never re-enable a disabled
                    // automation.
                    info!(entry_id = %self.entry_id, "Restore turn-on ignored while disabled");
                    return;
                }
                info!(entry_id = %self.entry_id, "Manual restart, automation re-enabled");
                s.automation = AutomationState::Enabled;
            }
            if s.automation != AutomationState::Enabled {
                return;
            }

            let now = Instant::now();
            if let Some(until) = s.suppress_turn_on_until {
                if now < until {
                    return;
                }
                s.suppress_turn_on_until = None;
            }
            if s.phase == ClimatePhase::Configuring {
                return;
            }

            // Absorb identical back-to-back turn-on handling
            if let Some((at, ctx)) = s.last_turn_on {
                if now.duration_since(at) < TURN_ON_DUPLICATE_WINDOW && ctx == s.window_open {
                    return;
                }
            }
            s.last_turn_on = Some((now, s.window_open));
            s.window_open
        };

        if window_open {
            self.turn_on_while_window_open().await;
            return;
        }

        let device = self.device();

        // Power sensor coherence
        if let Some(power) = device.power_sensor().map(str::to_string) {
            let syncing = self.state_mut().syncing_from_power;
            if !syncing {
                let climate_on = device.state().map(|s| !s.is_off()).unwrap_or(false);
                let power_on = self
                    .hass
                    .states
                    .get(&power)
                    .map(|s| s.state == STATE_ON)
                    .unwrap_or(false);
                if climate_on && !power_on {
                    // Wait for the physical confirmation before configuring
                    debug!(entry_id = %self.entry_id, "Waiting for power sensor confirmation");
                    return;
                }
                if !climate_on && power_on {
                    self.state_mut().syncing_from_power = true;
                    self.sync_seasonal_settings().await;
                    self.state_mut().syncing_from_power = false;
                }
            }
        }

        if device.is_off() {
            return;
        }

        let season = self.season.resolved();
        let Some(reading) = device.current_temperature() else {
            // No usable reading: block rather than act on stale data
            info!(entry_id = %self.entry_id, "No valid temperature reading, climate blocked");
            self.state_mut().ignore_next_state_change = true;
            device.turn_off().await;
            self.send_message(
                MessageKey::ClimateBlockedTemp,
                MessageArgs::new().mode(season.as_str()),
            )
            .await;
            return;
        };

        if let Some(threshold) = threshold_violation(&self.options, season, reading) {
            self.force_off_for_threshold(season, reading, threshold).await;
            return;
        }

        // Seasonal configuration, non-blocking so user commands are not
        // stalled behind the verify loop.
        let mut target: ClimateTarget = seasonal_target(&self.options, season).into();
        if !device.supports_hvac_mode(&target.hvac_mode) {
            debug!(
                entry_id = %self.entry_id,
                mode = %target.hvac_mode,
                "Seasonal mode unsupported, configuration skipped"
            );
            return;
        }
        if let Some(fan) = target.fan_mode.clone() {
            if !device.supports_fan_mode(&fan) {
                target.fan_mode = None;
            }
        }
        if let Some(preset) = target.preset_mode.clone() {
            if !device.supports_preset_mode(&preset) {
                target.preset_mode = None;
            }
        }

        self.state_mut().phase = ClimatePhase::Configuring;
        self.push_status();
        let this = self.clone();
        tokio::spawn(async move {
            this.configure_in_background(target, reading).await;
        });
    }

    /// Double-guard: the device was switched on while a window is open.
    async fn turn_on_while_window_open(self: &Arc<Self>) {
        info!(entry_id = %self.entry_id, "Turn-on with open window, forcing off");

        {
            let mut s = self.state_mut();
            if s.saved.is_none() {
                drop(s);
                if let Some(snapshot) = self.device().snapshot() {
                    let mut s = self.state_mut();
                    s.saved = Some(snapshot);
                    s.phase = ClimatePhase::WindowBlocked;
                }
            }
        }

        let timeout = self.options.window_open_timeout();
        if timeout > 0 && self.state_mut().saved.is_some() && !self.window_timeout_timer.is_armed()
        {
            let this = self.clone();
            self.window_timeout_timer
                .start(Duration::from_secs(timeout), async move {
                    this.on_window_timeout().await;
                });
        }

        self.state_mut().internal_shutdown = true;
        self.clone()
            .window_off_sequence(MessageKey::WindowBlocked)
            .await;
    }

    async fn configure_in_background(self: Arc<Self>, target: ClimateTarget, reading: f64) {
        let device = self.device();
        device.apply_settings(&target).await;
        let verified = device.verify_and_retry(&target).await;

        if device.power_sensor().is_some() {
            device.wait_for_power_state(STATE_ON, CONFIRM_TIMEOUT).await;
        }

        let running = device
            .state()
            .map(|s| s.is_valid() && !s.is_off())
            .unwrap_or(false);

        if running {
            if self.notifier.any_channel_enabled(MessageKey::ClimateOnOk) {
                let args = MessageArgs::new()
                    .mode(&target.hvac_mode)
                    .fan_opt(target.fan_mode.clone())
                    .sensor(Some(reading))
                    .threshold(self.season_threshold(self.season.resolved()));
                let args = match target.temperature {
                    Some(t) => args.temp(t),
                    None => args,
                };
                let mut message = self.renderer.render(MessageKey::ClimateOnOk, &args);
                message.push_str(if verified { " ✓" } else { " ⚠️" });
                self.notifier.send(MessageKey::ClimateOnOk, &message).await;
            }

            if self.options.auto_timer() && !self.timer_off.is_running() {
                info!(entry_id = %self.entry_id, "Auto timer armed after configuration");
                self.start_timer_off();
            }
        }

        {
            let mut s = self.state_mut();
            if s.phase == ClimatePhase::Configuring {
                s.phase = if running {
                    ClimatePhase::Running
                } else {
                    ClimatePhase::Idle
                };
            }
        }
        self.push_status();
    }

    /// Apply seasonal settings to mirror a physically switched-on device.
    async fn sync_seasonal_settings(&self) {
        let device = self.device();
        let season = self.season.resolved();
        let mut target: ClimateTarget = seasonal_target(&self.options, season).into();
        if !device.supports_hvac_mode(&target.hvac_mode) {
            target.hvac_mode = "cool".to_string();
        }
        if let Some(fan) = target.fan_mode.clone() {
            if !device.supports_fan_mode(&fan) {
                target.fan_mode = None;
            }
        }
        self.state_mut().ignore_next_state_change = true;
        device.apply_settings(&target).await;
        device.verify_and_retry(&target).await;
    }

    // ---- temperature thresholds -------------------------------------------

    async fn handle_temperature_event(self: &Arc<Self>, data: &StateChangedData) {
        if !self.automation_enabled() {
            return;
        }
        let Some(new) = &data.new_state else { return };
        if !new.is_valid() {
            return;
        }
        let Some(reading) = new.numeric() else { return };
        self.check_thresholds(reading).await;
    }

    async fn check_thresholds(self: &Arc<Self>, reading: f64) {
        if !self.automation_enabled() {
            return;
        }
        let device = self.device();
        if device.is_off() {
            return;
        }
        let season = self.season.resolved();
        if let Some(threshold) = threshold_violation(&self.options, season, reading) {
            self.force_off_for_threshold(season, reading, threshold).await;
        }
    }

    /// Seasonal threshold violated: force off and notify. Not an internal
    /// shutdown; the user timers are expected to stop with the device.
    async fn force_off_for_threshold(self: &Arc<Self>, season: Season, reading: f64, threshold: f64) {
        info!(
            entry_id = %self.entry_id,
            season = season.as_str(),
            reading,
            threshold,
            "Temperature outside seasonal threshold, climate blocked"
        );
        self.state_mut().ignore_next_state_change = true;
        self.device().turn_off().await;
        {
            let mut s = self.state_mut();
            s.phase = ClimatePhase::Idle;
        }

        let key = match season {
            Season::Summer => MessageKey::ClimateBlockedSummer,
            Season::Winter => MessageKey::ClimateBlockedWinter,
        };
        let args = MessageArgs::new()
            .mode(season.as_str())
            .temp(reading)
            .sensor(Some(reading))
            .threshold(threshold);
        self.send_message(key, args).await;
        self.push_status();
    }

    // ---- power sensor events ----------------------------------------------

    async fn handle_power_event(self: &Arc<Self>, data: &StateChangedData) {
        {
            let mut s = self.state_mut();
            if s.ignore_next_state_change {
                s.ignore_next_state_change = false;
                return;
            }
        }

        let Some(new) = &data.new_state else { return };
        if new.is_unavailable() {
            return;
        }
        let old_on = data
            .old_state
            .as_ref()
            .map(|s| s.state == STATE_ON)
            .unwrap_or(false);

        if new.state == STATE_ON && !old_on {
            let device = self.device();
            if device.is_off() {
                // Physical turn-on (remote control) with the host out of sync
                if self.state_mut().window_open {
                    self.on_climate_turned_on().await;
                    return;
                }
                self.state_mut().syncing_from_power = true;
                self.sync_seasonal_settings().await;
                self.on_climate_turned_on().await;
                self.start_on_counter_if_needed();
                self.state_mut().syncing_from_power = false;
            } else {
                // Confirmation of a host-side turn-on
                self.on_climate_turned_on().await;
                self.start_on_counter_if_needed();
            }
        } else if new.state == STATE_OFF && old_on {
            // The power event is one of the two correlated off events: feed
            // it through the same disambiguation as the host entity's event,
            // then mirror the off on the host entity. When the physical off
            // came first, the mirrored command produces the confirming second
            // event.
            self.handle_off_event().await;
            let device = self.device();
            if !device.is_off() {
                device.turn_off().await;
            }
        }
    }

    // ---- automation switch ------------------------------------------------

    fn disable_automations_by_shutdown(self: &Arc<Self>) {
        {
            let mut s = self.state_mut();
            if s.automation != AutomationState::Enabled {
                return;
            }
            s.automation = AutomationState::DisabledByShutdown;
        }
        info!(entry_id = %self.entry_id, "Automations disabled after manual shutdown");
        self.stop_user_timers();
        self.stop_window_timers();
        self.push_status();
    }

    /// Re-enable the automation. `manual` marks an explicit user request,
    /// which also clears a manual disable.
    pub async fn enable_automations(self: &Arc<Self>, manual: bool) {
        {
            let mut s = self.state_mut();
            if s.automation == AutomationState::Enabled {
                return;
            }
            if !manual && s.automation == AutomationState::DisabledManually {
                return;
            }
            s.automation = AutomationState::Enabled;
        }
        info!(entry_id = %self.entry_id, manual, "Automations enabled");
        if manual {
            self.options.update(HashMap::from([(
                "automation_enabled".to_string(),
                json!(true),
            )]));
        }
        self.push_status();
    }

    /// Explicit user disable: every timer stops.
    pub async fn disable_automations(self: &Arc<Self>) {
        self.state_mut().automation = AutomationState::DisabledManually;
        info!(entry_id = %self.entry_id, "Automations disabled by user");
        self.stop_user_timers();
        self.stop_window_timers();
        self.on_counter.stop();
        self.options.update(HashMap::from([(
            "automation_enabled".to_string(),
            json!(false),
        )]));
        self.push_status();
    }

    fn stop_user_timers(&self) {
        self.timer_on.disarm();
        self.timer_off.disarm();
    }

    fn stop_window_timers(&self) {
        if self.window_off_timer.cancel() {
            self.state_mut().internal_shutdown = false;
        }
        self.window_on_timer.cancel();
        self.window_timeout_timer.cancel();
    }

    // ---- settings lock ----------------------------------------------------

    pub async fn set_settings_lock(self: &Arc<Self>, locked: bool) {
        {
            let mut s = self.state_mut();
            s.settings_locked = locked;
            if !locked {
                s.locked_override = None;
            }
        }
        info!(entry_id = %self.entry_id, locked, "Settings lock changed");
        self.options.update(HashMap::from([(
            "settings_locked".to_string(),
            json!(locked),
        )]));
        if locked {
            self.enforce_lock_target().await;
        }
        self.push_status();
    }

    /// Re-assert the protected settings on a running device. The timer
    /// override, when present, wins over the seasonal defaults. Never powers
    /// on an off device.
    async fn enforce_lock_target(&self) {
        let target = {
            let s = self.state_mut();
            if !s.settings_locked || s.timer_in_action {
                return;
            }
            s.locked_override.clone()
        };

        let device = self.device();
        if device.is_off() {
            return;
        }

        let mut target = target
            .unwrap_or_else(|| seasonal_target(&self.options, self.season.resolved()).into());
        if !device.supports_hvac_mode(&target.hvac_mode) {
            return;
        }
        if let Some(fan) = target.fan_mode.clone() {
            if !device.supports_fan_mode(&fan) {
                target.fan_mode = None;
            }
        }
        if let Some(preset) = target.preset_mode.clone() {
            if !device.supports_preset_mode(&preset) {
                target.preset_mode = None;
            }
        }

        debug!(entry_id = %self.entry_id, "Re-asserting locked settings");
        device.set_hvac_mode(&target.hvac_mode).await;
        if let Some(t) = target.temperature {
            device.set_temperature(t).await;
        }
        if let Some(fan) = &target.fan_mode {
            device.set_fan_mode(fan).await;
        }
        if let Some(preset) = &target.preset_mode {
            device.set_preset_mode(preset).await;
        }
    }

    // ---- user timers ------------------------------------------------------

    /// Arm the turn-on countdown. An already-running timer is stopped first.
    pub fn start_timer_on(self: &Arc<Self>) {
        let minutes = self.options.timer_on_minutes().max(1);
        let guard = self.timer_on.arm(Duration::from_secs(minutes * 60));
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_timer_on(guard).await });
        self.timer_on.attach(handle);
        self.push_status();
    }

    pub fn stop_timer_on(self: &Arc<Self>) {
        self.timer_on.disarm();
        self.push_status();
    }

    /// Arm the (cyclic) turn-off countdown.
    pub fn start_timer_off(self: &Arc<Self>) {
        let minutes = self.options.timer_off_minutes().max(1);
        let guard = self.timer_off.arm(Duration::from_secs(minutes * 60));
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_timer_off(guard).await });
        self.timer_off.attach(handle);
        self.push_status();
    }

    /// Stop the turn-off countdown, dropping its override and returning a
    /// running device to the seasonal settings.
    pub async fn stop_timer_off(self: &Arc<Self>) {
        let was_running = self.timer_off.disarm();
        self.state_mut().locked_override = None;
        if was_running {
            self.restore_seasonal_settings().await;
        }
        self.push_status();
    }

    async fn restore_seasonal_settings(&self) {
        let device = self.device();
        if device.is_off() {
            return;
        }
        let target: ClimateTarget =
            seasonal_target(&self.options, self.season.resolved()).into();
        if device.supports_hvac_mode(&target.hvac_mode) {
            device.set_hvac_mode(&target.hvac_mode).await;
        }
        if let Some(t) = target.temperature {
            device.set_temperature(t).await;
        }
        if let Some(fan) = target.fan_mode.as_deref() {
            if device.supports_fan_mode(fan) {
                device.set_fan_mode(fan).await;
            }
        }
    }

    async fn run_timer_on(self: Arc<Self>, guard: TimerGuard) {
        while guard.remaining_secs() > 0 {
            sleep(Duration::from_secs(1)).await;
            if !guard.live() {
                return;
            }
            guard.tick();
        }
        if !guard.live() {
            return;
        }

        let device = self.device();
        let season = self.season.resolved();
        let mut target: ClimateTarget = seasonal_target(&self.options, season).into();
        if !device.supports_hvac_mode(&target.hvac_mode) {
            target.hvac_mode = "cool".to_string();
        }
        if let Some(fan) = target.fan_mode.clone() {
            if !device.supports_fan_mode(&fan) {
                target.fan_mode = None;
            }
        }
        info!(
            entry_id = %self.entry_id,
            mode = %target.hvac_mode,
            season = season.as_str(),
            "Turn-on timer expired, switching climate on"
        );

        device.set_hvac_mode(&target.hvac_mode).await;
        if !guard.live() {
            return;
        }
        if let Some(t) = target.temperature {
            device.set_temperature(t).await;
            if !guard.live() {
                return;
            }
        }
        if let Some(fan) = &target.fan_mode {
            device.set_fan_mode(fan).await;
        }
        guard.finish();
        self.push_status();
    }

    async fn run_timer_off(self: Arc<Self>, guard: TimerGuard) {
        loop {
            while guard.remaining_secs() > 0 {
                sleep(Duration::from_secs(1)).await;
                if !guard.live() {
                    return;
                }

                if self.device().is_off() {
                    // Only a manual off stops the countdown; window automation
                    // keeps it alive through the temporary off phase.
                    let in_window_flow = {
                        let s = self.state_mut();
                        s.window_open
                            || s.internal_shutdown
                            || s.phase == ClimatePhase::Restoring
                    };
                    let window_automation_active = in_window_flow
                        || self.window_off_timer.is_armed()
                        || self.window_on_timer.is_armed()
                        || self.window_timeout_timer.is_armed();
                    if !window_automation_active {
                        info!(entry_id = %self.entry_id, "Turn-off timer stopped, climate off");
                        guard.finish();
                        self.push_status();
                        return;
                    }
                }
                guard.tick();
            }
            if !guard.live() {
                return;
            }

            let target_mode = self.options.timer_off_hvac_mode();
            self.state_mut().timer_in_action = true;

            if target_mode == STATE_OFF {
                // Terminal: the off event this issues is an internal shutdown
                self.state_mut().internal_shutdown = true;
                let device = self.device();
                device.set_hvac_mode(STATE_OFF).await;
                if guard.live() {
                    let args = MessageArgs::new().room(self.room());
                    self.send_message(MessageKey::TimerOffExecuted, args).await;
                }
                self.schedule_timer_action_release();
                guard.finish();
                self.push_status();
                return;
            }

            // Mode cycling: switch mode + seasonal temperature/fan, protect
            // the choice through the settings lock, then restart the same
            // countdown. This loop is the one timer meant to run indefinitely.
            let device = self.device();
            device.set_hvac_mode(&target_mode).await;
            if !guard.live() {
                self.release_timer_action();
                return;
            }

            let season = self.season.resolved();
            let seasonal = seasonal_target(&self.options, season);
            device.set_temperature(seasonal.temperature).await;
            if !guard.live() {
                self.release_timer_action();
                return;
            }

            let fan_selector = self.options.timer_off_fan_mode();
            let fan = if fan_selector == "auto" {
                seasonal.fan_mode.clone()
            } else {
                Some(fan_selector)
            };
            let fan = fan.filter(|f| device.supports_fan_mode(f));
            if let Some(fan_mode) = &fan {
                device.set_fan_mode(fan_mode).await;
                if !guard.live() {
                    self.release_timer_action();
                    return;
                }
            }

            {
                let mut s = self.state_mut();
                if s.settings_locked {
                    s.locked_override = Some(ClimateTarget {
                        hvac_mode: target_mode.clone(),
                        temperature: Some(seasonal.temperature),
                        fan_mode: fan.clone(),
                        preset_mode: None,
                    });
                }
            }

            if self.device().is_off() {
                info!(entry_id = %self.entry_id, "Cyclic timer not restarted, climate off");
                self.release_timer_action();
                guard.finish();
                self.push_status();
                return;
            }

            info!(
                entry_id = %self.entry_id,
                mode = %target_mode,
                "Cyclic turn-off timer switched mode, countdown restarted"
            );
            guard.reset();
            self.schedule_timer_action_release();
            self.push_status();
        }
    }

    fn release_timer_action(&self) {
        self.state_mut().timer_in_action = false;
    }

    fn schedule_timer_action_release(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            sleep(TIMER_ACTION_HOLD).await;
            this.release_timer_action();
        });
    }

    // ---- turn-on notification counter -------------------------------------

    /// Start counting on-time, unless the counter is already running (the
    /// accumulated time of the current episode must be kept).
    pub fn start_on_counter_if_needed(self: &Arc<Self>) {
        let minutes = self.options.timer_on_notification_minutes();
        if minutes == 0 {
            debug!(entry_id = %self.entry_id, "Turn-on notification disabled");
            return;
        }
        let Some(guard) = self.on_counter.begin() else {
            debug!(
                entry_id = %self.entry_id,
                elapsed = self.on_counter.elapsed(),
                "Turn-on counter already running"
            );
            return;
        };
        info!(entry_id = %self.entry_id, minutes, "Turn-on counter started");
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_on_counter(guard).await });
        self.on_counter.attach(handle);
        self.push_status();
    }

    /// Stop and restart the counter from zero (the "leave on" action).
    pub fn restart_on_counter(self: &Arc<Self>) {
        self.on_counter.stop();
        self.start_on_counter_if_needed();
    }

    async fn run_on_counter(self: Arc<Self>, guard: CounterGuard) {
        loop {
            sleep(Duration::from_secs(1)).await;
            if !self.on_counter.guard_live(&guard) {
                return;
            }

            let (timeout_expired, enabled) = {
                let s = self.state_mut();
                (
                    s.window_timeout_expired,
                    s.automation == AutomationState::Enabled,
                )
            };
            if !enabled {
                info!(entry_id = %self.entry_id, "Turn-on counter stopped, automation disabled");
                self.on_counter.stop();
                self.push_status();
                return;
            }

            if self.device().is_off() {
                if timeout_expired {
                    info!(entry_id = %self.entry_id, "Turn-on counter stopped, window timeout");
                    self.on_counter.stop();
                    self.push_status();
                    return;
                }
                // Off pending window automation: freeze, do not reset
                if self.on_counter.pause() {
                    self.push_status();
                }
                continue;
            }
            if self.on_counter.resume() {
                self.push_status();
            }

            if let Some(elapsed) = self.on_counter.advance(&guard) {
                let minutes = self.options.timer_on_notification_minutes();
                if minutes > 0
                    && elapsed >= minutes * 60
                    && self.on_counter.try_mark_notified(&guard)
                {
                    let room = self.room();
                    let args = MessageArgs::new().minutes(minutes).room(room.clone());
                    let message = self.renderer.render(MessageKey::TimerOnNotification, &args);
                    info!(entry_id = %self.entry_id, minutes, "On-time threshold reached");
                    self.notifier.send_interactive(&message, &room).await;
                }
            }
        }
    }

    // ---- interactive notification actions ---------------------------------

    async fn handle_notification_action(self: &Arc<Self>, data: NotificationActionData) {
        let suffix = format!("_{}", self.entry_id);
        if !data.action.ends_with(&suffix) {
            return;
        }
        if !self.notifier.accept_action(&data.action, "mobile") {
            return;
        }

        let lang = self.options.language();
        let room = self.room();

        if data.action.starts_with("TURN_OFF_CLIMATE_") {
            info!(entry_id = %self.entry_id, "Interactive action: turn climate off");
            self.state_mut().ignore_next_state_change = true;
            self.device().turn_off().await;
            self.on_counter.stop();
            self.notifier.clear_notification().await;
            self.notifier
                .send_confirmation(&confirmation_turned_off(&lang, &room))
                .await;
        } else if data.action.starts_with("IGNORE_CLIMATE_") {
            info!(entry_id = %self.entry_id, "Interactive action: leave climate on");
            self.restart_on_counter();
            self.notifier.clear_notification().await;
            self.notifier
                .send_confirmation(&confirmation_left_on(&lang, &room))
                .await;
        }
        self.push_status();
    }

    async fn handle_bot_callback(self: &Arc<Self>, data: BotCallbackData) {
        let suffix = format!("_{}", self.entry_id);
        if !data.command.ends_with(&suffix) {
            return;
        }
        if !self
            .notifier
            .accept_callback(data.chat_id, data.message_id, &data.command)
        {
            return;
        }

        // Retire the inline keyboard on the original message
        if let (Some(chat_id), Some(message_id)) = (data.chat_id, data.message_id) {
            self.hass
                .call_service_soft(
                    "telegram_bot",
                    "edit_replymarkup",
                    json!({
                        "chat_id": chat_id,
                        "message_id": message_id,
                        "inline_keyboard": [],
                    }),
                )
                .await;
        }

        if data.command.starts_with("/turn_off_climate_") {
            info!(entry_id = %self.entry_id, "Bot callback: turn climate off");
            self.state_mut().ignore_next_state_change = true;
            self.device().turn_off().await;
            self.on_counter.stop();
            self.stop_user_timers();
        } else if data.command.starts_with("/ignore_climate_") {
            info!(entry_id = %self.entry_id, "Bot callback: leave climate on");
            self.on_counter.stop();
        }
        self.push_status();
    }

    // ---- startup and reconfiguration --------------------------------------

    /// After a host restart the climate may already be running: resume the
    /// counters and the auto timer for it.
    async fn restore_after_restart(self: &Arc<Self>) {
        if self.device().is_off() || !self.automation_enabled() {
            return;
        }
        if self.state_mut().window_open {
            info!(entry_id = %self.entry_id, "Window open at startup, timers not resumed");
            return;
        }
        info!(entry_id = %self.entry_id, "Climate already on at startup, timers resumed");
        self.start_on_counter_if_needed();
        if self.options.auto_timer() && !self.timer_off.is_running() {
            self.start_timer_off();
        }
    }

    /// Merge live option updates and re-wire entity references.
    pub async fn update_options(self: &Arc<Self>, updates: HashMap<String, serde_json::Value>) {
        self.options.update(updates);
        if let Some(refs) = self.options.entity_refs() {
            let changed = { *self.refs.read().unwrap() != refs };
            if changed {
                info!(entry_id = %self.entry_id, "Entity references updated");
                self.windows
                    .lock()
                    .unwrap()
                    .set_sensors(refs.window_sensors.clone());
                *self.refs.write().unwrap() = refs;
            }
        }
        self.season.refresh(self.season_mode());
        self.push_status();
    }

    pub async fn set_season(self: &Arc<Self>, season: &str) {
        self.update_options(HashMap::from([("season".to_string(), json!(season))]))
            .await;
    }

    // ---- test hooks -------------------------------------------------------

    #[doc(hidden)]
    pub fn counter_elapsed(&self) -> u64 {
        self.on_counter.elapsed()
    }

    #[doc(hidden)]
    pub fn timer_off_remaining(&self) -> u64 {
        self.timer_off.remaining_secs()
    }
}
