#![warn(clippy::match_same_arms)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::unnecessary_wraps)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Brightness and power control for displays.
//!
//! [`Lumen`] resolves the competing brightness requests for every display
//! (persisted setting, override, boost, discount and ambient light driven
//! auto adjustment) on a single sequential queue and applies the result
//! through a [`ScreenAction`].

#[macro_use]
mod util;
mod animator;
mod config;
pub mod consts;
mod controller;
mod coordinator;
mod curve;
mod device;
mod errors;
mod lux_filter;
mod scheduler;
mod screen;
mod sensor;
mod settings;
#[cfg(feature = "ambient")]
mod watcher;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use crate::config::{
    AnimationConfig, AutoBrightnessConfig, BacklightConfig, BrightnessLimits, DeviceConfig,
    LumenConfig, LuxFilterConfig,
};
use crate::consts::*;
pub use crate::controller::ScreenSnapshot;
use crate::controller::SharedScreen;
use crate::coordinator::{Command, Coordinator};
pub use crate::coordinator::DisplayStateCallback;
pub use crate::curve::AutoBrightnessCurve;
pub use crate::device::BacklightScreen;
pub use crate::errors::{LumenError, Result};
pub use crate::lux_filter::LuxStabilityFilter;
use crate::scheduler::{Event, Scheduler};
pub use crate::screen::{DisplayId, DisplayState, PowerAck, ScreenAction, VirtualScreen};
#[cfg(feature = "ambient")]
#[cfg_attr(docsrs, doc(cfg(feature = "ambient")))]
pub use crate::sensor::IioLightSensor;
pub use crate::sensor::{AmbientSensor, LuxSink, NoSensor};
pub use crate::settings::{
    MemorySettings, ObserverHandle, ObserverId, SettingObserver, SettingsStore, TomlSettings,
};
use crate::util::*;

make_log_macro!(debug, "lumen");

/// Used to construct [`Lumen`]
#[derive(Default)]
pub struct LumenBuilder {
    config: Option<LumenConfig>,
    action: Option<Arc<dyn ScreenAction>>,
    sensor: Option<Box<dyn AmbientSensor>>,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl LumenBuilder {
    /// Create a new [`LumenBuilder`].
    pub fn new() -> Self {
        LumenBuilder::default()
    }

    /// Defaults to [`LumenConfig::load`] with no explicit path.
    pub fn with_config(mut self, config: LumenConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Defaults to the backlight devices found by [`BacklightScreen::discover`].
    pub fn with_screen_action(mut self, action: Arc<dyn ScreenAction>) -> Self {
        self.action = Some(action);
        self
    }

    /// Defaults to the first IIO light sensor when built with the `ambient`
    /// feature, [`NoSensor`] otherwise.
    pub fn with_ambient_sensor(mut self, sensor: impl AmbientSensor + 'static) -> Self {
        self.sensor = Some(Box::new(sensor));
        self
    }

    /// Defaults to a [`TomlSettings`] at `settings_path` or in the user's data dir.
    pub fn with_settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Starts the service queue on the current tokio runtime.
    pub async fn build(self) -> Result<Lumen> {
        let config = match self.config {
            Some(config) => config,
            None => LumenConfig::load(None).await?,
        };

        let action: Arc<dyn ScreenAction> = match self.action {
            Some(action) => action,
            None => Arc::new(BacklightScreen::discover(&config.backlight, config.brightness).await?),
        };

        let sensor = match self.sensor {
            Some(sensor) => sensor,
            None => default_sensor(&config).await,
        };

        let settings: Arc<dyn SettingsStore> = match self.settings {
            Some(settings) => settings,
            None => match config.settings_path.clone().or_else(default_settings_path) {
                Some(path) => Arc::new(TomlSettings::open(path).await?),
                None => Arc::new(MemorySettings::new()),
            },
        };

        Ok(Lumen::start(config, action, sensor, settings))
    }
}

#[cfg(feature = "ambient")]
async fn default_sensor(config: &LumenConfig) -> Box<dyn AmbientSensor> {
    let interval = std::time::Duration::from_millis(config.auto_brightness.sampling_interval_ms);
    match IioLightSensor::discover(interval).await {
        Ok(sensor) => Box::new(sensor),
        Err(e) => {
            debug!("no ambient light sensor: {e}");
            Box::new(NoSensor)
        }
    }
}

#[cfg(not(feature = "ambient"))]
async fn default_sensor(_config: &LumenConfig) -> Box<dyn AmbientSensor> {
    Box::new(NoSensor)
}

/// Handle to a running brightness service.
///
/// Mutating operations are queued and resolve once the service handled them;
/// they return `false` when the request was rejected or the service has
/// stopped. Getters read the last state the queue published and never wait.
pub struct Lumen {
    scheduler: Scheduler,
    screens: BTreeMap<DisplayId, SharedScreen>,
    main_display_id: DisplayId,
    auto_adjust: Arc<AtomicBool>,
    limits: BrightnessLimits,
    task: Option<JoinHandle<()>>,
}

impl Lumen {
    fn start(
        config: LumenConfig,
        action: Arc<dyn ScreenAction>,
        sensor: Box<dyn AmbientSensor>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let (scheduler, rx) = Scheduler::new();
        let coordinator = Coordinator::new(&config, action, sensor, settings, scheduler.clone());
        let screens = coordinator.screens();
        let main_display_id = coordinator.main_display_id();
        let auto_adjust = coordinator.auto_adjust_flag();
        Lumen {
            scheduler,
            screens,
            main_display_id,
            auto_adjust,
            limits: config.brightness,
            task: Some(tokio::spawn(coordinator.run(rx))),
        }
    }

    async fn call(&self, command: Command) -> bool {
        let (tx, rx) = oneshot::channel();
        if !self.scheduler.post(Event::Call(command, tx)) {
            debug!("service stopped");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    fn snapshot(&self, display_id: DisplayId) -> Option<ScreenSnapshot> {
        self.screens.get(&display_id).map(|screen| *lock(screen))
    }

    pub fn get_display_ids(&self) -> Vec<DisplayId> {
        self.screens.keys().copied().collect()
    }

    pub fn main_display_id(&self) -> DisplayId {
        self.main_display_id
    }

    pub async fn set_display_state(
        &self,
        display_id: DisplayId,
        state: DisplayState,
        reason: u32,
    ) -> bool {
        self.call(Command::SetDisplayState {
            display_id,
            state,
            reason,
        })
        .await
    }

    /// Like [`Lumen::set_display_state`], but only resolves once the device has
    /// acknowledged the change. `false` when the request was rejected or the
    /// device failed to apply it.
    pub async fn apply_display_state(
        &self,
        display_id: DisplayId,
        state: DisplayState,
        reason: u32,
    ) -> bool {
        let (reply, rx) = oneshot::channel();
        if !self.scheduler.post(Event::AwaitDisplayState {
            display_id,
            state,
            reason,
            reply,
        }) {
            debug!("service stopped");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// [`DisplayState::Unknown`] for unknown displays.
    pub fn get_display_state(&self, display_id: DisplayId) -> DisplayState {
        self.snapshot(display_id)
            .map(|snapshot| snapshot.state)
            .unwrap_or_default()
    }

    /// Sets and persists the brightness, clamped to the platform limits.
    pub async fn set_brightness(&self, display_id: DisplayId, value: i64) -> bool {
        self.adjust_brightness(display_id, value, 0).await
    }

    /// Like [`Lumen::set_brightness`], moving there over `duration_ms`.
    pub async fn adjust_brightness(&self, display_id: DisplayId, value: i64, duration_ms: u32) -> bool {
        self.call(Command::SetBrightness {
            display_id,
            value,
            duration_ms,
        })
        .await
    }

    /// The persisted brightness, [`BRIGHTNESS_OFF`] for unknown displays.
    pub fn get_brightness(&self, display_id: DisplayId) -> u32 {
        self.snapshot(display_id)
            .map_or(BRIGHTNESS_OFF, |snapshot| snapshot.setting_brightness)
    }

    /// The value last written to the device.
    pub fn get_device_brightness(&self, display_id: DisplayId) -> u32 {
        self.snapshot(display_id)
            .map_or(BRIGHTNESS_OFF, |snapshot| snapshot.device_brightness)
    }

    pub fn get_screen_snapshot(&self, display_id: DisplayId) -> Option<ScreenSnapshot> {
        self.snapshot(display_id)
    }

    /// Scales every applied brightness, clamped to `0.01..=1.0`.
    pub async fn discount_brightness(&self, display_id: DisplayId, discount: f64) -> bool {
        self.call(Command::DiscountBrightness {
            display_id,
            discount,
        })
        .await
    }

    /// Temporarily replaces the brightness without persisting it.
    pub async fn override_brightness(&self, display_id: DisplayId, value: i64) -> bool {
        self.call(Command::OverrideBrightness { display_id, value })
            .await
    }

    pub async fn restore_brightness(&self, display_id: DisplayId) -> bool {
        self.call(Command::RestoreBrightness { display_id }).await
    }

    /// Full brightness for `timeout_ms`, repeated calls extend it.
    pub async fn boost_brightness(&self, display_id: DisplayId, timeout_ms: i64) -> bool {
        self.call(Command::BoostBrightness {
            display_id,
            timeout_ms,
        })
        .await
    }

    pub async fn cancel_boost_brightness(&self, display_id: DisplayId) -> bool {
        self.call(Command::CancelBoostBrightness { display_id })
            .await
    }

    pub async fn auto_adjust_brightness(&self, enable: bool) -> bool {
        self.call(Command::AutoAdjustBrightness(enable)).await
    }

    pub fn is_auto_adjust_brightness(&self) -> bool {
        self.auto_adjust.load(Ordering::SeqCst)
    }

    pub fn get_min_brightness(&self) -> u32 {
        self.limits.min
    }

    pub fn get_max_brightness(&self) -> u32 {
        self.limits.max
    }

    pub fn get_default_brightness(&self) -> u32 {
        self.limits.default
    }

    /// Only one callback can be registered.
    pub async fn register_state_callback(
        &self,
        callback: impl DisplayStateCallback + 'static,
    ) -> bool {
        self.call(Command::RegisterStateCallback(Box::new(callback)))
            .await
    }

    /// Re-applies the persisted brightness and auto adjustment and starts
    /// following external changes of both settings.
    pub async fn boot_completed(&self) -> bool {
        self.call(Command::BootCompleted).await
    }

    /// Empty once the service has stopped.
    pub async fn dump(&self) -> String {
        let (tx, rx) = oneshot::channel();
        if !self.scheduler.post(Event::Dump(tx)) {
            return String::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops animations and the ambient light sensor and waits for the queue
    /// and the pending settings writes to finish.
    pub async fn shutdown(mut self) {
        let (tx, rx) = oneshot::channel();
        if self.scheduler.post(Event::Shutdown(Some(tx))) {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("service task failed: {e}");
            }
        }
    }
}

impl Drop for Lumen {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.scheduler.post(Event::Shutdown(None));
        }
    }
}
