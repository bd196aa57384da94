//! Per-display brightness and power state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::animator::{AnimateCallback, GradualAnimator};
use crate::config::BrightnessLimits;
use crate::consts::*;
use crate::scheduler::{Event, Scheduler, TimerKey};
use crate::screen::{DisplayId, DisplayState, PowerAck, ScreenAction};
use crate::settings::{ObserverHandle, SettingObserver, SettingsStore};
use crate::util::lock;

make_log_macro!(debug, "controller");
make_log_macro!(info, "controller");
make_log_macro!(warn, "controller");

/// Everything the synchronous getters need, mirrored under a lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSnapshot {
    pub state: DisplayState,
    pub reason: u32,
    pub discount: f64,
    pub is_overridden: bool,
    pub overridden_value: u32,
    pub is_boosted: bool,
    /// Cached persisted brightness.
    pub setting_brightness: u32,
    /// Last value written to the device, after discount.
    pub device_brightness: u32,
    /// Brightness in effect before discount, the start of the next animation.
    pub effective_brightness: u32,
}

pub type SharedScreen = Arc<Mutex<ScreenSnapshot>>;

/// Writes discounted brightness values to the device.
#[derive(Clone)]
struct DeviceApplier {
    display_id: DisplayId,
    action: Arc<dyn ScreenAction>,
    shared: SharedScreen,
    limits: BrightnessLimits,
}

impl DeviceApplier {
    fn apply(&self, target: u32) -> bool {
        let discount = lock(&self.shared).discount;
        let applied = self
            .limits
            .clamp((f64::from(target) * discount).round() as u32);
        if !self.action.set_brightness(self.display_id, applied) {
            warn!(
                "display {}: failed to apply brightness {applied}",
                self.display_id
            );
            return false;
        }
        let mut shared = lock(&self.shared);
        shared.device_brightness = applied;
        shared.effective_brightness = target;
        true
    }
}

impl AnimateCallback for DeviceApplier {
    fn on_start(&mut self) {
        debug!("display {}: animation started", self.display_id);
    }

    fn on_changed(&mut self, current: u32) {
        self.apply(current);
    }

    fn on_end(&mut self, current: u32) {
        debug!("display {}: animation ended at {current}", self.display_id);
    }
}

/// Resolves setting, override, boost and discount of one display into the
/// brightness written to the device.
///
/// Must only be driven from the service queue. Power transitions to On and
/// Off complete through [`ScreenController::on_power_state_applied`], animation
/// steps and boost expiry arrive as timers.
pub struct ScreenController {
    display_id: DisplayId,
    action: Arc<dyn ScreenAction>,
    settings: Arc<dyn SettingsStore>,
    scheduler: Scheduler,
    limits: BrightnessLimits,
    step_interval: Duration,
    /// Whether this display reads and writes the persisted brightness.
    owns_setting: bool,
    shared: SharedScreen,
    applier: DeviceApplier,
    animator: Option<GradualAnimator>,
    pending_reason: u32,
    setting_observer: Option<ObserverHandle>,
}

impl ScreenController {
    pub fn new(
        display_id: DisplayId,
        action: Arc<dyn ScreenAction>,
        settings: Arc<dyn SettingsStore>,
        scheduler: Scheduler,
        limits: BrightnessLimits,
        step_interval: Duration,
        owns_setting: bool,
    ) -> Self {
        let setting_brightness = if owns_setting {
            read_setting_brightness(settings.as_ref(), limits).unwrap_or(limits.default)
        } else {
            limits.default
        };
        let shared = Arc::new(Mutex::new(ScreenSnapshot {
            state: DisplayState::Unknown,
            reason: 0,
            discount: DISCOUNT_MAX,
            is_overridden: false,
            overridden_value: 0,
            is_boosted: false,
            setting_brightness,
            device_brightness: 0,
            effective_brightness: setting_brightness,
        }));
        let applier = DeviceApplier {
            display_id,
            action: Arc::clone(&action),
            shared: Arc::clone(&shared),
            limits,
        };
        Self {
            display_id,
            action,
            settings,
            scheduler,
            limits,
            step_interval,
            owns_setting,
            shared,
            applier,
            animator: None,
            pending_reason: 0,
            setting_observer: None,
        }
    }

    pub fn shared(&self) -> SharedScreen {
        Arc::clone(&self.shared)
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        *lock(&self.shared)
    }

    pub fn state(&self) -> DisplayState {
        lock(&self.shared).state
    }

    pub fn discount(&self) -> f64 {
        lock(&self.shared).discount
    }

    pub fn is_overridden(&self) -> bool {
        lock(&self.shared).is_overridden
    }

    pub fn is_boosted(&self) -> bool {
        lock(&self.shared).is_boosted
    }

    pub fn is_animating(&self) -> bool {
        self.animator.as_ref().is_some_and(GradualAnimator::is_animating)
    }

    /// The persisted brightness.
    pub fn get_brightness(&self) -> u32 {
        lock(&self.shared).setting_brightness
    }

    pub fn get_device_brightness(&self) -> u32 {
        lock(&self.shared).device_brightness
    }

    pub fn get_screen_on_brightness(&self) -> u32 {
        let shared = lock(&self.shared);
        if shared.is_boosted {
            self.limits.max
        } else if shared.is_overridden {
            shared.overridden_value
        } else {
            shared.setting_brightness
        }
    }

    pub fn can_set_brightness(&self) -> bool {
        let shared = lock(&self.shared);
        shared.state.is_lit() && !shared.is_overridden && !shared.is_boosted
    }

    pub fn can_discount_brightness(&self) -> bool {
        lock(&self.shared).state.is_lit()
    }

    pub fn can_override_brightness(&self) -> bool {
        let shared = lock(&self.shared);
        shared.state.is_lit() && !shared.is_boosted
    }

    pub fn can_boost_brightness(&self) -> bool {
        let shared = lock(&self.shared);
        shared.state.is_lit() && !shared.is_overridden
    }

    /// Requests a power state. On and Off only take effect once the device
    /// acknowledged them, Dim and Suspend are applied right away.
    pub fn update_state(&mut self, state: DisplayState, reason: u32) -> bool {
        let current = self.state();
        if state == current {
            debug!("display {}: already {state}", self.display_id);
            return true;
        }
        info!(
            "display {}: {current} -> {state}, reason {reason}",
            self.display_id
        );
        match state {
            DisplayState::On | DisplayState::Off => {
                let ack = PowerAck::new(self.display_id, state, self.scheduler.sender());
                if !self.action.set_display_state(self.display_id, state, ack) {
                    warn!("display {}: cannot turn {state}", self.display_id);
                    return false;
                }
                self.pending_reason = reason;
                true
            }
            DisplayState::Dim | DisplayState::Suspend => {
                if !self.action.set_display_power(self.display_id, state, reason) {
                    warn!("display {}: cannot set power to {state}", self.display_id);
                    return false;
                }
                self.set_state(state, reason);
                true
            }
            DisplayState::Unknown => {
                warn!("display {}: refusing to enter {state}", self.display_id);
                false
            }
        }
    }

    /// Handles the device acknowledgement of an On/Off transition, returns
    /// whether the state changed.
    pub fn on_power_state_applied(&mut self, state: DisplayState, success: bool) -> bool {
        if !success {
            warn!("display {}: device failed to turn {state}", self.display_id);
            return false;
        }
        if self.state() == state {
            return false;
        }
        self.set_state(state, self.pending_reason);
        if state == DisplayState::On {
            let brightness = self.get_screen_on_brightness();
            self.update_brightness(brightness, 0, false);
        }
        true
    }

    fn set_state(&mut self, state: DisplayState, reason: u32) {
        if !state.is_lit() {
            self.stop_animation();
        }
        let mut shared = lock(&self.shared);
        shared.state = state;
        shared.reason = reason;
    }

    pub fn set_brightness(&mut self, value: u32, gradual_ms: u32) -> bool {
        if !self.can_set_brightness() {
            debug!("display {}: cannot set brightness now", self.display_id);
            return false;
        }
        self.update_brightness(value, gradual_ms, true)
    }

    pub fn discount_brightness(&mut self, discount: f64, gradual_ms: u32) -> bool {
        if !self.can_discount_brightness() {
            debug!("display {}: cannot discount brightness now", self.display_id);
            return false;
        }
        lock(&self.shared).discount = discount.clamp(DISCOUNT_MIN, DISCOUNT_MAX);
        let brightness = self.get_screen_on_brightness();
        self.update_brightness(brightness, gradual_ms, false)
    }

    pub fn override_brightness(&mut self, value: u32, gradual_ms: u32) -> bool {
        if !self.can_override_brightness() {
            debug!("display {}: cannot override brightness now", self.display_id);
            return false;
        }
        {
            let mut shared = lock(&self.shared);
            shared.is_overridden = true;
            shared.overridden_value = value;
        }
        self.update_brightness(value, gradual_ms, false)
    }

    pub fn restore_brightness(&mut self, gradual_ms: u32) -> bool {
        let setting_brightness = {
            let mut shared = lock(&self.shared);
            if !shared.is_overridden {
                return false;
            }
            shared.is_overridden = false;
            shared.setting_brightness
        };
        self.reapply_if_lit(setting_brightness, gradual_ms)
    }

    pub fn boost_brightness(&mut self, timeout_ms: u32, gradual_ms: u32) -> bool {
        if !self.can_boost_brightness() {
            debug!("display {}: cannot boost brightness now", self.display_id);
            return false;
        }
        let timer = TimerKey::BoostTimeout(self.display_id);
        let mut applied = true;
        if self.scheduler.is_pending(timer) {
            debug!("display {}: extending boost", self.display_id);
        }
        if !self.is_boosted() {
            lock(&self.shared).is_boosted = true;
            applied = self.update_brightness(self.limits.max, gradual_ms, false);
        }
        self.scheduler
            .post_delayed(timer, Duration::from_millis(u64::from(timeout_ms)));
        applied
    }

    pub fn cancel_boost_brightness(&mut self, gradual_ms: u32) -> bool {
        let setting_brightness = {
            let mut shared = lock(&self.shared);
            if !shared.is_boosted {
                return false;
            }
            shared.is_boosted = false;
            shared.setting_brightness
        };
        self.scheduler
            .remove(TimerKey::BoostTimeout(self.display_id));
        self.reapply_if_lit(setting_brightness, gradual_ms)
    }

    pub fn on_boost_timeout(&mut self) {
        info!("display {}: boost expired", self.display_id);
        self.cancel_boost_brightness(0);
    }

    pub fn on_animation_step(&mut self) {
        if let Some(animator) = self.animator.as_mut() {
            animator.next_step();
        }
    }

    /// Re-reads the persisted brightness and applies it when nothing takes
    /// precedence over it.
    pub fn reload_setting_brightness(&mut self) -> bool {
        let Some(value) = read_setting_brightness(self.settings.as_ref(), self.limits) else {
            return false;
        };
        lock(&self.shared).setting_brightness = value;
        if self.can_set_brightness() {
            return self.update_brightness(value, 0, false);
        }
        true
    }

    /// The persisted brightness changed outside of the service.
    pub fn on_brightness_setting_changed(&mut self) {
        if self.is_animating() {
            debug!("display {}: animating, ignoring setting", self.display_id);
            return;
        }
        if !self.can_set_brightness() {
            debug!("display {}: setting change not applicable", self.display_id);
            return;
        }
        let Some(value) = read_setting_brightness(self.settings.as_ref(), self.limits) else {
            return;
        };
        if value == self.get_brightness() {
            return;
        }
        info!("display {}: brightness setting changed to {value}", self.display_id);
        lock(&self.shared).setting_brightness = value;
        self.update_brightness(value, 0, false);
    }

    pub fn register_setting_observer(&mut self, observer: SettingObserver) -> bool {
        if self.setting_observer.is_some() {
            return false;
        }
        match ObserverHandle::register(&self.settings, SETTING_BRIGHTNESS_KEY, observer) {
            Ok(handle) => {
                self.setting_observer = Some(handle);
                true
            }
            Err(e) => {
                warn!("display {}: cannot observe brightness setting: {e}", self.display_id);
                false
            }
        }
    }

    pub fn unregister_setting_observer(&mut self) {
        self.setting_observer = None;
    }

    pub fn shutdown(&mut self) {
        self.stop_animation();
        self.scheduler
            .remove(TimerKey::BoostTimeout(self.display_id));
        self.unregister_setting_observer();
    }

    fn reapply_if_lit(&mut self, brightness: u32, gradual_ms: u32) -> bool {
        if !self.state().is_lit() {
            // applied on the next power on
            return true;
        }
        self.update_brightness(brightness, gradual_ms, false)
    }

    fn stop_animation(&mut self) {
        if let Some(animator) = self.animator.as_mut() {
            if animator.is_animating() {
                debug!(
                    "display {}: abandoning animation to {} at {}",
                    self.display_id,
                    animator.target(),
                    animator.current()
                );
            }
            animator.stop();
        }
    }

    fn update_brightness(&mut self, target: u32, gradual_ms: u32, persist: bool) -> bool {
        self.stop_animation();
        if gradual_ms > 0 {
            let from = lock(&self.shared).effective_brightness;
            let display_id = self.display_id;
            let scheduler = self.scheduler.clone();
            let step_interval = self.step_interval;
            let applier = self.applier.clone();
            self.animator
                .get_or_insert_with(|| {
                    GradualAnimator::new(display_id, scheduler, step_interval, Some(Box::new(applier)))
                })
                .start(from, target, Duration::from_millis(u64::from(gradual_ms)));
        } else if !self.applier.apply(target) {
            return false;
        }
        if persist {
            self.save_setting_brightness(target);
        }
        true
    }

    fn save_setting_brightness(&mut self, value: u32) {
        lock(&self.shared).setting_brightness = value;
        if !self.owns_setting {
            return;
        }
        if let Err(e) = self
            .settings
            .put_int(SETTING_BRIGHTNESS_KEY, i64::from(value))
        {
            warn!("display {}: failed to persist brightness: {e}", self.display_id);
        }
    }
}

fn read_setting_brightness(settings: &dyn SettingsStore, limits: BrightnessLimits) -> Option<u32> {
    match settings.get_int(SETTING_BRIGHTNESS_KEY) {
        Ok(value) => value.map(|v| limits.clamp_i64(v)),
        Err(e) => {
            warn!("failed to read brightness setting: {e}");
            None
        }
    }
}

/// Builds the observer that forwards changes of a setting onto the queue.
pub(crate) fn queue_observer(scheduler: &Scheduler) -> SettingObserver {
    let scheduler = scheduler.clone();
    Arc::new(move |key: &str| {
        scheduler.post(Event::SettingChanged(key.to_string()));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::VirtualScreen;
    use crate::settings::MemorySettings;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::Instant;

    struct Fixture {
        controller: ScreenController,
        screen: Arc<VirtualScreen>,
        settings: Arc<MemorySettings>,
        scheduler: Scheduler,
        rx: UnboundedReceiver<Event>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_settings(MemorySettings::new())
        }

        fn with_settings(settings: MemorySettings) -> Self {
            let screen = Arc::new(VirtualScreen::new(1));
            let settings = Arc::new(settings);
            let (scheduler, rx) = Scheduler::new();
            let controller = ScreenController::new(
                0,
                screen.clone(),
                settings.clone(),
                scheduler.clone(),
                BrightnessLimits::default(),
                Duration::from_millis(30),
                true,
            );
            Self {
                controller,
                screen,
                settings,
                scheduler,
                rx,
            }
        }

        fn lit() -> Self {
            let mut fixture = Self::new();
            fixture.power(DisplayState::On);
            fixture
        }

        fn power(&mut self, state: DisplayState) {
            assert!(self.controller.update_state(state, 0));
            self.drain();
            assert_eq!(self.controller.state(), state);
        }

        /// Runs the queued power acknowledgements.
        fn drain(&mut self) {
            while let Ok(event) = self.rx.try_recv() {
                if let Event::PowerStateAcked { state, success, .. } = event {
                    self.controller.on_power_state_applied(state, success);
                }
            }
        }

        /// Advances virtual time by `ms`, firing due timers in deadline order.
        async fn advance(&mut self, ms: u64) {
            let end = Instant::now() + Duration::from_millis(ms);
            while let Some(deadline) = self.scheduler.next_deadline().filter(|d| *d <= end) {
                tokio::time::advance(deadline.saturating_duration_since(Instant::now())).await;
                while let Some(key) = self.scheduler.pop_due(Instant::now()) {
                    match key {
                        TimerKey::AnimationStep(_) => self.controller.on_animation_step(),
                        TimerKey::BoostTimeout(_) => self.controller.on_boost_timeout(),
                    }
                }
            }
            tokio::time::advance(end.saturating_duration_since(Instant::now())).await;
        }

        fn flags_exclusive(&self) -> bool {
            !(self.controller.is_overridden() && self.controller.is_boosted())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_wait_for_the_device() {
        let mut f = Fixture::new();
        assert!(f.controller.update_state(DisplayState::On, 3));
        assert_eq!(f.controller.state(), DisplayState::Unknown);
        f.drain();
        assert_eq!(f.controller.state(), DisplayState::On);
        assert_eq!(f.controller.snapshot().reason, 3);
        assert_eq!(f.controller.get_device_brightness(), BRIGHTNESS_DEFAULT);

        assert!(f.controller.update_state(DisplayState::On, 0));
        assert!(f.rx.try_recv().is_err());
        assert!(!f.controller.update_state(DisplayState::Unknown, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_power_change_keeps_the_state() {
        let mut f = Fixture::lit();
        f.screen.set_failing(true);
        assert!(!f.controller.update_state(DisplayState::Off, 0));
        assert!(!f.controller.update_state(DisplayState::Dim, 0));
        assert_eq!(f.controller.state(), DisplayState::On);

        f.screen.set_failing(false);
        assert!(!f.controller.on_power_state_applied(DisplayState::Off, false));
        assert_eq!(f.controller.state(), DisplayState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn dim_and_suspend_apply_immediately() {
        let mut f = Fixture::lit();
        assert!(f.controller.update_state(DisplayState::Dim, 1));
        assert_eq!(f.controller.state(), DisplayState::Dim);
        assert_eq!(f.screen.power(0), Some(DisplayState::Dim));
        assert!(f.controller.set_brightness(60, 0));

        assert!(f.controller.update_state(DisplayState::Suspend, 2));
        assert_eq!(f.controller.state(), DisplayState::Suspend);
        assert!(!f.controller.set_brightness(70, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn set_brightness_applies_the_discount() {
        let mut f = Fixture::lit();
        assert!(f.controller.discount_brightness(0.5, 0));
        assert!(f.controller.set_brightness(201, 0));
        assert_eq!(f.controller.get_brightness(), 201);
        // round(100.5)
        assert_eq!(f.controller.get_device_brightness(), 101);
        assert_eq!(f.screen.brightness(0), Some(101));
        assert_eq!(
            f.settings.get_int(SETTING_BRIGHTNESS_KEY).unwrap(),
            Some(201)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn discounted_value_never_drops_below_min() {
        let mut f = Fixture::lit();
        assert!(f.controller.discount_brightness(0.0, 0));
        assert_eq!(f.controller.discount(), DISCOUNT_MIN);
        assert_eq!(f.controller.get_device_brightness(), BRIGHTNESS_MIN);
        assert!(f.controller.discount_brightness(2.0, 0));
        assert_eq!(f.controller.discount(), DISCOUNT_MAX);
        assert_eq!(f.controller.get_device_brightness(), BRIGHTNESS_DEFAULT);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_but_power_while_off() {
        let mut f = Fixture::new();
        f.power(DisplayState::Off);
        assert!(!f.controller.set_brightness(100, 0));
        assert!(!f.controller.override_brightness(100, 0));
        assert!(!f.controller.boost_brightness(1000, 0));
        assert!(!f.controller.discount_brightness(0.5, 0));
        assert!(!f.controller.restore_brightness(0));
        assert!(!f.controller.cancel_boost_brightness(0));
        assert!(f.screen.writes(0).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn override_then_restore() {
        let mut f = Fixture::lit();
        assert!(f.controller.set_brightness(80, 0));
        assert!(f.controller.override_brightness(200, 0));
        assert_eq!(f.controller.get_device_brightness(), 200);
        assert_eq!(f.controller.get_brightness(), 80);
        assert!(!f.controller.set_brightness(90, 0));
        assert!(!f.controller.boost_brightness(1000, 0));
        assert!(f.flags_exclusive());

        assert!(f.controller.restore_brightness(0));
        assert_eq!(f.controller.get_device_brightness(), 80);
        assert!(!f.controller.restore_brightness(0));
        assert_eq!(
            f.settings.get_int(SETTING_BRIGHTNESS_KEY).unwrap(),
            Some(80)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn boost_expires() {
        let mut f = Fixture::lit();
        assert!(f.controller.discount_brightness(0.8, 0));
        assert!(f.controller.set_brightness(100, 0));
        assert!(f.controller.boost_brightness(500, 0));
        assert_eq!(f.controller.get_device_brightness(), 204);
        assert!(!f.controller.set_brightness(50, 0));
        assert!(!f.controller.override_brightness(50, 0));
        assert_eq!(f.controller.get_device_brightness(), 204);
        assert!(f.flags_exclusive());

        f.advance(499).await;
        assert!(f.controller.is_boosted());
        f.advance(1).await;
        assert!(!f.controller.is_boosted());
        assert_eq!(f.controller.get_device_brightness(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_boost_rearms_the_timer() {
        let mut f = Fixture::lit();
        assert!(f.controller.boost_brightness(500, 0));
        f.advance(400).await;
        let writes = f.screen.writes(0).len();
        assert!(f.controller.boost_brightness(500, 0));
        assert_eq!(f.screen.writes(0).len(), writes);

        f.advance(400).await;
        assert!(f.controller.is_boosted());
        f.advance(100).await;
        assert!(!f.controller.is_boosted());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_boost_removes_the_timer() {
        let mut f = Fixture::lit();
        assert!(!f.controller.cancel_boost_brightness(0));
        assert!(f.controller.boost_brightness(500, 0));
        assert!(f.controller.cancel_boost_brightness(0));
        assert!(!f.scheduler.is_pending(TimerKey::BoostTimeout(0)));
        assert_eq!(f.controller.get_device_brightness(), BRIGHTNESS_DEFAULT);
    }

    #[tokio::test(start_paused = true)]
    async fn discount_applies_while_boosted() {
        let mut f = Fixture::lit();
        assert!(f.controller.boost_brightness(1000, 0));
        assert!(f.controller.discount_brightness(0.5, 0));
        assert_eq!(f.controller.get_device_brightness(), 128);
    }

    #[tokio::test(start_paused = true)]
    async fn override_survives_a_power_cycle() {
        let mut f = Fixture::lit();
        assert!(f.controller.override_brightness(180, 0));
        f.power(DisplayState::Off);
        assert_eq!(f.controller.get_device_brightness(), 180);
        f.power(DisplayState::On);
        assert!(f.controller.is_overridden());
        assert_eq!(f.screen.brightness(0), Some(180));
    }

    #[tokio::test(start_paused = true)]
    async fn gradual_set_walks_to_the_target() {
        let mut f = Fixture::lit();
        assert!(f.controller.set_brightness(2, 0));
        assert_eq!(f.controller.get_device_brightness(), BRIGHTNESS_MIN);
        let before = f.screen.writes(0).len();

        // effective brightness is the requested 2, not the clamped device value
        assert!(f.controller.set_brightness(202, 300));
        assert_eq!(f.controller.get_brightness(), 202);
        assert!(f.controller.is_animating());
        f.advance(300).await;
        assert!(!f.controller.is_animating());

        let writes = &f.screen.writes(0)[before..];
        assert_eq!(writes.len(), 10);
        assert_eq!(writes[0], 22);
        assert_eq!(writes.last(), Some(&202));
    }

    #[tokio::test(start_paused = true)]
    async fn new_target_supersedes_the_running_animation() {
        let mut f = Fixture::lit();
        assert!(f.controller.set_brightness(200, 300));
        f.advance(90).await;
        let midway = f.controller.get_device_brightness();
        assert!(midway > BRIGHTNESS_DEFAULT && midway < 200);

        assert!(f.controller.set_brightness(50, 60));
        f.advance(60).await;
        assert!(!f.controller.is_animating());
        assert_eq!(f.controller.get_device_brightness(), 50);
        f.advance(1000).await;
        assert_eq!(f.controller.get_device_brightness(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn power_off_stops_the_animation() {
        let mut f = Fixture::lit();
        assert!(f.controller.set_brightness(200, 3000));
        f.advance(60).await;
        f.power(DisplayState::Off);
        assert!(!f.controller.is_animating());
        assert!(!f.scheduler.is_pending(TimerKey::AnimationStep(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn starts_from_the_persisted_brightness() {
        let mut f = Fixture::with_settings(MemorySettings::with_values([(
            SETTING_BRIGHTNESS_KEY,
            400,
        )]));
        assert_eq!(f.controller.get_brightness(), BRIGHTNESS_MAX);
        f.power(DisplayState::On);
        assert_eq!(f.controller.get_device_brightness(), BRIGHTNESS_MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn external_setting_changes_are_applied() {
        let mut f = Fixture::lit();
        let store: Arc<dyn SettingsStore> = f.settings.clone();
        assert!(f.controller.register_setting_observer(queue_observer(&f.scheduler)));
        assert!(!f.controller.register_setting_observer(queue_observer(&f.scheduler)));

        store.put_int(SETTING_BRIGHTNESS_KEY, 150).unwrap();
        assert!(matches!(f.rx.try_recv(), Ok(Event::SettingChanged(_))));
        f.controller.on_brightness_setting_changed();
        assert_eq!(f.controller.get_brightness(), 150);
        assert_eq!(f.controller.get_device_brightness(), 150);

        assert!(f.controller.override_brightness(30, 0));
        store.put_int(SETTING_BRIGHTNESS_KEY, 90).unwrap();
        f.controller.on_brightness_setting_changed();
        assert_eq!(f.controller.get_brightness(), 150);

        f.controller.shutdown();
        assert_eq!(f.settings.observer_count(), 0);
    }
}
