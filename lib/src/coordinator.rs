//! Owns the controllers and runs the service queue.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};

use crate::config::{AutoBrightnessConfig, BrightnessLimits, LumenConfig, LuxFilterConfig};
use crate::consts::*;
use crate::controller::{ScreenController, SharedScreen, queue_observer};
use crate::curve::AutoBrightnessCurve;
use crate::lux_filter::LuxStabilityFilter;
use crate::scheduler::{Event, Scheduler, TimerKey};
use crate::screen::{DisplayId, DisplayState, ScreenAction};
use crate::sensor::{AmbientSensor, LuxSink};
use crate::settings::{ObserverHandle, SettingsStore};

make_log_macro!(debug, "coordinator");
make_log_macro!(info, "coordinator");
make_log_macro!(warn, "coordinator");

/// Notified of every display state change the device confirmed.
pub trait DisplayStateCallback: Send {
    fn on_display_state_changed(&mut self, display_id: DisplayId, state: DisplayState);
}

impl<F> DisplayStateCallback for F
where
    F: FnMut(DisplayId, DisplayState) + Send,
{
    fn on_display_state_changed(&mut self, display_id: DisplayId, state: DisplayState) {
        self(display_id, state);
    }
}

/// Requests answered on the queue. Values are raw caller input, validated here.
pub(crate) enum Command {
    SetDisplayState {
        display_id: DisplayId,
        state: DisplayState,
        reason: u32,
    },
    SetBrightness {
        display_id: DisplayId,
        value: i64,
        duration_ms: u32,
    },
    DiscountBrightness {
        display_id: DisplayId,
        discount: f64,
    },
    OverrideBrightness {
        display_id: DisplayId,
        value: i64,
    },
    RestoreBrightness {
        display_id: DisplayId,
    },
    BoostBrightness {
        display_id: DisplayId,
        timeout_ms: i64,
    },
    CancelBoostBrightness {
        display_id: DisplayId,
    },
    AutoAdjustBrightness(bool),
    BootCompleted,
    RegisterStateCallback(Box<dyn DisplayStateCallback>),
}

pub(crate) struct Coordinator {
    controllers: BTreeMap<DisplayId, ScreenController>,
    main_display_id: DisplayId,
    scheduler: Scheduler,
    settings: Arc<dyn SettingsStore>,
    sensor: Box<dyn AmbientSensor>,
    sensor_supported: bool,
    sensor_active: bool,
    auto_adjust: Arc<AtomicBool>,
    curve: AutoBrightnessCurve,
    filter: LuxStabilityFilter,
    lux_filter_config: LuxFilterConfig,
    auto_config: AutoBrightnessConfig,
    limits: BrightnessLimits,
    step_interval_ms: u32,
    state_callback: Option<Box<dyn DisplayStateCallback>>,
    /// Replies to send once a display reached the state they asked for.
    state_waiters: Vec<(DisplayId, DisplayState, oneshot::Sender<bool>)>,
    auto_adjust_observer: Option<ObserverHandle>,
}

impl Coordinator {
    pub(crate) fn new(
        config: &LumenConfig,
        action: Arc<dyn ScreenAction>,
        sensor: Box<dyn AmbientSensor>,
        settings: Arc<dyn SettingsStore>,
        scheduler: Scheduler,
    ) -> Self {
        let limits = config.brightness;
        let step_interval = config.animation.step_interval();
        let main_display_id = action.default_display_id();
        let controllers = action
            .display_ids()
            .into_iter()
            .map(|id| {
                let controller = ScreenController::new(
                    id,
                    Arc::clone(&action),
                    Arc::clone(&settings),
                    scheduler.clone(),
                    limits,
                    step_interval,
                    id == main_display_id,
                );
                (id, controller)
            })
            .collect::<BTreeMap<_, _>>();
        let sensor_supported = sensor.is_supported();
        info!(
            "{} display(s), main display {main_display_id}, ambient light sensor: {sensor_supported}",
            controllers.len()
        );

        Self {
            controllers,
            main_display_id,
            scheduler,
            settings,
            sensor,
            sensor_supported,
            sensor_active: false,
            auto_adjust: Arc::new(AtomicBool::new(false)),
            curve: AutoBrightnessCurve::new(config.auto_brightness.curve.clone(), limits),
            filter: LuxStabilityFilter::new(&config.lux_filter),
            lux_filter_config: config.lux_filter.clone(),
            auto_config: config.auto_brightness.clone(),
            limits,
            step_interval_ms: u32::try_from(step_interval.as_millis()).unwrap_or(u32::MAX),
            state_callback: None,
            state_waiters: Vec::new(),
            auto_adjust_observer: None,
        }
    }

    pub(crate) fn main_display_id(&self) -> DisplayId {
        self.main_display_id
    }

    pub(crate) fn screens(&self) -> BTreeMap<DisplayId, SharedScreen> {
        self.controllers
            .iter()
            .map(|(id, controller)| (*id, controller.shared()))
            .collect()
    }

    pub(crate) fn auto_adjust_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.auto_adjust)
    }

    pub(crate) async fn run(mut self, mut rx: UnboundedReceiver<Event>) {
        debug!("queue started");
        loop {
            while let Some(key) = self.scheduler.pop_due(Instant::now()) {
                self.on_timer(key);
            }
            let event = match self.scheduler.next_deadline() {
                Some(deadline) => tokio::select! {
                    event = rx.recv() => event,
                    () = sleep_until(deadline) => continue,
                },
                None => rx.recv().await,
            };
            match event {
                Some(Event::Shutdown(done)) => {
                    self.shutdown();
                    if let Some(flushed) = self.settings.flush() {
                        let _ = flushed.await;
                    }
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    break;
                }
                Some(event) => self.handle(event),
                None => {
                    self.shutdown();
                    break;
                }
            }
        }
        debug!("queue stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Call(command, reply) => {
                let result = self.execute(command);
                // the caller may have given up waiting
                let _ = reply.send(result);
            }
            Event::Dump(reply) => {
                let _ = reply.send(self.dump());
            }
            Event::AwaitDisplayState {
                display_id,
                state,
                reason,
                reply,
            } => self.await_display_state(display_id, state, reason, reply),
            Event::PowerStateAcked {
                display_id,
                state,
                success,
            } => self.on_power_state_acked(display_id, state, success),
            Event::AmbientLux(lux) => self.on_ambient_lux(lux),
            Event::SettingChanged(key) => self.on_setting_changed(&key),
            Event::Shutdown(_) => self.shutdown(),
        }
    }

    fn on_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::AnimationStep(id) => {
                if let Some(controller) = self.controllers.get_mut(&id) {
                    controller.on_animation_step();
                }
            }
            TimerKey::BoostTimeout(id) => {
                if let Some(controller) = self.controllers.get_mut(&id) {
                    controller.on_boost_timeout();
                }
            }
        }
    }

    pub(crate) fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::SetDisplayState {
                display_id,
                state,
                reason,
            } => self.set_display_state(display_id, state, reason),
            Command::SetBrightness {
                display_id,
                value,
                duration_ms,
            } => {
                let value = self.limits.clamp_i64(value);
                self.with_controller(display_id, |c| c.set_brightness(value, duration_ms))
            }
            Command::DiscountBrightness {
                display_id,
                discount,
            } => {
                if discount.is_nan() {
                    return false;
                }
                self.with_controller(display_id, |c| c.discount_brightness(discount, 0))
            }
            Command::OverrideBrightness { display_id, value } => {
                let value = self.limits.clamp_i64(value);
                self.with_controller(display_id, |c| c.override_brightness(value, 0))
            }
            Command::RestoreBrightness { display_id } => {
                self.with_controller(display_id, |c| c.restore_brightness(0))
            }
            Command::BoostBrightness {
                display_id,
                timeout_ms,
            } => {
                if timeout_ms <= 0 {
                    warn!("boost timeout {timeout_ms} rejected");
                    return false;
                }
                let timeout_ms = u32::try_from(timeout_ms).unwrap_or(u32::MAX);
                self.with_controller(display_id, |c| c.boost_brightness(timeout_ms, 0))
            }
            Command::CancelBoostBrightness { display_id } => {
                self.with_controller(display_id, |c| c.cancel_boost_brightness(0))
            }
            Command::AutoAdjustBrightness(enable) => self.auto_adjust_brightness(enable),
            Command::BootCompleted => self.boot_completed(),
            Command::RegisterStateCallback(callback) => {
                if self.state_callback.is_some() {
                    warn!("a display state callback is already registered");
                    return false;
                }
                self.state_callback = Some(callback);
                true
            }
        }
    }

    fn with_controller(
        &mut self,
        display_id: DisplayId,
        f: impl FnOnce(&mut ScreenController) -> bool,
    ) -> bool {
        match self.controllers.get_mut(&display_id) {
            Some(controller) => f(controller),
            None => {
                warn!("no display {display_id}");
                false
            }
        }
    }

    fn set_display_state(&mut self, display_id: DisplayId, state: DisplayState, reason: u32) -> bool {
        let Some(controller) = self.controllers.get_mut(&display_id) else {
            warn!("no display {display_id}");
            return false;
        };
        let before = controller.state();
        let result = controller.update_state(state, reason);
        let after = controller.state();

        if result && display_id == self.main_display_id && self.auto_adjust.load(Ordering::SeqCst) {
            match state {
                DisplayState::On => self.activate_sensor(),
                DisplayState::Off => self.deactivate_sensor(),
                _ => {}
            }
        }
        if after != before {
            self.notify_state(display_id, after);
        }
        result
    }

    fn await_display_state(
        &mut self,
        display_id: DisplayId,
        state: DisplayState,
        reason: u32,
        reply: oneshot::Sender<bool>,
    ) {
        if !self.set_display_state(display_id, state, reason) {
            let _ = reply.send(false);
        } else if self.display_state(display_id) == Some(state) {
            let _ = reply.send(true);
        } else {
            self.state_waiters.push((display_id, state, reply));
        }
    }

    fn display_state(&self, display_id: DisplayId) -> Option<DisplayState> {
        self.controllers.get(&display_id).map(ScreenController::state)
    }

    fn on_power_state_acked(&mut self, display_id: DisplayId, state: DisplayState, success: bool) {
        let changed = self
            .controllers
            .get_mut(&display_id)
            .is_some_and(|controller| controller.on_power_state_applied(state, success));
        if changed {
            self.notify_state(display_id, state);
        }
        self.wake_state_waiters(display_id, state);
    }

    /// Answers the waiters for an acknowledged transition, `true` when the
    /// display is now in the state they wanted.
    fn wake_state_waiters(&mut self, display_id: DisplayId, acked: DisplayState) {
        if self.state_waiters.is_empty() {
            return;
        }
        let current = self.display_state(display_id);
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state_waiters)
            .into_iter()
            .partition(|(id, wanted, _)| *id == display_id && *wanted == acked);
        self.state_waiters = waiting;
        for (_, wanted, reply) in ready {
            let _ = reply.send(current == Some(wanted));
        }
    }

    fn notify_state(&mut self, display_id: DisplayId, state: DisplayState) {
        debug!("display {display_id} is now {state}");
        if let Some(callback) = self.state_callback.as_mut() {
            callback.on_display_state_changed(display_id, state);
        }
    }

    fn on_ambient_lux(&mut self, lux: f32) {
        if !self.auto_adjust.load(Ordering::SeqCst) {
            return;
        }
        let Some(controller) = self.controllers.get_mut(&self.main_display_id) else {
            return;
        };
        if controller.is_overridden() || controller.is_boosted() {
            debug!("overridden or boosted, ignoring lux {lux}");
            return;
        }

        let last_lux = self.filter.last_lux();
        if !self.filter.observe(lux, Instant::now()) {
            return;
        }

        let candidate = self.curve.brightness(lux);
        let current = controller.get_brightness();
        let change = candidate.abs_diff(current);
        if change < self.auto_config.change_min {
            debug!("brightness change {current} -> {candidate} too small");
            return;
        }
        if (lux > last_lux && candidate < current) || (lux < last_lux && candidate > current) {
            debug!("brightness {current} -> {candidate} goes against lux {last_lux} -> {lux}");
            return;
        }

        let stride = self.auto_config.adjust_stride / controller.discount();
        let steps = (f64::from(change) / stride).floor() as u32;
        let gradual_ms = steps.saturating_mul(self.step_interval_ms);
        info!("lux {lux}: brightness {current} -> {candidate} over {gradual_ms} ms");
        controller.set_brightness(candidate, gradual_ms);
    }

    fn on_setting_changed(&mut self, key: &str) {
        match key {
            SETTING_BRIGHTNESS_KEY => {
                if let Some(controller) = self.controllers.get_mut(&self.main_display_id) {
                    controller.on_brightness_setting_changed();
                }
            }
            SETTING_AUTO_ADJUST_BRIGHTNESS_KEY => {
                let Some(stored) = self.stored_auto_adjust() else {
                    return;
                };
                if stored != self.auto_adjust.load(Ordering::SeqCst) {
                    info!("auto adjust setting changed to {stored}");
                    self.auto_adjust_brightness(stored);
                }
            }
            other => debug!("ignoring change of {other}"),
        }
    }

    fn stored_auto_adjust(&self) -> Option<bool> {
        match self.settings.get_int(SETTING_AUTO_ADJUST_BRIGHTNESS_KEY) {
            Ok(value) => value.map(|v| v == AUTO_BRIGHTNESS_ENABLE),
            Err(e) => {
                warn!("failed to read auto adjust setting: {e}");
                None
            }
        }
    }

    fn persist_auto_adjust(&self, enable: bool) {
        let value = if enable {
            AUTO_BRIGHTNESS_ENABLE
        } else {
            AUTO_BRIGHTNESS_DISABLE
        };
        if let Err(e) = self
            .settings
            .put_int(SETTING_AUTO_ADJUST_BRIGHTNESS_KEY, value)
        {
            warn!("failed to persist auto adjust setting: {e}");
        }
    }

    fn auto_adjust_brightness(&mut self, enable: bool) -> bool {
        if !self.sensor_supported {
            warn!("auto adjust needs an ambient light sensor");
            self.auto_adjust.store(false, Ordering::SeqCst);
            self.persist_auto_adjust(false);
            return false;
        }
        if enable == self.auto_adjust.load(Ordering::SeqCst) {
            debug!("auto adjust already {enable}");
            return true;
        }
        info!("auto adjust brightness: {enable}");
        self.auto_adjust.store(enable, Ordering::SeqCst);
        if enable {
            let main_on = self
                .controllers
                .get(&self.main_display_id)
                .is_some_and(|c| c.state() == DisplayState::On);
            if main_on {
                self.activate_sensor();
            }
        } else {
            self.deactivate_sensor();
        }
        self.persist_auto_adjust(enable);
        true
    }

    fn activate_sensor(&mut self) {
        if !self.sensor_supported || self.sensor_active {
            return;
        }
        self.filter = LuxStabilityFilter::new(&self.lux_filter_config);
        self.sensor_active = self
            .sensor
            .activate(LuxSink::new(self.scheduler.sender()));
        debug!("sensor active: {}", self.sensor_active);
    }

    fn deactivate_sensor(&mut self) {
        if self.sensor_active {
            self.sensor.deactivate();
            self.sensor_active = false;
            debug!("sensor deactivated");
        }
    }

    fn boot_completed(&mut self) -> bool {
        info!("boot completed");
        if let Some(controller) = self.controllers.get_mut(&self.main_display_id) {
            controller.reload_setting_brightness();
            controller.register_setting_observer(queue_observer(&self.scheduler));
        }
        if let Some(stored) = self.stored_auto_adjust() {
            self.auto_adjust_brightness(stored);
        }
        if self.auto_adjust_observer.is_none() {
            match ObserverHandle::register(
                &self.settings,
                SETTING_AUTO_ADJUST_BRIGHTNESS_KEY,
                queue_observer(&self.scheduler),
            ) {
                Ok(handle) => self.auto_adjust_observer = Some(handle),
                Err(e) => warn!("cannot observe auto adjust setting: {e}"),
            }
        }
        true
    }

    pub(crate) fn dump(&self) -> String {
        let mut result = String::from("DISPLAY POWER MANAGER DUMP:\n");
        for (id, controller) in &self.controllers {
            let snapshot = controller.snapshot();
            let _ = write!(
                result,
                "Display Id={id} State={} Discount={:.2} Brightness={}",
                snapshot.state, snapshot.discount, snapshot.setting_brightness
            );
            if snapshot.is_overridden {
                let _ = write!(result, " OverrideBrightness={}", snapshot.overridden_value);
            }
            if snapshot.is_boosted {
                let _ = write!(result, " BoostBrightness={}", self.limits.max);
            }
            let _ = writeln!(
                result,
                "\nDeviceBrightness={}",
                controller.get_device_brightness()
            );
        }
        let _ = writeln!(
            result,
            "Support Ambient Light: {}",
            if self.sensor_supported { "TRUE" } else { "FALSE" }
        );
        let _ = writeln!(
            result,
            "Auto Adjust Brightness: {}",
            if self.auto_adjust.load(Ordering::SeqCst) {
                "ON"
            } else {
                "OFF"
            }
        );
        let _ = writeln!(
            result,
            "Brightness Limits: Max={} Min={} Default={}",
            self.limits.max, self.limits.min, self.limits.default
        );
        result
    }

    fn shutdown(&mut self) {
        info!("shutting down");
        self.deactivate_sensor();
        for controller in self.controllers.values_mut() {
            controller.shutdown();
        }
        self.auto_adjust_observer = None;
        // dropped replies resolve as failures
        self.state_waiters.clear();
        self.scheduler.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::VirtualScreen;
    use crate::sensor::NoSensor;
    use crate::settings::MemorySettings;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Counts activations and hands out the sink it was given.
    #[derive(Clone, Default)]
    struct FakeSensor {
        sink: Arc<Mutex<Option<LuxSink>>>,
        activations: Arc<Mutex<u32>>,
    }

    impl AmbientSensor for FakeSensor {
        fn is_supported(&self) -> bool {
            true
        }

        fn activate(&mut self, sink: LuxSink) -> bool {
            *self.sink.lock().unwrap() = Some(sink);
            *self.activations.lock().unwrap() += 1;
            true
        }

        fn deactivate(&mut self) {
            *self.sink.lock().unwrap() = None;
        }
    }

    impl FakeSensor {
        fn is_active(&self) -> bool {
            self.sink.lock().unwrap().is_some()
        }
    }

    struct Fixture {
        coordinator: Coordinator,
        screen: Arc<VirtualScreen>,
        settings: Arc<MemorySettings>,
        rx: UnboundedReceiver<Event>,
    }

    impl Fixture {
        fn new(sensor: Box<dyn AmbientSensor>, settings: MemorySettings) -> Self {
            let screen = Arc::new(VirtualScreen::new(2));
            let settings = Arc::new(settings);
            let (scheduler, rx) = Scheduler::new();
            let coordinator = Coordinator::new(
                &LumenConfig::default(),
                screen.clone(),
                sensor,
                settings.clone(),
                scheduler,
            );
            Self {
                coordinator,
                screen,
                settings,
                rx,
            }
        }

        /// Handles whatever is queued, except lux samples which tests feed explicitly.
        fn drain(&mut self) {
            while let Ok(event) = self.rx.try_recv() {
                if !matches!(event, Event::AmbientLux(_)) {
                    self.coordinator.handle(event);
                }
            }
        }

        fn power_on(&mut self, display_id: DisplayId) {
            assert!(self.coordinator.execute(Command::SetDisplayState {
                display_id,
                state: DisplayState::On,
                reason: 0,
            }));
            self.drain();
        }

        fn brightness(&self) -> u32 {
            self.coordinator.controllers[&0].get_brightness()
        }

        async fn advance(&mut self, ms: u64) {
            let end = Instant::now() + Duration::from_millis(ms);
            while let Some(deadline) = self
                .coordinator
                .scheduler
                .next_deadline()
                .filter(|d| *d <= end)
            {
                tokio::time::advance(deadline.saturating_duration_since(Instant::now())).await;
                while let Some(key) = self.coordinator.scheduler.pop_due(Instant::now()) {
                    self.coordinator.on_timer(key);
                }
            }
            tokio::time::advance(end.saturating_duration_since(Instant::now())).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_controller_per_display() {
        let mut f = Fixture::new(Box::new(NoSensor), MemorySettings::new());
        assert_eq!(f.coordinator.main_display_id(), 0);
        assert_eq!(f.coordinator.screens().len(), 2);
        f.power_on(1);
        assert!(f.coordinator.execute(Command::SetBrightness {
            display_id: 1,
            value: 300,
            duration_ms: 0,
        }));
        assert_eq!(f.screen.brightness(1), Some(BRIGHTNESS_MAX));
        assert!(!f.coordinator.execute(Command::SetBrightness {
            display_id: 0,
            value: 100,
            duration_ms: 0,
        }));
        assert!(!f.coordinator.execute(Command::RestoreBrightness { display_id: 9 }));
        // only the main display persists its brightness
        assert_eq!(f.settings.get_int(SETTING_BRIGHTNESS_KEY).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn input_is_validated() {
        let mut f = Fixture::new(Box::new(NoSensor), MemorySettings::new());
        f.power_on(0);
        assert!(!f.coordinator.execute(Command::BoostBrightness {
            display_id: 0,
            timeout_ms: 0,
        }));
        assert!(!f.coordinator.execute(Command::BoostBrightness {
            display_id: 0,
            timeout_ms: -5,
        }));
        assert!(!f.coordinator.execute(Command::DiscountBrightness {
            display_id: 0,
            discount: f64::NAN,
        }));
        assert!(f.coordinator.execute(Command::OverrideBrightness {
            display_id: 0,
            value: -1,
        }));
        assert_eq!(f.screen.brightness(0), Some(BRIGHTNESS_MIN));
    }

    #[tokio::test(start_paused = true)]
    async fn state_callback_sees_confirmed_changes() {
        let mut f = Fixture::new(Box::new(NoSensor), MemorySettings::new());
        let seen = Arc::new(Mutex::new(Vec::<(DisplayId, DisplayState)>::new()));
        let record = Arc::clone(&seen);
        assert!(f.coordinator.execute(Command::RegisterStateCallback(Box::new(
            move |id: DisplayId, state: DisplayState| record.lock().unwrap().push((id, state))
        ))));
        assert!(!f.coordinator.execute(Command::RegisterStateCallback(Box::new(
            |_: DisplayId, _: DisplayState| {}
        ))));

        f.power_on(0);
        assert!(f.coordinator.execute(Command::SetDisplayState {
            display_id: 0,
            state: DisplayState::Dim,
            reason: 0,
        }));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0, DisplayState::On), (0, DisplayState::Dim)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_adjust_needs_a_sensor() {
        let mut f = Fixture::new(
            Box::new(NoSensor),
            MemorySettings::with_values([(SETTING_AUTO_ADJUST_BRIGHTNESS_KEY, 1)]),
        );
        assert!(!f.coordinator.execute(Command::AutoAdjustBrightness(true)));
        assert!(!f.coordinator.auto_adjust_flag().load(Ordering::SeqCst));
        assert_eq!(
            f.settings.get_int(SETTING_AUTO_ADJUST_BRIGHTNESS_KEY).unwrap(),
            Some(AUTO_BRIGHTNESS_DISABLE)
        );
        assert!(f.coordinator.dump().contains("Support Ambient Light: FALSE"));
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_follows_the_main_display() {
        let sensor = FakeSensor::default();
        let mut f = Fixture::new(Box::new(sensor.clone()), MemorySettings::new());
        assert!(f.coordinator.execute(Command::AutoAdjustBrightness(true)));
        assert!(f.coordinator.execute(Command::AutoAdjustBrightness(true)));
        // main display is not on yet
        assert!(!sensor.is_active());

        f.power_on(0);
        assert!(sensor.is_active());
        assert!(f.coordinator.execute(Command::SetDisplayState {
            display_id: 0,
            state: DisplayState::Off,
            reason: 0,
        }));
        assert!(!sensor.is_active());
        f.power_on(0);
        assert_eq!(*sensor.activations.lock().unwrap(), 2);

        assert!(f.coordinator.execute(Command::AutoAdjustBrightness(false)));
        assert!(!sensor.is_active());
        assert_eq!(
            f.settings.get_int(SETTING_AUTO_ADJUST_BRIGHTNESS_KEY).unwrap(),
            Some(AUTO_BRIGHTNESS_DISABLE)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn settled_lux_drives_brightness() {
        let mut f = Fixture::new(Box::new(FakeSensor::default()), MemorySettings::new());
        f.power_on(0);
        assert!(f.coordinator.execute(Command::AutoAdjustBrightness(true)));

        f.coordinator.on_ambient_lux(100.0);
        assert_eq!(f.brightness(), BRIGHTNESS_DEFAULT);
        f.advance(500).await;
        f.coordinator.on_ambient_lux(500.0);
        f.advance(600).await;
        f.coordinator.on_ambient_lux(500.0);
        // curve(500) = 220, 118 steps of 30 ms
        assert_eq!(f.brightness(), 220);
        assert!(f.coordinator.controllers[&0].is_animating());
        f.advance(118 * 30).await;
        assert_eq!(f.screen.brightness(0), Some(220));
    }

    #[tokio::test(start_paused = true)]
    async fn lux_is_ignored_while_overridden() {
        let mut f = Fixture::new(Box::new(FakeSensor::default()), MemorySettings::new());
        f.power_on(0);
        assert!(f.coordinator.execute(Command::AutoAdjustBrightness(true)));
        assert!(f.coordinator.execute(Command::OverrideBrightness {
            display_id: 0,
            value: 30,
        }));
        f.coordinator.on_ambient_lux(100.0);
        f.advance(1500).await;
        f.coordinator.on_ambient_lux(5000.0);
        f.advance(1500).await;
        f.coordinator.on_ambient_lux(5000.0);
        assert_eq!(f.screen.brightness(0), Some(30));
        // nothing was fed to the filter
        assert_eq!(f.coordinator.filter.last_lux(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn lux_against_the_brightness_direction_is_ignored() {
        let mut f = Fixture::new(Box::new(FakeSensor::default()), MemorySettings::new());
        f.power_on(0);
        assert!(f.coordinator.execute(Command::SetBrightness {
            display_id: 0,
            value: 250,
            duration_ms: 0,
        }));
        assert!(f.coordinator.execute(Command::AutoAdjustBrightness(true)));
        f.coordinator.on_ambient_lux(10.0);
        f.advance(200).await;
        f.coordinator.on_ambient_lux(200.0);
        f.advance(1000).await;
        // brighter room, but curve(200) = 145 is darker than 250
        f.coordinator.on_ambient_lux(200.0);
        assert_eq!(f.brightness(), 250);
    }

    #[tokio::test(start_paused = true)]
    async fn boot_restores_persisted_state() {
        let sensor = FakeSensor::default();
        let mut f = Fixture::new(
            Box::new(sensor.clone()),
            MemorySettings::with_values([
                (SETTING_BRIGHTNESS_KEY, 40),
                (SETTING_AUTO_ADJUST_BRIGHTNESS_KEY, AUTO_BRIGHTNESS_ENABLE),
            ]),
        );
        f.power_on(0);
        assert_eq!(f.screen.brightness(0), Some(40));
        f.settings.put_int(SETTING_BRIGHTNESS_KEY, 60).unwrap();
        assert!(f.coordinator.execute(Command::BootCompleted));
        assert_eq!(f.screen.brightness(0), Some(60));
        assert!(f.coordinator.auto_adjust_flag().load(Ordering::SeqCst));
        assert!(sensor.is_active());
        assert!(f.coordinator.execute(Command::BootCompleted));
        assert_eq!(f.settings.observer_count(), 2);

        f.settings.put_int(SETTING_BRIGHTNESS_KEY, 90).unwrap();
        f.settings
            .put_int(SETTING_AUTO_ADJUST_BRIGHTNESS_KEY, AUTO_BRIGHTNESS_DISABLE)
            .unwrap();
        f.drain();
        assert_eq!(f.screen.brightness(0), Some(90));
        assert!(!f.coordinator.auto_adjust_flag().load(Ordering::SeqCst));
        assert!(!sensor.is_active());

        f.coordinator.shutdown();
        assert_eq!(f.settings.observer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dump_reports_every_display() {
        let mut f = Fixture::new(Box::new(NoSensor), MemorySettings::new());
        f.power_on(0);
        assert!(f.coordinator.execute(Command::OverrideBrightness {
            display_id: 0,
            value: 180,
        }));
        let dump = f.coordinator.dump();
        assert!(dump.starts_with("DISPLAY POWER MANAGER DUMP:\n"));
        assert!(dump.contains(
            "Display Id=0 State=on Discount=1.00 Brightness=102 OverrideBrightness=180\nDeviceBrightness=180\n"
        ));
        assert!(dump.contains("Display Id=1 State=unknown"));
        assert!(dump.contains("Auto Adjust Brightness: OFF"));
        assert!(dump.contains("Brightness Limits: Max=255 Min=5 Default=102"));
    }

    #[tokio::test(start_paused = true)]
    async fn state_waiters_resolve_on_acknowledgement() {
        let mut f = Fixture::new(Box::new(NoSensor), MemorySettings::new());
        let await_state = |f: &mut Fixture, state: DisplayState| {
            let (reply, rx) = oneshot::channel();
            f.coordinator.handle(Event::AwaitDisplayState {
                display_id: 0,
                state,
                reason: 0,
                reply,
            });
            rx
        };

        let mut rx = await_state(&mut f, DisplayState::On);
        assert!(rx.try_recv().is_err());
        f.drain();
        assert_eq!(rx.try_recv(), Ok(true));
        assert!(f.coordinator.state_waiters.is_empty());

        let mut rx = await_state(&mut f, DisplayState::On);
        assert_eq!(rx.try_recv(), Ok(true));

        f.screen.set_failing(true);
        let mut rx = await_state(&mut f, DisplayState::Off);
        assert_eq!(rx.try_recv(), Ok(false));
    }
}
