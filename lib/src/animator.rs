//! Stepwise brightness transitions.

use std::time::Duration;

use crate::scheduler::{Scheduler, TimerKey};
use crate::screen::DisplayId;

make_log_macro!(debug, "animator");
make_log_macro!(warn, "animator");

/// Receives the progress of a [`GradualAnimator`].
pub trait AnimateCallback: Send {
    fn on_start(&mut self);
    fn on_changed(&mut self, current: u32);
    /// `current` is the last value reported, which is not the target when the
    /// animation was stopped early.
    fn on_end(&mut self, current: u32);
}

/// Moves a brightness value towards a target in fixed steps of `step_interval`.
///
/// Each step is a [`TimerKey::AnimationStep`] timer on the service queue, so
/// the steps interleave with every other mutation of the display.
pub struct GradualAnimator {
    display_id: DisplayId,
    scheduler: Scheduler,
    callback: Option<Box<dyn AnimateCallback>>,
    step_interval: Duration,
    from: u32,
    to: u32,
    current: u32,
    total_steps: u32,
    current_step: u32,
    stride: i64,
    is_animating: bool,
}

impl GradualAnimator {
    pub fn new(
        display_id: DisplayId,
        scheduler: Scheduler,
        step_interval: Duration,
        callback: Option<Box<dyn AnimateCallback>>,
    ) -> Self {
        Self {
            display_id,
            scheduler,
            callback,
            step_interval,
            from: 0,
            to: 0,
            current: 0,
            total_steps: 0,
            current_step: 0,
            stride: 0,
            is_animating: false,
        }
    }

    pub fn is_animating(&self) -> bool {
        self.is_animating
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn target(&self) -> u32 {
        self.to
    }

    fn timer(&self) -> TimerKey {
        TimerKey::AnimationStep(self.display_id)
    }

    pub fn start(&mut self, from: u32, to: u32, duration: Duration) {
        if self.callback.is_none() {
            warn!("display {}: no animation callback bound", self.display_id);
            return;
        }
        if self.is_animating {
            debug!("display {}: animation already running", self.display_id);
            return;
        }

        let step_ms = self.step_interval.as_millis().max(1);
        self.total_steps = (duration.as_millis() / step_ms).clamp(1, u32::MAX as u128) as u32;
        let delta = i64::from(to) - i64::from(from);
        self.stride = delta / i64::from(self.total_steps);
        if self.stride == 0 {
            self.stride = delta.signum();
        }
        self.from = from;
        self.to = to;
        self.current = from;
        self.current_step = 0;
        self.is_animating = true;
        debug!(
            "display {}: animate {} -> {} in {} steps, stride {}",
            self.display_id, self.from, self.to, self.total_steps, self.stride
        );
        self.scheduler.post_delayed(self.timer(), self.step_interval);
    }

    pub fn stop(&mut self) {
        self.scheduler.remove(self.timer());
        if !self.is_animating {
            return;
        }
        self.is_animating = false;
        debug!("display {}: animation stopped at {}", self.display_id, self.current);
        if let Some(callback) = self.callback.as_mut() {
            callback.on_end(self.current);
        }
    }

    pub fn next_step(&mut self) {
        if !self.is_animating {
            debug!("display {}: stale animation step", self.display_id);
            return;
        }
        self.current_step += 1;
        let Some(callback) = self.callback.as_mut() else {
            self.is_animating = false;
            return;
        };
        if self.current_step == 1 {
            callback.on_start();
        }

        let next = i64::from(self.current) + self.stride;
        let to = i64::from(self.to);
        let reached = if self.stride >= 0 { next >= to } else { next <= to };

        if reached || self.current_step >= self.total_steps {
            self.current = self.to;
            self.is_animating = false;
            callback.on_changed(self.current);
            callback.on_end(self.current);
        } else {
            self.current = next as u32;
            callback.on_changed(self.current);
            self.scheduler.post_delayed(self.timer(), self.step_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start,
        Changed(u32),
        End(u32),
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }
    }

    impl AnimateCallback for Recorder {
        fn on_start(&mut self) {
            self.0.lock().unwrap().push(Call::Start);
        }
        fn on_changed(&mut self, current: u32) {
            self.0.lock().unwrap().push(Call::Changed(current));
        }
        fn on_end(&mut self, current: u32) {
            self.0.lock().unwrap().push(Call::End(current));
        }
    }

    fn animator(recorder: &Recorder) -> (GradualAnimator, Scheduler) {
        let (scheduler, _rx) = Scheduler::new();
        let animator = GradualAnimator::new(
            0,
            scheduler.clone(),
            Duration::from_millis(30),
            Some(Box::new(recorder.clone())),
        );
        (animator, scheduler)
    }

    /// Fires steps the way the queue does, taking the armed timer first.
    fn run_to_end(animator: &mut GradualAnimator, scheduler: &Scheduler) -> usize {
        let mut steps = 0;
        while animator.is_animating() {
            assert!(scheduler.remove(TimerKey::AnimationStep(0)), "no step armed");
            animator.next_step();
            steps += 1;
        }
        steps
    }

    #[tokio::test]
    async fn ten_steps_for_300ms() {
        let recorder = Recorder::default();
        let (mut animator, scheduler) = animator(&recorder);
        animator.start(0, 100, Duration::from_millis(300));
        assert_eq!(run_to_end(&mut animator, &scheduler), 10);

        let calls = recorder.calls();
        assert_eq!(calls.first(), Some(&Call::Start));
        let changed: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Changed(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(changed, (1..=10).map(|i| i * 10).collect::<Vec<_>>());
        assert_eq!(calls.last(), Some(&Call::End(100)));
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::End(_))).count(), 1);
        assert!(!scheduler.is_pending(TimerKey::AnimationStep(0)));
    }

    #[tokio::test]
    async fn small_delta_moves_one_per_step() {
        let recorder = Recorder::default();
        let (mut animator, scheduler) = animator(&recorder);
        animator.start(50, 47, Duration::from_millis(3000));
        assert_eq!(run_to_end(&mut animator, &scheduler), 3);
        assert_eq!(
            recorder.calls(),
            vec![
                Call::Start,
                Call::Changed(49),
                Call::Changed(48),
                Call::Changed(47),
                Call::End(47)
            ]
        );
    }

    #[tokio::test]
    async fn snaps_to_target_after_the_last_step() {
        let recorder = Recorder::default();
        let (mut animator, scheduler) = animator(&recorder);
        // stride 33 leaves a remainder of 1
        animator.start(0, 100, Duration::from_millis(90));
        assert_eq!(run_to_end(&mut animator, &scheduler), 3);
        assert_eq!(animator.current(), 100);
        assert_eq!(
            recorder.calls()[1..],
            [
                Call::Changed(33),
                Call::Changed(66),
                Call::Changed(100),
                Call::End(100)
            ]
        );
    }

    #[tokio::test]
    async fn short_duration_is_a_single_step() {
        let recorder = Recorder::default();
        let (mut animator, scheduler) = animator(&recorder);
        animator.start(10, 200, Duration::from_millis(5));
        assert_eq!(run_to_end(&mut animator, &scheduler), 1);
        assert_eq!(
            recorder.calls(),
            vec![Call::Start, Call::Changed(200), Call::End(200)]
        );
    }

    #[tokio::test]
    async fn superseded_animation_ends_once_before_the_next_starts() {
        let recorder = Recorder::default();
        let (mut animator, scheduler) = animator(&recorder);
        animator.start(0, 100, Duration::from_millis(300));
        animator.next_step();
        animator.next_step();

        animator.stop();
        animator.start(animator.current(), 0, Duration::from_millis(60));
        run_to_end(&mut animator, &scheduler);

        assert_eq!(
            recorder.calls(),
            vec![
                Call::Start,
                Call::Changed(10),
                Call::Changed(20),
                Call::End(20),
                Call::Start,
                Call::Changed(10),
                Call::Changed(0),
                Call::End(0),
            ]
        );
    }

    #[tokio::test]
    async fn start_while_running_is_ignored() {
        let recorder = Recorder::default();
        let (mut animator, _scheduler) = animator(&recorder);
        animator.start(0, 100, Duration::from_millis(300));
        animator.start(0, 10, Duration::from_millis(30));
        assert_eq!(animator.target(), 100);
    }

    #[tokio::test]
    async fn stop_when_idle_only_clears_the_timer() {
        let recorder = Recorder::default();
        let (mut animator, scheduler) = animator(&recorder);
        animator.stop();
        animator.next_step();
        assert!(recorder.calls().is_empty());
        assert!(!scheduler.is_pending(TimerKey::AnimationStep(0)));
    }

    #[tokio::test]
    async fn unbound_animator_does_nothing() {
        let (scheduler, _rx) = Scheduler::new();
        let mut animator = GradualAnimator::new(0, scheduler.clone(), Duration::from_millis(30), None);
        animator.start(0, 100, Duration::from_millis(300));
        assert!(!animator.is_animating());
        assert!(!scheduler.is_pending(TimerKey::AnimationStep(0)));
    }
}
