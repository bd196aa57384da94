//! The sequential event queue every mutation of the service runs on.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::coordinator::Command;
use crate::screen::{DisplayId, DisplayState};
use crate::util::lock;

/// Keyed timers; each key is pending at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    AnimationStep(DisplayId),
    BoostTimeout(DisplayId),
}

pub(crate) enum Event {
    Call(Command, oneshot::Sender<bool>),
    Dump(oneshot::Sender<String>),
    /// A power change whose reply waits for the device acknowledgement.
    AwaitDisplayState {
        display_id: DisplayId,
        state: DisplayState,
        reason: u32,
        reply: oneshot::Sender<bool>,
    },
    PowerStateAcked {
        display_id: DisplayId,
        state: DisplayState,
        success: bool,
    },
    AmbientLux(f32),
    SettingChanged(String),
    Shutdown(Option<oneshot::Sender<()>>),
}

#[derive(Default)]
struct Timers {
    by_deadline: BTreeMap<(Instant, u64), TimerKey>,
    by_key: HashMap<TimerKey, (Instant, u64)>,
    seq: u64,
}

impl Timers {
    fn remove(&mut self, key: TimerKey) -> bool {
        match self.by_key.remove(&key) {
            Some(slot) => {
                self.by_deadline.remove(&slot);
                true
            }
            None => false,
        }
    }
}

/// Handle to post events onto the queue.
///
/// Immediate events are delivered in FIFO order. Timers fire no earlier than
/// their deadline and are ordered by deadline, then by the order they were set.
#[derive(Clone)]
pub struct Scheduler {
    tx: UnboundedSender<Event>,
    timers: Arc<Mutex<Timers>>,
}

impl Scheduler {
    pub(crate) fn new() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx,
                timers: Arc::default(),
            },
            rx,
        )
    }

    pub(crate) fn sender(&self) -> UnboundedSender<Event> {
        self.tx.clone()
    }

    pub(crate) fn post(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Arms `key` to fire after `delay`, replacing a pending instance of it.
    pub fn post_delayed(&self, key: TimerKey, delay: Duration) {
        let mut timers = lock(&self.timers);
        timers.remove(key);
        timers.seq += 1;
        let slot = (Instant::now() + delay, timers.seq);
        timers.by_deadline.insert(slot, key);
        timers.by_key.insert(key, slot);
    }

    pub fn remove(&self, key: TimerKey) -> bool {
        lock(&self.timers).remove(key)
    }

    pub fn is_pending(&self, key: TimerKey) -> bool {
        lock(&self.timers).by_key.contains_key(&key)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        lock(&self.timers)
            .by_deadline
            .first_key_value()
            .map(|(&(deadline, _), _)| deadline)
    }

    /// Takes the earliest timer whose deadline is not after `now`.
    pub(crate) fn pop_due(&self, now: Instant) -> Option<TimerKey> {
        let mut timers = lock(&self.timers);
        let (&(deadline, seq), &key) = timers.by_deadline.first_key_value()?;
        if deadline > now {
            return None;
        }
        timers.by_deadline.remove(&(deadline, seq));
        timers.by_key.remove(&key);
        Some(key)
    }

    pub(crate) fn clear(&self) {
        let mut timers = lock(&self.timers);
        timers.by_deadline.clear();
        timers.by_key.clear();
    }
}
