//! The device side of a display: power and backlight.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::UnboundedSender;

use crate::errors::*;
use crate::scheduler::Event;
use crate::util::lock;

pub type DisplayId = u32;

/// Brightness writes a [`VirtualScreen`] remembers per display.
const WRITE_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayState {
    On,
    Dim,
    Off,
    Suspend,
    #[default]
    Unknown,
}

impl DisplayState {
    /// Brightness can only be changed while the panel is lit.
    pub fn is_lit(self) -> bool {
        matches!(self, DisplayState::On | DisplayState::Dim)
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisplayState::On => "on",
            DisplayState::Dim => "dim",
            DisplayState::Off => "off",
            DisplayState::Suspend => "suspend",
            DisplayState::Unknown => "unknown",
        })
    }
}

impl FromStr for DisplayState {
    type Err = LumenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(DisplayState::On),
            "dim" => Ok(DisplayState::Dim),
            "off" => Ok(DisplayState::Off),
            "suspend" => Ok(DisplayState::Suspend),
            other => Err(LumenError::Other(format!("unknown display state {other:?}"))),
        }
    }
}

/// Completion of an asynchronous power transition.
///
/// Handing the ack back puts the result onto the service queue, where the
/// display state is updated.
pub struct PowerAck {
    display_id: DisplayId,
    state: DisplayState,
    tx: UnboundedSender<Event>,
}

impl PowerAck {
    pub(crate) fn new(display_id: DisplayId, state: DisplayState, tx: UnboundedSender<Event>) -> Self {
        Self {
            display_id,
            state,
            tx,
        }
    }

    pub fn display_id(&self) -> DisplayId {
        self.display_id
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn complete(self, success: bool) {
        // the service is gone if this fails, nobody is waiting for the state
        let _ = self.tx.send(Event::PowerStateAcked {
            display_id: self.display_id,
            state: self.state,
            success,
        });
    }
}

/// Hardware or display server abstraction the controllers drive.
pub trait ScreenAction: Send + Sync {
    fn display_ids(&self) -> Vec<DisplayId>;

    fn default_display_id(&self) -> DisplayId;

    /// Applies an absolute brightness, already discounted and clamped.
    fn set_brightness(&self, display_id: DisplayId, value: u32) -> bool;

    /// Synchronous power change, used for [`DisplayState::Dim`] and
    /// [`DisplayState::Suspend`].
    fn set_display_power(&self, display_id: DisplayId, state: DisplayState, reason: u32) -> bool;

    /// Starts turning a display on or off. Returns `false` when the request
    /// could not be issued; otherwise `ack` has to be completed once the
    /// device has finished.
    fn set_display_state(&self, display_id: DisplayId, state: DisplayState, ack: PowerAck) -> bool;
}

#[derive(Debug, Clone, Default)]
struct VirtualPanel {
    power: DisplayState,
    brightness: u32,
    writes: VecDeque<u32>,
}

/// In-memory screens, for running without backlight hardware.
pub struct VirtualScreen {
    panels: Mutex<BTreeMap<DisplayId, VirtualPanel>>,
    failing: AtomicBool,
}

impl VirtualScreen {
    /// Creates `count` displays with ids starting at 0.
    pub fn new(count: u32) -> Self {
        Self {
            panels: Mutex::new(
                (0..count.max(1))
                    .map(|id| (id, VirtualPanel::default()))
                    .collect(),
            ),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every device request fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn brightness(&self, display_id: DisplayId) -> Option<u32> {
        lock(&self.panels).get(&display_id).map(|p| p.brightness)
    }

    pub fn power(&self, display_id: DisplayId) -> Option<DisplayState> {
        lock(&self.panels).get(&display_id).map(|p| p.power)
    }

    /// The latest brightness writes to the display, oldest first.
    pub fn writes(&self, display_id: DisplayId) -> Vec<u32> {
        lock(&self.panels)
            .get(&display_id)
            .map(|p| p.writes.iter().copied().collect())
            .unwrap_or_default()
    }

    fn with_panel(&self, display_id: DisplayId, f: impl FnOnce(&mut VirtualPanel)) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        match lock(&self.panels).get_mut(&display_id) {
            Some(panel) => {
                f(panel);
                true
            }
            None => false,
        }
    }
}

impl ScreenAction for VirtualScreen {
    fn display_ids(&self) -> Vec<DisplayId> {
        lock(&self.panels).keys().copied().collect()
    }

    fn default_display_id(&self) -> DisplayId {
        lock(&self.panels).keys().next().copied().unwrap_or_default()
    }

    fn set_brightness(&self, display_id: DisplayId, value: u32) -> bool {
        self.with_panel(display_id, |panel| {
            panel.brightness = value;
            if panel.writes.len() == WRITE_HISTORY {
                panel.writes.pop_front();
            }
            panel.writes.push_back(value);
        })
    }

    fn set_display_power(&self, display_id: DisplayId, state: DisplayState, _reason: u32) -> bool {
        self.with_panel(display_id, |panel| panel.power = state)
    }

    fn set_display_state(&self, display_id: DisplayId, state: DisplayState, ack: PowerAck) -> bool {
        let issued = self.with_panel(display_id, |panel| panel.power = state);
        if issued {
            ack.complete(true);
        }
        issued
    }
}
