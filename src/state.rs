//! Process-wide shared state for the daemon.
//!
//! One `SharedState` instance lives inside the dispatch `Context` and is
//! readable by every module. Writes are partitioned by owner: each field is
//! mutated only by the module named next to it (or by the external publish
//! path for fields owned by outside collaborators). Single-threaded dispatch
//! guarantees no handler ever observes a field mid-update.

use chrono::{DateTime, Local};

/// Power source currently feeding the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
    Ac,
    Battery,
}

impl PowerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerSource::Ac => "AC",
            PowerSource::Battery => "battery",
        }
    }
}

/// Current phase of the day as seen by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    Day,
    Night,
}

impl DayPhase {
    /// The opposite phase, i.e. the one the next boundary leads into.
    pub fn other(self) -> Self {
        match self {
            DayPhase::Day => DayPhase::Night,
            DayPhase::Night => DayPhase::Day,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayPhase::Day => "day",
            DayPhase::Night => "night",
        }
    }
}

/// Boundary events between day phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayEvent {
    Sunrise,
    Sunset,
}

/// Which half of a boundary window the clock is currently in.
///
/// A boundary window spans the configured event duration on each side of the
/// event's center time; the halves need different remaining-time arithmetic
/// during a long temperature transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventHalf {
    First,
    Second,
}

/// Display condition bitmask (dimmed state, with room for more conditions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayFlags(u8);

impl DisplayFlags {
    pub const NORMAL: DisplayFlags = DisplayFlags(0);
    pub const DIMMED: DisplayFlags = DisplayFlags(1 << 0);

    pub fn contains(self, other: DisplayFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: DisplayFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: DisplayFlags) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// The shared record of current hardware/environment readings.
#[derive(Debug, Clone)]
pub struct SharedState {
    /// Current power source. Owned by the power-source tracker; `None` until
    /// the first successful read or fallback.
    pub power_source: Option<PowerSource>,

    /// Display condition flags. Owned by the idle/dim controller.
    pub display: DisplayFlags,

    /// Current backlight level as a fraction in `[0.0, 1.0]`. Owned by the
    /// external backlight subsystem; written by the external publish path
    /// when a backlight update arrives.
    pub backlight_pct: f64,

    /// Currently applied color temperature in Kelvin. Owned by the
    /// color-temperature controller.
    pub color_temp: u32,

    /// Current day phase. Owned by the day-phase source, along with the
    /// boundary-window fields below.
    pub day_phase: DayPhase,

    /// Whether the clock is inside a day/night boundary window.
    pub in_event: bool,

    /// Which half of the active boundary window the clock is in. Only
    /// meaningful while `in_event` is true.
    pub event_half: EventHalf,

    /// The next boundary event.
    pub next_event: DayEvent,

    /// Center time of the next boundary event.
    pub next_event_time: Option<DateTime<Local>>,

    /// Whether dimming is inhibited. Owned by the external publish path.
    pub inhibited: bool,

    /// Attached display identifier, read from the environment at bootstrap.
    pub display_name: Option<String>,

    /// Session credential handed to the display-control service, read from
    /// the environment at bootstrap.
    pub session_token: Option<String>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            power_source: None,
            display: DisplayFlags::NORMAL,
            backlight_pct: 1.0,
            color_temp: crate::constants::DEFAULT_DAY_TEMP,
            day_phase: DayPhase::Day,
            in_event: false,
            event_half: EventHalf::First,
            next_event: DayEvent::Sunset,
            next_event_time: None,
            inhibited: false,
            display_name: None,
            session_token: None,
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
