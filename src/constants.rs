//! Application constants and default values for lumend.
//!
//! This module contains all the configuration defaults, validation limits,
//! and operational constants used throughout the daemon.

// ═══ Application Configuration Defaults ═══
// These values are used when config options are not specified by the user

pub const DEFAULT_SUNSET: &str = "19:00:00";
pub const DEFAULT_SUNRISE: &str = "06:00:00";
pub const DEFAULT_EVENT_DURATION: u64 = 30; // minutes on each side of a day/night boundary
pub const DEFAULT_NIGHT_TEMP: u32 = 4000; // Kelvin - warm, comfortable for night viewing
pub const DEFAULT_DAY_TEMP: u32 = 6500; // Kelvin - close to natural sunlight
pub const DEFAULT_SMOOTH_TEMP: bool = true;
pub const DEFAULT_TEMP_TRANS_STEP: u32 = 50; // Kelvin per smoothing step
pub const DEFAULT_TEMP_TRANS_TIMEOUT_MS: u64 = 300; // milliseconds between smoothing steps
pub const DEFAULT_LONG_TRANSITION: bool = false;
pub const DEFAULT_AMBIENT_TEMP: bool = false;
pub const DEFAULT_DIM_PCT: f64 = 0.2; // backlight fraction while dimmed
pub const DEFAULT_DIM_TIMEOUT_AC: u64 = 45; // seconds of idle before dimming on AC
pub const DEFAULT_DIM_TIMEOUT_BATTERY: u64 = 20; // seconds of idle before dimming on battery
pub const DEFAULT_SMOOTH_DIM: bool = true;
pub const DEFAULT_DIM_TRANS_STEP: f64 = 0.05; // backlight fraction per smoothing step
pub const DEFAULT_DIM_TRANS_TIMEOUT_MS: u64 = 30; // milliseconds between dim smoothing steps

// ═══ Validation Limits ═══
// These limits ensure user inputs are within reasonable and safe ranges

// Temperature limits (Kelvin scale)
pub const MINIMUM_TEMP: u32 = 1000; // Very warm candlelight-like
pub const MAXIMUM_TEMP: u32 = 10000; // Very cool blue light

// Boundary window limits
pub const MINIMUM_EVENT_DURATION: u64 = 5; // minutes (prevents too-rapid changes)
pub const MAXIMUM_EVENT_DURATION: u64 = 180; // minutes (3 hours max per half-window)

// Dimmer limits
pub const MINIMUM_DIM_TIMEOUT: u64 = 5; // seconds (prevents dim thrashing)
pub const MAXIMUM_DIM_TIMEOUT: u64 = 3600; // seconds (1 hour max)

// ═══ Long Transition Constants ═══
// A long transition replaces one big temperature jump with many small steps
// timed to land exactly at the end of the active day/night boundary window.

pub const LONG_TRANSITION_STEP_SECS: u64 = 10; // fixed interval between steps
pub const LONG_TRANSITION_STEP_MS: u64 = LONG_TRANSITION_STEP_SECS * 1000;

// ═══ Event Loop Timing Constants ═══

pub const TICK_INTERVAL_SECS: u64 = 1; // clock tick feeding the day-phase source
pub const POWER_POLL_INTERVAL_SECS: u64 = 30; // properties poll standing in for the change-signal

// ═══ Display Service Constants ═══
// Settings for the display-control socket protocol

pub const SOCKET_TIMEOUT_MS: u64 = 1000; // 1 second timeout for socket operations
pub const SOCKET_BUFFER_SIZE: usize = 256; // acknowledgment lines are tiny

// ═══ Process Constants ═══

pub const LOCK_FILE_NAME: &str = "lumend.lock";
pub const EXIT_FAILURE: i32 = 1; // General failure
