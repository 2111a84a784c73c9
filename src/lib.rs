//! # lumend
//!
//! An ambient display-control daemon: keeps power, backlight and display
//! color temperature consistent with the machine's surroundings (AC/battery
//! state, idle time, time of day).
//!
//! ## Architecture
//!
//! - **bus**: Typed publish/subscribe message bus
//! - **module**: Module lifecycle controller and dispatch
//! - **state**: Process-wide shared state record
//! - **services**: External power-state and display-control boundaries
//! - **modules**: The concrete control modules (power source, day phase,
//!   night light, dimmer)
//! - **config**: Configuration loading, validation, and default generation
//! - **constants**: Application-wide constants and defaults
//! - **logger**: Structured logging with visual formatting

pub mod bus;
pub mod config;
pub mod constants;
pub mod logger;
pub mod module;
pub mod modules;
pub mod services;
pub mod state;
#[cfg(any(test, feature = "testing-support"))]
pub mod testing;

// Re-export important types for easier access
pub use bus::{Envelope, Message, MessageKind, Sender};
pub use config::Config;
pub use logger::{Log, LogLevel};
pub use module::{Context, Module, ModuleId, ModuleState, Registry};
pub use services::{DisplayService, PowerService, ServiceSignal};
pub use state::{DayPhase, DisplayFlags, PowerSource, SharedState};
