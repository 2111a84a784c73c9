//! External service boundary.
//!
//! The daemon talks to two outside collaborators: a power-state service and a
//! display-control service. Both are specified here as traits so the shipped
//! adapters (`power::SysfsPower`, `display::SocketDisplay`) can be swapped for
//! in-memory fakes in tests. Calls are either fire-and-forget with a boolean
//! acknowledgment or subscriptions whose events arrive later on the same
//! event loop as [`ServiceSignal`]s.

pub mod display;
pub mod power;

use anyhow::Result;

/// Events delivered by external services onto the daemon's event loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceSignal {
    /// The power service's properties-changed signal. Deliberately carries no
    /// payload: the service fires the same signal for unrelated property
    /// changes, so the authoritative value must be re-read on every arrival.
    PowerPropertiesChanged,
    /// Idle detection flipped. `true` means the session went idle.
    Idle(bool),
    /// Event-loop clock tick.
    Tick,
}

/// Power-state service boundary.
pub trait PowerService {
    /// Read the authoritative "on battery" property.
    fn on_battery(&mut self) -> Result<bool>;

    /// Register for the properties-changed signal. A module holds at most one
    /// such registration; failure here is an initialization failure for the
    /// caller.
    fn watch_properties(&mut self) -> Result<()>;

    /// Release the signal registration. Idempotent.
    fn unwatch_properties(&mut self);
}

/// Opaque handle for one idle-detection subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleClient(pub(crate) u32);

/// Display-control service boundary.
pub trait DisplayService {
    /// Ask the service to move the display to `temp` Kelvin, optionally
    /// smoothed in `step`-Kelvin increments every `timeout_ms` milliseconds.
    /// The returned boolean is the service's acknowledgment; callers only
    /// commit state changes on `Ok(true)`.
    fn set_temperature(
        &mut self,
        display: &str,
        token: &str,
        temp: u32,
        smooth: bool,
        step: u32,
        timeout_ms: u64,
    ) -> Result<bool>;

    /// Ask the service to move the backlight to `target_pct` (a fraction in
    /// `[0.0, 1.0]`), with the same smoothing convention and acknowledgment.
    fn set_backlight(
        &mut self,
        target_pct: f64,
        smooth: bool,
        step: f64,
        timeout_ms: u64,
    ) -> Result<bool>;

    /// Start idle detection with the given timeout. The service emits
    /// [`ServiceSignal::Idle`] events from then on.
    fn idle_subscribe(&mut self, timeout_secs: u64) -> Result<IdleClient>;

    /// Re-arm the idle timeout of an existing subscription.
    fn idle_set_timeout(&mut self, client: IdleClient, timeout_secs: u64) -> Result<()>;

    /// Resume a stopped subscription.
    fn idle_start(&mut self, client: IdleClient) -> Result<()>;

    /// Stop delivering idle events without releasing the subscription.
    fn idle_stop(&mut self, client: IdleClient) -> Result<()>;

    /// Release the subscription. Idempotent.
    fn idle_release(&mut self, client: IdleClient);

    /// Drain any service events that arrived since the last poll. The event
    /// loop forwards these into the dispatcher.
    fn poll_events(&mut self) -> Vec<ServiceSignal> {
        Vec::new()
    }
}
