//! Color-temperature controller.
//!
//! Owns the applied color temperature. Starts in a waiting state until the
//! day-phase source has announced itself, then follows phase flips, external
//! temperature requests and (in ambient mode) the backlight level.
//!
//! Temperature changes go through [`plan_temperature_change`]: when a long
//! transition is enabled and the clock is inside a day/night boundary window,
//! one big jump becomes many small steps timed to finish exactly when the
//! window ends. The external call's acknowledgment gates everything: a failed
//! or rejected call leaves shared state untouched and publishes nothing.

use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, Local};

use crate::bus::{Envelope, Message, MessageKind, Sender, TemperatureChange, TemperatureRequest};
use crate::config::Config;
use crate::constants::{
    LONG_TRANSITION_STEP_MS, LONG_TRANSITION_STEP_SECS, MAXIMUM_TEMP, MINIMUM_TEMP,
};
use crate::logger::Log;
use crate::module::{Context, Module, ModuleId, ModuleState};
use crate::state::{EventHalf, SharedState};

/// Internal sub-state on top of the running lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No day-phase announcement seen yet.
    WaitingDayPhase,
    Normal,
}

pub struct NightLight {
    phase: Phase,
    /// Weak reference to the day-phase source, resolved by identity.
    source: ModuleId,
    long_transitioning: bool,
    /// Wall clock of the last long-transition reset check.
    last_day_check: Option<DateTime<Local>>,
}

/// A fully resolved temperature change, ready for the display service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TemperaturePlan {
    pub temp: u32,
    pub smooth: bool,
    pub step: u32,
    pub timeout_ms: u64,
    pub long: bool,
}

impl NightLight {
    pub fn new() -> Self {
        Self {
            phase: Phase::WaitingDayPhase,
            source: ModuleId::DayPhase,
            long_transitioning: false,
            last_day_check: None,
        }
    }

    /// Phase-flip request from the day-phase source: apply the configured
    /// temperature for the phase just entered, unless a long transition is
    /// already walking there or ambient mode drives temperature instead.
    fn on_day_phase_request(&mut self, ctx: &mut Context) {
        if self.long_transitioning || ctx.config.ambient_mode() {
            return;
        }
        let target = ctx.config.temp_for(ctx.state.day_phase);
        let now = ctx.now();
        let smooth = ctx.config.smooth_temp_enabled();
        let step = ctx.config.temp_step();
        let timeout_ms = ctx.config.temp_timeout_ms();
        self.set_temp(ctx, target, Some(now), smooth, step, timeout_ms);
    }

    /// Request from any other caller: persist the value for its phase, and
    /// only apply it right away when that phase is currently active.
    fn on_external_request(&mut self, ctx: &mut Context, req: &TemperatureRequest) {
        if req.new == ctx.config.temp_for(req.day_phase) {
            return;
        }
        ctx.config.set_temp_for(req.day_phase, req.new);
        if !ctx.config.ambient_mode() && req.day_phase == ctx.state.day_phase {
            self.set_temp(ctx, req.new, None, req.smooth, req.step, req.timeout_ms);
        }
    }

    /// Ambient mode: map the backlight fraction onto the day/night swing.
    fn ambient_refresh(&mut self, ctx: &mut Context) {
        if !ctx.config.ambient_mode() {
            return;
        }
        // Configured temperatures can change at runtime, so recompute the
        // swing every time.
        let swing = ctx.config.temp_swing();
        let min_temp = ctx
            .config
            .temp_for(ctx.state.day_phase)
            .min(ctx.config.temp_for(ctx.state.day_phase.other()));
        let target = (swing as f64 * ctx.state.backlight_pct) as u32 + min_temp;
        let smooth = ctx.config.smooth_temp_enabled();
        let step = ctx.config.temp_step();
        let timeout_ms = ctx.config.temp_timeout_ms();
        self.set_temp(ctx, target, None, smooth, step, timeout_ms);
    }

    /// The next boundary event changed: clear the long-transition flag when
    /// the calendar day moved on since the last check. Covers both a change
    /// of target event and resumption after a suspend spanning midnight.
    fn on_next_day_event(&mut self, ctx: &mut Context) {
        let now = ctx.now();
        if self.long_transitioning {
            if let Some(last) = self.last_day_check {
                if crossed_calendar_day(last, now) {
                    Log::log_info("Long transition ended.");
                    self.long_transitioning = false;
                }
            }
        }
        self.last_day_check = Some(now);
    }

    fn set_temp(
        &mut self,
        ctx: &mut Context,
        target: u32,
        now: Option<DateTime<Local>>,
        smooth: bool,
        step: u32,
        timeout_ms: u64,
    ) {
        let plan =
            plan_temperature_change(&ctx.config, &ctx.state, target, now, smooth, step, timeout_ms);
        self.long_transitioning = plan.long;

        let (display, token) = match (&ctx.state.display_name, &ctx.state.session_token) {
            (Some(d), Some(t)) => (d.clone(), t.clone()),
            // check() requires both; nothing to talk to otherwise.
            _ => return,
        };

        match ctx.display.set_temperature(
            &display,
            &token,
            plan.temp,
            plan.smooth,
            plan.step,
            plan.timeout_ms,
        ) {
            Ok(true) => {
                let old = ctx.state.color_temp;
                ctx.state.color_temp = plan.temp;
                ctx.publish(Message::TemperatureUpdate(TemperatureChange {
                    old,
                    new: plan.temp,
                    smooth: plan.smooth,
                    step: plan.step,
                    timeout_ms: plan.timeout_ms,
                    day_phase: ctx.state.day_phase,
                }));
                if plan.smooth {
                    Log::log_info(&format!(
                        "{} transition to {} K started.",
                        if plan.long { "Long" } else { "Normal" },
                        plan.temp
                    ));
                } else {
                    Log::log_info(&format!("Temperature set to {} K.", plan.temp));
                }
            }
            Ok(false) => Log::log_debug("Display service rejected the temperature change."),
            Err(e) => Log::log_warning(&format!("Cannot reach display service: {:#}.", e)),
        }
    }
}

impl Default for NightLight {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for NightLight {
    fn id(&self) -> ModuleId {
        ModuleId::NightLight
    }

    fn check(&self, ctx: &Context) -> bool {
        ctx.state.display_name.is_some() && ctx.state.session_token.is_some()
    }

    fn evaluate(&self, ctx: &Context) -> bool {
        !ctx.config.night_light_disabled()
    }

    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        if ctx.module_state(self.source) == Some(ModuleState::Stopped) {
            bail!("no day-phase source available");
        }
        ctx.subscribe(MessageKind::BacklightUpdate);
        ctx.subscribe(MessageKind::TemperatureRequest);
        ctx.subscribe(MessageKind::DayPhaseUpdate);
        ctx.subscribe(MessageKind::NextDayEventUpdate);
        self.phase = Phase::WaitingDayPhase;
        Ok(())
    }

    fn receive(&mut self, ctx: &mut Context, env: &Envelope) {
        match self.phase {
            Phase::WaitingDayPhase => {
                if let Message::DayPhaseUpdate(_) = env.message {
                    if ctx.module_state(self.source) == Some(ModuleState::Stopped) {
                        Log::log_warning("Stopping NIGHT_LIGHT: day-phase source is gone.");
                        ctx.poison();
                    } else {
                        self.phase = Phase::Normal;
                    }
                }
            }
            Phase::Normal => match &env.message {
                Message::BacklightUpdate(_) => self.ambient_refresh(ctx),
                Message::TemperatureRequest(req) => {
                    if (MINIMUM_TEMP..=MAXIMUM_TEMP).contains(&req.new) {
                        if env.sender == Sender::Module(self.source) {
                            self.on_day_phase_request(ctx);
                        } else {
                            self.on_external_request(ctx, req);
                        }
                    }
                }
                Message::NextDayEventUpdate(_) => self.on_next_day_event(ctx),
                _ => {}
            },
        }
    }

    fn dependency(&self) -> Option<ModuleId> {
        Some(self.source)
    }
}

/// Resolve a temperature change into the parameters handed to the display
/// service.
///
/// Inside a boundary window with long transitions enabled, the remaining time
/// until the window fully ends determines the plan: the per-step delta is the
/// full day/night swing divided by the number of fixed-interval steps that
/// fit into the remaining time, and the step interval is pinned regardless of
/// the configured smoothing parameters. In the first half of the window the
/// target is retargeted to the phase the boundary leads into. Outside a
/// window (or when `now` is withheld to force a plain refresh) the provided
/// smoothing parameters pass through unchanged.
pub(crate) fn plan_temperature_change(
    config: &Config,
    state: &SharedState,
    target: u32,
    now: Option<DateTime<Local>>,
    smooth: bool,
    step: u32,
    timeout_ms: u64,
) -> TemperaturePlan {
    if config.long_transition_enabled() && state.in_event {
        if let (Some(now), Some(center)) = (now, state.next_event_time) {
            let event_duration = config.event_duration_secs();
            let (remaining_secs, temp) = match state.event_half {
                // Remaining time in the first half plus the whole second half.
                EventHalf::First => (
                    (center - now).num_seconds() + event_duration,
                    config.temp_for(state.day_phase.other()),
                ),
                // Remaining time in the second half.
                EventHalf::Second => (event_duration - (now - center).num_seconds(), target),
            };
            if remaining_secs > 0 {
                let step = (config.temp_swing() as f64
                    / (remaining_secs as f64 / LONG_TRANSITION_STEP_SECS as f64))
                    as u32;
                return TemperaturePlan {
                    temp,
                    smooth: true,
                    step,
                    timeout_ms: LONG_TRANSITION_STEP_MS,
                    long: true,
                };
            }
        }
    }
    TemperaturePlan {
        temp: target,
        smooth,
        step,
        timeout_ms,
        long: false,
    }
}

/// True when `now` is on a different day-of-year or year than `last`.
pub(crate) fn crossed_calendar_day(last: DateTime<Local>, now: DateTime<Local>) -> bool {
    last.ordinal() != now.ordinal() || last.year() != now.year()
}
