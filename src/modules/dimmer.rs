//! Idle/dim controller.
//!
//! Bridges the display service's idle detection to backlight dimming. Owns
//! the display condition flags of shared state. The dim decision is recorded
//! in shared state regardless of whether the physical backlight change
//! succeeds, because this module's notion of dimmed/not-dimmed must stay
//! consistent with the idle signal it receives.

use anyhow::{Context as _, Result, bail};

use crate::bus::{DisplayChange, Envelope, Message, MessageKind};
use crate::logger::Log;
use crate::module::{Context, Module, ModuleId};
use crate::services::{IdleClient, ServiceSignal};
use crate::state::DisplayFlags;

pub struct Dimmer {
    client: Option<IdleClient>,
    /// Backlight level recorded on entering the dimmed state, restored on
    /// leaving it.
    pre_dim_pct: Option<f64>,
}

impl Dimmer {
    pub fn new() -> Self {
        Self {
            client: None,
            pre_dim_pct: None,
        }
    }

    fn dim_backlight(&self, ctx: &mut Context, target: f64) {
        // Never raise the backlight on the way into a dim state.
        if target >= ctx.state.backlight_pct {
            Log::log_debug("A lower backlight level is already set; leaving it alone.");
            return;
        }
        self.apply_backlight(ctx, target);
    }

    fn restore_backlight(&self, ctx: &mut Context, pct: f64) {
        self.apply_backlight(ctx, pct);
    }

    fn apply_backlight(&self, ctx: &mut Context, target: f64) {
        let smooth = ctx.config.smooth_dim_enabled();
        let step = ctx.config.dim_step();
        let timeout_ms = ctx.config.dim_timeout_ms();
        match ctx.display.set_backlight(target, smooth, step, timeout_ms) {
            Ok(true) => {}
            Ok(false) => Log::log_debug("Display service rejected the backlight change."),
            // The dim decision stands even when the physical change fails;
            // the next idle flip retries naturally.
            Err(e) => Log::log_warning(&format!("Cannot reach display service: {:#}.", e)),
        }
    }

    /// Re-arm the idle timeout for the currently active power source.
    fn rearm_timeout(&self, ctx: &mut Context) {
        let (Some(client), Some(source)) = (self.client, ctx.state.power_source) else {
            return;
        };
        let timeout = ctx.config.dim_timeout_for(source);
        if let Err(e) = ctx.display.idle_set_timeout(client, timeout) {
            Log::log_warning(&format!("Cannot re-arm idle timeout: {:#}.", e));
        }
    }

    fn inhibit_changed(&self, ctx: &mut Context, inhibited: bool) {
        let Some(client) = self.client else { return };
        let result = if inhibited {
            Log::log_debug("Pausing idle detection.");
            ctx.display.idle_stop(client)
        } else {
            Log::log_debug("Resuming idle detection.");
            ctx.display.idle_start(client)
        };
        if let Err(e) = result {
            Log::log_warning(&format!("Cannot toggle idle detection: {:#}.", e));
        }
    }
}

impl Default for Dimmer {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Dimmer {
    fn id(&self) -> ModuleId {
        ModuleId::Dimmer
    }

    fn evaluate(&self, ctx: &Context) -> bool {
        // Wait for the power source to be known so the right idle timeout is
        // armed from the start.
        !ctx.config.dimmer_disabled() && ctx.state.power_source.is_some()
    }

    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        let Some(source) = ctx.state.power_source else {
            bail!("power source unknown");
        };
        let timeout = ctx.config.dim_timeout_for(source);
        let client = ctx
            .display
            .idle_subscribe(timeout)
            .context("cannot initialize idle detection")?;
        self.client = Some(client);

        ctx.subscribe(MessageKind::PowerSourceUpdate);
        ctx.subscribe(MessageKind::InhibitUpdate);
        ctx.subscribe(MessageKind::DimTimeoutRequest);
        Ok(())
    }

    fn signal(&mut self, ctx: &mut Context, sig: &ServiceSignal) {
        let ServiceSignal::Idle(idle) = sig else {
            return;
        };
        // The subscription is stopped while inhibited; drop any straggler
        // events that were already in flight.
        if ctx.state.inhibited {
            return;
        }

        let old = ctx.state.display;
        if *idle {
            ctx.state.display.insert(DisplayFlags::DIMMED);
            Log::log_debug("Entering dimmed state.");
            self.pre_dim_pct = Some(ctx.state.backlight_pct);
            let target = ctx.config.dim_target_pct();
            self.dim_backlight(ctx, target);
        } else if let Some(pct) = self.pre_dim_pct {
            ctx.state.display.remove(DisplayFlags::DIMMED);
            Log::log_debug("Leaving dimmed state.");
            self.restore_backlight(ctx, pct);
        } else {
            // Never dimmed, nothing to restore.
            return;
        }

        let new = ctx.state.display;
        ctx.publish(Message::DisplayUpdate(DisplayChange { old, new }));
    }

    fn receive(&mut self, ctx: &mut Context, env: &Envelope) {
        match &env.message {
            Message::PowerSourceUpdate(_) => self.rearm_timeout(ctx),
            Message::DimTimeoutRequest(req) => {
                ctx.config.set_dim_timeout_for(req.source, req.timeout_secs);
                if Some(req.source) == ctx.state.power_source {
                    self.rearm_timeout(ctx);
                }
            }
            Message::InhibitUpdate { inhibited } => self.inhibit_changed(ctx, *inhibited),
            _ => {}
        }
    }

    fn destroy(&mut self, ctx: &mut Context) {
        if let Some(client) = self.client.take() {
            let _ = ctx.display.idle_stop(client);
            ctx.display.idle_release(client);
        }
    }
}
