//! Power-source tracker.
//!
//! Owns the `power_source` field of shared state. The external service's
//! properties-changed signal fires for several unrelated properties, so the
//! tracker re-reads the authoritative value on every arrival and only acts
//! when it actually changed. Changes are routed through a self-addressed
//! request so they take the same path as any other bus-driven state change.

use anyhow::{Context as _, Result};

use crate::bus::{Envelope, Message, MessageKind, PowerChange};
use crate::logger::Log;
use crate::module::{Context, Module, ModuleId};
use crate::services::ServiceSignal;
use crate::state::PowerSource;

pub struct PowerSourceTracker;

impl PowerSourceTracker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PowerSourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for PowerSourceTracker {
    fn id(&self) -> ModuleId {
        ModuleId::PowerSource
    }

    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        match ctx.power.on_battery() {
            Ok(on_battery) => {
                let source = if on_battery {
                    PowerSource::Battery
                } else {
                    PowerSource::Ac
                };
                ctx.state.power_source = Some(source);
                Log::log_info(&format!("Initial power source: {}.", source.as_str()));
            }
            Err(_) if ctx.state.power_source.is_none() => {
                // Fail open: without a power service the safest assumption is
                // wall power.
                ctx.state.power_source = Some(PowerSource::Ac);
                Log::log_info("Failed to read power state; assuming AC power.");
            }
            Err(_) => {}
        }

        ctx.power
            .watch_properties()
            .context("cannot subscribe to power service property changes")?;
        ctx.subscribe(MessageKind::PowerSourceRequest);
        Ok(())
    }

    fn signal(&mut self, ctx: &mut Context, sig: &ServiceSignal) {
        if *sig != ServiceSignal::PowerPropertiesChanged {
            return;
        }

        // The signal payload is not trusted; re-read the property and diff
        // against the stored value. A failed read aborts this cycle and the
        // next signal retries naturally.
        let old = ctx.state.power_source;
        if let Ok(on_battery) = ctx.power.on_battery() {
            let new = if on_battery {
                PowerSource::Battery
            } else {
                PowerSource::Ac
            };
            if old != Some(new) {
                ctx.publish(Message::PowerSourceRequest(PowerChange { old, new }));
            }
        }
    }

    fn receive(&mut self, ctx: &mut Context, env: &Envelope) {
        if let Message::PowerSourceRequest(up) = &env.message {
            ctx.state.power_source = Some(up.new);
            Log::log_info(&format!(
                "AC cable {}.",
                if up.new == PowerSource::Ac {
                    "connected"
                } else {
                    "disconnected"
                }
            ));
            ctx.publish(Message::PowerSourceUpdate(PowerChange {
                old: up.old,
                new: up.new,
            }));
        }
    }

    fn destroy(&mut self, ctx: &mut Context) {
        ctx.power.unwatch_properties();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::module::{ModuleState, Registry};
    use crate::state::SharedState;
    use crate::testing::{FakeDisplay, FakePower};

    fn registry_with_power(power: FakePower) -> Registry {
        let ctx = Context::new(
            Config::for_tests(),
            SharedState::new(),
            Box::new(power),
            Box::new(FakeDisplay::new().0),
        );
        let mut registry = Registry::new(ctx);
        registry.register(Box::new(PowerSourceTracker::new()));
        registry
    }

    #[test]
    fn test_initial_query_records_source() {
        let (power, _handle) = FakePower::new(true);
        let mut registry = registry_with_power(power);
        registry.start();

        assert_eq!(registry.ctx.state.power_source, Some(PowerSource::Battery));
        assert_eq!(
            registry.module_state(ModuleId::PowerSource),
            Some(ModuleState::Running)
        );
    }

    #[test]
    fn test_unavailable_service_falls_back_to_ac() {
        let (power, handle) = FakePower::unavailable_with_handle();
        // The watch itself works; only the property read fails.
        handle.borrow_mut().fail_watch = false;
        let mut registry = registry_with_power(power);
        registry.start();

        assert_eq!(registry.ctx.state.power_source, Some(PowerSource::Ac));
        assert_eq!(
            registry.module_state(ModuleId::PowerSource),
            Some(ModuleState::Running)
        );
    }

    #[test]
    fn test_failed_watch_is_fatal() {
        let (power, handle) = FakePower::new(false);
        handle.borrow_mut().fail_watch = true;
        let mut registry = registry_with_power(power);
        registry.start();

        assert_eq!(
            registry.module_state(ModuleId::PowerSource),
            Some(ModuleState::Stopped)
        );
    }

    #[test]
    fn test_unchanged_signal_publishes_nothing() {
        let (power, handle) = FakePower::new(false);
        let mut registry = registry_with_power(power);
        registry.start();
        let queries_before = handle.borrow().queries;

        registry.signal(ServiceSignal::PowerPropertiesChanged);

        // The property was re-read but nothing changed, so no traffic.
        assert!(handle.borrow().queries > queries_before);
        assert_eq!(registry.ctx.state.power_source, Some(PowerSource::Ac));
    }

    #[test]
    fn test_changed_signal_flips_state() {
        let (power, handle) = FakePower::new(false);
        let mut registry = registry_with_power(power);
        registry.start();

        handle.borrow_mut().on_battery = Some(true);
        registry.signal(ServiceSignal::PowerPropertiesChanged);

        assert_eq!(registry.ctx.state.power_source, Some(PowerSource::Battery));
    }

    #[test]
    fn test_destroy_releases_watch() {
        let (power, handle) = FakePower::new(false);
        let mut registry = registry_with_power(power);
        registry.start();
        assert!(handle.borrow().watching);

        registry.shutdown();
        assert!(!handle.borrow().watching);
    }
}
