//! Property-style coverage for the idle/dim controller: dimming never raises
//! the backlight, and restoring always returns to the recorded level.

use proptest::prelude::*;

use lumend::module::{Context, Registry};
use lumend::modules::Dimmer;
use lumend::testing::{FakeDisplay, FakePower};
use lumend::{Config, Log, PowerSource, ServiceSignal, SharedState};

fn dimmer_registry(
    backlight_pct: f64,
    dim_pct: f64,
) -> (Registry, std::rc::Rc<std::cell::RefCell<lumend::testing::FakeDisplayState>>) {
    Log::set_enabled(false);

    let mut config = Config::for_tests();
    config.dim_pct = Some(dim_pct);

    let mut state = SharedState::new();
    state.power_source = Some(PowerSource::Ac);
    state.backlight_pct = backlight_pct;

    let (display, display_state) = FakeDisplay::new();
    let ctx = Context::new(
        config,
        state,
        Box::new(FakePower::new(false).0),
        Box::new(display),
    );

    let mut registry = Registry::new(ctx);
    registry.register(Box::new(Dimmer::new()));
    registry.start();
    (registry, display_state)
}

proptest! {
    #[test]
    fn dimming_never_raises_backlight(
        backlight_pct in 0.0f64..=1.0,
        dim_pct in 0.0f64..=1.0,
    ) {
        let (mut registry, display) = dimmer_registry(backlight_pct, dim_pct);

        registry.signal(ServiceSignal::Idle(true));

        // Whatever happened, no backlight command asked for a level above
        // the pre-dim one.
        for call in &display.borrow().backlight_calls {
            prop_assert!(call.target_pct <= backlight_pct);
        }
    }

    #[test]
    fn restore_returns_to_recorded_level(
        backlight_pct in 0.0f64..=1.0,
        dim_pct in 0.0f64..=1.0,
    ) {
        let (mut registry, display) = dimmer_registry(backlight_pct, dim_pct);

        registry.signal(ServiceSignal::Idle(true));
        registry.signal(ServiceSignal::Idle(false));

        let display = display.borrow();
        let restore = display.backlight_calls.last().unwrap();
        prop_assert_eq!(restore.target_pct, backlight_pct);
    }
}
