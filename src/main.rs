//! Daemon bootstrap: CLI, single-instance lock, service construction, module
//! registration and the event loop.

use anyhow::{Context as _, Result};
use clap::Parser;
use fs2::FileExt;
use signal_hook::{
    consts::signal::{SIGINT, SIGTERM, SIGUSR1},
    iterator::Signals,
};
use std::{
    fs::File,
    path::Path,
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

mod args;

use args::Args;
use lumend::constants::{
    EXIT_FAILURE, LOCK_FILE_NAME, POWER_POLL_INTERVAL_SECS, TICK_INTERVAL_SECS,
};
use lumend::module::{Context, Registry};
use lumend::modules::{DayPhaseSource, Dimmer, NightLight, PowerSourceTracker};
use lumend::services::ServiceSignal;
use lumend::services::display::SocketDisplay;
use lumend::services::power::SysfsPower;
use lumend::{Config, Log, Message, SharedState};

fn main() {
    let args = Args::parse();
    Log::set_debug(args.debug);
    Log::log_version();

    if let Err(e) = run(&args) {
        Log::log_error(&format!("{:#}", e));
        Log::log_end();
        std::process::exit(EXIT_FAILURE);
    }
    Log::log_end();
}

fn run(args: &Args) -> Result<()> {
    // Held for the lifetime of the process; dropping it releases the lock.
    let _lock = acquire_instance_lock()?;

    let config = Config::load(args.config.as_deref())?;

    let mut state = SharedState::new();
    state.display_name = std::env::var("WAYLAND_DISPLAY")
        .or_else(|_| std::env::var("DISPLAY"))
        .ok();
    state.session_token = std::env::var("XDG_SESSION_ID").ok();

    let power = SysfsPower::new();
    let display = SocketDisplay::new()?;
    let ctx = Context::new(config, state, Box::new(power), Box::new(display));

    let mut registry = Registry::new(ctx);
    registry.register(Box::new(PowerSourceTracker::new()));
    registry.register(Box::new(DayPhaseSource::new()));
    registry.register(Box::new(NightLight::new()));
    registry.register(Box::new(Dimmer::new()));
    registry.start();

    run_event_loop(&mut registry)?;

    registry.shutdown();
    Ok(())
}

/// Take the single-instance lock under the user runtime directory.
fn acquire_instance_lock() -> Result<File> {
    let dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
    let path = Path::new(&dir).join(LOCK_FILE_NAME);
    let file =
        File::create(&path).with_context(|| format!("cannot create lock file {:?}", path))?;
    file.try_lock_exclusive()
        .context("another lumend instance is already running")?;
    Ok(file)
}

/// The single-threaded event loop: multiplexes the clock tick, the power
/// properties poll, display service events and OS signals into the
/// dispatcher. SIGUSR1 toggles dim inhibition.
fn run_event_loop(registry: &mut Registry) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let (inhibit_tx, inhibit_rx) = mpsc::channel::<()>();

    let mut signals =
        Signals::new([SIGTERM, SIGINT, SIGUSR1]).context("cannot install signal handlers")?;
    {
        let running = running.clone();
        thread::spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGTERM | SIGINT => {
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    SIGUSR1 => {
                        let _ = inhibit_tx.send(());
                    }
                    _ => {}
                }
            }
        });
    }

    let tick = Duration::from_secs(TICK_INTERVAL_SECS);
    let power_poll = Duration::from_secs(POWER_POLL_INTERVAL_SECS);
    let mut last_power_poll = Instant::now();

    while running.load(Ordering::SeqCst) {
        thread::sleep(tick);

        registry.signal(ServiceSignal::Tick);

        if last_power_poll.elapsed() >= power_poll {
            last_power_poll = Instant::now();
            registry.signal(ServiceSignal::PowerPropertiesChanged);
        }

        let events = registry.ctx.display.poll_events();
        for event in events {
            registry.signal(event);
        }

        while inhibit_rx.try_recv().is_ok() {
            let inhibited = !registry.ctx.state.inhibited;
            Log::log_block_start(&format!(
                "Dim inhibition {} via signal.",
                if inhibited { "enabled" } else { "disabled" }
            ));
            registry.publish_external(Message::InhibitUpdate { inhibited });
        }
    }

    Log::log_block_start("Shutting down.");
    Ok(())
}
