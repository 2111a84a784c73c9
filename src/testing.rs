//! In-memory fakes for the external service traits.
//!
//! Compiled for unit tests and, behind the `testing-support` feature, for the
//! integration test suite. Each fake shares its state through an
//! `Rc<RefCell<..>>` handle so a test can steer the service and inspect the
//! calls a module made while the boxed half lives inside the dispatch
//! context. Single-threaded dispatch makes `Rc` sufficient.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Result, bail};

use crate::services::{DisplayService, IdleClient, PowerService};

// ═══ Power service fake ═══

#[derive(Debug, Default)]
pub struct FakePowerState {
    /// Value returned by `on_battery`; `None` means the service is
    /// unavailable and queries fail.
    pub on_battery: Option<bool>,
    pub fail_watch: bool,
    pub watching: bool,
    pub queries: u32,
}

pub struct FakePower {
    state: Rc<RefCell<FakePowerState>>,
}

impl FakePower {
    pub fn new(on_battery: bool) -> (Self, Rc<RefCell<FakePowerState>>) {
        let state = Rc::new(RefCell::new(FakePowerState {
            on_battery: Some(on_battery),
            ..Default::default()
        }));
        (Self { state: state.clone() }, state)
    }

    /// A power service whose queries always fail.
    pub fn unavailable() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakePowerState::default())),
        }
    }

    pub fn unavailable_with_handle() -> (Self, Rc<RefCell<FakePowerState>>) {
        let state = Rc::new(RefCell::new(FakePowerState::default()));
        (Self { state: state.clone() }, state)
    }
}

impl PowerService for FakePower {
    fn on_battery(&mut self) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.queries += 1;
        match state.on_battery {
            Some(value) => Ok(value),
            None => bail!("power service unavailable"),
        }
    }

    fn watch_properties(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_watch {
            bail!("cannot register properties match");
        }
        state.watching = true;
        Ok(())
    }

    fn unwatch_properties(&mut self) {
        self.state.borrow_mut().watching = false;
    }
}

// ═══ Display service fake ═══

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureCall {
    pub display: String,
    pub token: String,
    pub temp: u32,
    pub smooth: bool,
    pub step: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacklightCall {
    pub target_pct: f64,
    pub smooth: bool,
    pub step: f64,
    pub timeout_ms: u64,
}

#[derive(Debug)]
pub struct FakeDisplayState {
    pub temperature_calls: Vec<TemperatureCall>,
    pub backlight_calls: Vec<BacklightCall>,
    /// Acknowledgment returned for temperature commands.
    pub ack_temperature: bool,
    pub ack_backlight: bool,
    /// Make temperature commands fail outright instead of being rejected.
    pub fail_temperature: bool,
    pub fail_backlight: bool,
    pub fail_idle_subscribe: bool,
    pub idle_timeout: Option<u64>,
    pub idle_running: bool,
    pub idle_released: bool,
    next_client: u32,
}

impl Default for FakeDisplayState {
    fn default() -> Self {
        Self {
            temperature_calls: Vec::new(),
            backlight_calls: Vec::new(),
            ack_temperature: true,
            ack_backlight: true,
            fail_temperature: false,
            fail_backlight: false,
            fail_idle_subscribe: false,
            idle_timeout: None,
            idle_running: false,
            idle_released: false,
            next_client: 1,
        }
    }
}

pub struct FakeDisplay {
    state: Rc<RefCell<FakeDisplayState>>,
}

impl FakeDisplay {
    pub fn new() -> (Self, Rc<RefCell<FakeDisplayState>>) {
        let state = Rc::new(RefCell::new(FakeDisplayState::default()));
        (Self { state: state.clone() }, state)
    }
}

impl DisplayService for FakeDisplay {
    fn set_temperature(
        &mut self,
        display: &str,
        token: &str,
        temp: u32,
        smooth: bool,
        step: u32,
        timeout_ms: u64,
    ) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.fail_temperature {
            bail!("display service unreachable");
        }
        state.temperature_calls.push(TemperatureCall {
            display: display.to_string(),
            token: token.to_string(),
            temp,
            smooth,
            step,
            timeout_ms,
        });
        Ok(state.ack_temperature)
    }

    fn set_backlight(
        &mut self,
        target_pct: f64,
        smooth: bool,
        step: f64,
        timeout_ms: u64,
    ) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.fail_backlight {
            bail!("display service unreachable");
        }
        state.backlight_calls.push(BacklightCall {
            target_pct,
            smooth,
            step,
            timeout_ms,
        });
        Ok(state.ack_backlight)
    }

    fn idle_subscribe(&mut self, timeout_secs: u64) -> Result<IdleClient> {
        let mut state = self.state.borrow_mut();
        if state.fail_idle_subscribe {
            bail!("idle detection unavailable");
        }
        state.idle_timeout = Some(timeout_secs);
        state.idle_running = true;
        state.idle_released = false;
        let id = state.next_client;
        state.next_client += 1;
        Ok(IdleClient(id))
    }

    fn idle_set_timeout(&mut self, _client: IdleClient, timeout_secs: u64) -> Result<()> {
        self.state.borrow_mut().idle_timeout = Some(timeout_secs);
        Ok(())
    }

    fn idle_start(&mut self, _client: IdleClient) -> Result<()> {
        self.state.borrow_mut().idle_running = true;
        Ok(())
    }

    fn idle_stop(&mut self, _client: IdleClient) -> Result<()> {
        self.state.borrow_mut().idle_running = false;
        Ok(())
    }

    fn idle_release(&mut self, _client: IdleClient) {
        let mut state = self.state.borrow_mut();
        state.idle_running = false;
        state.idle_released = true;
    }
}
