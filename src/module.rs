//! Module lifecycle controller and dispatch.
//!
//! Every control loop in the daemon is a [`Module`]: an independently
//! activatable unit with capability predicates, an initializer that wires up
//! subscriptions and external resources, a bus-message handler and an
//! external-signal handler. The [`Registry`] owns the modules, the bus and
//! the [`Context`], and drives everything from a single thread: handlers run
//! to completion, publications made inside a handler are deferred until it
//! returns, and shared-state fields are only ever written by their owner.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --check() false--> Stopped            (permanent)
//! Uninitialized --check() true---> Idle
//! Idle --evaluate() false--> Idle                     (retried later)
//! Idle --evaluate() true---> init() --Ok--> Running
//!                            init() --Err-> Stopped   (poison pill)
//! Running <-> Paused                                  (still listening)
//! Running --Context::poison()--> Stopped              (permanent)
//! ```
//!
//! `Stopped` is terminal: a stopped module never receives another message or
//! signal, and never re-initializes.

use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Local};

use crate::bus::{Bus, Envelope, Message, MessageKind, Sender};
use crate::config::Config;
use crate::logger::Log;
use crate::services::{DisplayService, PowerService, ServiceSignal};
use crate::state::SharedState;

/// Identity tags for every registerable module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    PowerSource,
    DayPhase,
    NightLight,
    Dimmer,
}

impl ModuleId {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleId::PowerSource => "POWER_SOURCE",
            ModuleId::DayPhase => "DAY_PHASE",
            ModuleId::NightLight => "NIGHT_LIGHT",
            ModuleId::Dimmer => "DIMMER",
        }
    }
}

/// Lifecycle states. `Stopped` is terminal and irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Uninitialized,
    Idle,
    Running,
    Paused,
    Stopped,
}

/// An independently activatable control unit.
///
/// Implementations keep their internal sub-state as explicit enum fields and
/// match on them in `receive`; the registry never inspects module internals.
pub trait Module {
    fn id(&self) -> ModuleId;

    /// Static precondition, evaluated exactly once before activation and
    /// without side effects. Failing it removes the module permanently.
    fn check(&self, _ctx: &Context) -> bool {
        true
    }

    /// Dynamic precondition, re-evaluated whenever surrounding state may have
    /// changed. Failing it leaves the module inactive but eligible to retry.
    fn evaluate(&self, _ctx: &Context) -> bool {
        true
    }

    /// Perform subscriptions and external-service setup. An error is a poison
    /// pill: the module goes straight to `Stopped` and stops consuming bus
    /// messages.
    fn init(&mut self, ctx: &mut Context) -> Result<()>;

    /// Bus message entry point.
    fn receive(&mut self, _ctx: &mut Context, _env: &Envelope) {}

    /// External-service callback entry point.
    fn signal(&mut self, _ctx: &mut Context, _sig: &ServiceSignal) {}

    /// Release external resources. Must be idempotent and safe to call on a
    /// module that never fully initialized.
    fn destroy(&mut self, _ctx: &mut Context) {}

    /// Weak lookup-by-name reference to another module whose terminal state
    /// matters to this one.
    fn dependency(&self) -> Option<ModuleId> {
        None
    }
}

/// Everything a module handler may touch, passed by reference into every
/// module operation.
pub struct Context {
    pub config: Config,
    pub state: SharedState,
    pub power: Box<dyn PowerService>,
    pub display: Box<dyn DisplayService>,

    lifecycle: Vec<(ModuleId, ModuleState)>,
    outbox: VecDeque<Envelope>,
    pending_subscriptions: Vec<MessageKind>,
    current: Option<ModuleId>,
    poisoned: bool,
    #[cfg(any(test, feature = "testing-support"))]
    frozen_now: Option<DateTime<Local>>,
}

impl Context {
    pub fn new(
        config: Config,
        state: SharedState,
        power: Box<dyn PowerService>,
        display: Box<dyn DisplayService>,
    ) -> Self {
        Self {
            config,
            state,
            power,
            display,
            lifecycle: Vec::new(),
            outbox: VecDeque::new(),
            pending_subscriptions: Vec::new(),
            current: None,
            poisoned: false,
            #[cfg(any(test, feature = "testing-support"))]
            frozen_now: None,
        }
    }

    /// Current wall-clock time. Tests can freeze it via `set_now`.
    pub fn now(&self) -> DateTime<Local> {
        #[cfg(any(test, feature = "testing-support"))]
        if let Some(frozen) = self.frozen_now {
            return frozen;
        }
        Local::now()
    }

    #[cfg(any(test, feature = "testing-support"))]
    pub fn set_now(&mut self, now: DateTime<Local>) {
        self.frozen_now = Some(now);
    }

    /// Subscribe the module currently being dispatched to a message kind.
    pub fn subscribe(&mut self, kind: MessageKind) {
        self.pending_subscriptions.push(kind);
    }

    /// Publish a message on behalf of the module currently being dispatched.
    /// Delivery happens after the current handler returns.
    pub fn publish(&mut self, message: Message) {
        let sender = match self.current {
            Some(id) => Sender::Module(id),
            None => Sender::External,
        };
        self.outbox.push_back(Envelope { sender, message });
    }

    /// Poison pill: permanently stop the module currently being dispatched
    /// once its handler returns.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Lifecycle state of another module, for weak dependency checks.
    pub fn module_state(&self, id: ModuleId) -> Option<ModuleState> {
        self.lifecycle
            .iter()
            .find(|(m, _)| *m == id)
            .map(|(_, s)| *s)
    }

    fn take_outbox(&mut self) -> VecDeque<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    fn take_subscriptions(&mut self) -> Vec<MessageKind> {
        std::mem::take(&mut self.pending_subscriptions)
    }

    fn take_poison(&mut self) -> bool {
        std::mem::replace(&mut self.poisoned, false)
    }

    fn set_module_state(&mut self, id: ModuleId, state: ModuleState) {
        match self.lifecycle.iter_mut().find(|(m, _)| *m == id) {
            Some(entry) => entry.1 = state,
            None => self.lifecycle.push((id, state)),
        }
    }
}

struct Slot {
    module: Box<dyn Module>,
    state: ModuleState,
}

/// The module lifecycle controller: an ordered collection of modules plus
/// the bus and the shared context.
pub struct Registry {
    slots: Vec<Slot>,
    bus: Bus,
    pub ctx: Context,
    /// Every envelope dispatched, oldest first. Test builds only.
    #[cfg(any(test, feature = "testing-support"))]
    pub history: Vec<Envelope>,
}

impl Registry {
    pub fn new(ctx: Context) -> Self {
        Self {
            slots: Vec::new(),
            bus: Bus::new(),
            ctx,
            #[cfg(any(test, feature = "testing-support"))]
            history: Vec::new(),
        }
    }

    /// Register a module. Registration order is subscription and dispatch
    /// order. Duplicate identities are rejected.
    pub fn register(&mut self, module: Box<dyn Module>) {
        let id = module.id();
        if self.slot_index(id).is_some() {
            Log::log_warning(&format!("Module {} registered twice; ignoring.", id.name()));
            return;
        }
        self.ctx.set_module_state(id, ModuleState::Uninitialized);
        self.slots.push(Slot {
            module,
            state: ModuleState::Uninitialized,
        });
    }

    /// Run capability checks and bring up every eligible module, then drain
    /// whatever their initializers published.
    pub fn start(&mut self) {
        for i in 0..self.slots.len() {
            let id = self.slots[i].module.id();
            if self.slots[i].state != ModuleState::Uninitialized {
                continue;
            }
            // check() is consulted exactly once; failing it removes the
            // module from the run set permanently.
            if self.slots[i].module.check(&self.ctx) {
                self.set_state(i, ModuleState::Idle);
            } else {
                Log::log_debug(&format!("Module {} not supported here.", id.name()));
                self.set_state(i, ModuleState::Stopped);
            }
        }
        self.reevaluate();
    }

    /// Retry `evaluate` on inactive modules until no further module comes up.
    /// Messages published during a pass are delivered after the whole pass so
    /// activation order within a pass cannot lose publications.
    pub fn reevaluate(&mut self) {
        loop {
            let mut progressed = false;
            for i in 0..self.slots.len() {
                if self.slots[i].state != ModuleState::Idle {
                    continue;
                }
                if self.slots[i].module.evaluate(&self.ctx) {
                    self.activate(i);
                    progressed = true;
                }
            }
            self.drain();
            if !progressed {
                break;
            }
        }
    }

    /// Deliver an external-service event to every running module, then
    /// dispatch whatever it produced.
    pub fn signal(&mut self, sig: ServiceSignal) {
        for i in 0..self.slots.len() {
            if self.slots[i].state != ModuleState::Running {
                continue;
            }
            self.ctx.current = Some(self.slots[i].module.id());
            self.slots[i].module.signal(&mut self.ctx, &sig);
            self.finish_call(i);
        }
        self.drain();
        self.reevaluate();
    }

    /// Publish a message on behalf of an external collaborator. Fields of
    /// shared state owned by external collaborators are applied here, which
    /// keeps the single-writer rule intact.
    pub fn publish_external(&mut self, message: Message) {
        match &message {
            Message::BacklightUpdate(up) => self.ctx.state.backlight_pct = up.new,
            Message::InhibitUpdate { inhibited } => self.ctx.state.inhibited = *inhibited,
            _ => {}
        }
        self.bus.publish(Envelope {
            sender: Sender::External,
            message,
        });
        self.drain();
        self.reevaluate();
    }

    /// Suspend dispatch of external signals to a module. It keeps listening
    /// to bus messages.
    pub fn pause(&mut self, id: ModuleId) {
        if let Some(i) = self.slot_index(id) {
            if self.slots[i].state == ModuleState::Running {
                self.set_state(i, ModuleState::Paused);
            }
        }
    }

    pub fn resume(&mut self, id: ModuleId) {
        if let Some(i) = self.slot_index(id) {
            if self.slots[i].state == ModuleState::Paused {
                self.set_state(i, ModuleState::Running);
            }
        }
    }

    pub fn module_state(&self, id: ModuleId) -> Option<ModuleState> {
        self.slot_index(id).map(|i| self.slots[i].state)
    }

    /// Destroy every module in reverse registration order. Safe to call on
    /// modules that never initialized.
    pub fn shutdown(&mut self) {
        for i in (0..self.slots.len()).rev() {
            let id = self.slots[i].module.id();
            self.ctx.current = Some(id);
            self.slots[i].module.destroy(&mut self.ctx);
            self.ctx.current = None;
            // A destructor must not publish or subscribe.
            self.ctx.take_outbox();
            self.ctx.take_subscriptions();
            self.ctx.take_poison();
            self.bus.unsubscribe_all(id);
            self.set_state(i, ModuleState::Stopped);
            Log::log_debug(&format!("Module {} destroyed.", id.name()));
        }
    }

    fn slot_index(&self, id: ModuleId) -> Option<usize> {
        self.slots.iter().position(|s| s.module.id() == id)
    }

    fn set_state(&mut self, i: usize, state: ModuleState) {
        self.slots[i].state = state;
        let id = self.slots[i].module.id();
        self.ctx.set_module_state(id, state);
    }

    fn activate(&mut self, i: usize) {
        let id = self.slots[i].module.id();
        self.ctx.current = Some(id);
        let result = self.slots[i].module.init(&mut self.ctx);
        self.ctx.current = None;

        let poisoned = self.ctx.take_poison();
        match result {
            Ok(()) if !poisoned => {
                for kind in self.ctx.take_subscriptions() {
                    self.bus.subscribe(id, kind);
                }
                for env in self.ctx.take_outbox() {
                    self.bus.publish(env);
                }
                self.set_state(i, ModuleState::Running);
                Log::log_debug(&format!("Module {} started.", id.name()));
            }
            result => {
                // Poison pill: drop whatever the failed initializer tried to
                // register or publish and stop the module for good.
                self.ctx.take_subscriptions();
                self.ctx.take_outbox();
                self.bus.unsubscribe_all(id);
                self.set_state(i, ModuleState::Stopped);
                match result {
                    Err(e) => Log::log_warning(&format!("Module {} failed to init: {:#}.", id.name(), e)),
                    Ok(()) => Log::log_warning(&format!("Module {} stopped during init.", id.name())),
                }
                self.warn_dependents(id);
            }
        }
    }

    /// Surface modules whose declared dependency just reached its terminal
    /// state; they decide for themselves what to do about it.
    fn warn_dependents(&self, stopped: ModuleId) {
        for slot in &self.slots {
            if slot.module.dependency() == Some(stopped) && slot.state != ModuleState::Stopped {
                Log::log_debug(&format!(
                    "Module {} depends on stopped module {}.",
                    slot.module.id().name(),
                    stopped.name()
                ));
            }
        }
    }

    /// Bookkeeping after any receive/signal handler: collect subscriptions
    /// and deferred publications, then apply a poison pill if one was taken.
    fn finish_call(&mut self, i: usize) {
        self.ctx.current = None;
        let id = self.slots[i].module.id();
        for kind in self.ctx.take_subscriptions() {
            self.bus.subscribe(id, kind);
        }
        for env in self.ctx.take_outbox() {
            self.bus.publish(env);
        }
        if self.ctx.take_poison() {
            Log::log_warning(&format!("Module {} stopped (poison pill).", id.name()));
            self.set_state(i, ModuleState::Stopped);
            self.warn_dependents(id);
        }
    }

    /// Breadth-first fan-out: deliver each queued message to its subscribers
    /// in subscription order; handler publications land behind the queue.
    fn drain(&mut self) {
        while let Some(env) = self.bus.pop() {
            #[cfg(any(test, feature = "testing-support"))]
            self.history.push(env.clone());
            let kind = env.message.kind();
            for id in self.bus.subscribers(kind) {
                let Some(i) = self.slot_index(id) else {
                    continue;
                };
                match self.slots[i].state {
                    ModuleState::Running | ModuleState::Paused => {}
                    _ => continue,
                }
                self.ctx.current = Some(id);
                self.slots[i].module.receive(&mut self.ctx, &env);
                self.finish_call(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BacklightChange, Classification};
    use crate::config::Config;
    use crate::state::SharedState;
    use crate::testing::{FakeDisplay, FakePower};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Scriptable module for exercising the lifecycle contract.
    struct Probe {
        id: ModuleId,
        check_ok: bool,
        evaluate_ok: Rc<RefCell<bool>>,
        fail_init: bool,
        poison_on_receive: bool,
        subscriptions: Vec<MessageKind>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Probe {
        fn new(id: ModuleId, log: Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                id,
                check_ok: true,
                evaluate_ok: Rc::new(RefCell::new(true)),
                fail_init: false,
                poison_on_receive: false,
                subscriptions: vec![MessageKind::InhibitUpdate],
                log,
            }
        }
    }

    impl Module for Probe {
        fn id(&self) -> ModuleId {
            self.id
        }

        fn check(&self, _ctx: &Context) -> bool {
            self.check_ok
        }

        fn evaluate(&self, _ctx: &Context) -> bool {
            *self.evaluate_ok.borrow()
        }

        fn init(&mut self, ctx: &mut Context) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:init", self.id.name()));
            for kind in &self.subscriptions {
                ctx.subscribe(*kind);
            }
            if self.fail_init {
                anyhow::bail!("synthetic init failure");
            }
            Ok(())
        }

        fn receive(&mut self, ctx: &mut Context, env: &Envelope) {
            self.log
                .borrow_mut()
                .push(format!("{}:recv:{:?}", self.id.name(), env.message.kind()));
            if self.poison_on_receive {
                ctx.poison();
            }
        }
    }

    fn test_registry() -> (Registry, Rc<RefCell<Vec<String>>>) {
        let ctx = Context::new(
            Config::for_tests(),
            SharedState::new(),
            Box::new(FakePower::unavailable()),
            Box::new(FakeDisplay::new().0),
        );
        (Registry::new(ctx), Rc::new(RefCell::new(Vec::new())))
    }

    fn inhibit(inhibited: bool) -> Message {
        Message::InhibitUpdate { inhibited }
    }

    #[test]
    fn test_failed_check_means_no_init_and_no_messages() {
        let (mut registry, log) = test_registry();
        let mut probe = Probe::new(ModuleId::Dimmer, log.clone());
        probe.check_ok = false;
        registry.register(Box::new(probe));

        registry.start();
        registry.publish_external(inhibit(true));

        assert_eq!(registry.module_state(ModuleId::Dimmer), Some(ModuleState::Stopped));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_failed_evaluate_retries_on_reevaluation() {
        let (mut registry, log) = test_registry();
        let probe = Probe::new(ModuleId::Dimmer, log.clone());
        let gate = probe.evaluate_ok.clone();
        *gate.borrow_mut() = false;
        registry.register(Box::new(probe));

        registry.start();
        assert_eq!(registry.module_state(ModuleId::Dimmer), Some(ModuleState::Idle));
        assert!(log.borrow().is_empty());

        // Flip the dynamic precondition; the next event re-evaluates it.
        *gate.borrow_mut() = true;
        registry.signal(ServiceSignal::Tick);
        assert_eq!(registry.module_state(ModuleId::Dimmer), Some(ModuleState::Running));
        assert_eq!(log.borrow().as_slice(), ["DIMMER:init"]);
    }

    #[test]
    fn test_init_failure_is_a_poison_pill() {
        let (mut registry, log) = test_registry();
        let mut probe = Probe::new(ModuleId::Dimmer, log.clone());
        probe.fail_init = true;
        registry.register(Box::new(probe));

        registry.start();
        assert_eq!(registry.module_state(ModuleId::Dimmer), Some(ModuleState::Stopped));

        // Subscriptions from the failed init must not stick.
        registry.publish_external(inhibit(true));
        assert_eq!(log.borrow().as_slice(), ["DIMMER:init"]);
    }

    #[test]
    fn test_stopped_module_never_receives() {
        let (mut registry, log) = test_registry();
        let mut probe = Probe::new(ModuleId::Dimmer, log.clone());
        probe.poison_on_receive = true;
        registry.register(Box::new(probe));

        registry.start();
        registry.publish_external(inhibit(true));
        assert_eq!(registry.module_state(ModuleId::Dimmer), Some(ModuleState::Stopped));

        registry.publish_external(inhibit(false));
        registry.publish_external(inhibit(true));

        let log = log.borrow();
        let receives = log.iter().filter(|l| l.contains("recv")).count();
        assert_eq!(receives, 1);
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let (mut registry, log) = test_registry();
        registry.register(Box::new(Probe::new(ModuleId::NightLight, log.clone())));
        registry.register(Box::new(Probe::new(ModuleId::Dimmer, log.clone())));

        registry.start();
        log.borrow_mut().clear();
        registry.publish_external(inhibit(true));

        assert_eq!(
            log.borrow().as_slice(),
            ["NIGHT_LIGHT:recv:InhibitUpdate", "DIMMER:recv:InhibitUpdate"]
        );
    }

    #[test]
    fn test_paused_module_still_listens() {
        let (mut registry, log) = test_registry();
        registry.register(Box::new(Probe::new(ModuleId::Dimmer, log.clone())));

        registry.start();
        registry.pause(ModuleId::Dimmer);
        log.borrow_mut().clear();

        registry.publish_external(inhibit(true));
        assert_eq!(log.borrow().as_slice(), ["DIMMER:recv:InhibitUpdate"]);

        registry.resume(ModuleId::Dimmer);
        assert_eq!(registry.module_state(ModuleId::Dimmer), Some(ModuleState::Running));
    }

    #[test]
    fn test_external_publish_applies_externally_owned_fields() {
        let (mut registry, _log) = test_registry();
        registry.publish_external(Message::BacklightUpdate(BacklightChange {
            old: 1.0,
            new: 0.6,
        }));
        assert_eq!(registry.ctx.state.backlight_pct, 0.6);

        registry.publish_external(inhibit(true));
        assert!(registry.ctx.state.inhibited);
    }

    #[test]
    fn test_request_update_classification() {
        assert_eq!(inhibit(true).classification(), Classification::Update);
    }
}
