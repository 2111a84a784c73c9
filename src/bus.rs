//! Typed publish/subscribe message bus.
//!
//! Modules subscribe to message kinds; publishers broadcast to all current
//! subscribers synchronously, in subscription order. Messages are immutable
//! once published, delivery is at-most-once per subscriber per publish, and
//! nothing is replayed to late subscribers. Publications made from inside a
//! handler are queued behind the message being delivered (breadth-first
//! fan-out), so a handler always runs to completion before its own
//! publications are dispatched.

use std::collections::VecDeque;

use crate::module::ModuleId;
use crate::state::{DayEvent, DayPhase, DisplayFlags, PowerSource};

/// Identity of a message's publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Module(ModuleId),
    External,
}

/// Payload of power-source change traffic, both request and update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerChange {
    pub old: Option<PowerSource>,
    pub new: PowerSource,
}

/// Payload of a completed temperature change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureChange {
    pub old: u32,
    pub new: u32,
    pub smooth: bool,
    pub step: u32,
    pub timeout_ms: u64,
    pub day_phase: DayPhase,
}

/// Payload asking the color-temperature controller to change temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureRequest {
    pub new: u32,
    pub smooth: bool,
    pub step: u32,
    pub timeout_ms: u64,
    /// Which phase the requested temperature belongs to.
    pub day_phase: DayPhase,
}

/// Payload of a backlight level change reported by the backlight subsystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacklightChange {
    pub old: f64,
    pub new: f64,
}

/// Payload of a day-phase flip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayPhaseChange {
    pub old: DayPhase,
    pub new: DayPhase,
}

/// Payload of a change of the next day/night boundary event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayEventChange {
    pub old: DayEvent,
    pub new: DayEvent,
}

/// Payload of a display condition change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayChange {
    pub old: DisplayFlags,
    pub new: DisplayFlags,
}

/// Payload asking the idle/dim controller to change a per-source timeout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimTimeoutChange {
    pub source: PowerSource,
    pub timeout_secs: u64,
}

/// Every message kind carried by the bus, with its kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PowerSourceRequest(PowerChange),
    PowerSourceUpdate(PowerChange),
    TemperatureRequest(TemperatureRequest),
    TemperatureUpdate(TemperatureChange),
    BacklightUpdate(BacklightChange),
    DayPhaseUpdate(DayPhaseChange),
    NextDayEventUpdate(DayEventChange),
    DisplayUpdate(DisplayChange),
    DimTimeoutRequest(DimTimeoutChange),
    InhibitUpdate { inhibited: bool },
}

/// Subscription tag for each message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PowerSourceRequest,
    PowerSourceUpdate,
    TemperatureRequest,
    TemperatureUpdate,
    BacklightUpdate,
    DayPhaseUpdate,
    NextDayEventUpdate,
    DisplayUpdate,
    DimTimeoutRequest,
    InhibitUpdate,
}

/// Distinguishes fire-and-forget notifications from messages asking the
/// owning module to change its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Update,
    Request,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PowerSourceRequest(_) => MessageKind::PowerSourceRequest,
            Message::PowerSourceUpdate(_) => MessageKind::PowerSourceUpdate,
            Message::TemperatureRequest(_) => MessageKind::TemperatureRequest,
            Message::TemperatureUpdate(_) => MessageKind::TemperatureUpdate,
            Message::BacklightUpdate(_) => MessageKind::BacklightUpdate,
            Message::DayPhaseUpdate(_) => MessageKind::DayPhaseUpdate,
            Message::NextDayEventUpdate(_) => MessageKind::NextDayEventUpdate,
            Message::DisplayUpdate(_) => MessageKind::DisplayUpdate,
            Message::DimTimeoutRequest(_) => MessageKind::DimTimeoutRequest,
            Message::InhibitUpdate { .. } => MessageKind::InhibitUpdate,
        }
    }

    pub fn classification(&self) -> Classification {
        self.kind().classification()
    }
}

impl MessageKind {
    pub fn classification(&self) -> Classification {
        match self {
            MessageKind::PowerSourceRequest
            | MessageKind::TemperatureRequest
            | MessageKind::DimTimeoutRequest => Classification::Request,
            _ => Classification::Update,
        }
    }

    /// The only sender allowed to publish this kind, when there is exactly
    /// one. Update kinds have a single producer (the owner of the state they
    /// announce); request kinds may come from several callers.
    pub fn producer(&self) -> Option<Sender> {
        match self {
            MessageKind::PowerSourceUpdate => Some(Sender::Module(ModuleId::PowerSource)),
            MessageKind::TemperatureUpdate => Some(Sender::Module(ModuleId::NightLight)),
            MessageKind::DayPhaseUpdate | MessageKind::NextDayEventUpdate => {
                Some(Sender::Module(ModuleId::DayPhase))
            }
            MessageKind::DisplayUpdate => Some(Sender::Module(ModuleId::Dimmer)),
            MessageKind::BacklightUpdate | MessageKind::InhibitUpdate => Some(Sender::External),
            MessageKind::PowerSourceRequest
            | MessageKind::TemperatureRequest
            | MessageKind::DimTimeoutRequest => None,
        }
    }
}

/// A published message together with its publisher's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender: Sender,
    pub message: Message,
}

/// The bus itself: ordered subscriptions plus the pending delivery queue.
pub struct Bus {
    subscriptions: Vec<(ModuleId, MessageKind)>,
    queue: VecDeque<Envelope>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Register `module` for `kind`. Duplicate subscriptions are ignored so
    /// a module never receives the same publish twice.
    pub fn subscribe(&mut self, module: ModuleId, kind: MessageKind) {
        if !self.subscriptions.contains(&(module, kind)) {
            self.subscriptions.push((module, kind));
        }
    }

    /// Drop every subscription held by `module`.
    pub fn unsubscribe_all(&mut self, module: ModuleId) {
        self.subscriptions.retain(|(m, _)| *m != module);
    }

    /// Queue a message for delivery. Fan-out happens when the dispatcher
    /// pops the queue, which keeps in-handler publishes breadth-first.
    pub fn publish(&mut self, envelope: Envelope) {
        if cfg!(debug_assertions) {
            if let Some(expected) = envelope.message.kind().producer() {
                debug_assert_eq!(
                    envelope.sender,
                    expected,
                    "{:?} published by non-owner",
                    envelope.message.kind()
                );
            }
        }
        self.queue.push_back(envelope);
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        self.queue.pop_front()
    }

    /// Subscribers of `kind`, in subscription order.
    pub fn subscribers(&self, kind: MessageKind) -> Vec<ModuleId> {
        self.subscriptions
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(m, _)| *m)
            .collect()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power_update() -> Message {
        Message::PowerSourceUpdate(PowerChange {
            old: Some(PowerSource::Ac),
            new: PowerSource::Battery,
        })
    }

    #[test]
    fn test_subscribers_in_subscription_order() {
        let mut bus = Bus::new();
        bus.subscribe(ModuleId::Dimmer, MessageKind::PowerSourceUpdate);
        bus.subscribe(ModuleId::NightLight, MessageKind::PowerSourceUpdate);
        bus.subscribe(ModuleId::NightLight, MessageKind::BacklightUpdate);

        assert_eq!(
            bus.subscribers(MessageKind::PowerSourceUpdate),
            vec![ModuleId::Dimmer, ModuleId::NightLight]
        );
        assert_eq!(
            bus.subscribers(MessageKind::BacklightUpdate),
            vec![ModuleId::NightLight]
        );
    }

    #[test]
    fn test_duplicate_subscription_ignored() {
        let mut bus = Bus::new();
        bus.subscribe(ModuleId::Dimmer, MessageKind::InhibitUpdate);
        bus.subscribe(ModuleId::Dimmer, MessageKind::InhibitUpdate);
        assert_eq!(bus.subscribers(MessageKind::InhibitUpdate).len(), 1);
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut bus = Bus::new();
        bus.publish(Envelope {
            sender: Sender::Module(ModuleId::PowerSource),
            message: power_update(),
        });
        bus.publish(Envelope {
            sender: Sender::External,
            message: Message::InhibitUpdate { inhibited: true },
        });

        assert_eq!(bus.pop().unwrap().message.kind(), MessageKind::PowerSourceUpdate);
        assert_eq!(bus.pop().unwrap().message.kind(), MessageKind::InhibitUpdate);
        assert!(bus.pop().is_none());
    }

    #[test]
    fn test_classification_split() {
        assert_eq!(
            MessageKind::PowerSourceRequest.classification(),
            Classification::Request
        );
        assert_eq!(
            MessageKind::TemperatureRequest.classification(),
            Classification::Request
        );
        assert_eq!(
            MessageKind::DimTimeoutRequest.classification(),
            Classification::Request
        );
        assert_eq!(
            MessageKind::PowerSourceUpdate.classification(),
            Classification::Update
        );
        assert_eq!(
            MessageKind::DisplayUpdate.classification(),
            Classification::Update
        );
    }

    #[test]
    fn test_every_update_kind_has_one_producer() {
        // Update kinds announce completed state changes, so each must map to
        // exactly one owning sender; request kinds are deliberately open.
        let kinds = [
            MessageKind::PowerSourceUpdate,
            MessageKind::TemperatureUpdate,
            MessageKind::BacklightUpdate,
            MessageKind::DayPhaseUpdate,
            MessageKind::NextDayEventUpdate,
            MessageKind::DisplayUpdate,
            MessageKind::InhibitUpdate,
        ];
        for kind in kinds {
            assert!(kind.producer().is_some(), "{:?} lacks a producer", kind);
        }
        assert!(MessageKind::PowerSourceRequest.producer().is_none());
        assert!(MessageKind::TemperatureRequest.producer().is_none());
        assert!(MessageKind::DimTimeoutRequest.producer().is_none());
    }
}
