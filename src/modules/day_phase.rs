//! Day-phase source.
//!
//! Owns the day-phase block of shared state: the current phase, the boundary
//! window bookkeeping and the next boundary event. The schedule comes from
//! the configured sunset/sunrise times or, when coordinates are configured,
//! from solar calculations recomputed once per calendar day.
//!
//! Driven by the event loop's clock tick. A phase flip publishes a
//! `DayPhaseUpdate` followed by a `TemperatureRequest` carrying this module's
//! identity, which is how the color-temperature controller learns that the
//! new phase's configured temperature should be applied.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone};
use sunrise::{Coordinates, SolarDay, SolarEvent};

use crate::bus::{DayEventChange, DayPhaseChange, Message, TemperatureRequest};
use crate::logger::Log;
use crate::module::{Context, Module, ModuleId};
use crate::services::ServiceSignal;
use crate::state::{DayEvent, DayPhase, EventHalf};

pub struct DayPhaseSource {
    sunrise: NaiveTime,
    sunset: NaiveTime,
    /// Date the schedule was computed for; solar schedules roll over daily.
    schedule_date: Option<NaiveDate>,
}

/// Everything the clock position implies, derived in one place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PhaseSnapshot {
    pub phase: DayPhase,
    pub in_event: bool,
    pub event_half: EventHalf,
    pub next_event: DayEvent,
    pub next_event_time: DateTime<Local>,
}

impl DayPhaseSource {
    pub fn new() -> Self {
        Self {
            sunrise: NaiveTime::MIN,
            sunset: NaiveTime::MIN,
            schedule_date: None,
        }
    }

    /// Recompute the schedule if the calendar day changed (or it was never
    /// computed). Solar mode asks the `sunrise` crate; manual mode parses the
    /// configured times once and keeps them.
    fn refresh_schedule(&mut self, ctx: &Context, today: NaiveDate) -> Result<()> {
        if self.schedule_date == Some(today) {
            return Ok(());
        }

        let (sunrise, sunset) = match (ctx.config.latitude, ctx.config.longitude) {
            (Some(lat), Some(lon)) => solar_schedule(lat, lon, today)?,
            _ => {
                let (sunset, sunrise) = ctx.config.schedule_times()?;
                (sunrise, sunset)
            }
        };

        self.sunrise = sunrise;
        self.sunset = sunset;
        self.schedule_date = Some(today);
        Log::log_info(&format!(
            "Daylight schedule for {}: sunrise {}, sunset {}.",
            today,
            sunrise.format("%H:%M:%S"),
            sunset.format("%H:%M:%S")
        ));
        Ok(())
    }

    /// Apply a snapshot to shared state and publish whatever changed.
    fn apply(&mut self, ctx: &mut Context, snap: PhaseSnapshot) {
        if ctx.state.next_event_time != Some(snap.next_event_time) {
            let old = ctx.state.next_event;
            ctx.state.next_event = snap.next_event;
            ctx.state.next_event_time = Some(snap.next_event_time);
            ctx.publish(Message::NextDayEventUpdate(DayEventChange {
                old,
                new: snap.next_event,
            }));
        }
        ctx.state.in_event = snap.in_event;
        ctx.state.event_half = snap.event_half;

        if ctx.state.day_phase != snap.phase {
            let old = ctx.state.day_phase;
            ctx.state.day_phase = snap.phase;
            Log::log_block_start(&format!("Entering {} phase.", snap.phase.as_str()));
            ctx.publish(Message::DayPhaseUpdate(DayPhaseChange {
                old,
                new: snap.phase,
            }));
            self.request_phase_temperature(ctx, snap.phase);
        }
    }

    fn request_phase_temperature(&self, ctx: &mut Context, phase: DayPhase) {
        ctx.publish(Message::TemperatureRequest(TemperatureRequest {
            new: ctx.config.temp_for(phase),
            smooth: ctx.config.smooth_temp_enabled(),
            step: ctx.config.temp_step(),
            timeout_ms: ctx.config.temp_timeout_ms(),
            day_phase: phase,
        }));
    }
}

impl Default for DayPhaseSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for DayPhaseSource {
    fn id(&self) -> ModuleId {
        ModuleId::DayPhase
    }

    fn check(&self, ctx: &Context) -> bool {
        // A usable schedule source must exist: either valid configured times
        // or coordinates. Without one there is no day/night signal at all.
        ctx.config.latitude.is_some() && ctx.config.longitude.is_some()
            || ctx.config.schedule_times().is_ok()
    }

    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        let now = ctx.now();
        self.refresh_schedule(ctx, now.date_naive())?;

        let snap = snapshot(now, self.sunrise, self.sunset, ctx.config.event_duration_secs());
        ctx.state.day_phase = snap.phase;
        ctx.state.in_event = snap.in_event;
        ctx.state.event_half = snap.event_half;
        ctx.state.next_event = snap.next_event;
        ctx.state.next_event_time = Some(snap.next_event_time);
        Log::log_info(&format!("Current phase: {}.", snap.phase.as_str()));

        // Announce the initial phase so dependents waiting on this source can
        // leave their waiting state, then ask for the matching temperature.
        ctx.publish(Message::DayPhaseUpdate(DayPhaseChange {
            old: snap.phase,
            new: snap.phase,
        }));
        self.request_phase_temperature(ctx, snap.phase);
        Ok(())
    }

    fn signal(&mut self, ctx: &mut Context, sig: &ServiceSignal) {
        if *sig != ServiceSignal::Tick {
            return;
        }
        let now = ctx.now();
        if let Err(e) = self.refresh_schedule(ctx, now.date_naive()) {
            Log::log_warning(&format!("Cannot refresh daylight schedule: {:#}.", e));
            return;
        }
        let snap = snapshot(now, self.sunrise, self.sunset, ctx.config.event_duration_secs());
        self.apply(ctx, snap);
    }
}

/// Compute today's solar sunrise/sunset for the given coordinates.
fn solar_schedule(lat: f64, lon: f64, date: NaiveDate) -> Result<(NaiveTime, NaiveTime)> {
    let coord = Coordinates::new(lat, lon)
        .ok_or_else(|| anyhow!("invalid coordinates ({}, {})", lat, lon))?;
    let solar_day = SolarDay::new(coord, date);
    let sunrise = solar_day
        .event_time(SolarEvent::Sunrise)
        .with_timezone(&Local)
        .time();
    let sunset = solar_day
        .event_time(SolarEvent::Sunset)
        .with_timezone(&Local)
        .time();
    Ok((sunrise, sunset))
}

/// Derive phase and boundary-window position from the wall clock.
///
/// Events are considered on adjacent days too, so windows crossing midnight
/// resolve correctly. The next event is the earliest one whose window has not
/// fully elapsed; the phase flips at an event's center time.
pub(crate) fn snapshot(
    now: DateTime<Local>,
    sunrise: NaiveTime,
    sunset: NaiveTime,
    half_window_secs: i64,
) -> PhaseSnapshot {
    let half_window = Duration::seconds(half_window_secs);

    let mut events: Vec<(DayEvent, DateTime<Local>)> = Vec::new();
    for day_offset in -1..=1 {
        let date = now.date_naive() + Duration::days(day_offset);
        for (event, time) in [(DayEvent::Sunrise, sunrise), (DayEvent::Sunset, sunset)] {
            if let Some(at) = local_datetime(date, time) {
                events.push((event, at));
            }
        }
    }
    events.sort_by_key(|(_, at)| *at);

    // The candidate list always spans yesterday through tomorrow, so an event
    // with an unfinished window is guaranteed to exist.
    let (next_event, center) = events
        .into_iter()
        .find(|(_, at)| *at + half_window > now)
        .expect("a day always has a next boundary event");

    let in_event = now >= center - half_window;
    let event_half = if now < center {
        EventHalf::First
    } else {
        EventHalf::Second
    };
    let phase = match (next_event, event_half) {
        (DayEvent::Sunset, EventHalf::First) => DayPhase::Day,
        (DayEvent::Sunset, EventHalf::Second) => DayPhase::Night,
        (DayEvent::Sunrise, EventHalf::First) => DayPhase::Night,
        (DayEvent::Sunrise, EventHalf::Second) => DayPhase::Day,
    };

    PhaseSnapshot {
        phase,
        in_event,
        event_half,
        next_event,
        next_event_time: center,
    }
}

/// Resolve a naive date+time in the local timezone, skipping times that do
/// not exist on DST-shift days.
fn local_datetime(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&date.and_time(time)).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 6, 10, h, m, s)
            .single()
            .unwrap()
    }

    fn standard_snapshot(now: DateTime<Local>) -> PhaseSnapshot {
        let sunrise = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let sunset = NaiveTime::from_hms_opt(19, 0, 0).unwrap();
        snapshot(now, sunrise, sunset, 30 * 60)
    }

    #[test]
    fn test_midday_is_stable_day() {
        let snap = standard_snapshot(at(12, 0, 0));
        assert_eq!(snap.phase, DayPhase::Day);
        assert!(!snap.in_event);
        assert_eq!(snap.next_event, DayEvent::Sunset);
    }

    #[test]
    fn test_before_sunset_center_is_first_half() {
        let snap = standard_snapshot(at(18, 45, 0));
        assert_eq!(snap.phase, DayPhase::Day);
        assert!(snap.in_event);
        assert_eq!(snap.event_half, EventHalf::First);
        assert_eq!(snap.next_event, DayEvent::Sunset);
    }

    #[test]
    fn test_after_sunset_center_is_second_half_night() {
        let snap = standard_snapshot(at(19, 15, 0));
        assert_eq!(snap.phase, DayPhase::Night);
        assert!(snap.in_event);
        assert_eq!(snap.event_half, EventHalf::Second);
        // Still inside the sunset window, so sunset is still the next event.
        assert_eq!(snap.next_event, DayEvent::Sunset);
    }

    #[test]
    fn test_window_elapsed_moves_to_next_event() {
        let snap = standard_snapshot(at(19, 31, 0));
        assert_eq!(snap.phase, DayPhase::Night);
        assert!(!snap.in_event);
        assert_eq!(snap.next_event, DayEvent::Sunrise);
        assert_eq!(snap.next_event_time.date_naive(), at(0, 0, 0).date_naive() + Duration::days(1));
    }

    #[test]
    fn test_pre_dawn_window() {
        let snap = standard_snapshot(at(5, 45, 0));
        assert_eq!(snap.phase, DayPhase::Night);
        assert!(snap.in_event);
        assert_eq!(snap.event_half, EventHalf::First);
        assert_eq!(snap.next_event, DayEvent::Sunrise);
    }

    #[test]
    fn test_window_crossing_midnight() {
        let sunrise = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let sunset = NaiveTime::from_hms_opt(23, 50, 0).unwrap();

        // Five past midnight: yesterday's sunset window is still open.
        let snap = snapshot(at(0, 5, 0), sunrise, sunset, 30 * 60);
        assert_eq!(snap.phase, DayPhase::Night);
        assert!(snap.in_event);
        assert_eq!(snap.event_half, EventHalf::Second);
        assert_eq!(snap.next_event, DayEvent::Sunset);
        assert_eq!(
            snap.next_event_time.date_naive(),
            at(0, 0, 0).date_naive() - Duration::days(1)
        );
    }

    #[test]
    fn test_boundary_exactly_at_center() {
        let snap = standard_snapshot(at(19, 0, 0));
        // The center itself belongs to the second half: night has begun.
        assert_eq!(snap.phase, DayPhase::Night);
        assert_eq!(snap.event_half, EventHalf::Second);
    }
}
