//! Presence state machine
//!
//! Smooths flapping home/away signals into:
//!
//! ```text
//!            home              just_arrived elapsed
//! Away ────────────────► JustArrived ───────────────► Home
//!  ▲  │extended_away            │ away                 │ away
//!  │  ▼                         ▼                      ▼
//!  │ ExtendedAway           JustLeft ◄─────────────────┘
//!  │                            │ just_left elapsed
//!  └────────────────────────────┘
//! ```
//!
//! Signals arrive from accepted tracker events, time passing arrives from the
//! periodic tick. Both take an explicit `now` so the machine stays pure.

use crate::domain::{PresenceState, PresenceStatus};
use chrono::{DateTime, TimeDelta, Utc};

/// Home/away signal derived from an accepted tracker event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceSignal {
    Home,
    /// Away, optionally inside a named (non-stationary) zone
    Away { zone_name: Option<String> },
}

/// Timing thresholds; zero means the transient state is skipped
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceThresholds {
    pub just_arrived: TimeDelta,
    pub just_left: TimeDelta,
    /// Zero disables `ExtendedAway`
    pub extended_away: TimeDelta,
    pub show_zone_when_away: bool,
}

impl PresenceThresholds {
    pub fn new(
        just_arrived_minutes: u32,
        just_left_minutes: u32,
        extended_away_hours: u32,
        show_zone_when_away: bool,
    ) -> Self {
        Self {
            just_arrived: TimeDelta::minutes(i64::from(just_arrived_minutes)),
            just_left: TimeDelta::minutes(i64::from(just_left_minutes)),
            extended_away: TimeDelta::hours(i64::from(extended_away_hours)),
            show_zone_when_away,
        }
    }
}

impl Default for PresenceThresholds {
    fn default() -> Self {
        Self::new(3, 3, 48, false)
    }
}

/// Pure transition function over `PresenceState`
#[derive(Debug, Clone, Default)]
pub struct PresenceMachine {
    thresholds: PresenceThresholds,
}

impl PresenceMachine {
    pub fn new(thresholds: PresenceThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &PresenceThresholds {
        &self.thresholds
    }

    /// State after the first accepted signal; never a transient state
    pub fn initial(&self, signal: &PresenceSignal, now: DateTime<Utc>) -> PresenceState {
        match signal {
            PresenceSignal::Home => settled(PresenceStatus::Home, now, None),
            PresenceSignal::Away { zone_name } => {
                settled(self.away_status(zone_name.as_deref()), now, Some(now))
            }
        }
    }

    /// Apply a home/away signal
    pub fn on_signal(
        &self,
        current: &PresenceState,
        signal: &PresenceSignal,
        now: DateTime<Utc>,
    ) -> PresenceState {
        use PresenceStatus::*;

        match (&current.status, signal) {
            (Unknown, _) => self.initial(signal, now),

            (Home | JustArrived, PresenceSignal::Home) => current.clone(),
            // Came back before the departure settled
            (JustLeft, PresenceSignal::Home) => settled(Home, now, None),
            (Away | Zone(_) | ExtendedAway, PresenceSignal::Home) => self.arrive(now),

            (Home | JustArrived, PresenceSignal::Away { zone_name }) => {
                self.depart(zone_name.as_deref(), now)
            }
            (JustLeft | ExtendedAway, PresenceSignal::Away { .. }) => current.clone(),
            (Away | Zone(_), PresenceSignal::Away { zone_name }) => {
                let status = self.away_status(zone_name.as_deref());
                if status == current.status {
                    current.clone()
                } else {
                    PresenceState {
                        status,
                        status_since: now,
                        away_since: current.away_since.or(Some(now)),
                    }
                }
            }
        }
    }

    /// Apply elapsed time; `None` when nothing changes
    ///
    /// `zone_name` is the zone the person is currently in, used when a
    /// departure settles and zones are shown while away.
    pub fn on_tick(
        &self,
        current: &PresenceState,
        zone_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<PresenceState> {
        let elapsed = now - current.status_since;
        match current.status {
            PresenceStatus::JustArrived if elapsed >= self.thresholds.just_arrived => {
                Some(settled(PresenceStatus::Home, now, None))
            }
            PresenceStatus::JustLeft if elapsed >= self.thresholds.just_left => {
                Some(settled(self.away_status(zone_name), now, Some(now)))
            }
            PresenceStatus::Away | PresenceStatus::Zone(_) => {
                let away_since = current.away_since?;
                if self.thresholds.extended_away > TimeDelta::zero()
                    && now - away_since >= self.thresholds.extended_away
                {
                    Some(settled(PresenceStatus::ExtendedAway, now, Some(away_since)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn arrive(&self, now: DateTime<Utc>) -> PresenceState {
        if self.thresholds.just_arrived > TimeDelta::zero() {
            settled(PresenceStatus::JustArrived, now, None)
        } else {
            settled(PresenceStatus::Home, now, None)
        }
    }

    fn depart(&self, zone_name: Option<&str>, now: DateTime<Utc>) -> PresenceState {
        if self.thresholds.just_left > TimeDelta::zero() {
            settled(PresenceStatus::JustLeft, now, None)
        } else {
            settled(self.away_status(zone_name), now, Some(now))
        }
    }

    fn away_status(&self, zone_name: Option<&str>) -> PresenceStatus {
        match zone_name {
            Some(name) if self.thresholds.show_zone_when_away => PresenceStatus::Zone(name.to_string()),
            _ => PresenceStatus::Away,
        }
    }
}

fn settled(
    status: PresenceStatus,
    since: DateTime<Utc>,
    away_since: Option<DateTime<Utc>>,
) -> PresenceState {
    PresenceState {
        status,
        status_since: since,
        away_since,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 17, 0, 0).unwrap()
    }

    fn away() -> PresenceSignal {
        PresenceSignal::Away { zone_name: None }
    }

    fn in_zone(name: &str) -> PresenceSignal {
        PresenceSignal::Away { zone_name: Some(name.to_string()) }
    }

    fn machine() -> PresenceMachine {
        PresenceMachine::default()
    }

    fn state(status: PresenceStatus, since: DateTime<Utc>) -> PresenceState {
        settled(status, since, None)
    }

    #[test]
    fn test_initial_state_is_never_transient() {
        let m = machine();
        assert_eq!(m.initial(&PresenceSignal::Home, t0()).status, PresenceStatus::Home);
        let s = m.initial(&away(), t0());
        assert_eq!(s.status, PresenceStatus::Away);
        assert_eq!(s.away_since, Some(t0()));
    }

    #[test]
    fn test_unknown_takes_initial_path() {
        let m = machine();
        let s = m.on_signal(&PresenceState::unknown(t0()), &PresenceSignal::Home, t0());
        assert_eq!(s.status, PresenceStatus::Home);
    }

    #[test]
    fn test_arrival_settles_exactly_at_threshold() {
        // Away, home event at T, Home at T+3:00
        let m = machine();
        let s = m.on_signal(&state(PresenceStatus::Away, t0()), &PresenceSignal::Home, t0());
        assert_eq!(s.status, PresenceStatus::JustArrived);
        assert_eq!(s.status_since, t0());

        let early = t0() + Duration::seconds(179);
        assert_eq!(m.on_tick(&s, None, early), None);

        let on_time = t0() + Duration::minutes(3);
        let home = m.on_tick(&s, None, on_time).unwrap();
        assert_eq!(home.status, PresenceStatus::Home);
        assert_eq!(home.status_since, on_time);
    }

    #[test]
    fn test_departure_settles_to_away() {
        let m = machine();
        let s = m.on_signal(&state(PresenceStatus::Home, t0()), &away(), t0());
        assert_eq!(s.status, PresenceStatus::JustLeft);

        let at = t0() + Duration::minutes(3);
        let settled = m.on_tick(&s, None, at).unwrap();
        assert_eq!(settled.status, PresenceStatus::Away);
        assert_eq!(settled.away_since, Some(at));
    }

    #[test]
    fn test_bounce_back_never_reaches_away() {
        // Home, away at T, home again at T+1:00
        let m = machine();
        let left = m.on_signal(&state(PresenceStatus::Home, t0()), &away(), t0());
        assert_eq!(left.status, PresenceStatus::JustLeft);

        let back = m.on_signal(&left, &PresenceSignal::Home, t0() + Duration::minutes(1));
        assert_eq!(back.status, PresenceStatus::Home);

        assert_eq!(m.on_tick(&back, None, t0() + Duration::minutes(10)), None);
    }

    #[test]
    fn test_just_arrived_then_leave_restarts_timer() {
        let m = machine();
        let arrived = state(PresenceStatus::JustArrived, t0());
        let later = t0() + Duration::minutes(1);
        let left = m.on_signal(&arrived, &away(), later);
        assert_eq!(left.status, PresenceStatus::JustLeft);
        assert_eq!(left.status_since, later);
    }

    #[test]
    fn test_repeated_signals_do_not_restart_timers() {
        let m = machine();
        let arrived = state(PresenceStatus::JustArrived, t0());
        let same = m.on_signal(&arrived, &PresenceSignal::Home, t0() + Duration::minutes(2));
        assert_eq!(same, arrived);

        let left = state(PresenceStatus::JustLeft, t0());
        let same = m.on_signal(&left, &away(), t0() + Duration::minutes(2));
        assert_eq!(same, left);
    }

    #[test]
    fn test_zero_thresholds_skip_transients() {
        let m = PresenceMachine::new(PresenceThresholds::new(0, 0, 48, false));
        let home = m.on_signal(&state(PresenceStatus::Away, t0()), &PresenceSignal::Home, t0());
        assert_eq!(home.status, PresenceStatus::Home);

        let away_state = m.on_signal(&home, &away(), t0());
        assert_eq!(away_state.status, PresenceStatus::Away);
        assert_eq!(away_state.away_since, Some(t0()));
    }

    #[test]
    fn test_extended_away_after_threshold() {
        let m = machine();
        let s = settled(PresenceStatus::Away, t0(), Some(t0()));
        assert_eq!(m.on_tick(&s, None, t0() + Duration::hours(47)), None);

        let at = t0() + Duration::hours(48);
        let extended = m.on_tick(&s, None, at).unwrap();
        assert_eq!(extended.status, PresenceStatus::ExtendedAway);
        assert_eq!(extended.away_since, Some(t0()));

        let back = m.on_signal(&extended, &PresenceSignal::Home, at + Duration::hours(1));
        assert_eq!(back.status, PresenceStatus::JustArrived);
    }

    #[test]
    fn test_zone_changes_keep_away_clock() {
        let m = PresenceMachine::new(PresenceThresholds::new(3, 3, 48, true));
        let s = settled(PresenceStatus::Away, t0(), Some(t0()));

        let at_work = m.on_signal(&s, &in_zone("Work"), t0() + Duration::hours(2));
        assert_eq!(at_work.status, PresenceStatus::Zone("Work".to_string()));
        assert_eq!(at_work.away_since, Some(t0()));

        let extended = m.on_tick(&at_work, Some("Work"), t0() + Duration::hours(48)).unwrap();
        assert_eq!(extended.status, PresenceStatus::ExtendedAway);
    }

    #[test]
    fn test_zone_hidden_unless_configured() {
        let m = machine();
        let left = state(PresenceStatus::JustLeft, t0());
        let settled = m.on_tick(&left, Some("Work"), t0() + Duration::minutes(3)).unwrap();
        assert_eq!(settled.status, PresenceStatus::Away);

        let shown = PresenceMachine::new(PresenceThresholds::new(3, 3, 48, true));
        let settled = shown.on_tick(&left, Some("Work"), t0() + Duration::minutes(3)).unwrap();
        assert_eq!(settled.status, PresenceStatus::Zone("Work".to_string()));
    }

    #[test]
    fn test_extended_away_disabled_with_zero() {
        let m = PresenceMachine::new(PresenceThresholds::new(3, 3, 0, false));
        let s = settled(PresenceStatus::Away, t0(), Some(t0()));
        assert_eq!(m.on_tick(&s, None, t0() + Duration::days(30)), None);
    }
}
