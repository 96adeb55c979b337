//! Separation alarm state machine.
//!
//! Converts a stream of in-range/out-of-range observations and periodic ticks
//! into alarm transitions:
//!
//! ```text
//!          OutOfRange                 tick, elapsed >= grace
//!  Idle ──────────────► CountingDown ───────────────────────► Alarmed
//!   ▲                       │                                    │
//!   │        InRange        │                                    │
//!   └───────────────────────┘                                    │
//!   ▲                                                            │
//!   └──────────────────────────── reset() ───────────────────────┘
//! ```
//!
//! Elapsed grace time is always recomputed from the wall-clock instant at
//! which the countdown started, so a stalled tick driver (suspend/resume)
//! neither delays the alarm indefinitely nor fires it early. Returning to
//! range does not clear an alarm that has already fired; only [`reset`]
//! does.
//!
//! [`reset`]: AlarmStateMachine::reset

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::ConfigError;
use crate::monitor::RangeState;

/// Shortest configurable grace period in seconds.
pub const MIN_GRACE_SECS: u64 = 1;

/// Longest configurable grace period in seconds.
pub const MAX_GRACE_SECS: u64 = 3600;

/// How long the beacon must stay out of range before the alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "u64", into = "u64")]
#[schema(value_type = u64, example = 10)]
pub struct GraceDuration(u64);

impl GraceDuration {
    /// Validate a grace period in whole seconds.
    ///
    /// # Errors
    ///
    /// Returns a validation error outside `MIN_GRACE_SECS..=MAX_GRACE_SECS`.
    pub fn from_secs(secs: u64) -> Result<Self, ConfigError> {
        if (MIN_GRACE_SECS..=MAX_GRACE_SECS).contains(&secs) {
            Ok(Self(secs))
        } else {
            Err(ConfigError::invalid(
                "monitor.grace_secs",
                format!("{secs} s is outside {MIN_GRACE_SECS}..={MAX_GRACE_SECS} seconds"),
            ))
        }
    }

    /// The grace period in seconds.
    #[must_use]
    pub const fn secs(self) -> u64 {
        self.0
    }

    /// The grace period as a [`Duration`].
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl TryFrom<u64> for GraceDuration {
    type Error = ConfigError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_secs(value)
    }
}

impl From<GraceDuration> for u64 {
    fn from(grace: GraceDuration) -> Self {
        grace.0
    }
}

impl fmt::Display for GraceDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Deployment profile of the alert path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertProfile {
    /// Audible alert plus emergency notification. 10 s default grace.
    #[default]
    Primary,
    /// Audible alert only. 5 s default grace.
    AudioOnly,
}

impl AlertProfile {
    /// Grace period used when none is configured explicitly.
    #[must_use]
    pub const fn default_grace(self) -> GraceDuration {
        match self {
            Self::Primary => GraceDuration(10),
            Self::AudioOnly => GraceDuration(5),
        }
    }

    /// Whether alarms on this profile hand off to the notification dispatcher.
    #[must_use]
    pub const fn notifies(self) -> bool {
        matches!(self, Self::Primary)
    }
}

/// Observable status of the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AlarmState {
    /// Beacon in range, nothing pending.
    Idle,
    /// Beacon out of range, grace period running.
    CountingDown {
        /// Whole seconds left before the alarm fires, rounded up.
        remaining_secs: u64,
    },
    /// Alarm raised; waits for an explicit reset.
    Alarmed {
        /// When the alarm fired.
        since: DateTime<Utc>,
    },
}

/// A transition produced by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlarmEvent {
    /// The beacon left range and the grace period began.
    CountdownStarted {
        /// When the countdown started.
        at: DateTime<Utc>,
        /// Full grace period in seconds.
        remaining_secs: u64,
    },
    /// The countdown advanced.
    CountdownTick {
        /// When the tick was processed.
        at: DateTime<Utc>,
        /// Seconds left, rounded up.
        remaining_secs: u64,
    },
    /// The beacon came back before the grace period ran out.
    CountdownCancelled {
        /// When the beacon was seen in range again.
        at: DateTime<Utc>,
    },
    /// The grace period ran out. Emitted once per episode.
    AlarmTriggered {
        /// When the alarm fired.
        at: DateTime<Utc>,
    },
    /// The alarm or countdown was cleared by an explicit reset.
    AlarmReset {
        /// When the reset was applied.
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    CountingDown { started_at: DateTime<Utc> },
    Alarmed { since: DateTime<Utc> },
}

/// The single owner of the alarm state.
#[derive(Debug, Clone)]
pub struct AlarmStateMachine {
    grace: GraceDuration,
    phase: Phase,
}

impl AlarmStateMachine {
    /// Create an idle machine.
    #[must_use]
    pub const fn new(grace: GraceDuration) -> Self {
        Self {
            grace,
            phase: Phase::Idle,
        }
    }

    /// Configured grace period.
    #[must_use]
    pub const fn grace(&self) -> GraceDuration {
        self.grace
    }

    /// Change the grace period. A running countdown keeps its start instant,
    /// so the new value applies to the time already elapsed from the next tick.
    pub fn set_grace(&mut self, grace: GraceDuration) {
        self.grace = grace;
    }

    /// Feed a range classification.
    pub fn observe(&mut self, range: RangeState, now: DateTime<Utc>) -> Option<AlarmEvent> {
        match (self.phase, range) {
            (Phase::Idle, RangeState::OutOfRange) => {
                self.phase = Phase::CountingDown { started_at: now };
                Some(AlarmEvent::CountdownStarted {
                    at: now,
                    remaining_secs: self.grace.secs(),
                })
            }
            (Phase::CountingDown { .. }, RangeState::InRange) => {
                self.phase = Phase::Idle;
                Some(AlarmEvent::CountdownCancelled { at: now })
            }
            _ => None,
        }
    }

    /// Advance the countdown to `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<AlarmEvent> {
        let Phase::CountingDown { started_at } = self.phase else {
            return None;
        };

        let elapsed = elapsed_between(started_at, now);
        let grace = self.grace.as_duration();
        if elapsed >= grace {
            self.phase = Phase::Alarmed { since: now };
            Some(AlarmEvent::AlarmTriggered { at: now })
        } else {
            Some(AlarmEvent::CountdownTick {
                at: now,
                remaining_secs: ceil_secs(grace - elapsed),
            })
        }
    }

    /// Return to idle from any state. Does nothing when already idle.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<AlarmEvent> {
        if self.phase == Phase::Idle {
            return None;
        }
        self.phase = Phase::Idle;
        Some(AlarmEvent::AlarmReset { at: now })
    }

    /// Status as of `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> AlarmState {
        match self.phase {
            Phase::Idle => AlarmState::Idle,
            Phase::CountingDown { .. } => AlarmState::CountingDown {
                remaining_secs: self.remaining(now).map_or(0, ceil_secs),
            },
            Phase::Alarmed { since } => AlarmState::Alarmed { since },
        }
    }

    /// Time left in the running countdown, if any.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.phase {
            Phase::CountingDown { started_at } => Some(
                self.grace
                    .as_duration()
                    .saturating_sub(elapsed_between(started_at, now)),
            ),
            _ => None,
        }
    }

    /// Whether the alarm has fired and not been reset.
    #[must_use]
    pub const fn is_alarmed(&self) -> bool {
        matches!(self.phase, Phase::Alarmed { .. })
    }

    /// Whether the machine is idle.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }
}

/// Wall-clock time between two instants; a clock stepping backwards counts as zero.
fn elapsed_between(start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - start).to_std().unwrap_or(Duration::ZERO)
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 3, 30, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(secs)
    }

    fn machine(grace_secs: u64) -> AlarmStateMachine {
        AlarmStateMachine::new(GraceDuration::from_secs(grace_secs).unwrap())
    }

    #[test]
    fn test_starts_idle_and_ignores_ticks() {
        let mut m = machine(10);
        assert_eq!(m.state(t0()), AlarmState::Idle);
        assert_eq!(m.tick(at(100)), None);
        assert!(m.is_idle());
    }

    #[test]
    fn test_out_of_range_starts_full_countdown() {
        let mut m = machine(10);
        assert_eq!(
            m.observe(RangeState::OutOfRange, t0()),
            Some(AlarmEvent::CountdownStarted {
                at: t0(),
                remaining_secs: 10
            })
        );
        assert_eq!(
            m.state(t0()),
            AlarmState::CountingDown { remaining_secs: 10 }
        );
    }

    #[test]
    fn test_triggers_exactly_once_at_grace_mark() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, t0());

        let mut triggered = Vec::new();
        for second in 1..=15 {
            m.observe(RangeState::OutOfRange, at(second));
            if let Some(AlarmEvent::AlarmTriggered { at: fired }) = m.tick(at(second)) {
                triggered.push(fired);
            }
        }

        assert_eq!(triggered, vec![at(10)]);
        assert!(m.is_alarmed());
    }

    #[test]
    fn test_countdown_ticks_report_remaining_seconds() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, t0());

        assert_eq!(
            m.tick(at(1)),
            Some(AlarmEvent::CountdownTick {
                at: at(1),
                remaining_secs: 9
            })
        );
        let half = t0() + chrono::Duration::milliseconds(9_500);
        assert_eq!(
            m.tick(half),
            Some(AlarmEvent::CountdownTick {
                at: half,
                remaining_secs: 1
            })
        );
    }

    #[test]
    fn test_in_range_cancels_countdown_without_partial_credit() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, t0());
        m.tick(at(5));
        assert_eq!(
            m.observe(RangeState::InRange, at(6)),
            Some(AlarmEvent::CountdownCancelled { at: at(6) })
        );
        assert!(m.is_idle());

        // A new episode starts from the full grace period
        m.observe(RangeState::OutOfRange, at(7));
        assert_eq!(
            m.state(at(7)),
            AlarmState::CountingDown { remaining_secs: 10 }
        );
        assert!(matches!(
            m.tick(at(16)),
            Some(AlarmEvent::CountdownTick { .. })
        ));
        assert_eq!(m.tick(at(17)), Some(AlarmEvent::AlarmTriggered { at: at(17) }));
    }

    #[test]
    fn test_repeated_out_of_range_does_not_restart_countdown() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, t0());
        assert_eq!(m.observe(RangeState::OutOfRange, at(4)), None);
        assert_eq!(m.remaining(at(4)), Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_alarm_survives_return_to_range() {
        let mut m = machine(5);
        m.observe(RangeState::OutOfRange, t0());
        m.tick(at(5));
        assert!(m.is_alarmed());

        assert_eq!(m.observe(RangeState::InRange, at(6)), None);
        assert_eq!(m.tick(at(7)), None);
        assert_eq!(m.state(at(7)), AlarmState::Alarmed { since: at(5) });
    }

    #[test]
    fn test_reset_clears_alarm_and_is_idempotent() {
        let mut m = machine(5);
        m.observe(RangeState::OutOfRange, t0());
        m.tick(at(5));

        assert_eq!(m.reset(at(8)), Some(AlarmEvent::AlarmReset { at: at(8) }));
        assert!(m.is_idle());
        assert_eq!(m.reset(at(9)), None);
        assert_eq!(m.state(at(9)), AlarmState::Idle);
    }

    #[test]
    fn test_reset_during_countdown_returns_to_idle() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, t0());
        assert_eq!(m.reset(at(3)), Some(AlarmEvent::AlarmReset { at: at(3) }));
        assert_eq!(m.tick(at(20)), None);
    }

    #[test]
    fn test_stalled_ticks_recover_from_wall_clock() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, t0());
        m.tick(at(1));

        // Host suspended: next tick arrives much later and fires immediately
        assert_eq!(m.tick(at(300)), Some(AlarmEvent::AlarmTriggered { at: at(300) }));
    }

    #[test]
    fn test_clock_stepping_backwards_never_fires_early() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, at(100));

        assert_eq!(
            m.tick(at(40)),
            Some(AlarmEvent::CountdownTick {
                at: at(40),
                remaining_secs: 10
            })
        );
        assert!(!m.is_alarmed());
    }

    #[test]
    fn test_grace_change_applies_to_running_countdown() {
        let mut m = machine(10);
        m.observe(RangeState::OutOfRange, t0());
        m.tick(at(4));

        m.set_grace(GraceDuration::from_secs(5).unwrap());
        assert_eq!(m.tick(at(5)), Some(AlarmEvent::AlarmTriggered { at: at(5) }));
    }

    #[test]
    fn test_grace_bounds_and_profile_defaults() {
        assert!(GraceDuration::from_secs(0).is_err());
        assert!(GraceDuration::from_secs(3601).is_err());
        assert_eq!(AlertProfile::Primary.default_grace().secs(), 10);
        assert_eq!(AlertProfile::AudioOnly.default_grace().secs(), 5);
        assert!(AlertProfile::Primary.notifies());
        assert!(!AlertProfile::AudioOnly.notifies());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(AlarmState::CountingDown { remaining_secs: 4 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "counting_down", "remaining_secs": 4})
        );
        let json = serde_json::to_value(AlarmState::Idle).unwrap();
        assert_eq!(json, serde_json::json!({"state": "idle"}));
    }
}
