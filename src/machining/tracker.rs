// Continuous-machining state reconciliation
use crate::models::{ContinuousState, MachiningPhase, MachiningTick};
use std::time::{Duration, Instant};

/// Everything that can change a machine's visible state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// Push-channel progress report.
    Tick(MachiningTick),
    /// Local one-second timer, only used for display smoothness.
    Interpolate,
    /// Push-channel completion signal; carries no timing.
    Completion { machine_id: String },
    /// Authoritative pull of the whole state.
    Refresh(ContinuousState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    /// The update was for another machine.
    Ignored,
    /// State changed and a full refresh should follow.
    RefreshRequired,
}

/// Single-writer state machine for one machine. Every update goes through
/// `apply`, which enforces:
/// - ticks and interpolation never lower `elapsed_seconds`
/// - only a refresh that switches `current_job` may lower it
/// - interpolation only runs while running and ticks have gone stale
pub struct MachiningTracker {
    state: ContinuousState,
    phase: MachiningPhase,
    last_advance: Option<Instant>,
    tick_stale: Duration,
}

impl MachiningTracker {
    pub fn new(machine_id: &str, tick_stale: Duration) -> Self {
        Self::from_state(ContinuousState::idle(machine_id), tick_stale)
    }

    pub fn from_state(state: ContinuousState, tick_stale: Duration) -> Self {
        let phase = phase_of(&state);
        Self {
            state,
            phase,
            last_advance: None,
            tick_stale,
        }
    }

    pub fn state(&self) -> &ContinuousState {
        &self.state
    }

    pub fn phase(&self) -> MachiningPhase {
        self.phase
    }

    pub fn machine_id(&self) -> &str {
        &self.state.machine_id
    }

    pub fn apply(&mut self, update: StateUpdate, now: Instant) -> Applied {
        let before = self.state.clone();
        let before_phase = self.phase;

        match update {
            StateUpdate::Tick(tick) => {
                if tick.machine_id != self.state.machine_id {
                    return Applied::Ignored;
                }
                self.state.elapsed_seconds = self.state.elapsed_seconds.max(tick.elapsed_seconds);
                self.state.is_running = tick.is_running;
                self.phase = match (tick.is_running, self.phase) {
                    (true, _) => MachiningPhase::Running,
                    (false, MachiningPhase::Completed) => MachiningPhase::Completed,
                    (false, _) => MachiningPhase::Idle,
                };
                self.last_advance = Some(now);
            }
            StateUpdate::Interpolate => {
                if !self.state.is_running {
                    return Applied::Unchanged;
                }
                let stale = self
                    .last_advance
                    .map_or(true, |at| now.saturating_duration_since(at) >= self.tick_stale);
                if !stale {
                    return Applied::Unchanged;
                }
                self.state.elapsed_seconds += 1;
                self.last_advance = Some(now);
            }
            StateUpdate::Completion { machine_id } => {
                if machine_id != self.state.machine_id {
                    return Applied::Ignored;
                }
                self.state.is_running = false;
                self.phase = MachiningPhase::Completed;
                return Applied::RefreshRequired;
            }
            StateUpdate::Refresh(refreshed) => {
                if refreshed.machine_id != self.state.machine_id {
                    return Applied::Ignored;
                }
                let job_changed = refreshed.current_job != self.state.current_job;
                let elapsed = if job_changed {
                    refreshed.elapsed_seconds
                } else {
                    self.state.elapsed_seconds.max(refreshed.elapsed_seconds)
                };

                self.state = ContinuousState {
                    elapsed_seconds: elapsed,
                    ..refreshed
                };
                self.phase = phase_of(&self.state);
                self.last_advance = Some(now);
            }
        }

        if self.state != before || self.phase != before_phase {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }
}

fn phase_of(state: &ContinuousState) -> MachiningPhase {
    if state.is_running {
        MachiningPhase::Running
    } else {
        MachiningPhase::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(1);

    fn tick(elapsed: u64, running: bool) -> StateUpdate {
        StateUpdate::Tick(MachiningTick {
            machine_id: "M1".to_string(),
            elapsed_seconds: elapsed,
            is_running: running,
        })
    }

    fn refresh(job: &str, elapsed: u64, running: bool) -> StateUpdate {
        StateUpdate::Refresh(ContinuousState {
            current_job: Some(job.to_string()),
            next_job: None,
            elapsed_seconds: elapsed,
            is_running: running,
            ..ContinuousState::idle("M1")
        })
    }

    #[test]
    fn test_ticks_and_interpolation_never_regress() {
        let mut tracker = MachiningTracker::new("M1", STALE);
        let t0 = Instant::now();
        let secs = |s: u64| t0 + Duration::from_secs(s);

        let updates = [
            (tick(10, true), secs(0)),
            (StateUpdate::Interpolate, secs(1)),
            (StateUpdate::Interpolate, secs(2)),
            // Late tick for an earlier second: must not pull time back.
            (tick(11, true), secs(2)),
            (StateUpdate::Interpolate, secs(3)),
            (tick(14, true), secs(3)),
            (StateUpdate::Interpolate, secs(3)),
            (tick(14, true), secs(4)),
        ];

        let mut seen = Vec::new();
        for (update, at) in updates {
            tracker.apply(update, at);
            seen.push(tracker.state().elapsed_seconds);
        }

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(tracker.state().elapsed_seconds, 14);
    }

    #[test]
    fn test_interpolation_waits_for_stale_ticks_and_stops_when_idle() {
        let mut tracker = MachiningTracker::new("M1", STALE);
        let t0 = Instant::now();

        assert_eq!(tracker.apply(StateUpdate::Interpolate, t0), Applied::Unchanged);

        tracker.apply(tick(5, true), t0);
        assert_eq!(
            tracker.apply(StateUpdate::Interpolate, t0 + Duration::from_millis(400)),
            Applied::Unchanged
        );
        assert_eq!(
            tracker.apply(StateUpdate::Interpolate, t0 + Duration::from_secs(1)),
            Applied::Changed
        );
        assert_eq!(tracker.state().elapsed_seconds, 6);

        tracker.apply(tick(6, false), t0 + Duration::from_secs(1));
        assert_eq!(
            tracker.apply(StateUpdate::Interpolate, t0 + Duration::from_secs(5)),
            Applied::Unchanged
        );
        assert_eq!(tracker.phase(), MachiningPhase::Idle);
    }

    #[test]
    fn test_refresh_resets_only_on_job_change() {
        let mut tracker = MachiningTracker::new("M1", STALE);
        let now = Instant::now();

        tracker.apply(refresh("job1", 100, true), now);
        tracker.apply(tick(120, true), now);

        // Same job, older elapsed (bridge lag): keep the larger value.
        tracker.apply(refresh("job1", 110, true), now);
        assert_eq!(tracker.state().elapsed_seconds, 120);

        tracker.apply(refresh("job2", 0, true), now);
        assert_eq!(tracker.state().elapsed_seconds, 0);
        assert_eq!(tracker.state().current_job.as_deref(), Some("job2"));
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let mut tracker = MachiningTracker::new("M1", STALE);
        let now = Instant::now();

        assert_eq!(tracker.apply(refresh("job1", 42, true), now), Applied::Changed);
        let first = tracker.state().clone();
        assert_eq!(tracker.apply(refresh("job1", 42, true), now), Applied::Unchanged);
        assert_eq!(tracker.state(), &first);
    }

    #[test]
    fn test_completion_requests_refresh_and_stops_running() {
        let mut tracker = MachiningTracker::new("M1", STALE);
        let now = Instant::now();
        tracker.apply(tick(30, true), now);

        let applied = tracker.apply(
            StateUpdate::Completion {
                machine_id: "M1".to_string(),
            },
            now,
        );
        assert_eq!(applied, Applied::RefreshRequired);
        assert_eq!(tracker.phase(), MachiningPhase::Completed);
        assert!(!tracker.state().is_running);
        assert_eq!(tracker.state().elapsed_seconds, 30);

        tracker.apply(refresh("job2", 0, true), now);
        assert_eq!(tracker.phase(), MachiningPhase::Running);
    }

    #[test]
    fn test_other_machines_are_ignored() {
        let mut tracker = MachiningTracker::new("M1", STALE);
        let other = StateUpdate::Tick(MachiningTick {
            machine_id: "M2".to_string(),
            elapsed_seconds: 99,
            is_running: true,
        });
        assert_eq!(tracker.apply(other, Instant::now()), Applied::Ignored);
        assert_eq!(tracker.state(), &ContinuousState::idle("M1"));
    }
}
