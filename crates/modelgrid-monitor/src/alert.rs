//! Hysteresis state machine for alert firing.
//!
//! An alert fires only after its condition holds continuously for the
//! configured duration, and clears only after the condition is absent
//! for the same duration. Exactly one event is emitted per firing
//! transition; flapping back from `clearing` rejoins the same episode
//! silently, and clearing itself is silent.

use modelgrid_state::Severity;

/// Phase of the hysteresis machine, driven by sample timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Breaching, but not yet for the full hysteresis duration.
    Pending { since: u64 },
    /// Fired; condition still (or recently) present.
    Firing,
    /// Condition absent while firing; clears after the full duration.
    Clearing { absent_since: u64 },
}

/// Result of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// The alert just transitioned to firing — emit exactly one event.
    Fired(Severity),
}

/// Tracks consecutive breach observations for one
/// `(deployment, metric)` pair.
#[derive(Debug)]
pub struct AlertTracker {
    phase: Phase,
    for_secs: u64,
    /// Highest severity observed in the current episode.
    severity: Option<Severity>,
}

impl AlertTracker {
    pub fn new(for_secs: u64) -> Self {
        Self {
            phase: Phase::Idle,
            for_secs,
            severity: None,
        }
    }

    /// Record a breach observation at time `now` (sample time).
    pub fn observe(&mut self, now: u64, breach: Option<Severity>) -> Transition {
        match (self.phase, breach) {
            (Phase::Idle, Some(severity)) => {
                self.severity = Some(severity);
                if self.for_secs == 0 {
                    self.phase = Phase::Firing;
                    return Transition::Fired(severity);
                }
                self.phase = Phase::Pending { since: now };
                Transition::None
            }
            (Phase::Idle, None) => Transition::None,

            (Phase::Pending { since }, Some(severity)) => {
                let severity = self.escalate(severity);
                if now.saturating_sub(since) >= self.for_secs {
                    self.phase = Phase::Firing;
                    Transition::Fired(severity)
                } else {
                    Transition::None
                }
            }
            (Phase::Pending { .. }, None) => {
                // Transient spike; drop the episode.
                self.phase = Phase::Idle;
                self.severity = None;
                Transition::None
            }

            (Phase::Firing, Some(severity)) => {
                // Deduplicated while firing.
                self.escalate(severity);
                Transition::None
            }
            (Phase::Firing, None) => {
                self.phase = Phase::Clearing { absent_since: now };
                Transition::None
            }

            (Phase::Clearing { .. }, Some(severity)) => {
                // Same episode; no new event.
                self.escalate(severity);
                self.phase = Phase::Firing;
                Transition::None
            }
            (Phase::Clearing { absent_since }, None) => {
                if now.saturating_sub(absent_since) >= self.for_secs {
                    // Clearing is silent.
                    self.phase = Phase::Idle;
                    self.severity = None;
                }
                Transition::None
            }
        }
    }

    pub fn is_firing(&self) -> bool {
        matches!(self.phase, Phase::Firing | Phase::Clearing { .. })
    }

    fn escalate(&mut self, severity: Severity) -> Severity {
        let merged = self.severity.map_or(severity, |s| s.max(severity));
        self.severity = Some(merged);
        merged
    }
}
