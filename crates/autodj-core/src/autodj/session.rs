//! Session state machine
//!
//! ```text
//!            start            begin_mix
//!   Idle ───────────▶ Monitoring ─────────▶ Mixing
//!    ▲  ◀───────────     │  ▲                 │
//!    │    request_stop   │  └─────────────────┘
//!    │                   │   complete_handover / abort_mix
//!    │    finish_end     ▼
//!    └─────────────── Ending
//!                 (begin_end)
//! ```
//!
//! The methods below are the only way to change session state. Each checks
//! the current phase (and, where a tick is involved, the epoch the tick
//! started in) and refuses the change otherwise, so a stale or concurrent
//! caller can never leave a half-updated session behind.

use crate::types::DeckId;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Auto-pilot off
    #[default]
    Idle,
    /// Polling the active deck, no transition in flight
    Monitoring,
    /// A transition (and its handover) is in flight
    Mixing,
    /// Queue and target exhausted, tearing down
    Ending,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Session went straight to `Idle`
    Stopped,
    /// A transition is in flight; the session goes `Idle` after its handover
    Deferred,
    /// Nothing was running
    NotRunning,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    phase: SessionPhase,
    active_deck: DeckId,
    last_mix_in_position: f64,
    time_remaining: f64,
    /// Bumped whenever a session starts or stops; ticks from an older epoch are stale
    epoch: u64,
    stop_after_mix: bool,
}

impl Session {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn active_deck(&self) -> DeckId {
        self.active_deck
    }

    pub fn last_mix_in_position(&self) -> f64 {
        self.last_mix_in_position
    }

    /// Seconds left on the active deck, for display only
    pub fn time_remaining(&self) -> f64 {
        self.time_remaining
    }

    pub fn is_mixing(&self) -> bool {
        self.phase == SessionPhase::Mixing
    }

    pub fn autopilot_enabled(&self) -> bool {
        match self.phase {
            SessionPhase::Idle => false,
            SessionPhase::Mixing => !self.stop_after_mix,
            SessionPhase::Monitoring | SessionPhase::Ending => true,
        }
    }

    /// `Idle → Monitoring` with fresh defaults
    pub fn start(&mut self, active: DeckId, position: f64) -> bool {
        if self.phase != SessionPhase::Idle {
            return false;
        }
        self.epoch += 1;
        self.phase = SessionPhase::Monitoring;
        self.active_deck = active;
        self.last_mix_in_position = position;
        self.time_remaining = 0.0;
        self.stop_after_mix = false;
        true
    }

    /// Cancel a deferred stop while the transition is still in flight
    pub fn resume(&mut self) -> bool {
        if self.phase == SessionPhase::Mixing && self.stop_after_mix {
            self.stop_after_mix = false;
            true
        } else {
            false
        }
    }

    pub fn request_stop(&mut self) -> StopOutcome {
        match self.phase {
            SessionPhase::Monitoring => {
                self.epoch += 1;
                self.phase = SessionPhase::Idle;
                self.time_remaining = 0.0;
                StopOutcome::Stopped
            }
            SessionPhase::Mixing => {
                self.stop_after_mix = true;
                self.time_remaining = 0.0;
                StopOutcome::Deferred
            }
            SessionPhase::Idle | SessionPhase::Ending => StopOutcome::NotRunning,
        }
    }

    /// Display-only remaining time; ignored outside `Monitoring`
    pub fn set_time_remaining(&mut self, remaining: f64) {
        if self.phase == SessionPhase::Monitoring {
            self.time_remaining = remaining.max(0.0);
        }
    }

    /// `Monitoring → Mixing`, only from the tick's own epoch
    pub fn begin_mix(&mut self, epoch: u64) -> bool {
        if self.phase != SessionPhase::Monitoring || self.epoch != epoch {
            return false;
        }
        self.phase = SessionPhase::Mixing;
        true
    }

    /// `Mixing → Monitoring` after the engine refused to start
    pub fn abort_mix(&mut self) -> SessionPhase {
        if self.phase == SessionPhase::Mixing {
            self.finish_mix();
        }
        self.phase
    }

    /// `Mixing → Monitoring` (or `Idle` if a stop was deferred) with the new
    /// active deck anchored at its mix-in point
    pub fn complete_handover(&mut self, active: DeckId, mix_in_position: f64) -> SessionPhase {
        if self.phase != SessionPhase::Mixing {
            return self.phase;
        }
        self.active_deck = active;
        self.last_mix_in_position = mix_in_position;
        self.finish_mix();
        self.phase
    }

    /// `Monitoring → Ending`, only from the tick's own epoch
    pub fn begin_end(&mut self, epoch: u64) -> bool {
        if self.phase != SessionPhase::Monitoring || self.epoch != epoch {
            return false;
        }
        self.phase = SessionPhase::Ending;
        self.time_remaining = 0.0;
        true
    }

    /// `Ending → Idle`
    pub fn finish_end(&mut self) -> bool {
        if self.phase != SessionPhase::Ending {
            return false;
        }
        self.epoch += 1;
        self.phase = SessionPhase::Idle;
        true
    }

    fn finish_mix(&mut self) {
        if self.stop_after_mix {
            self.stop_after_mix = false;
            self.epoch += 1;
            self.phase = SessionPhase::Idle;
        } else {
            self.phase = SessionPhase::Monitoring;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut s = Session::default();
        assert!(!s.autopilot_enabled());

        assert!(s.start(DeckId::A, 0.0));
        let epoch = s.epoch();
        assert!(s.autopilot_enabled());

        assert!(s.begin_mix(epoch));
        assert!(s.is_mixing());
        assert!(!s.begin_mix(epoch));

        assert_eq!(s.complete_handover(DeckId::B, 10.0), SessionPhase::Monitoring);
        assert_eq!(s.active_deck(), DeckId::B);
        assert_eq!(s.last_mix_in_position(), 10.0);

        assert!(s.begin_end(epoch));
        assert!(s.finish_end());
        assert_eq!(s.phase(), SessionPhase::Idle);
        assert!(!s.autopilot_enabled());
    }

    #[test]
    fn test_stale_epoch_is_refused() {
        let mut s = Session::default();
        s.start(DeckId::A, 0.0);
        let old = s.epoch();
        s.request_stop();
        s.start(DeckId::A, 0.0);

        assert!(!s.begin_mix(old));
        assert!(!s.begin_end(old));
        assert_eq!(s.phase(), SessionPhase::Monitoring);
    }

    #[test]
    fn test_stop_during_mix_is_deferred() {
        let mut s = Session::default();
        s.start(DeckId::A, 0.0);
        s.begin_mix(s.epoch());
        s.set_time_remaining(42.0);

        assert_eq!(s.request_stop(), StopOutcome::Deferred);
        assert!(!s.autopilot_enabled());
        assert!(s.is_mixing());
        assert_eq!(s.time_remaining(), 0.0);

        // Toggle back on before the handover: keeps going
        assert!(s.resume());
        assert!(s.autopilot_enabled());
        s.request_stop();

        assert_eq!(s.complete_handover(DeckId::B, 5.0), SessionPhase::Idle);
        assert_eq!(s.active_deck(), DeckId::B);
    }

    #[test]
    fn test_time_remaining_only_while_monitoring() {
        let mut s = Session::default();
        s.set_time_remaining(30.0);
        assert_eq!(s.time_remaining(), 0.0);

        s.start(DeckId::B, 12.0);
        s.set_time_remaining(-3.0);
        assert_eq!(s.time_remaining(), 0.0);
        s.set_time_remaining(30.0);
        assert_eq!(s.time_remaining(), 30.0);

        assert_eq!(s.request_stop(), StopOutcome::Stopped);
        assert_eq!(s.time_remaining(), 0.0);
        assert_eq!(s.request_stop(), StopOutcome::NotRunning);
    }
}
