//! Orchestrator lifecycle events
//!
//! Published on an [`EventBus`] in the order things happen, so a UI (or a
//! test) can follow a session without parsing log text.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::engine::TransitionKind;
use crate::types::{DeckId, TrackId};

/// One step of an auto-pilot session
#[derive(Debug, Clone, PartialEq)]
pub enum AutoDjEvent {
    AutoPilotToggled {
        enabled: bool,
    },
    AnalysisStarted {
        source: TrackId,
        target: TrackId,
    },
    AnalysisCompleted {
        source: TrackId,
        target: TrackId,
        points: usize,
        /// The heuristic fallback pair was used
        heuristic: bool,
    },
    AnalysisFailed {
        source: TrackId,
        target: TrackId,
        reason: String,
    },
    /// A queued track was loaded onto a free deck
    TrackQueued {
        deck: DeckId,
        track: TrackId,
        /// Tracks still waiting in the queue
        remaining: usize,
    },
    MixPointFound {
        out_time: f64,
        in_time: f64,
        score: f32,
    },
    NoMatchingMixIn {
        out_time: f64,
        score: f32,
    },
    TransitionSelected {
        kind: TransitionKind,
        /// Forced near the end of the track without mix points
        fallback: bool,
    },
    TransitionStarted {
        kind: TransitionKind,
        source: DeckId,
        target: DeckId,
        mix_in: f64,
        duration: f64,
    },
    TransitionCompleted {
        kind: TransitionKind,
    },
    HandoverCompleted {
        active: DeckId,
        /// Track loaded onto the freed deck, if the queue had one
        loaded: Option<TrackId>,
    },
    SessionEnded {
        recording: Option<PathBuf>,
    },
}

impl AutoDjEvent {
    /// Variant name, for compact logging and sequence assertions
    pub fn name(&self) -> &'static str {
        match self {
            AutoDjEvent::AutoPilotToggled { .. } => "AutoPilotToggled",
            AutoDjEvent::AnalysisStarted { .. } => "AnalysisStarted",
            AutoDjEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            AutoDjEvent::AnalysisFailed { .. } => "AnalysisFailed",
            AutoDjEvent::TrackQueued { .. } => "TrackQueued",
            AutoDjEvent::MixPointFound { .. } => "MixPointFound",
            AutoDjEvent::NoMatchingMixIn { .. } => "NoMatchingMixIn",
            AutoDjEvent::TransitionSelected { .. } => "TransitionSelected",
            AutoDjEvent::TransitionStarted { .. } => "TransitionStarted",
            AutoDjEvent::TransitionCompleted { .. } => "TransitionCompleted",
            AutoDjEvent::HandoverCompleted { .. } => "HandoverCompleted",
            AutoDjEvent::SessionEnded { .. } => "SessionEnded",
        }
    }
}

/// Event bus for broadcasting orchestrator events
///
/// Every subscriber gets its own bounded queue and sees the full sequence.
/// Publishing never blocks: a subscriber whose queue is full misses the event,
/// and subscribers whose receiver was dropped are pruned on the next publish.
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<AutoDjEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// New receiver; only events published after this call are delivered
    pub fn subscribe(&self) -> Receiver<AutoDjEvent> {
        let (sender, receiver) = channel::bounded(self.capacity);
        self.lock_subscribers().push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Deliver to every live subscriber; returns how many received it
    pub fn publish(&self, event: AutoDjEvent) -> usize {
        let mut delivered = 0;
        self.lock_subscribers().retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(e)) => {
                log::debug!("AutoDJ: subscriber queue full, dropped event {}", e.name());
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Sender<AutoDjEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
