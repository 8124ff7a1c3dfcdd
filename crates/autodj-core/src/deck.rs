//! Deck capability
//!
//! A deck is a single transport-controllable playback slot holding at most
//! one track, with a small insert chain (filter → delay → reverb → volume)
//! the transition engine automates. The audio backend implements this trait;
//! `sim::SimDeck` is the in-memory reference implementation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::automation::RampCurve;
use crate::types::{MixPoint, Track};

/// Fully open filter cutoff (Hz)
pub const FILTER_OPEN_HZ: f32 = 20000.0;
/// Neutral filter resonance
pub const FILTER_NEUTRAL_Q: f32 = 1.0;
/// Volume floor treated as silence (dB)
pub const SILENCE_DB: f32 = -60.0;

/// Continuously automatable deck parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckParam {
    /// Player output level (dB, 0 = unity)
    Volume,
    /// Filter cutoff frequency (Hz)
    FilterCutoff,
    /// Filter resonance
    FilterQ,
    /// Delay wet mix (0..1)
    DelayWet,
    /// Delay feedback (0..1)
    DelayFeedback,
    /// Reverb wet mix (0..1)
    ReverbWet,
    /// Reverb decay time (seconds)
    ReverbDecay,
}

impl DeckParam {
    pub const ALL: [DeckParam; 7] = [
        DeckParam::Volume,
        DeckParam::FilterCutoff,
        DeckParam::FilterQ,
        DeckParam::DelayWet,
        DeckParam::DelayFeedback,
        DeckParam::ReverbWet,
        DeckParam::ReverbDecay,
    ];

    /// Value at which the parameter leaves the signal untouched
    pub fn neutral(self) -> f32 {
        match self {
            DeckParam::Volume => 0.0,
            DeckParam::FilterCutoff => FILTER_OPEN_HZ,
            DeckParam::FilterQ => FILTER_NEUTRAL_Q,
            DeckParam::DelayWet => 0.0,
            DeckParam::DelayFeedback => 0.0,
            DeckParam::ReverbWet => 0.0,
            DeckParam::ReverbDecay => 1.5,
        }
    }
}

/// Filter response type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
}

/// Snapshot of a deck's insert chain and transport modifiers
#[derive(Debug, Clone, PartialEq)]
pub struct DeckEffects {
    pub volume_db: f32,
    pub filter_kind: FilterKind,
    pub filter_cutoff: f32,
    pub filter_q: f32,
    pub delay_wet: f32,
    pub delay_feedback: f32,
    pub reverb_wet: f32,
    pub reverb_decay: f32,
    pub playback_rate: f64,
    pub reverse: bool,
    pub loop_enabled: bool,
}

impl DeckEffects {
    /// True when nothing in the chain colours or alters playback
    pub fn is_neutral(&self) -> bool {
        const EPS: f32 = 1e-3;
        self.volume_db.abs() < EPS
            && self.filter_kind == FilterKind::Lowpass
            && (self.filter_cutoff - FILTER_OPEN_HZ).abs() < 1.0
            && (self.filter_q - FILTER_NEUTRAL_Q).abs() < EPS
            && self.delay_wet.abs() < EPS
            && self.delay_feedback.abs() < EPS
            && self.reverb_wet.abs() < EPS
            && (self.playback_rate - 1.0).abs() < 1e-6
            && !self.reverse
            && !self.loop_enabled
    }
}

/// Transport and effect control for one deck
///
/// Times passed to `*_at` methods are absolute audio-clock seconds.
pub trait Deck: Send {
    fn track(&self) -> Option<&Track>;
    fn is_playing(&self) -> bool;
    /// Playhead position in seconds, derived from the clock on every call
    fn current_time(&self) -> f64;
    /// Playhead position at clock time `time` under the current transport state
    fn position_at(&self, time: f64) -> f64;
    /// Loaded track length in seconds (0 when empty)
    fn duration(&self) -> f64;
    fn playback_rate(&self) -> f64;

    fn load(&mut self, track: Track);
    fn unload(&mut self);

    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, offset: f64);
    /// Start playback at clock time `time` from track position `offset`
    fn play_at(&mut self, time: f64, offset: f64);
    /// Stop playback at clock time `time`
    fn stop_at(&mut self, time: f64);
    fn set_speed(&mut self, rate: f64);
    fn set_reverse(&mut self, reverse: bool);

    /// Loop between two track positions (seconds)
    fn set_loop(&mut self, start: f64, end: f64);
    fn clear_loop(&mut self);

    /// Replace the loaded track's mix points; never touches other fields
    fn update_mix_points(&mut self, points: Vec<MixPoint>);

    fn set_param(&mut self, param: DeckParam, value: f32, at: f64);
    fn ramp_param(&mut self, param: DeckParam, value: f32, start: f64, end: f64, curve: RampCurve);
    fn set_filter_kind(&mut self, kind: FilterKind);

    /// Current effect state at clock time "now"
    fn effects(&self) -> DeckEffects;
    /// Return every effect, rate, reverse and loop setting to neutral
    fn reset_effects(&mut self);
}

/// Shared deck handle used by the orchestrator and the engine
pub type SharedDeck = Arc<Mutex<dyn Deck>>;

/// Lock a deck, recovering the guard if a previous holder panicked
pub fn lock_deck(deck: &SharedDeck) -> MutexGuard<'_, dyn Deck + 'static> {
    deck.lock().unwrap_or_else(PoisonError::into_inner)
}
