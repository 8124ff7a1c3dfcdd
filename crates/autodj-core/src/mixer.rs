//! Mixer capability
//!
//! The shared mixing surface: a crossfader (0 = deck A, 1 = deck B), a 3-band
//! EQ per channel in dB, a sampler for percussive accents and the session
//! recorder. Implemented by the audio backend; `sim::SimMixer` is the
//! in-memory reference implementation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::automation::RampCurve;
use crate::types::DeckId;

/// EQ band cut treated as a kill (dB)
pub const EQ_KILL_DB: f32 = -40.0;

/// EQ bands per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];
}

/// Per-channel EQ gains in dB (0 = flat)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Eq3 {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl Eq3 {
    pub fn is_flat(&self) -> bool {
        const EPS: f32 = 1e-3;
        self.low.abs() < EPS && self.mid.abs() < EPS && self.high.abs() < EPS
    }
}

/// Percussive one-shots available to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleHit {
    Kick,
    Snare,
    Crash,
    Horn,
}

impl SampleHit {
    pub fn name(&self) -> &'static str {
        match self {
            SampleHit::Kick => "kick",
            SampleHit::Snare => "snare",
            SampleHit::Crash => "crash",
            SampleHit::Horn => "horn",
        }
    }
}

/// Crossfader, channel EQ, sampler and recorder
///
/// Times passed to `*_at` methods are absolute audio-clock seconds.
pub trait Mixer: Send {
    /// Crossfader position at clock time "now"
    fn crossfader(&self) -> f32;
    fn set_crossfader(&mut self, value: f32, at: f64);
    fn ramp_crossfader(&mut self, value: f32, start: f64, end: f64, curve: RampCurve);

    fn eq(&self, channel: DeckId) -> Eq3;
    fn set_eq(&mut self, channel: DeckId, band: EqBand, db: f32, at: f64);
    fn ramp_eq(&mut self, channel: DeckId, band: EqBand, db: f32, start: f64, end: f64, curve: RampCurve);
    /// Flatten all bands on a channel and drop their automation
    fn reset_eq(&mut self, channel: DeckId);

    /// Fire a one-shot at `at` (or immediately)
    fn trigger(&mut self, sample: SampleHit, at: Option<f64>);

    fn start_recording(&mut self);
    fn stop_recording(&mut self);
    fn is_recording(&self) -> bool;
    /// Persist the last recording under `filename`; returns the written path
    fn download(&mut self, filename: &str) -> anyhow::Result<PathBuf>;
}

/// Shared mixer handle
pub type SharedMixer = Arc<Mutex<dyn Mixer>>;

/// Lock the mixer, recovering the guard if a previous holder panicked
pub fn lock_mixer(mixer: &SharedMixer) -> MutexGuard<'_, dyn Mixer + 'static> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}
