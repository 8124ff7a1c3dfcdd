//! In-memory mixer
//!
//! Crossfader and EQ are automation lanes evaluated against the shared clock.
//! The recorder keeps a timestamped log of every mixer action taken while
//! recording; `download` writes that log as a YAML cue sheet.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::automation::{ParamLane, RampCurve};
use crate::clock::SharedClock;
use crate::mixer::{Eq3, EqBand, Mixer, SampleHit};
use crate::types::DeckId;

/// One entry of the recorded cue sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueEntry {
    /// Seconds since recording started
    pub at: f64,
    pub action: String,
}

/// A finished (or running) recording
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedSet {
    pub started_at: f64,
    pub stopped_at: Option<f64>,
    pub entries: Vec<CueEntry>,
}

/// Software mixer driven by an [`AudioClock`](crate::clock::AudioClock)
pub struct SimMixer {
    clock: SharedClock,
    output_dir: PathBuf,

    crossfader: ParamLane,
    eq: HashMap<(DeckId, EqBand), ParamLane>,
    triggers: Vec<(SampleHit, f64)>,

    recording: bool,
    current_set: Option<RecordedSet>,

    mutations: u64,
}

impl SimMixer {
    /// Create a mixer that writes recordings into `output_dir`
    pub fn new(clock: SharedClock, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            clock,
            output_dir: output_dir.into(),
            crossfader: ParamLane::new(DeckId::A.crossfader_extreme()),
            eq: HashMap::new(),
            triggers: Vec::new(),
            recording: false,
            current_set: None,
            mutations: 0,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Every sample trigger with its scheduled clock time
    pub fn triggers(&self) -> &[(SampleHit, f64)] {
        &self.triggers
    }

    /// The current or last recording, if any
    pub fn recorded_set(&self) -> Option<&RecordedSet> {
        self.current_set.as_ref()
    }

    /// Number of mutating calls received so far
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    fn note(&mut self, at: f64, action: impl FnOnce() -> String) {
        self.mutations += 1;
        if !self.recording {
            return;
        }
        if let Some(set) = self.current_set.as_mut() {
            set.entries.push(CueEntry {
                at: (at - set.started_at).max(0.0),
                action: action(),
            });
        }
    }

    fn eq_lane(&mut self, channel: DeckId, band: EqBand) -> &mut ParamLane {
        self.eq
            .entry((channel, band))
            .or_insert_with(|| ParamLane::new(0.0))
    }

    fn eq_value(&self, channel: DeckId, band: EqBand, t: f64) -> f32 {
        self.eq
            .get(&(channel, band))
            .map(|lane| lane.value_at(t))
            .unwrap_or(0.0)
    }
}

impl Mixer for SimMixer {
    fn crossfader(&self) -> f32 {
        self.crossfader.value_at(self.clock.now())
    }

    fn set_crossfader(&mut self, value: f32, at: f64) {
        let value = value.clamp(0.0, 1.0);
        self.crossfader.set_value_at(value, at);
        self.note(at, || format!("crossfader -> {:.2}", value));
    }

    fn ramp_crossfader(&mut self, value: f32, start: f64, end: f64, curve: RampCurve) {
        let value = value.clamp(0.0, 1.0);
        self.crossfader.ramp_to(value, start, end, curve);
        self.note(start, || format!("crossfader ramp -> {:.2} over {:.1}s", value, end - start));
    }

    fn eq(&self, channel: DeckId) -> Eq3 {
        let now = self.clock.now();
        Eq3 {
            low: self.eq_value(channel, EqBand::Low, now),
            mid: self.eq_value(channel, EqBand::Mid, now),
            high: self.eq_value(channel, EqBand::High, now),
        }
    }

    fn set_eq(&mut self, channel: DeckId, band: EqBand, db: f32, at: f64) {
        self.eq_lane(channel, band).set_value_at(db, at);
        self.note(at, || format!("eq {} {:?} -> {:.0} dB", channel, band, db));
    }

    fn ramp_eq(&mut self, channel: DeckId, band: EqBand, db: f32, start: f64, end: f64, curve: RampCurve) {
        self.eq_lane(channel, band).ramp_to(db, start, end, curve);
        self.note(start, || format!("eq {} {:?} ramp -> {:.0} dB", channel, band, db));
    }

    fn reset_eq(&mut self, channel: DeckId) {
        for band in EqBand::ALL {
            self.eq_lane(channel, band).reset(0.0);
        }
        let now = self.clock.now();
        self.note(now, || format!("eq {} flat", channel));
    }

    fn trigger(&mut self, sample: SampleHit, at: Option<f64>) {
        let at = at.unwrap_or_else(|| self.clock.now());
        self.triggers.push((sample, at));
        self.note(at, || format!("sample {}", sample.name()));
    }

    fn start_recording(&mut self) {
        self.mutations += 1;
        if self.recording {
            return;
        }
        let now = self.clock.now();
        log::info!("SimMixer: recording started at {:.2}s", now);
        self.recording = true;
        self.current_set = Some(RecordedSet {
            started_at: now,
            stopped_at: None,
            entries: Vec::new(),
        });
    }

    fn stop_recording(&mut self) {
        self.mutations += 1;
        if !self.recording {
            return;
        }
        let now = self.clock.now();
        self.recording = false;
        if let Some(set) = self.current_set.as_mut() {
            set.stopped_at = Some(now);
            log::info!(
                "SimMixer: recording stopped ({} cue entries, {:.1}s)",
                set.entries.len(),
                now - set.started_at
            );
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn download(&mut self, filename: &str) -> anyhow::Result<PathBuf> {
        self.mutations += 1;
        let set = self
            .current_set
            .as_ref()
            .context("No recording to download")?;

        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create recording directory: {:?}", self.output_dir)
        })?;

        let path = self.output_dir.join(filename);
        let yaml = serde_yaml::to_string(set).context("Failed to serialize cue sheet")?;
        std::fs::write(&path, yaml)
            .with_context(|| format!("Failed to write cue sheet: {:?}", path))?;

        log::info!("SimMixer: saved recording to {:?}", path);
        Ok(path)
    }
}
