//! In-memory deck
//!
//! Reconstructs the playhead from `paused_offset + (now - started_at) * rate`
//! on every read, so the position never drifts from the shared clock.
//! Scheduled stops and natural end-of-track are settled lazily: reads compute
//! them, the next mutation folds them into the stored state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::automation::{ParamLane, RampCurve};
use crate::clock::SharedClock;
use crate::deck::{Deck, DeckEffects, DeckParam, FilterKind};
use crate::types::{MixPoint, Track};

/// Software deck driven by an [`AudioClock`](crate::clock::AudioClock)
pub struct SimDeck {
    name: String,
    clock: SharedClock,
    track: Option<Track>,

    playing: bool,
    /// Clock time playback (re)started; may lie in the future after `play_at`
    started_at: f64,
    /// Track position at `started_at`
    paused_offset: f64,
    rate: f64,
    reverse: bool,
    stop_time: Option<f64>,
    loop_region: Option<(f64, f64)>,

    filter_kind: FilterKind,
    lanes: HashMap<DeckParam, ParamLane>,

    reads: AtomicU64,
    mutations: u64,
}

impl SimDeck {
    pub fn new(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            clock,
            track: None,
            playing: false,
            started_at: 0.0,
            paused_offset: 0.0,
            rate: 1.0,
            reverse: false,
            stop_time: None,
            loop_region: None,
            filter_kind: FilterKind::Lowpass,
            lanes: neutral_lanes(),
            reads: AtomicU64::new(0),
            mutations: 0,
        }
    }

    /// Number of transport/state reads served so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of mutating calls received so far
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    /// Active loop region, if any
    pub fn loop_region(&self) -> Option<(f64, f64)> {
        self.loop_region
    }

    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn note_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn track_len(&self) -> f64 {
        self.track.as_ref().map(|t| t.duration).unwrap_or(0.0)
    }

    /// Playhead at clock time `t`, ignoring whether playback has ended
    fn playhead_at(&self, t: f64) -> f64 {
        if !self.playing {
            return self.paused_offset;
        }
        let t = self.stop_time.map_or(t, |stop| t.min(stop));
        if t <= self.started_at {
            return self.paused_offset;
        }

        let direction = if self.reverse { -1.0 } else { 1.0 };
        let mut pos = self.paused_offset + (t - self.started_at) * self.rate * direction;

        if let Some((start, end)) = self.loop_region {
            let len = end - start;
            if len > 0.0 && pos >= end && self.paused_offset <= end {
                pos = start + (pos - start) % len;
            }
        }

        pos.clamp(0.0, self.track_len())
    }

    /// Whether playback is still running at clock time `t`
    fn running_at(&self, t: f64) -> bool {
        if !self.playing {
            return false;
        }
        if self.stop_time.is_some_and(|stop| t >= stop) {
            return false;
        }
        if t <= self.started_at {
            return true;
        }
        let pos = self.playhead_at(t);
        let at_edge = if self.reverse {
            pos <= 0.0
        } else {
            self.loop_region.is_none() && pos >= self.track_len()
        };
        !at_edge
    }

    /// Fold any elapsed scheduled stop or end-of-track into the stored state
    fn settle(&mut self) {
        self.mutations += 1;
        let now = self.now();
        if self.playing && !self.running_at(now) {
            self.paused_offset = self.playhead_at(now);
            self.playing = false;
            self.stop_time = None;
        }
    }

    /// Re-anchor the running transport at "now" before changing rate/direction
    fn rebase(&mut self) {
        if !self.playing {
            return;
        }
        let now = self.now();
        if now > self.started_at {
            self.paused_offset = self.playhead_at(now);
            self.started_at = now;
        }
    }

    fn lane_mut(&mut self, param: DeckParam) -> &mut ParamLane {
        self.lanes
            .entry(param)
            .or_insert_with(|| ParamLane::new(param.neutral()))
    }

    fn lane_value(&self, param: DeckParam, t: f64) -> f32 {
        self.lanes
            .get(&param)
            .map(|lane| lane.value_at(t))
            .unwrap_or_else(|| param.neutral())
    }
}

fn neutral_lanes() -> HashMap<DeckParam, ParamLane> {
    DeckParam::ALL
        .iter()
        .map(|&p| (p, ParamLane::new(p.neutral())))
        .collect()
}

impl Deck for SimDeck {
    fn track(&self) -> Option<&Track> {
        self.note_read();
        self.track.as_ref()
    }

    fn is_playing(&self) -> bool {
        self.note_read();
        self.running_at(self.now())
    }

    fn current_time(&self) -> f64 {
        self.note_read();
        self.playhead_at(self.now())
    }

    fn position_at(&self, time: f64) -> f64 {
        self.note_read();
        self.playhead_at(time)
    }

    fn duration(&self) -> f64 {
        self.note_read();
        self.track_len()
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn load(&mut self, track: Track) {
        self.settle();
        log::debug!("SimDeck {}: loaded {}", self.name, track.display_name());
        self.track = Some(track);
        self.playing = false;
        self.paused_offset = 0.0;
        self.started_at = 0.0;
        self.stop_time = None;
        self.rate = 1.0;
        self.reverse = false;
        self.loop_region = None;
    }

    fn unload(&mut self) {
        self.settle();
        log::debug!("SimDeck {}: unloaded", self.name);
        self.track = None;
        self.playing = false;
        self.paused_offset = 0.0;
        self.started_at = 0.0;
        self.stop_time = None;
        self.loop_region = None;
    }

    fn play(&mut self) {
        self.settle();
        if self.playing || self.track.is_none() {
            return;
        }
        self.started_at = self.now();
        self.stop_time = None;
        self.playing = true;
    }

    fn pause(&mut self) {
        self.settle();
        if !self.playing {
            return;
        }
        self.paused_offset = self.playhead_at(self.now());
        self.playing = false;
        self.stop_time = None;
    }

    fn seek(&mut self, offset: f64) {
        self.settle();
        let offset = offset.clamp(0.0, self.track_len());
        if self.playing {
            self.started_at = self.started_at.max(self.now());
        }
        self.paused_offset = offset;
    }

    fn play_at(&mut self, time: f64, offset: f64) {
        self.settle();
        if self.track.is_none() {
            return;
        }
        self.started_at = time;
        self.paused_offset = offset.clamp(0.0, self.track_len());
        self.stop_time = None;
        self.playing = true;
    }

    fn stop_at(&mut self, time: f64) {
        self.settle();
        if !self.playing {
            return;
        }
        if time <= self.now() {
            self.pause();
        } else {
            self.stop_time = Some(time);
        }
    }

    fn set_speed(&mut self, rate: f64) {
        self.settle();
        self.rebase();
        self.rate = rate.max(0.0);
    }

    fn set_reverse(&mut self, reverse: bool) {
        self.settle();
        self.rebase();
        self.reverse = reverse;
    }

    fn set_loop(&mut self, start: f64, end: f64) {
        self.settle();
        if start < 0.0 || end <= start || end > self.track_len() {
            log::debug!("SimDeck {}: ignoring invalid loop {:.2}..{:.2}", self.name, start, end);
            return;
        }
        self.rebase();
        self.loop_region = Some((start, end));
    }

    fn clear_loop(&mut self) {
        self.settle();
        self.rebase();
        self.loop_region = None;
    }

    fn update_mix_points(&mut self, points: Vec<MixPoint>) {
        self.mutations += 1;
        if let Some(track) = self.track.as_mut() {
            track.mix_points = points;
        }
    }

    fn set_param(&mut self, param: DeckParam, value: f32, at: f64) {
        self.mutations += 1;
        self.lane_mut(param).set_value_at(value, at);
    }

    fn ramp_param(&mut self, param: DeckParam, value: f32, start: f64, end: f64, curve: RampCurve) {
        self.mutations += 1;
        self.lane_mut(param).ramp_to(value, start, end, curve);
    }

    fn set_filter_kind(&mut self, kind: FilterKind) {
        self.mutations += 1;
        self.filter_kind = kind;
    }

    fn effects(&self) -> DeckEffects {
        let now = self.now();
        DeckEffects {
            volume_db: self.lane_value(DeckParam::Volume, now),
            filter_kind: self.filter_kind,
            filter_cutoff: self.lane_value(DeckParam::FilterCutoff, now),
            filter_q: self.lane_value(DeckParam::FilterQ, now),
            delay_wet: self.lane_value(DeckParam::DelayWet, now),
            delay_feedback: self.lane_value(DeckParam::DelayFeedback, now),
            reverb_wet: self.lane_value(DeckParam::ReverbWet, now),
            reverb_decay: self.lane_value(DeckParam::ReverbDecay, now),
            playback_rate: self.rate,
            reverse: self.reverse,
            loop_enabled: self.loop_region.is_some(),
        }
    }

    fn reset_effects(&mut self) {
        self.settle();
        self.rebase();
        for (param, lane) in self.lanes.iter_mut() {
            lane.reset(param.neutral());
        }
        self.filter_kind = FilterKind::Lowpass;
        self.rate = 1.0;
        self.reverse = false;
        self.loop_region = None;
    }
}
