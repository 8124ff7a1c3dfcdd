//! Auto-pilot orchestrator
//!
//! Watches the active deck on a fixed interval and decides when, and how, to
//! hand over to the other deck:
//!
//! 1. Keep the idle deck loaded from the queue, and make sure every
//!    directional track pair carries mix points (analyzed in the background).
//! 2. After a grace period since the last mix-in, look for a mix-out point
//!    within the trigger window and a mix-in on the target of similar score.
//!    A match starts the selected transition.
//! 3. Close to the end of the track without a match, force the configured
//!    fallback transition.
//! 4. With nothing left to play, end the session: decks paused, recording
//!    finalized.
//!
//! At most one transition is in flight. While it runs, monitor ticks return
//! immediately without touching the decks; the handover after it settles
//! (new active deck, queue refill) is the only thing that ends `Mixing`.

mod events;
mod session;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::Receiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::analysis::{MixPointAnalyzer, PairAnalysis};
use crate::clock::SharedClock;
use crate::config::AutoDjConfig;
use crate::deck::{lock_deck, SharedDeck};
use crate::engine::{TransitionEngine, TransitionKind};
use crate::error::{AutoDjError, Result};
use crate::mixer::{lock_mixer, SharedMixer};
use crate::queue::{lock_queue, SharedQueue};
use crate::selector::TransitionSelector;
use crate::types::{DeckId, MixPoint, MixPointKind, Track, TrackId, TransitionParams};

pub use events::{AutoDjEvent, EventBus};
pub use session::{Session, SessionPhase, StopOutcome};

/// What a single monitor tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Auto-pilot is off
    Inactive,
    /// Another tick or a transition is in flight
    Busy,
    /// The session changed under this tick; nothing was applied
    Stale,
    /// The active deck was paused mid-track
    Paused,
    /// Nothing to do yet
    Waiting,
    /// A queued track was loaded onto the idle deck
    TargetLoaded(TrackId),
    TransitionStarted {
        kind: TransitionKind,
        mix_in: f64,
        fallback: bool,
    },
    /// A mix-out was in its window but the target had no compatible mix-in
    NoMatchingMixIn,
    SessionEnded,
}

/// Transport snapshot of one deck
#[derive(Debug, Clone)]
struct DeckState {
    playing: bool,
    position: f64,
    duration: f64,
    track: Option<TrackId>,
    bpm: Option<f64>,
}

impl DeckState {
    fn read(deck: &SharedDeck) -> Self {
        let deck = lock_deck(deck);
        Self {
            playing: deck.is_playing(),
            position: deck.current_time(),
            duration: deck.duration(),
            track: deck.track().map(|t| t.id.clone()),
            bpm: deck.track().and_then(|t| t.bpm),
        }
    }
}

/// Outcome of the mix-point lookup
enum MixMatch {
    Found { out: MixPoint, mix_in: MixPoint },
    Unmatched(MixPoint),
    None,
}

/// Everything needed to start one transition
struct Plan {
    source: DeckId,
    target: DeckId,
    mix_out: f64,
    mix_in: f64,
    remaining: f64,
    fallback: bool,
}

/// Clears the tick flag however `tick` exits
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    clock: SharedClock,
    decks: [SharedDeck; 2],
    mixer: SharedMixer,
    queue: SharedQueue,
    engine: TransitionEngine,
    analyzer: MixPointAnalyzer,
    selector: Mutex<TransitionSelector>,
    config: AutoDjConfig,
    fallback_kind: TransitionKind,
    events: EventBus,

    session: Mutex<Session>,
    /// Directional pairs with an analysis in flight, or that failed this session
    analyzing: Mutex<HashSet<(TrackId, TrackId)>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    ticking: AtomicBool,
}

/// Handle to the auto-pilot
///
/// Cheap to clone; all clones drive the same session. Turning the auto-pilot
/// on spawns Tokio tasks, so [`toggle_auto_pilot`](Self::toggle_auto_pilot)
/// and [`tick`](Self::tick) must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct AutoDj {
    inner: Arc<Inner>,
}

impl AutoDj {
    pub fn new(
        clock: SharedClock,
        decks: [SharedDeck; 2],
        mixer: SharedMixer,
        queue: SharedQueue,
        config: AutoDjConfig,
    ) -> Self {
        let engine = TransitionEngine::new(
            clock.clone(),
            decks.clone(),
            mixer.clone(),
            config.transition.clone(),
        );
        let fallback_kind = TransitionKind::parse(&config.monitor.fallback_transition).unwrap_or_else(|e| {
            log::warn!("AutoDJ: {}, falling back to {}", e, TransitionKind::SlamCut);
            TransitionKind::SlamCut
        });

        Self {
            inner: Arc::new(Inner {
                clock,
                decks,
                mixer,
                queue,
                engine,
                analyzer: MixPointAnalyzer::new(config.analysis.clone()),
                selector: Mutex::new(TransitionSelector::new(config.selector.clone())),
                fallback_kind,
                events: EventBus::default(),
                session: Mutex::new(Session::default()),
                analyzing: Mutex::new(HashSet::new()),
                monitor: Mutex::new(None),
                ticking: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &AutoDjConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.inner.engine
    }

    /// Receive orchestrator events from now on
    ///
    /// Each call returns an independent receiver that sees the full sequence.
    pub fn subscribe(&self) -> Receiver<AutoDjEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the session state
    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    pub fn is_auto_pilot(&self) -> bool {
        self.lock_session().autopilot_enabled()
    }

    pub fn is_mixing(&self) -> bool {
        self.lock_session().is_mixing()
    }

    pub fn active_deck(&self) -> DeckId {
        self.lock_session().active_deck()
    }

    pub fn time_remaining(&self) -> f64 {
        self.lock_session().time_remaining()
    }

    /// Flip the auto-pilot; returns the new state
    ///
    /// Turning on with both decks silent starts deck A (or B, or the head of
    /// the queue on A) at its crossfader extreme. Turning on with nothing to
    /// play leaves the auto-pilot off. Turning off mid-transition lets the
    /// transition and its handover finish first.
    pub fn toggle_auto_pilot(&self) -> bool {
        if self.is_auto_pilot() {
            self.switch_off()
        } else {
            self.switch_on()
        }
    }

    fn switch_on(&self) -> bool {
        if self.lock_session().resume() {
            log::info!("AutoDJ: auto-pilot back on, transition still in flight");
            self.ensure_monitor();
            self.emit(AutoDjEvent::AutoPilotToggled { enabled: true });
            return true;
        }

        let active = match self.prepare_start() {
            Ok(deck) => deck,
            Err(e) => {
                log::warn!("AutoDJ: not starting auto-pilot: {}", e);
                return false;
            }
        };
        let position = lock_deck(self.deck(active)).current_time();
        if !self.lock_session().start(active, position) {
            return self.is_auto_pilot();
        }
        self.lock_analyzing().clear();

        if self.inner.config.recording.enabled {
            let mut mixer = lock_mixer(&self.inner.mixer);
            if !mixer.is_recording() {
                mixer.start_recording();
            }
        }

        log::info!("AutoDJ: auto-pilot on, deck {} active at {:.1}s", active, position);
        self.emit(AutoDjEvent::AutoPilotToggled { enabled: true });
        self.ensure_monitor();
        true
    }

    fn switch_off(&self) -> bool {
        let outcome = self.lock_session().request_stop();
        match outcome {
            StopOutcome::Stopped => {
                self.stop_monitor();
                log::info!("AutoDJ: auto-pilot off");
                self.emit(AutoDjEvent::AutoPilotToggled { enabled: false });
                self.finish_session();
            }
            StopOutcome::Deferred => {
                self.stop_monitor();
                log::info!("AutoDJ: auto-pilot off after the current transition");
                self.emit(AutoDjEvent::AutoPilotToggled { enabled: false });
            }
            StopOutcome::NotRunning => {}
        }
        false
    }

    /// Pick the deck to start from, starting playback if both are silent
    fn prepare_start(&self) -> Result<DeckId> {
        if let Some(playing) = DeckId::ALL
            .into_iter()
            .find(|id| lock_deck(self.deck(*id)).is_playing())
        {
            return Ok(playing);
        }

        let loaded = DeckId::ALL
            .into_iter()
            .find(|id| lock_deck(self.deck(*id)).track().is_some());
        let start = match loaded {
            Some(id) => id,
            None => {
                let (track, left) = self.pop_queue().ok_or(AutoDjError::NoPlayableTrack)?;
                self.load(DeckId::A, track, left);
                DeckId::A
            }
        };

        lock_mixer(&self.inner.mixer).set_crossfader(start.crossfader_extreme(), self.inner.clock.now());
        lock_deck(self.deck(start)).play();
        Ok(start)
    }

    fn ensure_monitor(&self) {
        let mut slot = self.inner.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let this = self.clone();
        *slot = Some(tokio::spawn(async move { this.monitor_loop().await }));
    }

    fn stop_monitor(&self) {
        if let Some(handle) = self.take_monitor() {
            handle.abort();
        }
    }

    fn take_monitor(&self) -> Option<JoinHandle<()>> {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn monitor_loop(self) {
        let period = Duration::from_millis(self.inner.config.monitor.poll_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match self.tick() {
                TickOutcome::Inactive | TickOutcome::SessionEnded => break,
                _ => {}
            }
        }
        log::debug!("AutoDJ: monitor loop stopped");
    }

    /// One monitor step
    ///
    /// Runs on the monitor interval; also callable directly. A tick while a
    /// transition is in flight returns `Busy` without reading any deck.
    pub fn tick(&self) -> TickOutcome {
        let Some(_guard) = TickGuard::acquire(&self.inner.ticking) else {
            return TickOutcome::Busy;
        };

        let (phase, epoch, active, last_mix_in) = {
            let s = self.lock_session();
            (s.phase(), s.epoch(), s.active_deck(), s.last_mix_in_position())
        };
        match phase {
            SessionPhase::Mixing => return TickOutcome::Busy,
            SessionPhase::Idle | SessionPhase::Ending => return TickOutcome::Inactive,
            SessionPhase::Monitoring => {}
        }

        let monitor = &self.inner.config.monitor;
        let target = active.other();
        let source_state = DeckState::read(self.deck(active));
        let remaining = (source_state.duration - source_state.position).max(0.0);
        self.lock_session().set_time_remaining(remaining);

        let finished = source_state.track.is_none() || remaining < monitor.end_of_track_secs;
        if !source_state.playing && !finished {
            return TickOutcome::Paused;
        }

        let target_state = DeckState::read(self.deck(target));
        let Some(target_id) = target_state.track.clone() else {
            return self.fill_target(epoch, target, remaining);
        };

        let plan = |mix_out, mix_in, fallback| Plan {
            source: active,
            target,
            mix_out,
            mix_in,
            remaining,
            fallback,
        };

        let Some(source_id) = source_state.track.clone() else {
            // Nothing left on the active deck but the other one is loaded
            return self.start_transition(epoch, plan(0.0, 0.0, true), &source_state, &target_state);
        };

        self.ensure_analysis(active);

        let mut unmatched = false;
        if source_state.position - last_mix_in > monitor.grace_period_secs {
            match self.find_mix(active, &source_id, &target_id, source_state.position) {
                MixMatch::Found { out, mix_in } => {
                    log::info!(
                        "AutoDJ: mix-out at {:.1}s (score {:.0}) -> mix-in at {:.1}s (score {:.0})",
                        out.time,
                        out.score,
                        mix_in.time,
                        mix_in.score
                    );
                    self.emit(AutoDjEvent::MixPointFound {
                        out_time: out.time,
                        in_time: mix_in.time,
                        score: out.score,
                    });
                    return self.start_transition(
                        epoch,
                        plan(out.time, mix_in.time, false),
                        &source_state,
                        &target_state,
                    );
                }
                MixMatch::Unmatched(out) => {
                    let err = AutoDjError::NoMatchingMixIn {
                        target: target_id.clone(),
                        out_time: out.time,
                        score: out.score,
                    };
                    log::info!("AutoDJ: {}", err);
                    self.emit(AutoDjEvent::NoMatchingMixIn {
                        out_time: out.time,
                        score: out.score,
                    });
                    unmatched = true;
                }
                MixMatch::None => {}
            }
        }

        if remaining <= monitor.fallback_threshold_secs {
            log::info!(
                "AutoDJ: {:.1}s left on deck {} without a mix point, forcing {}",
                remaining,
                active,
                self.inner.fallback_kind
            );
            return self.start_transition(epoch, plan(source_state.position, 0.0, true), &source_state, &target_state);
        }

        if unmatched {
            TickOutcome::NoMatchingMixIn
        } else {
            TickOutcome::Waiting
        }
    }

    /// Load the idle deck from the queue, or end the session at the end of
    /// the last track
    fn fill_target(&self, epoch: u64, target: DeckId, remaining: f64) -> TickOutcome {
        if self.lock_session().epoch() != epoch {
            return TickOutcome::Stale;
        }
        if let Some((track, left)) = self.pop_queue() {
            let id = track.id.clone();
            self.load(target, track, left);
            self.ensure_analysis(target.other());
            return TickOutcome::TargetLoaded(id);
        }
        if remaining < self.inner.config.monitor.end_of_track_secs {
            return self.end_session(epoch);
        }
        TickOutcome::Waiting
    }

    /// First mix-out on the active deck whose trigger window contains
    /// `position`, with its best mix-in on the target
    fn find_mix(&self, active: DeckId, source_id: &TrackId, target_id: &TrackId, position: f64) -> MixMatch {
        let monitor = &self.inner.config.monitor;

        let out = {
            let deck = lock_deck(self.deck(active));
            deck.track().and_then(|t| {
                t.out_points_for(target_id)
                    .find(|mp| {
                        position >= mp.time - monitor.trigger_window_before_secs
                            && position <= mp.time + monitor.trigger_window_after_secs
                    })
                    .cloned()
            })
        };
        let Some(out) = out else {
            return MixMatch::None;
        };

        let mix_in = {
            let deck = lock_deck(self.deck(active.other()));
            deck.track().and_then(|t| {
                let compatible: Vec<&MixPoint> = t
                    .in_points_for(source_id)
                    .filter(|mp| (mp.score - out.score).abs() < monitor.score_tolerance)
                    .collect();
                compatible
                    .iter()
                    .find(|mp| Some(mp.time) == out.matching_time)
                    .or_else(|| compatible.first())
                    .map(|mp| (*mp).clone())
            })
        };

        match mix_in {
            Some(mix_in) => MixMatch::Found { out, mix_in },
            None => MixMatch::Unmatched(out),
        }
    }

    fn start_transition(
        &self,
        epoch: u64,
        plan: Plan,
        source_state: &DeckState,
        target_state: &DeckState,
    ) -> TickOutcome {
        if !self.lock_session().begin_mix(epoch) {
            return TickOutcome::Stale;
        }

        let transition = &self.inner.config.transition;
        let source_bpm = source_state.bpm.unwrap_or(transition.default_bpm);
        let target_bpm = target_state.bpm.unwrap_or(transition.default_bpm);

        let (kind, duration) = if plan.fallback {
            (self.inner.fallback_kind, self.inner.config.monitor.fallback_duration_secs)
        } else {
            let kind = self.select_kind(plan.source, plan.target, plan.mix_out);
            let duration = kind
                .duration_secs(source_bpm, transition)
                .min(plan.remaining.max(transition.min_duration_secs));
            (kind, duration)
        };

        let params = TransitionParams {
            kind,
            duration,
            mix_out_point: plan.mix_out,
            mix_in_point: plan.mix_in,
            source_bpm,
            target_bpm,
        };

        self.emit(AutoDjEvent::TransitionSelected {
            kind,
            fallback: plan.fallback,
        });
        self.emit(AutoDjEvent::TransitionStarted {
            kind,
            source: plan.source,
            target: plan.target,
            mix_in: plan.mix_in,
            duration,
        });

        let this = self.clone();
        let (source, target) = (plan.source, plan.target);
        tokio::spawn(async move { this.run_transition(params, source, target).await });

        TickOutcome::TransitionStarted {
            kind,
            mix_in: plan.mix_in,
            fallback: plan.fallback,
        }
    }

    fn select_kind(&self, source: DeckId, target: DeckId, mix_out: f64) -> TransitionKind {
        let source_track = lock_deck(self.deck(source)).track().cloned();
        let target_track = lock_deck(self.deck(target)).track().cloned();
        let (Some(source_track), Some(target_track)) = (source_track, target_track) else {
            return self.inner.fallback_kind;
        };
        let Some(out) = source_track
            .out_points_for(&target_track.id)
            .find(|mp| mp.time == mix_out)
            .cloned()
        else {
            return self.inner.fallback_kind;
        };

        self.inner
            .selector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .select(&out, &source_track, &target_track)
    }

    async fn run_transition(self, params: TransitionParams, source: DeckId, target: DeckId) {
        let kind = params.kind;
        let mix_in = params.mix_in_point;

        match self.inner.engine.execute(params, source, target).await {
            Ok(()) => {
                self.emit(AutoDjEvent::TransitionCompleted { kind });
                self.handover(source, target, mix_in);
            }
            Err(e) => {
                log::warn!("AutoDJ: {} did not run: {}", kind, e);
                if self.lock_session().abort_mix() == SessionPhase::Idle {
                    self.finish_session();
                }
            }
        }
    }

    /// Swap deck roles after a settled transition and refill the freed deck
    fn handover(&self, source: DeckId, target: DeckId, mix_in: f64) {
        lock_deck(self.deck(source)).unload();

        let loaded = self.pop_queue().map(|(track, left)| {
            let id = track.id.clone();
            self.load(source, track, left);
            id
        });
        if loaded.is_some() {
            self.ensure_analysis(target);
        }

        let phase = self.lock_session().complete_handover(target, mix_in);
        log::info!("AutoDJ: handover complete, deck {} active", target);
        self.emit(AutoDjEvent::HandoverCompleted { active: target, loaded });

        if phase == SessionPhase::Idle {
            self.finish_session();
        }
    }

    /// Tear down at queue exhaustion
    fn end_session(&self, epoch: u64) -> TickOutcome {
        if !self.lock_session().begin_end(epoch) {
            return TickOutcome::Stale;
        }
        log::info!("AutoDJ: queue exhausted, ending session");

        for id in DeckId::ALL {
            lock_deck(self.deck(id)).pause();
        }
        self.lock_session().finish_end();
        // The loop exits on its own once it sees the session end
        drop(self.take_monitor());

        self.emit(AutoDjEvent::AutoPilotToggled { enabled: false });
        self.finish_session();
        TickOutcome::SessionEnded
    }

    /// Finalize the recording and announce the end of the session
    fn finish_session(&self) {
        let recording = match self.save_recording() {
            Ok(path) => path,
            Err(e) => {
                log::error!("AutoDJ: {}", e);
                None
            }
        };
        if let Some(path) = &recording {
            log::info!("AutoDJ: set saved to {}", path.display());
        }
        self.emit(AutoDjEvent::SessionEnded { recording });
    }

    fn save_recording(&self) -> Result<Option<PathBuf>> {
        let mut mixer = lock_mixer(&self.inner.mixer);
        if !mixer.is_recording() {
            return Ok(None);
        }
        mixer.stop_recording();
        let filename = self.inner.config.recording.filename_at(chrono::Local::now());
        mixer
            .download(&filename)
            .map(Some)
            .map_err(|e| AutoDjError::Recording(format!("{:#}", e)))
    }

    /// Analyze `source → other` in the background
    ///
    /// Skipped when the source track already carries out points for the
    /// target, while an analysis of the pair is in flight, or after it failed
    /// earlier in the session.
    fn ensure_analysis(&self, source: DeckId) {
        let target = source.other();
        let Some(target_id) = lock_deck(self.deck(target)).track().map(|t| t.id.clone()) else {
            return;
        };
        let (source_id, has_points) = {
            let deck = lock_deck(self.deck(source));
            match deck.track() {
                Some(t) => (t.id.clone(), t.out_points_for(&target_id).next().is_some()),
                None => return,
            }
        };
        if has_points {
            return;
        }

        if !self.lock_analyzing().insert((source_id.clone(), target_id.clone())) {
            return;
        }

        let (Some(src), Some(dst)) = (self.track_with_duration(source), self.track_with_duration(target)) else {
            self.forget_pair(&source_id, &target_id);
            return;
        };

        log::debug!("AutoDJ: analyzing {} -> {}", source_id, target_id);
        self.emit(AutoDjEvent::AnalysisStarted {
            source: source_id.clone(),
            target: target_id.clone(),
        });

        let this = self.clone();
        let analyzer = self.inner.analyzer.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || analyzer.analyze(&src, &dst)).await;
            match outcome {
                Ok(Ok(analysis)) => this.apply_analysis(source, analysis),
                Ok(Err(e)) => this.analysis_failed(source_id, target_id, e.to_string()),
                Err(e) => this.analysis_failed(source_id, target_id, e.to_string()),
            }
        });
    }

    /// Copy of a deck's track, with the deck's length when the track has none
    fn track_with_duration(&self, id: DeckId) -> Option<Track> {
        let deck = lock_deck(self.deck(id));
        let mut track = deck.track().cloned()?;
        if track.duration <= 0.0 {
            track.duration = deck.duration();
        }
        Some(track)
    }

    fn apply_analysis(&self, source: DeckId, analysis: PairAnalysis) {
        let outs: Vec<MixPoint> = analysis.out_points().cloned().collect();
        let ins: Vec<MixPoint> = analysis.in_points().cloned().collect();
        let count = outs.len();

        let source_id = &analysis.source.id;
        let target_id = &analysis.target.id;
        let applied = merge_points(self.deck(source), source_id, target_id, MixPointKind::Out, outs)
            & merge_points(self.deck(source.other()), target_id, source_id, MixPointKind::In, ins);
        // Merged points mark the pair as done; a discarded result gets retried
        self.forget_pair(source_id, target_id);
        if !applied {
            log::debug!("AutoDJ: deck changed during analysis of {} -> {}", source_id, target_id);
        }

        log::info!(
            "AutoDJ: {} -> {}: {} mix point(s){}",
            source_id,
            target_id,
            count,
            if analysis.heuristic { " (heuristic)" } else { "" }
        );
        self.emit(AutoDjEvent::AnalysisCompleted {
            source: source_id.clone(),
            target: target_id.clone(),
            points: count,
            heuristic: analysis.heuristic,
        });
    }

    fn analysis_failed(&self, source: TrackId, target: TrackId, reason: String) {
        log::warn!("AutoDJ: analysis of {} -> {} failed: {}", source, target, reason);
        self.emit(AutoDjEvent::AnalysisFailed { source, target, reason });
    }

    fn forget_pair(&self, source: &TrackId, target: &TrackId) {
        self.lock_analyzing().remove(&(source.clone(), target.clone()));
    }

    fn lock_analyzing(&self) -> MutexGuard<'_, HashSet<(TrackId, TrackId)>> {
        self.inner.analyzing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_queue(&self) -> Option<(Track, usize)> {
        let mut queue = lock_queue(&self.inner.queue);
        let track = queue.pop_next()?;
        Some((track, queue.len()))
    }

    fn load(&self, deck: DeckId, track: Track, left_in_queue: usize) {
        let id = track.id.clone();
        log::info!(
            "AutoDJ: loading {} onto deck {} ({} left in queue)",
            track.display_name(),
            deck,
            left_in_queue
        );
        lock_deck(self.deck(deck)).load(track);
        self.emit(AutoDjEvent::TrackQueued {
            deck,
            track: id,
            remaining: left_in_queue,
        });
    }

    fn deck(&self, id: DeckId) -> &SharedDeck {
        &self.inner.decks[id.index()]
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AutoDjEvent) {
        self.inner.events.publish(event);
    }
}

/// Replace `owner`'s `kind` points for `pair` on a deck, if it still holds `owner`
fn merge_points(deck: &SharedDeck, owner: &TrackId, pair: &TrackId, kind: MixPointKind, points: Vec<MixPoint>) -> bool {
    let mut deck = lock_deck(deck);
    let Some(mut track) = deck.track().filter(|t| &t.id == owner).cloned() else {
        return false;
    };
    track.replace_pair_points(pair, kind, points);
    deck.update_mix_points(track.mix_points);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::deck::Deck;
    use crate::mixer::Mixer;
    use crate::queue::{QueueProvider, TrackQueue};
    use crate::sim::{SimDeck, SimMixer};

    struct Rig {
        dj: AutoDj,
        a: Arc<Mutex<SimDeck>>,
        b: Arc<Mutex<SimDeck>>,
        mixer: Arc<Mutex<SimMixer>>,
        queue: Arc<Mutex<TrackQueue>>,
        events: Receiver<AutoDjEvent>,
        _dir: tempfile::TempDir,
    }

    fn rig(a: Option<Track>, b: Option<Track>, queued: Vec<Track>, recording: bool) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let clock = TokioClock::shared();
        let deck_a = Arc::new(Mutex::new(SimDeck::new("A", clock.clone())));
        let deck_b = Arc::new(Mutex::new(SimDeck::new("B", clock.clone())));
        let mixer = Arc::new(Mutex::new(SimMixer::new(clock.clone(), dir.path())));
        let queue = Arc::new(Mutex::new(queued.into_iter().collect::<TrackQueue>()));

        if let Some(track) = a {
            deck_a.lock().unwrap().load(track);
        }
        if let Some(track) = b {
            deck_b.lock().unwrap().load(track);
        }

        let mut config = AutoDjConfig::default();
        config.selector.seed = Some(7);
        config.recording.enabled = recording;
        config.recording.output_dir = dir.path().to_path_buf();

        let dj = AutoDj::new(
            clock,
            [deck_a.clone() as SharedDeck, deck_b.clone() as SharedDeck],
            mixer.clone() as SharedMixer,
            queue.clone() as SharedQueue,
            config,
        );
        let events = dj.subscribe();
        Rig {
            dj,
            a: deck_a,
            b: deck_b,
            mixer,
            queue,
            events,
            _dir: dir,
        }
    }

    fn event_names(rx: &Receiver<AutoDjEvent>) -> Vec<&'static str> {
        rx.try_iter().map(|e| e.name()).collect()
    }

    /// "a" mixes out at 150 s into "b" at 10 s
    fn paired_tracks() -> (Track, Track) {
        paired_tracks_at(150.0, 80.0)
    }

    /// "a" mixes out at `out_time` (score 80) into "b" at 10 s (`in_score`)
    fn paired_tracks_at(out_time: f64, in_score: f32) -> (Track, Track) {
        let mut a = Track::new("a", 200.0);
        let mut out = MixPoint::new(out_time, MixPointKind::Out, TrackId::from("b"), 80.0);
        out.matching_time = Some(10.0);
        a.mix_points.push(out);

        let mut b = Track::new("b", 240.0);
        let mut mix_in = MixPoint::new(10.0, MixPointKind::In, TrackId::from("a"), in_score);
        mix_in.matching_time = Some(out_time);
        b.mix_points.push(mix_in);
        (a, b)
    }

    /// Analysis runs on the blocking pool, outside paused time
    async fn wait_for_event(rx: &Receiver<AutoDjEvent>, name: &str) -> AutoDjEvent {
        for _ in 0..5000 {
            if let Some(event) = rx.try_iter().find(|e| e.name() == name) {
                return event;
            }
            std::thread::sleep(Duration::from_millis(1));
            tokio::task::yield_now().await;
        }
        panic!("no {name} event");
    }

    async fn sleep_secs(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mix_out_window_starts_transition_at_mix_in() {
        let (a, b) = paired_tracks();
        let rig = rig(Some(a), Some(b), vec![], false);

        assert!(rig.dj.toggle_auto_pilot());
        rig.a.lock().unwrap().seek(149.0);

        match rig.dj.tick() {
            TickOutcome::TransitionStarted { mix_in, fallback, .. } => {
                assert_eq!(mix_in, 10.0);
                assert!(!fallback);
            }
            other => panic!("expected a transition, got {other:?}"),
        }
        assert!(rig.dj.is_mixing());

        sleep_secs(40.0).await;

        assert!(!rig.dj.is_mixing());
        assert_eq!(rig.dj.active_deck(), DeckId::B);
        assert_eq!(rig.dj.session().last_mix_in_position(), 10.0);
        assert!(rig.a.lock().unwrap().track().is_none());
        let b = rig.b.lock().unwrap();
        assert!(b.is_playing());
        assert!(b.current_time() > 10.0);
        drop(b);
        assert_eq!(rig.mixer.lock().unwrap().crossfader(), 1.0);

        assert_eq!(
            event_names(&rig.events),
            vec![
                "AutoPilotToggled",
                "MixPointFound",
                "TransitionSelected",
                "TransitionStarted",
                "TransitionCompleted",
                "HandoverCompleted",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_while_mixing_leaves_decks_alone() {
        let (a, b) = paired_tracks();
        let rig = rig(Some(a), Some(b), vec![], false);

        rig.dj.toggle_auto_pilot();
        rig.a.lock().unwrap().seek(149.5);
        assert!(matches!(rig.dj.tick(), TickOutcome::TransitionStarted { .. }));

        let reads = (rig.a.lock().unwrap().reads(), rig.b.lock().unwrap().reads());
        let mutations = (rig.a.lock().unwrap().mutations(), rig.b.lock().unwrap().mutations());

        assert_eq!(rig.dj.tick(), TickOutcome::Busy);

        assert_eq!(reads, (rig.a.lock().unwrap().reads(), rig.b.lock().unwrap().reads()));
        assert_eq!(
            mutations,
            (rig.a.lock().unwrap().mutations(), rig.b.lock().unwrap().mutations())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_near_end_without_mix_points() {
        // Too short for a usable mix-out: the heuristic point sits at 0 s
        let rig = rig(
            Some(Track::new("a", 25.0)),
            Some(Track::new("b", 120.0)),
            vec![Track::new("c", 90.0)],
            false,
        );
        assert!(rig.dj.toggle_auto_pilot());

        sleep_secs(22.0).await;

        let events: Vec<AutoDjEvent> = rig.events.try_iter().collect();
        assert!(events.contains(&AutoDjEvent::TransitionSelected {
            kind: TransitionKind::SlamCut,
            fallback: true,
        }));
        let started = events
            .iter()
            .find_map(|e| match e {
                AutoDjEvent::TransitionStarted { mix_in, duration, .. } => Some((*mix_in, *duration)),
                _ => None,
            })
            .unwrap();
        assert_eq!(started, (0.0, 4.0));

        assert_eq!(rig.dj.active_deck(), DeckId::B);
        assert!(rig.b.lock().unwrap().is_playing());
        assert_eq!(
            rig.a.lock().unwrap().track().map(|t| t.id.clone()),
            Some(TrackId::from("c"))
        );
        assert_eq!(rig.queue.lock().unwrap().len(), 0);
        assert_eq!(rig.dj.session().phase(), SessionPhase::Monitoring);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_ends_session() {
        let rig = rig(Some(Track::new("a", 20.0)), None, vec![], true);
        assert!(rig.dj.toggle_auto_pilot());

        sleep_secs(21.0).await;

        assert_eq!(rig.dj.session().phase(), SessionPhase::Idle);
        assert!(!rig.dj.is_auto_pilot());
        assert!(!rig.a.lock().unwrap().is_playing());
        assert!(!rig.b.lock().unwrap().is_playing());
        assert!(!rig.mixer.lock().unwrap().is_recording());

        let ended = rig
            .events
            .try_iter()
            .find_map(|e| match e {
                AutoDjEvent::SessionEnded { recording } => Some(recording),
                _ => None,
            })
            .unwrap();
        assert!(ended.unwrap().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_twice_restores_state() {
        let rig = rig(Some(Track::new("a", 200.0)), None, vec![], false);

        assert!(rig.dj.toggle_auto_pilot());
        assert!(rig.a.lock().unwrap().is_playing());
        assert!(!rig.dj.toggle_auto_pilot());

        let session = rig.dj.session();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.time_remaining(), 0.0);
        assert!(!rig.dj.is_mixing());

        assert!(rig.dj.toggle_auto_pilot());
        assert_eq!(
            event_names(&rig.events),
            vec!["AutoPilotToggled", "AutoPilotToggled", "SessionEnded", "AutoPilotToggled"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_pulls_from_queue_when_decks_are_empty() {
        let rig = rig(None, None, vec![Track::new("x", 180.0)], false);

        assert!(rig.dj.toggle_auto_pilot());
        let a = rig.a.lock().unwrap();
        assert_eq!(a.track().map(|t| t.id.clone()), Some(TrackId::from("x")));
        assert!(a.is_playing());
        drop(a);
        assert_eq!(rig.mixer.lock().unwrap().crossfader(), 0.0);
        assert_eq!(rig.queue.lock().unwrap().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_play_stays_off() {
        let rig = rig(None, None, vec![], false);
        assert!(!rig.dj.toggle_auto_pilot());
        assert_eq!(rig.dj.session().phase(), SessionPhase::Idle);
        assert!(rig.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_on_deck_b_when_only_b_is_loaded() {
        let rig = rig(None, Some(Track::new("b", 200.0)), vec![], false);
        assert!(rig.dj.toggle_auto_pilot());
        assert_eq!(rig.dj.active_deck(), DeckId::B);
        assert!(rig.b.lock().unwrap().is_playing());
        assert_eq!(rig.mixer.lock().unwrap().crossfader(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_off_mid_transition_finishes_handover() {
        let (a, b) = paired_tracks();
        let rig = rig(Some(a), Some(b), vec![], true);

        rig.dj.toggle_auto_pilot();
        rig.a.lock().unwrap().seek(149.0);
        assert!(matches!(rig.dj.tick(), TickOutcome::TransitionStarted { .. }));

        assert!(!rig.dj.toggle_auto_pilot());
        assert!(rig.dj.is_mixing());

        sleep_secs(40.0).await;

        assert_eq!(rig.dj.session().phase(), SessionPhase::Idle);
        assert_eq!(rig.dj.active_deck(), DeckId::B);
        let names = event_names(&rig.events);
        assert_eq!(names.last(), Some(&"SessionEnded"));
        assert!(names.contains(&"HandoverCompleted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_loaded_lazily_and_analyzed() {
        let rig = rig(Some(Track::new("a", 200.0)), None, vec![Track::new("n", 180.0)], false);
        rig.dj.toggle_auto_pilot();

        assert_eq!(rig.dj.tick(), TickOutcome::TargetLoaded(TrackId::from("n")));
        assert_eq!(
            rig.b.lock().unwrap().track().map(|t| t.id.clone()),
            Some(TrackId::from("n"))
        );

        let completed = wait_for_event(&rig.events, "AnalysisCompleted").await;
        assert!(matches!(completed, AutoDjEvent::AnalysisCompleted { heuristic: true, points: 1, .. }));

        let n = TrackId::from("n");
        let a = rig.a.lock().unwrap();
        let outs: Vec<&MixPoint> = a.track().unwrap().out_points_for(&n).collect();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].time, 170.0);
        drop(outs);
        drop(a);

        let b = rig.b.lock().unwrap();
        assert_eq!(b.track().unwrap().in_points_for(&TrackId::from("a")).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_window_bounds() {
        for (position, triggers) in [(147.9, false), (148.0, true), (151.0, true), (151.1, false)] {
            let (a, b) = paired_tracks();
            let rig = rig(Some(a), Some(b), vec![], false);
            rig.dj.toggle_auto_pilot();
            rig.a.lock().unwrap().seek(position);

            let outcome = rig.dj.tick();
            if triggers {
                assert!(
                    matches!(outcome, TickOutcome::TransitionStarted { fallback: false, .. }),
                    "at {position}s: {outcome:?}"
                );
            } else {
                assert_eq!(outcome, TickOutcome::Waiting, "at {position}s");
                assert!(!rig.dj.is_mixing());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_after_mix_in() {
        let (a, b) = paired_tracks();
        let rig = rig(Some(a), Some(b), vec![], false);
        rig.a.lock().unwrap().seek(134.5);
        assert!(rig.dj.toggle_auto_pilot());
        assert_eq!(rig.dj.session().last_mix_in_position(), 134.5);

        // Inside the trigger window, but only 14.5 s after the mix-in
        rig.a.lock().unwrap().seek(149.0);
        assert_eq!(rig.dj.tick(), TickOutcome::Waiting);
        assert!(!rig.dj.is_mixing());
        assert_eq!(event_names(&rig.events), vec!["AutoPilotToggled"]);

        rig.a.lock().unwrap().seek(150.0);
        assert!(matches!(rig.dj.tick(), TickOutcome::TransitionStarted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mix_in_score_tolerance() {
        let (a, b) = paired_tracks_at(150.0, 75.0);
        let far = rig(Some(a), Some(b), vec![], false);
        far.dj.toggle_auto_pilot();
        far.a.lock().unwrap().seek(149.0);

        assert_eq!(far.dj.tick(), TickOutcome::NoMatchingMixIn);
        assert!(!far.dj.is_mixing());
        assert_eq!(far.dj.session().phase(), SessionPhase::Monitoring);
        let events: Vec<AutoDjEvent> = far.events.try_iter().collect();
        assert!(events.contains(&AutoDjEvent::NoMatchingMixIn {
            out_time: 150.0,
            score: 80.0,
        }));
        assert!(!events.iter().any(|e| e.name() == "TransitionStarted"));

        let (a, b) = paired_tracks_at(150.0, 75.5);
        let close = rig(Some(a), Some(b), vec![], false);
        close.dj.toggle_auto_pilot();
        close.a.lock().unwrap().seek(149.0);
        assert!(matches!(
            close.dj.tick(),
            TickOutcome::TransitionStarted { mix_in, fallback: false, .. } if mix_in == 10.0
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_waits_for_threshold() {
        // The only mix-out is long gone
        let (a, b) = paired_tracks_at(60.0, 80.0);
        let rig = rig(Some(a), Some(b), vec![], false);
        rig.dj.toggle_auto_pilot();

        rig.a.lock().unwrap().seek(189.9);
        assert_eq!(rig.dj.tick(), TickOutcome::Waiting);
        assert!(!rig.dj.is_mixing());

        rig.a.lock().unwrap().seek(190.0);
        match rig.dj.tick() {
            TickOutcome::TransitionStarted { kind, mix_in, fallback } => {
                assert_eq!(kind, TransitionKind::SlamCut);
                assert_eq!(mix_in, 0.0);
                assert!(fallback);
            }
            other => panic!("expected the fallback transition, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_analyzes_fresh_tracks_again() {
        let rig = rig(Some(Track::new("a", 200.0)), Some(Track::new("b", 180.0)), vec![], false);
        let b = TrackId::from("b");

        assert!(rig.dj.toggle_auto_pilot());
        rig.dj.tick();
        wait_for_event(&rig.events, "AnalysisCompleted").await;
        assert_eq!(rig.a.lock().unwrap().track().unwrap().out_points_for(&b).count(), 1);
        assert!(!rig.dj.toggle_auto_pilot());

        // Fresh copies from the library carry no mix points
        rig.a.lock().unwrap().load(Track::new("a", 200.0));
        rig.b.lock().unwrap().load(Track::new("b", 180.0));
        rig.events.try_iter().for_each(drop);

        assert!(rig.dj.toggle_auto_pilot());
        rig.dj.tick();
        let completed = wait_for_event(&rig.events, "AnalysisCompleted").await;
        assert!(matches!(completed, AutoDjEvent::AnalysisCompleted { points: 1, .. }));
        assert_eq!(rig.a.lock().unwrap().track().unwrap().out_points_for(&b).count(), 1);
        assert_eq!(
            rig.b.lock().unwrap().track().unwrap().in_points_for(&TrackId::from("a")).count(),
            1
        );
    }
}
