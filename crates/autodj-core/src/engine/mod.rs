//! Transition engine
//!
//! Turns a [`TransitionParams`] into a [`Choreography`] and plays it against
//! the two decks and the mixer. One transition at a time: a second `execute`
//! while one is in flight is rejected with `TransitionInFlight`.
//!
//! Progress of the current transition is published on a `watch` channel:
//!
//! ```text
//! Idle → Scheduled → InProgress → Completing → Settled
//! ```
//!
//! `Settled` means the source deck is stopped at position 0 with neutral
//! effects and a flat EQ, and the crossfader rests on the target's side.

pub mod choreography;
mod kind;
pub mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::automation::RampCurve;
use crate::clock::SharedClock;
use crate::config::TransitionConfig;
use crate::deck::{lock_deck, SharedDeck};
use crate::error::{AutoDjError, Result};
use crate::mixer::{lock_mixer, SharedMixer};
use crate::types::{DeckId, TransitionParams};

pub use choreography::{Action, Choreography, ChoreographyContext, Cue, Side};
pub use kind::TransitionKind;

/// Lifecycle of a single transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPhase {
    /// No transition has run yet
    #[default]
    Idle,
    /// Reference time captured, nothing applied yet
    Scheduled,
    InProgress,
    /// Window elapsed, waiting for the settle cue
    Completing,
    Settled,
}

/// Clears the busy flag however `execute` exits
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Choreographer for deck-to-deck transitions
pub struct TransitionEngine {
    clock: SharedClock,
    decks: [SharedDeck; 2],
    mixer: SharedMixer,
    config: TransitionConfig,
    busy: AtomicBool,
    phase_tx: watch::Sender<TransitionPhase>,
}

impl TransitionEngine {
    pub fn new(
        clock: SharedClock,
        decks: [SharedDeck; 2],
        mixer: SharedMixer,
        config: TransitionConfig,
    ) -> Self {
        let (phase_tx, _) = watch::channel(TransitionPhase::Idle);
        Self {
            clock,
            decks,
            mixer,
            config,
            busy: AtomicBool::new(false),
            phase_tx,
        }
    }

    pub fn config(&self) -> &TransitionConfig {
        &self.config
    }

    /// True while a transition is between `Scheduled` and `Settled`
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Current phase of the latest transition
    pub fn phase(&self) -> TransitionPhase {
        *self.phase_tx.borrow()
    }

    /// Watch phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<TransitionPhase> {
        self.phase_tx.subscribe()
    }

    /// Execute a transition named on the wire
    ///
    /// An unknown archetype is logged and ignored.
    pub async fn execute_named(
        &self,
        name: &str,
        params: TransitionParams,
        source: DeckId,
        target: DeckId,
    ) -> Result<()> {
        match TransitionKind::parse(name) {
            Ok(kind) => {
                self.execute(TransitionParams { kind, ..params }, source, target)
                    .await
            }
            Err(e) => {
                log::warn!("TransitionEngine: {}, ignoring", e);
                Ok(())
            }
        }
    }

    /// Run one transition from `source` to `target` to completion
    pub async fn execute(&self, params: TransitionParams, source: DeckId, target: DeckId) -> Result<()> {
        if source == target {
            log::warn!("TransitionEngine: source and target are both deck {}, ignoring", source);
            return Ok(());
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AutoDjError::TransitionInFlight);
        }
        let _guard = BusyGuard(&self.busy);

        let reference = self.clock.now() + self.config.lookahead_secs;
        self.phase_tx.send_replace(TransitionPhase::Scheduled);

        let source_rate = lock_deck(&self.decks[source.index()]).playback_rate();
        let choreography = Choreography::build(
            &params,
            &ChoreographyContext {
                target,
                source_rate,
                settle_margin: self.config.settle_margin_secs,
            },
        );

        log::info!(
            "TransitionEngine: {} {} -> {} over {:.2}s (in at {:.1}s, {} cues)",
            params.kind,
            source,
            target,
            choreography.duration,
            params.mix_in_point,
            choreography.cues.len()
        );

        // First cue at or past the end of the window
        let completing = choreography
            .cues
            .iter()
            .position(|cue| cue.offset >= choreography.duration)
            .unwrap_or_else(|| choreography.cues.len().saturating_sub(1));
        scheduler::run_cues(&self.clock, reference, &choreography.cues, |index, cue, due| {
            if index == 0 {
                self.phase_tx.send_replace(TransitionPhase::InProgress);
            }
            if index == completing {
                self.phase_tx.send_replace(TransitionPhase::Completing);
            }
            self.apply(&cue.action, due, source, target);
        })
        .await;

        self.phase_tx.send_replace(TransitionPhase::Settled);
        log::info!("TransitionEngine: {} settled", params.kind);
        Ok(())
    }

    fn deck(&self, id: DeckId) -> &SharedDeck {
        &self.decks[id.index()]
    }

    fn side(&self, side: Side, source: DeckId, target: DeckId) -> DeckId {
        match side {
            Side::Source => source,
            Side::Target => target,
        }
    }

    fn apply(&self, action: &Action, at: f64, source: DeckId, target: DeckId) {
        match *action {
            Action::StartTarget { offset } => {
                lock_deck(self.deck(target)).play_at(at, offset);
            }
            Action::StopSource => {
                lock_deck(self.deck(source)).stop_at(at);
            }
            Action::Crossfader { to, over, curve } => {
                let mut mixer = lock_mixer(&self.mixer);
                if over > 0.0 {
                    mixer.ramp_crossfader(to, at, at + over, curve);
                } else {
                    mixer.set_crossfader(to, at);
                }
            }
            Action::Param {
                side,
                param,
                to,
                over,
                curve,
            } => {
                let mut deck = lock_deck(self.deck(self.side(side, source, target)));
                if over > 0.0 {
                    deck.ramp_param(param, to, at, at + over, curve);
                } else {
                    deck.set_param(param, to, at);
                }
            }
            Action::Filter { side, kind } => {
                lock_deck(self.deck(self.side(side, source, target))).set_filter_kind(kind);
            }
            Action::Eq { side, band, db, over } => {
                let channel = self.side(side, source, target);
                let mut mixer = lock_mixer(&self.mixer);
                if over > 0.0 {
                    mixer.ramp_eq(channel, band, db, at, at + over, RampCurve::Linear);
                } else {
                    mixer.set_eq(channel, band, db, at);
                }
            }
            Action::Sample(hit) => {
                lock_mixer(&self.mixer).trigger(hit, Some(at));
            }
            Action::Speed { side, rate } => {
                lock_deck(self.deck(self.side(side, source, target))).set_speed(rate);
            }
            Action::Reverse { side, on } => {
                lock_deck(self.deck(self.side(side, source, target))).set_reverse(on);
            }
            Action::Loop { side, length } => {
                let mut deck = lock_deck(self.deck(self.side(side, source, target)));
                let start = deck.position_at(at);
                let end = (start + length).min(deck.duration());
                deck.set_loop(start, end);
            }
            Action::ClearLoop { side } => {
                lock_deck(self.deck(self.side(side, source, target))).clear_loop();
            }
            Action::Settle => self.settle(at, source, target),
        }
    }

    fn settle(&self, at: f64, source: DeckId, target: DeckId) {
        {
            let mut deck = lock_deck(self.deck(source));
            deck.pause();
            deck.reset_effects();
            deck.seek(0.0);
        }
        lock_deck(self.deck(target)).reset_effects();

        let mut mixer = lock_mixer(&self.mixer);
        mixer.reset_eq(source);
        mixer.reset_eq(target);
        mixer.set_crossfader(target.crossfader_extreme(), at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::clock::TokioClock;
    use crate::deck::Deck;
    use crate::mixer::Mixer;
    use crate::sim::{SimDeck, SimMixer};
    use crate::types::Track;

    struct Rig {
        engine: Arc<TransitionEngine>,
        a: Arc<Mutex<SimDeck>>,
        b: Arc<Mutex<SimDeck>>,
        mixer: Arc<Mutex<SimMixer>>,
    }

    fn rig() -> Rig {
        let clock = TokioClock::shared();
        let a = Arc::new(Mutex::new(SimDeck::new("A", clock.clone())));
        let b = Arc::new(Mutex::new(SimDeck::new("B", clock.clone())));
        let mixer = Arc::new(Mutex::new(SimMixer::new(clock.clone(), std::env::temp_dir())));

        a.lock().unwrap().load(Track::new("src", 200.0));
        b.lock().unwrap().load(Track::new("dst", 240.0));

        let engine = TransitionEngine::new(
            clock,
            [a.clone() as SharedDeck, b.clone() as SharedDeck],
            mixer.clone() as SharedMixer,
            TransitionConfig::default(),
        );
        Rig {
            engine: Arc::new(engine),
            a,
            b,
            mixer,
        }
    }

    fn params(kind: TransitionKind) -> TransitionParams {
        TransitionParams {
            kind,
            duration: 8.0,
            mix_out_point: 150.0,
            mix_in_point: 10.0,
            source_bpm: 120.0,
            target_bpm: 126.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_archetype_settles_source() {
        for kind in TransitionKind::ALL {
            let rig = rig();
            {
                let mut a = rig.a.lock().unwrap();
                a.seek(140.0);
                a.play();
            }

            rig.engine
                .execute(params(kind), DeckId::A, DeckId::B)
                .await
                .unwrap();

            let a = rig.a.lock().unwrap();
            assert!(!a.is_playing(), "{kind}: source still playing");
            assert_eq!(a.current_time(), 0.0, "{kind}: source not rewound");
            assert!(a.effects().is_neutral(), "{kind}: source effects {:?}", a.effects());

            let b = rig.b.lock().unwrap();
            assert!(b.is_playing(), "{kind}: target not playing");
            assert!(b.effects().is_neutral(), "{kind}: target effects {:?}", b.effects());

            let mixer = rig.mixer.lock().unwrap();
            assert!(mixer.eq(DeckId::A).is_flat(), "{kind}");
            assert!(mixer.eq(DeckId::B).is_flat(), "{kind}");
            assert_eq!(mixer.crossfader(), 1.0, "{kind}");

            assert_eq!(rig.engine.phase(), TransitionPhase::Settled);
            assert!(!rig.engine.is_busy());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_starts_at_mix_in_point() {
        let rig = rig();
        rig.a.lock().unwrap().play();

        let engine = rig.engine.clone();
        let handle = tokio::spawn(async move {
            engine
                .execute(params(TransitionKind::GradualCrossfade), DeckId::A, DeckId::B)
                .await
        });

        // 1 s after the 100 ms lookahead the target is 1 s past its mix-in
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let pos = rig.b.lock().unwrap().current_time();
        assert!((pos - 11.0).abs() < 0.01, "target at {pos}");

        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_execute_is_rejected() {
        let rig = rig();
        rig.a.lock().unwrap().play();
        let mut phases = rig.engine.subscribe_phase();

        let engine = rig.engine.clone();
        let first = tokio::spawn(async move {
            engine
                .execute(params(TransitionKind::EchoOut), DeckId::A, DeckId::B)
                .await
        });

        phases.changed().await.unwrap();
        assert!(rig.engine.is_busy());
        assert_eq!(
            rig.engine
                .execute(params(TransitionKind::SlamCut), DeckId::A, DeckId::B)
                .await,
            Err(AutoDjError::TransitionInFlight)
        );

        first.await.unwrap().unwrap();
        assert!(!rig.engine.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_name_is_noop() {
        let rig = rig();
        let before = rig.mixer.lock().unwrap().mutations();

        rig.engine
            .execute_named("TAPE_STOP", params(TransitionKind::SlamCut), DeckId::A, DeckId::B)
            .await
            .unwrap();

        assert_eq!(rig.mixer.lock().unwrap().mutations(), before);
        assert_eq!(rig.engine.phase(), TransitionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slam_cut_triggers_crash() {
        let rig = rig();
        rig.a.lock().unwrap().play();
        rig.engine
            .execute_named("slam_cut", params(TransitionKind::EchoOut), DeckId::A, DeckId::B)
            .await
            .unwrap();

        let mixer = rig.mixer.lock().unwrap();
        assert!(mixer
            .triggers()
            .iter()
            .any(|(hit, _)| *hit == crate::mixer::SampleHit::Crash));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completing_spans_window_end_to_settle() {
        let rig = rig();
        rig.a.lock().unwrap().play();

        let engine = rig.engine.clone();
        let handle = tokio::spawn(async move {
            engine
                .execute(params(TransitionKind::GradualCrossfade), DeckId::A, DeckId::B)
                .await
        });

        // Window runs 0.1 s to 8.1 s, settle cue at 8.6 s
        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
        assert_eq!(rig.engine.phase(), TransitionPhase::InProgress);

        tokio::time::sleep(std::time::Duration::from_millis(4200)).await;
        assert_eq!(rig.engine.phase(), TransitionPhase::Completing);
        assert!(rig.engine.is_busy());

        handle.await.unwrap().unwrap();
        assert_eq!(rig.engine.phase(), TransitionPhase::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_loop_cue_anchors_at_due_time() {
        let rig = rig();
        rig.a.lock().unwrap().play();
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;

        // Applied half a second after it was due
        let due = rig.engine.clock.now() - 0.5;
        rig.engine.apply(
            &Action::Loop {
                side: Side::Source,
                length: 2.0,
            },
            due,
            DeckId::A,
            DeckId::B,
        );

        let (start, end) = rig.a.lock().unwrap().loop_region().unwrap();
        assert!((start - 9.5).abs() < 1e-6, "loop starts at {start}");
        assert!((end - 11.5).abs() < 1e-6, "loop ends at {end}");
    }
}
