//! Transition selector
//!
//! Picks one archetype for a scored mix-out. A suggestion carried on the mix
//! point wins; otherwise a small decision table keyed on tempo gap and score
//! yields a set of fitting archetypes and one is drawn at random. Either way
//! the result must not repeat anything in the recent-history window.
//!
//! The random source is injected so tests can seed it.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::SelectorConfig;
use crate::engine::TransitionKind;
use crate::types::{MixPoint, Track};

/// Tempo assumed when a track has none
const FALLBACK_BPM: f64 = 120.0;

use TransitionKind::*;

const LARGE_TEMPO_GAP: &[TransitionKind] = &[VinylBrake, BuildCut, SlamCut, Scratch];
const LOCKED_AND_CLEAN: &[TransitionKind] = &[BeatMatched, SmartEq, EchoOut];
const CLEAN: &[TransitionKind] = &[SlamCut, EchoOut];
const MID: &[TransitionKind] = &[LoopRoll, Acapella, GradualCrossfade, PhaserBuild];
const LOW: &[TransitionKind] = &[SmartEq, ReverbWash, GradualCrossfade, Scratch];

/// Archetypes that fit a tempo gap and mix-point score
pub fn allowed_for(bpm_diff: f64, score: f32) -> &'static [TransitionKind] {
    if bpm_diff > 10.0 {
        LARGE_TEMPO_GAP
    } else if bpm_diff < 5.0 && score > 75.0 {
        LOCKED_AND_CLEAN
    } else if score > 75.0 {
        CLEAN
    } else if score > 60.0 {
        MID
    } else {
        LOW
    }
}

/// Stateful archetype policy with anti-repetition
pub struct TransitionSelector<R: Rng = StdRng> {
    rng: R,
    history: VecDeque<TransitionKind>,
    config: SelectorConfig,
}

impl TransitionSelector<StdRng> {
    /// Seeded from `config.seed`, or from OS entropy when unset
    pub fn new(config: SelectorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(rng, config)
    }
}

impl<R: Rng> TransitionSelector<R> {
    pub fn with_rng(rng: R, config: SelectorConfig) -> Self {
        Self {
            rng,
            history: VecDeque::with_capacity(config.history_size + 1),
            config,
        }
    }

    /// Choose the archetype for `mix_out` between `source` and `target`
    pub fn select(&mut self, mix_out: &MixPoint, source: &Track, target: &Track) -> TransitionKind {
        let preferred = match mix_out.suggested_transition {
            Some(kind) => kind,
            None => {
                let source_bpm = source.bpm.unwrap_or(FALLBACK_BPM);
                let target_bpm = target.bpm.unwrap_or(FALLBACK_BPM);
                let allowed = allowed_for((source_bpm - target_bpm).abs(), mix_out.score);
                allowed.choose(&mut self.rng).copied().unwrap_or(SmartEq)
            }
        };

        let chosen = self.ensure_variety(preferred);
        log::debug!(
            "TransitionSelector: preferred {}, chose {} (history {:?})",
            preferred,
            chosen,
            self.history
        );
        chosen
    }

    /// Forget all previous selections
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Past selections, oldest first
    pub fn history(&self) -> impl Iterator<Item = TransitionKind> + '_ {
        self.history.iter().copied()
    }

    fn recent(&self) -> impl Iterator<Item = &TransitionKind> + '_ {
        let skip = self.history.len().saturating_sub(self.config.variety_window);
        self.history.iter().skip(skip)
    }

    fn ensure_variety(&mut self, preferred: TransitionKind) -> TransitionKind {
        let recent: Vec<TransitionKind> = self.recent().copied().collect();

        let chosen = if recent.contains(&preferred) {
            let unused: Vec<TransitionKind> = TransitionKind::ALL
                .into_iter()
                .filter(|k| !recent.contains(k))
                .collect();
            unused.choose(&mut self.rng).copied().unwrap_or(preferred)
        } else {
            preferred
        };

        self.history.push_back(chosen);
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MixPointKind, TrackId};

    fn selector(seed: u64) -> TransitionSelector {
        TransitionSelector::with_rng(StdRng::seed_from_u64(seed), SelectorConfig::default())
    }

    fn track(id: &str, bpm: f64) -> Track {
        let mut t = Track::new(id, 200.0);
        t.bpm = Some(bpm);
        t
    }

    fn mix_out(score: f32) -> MixPoint {
        MixPoint::new(150.0, MixPointKind::Out, TrackId::from("b"), score)
    }

    #[test]
    fn test_table_picks_from_allowed_set() {
        for seed in 0..20 {
            let mut s = selector(seed);
            let kind = s.select(&mix_out(80.0), &track("a", 120.0), &track("b", 150.0));
            assert!(LARGE_TEMPO_GAP.contains(&kind), "{kind}");

            let mut s = selector(seed);
            let kind = s.select(&mix_out(90.0), &track("a", 124.0), &track("b", 126.0));
            assert!(LOCKED_AND_CLEAN.contains(&kind), "{kind}");

            let mut s = selector(seed);
            let kind = s.select(&mix_out(70.0), &track("a", 124.0), &track("b", 126.0));
            assert!(MID.contains(&kind), "{kind}");

            let mut s = selector(seed);
            let kind = s.select(&mix_out(50.0), &track("a", 124.0), &track("b", 126.0));
            assert!(LOW.contains(&kind), "{kind}");
        }
    }

    #[test]
    fn test_suggestion_is_used_when_fresh() {
        let mut s = selector(1);
        let mut mp = mix_out(50.0);
        mp.suggested_transition = Some(TransitionKind::ReverbWash);
        assert_eq!(
            s.select(&mp, &track("a", 120.0), &track("b", 120.0)),
            TransitionKind::ReverbWash
        );
    }

    #[test]
    fn test_never_repeats_within_window() {
        let mut s = selector(42);
        let mut mp = mix_out(80.0);
        mp.suggested_transition = Some(TransitionKind::SlamCut);

        let picks: Vec<_> = (0..200)
            .map(|_| s.select(&mp, &track("a", 120.0), &track("b", 120.0)))
            .collect();

        for w in picks.windows(3) {
            assert_ne!(w[0], w[1]);
            assert_ne!(w[1], w[2]);
            assert_ne!(w[0], w[2]);
        }
        assert!(picks.contains(&TransitionKind::SlamCut));
        assert!(s.history().count() <= 5);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut s = selector(3);
        let mut mp = mix_out(80.0);
        mp.suggested_transition = Some(TransitionKind::EchoOut);

        assert_eq!(s.select(&mp, &track("a", 120.0), &track("b", 120.0)), TransitionKind::EchoOut);
        assert_ne!(s.select(&mp, &track("a", 120.0), &track("b", 120.0)), TransitionKind::EchoOut);
        s.reset();
        assert_eq!(s.history().count(), 0);
        assert_eq!(s.select(&mp, &track("a", 120.0), &track("b", 120.0)), TransitionKind::EchoOut);
    }

    #[test]
    fn test_seeded_selector_is_reproducible() {
        let config = SelectorConfig {
            seed: Some(99),
            ..Default::default()
        };
        let mut a = TransitionSelector::new(config.clone());
        let mut b = TransitionSelector::new(config);
        for _ in 0..20 {
            let mp = mix_out(70.0);
            assert_eq!(
                a.select(&mp, &track("a", 120.0), &track("b", 121.0)),
                b.select(&mp, &track("a", 120.0), &track("b", 121.0))
            );
        }
    }
}
