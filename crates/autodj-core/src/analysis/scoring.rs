//! Pair scoring
//!
//! Rates a (mix-out on source, mix-in on target) pair from 0 to 100 using key
//! and tempo compatibility, placement within each track and how closely the
//! energy levels at the two points match.

use crate::analysis::candidates::energy_at;
use crate::engine::TransitionKind;
use crate::music::KeyRelation;
use crate::types::Track;

const BASE_SCORE: f32 = 50.0;

/// Pair-independent facts shared by every candidate of one track pair
#[derive(Debug, Clone, Copy)]
pub struct PairContext {
    pub key_relation: Option<KeyRelation>,
    pub bpm_diff: Option<f64>,
}

impl PairContext {
    pub fn new(source: &Track, target: &Track) -> Self {
        let key_relation = match (source.musical_key(), target.musical_key()) {
            (Some(a), Some(b)) => Some(a.relation_to(&b)),
            _ => None,
        };
        let bpm_diff = match (source.bpm, target.bpm) {
            (Some(a), Some(b)) if a > 0.0 && b > 0.0 => Some((a - b).abs()),
            _ => None,
        };
        Self {
            key_relation,
            bpm_diff,
        }
    }
}

/// Score one candidate pair, clamped to `[0, 100]`
pub fn score_pair(source: &Track, target: &Track, out_time: f64, in_time: f64, ctx: &PairContext) -> f32 {
    let mut score = BASE_SCORE;

    score += match ctx.key_relation {
        Some(KeyRelation::Identical) => 20.0,
        Some(KeyRelation::Relative) => 10.0,
        _ => 0.0,
    };

    score += match ctx.bpm_diff {
        Some(d) if d < 5.0 => 20.0,
        Some(d) if d < 10.0 => 10.0,
        _ => 0.0,
    };

    let out_rel = out_time / source.duration;
    let in_rel = in_time / target.duration;

    if out_rel >= 0.8 {
        score += 15.0;
    }
    if in_rel <= 0.2 {
        score += 15.0;
    }

    let out_energy = energy_at(&source.energy_profile, source.duration, out_time);
    let in_energy = energy_at(&target.energy_profile, target.duration, in_time);
    if let (Some(a), Some(b)) = (out_energy, in_energy) {
        if (a - b).abs() < 0.1 {
            score += 10.0;
        }
    }

    if out_time < 30.0 {
        score -= 30.0;
    }
    if out_rel < 0.3 {
        score -= 20.0;
    }
    if in_rel > 0.7 {
        score -= 20.0;
    }

    score.clamp(0.0, 100.0)
}

/// Archetype suggested for a scored pair
pub fn suggest_transition(score: f32, ctx: &PairContext) -> TransitionKind {
    let bpm_diff = ctx.bpm_diff.unwrap_or(0.0);
    if bpm_diff > 10.0 {
        if score >= 75.0 {
            TransitionKind::BuildCut
        } else {
            TransitionKind::VinylBrake
        }
    } else if bpm_diff < 5.0 && score >= 90.0 {
        TransitionKind::BeatMatched
    } else if score >= 80.0 {
        TransitionKind::EchoOut
    } else if score > 60.0 {
        TransitionKind::LoopRoll
    } else {
        TransitionKind::SmartEq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, duration: f64, bpm: f64, key: &str, scale: &str) -> Track {
        let mut t = Track::new(id, duration);
        t.bpm = Some(bpm);
        t.key = Some(key.to_string());
        t.scale = Some(scale.to_string());
        t
    }

    #[test]
    fn test_ideal_pair_hits_ceiling() {
        let a = track("a", 200.0, 124.0, "A", "minor");
        let b = track("b", 200.0, 125.0, "A", "minor");
        let ctx = PairContext::new(&a, &b);
        // 50 + 20 + 20 + 15 + 15 = 120, clamped
        assert_eq!(score_pair(&a, &b, 170.0, 8.0, &ctx), 100.0);
    }

    #[test]
    fn test_relative_key_and_tempo_steps() {
        let a = track("a", 200.0, 120.0, "C", "major");
        let b = track("b", 200.0, 127.0, "A", "minor");
        let ctx = PairContext::new(&a, &b);
        assert_eq!(ctx.key_relation, Some(KeyRelation::Relative));
        // Mid-track on both sides: 50 + 10 (relative) + 10 (bpm < 10)
        assert_eq!(score_pair(&a, &b, 100.0, 100.0, &ctx), 70.0);
    }

    #[test]
    fn test_early_out_and_late_in_penalties() {
        let a = Track::new("a", 200.0);
        let b = Track::new("b", 200.0);
        let ctx = PairContext::new(&a, &b);
        // 50 - 30 (before 30 s) - 20 (before 30%) - 20 (in after 70%)
        assert_eq!(score_pair(&a, &b, 20.0, 150.0, &ctx), 0.0);
        // 50 - 20 (before 30%)
        assert_eq!(score_pair(&a, &b, 50.0, 100.0, &ctx), 30.0);
    }

    #[test]
    fn test_energy_match_bonus() {
        let mut a = Track::new("a", 100.0);
        let mut b = Track::new("b", 100.0);
        a.energy_profile = vec![1.0; 10];
        b.energy_profile = vec![1.0; 10];
        let ctx = PairContext::new(&a, &b);
        assert_eq!(score_pair(&a, &b, 50.0, 50.0, &ctx), 60.0);

        b.energy_profile = vec![0.1, 0.1, 0.1, 0.1, 0.1, 1.0, 1.0, 1.0, 1.0, 1.0];
        // Target at 45 s sits in the quiet half: normalized 0.1 vs 1.0
        assert_eq!(score_pair(&a, &b, 50.0, 45.0, &ctx), 50.0);
    }

    #[test]
    fn test_suggestions_follow_tempo_gap() {
        let wide = PairContext {
            key_relation: None,
            bpm_diff: Some(20.0),
        };
        assert_eq!(suggest_transition(80.0, &wide), TransitionKind::BuildCut);
        assert_eq!(suggest_transition(50.0, &wide), TransitionKind::VinylBrake);

        let tight = PairContext {
            key_relation: None,
            bpm_diff: Some(1.0),
        };
        assert_eq!(suggest_transition(95.0, &tight), TransitionKind::BeatMatched);
        assert_eq!(suggest_transition(70.0, &tight), TransitionKind::LoopRoll);
    }
}
