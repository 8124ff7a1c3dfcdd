//! Mix-point analysis
//!
//! Given a source and a target track with their audio features, proposes up to
//! `max_points` (mix-out on source, mix-in on target) pairs:
//!
//! 1. Candidate times per track and direction from the bar grid, phrase
//!    boundaries and energy discontinuities ([`candidates`]).
//! 2. Every out × in combination is scored in parallel ([`scoring`]).
//! 3. Pairs above the threshold are taken best-first, skipping any whose out
//!    or in time lies within `min_spacing_secs` of one already taken.
//!
//! Without a beat grid, or when nothing clears the threshold, a single
//! heuristic pair is returned (out at `duration - 30`, in at 0, score 50) so
//! the orchestrator always has a mix point to work with.

pub mod candidates;
pub mod scoring;

use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::error::{AutoDjError, Result};
use crate::types::{MixPoint, MixPointKind, Track};

use self::scoring::{score_pair, suggest_transition, PairContext};

/// Score of the heuristic fallback pair
pub const HEURISTIC_SCORE: f32 = 50.0;

/// A scored pair before it becomes two mix points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
    pub out_time: f64,
    pub in_time: f64,
    pub score: f32,
}

/// Analyzer output: copies of both tracks with the new points merged in
#[derive(Debug, Clone)]
pub struct PairAnalysis {
    pub source: Track,
    pub target: Track,
    /// True when the heuristic fallback pair was used
    pub heuristic: bool,
}

impl PairAnalysis {
    /// The new out points on the source
    pub fn out_points(&self) -> impl Iterator<Item = &MixPoint> {
        self.source.out_points_for(&self.target.id)
    }

    /// The new in points on the target
    pub fn in_points(&self) -> impl Iterator<Item = &MixPoint> {
        self.target.in_points_for(&self.source.id)
    }
}

/// Offline mix-point scorer
#[derive(Debug, Clone, Default)]
pub struct MixPointAnalyzer {
    config: AnalysisConfig,
}

impl MixPointAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze the `source → target` direction
    ///
    /// Fails with `InsufficientData` when either duration is unknown.
    pub fn analyze(&self, source: &Track, target: &Track) -> Result<PairAnalysis> {
        validate(source)?;
        validate(target)?;

        let ctx = PairContext::new(source, target);
        let chosen = if source.downbeats.is_empty() || target.downbeats.is_empty() {
            log::debug!(
                "MixPointAnalyzer: no beat grid on {} or {}, using heuristic pair",
                source.id,
                target.id
            );
            Vec::new()
        } else {
            let outs = candidates::out_candidates(source, &self.config);
            let ins = candidates::in_candidates(target, &self.config);
            let scored = self.score_all(source, target, &outs, &ins, &ctx);
            log::debug!(
                "MixPointAnalyzer: {} out x {} in candidates, {} above threshold",
                outs.len(),
                ins.len(),
                scored.len()
            );
            self.select(scored)
        };

        let heuristic = chosen.is_empty();
        let chosen = if heuristic {
            vec![ScoredPair {
                out_time: candidates::safety_out(source.duration, &self.config),
                in_time: 0.0,
                score: HEURISTIC_SCORE,
            }]
        } else {
            chosen
        };

        let mut outs = Vec::with_capacity(chosen.len());
        let mut ins = Vec::with_capacity(chosen.len());
        for pair in &chosen {
            let suggestion = suggest_transition(pair.score, &ctx);

            let mut out = MixPoint::new(pair.out_time, MixPointKind::Out, target.id.clone(), pair.score);
            out.matching_time = Some(pair.in_time);
            out.suggested_transition = Some(suggestion);
            outs.push(out);

            let mut inp = MixPoint::new(pair.in_time, MixPointKind::In, source.id.clone(), pair.score);
            inp.matching_time = Some(pair.out_time);
            inp.suggested_transition = Some(suggestion);
            ins.push(inp);
        }

        let mut new_source = source.clone();
        new_source.replace_pair_points(&target.id, MixPointKind::Out, outs);
        let mut new_target = target.clone();
        new_target.replace_pair_points(&source.id, MixPointKind::In, ins);

        Ok(PairAnalysis {
            source: new_source,
            target: new_target,
            heuristic,
        })
    }

    /// Score every combination, keeping those above the threshold
    fn score_all(
        &self,
        source: &Track,
        target: &Track,
        outs: &[f64],
        ins: &[f64],
        ctx: &PairContext,
    ) -> Vec<ScoredPair> {
        let threshold = self.config.score_threshold;
        outs.par_iter()
            .flat_map_iter(|&out_time| {
                ins.iter().map(move |&in_time| ScoredPair {
                    out_time,
                    in_time,
                    score: score_pair(source, target, out_time, in_time, ctx),
                })
            })
            .filter(|pair| pair.score > threshold)
            .collect()
    }

    /// Best-first greedy pick with minimum spacing on both sides
    fn select(&self, mut scored: Vec<ScoredPair>) -> Vec<ScoredPair> {
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.out_time.total_cmp(&a.out_time))
                .then(a.in_time.total_cmp(&b.in_time))
        });

        let spacing = self.config.min_spacing_secs;
        let mut chosen: Vec<ScoredPair> = Vec::with_capacity(self.config.max_points);
        for pair in scored {
            if chosen.len() >= self.config.max_points {
                break;
            }
            let clashes = chosen.iter().any(|c| {
                (c.out_time - pair.out_time).abs() < spacing || (c.in_time - pair.in_time).abs() < spacing
            });
            if !clashes {
                chosen.push(pair);
            }
        }
        chosen
    }
}

fn validate(track: &Track) -> Result<()> {
    if !track.duration.is_finite() || track.duration <= 0.0 {
        return Err(AutoDjError::InsufficientData {
            track: track.id.clone(),
            reason: format!("duration is {}", track.duration),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackId;

    fn grid(step: f64, until: f64) -> Vec<f64> {
        (0..).map(|i| i as f64 * step).take_while(|t| *t < until).collect()
    }

    /// 240 s source with a loud section at 192-224 s
    fn source() -> Track {
        let mut t = Track::new("src", 240.0);
        t.bpm = Some(124.0);
        t.key = Some("A".into());
        t.scale = Some("minor".into());
        t.downbeats = grid(60.0 / 124.0 * 4.0, 240.0);
        t.energy_profile = (0..240)
            .map(|i| if (192..224).contains(&i) { 1.0 } else { 0.3 })
            .collect();
        t
    }

    /// 200 s target with a build at 32 s
    fn target() -> Track {
        let mut t = Track::new("dst", 200.0);
        t.bpm = Some(125.0);
        t.key = Some("C".into());
        t.scale = Some("major".into());
        t.downbeats = grid(60.0 / 125.0, 200.0);
        t.energy_profile = (0..200).map(|i| if i < 32 { 0.3 } else { 1.0 }).collect();
        t
    }

    #[test]
    fn test_structural_analysis_properties() {
        let analyzer = MixPointAnalyzer::default();
        let result = analyzer.analyze(&source(), &target()).unwrap();
        assert!(!result.heuristic);

        let outs: Vec<_> = result.out_points().cloned().collect();
        let ins: Vec<_> = result.in_points().cloned().collect();
        assert!(!outs.is_empty());
        assert!(outs.len() <= 3);
        assert_eq!(outs.len(), ins.len());

        for out in &outs {
            assert!((0.0..=100.0).contains(&out.score));
            assert!(out.score > 60.0);
            assert_eq!(out.pair_track_id, TrackId::from("dst"));
            assert!(out.time >= 240.0 * 0.7);
            // Paired in point carries the same score
            let paired = ins
                .iter()
                .find(|i| Some(i.time) == out.matching_time)
                .unwrap();
            assert_eq!(paired.score, out.score);
            assert_eq!(paired.matching_time, Some(out.time));
            assert_eq!(paired.pair_track_id, TrackId::from("src"));
            assert!(out.suggested_transition.is_some());
        }

        for (i, a) in outs.iter().enumerate() {
            for b in &outs[i + 1..] {
                assert!((a.time - b.time).abs() >= 10.0);
            }
        }
        for (i, a) in ins.iter().enumerate() {
            for b in &ins[i + 1..] {
                assert!((a.time - b.time).abs() >= 10.0);
            }
        }
    }

    #[test]
    fn test_missing_grid_gives_heuristic_pair() {
        let mut src = Track::new("a", 200.0);
        src.bpm = Some(128.0);
        let dst = Track::new("b", 180.0);

        let result = MixPointAnalyzer::default().analyze(&src, &dst).unwrap();
        assert!(result.heuristic);

        let outs: Vec<_> = result.out_points().collect();
        let ins: Vec<_> = result.in_points().collect();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].time, 170.0);
        assert_eq!(outs[0].score, HEURISTIC_SCORE);
        assert_eq!(ins.len(), 1);
        assert_eq!(ins[0].time, 0.0);
        assert_eq!(ins[0].score, HEURISTIC_SCORE);
    }

    #[test]
    fn test_unknown_duration_is_insufficient_data() {
        let src = Track::new("a", 0.0);
        let dst = Track::new("b", 180.0);
        let err = MixPointAnalyzer::default().analyze(&src, &dst).unwrap_err();
        assert!(matches!(err, AutoDjError::InsufficientData { ref track, .. } if track.as_str() == "a"));

        let dst_nan = Track::new("c", f64::NAN);
        assert!(MixPointAnalyzer::default().analyze(&dst, &dst_nan).is_err());
    }

    #[test]
    fn test_other_pairs_are_preserved() {
        let mut src = source();
        src.mix_points.push(MixPoint::new(
            200.0,
            MixPointKind::Out,
            TrackId::from("other"),
            77.0,
        ));
        // In point from the reverse direction must survive too
        src.mix_points.push(MixPoint::new(0.0, MixPointKind::In, TrackId::from("dst"), 50.0));

        let result = MixPointAnalyzer::default().analyze(&src, &target()).unwrap();
        assert!(result
            .source
            .out_points_for(&TrackId::from("other"))
            .any(|mp| mp.score == 77.0));
        assert_eq!(result.source.in_points_for(&TrackId::from("dst")).count(), 1);
        // Identity and features untouched
        assert_eq!(result.source.bpm, Some(124.0));
        assert_eq!(result.target.id, TrackId::from("dst"));
    }

    #[test]
    fn test_select_enforces_spacing_and_limit() {
        let analyzer = MixPointAnalyzer::default();
        let pair = |out_time, in_time, score| ScoredPair {
            out_time,
            in_time,
            score,
        };
        let chosen = analyzer.select(vec![
            pair(180.0, 0.0, 90.0),
            pair(185.0, 30.0, 89.0), // out too close
            pair(200.0, 5.0, 88.0),  // in too close
            pair(200.0, 40.0, 87.0),
            pair(220.0, 60.0, 80.0),
            pair(160.0, 90.0, 79.0), // over the limit
        ]);
        let outs: Vec<f64> = chosen.iter().map(|p| p.out_time).collect();
        assert_eq!(outs, vec![180.0, 200.0, 220.0]);
    }
}
