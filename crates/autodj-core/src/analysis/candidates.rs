//! Candidate cut times from the beat grid and energy profile

use crate::config::AnalysisConfig;
use crate::types::Track;

/// Bar length assumed when neither tempo nor grid gives one
const DEFAULT_BAR_SECS: f64 = 2.0;

/// Reduce a downbeat grid to bar starts
///
/// Feature extractors report either one tick per bar or one per beat. When the
/// median tick spacing is within 25% of a beat at `bpm`, every fourth tick is
/// kept. Non-finite and negative entries are dropped and the result is sorted.
pub fn bar_grid(downbeats: &[f64], bpm: Option<f64>) -> Vec<f64> {
    let mut ticks: Vec<f64> = downbeats
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t >= 0.0)
        .collect();
    ticks.sort_by(f64::total_cmp);
    ticks.dedup();

    let Some(bpm) = bpm.filter(|b| b.is_finite() && *b > 0.0) else {
        return ticks;
    };
    let Some(spacing) = median_spacing(&ticks) else {
        return ticks;
    };

    let beat = 60.0 / bpm;
    if (spacing - beat).abs() <= beat * 0.25 {
        ticks.into_iter().step_by(4).collect()
    } else {
        ticks
    }
}

/// Median distance between consecutive grid entries
pub fn median_spacing(grid: &[f64]) -> Option<f64> {
    let mut gaps: Vec<f64> = grid.windows(2).map(|w| w[1] - w[0]).filter(|g| *g > 0.0).collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_by(f64::total_cmp);
    Some(gaps[gaps.len() / 2])
}

/// Length of one bar on `track`
pub fn bar_secs(track: &Track, bars: &[f64]) -> f64 {
    median_spacing(bars)
        .or_else(|| track.bpm.filter(|b| *b > 0.0).map(|b| 4.0 * 60.0 / b))
        .unwrap_or(DEFAULT_BAR_SECS)
}

/// Start of every `phrase_bars`-bar phrase
pub fn phrase_starts(bars: &[f64], phrase_bars: usize) -> Vec<f64> {
    bars.iter().copied().step_by(phrase_bars.max(1)).collect()
}

/// Energy value at `t`, normalized by the profile's peak
///
/// The profile is taken to span the whole track at even spacing.
pub fn energy_at(profile: &[f32], duration: f64, t: f64) -> Option<f32> {
    let peak = profile.iter().copied().fold(0.0f32, f32::max);
    if profile.is_empty() || peak <= 0.0 || duration <= 0.0 {
        return None;
    }
    let idx = ((t / duration) * profile.len() as f64).floor();
    let idx = (idx.max(0.0) as usize).min(profile.len() - 1);
    Some(profile[idx] / peak)
}

/// Times where the normalized energy changes by more than `threshold`
/// between adjacent profile entries
pub fn energy_jumps(profile: &[f32], duration: f64, threshold: f32) -> Vec<f64> {
    let peak = profile.iter().copied().fold(0.0f32, f32::max);
    if profile.len() < 2 || peak <= 0.0 || duration <= 0.0 {
        return Vec::new();
    }
    let step = duration / profile.len() as f64;
    profile
        .windows(2)
        .enumerate()
        .filter(|(_, w)| ((w[1] - w[0]) / peak).abs() > threshold)
        .map(|(i, _)| (i + 1) as f64 * step)
        .collect()
}

fn near_any(t: f64, points: &[f64], tolerance: f64) -> bool {
    points.iter().any(|p| (p - t).abs() <= tolerance)
}

/// Mix-in candidates on `track`
///
/// Phrase starts in the leading `in_region` of the track, or within a bar of
/// an energy jump. The first downbeat is always included.
pub fn in_candidates(track: &Track, config: &AnalysisConfig) -> Vec<f64> {
    let bars = bar_grid(&track.downbeats, track.bpm);
    let Some(&first) = bars.first() else {
        return Vec::new();
    };
    let bar = bar_secs(track, &bars);
    let jumps = energy_jumps(&track.energy_profile, track.duration, config.energy_jump_threshold);
    let early = track.duration * config.in_region;

    let mut out: Vec<f64> = phrase_starts(&bars, config.phrase_bars)
        .into_iter()
        .filter(|&t| t < track.duration)
        .filter(|&t| t < early || near_any(t, &jumps, bar))
        .collect();

    if !out.contains(&first) {
        out.insert(0, first);
    }
    out
}

/// Mix-out candidates on `track`
///
/// Phrase starts within a bar of an energy jump, restricted to the trailing
/// `out_region` and never before `min_out_secs`. Falls back to the safety
/// point `duration - safety_out_offset_secs` when nothing qualifies.
pub fn out_candidates(track: &Track, config: &AnalysisConfig) -> Vec<f64> {
    let bars = bar_grid(&track.downbeats, track.bpm);
    let bar = bar_secs(track, &bars);
    let jumps = energy_jumps(&track.energy_profile, track.duration, config.energy_jump_threshold);
    let late = track.duration * (1.0 - config.out_region);

    let out: Vec<f64> = phrase_starts(&bars, config.phrase_bars)
        .into_iter()
        .filter(|&t| t < track.duration)
        .filter(|&t| t >= late && t >= config.min_out_secs)
        .filter(|&t| near_any(t, &jumps, bar))
        .collect();

    if out.is_empty() {
        vec![safety_out(track.duration, config)]
    } else {
        out
    }
}

/// The guaranteed mix-out position
pub fn safety_out(duration: f64, config: &AnalysisConfig) -> f64 {
    (duration - config.safety_out_offset_secs).max(0.0)
}
