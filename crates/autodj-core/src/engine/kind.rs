//! Transition archetypes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::TransitionConfig;
use crate::error::AutoDjError;

/// The closed set of transition choreography styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    /// Source dissolves into a delay tail
    EchoOut,
    /// Progressively shorter loops on the source with a filter sweep
    LoopRoll,
    /// Frequency-split blend ending in a hard crossfader slam
    SlamCut,
    /// Rate/direction pattern on the source
    Scratch,
    /// Source band-passed to the vocal range
    Acapella,
    /// Source spins down like a stopped turntable
    VinylBrake,
    /// Target bass held back until the source drops out
    BuildCut,
    /// Classic bass swap at the midpoint
    SmartEq,
    /// Plain long crossfade
    GradualCrossfade,
    /// Source washed out in reverb and darkened
    ReverbWash,
    /// Resonant high-pass build with snare accents
    PhaserBuild,
    /// Tempo-matched blend with a bass swap
    BeatMatched,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 12] = [
        TransitionKind::EchoOut,
        TransitionKind::LoopRoll,
        TransitionKind::SlamCut,
        TransitionKind::Scratch,
        TransitionKind::Acapella,
        TransitionKind::VinylBrake,
        TransitionKind::BuildCut,
        TransitionKind::SmartEq,
        TransitionKind::GradualCrossfade,
        TransitionKind::ReverbWash,
        TransitionKind::PhaserBuild,
        TransitionKind::BeatMatched,
    ];

    /// Canonical wire name, e.g. `"SLAM_CUT"`
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::EchoOut => "ECHO_OUT",
            TransitionKind::LoopRoll => "LOOP_ROLL",
            TransitionKind::SlamCut => "SLAM_CUT",
            TransitionKind::Scratch => "SCRATCH",
            TransitionKind::Acapella => "ACAPELLA",
            TransitionKind::VinylBrake => "VINYL_BRAKE",
            TransitionKind::BuildCut => "BUILD_CUT",
            TransitionKind::SmartEq => "SMART_EQ",
            TransitionKind::GradualCrossfade => "GRADUAL_CROSSFADE",
            TransitionKind::ReverbWash => "REVERB_WASH",
            TransitionKind::PhaserBuild => "PHASER_BUILD",
            TransitionKind::BeatMatched => "BEAT_MATCHED",
        }
    }

    /// Parse a wire name (case-insensitive, `-` accepted for `_`)
    pub fn parse(name: &str) -> Result<Self, AutoDjError> {
        let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| AutoDjError::UnknownArchetype(name.to_string()))
    }

    /// Nominal length of the archetype in bars of 4 beats
    pub fn bars(&self) -> u32 {
        match self {
            TransitionKind::VinylBrake => 1,
            TransitionKind::SlamCut | TransitionKind::Scratch => 2,
            TransitionKind::EchoOut
            | TransitionKind::BuildCut
            | TransitionKind::SmartEq
            | TransitionKind::ReverbWash => 4,
            TransitionKind::LoopRoll
            | TransitionKind::Acapella
            | TransitionKind::GradualCrossfade
            | TransitionKind::PhaserBuild => 8,
            TransitionKind::BeatMatched => 16,
        }
    }

    /// Bar-quantised window length at `bpm`, clamped to the configured range
    pub fn duration_secs(&self, bpm: f64, config: &TransitionConfig) -> f64 {
        let bpm = if bpm.is_finite() && bpm > 0.0 {
            bpm
        } else {
            config.default_bpm
        };
        let bar_secs = 4.0 * 60.0 / bpm;
        (self.bars() as f64 * bar_secs).clamp(config.min_duration_secs, config.max_duration_secs)
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransitionKind {
    type Err = AutoDjError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
