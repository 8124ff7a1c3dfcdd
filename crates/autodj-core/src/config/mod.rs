//! AutoDJ configuration
//!
//! Stored as YAML. Every section and field has a default, so a partial file
//! (or none at all) yields a working setup.
//!
//! Default location: `~/.config/autodj/config.yaml`

mod io;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use io::{load_config, read_config, save_config};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoDjConfig {
    pub monitor: MonitorConfig,
    pub transition: TransitionConfig,
    pub analysis: AnalysisConfig,
    pub selector: SelectorConfig,
    pub recording: RecordingConfig,
}

/// Monitor loop timing and trigger rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Tick interval of the monitor loop
    pub poll_interval_ms: u64,
    /// Minimum play time after a mix-in before searching for the next mix-out
    pub grace_period_secs: f64,
    /// A mix-out triggers from this many seconds before its time...
    pub trigger_window_before_secs: f64,
    /// ...until this many seconds after
    pub trigger_window_after_secs: f64,
    /// Remaining time at which a forced transition fires without mix points
    pub fallback_threshold_secs: f64,
    /// Remaining time treated as "the track is over"
    pub end_of_track_secs: f64,
    /// Maximum score difference between a mix-out and its mix-in
    pub score_tolerance: f32,
    /// Archetype used by the forced transition
    pub fallback_transition: String,
    pub fallback_duration_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            grace_period_secs: 15.0,
            trigger_window_before_secs: 2.0,
            trigger_window_after_secs: 1.0,
            fallback_threshold_secs: 10.0,
            end_of_track_secs: 2.0,
            score_tolerance: 5.0,
            fallback_transition: "SLAM_CUT".to_string(),
            fallback_duration_secs: 4.0,
        }
    }
}

/// Transition engine timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Scheduling headroom between "now" and the transition reference time
    pub lookahead_secs: f64,
    /// Extra time after the window before the source is reset
    pub settle_margin_secs: f64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    /// Tempo assumed for tracks without a detected BPM
    pub default_bpm: f64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: 0.1,
            settle_margin_secs: 0.5,
            min_duration_secs: 2.0,
            max_duration_secs: 32.0,
            default_bpm: 120.0,
        }
    }
}

/// Mix-point analyzer thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub phrase_bars: usize,
    /// Normalized energy delta treated as a structural change
    pub energy_jump_threshold: f32,
    /// Leading fraction of a track where phrase starts are mix-in candidates
    pub in_region: f64,
    /// Trailing fraction of a track where mix-out candidates may lie
    pub out_region: f64,
    /// No mix-out before this many seconds
    pub min_out_secs: f64,
    /// Safety mix-out is placed this far before the end
    pub safety_out_offset_secs: f64,
    /// Pairs must score strictly above this to be kept
    pub score_threshold: f32,
    /// Points retained per track and direction
    pub max_points: usize,
    /// Minimum distance between two retained points
    pub min_spacing_secs: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            phrase_bars: 8,
            energy_jump_threshold: 0.25,
            in_region: 0.25,
            out_region: 0.30,
            min_out_secs: 20.0,
            safety_out_offset_secs: 30.0,
            score_threshold: 60.0,
            max_points: 3,
            min_spacing_secs: 10.0,
        }
    }
}

/// Transition selector policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub history_size: usize,
    /// Recent selections an archetype must not repeat
    pub variety_window: usize,
    /// Fixed RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            history_size: 5,
            variety_window: 2,
            seed: None,
        }
    }
}

/// Session recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    /// Default: ~/Music/autodj-sets
    pub output_dir: PathBuf,
    pub filename_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: default_recording_dir(),
            filename_prefix: "autodj-set".to_string(),
        }
    }
}

impl RecordingConfig {
    /// Timestamped file name for a recording finished at local time `at`
    pub fn filename_at(&self, at: chrono::DateTime<chrono::Local>) -> String {
        format!("{}-{}.yaml", self.filename_prefix, at.format("%Y%m%d-%H%M%S"))
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/autodj/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("autodj")
        .join("config.yaml")
}

/// Get the default recording directory
///
/// Returns: ~/Music/autodj-sets
pub fn default_recording_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autodj-sets")
}
