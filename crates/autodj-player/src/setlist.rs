//! Setlist file
//!
//! A YAML list of analyzed tracks, played in order:
//!
//! ```yaml
//! tracks:
//!   - id: intro
//!     title: Intro
//!     duration: 212.0
//!     bpm: 124.0
//!     key: A
//!     scale: minor
//!     downbeats: [0.12, 2.06, 4.0]
//!     energy_profile: [0.2, 0.4, 0.9]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use autodj_core::queue::TrackQueue;
use autodj_core::Track;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Setlist {
    pub tracks: Vec<Track>,
}

impl Setlist {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read setlist: {:?}", path))?;
        let setlist: Setlist = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse setlist: {:?}", path))?;

        let unknown: Vec<&str> = setlist
            .tracks
            .iter()
            .filter(|t| t.duration <= 0.0)
            .map(|t| t.id.as_str())
            .collect();
        if !unknown.is_empty() {
            log::warn!("Setlist: no duration for {}", unknown.join(", "));
        }
        Ok(setlist)
    }

    /// Total running time of all tracks with a known duration
    pub fn total_secs(&self) -> f64 {
        self.tracks.iter().map(|t| t.duration.max(0.0)).sum()
    }

    pub fn into_queue(self) -> TrackQueue {
        self.tracks.into_iter().collect()
    }
}
