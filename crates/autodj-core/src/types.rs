//! Common types for AutoDJ
//!
//! Tracks, directional mix points, deck identifiers and the value object
//! handed to the transition engine.

use serde::{Deserialize, Serialize};

use crate::engine::TransitionKind;
use crate::music::MusicalKey;

/// Number of decks the auto-pilot mixes between
pub const NUM_DECKS: usize = 2;

/// Interned track identity. Two tracks with equal ids are the same musical item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Direction of a mix point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixPointKind {
    /// Where the incoming track starts playing
    In,
    /// Where the outgoing track hands over
    Out,
}

/// A directional cut point on a track, paired to one specific other track.
///
/// An `Out` point on A naming B only has meaning together with the `In` point
/// on B naming A; both carry the same score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixPoint {
    /// Position on the owning track (seconds)
    pub time: f64,
    #[serde(rename = "type")]
    pub kind: MixPointKind,
    /// The track this point pairs with
    pub pair_track_id: TrackId,
    /// Transition quality (0-100), identical on both sides of a pairing
    pub score: f32,
    /// Position of the matching point on the paired track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_transition: Option<TransitionKind>,
}

impl MixPoint {
    pub fn new(time: f64, kind: MixPointKind, pair_track_id: TrackId, score: f32) -> Self {
        Self {
            time,
            kind,
            pair_track_id,
            score,
            matching_time: None,
            suggested_transition: None,
        }
    }

    pub fn is_out_for(&self, pair: &TrackId) -> bool {
        self.kind == MixPointKind::Out && &self.pair_track_id == pair
    }

    pub fn is_in_for(&self, pair: &TrackId) -> bool {
        self.kind == MixPointKind::In && &self.pair_track_id == pair
    }
}

/// A track with its audio-derived analysis fields
///
/// Identity (`id`) is immutable; the analysis fields are filled in by the
/// feature extractor. `mix_points` only ever grows through an explicit
/// deck update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    /// Track length in seconds (0 = unknown)
    pub duration: f64,
    pub bpm: Option<f64>,
    /// Root note, e.g. "A", "C#", "Bb"
    pub key: Option<String>,
    /// "major" or "minor"
    pub scale: Option<String>,
    /// Bar starts (or beat ticks, see `analysis::candidates::bar_grid`) in seconds
    pub downbeats: Vec<f64>,
    /// Evenly spaced RMS energy values spanning the whole track
    pub energy_profile: Vec<f32>,
    pub mix_points: Vec<MixPoint>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: TrackId::new(""),
            title: String::new(),
            artist: String::new(),
            duration: 0.0,
            bpm: None,
            key: None,
            scale: None,
            downbeats: Vec::new(),
            energy_profile: Vec::new(),
            mix_points: Vec::new(),
        }
    }
}

impl Track {
    /// Create a track with only identity and length known
    pub fn new(id: impl Into<String>, duration: f64) -> Self {
        Self {
            id: TrackId::new(id),
            duration,
            ..Default::default()
        }
    }

    /// Display name used in log lines
    pub fn display_name(&self) -> String {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (false, false) => format!("{} - {}", self.artist, self.title),
            (true, false) => self.title.clone(),
            _ => self.id.to_string(),
        }
    }

    /// Parsed musical key from the `key` + `scale` fields
    pub fn musical_key(&self) -> Option<MusicalKey> {
        MusicalKey::from_parts(self.key.as_deref()?, self.scale.as_deref())
    }

    /// Out points on this track paired with `pair`
    pub fn out_points_for<'a>(&'a self, pair: &'a TrackId) -> impl Iterator<Item = &'a MixPoint> {
        self.mix_points.iter().filter(move |mp| mp.is_out_for(pair))
    }

    /// In points on this track paired with `pair`
    pub fn in_points_for<'a>(&'a self, pair: &'a TrackId) -> impl Iterator<Item = &'a MixPoint> {
        self.mix_points.iter().filter(move |mp| mp.is_in_for(pair))
    }

    /// Replace the `kind` points paired with `pair`, keeping everything else
    pub fn replace_pair_points(&mut self, pair: &TrackId, kind: MixPointKind, points: Vec<MixPoint>) {
        self.mix_points
            .retain(|mp| !(mp.kind == kind && &mp.pair_track_id == pair));
        self.mix_points.extend(points);
    }
}

/// Identifier for one of the two decks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeckId {
    #[default]
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; NUM_DECKS] = [DeckId::A, DeckId::B];

    /// The opposite deck
    pub fn other(self) -> Self {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }

    /// Index into deck arrays
    pub fn index(self) -> usize {
        match self {
            DeckId::A => 0,
            DeckId::B => 1,
        }
    }

    /// Crossfader position at which only this deck is audible (0 = A, 1 = B)
    pub fn crossfader_extreme(self) -> f32 {
        match self {
            DeckId::A => 0.0,
            DeckId::B => 1.0,
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckId::A => f.write_str("A"),
            DeckId::B => f.write_str("B"),
        }
    }
}

/// Parameters for one transition. Constructed once, consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionParams {
    pub kind: TransitionKind,
    /// Length of the transition window (seconds)
    pub duration: f64,
    /// Position on the source track where the handover begins
    pub mix_out_point: f64,
    /// Position on the target track where it starts playing
    pub mix_in_point: f64,
    pub source_bpm: f64,
    pub target_bpm: f64,
}
