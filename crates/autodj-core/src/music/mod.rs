//! Music theory utilities for key matching
//!
//! Parses the key/scale pair produced by the feature extractor and answers the
//! two questions the mix-point scorer asks: same key, or relative major/minor.

/// Musical key with root note and scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MusicalKey {
    /// Root note as semitone offset from C (0=C, 1=C#, 2=D, ..., 11=B)
    pub root: u8,
    /// true = minor, false = major
    pub minor: bool,
}

/// How two keys relate for mixing purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRelation {
    /// Same root and same scale
    Identical,
    /// Relative major/minor (same key signature)
    Relative,
    Unrelated,
}

impl MusicalKey {
    pub const fn new(root: u8, minor: bool) -> Self {
        Self {
            root: root % 12,
            minor,
        }
    }

    /// Parse key string like "Am", "C#m", "F", "Bb", "F# minor"
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let mut chars = s.chars().peekable();

        let base_root = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let root = match chars.peek() {
            Some('#') => {
                chars.next();
                (base_root + 1) % 12
            }
            Some('b') => {
                chars.next();
                (base_root + 11) % 12
            }
            _ => base_root,
        };

        let rest: String = chars.collect::<String>().trim().to_lowercase();
        // "maj"/"major" must not be read as the "m" minor suffix
        let minor = !rest.starts_with("maj") && (rest.starts_with('m') || rest.contains("min"));

        Some(Self { root, minor })
    }

    /// Build from separate key ("A", "C#") and scale ("minor"/"major") fields
    ///
    /// A missing scale falls back to whatever suffix the key string carries.
    pub fn from_parts(key: &str, scale: Option<&str>) -> Option<Self> {
        let parsed = Self::parse(key)?;
        match scale.map(|s| s.trim().to_lowercase()) {
            Some(s) if s.starts_with("min") => Some(Self::new(parsed.root, true)),
            Some(s) if s.starts_with("maj") => Some(Self::new(parsed.root, false)),
            _ => Some(parsed),
        }
    }

    /// The relative major/minor key (minor → +3 semitones, major → -3)
    pub fn relative(&self) -> Self {
        if self.minor {
            Self::new(self.root + 3, false)
        } else {
            Self::new(self.root + 9, true)
        }
    }

    pub fn relation_to(&self, other: &MusicalKey) -> KeyRelation {
        if self == other {
            KeyRelation::Identical
        } else if self.relative() == *other {
            KeyRelation::Relative
        } else {
            KeyRelation::Unrelated
        }
    }
}

impl std::fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
        let note = NOTE_NAMES[self.root as usize];
        if self.minor {
            write!(f, "{}m", note)
        } else {
            f.write_str(note)
        }
    }
}

/// Check if two keys are compatible (same key or relative major/minor)
pub fn are_compatible(key1: &MusicalKey, key2: &MusicalKey) -> bool {
    key1.relation_to(key2) != KeyRelation::Unrelated
}
