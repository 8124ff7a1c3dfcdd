//! Software audio backend
//!
//! Clock-driven implementations of [`Deck`](crate::deck::Deck) and
//! [`Mixer`](crate::mixer::Mixer) with no audio I/O. Used by the headless
//! player and by every orchestrator test.

mod deck;
mod mixer;

pub use deck::SimDeck;
pub use mixer::{CueEntry, RecordedSet, SimMixer};
