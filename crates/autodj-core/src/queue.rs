//! Pending-track queue
//!
//! The orchestrator only ever needs `len` and `pop_next`; editing belongs to
//! whoever owns the queue (UI, playlist import). `TrackQueue` is the plain
//! in-memory implementation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{Track, TrackId};

/// Ordered list of tracks waiting to be played
pub trait QueueProvider: Send {
    fn len(&self) -> usize;
    fn pop_next(&mut self) -> Option<Track>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared queue handle injected into the orchestrator
pub type SharedQueue = Arc<Mutex<dyn QueueProvider>>;

pub fn lock_queue(queue: &SharedQueue) -> MutexGuard<'_, dyn QueueProvider + 'static> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// FIFO track queue
#[derive(Debug, Clone, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    /// Remove every queued entry with the given id; returns how many were removed
    pub fn remove(&mut self, id: &TrackId) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| &t.id != id);
        before - self.tracks.len()
    }

    /// Replace the queue contents with a new ordering
    pub fn reorder(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks.into();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }
}

impl FromIterator<Track> for TrackQueue {
    fn from_iter<I: IntoIterator<Item = Track>>(iter: I) -> Self {
        Self {
            tracks: iter.into_iter().collect(),
        }
    }
}

impl QueueProvider for TrackQueue {
    fn len(&self) -> usize {
        self.tracks.len()
    }

    fn pop_next(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }
}
