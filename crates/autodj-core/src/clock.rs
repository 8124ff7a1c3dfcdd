//! Audio clock abstraction
//!
//! All transport positions and automation timestamps are expressed in seconds
//! on a single monotonic clock shared by the decks, the mixer and the engine.

use std::sync::Arc;

/// Monotonic time source the audio backend schedules against
pub trait AudioClock: Send + Sync {
    /// Current clock time in seconds
    fn now(&self) -> f64;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn AudioClock>;

/// Clock driven by the tokio timer
///
/// Uses `tokio::time::Instant`, so a paused test runtime advances this clock
/// in lockstep with `tokio::time::sleep` and the monitor interval.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    /// Convenience constructor returning a shared handle
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for TokioClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        assert!(clock.now() < 1e-6);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!((clock.now() - 1.5).abs() < 1e-6);
    }
}
