//! Cue scheduler
//!
//! Walks a sorted cue list, sleeping until each cue's due time on the audio
//! clock and then handing it to the caller. Due times are always
//! `reference + offset`; a late wake-up never shifts later cues.

use std::time::Duration;

use crate::clock::SharedClock;
use crate::engine::choreography::Cue;

/// Run `cues` against `clock`, calling `apply(index, cue, due_time)` for each
///
/// Cues must be sorted by offset. Returns once the last cue has been applied.
pub async fn run_cues<F>(clock: &SharedClock, reference: f64, cues: &[Cue], mut apply: F)
where
    F: FnMut(usize, &Cue, f64),
{
    for (index, cue) in cues.iter().enumerate() {
        let due = reference + cue.offset;
        let wait = due - clock.now();
        if wait > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
        apply(index, cue, due);
    }
}
