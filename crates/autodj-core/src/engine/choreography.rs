//! Archetype choreographies
//!
//! Each archetype is expressed as a flat list of cues, every cue an offset in
//! seconds from the transition reference time plus one action. The list is
//! built once from the transition parameters and handed to the scheduler; no
//! cue depends on the outcome of another.
//!
//! Every list ends with a single `Settle` cue at `duration + settle_margin`
//! which returns the source deck to a neutral, stopped, rewound state and
//! leaves the target at full level on its side of the crossfader.

use crate::automation::RampCurve;
use crate::deck::{DeckParam, FilterKind, FILTER_OPEN_HZ};
use crate::engine::TransitionKind;
use crate::mixer::{EqBand, SampleHit, EQ_KILL_DB};
use crate::types::{DeckId, TransitionParams};

/// Which deck of the transition an action addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

/// One scheduled operation
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start the target deck from `offset` on its track
    StartTarget { offset: f64 },
    /// Stop the source deck
    StopSource,
    /// Move the crossfader to `to`; `over == 0` jumps
    Crossfader { to: f32, over: f64, curve: RampCurve },
    /// Automate a deck parameter; `over == 0` jumps
    Param {
        side: Side,
        param: DeckParam,
        to: f32,
        over: f64,
        curve: RampCurve,
    },
    Filter { side: Side, kind: FilterKind },
    /// Automate a channel EQ band; `over == 0` jumps
    Eq {
        side: Side,
        band: EqBand,
        db: f32,
        over: f64,
    },
    Sample(SampleHit),
    Speed { side: Side, rate: f64 },
    Reverse { side: Side, on: bool },
    /// Loop `length` seconds from the deck's position at the cue's due time
    Loop { side: Side, length: f64 },
    ClearLoop { side: Side },
    /// Final cleanup; always the last cue
    Settle,
}

/// A timed action
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    /// Seconds after the reference time
    pub offset: f64,
    pub action: Action,
}

/// Everything the builder needs besides the params
#[derive(Debug, Clone, Copy)]
pub struct ChoreographyContext {
    pub target: DeckId,
    /// Playback rate of the source when the transition was requested
    pub source_rate: f64,
    pub settle_margin: f64,
}

/// The full cue list for one transition
#[derive(Debug, Clone)]
pub struct Choreography {
    pub kind: TransitionKind,
    pub duration: f64,
    pub cues: Vec<Cue>,
}

impl Choreography {
    /// Build the cue list for `params.kind`
    pub fn build(params: &TransitionParams, ctx: &ChoreographyContext) -> Self {
        let mut b = Builder::new(params.duration.max(0.0));
        let d = b.duration;
        let target_x = ctx.target.crossfader_extreme();

        // Common opening: target starts at its mix-in point at full level
        b.at(0.0, Action::StartTarget {
            offset: params.mix_in_point,
        });
        b.at(0.0, param(Side::Target, DeckParam::Volume, 0.0, 0.0));

        match params.kind {
            TransitionKind::EchoOut => {
                b.at(0.0, crossfade(target_x, d));
                b.at(0.0, param(Side::Source, DeckParam::DelayWet, 0.7, d * 0.4));
                b.at(0.0, param(Side::Source, DeckParam::DelayFeedback, 0.8, d * 0.4));
                b.at(0.0, param(Side::Source, DeckParam::Volume, -40.0, d * 0.8));
                b.at(d, Action::StopSource);
            }

            TransitionKind::LoopRoll => {
                let beat = beat_secs(params.source_bpm);
                let quarter = d / 4.0;
                b.at(0.0, crossfade(0.5, d * 0.5));
                b.at(d * 0.5, crossfade(target_x, d * 0.5));

                for (i, beats) in [16.0, 8.0, 4.0, 2.0].into_iter().enumerate() {
                    let t = i as f64 * quarter;
                    b.at(t, Action::Loop {
                        side: Side::Source,
                        length: beat * beats,
                    });
                    if i < 3 {
                        let hit = if i % 2 == 0 { SampleHit::Kick } else { SampleHit::Snare };
                        b.at(t, Action::Sample(hit));
                    }
                    // Cutoff closes geometrically toward 400 Hz over the four stages
                    let cutoff = FILTER_OPEN_HZ * (400.0 / FILTER_OPEN_HZ).powf((i + 1) as f32 / 4.0);
                    b.at(t, exp_ramp(Side::Source, DeckParam::FilterCutoff, cutoff, quarter));
                }

                b.at(d, Action::StopSource);
                b.at(d, Action::ClearLoop { side: Side::Source });
                b.at(d, Action::Sample(SampleHit::Crash));
            }

            TransitionKind::SlamCut => {
                let slam = d * 0.7;
                b.at(0.0, crossfade(0.5, d * 0.4));
                b.at(0.0, Action::Filter {
                    side: Side::Source,
                    kind: FilterKind::Highpass,
                });
                b.at(0.0, param(Side::Source, DeckParam::FilterCutoff, 20.0, 0.0));
                b.at(0.0, exp_ramp(Side::Source, DeckParam::FilterCutoff, 1000.0, slam));
                b.at(0.0, Action::Filter {
                    side: Side::Target,
                    kind: FilterKind::Lowpass,
                });
                b.at(0.0, param(Side::Target, DeckParam::FilterCutoff, FILTER_OPEN_HZ, 0.0));
                b.at(0.0, exp_ramp(Side::Target, DeckParam::FilterCutoff, 1000.0, slam));

                b.at(slam, Action::Crossfader {
                    to: target_x,
                    over: 0.0,
                    curve: RampCurve::Linear,
                });
                b.at(slam, Action::StopSource);
                b.at(slam, param(Side::Source, DeckParam::FilterCutoff, FILTER_OPEN_HZ, 0.0));
                b.at(slam, param(Side::Target, DeckParam::FilterCutoff, FILTER_OPEN_HZ, 0.0));
                b.at(slam, Action::Sample(SampleHit::Crash));
            }

            TransitionKind::Scratch => {
                const PATTERN: [f64; 8] = [1.0, 0.5, 2.0, -0.5, 1.0, 0.5, 2.0, 1.0];
                let step = d / PATTERN.len() as f64;
                b.at(0.0, crossfade(target_x, d));
                for (i, rate) in PATTERN.into_iter().enumerate() {
                    let t = i as f64 * step;
                    b.at(t, Action::Speed {
                        side: Side::Source,
                        rate: rate.abs(),
                    });
                    b.at(t, Action::Reverse {
                        side: Side::Source,
                        on: rate < 0.0,
                    });
                }
                b.at(d, Action::StopSource);
            }

            TransitionKind::Acapella => {
                b.at(0.0, Action::Filter {
                    side: Side::Source,
                    kind: FilterKind::Bandpass,
                });
                b.at(0.0, param(Side::Source, DeckParam::FilterCutoff, 1650.0, 0.0));
                b.at(0.0, param(Side::Source, DeckParam::FilterQ, 2.0, 0.0));
                b.at(0.0, crossfade(target_x, d));
                b.at(d, Action::StopSource);
            }

            TransitionKind::VinylBrake => {
                const STEPS: u32 = 30;
                b.at(0.0, crossfade(target_x, d));
                for i in 0..=STEPS {
                    let progress = i as f64 / STEPS as f64;
                    let eased = progress * progress;
                    let t = d * progress;
                    b.at(t, Action::Speed {
                        side: Side::Source,
                        rate: (ctx.source_rate * (1.0 - eased)).max(0.001),
                    });
                    b.at(t, param(
                        Side::Source,
                        DeckParam::FilterCutoff,
                        (FILTER_OPEN_HZ * (1.0 - eased as f32)).max(100.0),
                        0.0,
                    ));
                }
                b.at(d, Action::StopSource);
            }

            TransitionKind::BuildCut => {
                let drop = d * 0.8;
                b.at(0.0, eq(Side::Target, EqBand::Low, EQ_KILL_DB, 0.0));
                b.at(0.0, crossfade(target_x, d));
                b.at(drop, Action::StopSource);
                b.at(drop, eq(Side::Target, EqBand::Low, 0.0, 0.1));
                b.at(drop, Action::Sample(SampleHit::Kick));
            }

            TransitionKind::SmartEq => {
                let half = d / 2.0;
                let source_x = ctx.target.other().crossfader_extreme();
                b.at(0.0, eq(Side::Target, EqBand::Low, EQ_KILL_DB, 0.0));
                b.at(0.0, Action::Crossfader {
                    to: source_x,
                    over: 0.0,
                    curve: RampCurve::Linear,
                });
                b.at(0.0, crossfade(0.5, half));
                b.at((half - 0.05).max(0.0), Action::Sample(SampleHit::Snare));
                // Bass swap over half a second at the midpoint
                b.at(half, eq(Side::Source, EqBand::Low, EQ_KILL_DB, 0.5));
                b.at(half, eq(Side::Target, EqBand::Low, 0.0, 0.5));
                b.at(half + 0.5, Action::Sample(SampleHit::Kick));
                b.at(half, crossfade(target_x, half));
                b.at(d, Action::StopSource);
            }

            TransitionKind::GradualCrossfade => {
                b.at(0.0, crossfade(target_x, d));
                b.at(d * 0.5, param(Side::Source, DeckParam::Volume, -6.0, d * 0.5));
                b.at(d, Action::StopSource);
            }

            TransitionKind::ReverbWash => {
                b.at(0.0, param(Side::Source, DeckParam::ReverbDecay, 6.0, 0.0));
                b.at(0.0, param(Side::Source, DeckParam::ReverbWet, 0.8, d * 0.5));
                b.at(0.0, exp_ramp(Side::Source, DeckParam::FilterCutoff, 800.0, d * 0.75));
                b.at(0.0, crossfade(target_x, d));
                b.at(d * 0.5, param(Side::Source, DeckParam::Volume, -40.0, d * 0.5));
                b.at(d, Action::StopSource);
            }

            TransitionKind::PhaserBuild => {
                let build = d * 0.75;
                b.at(0.0, Action::Filter {
                    side: Side::Source,
                    kind: FilterKind::Highpass,
                });
                b.at(0.0, param(Side::Source, DeckParam::FilterQ, 8.0, 0.0));
                b.at(0.0, param(Side::Source, DeckParam::FilterCutoff, 20.0, 0.0));
                b.at(0.0, exp_ramp(Side::Source, DeckParam::FilterCutoff, 2000.0, build));
                b.at(0.0, crossfade(0.5, build));
                for fraction in [0.5, 0.625, 0.75, 0.875] {
                    b.at(d * fraction, Action::Sample(SampleHit::Snare));
                }
                b.at(build, Action::Sample(SampleHit::Horn));
                b.at(build, crossfade(target_x, d - build));
                b.at(d, Action::StopSource);
            }

            TransitionKind::BeatMatched => {
                let ratio = if params.target_bpm > 0.0 && params.source_bpm > 0.0 {
                    params.source_bpm / params.target_bpm
                } else {
                    1.0
                };
                let half = d / 2.0;
                let beat = beat_secs(params.source_bpm);

                b.at(0.0, Action::Speed {
                    side: Side::Target,
                    rate: ratio,
                });
                b.at(0.0, eq(Side::Target, EqBand::Low, EQ_KILL_DB, 0.0));
                b.at(0.0, crossfade(target_x, d));
                b.at(half, eq(Side::Source, EqBand::Low, EQ_KILL_DB, beat));
                b.at(half, eq(Side::Target, EqBand::Low, 0.0, beat));

                // Ease the target back to its own tempo over the last quarter
                const EASE_STEPS: u32 = 5;
                for i in 1..=EASE_STEPS {
                    let p = i as f64 / EASE_STEPS as f64;
                    b.at(d * (0.75 + 0.2 * p), Action::Speed {
                        side: Side::Target,
                        rate: ratio + (1.0 - ratio) * p,
                    });
                }
                b.at(d, Action::StopSource);
            }
        }

        b.at(d + ctx.settle_margin.max(0.0), Action::Settle);
        b.finish(params.kind)
    }

    /// Offset of the closing `Settle` cue
    pub fn settle_offset(&self) -> f64 {
        self.cues.last().map(|c| c.offset).unwrap_or(self.duration)
    }
}

struct Builder {
    duration: f64,
    cues: Vec<Cue>,
}

impl Builder {
    fn new(duration: f64) -> Self {
        Self {
            duration,
            cues: Vec::new(),
        }
    }

    fn at(&mut self, offset: f64, action: Action) {
        self.cues.push(Cue {
            offset: offset.max(0.0),
            action,
        });
    }

    fn finish(mut self, kind: TransitionKind) -> Choreography {
        // Stable: cues sharing an offset keep their authored order
        self.cues.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        Choreography {
            kind,
            duration: self.duration,
            cues: self.cues,
        }
    }
}

fn beat_secs(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        60.0 / bpm
    } else {
        0.5
    }
}

fn crossfade(to: f32, over: f64) -> Action {
    Action::Crossfader {
        to,
        over,
        curve: RampCurve::Linear,
    }
}

fn param(side: Side, param: DeckParam, to: f32, over: f64) -> Action {
    Action::Param {
        side,
        param,
        to,
        over,
        curve: RampCurve::Linear,
    }
}

fn exp_ramp(side: Side, param: DeckParam, to: f32, over: f64) -> Action {
    Action::Param {
        side,
        param,
        to,
        over,
        curve: RampCurve::Exponential,
    }
}

fn eq(side: Side, band: EqBand, db: f32, over: f64) -> Action {
    Action::Eq { side, band, db, over }
}
