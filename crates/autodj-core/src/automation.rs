//! Parameter automation lanes
//!
//! A lane holds the scheduled value of one continuous parameter (crossfader,
//! an EQ band, a filter cutoff, an effect send) as a list of segments on the
//! audio clock. Each segment starts at a clock time and moves from the value
//! the lane had at that instant to a target value by its end time.
//!
//! A new segment overrides everything scheduled at or after its start, which
//! gives the cancel-and-replace behaviour a transition needs when it grabs a
//! parameter that is still mid-ramp.

use serde::{Deserialize, Serialize};

/// Shape of a ramp between two values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampCurve {
    #[default]
    Linear,
    /// Constant ratio per unit time; suited to frequencies. Values are floored
    /// at `EXP_FLOOR` so the ratio stays defined.
    Exponential,
}

const EXP_FLOOR: f32 = 1e-4;

/// Older segments beyond this are folded into the lane's initial value
const MAX_SEGMENTS: usize = 64;

impl RampCurve {
    /// Interpolate between `from` and `to` at progress `p` (0..=1)
    pub fn interpolate(self, from: f32, to: f32, p: f32) -> f32 {
        let p = p.clamp(0.0, 1.0);
        match self {
            RampCurve::Linear => from + (to - from) * p,
            RampCurve::Exponential => {
                let a = from.max(EXP_FLOOR);
                let b = to.max(EXP_FLOOR);
                a * (b / a).powf(p)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: f64,
    end: f64,
    from: f32,
    to: f32,
    curve: RampCurve,
}

impl Segment {
    fn value_at(&self, t: f64) -> f32 {
        if t >= self.end || self.end <= self.start {
            self.to
        } else {
            let p = ((t - self.start) / (self.end - self.start)) as f32;
            self.curve.interpolate(self.from, self.to, p)
        }
    }
}

/// Scheduled values for a single parameter
#[derive(Debug, Clone)]
pub struct ParamLane {
    initial: f32,
    segments: Vec<Segment>,
}

impl ParamLane {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            segments: Vec::new(),
        }
    }

    /// Value of the parameter at clock time `t`
    pub fn value_at(&self, t: f64) -> f32 {
        self.segments
            .iter()
            .rev()
            .find(|s| s.start <= t)
            .map(|s| s.value_at(t))
            .unwrap_or(self.initial)
    }

    /// Jump to `value` at time `at`
    pub fn set_value_at(&mut self, value: f32, at: f64) {
        self.push(Segment {
            start: at,
            end: at,
            from: value,
            to: value,
            curve: RampCurve::Linear,
        });
    }

    /// Ramp from the lane's value at `start` to `value` at `end`
    pub fn ramp_to(&mut self, value: f32, start: f64, end: f64, curve: RampCurve) {
        let from = self.value_at(start);
        self.push(Segment {
            start,
            end: end.max(start),
            from,
            to: value,
            curve,
        });
    }

    /// Drop all automation and hold `value`
    pub fn reset(&mut self, value: f32) {
        self.initial = value;
        self.segments.clear();
    }

    /// True while a ramp is still moving at `t`
    pub fn is_ramping_at(&self, t: f64) -> bool {
        self.segments
            .iter()
            .rev()
            .find(|s| s.start <= t)
            .is_some_and(|s| t < s.end)
    }

    fn push(&mut self, segment: Segment) {
        // Anything scheduled at or after the new start is superseded
        self.segments.retain(|s| s.start < segment.start);
        self.segments.push(segment);
        if self.segments.len() > MAX_SEGMENTS {
            let oldest = self.segments.remove(0);
            self.initial = oldest.to;
        }
    }
}
