//! Parameter grid builder.
//!
//! Sweep axes are computed once from a [`GridSpec`] and never change for the duration of
//! a sweep. Three conventions show up in the measurement scripts:
//!
//! - `Linspace`: inclusive `start..=stop` with `count` points
//! - `CenterSpan`: inclusive `center - span ..= center + span`
//! - `Stepped`: `start + step * i` for `i in 0..count`
//!
//! The older frequency sweeps used `step = 2 * span / count` starting at `center - span`,
//! which stops one step short of `center + span`. That form is available through
//! [`GridSpec::center_span_stepped`].
//!
//! No validation is done on `count == 0` or on negative spans; an empty or reversed axis
//! is returned and the caller decides what that means.

use serde::{Deserialize, Serialize};

/// How to derive the set-points of one sweep axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridSpec {
    /// Evenly spaced, inclusive of both ends
    Linspace {
        /// First point
        start: f64,
        /// Last point
        stop: f64,
        /// Number of points
        count: usize,
    },
    /// Evenly spaced over `center ± span`, inclusive of both ends
    CenterSpan {
        /// Middle of the sweep
        center: f64,
        /// Half-width of the sweep
        span: f64,
        /// Number of points
        count: usize,
    },
    /// Fixed step from a start value
    Stepped {
        /// First point
        start: f64,
        /// Increment between points
        step: f64,
        /// Number of points
        count: usize,
    },
}

impl GridSpec {
    /// `center - span + (2 * span / count) * i`, the half-open frequency grid.
    pub fn center_span_stepped(center: f64, span: f64, count: usize) -> Self {
        let step = if count == 0 {
            0.0
        } else {
            2.0 * span / count as f64
        };
        GridSpec::Stepped {
            start: center - span,
            step,
            count,
        }
    }

    /// Number of points on the axis.
    pub fn count(&self) -> usize {
        match *self {
            GridSpec::Linspace { count, .. }
            | GridSpec::CenterSpan { count, .. }
            | GridSpec::Stepped { count, .. } => count,
        }
    }

    /// Value of point `index`.
    pub fn point(&self, index: usize) -> f64 {
        match *self {
            GridSpec::Linspace { start, stop, count } => linear_position(start, stop, count, index),
            GridSpec::CenterSpan {
                center,
                span,
                count,
            } => linear_position(center - span, center + span, count, index),
            GridSpec::Stepped { start, step, .. } => start + step * index as f64,
        }
    }

    /// All set-points in order.
    pub fn points(&self) -> Vec<f64> {
        (0..self.count()).map(|i| self.point(i)).collect()
    }

    /// Materialize the grid into a named axis.
    pub fn axis(&self, name: &str, unit: &str) -> SweepAxis {
        SweepAxis::new(name, unit, self.points())
    }
}

fn linear_position(start: f64, stop: f64, count: usize, index: usize) -> f64 {
    if count <= 1 {
        start
    } else if index + 1 == count {
        // Pin the last point so the axis ends exactly on `stop`.
        stop
    } else {
        let step = (stop - start) / (count - 1) as f64;
        start + step * index as f64
    }
}

/// An ordered, immutable list of set-points with a name and unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    name: String,
    unit: String,
    points: Vec<f64>,
}

impl SweepAxis {
    /// Axis from explicit points.
    pub fn new(name: &str, unit: &str, points: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            points,
        }
    }

    /// Axis name, also the dataset key in saved records.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical unit of the set-points.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Set-points.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Number of set-points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True for a zero-point axis.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Spacing between the first two points (0 for shorter axes).
    pub fn step(&self) -> f64 {
        match self.points.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }

    /// Copy of the axis with every point floored, for integer-valued hardware settings
    /// (attenuator dB steps, DAC gains).
    pub fn floored(&self) -> Self {
        Self {
            name: self.name.clone(),
            unit: self.unit.clone(),
            points: self.points.iter().map(|p| p.floor()).collect(),
        }
    }
}
