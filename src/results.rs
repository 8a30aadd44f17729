//! Result accumulation for sweeps.
//!
//! [`ResultMatrix`] grows one row per acquisition and is indexed
//! `[sweep-point, readout-channel, component]` with component 0 = I and 1 = Q.
//! [`Matrix2`] holds the I and Q planes of a nested sweep, `[outer, inner]`.
//! [`BranchedResults`] groups several result matrices measured under different
//! conditions at the same grid point (ground / 01 / 12).

use crate::error::{AppResult, SweepError};
use crate::instrument::IqSample;
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use num_complex::Complex64;
use std::collections::BTreeMap;

/// Component index of the in-phase quadrature.
pub const I: usize = 0;
/// Component index of the quadrature component.
pub const Q: usize = 1;

/// I/Q results of a one-dimensional sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMatrix {
    data: Array3<f64>,
}

impl ResultMatrix {
    /// Empty matrix for `channels` readout channels.
    pub fn new(channels: usize) -> Self {
        Self {
            data: Array3::zeros((0, channels, 2)),
        }
    }

    /// Append one acquisition.
    pub fn push(&mut self, sample: &IqSample) -> AppResult<()> {
        let channels = self.channels();
        if sample.i.len() != channels || sample.q.len() != channels {
            return Err(SweepError::Shape(format!(
                "expected {} channels, got I={} Q={}",
                channels,
                sample.i.len(),
                sample.q.len()
            )));
        }
        let mut row = Array2::zeros((channels, 2));
        for ch in 0..channels {
            row[[ch, I]] = sample.i[ch];
            row[[ch, Q]] = sample.q[ch];
        }
        self.data
            .push(Axis(0), row.view())
            .map_err(|e| SweepError::Shape(e.to_string()))
    }

    /// Number of sweep points accumulated.
    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// True before the first push.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Readout channels per point.
    pub fn channels(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    /// Raw `[point, channel, component]` array.
    pub fn as_array(&self) -> &Array3<f64> {
        &self.data
    }

    /// Components-first copy, `[component, channel, point]`.
    pub fn transpose_components(&self) -> Array3<f64> {
        self.data
            .view()
            .permuted_axes([2, 1, 0])
            .as_standard_layout()
            .into_owned()
    }

    /// Inverse of [`ResultMatrix::transpose_components`].
    pub fn from_components(components: &Array3<f64>) -> AppResult<Self> {
        if components.len_of(Axis(0)) != 2 {
            return Err(SweepError::Shape(format!(
                "components-first array must have 2 components, got {}",
                components.len_of(Axis(0))
            )));
        }
        Ok(Self {
            data: components
                .view()
                .permuted_axes([2, 1, 0])
                .as_standard_layout()
                .into_owned(),
        })
    }

    fn trace(&self, ch: usize, component: usize) -> AppResult<ArrayView1<'_, f64>> {
        if ch >= self.channels() {
            return Err(SweepError::Shape(format!(
                "channel {} out of range ({} channels)",
                ch,
                self.channels()
            )));
        }
        Ok(self.data.index_axis(Axis(1), ch).index_axis_move(Axis(1), component))
    }

    /// In-phase trace of channel `ch` along the sweep.
    pub fn i_trace(&self, ch: usize) -> AppResult<Array1<f64>> {
        Ok(self.trace(ch, I)?.to_owned())
    }

    /// Quadrature trace of channel `ch` along the sweep.
    pub fn q_trace(&self, ch: usize) -> AppResult<Array1<f64>> {
        Ok(self.trace(ch, Q)?.to_owned())
    }

    fn signal(&self, ch: usize) -> AppResult<Vec<Complex64>> {
        let i = self.trace(ch, I)?;
        let q = self.trace(ch, Q)?;
        Ok(i.iter().zip(q.iter()).map(|(&i, &q)| Complex64::new(i, q)).collect())
    }

    /// `|I + iQ|` of channel `ch`.
    pub fn magnitude(&self, ch: usize) -> AppResult<Array1<f64>> {
        Ok(self.signal(ch)?.iter().map(|s| s.norm()).collect())
    }

    /// `arg(I + iQ)` of channel `ch`, radians.
    pub fn phase(&self, ch: usize) -> AppResult<Array1<f64>> {
        Ok(self.signal(ch)?.iter().map(|s| s.arg()).collect())
    }
}

/// Index of the smallest element, NaN-aware.
pub fn argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// Index of the largest element, NaN-aware.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// I and Q planes of a nested sweep, `[outer, inner]`.
///
/// Unfilled cells are NaN so partial heat maps render blank.
#[derive(Debug, Clone)]
pub struct Matrix2 {
    i: Array2<f64>,
    q: Array2<f64>,
    rows_filled: usize,
}

impl Matrix2 {
    /// NaN-filled planes.
    pub fn new(outer: usize, inner: usize) -> Self {
        Self {
            i: Array2::from_elem((outer, inner), f64::NAN),
            q: Array2::from_elem((outer, inner), f64::NAN),
            rows_filled: 0,
        }
    }

    /// `(outer, inner)`.
    pub fn shape(&self) -> (usize, usize) {
        self.i.dim()
    }

    /// Rows written so far.
    pub fn rows_filled(&self) -> usize {
        self.rows_filled
    }

    /// Store the inner sweep for outer index `row`.
    pub fn set_row(&mut self, row: usize, i: &[f64], q: &[f64]) -> AppResult<()> {
        let (outer, inner) = self.shape();
        if row >= outer || i.len() != inner || q.len() != inner {
            return Err(SweepError::Shape(format!(
                "row {} with {}/{} values does not fit {}x{}",
                row,
                i.len(),
                q.len(),
                outer,
                inner
            )));
        }
        self.i.row_mut(row).assign(&ArrayView1::from(i));
        self.q.row_mut(row).assign(&ArrayView1::from(q));
        self.rows_filled = self.rows_filled.max(row + 1);
        Ok(())
    }

    /// In-phase plane (`Imat`).
    pub fn i(&self) -> &Array2<f64> {
        &self.i
    }

    /// Quadrature plane (`Qmat`).
    pub fn q(&self) -> &Array2<f64> {
        &self.q
    }

    /// `|I + iQ|` per cell.
    pub fn magnitude(&self) -> Array2<f64> {
        ndarray::Zip::from(&self.i)
            .and(&self.q)
            .map_collect(|&i, &q| Complex64::new(i, q).norm())
    }

    /// Phase per cell in radians.
    pub fn phase(&self) -> Array2<f64> {
        ndarray::Zip::from(&self.i)
            .and(&self.q)
            .map_collect(|&i, &q| Complex64::new(i, q).arg())
    }

    /// Magnitude with each row rescaled to `[0, 1]`.
    pub fn normalized_magnitude(&self) -> Array2<f64> {
        let mut mag = self.magnitude();
        for mut row in mag.rows_mut() {
            let min = row.iter().copied().filter(|v| !v.is_nan()).fold(f64::INFINITY, f64::min);
            let max = row.iter().copied().filter(|v| !v.is_nan()).fold(f64::NEG_INFINITY, f64::max);
            let range = max - min;
            if range.is_finite() && range > 0.0 {
                row.mapv_inplace(|v| (v - min) / range);
            }
        }
        mag
    }
}

/// Result matrices for several measurement conditions at each grid point.
///
/// Only enabled branches exist. Reading a disabled branch is an error, so callers guard
/// on the same configuration flag that disabled it.
#[derive(Debug, Clone, Default)]
pub struct BranchedResults {
    branches: BTreeMap<String, ResultMatrix>,
}

impl BranchedResults {
    /// Empty matrices for each enabled branch name.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>, channels: usize) -> Self {
        Self {
            branches: names
                .into_iter()
                .map(|name| (name.to_string(), ResultMatrix::new(channels)))
                .collect(),
        }
    }

    /// Append a sample to `name`.
    pub fn push(&mut self, name: &str, sample: &IqSample) -> AppResult<()> {
        self.branches
            .get_mut(name)
            .ok_or_else(|| SweepError::BranchDisabled(name.to_string()))?
            .push(sample)
    }

    /// Whether `name` is populated.
    pub fn contains(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    /// Results of branch `name`.
    pub fn branch(&self, name: &str) -> AppResult<&ResultMatrix> {
        self.branches
            .get(name)
            .ok_or_else(|| SweepError::BranchDisabled(name.to_string()))
    }

    /// Enabled branch names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.branches.keys().map(String::as_str).collect()
    }

    /// Number of enabled branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// True with no enabled branch.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Iterate `(name, results)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultMatrix)> {
        self.branches.iter().map(|(k, v)| (k.as_str(), v))
    }
}
