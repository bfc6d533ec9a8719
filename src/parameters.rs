//! Hyperparameter modes and the discrete grids used for their inference
//!
//! The model has three hyperparameters: the false-positive rate `alpha`,
//! the false-negative rate `beta` and the expected number of active terms.
//! Each can be supplied as a fixed value, sampled over a discrete grid
//! within the MCMC chain, or point-estimated by the outer EM loop.

use crate::{MgsaError, MgsaResult};

/// Number of candidate values in a hyperparameter grid
pub const GRID_POINTS: usize = 20;

/// Fixed values passed by the caller are clamped to this distance from 0 and 1
pub const RATE_EPSILON: f64 = 1e-6;

/// EM point estimates are clamped to this distance from 0 and 1
pub const EM_EPSILON: f64 = 1e-7;

/// How a single hyperparameter is treated during the analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parameter {
    /// Use the given value throughout the whole run
    Fixed(f64),
    /// Sample the value over a discrete grid as part of the MCMC chain,
    /// yielding a posterior distribution over the grid
    SampledGrid,
    /// Start from a neutral value and refine it with an outer EM loop
    Em,
}

/// Validates a user-supplied rate and applies the epsilon clamp
///
/// Values outside `(0, 1)` are an error; values inside the open interval
/// but closer than [`RATE_EPSILON`] to a boundary are clamped so that the
/// log score stays finite. The clamp is a documented numerical-stability
/// policy, not an error path.
///
/// # Errors
///
/// [`MgsaError::InvalidProbability`] if the value is not within `(0, 1)`
pub fn checked_rate(name: &'static str, value: f64) -> MgsaResult<f64> {
    if !(value > 0.0 && value < 1.0) {
        return Err(MgsaError::InvalidProbability { name, value });
    }
    Ok(value.clamp(RATE_EPSILON, 1.0 - RATE_EPSILON))
}

/// Validates a user-supplied expected number of active terms
///
/// # Errors
///
/// [`MgsaError::InvalidExpectedTerms`] if the value is not positive or not finite
pub fn checked_expected_terms(value: f64) -> MgsaResult<f64> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(MgsaError::InvalidExpectedTerms(value));
    }
    Ok(value)
}

/// Clamps an EM-derived rate estimate away from 0 and 1
pub(crate) fn clamp_em_rate(value: f64) -> f64 {
    value.clamp(EM_EPSILON, 1.0 - EM_EPSILON)
}

/// Clamps an EM-derived expected-term-count estimate to a positive value
pub(crate) fn clamp_em_expected(value: f64) -> f64 {
    value.max(EM_EPSILON)
}

/// Returns the candidate grid for a rate parameter, bounded by `max`
///
/// The first grid point is a near-zero value so that a rate of
/// "practically absent" is always available; the remaining points are
/// spaced evenly up to `max`. When `max` covers the whole unit interval
/// the top point is `0.95`, matching an unbounded grid.
pub fn rate_grid(max: f64) -> Vec<f64> {
    let max = if max.is_nan() { 1.0 } else { max.max(0.01) };
    let span = if max > 0.999_999_99 {
        GRID_POINTS
    } else {
        GRID_POINTS - 1
    } as f64;

    let mut grid = Vec::with_capacity(GRID_POINTS);
    grid.push(1e-7);
    for i in 1..GRID_POINTS {
        grid.push(i as f64 * max / span);
    }
    grid
}

/// Returns the candidate grid for the expected number of active terms
pub fn expected_terms_grid() -> Vec<f64> {
    (1..=GRID_POINTS).map(|i| i as f64).collect()
}

/// A hyperparameter grid and the currently selected candidate
#[derive(Debug, Clone)]
pub(crate) struct GridState {
    values: Vec<f64>,
    idx: usize,
}

impl GridState {
    pub(crate) fn new(values: Vec<f64>) -> Self {
        debug_assert!(!values.is_empty());
        Self { values, idx: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn current(&self) -> f64 {
        self.values[self.idx]
    }

    pub(crate) fn index(&self) -> usize {
        self.idx
    }

    pub(crate) fn set_index(&mut self, idx: usize) {
        debug_assert!(idx < self.values.len());
        self.idx = idx;
    }

    pub(crate) fn values(&self) -> &[f64] {
        &self.values
    }
}
