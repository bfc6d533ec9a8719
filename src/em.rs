//! Outer Expectation-Maximization refinement of hyperparameter estimates
//!
//! Hyperparameters marked for EM inference are held fixed during each inner
//! MCMC run and re-estimated between runs from the run's sufficient
//! statistics (the averaged confusion counts and the average active-set
//! size). Only the last iteration's marginals are kept; the earlier runs
//! exist solely to move the point estimates.
//!
//! The inner chain and the update rule are deliberately separate units:
//! [`Sampler::run`](crate::sampler) produces the statistics, [`refine`]
//! maps them to new estimates.

use tracing::info;

use crate::parameters::{clamp_em_expected, clamp_em_rate};
use crate::sampler::SamplerStats;
use crate::DEFAULT_EM_ITERATIONS;

/// Which hyperparameters are re-estimated between runs
#[derive(Debug, Clone, Copy)]
pub(crate) struct EmFlags {
    pub(crate) alpha: bool,
    pub(crate) beta: bool,
    pub(crate) expected: bool,
}

impl EmFlags {
    pub(crate) fn any(&self) -> bool {
        self.alpha || self.beta || self.expected
    }

    /// Number of outer iterations: one plain run unless EM is requested
    pub(crate) fn iterations(&self) -> usize {
        if self.any() {
            DEFAULT_EM_ITERATIONS
        } else {
            1
        }
    }
}

/// Current point estimates of the EM-inferred hyperparameters
///
/// The starting values are neutral guesses; they only matter for the first
/// inner run and are replaced by data-driven estimates afterwards.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PointEstimates {
    pub(crate) alpha: f64,
    pub(crate) beta: f64,
    pub(crate) expected: f64,
}

impl Default for PointEstimates {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            beta: 0.4,
            expected: 1.0,
        }
    }
}

/// Updates the flagged estimates from one run's sufficient statistics
///
/// The update rules are the maximum-likelihood estimators of the model:
///
/// ```text
/// alpha <- avg(n10) / (avg(n00) + avg(n10))
/// beta  <- avg(n01) / (avg(n01) + avg(n11))
/// t     <- avg(active terms)
/// ```
///
/// Each value is clamped away from the boundaries so that the next run's
/// log score stays finite. A degenerate chain that recorded nothing leaves
/// the previous estimates in place.
pub(crate) fn refine(estimates: &mut PointEstimates, flags: EmFlags, stats: &SamplerStats) {
    if stats.records == 0 {
        return;
    }

    if flags.alpha {
        let raw = stats.avg_n10() / (stats.avg_n00() + stats.avg_n10());
        if raw.is_finite() {
            let alpha = clamp_em_rate(raw);
            info!(old = estimates.alpha, new = alpha, "EM update of alpha");
            estimates.alpha = alpha;
        }
    }

    if flags.beta {
        let raw = stats.avg_n01() / (stats.avg_n01() + stats.avg_n11());
        if raw.is_finite() {
            let beta = clamp_em_rate(raw);
            info!(old = estimates.beta, new = beta, "EM update of beta");
            estimates.beta = beta;
        }
    }

    if flags.expected {
        let expected = clamp_em_expected(stats.avg_active());
        info!(
            old = estimates.expected,
            new = expected,
            "EM update of the expected term count"
        );
        estimates.expected = expected;
    }
}
