//! The top-level model-based enrichment analysis
//!
//! [`Mgsa`] wires the pieces together: it resolves the hyperparameter modes
//! into per-run knobs, runs the MCMC chain (wrapped into the outer EM loop
//! when requested) and assembles the per-term marginals, the MAP estimate
//! and the grid posteriors into an [`AnalysisResult`] for the reporting
//! layer.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::annotations::{AnnotationIndex, TermId};
use crate::em::{refine, EmFlags, PointEstimates};
use crate::parameters::{
    checked_expected_terms, checked_rate, expected_terms_grid, rate_grid, GridState, Parameter,
};
use crate::sampler::{
    CancelToken, Knob, MapEstimate, McmcConfig, ProgressReport, RunOutcome, Sampler,
};
use crate::score::ScoreState;
use crate::MgsaResult;

/// The per-term output of an analysis
#[derive(Debug, Clone)]
pub struct TermResult {
    term: TermId,
    marginal: f64,
    population_annotated: usize,
    study_annotated: usize,
}

impl TermResult {
    /// The ID of the term
    pub fn term(&self) -> TermId {
        self.term
    }

    /// The posterior marginal probability that the term is active
    pub fn marginal(&self) -> f64 {
        self.marginal
    }

    /// The number of population items annotated by the term
    pub fn population_annotated(&self) -> usize {
        self.population_annotated
    }

    /// The number of study-set items annotated by the term
    pub fn study_annotated(&self) -> usize {
        self.study_annotated
    }
}

/// The complete result of one analysis
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    term_results: Vec<TermResult>,
    map: MapEstimate,
    alpha_posterior: Option<Vec<(f64, f64)>>,
    beta_posterior: Option<Vec<(f64, f64)>>,
    expected_posterior: Option<Vec<(f64, f64)>>,
    accepts: u64,
    rejects: u64,
    records: u64,
    cancelled: bool,
}

impl AnalysisResult {
    /// The per-term marginals, in slot order of the annotation index
    pub fn term_results(&self) -> &[TermResult] {
        &self.term_results
    }

    /// The highest-scoring term set seen during sampling
    pub fn map(&self) -> &MapEstimate {
        &self.map
    }

    /// The posterior over the alpha grid, present when alpha was grid-sampled
    ///
    /// Each entry is a `(candidate value, posterior probability)` pair.
    pub fn alpha_posterior(&self) -> Option<&[(f64, f64)]> {
        self.alpha_posterior.as_deref()
    }

    /// The posterior over the beta grid, present when beta was grid-sampled
    pub fn beta_posterior(&self) -> Option<&[(f64, f64)]> {
        self.beta_posterior.as_deref()
    }

    /// The posterior over the expected-term-count grid, present when it was
    /// grid-sampled
    pub fn expected_posterior(&self) -> Option<&[(f64, f64)]> {
        self.expected_posterior.as_deref()
    }

    /// The number of accepted moves of the final chain
    pub fn accepts(&self) -> u64 {
        self.accepts
    }

    /// The number of rejected moves of the final chain
    pub fn rejects(&self) -> u64 {
        self.rejects
    }

    /// The number of recorded samples the marginals are based on
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Whether the run was stopped early by a [`CancelToken`]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// The model-based gene set analysis
///
/// Configuration mirrors the knobs of the underlying model: the three
/// hyperparameter modes, the activation prior switch and the MCMC budget.
/// The default treats all three hyperparameters as unknown and samples
/// them over their grids within the chain.
///
/// See the [crate documentation](crate) for a full example.
#[derive(Debug, Clone)]
pub struct Mgsa {
    alpha: Parameter,
    beta: Parameter,
    expected_terms: Parameter,
    max_alpha: f64,
    max_beta: f64,
    use_prior: bool,
    seed: Option<u64>,
    config: McmcConfig,
}

impl Default for Mgsa {
    fn default() -> Self {
        Self {
            alpha: Parameter::SampledGrid,
            beta: Parameter::SampledGrid,
            expected_terms: Parameter::SampledGrid,
            max_alpha: 1.0,
            max_beta: 1.0,
            use_prior: true,
            seed: None,
            config: McmcConfig::default(),
        }
    }
}

impl Mgsa {
    /// Constructs an analysis with all hyperparameters in grid-sampling mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mode of the false-positive rate
    ///
    /// # Errors
    ///
    /// [`MgsaError::InvalidProbability`](crate::MgsaError::InvalidProbability)
    /// if a fixed value lies outside `(0, 1)`. Values inside the interval
    /// are clamped to the documented epsilon band.
    pub fn alpha(mut self, alpha: Parameter) -> MgsaResult<Self> {
        self.alpha = match alpha {
            Parameter::Fixed(value) => Parameter::Fixed(checked_rate("alpha", value)?),
            other => other,
        };
        Ok(self)
    }

    /// Sets the mode of the false-negative rate
    ///
    /// # Errors
    ///
    /// [`MgsaError::InvalidProbability`](crate::MgsaError::InvalidProbability)
    /// if a fixed value lies outside `(0, 1)`
    pub fn beta(mut self, beta: Parameter) -> MgsaResult<Self> {
        self.beta = match beta {
            Parameter::Fixed(value) => Parameter::Fixed(checked_rate("beta", value)?),
            other => other,
        };
        Ok(self)
    }

    /// Sets the mode of the expected number of active terms
    ///
    /// # Errors
    ///
    /// [`MgsaError::InvalidExpectedTerms`](crate::MgsaError::InvalidExpectedTerms)
    /// if a fixed value is not positive
    pub fn expected_terms(mut self, expected: Parameter) -> MgsaResult<Self> {
        self.expected_terms = match expected {
            Parameter::Fixed(value) => Parameter::Fixed(checked_expected_terms(value)?),
            other => other,
        };
        Ok(self)
    }

    /// Bounds the alpha grid from above when alpha is grid-sampled
    pub fn max_alpha(mut self, max: f64) -> Self {
        self.max_alpha = max;
        self
    }

    /// Bounds the beta grid from above when beta is grid-sampled
    pub fn max_beta(mut self, max: f64) -> Self {
        self.max_beta = max;
        self
    }

    /// Enables or disables the activation prior in the score
    pub fn use_prior(mut self, use_prior: bool) -> Self {
        self.use_prior = use_prior;
        self
    }

    /// Pins the random seed for a reproducible run
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the total number of MCMC steps per chain
    pub fn steps(mut self, steps: usize) -> Self {
        self.config.steps = steps;
        self
    }

    /// Sets the number of discarded burn-in steps
    pub fn burnin(mut self, burnin: usize) -> Self {
        self.config.burnin = burnin;
        self
    }

    /// Starts each chain from a randomized activation vector
    pub fn random_start(mut self, random_start: bool) -> Self {
        self.config.random_start = random_start;
        self
    }

    /// Sets the minimum wall-time between progress reports
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.report_interval = interval;
        self
    }

    /// Runs the analysis
    ///
    /// `observed` flags every population item as member of the study set or
    /// not, indexed by item slot.
    ///
    /// # Errors
    ///
    /// - [`MgsaError::PopulationMismatch`](crate::MgsaError::PopulationMismatch)
    ///   if `observed` does not cover the population
    /// - [`MgsaError::EmptyStudySet`](crate::MgsaError::EmptyStudySet)
    ///   if no item is observed
    pub fn run(&self, index: &AnnotationIndex, observed: &[bool]) -> MgsaResult<AnalysisResult> {
        self.run_with(index, observed, None, &CancelToken::new())
    }

    /// Runs the analysis with a progress callback and a cancel token
    ///
    /// The callback fires at most once per report interval, from within the
    /// sampling loop. Cancellation stops the chain at the next step boundary
    /// and returns the statistics accumulated so far.
    ///
    /// # Errors
    ///
    /// See [`Mgsa::run`]
    pub fn run_with(
        &self,
        index: &AnnotationIndex,
        observed: &[bool],
        mut progress: Option<&mut dyn FnMut(&ProgressReport)>,
        cancel: &CancelToken,
    ) -> MgsaResult<AnalysisResult> {
        let flags = EmFlags {
            alpha: self.alpha == Parameter::Em,
            beta: self.beta == Parameter::Em,
            expected: self.expected_terms == Parameter::Em,
        };
        let mut estimates = PointEstimates::default();

        let seed = self.seed.unwrap_or_else(rand::random);
        info!(seed, "using random seed");
        let mut rng = StdRng::seed_from_u64(seed);

        let alpha_values = match self.alpha {
            Parameter::SampledGrid => Some(rate_grid(self.max_alpha)),
            _ => None,
        };
        let beta_values = match self.beta {
            Parameter::SampledGrid => Some(rate_grid(self.max_beta)),
            _ => None,
        };
        let expected_values = match self.expected_terms {
            Parameter::SampledGrid => Some(expected_terms_grid()),
            _ => None,
        };

        info!(
            terms = index.num_terms(),
            items = index.num_items(),
            em = flags.any(),
            "starting analysis"
        );

        let mut last: Option<RunOutcome> = None;
        for iteration in 0..flags.iterations() {
            let alpha = self.knob(self.alpha, &alpha_values, estimates.alpha);
            let beta = self.knob(self.beta, &beta_values, estimates.beta);
            let expected = self.knob(self.expected_terms, &expected_values, estimates.expected);

            if flags.any() {
                info!(
                    iteration,
                    alpha = estimates.alpha,
                    beta = estimates.beta,
                    expected = estimates.expected,
                    "EM iteration"
                );
            }

            let state = ScoreState::new(index, observed)?;
            let mut sampler = Sampler::new(state, alpha, beta, expected, self.use_prior, &mut rng);
            let callback = progress
                .as_mut()
                .map(|cb| &mut **cb as &mut dyn FnMut(&ProgressReport));
            let outcome = sampler.run(&self.config, callback, cancel);

            refine(&mut estimates, flags, &outcome.stats);
            let cancelled = outcome.cancelled;
            last = Some(outcome);
            if cancelled {
                break;
            }
        }

        let outcome = last.expect("at least one chain is always run");
        let stats = outcome.stats;

        let term_results = index
            .iter_terms()
            .map(|(slot, term)| TermResult {
                term,
                marginal: stats.marginal(slot),
                population_annotated: index.annotation_count(slot),
                study_annotated: index.observed_count(slot, observed),
            })
            .collect();

        Ok(AnalysisResult {
            term_results,
            map: outcome.map,
            alpha_posterior: alpha_values
                .map(|values| posterior(&values, &stats.alpha_counts, stats.records)),
            beta_posterior: beta_values
                .map(|values| posterior(&values, &stats.beta_counts, stats.records)),
            expected_posterior: expected_values
                .map(|values| posterior(&values, &stats.expected_counts, stats.records)),
            accepts: stats.accepts,
            rejects: stats.rejects,
            records: stats.records,
            cancelled: outcome.cancelled,
        })
    }

    /// Resolves a parameter mode into the knob the sampler works with
    fn knob(&self, parameter: Parameter, grid: &Option<Vec<f64>>, estimate: f64) -> Knob {
        match parameter {
            Parameter::Fixed(value) => Knob::Fixed(value),
            Parameter::Em => Knob::Fixed(estimate),
            Parameter::SampledGrid => Knob::Grid(GridState::new(
                grid.clone().expect("grid values exist for sampled parameters"),
            )),
        }
    }
}

/// Converts grid counters into `(candidate, probability)` pairs
fn posterior(values: &[f64], counts: &[u64], records: u64) -> Vec<(f64, f64)> {
    values
        .iter()
        .zip(counts)
        .map(|(&value, &count)| {
            let probability = if records == 0 {
                0.0
            } else {
                count as f64 / records as f64
            };
            (value, probability)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::annotations::AnnotationIndexBuilder;
    use crate::MgsaError;

    fn fixture() -> (AnnotationIndex, Vec<bool>) {
        let mut builder = AnnotationIndexBuilder::new(10);
        builder
            .add_term(TermId::from(1u32), [0, 1, 2, 3, 4])
            .unwrap();
        builder.add_term(TermId::from(2u32), [5, 6]).unwrap();
        builder.add_term(TermId::from(3u32), [4, 7]).unwrap();
        let index = builder.build().unwrap();
        let observed = vec![
            true, true, true, true, true, false, false, false, false, false,
        ];
        (index, observed)
    }

    #[test]
    fn fixed_parameter_validation() {
        assert!(matches!(
            Mgsa::new().alpha(Parameter::Fixed(1.5)),
            Err(MgsaError::InvalidProbability { name: "alpha", .. })
        ));
        assert!(matches!(
            Mgsa::new().beta(Parameter::Fixed(0.0)),
            Err(MgsaError::InvalidProbability { name: "beta", .. })
        ));
        assert!(matches!(
            Mgsa::new().expected_terms(Parameter::Fixed(-1.0)),
            Err(MgsaError::InvalidExpectedTerms(_))
        ));
        assert!(Mgsa::new().alpha(Parameter::Fixed(0.5)).is_ok());
    }

    #[test]
    fn fixed_run_ranks_the_causal_term_first() {
        let (index, observed) = fixture();
        let result = Mgsa::new()
            .alpha(Parameter::Fixed(0.1))
            .unwrap()
            .beta(Parameter::Fixed(0.1))
            .unwrap()
            .expected_terms(Parameter::Fixed(1.0))
            .unwrap()
            .seed(1)
            .steps(20_000)
            .burnin(2_000)
            .run(&index, &observed)
            .unwrap();

        let terms = result.term_results();
        assert_eq!(terms.len(), 3);
        assert!(terms[0].marginal() > terms[1].marginal());
        assert!(terms[0].marginal() > terms[2].marginal());
        assert_eq!(terms[0].population_annotated(), 5);
        assert_eq!(terms[0].study_annotated(), 5);
        assert_eq!(terms[1].study_annotated(), 0);
        assert!(result.alpha_posterior().is_none());
        assert_eq!(result.map().terms(), &[TermId::from(1u32)]);
        assert!(result.records() > 0);
    }

    #[test]
    fn grid_run_exposes_grid_posteriors() {
        let (index, observed) = fixture();
        let result = Mgsa::new()
            .seed(2)
            .steps(20_000)
            .burnin(2_000)
            .run(&index, &observed)
            .unwrap();

        for posterior in [
            result.alpha_posterior().unwrap(),
            result.beta_posterior().unwrap(),
            result.expected_posterior().unwrap(),
        ] {
            assert_eq!(posterior.len(), 20);
            let total: f64 = posterior.iter().map(|(_, p)| p).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn em_run_returns_final_iteration_marginals() {
        let (index, observed) = fixture();
        let result = Mgsa::new()
            .alpha(Parameter::Em)
            .unwrap()
            .beta(Parameter::Em)
            .unwrap()
            .expected_terms(Parameter::Em)
            .unwrap()
            .seed(3)
            .steps(5_000)
            .burnin(500)
            .run(&index, &observed)
            .unwrap();

        let terms = result.term_results();
        assert!(terms[0].marginal() > terms[1].marginal());
        assert!(terms.iter().all(|t| (0.0..=1.0).contains(&t.marginal())));
        assert!(result.alpha_posterior().is_none());
    }

    #[test]
    fn identical_seeds_give_identical_results() {
        let (index, observed) = fixture();
        let run = || {
            Mgsa::new()
                .seed(99)
                .steps(10_000)
                .burnin(1_000)
                .run(&index, &observed)
                .unwrap()
        };
        let a = run();
        let b = run();
        for (ta, tb) in a.term_results().iter().zip(b.term_results()) {
            assert_eq!(ta.marginal().to_bits(), tb.marginal().to_bits());
        }
        assert_eq!(a.accepts(), b.accepts());
    }

    #[test]
    fn pre_cancelled_run_returns_cleanly() {
        let (index, observed) = fixture();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = Mgsa::new()
            .seed(4)
            .run_with(&index, &observed, None, &cancel)
            .unwrap();

        assert!(result.was_cancelled());
        assert_eq!(result.records(), 0);
        assert!(result
            .term_results()
            .iter()
            .all(|t| t.marginal() == 0.0));
    }

    #[test]
    fn invalid_observed_flags_are_rejected() {
        let (index, _) = fixture();
        let observed = vec![true; 3];
        assert_eq!(
            Mgsa::new().run(&index, &observed).unwrap_err(),
            MgsaError::PopulationMismatch {
                expected: 10,
                got: 3
            }
        );
    }
}
