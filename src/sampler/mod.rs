//! The Metropolis-Hastings driver that samples term-activation subsets
//!
//! One [`Sampler`] run is a single MCMC chain: burn-in, then recorded
//! sampling under a fixed step budget. Each step proposes a move, applies
//! it to the [`ScoreState`](crate::score::ScoreState), and accepts or
//! rejects it with the Metropolis-Hastings probability, including the
//! neighborhood-size Hastings correction for the asymmetric structural
//! proposal. Rejected moves are undone exactly; there is no partial
//! failure within a step.
//!
//! The chain is strictly sequential and owns all of its state; parallelism
//! across independent analyses is possible because nothing here is shared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info};

use crate::annotations::TermId;
use crate::parameters::GridState;
use crate::score::ScoreState;
use crate::{DEFAULT_BURNIN, DEFAULT_MCMC_STEPS};

mod proposal;
pub(crate) use proposal::{neighborhood_size, Move};

/// Settings of a single MCMC run
#[derive(Debug, Clone)]
pub struct McmcConfig {
    /// Total number of steps, including burn-in
    pub steps: usize,
    /// Steps before statistics recording starts
    pub burnin: usize,
    /// Start from a randomized activation vector instead of the empty set
    pub random_start: bool,
    /// Minimum wall-time between two progress reports
    pub report_interval: Duration,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            steps: DEFAULT_MCMC_STEPS,
            burnin: DEFAULT_BURNIN,
            random_start: false,
            report_interval: Duration::from_secs(1),
        }
    }
}

/// A cooperative stop signal for a running chain
///
/// Cancellation is not an error: the driver checks the token between steps
/// and, when it fires, returns whatever statistics have accumulated so far.
/// Cloning the token shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    /// Constructs a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the chain to stop at the next step boundary
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    /// Returns whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

/// A snapshot of the chain handed to the progress callback
#[derive(Debug, Clone)]
pub struct ProgressReport {
    /// Current step index
    pub step: usize,
    /// Total number of steps of the run
    pub steps: usize,
    /// Score of the current state
    pub score: f64,
    /// Best score seen so far
    pub best_score: f64,
    /// Number of currently active terms
    pub num_active: usize,
    /// Accepted moves so far
    pub accepts: u64,
    /// Rejected moves so far
    pub rejects: u64,
}

/// The highest-scoring state observed during sampling
#[derive(Debug, Clone)]
pub struct MapEstimate {
    terms: Vec<TermId>,
    score: f64,
    alpha: f64,
    beta: f64,
    p: f64,
    step: usize,
}

impl MapEstimate {
    /// The term set of the best state
    pub fn terms(&self) -> &[TermId] {
        &self.terms
    }

    /// The log score of the best state
    pub fn score(&self) -> f64 {
        self.score
    }

    /// The false-positive rate in effect when the best state was seen
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The false-negative rate in effect when the best state was seen
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// The per-term activation prior in effect when the best state was seen
    pub fn p(&self) -> f64 {
        self.p
    }

    /// The step at which the best state was first seen
    pub fn step(&self) -> usize {
        self.step
    }
}

/// Running statistics of one chain, reset per run
///
/// Counters are finalized into marginals by dividing by `records`.
#[derive(Debug, Clone)]
pub(crate) struct SamplerStats {
    pub(crate) records: u64,
    pub(crate) activation_counts: Vec<u64>,
    pub(crate) total_n00: u64,
    pub(crate) total_n01: u64,
    pub(crate) total_n10: u64,
    pub(crate) total_n11: u64,
    pub(crate) total_active: u64,
    pub(crate) alpha_counts: Vec<u64>,
    pub(crate) beta_counts: Vec<u64>,
    pub(crate) expected_counts: Vec<u64>,
    pub(crate) accepts: u64,
    pub(crate) rejects: u64,
}

impl SamplerStats {
    fn new(num_terms: usize, alpha_grid: usize, beta_grid: usize, expected_grid: usize) -> Self {
        Self {
            records: 0,
            activation_counts: vec![0; num_terms],
            total_n00: 0,
            total_n01: 0,
            total_n10: 0,
            total_n11: 0,
            total_active: 0,
            alpha_counts: vec![0; alpha_grid],
            beta_counts: vec![0; beta_grid],
            expected_counts: vec![0; expected_grid],
            accepts: 0,
            rejects: 0,
        }
    }

    pub(crate) fn avg_n00(&self) -> f64 {
        self.total_n00 as f64 / self.records as f64
    }

    pub(crate) fn avg_n01(&self) -> f64 {
        self.total_n01 as f64 / self.records as f64
    }

    pub(crate) fn avg_n10(&self) -> f64 {
        self.total_n10 as f64 / self.records as f64
    }

    pub(crate) fn avg_n11(&self) -> f64 {
        self.total_n11 as f64 / self.records as f64
    }

    /// Average number of active terms over all recorded samples
    pub(crate) fn avg_active(&self) -> f64 {
        self.total_active as f64 / self.records as f64
    }

    /// Marginal activation probability of the term at the given slot
    pub(crate) fn marginal(&self, slot: usize) -> f64 {
        if self.records == 0 {
            return 0.0;
        }
        self.activation_counts[slot] as f64 / self.records as f64
    }
}

/// A hyperparameter as the sampler sees it: either pinned or grid-sampled
#[derive(Debug, Clone)]
pub(crate) enum Knob {
    Fixed(f64),
    Grid(GridState),
}

impl Knob {
    fn value(&self) -> f64 {
        match self {
            Knob::Fixed(value) => *value,
            Knob::Grid(grid) => grid.current(),
        }
    }

    fn view(&self) -> proposal::GridView {
        match self {
            Knob::Fixed(_) => None,
            Knob::Grid(grid) => Some((grid.len(), grid.index())),
        }
    }

    fn grid_len(&self) -> usize {
        match self {
            Knob::Fixed(_) => 0,
            Knob::Grid(grid) => grid.len(),
        }
    }

    fn grid_mut(&mut self) -> &mut GridState {
        match self {
            Knob::Fixed(_) => unreachable!("grid move proposed for a fixed parameter"),
            Knob::Grid(grid) => grid,
        }
    }

    fn grid_index(&self) -> Option<usize> {
        match self {
            Knob::Fixed(_) => None,
            Knob::Grid(grid) => Some(grid.index()),
        }
    }
}

/// The result of one completed (or cancelled) chain
pub(crate) struct RunOutcome {
    pub(crate) stats: SamplerStats,
    pub(crate) map: MapEstimate,
    pub(crate) cancelled: bool,
}

/// One MCMC chain over the term-activation space
pub(crate) struct Sampler<'a, 'r> {
    state: ScoreState<'a>,
    alpha: Knob,
    beta: Knob,
    expected: Knob,
    use_prior: bool,
    rng: &'r mut StdRng,
}

impl<'a, 'r> Sampler<'a, 'r> {
    pub(crate) fn new(
        state: ScoreState<'a>,
        alpha: Knob,
        beta: Knob,
        expected: Knob,
        use_prior: bool,
        rng: &'r mut StdRng,
    ) -> Self {
        Self {
            state,
            alpha,
            beta,
            expected,
            use_prior,
            rng,
        }
    }

    /// The per-term activation prior derived from the expected term count
    fn p(&self) -> f64 {
        self.expected.value() / self.state.num_terms() as f64
    }

    fn current_score(&self) -> f64 {
        self.state
            .log_score(self.alpha.value(), self.beta.value(), self.p(), self.use_prior)
    }

    fn neighborhood(&self) -> u64 {
        neighborhood_size(self.state.num_terms(), self.state.num_active())
    }

    fn apply(&mut self, mv: Move) {
        match mv {
            Move::Toggle { slot } => self.state.toggle(slot),
            Move::Exchange { active, inactive } => self.state.exchange(active, inactive),
            Move::AlphaGrid { new, .. } => self.alpha.grid_mut().set_index(new),
            Move::BetaGrid { new, .. } => self.beta.grid_mut().set_index(new),
            Move::ExpectedGrid { new, .. } => self.expected.grid_mut().set_index(new),
        }
    }

    fn undo(&mut self, mv: Move) {
        match mv {
            Move::Toggle { slot } => self.state.toggle(slot),
            Move::Exchange { active, inactive } => self.state.exchange(inactive, active),
            Move::AlphaGrid { old, .. } => self.alpha.grid_mut().set_index(old),
            Move::BetaGrid { old, .. } => self.beta.grid_mut().set_index(old),
            Move::ExpectedGrid { old, .. } => self.expected.grid_mut().set_index(old),
        }
    }

    /// Activates a randomized starting set
    ///
    /// The target size is drawn from the expected-term-count candidates and
    /// converted into an independent per-term activation probability.
    fn random_start(&mut self) {
        let target = match &self.expected {
            Knob::Grid(grid) => {
                let idx = self.rng.gen_range(0..grid.len());
                grid.values()[idx]
            }
            Knob::Fixed(value) => *value,
        };
        let p_start = target / self.state.num_terms() as f64;

        for slot in 0..self.state.num_terms() {
            if self.rng.gen::<f64>() < p_start {
                self.state.toggle(slot);
            }
        }
        info!(
            num_active = self.state.num_active(),
            p_start, "randomized starting state"
        );
    }

    fn record(&self, stats: &mut SamplerStats) {
        for slot in self.state.active_slots() {
            stats.activation_counts[slot] += 1;
        }
        let confusion = self.state.confusion();
        stats.total_n00 += confusion.n00 as u64;
        stats.total_n01 += confusion.n01 as u64;
        stats.total_n10 += confusion.n10 as u64;
        stats.total_n11 += confusion.n11 as u64;
        stats.total_active += self.state.num_active() as u64;

        if let Some(idx) = self.alpha.grid_index() {
            stats.alpha_counts[idx] += 1;
        }
        if let Some(idx) = self.beta.grid_index() {
            stats.beta_counts[idx] += 1;
        }
        if let Some(idx) = self.expected.grid_index() {
            stats.expected_counts[idx] += 1;
        }
        stats.records += 1;
    }

    /// Runs the chain for the configured step budget
    ///
    /// Proposes, scores and accepts/rejects one move per step, recording
    /// statistics after the burn-in threshold. Returns early, with the
    /// statistics accumulated so far, when the cancel token fires.
    pub(crate) fn run(
        &mut self,
        config: &McmcConfig,
        mut progress: Option<&mut dyn FnMut(&ProgressReport)>,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let mut stats = SamplerStats::new(
            self.state.num_terms(),
            self.alpha.grid_len(),
            self.beta.grid_len(),
            self.expected.grid_len(),
        );

        if config.random_start {
            self.random_start();
        }

        let mut score = self.current_score();
        info!(score, num_active = self.state.num_active(), "initial state");

        let mut best_score = score;
        let mut best_slots: Vec<usize> = self.state.active_slots().collect();
        let mut best_alpha = self.alpha.value();
        let mut best_beta = self.beta.value();
        let mut best_p = self.p();
        let mut best_step = 0usize;

        let mut cancelled = false;
        let mut last_report = Instant::now();

        for t in 0..config.steps {
            if cancel.is_cancelled() {
                info!(step = t, "cancellation requested, stopping chain");
                cancelled = true;
                break;
            }

            if score > best_score {
                best_score = score;
                best_slots = self.state.active_slots().collect();
                best_alpha = self.alpha.value();
                best_beta = self.beta.value();
                best_p = self.p();
                best_step = t;
            }

            if last_report.elapsed() >= config.report_interval {
                last_report = Instant::now();
                let report = ProgressReport {
                    step: t,
                    steps: config.steps,
                    score,
                    best_score,
                    num_active: self.state.num_active(),
                    accepts: stats.accepts,
                    rejects: stats.rejects,
                };
                info!(
                    percent = t * 100 / config.steps,
                    score,
                    best_score,
                    num_active = report.num_active,
                    accepts = report.accepts,
                    rejects = report.rejects,
                    "sampling"
                );
                if let Some(callback) = progress.as_mut() {
                    callback(&report);
                }
            }

            let old_neighborhood = self.neighborhood();
            let draw = self.rng.gen::<u64>();
            let mv = proposal::select(
                draw,
                &self.state,
                self.alpha.view(),
                self.beta.view(),
                self.expected.view(),
            );
            self.apply(mv);

            let new_score = self.current_score();
            let new_neighborhood = self.neighborhood();

            // a non-finite score (degenerate grid value and state) is
            // rejected outright instead of being compared against NaN
            let accept = new_score.is_finite() && {
                let ratio = (new_score - score).exp() * old_neighborhood as f64
                    / new_neighborhood as f64;
                self.rng.gen::<f64>() < ratio
            };

            if accept {
                score = new_score;
                stats.accepts += 1;
            } else {
                self.undo(mv);
                stats.rejects += 1;
            }

            if t > config.burnin {
                self.record(&mut stats);
            }
        }

        debug!(
            accepts = stats.accepts,
            rejects = stats.rejects,
            records = stats.records,
            best_score,
            "chain finished"
        );

        let index = self.state.index();
        let map = MapEstimate {
            terms: best_slots.iter().map(|&slot| index.term_id(slot)).collect(),
            score: best_score,
            alpha: best_alpha,
            beta: best_beta,
            p: best_p,
            step: best_step,
        };

        RunOutcome {
            stats,
            map,
            cancelled,
        }
    }
}
