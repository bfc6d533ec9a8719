//! Model-based gene set analysis
//!
//! `mgsa` explains an observed set of active genes (the *study set*) as the
//! noisy output of a small, unknown subset of active ontology terms. Instead
//! of testing each term in isolation, it samples the combinatorial space of
//! term-activation subsets with a Metropolis-Hastings MCMC chain and reports,
//! for every term, the posterior marginal probability that the term belongs
//! to the true active set.
//!
//! The model has three hyperparameters: a false-positive rate `alpha`, a
//! false-negative rate `beta` and the expected number of active terms. Each
//! can be fixed by the caller, sampled over a discrete grid within the MCMC
//! chain, or point-estimated by an outer Expectation-Maximization loop.
//!
//! Ontology parsing and graph traversal are not part of this crate. The
//! caller provides an [`AnnotationIndex`]: for every term the set of items
//! (genes) it annotates, already transitively closed along the ontology DAG.
//!
//! # Examples
//!
//! ```
//! use mgsa::{AnnotationIndexBuilder, Mgsa, Parameter, TermId};
//!
//! // Three items, two terms. Term 1 annotates items 0 and 1,
//! // term 2 annotates item 2.
//! let mut builder = AnnotationIndexBuilder::new(3);
//! builder.add_term(TermId::from(1u32), [0, 1]).unwrap();
//! builder.add_term(TermId::from(2u32), [2]).unwrap();
//! let index = builder.build().unwrap();
//!
//! // Items 0 and 1 were observed as active.
//! let observed = [true, true, false];
//!
//! let result = Mgsa::new()
//!     .alpha(Parameter::Fixed(0.1)).unwrap()
//!     .beta(Parameter::Fixed(0.1)).unwrap()
//!     .expected_terms(Parameter::Fixed(1.0)).unwrap()
//!     .seed(42)
//!     .steps(10_000)
//!     .burnin(1_000)
//!     .run(&index, &observed)
//!     .unwrap();
//!
//! let marginals = result.term_results();
//! assert!(marginals[0].marginal() > marginals[1].marginal());
//! ```

use std::num::ParseIntError;

use thiserror::Error;

pub mod annotations;
mod em;
pub mod parameters;
pub mod sampler;
pub mod score;
pub mod stats;
mod analysis;

pub use analysis::{AnalysisResult, Mgsa, TermResult};
pub use annotations::{AnnotationIndex, AnnotationIndexBuilder, TermId};
pub use parameters::Parameter;
pub use sampler::{CancelToken, MapEstimate, McmcConfig, ProgressReport};

/// Number of MCMC steps performed by default
pub const DEFAULT_MCMC_STEPS: usize = 1_020_000;

/// Number of initial steps that are discarded before statistics are recorded
pub const DEFAULT_BURNIN: usize = 20_000;

/// Number of outer iterations of the EM hyperparameter refinement
pub const DEFAULT_EM_ITERATIONS: usize = 12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MgsaError {
    #[error("the population must contain at least one item")]
    EmptyPopulation,
    #[error("the annotation index must contain at least one term")]
    EmptyTermList,
    #[error("the study set must contain at least one observed item")]
    EmptyStudySet,
    #[error("observed flags for {got} items, but the population contains {expected}")]
    PopulationMismatch { expected: usize, got: usize },
    #[error("item slot {item} is out of range for a population of {population} items")]
    ItemOutOfRange { item: usize, population: usize },
    #[error("term {0} is already present in the annotation index")]
    DuplicateTerm(TermId),
    #[error("{name} must lie within (0, 1), but is {value}")]
    InvalidProbability { name: &'static str, value: f64 },
    #[error("the expected number of terms must be positive, but is {0}")]
    InvalidExpectedTerms(f64),
    #[error("unable to parse Integer")]
    ParseIntError,
}

impl From<ParseIntError> for MgsaError {
    fn from(_: ParseIntError) -> Self {
        MgsaError::ParseIntError
    }
}

/// The `Result` type of this crate
pub type MgsaResult<T> = Result<T, MgsaError>;
