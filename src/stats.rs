//! Classical term-for-term enrichment as a baseline
//!
//! The model-based analysis in this crate considers all terms jointly. For
//! comparison (and for quick sanity checks of an annotation index) this
//! module provides the classical per-term hypergeometric test: for each
//! term, the probability of drawing at least the observed number of
//! annotated items when sampling the study set from the population at
//! random.
//!
//! The p-values are *not* corrected for multiple testing.
//!
//! # Examples
//!
//! ```
//! use mgsa::{AnnotationIndexBuilder, TermId};
//! use mgsa::stats::term_enrichment;
//!
//! let mut builder = AnnotationIndexBuilder::new(4);
//! builder.add_term(TermId::from(1u32), [0, 1]).unwrap();
//! builder.add_term(TermId::from(2u32), [3]).unwrap();
//! let index = builder.build().unwrap();
//!
//! let observed = [true, true, false, false];
//! let mut enrichments = term_enrichment(&index, &observed).unwrap();
//!
//! // the results are not sorted by default
//! enrichments.sort_by(|a, b| a.pvalue().partial_cmp(&b.pvalue()).unwrap());
//!
//! assert_eq!(enrichments.len(), 1);
//! assert_eq!(enrichments[0].term(), TermId::from(1u32));
//! ```

use statrs::distribution::{DiscreteCDF, Hypergeometric};
use tracing::debug;

use crate::annotations::{AnnotationIndex, TermId};
use crate::{MgsaError, MgsaResult};

/// The p-value and fold enrichment of a single term
#[derive(Debug, Clone)]
pub struct Enrichment {
    term: TermId,
    pvalue: f64,
    count: u64,
    enrichment: f64,
}

impl Enrichment {
    /// Returns the ID of the enriched term
    pub fn term(&self) -> TermId {
        self.term
    }

    /// Returns the p-value of the enrichment
    ///
    /// The p-value indicates the probability that at least this many
    /// annotated items end up in the study set by chance
    pub fn pvalue(&self) -> f64 {
        self.pvalue
    }

    /// Returns the number of study-set items annotated by the term
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the fold enrichment over the background population
    pub fn enrichment(&self) -> f64 {
        self.enrichment
    }
}

/// Calculates the hypergeometric enrichment of every term in the study set
///
/// Terms without any annotated item in the study set are skipped. The
/// returned entries are in index slot order, not sorted by p-value.
///
/// # Errors
///
/// - [`MgsaError::PopulationMismatch`] if `observed` does not cover the
///   population
/// - [`MgsaError::EmptyStudySet`] if no item is observed
pub fn term_enrichment(
    index: &AnnotationIndex,
    observed: &[bool],
) -> MgsaResult<Vec<Enrichment>> {
    if observed.len() != index.num_items() {
        return Err(MgsaError::PopulationMismatch {
            expected: index.num_items(),
            got: observed.len(),
        });
    }
    let draws = observed.iter().filter(|&&o| o).count() as u64;
    if draws == 0 {
        return Err(MgsaError::EmptyStudySet);
    }

    let population = index.num_items() as u64;
    let mut res = Vec::new();
    for (slot, term) in index.iter_terms() {
        let observed_successes = index.observed_count(slot, observed) as u64;
        if observed_successes == 0 {
            debug!("skipping {}", term);
            continue;
        }
        let successes = index.annotation_count(slot) as u64;
        let hyper = Hypergeometric::new(population, successes, draws)
            .expect("study set and annotations are bounded by the population");

        // subtracting 1, because we want to test including observed_successes
        // e.g. "7 or more", but sf by default calculates "more than 7"
        let pvalue = hyper.sf(observed_successes - 1);
        let enrichment = (observed_successes as f64 / draws as f64)
            / (successes as f64 / population as f64);

        res.push(Enrichment {
            term,
            pvalue,
            count: observed_successes,
            enrichment,
        });
        debug!(
            "Term:{}\tPopulation: {}, Successes: {}, Draws: {}, Observed: {}",
            term, population, successes, draws, observed_successes
        );
    }
    Ok(res)
}
