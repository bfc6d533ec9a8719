//! The incrementally maintained likelihood state of the sampler
//!
//! [`ScoreState`] holds the hidden term-activation vector together with every
//! counter the model score depends on: per-item coverage counts and the
//! four-way confusion counts between hidden and observed item activation.
//! Toggling a term only touches the items that term annotates, so a step of
//! the chain costs `O(annotated items)` instead of `O(population)`.

use crate::annotations::AnnotationIndex;
use crate::{MgsaError, MgsaResult};

/// Counts of items by `(hidden activation, observed activation)` pair
///
/// The digit convention follows the model: the first digit is the hidden
/// state, the second the observed state. `n10` is the number of items that
/// are observed active but not covered by any active term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub n00: usize,
    pub n01: usize,
    pub n10: usize,
    pub n11: usize,
}

impl ConfusionCounts {
    /// The total number of counted items
    pub fn total(&self) -> usize {
        self.n00 + self.n01 + self.n10 + self.n11
    }
}

/// The mutable hidden state of the chain and its derived counters
///
/// Terms are partitioned into an inactive prefix and an active suffix of a
/// single slot array, so that the proposal generator can pick the `i`-th
/// active or inactive term in constant time. The partition is maintained by
/// swapping, the way an arena index would, and never reallocates.
#[derive(Debug)]
pub struct ScoreState<'a> {
    index: &'a AnnotationIndex,
    observed: &'a [bool],
    active: Vec<bool>,
    /// Term slots; `[0..num_inactive)` are inactive, the rest active
    partition: Vec<u32>,
    /// Maps a term slot to its position within `partition`
    position: Vec<u32>,
    num_inactive: usize,
    /// Number of active terms annotating each item
    coverage: Vec<u32>,
    n00: usize,
    n01: usize,
    n10: usize,
    n11: usize,
}

impl<'a> ScoreState<'a> {
    /// Constructs the state for an empty active set
    ///
    /// `observed` flags each population item as member of the study set or
    /// not, indexed by item slot.
    ///
    /// # Errors
    ///
    /// - [`MgsaError::PopulationMismatch`] if `observed` does not cover the population
    /// - [`MgsaError::EmptyStudySet`] if no item is flagged as observed
    pub fn new(index: &'a AnnotationIndex, observed: &'a [bool]) -> MgsaResult<Self> {
        if observed.len() != index.num_items() {
            return Err(MgsaError::PopulationMismatch {
                expected: index.num_items(),
                got: observed.len(),
            });
        }
        let n10 = observed.iter().filter(|&&o| o).count();
        if n10 == 0 {
            return Err(MgsaError::EmptyStudySet);
        }

        let num_terms = index.num_terms();
        Ok(Self {
            index,
            observed,
            active: vec![false; num_terms],
            partition: (0..num_terms as u32).collect(),
            position: (0..num_terms as u32).collect(),
            num_inactive: num_terms,
            coverage: vec![0; index.num_items()],
            n00: index.num_items() - n10,
            n01: 0,
            n10,
            n11: 0,
        })
    }

    /// Returns the annotation index the state was built from
    pub(crate) fn index(&self) -> &AnnotationIndex {
        self.index
    }

    /// Returns the number of terms
    pub fn num_terms(&self) -> usize {
        self.active.len()
    }

    /// Returns the number of currently active terms
    pub fn num_active(&self) -> usize {
        self.active.len() - self.num_inactive
    }

    /// Returns whether the term at the given slot is active
    pub fn is_active(&self, slot: usize) -> bool {
        self.active[slot]
    }

    /// Returns the current confusion counts
    pub fn confusion(&self) -> ConfusionCounts {
        ConfusionCounts {
            n00: self.n00,
            n01: self.n01,
            n10: self.n10,
            n11: self.n11,
        }
    }

    /// Returns the slots of all active terms
    pub fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.partition[self.num_inactive..]
            .iter()
            .map(|&slot| slot as usize)
    }

    /// Returns the slot of the `i`-th active term
    ///
    /// # Panics
    ///
    /// Panics if `i >= num_active()`
    pub(crate) fn nth_active(&self, i: usize) -> usize {
        self.partition[self.num_inactive + i] as usize
    }

    /// Returns the slot of the `i`-th inactive term
    ///
    /// # Panics
    ///
    /// Panics if `i >= num_terms() - num_active()`
    pub(crate) fn nth_inactive(&self, i: usize) -> usize {
        debug_assert!(i < self.num_inactive);
        self.partition[i] as usize
    }

    /// Flips the activation state of one term
    ///
    /// Updates the coverage counter of every item the term annotates.
    /// Whenever a counter crosses zero the item changes its hidden state and
    /// the confusion counts are adjusted. Calling `toggle` twice with the
    /// same slot restores the previous state exactly.
    pub fn toggle(&mut self, slot: usize) {
        let activating = !self.active[slot];
        self.active[slot] = activating;

        if activating {
            for &item in self.index.items_of(slot) {
                let cov = &mut self.coverage[item as usize];
                *cov += 1;
                if *cov == 1 {
                    self.item_activated(item as usize);
                }
            }
            // move the slot from the inactive prefix to the active suffix
            let pos = self.position[slot] as usize;
            let last = self.num_inactive - 1;
            self.partition.swap(pos, last);
            self.position[self.partition[pos] as usize] = pos as u32;
            self.position[self.partition[last] as usize] = last as u32;
            self.num_inactive = last;
        } else {
            for &item in self.index.items_of(slot) {
                let cov = &mut self.coverage[item as usize];
                *cov -= 1;
                if *cov == 0 {
                    self.item_deactivated(item as usize);
                }
            }
            let pos = self.position[slot] as usize;
            let first = self.num_inactive;
            self.partition.swap(pos, first);
            self.position[self.partition[pos] as usize] = pos as u32;
            self.position[self.partition[first] as usize] = first as u32;
            self.num_inactive = first + 1;
        }
    }

    /// Deactivates `active_slot` and activates `inactive_slot` as one move
    ///
    /// The number of active terms is unchanged, which lets the chain explore
    /// states of equal size without passing through intermediate sizes.
    pub fn exchange(&mut self, active_slot: usize, inactive_slot: usize) {
        debug_assert!(self.active[active_slot]);
        debug_assert!(!self.active[inactive_slot]);
        self.toggle(active_slot);
        self.toggle(inactive_slot);
    }

    fn item_activated(&mut self, item: usize) {
        if self.observed[item] {
            self.n11 += 1;
            self.n10 -= 1;
        } else {
            self.n01 += 1;
            self.n00 -= 1;
        }
    }

    fn item_deactivated(&mut self, item: usize) {
        if self.observed[item] {
            self.n11 -= 1;
            self.n10 += 1;
        } else {
            self.n01 -= 1;
            self.n00 += 1;
        }
    }

    /// Returns the log score of the current state
    ///
    /// ```text
    /// ln(alpha)·n10 + ln(1-alpha)·n00 + ln(1-beta)·n11 + ln(beta)·n01
    ///   [+ ln(p)·k + ln(1-p)·(n-k)]
    /// ```
    ///
    /// where `k` is the number of active terms and the prior part is only
    /// added when `use_prior` is set. All arithmetic is done in `f64` on the
    /// natural log scale to stay finite across thousands of items.
    pub fn log_score(&self, alpha: f64, beta: f64, p: f64, use_prior: bool) -> f64 {
        let mut score = alpha.ln() * self.n10 as f64
            + (1.0 - alpha).ln() * self.n00 as f64
            + (1.0 - beta).ln() * self.n11 as f64
            + beta.ln() * self.n01 as f64;

        if use_prior {
            let k = self.num_active() as f64;
            let n = self.num_terms() as f64;
            score += p.ln() * k + (1.0 - p).ln() * (n - k);
        }
        score
    }

    /// Returns the log score of an arbitrary term set
    ///
    /// Deactivates the current active set, activates the given slots,
    /// evaluates the score and restores the previous state exactly. Useful
    /// for scoring a candidate set without giving up the chain position.
    pub fn log_score_of(
        &mut self,
        slots: &[usize],
        alpha: f64,
        beta: f64,
        p: f64,
        use_prior: bool,
    ) -> f64 {
        let previous: Vec<usize> = self.active_slots().collect();

        for &slot in &previous {
            self.toggle(slot);
        }
        for &slot in slots {
            self.toggle(slot);
        }

        let score = self.log_score(alpha, beta, p, use_prior);

        for &slot in slots {
            self.toggle(slot);
        }
        for &slot in &previous {
            self.toggle(slot);
        }
        score
    }
}
