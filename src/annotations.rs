//! The read-only annotation data that connects ontology terms to items
//!
//! The inference engine does not traverse the ontology graph itself. The
//! graph collaborator resolves the term - item relation up front, including
//! the transitive closure along the DAG, and hands it over as an
//! [`AnnotationIndex`]. Terms and items are addressed by dense integer slots
//! so that the sampler can use plain array indexing in its hot loop.

use std::collections::HashMap;
use std::fmt::Display;

use core::fmt::Debug;
use smallvec::SmallVec;

use crate::{MgsaError, MgsaResult};

/// A unique identifier of an ontology term
///
/// The numerical part of the ID is stored, e.g. `GO:0000010` becomes `10`.
/// `TermId`s identify terms towards the caller; within the engine every
/// term is addressed by its slot index in the [`AnnotationIndex`].
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TermId {
    inner: u32,
}

impl TermId {
    /// Returns the numerical value of the ID
    pub fn as_u32(&self) -> u32 {
        self.inner
    }
}

impl TryFrom<&str> for TermId {
    type Error = MgsaError;

    /// Parses a term ID from a prefixed string, such as `GO:0000010`
    ///
    /// # Errors
    ///
    /// [`MgsaError::ParseIntError`] if the part after the prefix is not
    /// an integer
    fn try_from(s: &str) -> MgsaResult<Self> {
        let numeric = match s.find(':') {
            Some(idx) => &s[idx + 1..],
            None => s,
        };
        Ok(TermId {
            inner: numeric.parse::<u32>()?,
        })
    }
}

impl From<u32> for TermId {
    fn from(inner: u32) -> Self {
        Self { inner }
    }
}

impl Debug for TermId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TermId({})", self)
    }
}

impl Display for TermId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:07}", self.inner)
    }
}

/// The transitively closed term - item annotation relation
///
/// Every term and every item has a stable slot index, assigned once during
/// construction. For each term slot the index stores the slots of all items
/// the term annotates, and for each item slot the reverse list of term
/// slots. Both directions are immutable after [`AnnotationIndexBuilder::build`].
pub struct AnnotationIndex {
    terms: Vec<TermId>,
    slot_of: HashMap<TermId, usize>,
    term_items: Vec<Vec<u32>>,
    item_terms: Vec<SmallVec<[u32; 8]>>,
    num_items: usize,
}

impl Debug for AnnotationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AnnotationIndex with {} terms and {} items",
            self.terms.len(),
            self.num_items
        )
    }
}

impl AnnotationIndex {
    /// Returns the number of terms in the index
    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    /// Returns the size of the item population
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Returns the [`TermId`] of the term at the given slot
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range
    pub fn term_id(&self, slot: usize) -> TermId {
        self.terms[slot]
    }

    /// Returns the slot of the given term, or `None` if the term
    /// is not part of the index
    pub fn slot_of(&self, term: TermId) -> Option<usize> {
        self.slot_of.get(&term).copied()
    }

    /// Returns the slots of all items annotated by the term at the given slot
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range
    pub fn items_of(&self, slot: usize) -> &[u32] {
        &self.term_items[slot]
    }

    /// Returns the slots of all terms annotating the item at the given slot
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range
    pub fn terms_of(&self, item: usize) -> &[u32] {
        &self.item_terms[item]
    }

    /// Returns the number of population items annotated by the term
    pub fn annotation_count(&self, slot: usize) -> usize {
        self.term_items[slot].len()
    }

    /// Returns the number of annotated items for which the observed flag is set
    pub(crate) fn observed_count(&self, slot: usize, observed: &[bool]) -> usize {
        self.term_items[slot]
            .iter()
            .filter(|&&item| observed[item as usize])
            .count()
    }

    /// An iterator over all `(slot, TermId)` pairs of the index
    pub fn iter_terms(&self) -> impl Iterator<Item = (usize, TermId)> + '_ {
        self.terms.iter().copied().enumerate()
    }
}

/// Builder for an [`AnnotationIndex`]
///
/// The builder validates its input eagerly: referencing an item slot outside
/// the population or adding the same term twice fails immediately, before
/// any sampling can start on inconsistent data.
///
/// # Examples
///
/// ```
/// use mgsa::{AnnotationIndexBuilder, TermId};
///
/// let mut builder = AnnotationIndexBuilder::new(5);
/// builder.add_term(TermId::from(7u32), [0, 1, 4]).unwrap();
/// builder.add_term(TermId::from(9u32), [2]).unwrap();
///
/// let index = builder.build().unwrap();
/// assert_eq!(index.num_terms(), 2);
/// assert_eq!(index.items_of(0), &[0, 1, 4]);
/// assert_eq!(index.terms_of(4), &[0]);
/// ```
pub struct AnnotationIndexBuilder {
    terms: Vec<TermId>,
    slot_of: HashMap<TermId, usize>,
    term_items: Vec<Vec<u32>>,
    num_items: usize,
}

impl AnnotationIndexBuilder {
    /// Constructs a builder for a population of `num_items` items
    ///
    /// Item slots must lie within `0..num_items`.
    pub fn new(num_items: usize) -> Self {
        Self {
            terms: Vec::new(),
            slot_of: HashMap::new(),
            term_items: Vec::new(),
            num_items,
        }
    }

    /// Adds a term and the item slots of its (transitively closed) annotation set
    ///
    /// Returns the slot assigned to the term. Duplicate item slots within
    /// one term are collapsed.
    ///
    /// # Errors
    ///
    /// - [`MgsaError::ItemOutOfRange`] if an item slot is not part of the population
    /// - [`MgsaError::DuplicateTerm`] if the term was added before
    pub fn add_term<I>(&mut self, term: TermId, items: I) -> MgsaResult<usize>
    where
        I: IntoIterator<Item = usize>,
    {
        if self.slot_of.contains_key(&term) {
            return Err(MgsaError::DuplicateTerm(term));
        }

        let mut slots: Vec<u32> = Vec::new();
        for item in items {
            if item >= self.num_items {
                return Err(MgsaError::ItemOutOfRange {
                    item,
                    population: self.num_items,
                });
            }
            slots.push(
                u32::try_from(item).map_err(|_| MgsaError::ItemOutOfRange {
                    item,
                    population: self.num_items,
                })?,
            );
        }
        slots.sort_unstable();
        slots.dedup();

        let slot = self.terms.len();
        self.slot_of.insert(term, slot);
        self.terms.push(term);
        self.term_items.push(slots);
        Ok(slot)
    }

    /// Finalizes the index and derives the item - term reverse lists
    ///
    /// # Errors
    ///
    /// - [`MgsaError::EmptyPopulation`] if the population has no items
    /// - [`MgsaError::EmptyTermList`] if no terms were added
    pub fn build(self) -> MgsaResult<AnnotationIndex> {
        if self.num_items == 0 {
            return Err(MgsaError::EmptyPopulation);
        }
        if self.terms.is_empty() {
            return Err(MgsaError::EmptyTermList);
        }

        let mut item_terms: Vec<SmallVec<[u32; 8]>> = vec![SmallVec::new(); self.num_items];
        for (slot, items) in self.term_items.iter().enumerate() {
            for &item in items {
                item_terms[item as usize].push(slot as u32);
            }
        }

        Ok(AnnotationIndex {
            terms: self.terms,
            slot_of: self.slot_of,
            term_items: self.term_items,
            item_terms,
            num_items: self.num_items,
        })
    }
}
