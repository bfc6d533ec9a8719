//! End-to-end analyses on a small hand-built ontology
//!
//! The fixture is an 11-term DAG. Every term directly annotates one item,
//! and the annotation sets are transitively closed before they are handed
//! to the index, exactly as an ontology frontend would do it.

use rayon::prelude::*;

use mgsa::stats::term_enrichment;
use mgsa::{AnnotationIndex, AnnotationIndexBuilder, CancelToken, Mgsa, Parameter, TermId};

/// `PARENTS[i]` lists the parents of term `i + 1`
const PARENTS: [&[u32]; 11] = [
    &[],
    &[1],
    &[1],
    &[2],
    &[2],
    &[3, 2],
    &[5, 6],
    &[7],
    &[7],
    &[9],
    &[9],
];

/// Collects the term itself and all of its descendants
fn descendants(term: u32) -> Vec<u32> {
    let mut found = vec![term];
    let mut queue = vec![term];
    while let Some(current) = queue.pop() {
        for child in 1..=PARENTS.len() as u32 {
            if PARENTS[child as usize - 1].contains(&current) && !found.contains(&child) {
                found.push(child);
                queue.push(child);
            }
        }
    }
    found
}

/// Builds the index: item `i - 1` is directly annotated to term `i`, and
/// each term's closed annotation set covers all items of its descendants
fn build_index() -> AnnotationIndex {
    let mut builder = AnnotationIndexBuilder::new(11);
    for term in 1..=11u32 {
        let items = descendants(term).into_iter().map(|t| (t - 1) as usize);
        builder.add_term(TermId::from(term), items).unwrap();
    }
    builder.build().unwrap()
}

/// The study set: all items annotated by terms 4 and 10
fn study_set(index: &AnnotationIndex) -> Vec<bool> {
    let mut observed = vec![false; index.num_items()];
    for term in [TermId::from(4u32), TermId::from(10u32)] {
        let slot = index.slot_of(term).unwrap();
        for &item in index.items_of(slot) {
            observed[item as usize] = true;
        }
    }
    observed
}

/// The terms ranked by their posterior marginal, best first
fn ranked_terms(result: &mgsa::AnalysisResult) -> Vec<TermId> {
    let mut ranked: Vec<_> = result.term_results().to_vec();
    ranked.sort_by(|a, b| b.marginal().partial_cmp(&a.marginal()).unwrap());
    ranked.into_iter().map(|t| t.term()).collect()
}

#[test]
fn transitive_closure_of_the_fixture() {
    let index = build_index();
    assert_eq!(index.num_terms(), 11);

    // the root covers the whole population
    let root = index.slot_of(TermId::from(1u32)).unwrap();
    assert_eq!(index.annotation_count(root), 11);

    // leaves cover only their own item
    for leaf in [4u32, 8, 10, 11] {
        let slot = index.slot_of(TermId::from(leaf)).unwrap();
        assert_eq!(index.items_of(slot), &[leaf - 1]);
    }

    // an inner term covers itself and everything below
    let slot = index.slot_of(TermId::from(9u32)).unwrap();
    assert_eq!(index.items_of(slot), &[8, 9, 10]);
}

#[test]
fn sampled_run_recovers_the_causal_terms() {
    let index = build_index();
    let observed = study_set(&index);

    let result = Mgsa::new()
        .seed(2)
        .steps(200_000)
        .burnin(20_000)
        .run(&index, &observed)
        .unwrap();

    let ranked = ranked_terms(&result);
    let top_two = [ranked[0], ranked[1]];
    assert!(top_two.contains(&TermId::from(4u32)), "{:?}", ranked);
    assert!(top_two.contains(&TermId::from(10u32)), "{:?}", ranked);

    // both causal terms clearly beat the rest of the DAG
    let third_marginal = result
        .term_results()
        .iter()
        .find(|t| t.term() == ranked[2])
        .unwrap()
        .marginal();
    for term in top_two {
        let marginal = result
            .term_results()
            .iter()
            .find(|t| t.term() == term)
            .unwrap()
            .marginal();
        assert!(marginal > third_marginal);
    }
}

#[test]
fn fixed_parameter_run_recovers_the_causal_terms() {
    let index = build_index();
    let observed = study_set(&index);

    let result = Mgsa::new()
        .alpha(Parameter::Fixed(0.001))
        .unwrap()
        .beta(Parameter::Fixed(0.001))
        .unwrap()
        .expected_terms(Parameter::Fixed(2.0))
        .unwrap()
        .seed(2)
        .steps(100_000)
        .burnin(10_000)
        .run(&index, &observed)
        .unwrap();

    let ranked = ranked_terms(&result);
    let top_two = [ranked[0], ranked[1]];
    assert!(top_two.contains(&TermId::from(4u32)), "{:?}", ranked);
    assert!(top_two.contains(&TermId::from(10u32)), "{:?}", ranked);

    // with rates this small the best state is exactly the causal pair
    let mut map_terms = result.map().terms().to_vec();
    map_terms.sort();
    assert_eq!(map_terms, vec![TermId::from(4u32), TermId::from(10u32)]);
}

#[test]
fn em_run_recovers_the_causal_terms() {
    let index = build_index();
    let observed = study_set(&index);

    let result = Mgsa::new()
        .alpha(Parameter::Em)
        .unwrap()
        .beta(Parameter::Em)
        .unwrap()
        .expected_terms(Parameter::Em)
        .unwrap()
        .seed(7)
        .steps(50_000)
        .burnin(5_000)
        .run(&index, &observed)
        .unwrap();

    let ranked = ranked_terms(&result);
    let top_two = [ranked[0], ranked[1]];
    assert!(top_two.contains(&TermId::from(4u32)), "{:?}", ranked);
    assert!(top_two.contains(&TermId::from(10u32)), "{:?}", ranked);
}

#[test]
fn replicates_agree_across_seeds() {
    let index = build_index();
    let observed = study_set(&index);

    let rankings: Vec<Vec<TermId>> = (0..4u64)
        .into_par_iter()
        .map(|seed| {
            let result = Mgsa::new()
                .seed(seed)
                .steps(200_000)
                .burnin(20_000)
                .run(&index, &observed)
                .unwrap();
            ranked_terms(&result)
        })
        .collect();

    for ranked in rankings {
        let top_two = [ranked[0], ranked[1]];
        assert!(top_two.contains(&TermId::from(4u32)), "{:?}", ranked);
        assert!(top_two.contains(&TermId::from(10u32)), "{:?}", ranked);
    }
}

#[test]
fn identical_seeds_reproduce_marginals_bit_for_bit() {
    let index = build_index();
    let observed = study_set(&index);

    let run = || {
        Mgsa::new()
            .seed(1234)
            .steps(50_000)
            .burnin(5_000)
            .run(&index, &observed)
            .unwrap()
    };
    let a = run();
    let b = run();

    for (ta, tb) in a.term_results().iter().zip(b.term_results()) {
        assert_eq!(ta.term(), tb.term());
        assert_eq!(ta.marginal().to_bits(), tb.marginal().to_bits());
    }
    assert_eq!(a.map().score().to_bits(), b.map().score().to_bits());
}

#[test]
fn cancellation_from_another_thread_stops_the_run() {
    let index = build_index();
    let observed = study_set(&index);

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        remote.cancel();
    });

    let result = Mgsa::new()
        .seed(5)
        .steps(usize::MAX >> 8)
        .burnin(1_000)
        .run_with(&index, &observed, None, &cancel)
        .unwrap();
    handle.join().unwrap();

    assert!(result.was_cancelled());
}

#[test]
fn classical_baseline_agrees_on_the_causal_terms() {
    let index = build_index();
    let observed = study_set(&index);

    let mut enrichments = term_enrichment(&index, &observed).unwrap();
    enrichments.sort_by(|a, b| a.pvalue().partial_cmp(&b.pvalue()).unwrap());

    // the two single-item causal terms share the smallest p-value
    let best: Vec<TermId> = enrichments.iter().take(2).map(|e| e.term()).collect();
    assert!(best.contains(&TermId::from(4u32)));
    assert!(best.contains(&TermId::from(10u32)));

    // the root term annotates everything and is never enriched
    let root = enrichments
        .iter()
        .find(|e| e.term() == TermId::from(1u32))
        .unwrap();
    assert!((root.pvalue() - 1.0).abs() < 1e-12);
    assert!((root.enrichment() - 1.0).abs() < 1e-12);
}
