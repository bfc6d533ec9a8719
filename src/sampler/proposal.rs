//! Proposal generation for the Metropolis-Hastings chain
//!
//! A proposal is one of three move classes: a single-term toggle, an
//! exchange of an active against an inactive term, or a jump to another
//! candidate value of a grid-sampled hyperparameter. Moves are small copy
//! types so that applying and undoing them is a branch on a tag, with no
//! allocation in the hot loop.

use crate::score::ScoreState;

/// One proposed move of the chain
///
/// Every variant carries enough information to be undone exactly: the
/// toggle is its own inverse, the exchange is inverted by swapping its
/// slots, and grid moves remember the previous index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Move {
    /// Flip the activation state of one term
    Toggle { slot: usize },
    /// Deactivate `active` and activate `inactive` in one step
    Exchange { active: usize, inactive: usize },
    /// Jump to another candidate of the alpha grid
    AlphaGrid { old: usize, new: usize },
    /// Jump to another candidate of the beta grid
    BetaGrid { old: usize, new: usize },
    /// Jump to another candidate of the expected-term-count grid
    ExpectedGrid { old: usize, new: usize },
}

/// Length and current index of a grid that is in MCMC mode
pub(crate) type GridView = Option<(usize, usize)>;

/// Returns the size of the structural proposal neighborhood
///
/// For `k` active terms out of `n` there are `n` possible toggles and
/// `k * (n - k)` possible exchanges. The exchange part vanishes at `k = 0`
/// and `k = n`, which makes the fallback to toggle-only selection implicit;
/// no special casing of the boundaries is needed. Grid moves are selected
/// by a separate class draw and are symmetric, so they do not contribute
/// here.
pub(crate) fn neighborhood_size(num_terms: usize, num_active: usize) -> u64 {
    let n = num_terms as u64;
    let k = num_active as u64;
    n + k * (n - k)
}

/// Deterministically selects a move from a single 64-bit random draw
///
/// The top bit picks the move class (structural vs. hyperparameter grid)
/// whenever at least one grid is enabled; the remaining bits index into the
/// chosen neighborhood. Because the class coin is fair and grid proposals
/// are uniform over their candidates, grid moves need no Hastings
/// correction; the structural part carries the `n + k(n-k)` neighborhood
/// into the acceptance ratio instead.
pub(crate) fn select(
    draw: u64,
    state: &ScoreState,
    alpha: GridView,
    beta: GridView,
    expected: GridView,
) -> Move {
    let grid_total = alpha.map_or(0, |(len, _)| len)
        + beta.map_or(0, |(len, _)| len)
        + expected.map_or(0, |(len, _)| len);

    let structural = grid_total == 0 || draw & (1 << 63) != 0;
    let low = draw & (u64::MAX >> 1);

    if structural {
        let num_terms = state.num_terms();
        let choose = low % neighborhood_size(num_terms, state.num_active());

        if choose < num_terms as u64 {
            return Move::Toggle {
                slot: choose as usize,
            };
        }

        // the draw landed in the exchange part, so both partitions are non-empty
        let base = choose - num_terms as u64;
        let num_inactive = (num_terms - state.num_active()) as u64;
        let active_pos = (base / num_inactive) as usize;
        let inactive_pos = (base % num_inactive) as usize;
        return Move::Exchange {
            active: state.nth_active(active_pos),
            inactive: state.nth_inactive(inactive_pos),
        };
    }

    let mut choose = (low % grid_total as u64) as usize;

    if let Some((len, old)) = alpha {
        if choose < len {
            return Move::AlphaGrid { old, new: choose };
        }
        choose -= len;
    }
    if let Some((len, old)) = beta {
        if choose < len {
            return Move::BetaGrid { old, new: choose };
        }
        choose -= len;
    }

    let (_, old) = expected.expect("a grid move was drawn, so one grid must be enabled");
    Move::ExpectedGrid { old, new: choose }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::annotations::{AnnotationIndexBuilder, TermId};
    use crate::AnnotationIndex;

    fn index(num_terms: usize) -> AnnotationIndex {
        let mut builder = AnnotationIndexBuilder::new(2);
        for t in 0..num_terms {
            builder.add_term(TermId::from(t as u32 + 1), [t % 2]).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn neighborhood_includes_toggles_and_exchanges() {
        assert_eq!(neighborhood_size(10, 3), 10 + 3 * 7);
        assert_eq!(neighborhood_size(5, 1), 5 + 4);
    }

    #[test]
    fn neighborhood_at_boundaries_is_toggle_only() {
        assert_eq!(neighborhood_size(10, 0), 10);
        assert_eq!(neighborhood_size(10, 10), 10);
    }

    #[test]
    fn structural_draws_cover_all_toggles() {
        let idx = index(4);
        let observed = [true, false];
        let state = ScoreState::new(&idx, &observed).unwrap();

        // with no active terms, every draw must be a toggle
        for draw in 0..20u64 {
            match select(draw, &state, None, None, None) {
                Move::Toggle { slot } => assert_eq!(slot, (draw % 4) as usize),
                other => panic!("unexpected move {:?}", other),
            }
        }
    }

    #[test]
    fn exchange_draws_pair_active_with_inactive() {
        let idx = index(4);
        let observed = [true, false];
        let mut state = ScoreState::new(&idx, &observed).unwrap();
        state.toggle(2);

        // neighborhood is 4 toggles + 1*3 exchanges
        let nb = neighborhood_size(4, 1);
        assert_eq!(nb, 7);
        for draw in 4..7u64 {
            match select(draw, &state, None, None, None) {
                Move::Exchange { active, inactive } => {
                    assert_eq!(active, 2);
                    assert_ne!(inactive, 2);
                }
                other => panic!("unexpected move {:?}", other),
            }
        }
    }

    #[test]
    fn top_bit_selects_grid_moves() {
        let idx = index(4);
        let observed = [true, false];
        let state = ScoreState::new(&idx, &observed).unwrap();

        let alpha = Some((20, 3));
        let beta = Some((20, 5));
        let expected = Some((20, 7));

        // top bit set: structural
        let mv = select(1 << 63, &state, alpha, beta, expected);
        assert!(matches!(mv, Move::Toggle { .. } | Move::Exchange { .. }));

        // top bit clear: a grid move, walked in alpha/beta/expected order
        assert_eq!(
            select(0, &state, alpha, beta, expected),
            Move::AlphaGrid { old: 3, new: 0 }
        );
        assert_eq!(
            select(20, &state, alpha, beta, expected),
            Move::BetaGrid { old: 5, new: 0 }
        );
        assert_eq!(
            select(41, &state, alpha, beta, expected),
            Move::ExpectedGrid { old: 7, new: 1 }
        );
    }

    #[test]
    fn grid_moves_skip_disabled_grids() {
        let idx = index(4);
        let observed = [true, false];
        let state = ScoreState::new(&idx, &observed).unwrap();

        let mv = select(2, &state, None, Some((20, 4)), None);
        assert_eq!(mv, Move::BetaGrid { old: 4, new: 2 });

        let mv = select(21, &state, None, Some((20, 4)), Some((20, 9)));
        assert_eq!(mv, Move::ExpectedGrid { old: 9, new: 1 });
    }
}
