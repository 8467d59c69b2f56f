//! Weighted winner selection
//!
//! Pure function of (candidate set, outcome). Candidates are put in a total
//! order first so any third party re-running the selection with the
//! published seed gets the same winner.

use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinnerCandidate<T> {
    pub weight: u64,
    /// Tie-break key
    pub id: u64,
    pub entity: T,
}

/// Display-only ticket count for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCount {
    pub id: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    pub winner: WinnerCandidate<T>,
    /// Position of the winner in the sorted order
    pub winner_index: usize,
    /// Counts in sorted order
    pub counts: Vec<CandidateCount>,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Pick one winner with probability proportional to weight.
///
/// Counts are `ceil(weight * expected_count / total_weight)`, so no count
/// can exceed `expected_count`.
pub fn select_winner<T>(
    mut candidates: Vec<WinnerCandidate<T>>,
    outcome: u64,
    expected_count: u64,
) -> Result<Selection<T>> {
    if candidates.is_empty() {
        return Err(LedgerError::InvalidInput("no candidates".to_string()));
    }
    if expected_count == 0 {
        return Err(LedgerError::InvalidInput("expected count must be positive".to_string()));
    }

    candidates.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| b.id.cmp(&a.id)));

    let total: u128 = candidates.iter().map(|c| u128::from(c.weight)).sum();
    if total == 0 {
        return Err(LedgerError::InvalidInput("total weight is zero".to_string()));
    }

    let divisor = candidates.iter().fold(0, |acc, c| gcd(acc, c.weight));
    let normalized: Vec<u64> = candidates.iter().map(|c| c.weight / divisor).collect();
    let normalized_total = total / u128::from(divisor);

    let mut pick = u128::from(outcome) % normalized_total;
    let mut winner_index = candidates.len() - 1;
    for (index, weight) in normalized.iter().enumerate() {
        let weight = u128::from(*weight);
        if pick < weight {
            winner_index = index;
            break;
        }
        pick -= weight;
    }

    let counts = candidates
        .iter()
        .map(|c| {
            let numerator = u128::from(c.weight) * u128::from(expected_count);
            let count = numerator.div_ceil(total);
            CandidateCount {
                id: c.id,
                count: u64::try_from(count).unwrap_or(u64::MAX),
            }
        })
        .collect();

    let winner = candidates.swap_remove(winner_index);

    Ok(Selection {
        winner,
        winner_index,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(weight: u64, id: u64) -> WinnerCandidate<&'static str> {
        WinnerCandidate { weight, id, entity: "player" }
    }

    #[test]
    fn test_empty_and_zero_weight_rejected() {
        let empty: Vec<WinnerCandidate<()>> = Vec::new();
        assert!(matches!(select_winner(empty, 1, 10), Err(LedgerError::InvalidInput(_))));

        let zero = vec![candidate(0, 1), candidate(0, 2)];
        assert!(matches!(select_winner(zero, 1, 10), Err(LedgerError::InvalidInput(_))));

        assert!(matches!(
            select_winner(vec![candidate(1, 1)], 1, 0),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_single_candidate_always_wins() {
        for outcome in [0, 1, 17, u64::MAX] {
            let selection = select_winner(vec![candidate(250, 9)], outcome, 100).unwrap();
            assert_eq!(selection.winner.id, 9);
            assert_eq!(selection.counts, vec![CandidateCount { id: 9, count: 100 }]);
        }
    }

    #[test]
    fn test_equal_weights_outcome_zero_picks_first_in_order() {
        // Equal weights sort by descending id: [3, 2, 1]
        let candidates = vec![candidate(1, 1), candidate(1, 2), candidate(1, 3)];
        let selection = select_winner(candidates, 0, 3).unwrap();
        assert_eq!(selection.winner.id, 3);
        assert_eq!(selection.winner_index, 0);
    }

    #[test]
    fn test_walk_respects_weights() {
        // Sorted: (10,id 1), (20,id 2), (70,id 3); gcd 10 -> 1, 2, 7
        let candidates = || vec![candidate(70, 3), candidate(10, 1), candidate(20, 2)];
        assert_eq!(select_winner(candidates(), 0, 10).unwrap().winner.id, 1);
        assert_eq!(select_winner(candidates(), 1, 10).unwrap().winner.id, 2);
        assert_eq!(select_winner(candidates(), 2, 10).unwrap().winner.id, 2);
        assert_eq!(select_winner(candidates(), 3, 10).unwrap().winner.id, 3);
        assert_eq!(select_winner(candidates(), 9, 10).unwrap().winner.id, 3);
        // 10 % 10 wraps back to the first candidate
        assert_eq!(select_winner(candidates(), 10, 10).unwrap().winner.id, 1);
    }

    #[test]
    fn test_zero_weight_candidate_never_wins() {
        for outcome in 0..20 {
            let candidates = vec![candidate(0, 5), candidate(3, 6)];
            assert_eq!(select_winner(candidates, outcome, 1).unwrap().winner.id, 6);
        }
    }

    #[test]
    fn test_selection_is_reproducible() {
        let candidates = vec![candidate(13, 1), candidate(29, 2), candidate(58, 3), candidate(29, 4)];
        let first = select_winner(candidates.clone(), 0xdead_beef, 100).unwrap();
        for _ in 0..10 {
            let again = select_winner(candidates.clone(), 0xdead_beef, 100).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = vec![candidate(5, 1), candidate(7, 2), candidate(5, 3)];
        let mut b = a.clone();
        b.reverse();
        for outcome in 0..17 {
            assert_eq!(
                select_winner(a.clone(), outcome, 5).unwrap().winner.id,
                select_winner(b.clone(), outcome, 5).unwrap().winner.id
            );
        }
    }

    #[test]
    fn test_counts_round_up_and_stay_bounded() {
        // total 100, expected 3: 1 -> ceil(0.03) = 1, 99 -> ceil(2.97) = 3
        let selection = select_winner(vec![candidate(1, 1), candidate(99, 2)], 0, 3).unwrap();
        assert_eq!(
            selection.counts,
            vec![CandidateCount { id: 1, count: 1 }, CandidateCount { id: 2, count: 3 }]
        );

        // Skewed weights cannot overflow the count
        let selection =
            select_winner(vec![candidate(1, 1), candidate(u64::MAX, 2)], 5, u64::MAX).unwrap();
        assert_eq!(selection.counts[0].count, 1);
        assert_eq!(selection.counts[1].count, u64::MAX);
    }

    #[test]
    fn test_large_weights_do_not_overflow_total() {
        let candidates = vec![candidate(u64::MAX, 1), candidate(u64::MAX, 2)];
        let selection = select_winner(candidates, u64::MAX, 2).unwrap();
        assert!(selection.winner.id == 1 || selection.winner.id == 2);
    }
}
