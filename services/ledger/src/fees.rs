//! NFT fee selection
//!
//! When a pot holds NFTs, the house fee is paid first with the NFT subset
//! whose value comes closest to the fee without exceeding it. The search is
//! exhaustive over the assets individually priced at or under the fee, so
//! it is only used on small pots.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use shared::Money;

use crate::domain::NftAsset;
use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSelection {
    pub selected: Vec<NftAsset>,
    pub remaining: Vec<NftAsset>,
}

impl FeeSelection {
    pub fn selected_value(&self) -> Result<Money> {
        Ok(Money::checked_sum(self.selected.iter().map(|nft| nft.price))?)
    }
}

/// Best subset seen so far, as indices into the sorted candidates
#[derive(Debug, Default)]
struct BestSubset {
    sum: i128,
    max_price: i128,
    picks: Vec<usize>,
}

impl BestSubset {
    /// Larger sum wins, then more items, then the cheaper most expensive item.
    fn is_beaten_by(&self, sum: i128, count: usize, max_price: i128) -> bool {
        if sum != self.sum {
            return sum > self.sum;
        }
        if count != self.picks.len() {
            return count > self.picks.len();
        }
        max_price < self.max_price
    }
}

struct SubsetSearch<'a> {
    candidates: &'a [NftAsset],
    fee: i128,
    best: BestSubset,
}

impl SubsetSearch<'_> {
    fn explore(&mut self, start: usize, current: &mut Vec<usize>, sum: i128) {
        let max_price = current
            .last()
            .map(|&i| i128::from(self.candidates[i].price.as_i64()))
            .unwrap_or(0);
        if self.best.is_beaten_by(sum, current.len(), max_price) {
            self.best = BestSubset {
                sum,
                max_price,
                picks: current.clone(),
            };
        }

        for index in start..self.candidates.len() {
            let next = sum + i128::from(self.candidates[index].price.as_i64());
            // Sorted ascending, so every later candidate overshoots too
            if next > self.fee {
                break;
            }
            current.push(index);
            self.explore(index + 1, current, next);
            current.pop();
        }
    }
}

/// Choose the NFTs that pay `fee` as closely as possible without exceeding it.
///
/// Ties on value prefer more items, then the subset whose most expensive
/// item is cheapest. Identical input always yields the identical subset.
/// `remaining` keeps the input order.
pub fn select_nfts_for_fee(assets: &[NftAsset], fee: Money) -> Result<FeeSelection> {
    if fee.is_negative() {
        return Err(LedgerError::InvalidInput(format!("negative fee: {}", fee)));
    }

    let mut mints = HashSet::with_capacity(assets.len());
    for nft in assets {
        if nft.price.is_negative() {
            return Err(LedgerError::InvalidInput(format!(
                "negative price for NFT {}",
                nft.mint_address
            )));
        }
        if !mints.insert(nft.mint_address.as_str()) {
            return Err(LedgerError::InvalidInput(format!(
                "duplicate NFT {}",
                nft.mint_address
            )));
        }
    }

    let mut candidates: Vec<NftAsset> = assets
        .iter()
        .filter(|nft| nft.price <= fee)
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        a.price
            .cmp(&b.price)
            .then_with(|| a.mint_address.cmp(&b.mint_address))
    });

    let mut search = SubsetSearch {
        candidates: &candidates,
        fee: i128::from(fee.as_i64()),
        best: BestSubset::default(),
    };
    search.explore(0, &mut Vec::new(), 0);

    let selected: Vec<NftAsset> = search
        .best
        .picks
        .iter()
        .map(|&i| candidates[i].clone())
        .collect();
    let chosen: HashSet<&str> = selected.iter().map(|nft| nft.mint_address.as_str()).collect();
    let remaining = assets
        .iter()
        .filter(|nft| !chosen.contains(nft.mint_address.as_str()))
        .cloned()
        .collect();

    Ok(FeeSelection { selected, remaining })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nfts(prices: &[i64]) -> Vec<NftAsset> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| NftAsset::new(format!("mint-{}", i), Money::from_scaled(p)))
            .collect()
    }

    fn prices(selection: &[NftAsset]) -> Vec<i64> {
        let mut p: Vec<i64> = selection.iter().map(|n| n.price.as_i64()).collect();
        p.sort_unstable();
        p
    }

    fn brute_force_best_sum(assets: &[NftAsset], fee: i64) -> i64 {
        let mut best = 0;
        for mask in 0u32..(1 << assets.len()) {
            let sum: i64 = assets
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, n)| n.price.as_i64())
                .sum();
            if sum <= fee {
                best = best.max(sum);
            }
        }
        best
    }

    #[test]
    fn test_exact_fee_prefers_more_items() {
        let assets = nfts(&[8, 10, 10, 10, 20]);
        let selection = select_nfts_for_fee(&assets, Money::from_scaled(30)).unwrap();
        assert_eq!(prices(&selection.selected), vec![10, 10, 10]);
        assert_eq!(selection.selected_value().unwrap().as_i64(), 30);
        assert_eq!(prices(&selection.remaining), vec![8, 20]);
    }

    #[test]
    fn test_tie_on_count_prefers_cheaper_max() {
        // {5, 15} and {9, 11} both sum to 20 with two items; max 11 < 15
        let assets = nfts(&[5, 15, 9, 11]);
        let selection = select_nfts_for_fee(&assets, Money::from_scaled(20)).unwrap();
        assert_eq!(prices(&selection.selected), vec![9, 11]);
    }

    #[test]
    fn test_nothing_affordable_returns_everything() {
        let assets = nfts(&[50, 60]);
        let selection = select_nfts_for_fee(&assets, Money::from_scaled(40)).unwrap();
        assert!(selection.selected.is_empty());
        assert_eq!(selection.remaining, assets);
    }

    #[test]
    fn test_zero_fee_and_empty_input() {
        let selection = select_nfts_for_fee(&[], Money::ZERO).unwrap();
        assert!(selection.selected.is_empty());
        assert!(selection.remaining.is_empty());

        let assets = nfts(&[3]);
        let selection = select_nfts_for_fee(&assets, Money::ZERO).unwrap();
        assert!(selection.selected.is_empty());
        assert_eq!(selection.remaining.len(), 1);
    }

    #[test]
    fn test_matches_brute_force_on_small_inputs() {
        let cases: [(&[i64], i64); 6] = [
            (&[8, 10, 10, 10, 20], 30),
            (&[3, 7, 11, 13], 20),
            (&[1, 2, 4, 8, 16], 27),
            (&[25, 35, 45], 60),
            (&[6, 6, 6, 9], 14),
            (&[100, 1, 1, 1], 2),
        ];
        for (values, fee) in cases {
            let assets = nfts(values);
            let selection = select_nfts_for_fee(&assets, Money::from_scaled(fee)).unwrap();
            let sum = selection.selected_value().unwrap().as_i64();
            assert!(sum <= fee);
            assert_eq!(sum, brute_force_best_sum(&assets, fee), "prices {:?}, fee {}", values, fee);
            assert_eq!(selection.selected.len() + selection.remaining.len(), assets.len());
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let assets = nfts(&[4, 6, 5, 5, 10, 1]);
        let first = select_nfts_for_fee(&assets, Money::from_scaled(11)).unwrap();
        for _ in 0..5 {
            assert_eq!(select_nfts_for_fee(&assets, Money::from_scaled(11)).unwrap(), first);
        }
    }

    #[test]
    fn test_remaining_keeps_input_order() {
        let assets = nfts(&[30, 2, 40, 3]);
        let selection = select_nfts_for_fee(&assets, Money::from_scaled(5)).unwrap();
        let remaining: Vec<&str> = selection.remaining.iter().map(|n| n.mint_address.as_str()).collect();
        assert_eq!(remaining, vec!["mint-0", "mint-2"]);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let duplicate = vec![
            NftAsset::new("same", Money::from_scaled(1)),
            NftAsset::new("same", Money::from_scaled(2)),
        ];
        assert!(matches!(
            select_nfts_for_fee(&duplicate, Money::from_scaled(5)),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(select_nfts_for_fee(&nfts(&[1]), Money::from_scaled(-1)).is_err());
        assert!(select_nfts_for_fee(&nfts(&[-1]), Money::from_scaled(1)).is_err());
    }
}
