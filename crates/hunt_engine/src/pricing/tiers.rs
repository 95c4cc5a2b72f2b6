use serde::{Deserialize, Serialize};

use crate::model::Cents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClueTier {
    pub min_clues: u32,
    pub price: Cents,
}

pub fn default_clue_tiers() -> Vec<ClueTier> {
    vec![
        ClueTier {
            min_clues: 0,
            price: Cents(799),
        },
        ClueTier {
            min_clues: 10,
            price: Cents(1299),
        },
        ClueTier {
            min_clues: 20,
            price: Cents(1999),
        },
        ClueTier {
            min_clues: 30,
            price: Cents(2999),
        },
    ]
}

/// Price of the highest tier whose threshold the clue count has reached.
/// Tiers must be sorted by `min_clues`; config validation guarantees it.
pub fn tiered_price(tiers: &[ClueTier], clue_count: u32) -> Option<Cents> {
    tiers
        .iter()
        .take_while(|tier| tier.min_clues <= clue_count)
        .last()
        .map(|tier| tier.price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_lookup_uses_highest_reached_threshold() {
        let tiers = default_clue_tiers();
        assert_eq!(tiered_price(&tiers, 0), Some(Cents(799)));
        assert_eq!(tiered_price(&tiers, 9), Some(Cents(799)));
        assert_eq!(tiered_price(&tiers, 10), Some(Cents(1299)));
        assert_eq!(tiered_price(&tiers, 29), Some(Cents(1999)));
        assert_eq!(tiered_price(&tiers, 1_000), Some(Cents(2999)));
    }

    #[test]
    fn tier_price_is_monotonic_in_clue_count() {
        let tiers = default_clue_tiers();
        let mut previous = Cents(0);
        for clues in 0..100 {
            let price = tiered_price(&tiers, clues).expect("tier zero always matches");
            assert!(price >= previous);
            previous = price;
        }
    }

    #[test]
    fn lookup_below_first_threshold_has_no_price() {
        let tiers = vec![ClueTier {
            min_clues: 5,
            price: Cents(100),
        }];
        assert_eq!(tiered_price(&tiers, 4), None);
    }
}
