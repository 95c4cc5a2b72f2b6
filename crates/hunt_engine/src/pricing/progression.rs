use serde::{Deserialize, Serialize};

use crate::model::{Cents, OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadiusProgression {
    pub base_radius_km: f64,
    pub decay_factor: f64,
    pub radius_floor_km: f64,
}

impl Default for RadiusProgression {
    fn default() -> Self {
        Self {
            base_radius_km: 500.0,
            decay_factor: 0.7,
            radius_floor_km: 5.0,
        }
    }
}

impl RadiusProgression {
    pub fn radius_km(&self, generation_count: u32) -> f64 {
        let exponent = i32::try_from(generation_count).unwrap_or(i32::MAX);
        let decayed = self.base_radius_km * self.decay_factor.powi(exponent);
        decayed.max(self.radius_floor_km)
    }

    /// First generation count whose radius sits on the floor.
    pub fn floor_reached_at(&self) -> Option<u32> {
        (0..=u32::from(u16::MAX)).find(|count| self.radius_km(*count) <= self.radius_floor_km)
    }
}

/// Map-area pricing: `min(max, base + step * count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepPricing {
    pub base: Cents,
    pub step: Cents,
    pub max: Cents,
}

impl Default for StepPricing {
    fn default() -> Self {
        Self {
            base: Cents(799),
            step: Cents(200),
            max: Cents(2999),
        }
    }
}

impl StepPricing {
    pub fn price(&self, generation_count: u32) -> Cents {
        let raised = u64::from(self.step.0)
            .saturating_mul(u64::from(generation_count))
            .saturating_add(u64::from(self.base.0));
        let capped = raised.min(u64::from(self.max.0));
        Cents(u32::try_from(capped).unwrap_or(self.max.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progression {
    pub radius_km: f64,
    pub price: Cents,
}

/// Pure progression for one generation count. Call with the count before
/// incrementing to price the generation being bought, and with `count + 1`
/// to preview the one after.
pub fn compute_progression(
    radius: &RadiusProgression,
    pricing: &StepPricing,
    generation_count: u32,
) -> Progression {
    Progression {
        radius_km: radius.radius_km(generation_count),
        price: pricing.price(generation_count),
    }
}

/// Derived per-owner state. Always rebuilt from a fresh authoritative count.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationState {
    pub owner_id: OwnerId,
    pub generation_count: u32,
    pub next_radius_km: f64,
    pub next_price: Cents,
}

impl GenerationState {
    pub fn derive(
        owner_id: OwnerId,
        generation_count: u32,
        radius: &RadiusProgression,
        pricing: &StepPricing,
    ) -> Self {
        let next = compute_progression(radius, pricing, generation_count);
        Self {
            owner_id,
            generation_count,
            next_radius_km: next.radius_km,
            next_price: next.price,
        }
    }

    pub fn next_generation_number(&self) -> u32 {
        self.generation_count.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> (RadiusProgression, StepPricing) {
        (RadiusProgression::default(), StepPricing::default())
    }

    #[test]
    fn radius_matches_production_constants() {
        let (radius, _) = defaults();
        assert_eq!(radius.radius_km(0), 500.0);
        assert!((radius.radius_km(1) - 350.0).abs() < 1e-9);
        assert!((radius.radius_km(2) - 245.0).abs() < 1e-9);
        assert!((radius.radius_km(10) - 14.123_762_45).abs() < 1e-6);
    }

    #[test]
    fn radius_floor_is_reached_at_thirteen_and_held() {
        let (radius, _) = defaults();
        assert!(radius.radius_km(12) > 5.0);
        assert_eq!(radius.radius_km(13), 5.0);
        assert_eq!(radius.radius_km(500), 5.0);
        assert_eq!(radius.radius_km(u32::MAX), 5.0);
        assert_eq!(radius.floor_reached_at(), Some(13));
    }

    #[test]
    fn radius_is_non_increasing_and_never_below_floor() {
        let (radius, _) = defaults();
        for n in 0..200 {
            let current = radius.radius_km(n);
            let next = radius.radius_km(n + 1);
            assert!(next <= current, "radius grew between {n} and {}", n + 1);
            assert!(current >= radius.radius_floor_km);
        }
    }

    #[test]
    fn first_generation_costs_base_price() {
        let (_, pricing) = defaults();
        assert_eq!(pricing.price(0), Cents(799));
        assert_eq!(pricing.price(1), Cents(999));
    }

    #[test]
    fn price_increases_strictly_until_cap_then_holds() {
        let (_, pricing) = defaults();
        let mut previous = pricing.price(0);
        let mut capped_at = None;
        for n in 1..100 {
            let price = pricing.price(n);
            assert!(price <= Cents(2999));
            if previous < pricing.max {
                assert!(price > previous, "price did not rise at {n}");
            } else {
                assert_eq!(price, pricing.max);
                capped_at.get_or_insert(n - 1);
            }
            previous = price;
        }
        assert_eq!(capped_at, Some(11));
        assert_eq!(pricing.price(11), Cents(2999));
        assert_eq!(pricing.price(u32::MAX), Cents(2999));
    }

    #[test]
    fn generation_state_prices_the_generation_being_bought() {
        let (radius, pricing) = defaults();
        let state = GenerationState::derive(OwnerId::new("owner"), 0, &radius, &pricing);
        assert_eq!(state.next_generation_number(), 1);
        assert_eq!(state.next_price, Cents(799));
        assert_eq!(state.next_radius_km, 500.0);

        let later = GenerationState::derive(OwnerId::new("owner"), 3, &radius, &pricing);
        assert_eq!(later.next_generation_number(), 4);
        assert_eq!(later.next_price, Cents(1399));
    }
}
