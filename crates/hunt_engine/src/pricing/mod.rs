mod progression;
mod tiers;

use serde::{Deserialize, Serialize};

use crate::model::Cents;

pub use progression::{
    compute_progression, GenerationState, Progression, RadiusProgression, StepPricing,
};
pub use tiers::{default_clue_tiers, tiered_price, ClueTier};

/// Product surface a price is quoted for. Each surface has exactly one formula:
/// map-area generation uses step pricing keyed by the prior generation count,
/// clue buzzes use the tier table keyed by accumulated clue count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingSurface {
    MapArea,
    ClueBuzz,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub map_area: StepPricing,
    pub clue_tiers: Vec<ClueTier>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            map_area: StepPricing::default(),
            clue_tiers: default_clue_tiers(),
        }
    }
}

impl PricingConfig {
    /// `counter` is the prior generation count for [`PricingSurface::MapArea`]
    /// and the accumulated clue count for [`PricingSurface::ClueBuzz`].
    pub fn quote(&self, surface: PricingSurface, counter: u32) -> Cents {
        match surface {
            PricingSurface::MapArea => self.map_area.price(counter),
            PricingSurface::ClueBuzz => tiered_price(&self.clue_tiers, counter)
                .unwrap_or(self.map_area.base)
                .clamp(self.map_area.base, self.map_area.max),
        }
    }
}

/// Current and next-generation progression, for showing "this costs X, the
/// next one will cost Y".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressionPreview {
    pub generation_count: u32,
    pub current: Progression,
    pub next: Progression,
}

pub fn preview(
    radius: &RadiusProgression,
    pricing: &StepPricing,
    generation_count: u32,
) -> ProgressionPreview {
    ProgressionPreview {
        generation_count,
        current: compute_progression(radius, pricing, generation_count),
        next: compute_progression(radius, pricing, generation_count.saturating_add(1)),
    }
}
