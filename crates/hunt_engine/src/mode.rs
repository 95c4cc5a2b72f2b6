use std::cell::Cell;

use serde::Serialize;
use tracing::debug;

use crate::geo::LatLng;
use crate::pricing::GenerationState;

/// What a map click currently means. A single tagged state, so point and
/// area placement can never be armed together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InteractionMode {
    #[default]
    Idle,
    PlacingPoint,
    PlacingArea { pending_radius_km: f64 },
}

impl InteractionMode {
    pub fn is_placing_point(&self) -> bool {
        matches!(self, Self::PlacingPoint)
    }

    pub fn is_placing_area(&self) -> bool {
        matches!(self, Self::PlacingArea { .. })
    }
}

/// Work a click asks for. The controller stays armed until the caller has
/// carried it out and calls [`ModeController::disarm`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClickAction {
    Ignored,
    PlacePoint { at: LatLng },
    GenerateArea { at: LatLng, pending_radius_km: f64 },
}

#[derive(Debug, Default)]
pub struct ModeController {
    mode: Cell<InteractionMode>,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode.get()
    }

    pub fn toggle_adding_point(&self) -> InteractionMode {
        let next = match self.mode.get() {
            InteractionMode::PlacingPoint => InteractionMode::Idle,
            InteractionMode::Idle | InteractionMode::PlacingArea { .. } => {
                InteractionMode::PlacingPoint
            }
        };
        self.set(next)
    }

    /// Arms area placement with the radius the next generation would get.
    pub fn toggle_adding_area(&self, state: &GenerationState) -> InteractionMode {
        let next = match self.mode.get() {
            InteractionMode::PlacingArea { .. } => InteractionMode::Idle,
            InteractionMode::Idle | InteractionMode::PlacingPoint => InteractionMode::PlacingArea {
                pending_radius_km: state.next_radius_km,
            },
        };
        self.set(next)
    }

    pub fn click_action(&self, at: LatLng) -> ClickAction {
        match self.mode.get() {
            InteractionMode::Idle => ClickAction::Ignored,
            InteractionMode::PlacingPoint => ClickAction::PlacePoint { at },
            InteractionMode::PlacingArea { pending_radius_km } => ClickAction::GenerateArea {
                at,
                pending_radius_km,
            },
        }
    }

    pub fn disarm(&self) {
        self.set(InteractionMode::Idle);
    }

    fn set(&self, next: InteractionMode) -> InteractionMode {
        let previous = self.mode.replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "interaction_mode_changed");
        }
        next
    }
}
