//! Paid "generate a new search area" flow.
//!
//! One run: guard against double submission, derive the price from a fresh
//! authoritative count, pass the payment gate, call the endpoint, then
//! record the area, notify, reload and re-fit the view. Every failure ends
//! in exactly one user notice and one audit entry, and the guard is released
//! on every path.

mod endpoint;
mod guard;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditKind, AuditLog};
use crate::clock::Clock;
use crate::config::{CounterScope, EngineConfig};
use crate::error::{RemoteError, SyncError, ValidationError};
use crate::gate::{
    DenialReason, EntitlementProvider, GateDecision, GateError, GrantReason, PaymentGate,
    PaymentProcessor,
};
use crate::geo::LatLng;
use crate::model::{Cents, GeneratedArea, OwnerId, PeriodTag, RecordId};
use crate::notice::NoticeQueue;
use crate::pricing::{
    compute_progression, GenerationState, Progression, RadiusProgression, StepPricing,
};
use crate::render::RenderSurface;
use crate::sync::{RemoteStore, Synchronizer};

pub use endpoint::{
    GeneratedCircle, GenerationEndpoint, GenerationRequest, GenerationResponse, ResponseError,
};
pub use guard::{InFlightGuard, InFlightTicket};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("a generation is already in flight")]
    AlreadyInFlight,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("payment {0}")]
    PaymentDenied(DenialReason),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("generation request failed: {0}")]
    Connection(#[source] RemoteError),
    #[error("endpoint rejected generation: {0}")]
    Rejected(String),
    #[error("malformed generation response: {0}")]
    Malformed(#[source] ResponseError),
    #[error("failed to record generated area: {0}")]
    Persistence(#[source] SyncError),
}

impl From<ResponseError> for GenerationError {
    fn from(error: ResponseError) -> Self {
        match error {
            ResponseError::Reported(message) => Self::Rejected(message),
            malformed => Self::Malformed(malformed),
        }
    }
}

impl GenerationError {
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyInFlight => {
                "A search area is already being generated. Please wait for it to finish."
                    .to_string()
            }
            Self::Validation(error) => format!("Cannot generate here: {error}."),
            Self::PaymentDenied(_) => {
                "Payment was not completed, so no search area was generated.".to_string()
            }
            Self::Gate(_) | Self::Connection(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::Rejected(message) => format!("Search area generation failed: {message}."),
            Self::Malformed(_) => {
                "The server returned an incomplete result. No search area was generated."
                    .to_string()
            }
            Self::Persistence(_) => {
                "The new search area could not be saved. Please try again.".to_string()
            }
        }
    }

    pub fn audit_kind(&self) -> AuditKind {
        match self {
            Self::AlreadyInFlight => AuditKind::DuplicateSubmission,
            Self::PaymentDenied(_) => AuditKind::PaymentDenied,
            Self::Gate(_) | Self::Connection(_) => AuditKind::ConnectionError,
            Self::Persistence(SyncError::Remote(_)) => AuditKind::ConnectionError,
            Self::Malformed(_) => AuditKind::MalformedResponse,
            Self::Validation(_) | Self::Rejected(_) | Self::Persistence(_) => {
                AuditKind::GenerationFailure
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gate(error) => error.remote().is_retryable(),
            Self::Connection(error) => error.is_retryable(),
            Self::Persistence(SyncError::Remote(error)) => error.is_retryable(),
            _ => false,
        }
    }
}

/// Largest radius difference accepted from the endpoint, to absorb rounding
/// on its side.
const RADIUS_TOLERANCE_KM: f64 = 0.01;

/// The endpoint must agree with the owner's authoritative count; the stored
/// row always takes the locally derived number and radius.
fn confirm_progression(
    circle: &GeneratedCircle,
    state: &GenerationState,
) -> Result<(), ResponseError> {
    let expected = state.next_generation_number();
    if circle.generation_number != expected {
        return Err(ResponseError::Invalid {
            field: "generation_number",
            message: format!("expected {expected}, got {}", circle.generation_number),
        });
    }
    if (circle.radius_km - state.next_radius_km).abs() > RADIUS_TOLERANCE_KM {
        return Err(ResponseError::Invalid {
            field: "radius_km",
            message: format!(
                "expected {:.3} for generation #{expected}, got {:.3}",
                state.next_radius_km, circle.radius_km
            ),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSuccess {
    pub area: GeneratedArea,
    pub price: Cents,
    pub grant: GrantReason,
    pub next: Progression,
}

/// Everything a run touches besides the orchestrator's own collaborators.
pub struct GenerationContext<'a, R> {
    pub sync: &'a Synchronizer<R>,
    pub audit: &'a AuditLog,
    pub render: &'a RenderSurface,
    pub notices: &'a NoticeQueue,
    pub clock: &'a dyn Clock,
}

#[derive(Debug)]
pub struct AreaGenerationOrchestrator<G, E, P> {
    endpoint: G,
    gate: PaymentGate<E, P>,
    progression: RadiusProgression,
    pricing: StepPricing,
    counter_scope: CounterScope,
    in_flight: InFlightGuard,
}

impl<G, E, P> AreaGenerationOrchestrator<G, E, P>
where
    G: GenerationEndpoint,
    E: EntitlementProvider,
    P: PaymentProcessor,
{
    pub fn new(endpoint: G, gate: PaymentGate<E, P>, config: &EngineConfig) -> Self {
        Self {
            endpoint,
            gate,
            progression: config.progression,
            pricing: config.pricing.map_area,
            counter_scope: config.counter_scope,
            in_flight: InFlightGuard::new(),
        }
    }

    pub fn endpoint(&self) -> &G {
        &self.endpoint
    }

    pub fn gate(&self) -> &PaymentGate<E, P> {
        &self.gate
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_busy()
    }

    pub fn progression(&self) -> &RadiusProgression {
        &self.progression
    }

    pub fn pricing(&self) -> &StepPricing {
        &self.pricing
    }

    /// Re-derived from the store on every call; counts are never cached.
    pub async fn generation_state<R: RemoteStore>(
        &self,
        sync: &Synchronizer<R>,
    ) -> Result<GenerationState, RemoteError> {
        let count = sync.generation_count(self.counter_scope).await?;
        Ok(GenerationState::derive(
            sync.owner().clone(),
            count,
            &self.progression,
            &self.pricing,
        ))
    }

    pub async fn generate<R: RemoteStore>(
        &self,
        ctx: &GenerationContext<'_, R>,
        center: LatLng,
    ) -> Result<GenerationSuccess, GenerationError> {
        let owner = ctx.sync.owner().clone();
        let result = match self.in_flight.try_acquire() {
            Some(_ticket) => self.run(ctx, &owner, center).await,
            None => Err(GenerationError::AlreadyInFlight),
        };

        match &result {
            Ok(success) => {
                if ctx.render.is_mounted() {
                    ctx.notices.info(
                        format!(
                            "Search area #{} generated ({:.1} km radius).",
                            success.area.generation_number, success.area.radius_km
                        ),
                        ctx.clock.now(),
                    );
                }
            }
            Err(error) => {
                let kind = error.audit_kind();
                ctx.audit
                    .record(&owner, kind, error.to_string(), ctx.clock.now());
                warn!(
                    owner = %owner,
                    kind = %kind,
                    retryable = error.is_retryable(),
                    error = %error,
                    "area_generation_failed"
                );
                if ctx.render.is_mounted() {
                    ctx.notices.error(error.user_message(), ctx.clock.now());
                }
            }
        }

        ctx.audit.flush_to(ctx.sync).await;
        result
    }

    async fn run<R: RemoteStore>(
        &self,
        ctx: &GenerationContext<'_, R>,
        owner: &OwnerId,
        center: LatLng,
    ) -> Result<GenerationSuccess, GenerationError> {
        center.validate().map_err(ValidationError::from)?;

        let state = self
            .generation_state(ctx.sync)
            .await
            .map_err(GenerationError::Connection)?;
        let price = state.next_price;
        ctx.audit.record(
            owner,
            AuditKind::GenerationAttempt,
            format!(
                "generation #{} at {:.5},{:.5} priced {price}",
                state.next_generation_number(),
                center.lat,
                center.lng
            ),
            ctx.clock.now(),
        );
        info!(
            owner = %owner,
            generation_count = state.generation_count,
            price = %price,
            "area_generation_started"
        );

        let grant = match self
            .gate
            .ensure_entitlement(owner, price, ctx.audit, ctx.clock)
            .await?
        {
            GateDecision::Granted(grant) => grant,
            GateDecision::Denied(reason) => return Err(GenerationError::PaymentDenied(reason)),
        };

        let request = GenerationRequest {
            owner_id: owner.clone(),
            coordinates: center,
        };
        let response = self
            .endpoint
            .generate(&request)
            .await
            .map_err(GenerationError::Connection)?;
        let circle = response.into_circle()?;
        confirm_progression(&circle, &state).inspect_err(|error| {
            warn!(owner = %owner, error = %error, "generation_progression_mismatch");
        })?;

        let created_at = ctx.clock.now();
        let area = GeneratedArea {
            id: RecordId::generate(),
            owner_id: owner.clone(),
            center: circle.center,
            radius_km: state.next_radius_km,
            generation_number: state.next_generation_number(),
            period_tag: PeriodTag::of(created_at),
            is_active: true,
            created_at,
        };
        let area = ctx
            .sync
            .record_generated_area(area)
            .await
            .map_err(GenerationError::Persistence)?;

        let message = format!(
            "Search area #{} is ready: {:.1} km around {:.4}, {:.4}.",
            area.generation_number, area.radius_km, area.center.lat, area.center.lng
        );
        if let Err(error) = ctx
            .sync
            .insert_notification("New search area", &message)
            .await
        {
            warn!(owner = %owner, error = %error, "generation_notification_failed");
        }
        ctx.audit.record(
            owner,
            AuditKind::GenerationSuccess,
            format!(
                "generation #{} radius {:.3} km charged {price} ({grant:?})",
                area.generation_number, area.radius_km
            ),
            ctx.clock.now(),
        );
        info!(
            owner = %owner,
            generation_number = area.generation_number,
            radius_km = area.radius_km,
            "area_generation_succeeded"
        );

        ctx.sync.reconcile_after_write().await;
        if ctx.render.is_mounted() {
            ctx.render.prune(&ctx.sync.lists());
            ctx.render.fit_to_circle(area.center, area.radius_km);
        } else {
            debug!(owner = %owner, "view_unmounted_skipping_fit");
        }

        Ok(GenerationSuccess {
            area,
            price,
            grant,
            next: compute_progression(
                &self.progression,
                &self.pricing,
                state.generation_count.saturating_add(1),
            ),
        })
    }
}
