use std::rc::Rc;

use thiserror::Error;
use tracing::info;

use crate::audit::{AuditKind, AuditLog};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{RemoteError, SyncError, ValidationError};
use crate::gate::{EntitlementProvider, PaymentGate, PaymentProcessor};
use crate::generation::{
    AreaGenerationOrchestrator, GenerationContext, GenerationEndpoint, GenerationError,
    GenerationSuccess,
};
use crate::geo::{GeoBounds, LatLng};
use crate::lifecycle::Liveness;
use crate::mode::{ClickAction, InteractionMode, ModeController};
use crate::model::{Cents, MapPoint, OwnerId, PendingPoint, RecordId, SearchArea};
use crate::notice::{NoticeQueue, UserNotice};
use crate::pricing::{preview, PricingSurface, ProgressionPreview};
use crate::render::{ItemKind, ItemRef, RenderError, RenderFrame, RenderSurface};
use crate::sync::{
    LocalCache, ReconcileReport, RemoteStore, SearchAreaUpdate, StorageBackend, Synchronizer,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Ignored,
    PendingPointPlaced(PendingPoint),
    Generated(GenerationSuccess),
    GenerationFailed(GenerationError),
}

/// Collaborators and identity a session is built from.
pub struct SessionParts<R, E, P, G> {
    pub owner: OwnerId,
    pub backend: StorageBackend<R>,
    pub cache: LocalCache,
    pub entitlements: E,
    pub payments: P,
    pub endpoint: G,
    pub clock: Rc<dyn Clock>,
    pub map_center: LatLng,
}

/// One owner's map screen: mode, synchronized lists, generation, view state.
pub struct HuntSession<R, E, P, G> {
    config: EngineConfig,
    clock: Rc<dyn Clock>,
    sync: Synchronizer<R>,
    orchestrator: AreaGenerationOrchestrator<G, E, P>,
    audit: AuditLog,
    mode: ModeController,
    render: RenderSurface,
    notices: NoticeQueue,
    liveness: Liveness,
}

impl<R, E, P, G> HuntSession<R, E, P, G>
where
    R: RemoteStore,
    E: EntitlementProvider,
    P: PaymentProcessor,
    G: GenerationEndpoint,
{
    pub fn new(config: EngineConfig, parts: SessionParts<R, E, P, G>) -> Self {
        let liveness = Liveness::new();
        let sync = Synchronizer::new(
            parts.owner,
            parts.backend,
            parts.cache,
            &config,
            parts.clock.clone(),
        );
        let orchestrator = AreaGenerationOrchestrator::new(
            parts.endpoint,
            PaymentGate::new(parts.entitlements, parts.payments),
            &config,
        );
        Self {
            notices: NoticeQueue::new(config.notice_capacity),
            render: RenderSurface::new(parts.map_center, liveness.clone()),
            mode: ModeController::new(),
            audit: AuditLog::new(),
            clock: parts.clock,
            config,
            sync,
            orchestrator,
            liveness,
        }
    }

    pub fn owner(&self) -> &OwnerId {
        self.sync.owner()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sync(&self) -> &Synchronizer<R> {
        &self.sync
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn orchestrator(&self) -> &AreaGenerationOrchestrator<G, E, P> {
        &self.orchestrator
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode.mode()
    }

    pub async fn mount(&self) -> ReconcileReport {
        info!(owner = %self.owner(), backend = self.sync.backend().label(), "session_mounted");
        self.refresh().await
    }

    pub async fn refresh(&self) -> ReconcileReport {
        let report = self.sync.reconcile().await;
        if self.liveness.is_alive() {
            self.render.prune(&self.sync.lists());
            if report.remote_error.is_some() {
                self.notices.error(
                    "Could not reach the server; showing saved data.",
                    self.clock.now(),
                );
            }
        }
        report
    }

    pub async fn run_periodic_refresh(&self) -> u32 {
        self.sync.run_periodic_reconcile(&self.liveness).await
    }

    pub fn toggle_adding_point(&self) -> InteractionMode {
        self.mode.toggle_adding_point()
    }

    /// Arming prices the next generation from a fresh count, so the pending
    /// radius shown while placing matches what will be charged.
    pub async fn toggle_adding_area(&self) -> Result<InteractionMode, SessionError> {
        if self.mode.mode().is_placing_area() {
            self.mode.disarm();
            return Ok(self.mode.mode());
        }
        let state = self.orchestrator.generation_state(&self.sync).await?;
        Ok(self.mode.toggle_adding_area(&state))
    }

    /// A click while idle is a no-op, whatever its coordinates.
    pub async fn click(&self, at: LatLng) -> Result<ClickOutcome, SessionError> {
        match self.mode.click_action(at) {
            ClickAction::Ignored => Ok(ClickOutcome::Ignored),
            ClickAction::PlacePoint { at } => {
                at.validate().map_err(ValidationError::from)?;
                let pending = PendingPoint::at(at);
                self.render.set_pending_point(pending.clone())?;
                self.mode.disarm();
                Ok(ClickOutcome::PendingPointPlaced(pending))
            }
            ClickAction::GenerateArea { at, .. } => {
                let outcome = self.generate_at(at).await;
                self.mode.disarm();
                Ok(match outcome {
                    Ok(success) => ClickOutcome::Generated(success),
                    Err(error) => ClickOutcome::GenerationFailed(error),
                })
            }
        }
    }

    /// Generates around the current map centre.
    pub async fn buzz(&self) -> Result<GenerationSuccess, GenerationError> {
        self.generate_at(self.render.map_center()).await
    }

    pub fn map_center(&self) -> LatLng {
        self.render.map_center()
    }

    pub fn set_map_center(&self, center: LatLng) -> Result<(), SessionError> {
        center.validate().map_err(ValidationError::from)?;
        self.render.set_map_center(center)?;
        Ok(())
    }

    pub fn pending_point(&self) -> Option<PendingPoint> {
        self.render.pending_point()
    }

    pub fn edit_pending_point(&self, title: &str, note: &str) -> Result<(), SessionError> {
        self.render.edit_pending_point(title, note)?;
        Ok(())
    }

    /// Persists the pending point. On failure it stays pending so the user
    /// can retry or cancel.
    pub async fn save_pending_point(&self) -> Result<MapPoint, SessionError> {
        let pending = self
            .render
            .pending_point()
            .ok_or(ValidationError::NoPendingPoint)?;
        let point = self.sync.create_map_point(&pending).await?;
        self.render.take_pending_point();
        self.notices
            .info(format!("Saved point \"{}\".", point.title), self.clock.now());
        Ok(point)
    }

    pub fn cancel_pending_point(&self) -> bool {
        self.render.take_pending_point().is_some()
    }

    pub async fn add_search_area(
        &self,
        center: LatLng,
        radius_m: f64,
        label: &str,
    ) -> Result<SearchArea, SessionError> {
        let area = self.sync.create_search_area(center, radius_m, label).await?;
        self.notices
            .info(format!("Added search area \"{}\".", area.label), self.clock.now());
        Ok(area)
    }

    pub async fn update_search_area(
        &self,
        id: RecordId,
        update: SearchAreaUpdate,
    ) -> Result<SearchArea, SessionError> {
        Ok(self.sync.update_search_area(id, update).await?)
    }

    pub async fn update_map_point(
        &self,
        id: RecordId,
        title: &str,
        note: &str,
    ) -> Result<MapPoint, SessionError> {
        Ok(self.sync.update_map_point(id, title, note).await?)
    }

    pub fn select(&self, id: RecordId) -> Result<ItemRef, SessionError> {
        Ok(self.render.select(&self.sync.lists(), id)?)
    }

    pub fn clear_selection(&self) {
        self.render.clear_selection();
    }

    pub fn arm_delete(&self, id: RecordId) -> Result<ItemRef, SessionError> {
        Ok(self.render.arm_delete(&self.sync.lists(), id)?)
    }

    pub async fn confirm_delete(&self, id: RecordId) -> Result<ItemRef, SessionError> {
        let item = self.render.confirm_delete(id)?;
        let result = match item.kind {
            ItemKind::SearchArea => self.sync.delete_search_area(id).await,
            ItemKind::MapPoint => self.sync.delete_map_point(id).await,
        };
        if let Err(error) = result {
            if self.liveness.is_alive() {
                self.notices
                    .error(format!("Delete failed: {error}."), self.clock.now());
            }
            return Err(error.into());
        }

        let kind = match item.kind {
            ItemKind::SearchArea => AuditKind::SearchAreaDeleted,
            ItemKind::MapPoint => AuditKind::MapPointDeleted,
        };
        self.audit
            .record(self.owner(), kind, id.to_string(), self.clock.now());
        self.render.forget(id);
        self.flush_audit().await;
        Ok(item)
    }

    pub async fn preview(&self) -> Result<ProgressionPreview, SessionError> {
        let count = self.sync.generation_count(self.config.counter_scope).await?;
        Ok(preview(
            &self.config.progression,
            &self.config.pricing.map_area,
            count,
        ))
    }

    pub fn quote(&self, surface: PricingSurface, counter: u32) -> Cents {
        self.config.pricing.quote(surface, counter)
    }

    pub fn frame(&self) -> RenderFrame {
        let lists = self.sync.lists();
        self.render.prune(&lists);
        self.render.frame(&lists)
    }

    pub fn take_fit_request(&self) -> Option<GeoBounds> {
        self.render.take_fit_request()
    }

    pub fn drain_notices(&self) -> Vec<UserNotice> {
        self.notices.drain()
    }

    pub async fn flush_audit(&self) -> usize {
        self.audit.flush_to(&self.sync).await
    }

    pub fn tear_down(&self) {
        self.liveness.tear_down();
        self.mode.disarm();
        info!(owner = %self.owner(), "session_torn_down");
    }

    async fn generate_at(&self, at: LatLng) -> Result<GenerationSuccess, GenerationError> {
        let ctx = GenerationContext {
            sync: &self.sync,
            audit: &self.audit,
            render: &self.render,
            notices: &self.notices,
            clock: self.clock.as_ref(),
        };
        self.orchestrator.generate(&ctx, at).await
    }
}
