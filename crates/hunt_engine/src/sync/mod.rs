//! Area/point persistence synchronizer.
//!
//! Reads always go to the configured backend first; the local cache is only
//! consulted for the local-only backend or when the remote fetch fails.
//! Writes are remote-first: the in-memory lists and the cache change only
//! after the remote store accepted the write.

mod cache;
mod reconcile;
mod store;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::config::{CounterScope, EngineConfig, SearchAreaLimits, SyncConfig};
use crate::error::{RemoteError, SyncError, ValidationError};
use crate::geo::LatLng;
use crate::lifecycle::Liveness;
use crate::model::{
    GeneratedArea, MapPoint, Notification, OwnerId, PendingPoint, PeriodTag, RecordId, SearchArea,
};

pub use cache::{CacheError, LocalCache, OwnerSnapshot};
pub use reconcile::{FetchTicket, MergeOutcome, ReconciledList, SyncRecord};
pub use store::{RemoteStore, StorageBackend};

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Remote,
    LocalOnly,
    CacheFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub source: FetchSource,
    pub search_areas: MergeOutcome,
    pub generated_areas: MergeOutcome,
    pub map_points: MergeOutcome,
    pub remote_error: Option<RemoteError>,
}

impl ReconcileReport {
    pub fn is_stale(&self) -> bool {
        [self.search_areas, self.generated_areas, self.map_points]
            .iter()
            .all(|outcome| *outcome == MergeOutcome::Stale)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncedLists {
    pub search_areas: Vec<SearchArea>,
    pub generated_areas: Vec<GeneratedArea>,
    pub map_points: Vec<MapPoint>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchAreaUpdate {
    pub label: Option<String>,
    pub radius_m: Option<f64>,
}

pub struct Synchronizer<R> {
    owner: OwnerId,
    backend: StorageBackend<R>,
    cache: LocalCache,
    sync_config: SyncConfig,
    limits: SearchAreaLimits,
    clock: Rc<dyn Clock>,
    write_seq: Cell<u64>,
    search_areas: RefCell<ReconciledList<SearchArea>>,
    generated_areas: RefCell<ReconciledList<GeneratedArea>>,
    map_points: RefCell<ReconciledList<MapPoint>>,
}

impl<R: RemoteStore> Synchronizer<R> {
    pub fn new(
        owner: OwnerId,
        backend: StorageBackend<R>,
        cache: LocalCache,
        config: &EngineConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        info!(owner = %owner, backend = backend.label(), "synchronizer_created");
        Self {
            owner,
            backend,
            cache,
            sync_config: config.sync,
            limits: config.search_area,
            clock,
            write_seq: Cell::new(0),
            search_areas: RefCell::new(ReconciledList::default()),
            generated_areas: RefCell::new(ReconciledList::default()),
            map_points: RefCell::new(ReconciledList::default()),
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn backend(&self) -> &StorageBackend<R> {
        &self.backend
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn limits(&self) -> SearchAreaLimits {
        self.limits
    }

    pub fn lists(&self) -> SyncedLists {
        SyncedLists {
            search_areas: self.search_areas.borrow().records().to_vec(),
            generated_areas: self.generated_areas.borrow().records().to_vec(),
            map_points: self.map_points.borrow().records().to_vec(),
        }
    }

    pub fn search_area(&self, id: RecordId) -> Option<SearchArea> {
        self.search_areas.borrow().get(id).cloned()
    }

    pub fn map_point(&self, id: RecordId) -> Option<MapPoint> {
        self.map_points.borrow().get(id).cloned()
    }

    pub fn latest_generated(&self) -> Option<GeneratedArea> {
        self.generated_areas.borrow().latest().cloned()
    }

    pub fn pending_overlays(&self) -> usize {
        self.search_areas.borrow().pending_overlays()
            + self.generated_areas.borrow().pending_overlays()
            + self.map_points.borrow().pending_overlays()
    }

    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket {
            started_at_seq: self.write_seq.get(),
        }
    }

    /// Re-fetches every collection and replaces the in-memory lists, keeping
    /// local writes the fetch cannot have observed yet.
    pub async fn reconcile(&self) -> ReconcileReport {
        let ticket = self.begin_fetch();
        let (source, fetched, remote_error) = match &self.backend {
            StorageBackend::Remote(remote) => match self.fetch_remote(remote).await {
                Ok(lists) => (FetchSource::Remote, lists, None),
                Err(error) => {
                    warn!(
                        owner = %self.owner,
                        error = %error,
                        "remote_fetch_failed_using_local_cache"
                    );
                    (FetchSource::CacheFallback, self.cached_lists(), Some(error))
                }
            },
            StorageBackend::LocalOnly => (FetchSource::LocalOnly, self.cached_lists(), None),
        };

        let max_unconfirmed = self.sync_config.max_unconfirmed_fetches;
        let report = ReconcileReport {
            source,
            search_areas: self.search_areas.borrow_mut().apply_fetch(
                ticket,
                fetched.search_areas,
                max_unconfirmed,
            ),
            generated_areas: self.generated_areas.borrow_mut().apply_fetch(
                ticket,
                fetched.generated_areas,
                max_unconfirmed,
            ),
            map_points: self.map_points.borrow_mut().apply_fetch(
                ticket,
                fetched.map_points,
                max_unconfirmed,
            ),
            remote_error,
        };

        if report.is_stale() {
            debug!(
                owner = %self.owner,
                fetch_seq = ticket.started_at_seq(),
                "reconcile_result_stale_discarded"
            );
            return report;
        }

        if source == FetchSource::Remote {
            let lists = self.lists();
            self.cache.replace_lists(
                &self.owner,
                lists.search_areas,
                lists.generated_areas,
                lists.map_points,
            );
        }
        debug!(
            owner = %self.owner,
            source = ?source,
            fetch_seq = ticket.started_at_seq(),
            pending_overlays = self.pending_overlays(),
            "reconcile_applied"
        );
        report
    }

    /// Reconciles after the configured delay, giving the remote store time to
    /// propagate the write that was just made.
    pub async fn reconcile_after_write(&self) -> ReconcileReport {
        let delay = self.sync_config.reconcile_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.reconcile().await
    }

    /// Periodic refresh until `liveness` is torn down. Returns the number of
    /// reconciliations performed.
    pub async fn run_periodic_reconcile(&self, liveness: &Liveness) -> u32 {
        let period = self.sync_config.refresh_interval().max(MIN_REFRESH_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0u32;
        loop {
            ticker.tick().await;
            if !liveness.is_alive() {
                debug!(owner = %self.owner, runs, "periodic_reconcile_stopped");
                return runs;
            }
            self.reconcile().await;
            runs = runs.saturating_add(1);
        }
    }

    pub async fn generation_count(&self, scope: CounterScope) -> Result<u32, RemoteError> {
        let period = match scope {
            CounterScope::Lifetime => None,
            CounterScope::Weekly => Some(PeriodTag::of(self.clock.now())),
        };
        match &self.backend {
            StorageBackend::Remote(remote) => remote.count_generated_areas(&self.owner, period).await,
            StorageBackend::LocalOnly => Ok(self.cache.count_generated_areas(&self.owner, period)),
        }
    }

    pub async fn create_search_area(
        &self,
        center: LatLng,
        radius_m: f64,
        label: &str,
    ) -> Result<SearchArea, SyncError> {
        center.validate().map_err(ValidationError::from)?;
        let label = validate_label(label)?;
        validate_radius(radius_m, self.limits)?;

        let draft = SearchArea {
            id: RecordId::generate(),
            owner_id: self.owner.clone(),
            center,
            radius_m,
            label,
            created_at: self.clock.now(),
        };
        let stored = match &self.backend {
            StorageBackend::Remote(remote) => remote.insert_search_area(&draft).await?,
            StorageBackend::LocalOnly => draft,
        };

        self.cache.upsert_search_area(&stored);
        let seq = self.next_write_seq();
        self.search_areas
            .borrow_mut()
            .apply_local_upsert(seq, stored.clone());
        info!(owner = %self.owner, area_id = %stored.id, radius_m, "search_area_created");
        Ok(stored)
    }

    pub async fn update_search_area(
        &self,
        id: RecordId,
        update: SearchAreaUpdate,
    ) -> Result<SearchArea, SyncError> {
        let mut next = self.search_area(id).ok_or(SyncError::UnknownRecord(id))?;
        if let Some(label) = update.label.as_deref() {
            next.label = validate_label(label)?;
        }
        if let Some(radius_m) = update.radius_m {
            validate_radius(radius_m, self.limits)?;
            next.radius_m = radius_m;
        }

        let stored = match &self.backend {
            StorageBackend::Remote(remote) => remote.update_search_area(&next).await?,
            StorageBackend::LocalOnly => next,
        };

        self.cache.upsert_search_area(&stored);
        let seq = self.next_write_seq();
        self.search_areas
            .borrow_mut()
            .apply_local_upsert(seq, stored.clone());
        info!(owner = %self.owner, area_id = %id, "search_area_updated");
        Ok(stored)
    }

    pub async fn delete_search_area(&self, id: RecordId) -> Result<(), SyncError> {
        if self.search_area(id).is_none() {
            return Err(SyncError::UnknownRecord(id));
        }
        if let StorageBackend::Remote(remote) = &self.backend {
            remote.delete_search_area(&self.owner, id).await?;
        }

        self.cache.remove_search_area(&self.owner, id);
        let seq = self.next_write_seq();
        self.search_areas.borrow_mut().apply_local_delete(seq, id);
        info!(owner = %self.owner, area_id = %id, "search_area_deleted");
        Ok(())
    }

    pub async fn create_map_point(&self, pending: &PendingPoint) -> Result<MapPoint, SyncError> {
        pending.center.validate().map_err(ValidationError::from)?;
        let title = validate_title(&pending.title)?;

        let draft = MapPoint {
            id: RecordId::generate(),
            owner_id: self.owner.clone(),
            center: pending.center,
            title,
            note: pending.note.trim().to_string(),
            created_at: self.clock.now(),
        };
        let stored = match &self.backend {
            StorageBackend::Remote(remote) => remote.insert_map_point(&draft).await?,
            StorageBackend::LocalOnly => draft,
        };

        self.cache.upsert_map_point(&stored);
        let seq = self.next_write_seq();
        self.map_points
            .borrow_mut()
            .apply_local_upsert(seq, stored.clone());
        info!(owner = %self.owner, point_id = %stored.id, "map_point_created");
        Ok(stored)
    }

    pub async fn update_map_point(
        &self,
        id: RecordId,
        title: &str,
        note: &str,
    ) -> Result<MapPoint, SyncError> {
        let mut next = self.map_point(id).ok_or(SyncError::UnknownRecord(id))?;
        next.title = validate_title(title)?;
        next.note = note.trim().to_string();

        let stored = match &self.backend {
            StorageBackend::Remote(remote) => remote.update_map_point(&next).await?,
            StorageBackend::LocalOnly => next,
        };

        self.cache.upsert_map_point(&stored);
        let seq = self.next_write_seq();
        self.map_points
            .borrow_mut()
            .apply_local_upsert(seq, stored.clone());
        info!(owner = %self.owner, point_id = %id, "map_point_updated");
        Ok(stored)
    }

    pub async fn delete_map_point(&self, id: RecordId) -> Result<(), SyncError> {
        if self.map_point(id).is_none() {
            return Err(SyncError::UnknownRecord(id));
        }
        if let StorageBackend::Remote(remote) = &self.backend {
            remote.delete_map_point(&self.owner, id).await?;
        }

        self.cache.remove_map_point(&self.owner, id);
        let seq = self.next_write_seq();
        self.map_points.borrow_mut().apply_local_delete(seq, id);
        info!(owner = %self.owner, point_id = %id, "map_point_deleted");
        Ok(())
    }

    pub async fn record_generated_area(
        &self,
        area: GeneratedArea,
    ) -> Result<GeneratedArea, SyncError> {
        let stored = match &self.backend {
            StorageBackend::Remote(remote) => remote.insert_generated_area(&area).await?,
            StorageBackend::LocalOnly => area,
        };

        self.cache.upsert_generated_area(&stored);
        let seq = self.next_write_seq();
        self.generated_areas
            .borrow_mut()
            .apply_local_upsert(seq, stored.clone());
        info!(
            owner = %self.owner,
            area_id = %stored.id,
            generation_number = stored.generation_number,
            "generated_area_recorded"
        );
        Ok(stored)
    }

    pub async fn insert_notification(
        &self,
        title: &str,
        message: &str,
    ) -> Result<Notification, RemoteError> {
        let notification = Notification {
            id: RecordId::generate(),
            owner_id: self.owner.clone(),
            title: title.to_string(),
            message: message.to_string(),
            created_at: self.clock.now(),
        };
        if let StorageBackend::Remote(remote) = &self.backend {
            remote.insert_notification(&notification).await?;
        }
        self.cache.push_notification(&notification);
        Ok(notification)
    }

    fn next_write_seq(&self) -> u64 {
        let next = self.write_seq.get().saturating_add(1);
        self.write_seq.set(next);
        next
    }

    async fn fetch_remote(&self, remote: &R) -> Result<SyncedLists, RemoteError> {
        let search_areas = remote.fetch_search_areas(&self.owner).await?;
        let generated_areas = remote.fetch_generated_areas(&self.owner).await?;
        let map_points = remote.fetch_map_points(&self.owner).await?;
        Ok(SyncedLists {
            search_areas,
            generated_areas,
            map_points,
        })
    }

    fn cached_lists(&self) -> SyncedLists {
        let snapshot = self.cache.snapshot(&self.owner);
        SyncedLists {
            search_areas: snapshot.search_areas,
            generated_areas: snapshot.generated_areas,
            map_points: snapshot.map_points,
        }
    }
}

impl<R: RemoteStore> AuditSink for Synchronizer<R> {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RemoteError> {
        match &self.backend {
            StorageBackend::Remote(remote) => remote.append_audit_event(event).await,
            StorageBackend::LocalOnly => {
                self.cache.append_audit_event(event);
                Ok(())
            }
        }
    }
}

fn validate_label(label: &str) -> Result<String, ValidationError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyLabel);
    }
    Ok(trimmed.to_string())
}

fn validate_title(title: &str) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_radius(radius_m: f64, limits: SearchAreaLimits) -> Result<(), ValidationError> {
    if !radius_m.is_finite() || radius_m < limits.min_radius_m || radius_m > limits.max_radius_m {
        return Err(ValidationError::RadiusOutOfRange {
            radius_m,
            min_m: limits.min_radius_m,
            max_m: limits.max_radius_m,
        });
    }
    Ok(())
}
