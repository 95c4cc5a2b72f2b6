//! In-process stand-ins for the remote collaborators. Used by the console
//! binary and by tests; every simulator is a cheap clonable handle so a
//! test can keep one copy for inspection and failure injection.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::audit::{AuditChannel, AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::config::{CounterScope, EngineConfig};
use crate::error::RemoteError;
use crate::gate::{
    EntitlementProvider, EntitlementStatus, PaymentOutcome, PaymentProcessor, PaymentRequest,
};
use crate::generation::{GenerationEndpoint, GenerationRequest, GenerationResponse};
use crate::model::{
    GeneratedArea, MapPoint, Notification, OwnerId, PeriodTag, RecordId, SearchArea,
};
use crate::pricing::RadiusProgression;
use crate::sync::{LocalCache, RemoteStore};

#[derive(Debug, Default)]
struct MemoryCollections {
    search_areas: Vec<SearchArea>,
    generated_areas: Vec<GeneratedArea>,
    map_points: Vec<MapPoint>,
    notifications: Vec<Notification>,
    abuse_log: Vec<AuditEvent>,
    generation_log: Vec<AuditEvent>,
    read_failure: Option<RemoteError>,
    write_failure: Option<RemoteError>,
    read_latency: Duration,
    fetches: u32,
}

/// Authoritative store kept in memory. Reads snapshot the collections when
/// issued and return them after `read_latency`, so writes landing during
/// the delay are not visible in that read.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Rc<RefCell<MemoryCollections>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, failure: Option<RemoteError>) {
        self.inner.borrow_mut().read_failure = failure;
    }

    pub fn fail_writes(&self, failure: Option<RemoteError>) {
        self.inner.borrow_mut().write_failure = failure;
    }

    pub fn set_read_latency(&self, latency: Duration) {
        self.inner.borrow_mut().read_latency = latency;
    }

    pub fn fetch_count(&self) -> u32 {
        self.inner.borrow().fetches
    }

    pub fn search_areas(&self) -> Vec<SearchArea> {
        self.inner.borrow().search_areas.clone()
    }

    pub fn generated_areas(&self) -> Vec<GeneratedArea> {
        self.inner.borrow().generated_areas.clone()
    }

    pub fn map_points(&self) -> Vec<MapPoint> {
        self.inner.borrow().map_points.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.borrow().notifications.clone()
    }

    pub fn abuse_log(&self) -> Vec<AuditEvent> {
        self.inner.borrow().abuse_log.clone()
    }

    pub fn generation_log(&self) -> Vec<AuditEvent> {
        self.inner.borrow().generation_log.clone()
    }

    /// Writes a row directly, as another client of the same store would.
    pub fn seed_search_area(&self, area: SearchArea) {
        self.inner.borrow_mut().search_areas.push(area);
    }

    pub fn seed_generated_area(&self, area: GeneratedArea) {
        self.inner.borrow_mut().generated_areas.push(area);
    }

    pub fn seed_map_point(&self, point: MapPoint) {
        self.inner.borrow_mut().map_points.push(point);
    }

    async fn read<T, F>(&self, select: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&MemoryCollections) -> T,
    {
        let (snapshot, latency) = {
            let mut inner = self.inner.borrow_mut();
            if let Some(failure) = inner.read_failure.clone() {
                return Err(failure);
            }
            inner.fetches = inner.fetches.saturating_add(1);
            (select(&*inner), inner.read_latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(snapshot)
    }

    fn write<T, F>(&self, apply: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&mut MemoryCollections) -> Result<T, RemoteError>,
    {
        let mut inner = self.inner.borrow_mut();
        if let Some(failure) = inner.write_failure.clone() {
            return Err(failure);
        }
        apply(&mut *inner)
    }
}

fn owned_by<T: Clone>(
    items: &[T],
    owner: &OwnerId,
    owner_of: impl Fn(&T) -> &OwnerId,
) -> Vec<T> {
    items
        .iter()
        .filter(|item| owner_of(item) == owner)
        .cloned()
        .collect()
}

fn replace_owned<T>(
    items: &mut [T],
    item: &T,
    matches: impl Fn(&T) -> bool,
    id: RecordId,
) -> Result<(), RemoteError>
where
    T: Clone,
{
    let slot = items
        .iter_mut()
        .find(|existing| matches(existing))
        .ok_or(RemoteError::NotFound(id))?;
    *slot = item.clone();
    Ok(())
}

fn remove_owned<T>(
    items: &mut Vec<T>,
    matches: impl Fn(&T) -> bool,
    id: RecordId,
) -> Result<(), RemoteError> {
    let before = items.len();
    items.retain(|item| !matches(item));
    if items.len() == before {
        return Err(RemoteError::NotFound(id));
    }
    Ok(())
}

impl RemoteStore for MemoryRemote {
    async fn fetch_search_areas(&self, owner: &OwnerId) -> Result<Vec<SearchArea>, RemoteError> {
        self.read(|inner| owned_by(&inner.search_areas, owner, |area| &area.owner_id))
            .await
    }

    async fn insert_search_area(&self, area: &SearchArea) -> Result<SearchArea, RemoteError> {
        self.write(|inner| {
            inner.search_areas.push(area.clone());
            Ok(area.clone())
        })
    }

    async fn update_search_area(&self, area: &SearchArea) -> Result<SearchArea, RemoteError> {
        self.write(|inner| {
            replace_owned(
                &mut inner.search_areas,
                area,
                |existing| existing.id == area.id && existing.owner_id == area.owner_id,
                area.id,
            )?;
            Ok(area.clone())
        })
    }

    async fn delete_search_area(&self, owner: &OwnerId, id: RecordId) -> Result<(), RemoteError> {
        self.write(|inner| {
            remove_owned(
                &mut inner.search_areas,
                |area| area.id == id && &area.owner_id == owner,
                id,
            )
        })
    }

    async fn fetch_generated_areas(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<GeneratedArea>, RemoteError> {
        self.read(|inner| owned_by(&inner.generated_areas, owner, |area| &area.owner_id))
            .await
    }

    async fn insert_generated_area(
        &self,
        area: &GeneratedArea,
    ) -> Result<GeneratedArea, RemoteError> {
        self.write(|inner| {
            inner.generated_areas.push(area.clone());
            Ok(area.clone())
        })
    }

    async fn count_generated_areas(
        &self,
        owner: &OwnerId,
        period: Option<PeriodTag>,
    ) -> Result<u32, RemoteError> {
        self.read(|inner| {
            let count = inner
                .generated_areas
                .iter()
                .filter(|area| &area.owner_id == owner)
                .filter(|area| period.map_or(true, |period| area.period_tag == period))
                .count();
            u32::try_from(count).unwrap_or(u32::MAX)
        })
        .await
    }

    async fn fetch_map_points(&self, owner: &OwnerId) -> Result<Vec<MapPoint>, RemoteError> {
        self.read(|inner| owned_by(&inner.map_points, owner, |point| &point.owner_id))
            .await
    }

    async fn insert_map_point(&self, point: &MapPoint) -> Result<MapPoint, RemoteError> {
        self.write(|inner| {
            inner.map_points.push(point.clone());
            Ok(point.clone())
        })
    }

    async fn update_map_point(&self, point: &MapPoint) -> Result<MapPoint, RemoteError> {
        self.write(|inner| {
            replace_owned(
                &mut inner.map_points,
                point,
                |existing| existing.id == point.id && existing.owner_id == point.owner_id,
                point.id,
            )?;
            Ok(point.clone())
        })
    }

    async fn delete_map_point(&self, owner: &OwnerId, id: RecordId) -> Result<(), RemoteError> {
        self.write(|inner| {
            remove_owned(
                &mut inner.map_points,
                |point| point.id == id && &point.owner_id == owner,
                id,
            )
        })
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), RemoteError> {
        self.write(|inner| {
            inner.notifications.push(notification.clone());
            Ok(())
        })
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RemoteError> {
        self.write(|inner| {
            match event.channel() {
                AuditChannel::Abuse => inner.abuse_log.push(event.clone()),
                AuditChannel::Generation => inner.generation_log.push(event.clone()),
            }
            Ok(())
        })
    }
}

impl AuditSink for MemoryRemote {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RemoteError> {
        RemoteStore::append_audit_event(self, event).await
    }
}

#[derive(Debug, Default)]
struct EntitlementState {
    status: Cell<EntitlementStatus>,
    failure: RefCell<Option<RemoteError>>,
    queries: Cell<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SimEntitlements {
    state: Rc<EntitlementState>,
}

impl SimEntitlements {
    pub fn new(status: EntitlementStatus) -> Self {
        let entitlements = Self::default();
        entitlements.set_status(status);
        entitlements
    }

    pub fn set_status(&self, status: EntitlementStatus) {
        self.state.status.set(status);
    }

    pub fn fail_with(&self, failure: Option<RemoteError>) {
        *self.state.failure.borrow_mut() = failure;
    }

    pub fn queries(&self) -> u32 {
        self.state.queries.get()
    }
}

impl EntitlementProvider for SimEntitlements {
    async fn entitlement_for(&self, owner: &OwnerId) -> Result<EntitlementStatus, RemoteError> {
        self.state.queries.set(self.state.queries.get().saturating_add(1));
        if let Some(failure) = self.state.failure.borrow().clone() {
            return Err(failure);
        }
        let status = self.state.status.get();
        debug!(owner = %owner, ?status, "sim_entitlement_lookup");
        Ok(status)
    }
}

#[derive(Debug)]
struct PaymentState {
    outcome: RefCell<Result<PaymentOutcome, RemoteError>>,
    latency: Cell<Duration>,
    requests: RefCell<Vec<PaymentRequest>>,
}

/// Payment flow that resolves to a fixed outcome after an optional delay
/// standing in for the user completing the checkout.
#[derive(Debug, Clone)]
pub struct SimPaymentProcessor {
    state: Rc<PaymentState>,
}

impl SimPaymentProcessor {
    pub fn with_outcome(outcome: PaymentOutcome) -> Self {
        Self {
            state: Rc::new(PaymentState {
                outcome: RefCell::new(Ok(outcome)),
                latency: Cell::new(Duration::ZERO),
                requests: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn approving() -> Self {
        Self::with_outcome(PaymentOutcome::Confirmed)
    }

    pub fn set_outcome(&self, outcome: Result<PaymentOutcome, RemoteError>) {
        *self.state.outcome.borrow_mut() = outcome;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.latency.set(latency);
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.state.requests.borrow().clone()
    }
}

impl PaymentProcessor for SimPaymentProcessor {
    async fn request_payment(
        &self,
        owner: &OwnerId,
        request: PaymentRequest,
    ) -> Result<PaymentOutcome, RemoteError> {
        self.state.requests.borrow_mut().push(request);
        debug!(owner = %owner, amount = %request.amount, "sim_payment_requested");
        let latency = self.state.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.outcome.borrow().clone()
    }
}

/// Stored generated-area count the simulated endpoint numbers from, the
/// way a real endpoint reads its own table.
pub trait GenerationTally {
    fn generated_area_count(&self, owner: &OwnerId, period: Option<PeriodTag>) -> u32;
}

impl GenerationTally for MemoryRemote {
    fn generated_area_count(&self, owner: &OwnerId, period: Option<PeriodTag>) -> u32 {
        let inner = self.inner.borrow();
        let count = inner
            .generated_areas
            .iter()
            .filter(|area| &area.owner_id == owner)
            .filter(|area| period.map_or(true, |period| area.period_tag == period))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

impl GenerationTally for LocalCache {
    fn generated_area_count(&self, owner: &OwnerId, period: Option<PeriodTag>) -> u32 {
        self.count_generated_areas(owner, period)
    }
}

struct EndpointState {
    progression: RadiusProgression,
    counter_scope: CounterScope,
    tally: Rc<dyn GenerationTally>,
    clock: Rc<dyn Clock>,
    scripted: RefCell<VecDeque<Result<GenerationResponse, RemoteError>>>,
    requests: RefCell<Vec<GenerationRequest>>,
    latency: Cell<Duration>,
}

/// Generation endpoint. Serves scripted replies first; once the script is
/// empty it succeeds at the requested coordinates, numbered and sized from
/// the owner's stored generated areas under the configured counter scope.
#[derive(Clone)]
pub struct SimGenerationEndpoint {
    state: Rc<EndpointState>,
}

impl fmt::Debug for SimGenerationEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimGenerationEndpoint")
            .field("counter_scope", &self.state.counter_scope)
            .field("requests", &self.state.requests.borrow().len())
            .finish_non_exhaustive()
    }
}

impl SimGenerationEndpoint {
    pub fn new(
        tally: Rc<dyn GenerationTally>,
        config: &EngineConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            state: Rc::new(EndpointState {
                progression: config.progression,
                counter_scope: config.counter_scope,
                tally,
                clock,
                scripted: RefCell::new(VecDeque::new()),
                requests: RefCell::new(Vec::new()),
                latency: Cell::new(Duration::ZERO),
            }),
        }
    }

    pub fn script(&self, reply: Result<GenerationResponse, RemoteError>) {
        self.state.scripted.borrow_mut().push_back(reply);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.latency.set(latency);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.state.requests.borrow().clone()
    }

    fn prior_generations(&self, owner: &OwnerId) -> u32 {
        let period = match self.state.counter_scope {
            CounterScope::Lifetime => None,
            CounterScope::Weekly => Some(PeriodTag::of(self.state.clock.now())),
        };
        self.state.tally.generated_area_count(owner, period)
    }
}

impl GenerationEndpoint for SimGenerationEndpoint {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, RemoteError> {
        self.state.requests.borrow_mut().push(request.clone());
        let latency = self.state.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(reply) = self.state.scripted.borrow_mut().pop_front() {
            return reply;
        }
        let prior = self.prior_generations(&request.owner_id);
        Ok(GenerationResponse::success(
            request.coordinates,
            self.state.progression.radius_km(prior),
            prior.saturating_add(1),
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::LatLng;

    fn area(owner: &str) -> SearchArea {
        SearchArea {
            id: RecordId::generate(),
            owner_id: OwnerId::new(owner),
            center: LatLng { lat: 45.0, lng: 9.0 },
            radius_m: 500.0,
            label: "field".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn fetch_only_returns_the_owners_rows() {
        let remote = MemoryRemote::new();
        remote.seed_search_area(area("alice"));
        remote.seed_search_area(area("bob"));

        let rows = remote
            .fetch_search_areas(&OwnerId::new("alice"))
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn delete_of_foreign_row_is_not_found() {
        let remote = MemoryRemote::new();
        let foreign = area("bob");
        remote.seed_search_area(foreign.clone());

        let result = remote
            .delete_search_area(&OwnerId::new("alice"), foreign.id)
            .await;
        assert_eq!(result, Err(RemoteError::NotFound(foreign.id)));
        assert_eq!(remote.search_areas().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_block_reads_and_writes() {
        let remote = MemoryRemote::new();
        remote.fail_reads(Some(RemoteError::Timeout(100)));
        remote.fail_writes(Some(RemoteError::Network("down".to_string())));

        assert_eq!(
            remote.fetch_map_points(&OwnerId::new("alice")).await,
            Err(RemoteError::Timeout(100))
        );
        assert!(remote.insert_search_area(&area("alice")).await.is_err());
        assert!(remote.search_areas().is_empty());
    }

    fn endpoint_over(remote: &MemoryRemote, config: &EngineConfig) -> SimGenerationEndpoint {
        SimGenerationEndpoint::new(
            Rc::new(remote.clone()),
            config,
            Rc::new(ManualClock::starting_at(
                Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap(),
            )),
        )
    }

    fn generated(owner: &str, number: u32, days_ago: i64) -> GeneratedArea {
        let created_at = Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap()
            - chrono::Duration::days(days_ago);
        GeneratedArea {
            id: RecordId::generate(),
            owner_id: OwnerId::new(owner),
            center: LatLng { lat: 45.0, lng: 9.0 },
            radius_km: 500.0,
            generation_number: number,
            period_tag: PeriodTag::of(created_at),
            is_active: true,
            created_at,
        }
    }

    #[tokio::test]
    async fn endpoint_numbers_from_the_owners_stored_rows_not_calls_served() {
        let remote = MemoryRemote::new();
        remote.seed_generated_area(generated("bob", 1, 0));
        let endpoint = endpoint_over(&remote, &EngineConfig::default());
        endpoint.script(Ok(GenerationResponse::failure("busy")));
        let request = GenerationRequest {
            owner_id: OwnerId::new("alice"),
            coordinates: LatLng { lat: 10.0, lng: 20.0 },
        };

        let first = endpoint.generate(&request).await.expect("first");
        assert!(!first.success);

        let second = endpoint.generate(&request).await.expect("second");
        assert_eq!(second.generation_number, Some(1));
        assert_eq!(second.radius_km, Some(500.0));
        assert_eq!(second.lat, Some(10.0));
        assert_eq!(endpoint.requests().len(), 2);

        remote.seed_generated_area(generated("alice", 1, 0));
        let third = endpoint.generate(&request).await.expect("third");
        assert_eq!(third.generation_number, Some(2));
        assert_eq!(third.radius_km, Some(350.0));
    }

    #[tokio::test]
    async fn weekly_endpoint_ignores_earlier_weeks() {
        let remote = MemoryRemote::new();
        remote.seed_generated_area(generated("alice", 1, 14));
        remote.seed_generated_area(generated("alice", 1, 0));
        let config = EngineConfig {
            counter_scope: CounterScope::Weekly,
            ..EngineConfig::default()
        };
        let endpoint = endpoint_over(&remote, &config);

        let reply = endpoint
            .generate(&GenerationRequest {
                owner_id: OwnerId::new("alice"),
                coordinates: LatLng { lat: 10.0, lng: 20.0 },
            })
            .await
            .expect("reply");
        assert_eq!(reply.generation_number, Some(2));
    }
}
