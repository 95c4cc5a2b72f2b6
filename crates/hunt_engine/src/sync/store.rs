use crate::audit::AuditEvent;
use crate::error::RemoteError;
use crate::model::{
    GeneratedArea, MapPoint, Notification, OwnerId, PeriodTag, RecordId, SearchArea,
};

/// Authoritative remote collections, consumed as a black box.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    async fn fetch_search_areas(&self, owner: &OwnerId) -> Result<Vec<SearchArea>, RemoteError>;
    async fn insert_search_area(&self, area: &SearchArea) -> Result<SearchArea, RemoteError>;
    async fn update_search_area(&self, area: &SearchArea) -> Result<SearchArea, RemoteError>;
    async fn delete_search_area(&self, owner: &OwnerId, id: RecordId) -> Result<(), RemoteError>;

    async fn fetch_generated_areas(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<GeneratedArea>, RemoteError>;
    async fn insert_generated_area(
        &self,
        area: &GeneratedArea,
    ) -> Result<GeneratedArea, RemoteError>;
    /// Rows for `owner`, restricted to `period` when given.
    async fn count_generated_areas(
        &self,
        owner: &OwnerId,
        period: Option<PeriodTag>,
    ) -> Result<u32, RemoteError>;

    async fn fetch_map_points(&self, owner: &OwnerId) -> Result<Vec<MapPoint>, RemoteError>;
    async fn insert_map_point(&self, point: &MapPoint) -> Result<MapPoint, RemoteError>;
    async fn update_map_point(&self, point: &MapPoint) -> Result<MapPoint, RemoteError>;
    async fn delete_map_point(&self, owner: &OwnerId, id: RecordId) -> Result<(), RemoteError>;

    async fn insert_notification(&self, notification: &Notification) -> Result<(), RemoteError>;
    /// Routed to the abuse log or the generation audit log by the event's channel.
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RemoteError>;
}

/// Where the synchronizer reads and writes, fixed at construction.
/// `LocalOnly` serves identities with no remote row ownership (privileged
/// testers, offline demos); it never touches the network.
#[derive(Debug)]
pub enum StorageBackend<R> {
    Remote(R),
    LocalOnly,
}

impl<R> StorageBackend<R> {
    pub fn remote(&self) -> Option<&R> {
        match self {
            Self::Remote(store) => Some(store),
            Self::LocalOnly => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::LocalOnly => "local_only",
        }
    }
}
