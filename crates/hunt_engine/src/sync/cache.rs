use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::AuditEvent;
use crate::model::{GeneratedArea, MapPoint, Notification, OwnerId, PeriodTag, RecordId, SearchArea};

const CACHE_FILE_VERSION: u32 = 1;
/// Per-owner retention; the oldest entries are dropped first.
pub const MAX_CACHED_NOTIFICATIONS: usize = 50;
pub const MAX_CACHED_AUDIT_EVENTS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerSnapshot {
    pub search_areas: Vec<SearchArea>,
    pub generated_areas: Vec<GeneratedArea>,
    pub map_points: Vec<MapPoint>,
    pub notifications: Vec<Notification>,
    pub audit_events: Vec<AuditEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    owners: BTreeMap<OwnerId, OwnerSnapshot>,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse cache snapshot at {path}: {message}")]
    Parse { path: String, message: String },
    #[error("unsupported cache snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("failed to encode cache snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write cache snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ephemeral per-owner mirror of the remote collections. Serves the
/// local-only backend and the read fallback when the remote store errors.
/// Optionally persisted to a JSON snapshot file after every mutation.
/// Clones are handles onto the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    owners: Rc<RefCell<BTreeMap<OwnerId, OwnerSnapshot>>>,
    snapshot_path: Option<PathBuf>,
}

impl LocalCache {
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Opens a file-backed cache. A missing file starts empty.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let owners = match fs::read_to_string(path) {
            Ok(raw) => parse_cache_file(&raw)?.owners,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(CacheError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        info!(
            path = %path.display(),
            owner_count = owners.len(),
            "local_cache_opened"
        );
        Ok(Self {
            owners: Rc::new(RefCell::new(owners)),
            snapshot_path: Some(path.to_path_buf()),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn snapshot(&self, owner: &OwnerId) -> OwnerSnapshot {
        self.owners.borrow().get(owner).cloned().unwrap_or_default()
    }

    pub fn replace_lists(
        &self,
        owner: &OwnerId,
        search_areas: Vec<SearchArea>,
        generated_areas: Vec<GeneratedArea>,
        map_points: Vec<MapPoint>,
    ) {
        self.mutate(owner, |snapshot| {
            snapshot.search_areas = search_areas;
            snapshot.generated_areas = generated_areas;
            snapshot.map_points = map_points;
        });
    }

    pub fn upsert_search_area(&self, area: &SearchArea) {
        self.mutate(&area.owner_id, |snapshot| {
            upsert_by_id(&mut snapshot.search_areas, area.clone(), |item| item.id)
        });
    }

    pub fn remove_search_area(&self, owner: &OwnerId, id: RecordId) -> bool {
        let mut removed = false;
        self.mutate(owner, |snapshot| {
            removed = remove_by_id(&mut snapshot.search_areas, id, |item| item.id);
        });
        removed
    }

    pub fn upsert_generated_area(&self, area: &GeneratedArea) {
        self.mutate(&area.owner_id, |snapshot| {
            upsert_by_id(&mut snapshot.generated_areas, area.clone(), |item| item.id)
        });
    }

    pub fn count_generated_areas(&self, owner: &OwnerId, period: Option<PeriodTag>) -> u32 {
        let owners = self.owners.borrow();
        let Some(snapshot) = owners.get(owner) else {
            return 0;
        };
        let count = snapshot
            .generated_areas
            .iter()
            .filter(|area| period.map_or(true, |period| area.period_tag == period))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn upsert_map_point(&self, point: &MapPoint) {
        self.mutate(&point.owner_id, |snapshot| {
            upsert_by_id(&mut snapshot.map_points, point.clone(), |item| item.id)
        });
    }

    pub fn remove_map_point(&self, owner: &OwnerId, id: RecordId) -> bool {
        let mut removed = false;
        self.mutate(owner, |snapshot| {
            removed = remove_by_id(&mut snapshot.map_points, id, |item| item.id);
        });
        removed
    }

    pub fn push_notification(&self, notification: &Notification) {
        self.mutate(&notification.owner_id, |snapshot| {
            push_bounded(
                &mut snapshot.notifications,
                notification.clone(),
                MAX_CACHED_NOTIFICATIONS,
            )
        });
    }

    pub fn append_audit_event(&self, event: &AuditEvent) {
        self.mutate(&event.owner_id, |snapshot| {
            push_bounded(&mut snapshot.audit_events, event.clone(), MAX_CACHED_AUDIT_EVENTS)
        });
    }

    pub fn persist(&self) -> Result<(), CacheError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let file = CacheFile {
            version: CACHE_FILE_VERSION,
            owners: self.owners.borrow().clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(CacheError::Encode)?;
        replace_snapshot_file(path, &json).map_err(|source| CacheError::Write {
            path: path.clone(),
            source,
        })
    }

    fn mutate<F>(&self, owner: &OwnerId, apply: F)
    where
        F: FnOnce(&mut OwnerSnapshot),
    {
        {
            let mut owners = self.owners.borrow_mut();
            apply(owners.entry(owner.clone()).or_default());
        }
        if let Err(error) = self.persist() {
            warn!(owner = %owner, error = %error, "local_cache_persist_failed");
        }
    }
}

fn parse_cache_file(raw: &str) -> Result<CacheFile, CacheError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let file = serde_path_to_error::deserialize::<_, CacheFile>(&mut deserializer).map_err(
        |error| {
            let path = error.path().to_string();
            CacheError::Parse {
                path: if path.is_empty() { ".".to_string() } else { path },
                message: error.into_inner().to_string(),
            }
        },
    )?;
    if file.version != CACHE_FILE_VERSION {
        return Err(CacheError::Version {
            found: file.version,
            expected: CACHE_FILE_VERSION,
        });
    }
    Ok(file)
}

/// Stages the snapshot in a temp file beside `path` and renames it over the
/// old one. Readers never see a half-written cache.
fn replace_snapshot_file(path: &Path, json: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(json.as_bytes())?;
    staged.persist(path).map_err(|error| error.error)?;
    Ok(())
}

fn push_bounded<T>(items: &mut Vec<T>, item: T, cap: usize) {
    items.push(item);
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

fn upsert_by_id<T>(items: &mut Vec<T>, item: T, id_of: impl Fn(&T) -> RecordId) {
    let id = id_of(&item);
    match items.iter_mut().find(|existing| id_of(existing) == id) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn remove_by_id<T>(items: &mut Vec<T>, id: RecordId, id_of: impl Fn(&T) -> RecordId) -> bool {
    let before = items.len();
    items.retain(|item| id_of(item) != id);
    items.len() != before
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::audit::{AuditKind, AuditLog};
    use crate::geo::LatLng;

    fn area(owner: &str, label: &str) -> SearchArea {
        SearchArea {
            id: RecordId::generate(),
            owner_id: OwnerId::new(owner),
            center: LatLng { lat: 45.0, lng: 9.0 },
            radius_m: 1_000.0,
            label: label.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn owners_are_isolated() {
        let cache = LocalCache::ephemeral();
        cache.upsert_search_area(&area("alice", "a"));
        cache.upsert_search_area(&area("bob", "b"));

        assert_eq!(cache.snapshot(&OwnerId::new("alice")).search_areas.len(), 1);
        assert_eq!(cache.snapshot(&OwnerId::new("bob")).search_areas[0].label, "b");
        assert!(cache.snapshot(&OwnerId::new("carol")).search_areas.is_empty());
    }

    #[test]
    fn upsert_replaces_by_id_and_remove_reports_presence() {
        let cache = LocalCache::ephemeral();
        let owner = OwnerId::new("alice");
        let mut first = area("alice", "first");
        cache.upsert_search_area(&first);
        first.label = "renamed".to_string();
        cache.upsert_search_area(&first);

        let snapshot = cache.snapshot(&owner);
        assert_eq!(snapshot.search_areas.len(), 1);
        assert_eq!(snapshot.search_areas[0].label, "renamed");

        assert!(cache.remove_search_area(&owner, first.id));
        assert!(!cache.remove_search_area(&owner, first.id));
    }

    #[test]
    fn file_backed_cache_survives_reopen() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("cache").join("areas.json");
        let stored = area("alice", "persisted");
        {
            let cache = LocalCache::open(&path).expect("open empty");
            cache.upsert_search_area(&stored);
        }

        let reopened = LocalCache::open(&path).expect("reopen");
        let snapshot = reopened.snapshot(&OwnerId::new("alice"));
        assert_eq!(snapshot.search_areas, vec![stored]);
    }

    #[test]
    fn rewrite_replaces_the_file_and_leaves_nothing_staged() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("areas.json");
        let cache = LocalCache::open(&path).expect("open");
        let mut stored = area("alice", "first");
        cache.upsert_search_area(&stored);
        stored.label = "second".to_string();
        cache.upsert_search_area(&stored);

        let reopened = LocalCache::open(&path).expect("reopen");
        assert_eq!(
            reopened.snapshot(&OwnerId::new("alice")).search_areas[0].label,
            "second"
        );
        let entries: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("areas.json")]);
    }

    #[test]
    fn clones_share_one_snapshot() {
        let cache = LocalCache::ephemeral();
        let handle = cache.clone();
        handle.upsert_search_area(&area("alice", "shared"));

        assert_eq!(cache.snapshot(&OwnerId::new("alice")).search_areas.len(), 1);
    }

    #[test]
    fn notifications_and_audit_events_keep_only_the_newest() {
        let cache = LocalCache::ephemeral();
        let owner = OwnerId::new("alice");
        let at = Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap();
        for index in 0..MAX_CACHED_NOTIFICATIONS + 5 {
            cache.push_notification(&Notification {
                id: RecordId::generate(),
                owner_id: owner.clone(),
                title: "New search area".to_string(),
                message: format!("#{index}"),
                created_at: at,
            });
        }
        let audit = AuditLog::new();
        for _ in 0..MAX_CACHED_AUDIT_EVENTS + 3 {
            audit.record(&owner, AuditKind::GenerationAttempt, "attempt", at);
        }
        for event in audit.snapshot() {
            cache.append_audit_event(&event);
        }

        let snapshot = cache.snapshot(&owner);
        assert_eq!(snapshot.notifications.len(), MAX_CACHED_NOTIFICATIONS);
        assert_eq!(snapshot.notifications[0].message, "#5");
        assert_eq!(snapshot.audit_events.len(), MAX_CACHED_AUDIT_EVENTS);
        assert_eq!(snapshot.audit_events[0].seq, audit.snapshot()[3].seq);
    }

    #[test]
    fn corrupt_snapshot_reports_json_path() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("areas.json");
        fs::write(
            &path,
            r#"{ "version": 1, "owners": { "alice": { "search_areas": [ { "id": 7 } ] } } }"#,
        )
        .expect("write corrupt");

        match LocalCache::open(&path) {
            Err(CacheError::Parse { path, .. }) => {
                assert!(path.starts_with("owners.alice.search_areas[0]"), "path was {path}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("areas.json");
        fs::write(&path, r#"{ "version": 9, "owners": {} }"#).expect("write");

        assert!(matches!(
            LocalCache::open(&path),
            Err(CacheError::Version {
                found: 9,
                expected: 1
            })
        ));
    }
}
