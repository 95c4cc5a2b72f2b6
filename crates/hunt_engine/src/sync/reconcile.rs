use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::model::{GeneratedArea, MapPoint, RecordId, SearchArea};

pub trait SyncRecord: Clone + PartialEq {
    const COLLECTION: &'static str;

    fn record_id(&self) -> RecordId;
    fn created_at(&self) -> DateTime<Utc>;
}

impl SyncRecord for SearchArea {
    const COLLECTION: &'static str = "search_areas";

    fn record_id(&self) -> RecordId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl SyncRecord for GeneratedArea {
    const COLLECTION: &'static str = "generated_areas";

    fn record_id(&self) -> RecordId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl SyncRecord for MapPoint {
    const COLLECTION: &'static str = "map_points";

    fn record_id(&self) -> RecordId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Write sequence observed when a fetch was issued. Anything written after
/// this point cannot be reflected in the fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket {
    pub(crate) started_at_seq: u64,
}

impl FetchTicket {
    pub fn started_at_seq(&self) -> u64 {
        self.started_at_seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied {
        overlays_kept: usize,
        overlays_confirmed: usize,
        overlays_expired: usize,
    },
    /// A fetch issued after this one was already applied.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
enum LocalChange<T> {
    Upsert(T),
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
struct Overlay<T> {
    write_seq: u64,
    change: LocalChange<T>,
    misses: u32,
}

/// In-memory list kept consistent with an authoritative store.
///
/// Successful local writes are recorded as overlays stamped with a write
/// sequence. A fetch result replaces the list wholesale except where an
/// overlay is newer than the fetch, or older but not yet visible in the
/// store; those overlays are re-applied on top until the store confirms
/// them or `max_unconfirmed` fetches pass without confirmation. Order and
/// duplicate resolution go by `created_at`, never by arrival order.
#[derive(Debug, Clone)]
pub struct ReconciledList<T> {
    records: Vec<T>,
    overlays: HashMap<RecordId, Overlay<T>>,
    applied_fetch_seq: Option<u64>,
}

impl<T> Default for ReconciledList<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            overlays: HashMap::new(),
            applied_fetch_seq: None,
        }
    }
}

impl<T: SyncRecord> ReconciledList<T> {
    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&T> {
        self.records.iter().find(|record| record.record_id() == id)
    }

    pub fn pending_overlays(&self) -> usize {
        self.overlays.len()
    }

    pub fn latest(&self) -> Option<&T> {
        self.records
            .iter()
            .max_by_key(|record| (record.created_at(), record.record_id()))
    }

    pub fn apply_local_upsert(&mut self, write_seq: u64, record: T) {
        let id = record.record_id();
        match self.records.iter_mut().find(|existing| existing.record_id() == id) {
            Some(existing) => *existing = record.clone(),
            None => self.records.push(record.clone()),
        }
        sort_by_creation(&mut self.records);
        self.overlays.insert(
            id,
            Overlay {
                write_seq,
                change: LocalChange::Upsert(record),
                misses: 0,
            },
        );
    }

    pub fn apply_local_delete(&mut self, write_seq: u64, id: RecordId) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.record_id() != id);
        self.overlays.insert(
            id,
            Overlay {
                write_seq,
                change: LocalChange::Delete,
                misses: 0,
            },
        );
        self.records.len() != before
    }

    pub fn apply_fetch(
        &mut self,
        ticket: FetchTicket,
        fetched: Vec<T>,
        max_unconfirmed: u32,
    ) -> MergeOutcome {
        if let Some(applied) = self.applied_fetch_seq {
            if ticket.started_at_seq < applied {
                return MergeOutcome::Stale;
            }
        }

        let mut merged: HashMap<RecordId, T> = HashMap::with_capacity(fetched.len());
        for record in fetched {
            match merged.entry(record.record_id()) {
                Entry::Occupied(mut slot) => {
                    if record.created_at() > slot.get().created_at() {
                        slot.insert(record);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }

        let mut overlays_kept = 0;
        let mut overlays_confirmed = 0;
        let mut overlays_expired = 0;
        self.overlays.retain(|id, overlay| {
            let confirmed = match &overlay.change {
                LocalChange::Upsert(local) => merged.get(id) == Some(local),
                LocalChange::Delete => !merged.contains_key(id),
            };
            if confirmed {
                overlays_confirmed += 1;
                return false;
            }

            if overlay.write_seq <= ticket.started_at_seq {
                overlay.misses += 1;
                if overlay.misses > max_unconfirmed {
                    warn!(
                        collection = T::COLLECTION,
                        record_id = %id,
                        misses = overlay.misses,
                        "local_write_never_confirmed_dropping_overlay"
                    );
                    overlays_expired += 1;
                    return false;
                }
            }

            match &overlay.change {
                LocalChange::Upsert(local) => {
                    merged.insert(*id, local.clone());
                }
                LocalChange::Delete => {
                    merged.remove(id);
                }
            }
            overlays_kept += 1;
            true
        });

        let mut records: Vec<T> = merged.into_values().collect();
        sort_by_creation(&mut records);
        self.records = records;
        self.applied_fetch_seq = Some(ticket.started_at_seq);

        MergeOutcome::Applied {
            overlays_kept,
            overlays_confirmed,
            overlays_expired,
        }
    }
}

fn sort_by_creation<T: SyncRecord>(records: &mut [T]) {
    records.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.record_id().cmp(&b.record_id()))
    });
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::geo::LatLng;
    use crate::model::OwnerId;

    fn area_at(minute: i64, label: &str) -> SearchArea {
        SearchArea {
            id: RecordId::generate(),
            owner_id: OwnerId::new("owner"),
            center: LatLng { lat: 45.0, lng: 9.0 },
            radius_m: 2_000.0,
            label: label.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()
                + Duration::minutes(minute),
        }
    }

    fn ticket(seq: u64) -> FetchTicket {
        FetchTicket {
            started_at_seq: seq,
        }
    }

    fn labels(list: &ReconciledList<SearchArea>) -> Vec<&str> {
        list.records().iter().map(|area| area.label.as_str()).collect()
    }

    #[test]
    fn fetch_replaces_list_sorted_by_created_at() {
        let mut list = ReconciledList::default();
        let outcome = list.apply_fetch(
            ticket(0),
            vec![area_at(5, "late"), area_at(1, "early"), area_at(3, "middle")],
            3,
        );

        assert!(matches!(outcome, MergeOutcome::Applied { .. }));
        assert_eq!(labels(&list), vec!["early", "middle", "late"]);
        assert_eq!(list.latest().map(|area| area.label.as_str()), Some("late"));
    }

    #[test]
    fn reapplying_the_same_fetch_is_idempotent() {
        let mut list = ReconciledList::default();
        let fetched = vec![area_at(1, "a"), area_at(2, "b")];
        list.apply_fetch(ticket(4), fetched.clone(), 3);
        let first = list.records().to_vec();
        list.apply_fetch(ticket(4), fetched, 3);

        assert_eq!(list.records(), first.as_slice());
    }

    #[test]
    fn stale_fetch_completing_late_is_discarded() {
        let mut list = ReconciledList::default();
        let created = area_at(1, "created");
        list.apply_fetch(ticket(5), vec![created.clone()], 3);

        let outcome = list.apply_fetch(ticket(2), Vec::new(), 3);

        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(list.records(), &[created]);
    }

    #[test]
    fn write_made_during_fetch_survives_the_older_result() {
        let mut list = ReconciledList::default();
        let existing = area_at(1, "existing");
        list.apply_fetch(ticket(0), vec![existing.clone()], 3);

        let in_flight_fetch = ticket(0);
        let created = area_at(2, "created");
        list.apply_local_upsert(1, created.clone());
        list.apply_fetch(in_flight_fetch, vec![existing.clone()], 3);

        assert_eq!(labels(&list), vec!["existing", "created"]);
        assert_eq!(list.pending_overlays(), 1);
    }

    #[test]
    fn delete_made_during_fetch_is_not_resurrected() {
        let mut list = ReconciledList::default();
        let doomed = area_at(1, "doomed");
        list.apply_fetch(ticket(0), vec![doomed.clone()], 3);

        assert!(list.apply_local_delete(1, doomed.id));
        list.apply_fetch(ticket(0), vec![doomed.clone()], 3);

        assert!(list.is_empty());
    }

    #[test]
    fn confirmed_overlay_is_released() {
        let mut list = ReconciledList::default();
        let created = area_at(1, "created");
        list.apply_local_upsert(1, created.clone());

        let outcome = list.apply_fetch(ticket(1), vec![created.clone()], 3);

        assert_eq!(
            outcome,
            MergeOutcome::Applied {
                overlays_kept: 0,
                overlays_confirmed: 1,
                overlays_expired: 0
            }
        );
        assert_eq!(list.pending_overlays(), 0);
        assert_eq!(list.records(), &[created]);
    }

    #[test]
    fn unpropagated_write_survives_until_miss_budget_is_spent() {
        let mut list = ReconciledList::default();
        let created = area_at(1, "created");
        list.apply_local_upsert(1, created.clone());

        for _ in 0..2 {
            list.apply_fetch(ticket(1), Vec::new(), 2);
            assert_eq!(list.records(), &[created.clone()]);
        }

        let outcome = list.apply_fetch(ticket(1), Vec::new(), 2);
        assert!(matches!(
            outcome,
            MergeOutcome::Applied {
                overlays_expired: 1,
                ..
            }
        ));
        assert!(list.is_empty());
    }

    #[test]
    fn update_overlay_wins_until_store_shows_new_value() {
        let mut list = ReconciledList::default();
        let original = area_at(1, "before");
        list.apply_fetch(ticket(0), vec![original.clone()], 3);

        let mut renamed = original.clone();
        renamed.label = "after".to_string();
        list.apply_local_upsert(1, renamed.clone());

        list.apply_fetch(ticket(1), vec![original.clone()], 3);
        assert_eq!(labels(&list), vec!["after"]);

        list.apply_fetch(ticket(1), vec![renamed], 3);
        assert_eq!(labels(&list), vec!["after"]);
        assert_eq!(list.pending_overlays(), 0);
    }

    #[test]
    fn duplicate_ids_in_fetch_keep_latest_created_at() {
        let mut list = ReconciledList::default();
        let older = area_at(1, "older");
        let mut newer = area_at(9, "newer");
        newer.id = older.id;

        list.apply_fetch(ticket(0), vec![newer, older], 3);

        assert_eq!(labels(&list), vec!["newer"]);
    }
}
