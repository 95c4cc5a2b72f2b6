//! Render surface adapter: turns synchronized lists plus local view state
//! (selection, armed deletes, pending point, viewport fit) into a frame.

use std::cell::RefCell;
use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::geo::{GeoBounds, LatLng};
use crate::lifecycle::Liveness;
use crate::model::{GeneratedArea, PendingPoint, RecordId, PENDING_POINT_ID};
use crate::sync::SyncedLists;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    SearchArea,
    MapPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: RecordId,
}

/// Per-row delete confirmation. `Armed` only lives for the current
/// selection; moving the selection disarms it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteState {
    #[default]
    Idle,
    Armed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("no search area or point with id {0}")]
    UnknownItem(RecordId),
    #[error("delete for {0} was not armed")]
    NotArmed(RecordId),
    #[error("no pending point to edit")]
    NoPendingPoint,
    #[error("view was torn down")]
    Unmounted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircleView {
    pub id: String,
    pub center: LatLng,
    pub radius_m: f64,
    pub label: String,
    pub selected: bool,
    pub delete: DeleteState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerView {
    pub id: String,
    pub center: LatLng,
    pub title: String,
    pub pending: bool,
    pub selected: bool,
    pub delete: DeleteState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFrame {
    pub map_center: LatLng,
    pub generated_area: Option<CircleView>,
    pub search_areas: Vec<CircleView>,
    pub points: Vec<MarkerView>,
    pub selection: Option<ItemRef>,
    pub fit: Option<GeoBounds>,
}

#[derive(Debug)]
struct ViewState {
    map_center: LatLng,
    selection: Option<ItemRef>,
    delete_states: HashMap<RecordId, DeleteState>,
    pending_point: Option<PendingPoint>,
    fit_request: Option<GeoBounds>,
}

#[derive(Debug)]
pub struct RenderSurface {
    state: RefCell<ViewState>,
    liveness: Liveness,
}

/// Only the most recently created generated area is ever drawn; ties on
/// `created_at` go to the higher id, matching the synchronized list order.
pub fn latest_generated(areas: &[GeneratedArea]) -> Option<&GeneratedArea> {
    areas
        .iter()
        .max_by_key(|area| (area.created_at, area.id))
}

impl RenderSurface {
    pub fn new(map_center: LatLng, liveness: Liveness) -> Self {
        Self {
            state: RefCell::new(ViewState {
                map_center,
                selection: None,
                delete_states: HashMap::new(),
                pending_point: None,
                fit_request: None,
            }),
            liveness,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn map_center(&self) -> LatLng {
        self.state.borrow().map_center
    }

    pub fn set_map_center(&self, center: LatLng) -> Result<(), RenderError> {
        self.ensure_mounted()?;
        self.state.borrow_mut().map_center = center;
        Ok(())
    }

    pub fn pending_point(&self) -> Option<PendingPoint> {
        self.state.borrow().pending_point.clone()
    }

    pub fn set_pending_point(&self, point: PendingPoint) -> Result<(), RenderError> {
        self.ensure_mounted()?;
        self.state.borrow_mut().pending_point = Some(point);
        Ok(())
    }

    pub fn edit_pending_point(&self, title: &str, note: &str) -> Result<(), RenderError> {
        self.ensure_mounted()?;
        let mut state = self.state.borrow_mut();
        let pending = state
            .pending_point
            .as_mut()
            .ok_or(RenderError::NoPendingPoint)?;
        pending.title = title.to_string();
        pending.note = note.to_string();
        Ok(())
    }

    pub fn take_pending_point(&self) -> Option<PendingPoint> {
        self.state.borrow_mut().pending_point.take()
    }

    pub fn selection(&self) -> Option<ItemRef> {
        self.state.borrow().selection
    }

    pub fn delete_state(&self, id: RecordId) -> DeleteState {
        self.state
            .borrow()
            .delete_states
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    pub fn select(&self, lists: &SyncedLists, id: RecordId) -> Result<ItemRef, RenderError> {
        self.ensure_mounted()?;
        let item = find_item(lists, id).ok_or(RenderError::UnknownItem(id))?;
        let mut state = self.state.borrow_mut();
        state.delete_states.retain(|armed_id, _| *armed_id == id);
        state.selection = Some(item);
        Ok(item)
    }

    pub fn clear_selection(&self) {
        let mut state = self.state.borrow_mut();
        state.selection = None;
        state.delete_states.clear();
    }

    /// First step of a delete: selects the row and arms its confirmation.
    pub fn arm_delete(&self, lists: &SyncedLists, id: RecordId) -> Result<ItemRef, RenderError> {
        let item = self.select(lists, id)?;
        self.state
            .borrow_mut()
            .delete_states
            .insert(id, DeleteState::Armed);
        debug!(item_id = %id, kind = ?item.kind, "delete_armed");
        Ok(item)
    }

    /// Second step: consumes the armed state and hands back the row to delete.
    pub fn confirm_delete(&self, id: RecordId) -> Result<ItemRef, RenderError> {
        self.ensure_mounted()?;
        let mut state = self.state.borrow_mut();
        let armed = state.delete_states.get(&id) == Some(&DeleteState::Armed);
        let item = match state.selection {
            Some(item) if armed && item.id == id => item,
            _ => return Err(RenderError::NotArmed(id)),
        };
        state.delete_states.remove(&id);
        Ok(item)
    }

    pub fn disarm_delete(&self, id: RecordId) {
        self.state.borrow_mut().delete_states.remove(&id);
    }

    /// Drops view state for a row that no longer exists. Returns whether it
    /// was the active selection.
    pub fn forget(&self, id: RecordId) -> bool {
        let mut state = self.state.borrow_mut();
        state.delete_states.remove(&id);
        if state.selection.map(|item| item.id) == Some(id) {
            state.selection = None;
            return true;
        }
        false
    }

    /// Drops selection and armed rows whose record disappeared from `lists`.
    pub fn prune(&self, lists: &SyncedLists) {
        let mut state = self.state.borrow_mut();
        if let Some(item) = state.selection {
            if find_item(lists, item.id).is_none() {
                state.selection = None;
            }
        }
        state
            .delete_states
            .retain(|id, _| find_item(lists, *id).is_some());
    }

    pub fn fit_to_circle(&self, center: LatLng, radius_km: f64) -> bool {
        if !self.is_mounted() {
            return false;
        }
        self.state.borrow_mut().fit_request = Some(GeoBounds::around_circle(center, radius_km));
        true
    }

    pub fn take_fit_request(&self) -> Option<GeoBounds> {
        self.state.borrow_mut().fit_request.take()
    }

    pub fn frame(&self, lists: &SyncedLists) -> RenderFrame {
        let state = self.state.borrow();
        let is_selected = |id: RecordId| state.selection.map(|item| item.id) == Some(id);
        let delete_of = |id: RecordId| state.delete_states.get(&id).copied().unwrap_or_default();

        let generated_area = latest_generated(&lists.generated_areas).map(|area| CircleView {
            id: area.id.to_string(),
            center: area.center,
            radius_m: area.radius_m(),
            label: format!("Generation #{}", area.generation_number),
            selected: false,
            delete: DeleteState::Idle,
        });

        let search_areas = lists
            .search_areas
            .iter()
            .map(|area| CircleView {
                id: area.id.to_string(),
                center: area.center,
                radius_m: area.radius_m,
                label: area.label.clone(),
                selected: is_selected(area.id),
                delete: delete_of(area.id),
            })
            .collect();

        let mut points: Vec<MarkerView> = lists
            .map_points
            .iter()
            .map(|point| MarkerView {
                id: point.id.to_string(),
                center: point.center,
                title: point.title.clone(),
                pending: false,
                selected: is_selected(point.id),
                delete: delete_of(point.id),
            })
            .collect();
        if let Some(pending) = &state.pending_point {
            points.push(MarkerView {
                id: PENDING_POINT_ID.to_string(),
                center: pending.center,
                title: pending.title.clone(),
                pending: true,
                selected: false,
                delete: DeleteState::Idle,
            });
        }

        RenderFrame {
            map_center: state.map_center,
            generated_area,
            search_areas,
            points,
            selection: state.selection,
            fit: state.fit_request,
        }
    }

    fn ensure_mounted(&self) -> Result<(), RenderError> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(RenderError::Unmounted)
        }
    }
}

fn find_item(lists: &SyncedLists, id: RecordId) -> Option<ItemRef> {
    if lists.search_areas.iter().any(|area| area.id == id) {
        return Some(ItemRef {
            kind: ItemKind::SearchArea,
            id,
        });
    }
    if lists.map_points.iter().any(|point| point.id == id) {
        return Some(ItemRef {
            kind: ItemKind::MapPoint,
            id,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::model::{MapPoint, OwnerId, PeriodTag, SearchArea};

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
    }

    fn generated(minute: i64, number: u32) -> GeneratedArea {
        let created_at = base_time() + Duration::minutes(minute);
        GeneratedArea {
            id: RecordId::generate(),
            owner_id: OwnerId::new("owner"),
            center: LatLng { lat: 45.0, lng: 9.0 },
            radius_km: 350.0,
            generation_number: number,
            period_tag: PeriodTag::of(created_at),
            is_active: true,
            created_at,
        }
    }

    fn search_area(label: &str) -> SearchArea {
        SearchArea {
            id: RecordId::generate(),
            owner_id: OwnerId::new("owner"),
            center: LatLng { lat: 45.1, lng: 9.1 },
            radius_m: 1_500.0,
            label: label.to_string(),
            created_at: base_time(),
        }
    }

    fn map_point(title: &str) -> MapPoint {
        MapPoint {
            id: RecordId::generate(),
            owner_id: OwnerId::new("owner"),
            center: LatLng { lat: 45.2, lng: 9.2 },
            title: title.to_string(),
            note: String::new(),
            created_at: base_time(),
        }
    }

    fn surface() -> RenderSurface {
        RenderSurface::new(LatLng { lat: 45.0, lng: 9.0 }, Liveness::new())
    }

    #[test]
    fn only_latest_generated_area_is_drawn() {
        let lists = SyncedLists {
            generated_areas: vec![generated(30, 3), generated(5, 1), generated(20, 2)],
            search_areas: vec![search_area("a"), search_area("b")],
            ..SyncedLists::default()
        };

        let frame = surface().frame(&lists);

        let drawn = frame.generated_area.expect("generated area");
        assert_eq!(drawn.label, "Generation #3");
        assert_eq!(drawn.radius_m, 350_000.0);
        assert_eq!(frame.search_areas.len(), 2);
    }

    #[test]
    fn drawn_area_is_the_synchronizers_latest_row() {
        let mut first = generated(10, 1);
        let mut second = generated(10, 2);
        if second.id < first.id {
            std::mem::swap(&mut first.id, &mut second.id);
        }
        first.is_active = false;
        let lists = SyncedLists {
            generated_areas: vec![second.clone(), first, generated(5, 0)],
            ..SyncedLists::default()
        };

        assert_eq!(latest_generated(&lists.generated_areas), Some(&second));
    }

    #[test]
    fn delete_requires_arm_then_confirm_on_the_same_row() {
        let first = search_area("first");
        let second = search_area("second");
        let lists = SyncedLists {
            search_areas: vec![first.clone(), second.clone()],
            ..SyncedLists::default()
        };
        let surface = surface();

        assert_eq!(
            surface.confirm_delete(first.id),
            Err(RenderError::NotArmed(first.id))
        );

        surface.arm_delete(&lists, first.id).expect("arm");
        assert_eq!(surface.delete_state(first.id), DeleteState::Armed);

        surface.select(&lists, second.id).expect("select other");
        assert_eq!(surface.delete_state(first.id), DeleteState::Idle);
        assert_eq!(
            surface.confirm_delete(first.id),
            Err(RenderError::NotArmed(first.id))
        );

        surface.arm_delete(&lists, second.id).expect("arm second");
        let confirmed = surface.confirm_delete(second.id).expect("confirm");
        assert_eq!(confirmed.kind, ItemKind::SearchArea);
        assert_eq!(surface.delete_state(second.id), DeleteState::Idle);
    }

    #[test]
    fn forgetting_the_selected_row_clears_selection() {
        let point = map_point("well");
        let lists = SyncedLists {
            map_points: vec![point.clone()],
            ..SyncedLists::default()
        };
        let surface = surface();
        surface.select(&lists, point.id).expect("select");

        assert!(surface.forget(point.id));
        assert_eq!(surface.selection(), None);
        assert!(!surface.forget(point.id));
    }

    #[test]
    fn prune_drops_selection_of_vanished_rows() {
        let area = search_area("gone");
        let lists = SyncedLists {
            search_areas: vec![area.clone()],
            ..SyncedLists::default()
        };
        let surface = surface();
        surface.arm_delete(&lists, area.id).expect("arm");

        surface.prune(&SyncedLists::default());

        assert_eq!(surface.selection(), None);
        assert_eq!(surface.delete_state(area.id), DeleteState::Idle);
    }

    #[test]
    fn pending_point_renders_with_placeholder_id() {
        let surface = surface();
        surface
            .set_pending_point(PendingPoint::at(LatLng { lat: 1.0, lng: 2.0 }))
            .expect("pending");
        surface.edit_pending_point("Cache", "under the bridge").expect("edit");

        let frame = surface.frame(&SyncedLists::default());
        assert_eq!(frame.points.len(), 1);
        assert_eq!(frame.points[0].id, "new");
        assert!(frame.points[0].pending);
        assert_eq!(frame.points[0].title, "Cache");
    }

    #[test]
    fn unmounted_surface_refuses_mutation() {
        let liveness = Liveness::new();
        let surface = RenderSurface::new(LatLng::default(), liveness.clone());
        liveness.tear_down();

        assert!(!surface.fit_to_circle(LatLng::default(), 10.0));
        assert_eq!(surface.take_fit_request(), None);
        assert_eq!(
            surface.set_pending_point(PendingPoint::at(LatLng::default())),
            Err(RenderError::Unmounted)
        );
    }

    #[test]
    fn fit_request_is_taken_once() {
        let surface = surface();
        assert!(surface.fit_to_circle(LatLng { lat: 0.0, lng: 0.0 }, 111.32));

        let bounds = surface.take_fit_request().expect("fit");
        assert!((bounds.north_east.lat - 1.0).abs() < 1e-9);
        assert_eq!(surface.take_fit_request(), None);
    }
}
