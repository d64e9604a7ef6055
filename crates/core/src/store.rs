//! Zone store
//!
//! The authoritative per-page zone lists of one open document. Every
//! operation validates its whole input before touching any page, so a
//! rejected call leaves the store exactly as it was. Observers are told about
//! each page whose zone list changed.

use crate::config::{ReadingOrderSettings, ZoneTypeRegistry};
use crate::geometry::{union_all, Rect};
use crate::text_index::PageTextSource;
use crate::zone::{Zone, ZoneKind, ZoneLifecycle, ZoneOrigin, ZoneUid};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Rect changes smaller than this, in points, are not edits.
pub const GEOMETRY_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("merge needs at least two zones, got {0}")]
    TooFewZones(usize),
    #[error("zones are on different pages ({first} and {other})")]
    CrossPage { first: u32, other: u32 },
    #[error("no zone with id {0}")]
    UnknownZone(String),
    #[error("zone {0} is selected more than once")]
    DuplicateZone(String),
    #[error("swap needs exactly two zones, got {0}")]
    WrongSelectionSize(usize),
    #[error("no zones selected")]
    NothingSelected,
    #[error("deleting {0} zones needs confirmation")]
    ConfirmationRequired(usize),
    #[error("invalid zone geometry {0:?}")]
    InvalidGeometry(Rect),
    #[error("zone belongs to page {zone_page}, not page {page}")]
    PageMismatch { page: u32, zone_page: u32 },
}

/// Receives change notifications from a [`ZoneStore`]
pub trait ZoneObserver {
    /// `zones` is the page's complete list after the change, in sequence order.
    fn page_changed(&mut self, page: u32, zones: &[Zone]);

    fn cleared(&mut self) {}
}

/// What happened to an incoming page batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied(usize),
    /// The page already has interactive edits, which win over extraction
    KeptUserEdits,
}

pub struct ZoneStore {
    pages: BTreeMap<u32, Vec<Zone>>,
    lifecycle: HashMap<ZoneUid, ZoneLifecycle>,
    edited_pages: BTreeSet<u32>,
    zone_types: Arc<ZoneTypeRegistry>,
    reading_order: ReadingOrderSettings,
    text_source: Option<Box<dyn PageTextSource>>,
    observers: Vec<Box<dyn ZoneObserver>>,
}

impl ZoneStore {
    pub fn new(zone_types: Arc<ZoneTypeRegistry>, reading_order: ReadingOrderSettings) -> Self {
        Self {
            pages: BTreeMap::new(),
            lifecycle: HashMap::new(),
            edited_pages: BTreeSet::new(),
            zone_types,
            reading_order,
            text_source: None,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn ZoneObserver>) {
        self.observers.push(observer);
    }

    /// Text lookup used when merged or reshaped zones need fresh text
    pub fn set_text_source(&mut self, source: Box<dyn PageTextSource>) {
        self.text_source = Some(source);
    }

    pub fn clear_text_source(&mut self) {
        self.text_source = None;
    }

    pub fn zone_types(&self) -> &ZoneTypeRegistry {
        &self.zone_types
    }

    /// Zones of `page` in sequence order
    pub fn page(&self, page: u32) -> &[Zone] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pages holding at least one zone
    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.iter().filter(|(_, zones)| !zones.is_empty()).map(|(page, _)| *page)
    }

    pub fn get(&self, block_id: &str) -> Option<&Zone> {
        self.locate(block_id).map(|(page, index)| &self.pages[&page][index])
    }

    pub fn zone_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.zone_count() == 0
    }

    /// Every zone, by page then sequence
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.pages.values().flatten()
    }

    pub fn lifecycle(&self, uid: ZoneUid) -> Option<ZoneLifecycle> {
        self.lifecycle.get(&uid).copied()
    }

    pub fn has_user_edits(&self, page: u32) -> bool {
        self.edited_pages.contains(&page)
    }

    /// Whether deleting `ids` has to be confirmed by the user first
    pub fn needs_confirmation(ids: &[&str]) -> bool {
        ids.len() > 1
    }

    /// Drop every zone, edit mark and lifecycle record
    pub fn clear(&mut self) {
        self.pages.clear();
        self.lifecycle.clear();
        self.edited_pages.clear();
        for observer in &mut self.observers {
            observer.cleared();
        }
    }

    /// Replace the store contents with a saved layout
    ///
    /// Identifiers and sequence numbers are taken as saved. Pages holding
    /// interactively created zones count as edited.
    pub fn load(&mut self, zones: Vec<Zone>) -> Result<(), StoreError> {
        let mut pages: BTreeMap<u32, Vec<Zone>> = BTreeMap::new();
        let mut block_ids = HashSet::new();
        let mut uids = HashSet::new();
        for zone in zones {
            check_geometry(&zone.rect())?;
            let fresh_id = block_ids.insert(zone.block_id.clone());
            let fresh_uid = uids.insert(zone.uid);
            if !(fresh_id && fresh_uid) {
                return Err(StoreError::DuplicateZone(zone.block_id));
            }
            pages.entry(zone.page()).or_default().push(zone);
        }

        self.clear();
        for (page, mut zones) in pages {
            zones.sort_by_key(|zone| zone.sequence_number);
            if zones.iter().any(|zone| zone.origin == ZoneOrigin::Interactive) {
                self.edited_pages.insert(page);
            }
            for zone in &zones {
                self.lifecycle.insert(zone.uid, ZoneLifecycle::Active);
            }
            self.pages.insert(page, zones);
            self.notify(page);
        }
        Ok(())
    }

    /// Apply one page of extraction results
    ///
    /// The batch replaces whatever extraction left on the page before and is
    /// numbered densely in its incoming order. Pages with interactive edits
    /// are left untouched.
    pub fn insert_page_batch(&mut self, page: u32, zones: Vec<Zone>) -> Result<BatchOutcome, StoreError> {
        if self.edited_pages.contains(&page) {
            debug!(page, "page has user edits, batch not applied");
            for zone in &zones {
                self.lifecycle.entry(zone.uid).or_insert(ZoneLifecycle::Proposed);
            }
            return Ok(BatchOutcome::KeptUserEdits);
        }

        for zone in &zones {
            if zone.page() != page {
                return Err(StoreError::PageMismatch { page, zone_page: zone.page() });
            }
            check_geometry(&zone.rect())?;
            if self.lifecycle.get(&zone.uid).is_some_and(|state| *state != ZoneLifecycle::Proposed) {
                return Err(StoreError::DuplicateZone(zone.block_id.clone()));
            }
        }

        let mut zones = zones;
        for (zone, sequence) in zones.iter_mut().zip(1u32..) {
            zone.renumber(sequence);
            self.lifecycle.insert(zone.uid, ZoneLifecycle::Active);
        }

        let count = zones.len();
        if let Some(previous) = self.pages.insert(page, zones) {
            for zone in previous {
                self.lifecycle.insert(zone.uid, ZoneLifecycle::Deleted);
            }
        }

        self.notify(page);
        Ok(BatchOutcome::Applied(count))
    }

    /// Add a user-drawn zone and renumber its page in reading order
    ///
    /// Returns the block id the zone ends up with.
    pub fn insert_interactive(&mut self, zone: Zone) -> Result<String, StoreError> {
        check_geometry(&zone.rect())?;
        if self.lifecycle.contains_key(&zone.uid) {
            return Err(StoreError::DuplicateZone(zone.block_id));
        }

        let page = zone.page();
        let uid = zone.uid;
        let mut zone = zone.with_origin(ZoneOrigin::Interactive);

        let zones = self.pages.entry(page).or_default();
        let next = zones.iter().map(|z| z.sequence_number).max().unwrap_or(0) + 1;
        zone.renumber(next);
        if zone.zone_color.is_empty() {
            zone.zone_color = self.zone_types.color_for(&zone.kind).to_owned();
        }
        if zone.text.is_empty() {
            if let Some(region) = self.text_source.as_ref().and_then(|s| s.region_text(page, &zone.rect())) {
                zone.apply_region_text(region);
            }
        }
        zones.push(zone);

        // y grows downward here, so ascending y is top-to-bottom reading order
        let split = self.reading_order.column_split_x;
        zones.sort_by(|a, b| {
            let column = |zone: &Zone| u8::from(zone.rect().x >= split);
            column(a)
                .cmp(&column(b))
                .then(a.rect().y.total_cmp(&b.rect().y))
        });
        for (zone, sequence) in zones.iter_mut().zip(1u32..) {
            zone.renumber(sequence);
        }

        let block_id = zones
            .iter()
            .find(|zone| zone.uid == uid)
            .map(|zone| zone.block_id.clone())
            .unwrap_or_default();

        self.lifecycle.insert(uid, ZoneLifecycle::Active);
        self.edited_pages.insert(page);
        info!(page, block_id = %block_id, "zone added");
        self.notify(page);
        Ok(block_id)
    }

    /// Merge zones on one page into a single zone covering all of them
    ///
    /// The merged zone takes the kind and block id of the first listed zone
    /// and the lowest sequence number of the group; the page is then
    /// renumbered densely without touching the other block ids.
    pub fn merge(&mut self, ids: &[&str]) -> Result<String, StoreError> {
        if ids.len() < 2 {
            return Err(StoreError::TooFewZones(ids.len()));
        }
        let (page, indices) = self.resolve_same_page(ids)?;

        let zones = self.pages.get_mut(&page).map(std::mem::take).unwrap_or_default();
        let mut merged = Vec::with_capacity(indices.len());
        let mut kept = Vec::with_capacity(zones.len());
        for (index, zone) in zones.into_iter().enumerate() {
            if indices.contains(&index) {
                merged.push(zone);
            } else {
                kept.push(zone);
            }
        }

        // selection order, not page order
        merged.sort_by_key(|zone| {
            ids.iter().position(|id| *id == zone.block_id).unwrap_or(usize::MAX)
        });

        let first = &merged[0];
        let rect = union_all(merged.iter().map(Zone::rect)).unwrap_or_else(|| first.rect());
        let sequence = merged.iter().map(|zone| zone.sequence_number).min().unwrap_or(1);

        let mut combined = Zone::new(page, sequence, rect, first.kind.clone())
            .with_color(self.zone_types.color_for(&first.kind))
            .with_origin(ZoneOrigin::Interactive);
        combined.block_id = first.block_id.clone();
        combined.span_id = first.span_id.clone();
        combined.parent_zone = first.parent_zone.clone();

        match self.text_source.as_ref().and_then(|source| source.region_text(page, &rect)) {
            Some(region) if !region.is_empty() => combined.apply_region_text(region),
            _ => {
                let mut by_sequence: Vec<&Zone> = merged.iter().collect();
                by_sequence.sort_by_key(|zone| zone.sequence_number);
                let text = by_sequence
                    .iter()
                    .map(|zone| zone.text.trim())
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                combined.text = text;
                combined.feats = first.feats.clone();
                combined.font_size = first.font_size;
                combined.size_class = first.size_class;
                combined.line_count = merged.iter().map(|zone| zone.line_count).sum();
            }
        }

        for zone in &merged {
            self.lifecycle.insert(zone.uid, ZoneLifecycle::MergedAway);
        }
        self.lifecycle.insert(combined.uid, ZoneLifecycle::Active);

        let block_id = combined.block_id.clone();
        let mut zones = kept;
        zones.push(combined);
        zones.sort_by_key(|zone| zone.sequence_number);
        for (zone, sequence) in zones.iter_mut().zip(1u32..) {
            zone.sequence_number = sequence;
        }
        self.pages.insert(page, zones);

        self.edited_pages.insert(page);
        info!(page, merged = merged.len(), block_id = %block_id, "zones merged");
        self.notify(page);
        Ok(block_id)
    }

    /// Exchange the sequence numbers of two zones on one page
    pub fn swap_sequence(&mut self, ids: &[&str]) -> Result<(), StoreError> {
        if ids.len() != 2 {
            return Err(StoreError::WrongSelectionSize(ids.len()));
        }
        let (page, indices) = self.resolve_same_page(ids)?;

        if let Some(zones) = self.pages.get_mut(&page) {
            let (a, b) = (indices[0], indices[1]);
            let sequence_a = zones[a].sequence_number;
            zones[a].sequence_number = zones[b].sequence_number;
            zones[b].sequence_number = sequence_a;
            for index in [a, b] {
                self.lifecycle.insert(zones[index].uid, ZoneLifecycle::Modified);
            }
            zones.sort_by_key(|zone| zone.sequence_number);
        }

        self.edited_pages.insert(page);
        self.notify(page);
        Ok(())
    }

    /// Move or resize a zone, refreshing its text from the page
    ///
    /// Returns `false`, without notifying, when the change is within
    /// [`GEOMETRY_TOLERANCE`].
    pub fn update_geometry(&mut self, id: &str, rect: Rect) -> Result<bool, StoreError> {
        check_geometry(&rect)?;
        let (page, index) = self.locate(id).ok_or_else(|| StoreError::UnknownZone(id.to_owned()))?;

        let region = {
            let current = &self.pages[&page][index];
            if current.rect().approx_eq(&rect, GEOMETRY_TOLERANCE) {
                return Ok(false);
            }
            self.text_source.as_ref().and_then(|source| source.region_text(page, &rect))
        };

        if let Some(zone) = self.pages.get_mut(&page).and_then(|zones| zones.get_mut(index)) {
            zone.set_rect(rect);
            if let Some(region) = region {
                zone.apply_region_text(region);
            }
            self.lifecycle.insert(zone.uid, ZoneLifecycle::Modified);
        }

        self.edited_pages.insert(page);
        self.notify(page);
        Ok(true)
    }

    /// Change a zone's type and color
    ///
    /// A name ending in `.parent` records the parent zone instead and leaves
    /// type and color alone.
    pub fn retype(&mut self, id: &str, new_type: &str) -> Result<(), StoreError> {
        let (page, index) = self.locate(id).ok_or_else(|| StoreError::UnknownZone(id.to_owned()))?;
        let zone_types = self.zone_types.clone();

        if let Some(zone) = self.pages.get_mut(&page).and_then(|zones| zones.get_mut(index)) {
            let new_type = new_type.trim();
            if new_type.ends_with(".parent") {
                zone.parent_zone = Some(new_type.to_owned());
            } else {
                let kind = ZoneKind::parse(new_type);
                zone.zone_color = zone_types.color_for(&kind).to_owned();
                zone.kind = kind;
            }
            self.lifecycle.insert(zone.uid, ZoneLifecycle::Modified);
        }

        self.edited_pages.insert(page);
        self.notify(page);
        Ok(())
    }

    /// Remove zones, leaving the remaining sequence numbers as they are
    ///
    /// More than one zone is only deleted when `confirmed` is set. Returns the
    /// number of zones removed.
    pub fn delete(&mut self, ids: &[&str], confirmed: bool) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Err(StoreError::NothingSelected);
        }

        let mut targets: BTreeMap<u32, BTreeSet<usize>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(*id) {
                return Err(StoreError::DuplicateZone((*id).to_owned()));
            }
            let (page, index) = self.locate(id).ok_or_else(|| StoreError::UnknownZone((*id).to_owned()))?;
            targets.entry(page).or_default().insert(index);
        }

        if Self::needs_confirmation(ids) && !confirmed {
            return Err(StoreError::ConfirmationRequired(ids.len()));
        }

        for (page, indices) in &targets {
            if let Some(zones) = self.pages.get_mut(page) {
                for index in indices.iter().rev() {
                    let zone = zones.remove(*index);
                    self.lifecycle.insert(zone.uid, ZoneLifecycle::Deleted);
                }
            }
            self.edited_pages.insert(*page);
        }

        for page in targets.keys() {
            self.notify(*page);
        }
        info!(count = ids.len(), "zones deleted");
        Ok(ids.len())
    }

    fn locate(&self, block_id: &str) -> Option<(u32, usize)> {
        self.pages.iter().find_map(|(page, zones)| {
            zones.iter().position(|zone| zone.block_id == block_id).map(|index| (*page, index))
        })
    }

    /// Resolve ids that must all be distinct and on one page
    fn resolve_same_page(&self, ids: &[&str]) -> Result<(u32, Vec<usize>), StoreError> {
        let mut seen = HashSet::new();
        let mut page = None;
        let mut indices = Vec::with_capacity(ids.len());

        for id in ids {
            if !seen.insert(*id) {
                return Err(StoreError::DuplicateZone((*id).to_owned()));
            }
            let (zone_page, index) =
                self.locate(id).ok_or_else(|| StoreError::UnknownZone((*id).to_owned()))?;
            match page {
                None => page = Some(zone_page),
                Some(first) if first != zone_page => {
                    return Err(StoreError::CrossPage { first, other: zone_page });
                }
                Some(_) => {}
            }
            indices.push(index);
        }

        Ok((page.unwrap_or_default(), indices))
    }

    fn notify(&mut self, page: u32) {
        let zones = self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[]);
        for observer in &mut self.observers {
            observer.page_changed(page, zones);
        }
    }
}

fn check_geometry(rect: &Rect) -> Result<(), StoreError> {
    if !rect.is_finite() || rect.width < 0.0 || rect.height < 0.0 {
        return Err(StoreError::InvalidGeometry(*rect));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_index::{IndexedPages, IndexedSpan, PageTextIndex};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        events: Rc<RefCell<Vec<(u32, Vec<String>)>>>,
    }

    impl ZoneObserver for Recorder {
        fn page_changed(&mut self, page: u32, zones: &[Zone]) {
            let ids = zones.iter().map(|zone| zone.block_id.clone()).collect();
            self.events.borrow_mut().push((page, ids));
        }
    }

    fn store() -> (ZoneStore, Rc<RefCell<Vec<(u32, Vec<String>)>>>) {
        let mut store = ZoneStore::new(Arc::new(ZoneTypeRegistry::default()), ReadingOrderSettings::default());
        let recorder = Recorder::default();
        let events = recorder.events.clone();
        store.add_observer(Box::new(recorder));
        (store, events)
    }

    fn zone(page: u32, sequence: u32, rect: Rect, text: &str) -> Zone {
        Zone::new(page, sequence, rect, ZoneKind::Paragraph)
            .with_color("#1f77b4")
            .with_text(text)
    }

    /// Page 1 (0-based 0) with A at the top and B below it.
    fn two_zone_store() -> (ZoneStore, Rc<RefCell<Vec<(u32, Vec<String>)>>>) {
        let (mut store, events) = store();
        store
            .insert_page_batch(
                0,
                vec![
                    zone(0, 1, Rect::new(0.0, 0.0, 100.0, 20.0), "alpha"),
                    zone(0, 2, Rect::new(0.0, 30.0, 100.0, 20.0), "beta"),
                ],
            )
            .unwrap();
        events.borrow_mut().clear();
        (store, events)
    }

    fn sequences(store: &ZoneStore, page: u32) -> Vec<u32> {
        store.page(page).iter().map(|zone| zone.sequence_number).collect()
    }

    #[test]
    fn batch_is_numbered_densely_and_notifies() {
        let (mut store, events) = store();
        let outcome = store
            .insert_page_batch(
                2,
                vec![
                    zone(2, 7, Rect::new(0.0, 0.0, 10.0, 10.0), "a"),
                    zone(2, 9, Rect::new(0.0, 20.0, 10.0, 10.0), "b"),
                ],
            )
            .unwrap();

        assert_eq!(outcome, BatchOutcome::Applied(2));
        assert_eq!(sequences(&store, 2), vec![1, 2]);
        assert_eq!(*events.borrow(), vec![(2, vec!["pz3-1".to_owned(), "pz3-2".to_owned()])]);
        let uid = store.page(2)[0].uid;
        assert_eq!(store.lifecycle(uid), Some(ZoneLifecycle::Active));
    }

    #[test]
    fn batch_for_wrong_page_is_rejected() {
        let (mut store, events) = store();
        let err = store.insert_page_batch(1, vec![zone(0, 1, Rect::new(0.0, 0.0, 1.0, 1.0), "")]).unwrap_err();
        assert_eq!(err, StoreError::PageMismatch { page: 1, zone_page: 0 });
        assert!(store.is_empty());
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn batch_does_not_overwrite_user_edits() {
        let (mut store, _events) = two_zone_store();
        store.retype("pz1-1", "title").unwrap();

        let outcome = store
            .insert_page_batch(0, vec![zone(0, 1, Rect::new(5.0, 5.0, 5.0, 5.0), "new")])
            .unwrap();
        assert_eq!(outcome, BatchOutcome::KeptUserEdits);
        assert_eq!(store.page(0).len(), 2);
    }

    #[test]
    fn held_back_batch_stays_proposed() {
        let (mut store, _events) = two_zone_store();
        store.retype("pz1-1", "title").unwrap();

        let held = zone(0, 1, Rect::new(5.0, 5.0, 5.0, 5.0), "new");
        let uid = held.uid;
        store.insert_page_batch(0, vec![held]).unwrap();
        assert_eq!(store.lifecycle(uid), Some(ZoneLifecycle::Proposed));
        assert!(store.get("pz1-1").is_some_and(|zone| zone.uid != uid));
    }

    #[test]
    fn merging_two_stacked_zones() {
        let (mut store, events) = two_zone_store();
        let block_id = store.merge(&["pz1-1", "pz1-2"]).unwrap();

        assert_eq!(block_id, "pz1-1");
        let zones = store.page(0);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].bbox(), [0.0, 0.0, 100.0, 50.0]);
        assert_eq!(zones[0].sequence_number, 1);
        assert_eq!(zones[0].kind, ZoneKind::Paragraph);
        assert_eq!(zones[0].text, "alpha beta");
        assert_eq!(zones[0].origin, ZoneOrigin::Interactive);
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn merge_keeps_other_ids_and_closes_gaps() {
        let (mut store, _events) = store();
        store
            .insert_page_batch(
                0,
                vec![
                    zone(0, 1, Rect::new(0.0, 0.0, 10.0, 10.0), "a"),
                    zone(0, 2, Rect::new(0.0, 20.0, 10.0, 10.0), "b"),
                    zone(0, 3, Rect::new(0.0, 40.0, 10.0, 10.0), "c"),
                ],
            )
            .unwrap();

        let merged = store.merge(&["pz1-3", "pz1-2"]).unwrap();
        assert_eq!(merged, "pz1-3");

        let ids: Vec<(&str, u32)> =
            store.page(0).iter().map(|zone| (zone.block_id.as_str(), zone.sequence_number)).collect();
        assert_eq!(ids, vec![("pz1-1", 1), ("pz1-3", 2)]);
    }

    #[test]
    fn merge_takes_first_selected_kind() {
        let (mut store, _events) = two_zone_store();
        store.retype("pz1-2", "table").unwrap();
        store.merge(&["pz1-2", "pz1-1"]).unwrap();

        let zone = &store.page(0)[0];
        assert_eq!(zone.kind, ZoneKind::Table);
        assert_eq!(zone.zone_color, "#2ca02c");
        assert_eq!(zone.block_id, "pz1-2");
    }

    #[test]
    fn merge_reextracts_text_when_source_is_available() {
        let (mut store, _events) = two_zone_store();
        let index = PageTextIndex::from_spans(
            0,
            vec![IndexedSpan {
                text: "from the page".to_owned(),
                rect: Rect::new(10.0, 22.0, 50.0, 6.0),
                font_name: "Times-Bold".to_owned(),
                font_size: 6.0,
            }],
        );
        store.set_text_source(Box::new(IndexedPages::new(0.0).with_page(index)));

        store.merge(&["pz1-1", "pz1-2"]).unwrap();
        let zone = &store.page(0)[0];
        assert_eq!(zone.text, "from the page");
        assert!(zone.feats.bold);
    }

    #[test]
    fn merge_keeps_joined_text_on_page_without_text_layer() {
        let (mut store, _events) = two_zone_store();
        let scanned = PageTextIndex::from_spans(0, vec![]);
        store.set_text_source(Box::new(IndexedPages::new(0.0).with_page(scanned)));

        store.merge(&["pz1-1", "pz1-2"]).unwrap();
        assert_eq!(store.page(0)[0].text, "alpha beta");
    }

    #[test]
    fn merge_keeps_joined_text_when_region_has_no_spans() {
        let (mut store, _events) = two_zone_store();
        let index = PageTextIndex::from_spans(
            0,
            vec![IndexedSpan {
                text: "elsewhere".to_owned(),
                rect: Rect::new(300.0, 300.0, 50.0, 10.0),
                font_name: "Times".to_owned(),
                font_size: 10.0,
            }],
        );
        store.set_text_source(Box::new(IndexedPages::new(0.0).with_page(index)));

        store.merge(&["pz1-1", "pz1-2"]).unwrap();
        assert_eq!(store.page(0)[0].text, "alpha beta");
    }

    #[test]
    fn merge_rejections_leave_store_untouched() {
        let (mut store, events) = two_zone_store();
        store.insert_page_batch(1, vec![zone(1, 1, Rect::new(0.0, 0.0, 10.0, 10.0), "other")]).unwrap();
        events.borrow_mut().clear();
        let before: Vec<Zone> = store.zones().cloned().collect();

        assert_eq!(store.merge(&["pz1-1"]), Err(StoreError::TooFewZones(1)));
        assert_eq!(
            store.merge(&["pz1-1", "pz2-1"]),
            Err(StoreError::CrossPage { first: 0, other: 1 })
        );
        assert_eq!(store.merge(&["pz1-1", "pz1-1"]), Err(StoreError::DuplicateZone("pz1-1".to_owned())));
        assert_eq!(store.merge(&["pz1-1", "pz9-9"]), Err(StoreError::UnknownZone("pz9-9".to_owned())));

        let after: Vec<Zone> = store.zones().cloned().collect();
        assert_eq!(before, after);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn merged_away_zones_are_terminal() {
        let (mut store, _events) = two_zone_store();
        let uids: Vec<ZoneUid> = store.page(0).iter().map(|zone| zone.uid).collect();
        store.merge(&["pz1-1", "pz1-2"]).unwrap();

        for uid in uids {
            let state = store.lifecycle(uid).unwrap();
            assert_eq!(state, ZoneLifecycle::MergedAway);
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn swap_exchanges_sequence_only() {
        let (mut store, events) = two_zone_store();
        store.swap_sequence(&["pz1-1", "pz1-2"]).unwrap();

        let ids: Vec<(&str, u32)> =
            store.page(0).iter().map(|zone| (zone.block_id.as_str(), zone.sequence_number)).collect();
        assert_eq!(ids, vec![("pz1-2", 1), ("pz1-1", 2)]);
        assert_eq!(events.borrow().len(), 1);

        assert_eq!(store.swap_sequence(&["pz1-1"]), Err(StoreError::WrongSelectionSize(1)));
    }

    #[test]
    fn swap_across_pages_is_rejected() {
        let (mut store, events) = two_zone_store();
        store.insert_page_batch(1, vec![zone(1, 1, Rect::new(0.0, 0.0, 10.0, 10.0), "other")]).unwrap();
        events.borrow_mut().clear();
        let before: Vec<Zone> = store.zones().cloned().collect();

        assert_eq!(
            store.swap_sequence(&["pz1-2", "pz2-1"]),
            Err(StoreError::CrossPage { first: 0, other: 1 })
        );
        let after: Vec<Zone> = store.zones().cloned().collect();
        assert_eq!(before, after);
        assert!(!store.has_user_edits(1));
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn interactive_zone_is_placed_in_reading_order() {
        let (mut store, _events) = store();
        store
            .insert_page_batch(
                0,
                vec![
                    zone(0, 1, Rect::new(20.0, 50.0, 100.0, 20.0), "left top"),
                    zone(0, 2, Rect::new(300.0, 10.0, 100.0, 20.0), "right top"),
                ],
            )
            .unwrap();

        let drawn = Zone::new(0, 0, Rect::new(20.0, 200.0, 100.0, 20.0), ZoneKind::Caption);
        let block_id = store.insert_interactive(drawn).unwrap();

        assert_eq!(block_id, "pz1-2");
        let order: Vec<(&str, &str)> =
            store.page(0).iter().map(|zone| (zone.block_id.as_str(), zone.text.as_str())).collect();
        assert_eq!(order, vec![("pz1-1", "left top"), ("pz1-2", ""), ("pz1-3", "right top")]);
        assert_eq!(sequences(&store, 0), vec![1, 2, 3]);

        let added = store.get("pz1-2").unwrap();
        assert_eq!(added.zone_color, "#e377c2");
        assert_eq!(added.origin, ZoneOrigin::Interactive);
        assert!(store.has_user_edits(0));
    }

    #[test]
    fn interactive_zone_on_empty_page_gets_first_id() {
        let (mut store, _events) = store();
        let drawn = Zone::new(4, 0, Rect::new(1.0, 1.0, 5.0, 5.0), ZoneKind::Other("marginalia".to_owned()));
        assert_eq!(store.insert_interactive(drawn).unwrap(), "pz5-1");
        assert_eq!(store.page(4)[0].zone_color, ZoneTypeRegistry::FALLBACK_COLOR);
    }

    #[test]
    fn small_geometry_changes_are_ignored() {
        let (mut store, events) = two_zone_store();
        assert!(!store.update_geometry("pz1-1", Rect::new(0.0, 0.0005, 100.0, 20.0)).unwrap());
        assert!(events.borrow().is_empty());

        assert!(store.update_geometry("pz1-1", Rect::new(10.0, 0.0, 90.0, 20.0)).unwrap());
        let zone = store.get("pz1-1").unwrap();
        assert_eq!(zone.bbox(), [10.0, 0.0, 100.0, 20.0]);
        assert_eq!(store.lifecycle(zone.uid), Some(ZoneLifecycle::Modified));
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn resize_on_page_without_text_layer_keeps_text() {
        let (mut store, _events) = two_zone_store();
        store.set_text_source(Box::new(IndexedPages::new(0.0).with_page(PageTextIndex::from_spans(0, vec![]))));

        assert!(store.update_geometry("pz1-1", Rect::new(0.0, 0.0, 120.0, 25.0)).unwrap());
        assert_eq!(store.get("pz1-1").unwrap().text, "alpha");
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let (mut store, _events) = two_zone_store();
        let rect = Rect::new(0.0, 0.0, -5.0, 10.0);
        assert_eq!(store.update_geometry("pz1-1", rect), Err(StoreError::InvalidGeometry(rect)));
    }

    #[test]
    fn retype_is_idempotent() {
        let (mut store, _events) = two_zone_store();
        store.retype("pz1-1", "Title").unwrap();
        let first = store.get("pz1-1").unwrap().clone();
        store.retype("pz1-1", "Title").unwrap();
        let second = store.get("pz1-1").unwrap();

        assert_eq!(first.kind, ZoneKind::Title);
        assert_eq!(first.zone_color, "#d62728");
        assert_eq!(&first, second);
    }

    #[test]
    fn retype_to_parent_only_sets_parent() {
        let (mut store, _events) = two_zone_store();
        store.retype("pz1-2", "div.parent").unwrap();

        let zone = store.get("pz1-2").unwrap();
        assert_eq!(zone.parent_zone.as_deref(), Some("div.parent"));
        assert_eq!(zone.kind, ZoneKind::Paragraph);
        assert_eq!(zone.zone_color, "#1f77b4");
    }

    #[test]
    fn deleting_several_zones_needs_confirmation() {
        let (mut store, events) = two_zone_store();

        assert_eq!(store.delete(&[], true), Err(StoreError::NothingSelected));
        assert_eq!(store.delete(&["pz1-1", "pz1-2"], false), Err(StoreError::ConfirmationRequired(2)));
        assert_eq!(store.page(0).len(), 2);
        assert!(events.borrow().is_empty());

        assert_eq!(store.delete(&["pz1-1", "pz1-2"], true), Ok(2));
        assert!(store.page(0).is_empty());
    }

    #[test]
    fn delete_leaves_sequence_numbers_alone() {
        let (mut store, _events) = two_zone_store();
        let uid = store.get("pz1-1").unwrap().uid;
        store.delete(&["pz1-1"], false).unwrap();

        assert_eq!(sequences(&store, 0), vec![2]);
        assert_eq!(store.lifecycle(uid), Some(ZoneLifecycle::Deleted));
    }

    #[test]
    fn load_keeps_saved_numbering() {
        let (mut store, _events) = store();
        let mut saved = zone(0, 5, Rect::new(0.0, 0.0, 1.0, 1.0), "x");
        saved.block_id = "pz1-9".to_owned();
        store.load(vec![saved.clone()]).unwrap();

        assert_eq!(store.page(0), &[saved]);
        assert!(!store.has_user_edits(0));
    }

    #[test]
    fn clear_notifies_observers() {
        struct Cleared(Rc<RefCell<bool>>);
        impl ZoneObserver for Cleared {
            fn page_changed(&mut self, _page: u32, _zones: &[Zone]) {}
            fn cleared(&mut self) {
                *self.0.borrow_mut() = true;
            }
        }

        let (mut store, _events) = two_zone_store();
        let flag = Rc::new(RefCell::new(false));
        store.add_observer(Box::new(Cleared(flag.clone())));
        store.clear();

        assert!(*flag.borrow());
        assert!(store.is_empty());
        assert!(!store.has_user_edits(0));
    }
}
