//! Property-based tests for zone store invariants

use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use zonemark_core::{ReadingOrderSettings, Rect, StoreError, Zone, ZoneKind, ZoneStore, ZoneTypeRegistry};

prop_compose! {
    fn rect_strategy()(
        x in 0.0..500.0f64,
        y in 0.0..700.0f64,
        width in 1.0..200.0f64,
        height in 1.0..100.0f64
    ) -> Rect {
        Rect::new(x, y, width, height)
    }
}

fn kind_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("paragraph"),
        Just("Title"),
        Just("list-item"),
        Just("Picture"),
        Just("sidebar"),
        Just("div.parent"),
    ]
}

fn store() -> ZoneStore {
    ZoneStore::new(Arc::new(ZoneTypeRegistry::default()), ReadingOrderSettings::default())
}

fn page_zones(page: u32, rects: &[Rect]) -> Vec<Zone> {
    rects
        .iter()
        .zip(1u32..)
        .map(|(rect, sequence)| {
            Zone::new(page, sequence, *rect, ZoneKind::Paragraph).with_text(format!("zone {sequence}"))
        })
        .collect()
}

fn block_ids(store: &ZoneStore, page: u32) -> Vec<String> {
    store.page(page).iter().map(|zone| zone.block_id.clone()).collect()
}

fn assert_dense(store: &ZoneStore, page: u32) -> Result<(), TestCaseError> {
    let zones = store.page(page);
    let mut sequences: Vec<u32> = zones.iter().map(|zone| zone.sequence_number).collect();
    sequences.sort_unstable();
    let expected: Vec<u32> = (1..=zones.len() as u32).collect();
    prop_assert_eq!(sequences, expected);

    let unique: HashSet<&str> = zones.iter().map(|zone| zone.block_id.as_str()).collect();
    prop_assert_eq!(unique.len(), zones.len());
    Ok(())
}

fn assert_bbox_consistent(store: &ZoneStore) -> Result<(), TestCaseError> {
    for zone in store.zones() {
        let rect = zone.rect();
        prop_assert_eq!(zone.bbox(), [rect.x, rect.y, rect.x + rect.width, rect.y + rect.height]);
    }
    Ok(())
}

proptest! {
    #[test]
    fn inserts_keep_sequences_dense(
        rects in vec(rect_strategy(), 0..12),
        drawn in vec(rect_strategy(), 1..6)
    ) {
        let mut store = store();
        store.insert_page_batch(0, page_zones(0, &rects)).unwrap();
        assert_dense(&store, 0)?;

        for rect in drawn {
            store.insert_interactive(Zone::new(0, 0, rect, ZoneKind::Caption)).unwrap();
            assert_dense(&store, 0)?;
        }
    }

    #[test]
    fn bbox_follows_geometry_through_edits(
        rects in vec(rect_strategy(), 3..8),
        moved in rect_strategy(),
        drawn in rect_strategy()
    ) {
        let mut store = store();
        store.insert_page_batch(0, page_zones(0, &rects)).unwrap();
        assert_bbox_consistent(&store)?;

        let ids = block_ids(&store, 0);
        store.update_geometry(&ids[0], moved).unwrap();
        assert_bbox_consistent(&store)?;

        store.merge(&[ids[0].as_str(), ids[1].as_str()]).unwrap();
        assert_bbox_consistent(&store)?;

        store.insert_interactive(Zone::new(0, 0, drawn, ZoneKind::Paragraph)).unwrap();
        assert_bbox_consistent(&store)?;
    }

    #[test]
    fn layout_round_trips_through_json(
        first in vec(rect_strategy(), 1..6),
        second in vec(rect_strategy(), 0..6),
        kind in kind_strategy()
    ) {
        let mut original = store();
        original.insert_page_batch(0, page_zones(0, &first)).unwrap();
        original.insert_page_batch(3, page_zones(3, &second)).unwrap();
        let id = block_ids(&original, 0)[0].clone();
        original.retype(&id, kind).unwrap();

        let zones: Vec<Zone> = original.zones().cloned().collect();
        let json = serde_json::to_string(&zones).unwrap();
        let decoded: Vec<Zone> = serde_json::from_str(&json).unwrap();

        let mut reloaded = store();
        reloaded.load(decoded).unwrap();
        let round_tripped: Vec<Zone> = reloaded.zones().cloned().collect();
        prop_assert_eq!(round_tripped, zones);
    }

    #[test]
    fn merge_is_associative_in_geometry(rects in vec(rect_strategy(), 3..7)) {
        let zones = page_zones(0, &rects);

        let mut all_at_once = store();
        all_at_once.insert_page_batch(0, zones.clone()).unwrap();
        let ids = block_ids(&all_at_once, 0);
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let merged = all_at_once.merge(&refs).unwrap();
        let direct = all_at_once.get(&merged).unwrap().rect();

        let mut stepwise = store();
        stepwise.insert_page_batch(0, zones).unwrap();
        let first = stepwise.merge(&refs[..2]).unwrap();
        let mut rest = vec![first.as_str()];
        rest.extend_from_slice(&refs[2..]);
        let merged = stepwise.merge(&rest).unwrap();
        let incremental = stepwise.get(&merged).unwrap().rect();

        prop_assert!(direct.approx_eq(&incremental, 1e-6), "{:?} != {:?}", direct, incremental);
        prop_assert_eq!(all_at_once.page(0).len(), 1);
        prop_assert_eq!(stepwise.page(0).len(), 1);
    }

    #[test]
    fn cross_page_merge_changes_nothing(a in rect_strategy(), b in rect_strategy()) {
        let mut store = store();
        store.insert_page_batch(0, page_zones(0, &[a])).unwrap();
        store.insert_page_batch(1, page_zones(1, &[b])).unwrap();
        let before: Vec<Zone> = store.zones().cloned().collect();

        let result = store.merge(&["pz1-1", "pz2-1"]);
        prop_assert_eq!(result, Err(StoreError::CrossPage { first: 0, other: 1 }));

        let after: Vec<Zone> = store.zones().cloned().collect();
        prop_assert_eq!(after, before);
    }

    #[test]
    fn retype_is_idempotent(rects in vec(rect_strategy(), 1..5), kind in kind_strategy()) {
        let mut store = store();
        store.insert_page_batch(0, page_zones(0, &rects)).unwrap();
        let id = block_ids(&store, 0)[0].clone();

        store.retype(&id, kind).unwrap();
        let once = store.get(&id).unwrap().clone();
        store.retype(&id, kind).unwrap();
        let twice = store.get(&id).unwrap();

        prop_assert_eq!(&once, twice);
        prop_assert_eq!(once.sequence_number, 1);
        prop_assert_eq!(once.rect(), rects[0]);
    }
}
