// Key compaction
//
// Repeated merges push keys upward by offsets. Compaction renumbers record
// and detection keys densely from 1, rewrites every reference in the same
// transaction, then reclaims space.

use serde::Serialize;

use crate::constants::*;
use crate::db::{check_foreign_keys, defer_foreign_keys, indexes, schema, Store};
use crate::error::Result;
use crate::remap::{IdRemap, RemapStrategy};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactReport {
    pub records: usize,
    pub detections: usize,
    pub records_renumbered: usize,
    pub detections_renumbered: usize,
}

/// Renumber keys densely and reclaim free pages.
pub fn compact_and_reclaim(store: &Store) -> Result<CompactReport> {
    let _lock = store.lock()?;
    compact_unlocked(store)
}

/// Compaction for callers already holding the store lock.
pub(crate) fn compact_unlocked(store: &Store) -> Result<CompactReport> {
    let conn = store.conn();
    let mut report = CompactReport::default();

    let tx = conn.unchecked_transaction()?;
    defer_foreign_keys(&tx)?;
    indexes::drop_secondary_indexes(&tx)?;

    let records = IdRemap::build(&tx, "compact_records", "main.DataTable", ID, RemapStrategy::Dense)?;
    report.records = records.len();
    report.records_renumbered = records.apply_to_key(&tx, DATA_TABLE, ID)?;
    records.apply_to_key(&tx, MARKERS_TABLE, ID)?;
    records.apply(&tx, DETECTIONS_TABLE, ID)?;
    records.drop_table(&tx)?;

    let detections = IdRemap::build(&tx, "compact_detections", "main.Detections", DETECTION_ID, RemapStrategy::Dense)?;
    report.detections = detections.len();
    report.detections_renumbered = detections.apply_to_key(&tx, DETECTIONS_TABLE, DETECTION_ID)?;
    detections.apply(&tx, DETECTIONS_VIDEO_TABLE, DETECTION_ID)?;
    detections.drop_table(&tx)?;

    indexes::rebuild_indexes(&tx)?;
    check_foreign_keys(&tx)?;
    tx.commit()?;

    conn.execute_batch("VACUUM")?;

    log::info!(
        "Compacted {}: {} of {} record key(s) and {} of {} detection key(s) renumbered",
        store.path().display(),
        report.records_renumbered,
        report.records,
        report.detections_renumbered,
        report.detections
    );
    Ok(report)
}

/// True when the largest record key exceeds `threshold`.
pub fn needs_compaction(store: &Store, threshold: i64) -> Result<bool> {
    Ok(schema::max_key(store.conn(), "main", DATA_TABLE, ID)? > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{insert_detection, insert_marker, insert_record, NewDetection, NewRecord};
    use crate::template::{ControlType, FieldControl, Template};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sparse_store(tmp: &TempDir) -> Store {
        let template = Template {
            controls: vec![FieldControl::new("Count", ControlType::Counter)],
            ..Default::default()
        };
        let store = Store::create(&tmp.path().join("c.ddb"), &template).unwrap();
        let conn = store.conn();
        for id in [1, 3, 4, 9] {
            insert_record(conn, &NewRecord::new(format!("{}.jpg", id), "").with_id(id)).unwrap();
            insert_marker(conn, id, &BTreeMap::from([("Count".to_string(), id.to_string())])).unwrap();
        }
        let d = insert_detection(conn, &NewDetection::new(9, 1, 0.8)).unwrap();
        conn.execute("UPDATE Detections SET detectionID = 50 WHERE detectionID = ?1", [d]).unwrap();
        schema::insert_video_detection(conn, 50, 7, 30.0).unwrap();
        store
    }

    #[test]
    fn test_compaction_closes_gaps_and_keeps_references() {
        let tmp = TempDir::new().unwrap();
        let store = sparse_store(&tmp);
        let report = compact_and_reclaim(&store).unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(report.records_renumbered, 3);

        let conn = store.conn();
        assert_eq!(schema::record_ids(conn, DATA_TABLE).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(schema::record_ids(conn, MARKERS_TABLE).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(schema::get_field(conn, 4, "File").unwrap().as_deref(), Some("9.jpg"));
        let count: String = conn
            .query_row("SELECT Count FROM MarkersTable WHERE Id = 4", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, "9");

        let detections = schema::list_detections(conn).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].detection_id, 1);
        assert_eq!(detections[0].record_id, 4);
        assert_eq!(schema::list_video_detections(conn).unwrap(), vec![(1, 7)]);
    }

    #[test]
    fn test_compaction_of_dense_store_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = sparse_store(&tmp);
        compact_and_reclaim(&store).unwrap();
        let again = compact_and_reclaim(&store).unwrap();
        assert_eq!(again.records_renumbered, 0);
        assert_eq!(again.detections_renumbered, 0);
    }

    #[test]
    fn test_needs_compaction() {
        let tmp = TempDir::new().unwrap();
        let store = sparse_store(&tmp);
        assert!(needs_compaction(&store, 5).unwrap());
        assert!(!needs_compaction(&store, 9).unwrap());
    }

    #[test]
    fn test_failed_compaction_leaves_keys_alone() {
        let tmp = TempDir::new().unwrap();
        let store = sparse_store(&tmp);
        let conn = store.conn();
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             INSERT INTO Detections (detectionID, Id, category, conf) VALUES (70, 999, 1, 0.5);
             PRAGMA foreign_keys = ON;",
        )
        .unwrap();
        let indexes_before = indexes::index_names(conn).unwrap();

        let err = compact_and_reclaim(&store).unwrap_err();
        assert!(matches!(err, crate::error::SyncError::IntegrityViolation(1)), "{:?}", err);

        assert_eq!(schema::record_ids(conn, DATA_TABLE).unwrap(), vec![1, 3, 4, 9]);
        assert_eq!(schema::record_ids(conn, MARKERS_TABLE).unwrap(), vec![1, 3, 4, 9]);
        let detections: Vec<(i64, i64)> = schema::list_detections(conn)
            .unwrap()
            .into_iter()
            .map(|d| (d.detection_id, d.record_id))
            .collect();
        assert_eq!(detections, vec![(50, 9), (70, 999)]);
        assert_eq!(schema::list_video_detections(conn).unwrap(), vec![(50, 7)]);
        assert_eq!(indexes::index_names(conn).unwrap(), indexes_before);
        drop(store.lock().unwrap());
    }
}
