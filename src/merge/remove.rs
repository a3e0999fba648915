// Subtree removal

use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use crate::constants::{DATA_TABLE, FOLDER_DATA_PATH, RELATIVE_PATH};
use crate::db::schema::level_table;
use crate::db::{check_foreign_keys, indexes, table_exists, Store};
use crate::error::{Result, SyncError};
use crate::query::{normalize_path, path_depth, Predicate, Selection};
use crate::template::Template;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReport {
    pub records: usize,
    pub folder_rows: usize,
}

/// Delete every record under `relative_path` along with its markers and detections,
/// and the metadata rows of folders below it.
pub fn remove_subtree(store: &Store, relative_path: &str) -> Result<RemoveReport> {
    let path = normalize_path(relative_path);
    if path.is_empty() {
        return Err(SyncError::InvalidPath("refusing to remove the whole store".to_string()));
    }
    let _lock = store.lock()?;
    let template = store.template()?;

    let conn = store.conn();
    let tx = conn.unchecked_transaction()?;
    let report = remove_subtree_in(&tx, &template, &path)?;
    check_foreign_keys(&tx)?;
    tx.commit()?;
    indexes::rebuild_indexes(conn)?;

    log::info!(
        "Removed {} record(s) and {} folder row(s) under '{}' from {}",
        report.records,
        report.folder_rows,
        path,
        store.path().display()
    );
    Ok(report)
}

/// Removal inside the caller's transaction. An empty path clears the store.
pub(crate) fn remove_subtree_in(conn: &Connection, template: &Template, relative_path: &str) -> Result<RemoveReport> {
    let path = normalize_path(relative_path);
    let mut report = RemoveReport::default();

    // Markers and detections go with their record (ON DELETE CASCADE)
    let (sql, params) = Selection::from(DATA_TABLE)
        .in_schema("main")
        .filter(Predicate::path_within(RELATIVE_PATH, path.as_str()))
        .render_delete();
    report.records = conn.execute(&sql, params_from_iter(params.iter()))?;

    // The folder's own row and its ancestors stay
    let depth = path_depth(&path);
    for row in template.levels.iter().filter(|l| l.level > depth) {
        let table = level_table(row.level);
        if !table_exists(conn, "main", &table)? {
            continue;
        }
        let (sql, params) = Selection::from(table)
            .in_schema("main")
            .filter(Predicate::path_within(FOLDER_DATA_PATH, path.as_str()))
            .render_delete();
        report.folder_rows += conn.execute(&sql, params_from_iter(params.iter()))?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{self, NewDetection, NewRecord};
    use crate::template::{ControlType, FieldControl, LevelRow};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Store {
        let mut level_controls = BTreeMap::new();
        level_controls.insert(2, vec![FieldControl::new("Camera", ControlType::Note)]);
        let template = Template {
            controls: vec![FieldControl::new("Count", ControlType::Counter)],
            levels: vec![LevelRow::new(1, "Site"), LevelRow::new(2, "Station")],
            level_controls,
        };
        let store = Store::create(&dir.path().join("r.ddb"), &template).unwrap();
        let conn = store.conn();
        for (file, path) in [("1.jpg", "A/B"), ("2.jpg", "A/B/C"), ("3.jpg", "A/BC"), ("4.jpg", "A")] {
            let id = schema::insert_record(conn, &NewRecord::new(file, path)).unwrap();
            schema::insert_marker(conn, id, &BTreeMap::new()).unwrap();
            schema::insert_detection(conn, &NewDetection::new(id, 1, 0.9)).unwrap();
        }
        schema::upsert_folder_data(conn, 2, "A/B", &BTreeMap::new()).unwrap();
        schema::upsert_folder_data(conn, 2, "A/BC", &BTreeMap::new()).unwrap();
        store
    }

    #[test]
    fn test_remove_subtree_cascades() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let report = remove_subtree(&store, "A/B/").unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.folder_rows, 0);

        let conn = store.conn();
        let paths: Vec<String> = schema::list_records(conn)
            .unwrap()
            .into_iter()
            .map(|r| r.relative_path)
            .collect();
        assert_eq!(paths, vec!["A/BC".to_string(), "A".to_string()]);
        assert_eq!(schema::count_rows(conn, "main", "MarkersTable").unwrap(), 2);
        assert_eq!(schema::count_rows(conn, "main", "Detections").unwrap(), 2);
        assert_eq!(schema::list_folder_data(conn, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_drops_deeper_folder_rows() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let report = remove_subtree(&store, "A").unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(report.folder_rows, 2);
    }

    #[test]
    fn test_remove_refuses_root() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(matches!(remove_subtree(&store, "/"), Err(SyncError::InvalidPath(_))));
    }
}
