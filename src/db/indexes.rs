// Secondary indexes
// Dropped wholesale before bulk key rewrites and rebuilt afterwards.

use rusqlite::Connection;

use super::{quote_ident, schema};
use crate::constants::*;
use crate::error::Result;

pub fn ensure_file_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {idx_file} ON DataTable(File);
         CREATE INDEX IF NOT EXISTS {idx_rel} ON DataTable(RelativePath);
         CREATE INDEX IF NOT EXISTS {idx_rel_dt_file} ON DataTable(RelativePath, DateTime, File);
         CREATE INDEX IF NOT EXISTS {idx_rel_file} ON DataTable(RelativePath, File);",
        idx_file = INDEX_FILE,
        idx_rel = INDEX_RELATIVE_PATH,
        idx_rel_dt_file = INDEX_RELATIVE_PATH_DATE_TIME_FILE,
        idx_rel_file = INDEX_RELATIVE_PATH_FILE,
    ))?;
    Ok(())
}

/// Detection indexes exist only once a store has recognition data.
pub fn ensure_detection_indexes(conn: &Connection) -> Result<bool> {
    if schema::count_rows(conn, "main", DETECTIONS_TABLE)? == 0 {
        return Ok(false);
    }
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {idx_det} ON Detections(Id);
         CREATE INDEX IF NOT EXISTS {idx_cls} ON Detections(classification, conf, classification_conf, Id);
         CREATE INDEX IF NOT EXISTS {idx_vid} ON DetectionsVideo(detectionID);",
        idx_det = INDEX_DETECTION_ID,
        idx_cls = INDEX_DETECTIONS_CLASSIFICATION_CONFIDENCE,
        idx_vid = INDEX_DETECTION_VIDEO_ID,
    ))?;
    Ok(true)
}

pub fn episode_index_name(data_label: &str) -> String {
    format!("{}{}", INDEX_EPISODE_PREFIX, data_label)
}

/// Created on first use of an episode field; compaction does not rebuild it.
pub fn ensure_episode_index(conn: &Connection, data_label: &str) -> Result<()> {
    crate::template::validate_data_label(data_label)?;
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON DataTable({})",
        quote_ident(&episode_index_name(data_label)),
        quote_ident(data_label)
    ))?;
    Ok(())
}

/// Drop every secondary index on the record and detection tables.
pub fn drop_secondary_indexes(conn: &Connection) -> Result<usize> {
    let mut names: Vec<String> = [
        INDEX_FILE,
        INDEX_RELATIVE_PATH,
        INDEX_RELATIVE_PATH_DATE_TIME_FILE,
        INDEX_RELATIVE_PATH_FILE,
        INDEX_DETECTION_ID,
        INDEX_DETECTIONS_CLASSIFICATION_CONFIDENCE,
        INDEX_DETECTION_VIDEO_ID,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE ?1",
    )?;
    let episodes = stmt
        .query_map([format!("{}%", INDEX_EPISODE_PREFIX)], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    names.extend(episodes);

    for name in &names {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", quote_ident(name)))?;
    }
    Ok(names.len())
}

/// Rebuild the standard indexes after a bulk rewrite.
pub fn rebuild_indexes(conn: &Connection) -> Result<()> {
    ensure_file_indexes(conn)?;
    ensure_detection_indexes(conn)?;
    Ok(())
}

pub fn index_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{insert_detection, insert_record, NewDetection, NewRecord};
    use crate::db::Store;
    use crate::template::{ControlType, FieldControl, Template};
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> Store {
        let template = Template {
            controls: vec![FieldControl::new("Episode", ControlType::Note)],
            ..Default::default()
        };
        Store::create(&tmp.path().join("s.ddb"), &template).unwrap()
    }

    #[test]
    fn test_detection_indexes_wait_for_data() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        assert!(!ensure_detection_indexes(s.conn()).unwrap());

        let id = insert_record(s.conn(), &NewRecord::new("a.jpg", "")).unwrap();
        insert_detection(s.conn(), &NewDetection::new(id, 1, 0.5)).unwrap();
        assert!(ensure_detection_indexes(s.conn()).unwrap());
        assert!(index_names(s.conn()).unwrap().contains(&INDEX_DETECTION_ID.to_string()));
    }

    #[test]
    fn test_drop_includes_episode_and_rebuild_skips_it() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        ensure_episode_index(s.conn(), "Episode").unwrap();
        assert!(index_names(s.conn()).unwrap().contains(&episode_index_name("Episode")));

        drop_secondary_indexes(s.conn()).unwrap();
        assert!(index_names(s.conn()).unwrap().is_empty());

        rebuild_indexes(s.conn()).unwrap();
        let names = index_names(s.conn()).unwrap();
        assert!(names.contains(&INDEX_FILE.to_string()));
        assert!(!names.contains(&episode_index_name("Episode")));
    }
}
