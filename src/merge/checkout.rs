// Checkout: copy one folder subtree into a new, self-contained store

use std::path::Path;

use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;

use super::{column_list, shared_columns, shared_columns_between, SOURCE_ALIAS};
use crate::compact;
use crate::config::SyncConfig;
use crate::constants::*;
use crate::db::schema::{self, level_table};
use crate::db::{
    check_foreign_keys, defer_foreign_keys, discard_store_files, indexes, quote_ident, table_exists, Attached, Store,
};
use crate::error::{Result, SyncError};
use crate::lock::StoreLock;
use crate::query::{normalize_path, path_depth, Predicate, Selection};
use crate::template::Template;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReport {
    pub records: usize,
    pub markers: usize,
    pub detections: usize,
    pub video_detections: usize,
    pub folder_rows: usize,
    /// Folder levels above the checked-out folder, dropped from the child's hierarchy.
    pub levels_dropped: u32,
    pub compacted: bool,
}

/// Create a store at `dest_path` holding the records under `relative_path`.
/// Paths in the child are relative to the checked-out folder.
///
/// All or nothing: if any step fails the child store is removed again.
pub fn checkout(
    source: &Store,
    dest_path: &Path,
    relative_path: &str,
    config: &SyncConfig,
) -> Result<(Store, CheckoutReport)> {
    let path = normalize_path(relative_path);
    let depth = path_depth(&path);

    let _source_lock = source.lock()?;
    let template = source.template()?;
    if dest_path.exists() {
        return Err(SyncError::StoreExists(dest_path.display().to_string()));
    }
    // Locked before the child exists, so a refused lock leaves nothing behind
    let _child_lock = StoreLock::acquire(dest_path)?;
    let child = Store::create(dest_path, &template.rebased(depth))?;

    match fill_child(source, &child, &template, &path, config) {
        Ok(mut report) => {
            report.levels_dropped = depth;
            log::info!(
                "Checked out {} record(s) under '{}' from {} into {}",
                report.records,
                path,
                source.path().display(),
                child.path().display()
            );
            Ok((child, report))
        }
        Err(e) => {
            drop(child);
            discard_store_files(dest_path);
            log::warn!("Checkout into {} failed, child removed: {}", dest_path.display(), e);
            Err(e)
        }
    }
}

fn fill_child(
    source: &Store,
    child: &Store,
    template: &Template,
    path: &str,
    config: &SyncConfig,
) -> Result<CheckoutReport> {
    let conn = child.conn();
    let mut report = {
        let attached = Attached::new(conn, source.path(), SOURCE_ALIAS)?;
        let tx = conn.unchecked_transaction()?;
        defer_foreign_keys(&tx)?;

        let report = copy_subtree(&tx, attached.alias(), template, path)?;

        check_foreign_keys(&tx)?;
        tx.commit()?;
        report
    };
    indexes::rebuild_indexes(conn)?;

    if config.compact_after_checkout {
        compact::compact_unlocked(child)?;
        report.compacted = true;
    }
    Ok(report)
}

/// SQL expression stripping the checked-out folder from a path column.
/// `?1` binds the folder, `?2` the 1-based start of the remainder.
fn trimmed_path(column: &str, path: &str) -> String {
    if path.is_empty() {
        return column.to_string();
    }
    format!("CASE WHEN {c} = ?1 THEN '' ELSE substr({c}, ?2) END", c = column)
}

fn path_params(path: &str) -> Vec<Value> {
    if path.is_empty() {
        return Vec::new();
    }
    vec![
        Value::Text(path.to_string()),
        Value::Integer(path.chars().count() as i64 + 2),
    ]
}

fn copy_subtree(conn: &Connection, src: &str, template: &Template, path: &str) -> Result<CheckoutReport> {
    let mut report = CheckoutReport::default();

    // Records keep their keys; compaction closes the gaps afterwards
    let columns = shared_columns(conn, src, DATA_TABLE, &[RELATIVE_PATH])?;
    let mut params = path_params(path);
    let from = Selection::from(DATA_TABLE)
        .in_schema(src)
        .alias("s")
        .filter(Predicate::path_within("s.RelativePath", path))
        .order_by("s.Id")
        .render_from(&mut params);
    report.records = conn.execute(
        &format!(
            "INSERT INTO main.{t} ({rp}{cols}) SELECT {trimmed}{s_cols} {from}",
            t = DATA_TABLE,
            rp = RELATIVE_PATH,
            cols = column_list(&columns, None),
            trimmed = trimmed_path("s.RelativePath", path),
            s_cols = column_list(&columns, Some("s")),
            from = from,
        ),
        params_from_iter(params.iter()),
    )?;

    let columns = shared_columns(conn, src, MARKERS_TABLE, &[])?;
    report.markers = conn.execute(
        &format!(
            "INSERT INTO main.{t} ({cols}) SELECT {s_cols} FROM {src}.{t} AS s
             WHERE s.Id IN (SELECT Id FROM main.{data})",
            t = MARKERS_TABLE,
            cols = column_list(&columns, None).trim_start_matches(", "),
            s_cols = column_list(&columns, Some("s")).trim_start_matches(", "),
            src = src,
            data = DATA_TABLE,
        ),
        [],
    )?;

    report.detections = conn.execute(
        &format!(
            "INSERT INTO main.Detections (detectionID, Id, category, conf, bbox, classification, classification_conf)
             SELECT s.detectionID, s.Id, s.category, s.conf, s.bbox, s.classification, s.classification_conf
             FROM {src}.Detections AS s WHERE s.Id IN (SELECT Id FROM main.DataTable)",
            src = src
        ),
        [],
    )?;
    report.video_detections = conn.execute(
        &format!(
            "INSERT INTO main.DetectionsVideo (detectionID, frame_number, frame_rate)
             SELECT s.detectionID, s.frame_number, s.frame_rate
             FROM {src}.DetectionsVideo AS s WHERE s.detectionID IN (SELECT detectionID FROM main.Detections)",
            src = src
        ),
        [],
    )?;

    // Dictionaries and detector info travel whole so detections stay interpretable
    schema::replace_detection_categories(conn, &schema::load_detection_categories(conn, src)?)?;
    let (labels, descriptions) = schema::load_classification_categories(conn, src)?;
    schema::replace_classification_categories(conn, &labels, &descriptions)?;
    if let Some(info) = schema::get_info(conn, src)? {
        schema::replace_info(conn, &info)?;
    }

    let image_set = schema::get_image_set(conn, src)?;
    schema::set_quick_paste_terms(conn, &image_set.quick_paste_terms)?;
    schema::set_bounding_box_threshold(conn, image_set.bounding_box_display_threshold)?;

    // Folder rows below the checked-out folder, renumbered to the child's levels
    let depth = path_depth(path);
    for row in template.levels.iter().filter(|l| l.level > depth) {
        let source_table = level_table(row.level);
        let dest_table = level_table(row.level - depth);
        if !table_exists(conn, src, &source_table)? {
            continue;
        }
        let columns = shared_columns_between(conn, src, &source_table, &dest_table)?;
        let mut params = path_params(path);
        let from = Selection::from(source_table.as_str())
            .in_schema(src)
            .alias("s")
            .filter(Predicate::path_within("s.FolderDataPath", path))
            .render_from(&mut params);
        report.folder_rows += conn.execute(
            &format!(
                "INSERT INTO main.{dt} ({fdp}{cols}) SELECT {trimmed}{s_cols} {from}",
                dt = quote_ident(&dest_table),
                fdp = FOLDER_DATA_PATH,
                cols = column_list(&columns, None),
                trimmed = trimmed_path("s.FolderDataPath", path),
                s_cols = column_list(&columns, Some("s")),
                from = from,
            ),
            params_from_iter(params.iter()),
        )?;
    }

    Ok(report)
}
