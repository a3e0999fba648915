// Merge engine: fold one store into another under a path prefix
//
// Order of a merge:
//   1. version gate, level alignment, template diff (refusals are values, not errors)
//   2. attach the source, begin one transaction, defer foreign keys
//   3. records, markers, detections and level rows copied through key remaps
//   4. foreign key check, commit, detach, rebuild indexes
// Any failure before commit rolls back and leaves the destination untouched.

pub mod checkout;
pub mod remove;


use std::collections::BTreeSet;

use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;

use crate::compact;
use crate::config::SyncConfig;
use crate::constants::*;
use crate::db::schema::{self, level_table, ImageSet};
use crate::db::{check_foreign_keys, defer_foreign_keys, indexes, quote_ident, table_columns, table_exists, Attached, Store};
use crate::error::{Result, SyncError};
use crate::query::normalize_path;
use crate::recognition;
use crate::remap::{IdRemap, RemapStrategy};
use crate::template::diff::diff_templates;
use crate::template::Template;

pub(crate) const SOURCE_ALIAS: &str = "src";

/// Why two stores cannot be merged, or Ok.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CompatibilityCode {
    Ok,
    /// The source was written by a tool older than the destination accepts.
    VersionIncompatible { source_version: String, required: String },
    /// Folder levels do not line up.
    MetadataLevelsDiffer(String),
    /// The source holds fields the destination lacks; merging would drop them.
    DataLabelsDiffer(Vec<String>),
    /// Field types cannot be reconciled.
    TemplatesIncompatible(Vec<String>),
}

impl CompatibilityCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, CompatibilityCode::Ok)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub records: usize,
    pub markers: usize,
    pub detections: usize,
    pub video_detections: usize,
    pub folder_rows: usize,
    pub records_removed: usize,
    pub record_offset: i64,
    pub detection_offset: i64,
    pub detection_category_remaps: usize,
    pub classification_category_remaps: usize,
    pub compacted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MergeOutcome {
    Merged(MergeReport),
    Refused(CompatibilityCode),
}

/// Dotted version comparison. Unparseable versions are refused.
pub fn check_version(source: &ImageSet, dest: &ImageSet) -> CompatibilityCode {
    let refused = || CompatibilityCode::VersionIncompatible {
        source_version: source.version_compatibility.clone(),
        required: dest.backwards_compatibility.clone(),
    };
    let (Ok(written), Ok(required)) = (
        semver::Version::parse(source.version_compatibility.trim()),
        semver::Version::parse(dest.backwards_compatibility.trim()),
    ) else {
        return refused();
    };
    if written < required {
        return refused();
    }
    CompatibilityCode::Ok
}

fn label_set(template: &Template, level: u32) -> BTreeSet<&str> {
    template.controls_at(level).iter().map(|c| c.data_label.as_str()).collect()
}

/// Level alignment: source level k must be destination level k + levels_to_ignore.
pub fn check_levels(source: &Template, dest: &Template, levels_to_ignore: u32) -> CompatibilityCode {
    if source.levels.is_empty() {
        return CompatibilityCode::Ok;
    }
    if dest.levels.is_empty() {
        return CompatibilityCode::MetadataLevelsDiffer("the destination has no folder levels".to_string());
    }
    let remaining = (dest.levels.len() as u32).checked_sub(levels_to_ignore).unwrap_or(0);
    if remaining != source.levels.len() as u32 {
        return CompatibilityCode::MetadataLevelsDiffer(format!(
            "the source has {} folder level(s) but the destination has {} below the merge point",
            source.levels.len(),
            remaining
        ));
    }

    let rebased = dest.rebased(levels_to_ignore);
    for s in &source.levels {
        let Some(d) = rebased.level(s.level) else {
            return CompatibilityCode::MetadataLevelsDiffer(format!("level {} has no counterpart", s.level));
        };
        let same_alias = !s.alias.is_empty() && s.alias == d.alias;
        if s.guid != d.guid && !same_alias {
            return CompatibilityCode::MetadataLevelsDiffer(format!(
                "source level {} ('{}') does not match destination level {} ('{}')",
                s.level,
                s.alias,
                s.level + levels_to_ignore,
                d.alias
            ));
        }
        if label_set(source, s.level) != label_set(&rebased, s.level) {
            return CompatibilityCode::MetadataLevelsDiffer(format!(
                "level '{}' defines different fields in each store",
                s.alias
            ));
        }
    }
    CompatibilityCode::Ok
}

/// Decide whether `source` can be merged into `dest` at `levels_to_ignore`.
pub fn check_merge_compatible(source: &Store, dest: &Store, levels_to_ignore: u32) -> Result<CompatibilityCode> {
    let source_set = schema::get_image_set(source.conn(), "main")?;
    let dest_set = schema::get_image_set(dest.conn(), "main")?;
    let source_t = source.template()?;
    let dest_t = dest.template()?;
    Ok(check_templates(&source_set, &dest_set, &source_t, &dest_t, levels_to_ignore))
}

fn check_templates(
    source_set: &ImageSet,
    dest_set: &ImageSet,
    source: &Template,
    dest: &Template,
    levels_to_ignore: u32,
) -> CompatibilityCode {
    let code = check_version(source_set, dest_set);
    if !code.is_ok() {
        return code;
    }
    let code = check_levels(source, dest, levels_to_ignore);
    if !code.is_ok() {
        return code;
    }

    // Incoming data must fit the destination's definitions
    let diff = diff_templates(&dest.rebased(levels_to_ignore), source);
    if diff.has_type_incompatibilities() {
        return CompatibilityCode::TemplatesIncompatible(
            diff.type_incompatible.iter().map(|t| t.message.clone()).collect(),
        );
    }
    if diff.incompatible {
        return CompatibilityCode::TemplatesIncompatible(vec!["the folder hierarchies differ".to_string()]);
    }
    let dropped: Vec<String> = diff
        .fields_only_in_existing
        .values()
        .flatten()
        .map(|(label, _)| label.clone())
        .collect();
    if !dropped.is_empty() {
        return CompatibilityCode::DataLabelsDiffer(dropped);
    }
    CompatibilityCode::Ok
}

/// Merge `source` into `dest`, placing its records under `prefix`.
pub fn merge(
    dest: &Store,
    source: &Store,
    prefix: &str,
    levels_to_ignore: u32,
    config: &SyncConfig,
) -> Result<MergeOutcome> {
    run_merge(dest, source, prefix, levels_to_ignore, config, false)
}

/// Replace the destination subtree at `prefix` with `source`, in one transaction.
pub fn check_in(
    dest: &Store,
    source: &Store,
    prefix: &str,
    levels_to_ignore: u32,
    config: &SyncConfig,
) -> Result<MergeOutcome> {
    run_merge(dest, source, prefix, levels_to_ignore, config, true)
}

fn run_merge(
    dest: &Store,
    source: &Store,
    prefix: &str,
    levels_to_ignore: u32,
    config: &SyncConfig,
    replace_subtree: bool,
) -> Result<MergeOutcome> {
    if dest.path() == source.path() {
        return Err(SyncError::InvalidPath("cannot merge a store into itself".to_string()));
    }
    let prefix = normalize_path(prefix);

    let _dest_lock = dest.lock()?;
    let _source_lock = source.lock()?;

    let source_set = schema::get_image_set(source.conn(), "main")?;
    let dest_set = schema::get_image_set(dest.conn(), "main")?;
    let source_t = source.template()?;
    let dest_t = dest.template()?;
    let code = check_templates(&source_set, &dest_set, &source_t, &dest_t, levels_to_ignore);
    if !code.is_ok() {
        log::warn!("Refused to merge {} into {}: {:?}", source.path().display(), dest.path().display(), code);
        return Ok(MergeOutcome::Refused(code));
    }

    let conn = dest.conn();
    let mut report = {
        let attached = Attached::new(conn, source.path(), SOURCE_ALIAS)?;
        let tx = conn.unchecked_transaction()?;
        defer_foreign_keys(&tx)?;

        let removed = if replace_subtree {
            remove::remove_subtree_in(&tx, &dest_t, &prefix)?.records
        } else {
            0
        };
        let mut report = merge_into(&tx, attached.alias(), &source_t, &prefix, levels_to_ignore)?;
        report.records_removed = removed;

        check_foreign_keys(&tx)?;
        tx.commit()?;
        report
    };

    indexes::rebuild_indexes(conn)?;

    let max_id = schema::max_key(conn, "main", DATA_TABLE, ID)?;
    if config.compact_after_merge || max_id > config.compaction_key_threshold {
        compact::compact_unlocked(dest)?;
        report.compacted = true;
    }

    log::info!(
        "Merged {} record(s) and {} detection(s) from {} into {} under '{}'",
        report.records,
        report.detections,
        source.path().display(),
        dest.path().display(),
        prefix
    );
    Ok(MergeOutcome::Merged(report))
}

/// SQL expression that prefixes a folder path column. `?1` binds the prefix.
fn prefixed_path(column: &str) -> String {
    format!(
        "CASE WHEN ?1 = '' THEN {c} WHEN {c} = '' THEN ?1 ELSE ?1 || '{sep}' || {c} END",
        c = column,
        sep = PATH_DB_SEPARATOR
    )
}

/// Columns present in both `main.table` and `src.table`, minus `skip`.
pub(crate) fn shared_columns(conn: &Connection, src: &str, table: &str, skip: &[&str]) -> Result<Vec<String>> {
    let dest_cols = table_columns(conn, "main", table)?;
    let source_cols = table_columns(conn, src, table)?;
    Ok(dest_cols
        .into_iter()
        .filter(|c| !skip.contains(&c.as_str()))
        .filter(|c| source_cols.iter().any(|s| s.eq_ignore_ascii_case(c)))
        .collect())
}

pub(crate) fn column_list(columns: &[String], alias: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!(", {}.{}", a, quote_ident(c)),
            None => format!(", {}", quote_ident(c)),
        })
        .collect()
}

/// Copy everything from attached `src` into `main` inside the caller's transaction.
pub(crate) fn merge_into(
    conn: &Connection,
    src: &str,
    source_t: &Template,
    prefix: &str,
    levels_to_ignore: u32,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let prefix_param = [Value::Text(prefix.to_string())];

    // Records
    report.record_offset = schema::max_key(conn, "main", DATA_TABLE, ID)? + 1;
    let records = IdRemap::build(
        conn,
        "records",
        &format!("{}.{}", src, DATA_TABLE),
        ID,
        RemapStrategy::Offset(report.record_offset),
    )?;

    let columns = shared_columns(conn, src, DATA_TABLE, &[ID, RELATIVE_PATH])?;
    report.records = conn.execute(
        &format!(
            "INSERT INTO main.{t} ({id}, {rp}{cols}) SELECT {new_id}, {path}{s_cols} FROM {src}.{t} AS s ORDER BY s.{id}",
            t = DATA_TABLE,
            id = ID,
            rp = RELATIVE_PATH,
            cols = column_list(&columns, None),
            new_id = records.map_expr("s.Id"),
            path = prefixed_path("s.RelativePath"),
            s_cols = column_list(&columns, Some("s")),
            src = src,
        ),
        params_from_iter(prefix_param.iter()),
    )?;

    // Markers
    let columns = shared_columns(conn, src, MARKERS_TABLE, &[ID])?;
    report.markers = conn.execute(
        &format!(
            "INSERT INTO main.{t} ({id}{cols}) SELECT {new_id}{s_cols} FROM {src}.{t} AS s",
            t = MARKERS_TABLE,
            id = ID,
            cols = column_list(&columns, None),
            new_id = records.map_expr("s.Id"),
            s_cols = column_list(&columns, Some("s")),
            src = src,
        ),
        [],
    )?;

    // Detections
    if schema::count_rows(conn, src, DETECTIONS_TABLE)? > 0 {
        let dest_had_detections = schema::count_rows(conn, "main", DETECTIONS_TABLE)? > 0;
        let lookups = recognition::merge_dictionaries(conn, src)?;
        report.detection_category_remaps = lookups.detection.lookup.len();
        report.classification_category_remaps = lookups.classification.lookup.len();

        report.detection_offset = schema::max_key(conn, "main", DETECTIONS_TABLE, DETECTION_ID)? + 1;
        let detections = IdRemap::build(
            conn,
            "detections",
            &format!("{}.{}", src, DETECTIONS_TABLE),
            DETECTION_ID,
            RemapStrategy::Offset(report.detection_offset),
        )?;
        let categories = IdRemap::from_pairs(
            conn,
            "detection_categories",
            lookups.detection.lookup.iter().map(|(k, v)| (*k as i64, *v as i64)),
        )?;
        let classes = IdRemap::from_pairs(
            conn,
            "classification_categories",
            lookups.classification.lookup.iter().map(|(k, v)| (*k as i64, *v as i64)),
        )?;

        report.detections = conn.execute(
            &format!(
                "INSERT INTO main.Detections (detectionID, Id, category, conf, bbox, classification, classification_conf)
                 SELECT {det}, {rec}, {cat}, s.conf, s.bbox, {cls}, s.classification_conf
                 FROM {src}.Detections AS s ORDER BY s.detectionID",
                det = detections.map_expr("s.detectionID"),
                rec = records.map_expr("s.Id"),
                cat = categories.map_expr("s.category"),
                cls = classes.map_expr("s.classification"),
                src = src,
            ),
            [],
        )?;
        report.video_detections = conn.execute(
            &format!(
                "INSERT INTO main.DetectionsVideo (detectionID, frame_number, frame_rate)
                 SELECT {det}, s.frame_number, s.frame_rate FROM {src}.DetectionsVideo AS s",
                det = detections.map_expr("s.detectionID"),
                src = src,
            ),
            [],
        )?;

        if dest_had_detections {
            schema::set_bounding_box_threshold(conn, UNDEFINED_BOUNDING_BOX_THRESHOLD)?;
        }
        detections.drop_table(conn)?;
        categories.drop_table(conn)?;
        classes.drop_table(conn)?;
    }
    records.drop_table(conn)?;

    // Folder-level metadata; existing destination rows win
    for row in &source_t.levels {
        let source_table = level_table(row.level);
        let dest_table = level_table(row.level + levels_to_ignore);
        if !table_exists(conn, src, &source_table)? || !table_exists(conn, "main", &dest_table)? {
            continue;
        }
        let columns = shared_columns_between(conn, src, &source_table, &dest_table)?;
        report.folder_rows += conn.execute(
            &format!(
                "INSERT OR IGNORE INTO main.{dt} ({fdp}{cols}) SELECT {path}{s_cols} FROM {src}.{st} AS s",
                dt = quote_ident(&dest_table),
                st = quote_ident(&source_table),
                fdp = FOLDER_DATA_PATH,
                cols = column_list(&columns, None),
                path = prefixed_path("s.FolderDataPath"),
                s_cols = column_list(&columns, Some("s")),
                src = src,
            ),
            params_from_iter(prefix_param.iter()),
        )?;
    }

    Ok(report)
}

/// Like shared_columns, for level tables whose names differ between the stores.
pub(crate) fn shared_columns_between(
    conn: &Connection,
    src: &str,
    source_table: &str,
    dest_table: &str,
) -> Result<Vec<String>> {
    let dest_cols = table_columns(conn, "main", dest_table)?;
    let source_cols = table_columns(conn, src, source_table)?;
    Ok(dest_cols
        .into_iter()
        .filter(|c| c != ID && c != FOLDER_DATA_PATH)
        .filter(|c| source_cols.iter().any(|s| s.eq_ignore_ascii_case(c)))
        .collect())
}
