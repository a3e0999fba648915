// Database schema types and query helpers

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{quote_ident, quote_literal, table_columns, table_exists};
use crate::constants::*;
use crate::error::{Result, SyncError};
use crate::template::{ChoiceList, ControlType, FieldControl, LevelRow, Template};

/// Name of the table holding folder metadata for `level`.
pub fn level_table(level: u32) -> String {
    format!("{}{}", LEVEL_TABLE_PREFIX, level)
}

/// Render any stored value as text; NULL becomes "".
pub fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).to_string(),
    }
}

// ----- Image set -----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSet {
    pub root_folder: String,
    pub version_compatibility: String,
    pub backwards_compatibility: String,
    pub bounding_box_display_threshold: f64,
    pub quick_paste_terms: String,
}

pub fn get_image_set(conn: &Connection, db: &str) -> Result<ImageSet> {
    let image_set = conn.query_row(
        &format!(
            "SELECT RootFolder, VersionCompatibility, BackwardsCompatibility, BoundingBoxDisplayThreshold, QuickPasteTerms
             FROM {}.{} WHERE Id = 1",
            db, IMAGE_SET_TABLE
        ),
        [],
        |row| {
            Ok(ImageSet {
                root_folder: row.get(0)?,
                version_compatibility: row.get(1)?,
                backwards_compatibility: row.get(2)?,
                bounding_box_display_threshold: row.get(3)?,
                quick_paste_terms: row.get(4)?,
            })
        },
    )?;
    Ok(image_set)
}

pub fn set_bounding_box_threshold(conn: &Connection, threshold: f64) -> Result<()> {
    conn.execute(
        "UPDATE ImageSetTable SET BoundingBoxDisplayThreshold = ?1 WHERE Id = 1",
        params![threshold],
    )?;
    Ok(())
}

pub fn set_quick_paste_terms(conn: &Connection, terms: &str) -> Result<()> {
    conn.execute("UPDATE ImageSetTable SET QuickPasteTerms = ?1 WHERE Id = 1", params![terms])?;
    Ok(())
}

pub fn set_version_compatibility(conn: &Connection, version: &str) -> Result<()> {
    conn.execute("UPDATE ImageSetTable SET VersionCompatibility = ?1 WHERE Id = 1", params![version])?;
    Ok(())
}

// ----- Template -----

const CONTROL_COLUMNS: &str = "DataLabel, Type, Label, Tooltip, DefaultValue, ControlOrder, SpreadsheetOrder, \
                               TXTBOXWIDTH, Copyable, Visible, ExportToCSV, List";

fn control_from_row(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<(FieldControl, String, String)> {
    let type_name: String = row.get(offset + 1)?;
    let list: String = row.get(offset + 11)?;
    let control = FieldControl {
        data_label: row.get(offset)?,
        // Placeholder; the caller parses type_name and fails properly
        control_type: ControlType::Note,
        label: row.get(offset + 2)?,
        tooltip: row.get(offset + 3)?,
        default_value: row.get(offset + 4)?,
        control_order: row.get(offset + 5)?,
        spreadsheet_order: row.get(offset + 6)?,
        width: row.get(offset + 7)?,
        copyable: row.get(offset + 8)?,
        visible: row.get(offset + 9)?,
        export_to_csv: row.get(offset + 10)?,
        choices: ChoiceList::default(),
    };
    Ok((control, type_name, list))
}

fn finish_control((mut control, type_name, list): (FieldControl, String, String)) -> Result<FieldControl> {
    control.control_type = type_name.parse()?;
    control.choices = ChoiceList::from_json(&list)?;
    Ok(control)
}

pub fn load_template(conn: &Connection) -> Result<Template> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY ControlOrder, Id",
        CONTROL_COLUMNS, TEMPLATE_TABLE
    ))?;
    let raw = stmt
        .query_map([], |row| control_from_row(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let controls = raw.into_iter().map(finish_control).collect::<Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT Level, Guid, Alias FROM {} ORDER BY Level",
        FOLDER_DATA_INFO_TABLE
    ))?;
    let levels = stmt
        .query_map([], |row| {
            Ok(LevelRow {
                level: row.get(0)?,
                guid: row.get(1)?,
                alias: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT Level, {} FROM {} ORDER BY Level, ControlOrder, Id",
        CONTROL_COLUMNS, FOLDER_DATA_TEMPLATE_TABLE
    ))?;
    let raw = stmt
        .query_map([], |row| Ok((row.get::<_, u32>(0)?, control_from_row(row, 1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut level_controls: BTreeMap<u32, Vec<FieldControl>> = BTreeMap::new();
    for (level, parts) in raw {
        level_controls.entry(level).or_default().push(finish_control(parts)?);
    }

    Ok(Template { controls, levels, level_controls })
}

fn insert_control(conn: &Connection, table: &str, level: Option<u32>, c: &FieldControl) -> Result<()> {
    let list = if c.choices == ChoiceList::default() { String::new() } else { c.choices.to_json()? };
    let (level_col, level_param) = match level {
        Some(_) => ("Level, ", "?13, "),
        None => ("", ""),
    };
    let sql = format!(
        "INSERT INTO {} ({}{}) VALUES ({}?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        table, level_col, CONTROL_COLUMNS, level_param
    );
    let mut values: Vec<Value> = vec![
        Value::Text(c.data_label.clone()),
        Value::Text(c.control_type.as_str().to_string()),
        Value::Text(c.label.clone()),
        Value::Text(c.tooltip.clone()),
        Value::Text(c.default_value.clone()),
        Value::Integer(c.control_order),
        Value::Integer(c.spreadsheet_order),
        Value::Integer(c.width),
        Value::Integer(c.copyable as i64),
        Value::Integer(c.visible as i64),
        Value::Integer(c.export_to_csv as i64),
        Value::Text(list),
    ];
    if let Some(level) = level {
        values.push(Value::Integer(level as i64));
    }
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

/// Replace every template row (controls, hierarchy, level controls) with `template`.
pub fn replace_template(conn: &Connection, template: &Template) -> Result<()> {
    conn.execute_batch(&format!(
        "DELETE FROM {}; DELETE FROM {}; DELETE FROM {};",
        TEMPLATE_TABLE, FOLDER_DATA_INFO_TABLE, FOLDER_DATA_TEMPLATE_TABLE
    ))?;
    for control in &template.controls {
        insert_control(conn, TEMPLATE_TABLE, None, control)?;
    }
    for row in &template.levels {
        conn.execute(
            "INSERT INTO FolderDataInfo (Level, Guid, Alias) VALUES (?1, ?2, ?3)",
            params![row.level, row.guid, row.alias],
        )?;
    }
    for (level, controls) in &template.level_controls {
        for control in controls {
            insert_control(conn, FOLDER_DATA_TEMPLATE_TABLE, Some(*level), control)?;
        }
    }
    Ok(())
}

fn add_missing_columns(conn: &Connection, table: &str, controls: &[&FieldControl]) -> Result<usize> {
    let existing = table_columns(conn, "main", table)?;
    let mut added = 0;
    for control in controls {
        if existing.iter().any(|c| c.eq_ignore_ascii_case(&control.data_label)) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT NOT NULL DEFAULT {}",
            quote_ident(table),
            quote_ident(&control.data_label),
            quote_literal(&control.default_value)
        ))?;
        added += 1;
    }
    Ok(added)
}

pub fn create_level_table(conn: &Connection, level: u32, controls: &[FieldControl]) -> Result<()> {
    let mut columns = vec![
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", ID),
        format!("{} TEXT NOT NULL UNIQUE", FOLDER_DATA_PATH),
    ];
    for control in controls {
        columns.push(format!(
            "{} TEXT NOT NULL DEFAULT {}",
            quote_ident(&control.data_label),
            quote_literal(&control.default_value)
        ));
    }
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&level_table(level)),
        columns.join(", ")
    ))?;
    Ok(())
}

/// Add data columns and Level tables that `template` needs. Never drops anything.
pub fn ensure_template_columns(conn: &Connection, template: &Template) -> Result<usize> {
    let mut added = add_missing_columns(conn, DATA_TABLE, &template.controls.iter().collect::<Vec<_>>())?;

    let counters: Vec<&FieldControl> = template
        .controls
        .iter()
        .filter(|c| c.control_type == ControlType::Counter)
        .collect();
    added += add_missing_columns(conn, MARKERS_TABLE, &counters)?;

    for row in &template.levels {
        let controls = template.controls_at(row.level);
        let table = level_table(row.level);
        if table_exists(conn, "main", &table)? {
            added += add_missing_columns(conn, &table, &controls.iter().collect::<Vec<_>>())?;
        } else {
            create_level_table(conn, row.level, controls)?;
        }
    }
    Ok(added)
}

// ----- Records -----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Explicit key; None lets the store choose.
    pub id: Option<i64>,
    pub file: String,
    pub relative_path: String,
    pub date_time: String,
    /// Template field values by data label.
    pub values: BTreeMap<String, String>,
}

impl NewRecord {
    pub fn new(file: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            relative_path: relative_path.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_date_time(mut self, date_time: impl Into<String>) -> Self {
        self.date_time = date_time.into();
        self
    }

    pub fn with_value(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(label.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub file: String,
    pub relative_path: String,
    pub date_time: String,
    pub delete_flag: String,
    pub values: BTreeMap<String, String>,
}

pub fn insert_record(conn: &Connection, record: &NewRecord) -> Result<i64> {
    let mut columns = vec![FILE.to_string(), RELATIVE_PATH.to_string(), DATE_TIME.to_string()];
    let mut values = vec![
        Value::Text(record.file.clone()),
        Value::Text(record.relative_path.clone()),
        Value::Text(record.date_time.clone()),
    ];
    if let Some(id) = record.id {
        columns.push(ID.to_string());
        values.push(Value::Integer(id));
    }
    for (label, value) in &record.values {
        columns.push(quote_ident(label));
        values.push(Value::Text(value.clone()));
    }
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            DATA_TABLE,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values),
    )?;
    Ok(conn.last_insert_rowid())
}

/// All records ordered by key, with every template column.
pub fn list_records(conn: &Connection) -> Result<Vec<Record>> {
    let columns = table_columns(conn, "main", DATA_TABLE)?;
    let extra: Vec<&String> = columns
        .iter()
        .filter(|c| !FIXED_DATA_COLUMNS.contains(&c.as_str()))
        .collect();
    let mut select = vec![
        ID.to_string(),
        FILE.to_string(),
        RELATIVE_PATH.to_string(),
        DATE_TIME.to_string(),
        DELETE_FLAG.to_string(),
    ];
    select.extend(extra.iter().map(|c| quote_ident(c)));

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY {}",
        select.join(", "),
        DATA_TABLE,
        ID
    ))?;
    let records = stmt
        .query_map([], |row| {
            let mut values = BTreeMap::new();
            for (i, label) in extra.iter().enumerate() {
                values.insert((*label).clone(), value_to_string(row.get(5 + i)?));
            }
            Ok(Record {
                id: row.get(0)?,
                file: row.get(1)?,
                relative_path: row.get(2)?,
                date_time: row.get(3)?,
                delete_flag: row.get(4)?,
                values,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn record_ids(conn: &Connection, table: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM {} ORDER BY {}", ID, table, ID))?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub fn count_rows(conn: &Connection, db: &str, table: &str) -> Result<i64> {
    let n = conn.query_row(
        &format!("SELECT count(*) FROM {}.{}", db, quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Largest value of `column` in `db.table`, 0 when empty.
pub fn max_key(conn: &Connection, db: &str, table: &str, column: &str) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        &format!("SELECT max({}) FROM {}.{}", quote_ident(column), db, quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0))
}

pub fn get_field(conn: &Connection, id: i64, data_label: &str) -> Result<Option<String>> {
    let value: Option<Value> = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE Id = ?1", quote_ident(data_label), DATA_TABLE),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.map(value_to_string))
}

pub fn set_field(conn: &Connection, id: i64, data_label: &str, value: &str) -> Result<()> {
    let changed = conn.execute(
        &format!("UPDATE {} SET {} = ?1 WHERE Id = ?2", DATA_TABLE, quote_ident(data_label)),
        params![value, id],
    )?;
    if changed == 0 {
        return Err(SyncError::Other(format!("record {} not found", id)));
    }
    Ok(())
}

// ----- Markers -----

pub fn insert_marker(conn: &Connection, id: i64, values: &BTreeMap<String, String>) -> Result<()> {
    let mut columns = vec![ID.to_string()];
    let mut params: Vec<Value> = vec![Value::Integer(id)];
    for (label, value) in values {
        columns.push(quote_ident(label));
        params.push(Value::Text(value.clone()));
    }
    let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{}", i)).collect();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            MARKERS_TABLE,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(params),
    )?;
    Ok(())
}

// ----- Detections -----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub detection_id: i64,
    pub record_id: i64,
    pub category: i64,
    pub conf: f64,
    pub bbox: String,
    pub classification: Option<i64>,
    pub classification_conf: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDetection {
    pub record_id: i64,
    pub category: i64,
    pub conf: f64,
    pub bbox: String,
    pub classification: Option<i64>,
    pub classification_conf: Option<f64>,
}

impl NewDetection {
    pub fn new(record_id: i64, category: i64, conf: f64) -> Self {
        Self {
            record_id,
            category,
            conf,
            bbox: String::new(),
            classification: None,
            classification_conf: None,
        }
    }

    pub fn classified(mut self, classification: i64, conf: f64) -> Self {
        self.classification = Some(classification);
        self.classification_conf = Some(conf);
        self
    }
}

pub fn insert_detection(conn: &Connection, d: &NewDetection) -> Result<i64> {
    conn.execute(
        "INSERT INTO Detections (Id, category, conf, bbox, classification, classification_conf)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![d.record_id, d.category, d.conf, d.bbox, d.classification, d.classification_conf],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_video_detection(conn: &Connection, detection_id: i64, frame_number: i64, frame_rate: f64) -> Result<()> {
    conn.execute(
        "INSERT INTO DetectionsVideo (detectionID, frame_number, frame_rate) VALUES (?1, ?2, ?3)",
        params![detection_id, frame_number, frame_rate],
    )?;
    Ok(())
}

pub fn list_detections(conn: &Connection) -> Result<Vec<Detection>> {
    let mut stmt = conn.prepare(
        "SELECT detectionID, Id, category, conf, bbox, classification, classification_conf
         FROM Detections ORDER BY detectionID",
    )?;
    let detections = stmt
        .query_map([], |row| {
            Ok(Detection {
                detection_id: row.get(0)?,
                record_id: row.get(1)?,
                category: row.get(2)?,
                conf: row.get(3)?,
                bbox: row.get(4)?,
                classification: row.get(5)?,
                classification_conf: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(detections)
}

/// (detectionID, frame_number) pairs ordered by detectionID.
pub fn list_video_detections(conn: &Connection) -> Result<Vec<(i64, i64)>> {
    let mut stmt = conn.prepare("SELECT detectionID, frame_number FROM DetectionsVideo ORDER BY detectionID, frame_number")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ----- Category dictionaries -----

pub fn load_detection_categories(conn: &Connection, db: &str) -> Result<BTreeMap<u32, String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT category, label FROM {}.{} ORDER BY category",
        db, DETECTION_CATEGORIES_TABLE
    ))?;
    let map = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<BTreeMap<u32, String>, _>>()?;
    Ok(map)
}

pub fn replace_detection_categories(conn: &Connection, categories: &BTreeMap<u32, String>) -> Result<()> {
    conn.execute_batch(&format!("DELETE FROM {}", DETECTION_CATEGORIES_TABLE))?;
    let mut stmt = conn.prepare("INSERT INTO DetectionCategories (category, label) VALUES (?1, ?2)")?;
    for (category, label) in categories {
        stmt.execute(params![category, label])?;
    }
    Ok(())
}

/// (labels, descriptions) keyed by category number.
pub fn load_classification_categories(
    conn: &Connection,
    db: &str,
) -> Result<(BTreeMap<u32, String>, BTreeMap<u32, String>)> {
    let mut stmt = conn.prepare(&format!(
        "SELECT category, label, description FROM {}.{} ORDER BY category",
        db, CLASSIFICATION_CATEGORIES_TABLE
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut labels = BTreeMap::new();
    let mut descriptions = BTreeMap::new();
    for (category, label, description) in rows {
        labels.insert(category, label);
        if !description.is_empty() {
            descriptions.insert(category, description);
        }
    }
    Ok((labels, descriptions))
}

pub fn replace_classification_categories(
    conn: &Connection,
    labels: &BTreeMap<u32, String>,
    descriptions: &BTreeMap<u32, String>,
) -> Result<()> {
    conn.execute_batch(&format!("DELETE FROM {}", CLASSIFICATION_CATEGORIES_TABLE))?;
    let mut stmt = conn.prepare(
        "INSERT INTO ClassificationCategories (category, label, description) VALUES (?1, ?2, ?3)",
    )?;
    for (category, label) in labels {
        let description = descriptions.get(category).map(String::as_str).unwrap_or("");
        stmt.execute(params![category, label, description])?;
    }
    Ok(())
}

// ----- Detector info -----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorInfo {
    pub detector: String,
    pub detector_version: String,
    pub detection_completion_time: String,
    pub classifier: String,
    pub classification_completion_time: String,
    pub typical_detection_threshold: Option<f64>,
    pub conservative_detection_threshold: Option<f64>,
    pub typical_classification_threshold: Option<f64>,
}

pub fn get_info(conn: &Connection, db: &str) -> Result<Option<DetectorInfo>> {
    let info = conn
        .query_row(
            &format!(
                "SELECT detector, megadetector_version, detection_completion_time, classifier,
                        classification_completion_time, typical_detection_threshold,
                        conservative_detection_threshold, typical_classification_threshold
                 FROM {}.{} ORDER BY infoID LIMIT 1",
                db, INFO_TABLE
            ),
            [],
            |row| {
                Ok(DetectorInfo {
                    detector: row.get(0)?,
                    detector_version: row.get(1)?,
                    detection_completion_time: row.get(2)?,
                    classifier: row.get(3)?,
                    classification_completion_time: row.get(4)?,
                    typical_detection_threshold: row.get(5)?,
                    conservative_detection_threshold: row.get(6)?,
                    typical_classification_threshold: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(info)
}

pub fn replace_info(conn: &Connection, info: &DetectorInfo) -> Result<()> {
    conn.execute_batch(&format!("DELETE FROM {}", INFO_TABLE))?;
    conn.execute(
        "INSERT INTO Info (infoID, detector, megadetector_version, detection_completion_time, classifier,
                           classification_completion_time, typical_detection_threshold,
                           conservative_detection_threshold, typical_classification_threshold)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            info.detector,
            info.detector_version,
            info.detection_completion_time,
            info.classifier,
            info.classification_completion_time,
            info.typical_detection_threshold.unwrap_or(DEFAULT_TYPICAL_DETECTION_THRESHOLD),
            info.conservative_detection_threshold.unwrap_or(DEFAULT_CONSERVATIVE_DETECTION_THRESHOLD),
            info.typical_classification_threshold.unwrap_or(DEFAULT_TYPICAL_CLASSIFICATION_THRESHOLD),
        ],
    )?;
    Ok(())
}

// ----- Folder-level metadata -----

/// Insert or update the metadata row of one folder at `level`.
pub fn upsert_folder_data(
    conn: &Connection,
    level: u32,
    folder_path: &str,
    values: &BTreeMap<String, String>,
) -> Result<()> {
    let table = quote_ident(&level_table(level));
    conn.execute(
        &format!("INSERT OR IGNORE INTO {} ({}) VALUES (?1)", table, FOLDER_DATA_PATH),
        params![folder_path],
    )?;
    for (label, value) in values {
        conn.execute(
            &format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", table, quote_ident(label), FOLDER_DATA_PATH),
            params![value, folder_path],
        )?;
    }
    Ok(())
}

/// Metadata rows of `level` ordered by folder path.
pub fn list_folder_data(conn: &Connection, level: u32) -> Result<Vec<(String, BTreeMap<String, String>)>> {
    let table = level_table(level);
    let columns = table_columns(conn, "main", &table)?;
    let extra: Vec<&String> = columns
        .iter()
        .filter(|c| c.as_str() != ID && c.as_str() != FOLDER_DATA_PATH)
        .collect();
    let mut select = vec![FOLDER_DATA_PATH.to_string()];
    select.extend(extra.iter().map(|c| quote_ident(c)));

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY {}",
        select.join(", "),
        quote_ident(&table),
        FOLDER_DATA_PATH
    ))?;
    let rows = stmt
        .query_map([], |row| {
            let mut values = BTreeMap::new();
            for (i, label) in extra.iter().enumerate() {
                values.insert((*label).clone(), value_to_string(row.get(1 + i)?));
            }
            Ok((row.get(0)?, values))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
