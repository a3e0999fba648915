// Detection counts written into a Counter field
//
// Long scan: one record at a time, throttled progress, cooperative cancellation.
// A cancelled scan still writes what it computed, as one batch.

use std::sync::atomic::AtomicBool;

use rusqlite::{params, params_from_iter};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::constants::{DATA_TABLE, ID};
use crate::db::{quote_ident, schema, Store};
use crate::error::{Result, SyncError};
use crate::jobs::cancel_requested;
use crate::jobs::progress::{emit_progress_opt, JobProgress, ProgressSink, ProgressThrottle};
use crate::query::{Predicate, Selection};
use crate::template::ControlType;

#[derive(Debug, Clone, PartialEq)]
pub struct CountOptions {
    /// Counter field that receives the count.
    pub counter_label: String,
    /// Detections below this confidence are ignored.
    pub min_confidence: f64,
    /// Only count this detection category.
    pub category: Option<i64>,
    /// Only scan records in this folder subtree ("" = all).
    pub relative_path: String,
}

impl CountOptions {
    pub fn new(counter_label: impl Into<String>, min_confidence: f64) -> Self {
        Self {
            counter_label: counter_label.into(),
            min_confidence,
            category: None,
            relative_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountReport {
    pub scanned: usize,
    pub updated: usize,
    pub cancelled: bool,
}

pub fn populate_detection_counts(
    store: &Store,
    options: &CountOptions,
    config: &SyncConfig,
    sink: Option<&dyn ProgressSink>,
    cancel: Option<&AtomicBool>,
) -> Result<CountReport> {
    let _lock = store.lock()?;
    let conn = store.conn();

    let template = store.template()?;
    let is_counter = template
        .controls
        .iter()
        .any(|c| c.data_label == options.counter_label && c.control_type == ControlType::Counter);
    if !is_counter {
        return Err(SyncError::InvalidDataLabel(format!(
            "{} is not a Counter field",
            options.counter_label
        )));
    }

    let column = options.counter_label.as_str();
    let (sql, sql_params) = Selection::from(DATA_TABLE)
        .filter(Predicate::path_within(crate::constants::RELATIVE_PATH, options.relative_path.as_str()))
        .order_by(ID)
        .render_select(&[ID, column]);
    let records: Vec<(i64, String)> = conn
        .prepare(&sql)?
        .query_map(params_from_iter(sql_params), |row| {
            Ok((row.get(0)?, schema::value_to_string(row.get(1)?)))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let count_sql = match options.category {
        Some(_) => "SELECT count(*) FROM Detections WHERE Id = ?1 AND conf >= ?2 AND category = ?3",
        None => "SELECT count(*) FROM Detections WHERE Id = ?1 AND conf >= ?2",
    };
    let mut count_stmt = conn.prepare(count_sql)?;

    let job_id = format!("populate-{}", options.counter_label);
    let total = records.len() as u64;
    let mut throttle = ProgressThrottle::new(config.progress_interval());
    let mut report = CountReport::default();
    let mut pending: Vec<(i64, String)> = Vec::new();

    for (index, (id, current)) in records.iter().enumerate() {
        if cancel_requested(cancel) {
            report.cancelled = true;
            break;
        }

        let count: i64 = match options.category {
            Some(category) => count_stmt.query_row(params![id, options.min_confidence, category], |r| r.get(0))?,
            None => count_stmt.query_row(params![id, options.min_confidence], |r| r.get(0))?,
        };
        let value = count.to_string();
        if &value != current {
            pending.push((*id, value));
        }
        report.scanned += 1;

        throttle.emit(sink, || {
            JobProgress::new(&job_id, "counting", index as u64 + 1, total)
                .with_message(format!("{} change(s) so far", pending.len()))
        });
    }

    if !pending.is_empty() {
        let tx = conn.unchecked_transaction()?;
        {
            let mut update = tx.prepare(&format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                DATA_TABLE,
                quote_ident(column),
                ID
            ))?;
            for (id, value) in &pending {
                update.execute(params![value, id])?;
            }
        }
        tx.commit()?;
    }
    report.updated = pending.len();

    let done = JobProgress::new(&job_id, "counting", report.scanned as u64, total)
        .with_message(format!("{} record(s) updated", report.updated));
    emit_progress_opt(sink, &if report.cancelled { done.cancelled() } else { done });

    if report.cancelled {
        log::warn!(
            "Detection count scan cancelled after {}/{} records; {} update(s) kept",
            report.scanned,
            total,
            report.updated
        );
    } else {
        log::info!("Detection counts: {} scanned, {} updated", report.scanned, report.updated);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{get_field, insert_detection, insert_record, NewDetection, NewRecord};
    use crate::jobs::CancelRegistration;
    use crate::template::{FieldControl, Template};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> Store {
        let template = Template {
            controls: vec![
                FieldControl::new("Animals", ControlType::Counter),
                FieldControl::new("Note1", ControlType::Note),
            ],
            ..Default::default()
        };
        let store = Store::create(&tmp.path().join("s.ddb"), &template).unwrap();
        let conn = store.conn();
        for i in 0..4 {
            let id = insert_record(conn, &NewRecord::new(format!("{}.jpg", i), "Site")).unwrap();
            for _ in 0..i {
                insert_detection(conn, &NewDetection::new(id, 1, 0.9)).unwrap();
            }
            insert_detection(conn, &NewDetection::new(id, 1, 0.1)).unwrap();
        }
        store
    }

    #[test]
    fn test_counts_respect_confidence() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let report = populate_detection_counts(
            &store,
            &CountOptions::new("Animals", 0.5),
            &SyncConfig::default(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(report.scanned, 4);
        // Record 0 already holds the default "0"
        assert_eq!(report.updated, 3);
        assert!(!report.cancelled);
        for (id, expected) in [(1, "0"), (2, "1"), (3, "2"), (4, "3")] {
            assert_eq!(get_field(store.conn(), id, "Animals").unwrap().as_deref(), Some(expected));
        }
    }

    #[test]
    fn test_non_counter_field_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let err = populate_detection_counts(&store, &CountOptions::new("Note1", 0.5), &SyncConfig::default(), None, None)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidDataLabel(_)));
    }

    #[test]
    fn test_cancel_flushes_partial_batch() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let reg = CancelRegistration::new("test-populate-cancel");
        let config = SyncConfig { progress_interval_ms: 0, ..SyncConfig::default() };

        // Cancel once the third record has been reported
        let flag = reg.flag();
        let sink = |p: &JobProgress| {
            if p.current == 3 {
                flag.store(true, Ordering::Relaxed);
            }
        };
        let sink: &dyn ProgressSink = &sink;

        let report =
            populate_detection_counts(&store, &CountOptions::new("Animals", 0.5), &config, Some(sink), Some(reg.flag()))
                .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(get_field(store.conn(), 3, "Animals").unwrap().as_deref(), Some("2"));
        assert_eq!(get_field(store.conn(), 4, "Animals").unwrap().as_deref(), Some("0"));
    }
}
