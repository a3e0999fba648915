// Date/time corrections over a folder subtree
//
// Every pass reads the selected records once, computes new values in memory
// and writes them as one batch. A cancelled pass writes nothing.

use std::sync::atomic::AtomicBool;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::constants::{DATA_TABLE, DATE_TIME, DATE_TIME_FORMAT, FILE, ID, MIN_TIME_ADJUSTMENT_MS, RELATIVE_PATH};
use crate::db::Store;
use crate::error::Result;
use crate::jobs::cancel_requested;
use crate::jobs::progress::{emit_progress_opt, JobProgress, ProgressSink, ProgressThrottle};
use crate::query::{Predicate, Selection};

/// One record as seen by a delta function.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTime {
    pub id: i64,
    pub file: String,
    pub relative_path: String,
    /// Position in the pass (ordered by folder, time, file name).
    pub index: usize,
    pub count: usize,
    pub date_time: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAdjustReport {
    pub scanned: usize,
    pub changed: usize,
    /// Deltas under one second, left alone.
    pub skipped_small: usize,
    /// Records whose stored value could not be parsed.
    pub unparseable: Vec<i64>,
    /// Records whose shifted value falls outside the representable range.
    pub out_of_range: Vec<i64>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapReport {
    pub swapped: usize,
    /// Day equals month; nothing to do.
    pub unchanged: usize,
    /// Records whose swapped date does not exist (e.g. day 13 or later).
    pub invalid: Vec<i64>,
    pub unparseable: Vec<i64>,
}

pub fn parse_date_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), DATE_TIME_FORMAT).ok()
}

pub fn format_date_time(value: &NaiveDateTime) -> String {
    value.format(DATE_TIME_FORMAT).to_string()
}

struct Row {
    id: i64,
    file: String,
    relative_path: String,
    date_time: String,
}

fn load_rows(conn: &Connection, relative_path: &str) -> Result<Vec<Row>> {
    let (sql, params) = Selection::from(DATA_TABLE)
        .filter(Predicate::path_within(RELATIVE_PATH, relative_path))
        .order_by(RELATIVE_PATH)
        .order_by(DATE_TIME)
        .order_by(FILE)
        .render_select(&[ID, FILE, RELATIVE_PATH, DATE_TIME]);
    let rows = conn
        .prepare(&sql)?
        .query_map(params_from_iter(params), |row| {
            Ok(Row {
                id: row.get(0)?,
                file: row.get(1)?,
                relative_path: row.get(2)?,
                date_time: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn write_batch(conn: &Connection, updates: &[(i64, String)]) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(&format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", DATA_TABLE, DATE_TIME, ID))?;
        for (id, value) in updates {
            stmt.execute(params![value, id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Shift each record's date/time by `delta_fn(record)`.
pub fn adjust_file_times(
    store: &Store,
    relative_path: &str,
    mut delta_fn: impl FnMut(&FileTime) -> Duration,
    config: &SyncConfig,
    sink: Option<&dyn ProgressSink>,
    cancel: Option<&AtomicBool>,
) -> Result<TimeAdjustReport> {
    let _lock = store.lock()?;
    let conn = store.conn();
    let rows = load_rows(conn, relative_path)?;

    let job_id = "adjust-time";
    let count = rows.len();
    let mut throttle = ProgressThrottle::new(config.progress_interval());
    let mut report = TimeAdjustReport::default();
    let mut updates = Vec::new();

    for (index, row) in rows.into_iter().enumerate() {
        if cancel_requested(cancel) {
            report.cancelled = true;
            break;
        }
        report.scanned += 1;

        let Some(date_time) = parse_date_time(&row.date_time) else {
            report.unparseable.push(row.id);
            continue;
        };
        let file_time = FileTime {
            id: row.id,
            file: row.file,
            relative_path: row.relative_path,
            index,
            count,
            date_time,
        };
        let delta = delta_fn(&file_time);
        if delta.num_milliseconds().abs() < MIN_TIME_ADJUSTMENT_MS {
            report.skipped_small += 1;
        } else {
            match date_time.checked_add_signed(delta) {
                Some(shifted) => updates.push((file_time.id, format_date_time(&shifted))),
                None => report.out_of_range.push(file_time.id),
            }
        }

        throttle.emit(sink, || JobProgress::new(job_id, "adjusting", index as u64 + 1, count as u64));
    }

    if report.cancelled {
        emit_progress_opt(sink, &JobProgress::new(job_id, "adjusting", report.scanned as u64, count as u64).cancelled());
        log::warn!("Time adjustment cancelled after {}/{} records; nothing written", report.scanned, count);
        return Ok(report);
    }

    if !report.out_of_range.is_empty() {
        log::warn!("{} date/time value(s) would leave the supported range; left unchanged", report.out_of_range.len());
    }
    write_batch(conn, &updates)?;
    report.changed = updates.len();
    log::info!(
        "Adjusted {} of {} date/time value(s) in {} ({} below one second)",
        report.changed,
        report.scanned,
        store.path().display(),
        report.skipped_small
    );
    Ok(report)
}

/// Swap day and month where the result is a real date.
pub fn swap_day_and_month(store: &Store, relative_path: &str) -> Result<SwapReport> {
    let _lock = store.lock()?;
    let conn = store.conn();
    let mut report = SwapReport::default();
    let mut updates = Vec::new();

    for row in load_rows(conn, relative_path)? {
        let Some(date_time) = parse_date_time(&row.date_time) else {
            report.unparseable.push(row.id);
            continue;
        };
        let date = date_time.date();
        if date.day() == date.month() {
            report.unchanged += 1;
            continue;
        }
        match NaiveDate::from_ymd_opt(date.year(), date.day(), date.month()) {
            Some(swapped) => updates.push((row.id, format_date_time(&swapped.and_time(date_time.time())))),
            None => report.invalid.push(row.id),
        }
    }

    write_batch(conn, &updates)?;
    report.swapped = updates.len();
    if !report.invalid.is_empty() {
        log::warn!("{} date(s) could not be swapped", report.invalid.len());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{get_field, insert_record, NewRecord};
    use crate::jobs::CancelRegistration;
    use crate::template::Template;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> Store {
        let store = Store::create(&tmp.path().join("t.ddb"), &Template::default()).unwrap();
        for (file, dt) in [
            ("a.jpg", "2024-03-05 10:00:00"),
            ("b.jpg", "2024-03-05 10:00:30.500"),
            ("c.jpg", "2024-03-20 23:59:59"),
        ] {
            insert_record(store.conn(), &NewRecord::new(file, "Site").with_date_time(dt)).unwrap();
        }
        store
    }

    fn watch_writes(store: &Store) {
        store
            .conn()
            .execute_batch(
                "CREATE TEMP TABLE writes (n INTEGER);
                 CREATE TEMP TRIGGER count_writes AFTER UPDATE ON main.DataTable
                 BEGIN INSERT INTO writes VALUES (1); END;",
            )
            .unwrap();
    }

    fn writes(store: &Store) -> i64 {
        store.conn().query_row("SELECT count(*) FROM temp.writes", [], |r| r.get(0)).unwrap()
    }

    fn date_time(store: &Store, id: i64) -> String {
        get_field(store.conn(), id, "DateTime").unwrap().unwrap()
    }

    #[test]
    fn test_half_second_shift_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        watch_writes(&store);

        let report =
            adjust_file_times(&store, "", |_| Duration::milliseconds(500), &SyncConfig::default(), None, None).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.skipped_small, 3);
        assert_eq!(report.changed, 0);
        assert_eq!(writes(&store), 0);
    }

    #[test]
    fn test_two_second_shift_writes_every_record() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        watch_writes(&store);

        let report =
            adjust_file_times(&store, "Site", |_| Duration::seconds(2), &SyncConfig::default(), None, None).unwrap();
        assert_eq!(report.changed, 3);
        assert_eq!(writes(&store), 3);
        assert_eq!(date_time(&store, 1), "2024-03-05 10:00:02");
        assert_eq!(date_time(&store, 2), "2024-03-05 10:00:32.500");
        assert_eq!(date_time(&store, 3), "2024-03-21 00:00:01");
    }

    #[test]
    fn test_delta_sees_pass_position() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let report = adjust_file_times(
            &store,
            "",
            |ft| Duration::minutes(ft.index as i64),
            &SyncConfig::default(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(report.changed, 2);
        assert_eq!(date_time(&store, 1), "2024-03-05 10:00:00");
        assert_eq!(date_time(&store, 2), "2024-03-05 10:01:30.500");
    }

    #[test]
    fn test_cancelled_adjustment_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        watch_writes(&store);
        let reg = CancelRegistration::new("test-adjust-cancel");
        let flag = reg.flag();

        let report = adjust_file_times(
            &store,
            "",
            |ft| {
                if ft.index == 1 {
                    flag.store(true, Ordering::Relaxed);
                }
                Duration::hours(1)
            },
            &SyncConfig::default(),
            None,
            Some(reg.flag()),
        )
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.scanned, 2);
        assert_eq!(writes(&store), 0);
    }

    #[test]
    fn test_huge_shift_is_reported_not_applied() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        watch_writes(&store);

        let report = adjust_file_times(
            &store,
            "",
            |ft| if ft.index == 0 { Duration::days(100_000_000) } else { Duration::seconds(5) },
            &SyncConfig::default(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(report.out_of_range, vec![1]);
        assert_eq!(report.changed, 2);
        assert_eq!(writes(&store), 2);
        assert_eq!(date_time(&store, 1), "2024-03-05 10:00:00");
        assert_eq!(date_time(&store, 2), "2024-03-05 10:00:35.500");
    }

    #[test]
    fn test_swap_day_and_month() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        insert_record(store.conn(), &NewRecord::new("d.jpg", "Other").with_date_time("2024-04-04 08:00:00")).unwrap();
        insert_record(store.conn(), &NewRecord::new("e.jpg", "Other").with_date_time("garbage")).unwrap();

        let report = swap_day_and_month(&store, "").unwrap();
        assert_eq!(report.swapped, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.invalid, vec![3]);
        assert_eq!(report.unparseable, vec![5]);
        assert_eq!(date_time(&store, 1), "2024-05-03 10:00:00");
        assert_eq!(date_time(&store, 3), "2024-03-20 23:59:59");
    }
}
