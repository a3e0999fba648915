// Apply a template diff to a data-bearing store

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;

use super::diff::{diff_templates, DiffResult, SyncDecision};
use super::Template;
use crate::db::schema::{self, level_table};
use crate::db::{quote_ident, table_exists, Store};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub decision: SyncDecision,
    pub levels_dropped: Vec<u32>,
    /// (from, to) level table moves
    pub levels_moved: Vec<(u32, u32)>,
    pub levels_created: Vec<u32>,
    pub columns_added: usize,
    pub warnings: Vec<String>,
}

impl SyncReport {
    fn new(decision: SyncDecision, diff: &DiffResult) -> Self {
        Self {
            decision,
            levels_dropped: Vec::new(),
            levels_moved: Vec::new(),
            levels_created: Vec::new(),
            columns_added: 0,
            warnings: diff.warnings.clone(),
        }
    }
}

/// Bring the store's template in line with `proposed`.
///
/// Type incompatibilities block. Deleting or renumbering levels loses folder
/// data and needs `confirmed`. Existing data columns are never dropped.
pub fn apply_template_sync(store: &Store, proposed: &Template, confirmed: bool) -> Result<SyncReport> {
    proposed.validate()?;
    let _lock = store.lock()?;
    let existing = store.template()?;
    let diff = diff_templates(proposed, &existing);

    let decision = diff.decision();
    match decision {
        SyncDecision::Blocked => {
            let messages: Vec<String> = diff.type_incompatible.iter().map(|t| t.message.clone()).collect();
            return Err(SyncError::TemplateBlocked(messages.join("\n")));
        }
        SyncDecision::ConfirmRequired if !confirmed => {
            return Err(SyncError::ConfirmationRequired(describe_level_loss(&diff)));
        }
        SyncDecision::UpToDate => {
            log::debug!("Template of {} is up to date", store.path().display());
            return Ok(SyncReport::new(decision, &diff));
        }
        _ => {}
    }

    let mut report = SyncReport::new(decision, &diff);
    let conn = store.conn();
    let tx = conn.unchecked_transaction()?;

    for row in &diff.deleted {
        let table = level_table(row.level);
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table)))?;
        report.levels_dropped.push(row.level);
    }

    report.levels_moved = move_level_tables(&tx, &level_moves(&diff))?;

    for row in &proposed.levels {
        if !table_exists(&tx, "main", &level_table(row.level))? {
            report.levels_created.push(row.level);
        }
    }
    report.columns_added = schema::ensure_template_columns(&tx, proposed)?;
    schema::replace_template(&tx, proposed)?;
    tx.commit()?;

    log::info!(
        "Synchronised template of {}: {} level(s) dropped, {} moved, {} created, {} column(s) added",
        store.path().display(),
        report.levels_dropped.len(),
        report.levels_moved.len(),
        report.levels_created.len(),
        report.columns_added
    );
    Ok(report)
}

/// existing level -> proposed level, for every matched level that changes position.
fn level_moves(diff: &DiffResult) -> BTreeMap<u32, u32> {
    let mut moves = BTreeMap::new();
    for pair in &diff.common {
        moves.insert(pair.existing.level, pair.proposed.level);
    }
    for rename in &diff.renamed {
        moves.entry(rename.existing.level).or_insert(rename.proposed.level);
    }
    moves.retain(|from, to| from != to);
    moves
}

/// Two-phase rename through temporary names so swapped levels never collide.
fn move_level_tables(conn: &Connection, moves: &BTreeMap<u32, u32>) -> Result<Vec<(u32, u32)>> {
    let staged = |level: u32| format!("{}_move", level_table(level));
    let mut moved = Vec::new();
    for from in moves.keys() {
        if table_exists(conn, "main", &level_table(*from))? {
            conn.execute_batch(&format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(&level_table(*from)),
                quote_ident(&staged(*from))
            ))?;
            moved.push(*from);
        }
    }
    let mut report = Vec::new();
    for from in moved {
        let to = moves[&from];
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {to}; ALTER TABLE {staged} RENAME TO {to}",
            to = quote_ident(&level_table(to)),
            staged = quote_ident(&staged(from)),
        ))?;
        report.push((from, to));
    }
    Ok(report)
}

fn describe_level_loss(diff: &DiffResult) -> String {
    let mut parts = Vec::new();
    if !diff.deleted.is_empty() {
        let names: Vec<&str> = diff.deleted.iter().map(|l| l.alias.as_str()).collect();
        parts.push(format!("folder level(s) {} would be deleted with their data", names.join(", ")));
    }
    if !diff.renumbered.is_empty() {
        let moves: Vec<String> = diff
            .renumbered
            .iter()
            .map(|r| format!("'{}' {}→{}", r.existing.alias, r.from, r.to))
            .collect();
        parts.push(format!("folder level(s) would move: {}", moves.join(", ")));
    }
    if !diff.added.is_empty() && parts.is_empty() {
        parts.push("new folder levels are inserted above existing ones".to_string());
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{get_field, insert_record, list_folder_data, upsert_folder_data, NewRecord};
    use crate::template::{ControlType, FieldControl, LevelRow};
    use tempfile::TempDir;

    fn existing() -> Template {
        let mut level_controls = BTreeMap::new();
        level_controls.insert(3, vec![FieldControl::new("Crew", ControlType::Note)]);
        Template {
            controls: vec![FieldControl::new("Species", ControlType::Note)],
            levels: vec![
                LevelRow::new(1, "Site"),
                LevelRow::new(2, "Station"),
                LevelRow::new(3, "Visit"),
            ],
            level_controls,
        }
    }

    fn store(tmp: &TempDir, template: &Template) -> Store {
        let store = Store::create(&tmp.path().join("t.ddb"), template).unwrap();
        insert_record(store.conn(), &NewRecord::new("1.jpg", "A/B/V1").with_value("Species", "deer")).unwrap();
        upsert_folder_data(store.conn(), 3, "A/B/V1", &BTreeMap::from([("Crew".to_string(), "kim".to_string())]))
            .unwrap();
        store
    }

    #[test]
    fn test_identical_template_is_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let t = existing();
        let store = store(&tmp, &t);
        let report = apply_template_sync(&store, &t, false).unwrap();
        assert_eq!(report.decision, SyncDecision::UpToDate);
        assert_eq!(report.columns_added, 0);
    }

    #[test]
    fn test_new_field_and_appended_level_apply_automatically() {
        let tmp = TempDir::new().unwrap();
        let t = existing();
        let store = store(&tmp, &t);

        let mut proposed = t.clone();
        let mut seen = FieldControl::new("Seen", ControlType::Flag);
        seen.default_value = "true".to_string();
        proposed.controls.push(seen);
        proposed.levels.push(LevelRow::new(4, "Card"));

        let report = apply_template_sync(&store, &proposed, false).unwrap();
        assert_eq!(report.decision, SyncDecision::AutoApply);
        assert_eq!(report.levels_created, vec![4]);
        assert!(table_exists(store.conn(), "main", "Level4").unwrap());
        assert_eq!(get_field(store.conn(), 1, "Seen").unwrap().as_deref(), Some("true"));
        assert_eq!(store.template().unwrap(), proposed);
    }

    #[test]
    fn test_incompatible_type_blocks_without_writing() {
        let tmp = TempDir::new().unwrap();
        let t = existing();
        let store = store(&tmp, &t);

        let mut proposed = t.clone();
        proposed.controls[0] = FieldControl::new("Species", ControlType::IntegerAny);
        let err = apply_template_sync(&store, &proposed, true).unwrap_err();
        match err {
            SyncError::TemplateBlocked(msg) => assert!(msg.contains("'Species'")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.template().unwrap(), t);
    }

    #[test]
    fn test_deleting_a_level_needs_confirmation() {
        let tmp = TempDir::new().unwrap();
        let t = existing();
        let store = store(&tmp, &t);

        // Drop Station; Visit moves up to level 2
        let visit = t.levels[2].clone();
        let mut proposed = t.clone();
        proposed.levels = vec![
            t.levels[0].clone(),
            LevelRow::with_guid(2, visit.guid, visit.alias),
        ];
        proposed.level_controls = BTreeMap::from([(2, t.level_controls[&3].clone())]);

        let err = apply_template_sync(&store, &proposed, false).unwrap_err();
        assert!(matches!(err, SyncError::ConfirmationRequired(_)));
        assert_eq!(store.template().unwrap(), t);

        let report = apply_template_sync(&store, &proposed, true).unwrap();
        assert_eq!(report.decision, SyncDecision::ConfirmRequired);
        assert_eq!(report.levels_dropped, vec![2]);
        assert_eq!(report.levels_moved, vec![(3, 2)]);
        assert!(!table_exists(store.conn(), "main", "Level3").unwrap());

        let rows = list_folder_data(store.conn(), 2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1["Crew"], "kim");
        assert_eq!(store.template().unwrap(), proposed);
    }

    #[test]
    fn test_identity_resync_rewrites_guids_only() {
        let tmp = TempDir::new().unwrap();
        let t = existing();
        let store = store(&tmp, &t);

        let mut proposed = t.clone();
        for row in &mut proposed.levels {
            row.guid = uuid::Uuid::new_v4().to_string();
        }
        let report = apply_template_sync(&store, &proposed, false).unwrap();
        assert_eq!(report.decision, SyncDecision::AutoApply);
        assert!(report.levels_moved.is_empty());
        assert!(report.levels_dropped.is_empty());
        assert_eq!(store.template().unwrap().levels, proposed.levels);
        assert_eq!(list_folder_data(store.conn(), 3).unwrap().len(), 1);
    }
}
