// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.
// Template-dependent columns and Level<N> tables are not migrations; see schema::ensure_template_columns.

use rusqlite::Connection;
use anyhow::Result;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: fixed store layout
    r#"
    -- Image set (single row)
    CREATE TABLE ImageSetTable (
        Id INTEGER PRIMARY KEY,
        RootFolder TEXT NOT NULL DEFAULT '',
        VersionCompatibility TEXT NOT NULL DEFAULT '0.0.0',
        BackwardsCompatibility TEXT NOT NULL DEFAULT '0.0.0',
        BoundingBoxDisplayThreshold REAL NOT NULL DEFAULT -1,
        QuickPasteTerms TEXT NOT NULL DEFAULT ''
    );
    INSERT INTO ImageSetTable (Id) VALUES (1);

    -- Image-level field controls
    CREATE TABLE TemplateTable (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        ControlOrder INTEGER NOT NULL DEFAULT 0,
        SpreadsheetOrder INTEGER NOT NULL DEFAULT 0,
        Type TEXT NOT NULL,
        DefaultValue TEXT NOT NULL DEFAULT '',
        Label TEXT NOT NULL DEFAULT '',
        DataLabel TEXT NOT NULL UNIQUE,
        Tooltip TEXT NOT NULL DEFAULT '',
        TXTBOXWIDTH INTEGER NOT NULL DEFAULT 0,
        Copyable INTEGER NOT NULL DEFAULT 1,
        Visible INTEGER NOT NULL DEFAULT 1,
        ExportToCSV INTEGER NOT NULL DEFAULT 1,
        List TEXT NOT NULL DEFAULT ''
    );

    -- Folder-level hierarchy
    CREATE TABLE FolderDataInfo (
        Level INTEGER PRIMARY KEY,
        Guid TEXT NOT NULL UNIQUE,
        Alias TEXT NOT NULL DEFAULT ''
    );

    -- Folder-level field controls
    CREATE TABLE FolderDataTemplateTable (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        Level INTEGER NOT NULL,
        ControlOrder INTEGER NOT NULL DEFAULT 0,
        SpreadsheetOrder INTEGER NOT NULL DEFAULT 0,
        Type TEXT NOT NULL,
        DefaultValue TEXT NOT NULL DEFAULT '',
        Label TEXT NOT NULL DEFAULT '',
        DataLabel TEXT NOT NULL,
        Tooltip TEXT NOT NULL DEFAULT '',
        TXTBOXWIDTH INTEGER NOT NULL DEFAULT 0,
        Copyable INTEGER NOT NULL DEFAULT 1,
        Visible INTEGER NOT NULL DEFAULT 1,
        ExportToCSV INTEGER NOT NULL DEFAULT 1,
        List TEXT NOT NULL DEFAULT '',
        UNIQUE(Level, DataLabel)
    );

    -- Primary records (one per image or video)
    CREATE TABLE DataTable (
        Id INTEGER PRIMARY KEY,
        File TEXT NOT NULL,
        RelativePath TEXT NOT NULL DEFAULT '',
        DateTime TEXT NOT NULL DEFAULT '',
        DeleteFlag TEXT NOT NULL DEFAULT 'false'
    );

    -- Counter markers (columns added per Counter control)
    CREATE TABLE MarkersTable (
        Id INTEGER PRIMARY KEY REFERENCES DataTable(Id) ON DELETE CASCADE
    );

    -- Recognition results
    CREATE TABLE Detections (
        detectionID INTEGER PRIMARY KEY,
        Id INTEGER NOT NULL REFERENCES DataTable(Id) ON DELETE CASCADE,
        category INTEGER NOT NULL,
        conf REAL NOT NULL DEFAULT 0,
        bbox TEXT NOT NULL DEFAULT '',
        classification INTEGER,
        classification_conf REAL
    );

    CREATE TABLE DetectionsVideo (
        detectionID INTEGER NOT NULL REFERENCES Detections(detectionID) ON DELETE CASCADE,
        frame_number INTEGER NOT NULL,
        frame_rate REAL NOT NULL
    );

    CREATE TABLE DetectionCategories (
        category INTEGER PRIMARY KEY,
        label TEXT NOT NULL
    );

    CREATE TABLE ClassificationCategories (
        category INTEGER PRIMARY KEY,
        label TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE Info (
        infoID INTEGER PRIMARY KEY,
        detector TEXT NOT NULL DEFAULT '',
        megadetector_version TEXT NOT NULL DEFAULT 'vUnknown',
        detection_completion_time TEXT NOT NULL DEFAULT '',
        classifier TEXT NOT NULL DEFAULT '',
        classification_completion_time TEXT NOT NULL DEFAULT '',
        typical_detection_threshold REAL NOT NULL DEFAULT 0.2,
        conservative_detection_threshold REAL NOT NULL DEFAULT 0.05,
        typical_classification_threshold REAL NOT NULL DEFAULT 0.5
    );
    "#,
];

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "PRAGMA user_version",
        [],
        |row| row.get(0)
    )?;
    Ok(version)
}

/// Run all pending migrations (crash-safe)
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a store created by a newer build
    if current_version > target_version {
        anyhow::bail!(
            "Store schema version {} is newer than this build supports (max {}). Please upgrade camtrap.",
            current_version,
            target_version
        );
    }

    if current_version == target_version {
        return Ok(());
    }

    // Apply pending migrations one-by-one, each with its version bump
    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;
        tx.commit()?;

        log::debug!("Applied migration {}", migration_version);
    }

    Ok(())
}
