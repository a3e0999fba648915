// Database module

pub mod indexes;
pub mod migrations;
pub mod schema;

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::constants::{BACKWARDS_COMPATIBLE_VERSION, TOOL_VERSION};
use crate::error::{Result, SyncError};
use crate::lock::StoreLock;
use crate::template::Template;

/// Open or create a database at the given path
pub fn open_db(db_path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(db_path)?;

    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // Enable WAL mode so readers never block on a writer
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// One store file and its connection.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

impl Store {
    /// Open an existing store.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SyncError::StoreNotFound(path.display().to_string()));
        }
        let conn = open_db(path)?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    /// Create an empty store laid out for `template`.
    pub fn create(path: &Path, template: &Template) -> Result<Self> {
        if path.exists() {
            return Err(SyncError::StoreExists(path.display().to_string()));
        }
        template.validate()?;

        Self::initialize(path, template).map_err(|e| {
            discard_store_files(path);
            e
        })
    }

    fn initialize(path: &Path, template: &Template) -> Result<Self> {
        let conn = open_db(path)?;
        let store = Self { conn, path: path.to_path_buf() };

        let tx = store.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE ImageSetTable SET RootFolder = ?1, VersionCompatibility = ?2, BackwardsCompatibility = ?3 WHERE Id = 1",
            params![root_folder_name(path), TOOL_VERSION, BACKWARDS_COMPATIBLE_VERSION],
        )?;
        schema::replace_template(&tx, template)?;
        schema::ensure_template_columns(&tx, template)?;
        indexes::ensure_file_indexes(&tx)?;
        tx.commit()?;

        log::info!("Created store {}", path.display());
        Ok(store)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the store's exclusive lock.
    pub fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock::acquire(&self.path)?)
    }

    /// Load the template inside one read transaction so it is a consistent snapshot.
    pub fn template(&self) -> Result<Template> {
        let tx = self.conn.unchecked_transaction()?;
        let template = schema::load_template(&tx)?;
        tx.commit()?;
        Ok(template)
    }
}

fn root_folder_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Remove a store file and its WAL companions. Used to undo a store that
/// was created by an operation which then failed.
pub(crate) fn discard_store_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        let file = PathBuf::from(name);
        match std::fs::remove_file(&file) {
            Ok(()) => log::debug!("Removed {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", file.display(), e),
        }
    }
}

/// Quote an identifier for splicing into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for splicing into DDL (DEFAULT clauses).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Does `table` exist in schema `db` ("main", "src", ...)?
pub fn table_exists(conn: &Connection, db: &str, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1", db),
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Column names of `table` in schema `db`, in declaration order.
pub fn table_columns(conn: &Connection, db: &str, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA {}.table_info({})", db, quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Suspend foreign key checks until the current transaction commits.
/// SQLite resets the setting itself at COMMIT or ROLLBACK.
pub fn defer_foreign_keys(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA defer_foreign_keys = ON")?;
    Ok(())
}

/// Fail with IntegrityViolation if any reference in the main schema dangles.
pub fn check_foreign_keys(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA main.foreign_key_check")?;
    let mut rows = stmt.query([])?;
    let mut violations = 0;
    while rows.next()?.is_some() {
        violations += 1;
    }
    if violations > 0 {
        return Err(SyncError::IntegrityViolation(violations));
    }
    Ok(())
}

/// Attach another store file to this connection under `alias`.
/// Must run outside any transaction.
pub fn attach(conn: &Connection, path: &Path, alias: &str) -> Result<()> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SyncError::InvalidPath(path.display().to_string()))?;
    conn.execute(&format!("ATTACH DATABASE ?1 AS {}", alias), params![path_str])?;
    Ok(())
}

pub fn detach(conn: &Connection, alias: &str) -> Result<()> {
    conn.execute_batch(&format!("DETACH DATABASE {}", alias))?;
    Ok(())
}

/// Keeps another store attached for the guard's lifetime.
pub struct Attached<'a> {
    conn: &'a Connection,
    alias: &'static str,
}

impl<'a> Attached<'a> {
    pub fn new(conn: &'a Connection, path: &Path, alias: &'static str) -> Result<Self> {
        attach(conn, path, alias)?;
        Ok(Self { conn, alias })
    }

    pub fn alias(&self) -> &'static str {
        self.alias
    }
}

impl Drop for Attached<'_> {
    fn drop(&mut self) {
        if let Err(e) = detach(self.conn, self.alias) {
            log::warn!("Failed to detach {}: {}", self.alias, e);
        }
    }
}
