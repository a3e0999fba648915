// Key remapping through a temporary lookup table
//
// A remap is built once from a key column, then applied to every table that
// stores that key. Key columns are rewritten in two phases (negate, then flip)
// so no intermediate state collides with an unmoved key.

use rusqlite::{params, Connection};

use crate::db::quote_ident;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapStrategy {
    /// new = old + offset
    Offset(i64),
    /// new = rank of old in ascending order, starting at 1
    Dense,
}

/// A temporary old→new lookup table.
#[derive(Debug)]
pub struct IdRemap {
    table: String,
    len: usize,
}

impl IdRemap {
    /// Build from the distinct values of `column` in `source` ("main.DataTable", "src.Detections", ...).
    pub fn build(
        conn: &Connection,
        name: &str,
        source: &str,
        column: &str,
        strategy: RemapStrategy,
    ) -> Result<Self> {
        let remap = Self::create(conn, name)?;
        let col = quote_ident(column);
        let sql = match strategy {
            RemapStrategy::Offset(offset) => format!(
                "INSERT INTO temp.{t} (old_key, new_key)
                 SELECT DISTINCT {c}, {c} + {o} FROM {s} WHERE {c} IS NOT NULL",
                t = remap.table,
                c = col,
                o = offset,
                s = source
            ),
            RemapStrategy::Dense => format!(
                "INSERT INTO temp.{t} (old_key, new_key)
                 SELECT k, ROW_NUMBER() OVER (ORDER BY k)
                 FROM (SELECT DISTINCT {c} AS k FROM {s} WHERE {c} IS NOT NULL)",
                t = remap.table,
                c = col,
                s = source
            ),
        };
        let len = conn.execute(&sql, [])?;
        Ok(Self { len, ..remap })
    }

    /// Build from explicit pairs (e.g. a category lookup).
    pub fn from_pairs(conn: &Connection, name: &str, pairs: impl IntoIterator<Item = (i64, i64)>) -> Result<Self> {
        let mut remap = Self::create(conn, name)?;
        {
            let mut stmt = conn.prepare(&format!(
                "INSERT INTO temp.{} (old_key, new_key) VALUES (?1, ?2)",
                remap.table
            ))?;
            for (old, new) in pairs {
                stmt.execute(params![old, new])?;
                remap.len += 1;
            }
        }
        Ok(remap)
    }

    fn create(conn: &Connection, name: &str) -> Result<Self> {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SyncError::Other(format!("invalid remap table name '{}'", name)));
        }
        let table = format!("remap_{}", name);
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.{t};
             CREATE TEMP TABLE {t} (old_key INTEGER PRIMARY KEY, new_key INTEGER NOT NULL);",
            t = table
        ))?;
        Ok(Self { table, len: 0 })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// SQL expression mapping `column`; values without an entry pass through unchanged.
    pub fn map_expr(&self, column: &str) -> String {
        format!(
            "COALESCE((SELECT new_key FROM temp.{} WHERE old_key = {}), {})",
            self.table, column, column
        )
    }

    pub fn get(&self, conn: &Connection, old: i64) -> Result<Option<i64>> {
        use rusqlite::OptionalExtension;
        let new = conn
            .query_row(
                &format!("SELECT new_key FROM temp.{} WHERE old_key = ?1", self.table),
                params![old],
                |row| row.get(0),
            )
            .optional()?;
        Ok(new)
    }

    /// Rewrite a non-unique reference column of `table` in place.
    pub fn apply(&self, conn: &Connection, table: &str, column: &str) -> Result<usize> {
        let col = quote_ident(column);
        let t = quote_ident(table);
        let changed = conn.execute(
            &format!(
                "UPDATE {t} SET {c} = (SELECT new_key FROM temp.{m} WHERE old_key = {t}.{c})
                 WHERE {c} IN (SELECT old_key FROM temp.{m} WHERE old_key <> new_key)",
                t = t,
                c = col,
                m = self.table
            ),
            [],
        )?;
        Ok(changed)
    }

    /// Rewrite a unique key column. Keys must be positive.
    pub fn apply_to_key(&self, conn: &Connection, table: &str, column: &str) -> Result<usize> {
        let col = quote_ident(column);
        let t = quote_ident(table);
        let changed = conn.execute(
            &format!(
                "UPDATE {t} SET {c} = -(SELECT new_key FROM temp.{m} WHERE old_key = {t}.{c})
                 WHERE {c} IN (SELECT old_key FROM temp.{m} WHERE old_key <> new_key)",
                t = t,
                c = col,
                m = self.table
            ),
            [],
        )?;
        conn.execute(&format!("UPDATE {t} SET {c} = -{c} WHERE {c} < 0", t = t, c = col), [])?;
        Ok(changed)
    }

    pub fn drop_table(self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS temp.{}", self.table))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (Id INTEGER PRIMARY KEY);
             CREATE TABLE child (cid INTEGER PRIMARY KEY, Id INTEGER REFERENCES parent(Id));
             INSERT INTO parent VALUES (1), (3), (4), (9);
             INSERT INTO child VALUES (10, 3), (11, 9), (12, 9);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_dense_remap_closes_gaps() {
        let conn = conn();
        let tx = conn.unchecked_transaction().unwrap();
        tx.execute_batch("PRAGMA defer_foreign_keys = ON").unwrap();

        let remap = IdRemap::build(&tx, "parent", "main.parent", "Id", RemapStrategy::Dense).unwrap();
        assert_eq!(remap.len(), 4);
        assert_eq!(remap.get(&tx, 9).unwrap(), Some(4));

        remap.apply_to_key(&tx, "parent", "Id").unwrap();
        remap.apply(&tx, "child", "Id").unwrap();
        remap.drop_table(&tx).unwrap();
        tx.commit().unwrap();

        let ids: Vec<i64> = conn
            .prepare("SELECT Id FROM parent ORDER BY Id").unwrap()
            .query_map([], |r| r.get(0)).unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        let refs: Vec<i64> = conn
            .prepare("SELECT Id FROM child ORDER BY cid").unwrap()
            .query_map([], |r| r.get(0)).unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(refs, vec![2, 4, 4]);
    }

    #[test]
    fn test_offset_remap_and_map_expr() {
        let conn = conn();
        let remap = IdRemap::build(&conn, "off", "main.parent", "Id", RemapStrategy::Offset(100)).unwrap();
        let mapped: i64 = conn
            .query_row(&format!("SELECT {} FROM parent WHERE Id = 4", remap.map_expr("Id")), [], |r| r.get(0))
            .unwrap();
        assert_eq!(mapped, 104);
    }

    #[test]
    fn test_partial_lookup_passes_unmapped_values() {
        let conn = conn();
        let remap = IdRemap::from_pairs(&conn, "cats", [(3, 30)]).unwrap();
        let mapped: Vec<i64> = conn
            .prepare(&format!("SELECT {} FROM parent ORDER BY Id", remap.map_expr("Id"))).unwrap()
            .query_map([], |r| r.get(0)).unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(mapped, vec![1, 30, 4, 9]);
    }

    #[test]
    fn test_rejects_odd_names() {
        let conn = conn();
        assert!(IdRemap::from_pairs(&conn, "x; DROP", []).is_err());
    }
}
