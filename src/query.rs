// Composable row selection rendered to one parameterised statement
//
// Subtree selection, ordering and joins are built as values and rendered once,
// so callers never splice user input into SQL.

use rusqlite::types::Value;

use crate::constants::PATH_DB_SEPARATOR;
use crate::db::quote_ident;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    Equals { column: String, value: Value },
    AtLeast { column: String, value: f64 },
    /// `column` is `path` or a folder below it. An empty path matches everything.
    PathWithin { column: String, path: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Equals { column: column.into(), value: value.into() }
    }

    pub fn at_least(column: impl Into<String>, value: f64) -> Self {
        Predicate::AtLeast { column: column.into(), value }
    }

    pub fn path_within(column: impl Into<String>, path: impl Into<String>) -> Self {
        Predicate::PathWithin { column: column.into(), path: path.into() }
    }

    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut parts), p) => {
                parts.push(p);
                Predicate::And(parts)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::Or(mut parts), p) => {
                parts.push(p);
                Predicate::Or(parts)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    /// Render as a boolean SQL expression, appending bound values to `params`.
    pub fn render(&self, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::All => "1".to_string(),
            Predicate::Equals { column, value } => {
                params.push(value.clone());
                format!("{} = ?{}", column_ref(column), params.len())
            }
            Predicate::AtLeast { column, value } => {
                params.push(Value::Real(*value));
                format!("{} >= ?{}", column_ref(column), params.len())
            }
            Predicate::PathWithin { column, path } => {
                let path = normalize_path(path);
                if path.is_empty() {
                    return "1".to_string();
                }
                let col = column_ref(column);
                params.push(Value::Text(path.clone()));
                let exact = params.len();
                let prefix = format!("{}{}", path, PATH_DB_SEPARATOR);
                params.push(Value::Integer(prefix.chars().count() as i64));
                let len = params.len();
                params.push(Value::Text(prefix));
                let pre = params.len();
                format!("({col} = ?{exact} OR substr({col}, 1, ?{len}) = ?{pre})")
            }
            Predicate::And(parts) => join_parts(parts, " AND ", "1", params),
            Predicate::Or(parts) => join_parts(parts, " OR ", "0", params),
        }
    }
}

fn join_parts(parts: &[Predicate], op: &str, empty: &str, params: &mut Vec<Value>) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts.iter().map(|p| p.render(params)).collect();
    format!("({})", rendered.join(op))
}

/// Quote a column reference, keeping an `alias.` qualifier unquoted.
fn column_ref(column: &str) -> String {
    match column.split_once('.') {
        Some((alias, name)) => format!("{}.{}", alias, quote_ident(name)),
        None => quote_ident(column),
    }
}

/// Strip leading/trailing separators so "A/B/" and "A/B" select the same folder.
pub fn normalize_path(path: &str) -> String {
    path.trim_matches(PATH_DB_SEPARATOR).to_string()
}

/// Number of folder segments in a relative path ("" = 0).
pub fn path_depth(path: &str) -> u32 {
    normalize_path(path)
        .split(PATH_DB_SEPARATOR)
        .filter(|s| !s.is_empty())
        .count() as u32
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub on: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A table (optionally in an attached schema) filtered, joined and ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
    pub predicate: Predicate,
    pub joins: Vec<Join>,
    pub order: Vec<OrderBy>,
}

impl Selection {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            alias: None,
            predicate: Predicate::All,
            joins: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::replace(&mut self.predicate, Predicate::All).and(predicate);
        self
    }

    /// Inner join; `on` is trusted SQL built from constants.
    pub fn join(mut self, table: impl Into<String>, alias: impl Into<String>, on: impl Into<String>) -> Self {
        self.joins.push(Join { table: table.into(), alias: alias.into(), on: on.into() });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy { column: column.into(), descending: false });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy { column: column.into(), descending: true });
        self
    }

    fn source(&self) -> String {
        let mut source = match &self.schema {
            Some(schema) => format!("{}.{}", schema, quote_ident(&self.table)),
            None => quote_ident(&self.table),
        };
        if let Some(alias) = &self.alias {
            source.push_str(" AS ");
            source.push_str(alias);
        }
        for join in &self.joins {
            source.push_str(&format!(" JOIN {} AS {} ON {}", join.table, join.alias, join.on));
        }
        source
    }

    /// `FROM ... WHERE ... ORDER BY ...` without the SELECT list.
    pub fn render_from(&self, params: &mut Vec<Value>) -> String {
        let mut sql = format!("FROM {} WHERE {}", self.source(), self.predicate.render(params));
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}{}", column_ref(&o.column), if o.descending { " DESC" } else { "" }))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        sql
    }

    pub fn render_select(&self, columns: &[&str]) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let list = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.iter().map(|c| column_ref(c)).collect::<Vec<_>>().join(", ")
        };
        let from = self.render_from(&mut params);
        (format!("SELECT {} {}", list, from), params)
    }

    /// DELETE of the selected rows. Joins and ordering are not allowed in a DELETE.
    pub fn render_delete(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let target = match &self.schema {
            Some(schema) => format!("{}.{}", schema, quote_ident(&self.table)),
            None => quote_ident(&self.table),
        };
        let sql = format!("DELETE FROM {} WHERE {}", target, self.predicate.render(&mut params));
        (sql, params)
    }
}
