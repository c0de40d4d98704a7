use std::path::Path;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use tracing::debug;

use super::{Row, RowStore, StoreError, StoredRecord};
use crate::models::{Event, BOOL_COLUMNS, COLUMNS};
use crate::utils;

/// Local table mirroring the remote schema, plus an integer `id`.
pub struct SqliteStore {
    conn: Connection,
    table: String,
}

impl SqliteStore {
    pub fn open_default(table: &str) -> Result<Self, StoreError> {
        let path = utils::database_path();
        utils::ensure_parent(&path);
        Self::open(&path, table)
    }

    pub fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, table)
    }

    pub fn in_memory(table: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
        {
            return Err(StoreError::Config(format!("unusable table name {table:?}")));
        }
        let store = Self {
            conn,
            table: table.to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let columns = COLUMNS
            .iter()
            .map(|column| {
                let kind = if BOOL_COLUMNS.contains(column) {
                    "INTEGER"
                } else {
                    "TEXT"
                };
                format!("\"{column}\" {kind}")
            })
            .collect::<Vec<_>>()
            .join(",\n                ");
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\"(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {columns}
            );",
            table = self.table,
        ))?;
        Ok(())
    }

    fn ensure_unique_index(&self, column: &str) -> Result<(), StoreError> {
        if !COLUMNS.contains(&column) {
            return Err(StoreError::Config(format!(
                "unknown conflict column {column:?}"
            )));
        }
        let index = format!("{}_{}_key", self.table.replace(' ', "_"), column);
        self.conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"{index}\" ON \"{table}\"(\"{column}\");",
            table = self.table,
        ))?;
        Ok(())
    }

    fn insert_sql(&self, conflict_column: Option<&str>) -> String {
        let names = COLUMNS
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=COLUMNS.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "INSERT INTO \"{table}\" ({names}) VALUES ({placeholders})",
            table = self.table
        );
        if let Some(conflict) = conflict_column {
            let updates = COLUMNS
                .iter()
                .filter(|c| **c != conflict)
                .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(
                " ON CONFLICT(\"{conflict}\") DO UPDATE SET {updates}"
            ));
        }
        sql
    }
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

impl RowStore for SqliteStore {
    /// One transaction per call; any failing row rolls the whole call back.
    fn upsert(&self, rows: &[Row], conflict_column: Option<&str>) -> Result<usize, StoreError> {
        if let Some(column) = conflict_column {
            self.ensure_unique_index(column)?;
        }
        let sql = self.insert_sql(conflict_column);
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let values = COLUMNS.iter().map(|column| to_sql(row.get(*column)));
                written += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        debug!(table = %self.table, rows = rows.len(), written, "sqlite upsert");
        Ok(written)
    }

    fn fetch_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let names = COLUMNS
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, {names} FROM \"{table}\" ORDER BY id",
            table = self.table
        ))?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let mut map = Map::new();
            for (idx, column) in COLUMNS.iter().enumerate() {
                map.insert((*column).to_string(), from_sql(row.get_ref(idx + 1)?));
            }
            Ok(StoredRecord {
                id: id.to_string(),
                event: Event::from_row(&map),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "DELETE FROM \"{table}\" WHERE id = ?1",
                table = self.table
            ))?;
            for id in ids {
                let Ok(id) = id.parse::<i64>() else {
                    continue;
                };
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }
}
