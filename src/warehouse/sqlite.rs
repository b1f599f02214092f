use super::{Warehouse, WarehouseConnection, WarehouseRows};
use crate::errors::{AppError, AppResult};
use crate::models::{Credentials, SqlValue};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded warehouse: a SQLite file holding the sales star schema.
#[derive(Debug, Clone)]
pub struct SqliteWarehouse {
    path: PathBuf,
}

impl SqliteWarehouse {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Warehouse for SqliteWarehouse {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn connect(&self, credentials: &Credentials) -> AppResult<Box<dyn WarehouseConnection>> {
        if !self.path.exists() {
            return Err(AppError::Connectivity(format!(
                "Warehouse not reachable at {}",
                self.path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        authenticate(&conn, credentials)?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

fn authenticate(conn: &Connection, credentials: &Credentials) -> AppResult<()> {
    let registry_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'warehouse_users'",
        [],
        |row| row.get(0),
    )?;
    if !registry_exists {
        return Err(AppError::Authentication(
            "Warehouse has no user registry".to_string(),
        ));
    }

    let stored: Option<String> = conn
        .query_row(
            "SELECT token FROM warehouse_users WHERE account = ?1 AND user_name = ?2",
            params![credentials.account, credentials.user],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(token) if token == credentials.token => Ok(()),
        _ => Err(AppError::Authentication(format!(
            "Credentials rejected for {}@{}",
            credentials.user, credentials.account
        ))),
    }
}

pub struct SqliteConnection {
    conn: Connection,
}

impl WarehouseConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> AppResult<WarehouseRows> {
        let mut stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(AppError::Query(
                "Statement would modify the warehouse".to_string(),
            ));
        }

        let columns = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let column_count = columns.len();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for index in 0..column_count {
                cells.push(value_from_ref(row.get_ref(index)?));
            }
            collected.push(cells);
        }

        Ok(WarehouseRows {
            columns,
            rows: collected,
        })
    }

    fn close(self: Box<Self>) -> AppResult<()> {
        self.conn.close().map_err(|(_, error)| AppError::from(error))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            SqlValue::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            SqlValue::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(value) => SqlValue::Integer(value),
        ValueRef::Real(value) => SqlValue::Real(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteWarehouse;
    use crate::errors::AppError;
    use crate::models::{Credentials, SqlValue};
    use crate::warehouse::{Warehouse, WarehouseWriter};

    fn credentials(token: &str) -> Credentials {
        Credentials {
            account: "acme".to_string(),
            user: "analyst".to_string(),
            token: token.to_string(),
        }
    }

    fn warehouse() -> (tempfile::TempDir, SqliteWarehouse) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warehouse.sqlite");
        let writer = WarehouseWriter::create(&path).expect("create warehouse");
        writer.add_user("acme", "analyst", "good-token").expect("add user");
        (dir, SqliteWarehouse::new(&path))
    }

    #[test]
    fn missing_file_is_a_connectivity_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let warehouse = SqliteWarehouse::new(&dir.path().join("absent.sqlite"));
        let result = warehouse.connect(&credentials("good-token"));
        assert!(matches!(result, Err(AppError::Connectivity(_))));
    }

    #[test]
    fn wrong_token_is_an_authentication_error() {
        let (_dir, warehouse) = warehouse();
        let result = warehouse.connect(&credentials("bad-token"));
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[test]
    fn executes_bound_queries() {
        let (_dir, warehouse) = warehouse();
        let mut conn = warehouse.connect(&credentials("good-token")).expect("connect");
        let rows = conn
            .execute("SELECT ?1 AS echoed, ?2 AS missing", &[SqlValue::from("South"), SqlValue::Null])
            .expect("execute");
        assert_eq!(rows.columns, vec!["echoed".to_string(), "missing".to_string()]);
        assert_eq!(rows.rows, vec![vec![SqlValue::from("South"), SqlValue::Null]]);
        conn.close().expect("close");
    }

    #[test]
    fn rejects_writes() {
        let (_dir, warehouse) = warehouse();
        let mut conn = warehouse.connect(&credentials("good-token")).expect("connect");
        let result = conn.execute("DELETE FROM fact_sales", &[]);
        assert!(result.is_err());
    }
}
