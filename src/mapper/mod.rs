//! The mapper: runs the precomputed statements of a [`SqlInfo`] against one
//! live SQLite connection.
//!
//! One mapper serves exactly one session. Every method is a blocking call on
//! the connection; errors from the driver are wrapped with the statement
//! that failed and returned as they are, without retry.

mod binding;
mod cluster;
mod copy;
mod query;
mod resource;
mod rows;
mod versions;

pub use binding::decode;
pub use copy::{CopyRequest, CopyResult};
pub use query::PartialList;
pub use resource::TransactionalResource;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params_from_iter};
use tracing::{Level, event};
use uuid::Uuid;

use crate::core::{Column, Id, Result, StorageError, Value};
use crate::model::{MAIN_KEY, Model, REPOINFO_TABLE_NAME};
use crate::sql::SqlInfo;

/// Lists longer than this are cut in debug logs.
const DEBUG_MAX_ARRAY: usize = 20;

/// Where a mapper connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    File(PathBuf),
    /// Shared-cache in-memory database URI, alive while one connection is
    SharedMemory(String),
}

impl ConnectionTarget {
    /// A fresh in-memory database that several connections can share.
    pub fn shared_memory(name: &str) -> Self {
        Self::SharedMemory(format!(
            "file:docstore-{}-{}?mode=memory&cache=shared",
            name,
            Uuid::new_v4().simple()
        ))
    }

    pub fn open(&self) -> Result<Connection> {
        match self {
            Self::File(path) => {
                let conn = Connection::open(path)?;
                conn.busy_timeout(Duration::from_secs(5))?;
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    "#,
                )?;
                Ok(conn)
            }
            Self::SharedMemory(uri) => {
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                Ok(Connection::open_with_flags(uri, flags)?)
            }
        }
    }
}

pub struct Mapper {
    conn: Connection,
    target: ConnectionTarget,
    model: Arc<Model>,
    sql_info: Arc<SqlInfo>,
    /// Branch of the transaction currently started, if any
    xid: Option<String>,
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("target", &self.target)
            .field("xid", &self.xid)
            .finish()
    }
}

impl Mapper {
    pub fn open(target: ConnectionTarget, model: Arc<Model>, sql_info: Arc<SqlInfo>) -> Result<Self> {
        if !sql_info.dialect().is_executable() {
            return Err(StorageError::Config(format!(
                "Dialect {} cannot be executed",
                sql_info.dialect().name()
            )));
        }
        let conn = target.open()?;
        event!(Level::DEBUG, target = ?target, "mapper connection opened");
        Ok(Self {
            conn,
            target,
            model,
            sql_info,
            xid: None,
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn sql_info(&self) -> &Arc<SqlInfo> {
        &self.sql_info
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Drops the current connection and opens a new one to the same target.
    ///
    /// A transaction in progress is lost with the old connection.
    pub fn reset_connection(&mut self) -> Result<()> {
        let conn = self.target.open()?;
        if self.xid.take().is_some() {
            log::warn!("Connection reset while a transaction was active");
        }
        self.conn = conn;
        event!(Level::DEBUG, target = ?self.target, "mapper connection reset");
        Ok(())
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Creates missing tables and columns, then indexes and functions.
    pub fn create_database(&self) -> Result<()> {
        for table in self.sql_info.tables() {
            let existing = self.table_columns(table.name())?;
            if existing.is_empty() {
                log::debug!("Creating table {}", table.name());
                self.execute(self.sql_info.create_table_sql(table.name()), &[])?;
            } else {
                for sql in self.sql_info.plan_table_update(table.name(), &existing) {
                    self.execute(&sql, &[])?;
                }
            }
        }
        for sql in self.sql_info.index_statements() {
            self.execute(sql, &[])?;
        }
        for sql in self.sql_info.function_statements() {
            self.execute(&sql, &[])?;
        }
        Ok(())
    }

    /// `(name, declared type)` of the columns of an existing table, empty
    /// when the table does not exist.
    fn table_columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        let sql = format!("PRAGMA table_info({})", self.sql_info.dialect().quote(table));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StorageError::backend("Could not introspect table", &sql, e))?;
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| StorageError::backend("Could not introspect table", &sql, e))?;
        Ok(columns)
    }

    // ========================================================================
    // Repository root
    // ========================================================================

    pub fn get_root_id(&self, repository: &str) -> Result<Option<Id>> {
        let select = self.sql_info.select_root_id();
        let rows = self.select_rows(&select.sql, &[Value::from(repository)], &select.what_columns)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get(MAIN_KEY).and_then(Value::as_id)))
    }

    /// Records the root id of a repository. A concurrent registration of the
    /// same repository fails with a constraint violation.
    pub fn set_root_id(&self, repository: &str, id: &Id) -> Result<()> {
        let insert = self.sql_info.insert_root_id();
        let params: Vec<Value> = insert
            .columns
            .iter()
            .map(|c| {
                if c.key == MAIN_KEY {
                    Value::from(id)
                } else {
                    Value::from(repository)
                }
            })
            .collect();
        self.execute(&insert.sql, &params)?;
        log::debug!("Registered root {} for {} in {}", id, repository, REPOINFO_TABLE_NAME);
        Ok(())
    }

    // ========================================================================
    // Security
    // ========================================================================

    /// Evaluates the access predicate in the database for one node.
    pub fn is_access_allowed(&self, id: &Id, principals: &[String], permissions: &[String]) -> Result<bool> {
        let dialect = self.sql_info.dialect();
        let hier = self.sql_info.table(crate::model::HIER_TABLE_NAME);
        let id_column = hier.qualified(dialect, MAIN_KEY);
        let (predicate, mut params) = dialect.access_allowed_sql(&id_column, principals, permissions);
        let mut sql = String::new();
        if let Some(prelude) = dialect.query_prelude() {
            sql.push_str(&prelude);
            sql.push(' ');
        }
        sql.push_str(&format!(
            "SELECT 1 FROM {} WHERE {} = ? AND {}",
            hier.quoted_name(dialect),
            id_column,
            predicate
        ));
        params.insert(0, Value::from(id));
        self.log_sql(&sql, &params);
        let found = self
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |_| Ok(()))
            .optional()
            .map_err(|e| StorageError::backend("Could not check access", &sql, e))?;
        Ok(found.is_some())
    }

    // ========================================================================
    // Statement helpers
    // ========================================================================

    fn log_sql(&self, sql: &str, params: &[Value]) {
        event!(Level::TRACE, sql = %sql, params = %loggable(params), "sql");
    }

    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.log_sql(sql, params);
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| StorageError::backend("Could not prepare statement", sql, e))?;
        let count = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(|e| StorageError::backend("Could not execute statement", sql, e))?;
        event!(Level::TRACE, count, "updated");
        Ok(count)
    }

    pub(crate) fn select_rows(
        &self,
        sql: &str,
        params: &[Value],
        columns: &[Column],
    ) -> Result<Vec<BTreeMap<String, Value>>> {
        self.log_sql(sql, params);
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| StorageError::backend("Could not prepare select", sql, e))?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| binding::read_row(row, columns))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| StorageError::backend("Could not select", sql, e))?;
        event!(Level::TRACE, count = rows.len(), "selected");
        Ok(rows)
    }

    pub(crate) fn select_single_value(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        self.log_sql(sql, params);
        self.conn
            .query_row(sql, params_from_iter(params.iter()), |row| {
                row.get_ref(0).map(|v| decode(v, crate::core::ColumnType::Varchar))
            })
            .optional()
            .map_err(|e| StorageError::backend("Could not select", sql, e))
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Parameter list for logs, cut after a few entries.
pub(crate) fn loggable(params: &[Value]) -> String {
    let shown: Vec<String> = params.iter().take(DEBUG_MAX_ARRAY).map(Value::to_string).collect();
    if params.len() > DEBUG_MAX_ARRAY {
        format!("[{}, ...({} more)]", shown.join(", "), params.len() - DEBUG_MAX_ARRAY)
    } else {
        format!("[{}]", shown.join(", "))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::IdPolicy;
    use crate::dialect::SqliteDialect;
    use crate::model::{DocumentTypeDef, FieldType, SchemaDef};

    pub(crate) fn test_model(policy: IdPolicy) -> Model {
        Model::builder()
            .id_policy(policy)
            .schema(
                SchemaDef::new("dublincore", "dc")
                    .field("title", FieldType::String)
                    .field("description", FieldType::Clob)
                    .list("subjects", FieldType::String),
            )
            .schema(SchemaDef::new("file", "file").field("content", FieldType::Binary))
            .document_type(DocumentTypeDef::new("Folder").schema("dublincore").facet("Folderish"))
            .document_type(DocumentTypeDef::new("File").schema("dublincore").schema("file"))
            .build()
            .unwrap()
    }

    pub(crate) fn test_mapper(policy: IdPolicy) -> Mapper {
        let model = Arc::new(test_model(policy));
        let info = Arc::new(SqlInfo::new(&model, Box::new(SqliteDialect)));
        let mapper = Mapper::open(ConnectionTarget::shared_memory("test"), model, info).unwrap();
        mapper.create_database().unwrap();
        mapper
    }

    #[test]
    fn test_create_database_is_idempotent() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        mapper.create_database().unwrap();
        let columns = mapper.table_columns("dublincore").unwrap();
        assert_eq!(columns.len(), 3);
    }

    #[test]
    fn test_create_database_adds_missing_columns() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        mapper
            .connection()
            .execute_batch("ALTER TABLE \"misc\" DROP COLUMN \"lifecyclestate\"")
            .unwrap();
        assert_eq!(mapper.table_columns("misc").unwrap().len(), 2);
        mapper.create_database().unwrap();
        assert_eq!(mapper.table_columns("misc").unwrap().len(), 3);
    }

    #[test]
    fn test_root_id_registration() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        assert_eq!(mapper.get_root_id("default").unwrap(), None);
        let id = Id::from("root-id");
        mapper.set_root_id("default", &id).unwrap();
        assert_eq!(mapper.get_root_id("default").unwrap(), Some(id.clone()));

        let err = mapper.set_root_id("default", &Id::from("other")).unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(err.sql().unwrap().starts_with("INSERT INTO \"repositories\""));
    }

    #[test]
    fn test_shared_memory_visible_to_second_connection() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        mapper.set_root_id("default", &Id::from("r")).unwrap();
        let other = Mapper::open(
            mapper.target().clone(),
            mapper.model().clone(),
            mapper.sql_info().clone(),
        )
        .unwrap();
        assert_eq!(other.get_root_id("default").unwrap(), Some(Id::from("r")));
    }

    #[test]
    fn test_loggable_truncates() {
        let params: Vec<Value> = (0..25).map(Value::from).collect();
        let text = loggable(&params);
        assert!(text.ends_with("...(5 more)]"));
        assert_eq!(loggable(&[Value::from("a"), Value::Null]), "['a', NULL]");
    }
}
