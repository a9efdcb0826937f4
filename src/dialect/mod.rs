//! Database-specific SQL generation rules.
//!
//! A [`Dialect`] decides column types, quoting, array support, how generated
//! ids are fetched back and how the tree and security predicates are written.
//! [`SqliteDialect`] is the one the mapper executes against;
//! [`PostgreSqlDialect`] only generates SQL text.

mod postgresql;
mod sqlite;

pub use postgresql::PostgreSqlDialect;
pub use sqlite::SqliteDialect;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{Column, ColumnType, IdPolicy, Value};

/// Separator for packed string lists in dialects without arrays.
pub const ARRAY_SEP: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    #[serde(alias = "postgres")]
    PostgreSql,
}

impl DialectKind {
    pub fn create(&self) -> Box<dyn Dialect> {
        match self {
            Self::Sqlite => Box::new(SqliteDialect),
            Self::PostgreSql => Box::new(PostgreSqlDialect),
        }
    }
}

pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether the mapper can run against this dialect.
    fn is_executable(&self) -> bool;

    fn quote(&self, name: &str) -> String {
        format!("\"{}\"", name)
    }

    /// SQL type of a column, without constraints.
    fn sql_type(&self, column_type: ColumnType, id_policy: IdPolicy) -> &'static str;

    /// Full column definition used in CREATE TABLE and ADD COLUMN.
    fn column_definition(&self, column: &Column, id_policy: IdPolicy) -> String {
        let mut def = format!(
            "{} {}",
            self.quote(&column.name),
            self.sql_type(column.column_type, id_policy)
        );
        if column.primary {
            def.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    fn supports_arrays(&self) -> bool;

    /// Statement returning the last id generated by an identity column.
    fn identity_fetch_sql(&self, table: &str, column: &str) -> String;

    /// Whether ORDER BY columns must also be selected when using DISTINCT.
    fn needs_order_by_keys_after_distinct(&self) -> bool;

    fn boolean_literal(&self, value: bool) -> &'static str;

    /// Bind value for a list of strings.
    fn string_list_param(&self, items: &[String]) -> Value {
        if self.supports_arrays() {
            Value::StringArray(items.to_vec())
        } else {
            Value::String(items.join(&ARRAY_SEP.to_string()))
        }
    }

    /// Bind value for the packed fragment list of a cluster invalidation.
    fn cluster_fragments_param(&self, fragments: &[String]) -> Value {
        if self.supports_arrays() {
            Value::StringArray(fragments.to_vec())
        } else {
            Value::String(fragments.join(" "))
        }
    }

    fn parse_cluster_fragments(&self, value: &Value) -> Vec<String> {
        match value {
            Value::StringArray(items) => items.clone(),
            Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// Predicate true when the node in `id_column` is strictly under `base`.
    ///
    /// Returns the SQL and the parameters it binds, in order.
    fn in_tree_sql(&self, id_column: &str, base: Value) -> (String, Vec<Value>);

    /// Predicate true when the first ACL entry matching one of `principals`
    /// and one of `permissions`, walking up from `id_column`, is a grant.
    fn access_allowed_sql(
        &self,
        id_column: &str,
        principals: &[String],
        permissions: &[String],
    ) -> (String, Vec<Value>);

    /// Text put in front of queries using the tree or security predicates.
    fn query_prelude(&self) -> Option<String> {
        None
    }

    /// Stored functions to (re)create when the database is initialized.
    fn function_ddl(&self, id_policy: IdPolicy) -> Vec<String> {
        let _ = id_policy;
        Vec::new()
    }

    fn create_index_sql(&self, name: &str, table: &str, columns: &[&str], unique: bool) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote(name),
            self.quote(table),
            cols.join(", ")
        )
    }
}
