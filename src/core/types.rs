use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Result, StorageError, Value};

/// Identifier of a node, shared by every fragment of that node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Database-generated identity value
    Serial(i64),
    /// Application-generated UUID
    Uuid(String),
}

impl Id {
    pub fn new_uuid() -> Self {
        Self::Uuid(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(i) => write!(f, "{}", i),
            Self::Uuid(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::Uuid(s.to_string())
    }
}

impl From<i64> for Id {
    fn from(i: i64) -> Self {
        Self::Serial(i)
    }
}

/// Who generates node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdPolicy {
    /// Caller-supplied UUIDs
    #[default]
    AppUuid,
    /// Identity column, fetched back after insert
    DbIdentity,
}

/// Logical column type, mapped to an SQL type by the dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColumnType {
    /// Node id used as primary key
    NodeId,
    /// Node id stored as a reference (parent, target, versionable...)
    NodeIdRef,
    Varchar,
    Clob,
    Boolean,
    Long,
    Integer,
    Double,
    Timestamp,
    Blob,
    ClusterNode,
    ClusterFragments,
}

impl ColumnType {
    pub fn is_id(&self) -> bool {
        matches!(self, Self::NodeId | Self::NodeIdRef)
    }

    /// Checks that a value can be stored in a column of this type.
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::NodeId | Self::NodeIdRef, Value::String(_) | Value::Long(_)) => true,
            (Self::Varchar | Self::Clob | Self::ClusterNode, Value::String(_)) => true,
            (Self::ClusterFragments, Value::String(_) | Value::StringArray(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Long | Self::Integer, Value::Long(_)) => true,
            (Self::Double, Value::Double(_) | Value::Long(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            (Self::Blob, Value::Binary(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NodeId => "NODEID",
            Self::NodeIdRef => "NODEIDREF",
            Self::Varchar => "VARCHAR",
            Self::Clob => "CLOB",
            Self::Boolean => "BOOLEAN",
            Self::Long => "LONG",
            Self::Integer => "INTEGER",
            Self::Double => "DOUBLE",
            Self::Timestamp => "TIMESTAMP",
            Self::Blob => "BLOB",
            Self::ClusterNode => "CLUSTERNODE",
            Self::ClusterFragments => "CLUSTERFRAGMENTS",
        };
        write!(f, "{}", name)
    }
}

/// Physical column of a fragment table.
///
/// `key` is the model-level name used by fragments; `name` is the SQL name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub key: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary: bool,
    pub identity: bool,
    /// Never fetched by generic selects
    pub opaque: bool,
}

impl Column {
    pub fn new(key: impl Into<String>, column_type: ColumnType) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            column_type,
            nullable: true,
            primary: false,
            identity: false,
            opaque: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn opaque(mut self) -> Self {
        self.opaque = true;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(StorageError::InvalidArgument(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.column_type.is_compatible(value) {
            return Err(StorageError::InvalidArgument(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.column_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}
