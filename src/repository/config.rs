use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::{IdPolicy, Result, StorageError};
use crate::dialect::DialectKind;
use crate::mapper::ConnectionTarget;

/// Where the repository's database lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseLocation {
    /// Private in-memory database, gone with the repository
    #[default]
    Memory,
    File(PathBuf),
}

/// Cluster membership. Each process sharing the database is one node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Repository configuration
///
/// # Examples
///
/// ```ignore
/// let config = RepositoryConfig::new("default")
///     .database(DatabaseLocation::File("/var/lib/docs.db".into()))
///     .cluster_node("node-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository name, key of its root in the database
    pub name: String,

    #[serde(default)]
    pub database: DatabaseLocation,

    #[serde(default)]
    pub dialect: DialectKind,

    #[serde(default)]
    pub id_policy: IdPolicy,

    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Join proxies in every query, not only those asking for `ecm:isProxy`
    #[serde(default = "default_true")]
    pub proxies_in_queries: bool,

    /// Bound of the per-table cache of unmodified fragments
    #[serde(default = "default_cache_size")]
    pub pristine_cache_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    1000
}

impl RepositoryConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            database: DatabaseLocation::Memory,
            dialect: DialectKind::Sqlite,
            id_policy: IdPolicy::AppUuid,
            cluster: ClusterConfig::default(),
            proxies_in_queries: default_true(),
            pristine_cache_size: default_cache_size(),
        }
    }

    pub fn database(mut self, database: DatabaseLocation) -> Self {
        self.database = database;
        self
    }

    /// Stores the repository in a SQLite file.
    pub fn file(self, path: impl Into<PathBuf>) -> Self {
        self.database(DatabaseLocation::File(path.into()))
    }

    pub fn dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn id_policy(mut self, policy: IdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    /// Enables clustering under the given node id.
    pub fn cluster_node(mut self, node_id: &str) -> Self {
        self.cluster = ClusterConfig {
            enabled: true,
            node_id: Some(node_id.to_string()),
        };
        self
    }

    pub fn proxies_in_queries(mut self, enabled: bool) -> Self {
        self.proxies_in_queries = enabled;
        self
    }

    pub fn pristine_cache_size(mut self, size: usize) -> Self {
        self.pristine_cache_size = size;
        self
    }

    /// Parses a JSON configuration. Absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StorageError::Config("Repository name cannot be empty".into()));
        }
        if self.cluster.enabled && self.cluster.node_id.as_deref().is_none_or(str::is_empty) {
            return Err(StorageError::Config("Clustering requires a node id".into()));
        }
        if self.pristine_cache_size == 0 {
            return Err(StorageError::Config("pristine_cache_size must be > 0".into()));
        }
        if !self.dialect.create().is_executable() {
            return Err(StorageError::Config(format!(
                "Dialect {:?} can only generate SQL",
                self.dialect
            )));
        }
        Ok(())
    }

    pub(crate) fn cache_size(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.pristine_cache_size)
            .ok_or_else(|| StorageError::Config("pristine_cache_size must be > 0".into()))
    }

    /// Node id when clustering is enabled.
    pub(crate) fn cluster_node_id(&self) -> Option<&str> {
        self.cluster.enabled.then_some(self.cluster.node_id.as_deref()).flatten()
    }

    pub(crate) fn connection_target(&self) -> ConnectionTarget {
        match &self.database {
            DatabaseLocation::Memory => ConnectionTarget::shared_memory(&self.name),
            DatabaseLocation::File(path) => ConnectionTarget::File(path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::new("default");
        assert_eq!(config.database, DatabaseLocation::Memory);
        assert!(config.proxies_in_queries);
        assert_eq!(config.pristine_cache_size, 1000);
        assert_eq!(config.cluster_node_id(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config = RepositoryConfig::from_json(
            r#"{
                "name": "docs",
                "database": { "file": "/tmp/docs.db" },
                "id_policy": "DB_IDENTITY",
                "cluster": { "enabled": true, "node_id": "n1" },
                "proxies_in_queries": false
            }"#,
        )
        .unwrap();
        assert_eq!(config.database, DatabaseLocation::File("/tmp/docs.db".into()));
        assert_eq!(config.id_policy, IdPolicy::DbIdentity);
        assert_eq!(config.cluster_node_id(), Some("n1"));
        assert!(!config.proxies_in_queries);
        assert_eq!(config.pristine_cache_size, 1000);

        assert!(matches!(
            RepositoryConfig::from_json("{"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(RepositoryConfig::new("").validate().is_err());
        assert!(RepositoryConfig::new("r").pristine_cache_size(0).validate().is_err());
        assert!(
            RepositoryConfig::new("r")
                .dialect(DialectKind::PostgreSql)
                .validate()
                .is_err()
        );
        let mut config = RepositoryConfig::new("r");
        config.cluster.enabled = true;
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
    }
}
