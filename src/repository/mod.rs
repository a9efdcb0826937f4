//! A repository: one schema model, one database, many sessions.

mod bus;
mod config;
mod credentials;

pub use bus::InvalidationBus;
pub use config::{ClusterConfig, DatabaseLocation, RepositoryConfig};
pub use credentials::Credentials;

use std::sync::{Arc, Mutex};

use tracing::{Level, event};

use crate::core::Result;
use crate::mapper::{ConnectionTarget, Mapper};
use crate::model::{Model, ModelBuilder};
use crate::session::{Session, SessionSetup};
use crate::sql::SqlInfo;

/// Operations for an ops or monitoring layer.
pub trait RepositoryManagement {
    fn name(&self) -> &str;

    fn active_sessions_count(&self) -> Result<usize>;

    /// Drops the cached fragments of every session. Sessions inside a
    /// transaction keep theirs. Returns how many fragments were dropped.
    fn clear_caches(&self) -> Result<usize>;
}

pub struct Repository {
    config: RepositoryConfig,
    model: Arc<Model>,
    sql_info: Arc<SqlInfo>,
    target: ConnectionTarget,
    /// Keeps in-memory databases alive between sessions
    mapper: Mutex<Mapper>,
    bus: Arc<InvalidationBus>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.config.name)
            .field("target", &self.target)
            .finish()
    }
}

impl Repository {
    /// Builds the model, creates or upgrades the database and joins the
    /// cluster when configured.
    pub fn open(config: RepositoryConfig, model: ModelBuilder) -> Result<Self> {
        config.validate()?;
        let model = Arc::new(model.id_policy(config.id_policy).build()?);
        let sql_info = Arc::new(SqlInfo::new(&model, config.dialect.create()));
        let target = config.connection_target();
        let mapper = Mapper::open(target.clone(), model.clone(), sql_info.clone())?;
        mapper.create_database()?;
        if let Some(node_id) = config.cluster_node_id() {
            mapper.create_cluster_node(node_id)?;
        }
        log::info!("Repository {} opened on {:?}", config.name, target);
        Ok(Self {
            config,
            model,
            sql_info,
            target,
            mapper: Mutex::new(mapper),
            bus: Arc::new(InvalidationBus::new()),
        })
    }

    /// Opens a session on its own connection.
    pub fn session(&self, credentials: &Credentials) -> Result<Session> {
        let mapper = Mapper::open(self.target.clone(), self.model.clone(), self.sql_info.clone())?;
        let session = Session::open(
            mapper,
            SessionSetup {
                repository: self.config.name.clone(),
                principals: credentials.principals(),
                cluster_node: self.config.cluster_node_id().map(str::to_string),
                proxies_in_queries: self.config.proxies_in_queries,
                cache_size: self.config.cache_size()?,
                bus: self.bus.clone(),
            },
        )?;
        event!(
            Level::DEBUG,
            repository = %self.config.name,
            session = session.id(),
            user = ?credentials.user(),
            "session opened"
        );
        Ok(session)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn sql_info(&self) -> &Arc<SqlInfo> {
        &self.sql_info
    }

    /// Leaves the cluster. Sessions still open keep working on their own
    /// connections.
    pub fn close(self) -> Result<()> {
        if let Some(node_id) = self.config.cluster_node_id() {
            self.mapper.lock()?.remove_cluster_node(node_id)?;
        }
        log::info!("Repository {} closed", self.config.name);
        Ok(())
    }
}

impl RepositoryManagement for Repository {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn active_sessions_count(&self) -> Result<usize> {
        self.bus.len()
    }

    fn clear_caches(&self) -> Result<usize> {
        let mut count = 0;
        for state in self.bus.states()? {
            count += state.lock()?.clear_caches();
        }
        Ok(count)
    }
}
