//! Sessions: the transactional façade over one mapper.
//!
//! A session owns its fragment caches and its database connection and is
//! used by one thread at a time. Sessions of a repository learn about each
//! other's writes through invalidation sets, sent on a channel inside the
//! process and through the cluster mailbox table between processes.

mod context;
mod node;
mod persistence;
mod security;

pub use node::Node;
pub use persistence::FACET_ORDERABLE;
pub use security::{PERMISSION_EVERYTHING, PERMISSION_READ, PERMISSION_VERSION};

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{Level, event};

use crate::core::{Id, Result, StorageError, Value};
use crate::fragment::{FragmentState, Invalidations, SimpleFragment};
use crate::mapper::{Mapper, PartialList, TransactionalResource};
use crate::model::{
    ACL_TABLE_NAME, HIER_CHILD_ISPROPERTY_KEY, HIER_CHILD_NAME_KEY, HIER_CHILD_POS_KEY,
    HIER_PARENT_KEY, MAIN_IS_VERSION_KEY, MAIN_PRIMARY_TYPE_KEY, Model, PROXY_TABLE_NAME,
    PROXY_TARGET_KEY, PROXY_TYPE, PROXY_VERSIONABLE_KEY, ROOT_TYPE, VERSION_TABLE_NAME,
    VERSION_VERSIONABLE_KEY,
};
use crate::query::{Query, QueryFilter, parse_query};
use crate::repository::InvalidationBus;
use crate::sql::SqlInfo;
use persistence::PersistenceContext;

lazy_static! {
    /// Empty names, `.`, `..` and anything with a path separator.
    static ref ILLEGAL_NAME: Regex = Regex::new(r"(?s)^(?:\.{1,2}|.*/.*)?$").unwrap();
}

fn check_name(name: &str) -> Result<()> {
    if ILLEGAL_NAME.is_match(name) {
        return Err(StorageError::InvalidArgument(format!("Illegal name: {:?}", name)));
    }
    Ok(())
}

/// The part of a session other threads may reach, through the repository.
pub(crate) struct SessionState {
    pub(crate) context: PersistenceContext,
}

impl SessionState {
    /// Drops cached fragments, or nothing while a transaction is active.
    pub(crate) fn clear_caches(&mut self) -> usize {
        if self.context.mapper().is_active() {
            return 0;
        }
        self.context.clear_caches()
    }
}

/// What a repository hands to each new session.
pub(crate) struct SessionSetup {
    pub repository: String,
    pub principals: Vec<String>,
    pub cluster_node: Option<String>,
    pub proxies_in_queries: bool,
    pub cache_size: NonZeroUsize,
    pub bus: Arc<InvalidationBus>,
}

pub struct Session {
    id: u64,
    repository: String,
    model: Arc<Model>,
    sql_info: Arc<SqlInfo>,
    state: Arc<Mutex<SessionState>>,
    bus: Arc<InvalidationBus>,
    receiver: Receiver<Invalidations>,
    /// Empty for unrestricted sessions
    principals: Vec<String>,
    cluster_node: Option<String>,
    proxies_in_queries: bool,
    root_id: Id,
    transactions: u64,
    xid: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("repository", &self.repository)
            .field("root_id", &self.root_id)
            .field("xid", &self.xid)
            .finish()
    }
}

impl Session {
    pub(crate) fn open(mapper: Mapper, setup: SessionSetup) -> Result<Self> {
        let model = mapper.model().clone();
        let sql_info = mapper.sql_info().clone();
        let mut context = PersistenceContext::new(mapper, setup.cache_size);
        let root_id = bootstrap_root(&mut context, &setup.repository)?;
        let state = Arc::new(Mutex::new(SessionState { context }));
        let (id, receiver) = setup.bus.register(&state)?;
        event!(Level::DEBUG, session = id, repository = %setup.repository, "session opened");
        Ok(Self {
            id,
            repository: setup.repository,
            model,
            sql_info,
            state,
            bus: setup.bus,
            receiver,
            principals: setup.principals,
            cluster_node: setup.cluster_node,
            proxies_in_queries: setup.proxies_in_queries,
            root_id,
            transactions: 0,
            xid: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn repository_name(&self) -> &str {
        &self.repository
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn principals(&self) -> &[String] {
        &self.principals
    }

    /// Locks the session state, applying invalidations received meanwhile.
    fn state(&self) -> Result<MutexGuard<'_, SessionState>> {
        let mut state = self.state.lock()?;
        while let Ok(invalidations) = self.receiver.try_recv() {
            event!(Level::TRACE, session = self.id, count = invalidations.len(), "invalidations received");
            state.context.invalidate(&invalidations);
        }
        Ok(state)
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn get_root_node(&self) -> Result<Node> {
        self.get_node_by_id(&self.root_id)?
            .ok_or_else(|| StorageError::IllegalState(format!("Root {} not found", self.root_id)))
    }

    pub fn get_node_by_id(&self, id: &Id) -> Result<Option<Node>> {
        let mut state = self.state()?;
        Ok(state.context.hier(id)?.as_ref().map(Node::from_hier))
    }

    /// Resolves an absolute path, `/` being the root.
    pub fn get_node_by_path(&self, path: &str) -> Result<Option<Node>> {
        if !path.starts_with('/') {
            return Err(StorageError::InvalidArgument(format!("Path is not absolute: {}", path)));
        }
        let mut state = self.state()?;
        let mut current = self.root_id.clone();
        for name in path.split('/').filter(|s| !s.is_empty()) {
            match state.context.get_child_id(&current, name, Some(false))? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(state.context.hier(&current)?.as_ref().map(Node::from_hier))
    }

    pub fn get_child_node(&self, parent: &Node, name: &str) -> Result<Option<Node>> {
        let mut state = self.state()?;
        match state.context.get_child_id(parent.id(), name, Some(false))? {
            Some(id) => Ok(state.context.hier(&id)?.as_ref().map(Node::from_hier)),
            None => Ok(None),
        }
    }

    pub fn has_child_node(&self, parent: &Node, name: &str) -> Result<bool> {
        let mut state = self.state()?;
        Ok(state.context.get_child_id(parent.id(), name, Some(false))?.is_some())
    }

    /// Regular children, in position then name order.
    pub fn get_children(&self, parent: &Node) -> Result<Vec<Node>> {
        let mut state = self.state()?;
        Ok(state
            .context
            .get_children(parent.id(), Some(false))?
            .iter()
            .map(Node::from_hier)
            .collect())
    }

    pub fn has_children(&self, parent: &Node) -> Result<bool> {
        let mut state = self.state()?;
        Ok(!state.context.get_children(parent.id(), Some(false))?.is_empty())
    }

    pub fn get_parent_node(&self, node: &Node) -> Result<Option<Node>> {
        let mut state = self.state()?;
        let hier = state.context.existing_hier(node.id())?;
        match hier.get_id(HIER_PARENT_KEY) {
            Some(parent) => Ok(state.context.hier(&parent)?.as_ref().map(Node::from_hier)),
            None => Ok(None),
        }
    }

    /// Path from the root, `None` for nodes outside the tree like versions.
    pub fn get_path(&self, node: &Node) -> Result<Option<String>> {
        self.state()?.context.get_path(node.id())
    }

    // ========================================================================
    // Structure
    // ========================================================================

    pub fn add_child_node(&mut self, parent: &Node, name: &str, type_name: &str) -> Result<Node> {
        self.add_node(parent, name, type_name, false)
    }

    /// Adds a complex property of a node: a child node that is not listed
    /// among the regular children and travels with its owner into versions.
    pub fn add_property_node(&mut self, parent: &Node, name: &str, type_name: &str) -> Result<Node> {
        self.add_node(parent, name, type_name, true)
    }

    fn add_node(&mut self, parent: &Node, name: &str, type_name: &str, complex: bool) -> Result<Node> {
        check_name(name)?;
        if !self.model.is_type(type_name) || type_name == ROOT_TYPE || type_name == PROXY_TYPE {
            return Err(StorageError::InvalidArgument(format!("Unknown document type: {}", type_name)));
        }
        let mut state = self.state()?;
        let pc = &mut state.context;
        pc.existing_hier(parent.id())?;
        if pc.get_child_id(parent.id(), name, Some(complex))?.is_some() {
            return Err(StorageError::Conflict(format!(
                "{} already has a child named {}",
                parent.id(),
                name
            )));
        }
        let pos = if complex { None } else { pc.next_pos(parent.id())? };
        let values = hier_values(Some(parent.id()), name, pos, complex, type_name);
        let id = pc.create_node(type_name, values)?;
        Ok(Node::new(id, name, type_name))
    }

    /// Adds a proxy to a version under `parent`.
    pub fn add_proxy(&mut self, target: &Node, parent: &Node, name: &str) -> Result<Node> {
        check_name(name)?;
        let mut state = self.state()?;
        let pc = &mut state.context;
        let target_hier = pc.existing_hier(target.id())?;
        if !target_hier.get(MAIN_IS_VERSION_KEY).is_true() {
            return Err(StorageError::InvalidArgument(format!("Proxy target {} is not a version", target.id())));
        }
        let versionable = pc
            .get(VERSION_TABLE_NAME, target.id(), false)?
            .and_then(|f| f.as_simple())
            .and_then(|v| v.get_id(VERSION_VERSIONABLE_KEY))
            .ok_or_else(|| StorageError::IllegalState(format!("Version {} has no versionable", target.id())))?;
        pc.existing_hier(parent.id())?;
        if pc.get_child_id(parent.id(), name, Some(false))?.is_some() {
            return Err(StorageError::Conflict(format!(
                "{} already has a child named {}",
                parent.id(),
                name
            )));
        }
        let pos = pc.next_pos(parent.id())?;
        let id = pc.create_node(PROXY_TYPE, hier_values(Some(parent.id()), name, pos, false, PROXY_TYPE))?;
        let values = BTreeMap::from([
            (PROXY_TARGET_KEY.to_string(), Value::from(target.id())),
            (PROXY_VERSIONABLE_KEY.to_string(), Value::from(versionable)),
        ]);
        pc.create_fragment(SimpleFragment::with_values(PROXY_TABLE_NAME, id.clone(), FragmentState::Created, values).into());
        Ok(Node::new(id, name, PROXY_TYPE))
    }

    /// Moves a node under a new parent with a new name.
    pub fn move_node(&mut self, node: &Node, parent: &Node, name: &str) -> Result<()> {
        check_name(name)?;
        self.state()?.context.move_node(node.id(), parent.id(), name)
    }

    /// Copies a node and its subtree. Pending changes are saved first.
    pub fn copy(&mut self, node: &Node, parent: &Node, name: &str) -> Result<Node> {
        check_name(name)?;
        let mut state = self.state()?;
        let id = state.context.copy_node(node.id(), parent.id(), name)?;
        self.after_flush(&mut state)?;
        let hier = state.context.existing_hier(&id)?;
        Ok(Node::from_hier(&hier))
    }

    /// Removes a node and its whole subtree.
    pub fn remove_node(&mut self, node: &Node) -> Result<()> {
        if node.id() == &self.root_id {
            return Err(StorageError::InvalidArgument("Cannot remove the root".into()));
        }
        self.state()?.context.remove_node(node.id())
    }

    // ========================================================================
    // Versions and proxies
    // ========================================================================

    /// Snapshots a node as a new version. Returns the version.
    pub fn check_in(&mut self, node: &Node, label: Option<&str>, description: Option<&str>) -> Result<Node> {
        let mut state = self.state()?;
        let id = state.context.check_in(node.id(), label, description)?;
        self.after_flush(&mut state)?;
        let hier = state.context.existing_hier(&id)?;
        Ok(Node::from_hier(&hier))
    }

    pub fn check_out(&mut self, node: &Node) -> Result<()> {
        self.state()?.context.check_out(node.id())
    }

    /// Brings back the content of the version with `label`. The node ends up
    /// checked in, based on that version.
    pub fn restore_by_label(&mut self, node: &Node, label: &str) -> Result<()> {
        let mut state = self.state()?;
        state.context.restore_by_label(node.id(), label)?;
        self.after_flush(&mut state)
    }

    pub fn get_version_by_label(&self, node: &Node, label: &str) -> Result<Option<Node>> {
        let mut state = self.flushed_state()?;
        match state.context.mapper().get_version_id_by_label(node.id(), label)? {
            Some(id) => Ok(state.context.hier(&id)?.as_ref().map(Node::from_hier)),
            None => Ok(None),
        }
    }

    pub fn get_last_version(&self, node: &Node) -> Result<Option<Node>> {
        let mut state = self.flushed_state()?;
        match state.context.mapper().get_last_version_id(node.id())? {
            Some(id) => Ok(state.context.hier(&id)?.as_ref().map(Node::from_hier)),
            None => Ok(None),
        }
    }

    /// Version ids of a node, oldest first.
    pub fn get_version_ids(&self, node: &Node) -> Result<Vec<Id>> {
        self.flushed_state()?.context.mapper().get_version_ids(node.id(), false)
    }

    /// Versions of a node, oldest first.
    pub fn get_versions(&self, node: &Node) -> Result<Vec<Node>> {
        let mut state = self.flushed_state()?;
        let ids = state.context.mapper().get_version_ids(node.id(), false)?;
        nodes(&mut state.context, &ids)
    }

    /// Proxies to a version, or to any version of a live node, optionally
    /// only those under `parent`.
    pub fn get_proxies(&self, node: &Node, parent: Option<&Node>) -> Result<Vec<Node>> {
        let mut state = self.flushed_state()?;
        let by_target = state.context.existing_hier(node.id())?.get(MAIN_IS_VERSION_KEY).is_true();
        let ids = state
            .context
            .mapper()
            .get_proxy_ids(node.id(), by_target, parent.map(Node::id))?;
        nodes(&mut state.context, &ids)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Filter carrying this session's principals. `Everything` is always
    /// among the accepted permissions.
    pub fn query_filter(&self, permissions: &[&str]) -> QueryFilter {
        let mut permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
        if !permissions.iter().any(|p| p == PERMISSION_EVERYTHING) {
            permissions.push(PERMISSION_EVERYTHING.to_string());
        }
        QueryFilter {
            principals: self.principals.clone(),
            permissions,
            ..QueryFilter::default()
        }
    }

    /// Runs a query against saved state. Pending changes are saved first.
    pub fn query(&self, query: &Query, filter: &QueryFilter, count_total: bool) -> Result<PartialList> {
        let state = self.flushed_state()?;
        let mapper = state.context.mapper();
        let mut resolve = |path: &str| resolve_path(mapper, &self.root_id, path);
        mapper.query(query, filter, self.proxies_in_queries, count_total, &mut resolve)
    }

    pub fn query_text(&self, text: &str, filter: &QueryFilter, count_total: bool) -> Result<PartialList> {
        let query = parse_query(text)?;
        self.query(&query, filter, count_total)
    }

    // ========================================================================
    // Saving, transactions and invalidations
    // ========================================================================

    /// Writes every pending change. Outside a transaction the changes are
    /// announced to the other sessions at once.
    pub fn save(&mut self) -> Result<()> {
        let mut state = self.state()?;
        state.context.save()?;
        self.after_flush(&mut state)
    }

    fn flushed_state(&self) -> Result<MutexGuard<'_, SessionState>> {
        let mut state = self.state()?;
        if state.context.has_changes() {
            state.context.save()?;
        }
        self.after_flush(&mut state)?;
        Ok(state)
    }

    fn after_flush(&self, state: &mut SessionState) -> Result<()> {
        if self.xid.is_some() {
            return Ok(());
        }
        let pending = state.context.take_pending();
        self.notify_invalidations(state, &pending)?;
        self.drain_cluster(state)
    }

    pub fn has_changes(&self) -> Result<bool> {
        Ok(self.state()?.context.has_changes())
    }

    pub fn in_transaction(&self) -> bool {
        self.xid.is_some()
    }

    pub fn begin(&mut self) -> Result<()> {
        if let Some(xid) = &self.xid {
            return Err(StorageError::IllegalState(format!("Transaction {} already active", xid)));
        }
        self.transactions += 1;
        let xid = format!("{}-{}-{}", self.repository, self.id, self.transactions);
        self.state()?.context.mapper_mut().start(&xid)?;
        self.xid = Some(xid);
        Ok(())
    }

    /// Saves, commits, then announces everything the transaction wrote.
    pub fn commit(&mut self) -> Result<()> {
        let xid = self.active_xid()?;
        {
            let mut state = self.state()?;
            state.context.save()?;
            let mapper = state.context.mapper_mut();
            mapper.end(&xid)?;
            mapper.prepare(&xid)?;
            mapper.commit(&xid)?;
        }
        self.xid = None;
        let mut state = self.state()?;
        self.after_flush(&mut state)
    }

    /// Rolls back and drops every cached fragment. Others are told about
    /// what the transaction had written so they drop it too.
    pub fn rollback(&mut self) -> Result<()> {
        let xid = self.active_xid()?;
        self.xid = None;
        let mut state = self.state()?;
        state.context.mapper_mut().rollback(&xid)?;
        state.context.reset();
        self.after_flush(&mut state)
    }

    fn active_xid(&self) -> Result<String> {
        self.xid
            .clone()
            .ok_or_else(|| StorageError::IllegalState("No active transaction".into()))
    }

    fn notify_invalidations(&self, state: &mut SessionState, invalidations: &Invalidations) -> Result<()> {
        if invalidations.is_empty() {
            return Ok(());
        }
        log::debug!("Session {} sends invalidations {}", self.id, invalidations.to_debug_json());
        self.bus.broadcast(self.id, invalidations)?;
        if let Some(node) = &self.cluster_node {
            state.context.mapper().insert_cluster_invalidations(node, invalidations)?;
        }
        Ok(())
    }

    fn drain_cluster(&self, state: &mut SessionState) -> Result<()> {
        let Some(node) = &self.cluster_node else {
            return Ok(());
        };
        let invalidations = state.context.mapper().get_cluster_invalidations(node)?;
        if invalidations.is_empty() {
            return Ok(());
        }
        log::debug!("Session {} got cluster invalidations {}", self.id, invalidations.to_debug_json());
        state.context.invalidate(&invalidations);
        self.bus.broadcast(self.id, &invalidations)?;
        Ok(())
    }

    /// Applies what other sessions of this process sent, and what other
    /// cluster nodes left in the mailbox.
    pub fn process_invalidations(&self) -> Result<()> {
        let mut state = self.state()?;
        self.drain_cluster(&mut state)
    }

    /// Drops cached fragments. Returns 0 without doing anything while a
    /// transaction is active.
    pub fn clear_caches(&self) -> Result<usize> {
        Ok(self.state()?.clear_caches())
    }

    /// Ends the session. An active transaction is rolled back.
    pub fn close(mut self) -> Result<()> {
        if self.xid.is_some() {
            log::warn!("Session {} closed with an active transaction", self.id);
            self.rollback()?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.bus.unregister(self.id) {
            log::warn!("Could not unregister session {}: {}", self.id, e);
        }
        event!(Level::DEBUG, session = self.id, "session closed");
    }
}

fn hier_values(parent: Option<&Id>, name: &str, pos: Option<i64>, complex: bool, type_name: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([
        (HIER_PARENT_KEY.to_string(), Value::from(parent)),
        (HIER_CHILD_NAME_KEY.to_string(), Value::from(name)),
        (HIER_CHILD_POS_KEY.to_string(), Value::from(pos)),
        (HIER_CHILD_ISPROPERTY_KEY.to_string(), Value::Boolean(complex)),
        (MAIN_PRIMARY_TYPE_KEY.to_string(), Value::from(type_name)),
    ])
}

fn nodes(pc: &mut PersistenceContext, ids: &[Id]) -> Result<Vec<Node>> {
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(hier) = pc.hier(id)? {
            nodes.push(Node::from_hier(&hier));
        }
    }
    Ok(nodes)
}

/// Resolves a path against saved state only, for queries.
fn resolve_path(mapper: &Mapper, root: &Id, path: &str) -> Result<Option<Id>> {
    let mut current = root.clone();
    for name in path.split('/').filter(|s| !s.is_empty()) {
        let Some(mut row) = mapper.read_child_hier_row(&current, name, Some(false))? else {
            return Ok(None);
        };
        match row.remove(crate::model::MAIN_KEY).and_then(|v| v.as_id()) {
            Some(id) => current = id,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Finds the root of the repository, creating it on first use.
///
/// Two sessions may race to create it: the root id record is unique per
/// repository, so the loser gets a constraint violation, removes its own
/// root and takes the winner's.
fn bootstrap_root(pc: &mut PersistenceContext, repository: &str) -> Result<Id> {
    if let Some(id) = pc.mapper().get_root_id(repository)? {
        return Ok(id);
    }
    let id = pc.create_node(ROOT_TYPE, hier_values(None, "", None, false, ROOT_TYPE))?;
    pc.for_write(ACL_TABLE_NAME, &id)?
        .as_collection_mut()
        .ok_or_else(|| StorageError::IllegalState(format!("{} is not a collection", ACL_TABLE_NAME)))?
        .set_acl_rows(&security::default_root_acl())?;
    pc.save()?;
    let root = match pc.mapper().set_root_id(repository, &id) {
        Ok(()) => {
            log::info!("Created root {} of repository {}", id, repository);
            id
        }
        Err(e) if e.is_constraint_violation() => {
            log::info!("Root of repository {} created concurrently, dropping {}", repository, id);
            pc.remove_node(&id)?;
            pc.save()?;
            pc.mapper()
                .get_root_id(repository)?
                .ok_or_else(|| StorageError::IllegalState(format!("No root for repository {}", repository)))?
        }
        Err(e) => return Err(e),
    };
    // nobody can have cached a brand new root
    pc.take_pending();
    Ok(root)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{DocumentTypeDef, FieldType, ModelBuilder, SchemaDef};
    use crate::repository::{Credentials, Repository, RepositoryConfig};

    pub(crate) fn test_model_builder() -> ModelBuilder {
        Model::builder()
            .schema(
                SchemaDef::new("dublincore", "dc")
                    .field("title", FieldType::String)
                    .field("description", FieldType::Clob)
                    .list("subjects", FieldType::String),
            )
            .schema(SchemaDef::new("file", "file").field("content", FieldType::Binary))
            .document_type(DocumentTypeDef::new("Folder").schema("dublincore").facet("Folderish"))
            .document_type(
                DocumentTypeDef::new("OrderedFolder")
                    .super_type("Folder")
                    .facet(FACET_ORDERABLE),
            )
            .document_type(DocumentTypeDef::new("File").schema("dublincore").schema("file"))
    }

    pub(crate) fn test_session(principals: &[&str]) -> (Repository, Session) {
        let repo = Repository::open(RepositoryConfig::new("test"), test_model_builder()).unwrap();
        let mut credentials = Credentials::new(principals.first().copied().unwrap_or("system"));
        for group in principals.iter().skip(1) {
            credentials = credentials.group(*group);
        }
        let session = repo.session(&credentials).unwrap();
        (repo, session)
    }

    pub(crate) fn admin_session() -> (Repository, Session) {
        test_session(&["Administrator", "administrators"])
    }

    #[test]
    fn test_illegal_names() {
        for name in ["", ".", "..", "a/b", "/"] {
            assert!(check_name(name).is_err(), "{:?}", name);
        }
        for name in ["a", "...", "a.b", "é"] {
            assert!(check_name(name).is_ok(), "{:?}", name);
        }
    }

    #[test]
    fn test_root_is_bootstrapped_once() {
        let (repo, session) = admin_session();
        let root = session.get_root_node().unwrap();
        assert_eq!(root.type_name(), ROOT_TYPE);
        assert_eq!(session.get_path(&root).unwrap().as_deref(), Some("/"));
        assert_eq!(session.get_acl(&root).unwrap().len(), 4);

        let other = repo.session(&Credentials::system()).unwrap();
        assert_eq!(other.get_root_node().unwrap().id(), root.id());
    }

    #[test]
    fn test_navigation() {
        let (_repo, mut session) = admin_session();
        let root = session.get_root_node().unwrap();
        let a = session.add_child_node(&root, "a", "Folder").unwrap();
        let b = session.add_child_node(&a, "b", "File").unwrap();
        session.add_property_node(&a, "meta", "File").unwrap();

        assert_eq!(session.get_node_by_path("/a/b").unwrap(), Some(b.clone()));
        assert_eq!(session.get_node_by_path("/").unwrap().unwrap().id(), root.id());
        assert!(session.get_node_by_path("/a/meta").unwrap().is_none());
        assert!(matches!(session.get_node_by_path("a"), Err(StorageError::InvalidArgument(_))));
        assert_eq!(session.get_parent_node(&b).unwrap().unwrap().id(), a.id());
        assert!(session.get_parent_node(&root).unwrap().is_none());
        assert_eq!(session.get_children(&a).unwrap().len(), 1);
        assert!(session.has_child_node(&a, "b").unwrap());
        assert!(!session.has_children(&b).unwrap());
        assert!(matches!(
            session.add_child_node(&a, "b", "File"),
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            session.add_child_node(&a, "c", "Unknown"),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(session.remove_node(&root), Err(StorageError::InvalidArgument(_))));
    }

    #[test]
    fn test_orderable_children_get_positions() {
        let (_repo, mut session) = admin_session();
        let root = session.get_root_node().unwrap();
        let folder = session.add_child_node(&root, "f", "OrderedFolder").unwrap();
        for name in ["z", "y", "x"] {
            session.add_child_node(&folder, name, "File").unwrap();
        }
        session.save().unwrap();
        session.clear_caches().unwrap();
        let names: Vec<String> = session
            .get_children(&folder)
            .unwrap()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_sibling_sees_saved_changes() {
        let (repo, mut first) = admin_session();
        let second = repo.session(&Credentials::system()).unwrap();
        let root = first.get_root_node().unwrap();
        let doc = first.add_child_node(&root, "doc", "File").unwrap();
        first.set_single_property(&doc, "dc:title", Value::from("v1")).unwrap();
        first.save().unwrap();

        let seen = second.get_node_by_id(doc.id()).unwrap().unwrap();
        assert_eq!(second.get_single_property(&seen, "dc:title").unwrap(), Value::from("v1"));

        first.set_single_property(&doc, "dc:title", Value::from("v2")).unwrap();
        first.save().unwrap();
        assert_eq!(second.get_single_property(&seen, "dc:title").unwrap(), Value::from("v2"));
    }

    #[test]
    fn test_transaction_defers_invalidations() {
        let (repo, mut first) = admin_session();
        let second = repo.session(&Credentials::system()).unwrap();
        let root = first.get_root_node().unwrap();
        let doc = first.add_child_node(&root, "doc", "File").unwrap();
        first.set_single_property(&doc, "dc:title", Value::from("v1")).unwrap();
        first.save().unwrap();
        let seen = second.get_node_by_id(doc.id()).unwrap().unwrap();
        assert_eq!(second.get_single_property(&seen, "dc:title").unwrap(), Value::from("v1"));

        first.begin().unwrap();
        assert!(first.in_transaction());
        first.set_single_property(&doc, "dc:title", Value::from("v2")).unwrap();
        first.save().unwrap();
        assert_eq!(first.clear_caches().unwrap(), 0);
        first.rollback().unwrap();
        assert_eq!(first.get_single_property(&doc, "dc:title").unwrap(), Value::from("v1"));

        first.begin().unwrap();
        first.set_single_property(&doc, "dc:title", Value::from("v3")).unwrap();
        first.commit().unwrap();
        assert_eq!(second.get_single_property(&seen, "dc:title").unwrap(), Value::from("v3"));
        assert!(matches!(first.commit(), Err(StorageError::IllegalState(_))));
    }

    #[test]
    fn test_check_in_and_restore() {
        let (_repo, mut session) = admin_session();
        let root = session.get_root_node().unwrap();
        let doc = session.add_child_node(&root, "doc", "File").unwrap();
        session.set_single_property(&doc, "dc:title", Value::from("first")).unwrap();
        session.add_property_node(&doc, "attachment", "File").unwrap();

        let v1 = session.check_in(&doc, Some("1.0"), Some("initial")).unwrap();
        assert_eq!(session.get_path(&v1).unwrap(), None);
        assert_eq!(session.get_version_by_label(&doc, "1.0").unwrap(), Some(v1.clone()));
        session.check_out(&doc).unwrap();
        session.set_single_property(&doc, "dc:title", Value::from("second")).unwrap();
        session.check_in(&doc, Some("2.0"), None).unwrap();
        assert_eq!(session.get_versions(&doc).unwrap().len(), 2);
        assert_eq!(session.get_version_ids(&doc).unwrap()[0], v1.id().clone());
        assert_eq!(session.get_last_version(&doc).unwrap().unwrap().id(), &session.get_version_ids(&doc).unwrap()[1]);

        session.restore_by_label(&doc, "1.0").unwrap();
        assert_eq!(session.get_single_property(&doc, "dc:title").unwrap(), Value::from("first"));
        assert!(matches!(
            session.restore_by_label(&doc, "3.0"),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_proxies() {
        let (_repo, mut session) = admin_session();
        let root = session.get_root_node().unwrap();
        let doc = session.add_child_node(&root, "doc", "File").unwrap();
        let section = session.add_child_node(&root, "section", "Folder").unwrap();
        assert!(matches!(
            session.add_proxy(&doc, &section, "p"),
            Err(StorageError::InvalidArgument(_))
        ));
        let version = session.check_in(&doc, None, None).unwrap();
        let proxy = session.add_proxy(&version, &section, "p").unwrap();
        assert!(proxy.is_proxy());
        session.save().unwrap();

        assert_eq!(session.get_proxies(&version, None).unwrap(), vec![proxy.clone()]);
        assert_eq!(session.get_proxies(&doc, Some(&section)).unwrap(), vec![proxy.clone()]);
        assert!(session.get_proxies(&doc, Some(&root)).unwrap().is_empty());
    }
}
