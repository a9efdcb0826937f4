//! The persistence context: fragment caches of a session over its mapper,
//! and the structural operations built on them.

use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use super::context::Context;
use crate::core::{Id, Result, StorageError, Value};
use crate::fragment::{
    CollectionFragment, Fragment, FragmentState, InvalidationKind, Invalidations, SimpleFragment,
};
use crate::mapper::{CopyRequest, Mapper};
use crate::model::{
    HIER_CHILD_ISPROPERTY_KEY, HIER_CHILD_NAME_KEY, HIER_CHILD_POS_KEY, HIER_PARENT_KEY,
    HIER_TABLE_NAME, MAIN_BASE_VERSION_KEY, MAIN_CHECKED_IN_KEY, MAIN_IS_VERSION_KEY, MAIN_KEY,
    MAIN_MAJOR_VERSION_KEY, MAIN_MINOR_VERSION_KEY, MAIN_PRIMARY_TYPE_KEY, Model,
    VERSION_CREATED_KEY, VERSION_DESCRIPTION_KEY, VERSION_IS_LATEST_KEY, VERSION_LABEL_KEY,
    VERSION_TABLE_NAME, VERSION_VERSIONABLE_KEY,
};

/// Facet of types whose regular children are kept in insertion order.
pub const FACET_ORDERABLE: &str = "Orderable";

/// Hierarchy keys a restore keeps from the live node.
const RESTORE_KEPT_KEYS: [&str; 8] = [
    HIER_PARENT_KEY,
    HIER_CHILD_NAME_KEY,
    HIER_CHILD_POS_KEY,
    HIER_CHILD_ISPROPERTY_KEY,
    MAIN_PRIMARY_TYPE_KEY,
    MAIN_CHECKED_IN_KEY,
    MAIN_BASE_VERSION_KEY,
    MAIN_IS_VERSION_KEY,
];

pub(crate) struct PersistenceContext {
    mapper: Mapper,
    model: Arc<Model>,
    cache_size: NonZeroUsize,
    contexts: BTreeMap<String, Context>,
    /// Changes written by this session and not yet announced to others
    pending: Invalidations,
}

impl PersistenceContext {
    pub fn new(mapper: Mapper, cache_size: NonZeroUsize) -> Self {
        let model = mapper.model().clone();
        Self {
            mapper,
            model,
            cache_size,
            contexts: BTreeMap::new(),
            pending: Invalidations::new(),
        }
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut Mapper {
        &mut self.mapper
    }

    fn context(&mut self, table: &str) -> &mut Context {
        let model = &self.model;
        let cache_size = self.cache_size;
        self.contexts
            .entry(table.to_string())
            .or_insert_with(|| Context::new(table, model.is_collection_fragment(table), cache_size))
    }

    // ========================================================================
    // Fragment access
    // ========================================================================

    /// Fragment of a table for an id.
    ///
    /// Stale cached fragments are refetched first. A missing simple row
    /// gives an `Absent` fragment when `allow_absent`, `None` otherwise; the
    /// miss is cached either way. Fragments deleted in this session are
    /// `None`.
    pub fn get(&mut self, table: &str, id: &Id, allow_absent: bool) -> Result<Option<&mut Fragment>> {
        let state = self.context(table).peek(id).map(Fragment::state);
        match state {
            Some(FragmentState::Deleted) => return Ok(None),
            Some(FragmentState::Absent) if !allow_absent => return Ok(None),
            Some(state) if !state.is_invalidated() => {}
            _ => {
                let fetched = self.mapper.read_fragment(table, id, allow_absent)?;
                let ctx = self.context(table);
                match fetched {
                    Some(fragment) => {
                        ctx.put_pristine(fragment);
                    }
                    None => {
                        ctx.put_pristine(
                            SimpleFragment::new(table, id.clone(), FragmentState::Absent).into(),
                        );
                        return Ok(None);
                    }
                }
            }
        }
        Ok(self.context(table).get_mut(id))
    }

    /// Fragment pinned for modification until the next flush.
    pub fn for_write(&mut self, table: &str, id: &Id) -> Result<&mut Fragment> {
        if self.get(table, id, true)?.is_none() {
            return Err(StorageError::IllegalState(format!(
                "Cannot write deleted fragment {} {}",
                table, id
            )));
        }
        self.context(table)
            .for_write(id)
            .ok_or_else(|| StorageError::IllegalState(format!("Fragment {} {} vanished", table, id)))
    }

    /// Copy of the hierarchy fragment of a node, `None` if there is no such
    /// node.
    pub fn hier(&mut self, id: &Id) -> Result<Option<SimpleFragment>> {
        Ok(self
            .get(HIER_TABLE_NAME, id, false)?
            .and_then(|f| f.as_simple())
            .cloned())
    }

    pub fn existing_hier(&mut self, id: &Id) -> Result<SimpleFragment> {
        self.hier(id)?
            .ok_or_else(|| StorageError::InvalidArgument(format!("No node with id {}", id)))
    }

    pub fn hier_for_write(&mut self, id: &Id) -> Result<&mut SimpleFragment> {
        self.for_write(HIER_TABLE_NAME, id)?
            .as_simple_mut()
            .ok_or_else(|| StorageError::IllegalState(format!("Hierarchy of {} is a collection", id)))
    }

    /// Reads an opaque column, preferring a value written in this session.
    pub fn read_opaque(&mut self, table: &str, id: &Id, key: &str) -> Result<Value> {
        let cached = self
            .get(table, id, true)?
            .and_then(|f| f.as_simple())
            .filter(|f| f.dirty_keys().contains(key))
            .map(|f| f.get(key).clone());
        match cached {
            Some(value) => Ok(value),
            None => self.mapper.read_opaque(table, id, key),
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Creates the fragments of a new node from its hierarchy values.
    ///
    /// With database-generated ids the hierarchy row is inserted at once so
    /// the id is known to the caller.
    pub fn create_node(&mut self, type_name: &str, hier_values: BTreeMap<String, Value>) -> Result<Id> {
        let id = match self.model.generate_new_id() {
            Some(id) => {
                let hier = SimpleFragment::with_values(HIER_TABLE_NAME, id.clone(), FragmentState::Created, hier_values);
                self.context(HIER_TABLE_NAME).add_created(hier.into());
                id
            }
            None => {
                let mut hier =
                    SimpleFragment::with_values(HIER_TABLE_NAME, Id::Serial(0), FragmentState::Created, hier_values);
                let id = self.mapper.insert_single_row(&mut hier)?;
                self.pending.add_modified(HIER_TABLE_NAME, id.clone());
                self.context(HIER_TABLE_NAME).put_pristine(hier.into());
                id
            }
        };
        let tables = self.model.type_fragments(type_name).to_vec();
        for table in tables {
            let fragment: Fragment = if self.model.is_collection_fragment(&table) {
                CollectionFragment::new(table.as_str(), id.clone(), FragmentState::Absent, Vec::new()).into()
            } else {
                SimpleFragment::new(table.as_str(), id.clone(), FragmentState::Absent).into()
            };
            self.context(&table).put_pristine(fragment);
        }
        log::debug!("Created node {} of type {}", id, type_name);
        Ok(id)
    }

    /// Adds a fragment that exists only in memory until the next flush.
    pub fn create_fragment(&mut self, fragment: Fragment) {
        let table = fragment.table().to_string();
        self.context(&table).add_created(fragment);
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Id of a named child, looking at unsaved changes first.
    pub fn get_child_id(&mut self, parent: &Id, name: &str, complex: Option<bool>) -> Result<Option<Id>> {
        let local = self
            .context(HIER_TABLE_NAME)
            .modified()
            .filter(|f| f.state() != FragmentState::Deleted)
            .filter_map(Fragment::as_simple)
            .find(|f| is_child_of(f, parent, Some(name), complex))
            .map(|f| f.id().clone());
        if local.is_some() {
            return Ok(local);
        }
        let Some(row) = self.mapper.read_child_hier_row(parent, name, complex)? else {
            return Ok(None);
        };
        let hier = hier_from_row(row)?;
        if !self.accept_selected_hier(&hier)? {
            // moved away or removed in this session
            return Ok(None);
        }
        Ok(Some(hier.id().clone()))
    }

    /// Hierarchy fragments of the children of a node, ordered by position
    /// then name. `complex` restricts to complex-property children or to
    /// regular ones.
    pub fn get_children(&mut self, parent: &Id, complex: Option<bool>) -> Result<Vec<SimpleFragment>> {
        let rows = self.mapper.read_children_hier_rows(parent, complex)?;
        let mut children = Vec::with_capacity(rows.len());
        for row in rows {
            let hier = hier_from_row(row)?;
            if self.accept_selected_hier(&hier)? {
                children.push(hier);
            }
        }
        children.extend(
            self.context(HIER_TABLE_NAME)
                .modified()
                .filter(|f| f.state() != FragmentState::Deleted)
                .filter_map(Fragment::as_simple)
                .filter(|f| is_child_of(f, parent, None, complex))
                .cloned(),
        );
        children.sort_by_key(|f| {
            let pos = f.get(HIER_CHILD_POS_KEY).as_i64();
            (pos.is_none(), pos, f.get_string(HIER_CHILD_NAME_KEY).unwrap_or_default().to_string())
        });
        Ok(children)
    }

    /// Reconciles a hierarchy row returned by a select with the cache.
    ///
    /// Returns `false` for rows this session changed, whose local copy wins.
    /// An invalidated entry is evicted here and replaced by the fresh row.
    /// An entry still absent or invalidated after that contradicts the row
    /// and is an error.
    fn accept_selected_hier(&mut self, hier: &SimpleFragment) -> Result<bool> {
        let ctx = self.context(HIER_TABLE_NAME);
        let id = hier.id();
        if !ctx.is_modified(id) && ctx.peek(id).is_some_and(|f| f.state().is_invalidated()) {
            ctx.evict(id);
        }
        match ctx.peek(id).map(Fragment::state) {
            None => {
                ctx.put_pristine(hier.clone().into());
                Ok(true)
            }
            Some(
                state @ (FragmentState::Absent
                | FragmentState::InvalidatedModified
                | FragmentState::InvalidatedDeleted),
            ) => Err(StorageError::IllegalState(format!(
                "{:?} {} {} returned by a select",
                state, HIER_TABLE_NAME, id
            ))),
            Some(_) => Ok(!ctx.is_modified(id)),
        }
    }

    /// Position for a new regular child, only for orderable parents.
    pub fn next_pos(&mut self, parent: &Id) -> Result<Option<i64>> {
        let parent_type = type_of(&self.existing_hier(parent)?);
        if !self.model.document_type_has_facet(&parent_type, FACET_ORDERABLE) {
            return Ok(None);
        }
        let max = self
            .get_children(parent, Some(false))?
            .iter()
            .filter_map(|f| f.get(HIER_CHILD_POS_KEY).as_i64())
            .max();
        Ok(Some(max.map_or(0, |m| m + 1)))
    }

    /// Fails when `node` is `ancestor` or lies under it.
    fn check_not_under(&mut self, node: &Id, ancestor: &Id, what: &str) -> Result<()> {
        let mut current = Some(node.clone());
        while let Some(id) = current {
            if &id == ancestor {
                return Err(StorageError::Conflict(format!(
                    "Cannot {} {} under itself",
                    what, ancestor
                )));
            }
            current = self.hier(&id)?.and_then(|h| h.get_id(HIER_PARENT_KEY));
        }
        Ok(())
    }

    fn check_free_name(&mut self, parent: &Id, name: &str) -> Result<()> {
        if self.get_child_id(parent, name, Some(false))?.is_some() {
            return Err(StorageError::Conflict(format!(
                "Destination name {} already exists under {}",
                name, parent
            )));
        }
        Ok(())
    }

    /// Path of a node from the root. Nodes outside the tree, such as
    /// versions, have none.
    pub fn get_path(&mut self, id: &Id) -> Result<Option<String>> {
        let mut names = Vec::new();
        let mut hier = self.existing_hier(id)?;
        while let Some(parent) = hier.get_id(HIER_PARENT_KEY) {
            names.push(hier.get_string(HIER_CHILD_NAME_KEY).unwrap_or_default().to_string());
            hier = self.existing_hier(&parent)?;
        }
        if !hier.get_string(HIER_CHILD_NAME_KEY).unwrap_or_default().is_empty() {
            return Ok(None);
        }
        names.reverse();
        Ok(Some(format!("/{}", names.join("/"))))
    }

    // ========================================================================
    // Structure
    // ========================================================================

    pub fn move_node(&mut self, id: &Id, parent: &Id, name: &str) -> Result<()> {
        let hier = self.existing_hier(id)?;
        if hier.get_id(HIER_PARENT_KEY).as_ref() == Some(parent)
            && hier.get_string(HIER_CHILD_NAME_KEY) == Some(name)
        {
            return Ok(());
        }
        self.check_not_under(parent, id, "move")?;
        self.check_free_name(parent, name)?;
        let pos = self.next_pos(parent)?;
        let hier = self.hier_for_write(id)?;
        hier.put(HIER_PARENT_KEY, Value::from(parent))?;
        hier.put(HIER_CHILD_NAME_KEY, Value::from(name))?;
        hier.put(HIER_CHILD_POS_KEY, Value::from(pos))?;
        Ok(())
    }

    /// Copies a subtree under a new parent. Pending changes are flushed
    /// first so the copy reads what this session sees.
    pub fn copy_node(&mut self, source: &Id, parent: &Id, name: &str) -> Result<Id> {
        let hier = self.existing_hier(source)?;
        self.check_not_under(parent, source, "copy")?;
        self.check_free_name(parent, name)?;
        let pos = self.next_pos(parent)?;
        self.save()?;
        let type_name = type_of(&hier);
        let result = self.mapper.copy_hierarchy(&CopyRequest {
            source_id: source,
            type_name: &type_name,
            dest_parent: Some(parent),
            dest_name: Some(name),
            overwrite: None,
        })?;
        if pos.is_some() {
            self.hier_for_write(&result.root_id)?
                .put(HIER_CHILD_POS_KEY, Value::from(pos))?;
        }
        Ok(result.root_id)
    }

    /// Schedules the deletion of every fragment of a node and of all its
    /// descendants.
    pub fn remove_node(&mut self, id: &Id) -> Result<()> {
        let hier = self.existing_hier(id)?;
        let mut doomed = vec![(id.clone(), type_of(&hier))];
        if self.context(HIER_TABLE_NAME).has_changes() {
            let mut queue = VecDeque::from([id.clone()]);
            while let Some(current) = queue.pop_front() {
                for child in self.get_children(&current, None)? {
                    queue.push_back(child.id().clone());
                    doomed.push((child.id().clone(), type_of(&child)));
                }
            }
        } else {
            doomed.extend(self.mapper.get_descendants(id)?);
        }
        if hier.get(MAIN_IS_VERSION_KEY).is_true() {
            self.context(VERSION_TABLE_NAME).remove(id);
        }
        for (node, type_name) in &doomed {
            let tables = self.model.type_fragments(type_name).to_vec();
            for table in tables {
                self.context(&table).remove(node);
            }
            self.context(HIER_TABLE_NAME).remove(node);
        }
        log::debug!("Removing {} nodes under {}", doomed.len(), id);
        Ok(())
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Snapshots a node as a new version and marks it checked in.
    pub fn check_in(&mut self, id: &Id, label: Option<&str>, description: Option<&str>) -> Result<Id> {
        let hier = self.existing_hier(id)?;
        if hier.get(MAIN_CHECKED_IN_KEY).is_true() {
            return Err(StorageError::IllegalState(format!("Node {} is already checked in", id)));
        }
        if hier.get(MAIN_IS_VERSION_KEY).is_true() {
            return Err(StorageError::IllegalState(format!("Node {} is a version", id)));
        }
        let label = label.map(str::to_string).unwrap_or_else(|| default_label(&hier));
        self.save()?;

        let type_name = type_of(&hier);
        let result = self.mapper.copy_hierarchy(&CopyRequest {
            source_id: id,
            type_name: &type_name,
            dest_parent: None,
            dest_name: None,
            overwrite: None,
        })?;
        let version_id = result.root_id;
        self.hier_for_write(&version_id)?
            .put(MAIN_IS_VERSION_KEY, Value::Boolean(true))?;

        // stored with millisecond precision, and strictly after the last one
        let now = Utc::now();
        let mut created = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let previous = self.mapper.get_version_ids(id, true)?;
        for (i, prev) in previous.iter().enumerate() {
            let Some(version) = self.get(VERSION_TABLE_NAME, prev, false)?.and_then(|f| f.as_simple()) else {
                continue;
            };
            let latest = version.get(VERSION_IS_LATEST_KEY).is_true();
            let last = version.get(VERSION_CREATED_KEY).as_timestamp().copied();
            if i == 0 {
                if let Some(last) = last.filter(|last| *last >= created) {
                    created = last + TimeDelta::milliseconds(1);
                }
            }
            if latest {
                if let Some(version) = self.for_write(VERSION_TABLE_NAME, prev)?.as_simple_mut() {
                    version.put(VERSION_IS_LATEST_KEY, Value::Boolean(false))?;
                }
            }
        }

        let values = BTreeMap::from([
            (VERSION_VERSIONABLE_KEY.to_string(), Value::from(id)),
            (VERSION_CREATED_KEY.to_string(), Value::from(created)),
            (VERSION_LABEL_KEY.to_string(), Value::from(label.as_str())),
            (VERSION_DESCRIPTION_KEY.to_string(), Value::from(description)),
            (VERSION_IS_LATEST_KEY.to_string(), Value::Boolean(true)),
        ]);
        self.create_fragment(
            SimpleFragment::with_values(VERSION_TABLE_NAME, version_id.clone(), FragmentState::Created, values).into(),
        );

        let live = self.hier_for_write(id)?;
        live.put(MAIN_CHECKED_IN_KEY, Value::Boolean(true))?;
        live.put(MAIN_BASE_VERSION_KEY, Value::from(&version_id))?;
        log::debug!("Checked in {} as version {} ({})", id, version_id, label);
        Ok(version_id)
    }

    pub fn check_out(&mut self, id: &Id) -> Result<()> {
        let hier = self.existing_hier(id)?;
        if !hier.get(MAIN_CHECKED_IN_KEY).is_true() {
            return Err(StorageError::IllegalState(format!("Node {} is not checked in", id)));
        }
        self.hier_for_write(id)?
            .put(MAIN_CHECKED_IN_KEY, Value::Boolean(false))
    }

    /// Replaces the content of a node by that of one of its versions.
    pub fn restore_by_label(&mut self, id: &Id, label: &str) -> Result<Id> {
        self.existing_hier(id)?;
        self.save()?;
        let version_id = self.mapper.get_version_id_by_label(id, label)?.ok_or_else(|| {
            StorageError::InvalidArgument(format!("Node {} has no version labeled {}", id, label))
        })?;
        for child in self.get_children(id, Some(true))? {
            self.remove_node(child.id())?;
        }
        self.save()?;

        let version = self.existing_hier(&version_id)?;
        let mut overwrite: BTreeMap<String, Value> = version
            .values()
            .iter()
            .filter(|(k, _)| !RESTORE_KEPT_KEYS.contains(&k.as_str()) && k.as_str() != MAIN_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        overwrite.insert(MAIN_CHECKED_IN_KEY.to_string(), Value::Boolean(true));
        overwrite.insert(MAIN_BASE_VERSION_KEY.to_string(), Value::from(&version_id));
        overwrite.insert(MAIN_IS_VERSION_KEY.to_string(), Value::Null);

        let type_name = type_of(&version);
        let result = self.mapper.copy_hierarchy(&CopyRequest {
            source_id: &version_id,
            type_name: &type_name,
            dest_parent: None,
            dest_name: None,
            overwrite: Some((id, &overwrite)),
        })?;
        for (table, kind) in &result.overwritten {
            self.context(table).invalidate(id, *kind == InvalidationKind::Deleted);
            self.pending.add(table, id.clone(), *kind);
        }
        log::debug!("Restored {} from version {} ({})", id, version_id, label);
        Ok(version_id)
    }

    // ========================================================================
    // Flush and invalidations
    // ========================================================================

    pub fn has_changes(&self) -> bool {
        self.contexts.values().any(Context::has_changes)
    }

    /// Writes every pending change: hierarchy rows first, then the other
    /// tables. Written fragments become pristine and deleted ones are
    /// evicted. What was written is recorded for the next announcement.
    pub fn save(&mut self) -> Result<()> {
        let Self {
            mapper,
            contexts,
            pending,
            ..
        } = self;
        let tables: Vec<String> = std::iter::once(HIER_TABLE_NAME.to_string())
            .chain(contexts.keys().filter(|t| *t != HIER_TABLE_NAME).cloned())
            .collect();
        for table in tables {
            let Some(ctx) = contexts.get_mut(&table) else {
                continue;
            };
            for id in ctx.flush_order() {
                let Some(fragment) = ctx.modified_mut(&id) else {
                    continue;
                };
                match (fragment.state(), fragment) {
                    (FragmentState::Created, Fragment::Simple(f)) => {
                        mapper.insert_single_row(f)?;
                    }
                    (FragmentState::Created, Fragment::Collection(f)) => {
                        mapper.insert_collection_rows(f)?;
                    }
                    (FragmentState::Modified, Fragment::Simple(f)) => mapper.update_single_row(f)?,
                    (FragmentState::Modified, Fragment::Collection(f)) => {
                        mapper.update_collection_rows(f)?;
                    }
                    (FragmentState::Deleted, _) => {
                        mapper.delete_fragment(&table, &id)?;
                        pending.add_deleted(&table, id);
                        continue;
                    }
                    _ => continue,
                }
                pending.add_modified(&table, id);
            }
            ctx.finish_flush();
        }
        Ok(())
    }

    /// Changes written since the last call.
    pub fn take_pending(&mut self) -> Invalidations {
        std::mem::take(&mut self.pending)
    }

    /// Forgets every cached fragment and local change, after a rollback.
    pub fn reset(&mut self) {
        self.contexts.values_mut().for_each(Context::reset);
    }

    /// Applies changes made elsewhere to the cached fragments.
    pub fn invalidate(&mut self, invalidations: &Invalidations) {
        for (kind, tables) in invalidations.by_kind() {
            for (table, ids) in tables {
                if let Some(ctx) = self.contexts.get_mut(table) {
                    for id in ids {
                        ctx.invalidate(id, kind == InvalidationKind::Deleted);
                    }
                }
            }
        }
    }

    /// Drops cached fragments without local changes.
    pub fn clear_caches(&mut self) -> usize {
        self.contexts.values_mut().map(Context::clear).sum()
    }
}

fn is_child_of(hier: &SimpleFragment, parent: &Id, name: Option<&str>, complex: Option<bool>) -> bool {
    hier.get_id(HIER_PARENT_KEY).as_ref() == Some(parent)
        && name.is_none_or(|n| hier.get_string(HIER_CHILD_NAME_KEY) == Some(n))
        && complex.is_none_or(|c| hier.get(HIER_CHILD_ISPROPERTY_KEY).is_true() == c)
}

fn hier_from_row(mut row: BTreeMap<String, Value>) -> Result<SimpleFragment> {
    let id = row
        .remove(MAIN_KEY)
        .and_then(|v| v.as_id())
        .ok_or_else(|| StorageError::IllegalState("Hierarchy row without id".into()))?;
    Ok(SimpleFragment::with_values(HIER_TABLE_NAME, id, FragmentState::Pristine, row))
}

pub(crate) fn type_of(hier: &SimpleFragment) -> String {
    hier.get_string(MAIN_PRIMARY_TYPE_KEY).unwrap_or_default().to_string()
}

/// `major.minor` when the node carries version numbers, empty otherwise.
fn default_label(hier: &SimpleFragment) -> String {
    match (
        hier.get(MAIN_MAJOR_VERSION_KEY).as_i64(),
        hier.get(MAIN_MINOR_VERSION_KEY).as_i64(),
    ) {
        (Some(major), Some(minor)) => format!("{}.{}", major, minor),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IdPolicy;
    use crate::mapper::tests::test_mapper;
    use crate::model::ROOT_TYPE;

    fn context() -> (PersistenceContext, Id) {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let mut pc = PersistenceContext::new(mapper, NonZeroUsize::new(100).unwrap());
        let root = pc.create_node(ROOT_TYPE, hier_values(None, "", ROOT_TYPE, false)).unwrap();
        (pc, root)
    }

    fn hier_values(parent: Option<&Id>, name: &str, type_name: &str, complex: bool) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (HIER_PARENT_KEY.to_string(), Value::from(parent)),
            (HIER_CHILD_NAME_KEY.to_string(), Value::from(name)),
            (HIER_CHILD_ISPROPERTY_KEY.to_string(), Value::Boolean(complex)),
            (MAIN_PRIMARY_TYPE_KEY.to_string(), Value::from(type_name)),
        ])
    }

    fn add(pc: &mut PersistenceContext, parent: &Id, name: &str, type_name: &str) -> Id {
        pc.create_node(type_name, hier_values(Some(parent), name, type_name, false))
            .unwrap()
    }

    #[test]
    fn test_children_merge_saved_and_unsaved() {
        let (mut pc, root) = context();
        let a = add(&mut pc, &root, "a", "Folder");
        pc.save().unwrap();
        let b = add(&mut pc, &root, "b", "File");

        let names: Vec<String> = pc
            .get_children(&root, Some(false))
            .unwrap()
            .iter()
            .map(|h| h.get_string(HIER_CHILD_NAME_KEY).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(pc.get_child_id(&root, "a", Some(false)).unwrap(), Some(a.clone()));
        assert_eq!(pc.get_child_id(&root, "b", None).unwrap(), Some(b));
        assert_eq!(pc.get_path(&a).unwrap().as_deref(), Some("/a"));
        assert_eq!(pc.get_path(&root).unwrap().as_deref(), Some("/"));
    }

    #[test]
    fn test_absent_fragment_is_cached() {
        let (mut pc, root) = context();
        let a = add(&mut pc, &root, "a", "File");
        pc.save().unwrap();
        pc.clear_caches();
        let state = pc.get("dublincore", &a, true).unwrap().unwrap().state();
        assert_eq!(state, FragmentState::Absent);
        assert!(pc.get("dublincore", &a, false).unwrap().is_none());

        pc.for_write("dublincore", &a)
            .unwrap()
            .as_simple_mut()
            .unwrap()
            .put("title", Value::from("x"))
            .unwrap();
        pc.save().unwrap();
        pc.clear_caches();
        let fragment = pc.get("dublincore", &a, false).unwrap().unwrap();
        assert_eq!(fragment.as_simple().unwrap().get_string("title"), Some("x"));
    }

    #[test]
    fn test_move_checks_cycles_and_names() {
        let (mut pc, root) = context();
        let a = add(&mut pc, &root, "a", "Folder");
        let b = add(&mut pc, &a, "b", "Folder");
        add(&mut pc, &root, "c", "File");
        assert!(matches!(pc.move_node(&a, &b, "a"), Err(StorageError::Conflict(_))));
        assert!(matches!(pc.move_node(&b, &root, "c"), Err(StorageError::Conflict(_))));

        pc.move_node(&b, &root, "b2").unwrap();
        assert_eq!(pc.get_path(&b).unwrap().as_deref(), Some("/b2"));
        assert!(pc.get_children(&a, None).unwrap().is_empty());
    }

    #[test]
    fn test_remove_deletes_subtree() {
        let (mut pc, root) = context();
        let a = add(&mut pc, &root, "a", "Folder");
        let b = add(&mut pc, &a, "b", "File");
        pc.for_write("dublincore", &b)
            .unwrap()
            .as_simple_mut()
            .unwrap()
            .put("title", Value::from("doc"))
            .unwrap();
        pc.save().unwrap();
        pc.take_pending();

        pc.remove_node(&a).unwrap();
        assert!(pc.hier(&b).unwrap().is_none());
        pc.save().unwrap();
        let pending = pc.take_pending();
        assert!(pending.contains(HIER_TABLE_NAME, &b, InvalidationKind::Deleted));
        assert!(pending.contains("dublincore", &b, InvalidationKind::Deleted));

        pc.clear_caches();
        assert!(pc.hier(&a).unwrap().is_none());
        assert!(pc.mapper().read_single_row("dublincore", &b).unwrap().is_none());
    }

    #[test]
    fn test_check_in_and_out() {
        let (mut pc, root) = context();
        let doc = add(&mut pc, &root, "doc", "File");
        let v1 = pc.check_in(&doc, Some("1.0"), None).unwrap();
        assert!(matches!(pc.check_in(&doc, None, None), Err(StorageError::IllegalState(_))));
        pc.check_out(&doc).unwrap();
        assert!(matches!(pc.check_out(&doc), Err(StorageError::IllegalState(_))));
        let v2 = pc.check_in(&doc, Some("2.0"), None).unwrap();
        pc.save().unwrap();
        pc.clear_caches();

        let first = pc.get(VERSION_TABLE_NAME, &v1, false).unwrap().unwrap().as_simple().unwrap().clone();
        let second = pc.get(VERSION_TABLE_NAME, &v2, false).unwrap().unwrap().as_simple().unwrap().clone();
        assert!(!first.get(VERSION_IS_LATEST_KEY).is_true());
        assert!(second.get(VERSION_IS_LATEST_KEY).is_true());
        assert!(first.get(VERSION_CREATED_KEY).as_timestamp() < second.get(VERSION_CREATED_KEY).as_timestamp());

        let version = pc.existing_hier(&v2).unwrap();
        assert!(version.get(MAIN_IS_VERSION_KEY).is_true());
        assert!(version.get(HIER_PARENT_KEY).is_null());
        assert!(pc.get_path(&v2).unwrap().is_none());
        let live = pc.existing_hier(&doc).unwrap();
        assert_eq!(live.get_id(MAIN_BASE_VERSION_KEY), Some(v2));
    }

    #[test]
    fn test_restore_unknown_label() {
        let (mut pc, root) = context();
        let doc = add(&mut pc, &root, "doc", "File");
        assert!(matches!(
            pc.restore_by_label(&doc, "9.9"),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_select_refuses_absent_cached_row() {
        let (mut pc, root) = context();
        let a = add(&mut pc, &root, "a", "Folder");
        pc.save().unwrap();
        pc.clear_caches();
        pc.context(HIER_TABLE_NAME)
            .put_pristine(SimpleFragment::new(HIER_TABLE_NAME, a.clone(), FragmentState::Absent).into());

        assert!(matches!(
            pc.get_child_id(&root, "a", Some(false)),
            Err(StorageError::IllegalState(_))
        ));
        assert!(matches!(
            pc.get_children(&root, Some(false)),
            Err(StorageError::IllegalState(_))
        ));
    }

    #[test]
    fn test_select_replaces_invalidated_cached_row() {
        let (mut pc, root) = context();
        let a = add(&mut pc, &root, "a", "Folder");
        pc.save().unwrap();
        pc.context(HIER_TABLE_NAME).invalidate(&a, false);

        assert_eq!(pc.get_child_id(&root, "a", Some(false)).unwrap(), Some(a.clone()));
        let state = pc.context(HIER_TABLE_NAME).peek(&a).map(Fragment::state);
        assert_eq!(state, Some(FragmentState::Pristine));
    }
}
