//! Recursive copy of a hierarchy, used for document copy, version creation
//! and version restore.

use std::collections::{BTreeMap, BTreeSet};

use super::Mapper;
use crate::core::{Id, Result, StorageError, Value};
use crate::fragment::InvalidationKind;
use crate::model::{
    ACL_TABLE_NAME, HIER_CHILD_NAME_KEY, HIER_PARENT_KEY, HIER_TABLE_NAME, MAIN_KEY,
};
use crate::sql::CopyHierMode;

/// What to copy and where.
#[derive(Debug, Clone)]
pub struct CopyRequest<'a> {
    pub source_id: &'a Id,
    /// Primary type of the source, already known to the caller
    pub type_name: &'a str,
    /// New parent; `None` creates a version snapshot
    pub dest_parent: Option<&'a Id>,
    /// New name; `None` keeps the source name
    pub dest_name: Option<&'a str>,
    /// Existing node to copy onto, with the hierarchy columns to set on it
    pub overwrite: Option<(&'a Id, &'a BTreeMap<String, Value>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyResult {
    pub root_id: Id,
    /// Source id to copied id, in copy order
    pub id_map: Vec<(Id, Id)>,
    /// Tables whose rows under the overwritten id changed, with how
    pub overwritten: Vec<(String, InvalidationKind)>,
}

/// Ids collected while walking the source tree.
#[derive(Debug, Default)]
struct CopyState {
    id_map: Vec<(Id, Id)>,
    id_type: BTreeMap<Id, String>,
}

impl CopyState {
    fn new_id(&self, source: &Id) -> Option<&Id> {
        self.id_map.iter().find(|(s, _)| s == source).map(|(_, n)| n)
    }
}

impl Mapper {
    /// Copies the tree rooted at `source_id` and all its fragments.
    ///
    /// Without a destination parent only complex-property children are
    /// copied. ACLs are never copied. With an overwrite target the root is
    /// not inserted: its hierarchy row gets the given values and every other
    /// fragment of the root is replaced by the source's.
    pub fn copy_hierarchy(&self, request: &CopyRequest<'_>) -> Result<CopyResult> {
        let mut state = CopyState::default();
        let mut overwritten = Vec::new();
        let overwrite_id = request.overwrite.map(|(id, _)| id);

        if let Some((id, values)) = request.overwrite {
            self.update_with_values(HIER_TABLE_NAME, id, values)?;
            overwritten.push((HIER_TABLE_NAME.to_string(), InvalidationKind::Modified));
        }

        let root_id = self.copy_hier_recursive(
            request.source_id,
            request.type_name,
            request.dest_parent,
            request.dest_name,
            overwrite_id,
            &mut state,
        )?;

        let per_fragment = self.model.per_fragment_ids(&state.id_type);
        for (table, ids) in &per_fragment {
            if table == ACL_TABLE_NAME {
                continue;
            }
            match self.copy_fragments(table, ids, &state, overwrite_id)? {
                Some(true) => overwritten.push((table.clone(), InvalidationKind::Modified)),
                Some(false) => overwritten.push((table.clone(), InvalidationKind::Deleted)),
                None => {}
            }
        }
        log::debug!(
            "Copied {} nodes from {} to {}",
            state.id_map.len(),
            request.source_id,
            root_id
        );
        Ok(CopyResult {
            root_id,
            id_map: state.id_map,
            overwritten,
        })
    }

    fn copy_hier_recursive(
        &self,
        id: &Id,
        type_name: &str,
        parent: Option<&Id>,
        name: Option<&str>,
        overwrite_id: Option<&Id>,
        state: &mut CopyState,
    ) -> Result<Id> {
        state.id_type.insert(id.clone(), type_name.to_string());
        let new_id = match overwrite_id {
            Some(target) => target.clone(),
            None => self.copy_hier(id, parent, name)?,
        };
        state.id_map.push((id.clone(), new_id.clone()));

        let only_complex = parent.is_none();
        for (child, child_type) in self.get_children_ids_and_types(id, only_complex)? {
            self.copy_hier_recursive(&child, &child_type, Some(&new_id), None, None, state)?;
        }
        Ok(new_id)
    }

    /// Copies one hierarchy row under a new parent, returning the new id.
    fn copy_hier(&self, id: &Id, parent: Option<&Id>, name: Option<&str>) -> Result<Id> {
        let mode = match (parent, name) {
            (None, _) => CopyHierMode::CreateVersion,
            (Some(_), Some(_)) => CopyHierMode::ExplicitName,
            (Some(_), None) => CopyHierMode::Plain,
        };
        let info = self.sql_info.copy_hier(mode);
        let generated = self.model.generate_new_id();

        let mut params = Vec::with_capacity(info.bind_keys.len() + 1);
        for key in &info.bind_keys {
            let value = match key.as_str() {
                MAIN_KEY => generated.as_ref().map(Value::from).unwrap_or(Value::Null),
                HIER_PARENT_KEY => parent.map(Value::from).unwrap_or(Value::Null),
                HIER_CHILD_NAME_KEY => name.map(Value::from).unwrap_or(Value::Null),
                // version pointers of a version snapshot
                _ => Value::Null,
            };
            params.push(value);
        }
        params.push(Value::from(id));
        let count = self.execute(&info.sql, &params)?;
        if count != 1 {
            return Err(StorageError::IllegalState(format!(
                "Copy of {} inserted {} rows",
                id, count
            )));
        }

        match generated {
            Some(new_id) => Ok(new_id),
            None => {
                let sql = self
                    .sql_info
                    .identity_fetch_sql()
                    .ok_or_else(|| StorageError::IllegalState("No identity fetch for copy".into()))?;
                self.select_single_value(sql, &[])?
                    .and_then(|v| v.as_id())
                    .ok_or_else(|| StorageError::IllegalState(format!("No generated id for copy of {}", id)))
            }
        }
    }

    /// Copies the rows of `table` for every collected id to its new id.
    ///
    /// Returns `Some(true)` when rows now exist under the overwrite id,
    /// `Some(false)` when its previous rows were removed and none copied,
    /// `None` when nothing changed there.
    fn copy_fragments(
        &self,
        table: &str,
        ids: &BTreeSet<Id>,
        state: &CopyState,
        overwrite_id: Option<&Id>,
    ) -> Result<Option<bool>> {
        let copy_sql = self.sql_info.copy_sql(table);
        let mut before = false;
        let mut after = false;
        for id in ids {
            let new_id = state
                .new_id(id)
                .unwrap_or_else(|| panic!("Copied id {} missing from id map", id));
            let overwrite = overwrite_id == Some(new_id);
            if overwrite {
                before = self.delete_fragment(table, new_id)? > 0;
            }
            let count = self.execute(copy_sql, &[Value::from(new_id), Value::from(id)])?;
            if overwrite {
                after = count > 0;
            }
        }
        Ok(if after {
            Some(true)
        } else if before {
            Some(false)
        } else {
            None
        })
    }
}
