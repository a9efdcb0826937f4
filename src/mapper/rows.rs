//! Row-level reads and writes of fragments.

use std::collections::{BTreeMap, VecDeque};

use super::Mapper;
use crate::core::{Column, Id, Result, StorageError, Value};
use crate::fragment::{CollectionFragment, Fragment, FragmentState, SimpleFragment};
use crate::model::{
    COLL_TABLE_POS_KEY, HIER_CHILD_NAME_KEY, HIER_PARENT_KEY, HIER_TABLE_NAME, MAIN_KEY,
    MAIN_PRIMARY_TYPE_KEY,
};
use crate::sql::ChildFilter;

impl Mapper {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Inserts a simple fragment. When the table has an identity column the
    /// generated id is fetched back and written onto the fragment.
    pub fn insert_single_row(&self, fragment: &mut SimpleFragment) -> Result<Id> {
        let table = fragment.table().to_string();
        let insert = self.sql_info.insert(&table);
        let params: Vec<Value> = insert
            .columns
            .iter()
            .map(|c| {
                if c.key == MAIN_KEY {
                    Value::from(fragment.id())
                } else {
                    fragment.get(&c.key).clone()
                }
            })
            .collect();
        self.execute(&insert.sql, &params)?;

        let has_identity = self.sql_info.table(&table).columns().iter().any(|c| c.identity);
        if has_identity {
            let sql = self
                .sql_info
                .identity_fetch_sql()
                .ok_or_else(|| StorageError::IllegalState(format!("No identity fetch for {}", table)))?;
            let id = self
                .select_single_value(sql, &[])?
                .and_then(|v| v.as_id())
                .ok_or_else(|| StorageError::IllegalState(format!("No generated id for {}", table)))?;
            log::debug!("  -> {}={}", MAIN_KEY, id);
            fragment.set_id(id);
        }
        fragment.set_pristine();
        Ok(fragment.id().clone())
    }

    /// Writes the changed columns of a simple fragment.
    pub fn update_single_row(&self, fragment: &mut SimpleFragment) -> Result<()> {
        let table = fragment.table().to_string();
        let t = self.sql_info.table(&table);
        let mut plain_dirty = false;
        let mut opaque_dirty = Vec::new();
        for key in fragment.dirty_keys() {
            match t.find_column(key) {
                Some(c) if c.opaque => opaque_dirty.push(key.clone()),
                Some(_) => plain_dirty = true,
                None => panic!("Unknown column {} in table {}", key, table),
            }
        }
        if plain_dirty {
            let update = self.sql_info.update_by_id(&table);
            let params = bind_with_id(&update.columns, fragment);
            self.execute(&update.sql, &params)?;
        }
        for key in opaque_dirty {
            let update = self.sql_info.update_opaque(&table, &key);
            let params = bind_with_id(&update.columns, fragment);
            self.execute(&update.sql, &params)?;
        }
        fragment.set_pristine();
        Ok(())
    }

    /// Inserts every row of a collection, positions numbered from 0.
    pub fn insert_collection_rows(&self, fragment: &CollectionFragment) -> Result<usize> {
        let insert = self.sql_info.insert(fragment.table());
        let mut count = 0;
        for (pos, row) in fragment.rows().iter().enumerate() {
            let params: Vec<Value> = insert
                .columns
                .iter()
                .map(|c| {
                    if c.key == MAIN_KEY {
                        Value::from(fragment.id())
                    } else if c.key == COLL_TABLE_POS_KEY {
                        Value::Long(pos as i64)
                    } else {
                        row.get(&c.key).cloned().unwrap_or(Value::Null)
                    }
                })
                .collect();
            count += self.execute(&insert.sql, &params)?;
        }
        Ok(count)
    }

    /// Replaces the stored collection: every old row is deleted, every
    /// current row inserted. Returns `(deleted, inserted)`.
    pub fn update_collection_rows(&self, fragment: &CollectionFragment) -> Result<(usize, usize)> {
        let deleted = self.execute(self.sql_info.delete_sql(fragment.table()), &[Value::from(fragment.id())])?;
        let inserted = self.insert_collection_rows(fragment)?;
        Ok((deleted, inserted))
    }

    /// Deletes the row(s) of one fragment. Returns the row count.
    pub fn delete_fragment(&self, table: &str, id: &Id) -> Result<usize> {
        self.execute(self.sql_info.delete_sql(table), &[Value::from(id)])
    }

    /// Deletes the rows of several ids of one table.
    pub fn delete_rows(&self, table: &str, ids: &[Id]) -> Result<usize> {
        let mut count = 0;
        for id in ids {
            count += self.delete_fragment(table, id)?;
        }
        Ok(count)
    }

    /// Sets explicit columns of one row.
    pub fn update_with_values(&self, table: &str, id: &Id, values: &BTreeMap<String, Value>) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        let keys: Vec<&str> = values.keys().map(String::as_str).collect();
        let update = self.sql_info.update_by_id_keys(table, &keys);
        let params: Vec<Value> = update
            .columns
            .iter()
            .map(|c| {
                if c.key == MAIN_KEY {
                    Value::from(id)
                } else {
                    values.get(&c.key).cloned().unwrap_or(Value::Null)
                }
            })
            .collect();
        self.execute(&update.sql, &params)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Non-opaque values of one row, `None` when it does not exist.
    pub fn read_single_row(&self, table: &str, id: &Id) -> Result<Option<BTreeMap<String, Value>>> {
        let select = self.sql_info.select_by_id(table);
        let rows = self.select_rows(&select.sql, &[Value::from(id)], &select.what_columns)?;
        Ok(rows.into_iter().next().map(|mut row| {
            // tables with only opaque columns select the id instead
            row.remove(MAIN_KEY);
            row
        }))
    }

    /// Rows of a collection in position order, without the position.
    pub fn read_collection_rows(&self, table: &str, id: &Id) -> Result<Vec<BTreeMap<String, Value>>> {
        let select = self.sql_info.select_by_id(table);
        let rows = self.select_rows(&select.sql, &[Value::from(id)], &select.what_columns)?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                row.remove(COLL_TABLE_POS_KEY);
                row
            })
            .collect())
    }

    /// Fetches one fragment. A missing simple row gives an `Absent` fragment
    /// when `allow_absent`, otherwise `None`. A collection always exists,
    /// possibly empty.
    pub fn read_fragment(&self, table: &str, id: &Id, allow_absent: bool) -> Result<Option<Fragment>> {
        if self.model.is_collection_fragment(table) {
            let rows = self.read_collection_rows(table, id)?;
            return Ok(Some(
                CollectionFragment::new(table, id.clone(), FragmentState::Pristine, rows).into(),
            ));
        }
        match self.read_single_row(table, id)? {
            Some(values) => Ok(Some(
                SimpleFragment::with_values(table, id.clone(), FragmentState::Pristine, values).into(),
            )),
            None if allow_absent => Ok(Some(
                SimpleFragment::new(table, id.clone(), FragmentState::Absent).into(),
            )),
            None => Ok(None),
        }
    }

    /// Reads one opaque column, which generic selects leave out.
    pub fn read_opaque(&self, table: &str, id: &Id, key: &str) -> Result<Value> {
        let sql = self.sql_info.select_opaque_sql(table, key);
        let column = self.sql_info.table(table).column(key).clone();
        let rows = self.select_rows(sql, &[Value::from(id)], std::slice::from_ref(&column))?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(key))
            .unwrap_or(Value::Null))
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Hierarchy row of a named child, with its parent and name filled in.
    pub fn read_child_hier_row(
        &self,
        parent: &Id,
        name: &str,
        complex_prop: Option<bool>,
    ) -> Result<Option<BTreeMap<String, Value>>> {
        let select = self.sql_info.select_child_by_name(ChildFilter::from_complex_prop(complex_prop));
        let rows = self.select_rows(
            &select.sql,
            &[Value::from(parent), Value::from(name)],
            &select.what_columns,
        )?;
        if rows.len() > 1 {
            log::error!("Child {} of {} exists {} times", name, parent, rows.len());
        }
        Ok(rows.into_iter().next().map(|mut row| {
            row.insert(HIER_PARENT_KEY.to_string(), Value::from(parent));
            row.insert(HIER_CHILD_NAME_KEY.to_string(), Value::from(name));
            row
        }))
    }

    /// Hierarchy rows of the children of a node, parent filled in.
    pub fn read_children_hier_rows(
        &self,
        parent: &Id,
        complex_prop: Option<bool>,
    ) -> Result<Vec<BTreeMap<String, Value>>> {
        let select = self.sql_info.select_children(ChildFilter::from_complex_prop(complex_prop));
        let rows = self.select_rows(&select.sql, &[Value::from(parent)], &select.what_columns)?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                row.insert(HIER_PARENT_KEY.to_string(), Value::from(parent));
                row
            })
            .collect())
    }

    /// `(id, primary type)` of the children of a node.
    pub fn get_children_ids_and_types(&self, parent: &Id, only_complex: bool) -> Result<Vec<(Id, String)>> {
        let select = self.sql_info.select_children_ids_and_types(only_complex);
        let rows = self.select_rows(&select.sql, &[Value::from(parent)], &select.what_columns)?;
        let mut children = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row
                .get(MAIN_KEY)
                .and_then(Value::as_id)
                .ok_or_else(|| StorageError::IllegalState(format!("Child of {} without id", parent)))?;
            let type_name = row
                .get(MAIN_PRIMARY_TYPE_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            children.push((id, type_name));
        }
        Ok(children)
    }

    /// `(id, primary type)` of every stored descendant of a node, breadth
    /// first, the node excluded.
    pub fn get_descendants(&self, root: &Id) -> Result<Vec<(Id, String)>> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(id) = queue.pop_front() {
            for (child, type_name) in self.get_children_ids_and_types(&id, false)? {
                queue.push_back(child.clone());
                result.push((child, type_name));
            }
        }
        log::debug!("Found {} descendants of {} in {}", result.len(), root, HIER_TABLE_NAME);
        Ok(result)
    }
}

/// Binds statement columns from a fragment, the id included.
fn bind_with_id(columns: &[Column], fragment: &SimpleFragment) -> Vec<Value> {
    columns
        .iter()
        .map(|c| {
            if c.key == MAIN_KEY {
                Value::from(fragment.id())
            } else {
                fragment.get(&c.key).clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_mapper;
    use super::*;
    use crate::core::IdPolicy;
    use crate::model::{HIER_CHILD_ISPROPERTY_KEY, HIER_CHILD_POS_KEY};

    fn hier_fragment(id: Id, parent: Option<&Id>, name: &str, type_name: &str) -> SimpleFragment {
        let values = BTreeMap::from([
            (HIER_PARENT_KEY.to_string(), parent.map(Value::from).unwrap_or(Value::Null)),
            (HIER_CHILD_NAME_KEY.to_string(), Value::from(name)),
            (HIER_CHILD_POS_KEY.to_string(), Value::Null),
            (HIER_CHILD_ISPROPERTY_KEY.to_string(), Value::Boolean(false)),
            (MAIN_PRIMARY_TYPE_KEY.to_string(), Value::from(type_name)),
        ]);
        SimpleFragment::with_values(HIER_TABLE_NAME, id, FragmentState::Created, values)
    }

    #[test]
    fn test_insert_and_read_single_row() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let mut f = hier_fragment(Id::from("a"), None, "", "Folder");
        mapper.insert_single_row(&mut f).unwrap();
        assert_eq!(f.state(), FragmentState::Pristine);

        let row = mapper.read_single_row(HIER_TABLE_NAME, &Id::from("a")).unwrap().unwrap();
        assert_eq!(row[MAIN_PRIMARY_TYPE_KEY], Value::from("Folder"));
        assert_eq!(row[HIER_CHILD_ISPROPERTY_KEY], Value::Boolean(false));
        assert!(mapper.read_single_row(HIER_TABLE_NAME, &Id::from("b")).unwrap().is_none());
    }

    #[test]
    fn test_identity_insert_fetches_generated_id() {
        let mapper = test_mapper(IdPolicy::DbIdentity);
        let mut first = hier_fragment(Id::Serial(0), None, "", "Folder");
        let first_id = mapper.insert_single_row(&mut first).unwrap();
        let mut second = hier_fragment(Id::Serial(0), Some(&first_id), "child", "File");
        let second_id = mapper.insert_single_row(&mut second).unwrap();
        assert!(matches!(first_id, Id::Serial(_)));
        assert_ne!(first_id, second_id);
        assert_eq!(second.id(), &second_id);

        let children = mapper.get_children_ids_and_types(&first_id, false).unwrap();
        assert_eq!(children, vec![(second_id, "File".to_string())]);
    }

    #[test]
    fn test_read_fragment_absent_handling() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let id = Id::from("nope");
        assert!(mapper.read_fragment("dublincore", &id, false).unwrap().is_none());
        let absent = mapper.read_fragment("dublincore", &id, true).unwrap().unwrap();
        assert_eq!(absent.state(), FragmentState::Absent);
        let coll = mapper.read_fragment("dublincore_subjects", &id, false).unwrap().unwrap();
        assert!(coll.as_collection().unwrap().is_empty());
    }

    #[test]
    fn test_update_only_writes_dirty_opaque_columns() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let id = Id::from("f");
        let mut file = SimpleFragment::with_values(
            "file",
            id.clone(),
            FragmentState::Created,
            BTreeMap::from([("content".to_string(), Value::Binary(vec![1, 2, 3]))]),
        );
        mapper.insert_single_row(&mut file).unwrap();
        assert_eq!(mapper.read_opaque("file", &id, "content").unwrap(), Value::Binary(vec![1, 2, 3]));

        // a pristine read never holds the opaque value
        let row = mapper.read_single_row("file", &id).unwrap().unwrap();
        assert!(!row.contains_key("content"));

        let mut dc = SimpleFragment::with_values(
            "dublincore",
            id.clone(),
            FragmentState::Created,
            BTreeMap::from([("title".to_string(), Value::from("t"))]),
        );
        mapper.insert_single_row(&mut dc).unwrap();
        dc.put("description", Value::from("long text")).unwrap();
        mapper.update_single_row(&mut dc).unwrap();
        let row = mapper.read_single_row("dublincore", &id).unwrap().unwrap();
        assert_eq!(row["title"], Value::from("t"));
        assert_eq!(row["description"], Value::from("long text"));

        file.put("content", Value::Binary(vec![9])).unwrap();
        mapper.update_single_row(&mut file).unwrap();
        assert_eq!(mapper.read_opaque("file", &id, "content").unwrap(), Value::Binary(vec![9]));
    }

    #[test]
    fn test_collection_replace_counts() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let id = Id::from("c");
        let mut coll = CollectionFragment::from_items(
            "dublincore_subjects",
            id.clone(),
            FragmentState::Created,
            vec![Value::from("a"), Value::from("b"), Value::from("c")],
        );
        assert_eq!(mapper.insert_collection_rows(&coll).unwrap(), 3);

        coll.set_state(FragmentState::Pristine);
        coll.set_items(vec![Value::from("z"), Value::from("y")]).unwrap();
        assert_eq!(mapper.update_collection_rows(&coll).unwrap(), (3, 2));

        let rows = mapper.read_collection_rows("dublincore_subjects", &id).unwrap();
        let items: Vec<&Value> = rows.iter().map(|r| &r["item"]).collect();
        assert_eq!(items, vec![&Value::from("z"), &Value::from("y")]);
        assert!(rows.iter().all(|r| !r.contains_key(COLL_TABLE_POS_KEY)));
    }

    #[test]
    fn test_children_and_descendants() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let root = Id::from("r");
        let a = Id::from("a");
        let b = Id::from("b");
        mapper.insert_single_row(&mut hier_fragment(root.clone(), None, "", "Folder")).unwrap();
        mapper.insert_single_row(&mut hier_fragment(a.clone(), Some(&root), "a", "Folder")).unwrap();
        mapper.insert_single_row(&mut hier_fragment(b.clone(), Some(&a), "b", "File")).unwrap();

        let row = mapper.read_child_hier_row(&root, "a", Some(false)).unwrap().unwrap();
        assert_eq!(row[MAIN_KEY], Value::from("a"));
        assert_eq!(row[HIER_PARENT_KEY], Value::from(&root));
        assert!(mapper.read_child_hier_row(&root, "a", Some(true)).unwrap().is_none());
        assert_eq!(mapper.read_children_hier_rows(&a, None).unwrap().len(), 1);
        assert_eq!(
            mapper.get_descendants(&root).unwrap(),
            vec![(a.clone(), "Folder".to_string()), (b.clone(), "File".to_string())]
        );

        assert_eq!(mapper.delete_rows(HIER_TABLE_NAME, &[a, b]).unwrap(), 2);
        assert!(mapper.get_descendants(&root).unwrap().is_empty());
    }

    #[test]
    fn test_update_with_values() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let id = Id::from("v");
        mapper.insert_single_row(&mut hier_fragment(id.clone(), None, "v", "File")).unwrap();
        let values = BTreeMap::from([
            (HIER_CHILD_NAME_KEY.to_string(), Value::from("renamed")),
            (crate::model::MAIN_CHECKED_IN_KEY.to_string(), Value::Boolean(true)),
        ]);
        assert_eq!(mapper.update_with_values(HIER_TABLE_NAME, &id, &values).unwrap(), 1);
        let row = mapper.read_single_row(HIER_TABLE_NAME, &id).unwrap().unwrap();
        assert_eq!(row[HIER_CHILD_NAME_KEY], Value::from("renamed"));
        assert_eq!(row[crate::model::MAIN_CHECKED_IN_KEY], Value::Boolean(true));
    }
}
