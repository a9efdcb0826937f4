use std::collections::{BTreeMap, BTreeSet};

use super::FragmentState;
use crate::core::{Id, Result, Value};

static NULL: Value = Value::Null;

/// One row of a simple table, keyed by id.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleFragment {
    table: String,
    id: Id,
    state: FragmentState,
    values: BTreeMap<String, Value>,
    /// Keys written since the fragment was last pristine
    dirty: BTreeSet<String>,
}

impl SimpleFragment {
    pub fn new(table: impl Into<String>, id: Id, state: FragmentState) -> Self {
        Self {
            table: table.into(),
            id,
            state,
            values: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn with_values(
        table: impl Into<String>,
        id: Id,
        state: FragmentState,
        values: BTreeMap<String, Value>,
    ) -> Self {
        let dirty = if state == FragmentState::Created {
            values.keys().cloned().collect()
        } else {
            BTreeSet::new()
        };
        Self {
            table: table.into(),
            id,
            state,
            values,
            dirty,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Replaces the id after the database generated one.
    pub(crate) fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    pub fn state(&self) -> FragmentState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: FragmentState) {
        self.state = state;
    }

    pub(crate) fn set_pristine(&mut self) {
        self.state = FragmentState::Pristine;
        self.dirty.clear();
    }

    /// Value of a key, `Null` when never set.
    pub fn get(&self, key: &str) -> &Value {
        self.values.get(key).unwrap_or(&NULL)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).as_str()
    }

    pub fn get_id(&self, key: &str) -> Option<Id> {
        self.get(key).as_id()
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn dirty_keys(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    /// Writes a value, moving the fragment to `Modified` or `Created`.
    ///
    /// Writing the value already held is not a change.
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if self.state != FragmentState::Absent && self.get(&key) == &value {
            return Ok(());
        }
        self.state = self.state.after_write()?;
        self.dirty.insert(key.clone());
        self.values.insert(key, value);
        Ok(())
    }

    /// Sets a value without changing state, for values the database already
    /// holds.
    pub(crate) fn put_pristine(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Replaces the content with freshly fetched values.
    pub(crate) fn refresh(&mut self, values: BTreeMap<String, Value>) {
        self.values = values;
        self.set_pristine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_marks_modified() {
        let mut values = BTreeMap::new();
        values.insert("title".to_string(), Value::from("a"));
        let mut f = SimpleFragment::with_values("dc", Id::from("x"), FragmentState::Pristine, values);

        f.put("title", Value::from("a")).unwrap();
        assert_eq!(f.state(), FragmentState::Pristine);
        assert!(f.dirty_keys().is_empty());

        f.put("title", Value::from("b")).unwrap();
        assert_eq!(f.state(), FragmentState::Modified);
        assert!(f.dirty_keys().contains("title"));
        assert_eq!(f.get_string("title"), Some("b"));
        assert!(f.get("missing").is_null());

        f.set_pristine();
        assert!(f.dirty_keys().is_empty());
    }

    #[test]
    fn test_put_on_absent_creates() {
        let mut f = SimpleFragment::new("misc", Id::from("x"), FragmentState::Absent);
        f.put("lifecyclestate", Value::Null).unwrap();
        assert_eq!(f.state(), FragmentState::Created);
    }

    #[test]
    fn test_put_on_deleted_fails() {
        let mut f = SimpleFragment::new("misc", Id::from("x"), FragmentState::Deleted);
        assert!(f.put("lifecyclestate", Value::from("project")).is_err());
    }

    #[test]
    fn test_created_values_are_dirty() {
        let mut values = BTreeMap::new();
        values.insert("content".to_string(), Value::Binary(vec![1, 2]));
        let f = SimpleFragment::with_values("file", Id::from("x"), FragmentState::Created, values);
        assert!(f.dirty_keys().contains("content"));
    }
}
