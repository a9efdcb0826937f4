use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FragmentState;
use crate::core::{Id, Result, Value};
use crate::model::{
    ACL_GRANT_KEY, ACL_GROUP_KEY, ACL_NAME_KEY, ACL_PERMISSION_KEY, ACL_USER_KEY,
    COLL_TABLE_VALUE_KEY,
};

/// All rows of a collection table for one owning id.
///
/// Rows exclude the id and position columns; a row's position is its index.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionFragment {
    table: String,
    id: Id,
    state: FragmentState,
    rows: Vec<BTreeMap<String, Value>>,
}

impl CollectionFragment {
    pub fn new(
        table: impl Into<String>,
        id: Id,
        state: FragmentState,
        rows: Vec<BTreeMap<String, Value>>,
    ) -> Self {
        Self {
            table: table.into(),
            id,
            state,
            rows,
        }
    }

    /// Collection of a list property, one `item` per row.
    pub fn from_items(
        table: impl Into<String>,
        id: Id,
        state: FragmentState,
        items: Vec<Value>,
    ) -> Self {
        Self::new(table, id, state, items_to_rows(items))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    pub fn state(&self) -> FragmentState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: FragmentState) {
        self.state = state;
    }

    pub fn rows(&self) -> &[BTreeMap<String, Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Replaces the whole collection.
    pub fn set_rows(&mut self, rows: Vec<BTreeMap<String, Value>>) -> Result<()> {
        if rows == self.rows && self.state != FragmentState::Absent {
            return Ok(());
        }
        self.state = self.state.after_write()?;
        self.rows = rows;
        Ok(())
    }

    pub fn items(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(COLL_TABLE_VALUE_KEY).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn set_items(&mut self, items: Vec<Value>) -> Result<()> {
        self.set_rows(items_to_rows(items))
    }

    pub fn acl_rows(&self) -> Vec<AclRow> {
        self.rows.iter().map(AclRow::from_values).collect()
    }

    pub fn set_acl_rows(&mut self, acls: &[AclRow]) -> Result<()> {
        self.set_rows(acls.iter().map(AclRow::to_values).collect())
    }

    pub(crate) fn refresh(&mut self, rows: Vec<BTreeMap<String, Value>>) {
        self.rows = rows;
        self.state = FragmentState::Pristine;
    }
}

fn items_to_rows(items: Vec<Value>) -> Vec<BTreeMap<String, Value>> {
    items
        .into_iter()
        .map(|item| BTreeMap::from([(COLL_TABLE_VALUE_KEY.to_string(), item)]))
        .collect()
}

/// One access control entry. Position is the index in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRow {
    /// Name of the ACL this entry belongs to ("local", "inherited"...)
    pub name: String,
    pub grant: bool,
    pub permission: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl AclRow {
    pub fn grant(name: &str, principal: &str, permission: &str) -> Self {
        Self {
            name: name.to_string(),
            grant: true,
            permission: permission.to_string(),
            user: Some(principal.to_string()),
            group: None,
        }
    }

    pub fn deny(name: &str, principal: &str, permission: &str) -> Self {
        Self {
            grant: false,
            ..Self::grant(name, principal, permission)
        }
    }

    /// True if this entry applies to one of `principals` for one of
    /// `permissions`.
    pub fn matches(&self, principals: &[String], permissions: &[String]) -> bool {
        let principal_match = [&self.user, &self.group]
            .into_iter()
            .flatten()
            .any(|p| principals.iter().any(|q| q == p));
        principal_match && permissions.iter().any(|p| *p == self.permission)
    }

    pub fn to_values(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (ACL_NAME_KEY.to_string(), Value::from(self.name.as_str())),
            (ACL_GRANT_KEY.to_string(), Value::Boolean(self.grant)),
            (ACL_PERMISSION_KEY.to_string(), Value::from(self.permission.as_str())),
            (ACL_USER_KEY.to_string(), Value::from(self.user.clone())),
            (ACL_GROUP_KEY.to_string(), Value::from(self.group.clone())),
        ])
    }

    pub fn from_values(values: &BTreeMap<String, Value>) -> Self {
        let text = |key: &str| {
            values
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            name: text(ACL_NAME_KEY).unwrap_or_default(),
            grant: values.get(ACL_GRANT_KEY).is_some_and(Value::is_true),
            permission: text(ACL_PERMISSION_KEY).unwrap_or_default(),
            user: text(ACL_USER_KEY),
            group: text(ACL_GROUP_KEY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_items_replaces_whole_collection() {
        let mut f = CollectionFragment::from_items(
            "dc_subjects",
            Id::from("x"),
            FragmentState::Pristine,
            vec![Value::from("a"), Value::from("b")],
        );
        f.set_items(vec![Value::from("a"), Value::from("b")]).unwrap();
        assert_eq!(f.state(), FragmentState::Pristine);

        f.set_items(vec![Value::from("c")]).unwrap();
        assert_eq!(f.state(), FragmentState::Modified);
        assert_eq!(f.items(), vec![Value::from("c")]);
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn test_acl_row_values() {
        let row = AclRow::deny("local", "alice", "Read");
        let back = AclRow::from_values(&row.to_values());
        assert_eq!(back, row);
        assert!(!back.grant);
    }

    #[test]
    fn test_acl_matching_uses_user_or_group() {
        let principals = vec!["bob".to_string(), "members".to_string()];
        let permissions = vec!["Read".to_string(), "Everything".to_string()];

        let mut by_group = AclRow::grant("local", "x", "Read");
        by_group.user = None;
        by_group.group = Some("members".to_string());
        assert!(by_group.matches(&principals, &permissions));

        assert!(!AclRow::grant("local", "alice", "Read").matches(&principals, &permissions));
        assert!(!AclRow::grant("local", "bob", "Write").matches(&principals, &permissions));
    }
}
