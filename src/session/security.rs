//! Access control lists on nodes and their evaluation.

use super::Node;
use super::Session;
use super::persistence::PersistenceContext;
use crate::core::{Id, Result, StorageError};
use crate::fragment::AclRow;
use crate::model::{
    ACL_TABLE_NAME, HIER_PARENT_KEY, MAIN_IS_VERSION_KEY, VERSION_TABLE_NAME,
    VERSION_VERSIONABLE_KEY,
};

pub const PERMISSION_EVERYTHING: &str = "Everything";
pub const PERMISSION_READ: &str = "Read";
pub const PERMISSION_VERSION: &str = "Version";

/// ACL set on the root of a new repository.
pub(crate) fn default_root_acl() -> Vec<AclRow> {
    vec![
        AclRow::grant("local", "administrators", PERMISSION_EVERYTHING),
        AclRow::grant("local", "administrator", PERMISSION_EVERYTHING),
        AclRow::grant("local", "members", PERMISSION_READ),
        AclRow::grant("local", "members", PERMISSION_VERSION),
    ]
}

/// Walks from a node up to the root. On each node the ACL rows are read in
/// position order and the first one matching decides; a node without a
/// matching row defers to its parent. Versions defer to the node they were
/// taken from. Unsaved changes are honored.
pub(crate) fn access_allowed(
    pc: &mut PersistenceContext,
    id: &Id,
    principals: &[String],
    permissions: &[String],
) -> Result<bool> {
    let mut current = Some(id.clone());
    while let Some(node) = current {
        let acl = pc
            .get(ACL_TABLE_NAME, &node, true)?
            .and_then(|f| f.as_collection())
            .map(|c| c.acl_rows())
            .unwrap_or_default();
        if let Some(row) = acl.iter().find(|row| row.matches(principals, permissions)) {
            return Ok(row.grant);
        }
        let hier = pc.existing_hier(&node)?;
        current = match hier.get_id(HIER_PARENT_KEY) {
            Some(parent) => Some(parent),
            None if hier.get(MAIN_IS_VERSION_KEY).is_true() => pc
                .get(VERSION_TABLE_NAME, &node, false)?
                .and_then(|f| f.as_simple())
                .and_then(|v| v.get_id(VERSION_VERSIONABLE_KEY)),
            None => None,
        };
    }
    Ok(false)
}

impl Session {
    pub fn get_acl(&self, node: &Node) -> Result<Vec<AclRow>> {
        let mut state = self.state()?;
        Ok(state
            .context
            .get(ACL_TABLE_NAME, node.id(), true)?
            .and_then(|f| f.as_collection())
            .map(|c| c.acl_rows())
            .unwrap_or_default())
    }

    /// Replaces the ACL of a node, in position order.
    pub fn set_acl(&mut self, node: &Node, acl: &[AclRow]) -> Result<()> {
        let mut state = self.state()?;
        state
            .context
            .for_write(ACL_TABLE_NAME, node.id())?
            .as_collection_mut()
            .ok_or_else(|| StorageError::IllegalState(format!("{} is not a collection", ACL_TABLE_NAME)))?
            .set_acl_rows(acl)
    }

    /// Whether the session's principals hold one of `permissions` on a node.
    /// `Everything` implies any permission. A session without principals is
    /// unrestricted.
    pub fn is_access_allowed(&self, node: &Node, permissions: &[&str]) -> Result<bool> {
        if self.principals.is_empty() {
            return Ok(true);
        }
        let mut permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
        if !permissions.iter().any(|p| p == PERMISSION_EVERYTHING) {
            permissions.push(PERMISSION_EVERYTHING.to_string());
        }
        let mut state = self.state()?;
        access_allowed(&mut state.context, node.id(), &self.principals, &permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{admin_session, test_session};

    #[test]
    fn test_first_matching_row_wins() {
        let (_repo, mut session) = test_session(&["alice"]);
        let root = session.get_root_node().unwrap();
        let doc = session.add_child_node(&root, "doc", "File").unwrap();
        session
            .set_acl(
                &doc,
                &[
                    AclRow::grant("local", "alice", PERMISSION_READ),
                    AclRow::deny("local", "alice", PERMISSION_READ),
                ],
            )
            .unwrap();
        assert!(session.is_access_allowed(&doc, &[PERMISSION_READ]).unwrap());

        session
            .set_acl(
                &doc,
                &[
                    AclRow::deny("local", "alice", PERMISSION_READ),
                    AclRow::grant("local", "alice", PERMISSION_READ),
                ],
            )
            .unwrap();
        assert!(!session.is_access_allowed(&doc, &[PERMISSION_READ]).unwrap());
        session.save().unwrap();
        assert_eq!(session.get_acl(&doc).unwrap().len(), 2);
    }

    #[test]
    fn test_inherits_from_root_acl() {
        let (repo, mut admin) = admin_session();
        let root = admin.get_root_node().unwrap();
        let folder = admin.add_child_node(&root, "folder", "Folder").unwrap();
        admin.save().unwrap();

        let member = repo
            .session(&crate::repository::Credentials::new("bob").group("members"))
            .unwrap();
        let folder = member.get_node_by_id(folder.id()).unwrap().unwrap();
        assert!(member.is_access_allowed(&folder, &[PERMISSION_READ]).unwrap());
        assert!(!member.is_access_allowed(&folder, &["Write"]).unwrap());
        assert!(admin.is_access_allowed(&folder, &["Write"]).unwrap());
    }
}
