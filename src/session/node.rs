use super::Session;
use super::persistence::type_of;
use crate::core::{Id, Result, StorageError, Value};
use crate::fragment::SimpleFragment;
use crate::model::{
    ACL_PROP, HIER_CHILD_NAME_KEY, HIER_TABLE_NAME, Model, PROXY_TYPE, PropertyInfo,
};

/// Handle on a node of a session's tree.
///
/// The name is the one the node had when the handle was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: Id,
    name: String,
    type_name: String,
}

impl Node {
    pub(crate) fn new(id: Id, name: &str, type_name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            type_name: type_name.to_string(),
        }
    }

    pub(crate) fn from_hier(hier: &SimpleFragment) -> Self {
        Self {
            id: hier.id().clone(),
            name: hier.get_string(HIER_CHILD_NAME_KEY).unwrap_or_default().to_string(),
            type_name: type_of(hier),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_proxy(&self) -> bool {
        self.type_name == PROXY_TYPE
    }
}

/// Where a property of a node is stored, after checking that the node's
/// type has it.
fn property<'m>(model: &'m Model, node: &Node, name: &str, multi: bool) -> Result<&'m PropertyInfo> {
    if name == ACL_PROP {
        return Err(StorageError::InvalidArgument(format!(
            "{} is accessed through the ACL methods",
            ACL_PROP
        )));
    }
    let info = model
        .property_info(name)
        .ok_or_else(|| StorageError::InvalidArgument(format!("Unknown property: {}", name)))?;
    if info.fragment != HIER_TABLE_NAME && !model.type_fragments(node.type_name()).contains(&info.fragment) {
        return Err(StorageError::InvalidArgument(format!(
            "Type {} has no property {}",
            node.type_name(),
            name
        )));
    }
    if info.multi != multi {
        let kind = if info.multi { "a list" } else { "a single value" };
        return Err(StorageError::InvalidArgument(format!("Property {} is {}", name, kind)));
    }
    Ok(info)
}

impl Session {
    pub fn get_single_property(&self, node: &Node, name: &str) -> Result<Value> {
        let model = self.model.clone();
        let info = property(&model, node, name, false)?;
        if model.fragment(&info.fragment).opaque.contains(&info.key) {
            return self.get_opaque_property(node, name);
        }
        let mut state = self.state()?;
        Ok(state
            .context
            .get(&info.fragment, node.id(), true)?
            .and_then(|f| f.as_simple())
            .map(|f| f.get(&info.key).clone())
            .unwrap_or(Value::Null))
    }

    pub fn set_single_property(&mut self, node: &Node, name: &str, value: Value) -> Result<()> {
        let model = self.model.clone();
        let info = property(&model, node, name, false)?;
        self.sql_info.table(&info.fragment).column(&info.key).validate(&value)?;
        let mut state = self.state()?;
        state
            .context
            .for_write(&info.fragment, node.id())?
            .as_simple_mut()
            .ok_or_else(|| StorageError::IllegalState(format!("{} is a collection", info.fragment)))?
            .put(info.key.as_str(), value)
    }

    /// Items of a list property, empty when never set.
    pub fn get_collection_property(&self, node: &Node, name: &str) -> Result<Vec<Value>> {
        let model = self.model.clone();
        let info = property(&model, node, name, true)?;
        let mut state = self.state()?;
        Ok(state
            .context
            .get(&info.fragment, node.id(), true)?
            .and_then(|f| f.as_collection())
            .map(|c| c.items())
            .unwrap_or_default())
    }

    /// Replaces every item of a list property.
    pub fn set_collection_property(&mut self, node: &Node, name: &str, items: Vec<Value>) -> Result<()> {
        let model = self.model.clone();
        let info = property(&model, node, name, true)?;
        let column = self.sql_info.table(&info.fragment).column(&info.key);
        for item in &items {
            column.validate(item)?;
        }
        let mut state = self.state()?;
        state
            .context
            .for_write(&info.fragment, node.id())?
            .as_collection_mut()
            .ok_or_else(|| StorageError::IllegalState(format!("{} is not a collection", info.fragment)))?
            .set_items(items)
    }

    /// Value of a property that generic reads leave out, such as binaries.
    pub fn get_opaque_property(&self, node: &Node, name: &str) -> Result<Value> {
        let model = self.model.clone();
        let info = property(&model, node, name, false)?;
        let mut state = self.state()?;
        state.context.read_opaque(&info.fragment, node.id(), &info.key)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{StorageError, Value};
    use crate::session::tests::admin_session;

    #[test]
    fn test_single_and_list_properties() {
        let (_repo, mut session) = admin_session();
        let root = session.get_root_node().unwrap();
        let doc = session.add_child_node(&root, "doc", "File").unwrap();
        session.set_single_property(&doc, "dc:title", Value::from("x")).unwrap();
        session
            .set_collection_property(&doc, "dc:subjects", vec![Value::from("a"), Value::from("b")])
            .unwrap();
        session
            .set_single_property(&doc, "file:content", Value::Binary(vec![1, 2, 3]))
            .unwrap();
        session.save().unwrap();
        session.clear_caches().unwrap();

        assert_eq!(session.get_single_property(&doc, "dc:title").unwrap(), Value::from("x"));
        assert_eq!(
            session.get_collection_property(&doc, "dc:subjects").unwrap(),
            vec![Value::from("a"), Value::from("b")]
        );
        assert_eq!(
            session.get_opaque_property(&doc, "file:content").unwrap(),
            Value::Binary(vec![1, 2, 3])
        );
        assert_eq!(session.get_single_property(&doc, "dc:description").unwrap(), Value::Null);
    }

    #[test]
    fn test_property_errors() {
        let (_repo, mut session) = admin_session();
        let root = session.get_root_node().unwrap();
        let folder = session.add_child_node(&root, "f", "Folder").unwrap();
        assert!(matches!(
            session.get_single_property(&folder, "nope:nope"),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.get_single_property(&folder, "file:content"),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.get_single_property(&folder, "dc:subjects"),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.set_single_property(&folder, "dc:title", Value::Long(3)),
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
