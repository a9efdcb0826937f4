//! Schema model: fragment tables, their keys and types, and which fragments
//! make up each document type.
//!
//! Built once per repository by [`ModelBuilder`] and shared read-only by every
//! session afterwards.

mod builder;

pub use builder::{DocumentTypeDef, FieldDef, FieldType, ModelBuilder, SchemaDef};

use std::collections::{BTreeMap, BTreeSet};

use crate::core::{ColumnType, Id, IdPolicy};

// ============================================================================
// Table and key names
// ============================================================================

pub const MAIN_KEY: &str = "id";

pub const ROOT_TYPE: &str = "Root";
pub const DOCUMENT_TYPE: &str = "Document";
pub const PROXY_TYPE: &str = "ecm:proxy";

pub const HIER_TABLE_NAME: &str = "hierarchy";
pub const HIER_PARENT_KEY: &str = "parentid";
pub const HIER_CHILD_POS_KEY: &str = "pos";
pub const HIER_CHILD_NAME_KEY: &str = "name";
pub const HIER_CHILD_ISPROPERTY_KEY: &str = "isproperty";

pub const MAIN_PRIMARY_TYPE_KEY: &str = "primarytype";
pub const MAIN_PRIMARY_TYPE_PROP: &str = "ecm:primaryType";
pub const MAIN_BASE_VERSION_KEY: &str = "baseversionid";
pub const MAIN_BASE_VERSION_PROP: &str = "ecm:baseVersion";
pub const MAIN_CHECKED_IN_KEY: &str = "ischeckedin";
pub const MAIN_CHECKED_IN_PROP: &str = "ecm:isCheckedIn";
pub const MAIN_MAJOR_VERSION_KEY: &str = "majorversion";
pub const MAIN_MAJOR_VERSION_PROP: &str = "ecm:majorVersion";
pub const MAIN_MINOR_VERSION_KEY: &str = "minorversion";
pub const MAIN_MINOR_VERSION_PROP: &str = "ecm:minorVersion";
pub const MAIN_IS_VERSION_KEY: &str = "isversion";
pub const MAIN_IS_VERSION_PROP: &str = "ecm:isVersion";

pub const COLL_TABLE_POS_KEY: &str = "pos";
pub const COLL_TABLE_VALUE_KEY: &str = "item";

pub const MISC_TABLE_NAME: &str = "misc";
pub const MISC_LIFECYCLE_POLICY_KEY: &str = "lifecyclepolicy";
pub const MISC_LIFECYCLE_POLICY_PROP: &str = "ecm:lifeCyclePolicy";
pub const MISC_LIFECYCLE_STATE_KEY: &str = "lifecyclestate";
pub const MISC_LIFECYCLE_STATE_PROP: &str = "ecm:lifeCycleState";

pub const ACL_TABLE_NAME: &str = "acls";
pub const ACL_PROP: &str = "ecm:acl";
pub const ACL_POS_KEY: &str = "pos";
pub const ACL_NAME_KEY: &str = "name";
pub const ACL_GRANT_KEY: &str = "grant";
pub const ACL_PERMISSION_KEY: &str = "permission";
pub const ACL_USER_KEY: &str = "user";
pub const ACL_GROUP_KEY: &str = "group";

pub const VERSION_TABLE_NAME: &str = "versions";
pub const VERSION_VERSIONABLE_KEY: &str = "versionableid";
pub const VERSION_VERSIONABLE_PROP: &str = "ecm:versionableId";
pub const VERSION_CREATED_KEY: &str = "created";
pub const VERSION_CREATED_PROP: &str = "ecm:versionCreated";
pub const VERSION_LABEL_KEY: &str = "label";
pub const VERSION_LABEL_PROP: &str = "ecm:versionLabel";
pub const VERSION_DESCRIPTION_KEY: &str = "description";
pub const VERSION_DESCRIPTION_PROP: &str = "ecm:versionDescription";
pub const VERSION_IS_LATEST_KEY: &str = "islatest";
pub const VERSION_IS_LATEST_PROP: &str = "ecm:isLatestVersion";

pub const PROXY_TABLE_NAME: &str = "proxies";
pub const PROXY_TARGET_KEY: &str = "targetid";
pub const PROXY_TARGET_PROP: &str = "ecm:proxyTargetId";
pub const PROXY_VERSIONABLE_KEY: &str = "versionableid";
pub const PROXY_VERSIONABLE_PROP: &str = "ecm:proxyVersionableId";

pub const REPOINFO_TABLE_NAME: &str = "repositories";
pub const REPOINFO_REPONAME_KEY: &str = "name";

pub const CLUSTER_NODES_TABLE_NAME: &str = "cluster_nodes";
pub const CLUSTER_NODES_NODEID_KEY: &str = "nodeid";
pub const CLUSTER_NODES_CREATED_KEY: &str = "created";

pub const CLUSTER_INVALS_TABLE_NAME: &str = "cluster_invals";
pub const CLUSTER_INVALS_NODEID_KEY: &str = "nodeid";
pub const CLUSTER_INVALS_ID_KEY: &str = "id";
pub const CLUSTER_INVALS_FRAGMENTS_KEY: &str = "fragments";
pub const CLUSTER_INVALS_KIND_KEY: &str = "kind";

// ============================================================================
// Fragment and property descriptions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// One row per id
    Simple,
    /// Zero or more rows per id, ordered by `pos`
    Collection,
}

#[derive(Debug, Clone)]
pub struct FragmentInfo {
    pub name: String,
    pub kind: FragmentKind,
    /// Keys other than the id, in column order
    pub keys: Vec<(String, ColumnType)>,
    pub opaque: BTreeSet<String>,
}

impl FragmentInfo {
    pub fn is_collection(&self) -> bool {
        self.kind == FragmentKind::Collection
    }

    pub fn key_type(&self, key: &str) -> Option<ColumnType> {
        self.keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, t)| *t)
    }
}

/// Where a property is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub fragment: String,
    /// Column key for simple properties, the item key for lists
    pub key: String,
    pub column_type: ColumnType,
    pub multi: bool,
}

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone)]
pub struct Model {
    id_policy: IdPolicy,
    fragments: BTreeMap<String, FragmentInfo>,
    properties: BTreeMap<String, PropertyInfo>,
    type_fragments: BTreeMap<String, Vec<String>>,
    type_facets: BTreeMap<String, BTreeSet<String>>,
    sub_types: BTreeMap<String, BTreeSet<String>>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }

    /// New application-side id, or `None` when the database generates it.
    pub fn generate_new_id(&self) -> Option<Id> {
        match self.id_policy {
            IdPolicy::AppUuid => Some(Id::new_uuid()),
            IdPolicy::DbIdentity => None,
        }
    }

    /// Looks up a fragment table. Unknown names are programming errors.
    pub fn fragment(&self, name: &str) -> &FragmentInfo {
        match self.fragments.get(name) {
            Some(info) => info,
            None => panic!("Unknown fragment table: {}", name),
        }
    }

    pub fn find_fragment(&self, name: &str) -> Option<&FragmentInfo> {
        self.fragments.get(name)
    }

    pub fn fragment_names(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    pub fn is_collection_fragment(&self, name: &str) -> bool {
        self.fragment(name).is_collection()
    }

    pub fn property_info(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.get(name)
    }

    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_fragments.contains_key(type_name)
    }

    /// Fragment tables of a type, excluding the hierarchy table.
    pub fn type_fragments(&self, type_name: &str) -> &[String] {
        self.type_fragments
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn document_sub_types(&self, type_name: &str) -> Option<&BTreeSet<String>> {
        self.sub_types.get(type_name)
    }

    pub fn document_type_has_facet(&self, type_name: &str, facet: &str) -> bool {
        self.type_facets
            .get(type_name)
            .is_some_and(|facets| facets.contains(facet))
    }

    /// Groups ids by the fragment tables their types carry.
    pub fn per_fragment_ids(
        &self,
        id_types: &BTreeMap<Id, String>,
    ) -> BTreeMap<String, BTreeSet<Id>> {
        let mut result: BTreeMap<String, BTreeSet<Id>> = BTreeMap::new();
        for (id, type_name) in id_types {
            for fragment in self.type_fragments(type_name) {
                result
                    .entry(fragment.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
        result
    }
}
