use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::*;
use crate::core::{ColumnType, IdPolicy, Result, StorageError};

/// Field types available to schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Clob,
    Long,
    Double,
    Boolean,
    Date,
    Binary,
}

impl FieldType {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::String => ColumnType::Varchar,
            Self::Clob => ColumnType::Clob,
            Self::Long => ColumnType::Long,
            Self::Double => ColumnType::Double,
            Self::Boolean => ColumnType::Boolean,
            Self::Date => ColumnType::Timestamp,
            Self::Binary => ColumnType::Blob,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub multi: bool,
}

/// A schema: one simple fragment table for its scalar fields plus one
/// collection table per list field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    pub prefix: String,
    pub fields: Vec<FieldDef>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            multi: false,
        });
        self
    }

    pub fn list(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            multi: true,
        });
        self
    }

    fn collection_table(&self, field: &str) -> String {
        format!("{}_{}", self.name, field)
    }

    fn has_simple_fields(&self) -> bool {
        self.fields.iter().any(|f| !f.multi)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTypeDef {
    pub name: String,
    #[serde(default)]
    pub super_type: Option<String>,
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub facets: Vec<String>,
}

impl DocumentTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_type: None,
            schemas: Vec::new(),
            facets: Vec::new(),
        }
    }

    pub fn super_type(mut self, name: impl Into<String>) -> Self {
        self.super_type = Some(name.into());
        self
    }

    pub fn schema(mut self, name: impl Into<String>) -> Self {
        self.schemas.push(name.into());
        self
    }

    pub fn facet(mut self, name: impl Into<String>) -> Self {
        self.facets.push(name.into());
        self
    }
}

/// Builder for [`Model`].
///
/// # Example
///
/// ```
/// use docstore::model::{DocumentTypeDef, FieldType, Model, SchemaDef};
///
/// let model = Model::builder()
///     .schema(SchemaDef::new("dublincore", "dc").field("title", FieldType::String))
///     .document_type(DocumentTypeDef::new("File").schema("dublincore"))
///     .build()
///     .unwrap();
/// assert!(model.is_type("File"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    id_policy: IdPolicy,
    schemas: Vec<SchemaDef>,
    types: Vec<DocumentTypeDef>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_policy(mut self, policy: IdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    pub fn schema(mut self, schema: SchemaDef) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn document_type(mut self, def: DocumentTypeDef) -> Self {
        self.types.push(def);
        self
    }

    pub fn build(self) -> Result<Model> {
        let mut fragments = BTreeMap::new();
        let mut properties = BTreeMap::new();

        for info in system_fragments() {
            fragments.insert(info.name.clone(), info);
        }
        for (prop, fragment, key) in SYSTEM_PROPERTIES {
            let column_type = fragments[*fragment]
                .key_type(key)
                .unwrap_or(ColumnType::Varchar);
            properties.insert(
                prop.to_string(),
                PropertyInfo {
                    fragment: fragment.to_string(),
                    key: key.to_string(),
                    column_type,
                    multi: false,
                },
            );
        }
        properties.insert(
            ACL_PROP.to_string(),
            PropertyInfo {
                fragment: ACL_TABLE_NAME.to_string(),
                key: ACL_PERMISSION_KEY.to_string(),
                column_type: ColumnType::Varchar,
                multi: true,
            },
        );

        // Schemas
        let mut schema_tables: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for schema in &self.schemas {
            if fragments.contains_key(&schema.name) {
                return Err(StorageError::Config(format!(
                    "Schema name clashes with an existing table: {}",
                    schema.name
                )));
            }
            let mut tables = Vec::new();
            if schema.has_simple_fields() {
                let mut keys = Vec::new();
                let mut opaque = BTreeSet::new();
                for field in schema.fields.iter().filter(|f| !f.multi) {
                    if field.name == MAIN_KEY {
                        return Err(StorageError::Config(format!(
                            "Reserved field name in schema {}: {}",
                            schema.name, field.name
                        )));
                    }
                    if field.field_type == FieldType::Binary {
                        opaque.insert(field.name.clone());
                    }
                    keys.push((field.name.clone(), field.field_type.column_type()));
                }
                fragments.insert(
                    schema.name.clone(),
                    FragmentInfo {
                        name: schema.name.clone(),
                        kind: FragmentKind::Simple,
                        keys,
                        opaque,
                    },
                );
                tables.push(schema.name.clone());
            }
            for field in &schema.fields {
                let prop = format!("{}:{}", schema.prefix, field.name);
                if properties.contains_key(&prop) {
                    return Err(StorageError::Config(format!(
                        "Duplicate property: {}",
                        prop
                    )));
                }
                let column_type = field.field_type.column_type();
                if field.multi {
                    let table = schema.collection_table(&field.name);
                    fragments.insert(
                        table.clone(),
                        FragmentInfo {
                            name: table.clone(),
                            kind: FragmentKind::Collection,
                            keys: vec![
                                (COLL_TABLE_POS_KEY.to_string(), ColumnType::Integer),
                                (COLL_TABLE_VALUE_KEY.to_string(), column_type),
                            ],
                            opaque: BTreeSet::new(),
                        },
                    );
                    properties.insert(
                        prop,
                        PropertyInfo {
                            fragment: table.clone(),
                            key: COLL_TABLE_VALUE_KEY.to_string(),
                            column_type,
                            multi: true,
                        },
                    );
                    tables.push(table);
                } else {
                    properties.insert(
                        prop,
                        PropertyInfo {
                            fragment: schema.name.clone(),
                            key: field.name.clone(),
                            column_type,
                            multi: false,
                        },
                    );
                }
            }
            schema_tables.insert(schema.name.as_str(), tables);
        }

        // Document types, built-ins first
        let mut defs: BTreeMap<String, DocumentTypeDef> = BTreeMap::new();
        defs.insert(DOCUMENT_TYPE.to_string(), DocumentTypeDef::new(DOCUMENT_TYPE));
        defs.insert(
            ROOT_TYPE.to_string(),
            DocumentTypeDef::new(ROOT_TYPE)
                .super_type(DOCUMENT_TYPE)
                .facet("Folderish"),
        );
        for def in &self.types {
            if defs.contains_key(&def.name) || def.name == PROXY_TYPE {
                return Err(StorageError::Config(format!(
                    "Duplicate document type: {}",
                    def.name
                )));
            }
            defs.insert(def.name.clone(), def.clone());
        }

        let mut type_fragments = BTreeMap::new();
        let mut type_facets = BTreeMap::new();
        let mut sub_types: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for name in defs.keys() {
            let chain = super_chain(&defs, name)?;
            for ancestor in &chain {
                sub_types
                    .entry(ancestor.clone())
                    .or_default()
                    .insert(name.clone());
            }

            let mut facets = BTreeSet::new();
            let mut schemas: Vec<&str> = Vec::new();
            // root-most ancestor first so inherited schemas come first
            for ancestor in chain.iter().rev() {
                let def = &defs[ancestor];
                facets.extend(def.facets.iter().cloned());
                for schema in &def.schemas {
                    if !schemas.contains(&schema.as_str()) {
                        schemas.push(schema);
                    }
                }
            }

            let mut tables = if name == ROOT_TYPE {
                vec![ACL_TABLE_NAME.to_string()]
            } else {
                vec![MISC_TABLE_NAME.to_string(), ACL_TABLE_NAME.to_string()]
            };
            for schema in schemas {
                let Some(schema_fragments) = schema_tables.get(schema) else {
                    return Err(StorageError::Config(format!(
                        "Document type {} references unknown schema {}",
                        name, schema
                    )));
                };
                tables.extend(schema_fragments.iter().cloned());
            }
            type_fragments.insert(name.clone(), tables);
            type_facets.insert(name.clone(), facets);
        }

        type_fragments.insert(PROXY_TYPE.to_string(), vec![PROXY_TABLE_NAME.to_string()]);
        type_facets.insert(PROXY_TYPE.to_string(), BTreeSet::new());
        sub_types.insert(
            PROXY_TYPE.to_string(),
            BTreeSet::from([PROXY_TYPE.to_string()]),
        );

        log::debug!(
            "Built model with {} fragment tables and {} document types",
            fragments.len(),
            type_fragments.len()
        );

        Ok(Model {
            id_policy: self.id_policy,
            fragments,
            properties,
            type_fragments,
            type_facets,
            sub_types,
        })
    }
}

/// `name` followed by its super types, nearest first.
fn super_chain(defs: &BTreeMap<String, DocumentTypeDef>, name: &str) -> Result<Vec<String>> {
    let mut chain = vec![name.to_string()];
    let mut current = name;
    while let Some(parent) = defs.get(current).and_then(|d| d.super_type.as_deref()) {
        if !defs.contains_key(parent) {
            return Err(StorageError::Config(format!(
                "Document type {} has unknown super type {}",
                current, parent
            )));
        }
        if chain.iter().any(|t| t == parent) {
            return Err(StorageError::Config(format!(
                "Cycle in super types of {}",
                name
            )));
        }
        chain.push(parent.to_string());
        current = parent;
    }
    Ok(chain)
}

const SYSTEM_PROPERTIES: &[(&str, &str, &str)] = &[
    (MAIN_PRIMARY_TYPE_PROP, HIER_TABLE_NAME, MAIN_PRIMARY_TYPE_KEY),
    (MAIN_BASE_VERSION_PROP, HIER_TABLE_NAME, MAIN_BASE_VERSION_KEY),
    (MAIN_CHECKED_IN_PROP, HIER_TABLE_NAME, MAIN_CHECKED_IN_KEY),
    (MAIN_MAJOR_VERSION_PROP, HIER_TABLE_NAME, MAIN_MAJOR_VERSION_KEY),
    (MAIN_MINOR_VERSION_PROP, HIER_TABLE_NAME, MAIN_MINOR_VERSION_KEY),
    (MAIN_IS_VERSION_PROP, HIER_TABLE_NAME, MAIN_IS_VERSION_KEY),
    (MISC_LIFECYCLE_POLICY_PROP, MISC_TABLE_NAME, MISC_LIFECYCLE_POLICY_KEY),
    (MISC_LIFECYCLE_STATE_PROP, MISC_TABLE_NAME, MISC_LIFECYCLE_STATE_KEY),
    (VERSION_VERSIONABLE_PROP, VERSION_TABLE_NAME, VERSION_VERSIONABLE_KEY),
    (VERSION_CREATED_PROP, VERSION_TABLE_NAME, VERSION_CREATED_KEY),
    (VERSION_LABEL_PROP, VERSION_TABLE_NAME, VERSION_LABEL_KEY),
    (VERSION_DESCRIPTION_PROP, VERSION_TABLE_NAME, VERSION_DESCRIPTION_KEY),
    (VERSION_IS_LATEST_PROP, VERSION_TABLE_NAME, VERSION_IS_LATEST_KEY),
    (PROXY_TARGET_PROP, PROXY_TABLE_NAME, PROXY_TARGET_KEY),
    (PROXY_VERSIONABLE_PROP, PROXY_TABLE_NAME, PROXY_VERSIONABLE_KEY),
];

fn simple(name: &str, keys: &[(&str, ColumnType)]) -> FragmentInfo {
    FragmentInfo {
        name: name.to_string(),
        kind: FragmentKind::Simple,
        keys: keys.iter().map(|(k, t)| (k.to_string(), *t)).collect(),
        opaque: BTreeSet::new(),
    }
}

fn system_fragments() -> Vec<FragmentInfo> {
    let mut acls = simple(
        ACL_TABLE_NAME,
        &[
            (ACL_POS_KEY, ColumnType::Integer),
            (ACL_NAME_KEY, ColumnType::Varchar),
            (ACL_GRANT_KEY, ColumnType::Boolean),
            (ACL_PERMISSION_KEY, ColumnType::Varchar),
            (ACL_USER_KEY, ColumnType::Varchar),
            (ACL_GROUP_KEY, ColumnType::Varchar),
        ],
    );
    acls.kind = FragmentKind::Collection;

    vec![
        simple(
            HIER_TABLE_NAME,
            &[
                (HIER_PARENT_KEY, ColumnType::NodeIdRef),
                (HIER_CHILD_POS_KEY, ColumnType::Long),
                (HIER_CHILD_NAME_KEY, ColumnType::Varchar),
                (HIER_CHILD_ISPROPERTY_KEY, ColumnType::Boolean),
                (MAIN_PRIMARY_TYPE_KEY, ColumnType::Varchar),
                (MAIN_BASE_VERSION_KEY, ColumnType::NodeIdRef),
                (MAIN_CHECKED_IN_KEY, ColumnType::Boolean),
                (MAIN_MAJOR_VERSION_KEY, ColumnType::Long),
                (MAIN_MINOR_VERSION_KEY, ColumnType::Long),
                (MAIN_IS_VERSION_KEY, ColumnType::Boolean),
            ],
        ),
        simple(
            VERSION_TABLE_NAME,
            &[
                (VERSION_VERSIONABLE_KEY, ColumnType::NodeIdRef),
                (VERSION_CREATED_KEY, ColumnType::Timestamp),
                (VERSION_LABEL_KEY, ColumnType::Varchar),
                (VERSION_DESCRIPTION_KEY, ColumnType::Varchar),
                (VERSION_IS_LATEST_KEY, ColumnType::Boolean),
            ],
        ),
        simple(
            PROXY_TABLE_NAME,
            &[
                (PROXY_TARGET_KEY, ColumnType::NodeIdRef),
                (PROXY_VERSIONABLE_KEY, ColumnType::NodeIdRef),
            ],
        ),
        simple(
            MISC_TABLE_NAME,
            &[
                (MISC_LIFECYCLE_POLICY_KEY, ColumnType::Varchar),
                (MISC_LIFECYCLE_STATE_KEY, ColumnType::Varchar),
            ],
        ),
        acls,
    ]
}
