use std::collections::BTreeMap;

use super::Table;
use crate::core::{Column, ColumnType, IdPolicy};
use crate::dialect::Dialect;
use crate::model::*;

/// A parameterized select with the columns needed to bind and decode it.
#[derive(Debug, Clone)]
pub struct SelectInfo {
    pub sql: String,
    /// Result columns, in select order
    pub what_columns: Vec<Column>,
    /// Bound columns, in parameter order
    pub where_columns: Vec<Column>,
    /// Columns left out of the result because they are read separately
    pub opaque_columns: Vec<Column>,
}

/// A parameterized statement and the columns its parameters bind, in order.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub columns: Vec<Column>,
}

/// Which children a hierarchy select returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildFilter {
    All,
    /// Regular documents only
    Regular,
    /// Complex-property children only
    Complex,
}

impl ChildFilter {
    pub fn from_complex_prop(complex_prop: Option<bool>) -> Self {
        match complex_prop {
            None => Self::All,
            Some(false) => Self::Regular,
            Some(true) => Self::Complex,
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::All => 0,
            Self::Regular => 1,
            Self::Complex => 2,
        }
    }
}

/// Variants of the hierarchy row copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyHierMode {
    /// New id and parent, name copied
    Plain,
    /// New id, parent and name
    ExplicitName,
    /// Version snapshot: new id and parent, version pointers nulled
    CreateVersion,
}

impl CopyHierMode {
    fn index(&self) -> usize {
        match self {
            Self::Plain => 0,
            Self::ExplicitName => 1,
            Self::CreateVersion => 2,
        }
    }
}

/// Hierarchy copy statement. `bind_keys` lists the keys bound before the
/// trailing source id, in order.
#[derive(Debug, Clone)]
pub struct CopyHierInfo {
    pub sql: String,
    pub bind_keys: Vec<String>,
}

#[derive(Debug, Clone)]
struct TableStatements {
    create: String,
    insert: Statement,
    delete: String,
    select_by_id: SelectInfo,
    update_by_id: Option<Statement>,
    copy: String,
    /// Per opaque key: its select and its update
    opaque: BTreeMap<String, (String, Statement)>,
}

#[derive(Debug, Clone)]
pub struct ClusterStatements {
    /// Deletes this node's registration
    pub delete_node: String,
    pub insert_node: Statement,
    /// One row per other registered node: (id, fragments, kind, own node id)
    pub insert_invalidations: String,
    /// Deletes and returns the rows addressed to a node: (id, fragments, kind)
    pub drain_invalidations: String,
    pub delete_invalidations: String,
}

/// Every statement the mapper runs, computed once per model and dialect.
#[derive(Debug)]
pub struct SqlInfo {
    dialect: Box<dyn Dialect>,
    id_policy: IdPolicy,
    tables: Vec<Table>,
    table_index: BTreeMap<String, usize>,
    statements: BTreeMap<String, TableStatements>,
    identity_fetch: Option<String>,
    select_child_by_name: Vec<SelectInfo>,
    select_children: Vec<SelectInfo>,
    select_children_ids_and_types: Vec<SelectInfo>,
    copy_hier: Vec<CopyHierInfo>,
    select_version_by_label: SelectInfo,
    select_versions_by_versionable: SelectInfo,
    select_versions_by_versionable_desc: SelectInfo,
    select_proxies_by_target: SelectInfo,
    select_proxies_by_versionable: SelectInfo,
    select_proxies_by_target_and_parent: Statement,
    select_proxies_by_versionable_and_parent: Statement,
    select_root_id: SelectInfo,
    insert_root_id: Statement,
    cluster: ClusterStatements,
    indexes: Vec<String>,
}

impl SqlInfo {
    pub fn new(model: &Model, dialect: Box<dyn Dialect>) -> Self {
        let id_policy = model.id_policy();
        let tables = build_tables(model);
        let table_index = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();

        let mut info = Self {
            dialect,
            id_policy,
            tables,
            table_index,
            statements: BTreeMap::new(),
            identity_fetch: None,
            select_child_by_name: Vec::new(),
            select_children: Vec::new(),
            select_children_ids_and_types: Vec::new(),
            copy_hier: Vec::new(),
            select_version_by_label: empty_select(),
            select_versions_by_versionable: empty_select(),
            select_versions_by_versionable_desc: empty_select(),
            select_proxies_by_target: empty_select(),
            select_proxies_by_versionable: empty_select(),
            select_proxies_by_target_and_parent: empty_statement(),
            select_proxies_by_versionable_and_parent: empty_statement(),
            select_root_id: empty_select(),
            insert_root_id: empty_statement(),
            cluster: ClusterStatements {
                delete_node: String::new(),
                insert_node: empty_statement(),
                insert_invalidations: String::new(),
                drain_invalidations: String::new(),
                delete_invalidations: String::new(),
            },
            indexes: Vec::new(),
        };
        info.init_table_sql();
        info.init_hierarchy_sql();
        info.init_version_sql();
        info.init_proxy_sql();
        info.init_repository_sql();
        info.init_cluster_sql();
        info.init_indexes();

        log::debug!(
            "Computed SQL for {} tables with dialect {}",
            info.tables.len(),
            info.dialect.name()
        );
        info
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Looks up a table. Unknown names are programming errors.
    pub fn table(&self, name: &str) -> &Table {
        match self.table_index.get(name) {
            Some(&i) => &self.tables[i],
            None => panic!("Unknown table: {}", name),
        }
    }

    fn table_statements(&self, name: &str) -> &TableStatements {
        match self.statements.get(name) {
            Some(s) => s,
            None => panic!("No statements for table: {}", name),
        }
    }

    fn q(&self, name: &str) -> String {
        self.dialect.quote(name)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn create_table_sql(&self, table: &str) -> &str {
        &self.table_statements(table).create
    }

    pub fn add_column_sql(&self, table: &str, key: &str) -> String {
        let t = self.table(table);
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            t.quoted_name(self.dialect()),
            self.dialect.column_definition(t.column(key), self.id_policy)
        )
    }

    pub fn insert(&self, table: &str) -> &Statement {
        &self.table_statements(table).insert
    }

    pub fn delete_sql(&self, table: &str) -> &str {
        &self.table_statements(table).delete
    }

    pub fn select_by_id(&self, table: &str) -> &SelectInfo {
        &self.table_statements(table).select_by_id
    }

    /// Update of every non-opaque column of a simple table, id bound last.
    pub fn update_by_id(&self, table: &str) -> &Statement {
        match &self.table_statements(table).update_by_id {
            Some(s) => s,
            None => panic!("No update by id for collection table: {}", table),
        }
    }

    /// Update of an explicit set of keys, id bound last.
    pub fn update_by_id_keys(&self, table: &str, keys: &[&str]) -> Statement {
        let t = self.table(table);
        let columns: Vec<Column> = keys.iter().map(|k| t.column(k).clone()).collect();
        let sets: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = ?", self.q(&c.name)))
            .collect();
        let mut bind = columns;
        bind.push(t.column(MAIN_KEY).clone());
        Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = ?",
                t.quoted_name(self.dialect()),
                sets.join(", "),
                self.q(MAIN_KEY)
            ),
            columns: bind,
        }
    }

    pub fn select_opaque_sql(&self, table: &str, key: &str) -> &str {
        match self.table_statements(table).opaque.get(key) {
            Some((select, _)) => select,
            None => panic!("Unknown opaque column {} in table {}", key, table),
        }
    }

    pub fn update_opaque(&self, table: &str, key: &str) -> &Statement {
        match self.table_statements(table).opaque.get(key) {
            Some((_, update)) => update,
            None => panic!("Unknown opaque column {} in table {}", key, table),
        }
    }

    /// `INSERT ... SELECT` copying one id's rows to a new id: new id bound
    /// first, source id second.
    pub fn copy_sql(&self, table: &str) -> &str {
        &self.table_statements(table).copy
    }

    pub fn identity_fetch_sql(&self) -> Option<&str> {
        self.identity_fetch.as_deref()
    }

    pub fn select_child_by_name(&self, filter: ChildFilter) -> &SelectInfo {
        &self.select_child_by_name[filter.index()]
    }

    pub fn select_children(&self, filter: ChildFilter) -> &SelectInfo {
        &self.select_children[filter.index()]
    }

    /// Ids and primary types of children; `All` or `Complex` only.
    pub fn select_children_ids_and_types(&self, only_complex: bool) -> &SelectInfo {
        &self.select_children_ids_and_types[usize::from(only_complex)]
    }

    pub fn copy_hier(&self, mode: CopyHierMode) -> &CopyHierInfo {
        &self.copy_hier[mode.index()]
    }

    pub fn select_version_by_label(&self) -> &SelectInfo {
        &self.select_version_by_label
    }

    pub fn select_versions_by_versionable(&self, last_first: bool) -> &SelectInfo {
        if last_first {
            &self.select_versions_by_versionable_desc
        } else {
            &self.select_versions_by_versionable
        }
    }

    pub fn select_proxies_by_target(&self) -> &SelectInfo {
        &self.select_proxies_by_target
    }

    pub fn select_proxies_by_versionable(&self) -> &SelectInfo {
        &self.select_proxies_by_versionable
    }

    pub fn select_proxies_with_parent(&self, by_target: bool) -> &Statement {
        if by_target {
            &self.select_proxies_by_target_and_parent
        } else {
            &self.select_proxies_by_versionable_and_parent
        }
    }

    pub fn select_root_id(&self) -> &SelectInfo {
        &self.select_root_id
    }

    pub fn insert_root_id(&self) -> &Statement {
        &self.insert_root_id
    }

    pub fn cluster(&self) -> &ClusterStatements {
        &self.cluster
    }

    pub fn index_statements(&self) -> &[String] {
        &self.indexes
    }

    pub fn function_statements(&self) -> Vec<String> {
        self.dialect.function_ddl(self.id_policy)
    }

    // ========================================================================
    // Select builder
    // ========================================================================

    /// Select on a table: `where_keys` become `= ?` filters, opaque columns
    /// are left out, every other column is returned. When only opaque
    /// columns remain, the id is returned instead.
    pub fn make_select(&self, table: &str, where_keys: &[&str], order_by: &[(&str, bool)]) -> SelectInfo {
        let t = self.table(table);
        let mut what_columns = Vec::new();
        let mut opaque_columns = Vec::new();
        let where_columns: Vec<Column> = where_keys.iter().map(|k| t.column(k).clone()).collect();
        for column in t.columns() {
            if where_keys.contains(&column.key.as_str()) {
                continue;
            }
            if column.opaque {
                opaque_columns.push(column.clone());
            } else {
                what_columns.push(column.clone());
            }
        }
        if what_columns.is_empty() {
            what_columns.push(t.column(MAIN_KEY).clone());
        }
        let whats: Vec<String> = what_columns.iter().map(|c| self.q(&c.name)).collect();
        let wheres: Vec<String> = where_columns
            .iter()
            .map(|c| format!("{} = ?", self.q(&c.name)))
            .collect();
        let sql = self.select_statement(t, &whats, &wheres, order_by);
        SelectInfo {
            sql,
            what_columns,
            where_columns,
            opaque_columns,
        }
    }

    /// Select of explicit result keys.
    fn make_select_what(
        &self,
        table: &str,
        what_keys: &[&str],
        where_keys: &[&str],
        extra_where: Option<String>,
        order_by: &[(&str, bool)],
    ) -> SelectInfo {
        let t = self.table(table);
        let what_columns: Vec<Column> = what_keys.iter().map(|k| t.column(k).clone()).collect();
        let where_columns: Vec<Column> = where_keys.iter().map(|k| t.column(k).clone()).collect();
        let whats: Vec<String> = what_columns.iter().map(|c| self.q(&c.name)).collect();
        let mut wheres: Vec<String> = where_columns
            .iter()
            .map(|c| format!("{} = ?", self.q(&c.name)))
            .collect();
        wheres.extend(extra_where);
        SelectInfo {
            sql: self.select_statement(t, &whats, &wheres, order_by),
            what_columns,
            where_columns,
            opaque_columns: Vec::new(),
        }
    }

    fn select_statement(
        &self,
        table: &Table,
        whats: &[String],
        wheres: &[String],
        order_by: &[(&str, bool)],
    ) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}",
            whats.join(", "),
            table.quoted_name(self.dialect())
        );
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }
        if !order_by.is_empty() {
            let orders: Vec<String> = order_by
                .iter()
                .map(|(key, desc)| {
                    let name = self.q(&table.column(key).name);
                    if *desc { format!("{} DESC", name) } else { name }
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        sql
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    fn init_table_sql(&mut self) {
        let mut statements = BTreeMap::new();
        for t in &self.tables {
            let name = t.name();
            let quoted = t.quoted_name(self.dialect());
            let defs: Vec<String> = t
                .columns()
                .iter()
                .map(|c| self.dialect.column_definition(c, self.id_policy))
                .collect();
            let create = format!("CREATE TABLE IF NOT EXISTS {} ({})", quoted, defs.join(", "));

            let insert_columns: Vec<Column> =
                t.columns().iter().filter(|c| !c.identity).cloned().collect();
            let insert = Statement {
                sql: format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quoted,
                    insert_columns
                        .iter()
                        .map(|c| self.q(&c.name))
                        .collect::<Vec<_>>()
                        .join(", "),
                    vec!["?"; insert_columns.len()].join(", ")
                ),
                columns: insert_columns,
            };

            if t.find_column(MAIN_KEY).is_none() {
                // system tables without a node id only get create/insert
                statements.insert(
                    name.to_string(),
                    TableStatements {
                        create,
                        insert,
                        delete: String::new(),
                        select_by_id: empty_select(),
                        update_by_id: None,
                        copy: String::new(),
                        opaque: BTreeMap::new(),
                    },
                );
                continue;
            }

            let id_name = self.q(MAIN_KEY);
            let delete = format!("DELETE FROM {} WHERE {} = ?", quoted, id_name);
            let order: &[(&str, bool)] = if t.is_collection() {
                &[(COLL_TABLE_POS_KEY, false)]
            } else {
                &[]
            };
            let select_by_id = self.make_select(name, &[MAIN_KEY], order);

            let update_by_id = if t.is_collection() {
                None
            } else {
                let keys: Vec<&str> = t
                    .columns()
                    .iter()
                    .filter(|c| c.key != MAIN_KEY && !c.opaque)
                    .map(|c| c.key.as_str())
                    .collect();
                (!keys.is_empty()).then(|| self.update_by_id_keys(name, &keys))
            };

            let copy_columns: Vec<&Column> = t.columns().iter().filter(|c| !c.identity).collect();
            let copy_whats: Vec<String> = copy_columns
                .iter()
                .map(|c| if c.key == MAIN_KEY { "?".to_string() } else { self.q(&c.name) })
                .collect();
            let copy = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} = ?",
                quoted,
                copy_columns
                    .iter()
                    .map(|c| self.q(&c.name))
                    .collect::<Vec<_>>()
                    .join(", "),
                copy_whats.join(", "),
                quoted,
                id_name
            );

            let mut opaque = BTreeMap::new();
            for column in t.columns().iter().filter(|c| c.opaque) {
                let select = format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    self.q(&column.name),
                    quoted,
                    id_name
                );
                opaque.insert(
                    column.key.clone(),
                    (select, self.update_by_id_keys(name, &[column.key.as_str()])),
                );
            }

            statements.insert(
                name.to_string(),
                TableStatements {
                    create,
                    insert,
                    delete,
                    select_by_id,
                    update_by_id,
                    copy,
                    opaque,
                },
            );
        }
        self.statements = statements;

        let hier = self.table(HIER_TABLE_NAME);
        self.identity_fetch = hier
            .columns()
            .iter()
            .find(|c| c.identity)
            .map(|c| self.dialect.identity_fetch_sql(hier.name(), &c.name));
    }

    fn init_hierarchy_sql(&mut self) {
        let isprop = self.q(HIER_CHILD_ISPROPERTY_KEY);
        let flag = |complex: bool| format!("{} = {}", isprop, self.dialect.boolean_literal(complex));

        let mut by_name = Vec::new();
        let mut children = Vec::new();
        for filter in [ChildFilter::All, ChildFilter::Regular, ChildFilter::Complex] {
            let extra = match filter {
                ChildFilter::All => None,
                ChildFilter::Regular => Some(flag(false)),
                ChildFilter::Complex => Some(flag(true)),
            };
            let mut select =
                self.make_select(HIER_TABLE_NAME, &[HIER_PARENT_KEY, HIER_CHILD_NAME_KEY], &[]);
            let mut list = self.make_select(HIER_TABLE_NAME, &[HIER_PARENT_KEY], &[]);
            if let Some(extra) = extra {
                select.sql = format!("{} AND {}", select.sql, extra);
                list.sql = format!("{} AND {}", list.sql, extra);
            }
            by_name.push(select);
            children.push(list);
        }
        self.select_child_by_name = by_name;
        self.select_children = children;

        self.select_children_ids_and_types = vec![
            self.make_select_what(
                HIER_TABLE_NAME,
                &[MAIN_KEY, MAIN_PRIMARY_TYPE_KEY],
                &[HIER_PARENT_KEY],
                None,
                &[],
            ),
            self.make_select_what(
                HIER_TABLE_NAME,
                &[MAIN_KEY, MAIN_PRIMARY_TYPE_KEY],
                &[HIER_PARENT_KEY],
                Some(flag(true)),
                &[],
            ),
        ];

        let hier = self.table(HIER_TABLE_NAME);
        let quoted = hier.quoted_name(self.dialect());
        let mut columns = Vec::new();
        let mut plain = Vec::new();
        let mut explicit = Vec::new();
        let mut version = Vec::new();
        let mut plain_keys = Vec::new();
        let mut explicit_keys = Vec::new();
        let mut version_keys = Vec::new();
        for column in hier.columns().iter().filter(|c| !c.identity) {
            let name = self.q(&column.name);
            let key = column.key.as_str();
            columns.push(name.clone());
            match key {
                MAIN_KEY | HIER_PARENT_KEY => {
                    for (whats, keys) in [
                        (&mut plain, &mut plain_keys),
                        (&mut explicit, &mut explicit_keys),
                        (&mut version, &mut version_keys),
                    ] {
                        whats.push("?".to_string());
                        keys.push(key.to_string());
                    }
                }
                HIER_CHILD_NAME_KEY => {
                    plain.push(name.clone());
                    explicit.push("?".to_string());
                    explicit_keys.push(key.to_string());
                    version.push(name);
                }
                MAIN_BASE_VERSION_KEY | MAIN_CHECKED_IN_KEY => {
                    plain.push(name.clone());
                    explicit.push(name);
                    version.push("?".to_string());
                    version_keys.push(key.to_string());
                }
                _ => {
                    plain.push(name.clone());
                    explicit.push(name.clone());
                    version.push(name);
                }
            }
        }
        let make = |whats: Vec<String>, bind_keys: Vec<String>| CopyHierInfo {
            sql: format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} = ?",
                quoted,
                columns.join(", "),
                whats.join(", "),
                quoted,
                self.q(MAIN_KEY)
            ),
            bind_keys,
        };
        self.copy_hier = vec![
            make(plain, plain_keys),
            make(explicit, explicit_keys),
            make(version, version_keys),
        ];
    }

    fn init_version_sql(&mut self) {
        self.select_version_by_label = self.make_select_what(
            VERSION_TABLE_NAME,
            &[MAIN_KEY],
            &[VERSION_VERSIONABLE_KEY, VERSION_LABEL_KEY],
            None,
            &[],
        );
        self.select_versions_by_versionable = self.make_select_what(
            VERSION_TABLE_NAME,
            &[MAIN_KEY],
            &[VERSION_VERSIONABLE_KEY],
            None,
            &[(VERSION_CREATED_KEY, false)],
        );
        self.select_versions_by_versionable_desc = self.make_select_what(
            VERSION_TABLE_NAME,
            &[MAIN_KEY],
            &[VERSION_VERSIONABLE_KEY],
            None,
            &[(VERSION_CREATED_KEY, true)],
        );
    }

    fn init_proxy_sql(&mut self) {
        self.select_proxies_by_target =
            self.make_select_what(PROXY_TABLE_NAME, &[MAIN_KEY], &[PROXY_TARGET_KEY], None, &[]);
        self.select_proxies_by_versionable = self.make_select_what(
            PROXY_TABLE_NAME,
            &[MAIN_KEY],
            &[PROXY_VERSIONABLE_KEY],
            None,
            &[],
        );

        let proxies = self.table(PROXY_TABLE_NAME);
        let hier = self.table(HIER_TABLE_NAME);
        let d = self.dialect();
        let with_parent = |key: &str| Statement {
            sql: format!(
                "SELECT {} FROM {} JOIN {} ON {} = {} WHERE {} = ? AND {} = ?",
                proxies.qualified(d, MAIN_KEY),
                proxies.quoted_name(d),
                hier.quoted_name(d),
                hier.qualified(d, MAIN_KEY),
                proxies.qualified(d, MAIN_KEY),
                proxies.qualified(d, key),
                hier.qualified(d, HIER_PARENT_KEY),
            ),
            columns: vec![
                proxies.column(key).clone(),
                hier.column(HIER_PARENT_KEY).clone(),
            ],
        };
        let by_target = with_parent(PROXY_TARGET_KEY);
        let by_versionable = with_parent(PROXY_VERSIONABLE_KEY);
        self.select_proxies_by_target_and_parent = by_target;
        self.select_proxies_by_versionable_and_parent = by_versionable;
    }

    fn init_repository_sql(&mut self) {
        self.select_root_id = self.make_select_what(
            REPOINFO_TABLE_NAME,
            &[MAIN_KEY],
            &[REPOINFO_REPONAME_KEY],
            None,
            &[],
        );
        self.insert_root_id = self.insert(REPOINFO_TABLE_NAME).clone();
    }

    fn init_cluster_sql(&mut self) {
        let nodes = self.table(CLUSTER_NODES_TABLE_NAME);
        let invals = self.table(CLUSTER_INVALS_TABLE_NAME);
        let d = self.dialect();
        let node_col = d.quote(CLUSTER_NODES_NODEID_KEY);
        let inval_node_col = d.quote(CLUSTER_INVALS_NODEID_KEY);

        let delete_node = format!(
            "DELETE FROM {} WHERE {} = ?",
            nodes.quoted_name(d),
            node_col
        );
        let insert_invalidations = format!(
            "INSERT INTO {} ({}, {}, {}, {}) SELECT {}, ?, ?, ? FROM {} WHERE {} <> ?",
            invals.quoted_name(d),
            inval_node_col,
            d.quote(CLUSTER_INVALS_ID_KEY),
            d.quote(CLUSTER_INVALS_FRAGMENTS_KEY),
            d.quote(CLUSTER_INVALS_KIND_KEY),
            node_col,
            nodes.quoted_name(d),
            node_col
        );
        // one statement, so rows posted while draining stay for the next poll
        let drain_invalidations = format!(
            "DELETE FROM {} WHERE {} = ? RETURNING {}, {}, {}",
            invals.quoted_name(d),
            inval_node_col,
            d.quote(CLUSTER_INVALS_ID_KEY),
            d.quote(CLUSTER_INVALS_FRAGMENTS_KEY),
            d.quote(CLUSTER_INVALS_KIND_KEY)
        );
        let delete_invalidations = format!(
            "DELETE FROM {} WHERE {} = ?",
            invals.quoted_name(d),
            inval_node_col
        );
        let insert_node = self.insert(CLUSTER_NODES_TABLE_NAME).clone();
        self.cluster = ClusterStatements {
            delete_node,
            insert_node,
            insert_invalidations,
            drain_invalidations,
            delete_invalidations,
        };
    }

    fn init_indexes(&mut self) {
        let d = self.dialect();
        let mut indexes = vec![
            d.create_index_sql("hierarchy_parentid_idx", HIER_TABLE_NAME, &[HIER_PARENT_KEY], false),
            d.create_index_sql(
                "hierarchy_parentid_name_idx",
                HIER_TABLE_NAME,
                &[HIER_PARENT_KEY, HIER_CHILD_NAME_KEY],
                false,
            ),
            d.create_index_sql(
                "versions_versionableid_idx",
                VERSION_TABLE_NAME,
                &[VERSION_VERSIONABLE_KEY],
                false,
            ),
            d.create_index_sql(
                "proxies_versionableid_idx",
                PROXY_TABLE_NAME,
                &[PROXY_VERSIONABLE_KEY],
                false,
            ),
            d.create_index_sql("proxies_targetid_idx", PROXY_TABLE_NAME, &[PROXY_TARGET_KEY], false),
            d.create_index_sql(
                "repositories_name_idx",
                REPOINFO_TABLE_NAME,
                &[REPOINFO_REPONAME_KEY],
                true,
            ),
            d.create_index_sql(
                "cluster_invals_nodeid_idx",
                CLUSTER_INVALS_TABLE_NAME,
                &[CLUSTER_INVALS_NODEID_KEY],
                false,
            ),
        ];
        for t in self.tables.iter().filter(|t| t.is_collection()) {
            indexes.push(d.create_index_sql(
                &format!("{}_id_idx", t.name()),
                t.name(),
                &[MAIN_KEY],
                false,
            ));
        }
        self.indexes = indexes;
    }
}

fn empty_select() -> SelectInfo {
    SelectInfo {
        sql: String::new(),
        what_columns: Vec::new(),
        where_columns: Vec::new(),
        opaque_columns: Vec::new(),
    }
}

fn empty_statement() -> Statement {
    Statement {
        sql: String::new(),
        columns: Vec::new(),
    }
}

/// Physical tables for a model: hierarchy first, then the other fragment
/// tables, then the repository and cluster tables.
fn build_tables(model: &Model) -> Vec<Table> {
    let identity = model.id_policy() == IdPolicy::DbIdentity;
    let mut tables = Vec::new();

    let mut names: Vec<&str> = model.fragment_names().collect();
    names.sort_by_key(|n| *n != HIER_TABLE_NAME);
    for name in names {
        let info = model.fragment(name);
        let mut table = Table::new(name, info.is_collection());
        if info.is_collection() {
            table.add_column(Column::new(MAIN_KEY, ColumnType::NodeIdRef).not_null());
        } else {
            let mut id = Column::new(MAIN_KEY, ColumnType::NodeId).primary();
            if identity && name == HIER_TABLE_NAME {
                id = id.identity();
            }
            table.add_column(id);
        }
        for (key, column_type) in &info.keys {
            let mut column = Column::new(key.as_str(), *column_type);
            if info.opaque.contains(key) {
                column = column.opaque();
            }
            table.add_column(column);
        }
        tables.push(table);
    }

    tables.push(
        Table::new(REPOINFO_TABLE_NAME, false)
            .with_column(Column::new(MAIN_KEY, ColumnType::NodeIdRef).not_null())
            .with_column(Column::new(REPOINFO_REPONAME_KEY, ColumnType::Varchar).not_null()),
    );
    tables.push(
        Table::new(CLUSTER_NODES_TABLE_NAME, false)
            .with_column(Column::new(CLUSTER_NODES_NODEID_KEY, ColumnType::ClusterNode).not_null())
            .with_column(Column::new(CLUSTER_NODES_CREATED_KEY, ColumnType::Timestamp)),
    );
    tables.push(
        Table::new(CLUSTER_INVALS_TABLE_NAME, false)
            .with_column(Column::new(CLUSTER_INVALS_NODEID_KEY, ColumnType::ClusterNode).not_null())
            .with_column(Column::new(CLUSTER_INVALS_ID_KEY, ColumnType::NodeIdRef).not_null())
            .with_column(Column::new(
                CLUSTER_INVALS_FRAGMENTS_KEY,
                ColumnType::ClusterFragments,
            ))
            .with_column(Column::new(CLUSTER_INVALS_KIND_KEY, ColumnType::Integer)),
    );
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgreSqlDialect, SqliteDialect};

    fn model(policy: IdPolicy) -> Model {
        Model::builder()
            .id_policy(policy)
            .schema(
                SchemaDef::new("dublincore", "dc")
                    .field("title", FieldType::String)
                    .list("subjects", FieldType::String),
            )
            .schema(SchemaDef::new("file", "file").field("content", FieldType::Binary))
            .document_type(DocumentTypeDef::new("File").schema("dublincore").schema("file"))
            .build()
            .unwrap()
    }

    fn sqlite(policy: IdPolicy) -> SqlInfo {
        SqlInfo::new(&model(policy), Box::new(SqliteDialect))
    }

    #[test]
    fn test_hierarchy_is_first_table() {
        let info = sqlite(IdPolicy::AppUuid);
        assert_eq!(info.tables()[0].name(), HIER_TABLE_NAME);
        assert_eq!(info.tables().last().unwrap().name(), CLUSTER_INVALS_TABLE_NAME);
    }

    #[test]
    fn test_insert_skips_identity() {
        let info = sqlite(IdPolicy::DbIdentity);
        let insert = info.insert(HIER_TABLE_NAME);
        assert!(!insert.sql.contains("\"id\""));
        assert!(insert.columns.iter().all(|c| c.key != MAIN_KEY));
        assert_eq!(info.identity_fetch_sql(), Some("SELECT last_insert_rowid()"));

        let info = sqlite(IdPolicy::AppUuid);
        assert!(info.insert(HIER_TABLE_NAME).sql.starts_with("INSERT INTO \"hierarchy\" (\"id\", \"parentid\""));
        assert!(info.identity_fetch_sql().is_none());
    }

    #[test]
    fn test_select_by_id_leaves_out_opaque() {
        let info = sqlite(IdPolicy::AppUuid);
        let select = info.select_by_id("file");
        assert_eq!(select.sql, "SELECT \"id\" FROM \"file\" WHERE \"id\" = ?");
        assert_eq!(select.opaque_columns.len(), 1);
        assert_eq!(
            info.select_opaque_sql("file", "content"),
            "SELECT \"content\" FROM \"file\" WHERE \"id\" = ?"
        );
        assert_eq!(
            info.update_opaque("file", "content").sql,
            "UPDATE \"file\" SET \"content\" = ? WHERE \"id\" = ?"
        );
    }

    #[test]
    fn test_collection_select_ordered_by_pos() {
        let info = sqlite(IdPolicy::AppUuid);
        assert_eq!(
            info.select_by_id("dublincore_subjects").sql,
            "SELECT \"pos\", \"item\" FROM \"dublincore_subjects\" WHERE \"id\" = ? ORDER BY \"pos\""
        );
        assert_eq!(
            info.select_by_id(ACL_TABLE_NAME).what_columns[0].key,
            ACL_POS_KEY
        );
    }

    #[test]
    fn test_child_by_name_variants() {
        let info = sqlite(IdPolicy::AppUuid);
        let all = info.select_child_by_name(ChildFilter::All);
        assert!(all.sql.ends_with("WHERE \"parentid\" = ? AND \"name\" = ?"));
        assert_eq!(all.where_columns.len(), 2);
        assert!(info
            .select_child_by_name(ChildFilter::Regular)
            .sql
            .ends_with("AND \"isproperty\" = 0"));
        assert!(info
            .select_child_by_name(ChildFilter::Complex)
            .sql
            .ends_with("AND \"isproperty\" = 1"));
        assert_eq!(
            info.select_children_ids_and_types(true).sql,
            "SELECT \"id\", \"primarytype\" FROM \"hierarchy\" WHERE \"parentid\" = ? AND \"isproperty\" = 1"
        );
    }

    #[test]
    fn test_copy_hier_variants() {
        let info = sqlite(IdPolicy::AppUuid);
        let plain = info.copy_hier(CopyHierMode::Plain);
        assert!(plain.sql.starts_with(
            "INSERT INTO \"hierarchy\" (\"id\", \"parentid\", \"pos\", \"name\""
        ));
        assert!(plain.sql.contains("SELECT ?, ?, \"pos\", \"name\""));
        assert_eq!(plain.bind_keys, vec!["id", "parentid"]);

        let explicit = info.copy_hier(CopyHierMode::ExplicitName);
        assert!(explicit.sql.contains("SELECT ?, ?, \"pos\", ?"));
        assert_eq!(explicit.bind_keys, vec!["id", "parentid", "name"]);

        let version = info.copy_hier(CopyHierMode::CreateVersion);
        assert_eq!(
            version.bind_keys,
            vec!["id", "parentid", "baseversionid", "ischeckedin"]
        );
        assert_eq!(version.sql.matches('?').count(), version.bind_keys.len() + 1);
    }

    #[test]
    fn test_copy_hier_without_identity_column() {
        let info = sqlite(IdPolicy::DbIdentity);
        let plain = info.copy_hier(CopyHierMode::Plain);
        assert!(plain.sql.starts_with("INSERT INTO \"hierarchy\" (\"parentid\""));
        assert_eq!(plain.bind_keys, vec!["parentid"]);
    }

    #[test]
    fn test_fragment_copy_sql() {
        let info = sqlite(IdPolicy::AppUuid);
        assert_eq!(
            info.copy_sql("dublincore_subjects"),
            "INSERT INTO \"dublincore_subjects\" (\"id\", \"pos\", \"item\") SELECT ?, \"pos\", \"item\" FROM \"dublincore_subjects\" WHERE \"id\" = ?"
        );
    }

    #[test]
    fn test_cluster_statements() {
        let info = sqlite(IdPolicy::AppUuid);
        assert_eq!(
            info.cluster().insert_invalidations,
            "INSERT INTO \"cluster_invals\" (\"nodeid\", \"id\", \"fragments\", \"kind\") SELECT \"nodeid\", ?, ?, ? FROM \"cluster_nodes\" WHERE \"nodeid\" <> ?"
        );
        assert_eq!(
            info.cluster().delete_invalidations,
            "DELETE FROM \"cluster_invals\" WHERE \"nodeid\" = ?"
        );
        assert_eq!(
            info.cluster().drain_invalidations,
            "DELETE FROM \"cluster_invals\" WHERE \"nodeid\" = ? RETURNING \"id\", \"fragments\", \"kind\""
        );
    }

    #[test]
    fn test_versions_and_proxies_selects() {
        let info = sqlite(IdPolicy::AppUuid);
        assert_eq!(
            info.select_versions_by_versionable(true).sql,
            "SELECT \"id\" FROM \"versions\" WHERE \"versionableid\" = ? ORDER BY \"created\" DESC"
        );
        let with_parent = info.select_proxies_with_parent(true);
        assert!(with_parent.sql.contains("JOIN \"hierarchy\" ON \"hierarchy\".\"id\" = \"proxies\".\"id\""));
        assert_eq!(with_parent.columns.len(), 2);
    }

    #[test]
    fn test_indexes_cover_collections() {
        let info = sqlite(IdPolicy::AppUuid);
        let indexes = info.index_statements();
        assert!(indexes.iter().any(|s| s.contains("\"dublincore_subjects_id_idx\"")));
        assert!(indexes.iter().any(|s| s.starts_with("CREATE UNIQUE INDEX") && s.contains("\"repositories\"")));
    }

    #[test]
    fn test_postgresql_generation() {
        let info = SqlInfo::new(&model(IdPolicy::DbIdentity), Box::new(PostgreSqlDialect));
        assert!(info.create_table_sql(HIER_TABLE_NAME).contains("\"id\" SERIAL PRIMARY KEY"));
        assert_eq!(
            info.identity_fetch_sql(),
            Some("SELECT currval('hierarchy_id_seq')")
        );
        assert!(info
            .select_child_by_name(ChildFilter::Complex)
            .sql
            .ends_with("\"isproperty\" = true"));
        assert_eq!(info.function_statements().len(), 2);
    }

    #[test]
    #[should_panic(expected = "Unknown table")]
    fn test_unknown_table_panics() {
        sqlite(IdPolicy::AppUuid).insert("nope");
    }
}
