use super::Dialect;
use crate::core::{Column, ColumnType, IdPolicy, Value};
use crate::model::{
    ACL_GRANT_KEY, ACL_GROUP_KEY, ACL_PERMISSION_KEY, ACL_POS_KEY, ACL_TABLE_NAME, ACL_USER_KEY,
    HIER_PARENT_KEY, HIER_TABLE_NAME, MAIN_KEY, VERSION_TABLE_NAME, VERSION_VERSIONABLE_KEY,
};

/// Name of the recursive ancestors relation put in front of queries.
pub const ANCESTORS_CTE: &str = "nx_ancestors";

/// SQLite has no stored functions: tree and security predicates are
/// correlated subqueries over a recursive ancestors CTE, and string lists
/// bind as `|`-joined text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn sql_type(&self, column_type: ColumnType, id_policy: IdPolicy) -> &'static str {
        match column_type {
            ColumnType::NodeId | ColumnType::NodeIdRef => match id_policy {
                IdPolicy::AppUuid => "VARCHAR(36)",
                IdPolicy::DbIdentity => "INTEGER",
            },
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Clob => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Long => "BIGINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Double => "DOUBLE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Blob => "BLOB",
            ColumnType::ClusterNode => "VARCHAR(25)",
            ColumnType::ClusterFragments => "TEXT",
        }
    }

    fn column_definition(&self, column: &Column, id_policy: IdPolicy) -> String {
        let name = self.quote(&column.name);
        if column.identity {
            // rowid alias, the only way to get an identity column
            return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name);
        }
        let mut def = format!("{} {}", name, self.sql_type(column.column_type, id_policy));
        if column.primary {
            def.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    fn supports_arrays(&self) -> bool {
        false
    }

    fn identity_fetch_sql(&self, _table: &str, _column: &str) -> String {
        "SELECT last_insert_rowid()".to_string()
    }

    fn needs_order_by_keys_after_distinct(&self) -> bool {
        false
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn in_tree_sql(&self, id_column: &str, base: Value) -> (String, Vec<Value>) {
        let sql = format!(
            "EXISTS (SELECT 1 FROM {cte} \"x\" WHERE \"x\".\"id\" = {id} AND \"x\".\"ancestor\" = ? \
             AND \"x\".\"depth\" > 0 AND \"x\".\"via_version\" = 0)",
            cte = self.quote(ANCESTORS_CTE),
            id = id_column,
        );
        (sql, vec![base])
    }

    fn access_allowed_sql(
        &self,
        id_column: &str,
        principals: &[String],
        permissions: &[String],
    ) -> (String, Vec<Value>) {
        let q = |s: &str| self.quote(s);
        let sql = format!(
            "(SELECT \"acl\".{grant} FROM {cte} \"x\" JOIN {acls} \"acl\" ON \"acl\".{id} = \"x\".\"ancestor\" \
             WHERE \"x\".\"id\" = {target} \
             AND instr('|' || ? || '|', '|' || \"acl\".{permission} || '|') > 0 \
             AND (instr('|' || ? || '|', '|' || \"acl\".{user} || '|') > 0 \
             OR instr('|' || ? || '|', '|' || \"acl\".{group} || '|') > 0) \
             ORDER BY \"x\".\"depth\", \"acl\".{pos} LIMIT 1) = 1",
            grant = q(ACL_GRANT_KEY),
            cte = q(ANCESTORS_CTE),
            acls = q(ACL_TABLE_NAME),
            id = q(MAIN_KEY),
            target = id_column,
            permission = q(ACL_PERMISSION_KEY),
            user = q(ACL_USER_KEY),
            group = q(ACL_GROUP_KEY),
            pos = q(ACL_POS_KEY),
        );
        let principals = self.string_list_param(principals);
        (
            sql,
            vec![
                self.string_list_param(permissions),
                principals.clone(),
                principals,
            ],
        )
    }

    fn query_prelude(&self) -> Option<String> {
        let q = |s: &str| self.quote(s);
        // a version has no parent: its first step goes to the versionable.
        // Rows reached that way are flagged so tree tests can ignore them.
        let next = format!(
            "COALESCE(\"h\".{parent}, CASE WHEN \"a\".\"depth\" = 0 THEN \"v\".{versionable} END)",
            parent = q(HIER_PARENT_KEY),
            versionable = q(VERSION_VERSIONABLE_KEY),
        );
        Some(format!(
            "WITH RECURSIVE {cte}(\"id\", \"ancestor\", \"depth\", \"via_version\") AS (\
             SELECT {id}, {id}, 0, 0 FROM {hier} \
             UNION ALL \
             SELECT \"a\".\"id\", {next}, \"a\".\"depth\" + 1, \
             CASE WHEN \"h\".{parent} IS NULL THEN 1 ELSE \"a\".\"via_version\" END \
             FROM {cte} \"a\" \
             JOIN {hier} \"h\" ON \"h\".{id} = \"a\".\"ancestor\" \
             LEFT JOIN {versions} \"v\" ON \"v\".{id} = \"a\".\"ancestor\" \
             WHERE {next} IS NOT NULL)",
            cte = q(ANCESTORS_CTE),
            id = q(MAIN_KEY),
            hier = q(HIER_TABLE_NAME),
            versions = q(VERSION_TABLE_NAME),
            parent = q(HIER_PARENT_KEY),
            next = next,
        ))
    }
}
