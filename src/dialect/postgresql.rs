use super::Dialect;
use crate::core::{Column, ColumnType, IdPolicy, Value};

/// PostgreSQL rules. Generation only: tree and security predicates call the
/// plpgsql functions returned by [`Dialect::function_ddl`], with native
/// array parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSqlDialect;

impl PostgreSqlDialect {
    fn id_type(id_policy: IdPolicy) -> &'static str {
        match id_policy {
            IdPolicy::AppUuid => "varchar(36)",
            IdPolicy::DbIdentity => "integer",
        }
    }
}

impl Dialect for PostgreSqlDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn is_executable(&self) -> bool {
        false
    }

    fn sql_type(&self, column_type: ColumnType, id_policy: IdPolicy) -> &'static str {
        match column_type {
            ColumnType::NodeId | ColumnType::NodeIdRef => match id_policy {
                IdPolicy::AppUuid => "VARCHAR(36)",
                IdPolicy::DbIdentity => "INTEGER",
            },
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Clob => "TEXT",
            ColumnType::Boolean => "BOOL",
            ColumnType::Long => "INT8",
            ColumnType::Integer => "INT4",
            ColumnType::Double => "FLOAT8",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Blob => "BYTEA",
            ColumnType::ClusterNode => "VARCHAR(25)",
            ColumnType::ClusterFragments => "VARCHAR[]",
        }
    }

    fn column_definition(&self, column: &Column, id_policy: IdPolicy) -> String {
        let name = self.quote(&column.name);
        if column.identity {
            return format!("{} SERIAL PRIMARY KEY", name);
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
        true
    }

    fn identity_fetch_sql(&self, table: &str, column: &str) -> String {
        format!("SELECT currval('{}_{}_seq')", table, column)
    }

    fn needs_order_by_keys_after_distinct(&self) -> bool {
        true
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "true" } else { "false" }
    }

    fn in_tree_sql(&self, id_column: &str, base: Value) -> (String, Vec<Value>) {
        (format!("NX_IN_TREE({}, ?)", id_column), vec![base])
    }

    fn access_allowed_sql(
        &self,
        id_column: &str,
        principals: &[String],
        permissions: &[String],
    ) -> (String, Vec<Value>) {
        (
            format!("NX_ACCESS_ALLOWED({}, ?, ?)", id_column),
            vec![
                self.string_list_param(principals),
                self.string_list_param(permissions),
            ],
        )
    }

    fn function_ddl(&self, id_policy: IdPolicy) -> Vec<String> {
        let id_type = Self::id_type(id_policy);
        vec![
            format!(
                "CREATE OR REPLACE FUNCTION NX_IN_TREE(id {t}, baseid {t}) \
                 RETURNS boolean \
                 AS $$ \
                 DECLARE \
                   curid {t} := id; \
                 BEGIN \
                   IF baseid IS NULL OR id IS NULL OR baseid = id THEN \
                     RETURN false; \
                   END IF; \
                   LOOP \
                     SELECT parentid INTO curid FROM hierarchy WHERE hierarchy.id = curid; \
                     IF curid IS NULL THEN \
                       RETURN false; \
                     ELSIF curid = baseid THEN \
                       RETURN true; \
                     END IF; \
                   END LOOP; \
                 END \
                 $$ \
                 LANGUAGE plpgsql \
                 STABLE",
                t = id_type
            ),
            format!(
                "CREATE OR REPLACE FUNCTION NX_ACCESS_ALLOWED(id {t}, users varchar[], permissions varchar[]) \
                 RETURNS boolean \
                 AS $$ \
                 DECLARE \
                   curid {t} := id; \
                   newid {t}; \
                   r record; \
                   first boolean := true; \
                 BEGIN \
                   WHILE curid IS NOT NULL LOOP \
                     FOR r IN SELECT acls.grant, acls.permission, acls.user, acls.\"group\" FROM acls WHERE acls.id = curid ORDER BY acls.pos LOOP \
                       IF r.permission = ANY(permissions) AND (r.user = ANY(users) OR r.\"group\" = ANY(users)) THEN \
                         RETURN r.grant; \
                       END IF; \
                     END LOOP; \
                     SELECT parentid INTO newid FROM hierarchy WHERE hierarchy.id = curid; \
                     IF first AND newid IS NULL THEN \
                       SELECT versionableid INTO newid FROM versions WHERE versions.id = curid; \
                     END IF; \
                     first := false; \
                     curid := newid; \
                   END LOOP; \
                   RETURN false; \
                 END \
                 $$ \
                 LANGUAGE plpgsql \
                 STABLE",
                t = id_type
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_calls_use_arrays() {
        let (sql, params) = PostgreSqlDialect.access_allowed_sql(
            "_nxhier.id",
            &["bob".to_string()],
            &["Browse".to_string(), "Read".to_string()],
        );
        assert_eq!(sql, "NX_ACCESS_ALLOWED(_nxhier.id, ?, ?)");
        assert_eq!(params[0], Value::StringArray(vec!["bob".to_string()]));
    }

    #[test]
    fn test_function_ddl_uses_id_type() {
        let ddl = PostgreSqlDialect.function_ddl(IdPolicy::DbIdentity);
        assert_eq!(ddl.len(), 2);
        assert!(ddl[0].starts_with("CREATE OR REPLACE FUNCTION NX_IN_TREE(id integer, baseid integer)"));
        assert!(ddl[1].contains("ORDER BY acls.pos"));
        assert!(ddl[1].contains("r.\"group\" = ANY(users)"));
        assert!(ddl[1].contains("LANGUAGE plpgsql"));
    }

    #[test]
    fn test_identity_fetch_uses_sequence() {
        assert_eq!(
            PostgreSqlDialect.identity_fetch_sql("hierarchy", "id"),
            "SELECT currval('hierarchy_id_seq')"
        );
    }
}
