//! Schema upgrade planning against an existing database.

use super::SqlInfo;

/// Result of comparing a declared column type with the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheck {
    Same,
    /// Known harmless drift between dialect spellings
    Benign,
    Mismatch,
}

const BOOLEAN_LIKE: &[&str] = &["BIT", "SMALLINT", "TINYINT", "INTEGER", "INT", "INT2", "INT4"];
const BOOLEAN_TYPES: &[&str] = &["BOOLEAN", "BOOL"];
const TEXT_LIKE: &[&str] = &["CLOB", "TEXT"];
const VARCHAR_TYPES: &[&str] = &["VARCHAR", "LONGVARCHAR", "CHARACTER VARYING"];

/// Uppercased type name without its length or precision.
fn base_type(sql_type: &str) -> String {
    let upper = sql_type.trim().to_uppercase();
    match upper.find('(') {
        Some(i) => upper[..i].trim().to_string(),
        None => upper,
    }
}

pub fn check_type(expected: &str, actual: &str) -> TypeCheck {
    let expected = base_type(expected);
    let actual = base_type(actual);
    if expected == actual {
        return TypeCheck::Same;
    }
    let pair = |a: &[&str], b: &[&str]| {
        (a.contains(&expected.as_str()) && b.contains(&actual.as_str()))
            || (b.contains(&expected.as_str()) && a.contains(&actual.as_str()))
    };
    if pair(BOOLEAN_LIKE, BOOLEAN_TYPES)
        || pair(TEXT_LIKE, VARCHAR_TYPES)
        || pair(TEXT_LIKE, TEXT_LIKE)
    {
        TypeCheck::Benign
    } else {
        TypeCheck::Mismatch
    }
}

impl SqlInfo {
    /// Statements bringing an existing table up to date, given its
    /// `(column name, declared type)` pairs. Only missing columns are added;
    /// type drift and extra columns are logged.
    pub fn plan_table_update(&self, table: &str, existing: &[(String, String)]) -> Vec<String> {
        let t = self.table(table);
        let mut statements = Vec::new();
        for column in t.columns() {
            let found = existing
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&column.name));
            match found {
                None => {
                    log::debug!("Adding missing column {}.{}", table, column.name);
                    statements.push(self.add_column_sql(table, &column.key));
                }
                Some((_, actual)) => {
                    let expected = self.dialect().sql_type(column.column_type, self.id_policy());
                    match check_type(expected, actual) {
                        TypeCheck::Same => {}
                        TypeCheck::Benign => log::warn!(
                            "Column {}.{} has type {} instead of {}",
                            table,
                            column.name,
                            actual,
                            expected
                        ),
                        TypeCheck::Mismatch => log::error!(
                            "Column {}.{} has incompatible type {}, expected {}",
                            table,
                            column.name,
                            actual,
                            expected
                        ),
                    }
                }
            }
        }
        for (name, _) in existing {
            if t.columns().iter().all(|c| !c.name.eq_ignore_ascii_case(name)) {
                log::warn!("Unexpected column {}.{} in database", table, name);
            }
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IdPolicy;
    use crate::dialect::SqliteDialect;
    use crate::model::{DocumentTypeDef, FieldType, Model, SchemaDef};

    #[test]
    fn test_type_checks() {
        assert_eq!(check_type("VARCHAR(36)", "varchar(36)"), TypeCheck::Same);
        assert_eq!(check_type("BOOLEAN", "SMALLINT"), TypeCheck::Benign);
        assert_eq!(check_type("BIT", "BOOLEAN"), TypeCheck::Benign);
        assert_eq!(check_type("TEXT", "VARCHAR"), TypeCheck::Benign);
        assert_eq!(check_type("CLOB", "TEXT"), TypeCheck::Benign);
        assert_eq!(check_type("BIGINT", "BLOB"), TypeCheck::Mismatch);
    }

    #[test]
    fn test_plan_adds_missing_columns_only() {
        let model = Model::builder()
            .id_policy(IdPolicy::AppUuid)
            .schema(
                SchemaDef::new("dublincore", "dc")
                    .field("title", FieldType::String)
                    .field("description", FieldType::Clob),
            )
            .document_type(DocumentTypeDef::new("File").schema("dublincore"))
            .build()
            .unwrap();
        let info = SqlInfo::new(&model, Box::new(SqliteDialect));
        let existing = vec![
            ("id".to_string(), "VARCHAR(36)".to_string()),
            ("title".to_string(), "TEXT".to_string()),
            ("legacy".to_string(), "TEXT".to_string()),
        ];
        let plan = info.plan_table_update("dublincore", &existing);
        assert_eq!(
            plan,
            vec!["ALTER TABLE \"dublincore\" ADD COLUMN \"description\" TEXT".to_string()]
        );
    }
}
