use crate::core::Column;
use crate::dialect::Dialect;

/// Physical description of one database table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    collection: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, collection: bool) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            collection,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.add_column(column);
        self
    }

    pub fn add_column(&mut self, column: Column) {
        if self.columns.iter().any(|c| c.key == column.key) {
            panic!("Duplicate column {} in table {}", column.key, self.name);
        }
        self.columns.push(column);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Looks up a column by key. Unknown keys are programming errors.
    pub fn column(&self, key: &str) -> &Column {
        match self.find_column(key) {
            Some(column) => column,
            None => panic!("Unknown column {} in table {}", key, self.name),
        }
    }

    pub fn find_column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn quoted_name(&self, dialect: &dyn Dialect) -> String {
        dialect.quote(&self.name)
    }

    /// `"table"."column"` for a column key.
    pub fn qualified(&self, dialect: &dyn Dialect, key: &str) -> String {
        format!(
            "{}.{}",
            dialect.quote(&self.name),
            dialect.quote(&self.column(key).name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnType;
    use crate::dialect::SqliteDialect;

    #[test]
    fn test_qualified_names() {
        let table = Table::new("hierarchy", false)
            .with_column(Column::new("id", ColumnType::NodeId).primary())
            .with_column(Column::new("parentid", ColumnType::NodeIdRef));
        assert_eq!(
            table.qualified(&SqliteDialect, "parentid"),
            "\"hierarchy\".\"parentid\""
        );
        assert!(table.find_column("name").is_none());
    }

    #[test]
    #[should_panic(expected = "Unknown column")]
    fn test_unknown_column_panics() {
        Table::new("misc", false).column("nope");
    }
}
