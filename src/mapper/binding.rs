//! Conversions between [`Value`] and SQLite values.

use std::collections::BTreeMap;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};

use crate::core::{Column, ColumnType, Value};
use crate::dialect::ARRAY_SEP;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Long(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Double(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(t) => ToSqlOutput::Owned(SqlValue::Text(Value::format_timestamp(t))),
            Value::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::StringArray(items) => {
                ToSqlOutput::Owned(SqlValue::Text(items.join(&ARRAY_SEP.to_string())))
            }
        })
    }
}

/// Decodes a database value according to the column's logical type.
pub fn decode(value: ValueRef<'_>, column_type: ColumnType) -> Value {
    match (value, column_type) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), ColumnType::Boolean) => Value::Boolean(i != 0),
        (ValueRef::Integer(i), ColumnType::Double) => Value::Double(i as f64),
        (ValueRef::Integer(i), _) => Value::Long(i),
        (ValueRef::Real(f), ColumnType::Long | ColumnType::Integer) => Value::Long(f as i64),
        (ValueRef::Real(f), _) => Value::Double(f),
        (ValueRef::Text(bytes), ColumnType::Timestamp) => {
            let text = String::from_utf8_lossy(bytes);
            match Value::parse_timestamp(&text) {
                Some(ts) => Value::Timestamp(ts),
                None => Value::String(text.into_owned()),
            }
        }
        (ValueRef::Text(bytes), _) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        (ValueRef::Blob(bytes), _) => Value::Binary(bytes.to_vec()),
    }
}

/// Reads `columns` from a result row, in order, keyed by column key.
pub fn read_row(row: &rusqlite::Row<'_>, columns: &[Column]) -> rusqlite::Result<BTreeMap<String, Value>> {
    read_row_from(row, columns, 0)
}

/// Same as [`read_row`], starting at result index `offset`.
pub fn read_row_from(
    row: &rusqlite::Row<'_>,
    columns: &[Column],
    offset: usize,
) -> rusqlite::Result<BTreeMap<String, Value>> {
    let mut map = BTreeMap::new();
    for (i, column) in columns.iter().enumerate() {
        let value = decode(row.get_ref(offset + i)?, column.column_type);
        map.insert(column.key.clone(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rusqlite::Connection;

    #[test]
    fn test_values_survive_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (b BOOLEAN, ts TIMESTAMP, d DOUBLE, s VARCHAR, x BLOB)")
            .unwrap();
        let ts = Utc.with_ymd_and_hms(2010, 5, 4, 3, 2, 1).unwrap();
        let values = [
            Value::Boolean(true),
            Value::Timestamp(ts),
            Value::Double(1.5),
            Value::from("hello"),
            Value::Binary(vec![0, 1, 2]),
        ];
        conn.execute(
            "INSERT INTO t VALUES (?, ?, ?, ?, ?)",
            rusqlite::params_from_iter(values.iter()),
        )
        .unwrap();

        let columns = vec![
            Column::new("b", ColumnType::Boolean),
            Column::new("ts", ColumnType::Timestamp),
            Column::new("d", ColumnType::Double),
            Column::new("s", ColumnType::Varchar),
            Column::new("x", ColumnType::Blob),
        ];
        let map = conn
            .query_row("SELECT b, ts, d, s, x FROM t", [], |row| read_row(row, &columns))
            .unwrap();
        assert_eq!(map["b"], Value::Boolean(true));
        assert_eq!(map["ts"], Value::Timestamp(ts));
        assert_eq!(map["d"], Value::Double(1.5));
        assert_eq!(map["s"], Value::from("hello"));
        assert_eq!(map["x"], Value::Binary(vec![0, 1, 2]));
    }

    #[test]
    fn test_decode_nulls_and_ids() {
        assert_eq!(decode(ValueRef::Null, ColumnType::Boolean), Value::Null);
        assert_eq!(decode(ValueRef::Integer(12), ColumnType::NodeId), Value::Long(12));
        assert_eq!(
            decode(ValueRef::Text(b"abc"), ColumnType::NodeIdRef),
            Value::from("abc")
        );
    }
}
