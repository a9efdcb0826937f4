use rusqlite::params_from_iter;
use tracing::{Level, event};

use super::{Mapper, binding::decode};
use crate::core::{ColumnType, Id, Result, StorageError};
use crate::query::{CompiledQuery, PathResolver, Query, QueryFilter, QueryMaker};

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialList {
    pub ids: Vec<Id>,
    /// Number of matches ignoring offset and limit, when requested
    pub total_size: Option<usize>,
}

impl PartialList {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Mapper {
    /// Compiles and runs a query. A query that cannot match returns an empty
    /// list without touching the database.
    pub fn query(
        &self,
        query: &Query,
        filter: &QueryFilter,
        proxies_in_queries: bool,
        count_total: bool,
        resolve_path: &mut PathResolver<'_>,
    ) -> Result<PartialList> {
        let compiled = QueryMaker::new(&self.model, &self.sql_info, filter)
            .proxies_in_queries(proxies_in_queries)
            .make_query(query, resolve_path)?;
        match compiled {
            Some(compiled) => self.execute_query(&compiled, count_total),
            None => Ok(PartialList {
                ids: Vec::new(),
                total_size: count_total.then_some(0),
            }),
        }
    }

    /// Runs a compiled query in one pass over the result rows: rows before
    /// the offset are skipped, `limit` rows are kept and the rest are only
    /// counted, when a total is wanted.
    pub fn execute_query(&self, compiled: &CompiledQuery, count_total: bool) -> Result<PartialList> {
        let sql = &compiled.sql;
        self.log_sql(sql, &compiled.params);
        let mut stmt = self
            .connection()
            .prepare_cached(sql)
            .map_err(|e| StorageError::backend("Could not prepare query", sql, e))?;
        let mut rows = stmt
            .query(params_from_iter(compiled.params.iter()))
            .map_err(|e| StorageError::backend("Could not run query", sql, e))?;

        let limit = compiled.limit.unwrap_or(usize::MAX);
        let mut ids = Vec::new();
        let mut seen = 0usize;
        while let Some(row) = rows
            .next()
            .map_err(|e| StorageError::backend("Could not read query results", sql, e))?
        {
            if seen >= compiled.offset && ids.len() < limit {
                let value = row
                    .get_ref(0)
                    .map(|v| decode(v, ColumnType::NodeId))
                    .map_err(|e| StorageError::backend("Could not read query results", sql, e))?;
                let id = value.as_id().ok_or_else(|| {
                    StorageError::IllegalState(format!("Query returned a null id: {}", sql))
                })?;
                ids.push(id);
            } else if ids.len() >= limit && !count_total {
                break;
            }
            seen += 1;
        }

        let total_size = count_total.then_some(seen);
        event!(Level::DEBUG, count = ids.len(), total = ?total_size, "query executed");
        Ok(PartialList { ids, total_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::core::{IdPolicy, Value};
    use crate::fragment::{FragmentState, SimpleFragment};
    use crate::mapper::tests::test_mapper;
    use crate::model::{
        HIER_CHILD_ISPROPERTY_KEY, HIER_CHILD_NAME_KEY, HIER_CHILD_POS_KEY, HIER_PARENT_KEY,
        HIER_TABLE_NAME, MAIN_PRIMARY_TYPE_KEY,
    };
    use crate::query::{Expr, parse_query};

    fn insert_node(mapper: &Mapper, parent: Option<&Id>, name: &str, type_name: &str, title: Option<&str>) -> Id {
        let id = Id::new_uuid();
        let values = BTreeMap::from([
            (HIER_PARENT_KEY.to_string(), parent.map(Value::from).unwrap_or(Value::Null)),
            (HIER_CHILD_NAME_KEY.to_string(), Value::from(name)),
            (HIER_CHILD_POS_KEY.to_string(), Value::Null),
            (HIER_CHILD_ISPROPERTY_KEY.to_string(), Value::Boolean(false)),
            (MAIN_PRIMARY_TYPE_KEY.to_string(), Value::from(type_name)),
        ]);
        let mut hier = SimpleFragment::with_values(HIER_TABLE_NAME, id.clone(), FragmentState::Created, values);
        mapper.insert_single_row(&mut hier).unwrap();
        if let Some(title) = title {
            let mut dc = SimpleFragment::with_values(
                "dublincore",
                id.clone(),
                FragmentState::Created,
                BTreeMap::from([("title".to_string(), Value::from(title))]),
            );
            mapper.insert_single_row(&mut dc).unwrap();
        }
        id
    }

    #[test]
    fn test_offset_limit_and_total() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let root = insert_node(&mapper, None, "", "Root", None);
        for i in 0..5 {
            insert_node(&mapper, Some(&root), &format!("doc{}", i), "File", Some(&format!("t{}", i)));
        }
        let query = parse_query("SELECT * FROM File ORDER BY dc:title LIMIT 2 OFFSET 1").unwrap();
        let mut no_paths = |_: &str| -> Result<Option<Id>> { Ok(None) };
        let page = mapper
            .query(&query, &QueryFilter::unrestricted(), false, true, &mut no_paths)
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.total_size, Some(5));

        let page = mapper
            .query(&query, &QueryFilter::unrestricted(), false, false, &mut no_paths)
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.total_size, None);

        let query = Query::from_type("File").filter(Expr::reference("dc:title").eq(Expr::string("t3")));
        let page = mapper
            .query(&query, &QueryFilter::unrestricted(), true, true, &mut no_paths)
            .unwrap();
        assert_eq!(page.total_size, Some(1));
    }

    #[test]
    fn test_query_that_cannot_match() {
        let mapper = test_mapper(IdPolicy::AppUuid);
        let query = parse_query("SELECT * FROM File WHERE ecm:primaryType = 'Folder'").unwrap();
        let mut no_paths = |_: &str| -> Result<Option<Id>> { Ok(None) };
        let page = mapper
            .query(&query, &QueryFilter::unrestricted(), true, true, &mut no_paths)
            .unwrap();
        assert!(page.is_empty());
        assert_eq!(page.total_size, Some(0));
    }
}
