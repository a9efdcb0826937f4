//! Version and proxy lookups.

use super::Mapper;
use crate::core::{Id, Result, Value};
use crate::model::MAIN_KEY;

impl Mapper {
    /// Version of a versionable node carrying `label`.
    pub fn get_version_id_by_label(&self, versionable_id: &Id, label: &str) -> Result<Option<Id>> {
        let select = self.sql_info.select_version_by_label();
        let rows = self.select_rows(
            &select.sql,
            &[Value::from(versionable_id), Value::from(label)],
            &select.what_columns,
        )?;
        Ok(rows.into_iter().next().and_then(|row| row.get(MAIN_KEY).and_then(Value::as_id)))
    }

    /// Versions of a node by creation time, oldest first unless `last_first`.
    pub fn get_version_ids(&self, versionable_id: &Id, last_first: bool) -> Result<Vec<Id>> {
        let select = self.sql_info.select_versions_by_versionable(last_first);
        let rows = self.select_rows(&select.sql, &[Value::from(versionable_id)], &select.what_columns)?;
        Ok(ids_of(rows))
    }

    pub fn get_last_version_id(&self, versionable_id: &Id) -> Result<Option<Id>> {
        Ok(self.get_version_ids(versionable_id, true)?.into_iter().next())
    }

    /// Proxies pointing to a version (`by_target`) or to any version of a
    /// versionable node, optionally restricted to one parent folder.
    pub fn get_proxy_ids(&self, search_id: &Id, by_target: bool, parent_id: Option<&Id>) -> Result<Vec<Id>> {
        let rows = match parent_id {
            None => {
                let select = if by_target {
                    self.sql_info.select_proxies_by_target()
                } else {
                    self.sql_info.select_proxies_by_versionable()
                };
                self.select_rows(&select.sql, &[Value::from(search_id)], &select.what_columns)?
            }
            Some(parent) => {
                let statement = self.sql_info.select_proxies_with_parent(by_target);
                let what = [self.sql_info.table(crate::model::PROXY_TABLE_NAME).column(MAIN_KEY).clone()];
                self.select_rows(
                    &statement.sql,
                    &[Value::from(search_id), Value::from(parent)],
                    &what,
                )?
            }
        };
        Ok(ids_of(rows))
    }
}

fn ids_of(rows: Vec<std::collections::BTreeMap<String, Value>>) -> Vec<Id> {
    rows.into_iter()
        .filter_map(|row| row.get(MAIN_KEY).and_then(Value::as_id))
        .collect()
}
