//! Cluster invalidation mailbox.
//!
//! Each node registers in `cluster_nodes`. Invalidations are written once
//! per other registered node, one row per id and kind, and each node drains
//! the rows addressed to it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{Level, event};

use super::Mapper;
use crate::core::{Column, ColumnType, Id, Result, Value};
use crate::fragment::{InvalidationKind, Invalidations};
use crate::model::{CLUSTER_INVALS_FRAGMENTS_KEY, CLUSTER_INVALS_ID_KEY, CLUSTER_INVALS_KIND_KEY};

impl Mapper {
    /// Registers this node, dropping any leftover registration and mail.
    pub fn create_cluster_node(&self, node_id: &str) -> Result<()> {
        let cluster = self.sql_info.cluster();
        self.execute(&cluster.delete_node, &[Value::from(node_id)])?;
        self.execute(&cluster.delete_invalidations, &[Value::from(node_id)])?;
        self.execute(
            &cluster.insert_node.sql,
            &[Value::from(node_id), Value::Timestamp(Utc::now())],
        )?;
        event!(Level::INFO, node_id = %node_id, "cluster node registered");
        Ok(())
    }

    pub fn remove_cluster_node(&self, node_id: &str) -> Result<()> {
        let cluster = self.sql_info.cluster();
        self.execute(&cluster.delete_node, &[Value::from(node_id)])?;
        self.execute(&cluster.delete_invalidations, &[Value::from(node_id)])?;
        event!(Level::INFO, node_id = %node_id, "cluster node removed");
        Ok(())
    }

    /// Posts invalidations to every other registered node. Returns the
    /// number of rows written.
    pub fn insert_cluster_invalidations(&self, node_id: &str, invalidations: &Invalidations) -> Result<usize> {
        let cluster = self.sql_info.cluster();
        let dialect = self.sql_info.dialect();
        let mut count = 0;
        for (kind, map) in invalidations.by_kind() {
            for (id, fragments) in invert(map) {
                let fragments: Vec<String> = fragments.into_iter().collect();
                count += self.execute(
                    &cluster.insert_invalidations,
                    &[
                        Value::from(&id),
                        dialect.cluster_fragments_param(&fragments),
                        Value::Long(kind.code()),
                        Value::from(node_id),
                    ],
                )?;
            }
        }
        event!(Level::DEBUG, node_id = %node_id, rows = count, "cluster invalidations posted");
        Ok(count)
    }

    /// Takes the invalidations addressed to this node. Rows are deleted and
    /// read by the same statement, so a row posted concurrently is either
    /// returned now or left for the next call.
    pub fn get_cluster_invalidations(&self, node_id: &str) -> Result<Invalidations> {
        let cluster = self.sql_info.cluster();
        let dialect = self.sql_info.dialect();
        let columns = [
            Column::new(CLUSTER_INVALS_ID_KEY, ColumnType::NodeIdRef),
            Column::new(CLUSTER_INVALS_FRAGMENTS_KEY, ColumnType::ClusterFragments),
            Column::new(CLUSTER_INVALS_KIND_KEY, ColumnType::Integer),
        ];
        let rows = self.select_rows(&cluster.drain_invalidations, &[Value::from(node_id)], &columns)?;
        let mut invalidations = Invalidations::new();
        for row in &rows {
            let Some(id) = row.get(CLUSTER_INVALS_ID_KEY).and_then(Value::as_id) else {
                continue;
            };
            let kind = row
                .get(CLUSTER_INVALS_KIND_KEY)
                .and_then(Value::as_i64)
                .and_then(InvalidationKind::from_code);
            let Some(kind) = kind else {
                log::warn!("Ignoring cluster invalidation of {} with unknown kind", id);
                continue;
            };
            let fragments = row
                .get(CLUSTER_INVALS_FRAGMENTS_KEY)
                .map(|v| dialect.parse_cluster_fragments(v))
                .unwrap_or_default();
            for fragment in fragments {
                invalidations.add(&fragment, id.clone(), kind);
            }
        }
        if !rows.is_empty() {
            log::debug!("Cluster invalidations for {}: {}", node_id, invalidations.to_debug_json());
        }
        Ok(invalidations)
    }
}

/// Table to ids, turned into id to tables.
fn invert(map: &BTreeMap<String, BTreeSet<Id>>) -> BTreeMap<Id, BTreeSet<String>> {
    let mut result: BTreeMap<Id, BTreeSet<String>> = BTreeMap::new();
    for (table, ids) in map {
        for id in ids {
            result.entry(id.clone()).or_default().insert(table.clone());
        }
    }
    result
}
