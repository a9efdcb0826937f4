use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::Id;

/// What happened to an invalidated fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InvalidationKind {
    Modified,
    Deleted,
}

impl InvalidationKind {
    /// Value stored in the cluster mailbox `kind` column.
    pub fn code(&self) -> i64 {
        match self {
            Self::Modified => 1,
            Self::Deleted => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Modified),
            2 => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Ids whose fragments changed, per kind and table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidations {
    pub modified: BTreeMap<String, BTreeSet<Id>>,
    pub deleted: BTreeMap<String, BTreeSet<Id>>,
}

impl Invalidations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn clear(&mut self) {
        self.modified.clear();
        self.deleted.clear();
    }

    pub fn add(&mut self, table: &str, id: Id, kind: InvalidationKind) {
        let map = match kind {
            InvalidationKind::Modified => &mut self.modified,
            InvalidationKind::Deleted => &mut self.deleted,
        };
        map.entry(table.to_string()).or_default().insert(id);
    }

    pub fn add_modified(&mut self, table: &str, id: Id) {
        self.add(table, id, InvalidationKind::Modified);
    }

    pub fn add_deleted(&mut self, table: &str, id: Id) {
        self.add(table, id, InvalidationKind::Deleted);
    }

    pub fn merge(&mut self, other: &Invalidations) {
        for (kind, map) in other.by_kind() {
            for (table, ids) in map {
                for id in ids {
                    self.add(table, id.clone(), kind);
                }
            }
        }
    }

    pub fn by_kind(&self) -> [(InvalidationKind, &BTreeMap<String, BTreeSet<Id>>); 2] {
        [
            (InvalidationKind::Modified, &self.modified),
            (InvalidationKind::Deleted, &self.deleted),
        ]
    }

    /// Number of (table, id) entries over both kinds.
    pub fn len(&self) -> usize {
        self.modified.values().chain(self.deleted.values()).map(BTreeSet::len).sum()
    }

    pub fn contains(&self, table: &str, id: &Id, kind: InvalidationKind) -> bool {
        let map = match kind {
            InvalidationKind::Modified => &self.modified,
            InvalidationKind::Deleted => &self.deleted,
        };
        map.get(table).is_some_and(|ids| ids.contains(id))
    }

    /// Compact JSON form for debug logs.
    pub fn to_debug_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<{}>", e))
    }
}
