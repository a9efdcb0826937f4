//! Per-table fragment cache of one session.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::core::Id;
use crate::fragment::{CollectionFragment, Fragment, FragmentState, SimpleFragment};

/// Fragments of one table known to a session.
///
/// Fragments without local changes live in a bounded LRU and may be dropped
/// at any time. Fragments with pending changes are held until the next
/// flush, whatever their number.
pub(crate) struct Context {
    table: String,
    collection: bool,
    pristine: LruCache<Id, Fragment>,
    modified: BTreeMap<Id, Fragment>,
    /// Ids of created fragments, in creation order
    created: Vec<Id>,
}

impl Context {
    pub fn new(table: &str, collection: bool, capacity: NonZeroUsize) -> Self {
        Self {
            table: table.to_string(),
            collection,
            pristine: LruCache::new(capacity),
            modified: BTreeMap::new(),
            created: Vec::new(),
        }
    }

    /// Cached fragment, without refreshing its recency.
    pub fn peek(&self, id: &Id) -> Option<&Fragment> {
        self.modified.get(id).or_else(|| self.pristine.peek(id))
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Fragment> {
        if self.modified.contains_key(id) {
            return self.modified.get_mut(id);
        }
        self.pristine.get_mut(id)
    }

    /// True if the fragment has unflushed local changes.
    pub fn is_modified(&self, id: &Id) -> bool {
        self.modified.contains_key(id)
    }

    /// Caches a fragment as read from the database, replacing a stale copy.
    pub fn put_pristine(&mut self, fragment: Fragment) -> &mut Fragment {
        let id = fragment.id().clone();
        self.pristine.pop(&id);
        self.pristine.get_or_insert_mut(id, || fragment)
    }

    /// Drops a cached fragment without local changes.
    pub fn evict(&mut self, id: &Id) -> Option<Fragment> {
        self.pristine.pop(id)
    }

    /// Adds a fragment that exists only in memory.
    pub fn add_created(&mut self, fragment: Fragment) -> &mut Fragment {
        let id = fragment.id().clone();
        self.pristine.pop(&id);
        self.created.push(id.clone());
        match self.modified.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.insert(fragment);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(fragment),
        }
    }

    /// Pins a cached fragment until the next flush so that writes to it are
    /// not lost to eviction.
    pub fn for_write(&mut self, id: &Id) -> Option<&mut Fragment> {
        if !self.modified.contains_key(id) {
            let fragment = self.pristine.pop(id)?;
            self.modified.insert(id.clone(), fragment);
        }
        self.modified.get_mut(id)
    }

    /// Schedules the deletion of a fragment, cached or not.
    ///
    /// A fragment that was never stored is simply dropped.
    pub fn remove(&mut self, id: &Id) {
        if let Some(fragment) = self.modified.get_mut(id) {
            match fragment.state() {
                FragmentState::Created => {
                    self.modified.remove(id);
                    self.created.retain(|c| c != id);
                }
                FragmentState::Absent => {
                    self.modified.remove(id);
                }
                _ => fragment.mark_deleted(),
            }
            return;
        }
        let mut fragment = match self.pristine.pop(id) {
            Some(fragment) if fragment.state() == FragmentState::Absent => return,
            Some(fragment) => fragment,
            None => self.empty(id),
        };
        fragment.mark_deleted();
        self.modified.insert(id.clone(), fragment);
    }

    fn empty(&self, id: &Id) -> Fragment {
        if self.collection {
            CollectionFragment::new(self.table.as_str(), id.clone(), FragmentState::Deleted, Vec::new()).into()
        } else {
            SimpleFragment::new(self.table.as_str(), id.clone(), FragmentState::Deleted).into()
        }
    }

    /// Fragments with pending changes or pinned for write.
    pub fn modified(&self) -> impl Iterator<Item = &Fragment> {
        self.modified.values()
    }

    pub fn modified_mut(&mut self, id: &Id) -> Option<&mut Fragment> {
        self.modified.get_mut(id)
    }

    pub fn has_changes(&self) -> bool {
        self.modified.values().any(|f| f.state().is_dirty())
    }

    /// Order in which pending changes are written: creations in the order
    /// they happened, then everything else by id.
    pub fn flush_order(&self) -> Vec<Id> {
        let mut order: Vec<Id> = self
            .created
            .iter()
            .filter(|id| self.modified.contains_key(*id))
            .cloned()
            .collect();
        for id in self.modified.keys() {
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
        order
    }

    /// Settles the cache after a successful flush: written fragments become
    /// pristine, deleted ones are evicted.
    pub fn finish_flush(&mut self) {
        self.created.clear();
        for (_, mut fragment) in std::mem::take(&mut self.modified) {
            match fragment.state() {
                FragmentState::Deleted => {}
                FragmentState::Absent => {
                    self.put_pristine(fragment);
                }
                _ => {
                    fragment.set_pristine();
                    self.put_pristine(fragment);
                }
            }
        }
    }

    /// Marks a cached fragment as changed elsewhere. Local changes win over
    /// the notice, which is only logged.
    pub fn invalidate(&mut self, id: &Id, deleted: bool) {
        if self.modified.contains_key(id) {
            log::debug!(
                "Invalidation of {} {} ignored, it has local changes",
                self.table,
                id
            );
            return;
        }
        if let Some(fragment) = self.pristine.peek_mut(id) {
            fragment.mark_invalidated(deleted);
        }
    }

    /// Drops the fragments without local changes. Returns how many there
    /// were.
    pub fn clear(&mut self) -> usize {
        let count = self.pristine.len();
        self.pristine.clear();
        count
    }

    /// Drops everything, local changes included.
    pub fn reset(&mut self) {
        self.pristine.clear();
        self.modified.clear();
        self.created.clear();
    }
}
