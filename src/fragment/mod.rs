//! In-memory rows with lifecycle tracking.
//!
//! A [`Fragment`] is either one row of a simple table or the complete set of
//! rows of a collection table for one owning id. The state machine lives in
//! [`FragmentState`]; only the session layer drives transitions.

mod collection;
mod invalidations;
mod simple;

pub use collection::{AclRow, CollectionFragment};
pub use invalidations::{InvalidationKind, Invalidations};
pub use simple::SimpleFragment;

use std::fmt;

use crate::core::{Id, Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentState {
    /// Matches the database
    Pristine,
    /// Only in memory, inserted on flush
    Created,
    /// In the database and locally changed, updated on flush
    Modified,
    /// Removed on flush, then evicted
    Deleted,
    /// Known not to exist in the database
    Absent,
    /// Changed by another session, must be refetched
    InvalidatedModified,
    /// Deleted by another session, must be refetched
    InvalidatedDeleted,
}

impl FragmentState {
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::InvalidatedModified | Self::InvalidatedDeleted)
    }

    /// Has pending changes for the next flush.
    pub fn is_dirty(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Deleted)
    }

    /// State after a field write.
    pub fn after_write(self) -> Result<Self> {
        match self {
            Self::Pristine => Ok(Self::Modified),
            Self::Absent => Ok(Self::Created),
            Self::Created | Self::Modified => Ok(self),
            Self::Deleted | Self::InvalidatedModified | Self::InvalidatedDeleted => Err(
                StorageError::IllegalState(format!("Cannot write a fragment in state {}", self)),
            ),
        }
    }

    /// State after an invalidation notice from elsewhere.
    ///
    /// Only fragments without local changes are affected.
    pub fn after_invalidation(self, deleted: bool) -> Self {
        match self {
            Self::Pristine | Self::Absent | Self::InvalidatedModified => {
                if deleted {
                    Self::InvalidatedDeleted
                } else {
                    Self::InvalidatedModified
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for FragmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pristine => "PRISTINE",
            Self::Created => "CREATED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Absent => "ABSENT",
            Self::InvalidatedModified => "INVALIDATED_MODIFIED",
            Self::InvalidatedDeleted => "INVALIDATED_DELETED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Simple(SimpleFragment),
    Collection(CollectionFragment),
}

impl Fragment {
    pub fn id(&self) -> &Id {
        match self {
            Self::Simple(f) => f.id(),
            Self::Collection(f) => f.id(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Simple(f) => f.table(),
            Self::Collection(f) => f.table(),
        }
    }

    pub fn state(&self) -> FragmentState {
        match self {
            Self::Simple(f) => f.state(),
            Self::Collection(f) => f.state(),
        }
    }

    pub fn set_state(&mut self, state: FragmentState) {
        match self {
            Self::Simple(f) => f.set_state(state),
            Self::Collection(f) => f.set_state(state),
        }
    }

    /// Back to pristine after a successful flush.
    pub fn set_pristine(&mut self) {
        match self {
            Self::Simple(f) => f.set_pristine(),
            Self::Collection(f) => f.set_state(FragmentState::Pristine),
        }
    }

    pub fn mark_deleted(&mut self) {
        self.set_state(FragmentState::Deleted);
    }

    pub fn mark_invalidated(&mut self, deleted: bool) {
        let state = self.state().after_invalidation(deleted);
        self.set_state(state);
    }

    pub fn as_simple(&self) -> Option<&SimpleFragment> {
        match self {
            Self::Simple(f) => Some(f),
            Self::Collection(_) => None,
        }
    }

    pub fn as_simple_mut(&mut self) -> Option<&mut SimpleFragment> {
        match self {
            Self::Simple(f) => Some(f),
            Self::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionFragment> {
        match self {
            Self::Collection(f) => Some(f),
            Self::Simple(_) => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut CollectionFragment> {
        match self {
            Self::Collection(f) => Some(f),
            Self::Simple(_) => None,
        }
    }
}

impl From<SimpleFragment> for Fragment {
    fn from(f: SimpleFragment) -> Self {
        Self::Simple(f)
    }
}

impl From<CollectionFragment> for Fragment {
    fn from(f: CollectionFragment) -> Self {
        Self::Collection(f)
    }
}
