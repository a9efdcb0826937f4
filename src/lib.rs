// ============================================================================
// docstore Library
// ============================================================================

//! Persistence core of a hierarchical document repository.
//!
//! Documents are nodes of a tree, split into per-table fragments cached by
//! each [`Session`]. A [`Mapper`](mapper::Mapper) moves fragments to and
//! from SQL through statements precomputed by [`SqlInfo`](sql::SqlInfo),
//! and NXQL queries are compiled to SQL by [`QueryMaker`](query::QueryMaker).
//!
//! # Examples
//!
//! ```no_run
//! use docstore::{Credentials, FieldType, Model, Repository, RepositoryConfig, SchemaDef, DocumentTypeDef, Value};
//!
//! # fn main() -> docstore::Result<()> {
//! let model = Model::builder()
//!     .schema(SchemaDef::new("dublincore", "dc").field("title", FieldType::String))
//!     .document_type(DocumentTypeDef::new("Note").schema("dublincore"));
//! let repo = Repository::open(RepositoryConfig::new("default"), model)?;
//!
//! let mut session = repo.session(&Credentials::new("alice").group("administrators"))?;
//! let root = session.get_root_node()?;
//! let note = session.add_child_node(&root, "note", "Note")?;
//! session.set_single_property(&note, "dc:title", Value::from("Hello"))?;
//! session.save()?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod dialect;
pub mod fragment;
pub mod mapper;
pub mod model;
pub mod query;
pub mod repository;
pub mod session;
pub mod sql;

// Re-export main types for convenience
pub use core::{Id, IdPolicy, Result, StorageError, Value};
pub use dialect::DialectKind;
pub use fragment::{AclRow, Invalidations};
pub use mapper::PartialList;
pub use model::{DocumentTypeDef, FieldType, Model, ModelBuilder, SchemaDef};
pub use query::{FacetFilter, Query, QueryFilter, parse_query};
pub use repository::{
    ClusterConfig, Credentials, DatabaseLocation, Repository, RepositoryConfig,
    RepositoryManagement,
};
pub use session::{
    FACET_ORDERABLE, Node, PERMISSION_EVERYTHING, PERMISSION_READ, PERMISSION_VERSION, Session,
};
