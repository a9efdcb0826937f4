//! Statement generation.
//!
//! [`SqlInfo`] computes, once per model and dialect, every statement the
//! mapper runs, together with the ordered columns used to bind parameters
//! and decode rows.

mod ddl;
mod info;
mod table;

pub use ddl::{TypeCheck, check_type};
pub use info::{ChildFilter, ClusterStatements, CopyHierInfo, CopyHierMode, SelectInfo, SqlInfo, Statement};
pub use table::Table;
