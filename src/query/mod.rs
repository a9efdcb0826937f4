//! The document query language: parsing, predicate tree and compilation
//! into SQL.

pub mod ast;
mod filter;
mod maker;
mod parser;
mod plugins;

pub use ast::{BinaryOp, Expr, Literal, OrderByExpr, Query};
pub use filter::{FACET_IMMUTABLE, FacetFilter, QueryFilter};
pub use maker::{
    CompiledQuery, ECM_ISPROXY, ECM_ISVERSION, ECM_LIFECYCLESTATE, ECM_MIXINTYPE, ECM_NAME,
    ECM_PARENTID, ECM_PATH, ECM_PRIMARYTYPE, ECM_UUID, ECM_VERSIONLABEL, PathResolver, QueryMaker,
};
pub use parser::NxqlParser;
pub use plugins::{ExpressionConverter, ExpressionPlugin, ExpressionPluginRegistry};

use crate::core::Result;

/// Parses query text with the default plugins.
pub fn parse_query(text: &str) -> Result<Query> {
    NxqlParser::new().parse(text)
}
