use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::Result;
use crate::query::ast::Expr;

pub struct NestedPlugin;

impl ExpressionPlugin for NestedPlugin {
    fn name(&self) -> &'static str {
        "NESTED"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        matches!(expr, sql_ast::Expr::Nested(_))
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Nested(inner) => converter.convert(*inner),
            _ => unreachable!("NestedPlugin called with non-nested expression"),
        }
    }
}
