use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::Result;
use crate::query::ast::Expr;

pub struct BooleanPlugin;

impl ExpressionPlugin for BooleanPlugin {
    fn name(&self) -> &'static str {
        "BOOLEAN"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        match expr {
            sql_ast::Expr::BinaryOp { op, .. } => {
                matches!(op, sql_ast::BinaryOperator::And | sql_ast::BinaryOperator::Or)
            }
            sql_ast::Expr::UnaryOp { op, .. } => matches!(op, sql_ast::UnaryOperator::Not),
            _ => false,
        }
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        match expr {
            sql_ast::Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
                left: Box::new(converter.convert(*left)?),
                op: converter.convert_binary_op(&op)?,
                right: Box::new(converter.convert(*right)?),
            }),
            sql_ast::Expr::UnaryOp { expr, .. } => Ok(Expr::Not(Box::new(converter.convert(*expr)?))),
            _ => unreachable!("BooleanPlugin called with non-boolean expression"),
        }
    }
}
