use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::Result;
use crate::query::ast::Expr;

/// Comparisons, including the `STARTSWITH` path test.
pub struct ComparisonPlugin;

impl ExpressionPlugin for ComparisonPlugin {
    fn name(&self) -> &'static str {
        "COMPARISON"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        if let sql_ast::Expr::BinaryOp { op, .. } = expr {
            matches!(
                op,
                sql_ast::BinaryOperator::Eq
                    | sql_ast::BinaryOperator::NotEq
                    | sql_ast::BinaryOperator::Lt
                    | sql_ast::BinaryOperator::LtEq
                    | sql_ast::BinaryOperator::Gt
                    | sql_ast::BinaryOperator::GtEq
                    | sql_ast::BinaryOperator::PGStartsWith
            )
        } else {
            false
        }
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        match expr {
            sql_ast::Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
                left: Box::new(converter.convert(*left)?),
                op: converter.convert_binary_op(&op)?,
                right: Box::new(converter.convert(*right)?),
            }),
            _ => unreachable!("ComparisonPlugin called with non-comparison expression"),
        }
    }
}
