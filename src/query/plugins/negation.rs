use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::{Result, StorageError};
use crate::query::ast::{Expr, Literal};

/// Signed numeric literals: `-5`, `+2.5`.
pub struct NegationPlugin;

impl ExpressionPlugin for NegationPlugin {
    fn name(&self) -> &'static str {
        "NEGATION"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        matches!(
            expr,
            sql_ast::Expr::UnaryOp {
                op: sql_ast::UnaryOperator::Minus | sql_ast::UnaryOperator::Plus,
                ..
            }
        )
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        let sql_ast::Expr::UnaryOp { op, expr } = expr else {
            unreachable!("NegationPlugin called with non-unary expression");
        };
        let negate = matches!(op, sql_ast::UnaryOperator::Minus);
        match converter.convert(*expr)? {
            Expr::Literal(Literal::Integer(i)) => {
                Ok(Expr::Literal(Literal::Integer(if negate { -i } else { i })))
            }
            Expr::Literal(Literal::Double(d)) => {
                Ok(Expr::Literal(Literal::Double(if negate { -d } else { d })))
            }
            other => Err(StorageError::Query(format!(
                "Sign only allowed on numbers: {}{}",
                op, other
            ))),
        }
    }
}
