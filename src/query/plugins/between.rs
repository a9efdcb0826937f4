use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::{Result, StorageError};
use crate::query::ast::Expr;

/// `prop BETWEEN low AND high`. The operand is a property and both bounds
/// are literals, dates included.
pub struct BetweenPlugin;

impl BetweenPlugin {
    fn bound(converter: &ExpressionConverter, expr: sql_ast::Expr, which: &str) -> Result<Box<Expr>> {
        match converter.convert(expr)? {
            literal @ Expr::Literal(_) => Ok(Box::new(literal)),
            other => Err(StorageError::Query(format!(
                "BETWEEN {} bound must be a literal: {}",
                which, other
            ))),
        }
    }
}

impl ExpressionPlugin for BetweenPlugin {
    fn name(&self) -> &'static str {
        "BETWEEN"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        matches!(expr, sql_ast::Expr::Between { .. })
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        let sql_ast::Expr::Between {
            expr,
            negated,
            low,
            high,
        } = expr
        else {
            unreachable!("BetweenPlugin called with non-BETWEEN expression");
        };
        let operand = match converter.convert(*expr)? {
            reference @ Expr::Reference(_) => reference,
            other => {
                return Err(StorageError::Query(format!(
                    "BETWEEN applies to a property, not {}",
                    other
                )));
            }
        };
        Ok(Expr::Between {
            expr: Box::new(operand),
            low: Self::bound(converter, *low, "lower")?,
            high: Self::bound(converter, *high, "upper")?,
            negated,
        })
    }
}
