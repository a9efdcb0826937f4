use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::{Result, StorageError};
use crate::query::ast::Expr;

pub struct LikePlugin;

impl ExpressionPlugin for LikePlugin {
    fn name(&self) -> &'static str {
        "LIKE"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        matches!(expr, sql_ast::Expr::Like { .. } | sql_ast::Expr::ILike { .. })
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        let (negated, expr, pattern, escape, case_insensitive) = match expr {
            sql_ast::Expr::Like {
                negated,
                expr,
                pattern,
                escape_char,
                ..
            } => (negated, expr, pattern, escape_char.is_some(), false),
            sql_ast::Expr::ILike {
                negated,
                expr,
                pattern,
                escape_char,
                ..
            } => (negated, expr, pattern, escape_char.is_some(), true),
            _ => unreachable!("LikePlugin called with non-LIKE expression"),
        };
        if escape {
            return Err(StorageError::Query("LIKE ESCAPE not supported".into()));
        }
        Ok(Expr::Like {
            expr: Box::new(converter.convert(*expr)?),
            pattern: Box::new(converter.convert(*pattern)?),
            negated,
            case_insensitive,
        })
    }
}
