use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::Result;
use crate::query::ast::Expr;

pub struct InListPlugin;

impl ExpressionPlugin for InListPlugin {
    fn name(&self) -> &'static str {
        "IN"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        matches!(expr, sql_ast::Expr::InList { .. })
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        match expr {
            sql_ast::Expr::InList {
                expr,
                list,
                negated,
            } => {
                let list = list
                    .into_iter()
                    .map(|e| converter.convert(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::In {
                    expr: Box::new(converter.convert(*expr)?),
                    list,
                    negated,
                })
            }
            _ => unreachable!("InListPlugin called with non-IN expression"),
        }
    }
}
