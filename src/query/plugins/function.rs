use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlparser::ast as sql_ast;

use super::{ExpressionConverter, ExpressionPlugin};
use crate::core::{Result, StorageError, Value};
use crate::query::ast::{Expr, Literal};

/// Function name the parser gives `TIMESTAMP '...'` and `DATE '...'`
/// literals before handing the text to `sqlparser`.
pub(crate) const TIMESTAMP_FUNCTION: &str = "NX_TIMESTAMP";

pub struct FunctionPlugin;

impl ExpressionPlugin for FunctionPlugin {
    fn name(&self) -> &'static str {
        "FUNCTION"
    }

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool {
        matches!(expr, sql_ast::Expr::Function(_))
    }

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Function(func) => {
                let name = func.name.to_string().to_uppercase();
                let args = if let sql_ast::FunctionArguments::List(arg_list) = func.args {
                    arg_list
                        .args
                        .into_iter()
                        .map(|arg| match arg {
                            sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(e)) => {
                                converter.convert(e)
                            }
                            _ => Err(StorageError::Query(format!(
                                "Only plain arguments supported in function {}",
                                name
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?
                } else {
                    Vec::new()
                };

                if name == TIMESTAMP_FUNCTION {
                    return timestamp_literal(&args);
                }
                Ok(Expr::Function { name, args })
            }
            _ => unreachable!("FunctionPlugin called with non-function expression"),
        }
    }
}

fn timestamp_literal(args: &[Expr]) -> Result<Expr> {
    let [Expr::Literal(Literal::String(text))] = args else {
        return Err(StorageError::Query("Invalid date literal".into()));
    };
    parse_date(text)
        .map(|ts| Expr::Literal(Literal::Timestamp(ts)))
        .ok_or_else(|| StorageError::Query(format!("Invalid date literal: '{}'", text)))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` and `YYYY-MM-DD`, as UTC.
fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Some(ts) = Value::parse_timestamp(text) {
        return Some(ts);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
