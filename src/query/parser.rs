//! Text front end of the query language.
//!
//! Queries look like SQL with prefixed property names:
//!
//! ```text
//! SELECT * FROM File WHERE dc:title LIKE 'a%' AND ecm:path STARTSWITH '/ws'
//!   ORDER BY dc:title DESC LIMIT 10 OFFSET 20
//! ```
//!
//! Prefixed names, `STARTSWITH` and date literals are rewritten into plain
//! SQL before the text is handed to `sqlparser`.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use super::ast::{OrderByExpr, Query};
use super::plugins::ExpressionConverter;
use crate::core::{Result, StorageError};
use crate::query::ast::Expr;

lazy_static! {
    // string literals are matched first so their content is never rewritten
    static ref TOKEN: Regex = Regex::new(
        r"(?i)(?P<string>'(?:[^']|'')*')|\b(?P<date>DATE|TIMESTAMP)\s*(?P<date_text>'(?:[^']|'')*')|\b(?P<startswith>STARTSWITH)\b|(?P<prefixed>\b[A-Za-z_][A-Za-z0-9_]*:[A-Za-z_][A-Za-z0-9_:.\-]*)"
    )
    .unwrap();
}

pub struct NxqlParser {
    dialect: PostgreSqlDialect,
    expr_converter: ExpressionConverter,
}

impl NxqlParser {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
            expr_converter: ExpressionConverter::new(),
        }
    }

    pub fn with_expression_converter(expr_converter: ExpressionConverter) -> Self {
        Self {
            dialect: PostgreSqlDialect {},
            expr_converter,
        }
    }

    pub fn parse(&self, text: &str) -> Result<Query> {
        let sql = prepare(text);
        log::debug!("Parsing query: {}", sql);
        let mut statements = Parser::parse_sql(&self.dialect, &sql)
            .map_err(|e| StorageError::Query(format!("Syntax error in '{}': {}", text, e)))?;
        if statements.len() != 1 {
            return Err(StorageError::Query(format!(
                "Expected one query, got {}",
                statements.len()
            )));
        }
        match statements.remove(0) {
            sql_ast::Statement::Query(query) => self.convert_query(*query),
            other => Err(StorageError::Query(format!("Not a query: {}", other))),
        }
    }

    fn convert_query(&self, query: sql_ast::Query) -> Result<Query> {
        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(StorageError::Query("Only simple SELECT queries supported".into()));
        };

        let mut from = Vec::new();
        for table in select.from {
            if !table.joins.is_empty() {
                return Err(StorageError::Query("Joins are not supported".into()));
            }
            match table.relation {
                sql_ast::TableFactor::Table { name, .. } => from.push(extract_type_name(&name)?),
                other => {
                    return Err(StorageError::Query(format!("Unsupported FROM item: {}", other)));
                }
            }
        }
        if from.is_empty() {
            return Err(StorageError::Query("Missing FROM clause".into()));
        }

        let where_clause = select
            .selection
            .map(|expr| self.expr_converter.convert(expr))
            .transpose()?;

        let order_by = self.convert_order_by(query.order_by)?;
        let (limit, offset) = self.convert_limit_clause(query.limit_clause)?;

        Ok(Query {
            from,
            where_clause,
            order_by,
            limit,
            offset: offset.unwrap_or(0),
        })
    }

    fn convert_order_by(&self, order_by: Option<sql_ast::OrderBy>) -> Result<Vec<OrderByExpr>> {
        let Some(order_by) = order_by else {
            return Ok(Vec::new());
        };
        match order_by.kind {
            sql_ast::OrderByKind::Expressions(exprs) => exprs
                .into_iter()
                .map(|order| {
                    let descending = order.options.asc.map(|asc| !asc).unwrap_or(false);
                    match self.expr_converter.convert(order.expr)? {
                        Expr::Reference(reference) => Ok(OrderByExpr {
                            reference,
                            descending,
                        }),
                        other => Err(StorageError::Query(format!("Cannot order by: {}", other))),
                    }
                })
                .collect(),
            sql_ast::OrderByKind::All(_) => {
                Err(StorageError::Query("ORDER BY ALL not supported".into()))
            }
        }
    }

    fn convert_limit_clause(
        &self,
        limit_clause: Option<sql_ast::LimitClause>,
    ) -> Result<(Option<usize>, Option<usize>)> {
        let Some(clause) = limit_clause else {
            return Ok((None, None));
        };
        match clause {
            sql_ast::LimitClause::LimitOffset { limit, offset, .. } => {
                let limit = limit.as_ref().map(extract_number).transpose()?;
                let offset = offset.as_ref().map(|o| extract_number(&o.value)).transpose()?;
                Ok((limit, offset))
            }
            sql_ast::LimitClause::OffsetCommaLimit { offset, limit } => {
                Ok((Some(extract_number(&limit)?), Some(extract_number(&offset)?)))
            }
        }
    }
}

impl Default for NxqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrites query text into SQL `sqlparser` accepts.
fn prepare(text: &str) -> String {
    TOKEN
        .replace_all(text, |caps: &Captures| {
            if let Some(s) = caps.name("string") {
                s.as_str().to_string()
            } else if let Some(date_text) = caps.name("date_text") {
                format!("{}({})", super::plugins::TIMESTAMP_FUNCTION, date_text.as_str())
            } else if caps.name("startswith").is_some() {
                "^@".to_string()
            } else {
                format!("\"{}\"", &caps["prefixed"])
            }
        })
        .into_owned()
}

fn extract_type_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|part| part.to_string().trim_matches('"').to_string())
        .ok_or_else(|| StorageError::Query("Invalid type name".into()))
}

fn extract_number(expr: &sql_ast::Expr) -> Result<usize> {
    match expr {
        sql_ast::Expr::Value(value_with_span) => match &value_with_span.value {
            sql_ast::Value::Number(n, _) => n
                .parse::<usize>()
                .map_err(|_| StorageError::Query(format!("Invalid number: {}", n))),
            other => Err(StorageError::Query(format!("Expected a number, got: {}", other))),
        },
        other => Err(StorageError::Query(format!("Expected a number, got: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{BinaryOp, Literal};

    #[test]
    fn test_prepare_quotes_prefixed_names_outside_strings() {
        assert_eq!(
            prepare("SELECT * FROM File WHERE dc:title = 'dc:title' AND ecm:path STARTSWITH '/a'"),
            "SELECT * FROM File WHERE \"dc:title\" = 'dc:title' AND \"ecm:path\" ^@ '/a'"
        );
        assert_eq!(
            prepare("x = DATE '2008-01-01'"),
            "x = NX_TIMESTAMP('2008-01-01')"
        );
    }

    #[test]
    fn test_parse_full_query() {
        let query = NxqlParser::new()
            .parse(
                "SELECT * FROM File, Note WHERE dc:title LIKE 'a%' AND NOT ecm:isProxy = 1 \
                 ORDER BY dc:title DESC, ecm:name LIMIT 10 OFFSET 20",
            )
            .unwrap();
        assert_eq!(query.from, vec!["File", "Note"]);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, 20);
        assert_eq!(query.order_by.len(), 2);
        assert!(query.order_by[0].descending);
        assert_eq!(query.order_by[1].reference, "ecm:name");
        let Some(Expr::BinaryOp { left, op, right }) = query.where_clause else {
            panic!("expected AND");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(*left, Expr::Like { negated: false, .. }));
        assert!(matches!(*right, Expr::Not(_)));
    }

    #[test]
    fn test_parse_startswith_and_dates() {
        let query = NxqlParser::new()
            .parse("SELECT * FROM Document WHERE ecm:path STARTSWITH '/ws' AND dc:created > TIMESTAMP '2008-01-01 10:00:00'")
            .unwrap();
        let mut ops = Vec::new();
        let mut timestamps = 0;
        let where_clause = query.where_clause.unwrap();
        where_clause.walk(&mut |e| match e {
            Expr::BinaryOp { op, .. } => ops.push(*op),
            Expr::Literal(Literal::Timestamp(_)) => timestamps += 1,
            _ => {}
        });
        assert!(ops.contains(&BinaryOp::StartsWith));
        assert_eq!(timestamps, 1);
    }

    #[test]
    fn test_negative_numbers_and_in_lists() {
        let query = NxqlParser::new()
            .parse("SELECT * FROM File WHERE my:count IN (-1, 2) AND my:size BETWEEN 1 AND 5")
            .unwrap();
        let text = query.where_clause.unwrap().to_string();
        assert_eq!(text, "(my:count IN (-1, 2) AND my:size BETWEEN 1 AND 5)");
    }

    #[test]
    fn test_between_takes_a_property_and_literal_bounds() {
        let parser = NxqlParser::new();
        let query = parser
            .parse("SELECT * FROM File WHERE dc:created NOT BETWEEN DATE '2008-01-01' AND DATE '2009-01-01'")
            .unwrap();
        let Some(Expr::Between { expr, low, high, negated }) = query.where_clause else {
            panic!("expected BETWEEN");
        };
        assert!(negated);
        assert_eq!(*expr, Expr::Reference("dc:created".to_string()));
        assert!(matches!(*low, Expr::Literal(_)));
        assert!(matches!(*high, Expr::Literal(_)));

        for text in [
            "SELECT * FROM File WHERE 3 BETWEEN 1 AND 5",
            "SELECT * FROM File WHERE my:size BETWEEN my:min AND 5",
        ] {
            assert!(matches!(parser.parse(text), Err(StorageError::Query(_))), "{}", text);
        }
    }

    #[test]
    fn test_functions_are_kept_for_the_compiler() {
        let query = NxqlParser::new()
            .parse("SELECT * FROM File WHERE LOWER(dc:title) = 'x'")
            .unwrap();
        let mut functions = 0;
        query.where_clause.unwrap().walk(&mut |e| {
            if matches!(e, Expr::Function { .. }) {
                functions += 1;
            }
        });
        assert_eq!(functions, 1);
    }

    #[test]
    fn test_syntax_errors() {
        let parser = NxqlParser::new();
        assert!(matches!(parser.parse("SELECT FROM"), Err(StorageError::Query(_))));
        assert!(matches!(
            parser.parse("DELETE FROM File"),
            Err(StorageError::Query(_))
        ));
        assert!(matches!(
            parser.parse("SELECT * FROM File WHERE dc:title = NULL"),
            Err(StorageError::Query(_))
        ));
    }
}
