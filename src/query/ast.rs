use std::fmt;

use chrono::{DateTime, Utc};

use crate::core::Value;

/// A document query: which types, which documents, in which order.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Document type names, `Document` matching every type
    pub from: Vec<String>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn from_type(type_name: impl Into<String>) -> Self {
        Self {
            from: vec![type_name.into()],
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn from_types(type_names: &[&str]) -> Self {
        Self {
            from: type_names.iter().map(|t| t.to_string()).collect(),
            ..Self::from_type("")
        }
    }

    /// ANDs a predicate with the current WHERE clause.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, reference: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderByExpr {
            reference: reference.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.from.join(", "))?;
        if let Some(expr) = &self.where_clause {
            write!(f, " WHERE {}", expr)?;
        }
        if !self.order_by.is_empty() {
            let orders: Vec<String> = self.order_by.iter().map(|o| o.to_string()).collect();
            write!(f, " ORDER BY {}", orders.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if self.offset > 0 {
            write!(f, " OFFSET {}", self.offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub reference: String,
    pub descending: bool,
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} DESC", self.reference)
        } else {
            write!(f, "{}", self.reference)
        }
    }
}

/// Predicate tree of a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Property or pseudo-field, e.g. `dc:title` or `ecm:path`
    Reference(String),
    Literal(Literal),
    /// Kept so the compiler can reject it with a precise message
    Function { name: String, args: Vec<Expr> },
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(Literal::String(s.into()))
    }

    pub fn integer(i: i64) -> Self {
        Self::Literal(Literal::Integer(i))
    }

    fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Self::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn and(self, right: Expr) -> Self {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    pub fn starts_with(self, path: impl Into<String>) -> Self {
        self.binary(BinaryOp::StartsWith, Expr::string(path))
    }

    pub fn like(self, pattern: impl Into<String>) -> Self {
        Self::Like {
            expr: Box::new(self),
            pattern: Box::new(Expr::string(pattern)),
            negated: false,
            case_insensitive: false,
        }
    }

    pub fn in_list(self, list: Vec<Expr>) -> Self {
        Self::In {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn is_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// Visits this node and every node below it, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Self::Reference(_) | Self::Literal(_) => {}
            Self::Function { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            Self::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Self::Not(expr) => expr.walk(visit),
            Self::Like { expr, pattern, .. } => {
                expr.walk(visit);
                pattern.walk(visit);
            }
            Self::Between { expr, low, high, .. } => {
                expr.walk(visit);
                low.walk(visit);
                high.walk(visit);
            }
            Self::In { expr, list, .. } => {
                expr.walk(visit);
                list.iter().for_each(|e| e.walk(visit));
            }
            Self::IsNull { expr, .. } => expr.walk(visit),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Reference(name) => write!(f, "{}", name),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Function { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
            Expr::BinaryOp { left, op, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Not(expr) => write!(f, "NOT {}", expr),
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => write!(
                f,
                "{} {}{} {}",
                expr,
                if *negated { "NOT " } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                pattern
            ),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::In { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{} {}IN ({})",
                    expr,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    /// Path prefix test, only valid on `ecm:path`
    StartsWith,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        !matches!(self, Self::And | Self::Or | Self::StartsWith)
    }

    /// SQL spelling of a comparison or boolean operator.
    pub fn sql(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::StartsWith => "STARTSWITH",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Literal {
    /// Bind value of the literal.
    pub fn to_value(&self) -> Value {
        match self {
            Literal::String(s) => Value::String(s.clone()),
            Literal::Integer(i) => Value::Long(*i),
            Literal::Double(d) => Value::Double(*d),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Timestamp(t) => Value::Timestamp(*t),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Double(d) => write!(f, "{}", d),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Timestamp(t) => write!(f, "TIMESTAMP '{}'", Value::format_timestamp(t)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_display() {
        let query = Query::from_type("File")
            .filter(Expr::reference("dc:title").eq(Expr::string("it's")))
            .filter(Expr::reference("ecm:path").starts_with("/a"))
            .order_by("dc:title", true)
            .limit(10)
            .offset(5);
        assert_eq!(
            query.to_string(),
            "SELECT * FROM File WHERE ((dc:title = 'it''s') AND (ecm:path STARTSWITH '/a')) \
             ORDER BY dc:title DESC LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn test_walk_visits_every_reference() {
        let expr = Expr::reference("a")
            .eq(Expr::integer(1))
            .or(Expr::reference("b").in_list(vec![Expr::string("x")]));
        let mut refs = Vec::new();
        expr.walk(&mut |e| {
            if let Expr::Reference(name) = e {
                refs.push(name.as_str());
            }
        });
        assert_eq!(refs, vec!["a", "b"]);
    }
}
