//! Conversion of `sqlparser` expressions into query predicates.
//!
//! Each construct the query language accepts is handled by one
//! [`ExpressionPlugin`]; the [`ExpressionConverter`] dispatches to the first
//! plugin that claims an expression.

mod between;
mod boolean;
mod comparison;
mod function;
mod in_list;
mod is_null;
mod like;
mod negation;
mod nested;

pub(crate) use function::TIMESTAMP_FUNCTION;

use sqlparser::ast as sql_ast;

use crate::core::{Result, StorageError};
use crate::query::ast::{BinaryOp, Expr, Literal};

/// Converts one kind of `sqlparser` expression.
pub trait ExpressionPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, expr: &sql_ast::Expr) -> bool;

    fn convert(&self, expr: sql_ast::Expr, converter: &ExpressionConverter) -> Result<Expr>;
}

pub struct ExpressionPluginRegistry {
    plugins: Vec<Box<dyn ExpressionPlugin>>,
}

impl ExpressionPluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ExpressionPlugin>) {
        log::trace!("Registered expression plugin: {}", plugin.name());
        self.plugins.push(plugin);
    }

    pub fn with_default_plugins() -> Self {
        let mut registry = Self::new();
        // nested first so parentheses are unwrapped before anything else
        registry.register(Box::new(nested::NestedPlugin));
        registry.register(Box::new(function::FunctionPlugin));
        registry.register(Box::new(like::LikePlugin));
        registry.register(Box::new(between::BetweenPlugin));
        registry.register(Box::new(is_null::IsNullPlugin));
        registry.register(Box::new(negation::NegationPlugin));
        registry.register(Box::new(comparison::ComparisonPlugin));
        registry.register(Box::new(in_list::InListPlugin));
        registry.register(Box::new(boolean::BooleanPlugin));
        registry
    }

    pub fn find_plugin(&self, expr: &sql_ast::Expr) -> Option<&dyn ExpressionPlugin> {
        self.plugins
            .iter()
            .find(|plugin| plugin.can_handle(expr))
            .map(|boxed| &**boxed)
    }
}

impl Default for ExpressionPluginRegistry {
    fn default() -> Self {
        Self::with_default_plugins()
    }
}

pub struct ExpressionConverter {
    registry: ExpressionPluginRegistry,
}

impl ExpressionConverter {
    pub fn new() -> Self {
        Self {
            registry: ExpressionPluginRegistry::with_default_plugins(),
        }
    }

    pub fn with_custom_plugins(registry: ExpressionPluginRegistry) -> Self {
        Self { registry }
    }

    pub fn convert(&self, expr: sql_ast::Expr) -> Result<Expr> {
        match &expr {
            sql_ast::Expr::Identifier(ident) => {
                return Ok(Expr::Reference(ident.value.clone()));
            }
            sql_ast::Expr::CompoundIdentifier(idents) => {
                let parts: Vec<&str> = idents.iter().map(|i| i.value.as_str()).collect();
                return Ok(Expr::Reference(parts.join(".")));
            }
            sql_ast::Expr::Value(val) => {
                return Ok(Expr::Literal(self.convert_value(&val.value)?));
            }
            _ => {}
        }

        if let Some(plugin) = self.registry.find_plugin(&expr) {
            return plugin.convert(expr, self);
        }

        Err(StorageError::Query(format!("Unsupported expression: {}", expr)))
    }

    pub fn convert_value(&self, val: &sql_ast::Value) -> Result<Literal> {
        match val {
            sql_ast::Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(Literal::Integer(i))
                } else if let Ok(f) = n.parse::<f64>() {
                    Ok(Literal::Double(f))
                } else {
                    Err(StorageError::Query(format!("Invalid number: {}", n)))
                }
            }
            sql_ast::Value::SingleQuotedString(s) => Ok(Literal::String(s.clone())),
            sql_ast::Value::Boolean(b) => Ok(Literal::Boolean(*b)),
            _ => Err(StorageError::Query(format!("Unsupported literal: {}", val))),
        }
    }

    pub fn convert_binary_op(&self, op: &sql_ast::BinaryOperator) -> Result<BinaryOp> {
        use sql_ast::BinaryOperator as SqlOp;

        match op {
            SqlOp::Eq => Ok(BinaryOp::Eq),
            SqlOp::NotEq => Ok(BinaryOp::NotEq),
            SqlOp::Lt => Ok(BinaryOp::Lt),
            SqlOp::LtEq => Ok(BinaryOp::LtEq),
            SqlOp::Gt => Ok(BinaryOp::Gt),
            SqlOp::GtEq => Ok(BinaryOp::GtEq),
            SqlOp::And => Ok(BinaryOp::And),
            SqlOp::Or => Ok(BinaryOp::Or),
            SqlOp::PGStartsWith => Ok(BinaryOp::StartsWith),
            _ => Err(StorageError::Query(format!("Unsupported operator: {}", op))),
        }
    }
}

impl Default for ExpressionConverter {
    fn default() -> Self {
        Self::new()
    }
}
