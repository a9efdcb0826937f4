//! Compiles a [`Query`] into one SQL select over the hierarchy table.
//!
//! The generated statement has this shape when proxies are considered:
//!
//! ```text
//! SELECT DISTINCT "_nxhier"."id"
//!   FROM "hierarchy" "_nxhier"
//!   LEFT JOIN "proxies" ON "proxies"."id" = "_nxhier"."id"
//!   JOIN "hierarchy" ON ("hierarchy"."id" = "_nxhier"."id" OR "hierarchy"."id" = "proxies"."targetid")
//!   LEFT JOIN "dublincore" ON "hierarchy"."id" = "dublincore"."id"
//!  WHERE "hierarchy"."primarytype" IN (?, ?)
//!    AND (("dublincore"."title" = ?))
//!    AND <access check on "_nxhier"."id">
//! ```
//!
//! A document matches when either its own data or, for a proxy, the data of
//! its target satisfies the predicate. Without proxies the hierarchy table is
//! used directly.

use std::collections::BTreeSet;

use super::ast::{BinaryOp, Expr, Literal, OrderByExpr, Query};
use super::filter::{FACET_IMMUTABLE, QueryFilter};
use crate::core::{Id, Result, StorageError, Value};
use crate::model::{
    COLL_TABLE_VALUE_KEY, DOCUMENT_TYPE, HIER_CHILD_NAME_KEY, HIER_PARENT_KEY, HIER_TABLE_NAME,
    MAIN_KEY, MAIN_PRIMARY_TYPE_KEY, MISC_LIFECYCLE_STATE_PROP, Model, PROXY_TABLE_NAME,
    PROXY_TARGET_KEY, ROOT_TYPE, VERSION_LABEL_PROP, VERSION_TABLE_NAME,
};
use crate::sql::SqlInfo;

pub const ECM_PREFIX: &str = "ecm:";
pub const ECM_UUID: &str = "ecm:uuid";
pub const ECM_PATH: &str = "ecm:path";
pub const ECM_NAME: &str = "ecm:name";
pub const ECM_PARENTID: &str = "ecm:parentId";
pub const ECM_MIXINTYPE: &str = "ecm:mixinType";
pub const ECM_PRIMARYTYPE: &str = "ecm:primaryType";
pub const ECM_ISPROXY: &str = "ecm:isProxy";
pub const ECM_ISVERSION: &str = "ecm:isCheckedInVersion";
pub const ECM_LIFECYCLESTATE: &str = "ecm:currentLifeCycleState";
pub const ECM_VERSIONLABEL: &str = "ecm:versionLabel";

const HIER_ALIAS: &str = "_nxhier";

/// A compiled query, ready for the mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Resolves a path to a node id for `STARTSWITH`.
pub type PathResolver<'r> = dyn FnMut(&str) -> Result<Option<Id>> + 'r;

pub struct QueryMaker<'a> {
    model: &'a Model,
    sql_info: &'a SqlInfo,
    filter: &'a QueryFilter,
    proxies_in_queries: bool,
}

impl<'a> QueryMaker<'a> {
    pub fn new(model: &'a Model, sql_info: &'a SqlInfo, filter: &'a QueryFilter) -> Self {
        Self {
            model,
            sql_info,
            filter,
            proxies_in_queries: true,
        }
    }

    /// Whether every query considers proxies, or only queries that mention
    /// `ecm:isProxy`.
    pub fn proxies_in_queries(mut self, enabled: bool) -> Self {
        self.proxies_in_queries = enabled;
        self
    }

    /// Compiles the query. `None` means it cannot match anything, for
    /// instance because its type restrictions contradict each other.
    pub fn make_query(
        &self,
        query: &Query,
        resolve_path: &mut PathResolver<'_>,
    ) -> Result<Option<CompiledQuery>> {
        let mut info = QueryAnalyzer::new(self.model);
        info.visit_query(query)?;
        if info.cannot_match {
            log::debug!("Query cannot match: {}", query);
            return Ok(None);
        }

        // Types from the FROM list, restricted by toplevel type predicates
        let mut types = BTreeSet::new();
        for type_name in &query.from {
            let type_name = if type_name == "document" {
                DOCUMENT_TYPE
            } else {
                type_name.as_str()
            };
            let Some(sub_types) = self.model.document_sub_types(type_name) else {
                return Err(StorageError::Query(format!("Unknown type: {}", type_name)));
            };
            types.extend(sub_types.iter().cloned());
        }
        types.remove(ROOT_TYPE);
        for excluded in &info.types_excluded {
            types.remove(excluded);
        }
        if let Some(required) = &info.types_any_required {
            types.retain(|t| required.contains(t));
        }
        if types.is_empty() {
            return Ok(None);
        }

        // Facet filter merged into the mixin restrictions
        let facet_filter = &self.filter.facet_filter;
        info.mixins_excluded.extend(facet_filter.excluded.iter().cloned());
        if info.mixins_excluded.remove(FACET_IMMUTABLE) {
            if info.immutable == Some(true) {
                return Ok(None);
            }
            info.immutable = Some(false);
        }
        info.mixins_all_required.extend(facet_filter.required.iter().cloned());
        if info.mixins_all_required.remove(FACET_IMMUTABLE) {
            if info.immutable == Some(false) {
                return Ok(None);
            }
            info.immutable = Some(true);
        }

        // Tables to join
        let mut fragment_names = BTreeSet::new();
        for prop in &info.props {
            let Some(property) = self.model.property_info(prop) else {
                return Err(StorageError::Query(format!("Unknown field: {}", prop)));
            };
            fragment_names.insert(property.fragment.clone());
        }
        fragment_names.remove(HIER_TABLE_NAME);

        if info.proxy == Some(true) {
            if info.immutable == Some(false) {
                return Ok(None);
            }
            info.immutable = None;
        }
        let consider_proxies = info.proxy != Some(false)
            && info.immutable != Some(false)
            && (self.proxies_in_queries
                || info.references_is_proxy
                || info.proxy == Some(true)
                || info.immutable == Some(true));
        if info.needs_versions || info.immutable.is_some() {
            fragment_names.insert(VERSION_TABLE_NAME.to_string());
        }

        let dialect = self.sql_info.dialect();
        let hier = self.sql_info.table(HIER_TABLE_NAME);
        let joined_hier = hier.quoted_name(dialect);
        let joined_hier_id = hier.qualified(dialect, MAIN_KEY);
        let (hier_table, hier_id, mut from) = if consider_proxies {
            let alias = dialect.quote(HIER_ALIAS);
            let alias_id = format!("{}.{}", alias, dialect.quote(MAIN_KEY));
            let proxies = self.sql_info.table(PROXY_TABLE_NAME);
            let from = format!(
                "{hier} {alias} LEFT JOIN {proxies} ON {proxies_id} = {alias_id} JOIN {hier} ON ({joined_id} = {alias_id} OR {joined_id} = {target})",
                hier = joined_hier,
                alias = alias,
                proxies = proxies.quoted_name(dialect),
                proxies_id = proxies.qualified(dialect, MAIN_KEY),
                alias_id = alias_id,
                joined_id = joined_hier_id,
                target = proxies.qualified(dialect, PROXY_TARGET_KEY),
            );
            (alias, alias_id, from)
        } else {
            (joined_hier.clone(), joined_hier_id.clone(), joined_hier.clone())
        };
        for fragment in &fragment_names {
            let table = self.sql_info.table(fragment);
            // versions are not reached through proxies
            let join_id = if fragment == VERSION_TABLE_NAME {
                &hier_id
            } else {
                &joined_hier_id
            };
            from.push_str(&format!(
                " LEFT JOIN {} ON {} = {}",
                table.quoted_name(dialect),
                join_id,
                table.qualified(dialect, MAIN_KEY)
            ));
        }

        // Types surviving the facet restrictions
        let mut where_clauses = Vec::new();
        let mut params = Vec::new();
        let mut type_marks = Vec::new();
        for type_name in &types {
            let has = |facet: &str| self.model.document_type_has_facet(type_name, facet);
            if info.mixins_excluded.iter().any(|f| has(f)) {
                continue;
            }
            if !info.mixins_all_required.iter().all(|f| has(f)) {
                continue;
            }
            if !info.mixins_any_required.is_empty() && !info.mixins_any_required.iter().any(|f| has(f)) {
                continue;
            }
            type_marks.push("?");
            params.push(Value::from(type_name.as_str()));
        }
        if type_marks.is_empty() {
            return Ok(None);
        }
        where_clauses.push(format!(
            "{} IN ({})",
            hier.qualified(dialect, MAIN_PRIMARY_TYPE_KEY),
            type_marks.join(", ")
        ));

        // Proxy and version restrictions
        let proxies_id = self.sql_info.table(PROXY_TABLE_NAME).qualified(dialect, MAIN_KEY);
        let versions_id = self.sql_info.table(VERSION_TABLE_NAME).qualified(dialect, MAIN_KEY);
        if info.proxy == Some(true) {
            where_clauses.push(format!("{} IS NOT NULL", proxies_id));
        }
        if let Some(immutable) = info.immutable {
            let version = format!("{} IS {}NULL", versions_id, if immutable { "NOT " } else { "" });
            if info.proxy.is_none() && immutable {
                where_clauses.push(format!("({} OR {} IS NOT NULL)", version, proxies_id));
            } else {
                where_clauses.push(version);
            }
        }

        // The remaining predicate
        let mut builder = WhereBuilder {
            maker: self,
            hier_table: &hier_table,
            hier_id: &hier_id,
            joined_hier: &joined_hier,
            consider_proxies,
            resolve_path,
            buf: String::new(),
            params: Vec::new(),
            uses_tree: false,
        };
        if !info.toplevel_operands.is_empty() {
            for (i, operand) in info.toplevel_operands.iter().enumerate() {
                if i > 0 {
                    builder.buf.push_str(" AND ");
                }
                builder.visit(operand)?;
            }
            where_clauses.push(std::mem::take(&mut builder.buf));
            params.append(&mut builder.params);
        }

        // Security
        let mut uses_tree = builder.uses_tree;
        if self.filter.checks_security() {
            let (predicate, security_params) = dialect.access_allowed_sql(
                &hier_id,
                &self.filter.principals,
                &self.filter.permissions,
            );
            where_clauses.push(predicate);
            params.extend(security_params);
            uses_tree = true;
        }

        // Order by
        let mut order_columns = Vec::new();
        let mut orders = Vec::new();
        for OrderByExpr { reference, descending } in &query.order_by {
            let column = builder.column(reference)?;
            orders.push(if *descending {
                format!("{} DESC", column)
            } else {
                column.clone()
            });
            order_columns.push(column);
        }

        let distinct = consider_proxies || info.needs_distinct;
        let mut what = hier_id.clone();
        if distinct {
            what = format!("DISTINCT {}", what);
            if dialect.needs_order_by_keys_after_distinct() {
                for column in &order_columns {
                    what.push_str(", ");
                    what.push_str(column);
                }
            }
        }

        let mut sql = String::new();
        if uses_tree {
            if let Some(prelude) = dialect.query_prelude() {
                sql.push_str(&prelude);
                sql.push(' ');
            }
        }
        sql.push_str(&format!(
            "SELECT {} FROM {} WHERE {}",
            what,
            from,
            where_clauses.join(" AND ")
        ));
        if !orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        log::debug!("Compiled query {} into {}", query, sql);

        Ok(Some(CompiledQuery {
            sql,
            params,
            limit: query.limit,
            offset: query.offset,
        }))
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// What the query touches, with the toplevel type, facet and proxy
/// predicates pulled out of the WHERE clause.
struct QueryAnalyzer<'q> {
    model: &'q Model,
    /// Properties whose tables must be joined
    props: BTreeSet<String>,
    needs_versions: bool,
    needs_distinct: bool,
    references_is_proxy: bool,
    types_any_required: Option<BTreeSet<String>>,
    types_excluded: BTreeSet<String>,
    mixins_any_required: BTreeSet<String>,
    mixins_all_required: BTreeSet<String>,
    mixins_excluded: BTreeSet<String>,
    immutable: Option<bool>,
    proxy: Option<bool>,
    toplevel_operands: Vec<&'q Expr>,
    cannot_match: bool,
}

impl<'q> QueryAnalyzer<'q> {
    fn new(model: &'q Model) -> Self {
        Self {
            model,
            props: BTreeSet::new(),
            needs_versions: false,
            needs_distinct: false,
            references_is_proxy: false,
            types_any_required: None,
            types_excluded: BTreeSet::new(),
            mixins_any_required: BTreeSet::new(),
            mixins_all_required: BTreeSet::new(),
            mixins_excluded: BTreeSet::new(),
            immutable: None,
            proxy: None,
            toplevel_operands: Vec::new(),
            cannot_match: false,
        }
    }

    fn visit_query(&mut self, query: &'q Query) -> Result<()> {
        if let Some(expr) = &query.where_clause {
            self.analyze_toplevel(expr)?;
            let mut result = Ok(());
            for operand in self.toplevel_operands.clone() {
                operand.walk(&mut |e| {
                    if result.is_ok() {
                        result = self.visit_expr(e);
                    }
                });
            }
            result?;
        }
        for order in &query.order_by {
            self.visit_reference(&order.reference, true)?;
        }
        Ok(())
    }

    fn analyze_toplevel(&mut self, expr: &'q Expr) -> Result<()> {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOp::And,
                right,
            } => {
                self.analyze_toplevel(left)?;
                return self.analyze_toplevel(right);
            }
            Expr::BinaryOp {
                left,
                op: op @ (BinaryOp::Eq | BinaryOp::NotEq),
                right,
            } => {
                let is_eq = *op == BinaryOp::Eq;
                if let Some((name, literal)) = reference_and_literal(left, right) {
                    match (name, literal) {
                        (ECM_PRIMARYTYPE, Literal::String(value)) => {
                            self.restrict_types(BTreeSet::from([value.clone()]), is_eq);
                            return Ok(());
                        }
                        (ECM_MIXINTYPE, Literal::String(value)) => {
                            self.restrict_mixins(BTreeSet::from([value.clone()]), is_eq, true)?;
                            return Ok(());
                        }
                        (ECM_ISPROXY, Literal::Integer(v)) => {
                            if *v != 0 && *v != 1 {
                                return Err(StorageError::Query(format!(
                                    "{} requires literal 0 or 1 as right argument",
                                    ECM_ISPROXY
                                )));
                            }
                            self.references_is_proxy = true;
                            self.set_proxy(is_eq == (*v == 1));
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
            Expr::In {
                expr: inner,
                list,
                negated,
            } => {
                if let Expr::Reference(name) = inner.as_ref() {
                    if name == ECM_PRIMARYTYPE || name == ECM_MIXINTYPE {
                        let mut values = BTreeSet::new();
                        for item in list {
                            let Expr::Literal(Literal::String(value)) = item else {
                                return Err(StorageError::Query(format!(
                                    "{} IN requires string literals",
                                    name
                                )));
                            };
                            values.insert(value.clone());
                        }
                        if name == ECM_PRIMARYTYPE {
                            self.restrict_types(values, !negated);
                        } else {
                            self.restrict_mixins(values, !negated, false)?;
                        }
                        return Ok(());
                    }
                }
            }
            _ => {}
        }
        self.toplevel_operands.push(expr);
        Ok(())
    }

    fn restrict_types(&mut self, values: BTreeSet<String>, required: bool) {
        if !required {
            self.types_excluded.extend(values);
            return;
        }
        let merged = match self.types_any_required.take() {
            None => values,
            Some(existing) => existing.intersection(&values).cloned().collect(),
        };
        if merged.is_empty() {
            self.cannot_match = true;
        }
        self.types_any_required = Some(merged);
    }

    /// `single` is an `=`/`<>` test, which requires all its facets;
    /// otherwise an IN list, which requires any of them.
    fn restrict_mixins(&mut self, mut values: BTreeSet<String>, required: bool, single: bool) -> Result<()> {
        if values.remove(FACET_IMMUTABLE) {
            if self.immutable.is_some_and(|im| im != required) {
                self.cannot_match = true;
            }
            self.immutable = Some(required);
            self.needs_versions = true;
        }
        if !required {
            self.mixins_excluded.extend(values);
        } else if single {
            self.mixins_all_required.extend(values);
        } else if !values.is_empty() {
            if !self.mixins_any_required.is_empty() {
                return Err(StorageError::Query(format!(
                    "{} cannot have more than one IN clause",
                    ECM_MIXINTYPE
                )));
            }
            self.mixins_any_required = values;
        }
        Ok(())
    }

    fn set_proxy(&mut self, proxy: bool) {
        if self.proxy.is_some_and(|p| p != proxy) {
            self.cannot_match = true;
        }
        self.proxy = Some(proxy);
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Reference(name) => self.visit_reference(name, false),
            Expr::Function { .. } => Err(StorageError::Query(format!("Function not supported: {}", expr))),
            _ => Ok(()),
        }
    }

    fn visit_reference(&mut self, name: &str, in_order_by: bool) -> Result<()> {
        match name {
            ECM_PATH | ECM_ISPROXY | ECM_ISVERSION if in_order_by => {
                Err(StorageError::Query(format!("Cannot order by: {}", name)))
            }
            ECM_PATH => Ok(()),
            ECM_ISPROXY => {
                self.references_is_proxy = true;
                Ok(())
            }
            ECM_ISVERSION => {
                self.needs_versions = true;
                Ok(())
            }
            ECM_PRIMARYTYPE | ECM_MIXINTYPE | ECM_UUID | ECM_NAME | ECM_PARENTID => Ok(()),
            ECM_LIFECYCLESTATE => {
                self.props.insert(MISC_LIFECYCLE_STATE_PROP.to_string());
                Ok(())
            }
            ECM_VERSIONLABEL => {
                self.props.insert(VERSION_LABEL_PROP.to_string());
                Ok(())
            }
            _ if name.starts_with(ECM_PREFIX) => {
                Err(StorageError::Query(format!("Unknown field: {}", name)))
            }
            _ => {
                let Some(property) = self.model.property_info(name) else {
                    return Err(StorageError::Query(format!("Unknown field: {}", name)));
                };
                if property.multi {
                    if in_order_by {
                        return Err(StorageError::Query(format!(
                            "Cannot use collection {} in ORDER BY",
                            name
                        )));
                    }
                    // one row per item of the collection
                    self.needs_distinct = true;
                }
                self.props.insert(name.to_string());
                Ok(())
            }
        }
    }
}

/// `(name, literal)` for `reference OP literal` or `literal OP reference`.
fn reference_and_literal<'e>(left: &'e Expr, right: &'e Expr) -> Option<(&'e str, &'e Literal)> {
    match (left, right) {
        (Expr::Reference(name), Expr::Literal(lit)) | (Expr::Literal(lit), Expr::Reference(name)) => {
            Some((name.as_str(), lit))
        }
        _ => None,
    }
}

// ============================================================================
// WHERE clause
// ============================================================================

struct WhereBuilder<'m, 'b, 'r> {
    maker: &'b QueryMaker<'m>,
    /// Table returning the ids, possibly the alias
    hier_table: &'b str,
    hier_id: &'b str,
    /// Table holding the data being matched
    joined_hier: &'b str,
    consider_proxies: bool,
    resolve_path: &'b mut PathResolver<'r>,
    buf: String,
    params: Vec<Value>,
    uses_tree: bool,
}

impl WhereBuilder<'_, '_, '_> {
    fn visit(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::BinaryOp { left, op, right } => {
                self.buf.push('(');
                let name = match left.as_ref() {
                    Expr::Reference(name) => Some(name.as_str()),
                    _ => None,
                };
                if *op == BinaryOp::StartsWith {
                    if name != Some(ECM_PATH) {
                        return Err(StorageError::Query(format!(
                            "STARTSWITH requires {} as left argument",
                            ECM_PATH
                        )));
                    }
                    self.visit_starts_with(right)?;
                } else if name == Some(ECM_ISPROXY) {
                    self.visit_is_proxy(*op, right)?;
                } else if name == Some(ECM_ISVERSION) {
                    self.visit_is_version(*op, right)?;
                } else {
                    self.visit(left)?;
                    self.buf.push(' ');
                    self.buf.push_str(op.sql());
                    self.buf.push(' ');
                    self.visit(right)?;
                }
                self.buf.push(')');
            }
            Expr::Not(inner) => {
                self.buf.push_str("(NOT ");
                self.visit(inner)?;
                self.buf.push(')');
            }
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                self.buf.push('(');
                if *case_insensitive {
                    self.buf.push_str("LOWER(");
                    self.visit(expr)?;
                    self.buf.push(')');
                } else {
                    self.visit(expr)?;
                }
                self.buf.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                if *case_insensitive {
                    self.buf.push_str("LOWER(");
                    self.visit(pattern)?;
                    self.buf.push(')');
                } else {
                    self.visit(pattern)?;
                }
                self.buf.push(')');
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.buf.push('(');
                self.visit(expr)?;
                self.buf.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                self.visit(low)?;
                self.buf.push_str(" AND ");
                self.visit(high)?;
                self.buf.push(')');
            }
            Expr::In { expr, list, negated } => {
                self.buf.push('(');
                self.visit(expr)?;
                self.buf.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        self.buf.push_str(", ");
                    }
                    self.visit(item)?;
                }
                self.buf.push_str("))");
            }
            Expr::IsNull { expr, negated } => {
                self.buf.push('(');
                self.visit(expr)?;
                self.buf.push_str(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            Expr::Reference(name) => {
                let column = self.column(name)?;
                self.buf.push_str(&column);
            }
            Expr::Literal(literal) => {
                self.buf.push('?');
                self.params.push(literal.to_value());
            }
            Expr::Function { .. } => {
                return Err(StorageError::Query(format!("Function not supported: {}", expr)));
            }
        }
        Ok(())
    }

    fn visit_starts_with(&mut self, right: &Expr) -> Result<()> {
        let Expr::Literal(Literal::String(path)) = right else {
            return Err(StorageError::Query(
                "STARTSWITH requires literal path as right argument".into(),
            ));
        };
        let mut path = path.as_str();
        if path.len() > 1 && path.ends_with('/') {
            path = &path[..path.len() - 1];
        }
        match (self.resolve_path)(path)? {
            None => self.buf.push_str("0 = 1"),
            Some(id) => {
                let dialect = self.maker.sql_info.dialect();
                let (predicate, params) = dialect.in_tree_sql(self.hier_id, Value::from(id));
                self.buf.push_str(&predicate);
                self.params.extend(params);
                self.uses_tree = true;
            }
        }
        Ok(())
    }

    fn flag_operand(name: &str, op: BinaryOp, right: &Expr) -> Result<bool> {
        if op != BinaryOp::Eq && op != BinaryOp::NotEq {
            return Err(StorageError::Query(format!("{} requires = or <> operator", name)));
        }
        match right {
            Expr::Literal(Literal::Integer(v @ (0 | 1))) => Ok((op == BinaryOp::Eq) ^ (*v == 0)),
            _ => Err(StorageError::Query(format!(
                "{} requires literal 0 or 1 as right argument",
                name
            ))),
        }
    }

    fn visit_is_proxy(&mut self, op: BinaryOp, right: &Expr) -> Result<()> {
        let proxy = Self::flag_operand(ECM_ISPROXY, op, right)?;
        if self.consider_proxies {
            let dialect = self.maker.sql_info.dialect();
            let column = self.maker.sql_info.table(PROXY_TABLE_NAME).qualified(dialect, MAIN_KEY);
            self.buf.push_str(&column);
            self.buf.push_str(if proxy { " IS NOT NULL" } else { " IS NULL" });
        } else {
            // proxies are not joined, none can match
            self.buf.push_str(if proxy { "0 = 1" } else { "1 = 1" });
        }
        Ok(())
    }

    fn visit_is_version(&mut self, op: BinaryOp, right: &Expr) -> Result<()> {
        let version = Self::flag_operand(ECM_ISVERSION, op, right)?;
        let dialect = self.maker.sql_info.dialect();
        let column = self.maker.sql_info.table(VERSION_TABLE_NAME).qualified(dialect, MAIN_KEY);
        self.buf.push_str(&column);
        self.buf.push_str(if version { " IS NOT NULL" } else { " IS NULL" });
        Ok(())
    }

    /// Qualified column of a property or pseudo-field.
    fn column(&self, name: &str) -> Result<String> {
        let sql_info = self.maker.sql_info;
        let dialect = sql_info.dialect();
        let hier = sql_info.table(HIER_TABLE_NAME);
        let in_hier = |table: &str, key: &str| format!("{}.{}", table, dialect.quote(&hier.column(key).name));
        let column = match name {
            ECM_PRIMARYTYPE => in_hier(self.joined_hier, MAIN_PRIMARY_TYPE_KEY),
            ECM_UUID => self.hier_id.to_string(),
            ECM_NAME => in_hier(self.hier_table, HIER_CHILD_NAME_KEY),
            ECM_PARENTID => in_hier(self.hier_table, HIER_PARENT_KEY),
            ECM_MIXINTYPE => {
                return Err(StorageError::Query(format!(
                    "Cannot use non-toplevel {} in query",
                    name
                )));
            }
            ECM_PATH => {
                return Err(StorageError::Query(format!("{} can only be used with STARTSWITH", name)));
            }
            ECM_ISPROXY | ECM_ISVERSION => {
                return Err(StorageError::Query(format!("{} requires = or <> operator", name)));
            }
            _ => {
                let prop = match name {
                    ECM_LIFECYCLESTATE => MISC_LIFECYCLE_STATE_PROP,
                    ECM_VERSIONLABEL => VERSION_LABEL_PROP,
                    _ if name.starts_with(ECM_PREFIX) => {
                        return Err(StorageError::Query(format!("Unknown field: {}", name)));
                    }
                    _ => name,
                };
                let Some(property) = self.maker.model.property_info(prop) else {
                    return Err(StorageError::Query(format!("Unknown field: {}", name)));
                };
                let table = sql_info.table(&property.fragment);
                if property.multi {
                    table.qualified(dialect, COLL_TABLE_VALUE_KEY)
                } else if property.fragment == HIER_TABLE_NAME {
                    in_hier(self.joined_hier, &property.key)
                } else {
                    table.qualified(dialect, &property.key)
                }
            }
        };
        Ok(column)
    }
}
