//! Parameterized SQL rendering of plans and statements.
//!
//! Entity types map to tables of the same name, fields to columns. The root
//! table is aliased `t0`; joined tables are aliased by association name.

use repokit_core::Value;

use crate::clause::OrderDirection;
use crate::expr::{Condition, Predicate};
use crate::plan::{COUNT_COLUMN, QueryPlan, Selection};
use crate::statement::{Assignment, WriteStatement};

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => repokit_core::quote_ident(name),
            Dialect::Mysql => repokit_core::quote_ident_mysql(name),
        }
    }

    /// Parse a dialect name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            "sqlite" => Some(Dialect::Sqlite),
            "mysql" | "mariadb" => Some(Dialect::Mysql),
            _ => None,
        }
    }
}

const ROOT_ALIAS: &str = "t0";

struct Params {
    dialect: Dialect,
    values: Vec<Value>,
}

impl Params {
    fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }
}

/// Render a read plan as `(sql, params)`.
pub fn render_read(plan: &QueryPlan, dialect: Dialect) -> (String, Vec<Value>) {
    let q = |name: &str| dialect.quote_identifier(name);
    let column = |path: &str| match path.split_once('.') {
        Some((assoc, field)) => format!("{}.{}", q(assoc), q(field)),
        None => format!("{}.{}", q(ROOT_ALIAS), q(path)),
    };
    let mut params = Params {
        dialect,
        values: Vec::new(),
    };

    let select_list = match &plan.selection {
        Selection::Count => format!("COUNT(*) AS {}", q(COUNT_COLUMN)),
        Selection::Columns(paths) => paths
            .iter()
            .map(|p| format!("{} AS {}", column(p), q(p)))
            .collect::<Vec<_>>()
            .join(", "),
        Selection::Entities => plan
            .output_columns()
            .iter()
            .map(|p| {
                if p.contains('.') {
                    format!("{} AS {}", column(p), q(p))
                } else {
                    column(p)
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
    };

    let mut sql = format!(
        "SELECT {} FROM {} AS {}",
        select_list,
        q(&plan.entity),
        q(ROOT_ALIAS)
    );
    for join in &plan.joins {
        sql.push_str(&format!(
            " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
            q(&join.target),
            q(&join.association),
            q(&join.association),
            q(&join.target_identity),
            q(ROOT_ALIAS),
            q(&join.foreign_key)
        ));
    }
    if !plan.predicate.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&render_predicate(&plan.predicate, &column, &mut params));
    }
    if !plan.order.is_empty() {
        let keys: Vec<String> = plan
            .order
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    OrderDirection::Asc => "ASC",
                    OrderDirection::Desc => "DESC",
                };
                format!("{} {}", column(&o.field), dir)
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }
    if let Some(window) = plan.window {
        sql.push_str(&format!(" LIMIT {} OFFSET {}", window.limit, window.offset));
    }
    (sql, params.values)
}

/// Render a write statement as `(sql, params)`.
pub fn render_write(stmt: &WriteStatement, dialect: Dialect) -> (String, Vec<Value>) {
    let q = |name: &str| dialect.quote_identifier(name);
    let column = |path: &str| q(path);
    let mut params = Params {
        dialect,
        values: Vec::new(),
    };

    let sql = match stmt {
        WriteStatement::Insert { entity, values } => {
            let cols: Vec<String> = values.iter().map(|(name, _)| q(name)).collect();
            let marks: Vec<String> = values.iter().map(|(_, v)| params.push(v.clone())).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                q(entity),
                cols.join(", "),
                marks.join(", ")
            )
        }
        WriteStatement::Update {
            entity,
            identity_field,
            identity,
            values,
        } => {
            let sets: Vec<String> = values
                .iter()
                .map(|(name, v)| format!("{} = {}", q(name), params.push(v.clone())))
                .collect();
            let id = params.push(identity.clone());
            format!(
                "UPDATE {} SET {} WHERE {} = {}",
                q(entity),
                sets.join(", "),
                q(identity_field),
                id
            )
        }
        WriteStatement::Delete {
            entity,
            identity_field,
            identity,
        } => {
            let id = params.push(identity.clone());
            format!("DELETE FROM {} WHERE {} = {}", q(entity), q(identity_field), id)
        }
        WriteStatement::BulkUpdate {
            entity,
            predicate,
            assignments,
        } => {
            let sets: Vec<String> = assignments
                .iter()
                .map(|a| match a {
                    Assignment::Set { field, value } => {
                        format!("{} = {}", q(field), params.push(value.clone()))
                    }
                    Assignment::Add { field, delta } => format!(
                        "{} = {} + {}",
                        q(field),
                        q(field),
                        params.push(delta.clone())
                    ),
                })
                .collect();
            let mut sql = format!("UPDATE {} SET {}", q(entity), sets.join(", "));
            if !predicate.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&render_predicate(predicate, &column, &mut params));
            }
            sql
        }
        WriteStatement::BulkDelete { entity, predicate } => {
            let mut sql = format!("DELETE FROM {}", q(entity));
            if !predicate.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&render_predicate(predicate, &column, &mut params));
            }
            sql
        }
    };
    (sql, params.values)
}

fn render_predicate(
    predicate: &Predicate,
    column: &dyn Fn(&str) -> String,
    params: &mut Params,
) -> String {
    predicate
        .conditions()
        .iter()
        .map(|c| match c {
            Condition::Compare { field, op, value } => {
                format!("{} {} {}", column(field), op.as_str(), params.push(value.clone()))
            }
            // `x IN ()` is not valid SQL; an empty list matches nothing.
            Condition::In { values, .. } if values.is_empty() => "1 = 0".to_string(),
            Condition::In { field, values } => {
                let marks: Vec<String> = values.iter().map(|v| params.push(v.clone())).collect();
                format!("{} IN ({})", column(field), marks.join(", "))
            }
            Condition::IsNull(field) => format!("{} IS NULL", column(field)),
            Condition::IsNotNull(field) => format!("{} IS NOT NULL", column(field)),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
