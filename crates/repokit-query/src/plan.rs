//! Executable read plans.
//!
//! A [`QueryPlan`] is the fully resolved, deterministic form of a request:
//! every name has been checked against the registry, joins are explicit and
//! the order is total. Stores execute plans; they never see requests.

use std::fmt;

use repokit_core::Value;

use crate::clause::{OrderBy, Window};
use crate::expr::Predicate;

/// What a read returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selection {
    /// Root fields, followed by `association.field` columns for each join.
    Entities,
    /// One row with a single `count` column.
    Count,
    /// Exactly these field paths, in order.
    Columns(Vec<String>),
}

/// Left join of a to-one association, read in the same round trip.
///
/// Joined columns are named `association.field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub association: String,
    pub target: String,
    /// Field on the owner holding the target's identity.
    pub foreign_key: String,
    pub target_identity: String,
    pub fields: Vec<String>,
    /// Materialize the association from the joined columns (hint or eager).
    /// Joins only needed by predicates or projections leave this unset.
    pub fetch: bool,
}

/// Follow-up read for a to-many association, batched over all owners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchFetch {
    pub association: String,
    pub target: String,
    /// Field on the target holding the owner's identity.
    pub foreign_key: String,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct QueryPlan {
    pub entity: String,
    pub identity: String,
    pub fields: Vec<String>,
    pub joins: Vec<Join>,
    pub predicate: Predicate,
    pub order: Vec<OrderBy>,
    pub window: Option<Window>,
    pub selection: Selection,
    pub follow_ups: Vec<BatchFetch>,
}

/// Name of the single column returned by count plans.
pub const COUNT_COLUMN: &str = "count";

impl QueryPlan {
    /// Same plan restricted to a different window.
    pub fn with_window(&self, window: Window) -> Self {
        Self {
            window: Some(window),
            ..self.clone()
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(self.selection, Selection::Count)
    }

    /// Joins whose columns materialize an association.
    pub fn fetched_joins(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter().filter(|j| j.fetch)
    }

    /// Column names of the rows this plan produces.
    pub fn output_columns(&self) -> Vec<String> {
        match &self.selection {
            Selection::Count => vec![COUNT_COLUMN.to_string()],
            Selection::Columns(paths) => paths.clone(),
            Selection::Entities => {
                let mut cols = self.fields.clone();
                for join in &self.joins {
                    cols.extend(
                        join.fields
                            .iter()
                            .map(|f| format!("{}.{}", join.association, f)),
                    );
                }
                cols
            }
        }
    }

    /// Identity values a batch plan was keyed on, if this is one.
    pub fn batch_keys(&self) -> Option<&[Value]> {
        match self.predicate.conditions() {
            [crate::expr::Condition::In { values, .. }] => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selection {
            Selection::Entities => write!(f, "read {}", self.entity)?,
            Selection::Count => write!(f, "count {}", self.entity)?,
            Selection::Columns(cols) => write!(f, "project {} [{}]", self.entity, cols.join(", "))?,
        }
        for join in &self.joins {
            write!(f, " +{}", join.association)?;
        }
        if !self.predicate.is_empty() {
            write!(f, " where {}", self.predicate)?;
        }
        if !self.order.is_empty() {
            let keys: Vec<String> = self.order.iter().map(ToString::to_string).collect();
            write!(f, " order by {}", keys.join(", "))?;
        }
        if let Some(w) = self.window {
            write!(f, " offset {} limit {}", w.offset, w.limit)?;
        }
        Ok(())
    }
}
