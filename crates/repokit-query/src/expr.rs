//! Predicate DSL: conjunctions of field comparisons.
//!
//! A [`Predicate`] is an AND of [`Condition`]s. Field names may be plain
//! (`age`) or an association path into a to-one association (`team.name`).

use std::fmt;

use repokit_core::{Value, like_matches};

use crate::statement::parse_scalar;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }

    fn test(self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};

        if self == CompareOp::Like {
            return match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => like_matches(l, r),
                _ => false,
            };
        }
        match (self, left.compare(right)) {
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o == Equal,
            (CompareOp::Ne, Some(o)) => o != Equal,
            (CompareOp::Lt, Some(o)) => o == Less,
            (CompareOp::Le, Some(o)) => o != Greater,
            (CompareOp::Gt, Some(o)) => o == Greater,
            (CompareOp::Ge, Some(o)) => o != Less,
            (CompareOp::Like, Some(_)) => false,
        }
    }
}

/// One clause of a conjunction.
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Condition {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    IsNull(String),
    IsNotNull(String),
}

impl Condition {
    /// The field path this condition reads.
    pub fn field(&self) -> &str {
        match self {
            Condition::Compare { field, .. } | Condition::In { field, .. } => field,
            Condition::IsNull(field) | Condition::IsNotNull(field) => field,
        }
    }

    /// Parse a command-line condition: `field<op>value`.
    ///
    /// Operators are `=`, `!=`, `<`, `<=`, `>`, `>=` and `~` (LIKE).
    /// `field=null` / `field!=null` test for NULL and `field=[a,b]` is an
    /// IN list. Values are read with [`parse_scalar`].
    pub fn parse(raw: &str) -> Option<Self> {
        let at = raw.find(['=', '!', '<', '>', '~'])?;
        let (name, rest) = raw.split_at(at);
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let (op, value) = [
            ("!=", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("=", CompareOp::Eq),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
            ("~", CompareOp::Like),
        ]
        .into_iter()
        .find_map(|(token, op)| rest.strip_prefix(token).map(|value| (op, value.trim())))?;

        match (op, value) {
            (CompareOp::Eq, "null") => return Some(field(name).is_null()),
            (CompareOp::Ne, "null") => return Some(field(name).is_not_null()),
            _ => {}
        }
        if op == CompareOp::Eq && value.starts_with('[') {
            let items: Vec<serde_json::Value> = serde_json::from_str(value).ok()?;
            return Some(field(name).is_in(items.into_iter().map(Value::from_json)));
        }
        if op == CompareOp::Like {
            return Some(field(name).like(value));
        }
        Some(field(name).compare(op, parse_scalar(value)))
    }

    /// Evaluate against a row, looking fields up with `lookup`.
    ///
    /// NULL never satisfies a comparison; a missing field reads as NULL.
    pub fn matches<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value>) -> bool {
        static NULL: Value = Value::Null;
        let value = lookup(self.field()).unwrap_or(&NULL);
        match self {
            Condition::Compare { op, value: rhs, .. } => op.test(value, rhs),
            Condition::In { values, .. } => values.iter().any(|v| CompareOp::Eq.test(value, v)),
            Condition::IsNull(_) => value.is_null(),
            Condition::IsNotNull(_) => !value.is_null(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { field, op, value } => {
                write!(f, "{} {} {}", field, op.as_str(), value)
            }
            Condition::In { field, values } => {
                let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{} IN ({})", field, list.join(", "))
            }
            Condition::IsNull(field) => write!(f, "{} IS NULL", field),
            Condition::IsNotNull(field) => write!(f, "{} IS NOT NULL", field),
        }
    }
}

/// Conjunction of conditions. The empty predicate matches everything.
#[derive(Debug, Clone, Default, PartialEq, Hash)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    /// The predicate that matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a condition (AND).
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate every condition against a row.
    pub fn matches<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value> + Copy) -> bool {
        self.conditions.iter().all(|c| c.matches(lookup))
    }
}

impl From<Condition> for Predicate {
    fn from(condition: Condition) -> Self {
        Predicate::all().and(condition)
    }
}

impl FromIterator<Condition> for Predicate {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        Self {
            conditions: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return f.write_str("TRUE");
        }
        let parts: Vec<String> = self.conditions.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" AND "))
    }
}

/// Start a condition on a field path.
///
/// ```
/// use repokit_query::{field, Predicate};
///
/// let p = Predicate::all()
///     .and(field("username").eq("AAA"))
///     .and(field("age").gt(15));
/// assert_eq!(p.to_string(), "username = 'AAA' AND age > 15");
/// ```
pub fn field(name: impl Into<String>) -> FieldRef {
    FieldRef { name: name.into() }
}

/// A field path awaiting a comparison.
#[derive(Debug, Clone)]
pub struct FieldRef {
    name: String,
}

impl FieldRef {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Condition {
        Condition::Compare {
            field: self.name,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Ge, value)
    }

    pub fn like(self, pattern: impl Into<String>) -> Condition {
        self.compare(CompareOp::Like, Value::Text(pattern.into()))
    }

    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        Condition::In {
            field: self.name,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(self) -> Condition {
        Condition::IsNull(self.name)
    }

    pub fn is_not_null(self) -> Condition {
        Condition::IsNotNull(self.name)
    }
}
