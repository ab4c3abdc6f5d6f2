//! Sort and window clauses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    /// Create an ascending sort key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending sort key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }

    pub const fn is_desc(&self) -> bool {
        matches!(self.direction, OrderDirection::Desc)
    }

    /// Parse `field` or `field:asc` / `field:desc`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split_once(':') {
            None => Some(Self::asc(raw)),
            Some((field, dir)) => match dir.to_ascii_lowercase().as_str() {
                "asc" => Some(Self::asc(field)),
                "desc" => Some(Self::desc(field)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            OrderDirection::Asc => write!(f, "{} ASC", self.field),
            OrderDirection::Desc => write!(f, "{} DESC", self.field),
        }
    }
}

/// A `[offset, offset + limit)` window over an ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

impl Window {
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Same offset, one extra row; used to probe for a following window.
    pub const fn probe_next(self) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.saturating_add(1),
        }
    }
}

/// Zero-based page number and size, mapped onto a [`Window`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
    #[serde(default)]
    pub sort: Vec<OrderBy>,
}

impl PageRequest {
    /// Request page `page` (zero-based) of `size` rows.
    pub fn of(page: u64, size: u64) -> Self {
        Self {
            page,
            size,
            sort: Vec::new(),
        }
    }

    /// Add a sort key.
    pub fn sort(mut self, order: OrderBy) -> Self {
        self.sort.push(order);
        self
    }

    pub fn window(&self) -> Window {
        Window::new(self.page.saturating_mul(self.size), self.size)
    }
}
