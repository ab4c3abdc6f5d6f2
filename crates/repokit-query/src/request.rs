//! Logical query requests.

use crate::clause::{OrderBy, PageRequest, Window};
use crate::expr::{Condition, Predicate};

/// What a caller wants read: an entity type, a filter, an order, an
/// optional window, association fetch hints and an optional projection.
///
/// ```
/// use repokit_query::{field, OrderBy, QueryRequest};
///
/// let req = QueryRequest::new("Member")
///     .filter(field("age").eq(10))
///     .order_by(OrderBy::desc("username"))
///     .window(0, 3);
/// assert_eq!(req.entity(), "Member");
/// ```
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct QueryRequest {
    entity: String,
    predicate: Predicate,
    sort: Vec<OrderBy>,
    window: Option<Window>,
    fetch: Vec<String>,
    projection: Option<Vec<String>>,
}

impl QueryRequest {
    /// Request every instance of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::all(),
            sort: Vec::new(),
            window: None,
            fetch: Vec::new(),
            projection: None,
        }
    }

    /// Add a condition (AND).
    pub fn filter(mut self, condition: Condition) -> Self {
        self.predicate = self.predicate.and(condition);
        self
    }

    /// Replace the whole predicate.
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Append a sort key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.sort.push(order);
        self
    }

    /// Restrict to `[offset, offset + limit)`.
    pub fn window(mut self, offset: u64, limit: u64) -> Self {
        self.window = Some(Window::new(offset, limit));
        self
    }

    /// Apply a page request: its window plus its sort keys.
    pub fn page(mut self, page: &PageRequest) -> Self {
        self.window = Some(page.window());
        self.sort.extend(page.sort.iter().cloned());
        self
    }

    /// Load `association` together with the results (fetch join).
    pub fn fetch(mut self, association: impl Into<String>) -> Self {
        let association = association.into();
        if !self.fetch.contains(&association) {
            self.fetch.push(association);
        }
        self
    }

    /// Return only these field paths instead of entities.
    pub fn project<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn get_predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn get_sort(&self) -> &[OrderBy] {
        &self.sort
    }

    pub fn get_window(&self) -> Option<Window> {
        self.window
    }

    pub fn get_fetch(&self) -> &[String] {
        &self.fetch
    }

    pub fn get_projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    /// Same request with a different window.
    pub fn with_window(&self, window: Option<Window>) -> Self {
        Self {
            window,
            ..self.clone()
        }
    }
}
