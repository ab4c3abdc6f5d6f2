//! Page and slice retrieval.
//!
//! A [`Page`] pairs one window of results with a count query, so it knows
//! the total. A [`Slice`] skips the count and reads one extra row to learn
//! whether another window follows.

use serde::Serialize;

use repokit_core::{EntityRef, Error, Result};
use repokit_query::{QueryRequest, Store, Window};

use crate::Session;

/// One window of results plus totals from a count query.
#[derive(Debug, Clone)]
pub struct Page<T> {
    content: Vec<T>,
    window: Window,
    total_elements: u64,
}

/// Serializable paging metadata of a [`Page`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub number: u64,
    pub size: u64,
    pub number_of_elements: usize,
    pub total_elements: u64,
    pub total_pages: u64,
    pub first: bool,
    pub last: bool,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, window: Window, total_elements: u64) -> Self {
        Self {
            content,
            window,
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    /// `ceil(total / size)`.
    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(self.window.limit.max(1))
    }

    /// Zero-based page number (`offset / size`).
    pub fn number(&self) -> u64 {
        self.window.offset / self.window.limit.max(1)
    }

    pub fn size(&self) -> u64 {
        self.window.limit
    }

    pub fn offset(&self) -> u64 {
        self.window.offset
    }

    pub fn is_first(&self) -> bool {
        self.window.offset == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn has_next(&self) -> bool {
        self.window.offset.saturating_add(self.window.limit) < self.total_elements
    }

    pub fn has_previous(&self) -> bool {
        self.window.offset > 0
    }

    /// Transform the content, keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            window: self.window,
            total_elements: self.total_elements,
        }
    }

    pub fn info(&self) -> PageInfo {
        PageInfo {
            number: self.number(),
            size: self.size(),
            number_of_elements: self.number_of_elements(),
            total_elements: self.total_elements,
            total_pages: self.total_pages(),
            first: self.is_first(),
            last: self.is_last(),
            has_next: self.has_next(),
            has_previous: self.has_previous(),
        }
    }
}

/// One window of results and whether another follows.
#[derive(Debug, Clone)]
pub struct Slice<T> {
    content: Vec<T>,
    window: Window,
    has_next: bool,
}

/// Serializable metadata of a [`Slice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceInfo {
    pub number: u64,
    pub size: u64,
    pub number_of_elements: usize,
    pub first: bool,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Slice<T> {
    pub fn new(content: Vec<T>, window: Window, has_next: bool) -> Self {
        Self {
            content,
            window,
            has_next,
        }
    }

    /// Build from a read of `window.limit + 1` rows, dropping the probe row.
    pub fn from_probe(mut content: Vec<T>, window: Window) -> Self {
        let has_next = content.len() as u64 > window.limit;
        content.truncate(usize::try_from(window.limit).unwrap_or(usize::MAX));
        Self::new(content, window, has_next)
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn number(&self) -> u64 {
        self.window.offset / self.window.limit.max(1)
    }

    pub fn size(&self) -> u64 {
        self.window.limit
    }

    pub fn is_first(&self) -> bool {
        self.window.offset == 0
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.window.offset > 0
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            window: self.window,
            has_next: self.has_next,
        }
    }

    pub fn info(&self) -> SliceInfo {
        SliceInfo {
            number: self.number(),
            size: self.size(),
            number_of_elements: self.number_of_elements(),
            first: self.is_first(),
            has_next: self.has_next,
            has_previous: self.has_previous(),
        }
    }
}

fn required_window(request: &QueryRequest) -> Result<Window> {
    let window = request.get_window().ok_or_else(|| {
        Error::InvalidRequest(format!(
            "paged query on {} needs a window",
            request.entity()
        ))
    })?;
    if window.limit == 0 {
        return Err(Error::InvalidRequest(
            "window limit must be greater than zero".to_string(),
        ));
    }
    Ok(window)
}

impl<S: Store> Session<S> {
    /// Read the request's window plus the total count.
    ///
    /// The count uses the predicate only: no order, window or fetch joins.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = request.entity()))]
    pub fn page(&mut self, request: &QueryRequest) -> Result<Page<EntityRef>> {
        let window = required_window(request)?;
        let content = self.query(request)?;
        let total = self.count(request)?;
        tracing::debug!(
            offset = window.offset,
            limit = window.limit,
            total,
            "Read page"
        );
        Ok(Page::new(content, window, total))
    }

    /// Read `limit + 1` rows from the request's offset; no count query.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = request.entity()))]
    pub fn slice(&mut self, request: &QueryRequest) -> Result<Slice<EntityRef>> {
        let window = required_window(request)?;
        let probe = request.with_window(Some(window.probe_next()));
        let content = self.query(&probe)?;
        let slice = Slice::from_probe(content, window);
        tracing::debug!(
            offset = window.offset,
            limit = window.limit,
            has_next = slice.has_next(),
            "Read slice"
        );
        Ok(slice)
    }
}
