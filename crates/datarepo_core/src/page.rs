//! Page and slice request/result types.
//!
//! # Invariants
//! - Page size is never zero.
//! - `total_pages == ceil(total_elements / size)`; an empty result has zero
//!   pages and is both first and last.
//! - `map` never changes paging metadata.

pub use crate::query::plan::Direction;
use crate::repo::error::{RepoError, RepoResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

/// Sort by entity property names, resolved when a query runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by<I, S>(direction: Direction, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            orders: properties
                .into_iter()
                .map(|property| Order {
                    property: property.into(),
                    direction,
                })
                .collect(),
        }
    }

    /// Appends the orders of `other` after this sort's orders.
    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: usize,
    size: usize,
    sort: Sort,
}

impl PageRequest {
    /// # Errors
    /// - `InvalidArgument` when `size` is zero.
    pub fn of(page: usize, size: usize) -> RepoResult<Self> {
        Self::with_sort(page, size, Sort::unsorted())
    }

    pub fn with_sort(page: usize, size: usize, sort: Sort) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidArgument(
                "page size must be at least one".to_string(),
            ));
        }
        Ok(Self { page, size, sort })
    }

    pub fn page_number(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64).saturating_mul(self.size as u64)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }

    pub fn previous_or_first(&self) -> Self {
        Self {
            page: self.page.saturating_sub(1),
            ..self.clone()
        }
    }

    pub fn first(&self) -> Self {
        Self {
            page: 0,
            ..self.clone()
        }
    }
}

/// Counted result window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    content: Vec<T>,
    number: usize,
    size: usize,
    total_elements: u64,
    total_pages: usize,
    first: bool,
    last: bool,
    has_next: bool,
    sort: Sort,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        let size = request.page_size();
        let total_pages = usize::try_from(total_elements.div_ceil(size as u64))
            .unwrap_or(usize::MAX);
        let number = request.page_number();
        let has_next = number.saturating_add(1) < total_pages;
        Self {
            content,
            number,
            size,
            total_elements,
            total_pages,
            first: number == 0,
            // An empty result is its own last page; a request past the end is not.
            last: total_pages == 0 || number.saturating_add(1) == total_pages,
            has_next,
            sort: request.sort().clone(),
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn is_first(&self) -> bool {
        self.first
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Transforms each element, keeping page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
            first: self.first,
            last: self.last,
            has_next: self.has_next,
            sort: self.sort,
        }
    }
}

/// Uncounted result window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice<T> {
    content: Vec<T>,
    number: usize,
    size: usize,
    has_next: bool,
    sort: Sort,
}

impl<T> Slice<T> {
    /// Builds a slice from up to `size + 1` fetched rows, dropping the probe
    /// row when present.
    pub fn from_overfetch(mut content: Vec<T>, request: &PageRequest) -> Self {
        let size = request.page_size();
        let has_next = content.len() > size;
        content.truncate(size);
        Self {
            content,
            number: request.page_number(),
            size,
            has_next,
            sort: request.sort().clone(),
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            has_next: self.has_next,
            sort: self.sort,
        }
    }
}
