//! Page requests and the page/slice result shapes.
//!
//! # Invariants
//! - `size >= 1`; page numbers are zero-based.
//! - Every window is ordered; the identifier breaks ties ascending so the
//!   same request always returns the same rows.

use crate::mapping::EntityMapping;
use crate::repo::{RepoError, RepoResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Sort by one mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

impl Sort {
    pub fn by(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::by(field, Direction::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::by(field, Direction::Desc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    size: u32,
    sort: Option<Sort>,
}

impl PageRequest {
    /// # Errors
    /// - `InvalidPageRequest` when `size` is zero.
    pub fn of(page: u32, size: u32) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidPageRequest(
                "page size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            page,
            size,
            sort: None,
        })
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

/// One window of results plus the total row count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    content: Vec<T>,
    number: u32,
    size: u32,
    total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            number: request.page,
            size: request.size,
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(u64::from(self.size))
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn has_next(&self) -> bool {
        (u64::from(self.number) + 1) * u64::from(self.size) < self.total_elements
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    /// Converts the content, keeping every piece of paging metadata.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}

/// One window of results that only knows whether another window follows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice<T> {
    content: Vec<T>,
    number: u32,
    size: u32,
    has_next: bool,
}

impl<T> Slice<T> {
    /// Builds a slice from a fetch of `size + 1` rows.
    pub(crate) fn from_overfetched(mut rows: Vec<T>, request: &PageRequest) -> Self {
        let size = request.size as usize;
        let has_next = rows.len() > size;
        rows.truncate(size);
        Self {
            content: rows,
            number: request.page,
            size: request.size,
            has_next,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn map<U, F>(self, f: F) -> Slice<U>
    where
        F: FnMut(T) -> U,
    {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            has_next: self.has_next,
        }
    }
}

/// Total implied by the window alone, when the window proves it.
///
/// A short first page holds everything; a non-empty short later page ends
/// the result. Otherwise the count query must run.
pub(crate) fn resolve_total(request: &PageRequest, fetched: usize) -> Option<u64> {
    let fetched_rows = fetched as u64;
    let size = u64::from(request.size);
    if request.offset() == 0 && fetched_rows < size {
        return Some(fetched_rows);
    }
    if fetched_rows != 0 && fetched_rows < size {
        return Some(request.offset() + fetched_rows);
    }
    None
}

/// `ORDER BY` clause for `sort`, always ending with the identifier ascending.
pub(crate) fn order_clause(
    sort: Option<&Sort>,
    mapping: &EntityMapping,
    alias: Option<&str>,
) -> RepoResult<String> {
    let qualify = |column: &str| match alias {
        Some(alias) => format!("{alias}.{column}"),
        None => column.to_string(),
    };
    let id_column = qualify(mapping.id_column());

    let Some(sort) = sort else {
        return Ok(format!("ORDER BY {id_column} ASC"));
    };
    let resolved = mapping
        .resolve_field(&sort.field)
        .ok_or_else(|| RepoError::UnknownField {
            entity: mapping.entity(),
            field: sort.field.clone(),
        })?;
    if resolved.identifier {
        return Ok(format!("ORDER BY {id_column} {}", sort.direction.sql()));
    }
    Ok(format!(
        "ORDER BY {} {}, {id_column} ASC",
        qualify(resolved.column),
        sort.direction.sql()
    ))
}
