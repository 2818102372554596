//! Sorting, page requests and page results.
//!
//! # Responsibility
//! - Validate page requests before any store access.
//! - Derive page metadata (`total_pages`, `first`, `last`, `has_next`) from
//!   the content window and the total count.
//!
//! # Invariants
//! - `size > 0`, so `total_pages = ceil(total_elements / size)` is defined.
//! - `Page::map` never changes metadata.

use crate::error::{RepoError, RepoResult};
use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(text: &str) -> RepoResult<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(RepoError::InvalidPageRequest(format!(
                "unknown sort direction `{other}`; expected asc|desc"
            ))),
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

/// One sort key: a field path (`username`, `team.name`) and a direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(direction: Direction, property: &str) -> Self {
        Self::unsorted().and(direction, property)
    }

    pub fn and(mut self, direction: Direction, property: &str) -> Self {
        self.orders.push(Order {
            property: property.to_string(),
            direction,
        });
        self
    }

    /// Parses `field[,asc|desc]`, the shape list endpoints receive.
    pub fn parse(text: &str) -> RepoResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::unsorted());
        }
        let (property, direction) = match text.split_once(',') {
            Some((property, direction)) => (property.trim(), Direction::parse(direction)?),
            None => (text, Direction::Asc),
        };
        if property.is_empty() {
            return Err(RepoError::InvalidPageRequest(format!(
                "sort `{text}` has no property"
            )));
        }
        Ok(Self::by(direction, property))
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Zero-based page index, positive page size and sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    page: usize,
    size: usize,
    sort: Sort,
}

impl PageRequest {
    pub fn of(page: usize, size: usize) -> RepoResult<Self> {
        Self::of_sorted(page, size, Sort::unsorted())
    }

    pub fn of_sorted(page: usize, size: usize, sort: Sort) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidPageRequest(
                "page size must be greater than zero".to_string(),
            ));
        }
        if page.checked_mul(size).is_none() {
            return Err(RepoError::InvalidPageRequest(format!(
                "page {page} with size {size} overflows the offset"
            )));
        }
        Ok(Self { page, size, sort })
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn offset(&self) -> usize {
        self.page * self.size
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub number: usize,
    pub size: usize,
    pub total_elements: u64,
    pub total_pages: u64,
    pub first: bool,
    pub last: bool,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        let size = request.size() as u64;
        let total_pages = total_elements.div_ceil(size);
        let number = request.page();
        let has_next = (number as u64).saturating_add(1) < total_pages;
        Self {
            content,
            number,
            size: request.size(),
            total_elements,
            total_pages,
            first: number == 0,
            last: !has_next,
            has_next,
            has_previous: number > 0,
        }
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

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
            has_previous: self.has_previous,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        let content = self.content.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(Page {
            content,
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
            first: self.first,
            last: self.last,
            has_next: self.has_next,
            has_previous: self.has_previous,
        })
    }
}

/// Returns the total when the content window already determines it, so the
/// count query can be skipped.
pub(crate) fn known_total(request: &PageRequest, fetched: usize) -> Option<u64> {
    if fetched >= request.size() {
        return None;
    }
    if request.offset() == 0 {
        return Some(fetched as u64);
    }
    if fetched > 0 {
        return Some(request.offset().saturating_add(fetched) as u64);
    }
    None
}

/// Page without a total; `has_next` comes from fetching one extra row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slice<T> {
    pub content: Vec<T>,
    pub number: usize,
    pub size: usize,
    pub first: bool,
    pub has_next: bool,
}

impl<T> Slice<T> {
    /// `content` may hold up to `size + 1` rows; the extra row only sets
    /// `has_next`.
    pub fn new(mut content: Vec<T>, request: &PageRequest) -> Self {
        let has_next = content.len() > request.size();
        content.truncate(request.size());
        Self {
            content,
            number: request.page(),
            size: request.size(),
            first: request.page() == 0,
            has_next,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            first: self.first,
            has_next: self.has_next,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Slice<U>, E> {
        let content = self.content.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(Slice {
            content,
            number: self.number,
            size: self.size,
            first: self.first,
            has_next: self.has_next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{known_total, Direction, Page, PageRequest, Slice, Sort};

    #[test]
    fn page_metadata_for_five_rows_of_size_three() {
        let first = PageRequest::of(0, 3).unwrap();
        let page = Page::new(vec![1, 2, 3], &first, 5);
        assert_eq!(page.total_pages, 2);
        assert!(page.first && page.has_next && !page.last);

        let second = Page::new(vec![4, 5], &first.next(), 5);
        assert!(!second.has_next && second.last && second.has_previous);
    }

    #[test]
    fn offset_past_total_has_no_next() {
        let request = PageRequest::of(4, 3).unwrap();
        let page: Page<i32> = Page::new(Vec::new(), &request, 5);
        assert!(page.content.is_empty());
        assert_eq!(page.total_elements, 5);
        assert!(!page.has_next);
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(PageRequest::of(0, 0).is_err());
    }

    #[test]
    fn known_total_skips_count_only_when_determined() {
        let first = PageRequest::of(0, 3).unwrap();
        assert_eq!(known_total(&first, 2), Some(2));
        assert_eq!(known_total(&first, 3), None);
        let third = PageRequest::of(2, 3).unwrap();
        assert_eq!(known_total(&third, 1), Some(7));
        assert_eq!(known_total(&third, 0), None);
    }

    #[test]
    fn sort_parse_reads_field_and_direction() {
        assert_eq!(
            Sort::parse("username,desc").unwrap(),
            Sort::by(Direction::Desc, "username")
        );
        assert_eq!(Sort::parse("age").unwrap(), Sort::by(Direction::Asc, "age"));
        assert!(Sort::parse("age,sideways").is_err());
        assert!(Sort::parse("").unwrap().is_unsorted());
    }

    #[test]
    fn slice_trims_probe_row() {
        let request = PageRequest::of(0, 2).unwrap();
        let slice = Slice::new(vec![1, 2, 3], &request);
        assert_eq!(slice.content, vec![1, 2]);
        assert!(slice.has_next);
        assert_eq!(slice.map(|value| value * 10).content, vec![10, 20]);
    }

    #[test]
    fn map_keeps_metadata() {
        let request = PageRequest::of(0, 3).unwrap();
        let page = Page::new(vec![1, 2, 3], &request, 5).map(|value| value.to_string());
        assert_eq!(page.content, vec!["1", "2", "3"]);
        assert_eq!(page.total_elements, 5);
    }
}
