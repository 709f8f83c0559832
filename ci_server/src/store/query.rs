//! Build list queries: field filters, staff visibility, ordering and paging.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::models::build::{BuildStatus, CiBuild};

pub const DEFAULT_ORDER: &str = "-time_queue";
pub const DEFAULT_PER_PAGE: usize = 25;
pub const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown order field: {0:?}")]
    UnknownField(String),
    #[error("invalid page size: {0:?}")]
    InvalidPageSize(String),
}

/// Equality predicates on build fields. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFilter {
    pub repo_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub plan_id: Option<i64>,
    pub commit: Option<String>,
    pub status: Option<BuildStatus>,
}

impl BuildFilter {
    pub fn matches(&self, build: &CiBuild) -> bool {
        self.repo_id.is_none_or(|id| build.repo_id == id)
            && self.branch_id.is_none_or(|id| build.branch_id == Some(id))
            && self.plan_id.is_none_or(|id| build.plan_id == id)
            && self.commit.as_deref().is_none_or(|sha| build.commit == sha)
            && self.status.is_none_or(|status| build.status == status)
    }
}

/// A sortable build column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildField {
    Id,
    TimeQueue,
    TimeStart,
    TimeEnd,
    Status,
    Commit,
    Plan,
    Branch,
    Repo,
}

impl FromStr for BuildField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "id" => BuildField::Id,
            "time_queue" => BuildField::TimeQueue,
            "time_start" => BuildField::TimeStart,
            "time_end" => BuildField::TimeEnd,
            "status" => BuildField::Status,
            "commit" => BuildField::Commit,
            "plan" => BuildField::Plan,
            "branch" => BuildField::Branch,
            "repo" => BuildField::Repo,
            other => return Err(QueryError::UnknownField(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderField {
    pub field: BuildField,
    pub descending: bool,
}

impl OrderField {
    fn compare(&self, a: &CiBuild, b: &CiBuild) -> Ordering {
        let ordering = match self.field {
            BuildField::Id => a.id.cmp(&b.id),
            BuildField::TimeQueue => a.time_queue.cmp(&b.time_queue),
            BuildField::TimeStart => a.time_start.cmp(&b.time_start),
            BuildField::TimeEnd => a.time_end.cmp(&b.time_end),
            BuildField::Status => a.status.as_str().cmp(b.status.as_str()),
            BuildField::Commit => a.commit.cmp(&b.commit),
            BuildField::Plan => a.plan_id.cmp(&b.plan_id),
            BuildField::Branch => a.branch_id.cmp(&b.branch_id),
            BuildField::Repo => a.repo_id.cmp(&b.repo_id),
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Parse a comma-separated field list such as `-time_queue,id`.
///
/// A leading `-` sorts that field descending. An empty list falls back to
/// [`DEFAULT_ORDER`].
pub fn parse_order(spec: &str) -> Result<Vec<OrderField>, QueryError> {
    let fields = spec
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.strip_prefix('-') {
            Some(name) => Ok(OrderField {
                field: name.parse()?,
                descending: true,
            }),
            None => Ok(OrderField {
                field: part.parse()?,
                descending: false,
            }),
        })
        .collect::<Result<Vec<_>, QueryError>>()?;

    if fields.is_empty() {
        parse_order(DEFAULT_ORDER)
    } else {
        Ok(fields)
    }
}

/// A page number that is not an integer counts as missing.
pub fn parse_page(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}

pub fn parse_per_page(raw: Option<&str>) -> Result<usize, QueryError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_PER_PAGE);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if (1..=MAX_PER_PAGE).contains(&n) => Ok(n),
        _ => Err(QueryError::InvalidPageSize(raw.to_string())),
    }
}

/// Pick the page to serve: a missing page is the first one, a page outside
/// `1..=num_pages` is the last one.
pub fn resolve_page(total: u64, per_page: usize, requested: Option<i64>) -> usize {
    let num_pages = num_pages(total, per_page);
    match requested {
        None => 1,
        Some(n) if n >= 1 && n as u64 <= num_pages as u64 => n as usize,
        Some(_) => num_pages,
    }
}

pub fn num_pages(total: u64, per_page: usize) -> usize {
    let per_page = per_page.max(1) as u64;
    (total.div_ceil(per_page) as usize).max(1)
}

/// A filtered, ordered, paginated build listing.
#[derive(Debug, Clone)]
pub struct BuildQuery {
    pub filter: BuildFilter,
    /// Staff see every build; everyone else only builds of public plans.
    pub staff: bool,
    pub order: Vec<OrderField>,
    pub page: Option<i64>,
    pub per_page: usize,
}

impl BuildQuery {
    pub fn new(filter: BuildFilter, staff: bool) -> Self {
        Self {
            filter,
            staff,
            order: vec![OrderField {
                field: BuildField::TimeQueue,
                descending: true,
            }],
            page: None,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    /// Order builds by the requested fields, ties broken by id.
    pub fn compare(&self, a: &CiBuild, b: &CiBuild) -> Ordering {
        self.order
            .iter()
            .map(|order| order.compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildPage {
    pub builds: Vec<CiBuild>,
    pub page: usize,
    pub per_page: usize,
    pub total: u64,
    pub num_pages: usize,
}

impl BuildPage {
    /// Slice an already filtered and sorted build list into the requested page.
    pub fn from_sorted(builds: Vec<CiBuild>, query: &BuildQuery) -> Self {
        let total = builds.len() as u64;
        let page = resolve_page(total, query.per_page, query.page);
        let builds = builds
            .into_iter()
            .skip((page - 1) * query.per_page)
            .take(query.per_page)
            .collect();
        Self {
            builds,
            page,
            per_page: query.per_page,
            total,
            num_pages: num_pages(total, query.per_page),
        }
    }
}
