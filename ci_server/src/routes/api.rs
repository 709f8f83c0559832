//! JSON views over repositories, branches, commits and builds.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::branch::CiBranch;
use crate::models::build::{BuildStatus, CiBuild};
use crate::models::repository::CiRepository;
use crate::models::UnknownVariant;
use crate::services::build_service::{self, BuildError};
use crate::services::status_worker::StatusQueue;
use crate::store::query::{parse_order, parse_page, parse_per_page, QueryError};
use crate::store::{BuildFilter, BuildPage, BuildQuery, Store};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("staff only")]
    Forbidden,
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    UnknownValue(#[from] UnknownVariant),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Query(_) | ApiError::UnknownValue(_) => StatusCode::BAD_REQUEST,
            ApiError::Build(BuildError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Build(BuildError::InvalidTransition { .. } | BuildError::Conflict(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Build(BuildError::Store(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Paging, ordering and filter parameters shared by build lists.
///
/// Kept as raw strings so that a bad page number can fall back instead of
/// rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct BuildListParams {
    pub page: Option<String>,
    pub per_page: Option<String>,
    #[serde(alias = "order")]
    pub order_by: Option<String>,
    pub status: Option<String>,
    pub plan: Option<i64>,
    pub commit: Option<String>,
    pub repo: Option<i64>,
    pub branch: Option<i64>,
}

impl BuildListParams {
    /// Build a query on top of `scope`. Parameters never widen the scope.
    fn into_query(self, scope: BuildFilter, staff: bool) -> Result<BuildQuery, ApiError> {
        let mut filter = scope;
        filter.repo_id = filter.repo_id.or(self.repo);
        filter.branch_id = filter.branch_id.or(self.branch);
        filter.plan_id = filter.plan_id.or(self.plan);
        filter.commit = filter.commit.or(self.commit);
        if let Some(status) = self.status.as_deref() {
            filter.status = Some(status.parse::<BuildStatus>()?);
        }

        let mut query = BuildQuery::new(filter, staff);
        if let Some(order) = self.order_by.as_deref() {
            query.order = parse_order(order)?;
        }
        query.page = parse_page(self.page.as_deref());
        query.per_page = parse_per_page(self.per_page.as_deref())?;
        Ok(query)
    }
}

#[derive(Debug, Serialize)]
pub struct RepositoryJson {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub title: String,
    pub public: bool,
}

impl From<&CiRepository> for RepositoryJson {
    fn from(repo: &CiRepository) -> Self {
        Self {
            id: repo.id,
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            title: repo.full_name(),
            public: repo.public,
        }
    }
}

/// One repository row of the overview. `columns[i]` holds the builds shown
/// under the overview's `columns[i]` plan, or `None` when the repository has
/// no builds for it.
#[derive(Debug, Serialize)]
pub struct RepositoryRowJson {
    #[serde(flatten)]
    pub repository: RepositoryJson,
    pub build_count: u64,
    pub columns: Vec<Option<Vec<CiBuild>>>,
}

#[derive(Debug, Serialize)]
pub struct RepositoryListJson {
    pub columns: Vec<String>,
    pub repos: Vec<RepositoryRowJson>,
}

/// Repository overview with one column per dashboard plan.
pub async fn list_repositories(
    store: &dyn Store,
    owner: Option<&str>,
    staff: bool,
) -> Result<RepositoryListJson, ApiError> {
    let repos = store.list_repositories(staff).await?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for repo in repos.iter().filter(|r| owner.is_none_or(|o| r.owner == o)) {
        let mut cells: Vec<(String, Vec<CiBuild>)> = Vec::new();
        for plan in store.dashboard_plans(repo.id).await? {
            if !staff && !plan.public {
                continue;
            }
            if !columns.contains(&plan.name) {
                columns.push(plan.name.clone());
            }
            let builds = store
                .latest_builds(repo.id, plan.id, plan.dashboard.build_limit())
                .await?;
            if !builds.is_empty() {
                cells.push((plan.name, builds));
            }
        }

        let mut count = BuildQuery::new(
            BuildFilter {
                repo_id: Some(repo.id),
                ..Default::default()
            },
            staff,
        );
        count.per_page = 1;
        let build_count = store.query_builds(&count).await?.total;

        rows.push((RepositoryJson::from(repo), build_count, cells));
    }

    columns.sort();
    let repos = rows
        .into_iter()
        .map(|(repository, build_count, mut cells)| RepositoryRowJson {
            repository,
            build_count,
            columns: columns
                .iter()
                .map(|column| {
                    cells
                        .iter()
                        .position(|(name, _)| name == column)
                        .map(|i| cells.swap_remove(i).1)
                })
                .collect(),
        })
        .collect();

    Ok(RepositoryListJson { columns, repos })
}

#[derive(Debug, Serialize)]
pub struct BuildListJson {
    pub repository: RepositoryJson,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<CiBranch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(flatten)]
    pub page: BuildPage,
}

async fn visible_repository(
    store: &dyn Store,
    owner: &str,
    name: &str,
    staff: bool,
) -> Result<CiRepository, ApiError> {
    store
        .find_repository(owner, name)
        .await?
        .filter(|repo| staff || repo.public)
        .ok_or(ApiError::NotFound)
}

pub async fn repository_builds(
    store: &dyn Store,
    owner: &str,
    name: &str,
    params: BuildListParams,
    staff: bool,
) -> Result<BuildListJson, ApiError> {
    let repo = visible_repository(store, owner, name, staff).await?;
    let scope = BuildFilter {
        repo_id: Some(repo.id),
        ..Default::default()
    };
    let page = store
        .query_builds(&params.into_query(scope, staff)?)
        .await?;
    Ok(BuildListJson {
        repository: RepositoryJson::from(&repo),
        branch: None,
        commit: None,
        page,
    })
}

pub async fn branch_builds(
    store: &dyn Store,
    owner: &str,
    name: &str,
    branch: &str,
    params: BuildListParams,
    staff: bool,
) -> Result<BuildListJson, ApiError> {
    let repo = visible_repository(store, owner, name, staff).await?;
    let branch = store
        .find_branch(repo.id, branch)
        .await?
        .ok_or(ApiError::NotFound)?;
    let scope = BuildFilter {
        repo_id: Some(repo.id),
        branch_id: Some(branch.id),
        ..Default::default()
    };
    let page = store
        .query_builds(&params.into_query(scope, staff)?)
        .await?;
    Ok(BuildListJson {
        repository: RepositoryJson::from(&repo),
        branch: Some(branch),
        commit: None,
        page,
    })
}

pub async fn commit_builds(
    store: &dyn Store,
    owner: &str,
    name: &str,
    sha: &str,
    params: BuildListParams,
    staff: bool,
) -> Result<BuildListJson, ApiError> {
    let repo = visible_repository(store, owner, name, staff).await?;
    let scope = BuildFilter {
        repo_id: Some(repo.id),
        commit: Some(sha.to_string()),
        ..Default::default()
    };
    let page = store
        .query_builds(&params.into_query(scope, staff)?)
        .await?;
    Ok(BuildListJson {
        repository: RepositoryJson::from(&repo),
        branch: None,
        commit: Some(sha.to_string()),
        page,
    })
}

/// Builds across all repositories. Open to staff only, since repository
/// visibility is not part of the build filter.
pub async fn list_builds(
    store: &dyn Store,
    params: BuildListParams,
    staff: bool,
) -> Result<BuildPage, ApiError> {
    if !staff {
        return Err(ApiError::Forbidden);
    }
    Ok(store
        .query_builds(&params.into_query(BuildFilter::default(), staff)?)
        .await?)
}

#[derive(Debug, Serialize)]
pub struct BuildDetailJson {
    #[serde(flatten)]
    pub build: CiBuild,
    pub repository: String,
    pub plan: String,
    pub branch: Option<String>,
    pub duration_ms: Option<i64>,
}

pub async fn build_detail(
    store: &dyn Store,
    build_id: i64,
    staff: bool,
) -> Result<BuildDetailJson, ApiError> {
    let build = store.get_build(build_id).await?.ok_or(ApiError::NotFound)?;
    let repo = store
        .get_repository(build.repo_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let plan = store
        .get_plan(build.plan_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !staff && !(repo.public && plan.public) {
        return Err(ApiError::NotFound);
    }

    let branch = match build.branch_id {
        Some(id) => store.get_branch(id).await?.map(|b| b.name),
        None => None,
    };
    let duration_ms = match (build.time_start, build.time_end) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
        _ => None,
    };

    Ok(BuildDetailJson {
        build,
        repository: repo.full_name(),
        plan: plan.name,
        branch,
        duration_ms,
    })
}

/// Apply a status change reported for a build, then queue the commit status.
pub async fn set_build_status(
    store: &dyn Store,
    queue: &StatusQueue,
    build_id: i64,
    status: &str,
    staff: bool,
) -> Result<CiBuild, ApiError> {
    if !staff {
        return Err(ApiError::Forbidden);
    }
    let status: BuildStatus = status.parse()?;
    let build = build_service::update_status(store, build_id, status).await?;
    queue.enqueue(build.id);
    Ok(build)
}

/// Soft-delete a branch. Its builds are kept.
pub async fn remove_branch(
    store: &dyn Store,
    owner: &str,
    name: &str,
    branch: &str,
    staff: bool,
) -> Result<(), ApiError> {
    if !staff {
        return Err(ApiError::Forbidden);
    }
    let repo = visible_repository(store, owner, name, staff).await?;
    let branch = store
        .find_branch(repo.id, branch)
        .await?
        .ok_or(ApiError::NotFound)?;
    store.remove_branch(branch.id).await?;
    tracing::info!(repo = %repo.full_name(), branch = %branch.name, "Branch removed");
    Ok(())
}
