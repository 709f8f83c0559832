//! Persistence for repositories, branches, plans, builds and releases.
//!
//! [`PgStore`] is the production backend. [`MemoryStore`] backs local
//! development without a database and the test suite.
//!
//! Operations that run under concurrent webhook delivery are atomic in every
//! backend: branch and release get-or-create, and a delivery claim together
//! with its builds.

pub mod memory;
pub mod pg;
pub mod query;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::branch::CiBranch;
use crate::models::build::{BuildStatus, CiBuild, NewCiBuild};
use crate::models::plan::{CiPlan, NewCiPlan, PlanType};
use crate::models::release::CiRelease;
use crate::models::repository::{CiRepository, NewCiRepository};

pub use memory::MemoryStore;
pub use pg::PgStore;
pub use query::{BuildFilter, BuildPage, BuildQuery};

#[async_trait]
pub trait Store: Send + Sync {
    // ── Repositories ──

    async fn create_repository(&self, new_repo: NewCiRepository) -> anyhow::Result<CiRepository>;

    async fn get_repository(&self, repo_id: i64) -> anyhow::Result<Option<CiRepository>>;

    async fn find_repository_by_github_id(
        &self,
        github_id: i64,
    ) -> anyhow::Result<Option<CiRepository>>;

    async fn find_repository(&self, owner: &str, name: &str)
        -> anyhow::Result<Option<CiRepository>>;

    /// Repositories ordered by owner and name, private ones only when asked.
    async fn list_repositories(&self, include_private: bool) -> anyhow::Result<Vec<CiRepository>>;

    // ── Branches ──

    /// Fetch the (repository, name) branch, inserting an active one if absent.
    /// Returns the row and whether this call created it.
    async fn get_or_create_branch(
        &self,
        repo_id: i64,
        name: &str,
    ) -> anyhow::Result<(CiBranch, bool)>;

    /// Move a removed branch back to active. A branch that is already active
    /// is left alone. Returns the current row.
    async fn resurrect_branch(&self, branch_id: i64) -> anyhow::Result<CiBranch>;

    /// Soft-delete a branch.
    async fn remove_branch(&self, branch_id: i64) -> anyhow::Result<()>;

    async fn get_branch(&self, branch_id: i64) -> anyhow::Result<Option<CiBranch>>;

    async fn find_branch(&self, repo_id: i64, name: &str) -> anyhow::Result<Option<CiBranch>>;

    // ── Plans ──

    async fn create_plan(&self, new_plan: NewCiPlan) -> anyhow::Result<CiPlan>;

    async fn get_plan(&self, plan_id: i64) -> anyhow::Result<Option<CiPlan>>;

    async fn find_plan_by_name(&self, name: &str) -> anyhow::Result<Option<CiPlan>>;

    /// Bind a plan to a repository, or update the existing binding's flag.
    async fn link_plan(&self, plan_id: i64, repo_id: i64, active: bool) -> anyhow::Result<()>;

    /// Active plans of the given types bound to the repository through an
    /// active link, ordered by id.
    async fn push_plans(&self, repo_id: i64, types: &[PlanType]) -> anyhow::Result<Vec<CiPlan>>;

    /// Plans bound to the repository that show builds on the overview,
    /// ordered by name.
    async fn dashboard_plans(&self, repo_id: i64) -> anyhow::Result<Vec<CiPlan>>;

    // ── Builds ──

    async fn create_build(&self, new_build: NewCiBuild) -> anyhow::Result<CiBuild>;

    /// Insert a batch of builds atomically. With `claim` set the delivery id
    /// is recorded in the same transaction; if it was already recorded
    /// nothing is written and `None` is returned. On error neither the
    /// builds nor the claim are kept.
    async fn create_builds(
        &self,
        claim: Option<Uuid>,
        new_builds: Vec<NewCiBuild>,
    ) -> anyhow::Result<Option<Vec<CiBuild>>>;

    async fn get_build(&self, build_id: i64) -> anyhow::Result<Option<CiBuild>>;

    /// Compare-and-set the build status. Returns `None` when the build is no
    /// longer in `from`. Entering `running` stamps `time_start`; entering a
    /// terminal state stamps `time_end`.
    async fn transition_build(
        &self,
        build_id: i64,
        from: BuildStatus,
        to: BuildStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<CiBuild>>;

    async fn query_builds(&self, query: &BuildQuery) -> anyhow::Result<BuildPage>;

    /// Newest builds of a plan for a repository.
    async fn latest_builds(
        &self,
        repo_id: i64,
        plan_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<CiBuild>>;

    // ── Releases ──

    /// Fetch the (repository, tag) release, inserting it if absent.
    /// Returns the row and whether this call created it.
    async fn get_or_create_release(
        &self,
        repo_id: i64,
        git_tag: &str,
    ) -> anyhow::Result<(CiRelease, bool)>;
}
