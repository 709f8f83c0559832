//! PostgreSQL store on diesel-async with a deadpool connection pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::models::branch::{BranchState, CiBranch, NewCiBranch};
use crate::models::build::{BuildStatus, CiBuild, NewCiBuild};
use crate::models::delivery::NewCiWebhookDelivery;
use crate::models::plan::{CiPlan, DashboardMode, NewCiPlan, NewCiPlanRepository, PlanType};
use crate::models::release::{CiRelease, NewCiRelease};
use crate::models::repository::{CiRepository, NewCiRepository};
use crate::schema::{
    ci_branches, ci_builds, ci_plan_repositories, ci_plans, ci_releases, ci_repositories,
    ci_webhook_deliveries,
};

use super::query::{num_pages, resolve_page, BuildField, BuildPage, BuildQuery, OrderField};
use super::Store;

pub type PgPool = Pool<AsyncPgConnection>;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn connect(database_url: &str, max_connections: usize) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        Ok(Self { pool })
    }

    /// Create the dashboard tables if they do not exist.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        crate::migration::run_migration(&mut conn).await
    }

    async fn conn(&self) -> anyhow::Result<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
    }
}

/// Builds matching the query filter and visibility, unordered.
fn filtered_builds(query: &BuildQuery) -> ci_builds::BoxedQuery<'static, Pg> {
    let filter = &query.filter;
    let mut builds = ci_builds::table.into_boxed();

    if let Some(repo_id) = filter.repo_id {
        builds = builds.filter(ci_builds::repo_id.eq(repo_id));
    }
    if let Some(branch_id) = filter.branch_id {
        builds = builds.filter(ci_builds::branch_id.eq(branch_id));
    }
    if let Some(plan_id) = filter.plan_id {
        builds = builds.filter(ci_builds::plan_id.eq(plan_id));
    }
    if let Some(commit) = &filter.commit {
        builds = builds.filter(ci_builds::commit.eq(commit.clone()));
    }
    if let Some(status) = filter.status {
        builds = builds.filter(ci_builds::status.eq(status));
    }
    if !query.staff {
        let public_plans = ci_plans::table
            .filter(ci_plans::public.eq(true))
            .select(ci_plans::id);
        builds = builds.filter(ci_builds::plan_id.eq_any(public_plans));
    }

    builds
}

fn order_builds(
    builds: ci_builds::BoxedQuery<'static, Pg>,
    order: OrderField,
) -> ci_builds::BoxedQuery<'static, Pg> {
    macro_rules! by {
        ($column:expr) => {
            if order.descending {
                builds.then_order_by($column.desc())
            } else {
                builds.then_order_by($column.asc())
            }
        };
    }

    match order.field {
        BuildField::Id => by!(ci_builds::id),
        BuildField::TimeQueue => by!(ci_builds::time_queue),
        BuildField::TimeStart => by!(ci_builds::time_start),
        BuildField::TimeEnd => by!(ci_builds::time_end),
        BuildField::Status => by!(ci_builds::status),
        BuildField::Commit => by!(ci_builds::commit),
        BuildField::Plan => by!(ci_builds::plan_id),
        BuildField::Branch => by!(ci_builds::branch_id),
        BuildField::Repo => by!(ci_builds::repo_id),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_repository(&self, new_repo: NewCiRepository) -> anyhow::Result<CiRepository> {
        let mut conn = self.conn().await?;
        let result = diesel::insert_into(ci_repositories::table)
            .values(&new_repo)
            .get_result::<CiRepository>(&mut conn)
            .await?;
        Ok(result)
    }

    async fn get_repository(&self, repo_id: i64) -> anyhow::Result<Option<CiRepository>> {
        let mut conn = self.conn().await?;
        let result = ci_repositories::table
            .find(repo_id)
            .first::<CiRepository>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_repository_by_github_id(
        &self,
        github_id: i64,
    ) -> anyhow::Result<Option<CiRepository>> {
        let mut conn = self.conn().await?;
        let result = ci_repositories::table
            .filter(ci_repositories::github_id.eq(github_id))
            .first::<CiRepository>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> anyhow::Result<Option<CiRepository>> {
        let mut conn = self.conn().await?;
        let result = ci_repositories::table
            .filter(ci_repositories::owner.eq(owner))
            .filter(ci_repositories::name.eq(name))
            .first::<CiRepository>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn list_repositories(&self, include_private: bool) -> anyhow::Result<Vec<CiRepository>> {
        let mut conn = self.conn().await?;
        let mut query = ci_repositories::table.into_boxed();
        if !include_private {
            query = query.filter(ci_repositories::public.eq(true));
        }
        let results = query
            .order((ci_repositories::owner.asc(), ci_repositories::name.asc()))
            .load::<CiRepository>(&mut conn)
            .await?;
        Ok(results)
    }

    async fn get_or_create_branch(
        &self,
        repo_id: i64,
        name: &str,
    ) -> anyhow::Result<(CiBranch, bool)> {
        let mut conn = self.conn().await?;
        let new_branch = NewCiBranch {
            repo_id,
            name: name.to_string(),
            state: BranchState::Active,
        };

        // The unique (repo_id, name) index settles concurrent inserts.
        let inserted = diesel::insert_into(ci_branches::table)
            .values(&new_branch)
            .on_conflict((ci_branches::repo_id, ci_branches::name))
            .do_nothing()
            .get_result::<CiBranch>(&mut conn)
            .await
            .optional()?;
        if let Some(branch) = inserted {
            return Ok((branch, true));
        }

        let existing = ci_branches::table
            .filter(ci_branches::repo_id.eq(repo_id))
            .filter(ci_branches::name.eq(name))
            .first::<CiBranch>(&mut conn)
            .await?;
        Ok((existing, false))
    }

    async fn resurrect_branch(&self, branch_id: i64) -> anyhow::Result<CiBranch> {
        let mut conn = self.conn().await?;
        diesel::update(
            ci_branches::table
                .find(branch_id)
                .filter(ci_branches::state.eq(BranchState::Removed)),
        )
        .set((
            ci_branches::state.eq(BranchState::Active),
            ci_branches::write_date.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        let branch = ci_branches::table
            .find(branch_id)
            .first::<CiBranch>(&mut conn)
            .await?;
        Ok(branch)
    }

    async fn remove_branch(&self, branch_id: i64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(ci_branches::table.find(branch_id))
            .set((
                ci_branches::state.eq(BranchState::Removed),
                ci_branches::write_date.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_branch(&self, branch_id: i64) -> anyhow::Result<Option<CiBranch>> {
        let mut conn = self.conn().await?;
        let result = ci_branches::table
            .find(branch_id)
            .first::<CiBranch>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_branch(&self, repo_id: i64, name: &str) -> anyhow::Result<Option<CiBranch>> {
        let mut conn = self.conn().await?;
        let result = ci_branches::table
            .filter(ci_branches::repo_id.eq(repo_id))
            .filter(ci_branches::name.eq(name))
            .first::<CiBranch>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn create_plan(&self, new_plan: NewCiPlan) -> anyhow::Result<CiPlan> {
        let mut conn = self.conn().await?;
        let result = diesel::insert_into(ci_plans::table)
            .values(&new_plan)
            .get_result::<CiPlan>(&mut conn)
            .await?;
        Ok(result)
    }

    async fn get_plan(&self, plan_id: i64) -> anyhow::Result<Option<CiPlan>> {
        let mut conn = self.conn().await?;
        let result = ci_plans::table
            .find(plan_id)
            .first::<CiPlan>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_plan_by_name(&self, name: &str) -> anyhow::Result<Option<CiPlan>> {
        let mut conn = self.conn().await?;
        let result = ci_plans::table
            .filter(ci_plans::name.eq(name))
            .first::<CiPlan>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn link_plan(&self, plan_id: i64, repo_id: i64, active: bool) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(ci_plan_repositories::table)
            .values(&NewCiPlanRepository {
                plan_id,
                repo_id,
                active,
            })
            .on_conflict((ci_plan_repositories::plan_id, ci_plan_repositories::repo_id))
            .do_update()
            .set(ci_plan_repositories::active.eq(active))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn push_plans(&self, repo_id: i64, types: &[PlanType]) -> anyhow::Result<Vec<CiPlan>> {
        let mut conn = self.conn().await?;
        let results = ci_plans::table
            .inner_join(ci_plan_repositories::table)
            .filter(ci_plan_repositories::repo_id.eq(repo_id))
            .filter(ci_plan_repositories::active.eq(true))
            .filter(ci_plans::active.eq(true))
            .filter(ci_plans::plan_type.eq_any(types.to_vec()))
            .order(ci_plans::id.asc())
            .select(CiPlan::as_select())
            .load::<CiPlan>(&mut conn)
            .await?;
        Ok(results)
    }

    async fn dashboard_plans(&self, repo_id: i64) -> anyhow::Result<Vec<CiPlan>> {
        let mut conn = self.conn().await?;
        let results = ci_plans::table
            .inner_join(ci_plan_repositories::table)
            .filter(ci_plan_repositories::repo_id.eq(repo_id))
            .filter(ci_plans::dashboard.ne(DashboardMode::None))
            .order(ci_plans::name.asc())
            .select(CiPlan::as_select())
            .load::<CiPlan>(&mut conn)
            .await?;
        Ok(results)
    }

    async fn create_build(&self, new_build: NewCiBuild) -> anyhow::Result<CiBuild> {
        let mut conn = self.conn().await?;
        let result = diesel::insert_into(ci_builds::table)
            .values(&new_build)
            .get_result::<CiBuild>(&mut conn)
            .await?;
        Ok(result)
    }

    async fn create_builds(
        &self,
        claim: Option<Uuid>,
        new_builds: Vec<NewCiBuild>,
    ) -> anyhow::Result<Option<Vec<CiBuild>>> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            async move {
                if let Some(delivery_id) = claim {
                    let inserted = diesel::insert_into(ci_webhook_deliveries::table)
                        .values(&NewCiWebhookDelivery { delivery_id })
                        .on_conflict(ci_webhook_deliveries::delivery_id)
                        .do_nothing()
                        .execute(conn)
                        .await?;
                    if inserted == 0 {
                        return Ok(None);
                    }
                }
                if new_builds.is_empty() {
                    return Ok(Some(Vec::new()));
                }
                let builds = diesel::insert_into(ci_builds::table)
                    .values(&new_builds)
                    .get_results::<CiBuild>(conn)
                    .await?;
                Ok(Some(builds))
            }
            .scope_boxed()
        })
        .await
    }

    async fn get_build(&self, build_id: i64) -> anyhow::Result<Option<CiBuild>> {
        let mut conn = self.conn().await?;
        let result = ci_builds::table
            .find(build_id)
            .first::<CiBuild>(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn transition_build(
        &self,
        build_id: i64,
        from: BuildStatus,
        to: BuildStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<CiBuild>> {
        let mut conn = self.conn().await?;
        let target = ci_builds::table
            .find(build_id)
            .filter(ci_builds::status.eq(from));

        let result = if to == BuildStatus::Running {
            diesel::update(target)
                .set((ci_builds::status.eq(to), ci_builds::time_start.eq(Some(at))))
                .get_result::<CiBuild>(&mut conn)
                .await
                .optional()?
        } else if to.is_terminal() {
            diesel::update(target)
                .set((ci_builds::status.eq(to), ci_builds::time_end.eq(Some(at))))
                .get_result::<CiBuild>(&mut conn)
                .await
                .optional()?
        } else {
            diesel::update(target)
                .set(ci_builds::status.eq(to))
                .get_result::<CiBuild>(&mut conn)
                .await
                .optional()?
        };
        Ok(result)
    }

    async fn query_builds(&self, query: &BuildQuery) -> anyhow::Result<BuildPage> {
        let mut conn = self.conn().await?;

        let total: i64 = filtered_builds(query)
            .count()
            .get_result(&mut conn)
            .await?;
        let total = total.max(0) as u64;
        let page = resolve_page(total, query.per_page, query.page);

        let mut builds = filtered_builds(query);
        for order in &query.order {
            builds = order_builds(builds, *order);
        }
        let builds = builds
            .then_order_by(ci_builds::id.asc())
            .offset(((page - 1) * query.per_page) as i64)
            .limit(query.per_page as i64)
            .load::<CiBuild>(&mut conn)
            .await?;

        Ok(BuildPage {
            builds,
            page,
            per_page: query.per_page,
            total,
            num_pages: num_pages(total, query.per_page),
        })
    }

    async fn latest_builds(
        &self,
        repo_id: i64,
        plan_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<CiBuild>> {
        let mut conn = self.conn().await?;
        let results = ci_builds::table
            .filter(ci_builds::repo_id.eq(repo_id))
            .filter(ci_builds::plan_id.eq(plan_id))
            .order((ci_builds::time_queue.desc(), ci_builds::id.desc()))
            .limit(limit as i64)
            .load::<CiBuild>(&mut conn)
            .await?;
        Ok(results)
    }

    async fn get_or_create_release(
        &self,
        repo_id: i64,
        git_tag: &str,
    ) -> anyhow::Result<(CiRelease, bool)> {
        let mut conn = self.conn().await?;
        let inserted = diesel::insert_into(ci_releases::table)
            .values(&NewCiRelease {
                repo_id,
                git_tag: git_tag.to_string(),
            })
            .on_conflict((ci_releases::repo_id, ci_releases::git_tag))
            .do_nothing()
            .get_result::<CiRelease>(&mut conn)
            .await
            .optional()?;
        if let Some(release) = inserted {
            return Ok((release, true));
        }

        let existing = ci_releases::table
            .filter(ci_releases::repo_id.eq(repo_id))
            .filter(ci_releases::git_tag.eq(git_tag))
            .first::<CiRelease>(&mut conn)
            .await?;
        Ok((existing, false))
    }
}
