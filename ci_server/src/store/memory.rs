//! In-process store. Every operation runs under one mutex, which makes the
//! get-or-create operations atomic.

use std::collections::HashSet;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::branch::{BranchState, CiBranch};
use crate::models::build::{BuildStatus, CiBuild, NewCiBuild};
use crate::models::plan::{CiPlan, CiPlanRepository, DashboardMode, NewCiPlan, PlanType};
use crate::models::release::CiRelease;
use crate::models::repository::{CiRepository, NewCiRepository};

use super::query::{BuildPage, BuildQuery};
use super::Store;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    repositories: Vec<CiRepository>,
    branches: Vec<CiBranch>,
    plans: Vec<CiPlan>,
    links: Vec<CiPlanRepository>,
    builds: Vec<CiBuild>,
    releases: Vec<CiRelease>,
    deliveries: HashSet<Uuid>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_build(&mut self, new_build: NewCiBuild) -> CiBuild {
        let build = CiBuild {
            id: self.next_id(),
            repo_id: new_build.repo_id,
            plan_id: new_build.plan_id,
            branch_id: new_build.branch_id,
            commit: new_build.commit,
            commit_message: new_build.commit_message,
            build_type: new_build.build_type,
            status: new_build.status,
            delivery_id: new_build.delivery_id,
            time_queue: Utc::now(),
            time_start: None,
            time_end: None,
        };
        self.builds.push(build.clone());
        build
    }

    fn linked_plans(&self, repo_id: i64, active_link: bool) -> impl Iterator<Item = &CiPlan> {
        self.plans.iter().filter(move |plan| {
            self.links.iter().any(|link| {
                link.plan_id == plan.id && link.repo_id == repo_id && (link.active || !active_link)
            })
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    #[cfg(test)]
    fail_next_batch: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_builds` call fail before writing anything.
    #[cfg(test)]
    pub fn fail_next_batch(&self) {
        self.fail_next_batch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_repository(&self, new_repo: NewCiRepository) -> anyhow::Result<CiRepository> {
        let mut state = self.state.lock().await;
        if state
            .repositories
            .iter()
            .any(|r| r.github_id == new_repo.github_id)
        {
            anyhow::bail!("repository with github id {} already exists", new_repo.github_id);
        }
        let repo = CiRepository {
            id: state.next_id(),
            github_id: new_repo.github_id,
            owner: new_repo.owner,
            name: new_repo.name,
            public: new_repo.public,
            release_tag_regex: new_repo.release_tag_regex,
            create_date: Utc::now(),
        };
        state.repositories.push(repo.clone());
        Ok(repo)
    }

    async fn get_repository(&self, repo_id: i64) -> anyhow::Result<Option<CiRepository>> {
        let state = self.state.lock().await;
        Ok(state.repositories.iter().find(|r| r.id == repo_id).cloned())
    }

    async fn find_repository_by_github_id(
        &self,
        github_id: i64,
    ) -> anyhow::Result<Option<CiRepository>> {
        let state = self.state.lock().await;
        Ok(state
            .repositories
            .iter()
            .find(|r| r.github_id == github_id)
            .cloned())
    }

    async fn find_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> anyhow::Result<Option<CiRepository>> {
        let state = self.state.lock().await;
        Ok(state
            .repositories
            .iter()
            .find(|r| r.owner == owner && r.name == name)
            .cloned())
    }

    async fn list_repositories(&self, include_private: bool) -> anyhow::Result<Vec<CiRepository>> {
        let state = self.state.lock().await;
        let mut repos: Vec<CiRepository> = state
            .repositories
            .iter()
            .filter(|r| include_private || r.public)
            .cloned()
            .collect();
        repos.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));
        Ok(repos)
    }

    async fn get_or_create_branch(
        &self,
        repo_id: i64,
        name: &str,
    ) -> anyhow::Result<(CiBranch, bool)> {
        let mut state = self.state.lock().await;
        if let Some(branch) = state
            .branches
            .iter()
            .find(|b| b.repo_id == repo_id && b.name == name)
        {
            return Ok((branch.clone(), false));
        }
        let now = Utc::now();
        let branch = CiBranch {
            id: state.next_id(),
            repo_id,
            name: name.to_string(),
            state: BranchState::Active,
            create_date: now,
            write_date: now,
        };
        state.branches.push(branch.clone());
        Ok((branch, true))
    }

    async fn resurrect_branch(&self, branch_id: i64) -> anyhow::Result<CiBranch> {
        let mut state = self.state.lock().await;
        let branch = state
            .branches
            .iter_mut()
            .find(|b| b.id == branch_id)
            .ok_or_else(|| anyhow::anyhow!("branch {branch_id} not found"))?;
        if branch.state == BranchState::Removed {
            branch.state = BranchState::Active;
            branch.write_date = Utc::now();
        }
        Ok(branch.clone())
    }

    async fn remove_branch(&self, branch_id: i64) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let branch = state
            .branches
            .iter_mut()
            .find(|b| b.id == branch_id)
            .ok_or_else(|| anyhow::anyhow!("branch {branch_id} not found"))?;
        branch.state = BranchState::Removed;
        branch.write_date = Utc::now();
        Ok(())
    }

    async fn get_branch(&self, branch_id: i64) -> anyhow::Result<Option<CiBranch>> {
        let state = self.state.lock().await;
        Ok(state.branches.iter().find(|b| b.id == branch_id).cloned())
    }

    async fn find_branch(&self, repo_id: i64, name: &str) -> anyhow::Result<Option<CiBranch>> {
        let state = self.state.lock().await;
        Ok(state
            .branches
            .iter()
            .find(|b| b.repo_id == repo_id && b.name == name)
            .cloned())
    }

    async fn create_plan(&self, new_plan: NewCiPlan) -> anyhow::Result<CiPlan> {
        let mut state = self.state.lock().await;
        if state.plans.iter().any(|p| p.name == new_plan.name) {
            anyhow::bail!("plan {:?} already exists", new_plan.name);
        }
        let plan = CiPlan {
            id: state.next_id(),
            name: new_plan.name,
            plan_type: new_plan.plan_type,
            active: new_plan.active,
            public: new_plan.public,
            regex: new_plan.regex,
            context: new_plan.context,
            dashboard: new_plan.dashboard,
            create_date: Utc::now(),
        };
        state.plans.push(plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: i64) -> anyhow::Result<Option<CiPlan>> {
        let state = self.state.lock().await;
        Ok(state.plans.iter().find(|p| p.id == plan_id).cloned())
    }

    async fn find_plan_by_name(&self, name: &str) -> anyhow::Result<Option<CiPlan>> {
        let state = self.state.lock().await;
        Ok(state.plans.iter().find(|p| p.name == name).cloned())
    }

    async fn link_plan(&self, plan_id: i64, repo_id: i64, active: bool) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(link) = state
            .links
            .iter_mut()
            .find(|l| l.plan_id == plan_id && l.repo_id == repo_id)
        {
            link.active = active;
            return Ok(());
        }
        let id = state.next_id();
        state.links.push(CiPlanRepository {
            id,
            plan_id,
            repo_id,
            active,
        });
        Ok(())
    }

    async fn push_plans(&self, repo_id: i64, types: &[PlanType]) -> anyhow::Result<Vec<CiPlan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<CiPlan> = state
            .linked_plans(repo_id, true)
            .filter(|p| p.active && types.contains(&p.plan_type))
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.id);
        Ok(plans)
    }

    async fn dashboard_plans(&self, repo_id: i64) -> anyhow::Result<Vec<CiPlan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<CiPlan> = state
            .linked_plans(repo_id, false)
            .filter(|p| p.dashboard != DashboardMode::None)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plans)
    }

    async fn create_build(&self, new_build: NewCiBuild) -> anyhow::Result<CiBuild> {
        let mut state = self.state.lock().await;
        Ok(state.insert_build(new_build))
    }

    async fn create_builds(
        &self,
        claim: Option<Uuid>,
        new_builds: Vec<NewCiBuild>,
    ) -> anyhow::Result<Option<Vec<CiBuild>>> {
        let mut state = self.state.lock().await;
        #[cfg(test)]
        if self.fail_next_batch.swap(false, Ordering::SeqCst) {
            anyhow::bail!("build batch insert failed");
        }
        if let Some(delivery_id) = claim {
            if !state.deliveries.insert(delivery_id) {
                return Ok(None);
            }
        }
        let builds = new_builds
            .into_iter()
            .map(|new_build| state.insert_build(new_build))
            .collect();
        Ok(Some(builds))
    }

    async fn get_build(&self, build_id: i64) -> anyhow::Result<Option<CiBuild>> {
        let state = self.state.lock().await;
        Ok(state.builds.iter().find(|b| b.id == build_id).cloned())
    }

    async fn transition_build(
        &self,
        build_id: i64,
        from: BuildStatus,
        to: BuildStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<CiBuild>> {
        let mut state = self.state.lock().await;
        let Some(build) = state
            .builds
            .iter_mut()
            .find(|b| b.id == build_id && b.status == from)
        else {
            return Ok(None);
        };
        build.status = to;
        if to == BuildStatus::Running {
            build.time_start = Some(at);
        }
        if to.is_terminal() {
            build.time_end = Some(at);
        }
        Ok(Some(build.clone()))
    }

    async fn query_builds(&self, query: &BuildQuery) -> anyhow::Result<BuildPage> {
        let state = self.state.lock().await;
        let public_plans: HashSet<i64> = state
            .plans
            .iter()
            .filter(|p| p.public)
            .map(|p| p.id)
            .collect();
        let mut builds: Vec<CiBuild> = state
            .builds
            .iter()
            .filter(|b| query.filter.matches(b))
            .filter(|b| query.staff || public_plans.contains(&b.plan_id))
            .cloned()
            .collect();
        builds.sort_by(|a, b| query.compare(a, b));
        Ok(BuildPage::from_sorted(builds, query))
    }

    async fn latest_builds(
        &self,
        repo_id: i64,
        plan_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<CiBuild>> {
        let state = self.state.lock().await;
        let mut builds: Vec<CiBuild> = state
            .builds
            .iter()
            .filter(|b| b.repo_id == repo_id && b.plan_id == plan_id)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.time_queue.cmp(&a.time_queue).then(b.id.cmp(&a.id)));
        builds.truncate(limit);
        Ok(builds)
    }

    async fn get_or_create_release(
        &self,
        repo_id: i64,
        git_tag: &str,
    ) -> anyhow::Result<(CiRelease, bool)> {
        let mut state = self.state.lock().await;
        if let Some(release) = state
            .releases
            .iter()
            .find(|r| r.repo_id == repo_id && r.git_tag == git_tag)
        {
            return Ok((release.clone(), false));
        }
        let release = CiRelease {
            id: state.next_id(),
            repo_id,
            git_tag: git_tag.to_string(),
            create_date: Utc::now(),
        };
        state.releases.push(release.clone());
        Ok((release, true))
    }

}
