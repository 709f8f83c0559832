//! Build dispatch and status transitions.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::branch::CiBranch;
use crate::models::build::{BuildStatus, BuildType, CiBuild, NewCiBuild};
use crate::models::repository::CiRepository;
use crate::services::plan_matcher::MatchedPlan;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build {0} not found")]
    NotFound(i64),
    #[error("build cannot move from {from} to {to}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },
    #[error("build {0} changed status concurrently")]
    Conflict(i64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Create one queued automatic build per matched plan.
///
/// The builds are inserted together. With `claim_delivery` set, the delivery
/// id is recorded in the same write and `None` is returned when it was
/// already recorded.
pub async fn dispatch(
    store: &dyn Store,
    repo: &CiRepository,
    branch: &CiBranch,
    matched: Vec<MatchedPlan>,
    delivery_id: Option<Uuid>,
    claim_delivery: bool,
) -> anyhow::Result<Option<Vec<CiBuild>>> {
    let plan_names: Vec<String> = matched.iter().map(|m| m.plan.name.clone()).collect();
    let new_builds = matched
        .into_iter()
        .map(|m| NewCiBuild {
            repo_id: repo.id,
            plan_id: m.plan.id,
            branch_id: Some(branch.id),
            commit: m.commit,
            commit_message: m.commit_message,
            build_type: BuildType::Auto,
            status: BuildStatus::Queued,
            delivery_id,
        })
        .collect();

    let claim = delivery_id.filter(|_| claim_delivery);
    let Some(builds) = store.create_builds(claim, new_builds).await? else {
        return Ok(None);
    };

    for (build, plan) in builds.iter().zip(&plan_names) {
        crate::metrics::build_status_changed(BuildStatus::Queued.as_str());
        tracing::info!(
            build_id = build.id,
            repo = %repo.full_name(),
            branch = %branch.name,
            plan = %plan,
            commit = %build.commit,
            "Build queued"
        );
    }

    Ok(Some(builds))
}

/// Move a build to `to`, enforcing the lifecycle.
pub async fn update_status(
    store: &dyn Store,
    build_id: i64,
    to: BuildStatus,
) -> Result<CiBuild, BuildError> {
    let build = store
        .get_build(build_id)
        .await?
        .ok_or(BuildError::NotFound(build_id))?;

    let from = build.current_status();
    if !from.can_transition_to(to) {
        return Err(BuildError::InvalidTransition { from, to });
    }

    let updated = store
        .transition_build(build_id, from, to, Utc::now())
        .await?
        .ok_or(BuildError::Conflict(build_id))?;

    crate::metrics::build_status_changed(to.as_str());
    if let (Some(start), Some(end)) = (updated.time_start, updated.time_end) {
        let elapsed = (end - start).num_milliseconds().max(0) as u64;
        crate::metrics::build_duration(elapsed);
    }
    tracing::info!(build_id, from = %from, to = %to, "Build status changed");

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{NewCiPlan, PlanType};
    use crate::models::repository::NewCiRepository;
    use crate::services::branch_service::ensure_branch;
    use crate::services::plan_matcher::match_plans;
    use crate::services::push_event::PushEvent;
    use crate::store::MemoryStore;

    async fn repo(store: &MemoryStore) -> CiRepository {
        store
            .create_repository(NewCiRepository {
                github_id: 11,
                owner: "acme".into(),
                name: "widgets".into(),
                public: true,
                release_tag_regex: None,
            })
            .await
            .unwrap()
    }

    async fn commit_plan(store: &MemoryStore, repo_id: i64, name: &str) {
        let plan = store
            .create_plan(NewCiPlan {
                name: name.into(),
                plan_type: PlanType::Commit,
                active: true,
                public: true,
                regex: String::new(),
                context: name.into(),
                dashboard: Default::default(),
            })
            .await
            .unwrap();
        store.link_plan(plan.id, repo_id, true).await.unwrap();
    }

    fn push_main() -> PushEvent {
        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "c0ffee",
            "repository": { "id": 11 },
            "head_commit": { "id": "c0ffee", "message": "Tune widgets" },
        });
        PushEvent::from_slice(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn two_commit_plans_dispatch_two_auto_builds() {
        let store = MemoryStore::new();
        let repo = repo(&store).await;
        commit_plan(&store, repo.id, "unit").await;
        commit_plan(&store, repo.id, "lint").await;
        let branch = ensure_branch(&store, &repo, "main").await.unwrap();

        let event = push_main();
        let plans = store.push_plans(repo.id, &[PlanType::Commit]).await.unwrap();
        let builds = dispatch(&store, &repo, &branch, match_plans(plans, &event), None, false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(builds.len(), 2);
        assert_ne!(builds[0].plan_id, builds[1].plan_id);
        for build in &builds {
            assert_eq!(build.build_type, BuildType::Auto);
            assert_eq!(build.status, BuildStatus::Queued);
            assert_eq!(build.commit, "c0ffee");
            assert_eq!(build.commit_message.as_deref(), Some("Tune widgets"));
            assert_eq!(build.branch_id, Some(branch.id));
        }
    }

    #[tokio::test]
    async fn status_updates_follow_the_lifecycle() {
        let store = MemoryStore::new();
        let repo = repo(&store).await;
        commit_plan(&store, repo.id, "unit").await;
        let branch = ensure_branch(&store, &repo, "main").await.unwrap();
        let plans = store.push_plans(repo.id, &[PlanType::Commit]).await.unwrap();
        let build = dispatch(
            &store,
            &repo,
            &branch,
            match_plans(plans, &push_main()),
            None,
            false,
        )
        .await
        .unwrap()
        .unwrap()
        .remove(0);

        let err = update_status(&store, build.id, BuildStatus::Success)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidTransition {
                from: BuildStatus::Queued,
                to: BuildStatus::Success
            }
        ));

        let running = update_status(&store, build.id, BuildStatus::Running)
            .await
            .unwrap();
        assert!(running.time_start.is_some());
        let done = update_status(&store, build.id, BuildStatus::Fail)
            .await
            .unwrap();
        assert_eq!(done.status, BuildStatus::Fail);
        assert!(done.time_end.is_some());

        assert!(matches!(
            update_status(&store, 999, BuildStatus::Running).await,
            Err(BuildError::NotFound(999))
        ));
    }
}
