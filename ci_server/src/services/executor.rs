//! Runs one build's test command and records the result.

use std::path::Path;

use crate::models::build::{BuildStatus, CiBuild};
use crate::services::build_service::{self, BuildError};
use crate::services::command::{run_command, test_outcome};
use crate::services::status_worker::StatusQueue;
use crate::store::Store;

/// Mark the build running, run `script` in `work_dir`, then move the build to
/// the status its outcome maps to. Each transition queues a commit status.
pub async fn execute_build(
    store: &dyn Store,
    queue: &StatusQueue,
    build_id: i64,
    script: &str,
    work_dir: &Path,
) -> Result<CiBuild, BuildError> {
    let build = build_service::update_status(store, build_id, BuildStatus::Running).await?;
    queue.enqueue(build.id);

    tracing::info!(
        build_id,
        commit = %build.commit,
        command = %script,
        "Executing build"
    );

    let build_id_env = build.id.to_string();
    let result = run_command(
        script,
        work_dir,
        &[
            ("CI_BUILD_ID", build_id_env.as_str()),
            ("CI_COMMIT", build.commit.as_str()),
        ],
    )
    .await;

    if let Err(e) = &result {
        tracing::warn!(build_id, "Build command failed: {e}");
    }

    let status = BuildStatus::from_outcome(test_outcome(&result));
    let finished = build_service::update_status(store, build_id, status).await?;
    queue.enqueue(finished.id);
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::{BuildType, NewCiBuild};
    use crate::models::plan::{NewCiPlan, PlanType};
    use crate::models::repository::NewCiRepository;
    use crate::store::MemoryStore;

    async fn queued_build(store: &MemoryStore) -> CiBuild {
        let repo = store
            .create_repository(NewCiRepository {
                github_id: 1,
                owner: "acme".into(),
                name: "widgets".into(),
                public: true,
                release_tag_regex: None,
            })
            .await
            .unwrap();
        let plan = store
            .create_plan(NewCiPlan {
                name: "unit".into(),
                plan_type: PlanType::Manual,
                active: true,
                public: true,
                regex: String::new(),
                context: String::new(),
                dashboard: Default::default(),
            })
            .await
            .unwrap();
        store
            .create_build(NewCiBuild {
                repo_id: repo.id,
                plan_id: plan.id,
                branch_id: None,
                commit: "abc123".into(),
                commit_message: None,
                build_type: BuildType::Manual,
                status: BuildStatus::Queued,
                delivery_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn passing_command_succeeds() {
        let store = MemoryStore::new();
        let build = queued_build(&store).await;
        let (queue, mut rx) = StatusQueue::channel(8);

        let done = execute_build(
            &store,
            &queue,
            build.id,
            "test \"$CI_COMMIT\" = abc123",
            &std::env::temp_dir(),
        )
        .await
        .unwrap();

        assert_eq!(done.status, BuildStatus::Success);
        assert!(done.time_start.is_some() && done.time_end.is_some());
        drop(queue);
        let mut reported = Vec::new();
        while let Some(id) = rx.recv().await {
            reported.push(id);
        }
        assert_eq!(reported, [build.id, build.id]);
    }

    #[tokio::test]
    async fn failing_command_marks_tests_failed() {
        let store = MemoryStore::new();
        let build = queued_build(&store).await;
        let done = execute_build(
            &store,
            &StatusQueue::disabled(),
            build.id,
            "exit 1",
            &std::env::temp_dir(),
        )
        .await
        .unwrap();
        assert_eq!(done.status, BuildStatus::Fail);
    }

    #[tokio::test]
    async fn unusable_work_dir_is_an_error() {
        let store = MemoryStore::new();
        let build = queued_build(&store).await;
        let done = execute_build(
            &store,
            &StatusQueue::disabled(),
            build.id,
            "true",
            Path::new("/nonexistent/ci-dashboard"),
        )
        .await
        .unwrap();
        assert_eq!(done.status, BuildStatus::Error);
    }
}
