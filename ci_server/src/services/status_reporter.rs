//! Commit status reporting: translates build states to GitHub commit statuses
//! and posts them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CiConfig;
use crate::models::build::{BuildStatus, CiBuild};
use crate::models::plan::CiPlan;
use crate::models::repository::CiRepository;

/// GitHub commit status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Error,
    Failure,
}

/// External state and description for a build status.
pub fn status_for(status: BuildStatus) -> (CommitState, &'static str) {
    match status {
        BuildStatus::Queued => (CommitState::Pending, "The build is queued"),
        BuildStatus::Waiting => (
            CommitState::Pending,
            "The build is waiting for another build to complete",
        ),
        BuildStatus::Running => (CommitState::Pending, "The build is running"),
        BuildStatus::Success => (CommitState::Success, "The build was successful"),
        BuildStatus::Error => (CommitState::Error, "An error occurred during build"),
        BuildStatus::Fail => (CommitState::Failure, "Tests failed"),
    }
}

/// Body of `POST /repos/{owner}/{repo}/statuses/{sha}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitStatus {
    pub state: CommitState,
    pub target_url: String,
    pub description: String,
    pub context: String,
}

/// The parts of the API response the dashboard logs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// A commit status API.
#[async_trait]
pub trait CommitStatusApi: Send + Sync {
    async fn create_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<StatusResponse, StatusError>;
}

/// GitHub REST client for commit statuses.
pub struct GitHubStatusClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubStatusClient {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl CommitStatusApi for GitHubStatusClient {
    async fn create_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<StatusResponse, StatusError> {
        let url = format!("{}/repos/{owner}/{repo}/statuses/{sha}", self.api_url);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "ci-dashboard")
            .json(status)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StatusError::Api { status, body });
        }

        Ok(resp.json().await?)
    }
}

/// Publishes build states as commit statuses.
pub struct StatusReporter {
    api: Box<dyn CommitStatusApi>,
    site_url: String,
}

impl StatusReporter {
    pub fn new(api: Box<dyn CommitStatusApi>, site_url: &str) -> Self {
        Self {
            api,
            site_url: site_url.to_string(),
        }
    }

    pub fn github(config: &CiConfig) -> Self {
        Self::new(
            Box::new(GitHubStatusClient::new(
                &config.github_api_url,
                &config.github_token,
            )),
            &config.site_url,
        )
    }

    /// Report the build's current status on its commit.
    ///
    /// Plans without a status context are not reported and yield `Ok(None)`.
    pub async fn report(
        &self,
        repo: &CiRepository,
        plan: &CiPlan,
        build: &CiBuild,
    ) -> Result<Option<StatusResponse>, StatusError> {
        if plan.context.is_empty() {
            crate::metrics::status_report("skipped");
            return Ok(None);
        }

        let (state, description) = status_for(build.current_status());
        let status = CommitStatus {
            state,
            target_url: build.external_detail_url(&self.site_url),
            description: description.to_string(),
            context: plan.context.clone(),
        };

        match self
            .api
            .create_status(&repo.owner, &repo.name, &build.commit, &status)
            .await
        {
            Ok(resp) => {
                crate::metrics::status_report("sent");
                tracing::debug!(
                    build_id = build.id,
                    repo = %repo.full_name(),
                    context = %plan.context,
                    state = ?state,
                    status_id = ?resp.id,
                    status_url = resp.url.as_deref().unwrap_or(""),
                    "Commit status reported"
                );
                Ok(Some(resp))
            }
            Err(e) => {
                crate::metrics::status_report("failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::*;
    use crate::models::build::BuildType;
    use crate::models::plan::{DashboardMode, PlanType};

    /// Records every status instead of calling GitHub.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingApi {
        pub calls: Arc<Mutex<Vec<(String, String, String, CommitStatus)>>>,
    }

    #[async_trait]
    impl CommitStatusApi for RecordingApi {
        async fn create_status(
            &self,
            owner: &str,
            repo: &str,
            sha: &str,
            status: &CommitStatus,
        ) -> Result<StatusResponse, StatusError> {
            self.calls.lock().unwrap().push((
                owner.to_string(),
                repo.to_string(),
                sha.to_string(),
                status.clone(),
            ));
            Ok(StatusResponse::default())
        }
    }

    /// Answers every status with a server error and counts the attempts.
    #[derive(Clone, Default)]
    pub(crate) struct FailingApi {
        pub attempts: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl CommitStatusApi for FailingApi {
        async fn create_status(
            &self,
            _owner: &str,
            _repo: &str,
            _sha: &str,
            _status: &CommitStatus,
        ) -> Result<StatusResponse, StatusError> {
            *self.attempts.lock().unwrap() += 1;
            Err(StatusError::Api {
                status: 500,
                body: "Internal Server Error".into(),
            })
        }
    }

    fn fixtures(context: &str, status: BuildStatus) -> (CiRepository, CiPlan, CiBuild) {
        let repo = CiRepository {
            id: 1,
            github_id: 100,
            owner: "acme".into(),
            name: "widgets".into(),
            public: true,
            release_tag_regex: None,
            create_date: Utc::now(),
        };
        let plan = CiPlan {
            id: 2,
            name: "unit".into(),
            plan_type: PlanType::Commit,
            active: true,
            public: true,
            regex: String::new(),
            context: context.into(),
            dashboard: DashboardMode::None,
            create_date: Utc::now(),
        };
        let build = CiBuild {
            id: 3,
            repo_id: 1,
            plan_id: 2,
            branch_id: None,
            commit: "deadbeef".into(),
            commit_message: None,
            build_type: BuildType::Auto,
            status,
            delivery_id: None,
            time_queue: Utc::now(),
            time_start: None,
            time_end: None,
        };
        (repo, plan, build)
    }

    #[tokio::test]
    async fn failed_build_reports_failure() {
        let api = RecordingApi::default();
        let reporter = StatusReporter::new(Box::new(api.clone()), "https://ci.example.com/ci");
        let (repo, plan, build) = fixtures("ci/unit", BuildStatus::Fail);

        let resp = reporter.report(&repo, &plan, &build).await.unwrap();
        assert!(resp.is_some());

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (owner, name, sha, status) = &calls[0];
        assert_eq!((owner.as_str(), name.as_str(), sha.as_str()), ("acme", "widgets", "deadbeef"));
        assert_eq!(
            status,
            &CommitStatus {
                state: CommitState::Failure,
                target_url: "https://ci.example.com/ci/api/builds/3".into(),
                description: "Tests failed".into(),
                context: "ci/unit".into(),
            }
        );
    }

    #[tokio::test]
    async fn queued_build_reports_pending() {
        let api = RecordingApi::default();
        let reporter = StatusReporter::new(Box::new(api.clone()), "http://localhost/ci");
        let (repo, plan, build) = fixtures("ci/unit", BuildStatus::Queued);

        reporter.report(&repo, &plan, &build).await.unwrap();

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls[0].3.state, CommitState::Pending);
        assert_eq!(calls[0].3.description, "The build is queued");
    }

    #[tokio::test]
    async fn empty_context_makes_no_call() {
        let api = RecordingApi::default();
        let reporter = StatusReporter::new(Box::new(api.clone()), "http://localhost/ci");

        for status in [
            BuildStatus::Queued,
            BuildStatus::Waiting,
            BuildStatus::Running,
            BuildStatus::Success,
            BuildStatus::Error,
            BuildStatus::Fail,
        ] {
            let (repo, plan, build) = fixtures("", status);
            assert!(reporter.report(&repo, &plan, &build).await.unwrap().is_none());
        }
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_failure_is_returned_to_the_caller() {
        let api = FailingApi::default();
        let reporter = StatusReporter::new(Box::new(api.clone()), "http://localhost/ci");
        let (repo, plan, build) = fixtures("ci/unit", BuildStatus::Running);

        let err = reporter.report(&repo, &plan, &build).await.unwrap_err();
        assert!(matches!(err, StatusError::Api { status: 500, .. }));
        assert_eq!(*api.attempts.lock().unwrap(), 1);
    }

    #[test]
    fn states_serialize_in_github_vocabulary() {
        let states: Vec<String> = [
            BuildStatus::Waiting,
            BuildStatus::Running,
            BuildStatus::Success,
            BuildStatus::Error,
        ]
        .into_iter()
        .map(|s| serde_json::to_string(&status_for(s).0).unwrap())
        .collect();
        assert_eq!(states, ["\"pending\"", "\"pending\"", "\"success\"", "\"error\""]);
    }
}
