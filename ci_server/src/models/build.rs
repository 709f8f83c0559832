//! ci.build — One run of a plan against a commit.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::ci_builds;

/// Build lifecycle: `queued → waiting → running → {success, error, fail}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Waiting,
    Running,
    Success,
    /// The build could not run to completion (command or infrastructure failure).
    Error,
    /// The build ran and its tests failed.
    Fail,
}

text_enum!(BuildStatus {
    Queued => "queued",
    Waiting => "waiting",
    Running => "running",
    Success => "success",
    Error => "error",
    Fail => "fail",
});

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Error | BuildStatus::Fail
        )
    }

    /// Whether a build may move from `self` to `next`.
    ///
    /// A build may skip `waiting`, and may be marked `error` before it starts.
    /// Terminal states are final.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;
        matches!(
            (*self, next),
            (Queued, Waiting)
                | (Queued, Running)
                | (Waiting, Running)
                | (Queued, Error)
                | (Waiting, Error)
                | (Running, Success)
                | (Running, Error)
                | (Running, Fail)
        )
    }
}

/// How a build was started.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Auto,
    Manual,
}

text_enum!(BuildType {
    Auto => "auto",
    Manual => "manual",
});

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_builds)]
pub struct CiBuild {
    pub id: i64,
    pub repo_id: i64,
    pub plan_id: i64,
    pub branch_id: Option<i64>,
    pub commit: String,
    pub commit_message: Option<String>,
    pub build_type: BuildType,
    pub status: BuildStatus,
    /// Webhook delivery that created the build, when delivery tracking is on.
    pub delivery_id: Option<Uuid>,
    pub time_queue: DateTime<Utc>,
    pub time_start: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
}

impl CiBuild {
    pub fn current_status(&self) -> BuildStatus {
        self.status
    }

    /// Link to the build detail, used as the commit status target URL.
    pub fn external_detail_url(&self, site_url: &str) -> String {
        format!("{}/api/builds/{}", site_url.trim_end_matches('/'), self.id)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ci_builds)]
pub struct NewCiBuild {
    pub repo_id: i64,
    pub plan_id: i64,
    pub branch_id: Option<i64>,
    pub commit: String,
    pub commit_message: Option<String>,
    pub build_type: BuildType,
    pub status: BuildStatus,
    pub delivery_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        for terminal in [BuildStatus::Success, BuildStatus::Error, BuildStatus::Fail] {
            assert!(terminal.is_terminal());
            for next in [
                BuildStatus::Queued,
                BuildStatus::Waiting,
                BuildStatus::Running,
                BuildStatus::Success,
                BuildStatus::Error,
                BuildStatus::Fail,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn lifecycle_follows_queue_wait_run() {
        assert!(BuildStatus::Queued.can_transition_to(BuildStatus::Waiting));
        assert!(BuildStatus::Waiting.can_transition_to(BuildStatus::Running));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Fail));
        assert!(!BuildStatus::Queued.can_transition_to(BuildStatus::Success));
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Queued));
    }

    #[test]
    fn status_text_round_trips() {
        assert_eq!("fail".parse::<BuildStatus>().unwrap(), BuildStatus::Fail);
        assert_eq!(BuildStatus::Waiting.to_string(), "waiting");
        let err = "cancelled".parse::<BuildStatus>().unwrap_err();
        assert_eq!(err.kind, "BuildStatus");
    }

    #[test]
    fn detail_url_ignores_trailing_slash() {
        let build = CiBuild {
            id: 42,
            repo_id: 1,
            plan_id: 1,
            branch_id: None,
            commit: "abc".into(),
            commit_message: None,
            build_type: BuildType::Auto,
            status: BuildStatus::Queued,
            delivery_id: None,
            time_queue: Utc::now(),
            time_start: None,
            time_end: None,
        };
        assert_eq!(
            build.external_detail_url("https://ci.example.com/ci/"),
            "https://ci.example.com/ci/api/builds/42"
        );
    }
}
