//! ci.plan — A build definition bound to one or more repositories.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};

use crate::schema::{ci_plan_repositories, ci_plans};

/// What kind of event starts a plan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    /// Pushes to branches matching the plan regex.
    Commit,
    /// Pushed tags matching the plan regex.
    Tag,
    /// Only started by hand.
    Manual,
}

text_enum!(PlanType {
    Commit => "commit",
    Tag => "tag",
    Manual => "manual",
});

/// Which of a plan's builds show up on the repository overview.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsExpression,
    FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum DashboardMode {
    #[default]
    None,
    Last,
    Recent,
}

text_enum!(DashboardMode {
    None => "none",
    Last => "last",
    Recent => "recent",
});

impl DashboardMode {
    /// Number of newest builds shown for this mode.
    pub fn build_limit(&self) -> usize {
        match self {
            DashboardMode::None => 0,
            DashboardMode::Last => 1,
            DashboardMode::Recent => 5,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_plans)]
pub struct CiPlan {
    pub id: i64,
    pub name: String,
    pub plan_type: PlanType,
    pub active: bool,
    pub public: bool,
    /// Ref filter, matched from the start of the branch or tag name.
    pub regex: String,
    /// Commit status label. Empty disables status reporting.
    pub context: String,
    pub dashboard: DashboardMode,
    pub create_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = ci_plans)]
pub struct NewCiPlan {
    pub name: String,
    pub plan_type: PlanType,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub dashboard: DashboardMode,
}

fn default_true() -> bool {
    true
}

/// Binds a plan to a repository. Inactive links keep the plan from running
/// for that repository without deactivating the plan everywhere.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_plan_repositories)]
pub struct CiPlanRepository {
    pub id: i64,
    pub plan_id: i64,
    pub repo_id: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ci_plan_repositories)]
pub struct NewCiPlanRepository {
    pub plan_id: i64,
    pub repo_id: i64,
    pub active: bool,
}
