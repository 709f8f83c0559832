//! ci.branch — A branch or tag seen in a push to a repository.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};

use crate::schema::ci_branches;

/// Lifecycle of a branch record.
///
/// Branches are soft-deleted by an administrator (`Removed`) and brought back
/// to `Active` when a new push references them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum BranchState {
    Active,
    Removed,
}

text_enum!(BranchState {
    Active => "active",
    Removed => "removed",
});

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_branches)]
pub struct CiBranch {
    pub id: i64,
    pub repo_id: i64,
    pub name: String,
    pub state: BranchState,
    pub create_date: DateTime<Utc>,
    pub write_date: DateTime<Utc>,
}

impl CiBranch {
    pub fn is_removed(&self) -> bool {
        self.state == BranchState::Removed
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ci_branches)]
pub struct NewCiBranch {
    pub repo_id: i64,
    pub name: String,
    pub state: BranchState,
}
