//! ci.repository — A GitHub repository the dashboard listens to.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::ci_repositories;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_repositories)]
pub struct CiRepository {
    pub id: i64,
    /// Provider-assigned repository id, as sent in push payloads.
    pub github_id: i64,
    pub owner: String,
    pub name: String,
    pub public: bool,
    /// Tags matching this pattern are recorded as releases.
    pub release_tag_regex: Option<String>,
    pub create_date: DateTime<Utc>,
}

impl CiRepository {
    /// `owner/name`, the form used by the GitHub API.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = ci_repositories)]
pub struct NewCiRepository {
    pub github_id: i64,
    pub owner: String,
    pub name: String,
    pub public: bool,
    pub release_tag_regex: Option<String>,
}
