//! ci.release — A tag recorded as a release. One row per (repository, tag).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::ci_releases;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = ci_releases)]
pub struct CiRelease {
    pub id: i64,
    pub repo_id: i64,
    pub git_tag: String,
    pub create_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ci_releases)]
pub struct NewCiRelease {
    pub repo_id: i64,
    pub git_tag: String,
}
