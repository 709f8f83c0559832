//! Seeds repositories and plans from a JSON file at start-up.
//!
//! ```json
//! {
//!   "repositories": [
//!     { "github_id": 1296269, "owner": "acme", "name": "widgets", "public": true }
//!   ],
//!   "plans": [
//!     { "name": "unit", "plan_type": "commit", "regex": "main",
//!       "context": "ci/unit", "dashboard": "last",
//!       "repositories": ["acme/widgets"] }
//!   ]
//! }
//! ```
//!
//! Idempotent: existing repositories (by GitHub id) and plans (by name) are
//! left untouched, and plan links are upserted.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::plan::NewCiPlan;
use crate::models::repository::NewCiRepository;
use crate::store::Store;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub repositories: Vec<NewCiRepository>,
    #[serde(default)]
    pub plans: Vec<PlanSeed>,
}

#[derive(Debug, Deserialize)]
pub struct PlanSeed {
    #[serde(flatten)]
    pub plan: NewCiPlan,
    /// `owner/name` of each repository the plan is bound to.
    #[serde(default)]
    pub repositories: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub repositories_created: usize,
    pub plans_created: usize,
    pub links: usize,
}

pub async fn seed_from_file(store: &dyn Store, path: &Path) -> anyhow::Result<SeedSummary> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: SeedFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing seed file {}", path.display()))?;
    seed_store(store, seed).await
}

pub async fn seed_store(store: &dyn Store, seed: SeedFile) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for repo in seed.repositories {
        if store
            .find_repository_by_github_id(repo.github_id)
            .await?
            .is_some()
        {
            continue;
        }
        let repo = store.create_repository(repo).await?;
        tracing::info!(repo = %repo.full_name(), "Seeded repository");
        summary.repositories_created += 1;
    }

    for PlanSeed { plan, repositories } in seed.plans {
        let plan = match store.find_plan_by_name(&plan.name).await? {
            Some(existing) => existing,
            None => {
                let created = store.create_plan(plan).await?;
                tracing::info!(plan = %created.name, "Seeded plan");
                summary.plans_created += 1;
                created
            }
        };

        for full_name in repositories {
            let (owner, name) = full_name
                .split_once('/')
                .with_context(|| format!("plan {}: expected owner/name, got {full_name:?}", plan.name))?;
            let repo = store
                .find_repository(owner, name)
                .await?
                .with_context(|| format!("plan {}: unknown repository {full_name}", plan.name))?;
            store.link_plan(plan.id, repo.id, true).await?;
            summary.links += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{DashboardMode, PlanType};
    use crate::store::MemoryStore;

    const SEED: &str = r#"{
        "repositories": [
            { "github_id": 10, "owner": "acme", "name": "widgets", "public": true,
              "release_tag_regex": null }
        ],
        "plans": [
            { "name": "unit", "plan_type": "commit", "context": "ci/unit",
              "dashboard": "recent", "repositories": ["acme/widgets"] },
            { "name": "nightly", "plan_type": "manual" }
        ]
    }"#;

    #[tokio::test]
    async fn seeding_twice_creates_nothing_new() {
        let store = MemoryStore::new();

        let first = seed_store(&store, serde_json::from_str(SEED).unwrap())
            .await
            .unwrap();
        assert_eq!(
            first,
            SeedSummary {
                repositories_created: 1,
                plans_created: 2,
                links: 1,
            }
        );

        let second = seed_store(&store, serde_json::from_str(SEED).unwrap())
            .await
            .unwrap();
        assert_eq!(second.repositories_created, 0);
        assert_eq!(second.plans_created, 0);

        let repo = store.find_repository("acme", "widgets").await.unwrap().unwrap();
        let plans = store.push_plans(repo.id, &[PlanType::Commit]).await.unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].dashboard, DashboardMode::Recent);
        assert!(plans[0].active && plans[0].public);
    }

    #[tokio::test]
    async fn unknown_repository_link_fails() {
        let store = MemoryStore::new();
        let seed: SeedFile = serde_json::from_str(
            r#"{ "plans": [ { "name": "unit", "plan_type": "commit",
                               "repositories": ["acme/missing"] } ] }"#,
        )
        .unwrap();
        let err = seed_store(&store, seed).await.unwrap_err();
        assert!(err.to_string().contains("unknown repository"));
    }
}
