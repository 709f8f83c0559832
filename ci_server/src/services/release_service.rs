//! Release recording for pushed tags.

use regex::Regex;

use crate::models::release::CiRelease;
use crate::models::repository::CiRepository;
use crate::store::Store;

/// Record `tag` as a release when it matches the repository's release pattern.
///
/// Returns `None` when the repository has no pattern, the tag does not match,
/// or the pattern does not compile.
pub async fn record_release(
    store: &dyn Store,
    repo: &CiRepository,
    tag: &str,
) -> anyhow::Result<Option<CiRelease>> {
    let Some(pattern) = repo.release_tag_regex.as_deref().filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let re = match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(repo = %repo.full_name(), "Invalid release tag pattern: {e}");
            return Ok(None);
        }
    };
    if !re.is_match(tag) {
        return Ok(None);
    }

    let (release, created) = store.get_or_create_release(repo.id, tag).await?;
    if created {
        tracing::info!(repo = %repo.full_name(), tag, release_id = release.id, "Release recorded");
    }
    Ok(Some(release))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::repository::NewCiRepository;
    use crate::store::MemoryStore;

    async fn repo(store: &MemoryStore, pattern: Option<&str>) -> CiRepository {
        store
            .create_repository(NewCiRepository {
                github_id: 3,
                owner: "acme".into(),
                name: "widgets".into(),
                public: true,
                release_tag_regex: pattern.map(str::to_string),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn matching_tag_is_recorded_once() {
        let store = MemoryStore::new();
        let repo = repo(&store, Some(r"v\d+\.\d+\.\d+")).await;

        let first = record_release(&store, &repo, "v1.2.3").await.unwrap().unwrap();
        let again = record_release(&store, &repo, "v1.2.3").await.unwrap().unwrap();
        assert_eq!(first.id, again.id);
        assert!(record_release(&store, &repo, "v1.2.3-rc1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn repositories_without_pattern_record_nothing() {
        let store = MemoryStore::new();
        let repo = repo(&store, None).await;
        assert!(record_release(&store, &repo, "v1.0.0")
            .await
            .unwrap()
            .is_none());
    }
}
