//! Branch lifecycle: canonical names, get-or-create and resurrection.

use crate::models::branch::CiBranch;
use crate::models::repository::CiRepository;
use crate::services::push_event::RefKind;
use crate::store::Store;

/// Prefix that keeps tag pseudo-branches apart from real branches of the same name.
pub const TAG_BRANCH_PREFIX: &str = "tag: ";

/// Branch record name for a pushed ref. `None` for unrecognized refs.
pub fn canonical_name(kind: RefKind<'_>) -> Option<String> {
    match kind {
        RefKind::Branch(name) => Some(name.to_string()),
        RefKind::Tag(tag) => Some(format!("{TAG_BRANCH_PREFIX}{tag}")),
        RefKind::Unrecognized => None,
    }
}

/// Return the active branch record for `name`, creating it on first push and
/// resurrecting it if it had been removed.
pub async fn ensure_branch(
    store: &dyn Store,
    repo: &CiRepository,
    name: &str,
) -> anyhow::Result<CiBranch> {
    let (branch, created) = store.get_or_create_branch(repo.id, name).await?;

    if created {
        crate::metrics::branch_lifecycle("created");
        tracing::info!(
            repo = %repo.full_name(),
            branch = %branch.name,
            branch_id = branch.id,
            "Branch created"
        );
        return Ok(branch);
    }

    if branch.is_removed() {
        let branch = store.resurrect_branch(branch.id).await?;
        crate::metrics::branch_lifecycle("resurrected");
        tracing::info!(
            repo = %repo.full_name(),
            branch = %branch.name,
            branch_id = branch.id,
            "Removed branch resurrected by push"
        );
        return Ok(branch);
    }

    Ok(branch)
}
