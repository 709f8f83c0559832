//! GitHub push payload decoding and ref classification.

use serde::Deserialize;
use thiserror::Error;

const BRANCH_REF_PREFIX: &str = "refs/heads/";
const TAG_REF_PREFIX: &str = "refs/tags/";

/// Why a push payload could not be used.
#[derive(Debug, Error)]
pub enum PushEventError {
    #[error("malformed payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("malformed payload: repository.id is missing")]
    MissingRepositoryId,
    #[error("malformed payload: ref is missing")]
    MissingRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// A normalized push event.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    pub repository: PushRepository,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub head_commit: Option<PushCommit>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

/// What a pushed ref points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind<'a> {
    Branch(&'a str),
    Tag(&'a str),
    Unrecognized,
}

impl PushEvent {
    /// Decode a push payload.
    ///
    /// Presence of `repository.id` and `ref` is checked before the typed decode
    /// so callers can tell a missing ref apart from a broken payload.
    pub fn from_slice(body: &[u8]) -> Result<Self, PushEventError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;

        if !value["repository"]["id"].is_i64() {
            return Err(PushEventError::MissingRepositoryId);
        }
        if value["ref"].is_null() {
            return Err(PushEventError::MissingRef);
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn repository_id(&self) -> i64 {
        self.repository.id
    }

    pub fn ref_kind(&self) -> RefKind<'_> {
        if let Some(branch) = self.git_ref.strip_prefix(BRANCH_REF_PREFIX) {
            if !branch.is_empty() {
                return RefKind::Branch(branch);
            }
        } else if let Some(tag) = self.git_ref.strip_prefix(TAG_REF_PREFIX) {
            if !tag.is_empty() {
                return RefKind::Tag(tag);
            }
        }
        RefKind::Unrecognized
    }

    /// The pushed head commit, falling back to `after` when the payload has
    /// no `head_commit`.
    pub fn head_sha(&self) -> Option<&str> {
        self.head_commit
            .as_ref()
            .map(|c| c.id.as_str())
            .or(self.after.as_deref())
    }

    pub fn head_message(&self) -> Option<&str> {
        self.head_commit.as_ref().map(|c| c.message.as_str())
    }

    /// Message of the commit with the given sha, if it is part of the push.
    pub fn commit_message(&self, sha: &str) -> Option<&str> {
        self.commits
            .iter()
            .chain(self.head_commit.iter())
            .find(|c| c.id == sha)
            .map(|c| c.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: serde_json::Value) -> Result<PushEvent, PushEventError> {
        PushEvent::from_slice(value.to_string().as_bytes())
    }

    #[test]
    fn extracts_repository_ref_and_head_commit() {
        let event = parse(json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": { "id": 42, "full_name": "acme/widgets" },
            "head_commit": { "id": "abc123", "message": "Fix widget" },
        }))
        .unwrap();

        assert_eq!(event.repository_id(), 42);
        assert_eq!(event.ref_kind(), RefKind::Branch("main"));
        assert_eq!(event.head_sha(), Some("abc123"));
        assert_eq!(event.head_message(), Some("Fix widget"));
    }

    #[test]
    fn classifies_refs() {
        let kind = |git_ref: &str| {
            let event = parse(json!({ "ref": git_ref, "repository": { "id": 1 } })).unwrap();
            match event.ref_kind() {
                RefKind::Branch(name) => format!("branch:{name}"),
                RefKind::Tag(name) => format!("tag:{name}"),
                RefKind::Unrecognized => "unrecognized".to_string(),
            }
        };

        assert_eq!(kind("refs/heads/feature/login"), "branch:feature/login");
        assert_eq!(kind("refs/tags/v1.2.0"), "tag:v1.2.0");
        assert_eq!(kind("refs/pull/7/head"), "unrecognized");
        assert_eq!(kind("refs/heads/"), "unrecognized");
        assert_eq!(kind(""), "unrecognized");
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(matches!(
            parse(json!({ "ref": "refs/heads/main", "repository": {} })),
            Err(PushEventError::MissingRepositoryId)
        ));
        assert!(matches!(
            parse(json!({ "repository": { "id": 1 } })),
            Err(PushEventError::MissingRef)
        ));
        assert!(matches!(
            PushEvent::from_slice(b"not json"),
            Err(PushEventError::InvalidJson(_))
        ));
    }

    #[test]
    fn deleted_branch_has_no_head_commit() {
        let event = parse(json!({
            "ref": "refs/heads/old",
            "before": "abc123",
            "after": "0000000000000000000000000000000000000000",
            "repository": { "id": 1 },
            "head_commit": null,
        }))
        .unwrap();
        assert_eq!(
            event.head_sha(),
            Some("0000000000000000000000000000000000000000")
        );
        assert_eq!(event.head_message(), None);
    }
}
