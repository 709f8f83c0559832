//! Plan push rules: which plans a push triggers, and for which commit.

use regex::Regex;
use thiserror::Error;

use crate::models::plan::{CiPlan, PlanType};
use crate::services::push_event::{PushEvent, RefKind};

/// Commit message markers that suppress a build.
pub const SKIP_BUILD_MARKERS: &[&str] = &["[ci skip]", "[skip ci]", "[ci-skip]", "[skip-ci]"];

/// `after` sha GitHub sends when a branch is deleted.
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum PlanRuleError {
    #[error("invalid ref filter {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Outcome of evaluating one plan against a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushDecision {
    pub should_run: bool,
    pub commit: Option<String>,
    pub commit_message: Option<String>,
}

impl PushDecision {
    pub fn decline() -> Self {
        Self {
            should_run: false,
            commit: None,
            commit_message: None,
        }
    }

    fn run(commit: &str, commit_message: Option<&str>) -> Self {
        Self {
            should_run: true,
            commit: Some(commit.to_string()),
            commit_message: commit_message.map(str::to_string),
        }
    }
}

/// The push behaviour of a plan, by plan type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRule<'a> {
    /// Build the pushed head of branches whose name matches `regex`.
    CommitTrigger { regex: &'a str },
    /// Build the commit a pushed tag points at, for tags matching `regex`.
    TagTrigger { regex: &'a str },
    /// Never started by a push.
    Manual,
}

impl PushRule<'_> {
    pub fn evaluate(&self, event: &PushEvent) -> Result<PushDecision, PlanRuleError> {
        match *self {
            PushRule::CommitTrigger { regex } => {
                let RefKind::Branch(branch) = event.ref_kind() else {
                    return Ok(PushDecision::decline());
                };
                if !ref_filter(regex)?.is_match(branch) {
                    return Ok(PushDecision::decline());
                }
                let Some(commit) = event.after.as_deref().or(event.head_sha()) else {
                    return Ok(PushDecision::decline());
                };
                if commit == NULL_SHA {
                    return Ok(PushDecision::decline());
                }
                let message = event.commit_message(commit).or(event.head_message());
                if message.is_some_and(has_skip_marker) {
                    return Ok(PushDecision::decline());
                }
                Ok(PushDecision::run(commit, message))
            }
            PushRule::TagTrigger { regex } => {
                let RefKind::Tag(tag) = event.ref_kind() else {
                    return Ok(PushDecision::decline());
                };
                if !ref_filter(regex)?.is_match(tag) {
                    return Ok(PushDecision::decline());
                }
                match event.head_sha() {
                    Some(commit) if commit != NULL_SHA => {
                        Ok(PushDecision::run(commit, event.head_message()))
                    }
                    _ => Ok(PushDecision::decline()),
                }
            }
            PushRule::Manual => Ok(PushDecision::decline()),
        }
    }
}

/// Compile a plan regex so it matches from the start of the ref name.
fn ref_filter(pattern: &str) -> Result<Regex, PlanRuleError> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|source| PlanRuleError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn has_skip_marker(message: &str) -> bool {
    let message = message.to_lowercase();
    SKIP_BUILD_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

impl CiPlan {
    pub fn push_rule(&self) -> PushRule<'_> {
        match self.plan_type {
            PlanType::Commit => PushRule::CommitTrigger { regex: &self.regex },
            PlanType::Tag => PushRule::TagTrigger { regex: &self.regex },
            PlanType::Manual => PushRule::Manual,
        }
    }

    pub fn evaluate_push(&self, event: &PushEvent) -> Result<PushDecision, PlanRuleError> {
        self.push_rule().evaluate(event)
    }
}

/// Plan types a push to this kind of ref can trigger.
pub fn plan_types_for(kind: RefKind<'_>) -> &'static [PlanType] {
    match kind {
        RefKind::Branch(_) => &[PlanType::Commit],
        RefKind::Tag(_) => &[PlanType::Tag],
        RefKind::Unrecognized => &[],
    }
}

/// A plan that decided to run for a push.
#[derive(Debug, Clone)]
pub struct MatchedPlan {
    pub plan: CiPlan,
    pub commit: String,
    pub commit_message: Option<String>,
}

/// Evaluate every candidate plan against the push.
///
/// A plan whose rule fails is logged and skipped; the others are still
/// evaluated.
pub fn match_plans(plans: Vec<CiPlan>, event: &PushEvent) -> Vec<MatchedPlan> {
    plans
        .into_iter()
        .filter_map(|plan| match plan.evaluate_push(event) {
            Ok(PushDecision {
                should_run: true,
                commit: Some(commit),
                commit_message,
            }) => Some(MatchedPlan {
                plan,
                commit,
                commit_message,
            }),
            Ok(_) => {
                tracing::debug!(plan = %plan.name, git_ref = %event.git_ref, "Plan declined push");
                None
            }
            Err(e) => {
                tracing::warn!(plan = %plan.name, "Plan rule failed, skipping: {e}");
                None
            }
        })
        .collect()
}
