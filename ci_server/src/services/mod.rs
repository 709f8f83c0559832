//! Webhook pipeline services: validation, parsing, branch lifecycle, plan
//! matching, build dispatch and commit status reporting.

pub mod branch_service;
pub mod build_service;
pub mod command;
pub mod executor;
pub mod plan_matcher;
pub mod push_event;
pub mod release_service;
pub mod signature;
pub mod status_reporter;
pub mod status_worker;
