//! Diesel table definitions for the CI dashboard.
//!
//! Tables: ci_repositories, ci_branches, ci_plans, ci_plan_repositories,
//! ci_builds, ci_releases, ci_webhook_deliveries.

diesel::table! {
    ci_repositories (id) {
        id -> Int8,
        github_id -> Int8,
        owner -> Varchar,
        name -> Varchar,
        public -> Bool,
        release_tag_regex -> Nullable<Varchar>,
        create_date -> Timestamptz,
    }
}

diesel::table! {
    ci_branches (id) {
        id -> Int8,
        repo_id -> Int8,
        name -> Varchar,
        state -> Varchar,
        create_date -> Timestamptz,
        write_date -> Timestamptz,
    }
}

diesel::table! {
    ci_plans (id) {
        id -> Int8,
        name -> Varchar,
        plan_type -> Varchar,
        active -> Bool,
        public -> Bool,
        regex -> Varchar,
        context -> Varchar,
        dashboard -> Varchar,
        create_date -> Timestamptz,
    }
}

diesel::table! {
    ci_plan_repositories (id) {
        id -> Int8,
        plan_id -> Int8,
        repo_id -> Int8,
        active -> Bool,
    }
}

diesel::table! {
    ci_builds (id) {
        id -> Int8,
        repo_id -> Int8,
        plan_id -> Int8,
        branch_id -> Nullable<Int8>,
        commit -> Varchar,
        commit_message -> Nullable<Text>,
        build_type -> Varchar,
        status -> Varchar,
        delivery_id -> Nullable<Uuid>,
        time_queue -> Timestamptz,
        time_start -> Nullable<Timestamptz>,
        time_end -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    ci_releases (id) {
        id -> Int8,
        repo_id -> Int8,
        git_tag -> Varchar,
        create_date -> Timestamptz,
    }
}

diesel::table! {
    ci_webhook_deliveries (delivery_id) {
        delivery_id -> Uuid,
        received_at -> Timestamptz,
    }
}

// Foreign key relationships
diesel::joinable!(ci_branches -> ci_repositories (repo_id));
diesel::joinable!(ci_plan_repositories -> ci_plans (plan_id));
diesel::joinable!(ci_plan_repositories -> ci_repositories (repo_id));
diesel::joinable!(ci_builds -> ci_repositories (repo_id));
diesel::joinable!(ci_builds -> ci_plans (plan_id));
diesel::joinable!(ci_builds -> ci_branches (branch_id));
diesel::joinable!(ci_releases -> ci_repositories (repo_id));

diesel::allow_tables_to_appear_in_same_query!(
    ci_repositories,
    ci_branches,
    ci_plans,
    ci_plan_repositories,
    ci_builds,
    ci_releases,
    ci_webhook_deliveries,
);
