//! Schema migration for the CI dashboard tables.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// SQL migration for the dashboard tables.
///
/// The unique constraints on `ci_branches (repo_id, name)`,
/// `ci_releases (repo_id, git_tag)` and `ci_webhook_deliveries (delivery_id)`
/// back the get-or-create operations that run under concurrent webhook delivery.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- CI Dashboard Tables
-- ================================================================

CREATE TABLE IF NOT EXISTS ci_repositories (
    id                  BIGSERIAL PRIMARY KEY,
    github_id           BIGINT NOT NULL UNIQUE,
    owner               VARCHAR(255) NOT NULL,
    name                VARCHAR(255) NOT NULL,
    public              BOOLEAN NOT NULL DEFAULT TRUE,
    release_tag_regex   VARCHAR(255),
    create_date         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (owner, name)
);

CREATE TABLE IF NOT EXISTS ci_branches (
    id              BIGSERIAL PRIMARY KEY,
    repo_id         BIGINT NOT NULL REFERENCES ci_repositories(id) ON DELETE CASCADE,
    name            VARCHAR(255) NOT NULL,
    state           VARCHAR(16) NOT NULL DEFAULT 'active',
    create_date     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    write_date      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (repo_id, name)
);

CREATE TABLE IF NOT EXISTS ci_plans (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(255) NOT NULL UNIQUE,
    plan_type       VARCHAR(16) NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    public          BOOLEAN NOT NULL DEFAULT TRUE,
    regex           VARCHAR(255) NOT NULL DEFAULT '',
    context         VARCHAR(255) NOT NULL DEFAULT '',
    dashboard       VARCHAR(16) NOT NULL DEFAULT 'none',
    create_date     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS ci_plan_repositories (
    id              BIGSERIAL PRIMARY KEY,
    plan_id         BIGINT NOT NULL REFERENCES ci_plans(id) ON DELETE CASCADE,
    repo_id         BIGINT NOT NULL REFERENCES ci_repositories(id) ON DELETE CASCADE,
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    UNIQUE (plan_id, repo_id)
);

CREATE TABLE IF NOT EXISTS ci_builds (
    id              BIGSERIAL PRIMARY KEY,
    repo_id         BIGINT NOT NULL REFERENCES ci_repositories(id),
    plan_id         BIGINT NOT NULL REFERENCES ci_plans(id),
    branch_id       BIGINT REFERENCES ci_branches(id),
    "commit"        VARCHAR(64) NOT NULL,
    commit_message  TEXT,
    build_type      VARCHAR(16) NOT NULL DEFAULT 'auto',
    status          VARCHAR(16) NOT NULL DEFAULT 'queued',
    delivery_id     UUID,
    time_queue      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    time_start      TIMESTAMPTZ,
    time_end        TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_ci_builds_repo ON ci_builds (repo_id);
CREATE INDEX IF NOT EXISTS idx_ci_builds_plan ON ci_builds (plan_id);
CREATE INDEX IF NOT EXISTS idx_ci_builds_branch ON ci_builds (branch_id);
CREATE INDEX IF NOT EXISTS idx_ci_builds_commit ON ci_builds ("commit");
CREATE INDEX IF NOT EXISTS idx_ci_builds_queued ON ci_builds (time_queue DESC);

CREATE TABLE IF NOT EXISTS ci_releases (
    id              BIGSERIAL PRIMARY KEY,
    repo_id         BIGINT NOT NULL REFERENCES ci_repositories(id) ON DELETE CASCADE,
    git_tag         VARCHAR(255) NOT NULL,
    create_date     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (repo_id, git_tag)
);

CREATE TABLE IF NOT EXISTS ci_webhook_deliveries (
    delivery_id     UUID PRIMARY KEY,
    received_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Run the dashboard migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("CI migration failed: {e}"))?;
    Ok(())
}
