//! Postgres persistence for scored repositories.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use fossick_core::{Category, Repo};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::info;

pub const CRATE_NAME: &str = "fossick-storage";

const MAX_CONNECTIONS: u32 = 25;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repos (
    id              BIGINT PRIMARY KEY,
    name            TEXT NOT NULL,
    full_name       TEXT NOT NULL,
    owner_login     TEXT NOT NULL,
    owner_avatar    TEXT,
    html_url        TEXT NOT NULL,
    description     TEXT,
    language        TEXT,
    topics          TEXT[],
    stargazers      INTEGER NOT NULL DEFAULT 0,
    forks           INTEGER NOT NULL DEFAULT 0,
    pushed_at       TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    idea_score      INTEGER NOT NULL DEFAULT 0,
    category        TEXT NOT NULL DEFAULT 'other',
    fetched_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_repos_category ON repos(category);
CREATE INDEX IF NOT EXISTS idx_repos_idea_score ON repos(idea_score DESC);
CREATE INDEX IF NOT EXISTS idx_repos_stargazers ON repos(stargazers DESC);
CREATE INDEX IF NOT EXISTS idx_repos_pushed_at ON repos(pushed_at ASC);
CREATE INDEX IF NOT EXISTS idx_repos_fetched_at ON repos(fetched_at);
"#;

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await
        .context("connecting to postgres")?;
    info!("connected to postgres");
    Ok(pool)
}

/// Builds a pool without touching the network; connections are established on
/// first use. Handy for tests and for processes that may start before the DB.
pub fn connect_lazy(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_lazy(database_url)
        .context("building lazy postgres pool")
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("applying repos schema")?;
    info!("database migrations applied");
    Ok(())
}

/// Write seam used by the refresh cycle, so cycle behavior is testable with
/// an in-memory sink.
#[async_trait]
pub trait RepoSink: Send + Sync {
    async fn upsert(&self, repo: &Repo) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    IdeaScore,
    Latest,
    Stars,
    Oldest,
}

impl SortOrder {
    /// Unknown sort keys fall back to the default ordering.
    pub fn parse(value: &str) -> SortOrder {
        match value {
            "latest" => SortOrder::Latest,
            "stars" => SortOrder::Stars,
            "oldest" => SortOrder::Oldest,
            _ => SortOrder::IdeaScore,
        }
    }

    fn order_clause(self) -> &'static str {
        match self {
            SortOrder::IdeaScore => "idea_score DESC",
            SortOrder::Latest => "created_at DESC",
            SortOrder::Stars => "stargazers DESC",
            SortOrder::Oldest => "pushed_at ASC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepoQuery {
    pub category: Option<Category>,
    pub sort: SortOrder,
    pub search: String,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone)]
pub struct RepoStore {
    pool: PgPool,
}

impl RepoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Filtered, sorted, paginated page of repos plus the unpaginated total.
    pub async fn query(&self, params: &RepoQuery) -> anyhow::Result<(Vec<Repo>, i64)> {
        let page = params.page.max(1);
        let per_page = if (1..=100).contains(&params.per_page) {
            params.per_page
        } else {
            30
        };
        let offset = (page - 1) * per_page;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM repos");
        push_filters(&mut count, params);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .context("counting repos")?;

        let mut select = QueryBuilder::new(
            "SELECT id, name, full_name, owner_login, COALESCE(owner_avatar, '') AS owner_avatar, \
             html_url, COALESCE(description, '') AS description, COALESCE(language, '') AS language, \
             topics, stargazers, forks, pushed_at, created_at, idea_score, category, fetched_at \
             FROM repos",
        );
        push_filters(&mut select, params);
        select.push(" ORDER BY ").push(params.sort.order_clause());
        select.push(" LIMIT ").push_bind(per_page);
        select.push(" OFFSET ").push_bind(offset);

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .context("querying repos")?;

        let mut repos = Vec::with_capacity(rows.len());
        for row in rows {
            repos.push(row_to_repo(&row)?);
        }
        Ok((repos, total))
    }

    pub async fn stats(&self) -> anyhow::Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT category, COUNT(*) FROM repos GROUP BY category")
            .fetch_all(&self.pool)
            .await
            .context("querying category stats")?;

        let mut stats = HashMap::with_capacity(rows.len());
        for row in rows {
            let category: String = row.try_get(0)?;
            let count: i64 = row.try_get(1)?;
            stats.insert(category, count);
        }
        Ok(stats)
    }

    pub async fn count(&self) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM repos")
            .fetch_one(&self.pool)
            .await
            .context("counting repos")?;
        Ok(count)
    }
}

#[async_trait]
impl RepoSink for RepoStore {
    /// Insert-or-update keyed by external ID. `created_at` is kept from the
    /// first observation; `fetched_at` advances on every upsert.
    async fn upsert(&self, repo: &Repo) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repos (id, name, full_name, owner_login, owner_avatar, html_url,
                description, language, topics, stargazers, forks, pushed_at, created_at,
                idea_score, category, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                full_name = EXCLUDED.full_name,
                owner_login = EXCLUDED.owner_login,
                owner_avatar = EXCLUDED.owner_avatar,
                html_url = EXCLUDED.html_url,
                description = EXCLUDED.description,
                language = EXCLUDED.language,
                topics = EXCLUDED.topics,
                stargazers = EXCLUDED.stargazers,
                forks = EXCLUDED.forks,
                pushed_at = EXCLUDED.pushed_at,
                idea_score = EXCLUDED.idea_score,
                category = EXCLUDED.category,
                fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(repo.id)
        .bind(&repo.name)
        .bind(&repo.full_name)
        .bind(&repo.owner_login)
        .bind(&repo.owner_avatar)
        .bind(&repo.html_url)
        .bind(&repo.description)
        .bind(&repo.language)
        .bind(&repo.topics)
        .bind(repo.stargazers)
        .bind(repo.forks)
        .bind(repo.pushed_at)
        .bind(repo.created_at)
        .bind(repo.idea_score)
        .bind(repo.category.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting repo {}", repo.id))?;
        Ok(())
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &RepoQuery) {
    let mut prefix = " WHERE ";
    if let Some(category) = params.category {
        builder.push(prefix);
        builder.push("category = ");
        builder.push_bind(category.as_str());
        prefix = " AND ";
    }
    if !params.search.is_empty() {
        let pattern = format!("%{}%", params.search.to_lowercase());
        builder.push(prefix);
        builder.push("(LOWER(name) LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR LOWER(COALESCE(description, '')) LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR array_to_string(topics, ' ') ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

fn row_to_repo(row: &sqlx::postgres::PgRow) -> anyhow::Result<Repo> {
    let category: String = row.try_get("category")?;
    Ok(Repo {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        full_name: row.try_get("full_name")?,
        owner_login: row.try_get("owner_login")?,
        owner_avatar: row.try_get("owner_avatar")?,
        html_url: row.try_get("html_url")?,
        description: row.try_get("description")?,
        language: row.try_get("language")?,
        topics: row
            .try_get::<Option<Vec<String>>, _>("topics")?
            .unwrap_or_default(),
        stargazers: row.try_get("stargazers")?,
        forks: row.try_get("forks")?,
        pushed_at: row.try_get("pushed_at")?,
        created_at: row.try_get("created_at")?,
        idea_score: row.try_get("idea_score")?,
        category: Category::parse(&category).unwrap_or(Category::Other),
        fetched_at: row.try_get("fetched_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_order_parses_known_keys_and_defaults_otherwise() {
        assert_eq!(SortOrder::parse("latest"), SortOrder::Latest);
        assert_eq!(SortOrder::parse("stars"), SortOrder::Stars);
        assert_eq!(SortOrder::parse("oldest"), SortOrder::Oldest);
        assert_eq!(SortOrder::parse(""), SortOrder::IdeaScore);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::IdeaScore);
    }

    #[test]
    fn order_clauses_match_indexed_columns() {
        assert_eq!(SortOrder::IdeaScore.order_clause(), "idea_score DESC");
        assert_eq!(SortOrder::Latest.order_clause(), "created_at DESC");
        assert_eq!(SortOrder::Stars.order_clause(), "stargazers DESC");
        assert_eq!(SortOrder::Oldest.order_clause(), "pushed_at ASC");
    }

    #[test]
    fn filters_compose_category_and_search() {
        let params = RepoQuery {
            category: Some(Category::Game),
            search: "Pixel".to_string(),
            ..Default::default()
        };
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM repos");
        push_filters(&mut builder, &params);
        let sql = builder.sql();
        assert!(sql.contains("WHERE category = "));
        assert!(sql.contains(" AND (LOWER(name) LIKE "));
        assert!(sql.contains("array_to_string(topics, ' ') ILIKE "));
    }

    #[test]
    fn no_filters_leaves_sql_unmodified() {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM repos");
        push_filters(&mut builder, &RepoQuery::default());
        assert_eq!(builder.sql(), "SELECT COUNT(*) FROM repos");
    }
}
