//! PostgreSQL site store implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};

use crate::error::{ControlError, ControlResult};
use crate::types::{
    DomainId, DomainRecord, DomainStatus, RuntimeKind, SiteId, SiteRecord, SiteStatus,
};

use super::{SiteFilter, SiteStore};

/// PostgreSQL-backed site store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str, max_connections: u32) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id BIGSERIAL PRIMARY KEY,
                hostname TEXT NOT NULL,
                runtime TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                id BIGSERIAL PRIMARY KEY,
                domain_id BIGINT NOT NULL REFERENCES domains(id),
                name TEXT NOT NULL,
                runtime TEXT NOT NULL,
                boilerplate TEXT NOT NULL,
                port INTEGER,
                status TEXT NOT NULL,
                error TEXT,
                extras JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deployed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_domains_live_hostname
            ON domains (hostname) WHERE status <> 'deleted'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sites_domain ON sites (domain_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sites_status ON sites (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_domain(row: &PgRow) -> ControlResult<DomainRecord> {
        let id: i64 = row.get("id");
        let hostname: String = row.get("hostname");
        let runtime_str: String = row.get("runtime");
        let status_str: String = row.get("status");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let runtime: RuntimeKind = runtime_str
            .parse()
            .map_err(|e: String| ControlError::internal(e))?;
        let status: DomainStatus = status_str
            .parse()
            .map_err(|e: String| ControlError::internal(e))?;

        Ok(DomainRecord {
            id: DomainId::new(id),
            hostname,
            runtime,
            status,
            created_at,
            updated_at,
        })
    }

    fn row_to_site(row: &PgRow) -> ControlResult<SiteRecord> {
        let id: i64 = row.get("id");
        let domain_id: i64 = row.get("domain_id");
        let name: String = row.get("name");
        let runtime_str: String = row.get("runtime");
        let boilerplate: String = row.get("boilerplate");
        let port: Option<i32> = row.get("port");
        let status_str: String = row.get("status");
        let error: Option<String> = row.get("error");
        let extras_json: serde_json::Value = row.get("extras");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");
        let deployed_at: Option<chrono::DateTime<chrono::Utc>> = row.get("deployed_at");

        let runtime: RuntimeKind = runtime_str
            .parse()
            .map_err(|e: String| ControlError::internal(e))?;
        let status: SiteStatus = status_str
            .parse()
            .map_err(|e: String| ControlError::internal(e))?;
        let extras: BTreeMap<String, String> = serde_json::from_value(extras_json)
            .map_err(|e| ControlError::internal(format!("failed to deserialise extras: {e}")))?;

        let port = port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| ControlError::internal(format!("stored port out of range for site {id}")))?;

        Ok(SiteRecord {
            id: SiteId::new(id),
            domain_id: DomainId::new(domain_id),
            name,
            runtime,
            boilerplate,
            port,
            status,
            error,
            extras,
            created_at,
            updated_at,
            deployed_at,
        })
    }
}

const SITE_COLUMNS: &str = "id, domain_id, name, runtime, boilerplate, port, status, error, \
                            extras, created_at, updated_at, deployed_at";

#[async_trait]
impl SiteStore for PostgresStore {
    async fn create_domain(
        &self,
        hostname: &str,
        runtime: RuntimeKind,
    ) -> ControlResult<DomainRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO domains (hostname, runtime, status)
            VALUES ($1, $2, 'active')
            RETURNING id, hostname, runtime, status, created_at, updated_at
            "#,
        )
        .bind(hostname)
        .bind(runtime.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_domain(&row)
    }

    async fn get_domain(&self, id: DomainId) -> ControlResult<Option<DomainRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, hostname, runtime, status, created_at, updated_at
            FROM domains
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_domain(&r)?)),
            None => Ok(None),
        }
    }

    async fn update_domain_status(&self, id: DomainId, status: DomainStatus) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE domains
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::not_found(format!("domain {id}")));
        }

        Ok(())
    }

    async fn create_site(
        &self,
        domain_id: DomainId,
        name: &str,
        runtime: RuntimeKind,
        boilerplate: &str,
        extras: &BTreeMap<String, String>,
    ) -> ControlResult<SiteRecord> {
        let extras_json = serde_json::to_value(extras)
            .map_err(|e| ControlError::internal(format!("failed to serialise extras: {e}")))?;

        let query = format!(
            "INSERT INTO sites (domain_id, name, runtime, boilerplate, status, extras) \
             VALUES ($1, $2, $3, $4, 'pending', $5) \
             RETURNING {SITE_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(domain_id.get())
            .bind(name)
            .bind(runtime.as_str())
            .bind(boilerplate)
            .bind(&extras_json)
            .fetch_one(&self.pool)
            .await?;

        Self::row_to_site(&row)
    }

    async fn get_site(&self, id: SiteId) -> ControlResult<Option<SiteRecord>> {
        let query = format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_site(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_sites(&self, filter: &SiteFilter) -> ControlResult<Vec<SiteRecord>> {
        let mut query = format!("SELECT {SITE_COLUMNS} FROM sites WHERE 1=1");
        let mut param = 0;

        if filter.domain_id.is_some() {
            param += 1;
            query.push_str(&format!(" AND domain_id = ${param}"));
        }
        if filter.status.is_some() {
            param += 1;
            query.push_str(&format!(" AND status = ${param}"));
        }
        if filter.deployed_before.is_some() {
            param += 1;
            query.push_str(&format!(" AND deployed_at < ${param}"));
        }

        query.push_str(" ORDER BY created_at DESC");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        if let Some(domain_id) = filter.domain_id {
            sqlx_query = sqlx_query.bind(domain_id.get());
        }
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(cutoff) = filter.deployed_before {
            sqlx_query = sqlx_query.bind(cutoff);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_site).collect()
    }

    async fn sites_for_domain(&self, domain_id: DomainId) -> ControlResult<Vec<SiteRecord>> {
        self.list_sites(&SiteFilter::new().with_domain(domain_id))
            .await
    }

    async fn update_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        error: Option<&str>,
    ) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sites
            SET status = $1, error = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::not_found(format!("site {id}")));
        }

        Ok(())
    }

    async fn mark_active(&self, id: SiteId, port: u16) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sites
            SET status = 'active', port = $1, error = NULL,
                deployed_at = NOW(), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(i32::from(port))
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::not_found(format!("site {id}")));
        }

        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    async fn connect() -> PostgresStore {
        let url = get_database_url().expect("DATABASE_URL not set");
        PostgresStore::new(&url, 5).await.expect("failed to connect")
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn create_and_get_site() {
        let store = connect().await;

        let domain = store
            .create_domain("pg-test.example", RuntimeKind::Node)
            .await
            .expect("create domain");
        let site = store
            .create_site(domain.id, "pg-test", RuntimeKind::Node, "blank", &BTreeMap::new())
            .await
            .expect("create site");

        let retrieved = store
            .get_site(site.id)
            .await
            .expect("get failed")
            .expect("site not found");

        assert_eq!(retrieved.id, site.id);
        assert_eq!(retrieved.status, SiteStatus::Pending);
        assert!(retrieved.port.is_none());

        store
            .update_status(site.id, SiteStatus::Deleted, None)
            .await
            .expect("cleanup site");
        store
            .update_domain_status(domain.id, DomainStatus::Deleted)
            .await
            .expect("cleanup domain");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn mark_active_is_transactional_update() {
        let store = connect().await;

        let domain = store
            .create_domain("pg-active.example", RuntimeKind::Python)
            .await
            .expect("create domain");
        let site = store
            .create_site(domain.id, "pg-active", RuntimeKind::Python, "blank", &BTreeMap::new())
            .await
            .expect("create site");

        store
            .update_status(site.id, SiteStatus::Failed, Some("boom"))
            .await
            .expect("update");

        let port = 3000 + u16::try_from(site.id.get()).expect("id fits");
        store.mark_active(site.id, port).await.expect("mark active");

        let retrieved = store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, SiteStatus::Active);
        assert_eq!(retrieved.port, Some(port));
        assert!(retrieved.error.is_none());
        assert!(retrieved.deployed_at.is_some());

        store
            .update_status(site.id, SiteStatus::Deleted, None)
            .await
            .expect("cleanup site");
        store
            .update_domain_status(domain.id, DomainStatus::Deleted)
            .await
            .expect("cleanup domain");
    }
}
