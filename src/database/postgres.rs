// src/database/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::{debug, info};

use super::{SliceOrder, Storage};
use crate::report::VatSummary;
use crate::types::{Certificate, LogServer, Slice};

/// PostgreSQL database backend
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create new PostgreSQL backend
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to PostgreSQL database");

        // sqlx 0.8.x doesn't recognize 'channel_binding' parameter from Neon
        let cleaned_url = Self::clean_connection_string(database_url);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(&cleaned_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        info!("Connected to PostgreSQL successfully");

        Ok(Self { pool })
    }

    /// Remove connection string parameters sqlx does not understand
    fn clean_connection_string(url_str: &str) -> String {
        use url::Url;

        let Ok(mut url) = Url::parse(url_str) else {
            return url_str.to_string();
        };

        let unsupported_params = ["channel_binding"];
        let cleaned_pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !unsupported_params.contains(&key.as_ref()))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if cleaned_pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(cleaned_pairs);
        }

        url.to_string()
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS log_server (
                id BIGSERIAL PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                nickname TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create log_server table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slice (
                id BIGSERIAL PRIMARY KEY,
                server_id BIGINT NOT NULL REFERENCES log_server(id) ON DELETE CASCADE,
                start_index BIGINT NOT NULL,
                end_index BIGINT NOT NULL,
                next_index BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create slice table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS certificate (
                id BIGSERIAL PRIMARY KEY,
                subject TEXT NOT NULL,
                issuer TEXT NOT NULL,
                not_before TIMESTAMPTZ NOT NULL,
                not_after TIMESTAMPTZ NOT NULL,
                signature_alg TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                vat TEXT,
                vat_searched BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create certificate table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_slice_server
            ON slice(server_id)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index on slice.server_id")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_certificate_vat_pending
            ON certificate(id)
            WHERE vat_searched = FALSE
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index on pending VAT searches")?;

        info!("Database migrations completed successfully");

        Ok(())
    }

    fn server_from_row(row: &PgRow) -> LogServer {
        LogServer {
            id: Some(row.get("id")),
            url: row.get("url"),
            nickname: row.get("nickname"),
        }
    }

    fn slice_from_row(row: &PgRow) -> Slice {
        Slice {
            id: Some(row.get("id")),
            server_id: row.get("server_id"),
            start: row.get::<i64, _>("start_index") as u64,
            end: row.get::<i64, _>("end_index") as u64,
            next: row.get::<i64, _>("next_index") as u64,
        }
    }

    fn certificate_from_row(row: &PgRow) -> Certificate {
        Certificate {
            id: Some(row.get("id")),
            subject: row.get("subject"),
            issuer: row.get("issuer"),
            not_before: row.get::<DateTime<Utc>, _>("not_before"),
            not_after: row.get::<DateTime<Utc>, _>("not_after"),
            signature_algorithm: row.get("signature_alg"),
            version: row.get::<i32, _>("version_number") as u32,
            fingerprint: row.get("fingerprint"),
            vat: row.get("vat"),
            vat_searched: row.get("vat_searched"),
        }
    }

    async fn grouped_counts(&self, column: &str) -> Result<Vec<(String, u64)>> {
        // column comes from a fixed set of call sites, never from input
        let sql = format!(
            "SELECT {column} AS label, COUNT(*) AS num FROM certificate GROUP BY {column}"
        );

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to count certificates by {}", column))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let label: String = row.get("label");
                let num: i64 = row.get("num");
                (label, num as u64)
            })
            .collect())
    }
}

const CERTIFICATE_COLUMNS: &str = "id, subject, issuer, not_before, not_after, signature_alg, \
     version_number, fingerprint, vat, vat_searched";

#[async_trait]
impl Storage for PostgresBackend {
    async fn upsert_server(&self, server: &LogServer) -> Result<LogServer> {
        let row = match server.id {
            Some(id) => sqlx::query(
                r#"
                UPDATE log_server SET url = $2, nickname = $3
                WHERE id = $1
                RETURNING id, url, nickname
                "#,
            )
            .bind(id)
            .bind(&server.url)
            .bind(&server.nickname)
            .fetch_one(&self.pool)
            .await
            .context("Failed to update log server")?,
            None => sqlx::query(
                r#"
                INSERT INTO log_server (url, nickname)
                VALUES ($1, $2)
                RETURNING id, url, nickname
                "#,
            )
            .bind(&server.url)
            .bind(&server.nickname)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert log server")?,
        };

        Ok(Self::server_from_row(&row))
    }

    async fn find_server(&self, id: i64) -> Result<Option<LogServer>> {
        let row = sqlx::query("SELECT id, url, nickname FROM log_server WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch log server")?;

        Ok(row.as_ref().map(Self::server_from_row))
    }

    async fn find_server_by_url(&self, url: &str) -> Result<Option<LogServer>> {
        let row = sqlx::query("SELECT id, url, nickname FROM log_server WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch log server by URL")?;

        Ok(row.as_ref().map(Self::server_from_row))
    }

    async fn list_servers(&self) -> Result<Vec<LogServer>> {
        let rows = sqlx::query("SELECT id, url, nickname FROM log_server ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list log servers")?;

        Ok(rows.iter().map(Self::server_from_row).collect())
    }

    async fn upsert_slice(&self, slice: &Slice) -> Result<Slice> {
        let row = match slice.id {
            Some(id) => sqlx::query(
                r#"
                UPDATE slice SET start_index = $2, end_index = $3, next_index = $4
                WHERE id = $1
                RETURNING id, server_id, start_index, end_index, next_index
                "#,
            )
            .bind(id)
            .bind(slice.start as i64)
            .bind(slice.end as i64)
            .bind(slice.next as i64)
            .fetch_one(&self.pool)
            .await
            .context("Failed to update slice")?,
            None => sqlx::query(
                r#"
                INSERT INTO slice (server_id, start_index, end_index, next_index)
                VALUES ($1, $2, $3, $4)
                RETURNING id, server_id, start_index, end_index, next_index
                "#,
            )
            .bind(slice.server_id)
            .bind(slice.start as i64)
            .bind(slice.end as i64)
            .bind(slice.next as i64)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert slice")?,
        };

        Ok(Self::slice_from_row(&row))
    }

    async fn list_slices_by_server(&self, server_id: i64, order: SliceOrder) -> Result<Vec<Slice>> {
        let order_by = match order {
            SliceOrder::StartAsc => "start_index ASC",
            SliceOrder::EndDesc => "end_index DESC",
        };
        let sql = format!(
            "SELECT id, server_id, start_index, end_index, next_index \
             FROM slice WHERE server_id = $1 ORDER BY {order_by}"
        );

        let rows = sqlx::query(&sql)
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list slices")?;

        debug!("Fetched {} slices for server {}", rows.len(), server_id);

        Ok(rows.iter().map(Self::slice_from_row).collect())
    }

    async fn delete_slice(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM slice WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete slice")?;

        Ok(())
    }

    async fn slice_exists(&self, id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM slice WHERE id = $1) AS present")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check slice existence")?;

        Ok(row.get("present"))
    }

    async fn upsert_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        let sql = match certificate.id {
            Some(_) => format!(
                "UPDATE certificate SET subject = $2, issuer = $3, not_before = $4, \
                 not_after = $5, signature_alg = $6, version_number = $7, fingerprint = $8, \
                 vat = $9, vat_searched = $10 WHERE id = $1 RETURNING {CERTIFICATE_COLUMNS}"
            ),
            None => format!(
                "INSERT INTO certificate (subject, issuer, not_before, not_after, signature_alg, \
                 version_number, fingerprint, vat, vat_searched) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {CERTIFICATE_COLUMNS}"
            ),
        };

        let mut query = sqlx::query(&sql);
        if let Some(id) = certificate.id {
            query = query.bind(id);
        }

        let row = query
            .bind(&certificate.subject)
            .bind(&certificate.issuer)
            .bind(certificate.not_before)
            .bind(certificate.not_after)
            .bind(&certificate.signature_algorithm)
            .bind(certificate.version as i32)
            .bind(&certificate.fingerprint)
            .bind(&certificate.vat)
            .bind(certificate.vat_searched)
            .fetch_one(&self.pool)
            .await
            .context("Failed to save certificate")?;

        debug!("Saved certificate for {}", certificate.subject);

        Ok(Self::certificate_from_row(&row))
    }

    async fn list_certificates_not_vat_searched(&self) -> Result<Vec<Certificate>> {
        let rows = sqlx::query(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificate WHERE vat_searched = FALSE ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending VAT searches")?;

        Ok(rows.iter().map(Self::certificate_from_row).collect())
    }

    async fn list_certificates(&self, page: u64, size: u64, vat_only: bool) -> Result<Vec<Certificate>> {
        if self.count_certificates().await? < page.saturating_mul(size) {
            return Ok(Vec::new());
        }

        let filter = if vat_only { "WHERE vat IS NOT NULL" } else { "" };
        let rows = sqlx::query(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificate {filter} ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(size as i64)
        .bind((page * size) as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list certificates")?;

        Ok(rows.iter().map(Self::certificate_from_row).collect())
    }

    async fn count_certificates(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS num FROM certificate")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count certificates")?;

        Ok(row.get::<i64, _>("num") as u64)
    }

    async fn count_by_issuer(&self) -> Result<Vec<(String, u64)>> {
        self.grouped_counts("issuer").await
    }

    async fn count_by_algorithm(&self) -> Result<Vec<(String, u64)>> {
        self.grouped_counts("signature_alg").await
    }

    async fn vat_summary(&self) -> Result<VatSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE vat IS NOT NULL) AS found,
                COUNT(*) FILTER (WHERE vat IS NULL AND vat_searched) AS not_found,
                COUNT(*) FILTER (WHERE vat IS NULL AND NOT vat_searched) AS not_searched
            FROM certificate
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to summarize VAT searches")?;

        Ok(VatSummary {
            found: row.get::<i64, _>("found") as u64,
            not_found: row.get::<i64, _>("not_found") as u64,
            not_searched: row.get::<i64, _>("not_searched") as u64,
        })
    }
}
