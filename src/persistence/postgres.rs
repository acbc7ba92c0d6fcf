//! PostgreSQL implementation of the persistence client.

use std::collections::HashMap;
use std::io;

use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{ConnectOptions, Connection, Postgres, QueryBuilder};

use super::models::{Incident, StatusPage};
use super::schema::{
    INCIDENT_UPSERT_COLUMNS, INCIDENTS_TABLE, LiveColumn, STATUS_PAGE_TABLE, TableDef,
    quote_ident,
};
use crate::config::StoreConfig;
use crate::error::{StoreError, is_duplicate_database};

/// Rows per `INSERT` statement; 9 binds each keeps well under the
/// 65 535 bind-parameter limit.
const UPSERT_CHUNK_ROWS: usize = 1_000;

/// PostgreSQL-backed store for status pages and incidents.
///
/// Holds a pool capped at a single connection. Every operation is one
/// round-trip (or one transaction); dropping an operation's future
/// abandons it.
#[derive(Debug, Clone)]
pub struct StoreClient {
    pool: PgPool,
    namespace: String,
}

impl StoreClient {
    /// Builds a client from `STATUSPHERE_POSTGRES_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] for missing or invalid
    /// variables and [`StoreError::Connection`] if the server cannot be
    /// reached or the database cannot be ensured.
    pub async fn from_env() -> Result<Self, StoreError> {
        let config = StoreConfig::from_env()?;
        Self::connect(&config).await
    }

    /// Ensures the configured database exists, then connects to it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if either connection fails or
    /// `CREATE DATABASE` fails for any reason other than the database
    /// already existing.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        ensure_database(config).await?;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect_with(config.database_options())
            .await
            .map_err(|source| StoreError::Connection {
                context: "connect to database",
                source,
            })?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            namespace = %config.namespace,
            "connected to postgres"
        );

        Ok(Self::from_pool(pool, &config.namespace))
    }

    /// Wraps an existing pool. Tables are looked up in `namespace`.
    #[must_use]
    pub fn from_pool(pool: PgPool, namespace: &str) -> Self {
        Self {
            pool,
            namespace: namespace.to_string(),
        }
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the namespace holding the tables.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Closes the pool, waiting for the connection to be released.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Creates the namespace and both tables if they do not exist, adds
    /// any declared column a table lacks (backfilling existing rows with
    /// the column type's zero value), creates lookup indexes, and checks
    /// the live column types and nullability against the declarations.
    ///
    /// Every step is idempotent; re-running converges after a partial run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`] naming the namespace or table whose
    /// setup failed or whose shape does not match.
    pub async fn auto_migrate(&self) -> Result<(), StoreError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.namespace));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::schema(&self.namespace, format!("failed to create schema: {e}"))
            })?;

        self.ensure_table(&STATUS_PAGE_TABLE).await?;
        self.ensure_table(&INCIDENTS_TABLE).await?;

        tracing::info!(namespace = %self.namespace, "schema migrated");
        Ok(())
    }

    async fn ensure_table(&self, table: &TableDef) -> Result<(), StoreError> {
        let name = table.display_name(&self.namespace);
        let fail =
            |e: sqlx::Error| StoreError::schema(&name, format!("failed to migrate table: {e}"));

        sqlx::query(&table.create_table_sql(&self.namespace))
            .execute(&self.pool)
            .await
            .map_err(fail)?;

        for sql in table
            .add_missing_columns_sql(&self.namespace)
            .into_iter()
            .chain(table.create_indexes_sql(&self.namespace))
        {
            sqlx::query(&sql).execute(&self.pool).await.map_err(fail)?;
        }

        let live: Vec<LiveColumn> = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT column_name::text, data_type::text, is_nullable = 'YES' \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&self.namespace)
        .bind(table.name)
        .fetch_all(&self.pool)
        .await
        .map_err(fail)?
        .into_iter()
        .map(|(name, data_type, nullable)| LiveColumn {
            name,
            data_type,
            nullable,
        })
        .collect();

        table
            .verify_shape(&live)
            .map_err(|reason| StoreError::schema(&name, reason))?;

        tracing::debug!(table = %name, "table ready");
        Ok(())
    }

    /// Returns every status page, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure.
    pub async fn get_all_status_pages(&self) -> Result<Vec<StatusPage>, StoreError> {
        let sql = STATUS_PAGE_TABLE.select_sql(&self.namespace);
        sqlx::query_as::<_, StatusPage>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_query("select status_page", e))
    }

    /// Returns the status page with the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no page has that URL and
    /// [`StoreError::Query`] on database failure.
    pub async fn get_status_page(&self, url: &str) -> Result<StatusPage, StoreError> {
        let sql = format!(
            "{} WHERE {} = $1",
            STATUS_PAGE_TABLE.select_sql(&self.namespace),
            quote_ident(STATUS_PAGE_TABLE.key)
        );
        sqlx::query_as::<_, StatusPage>(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_query("select status_page", e))?
            .ok_or_else(|| StoreError::NotFound {
                entity: "status page",
                key: url.to_string(),
            })
    }

    /// Updates the status page whose URL is `page.url`.
    ///
    /// Zero-valued fields leave the stored value alone: an empty `name`
    /// keeps the old name and `is_indexed == false` never clears the flag.
    /// Timestamps are always written. Returns the number of rows updated;
    /// zero is not an error; callers wanting create-or-update fall back to
    /// [`StoreClient::insert_status_page`] themselves.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure.
    pub async fn update_status_page(&self, page: &StatusPage) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {} SET \
             \"name\" = COALESCE(NULLIF($2, ''), \"name\"), \
             \"is_indexed\" = CASE WHEN $3 THEN TRUE ELSE \"is_indexed\" END, \
             \"last_historically_scraped\" = $4, \
             \"last_currently_scraped\" = $5 \
             WHERE \"url\" = $1",
            STATUS_PAGE_TABLE.qualified(&self.namespace)
        );
        let result = sqlx::query(&sql)
            .bind(&page.url)
            .bind(&page.name)
            .bind(page.is_indexed)
            .bind(page.last_historically_scraped)
            .bind(page.last_currently_scraped)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_query("update status_page", e))?;

        let updated = result.rows_affected();
        if updated == 0 {
            tracing::debug!(url = %page.url, "status page update matched no rows");
        }
        Ok(updated)
    }

    /// Inserts a new status page.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if a page with the same URL
    /// exists and [`StoreError::Query`] on other database failures.
    pub async fn insert_status_page(&self, page: &StatusPage) -> Result<(), StoreError> {
        let sql = format!(
            "{}VALUES ($1, $2, $3, $4, $5)",
            STATUS_PAGE_TABLE.insert_prefix(&self.namespace)
        );
        sqlx::query(&sql)
            .bind(&page.name)
            .bind(&page.url)
            .bind(page.is_indexed)
            .bind(page.last_historically_scraped)
            .bind(page.last_currently_scraped)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_query("insert status_page", e))?;

        tracing::debug!(url = %page.url, "status page inserted");
        Ok(())
    }

    /// Returns every incident belonging to `status_page_url`, in no
    /// particular order. An unknown URL yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure or if a stored
    /// row cannot be decoded.
    pub async fn get_incidents(&self, status_page_url: &str) -> Result<Vec<Incident>, StoreError> {
        let sql = format!(
            "{} WHERE \"status_page_url\" = $1",
            INCIDENTS_TABLE.select_sql(&self.namespace)
        );
        sqlx::query_as::<_, Incident>(&sql)
            .bind(status_page_url)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::from_query("select incidents", e))
    }

    /// Inserts the incidents, or refreshes [`INCIDENT_UPSERT_COLUMNS`] of
    /// rows whose `deep_link` already exists.
    ///
    /// Conflicts are resolved by `INSERT ... ON CONFLICT DO UPDATE`, never
    /// by reading first. Within one call the last incident for a given
    /// `deep_link` wins. All statements run in one transaction, so either
    /// every incident is written or none is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure.
    pub async fn create_or_update_incidents(
        &self,
        incidents: &[Incident],
    ) -> Result<(), StoreError> {
        const OPERATION: &str = "upsert incidents";

        let batch = dedupe_by_deep_link(incidents);
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_query(OPERATION, e))?;

        let prefix = INCIDENTS_TABLE.insert_prefix(&self.namespace);
        let conflict = INCIDENTS_TABLE.on_conflict_update_sql(&INCIDENT_UPSERT_COLUMNS);

        for chunk in batch.chunks(UPSERT_CHUNK_ROWS) {
            let mut builder = QueryBuilder::<Postgres>::new(&prefix);
            builder.push_values(chunk, |mut row, incident| {
                row.push_bind(&incident.title)
                    .push_bind(Json(&incident.components))
                    .push_bind(Json(&incident.events))
                    .push_bind(incident.start_time)
                    .push_bind(incident.end_time)
                    .push_bind(&incident.description)
                    .push_bind(&incident.deep_link)
                    .push_bind(incident.impact.as_str())
                    .push_bind(&incident.status_page_url);
            });
            builder.push(&conflict);

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::from_query(OPERATION, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::from_query(OPERATION, e))?;

        tracing::debug!(
            submitted = incidents.len(),
            written = batch.len(),
            "incidents upserted"
        );
        Ok(())
    }
}

/// Opens a server-level connection and issues `CREATE DATABASE`,
/// treating "already exists" as success.
async fn ensure_database(config: &StoreConfig) -> Result<(), StoreError> {
    let mut conn = tokio::time::timeout(
        config.connect_timeout,
        config.server_options().connect(),
    )
    .await
    .map_err(|_| StoreError::Connection {
        context: "connect to server",
        source: sqlx::Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "timed out connecting to postgres",
        )),
    })?
    .map_err(|source| StoreError::Connection {
        context: "connect to server",
        source,
    })?;

    let created = create_database(&mut conn, &config.database).await;

    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "closing server connection failed");
    }

    match created {
        Ok(()) => {
            tracing::info!(database = %config.database, "database created");
            Ok(())
        }
        Err(e) if is_duplicate_database(&e) => {
            tracing::debug!(database = %config.database, "database already exists");
            Ok(())
        }
        Err(source) => Err(StoreError::Connection {
            context: "create database",
            source,
        }),
    }
}

async fn create_database(conn: &mut PgConnection, database: &str) -> Result<(), sqlx::Error> {
    let sql = format!("CREATE DATABASE {}", quote_ident(database));
    sqlx::query(&sql).execute(conn).await?;
    Ok(())
}

/// Collapses incidents sharing a `deep_link` to the last one submitted,
/// keeping first-seen order.
fn dedupe_by_deep_link(incidents: &[Incident]) -> Vec<&Incident> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(incidents.len());
    let mut batch: Vec<&Incident> = Vec::with_capacity(incidents.len());
    for incident in incidents {
        match positions.get(incident.deep_link.as_str()) {
            Some(&pos) => {
                if let Some(slot) = batch.get_mut(pos) {
                    *slot = incident;
                }
            }
            None => {
                positions.insert(&incident.deep_link, batch.len());
                batch.push(incident);
            }
        }
    }
    batch
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::persistence::models::Impact;

    fn incident(deep_link: &str, title: &str) -> Incident {
        let Some(start_time) = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).single() else {
            panic!("valid timestamp");
        };
        Incident {
            title: title.to_string(),
            components: vec!["API".to_string()],
            events: Vec::new(),
            start_time,
            end_time: None,
            description: None,
            deep_link: deep_link.to_string(),
            impact: Impact::Minor,
            status_page_url: "https://example.com/status".to_string(),
        }
    }

    #[test]
    fn dedupe_keeps_last_occurrence_in_first_seen_order() {
        let input = vec![
            incident("https://example.com/i/1", "first"),
            incident("https://example.com/i/2", "other"),
            incident("https://example.com/i/1", "second"),
        ];
        let batch = dedupe_by_deep_link(&input);
        let titles: Vec<&str> = batch.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "other"]);
    }

    #[test]
    fn dedupe_of_empty_input_is_empty() {
        assert!(dedupe_by_deep_link(&[]).is_empty());
    }

    #[test]
    fn dedupe_preserves_distinct_links() {
        let input: Vec<Incident> = (0..5)
            .map(|n| incident(&format!("https://example.com/i/{n}"), "t"))
            .collect();
        assert_eq!(dedupe_by_deep_link(&input).len(), 5);
    }

    #[tokio::test]
    async fn empty_upsert_does_not_touch_the_pool() {
        let parsed = "postgres://nobody@127.0.0.1:1/none".parse::<sqlx::postgres::PgConnectOptions>();
        let Ok(options) = parsed else {
            panic!("valid url");
        };
        let pool = PgPoolOptions::new().connect_lazy_with(options);
        let client = StoreClient::from_pool(pool, "unused");
        assert!(client.create_or_update_incidents(&[]).await.is_ok());
        assert_eq!(client.namespace(), "unused");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        let config = StoreConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "nobody".to_string(),
            password: "nothing".to_string(),
            database: "statusphere".to_string(),
            namespace: "mrs_hudson".to_string(),
            connect_timeout: std::time::Duration::from_secs(2),
        };
        let result = StoreClient::connect(&config).await;
        let Err(err) = result else {
            panic!("connecting to a closed port should fail");
        };
        assert!(matches!(
            err,
            StoreError::Connection {
                context: "connect to server",
                ..
            }
        ));
        assert!(err.is_retryable());
    }
}
