//! PostgreSQL source connector.
//!
//! Owns the `tokio_postgres` client plus its spawned connection task and
//! exposes the cursor-paginated extraction operations the sync engine
//! drives. Every operation goes through the backoff decorator: a
//! transport failure drops the cached client, reconnects and re-issues
//! the exact same query from the exact same cursor, so nothing is
//! skipped and nothing is read twice beyond normal idempotent
//! re-emission. Query errors propagate to the engine and abort the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::retry::{with_backoff, Backoff};
use crate::rows::{GenreRow, MovieRow, PersonRef, PersonRow, SourceRow};
use crate::sync::{ChangeSource, EntityKind, PhaseMode, PhaseSpec, SyncWindow};
use crate::PostgresOpts;

use super::query;

/// Source connector for the movie catalog database.
pub struct PostgresSource {
    uri: String,
    client: Mutex<Option<Client>>,
    backoff: Backoff,
}

impl PostgresSource {
    pub fn new(opts: &PostgresOpts, backoff: Backoff) -> Self {
        Self {
            uri: opts.source_uri.clone(),
            client: Mutex::new(None),
            backoff,
        }
    }

    /// Establish the initial connection, retrying with backoff until the
    /// database is reachable.
    pub async fn connect(&self) -> Result<()> {
        with_backoff(&self.backoff, "postgresql connect", || async {
            let mut guard = self.client.lock().await;
            if guard.is_none() {
                *guard = Some(Self::open_connection(&self.uri).await?);
            }
            Ok(())
        })
        .await?;
        info!("Connected to PostgreSQL");
        Ok(())
    }

    async fn open_connection(uri: &str) -> Result<Client> {
        let (client, connection) = tokio_postgres::connect(uri, NoTls).await?;

        // The connection object drives the socket; it runs until the
        // connection closes for any reason.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection closed: {e}");
            }
        });

        Ok(client)
    }

    /// One attempt at a query. On a transport error the cached client is
    /// dropped so the next attempt reconnects first.
    async fn try_query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        let mut guard = self.client.lock().await;
        let client = match guard.as_mut() {
            Some(client) => client,
            None => {
                debug!("Re-establishing PostgreSQL connection");
                guard.insert(Self::open_connection(&self.uri).await?)
            }
        };

        match client.query(sql, params).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                let err = SyncError::from(e);
                if err.is_transport() {
                    *guard = None;
                }
                Err(err)
            }
        }
    }

    /// Run a query with the reconnect-with-backoff discipline. The same
    /// SQL and parameters are re-issued on every attempt.
    async fn query_with_retry(
        &self,
        what: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        with_backoff(&self.backoff, what, || self.try_query(sql, params)).await
    }

    async fn query_range(
        &self,
        what: &str,
        sql: &str,
        window: &SyncWindow,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Row>> {
        match after {
            Some(cursor) => {
                self.query_with_retry(what, sql, &[&window.low, &window.high, &cursor, &limit])
                    .await
            }
            None => {
                self.query_with_retry(what, sql, &[&window.low, &window.high, &limit])
                    .await
            }
        }
    }
}

#[async_trait]
impl ChangeSource for PostgresSource {
    async fn changed_rows(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SourceRow>> {
        let rows = match phase.kind {
            EntityKind::FilmWork => {
                let sql = query::film_range_query(after.is_some());
                self.query_range("film_work range scan", &sql, window, after, limit)
                    .await?
            }
            EntityKind::Genre => {
                let sql = query::standalone_range_query(
                    phase.table,
                    "sng.id, sng.name, sng.description, sng.modified",
                    after.is_some(),
                );
                self.query_range("genre range scan", &sql, window, after, limit)
                    .await?
            }
            EntityKind::Person => {
                let sql = query::standalone_range_query(
                    phase.table,
                    "sng.id, sng.full_name, sng.modified",
                    after.is_some(),
                );
                self.query_range("person range scan", &sql, window, after, limit)
                    .await?
            }
        };

        rows.iter().map(|row| decode_row(phase.kind, row)).collect()
    }

    async fn changed_reference_ids(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let sql = query::reference_ids_query(phase.table, after.is_some());
        let rows = self
            .query_range("reference id scan", &sql, window, after, limit)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, Uuid>("id").map_err(SyncError::from))
            .collect()
    }

    async fn linked_primary_ids(
        &self,
        phase: &PhaseSpec,
        reference_ids: &[Uuid],
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        if reference_ids.is_empty() {
            return Ok(Vec::new());
        }

        let PhaseMode::Reference {
            join_table,
            ref_column,
        } = phase.mode
        else {
            return Err(SyncError::Configuration(format!(
                "membership resolution requested for non-reference phase {}",
                phase.table
            )));
        };

        let sql =
            query::linked_film_ids_query(join_table, ref_column, reference_ids.len(), after.is_some())?;

        let mut params: Vec<&(dyn ToSql + Sync)> = reference_ids
            .iter()
            .map(|id| id as &(dyn ToSql + Sync))
            .collect();
        if let Some(ref cursor) = after {
            params.push(cursor);
        }
        params.push(&limit);

        let rows = self
            .query_with_retry("join membership scan", &sql, &params)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, Uuid>("id").map_err(SyncError::from))
            .collect()
    }

    async fn primary_rows_by_id(&self, ids: &[Uuid]) -> Result<Vec<SourceRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = query::films_by_id_query(ids.len())?;
        let params: Vec<&(dyn ToSql + Sync)> =
            ids.iter().map(|id| id as &(dyn ToSql + Sync)).collect();

        let rows = self
            .query_with_retry("film full fetch", &sql, &params)
            .await?;

        rows.iter()
            .map(|row| decode_row(EntityKind::FilmWork, row))
            .collect()
    }
}

fn decode_row(kind: EntityKind, row: &Row) -> Result<SourceRow> {
    match kind {
        EntityKind::FilmWork => Ok(SourceRow::Movie(decode_film_row(row)?)),
        EntityKind::Genre => Ok(SourceRow::Genre(GenreRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            modified: row.try_get("modified")?,
        })),
        EntityKind::Person => Ok(SourceRow::Person(PersonRow {
            id: row.try_get("id")?,
            full_name: row.try_get("full_name")?,
            modified: row.try_get("modified")?,
        })),
    }
}

fn decode_film_row(row: &Row) -> Result<MovieRow> {
    let persons_json: serde_json::Value = row.try_get("persons")?;
    let persons: Vec<PersonRef> = serde_json::from_value(persons_json)
        .map_err(|e| SyncError::Query(format!("undecodable persons payload: {e}")))?;

    let modified: DateTime<Utc> = row.try_get("modified")?;

    Ok(MovieRow {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        rating: row.try_get("rating")?,
        persons,
        genres: row.try_get("genres")?,
        modified,
    })
}
