//! Synchronization engine for moviesearch-sync.
//!
//! This module drives one sync run as an explicit sequence of phases over
//! a time window `(low_watermark, start_time]`:
//!
//! 1. Film rows changed inside the window are extracted directly and
//!    emitted to the movies index.
//! 2. Each standalone kind (person, genre) is range-scanned the same way
//!    into its own index.
//! 3. For each reference kind, changed reference rows are resolved
//!    through the many-to-many join table to the films they affect, and
//!    those films are re-extracted in full and re-emitted. Skipped on the
//!    very first run: with no watermark established, phase 1 already
//!    captured every film unconditionally.
//! 4. Commit: the watermark advances to the run's start time and every
//!    pagination cursor is cleared, in one atomic write.
//!
//! Every page is delivered write-first: the sink acknowledges the batch
//! before its cursor is persisted. A crash between the two re-emits that
//! page on restart, which the sink absorbs as an upsert. The run's start
//! time itself is persisted when first computed, so an interrupted run
//! resumes with the identical window instead of silently widening it.
//!
//! Phases are data, not control flow: [`SYNC_PHASES`] lists descriptors
//! (kind, tables, target index, mode), so adding a standalone or
//! reference kind is a list entry away.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use checkpoint::{CheckpointKey, CheckpointStore};

use crate::error::{Result, SyncError};
use crate::rows::SourceRow;
use crate::transform::{transform, Document};

/// Entity kinds of the movie catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    FilmWork,
    Genre,
    Person,
}

/// How a phase extracts its changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMode {
    /// Range-scan the primary aggregate's own table.
    Direct,
    /// Range-scan a standalone kind's table into its own index.
    Standalone,
    /// Range-scan a reference kind, then resolve affected films through
    /// the join table and re-emit them.
    Reference {
        join_table: &'static str,
        ref_column: &'static str,
    },
}

/// Descriptor for one sync phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseSpec {
    pub kind: EntityKind,
    /// Source table name (without schema).
    pub table: &'static str,
    /// Target index for the documents this phase emits.
    pub index: &'static str,
    pub mode: PhaseMode,
}

/// The phases of one sync run, in execution order.
pub const SYNC_PHASES: [PhaseSpec; 5] = [
    PhaseSpec {
        kind: EntityKind::FilmWork,
        table: "film_work",
        index: "movies",
        mode: PhaseMode::Direct,
    },
    PhaseSpec {
        kind: EntityKind::Person,
        table: "person",
        index: "persons",
        mode: PhaseMode::Standalone,
    },
    PhaseSpec {
        kind: EntityKind::Genre,
        table: "genre",
        index: "genres",
        mode: PhaseMode::Standalone,
    },
    PhaseSpec {
        kind: EntityKind::Genre,
        table: "genre",
        index: "movies",
        mode: PhaseMode::Reference {
            join_table: "genre_film_work",
            ref_column: "genre_id",
        },
    },
    PhaseSpec {
        kind: EntityKind::Person,
        table: "person",
        index: "movies",
        mode: PhaseMode::Reference {
            join_table: "person_film_work",
            ref_column: "person_id",
        },
    },
];

/// Checkpoint key holding the committed low watermark.
pub const WATERMARK_KEY: &str = "watermark";

/// Checkpoint key holding the in-flight run's start time.
pub const RUN_STARTED_AT_KEY: &str = "run_started_at";

/// Scan window of one run: change timestamps in `(low, high]` are in
/// scope. Left-exclusive so the previous run's boundary row is not read
/// twice, right-inclusive so a row stamped exactly at the start time
/// lands in this run rather than the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncWindow {
    pub low: DateTime<Utc>,
    pub high: DateTime<Utc>,
}

/// Extraction operations the engine needs from the source database.
///
/// All reads are keyset-paginated: `after` is the last seen ordering key
/// and results are ordered by id ascending, at most `limit` rows.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Rows of the phase's kind changed inside the window.
    async fn changed_rows(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SourceRow>>;

    /// Ids of reference rows changed inside the window.
    async fn changed_reference_ids(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>>;

    /// Distinct film ids linked to any of `reference_ids` through the
    /// phase's join table. An empty id set yields no rows and must not
    /// touch the database.
    async fn linked_primary_ids(
        &self,
        phase: &PhaseSpec,
        reference_ids: &[Uuid],
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>>;

    /// Full film rows for an explicit id set.
    async fn primary_rows_by_id(&self, ids: &[Uuid]) -> Result<Vec<SourceRow>>;
}

/// Bulk document delivery into the search index.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Upsert-by-id the batch into the given index. Implementations
    /// handle their own transport retries and partial-failure retries;
    /// an error here is fatal for the run.
    async fn bulk_upsert(&self, index: &str, documents: &[Document]) -> Result<()>;
}

/// Counters for one completed run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub documents_written: usize,
    pub batches: usize,
    pub first_run: bool,
}

/// The synchronization engine. Drives phases sequentially; each page's
/// sink write strictly precedes its cursor commit, which in turn
/// strictly precedes the next page's read.
pub struct SyncEngine<'a> {
    source: &'a dyn ChangeSource,
    sink: &'a dyn DocumentSink,
    state: &'a dyn CheckpointStore,
    batch_size: i64,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        source: &'a dyn ChangeSource,
        sink: &'a dyn DocumentSink,
        state: &'a dyn CheckpointStore,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            sink,
            state,
            batch_size: batch_size as i64,
        }
    }

    /// Run all phases once and commit the watermark.
    pub async fn run_cycle(&self) -> Result<RunStats> {
        let (window, first_run) = self.open_window().await?;
        info!(
            "Sync run over ({}, {}]{}",
            window.low.to_rfc3339(),
            window.high.to_rfc3339(),
            if first_run { " (first run)" } else { "" }
        );

        let mut stats = RunStats {
            first_run,
            ..RunStats::default()
        };

        for phase in SYNC_PHASES.iter() {
            match phase.mode {
                PhaseMode::Direct | PhaseMode::Standalone => {
                    self.run_scan_phase(phase, &window, &mut stats).await?;
                }
                PhaseMode::Reference { .. } => {
                    if first_run {
                        debug!(
                            "Skipping {} propagation on first run",
                            phase.table
                        );
                        continue;
                    }
                    self.run_reference_phase(phase, &window, &mut stats).await?;
                }
            }
        }

        self.commit(&window).await?;
        info!(
            "Sync run complete: {} document(s) in {} batch(es)",
            stats.documents_written, stats.batches
        );
        Ok(stats)
    }

    /// Phase 1 and 2: range-scan one table, emitting its own documents.
    /// Terminal when a page comes back empty.
    async fn run_scan_phase(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        stats: &mut RunStats,
    ) -> Result<()> {
        let cursor_key = CheckpointKey::new(phase.table, phase.index).storage_key();
        let mut cursor = self.load_cursor(&cursor_key).await?;
        info!("Scanning {} for index {}", phase.table, phase.index);

        loop {
            let rows = self
                .source
                .changed_rows(phase, window, cursor, self.batch_size)
                .await?;
            let Some(last) = rows.last() else { break };
            let next_cursor = last.id();

            let documents: Vec<Document> = rows.into_iter().map(transform).collect();
            self.deliver(phase.index, &documents, &cursor_key, next_cursor, stats)
                .await?;
            cursor = Some(next_cursor);
        }

        Ok(())
    }

    /// Phase 3: propagate reference changes to the films they affect.
    async fn run_reference_phase(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        stats: &mut RunStats,
    ) -> Result<()> {
        let PhaseMode::Reference { join_table, .. } = phase.mode else {
            return Err(SyncError::Configuration(format!(
                "phase for table {} is not a reference phase",
                phase.table
            )));
        };

        let ref_key = CheckpointKey::new(phase.table, phase.index).storage_key();
        let join_key = CheckpointKey::new(join_table, phase.index).storage_key();
        let mut ref_cursor = self.load_cursor(&ref_key).await?;
        info!(
            "Propagating {} changes into index {}",
            phase.table, phase.index
        );

        loop {
            let reference_ids = self
                .source
                .changed_reference_ids(phase, window, ref_cursor, self.batch_size)
                .await?;
            let Some(&last_ref) = reference_ids.last() else { break };

            let mut join_cursor = self.load_cursor(&join_key).await?;
            loop {
                let film_ids = self
                    .source
                    .linked_primary_ids(phase, &reference_ids, join_cursor, self.batch_size)
                    .await?;
                let Some(&last_film) = film_ids.last() else { break };

                let rows = self.source.primary_rows_by_id(&film_ids).await?;
                let documents: Vec<Document> = rows.into_iter().map(transform).collect();
                self.deliver(phase.index, &documents, &join_key, last_film, stats)
                    .await?;
                join_cursor = Some(last_film);
            }

            // The join cursor is scoped to this reference page only;
            // clear it and advance the reference cursor atomically.
            self.state
                .set_many(&[
                    (join_key.clone(), None),
                    (ref_key.clone(), Some(last_ref.to_string())),
                ])
                .await?;
            ref_cursor = Some(last_ref);
        }

        Ok(())
    }

    /// Write a batch to the sink, then and only then persist the cursor
    /// that licenses skipping it on restart.
    async fn deliver(
        &self,
        index: &str,
        documents: &[Document],
        cursor_key: &str,
        next_cursor: Uuid,
        stats: &mut RunStats,
    ) -> Result<()> {
        self.sink.bulk_upsert(index, documents).await?;
        self.state
            .set(cursor_key, &next_cursor.to_string())
            .await?;

        stats.documents_written += documents.len();
        stats.batches += 1;
        debug!(
            "Delivered {} document(s) to {}, cursor {} -> {}",
            documents.len(),
            index,
            cursor_key,
            next_cursor
        );
        Ok(())
    }

    /// Phase 4: advance the watermark and clear every cursor in one
    /// atomic write. Nothing here runs if any phase failed.
    async fn commit(&self, window: &SyncWindow) -> Result<()> {
        let mut entries: Vec<(String, Option<String>)> = vec![
            (WATERMARK_KEY.to_string(), Some(window.high.to_rfc3339())),
            (RUN_STARTED_AT_KEY.to_string(), None),
        ];
        for phase in SYNC_PHASES.iter() {
            entries.push((
                CheckpointKey::new(phase.table, phase.index).storage_key(),
                None,
            ));
            if let PhaseMode::Reference { join_table, .. } = phase.mode {
                entries.push((
                    CheckpointKey::new(join_table, phase.index).storage_key(),
                    None,
                ));
            }
        }

        self.state.set_many(&entries).await?;
        info!("Committed watermark {}", window.high.to_rfc3339());
        Ok(())
    }

    /// Determine this run's scan window. The low bound is the committed
    /// watermark (or the calendar origin when none exists yet). The high
    /// bound is persisted the moment it is first computed, so a crashed
    /// run resumes with the identical window.
    async fn open_window(&self) -> Result<(SyncWindow, bool)> {
        let watermark = self.state.get(WATERMARK_KEY).await?;
        let first_run = watermark.is_none();
        let low = match &watermark {
            Some(raw) => parse_timestamp(WATERMARK_KEY, raw)?,
            None => beginning_of_time(),
        };

        let high = match self.state.get(RUN_STARTED_AT_KEY).await? {
            Some(raw) => {
                let started = parse_timestamp(RUN_STARTED_AT_KEY, &raw)?;
                info!(
                    "Resuming interrupted run started at {}",
                    started.to_rfc3339()
                );
                started
            }
            None => {
                let now = Utc::now();
                self.state
                    .set(RUN_STARTED_AT_KEY, &now.to_rfc3339())
                    .await?;
                now
            }
        };

        Ok((SyncWindow { low, high }, first_run))
    }

    async fn load_cursor(&self, key: &str) -> Result<Option<Uuid>> {
        match self.state.get(key).await? {
            Some(raw) => {
                let id = Uuid::parse_str(&raw).map_err(|e| {
                    SyncError::Configuration(format!("invalid cursor under {key}: {e}"))
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }
}

/// Lower bound used before any watermark exists. Kept inside the range
/// PostgreSQL can represent.
pub fn beginning_of_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .expect("calendar origin is representable")
}

fn parse_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::Configuration(format!("invalid timestamp under {key}: {e}")))
}
