//! In-memory test doubles for the sync engine.
//!
//! `MemorySource` mirrors the catalog query semantics (time window,
//! keyset cursor, join resolution) over plain vectors, and `MemorySink`
//! records upserts per index. Integration tests drive the real engine
//! against these to exercise pagination, propagation and crash-recovery
//! behavior without a live database or cluster.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::rows::{GenreRow, MovieRow, PersonRef, PersonRow, SourceRow};
use crate::sync::{ChangeSource, DocumentSink, EntityKind, PhaseSpec, SyncWindow};
use crate::transform::Document;

/// Timestamp helper for fixtures: `ts(n)` is n seconds past the epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// Build a movie row with no persons or genres attached.
pub fn movie(title: &str, modified: DateTime<Utc>) -> MovieRow {
    MovieRow {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: None,
        rating: Some(7.0),
        persons: Vec::new(),
        genres: Vec::new(),
        modified,
    }
}

pub fn genre(name: &str, modified: DateTime<Utc>) -> GenreRow {
    GenreRow {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        modified,
    }
}

pub fn person(full_name: &str, modified: DateTime<Utc>) -> PersonRow {
    PersonRow {
        id: Uuid::new_v4(),
        full_name: full_name.to_string(),
        modified,
    }
}

/// One person credit on a movie row.
pub fn credit(row: &PersonRow, role: &str) -> PersonRef {
    PersonRef {
        id: row.id,
        name: row.full_name.clone(),
        role: role.to_string(),
    }
}

/// In-memory movie catalog standing in for the source database.
#[derive(Default)]
pub struct Catalog {
    pub movies: Vec<MovieRow>,
    pub genres: Vec<GenreRow>,
    pub persons: Vec<PersonRow>,
    /// (genre id, film id) rows of genre_film_work.
    pub genre_links: Vec<(Uuid, Uuid)>,
    /// (person id, film id) rows of person_film_work.
    pub person_links: Vec<(Uuid, Uuid)>,
}

impl Catalog {
    pub fn link_genre(&mut self, genre_id: Uuid, film_id: Uuid) {
        self.genre_links.push((genre_id, film_id));
    }

    pub fn link_person(&mut self, person_id: Uuid, film_id: Uuid) {
        self.person_links.push((person_id, film_id));
    }
}

/// `ChangeSource` over a [`Catalog`].
#[derive(Default)]
pub struct MemorySource {
    catalog: Mutex<Catalog>,
    /// Number of issued "queries", for asserting short-circuits.
    pub queries: AtomicUsize,
}

impl MemorySource {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().expect("catalog lock poisoned")
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn count_query(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

fn in_window(modified: DateTime<Utc>, window: &SyncWindow) -> bool {
    modified > window.low && modified <= window.high
}

fn page<T: Clone>(
    mut items: Vec<(Uuid, T)>,
    after: Option<Uuid>,
    limit: i64,
) -> Vec<T> {
    items.sort_by_key(|(id, _)| *id);
    items
        .into_iter()
        .filter(|(id, _)| after.map_or(true, |cursor| *id > cursor))
        .take(limit as usize)
        .map(|(_, item)| item)
        .collect()
}

#[async_trait]
impl ChangeSource for MemorySource {
    async fn changed_rows(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SourceRow>> {
        self.count_query();
        let catalog = self.catalog();
        let rows: Vec<(Uuid, SourceRow)> = match phase.kind {
            EntityKind::FilmWork => catalog
                .movies
                .iter()
                .filter(|m| in_window(m.modified, window))
                .map(|m| (m.id, SourceRow::Movie(m.clone())))
                .collect(),
            EntityKind::Genre => catalog
                .genres
                .iter()
                .filter(|g| in_window(g.modified, window))
                .map(|g| (g.id, SourceRow::Genre(g.clone())))
                .collect(),
            EntityKind::Person => catalog
                .persons
                .iter()
                .filter(|p| in_window(p.modified, window))
                .map(|p| (p.id, SourceRow::Person(p.clone())))
                .collect(),
        };
        Ok(page(rows, after, limit))
    }

    async fn changed_reference_ids(
        &self,
        phase: &PhaseSpec,
        window: &SyncWindow,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        self.count_query();
        let catalog = self.catalog();
        let ids: Vec<(Uuid, Uuid)> = match phase.kind {
            EntityKind::Genre => catalog
                .genres
                .iter()
                .filter(|g| in_window(g.modified, window))
                .map(|g| (g.id, g.id))
                .collect(),
            EntityKind::Person => catalog
                .persons
                .iter()
                .filter(|p| in_window(p.modified, window))
                .map(|p| (p.id, p.id))
                .collect(),
            EntityKind::FilmWork => {
                return Err(SyncError::Configuration(
                    "film_work is not a reference kind".to_string(),
                ))
            }
        };
        Ok(page(ids, after, limit))
    }

    async fn linked_primary_ids(
        &self,
        phase: &PhaseSpec,
        reference_ids: &[Uuid],
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        if reference_ids.is_empty() {
            return Err(SyncError::Configuration(
                "membership resolution invoked with an empty id set".to_string(),
            ));
        }
        self.count_query();
        let catalog = self.catalog();
        let links = match phase.kind {
            EntityKind::Genre => &catalog.genre_links,
            EntityKind::Person => &catalog.person_links,
            EntityKind::FilmWork => {
                return Err(SyncError::Configuration(
                    "film_work is not a reference kind".to_string(),
                ))
            }
        };

        let refs: BTreeSet<Uuid> = reference_ids.iter().copied().collect();
        let distinct: BTreeSet<Uuid> = links
            .iter()
            .filter(|(ref_id, _)| refs.contains(ref_id))
            .map(|(_, film_id)| *film_id)
            .collect();

        Ok(distinct
            .into_iter()
            .filter(|id| after.map_or(true, |cursor| *id > cursor))
            .take(limit as usize)
            .collect())
    }

    async fn primary_rows_by_id(&self, ids: &[Uuid]) -> Result<Vec<SourceRow>> {
        if ids.is_empty() {
            return Err(SyncError::Configuration(
                "full fetch invoked with an empty id set".to_string(),
            ));
        }
        self.count_query();
        let catalog = self.catalog();
        let wanted: BTreeSet<Uuid> = ids.iter().copied().collect();
        let mut rows: Vec<MovieRow> = catalog
            .movies
            .iter()
            .filter(|m| wanted.contains(&m.id))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.id);
        Ok(rows.into_iter().map(SourceRow::Movie).collect())
    }
}

/// Failure injection for [`MemorySink`].
#[derive(Debug, Clone, Default)]
pub enum SinkFailure {
    #[default]
    None,
    /// Fail any write to the given index without applying it.
    OnIndex(String),
    /// Apply writes normally until `n` have happened, then apply the
    /// n-th write's documents but report failure (write acknowledged
    /// lost: the cursor for it is never persisted).
    AfterWrites(usize),
}

/// `DocumentSink` recording upserts per index.
#[derive(Default)]
pub struct MemorySink {
    documents: Mutex<BTreeMap<(String, Uuid), serde_json::Value>>,
    writes: Mutex<Vec<(String, Vec<Uuid>)>>,
    failure: Mutex<SinkFailure>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&self, failure: SinkFailure) {
        *self.failure.lock().expect("failure lock poisoned") = failure;
    }

    /// Documents currently stored in one index.
    pub fn document_count(&self, index: &str) -> usize {
        self.documents
            .lock()
            .expect("documents lock poisoned")
            .keys()
            .filter(|(i, _)| i == index)
            .count()
    }

    pub fn get(&self, index: &str, id: Uuid) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .expect("documents lock poisoned")
            .get(&(index.to_string(), id))
            .cloned()
    }

    /// History of (index, document ids) per bulk write.
    pub fn writes(&self) -> Vec<(String, Vec<Uuid>)> {
        self.writes.lock().expect("writes lock poisoned").clone()
    }

    /// Total documents delivered to one index across all writes,
    /// counting re-deliveries.
    pub fn delivered_to(&self, index: &str) -> usize {
        self.writes()
            .iter()
            .filter(|(i, _)| i == index)
            .map(|(_, ids)| ids.len())
            .sum()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn bulk_upsert(&self, index: &str, documents: &[Document]) -> Result<()> {
        let failure = self.failure.lock().expect("failure lock poisoned").clone();

        if let SinkFailure::OnIndex(failing) = &failure {
            if failing == index {
                return Err(SyncError::FatalBatch(format!(
                    "injected failure writing to {index}"
                )));
            }
        }

        let write_ordinal = self.writes.lock().expect("writes lock poisoned").len();

        let mut store = self.documents.lock().expect("documents lock poisoned");
        let mut ids = Vec::with_capacity(documents.len());
        for doc in documents {
            store.insert((index.to_string(), doc.id()), doc.to_json());
            ids.push(doc.id());
        }
        drop(store);
        self.writes
            .lock()
            .expect("writes lock poisoned")
            .push((index.to_string(), ids));

        if let SinkFailure::AfterWrites(n) = failure {
            if write_ordinal >= n {
                return Err(SyncError::FatalBatch(format!(
                    "injected failure after write {write_ordinal} to {index}"
                )));
            }
        }

        Ok(())
    }
}
