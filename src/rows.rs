//! Typed rows returned by the source for each entity kind.
//!
//! The primary aggregate row arrives pre-joined: the SQL aggregates the
//! related persons (with their role) and genre names into nested
//! collections, so one row carries everything its document needs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// One person attached to a film row, with the role they played in it.
///
/// Field names mirror the keys produced by the film query's `json_agg`
/// projection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PersonRef {
    #[serde(rename = "person_id")]
    pub id: Uuid,
    #[serde(rename = "person_name")]
    pub name: String,
    #[serde(rename = "person_role")]
    pub role: String,
}

/// Pre-joined film_work row.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub persons: Vec<PersonRef>,
    pub genres: Vec<String>,
    pub modified: DateTime<Utc>,
}

/// Genre row for the standalone genres index.
#[derive(Debug, Clone, PartialEq)]
pub struct GenreRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub modified: DateTime<Utc>,
}

/// Person row for the standalone persons index.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRow {
    pub id: Uuid,
    pub full_name: String,
    pub modified: DateTime<Utc>,
}

/// A row of any synced entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRow {
    Movie(MovieRow),
    Genre(GenreRow),
    Person(PersonRow),
}

impl SourceRow {
    /// Ordering key; also the keyset pagination cursor value.
    pub fn id(&self) -> Uuid {
        match self {
            SourceRow::Movie(row) => row.id,
            SourceRow::Genre(row) => row.id,
            SourceRow::Person(row) => row.id,
        }
    }

    /// Change timestamp of the row.
    pub fn modified(&self) -> DateTime<Utc> {
        match self {
            SourceRow::Movie(row) => row.modified,
            SourceRow::Genre(row) => row.modified,
            SourceRow::Person(row) => row.modified,
        }
    }
}
