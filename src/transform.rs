//! Row-to-document transformation.
//!
//! Pure mapping from a typed source row to its search-index document.
//! For movie rows the nested person list is split by role into three
//! disjoint collections; every document's sink id equals its domain id,
//! which is what makes re-delivery an overwrite rather than a duplicate.

use serde::Serialize;
use uuid::Uuid;

use crate::rows::{GenreRow, MovieRow, PersonRow, SourceRow};

/// Roles a person can have in a film. Closed enumeration; anything else
/// coming from the source is dropped from the document. Dropping unknown
/// roles is deliberate policy, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonRole {
    Actor,
    Writer,
    Director,
}

impl PersonRole {
    /// Parse a role string from the source. Returns `None` for unknown
    /// roles.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "actor" => Some(PersonRole::Actor),
            "writer" => Some(PersonRole::Writer),
            "director" => Some(PersonRole::Director),
            _ => None,
        }
    }
}

/// Id + name projection of a person inside a movie document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PersonEntry {
    pub id: Uuid,
    pub name: String,
}

/// Document for the movies index.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MovieDocument {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub imdb_rating: Option<f64>,
    pub genres: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub directors_names: Vec<String>,
    pub actors: Vec<PersonEntry>,
    pub writers: Vec<PersonEntry>,
    pub directors: Vec<PersonEntry>,
}

/// Document for the genres index.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenreDocument {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Document for the persons index.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PersonDocument {
    pub id: Uuid,
    pub full_name: String,
}

/// A sink-bound document of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Movie(MovieDocument),
    Genre(GenreDocument),
    Person(PersonDocument),
}

impl Document {
    /// Domain id, used verbatim as the sink document id.
    pub fn id(&self) -> Uuid {
        match self {
            Document::Movie(doc) => doc.id,
            Document::Genre(doc) => doc.id,
            Document::Person(doc) => doc.id,
        }
    }

    /// JSON body sent to the sink.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Document::Movie(doc) => serde_json::json!(doc),
            Document::Genre(doc) => serde_json::json!(doc),
            Document::Person(doc) => serde_json::json!(doc),
        }
    }
}

/// Transform a source row into its document.
pub fn transform(row: SourceRow) -> Document {
    match row {
        SourceRow::Movie(row) => Document::Movie(movie_document(row)),
        SourceRow::Genre(row) => Document::Genre(genre_document(row)),
        SourceRow::Person(row) => Document::Person(person_document(row)),
    }
}

fn movie_document(row: MovieRow) -> MovieDocument {
    let mut actors = Vec::new();
    let mut writers = Vec::new();
    let mut directors = Vec::new();

    for person in row.persons {
        let entry = PersonEntry {
            id: person.id,
            name: person.name,
        };
        match PersonRole::parse(&person.role) {
            Some(PersonRole::Actor) => actors.push(entry),
            Some(PersonRole::Writer) => writers.push(entry),
            Some(PersonRole::Director) => directors.push(entry),
            None => {
                tracing::debug!(
                    "Dropping person {} with unknown role {:?}",
                    entry.id,
                    person.role
                );
            }
        }
    }

    let names = |entries: &[PersonEntry]| entries.iter().map(|p| p.name.clone()).collect();

    MovieDocument {
        id: row.id,
        title: row.title,
        description: row.description,
        imdb_rating: row.rating,
        genres: row.genres,
        actors_names: names(&actors),
        writers_names: names(&writers),
        directors_names: names(&directors),
        actors,
        writers,
        directors,
    }
}

fn genre_document(row: GenreRow) -> GenreDocument {
    GenreDocument {
        id: row.id,
        name: row.name,
        description: row.description,
    }
}

fn person_document(row: PersonRow) -> PersonDocument {
    PersonDocument {
        id: row.id,
        full_name: row.full_name,
    }
}
