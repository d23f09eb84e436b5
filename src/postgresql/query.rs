//! Query builder for the movie catalog schema.
//!
//! Pure functions mapping (entity kind, cursor presence, filter mode) to
//! parametrized SQL text with `$n` placeholders; no I/O happens here.
//! Range-scoped queries use a half-open window `(low_watermark, start_time]`
//! combined with keyset pagination on the id, so rows sharing one
//! timestamp are still paged through exactly once.
//!
//! Parameter order is fixed per query shape and the source connector
//! binds values in the same order:
//! - range queries: `low, start[, cursor], limit`
//! - membership queries: `ref ids..[, cursor], limit`
//! - full-fetch queries: `ids..`

use crate::error::{Result, SyncError};

/// Select list shared by every query returning full film rows. Persons
/// arrive as a JSON array of role/id/name objects, genres as a plain
/// text array of names.
const FILM_SELECT: &str = "\
SELECT
    fw.id,
    fw.title,
    fw.description,
    fw.rating,
    fw.modified,
    COALESCE(
        json_agg(
            DISTINCT jsonb_build_object(
                'person_role', pfw.role,
                'person_id', p.id,
                'person_name', p.full_name
            )
        ) FILTER (WHERE p.id IS NOT NULL),
        '[]'
    ) AS persons,
    COALESCE(
        array_agg(DISTINCT g.name) FILTER (WHERE g.id IS NOT NULL),
        ARRAY[]::text[]
    ) AS genres
FROM content.film_work fw
    LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
    LEFT JOIN content.person p ON p.id = pfw.person_id
    LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
    LEFT JOIN content.genre g ON g.id = gfw.genre_id";

/// Full film rows changed inside the window, keyset-paginated.
pub fn film_range_query(has_cursor: bool) -> String {
    let mut query = format!("{FILM_SELECT}\nWHERE fw.modified > $1 AND fw.modified <= $2");
    let mut next = 3;
    if has_cursor {
        query.push_str(&format!(" AND fw.id > ${next}"));
        next += 1;
    }
    query.push_str(&format!(
        "\nGROUP BY fw.id\nORDER BY fw.id\nLIMIT ${next}"
    ));
    query
}

/// Standalone-kind rows changed inside the window, keyset-paginated.
/// The column list is per table; the predicate shape is shared.
pub fn standalone_range_query(table: &str, columns: &str, has_cursor: bool) -> String {
    let mut query = format!(
        "SELECT {columns}\nFROM content.{table} sng\nWHERE sng.modified > $1 AND sng.modified <= $2"
    );
    let mut next = 3;
    if has_cursor {
        query.push_str(&format!(" AND sng.id > ${next}"));
        next += 1;
    }
    query.push_str(&format!("\nORDER BY sng.id\nLIMIT ${next}"));
    query
}

/// Ids of reference rows (genre, person) changed inside the window.
pub fn reference_ids_query(table: &str, has_cursor: bool) -> String {
    let mut query = format!(
        "SELECT id, modified\nFROM content.{table}\nWHERE modified > $1 AND modified <= $2"
    );
    let mut next = 3;
    if has_cursor {
        query.push_str(&format!(" AND id > ${next}"));
        next += 1;
    }
    query.push_str(&format!("\nORDER BY id\nLIMIT ${next}"));
    query
}

/// Distinct film ids linked to any of the given reference ids through a
/// many-to-many join table, keyset-paginated.
pub fn linked_film_ids_query(
    join_table: &str,
    ref_column: &str,
    id_count: usize,
    has_cursor: bool,
) -> Result<String> {
    if id_count == 0 {
        return Err(SyncError::Configuration(format!(
            "membership query for {join_table} built with an empty id set"
        )));
    }

    let mut query = format!(
        "SELECT DISTINCT fw.id\nFROM content.film_work fw\n    JOIN content.{join_table} rfw ON rfw.film_work_id = fw.id\nWHERE rfw.{ref_column} IN ({})",
        placeholders(1, id_count)
    );
    let mut next = id_count + 1;
    if has_cursor {
        query.push_str(&format!(" AND fw.id > ${next}"));
        next += 1;
    }
    query.push_str(&format!("\nORDER BY fw.id\nLIMIT ${next}"));
    Ok(query)
}

/// Full film rows for an explicit id set. The id set itself bounds the
/// result, so no cursor or limit is needed.
pub fn films_by_id_query(id_count: usize) -> Result<String> {
    if id_count == 0 {
        return Err(SyncError::Configuration(
            "full fetch built with an empty id set".to_string(),
        ));
    }

    Ok(format!(
        "{FILM_SELECT}\nWHERE fw.id IN ({})\nGROUP BY fw.id\nORDER BY fw.id",
        placeholders(1, id_count)
    ))
}

/// `$start, $start+1, ..` placeholder list for IN clauses.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_film_range_query_without_cursor() {
        let q = film_range_query(false);
        assert!(q.contains("fw.modified > $1 AND fw.modified <= $2"));
        assert!(!q.contains("fw.id > $"));
        assert!(q.contains("ORDER BY fw.id"));
        assert!(q.ends_with("LIMIT $3"));
        assert!(q.contains("json_agg"));
        assert!(q.contains("'person_role', pfw.role"));
    }

    #[test]
    fn test_film_range_query_with_cursor_shifts_limit() {
        let q = film_range_query(true);
        assert!(q.contains("AND fw.id > $3"));
        assert!(q.ends_with("LIMIT $4"));
    }

    #[test]
    fn test_standalone_query_shape() {
        let q = standalone_range_query("genre", "sng.id, sng.name, sng.description, sng.modified", true);
        assert!(q.contains("FROM content.genre sng"));
        assert!(q.contains("sng.modified > $1 AND sng.modified <= $2"));
        assert!(q.contains("AND sng.id > $3"));
        assert!(q.ends_with("LIMIT $4"));
        assert!(!q.contains("JOIN"));
    }

    #[test]
    fn test_reference_ids_query_shape() {
        let q = reference_ids_query("person", false);
        assert!(q.starts_with("SELECT id, modified"));
        assert!(q.contains("FROM content.person"));
        assert!(q.ends_with("LIMIT $3"));
    }

    #[test]
    fn test_linked_film_ids_query_numbers_placeholders_after_id_set() {
        let q = linked_film_ids_query("genre_film_work", "genre_id", 3, true).unwrap();
        assert!(q.contains("rfw.genre_id IN ($1, $2, $3)"));
        assert!(q.contains("AND fw.id > $4"));
        assert!(q.ends_with("LIMIT $5"));
        assert!(q.contains("JOIN content.genre_film_work rfw"));
    }

    #[test]
    fn test_linked_film_ids_query_without_cursor() {
        let q = linked_film_ids_query("person_film_work", "person_id", 2, false).unwrap();
        assert!(q.contains("rfw.person_id IN ($1, $2)"));
        assert!(q.ends_with("LIMIT $3"));
    }

    #[test]
    fn test_films_by_id_query_has_no_window_or_limit() {
        let q = films_by_id_query(2).unwrap();
        assert!(q.contains("fw.id IN ($1, $2)"));
        assert!(!q.contains("modified >"));
        assert!(!q.contains("LIMIT"));
        assert!(q.contains("GROUP BY fw.id"));
    }

    #[test]
    fn test_empty_id_set_is_rejected() {
        assert!(matches!(
            linked_film_ids_query("genre_film_work", "genre_id", 0, false),
            Err(SyncError::Configuration(_))
        ));
        assert!(matches!(
            films_by_id_query(0),
            Err(SyncError::Configuration(_))
        ));
    }
}
