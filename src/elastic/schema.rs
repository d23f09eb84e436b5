//! Embedded settings and mappings for the search indices.

use serde_json::{json, Value};

/// Every index this connector maintains, with its creation body.
pub fn index_definitions() -> Vec<(&'static str, Value)> {
    vec![
        ("movies", movies_index()),
        ("genres", genres_index()),
        ("persons", persons_index()),
    ]
}

/// Shared analysis settings: lowercase English/Russian stemming for the
/// text fields of all three indices.
fn settings() -> Value {
    json!({
        "refresh_interval": "1s",
        "analysis": {
            "filter": {
                "english_stop": { "type": "stop", "stopwords": "_english_" },
                "english_stemmer": { "type": "stemmer", "language": "english" },
                "english_possessive_stemmer": { "type": "stemmer", "language": "possessive_english" },
                "russian_stop": { "type": "stop", "stopwords": "_russian_" },
                "russian_stemmer": { "type": "stemmer", "language": "russian" }
            },
            "analyzer": {
                "ru_en": {
                    "tokenizer": "standard",
                    "filter": [
                        "lowercase",
                        "english_stop",
                        "english_stemmer",
                        "english_possessive_stemmer",
                        "russian_stop",
                        "russian_stemmer"
                    ]
                }
            }
        }
    })
}

fn person_field() -> Value {
    json!({
        "type": "nested",
        "dynamic": "strict",
        "properties": {
            "id": { "type": "keyword" },
            "name": { "type": "text", "analyzer": "ru_en" }
        }
    })
}

fn movies_index() -> Value {
    json!({
        "settings": settings(),
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "id": { "type": "keyword" },
                "imdb_rating": { "type": "float" },
                "genres": { "type": "keyword" },
                "title": {
                    "type": "text",
                    "analyzer": "ru_en",
                    "fields": { "raw": { "type": "keyword" } }
                },
                "description": { "type": "text", "analyzer": "ru_en" },
                "actors_names": { "type": "text", "analyzer": "ru_en" },
                "writers_names": { "type": "text", "analyzer": "ru_en" },
                "directors_names": { "type": "text", "analyzer": "ru_en" },
                "actors": person_field(),
                "writers": person_field(),
                "directors": person_field()
            }
        }
    })
}

fn genres_index() -> Value {
    json!({
        "settings": settings(),
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "id": { "type": "keyword" },
                "name": {
                    "type": "text",
                    "analyzer": "ru_en",
                    "fields": { "raw": { "type": "keyword" } }
                },
                "description": { "type": "text", "analyzer": "ru_en" }
            }
        }
    })
}

fn persons_index() -> Value {
    json!({
        "settings": settings(),
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "id": { "type": "keyword" },
                "full_name": { "type": "text", "analyzer": "ru_en" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_synced_index_has_a_definition() {
        let names: Vec<_> = index_definitions().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["movies", "genres", "persons"]);
    }

    #[test]
    fn test_movie_mapping_covers_document_fields() {
        let body = movies_index();
        let props = &body["mappings"]["properties"];
        for field in [
            "id",
            "imdb_rating",
            "genres",
            "title",
            "description",
            "actors_names",
            "writers_names",
            "directors_names",
            "actors",
            "writers",
            "directors",
        ] {
            assert!(!props[field].is_null(), "missing mapping for {field}");
        }
    }

    #[test]
    fn test_role_collections_are_nested_objects() {
        let body = movies_index();
        for field in ["actors", "writers", "directors"] {
            assert_eq!(body["mappings"]["properties"][field]["type"], "nested");
        }
    }
}
