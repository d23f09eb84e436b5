//! Unit tests for the checkpoint crate.

use tempfile::TempDir;

use crate::{CheckpointKey, CheckpointStore, FilesystemStore, MemoryStore};

#[test]
fn test_checkpoint_key_storage_encoding() {
    let key = CheckpointKey::new("film_work", "movies");
    assert_eq!(key.storage_key(), "film_work_movies_last_id");
    assert_eq!(key.to_string(), "film_work_movies_last_id");
}

#[test]
fn test_checkpoint_key_distinguishes_scopes() {
    let for_movies = CheckpointKey::new("genre", "movies");
    let for_genres = CheckpointKey::new("genre", "genres");
    assert_ne!(for_movies.storage_key(), for_genres.storage_key());
}

#[tokio::test]
async fn test_memory_store_get_set_roundtrip() {
    let store = MemoryStore::new();

    assert_eq!(store.get("watermark").await.unwrap(), None);

    store.set("watermark", "2024-01-01T00:00:00Z").await.unwrap();
    assert_eq!(
        store.get("watermark").await.unwrap(),
        Some("2024-01-01T00:00:00Z".to_string())
    );

    store.set("watermark", "2024-02-01T00:00:00Z").await.unwrap();
    assert_eq!(
        store.get("watermark").await.unwrap(),
        Some("2024-02-01T00:00:00Z".to_string())
    );
}

#[tokio::test]
async fn test_memory_store_set_many_clears_and_sets() {
    let store = MemoryStore::new();
    store.set("a", "1").await.unwrap();
    store.set("b", "2").await.unwrap();

    store
        .set_many(&[
            ("a".to_string(), None),
            ("b".to_string(), Some("20".to_string())),
            ("c".to_string(), Some("3".to_string())),
        ])
        .await
        .unwrap();

    assert_eq!(store.get("a").await.unwrap(), None);
    assert_eq!(store.get("b").await.unwrap(), Some("20".to_string()));
    assert_eq!(store.get("c").await.unwrap(), Some("3".to_string()));
}

#[tokio::test]
async fn test_filesystem_store_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path());

    assert_eq!(store.get("missing").await.unwrap(), None);

    store.set("film_work_movies_last_id", "abc").await.unwrap();
    assert_eq!(
        store.get("film_work_movies_last_id").await.unwrap(),
        Some("abc".to_string())
    );
}

#[tokio::test]
async fn test_filesystem_store_survives_reopen() {
    let tmp = TempDir::new().unwrap();

    {
        let store = FilesystemStore::new(tmp.path());
        store.set("watermark", "2024-03-01T12:00:00Z").await.unwrap();
        store.set("genre_movies_last_id", "some-uuid").await.unwrap();
    }

    // A new store over the same directory sees the committed state.
    let reopened = FilesystemStore::new(tmp.path());
    assert_eq!(
        reopened.get("watermark").await.unwrap(),
        Some("2024-03-01T12:00:00Z".to_string())
    );
    assert_eq!(
        reopened.get("genre_movies_last_id").await.unwrap(),
        Some("some-uuid".to_string())
    );
}

#[tokio::test]
async fn test_filesystem_store_set_many_is_read_after_write_consistent() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path());

    store.set("film_work_movies_last_id", "cursor").await.unwrap();
    store.set("genre_movies_last_id", "cursor").await.unwrap();

    // A run commit: advance the watermark, drop every cursor, atomically.
    store
        .set_many(&[
            ("watermark".to_string(), Some("2024-04-01T00:00:00Z".to_string())),
            ("film_work_movies_last_id".to_string(), None),
            ("genre_movies_last_id".to_string(), None),
        ])
        .await
        .unwrap();

    assert_eq!(
        store.get("watermark").await.unwrap(),
        Some("2024-04-01T00:00:00Z".to_string())
    );
    assert_eq!(store.get("film_work_movies_last_id").await.unwrap(), None);
    assert_eq!(store.get("genre_movies_last_id").await.unwrap(), None);
}

#[tokio::test]
async fn test_filesystem_store_creates_directory_lazily() {
    let tmp = TempDir::new().unwrap();
    let nested = tmp.path().join("nested").join("state-dir");

    let store = FilesystemStore::new(&nested);
    // Reading before any write must not fail on the missing directory.
    assert_eq!(store.get("watermark").await.unwrap(), None);

    store.set("watermark", "t0").await.unwrap();
    assert!(nested.join("state.json").exists());
}
