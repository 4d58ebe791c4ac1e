use deck_harness::cache::{QueryCacheKey, SqliteQueryCache};
use deck_harness::{QueryCache, QueryPayload, Row};
use serde_json::json;
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct ExportRow {
    key_hash: String,
    namespace: String,
    query: String,
    row_count: i64,
    hit_count: i64,
    payload: serde_json::Value,
}

fn rows(n: usize) -> QueryPayload {
    QueryPayload::Rows(
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("region".into(), json!(format!("R{i}")));
                row.insert("revenue".into(), json!(i * 10));
                row
            })
            .collect(),
    )
}

#[tokio::test]
async fn sqlite_cache_put_get_and_export_increments_hit_count() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let cache = SqliteQueryCache::new(&db_path).unwrap();

    let key = QueryCacheKey::new("default", "revenue by region for 2024");
    let payload = rows(3);

    assert!(cache.get(&key).await.unwrap().is_none());
    cache.put(&key, &payload).await.unwrap();

    let hit1 = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(hit1, payload);
    let _ = cache.get(&key).await.unwrap().unwrap();

    let export_path = dir.path().join("export.jsonl");
    let written = cache.export_jsonl(&export_path).await.unwrap();
    assert_eq!(written, 1);

    let raw = std::fs::read_to_string(&export_path).unwrap();
    let row: ExportRow = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert_eq!(row.key_hash, key.key_hash);
    assert_eq!(row.namespace, "default");
    assert_eq!(row.query, "revenue by region for 2024");
    assert_eq!(row.row_count, 3);
    assert_eq!(row.hit_count, 2);
    assert_eq!(row.payload["type"], "rows");
}

#[tokio::test]
async fn put_overwrites_and_text_payloads_survive() {
    let dir = tempdir().unwrap();
    let cache = SqliteQueryCache::new(dir.path().join("cache.sqlite")).unwrap();

    let key = QueryCacheKey::new("default", "summary of churn");
    cache.put(&key, &rows(2)).await.unwrap();
    let text = QueryPayload::Text("Churn fell 3% quarter over quarter.".into());
    cache.put(&key, &text).await.unwrap();

    assert_eq!(cache.get(&key).await.unwrap(), Some(text));
}

#[tokio::test]
async fn namespaces_do_not_share_entries() {
    let dir = tempdir().unwrap();
    let cache = SqliteQueryCache::new(dir.path().join("cache.sqlite")).unwrap();

    let warehouse = QueryCacheKey::new("warehouse", "active users");
    let crm = QueryCacheKey::new("crm", "active users");
    cache.put(&warehouse, &rows(1)).await.unwrap();

    assert!(cache.get(&crm).await.unwrap().is_none());
    assert!(cache.get(&warehouse).await.unwrap().is_some());
}

#[tokio::test]
async fn prune_by_row_limit_keeps_newest() {
    let dir = tempdir().unwrap();
    let cache = SqliteQueryCache::new(dir.path().join("cache.sqlite")).unwrap();

    for i in 0..5 {
        let key = QueryCacheKey::new("default", &format!("query {i}"));
        cache.put(&key, &rows(1)).await.unwrap();
    }

    let stats = cache.prune(None, Some(2)).await.unwrap();
    assert_eq!(stats.deleted, 3);
    assert_eq!(stats.remaining, 2);
}
