// Recorded payloads pushed through parse + upsert into the in-memory store.

use std::path::{Path, PathBuf};

use amt_adapters::{
    AdapterContext, ArxivAdapter, FetchedPage, HfModelsAdapter, LeaderboardAdapter, Partition,
    SourceAdapter,
};
use amt_storage::{MemoryStore, TrackerStore};
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

fn fixture(source: &str, file: &str) -> FetchedPage {
    let path: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source)
        .join("sample")
        .join(file);
    FetchedPage {
        url: path.display().to_string(),
        body: std::fs::read(&path).expect("read fixture"),
        fetched_at: Utc::now(),
    }
}

fn ctx(day: u32) -> AdapterContext {
    AdapterContext {
        run_id: Uuid::new_v4(),
        snapshot_date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
    }
}

#[tokio::test]
async fn model_rerun_on_same_day_replaces_snapshot_and_keeps_master_row() {
    let adapter = HfModelsAdapter::default();
    let store = MemoryStore::new();
    let page = fixture("hf-models", "models.json");

    for partition in ["text-generation", "text2text-generation"] {
        let parsed = adapter.parse(&page, &Partition::named(partition), &ctx(16)).unwrap();
        for record in &parsed.records {
            adapter.upsert(&store, record).await.unwrap();
        }
    }

    assert_eq!(store.models().await.len(), 3);
    assert_eq!(store.snapshots().await.len(), 3);

    let next_day = adapter
        .parse(&page, &Partition::named("text-generation"), &ctx(17))
        .unwrap();
    for record in &next_day.records {
        adapter.upsert(&store, record).await.unwrap();
    }
    assert_eq!(store.snapshots().await.len(), 6);

    let history = store.model_history("gpt2", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].snapshot_date, NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
}

#[tokio::test]
async fn papers_are_inserted_once() {
    let adapter = ArxivAdapter::default();
    let store = MemoryStore::new();
    let page = fixture("arxiv", "feed.xml");
    let parsed = adapter.parse(&page, &Partition::named("cs.AI"), &ctx(16)).unwrap();
    assert_eq!(parsed.skipped, 1);

    for _ in 0..2 {
        for record in &parsed.records {
            adapter.upsert(&store, record).await.unwrap();
        }
    }
    assert_eq!(store.papers().await.len(), parsed.records.len());
}

#[tokio::test]
async fn imported_artifact_dates_are_not_planned_again() {
    let adapter = LeaderboardAdapter::default();
    let store = MemoryStore::new();
    let listing = fixture("leaderboard", "space.json");
    let space: serde_json::Value = serde_json::from_slice(&listing.body).unwrap();
    let names: Vec<&str> = space["siblings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["rfilename"].as_str().unwrap())
        .collect();
    let available = adapter.dated_artifacts(names);

    let artifact = fixture("leaderboard", "elo_results_20260829.json");
    let partition = available
        .iter()
        .find(|p| p.key == "elo_results_20260829.json")
        .cloned()
        .unwrap();
    let parsed = adapter.parse(&artifact, &partition, &ctx(16)).unwrap();
    for entry in &parsed.records {
        adapter.upsert(&store, entry).await.unwrap();
    }

    let planned = adapter.plan_import(&available, &store).await.unwrap();
    let keys: Vec<&str> = planned.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "elo_results_20261001.json",
            "elo_results_20260915.json",
            "elo_results_20260801.json",
        ]
    );
    assert!(store
        .imported_ranking_dates()
        .await
        .unwrap()
        .contains(&NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()));
}
