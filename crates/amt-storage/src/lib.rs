//! Snapshot store contract, its Postgres/in-memory implementations, and the
//! outbound HTTP fetcher shared by all crawlers.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use amt_core::{Model, ModelSnapshot, NewModel, Paper, RankingEntry, Window};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info_span, Instrument};

pub const CRATE_NAME: &str = "amt-storage";

/// Rows fetched per keyset page when reading a snapshot window.
pub const DEFAULT_WINDOW_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store unavailable: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Filter for a trending read: all snapshots inside `window`, optionally
/// restricted to one pipeline tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotQuery {
    pub window: Window,
    pub pipeline_tag: Option<String>,
}

/// Keyset position: the last `(snapshot_date, model_id)` already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCursor {
    pub snapshot_date: NaiveDate,
    pub model_id: String,
}

impl From<&ModelSnapshot> for SnapshotCursor {
    fn from(snap: &ModelSnapshot) -> Self {
        Self {
            snapshot_date: snap.snapshot_date,
            model_id: snap.model_id.clone(),
        }
    }
}

/// Persistence contract used by the crawlers and the read API.
///
/// Each write encodes its own conflict key: models and papers are
/// insert-if-absent, snapshots and rankings replace the conflicting row.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// `ON CONFLICT (id) DO NOTHING`; existing author/pipeline_tag are kept.
    async fn insert_model_if_absent(&self, model: &NewModel) -> Result<(), StoreError>;

    /// Replaces the row keyed by `(model_id, snapshot_date)`.
    async fn upsert_snapshot(&self, snapshot: &ModelSnapshot) -> Result<(), StoreError>;

    /// `ON CONFLICT (arxiv_id) DO NOTHING`.
    async fn insert_paper_if_absent(&self, paper: &Paper) -> Result<(), StoreError>;

    /// Replaces the row keyed by `(snapshot_date, model_name)`.
    async fn upsert_ranking(&self, entry: &RankingEntry) -> Result<(), StoreError>;

    /// One page of window snapshots ordered by `(snapshot_date, model_id)`,
    /// strictly after `after` when given.
    async fn snapshot_page(
        &self,
        query: &SnapshotQuery,
        after: Option<&SnapshotCursor>,
        page_size: usize,
    ) -> Result<Vec<ModelSnapshot>, StoreError>;

    /// Models first seen at or after `since`, newest first.
    async fn models_first_seen_since(
        &self,
        since: DateTime<Utc>,
        pipeline_tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Model>, StoreError>;

    /// Most recent `limit` snapshots of one model, newest first.
    async fn model_history(
        &self,
        model_id: &str,
        limit: usize,
    ) -> Result<Vec<ModelSnapshot>, StoreError>;

    /// Every distinct ranking date already imported.
    async fn imported_ranking_dates(&self) -> Result<BTreeSet<NaiveDate>, StoreError>;
}

/// Reads every snapshot of the window by following the keyset cursor until a
/// short page comes back, so no entity is dropped by a row cap.
pub async fn collect_window_snapshots(
    store: &dyn TrackerStore,
    query: &SnapshotQuery,
    page_size: usize,
) -> Result<Vec<ModelSnapshot>, StoreError> {
    let page_size = page_size.max(1);
    let mut out = Vec::new();
    let mut cursor: Option<SnapshotCursor> = None;
    loop {
        let page = store.snapshot_page(query, cursor.as_ref(), page_size).await?;
        let exhausted = page.len() < page_size;
        cursor = page.last().map(SnapshotCursor::from);
        out.extend(page);
        if exhausted || cursor.is_none() {
            return Ok(out);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Builds the pool without opening a connection; the first query
    /// connects, and a database outage then surfaces as [`StoreError`].
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn snapshot_from_row(row: &PgRow) -> Result<ModelSnapshot, sqlx::Error> {
    Ok(ModelSnapshot {
        model_id: row.try_get("model_id")?,
        snapshot_date: row.try_get("snapshot_date")?,
        downloads: row.try_get("downloads_30d")?,
        likes: row.try_get("likes")?,
        pipeline_tag: row.try_get("pipeline_tag")?,
        tags: row.try_get("tags")?,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl TrackerStore for PgStore {
    async fn insert_model_if_absent(&self, model: &NewModel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO models (id, name, author, pipeline_tag)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&model.id)
        .bind(&model.name)
        .bind(&model.author)
        .bind(&model.pipeline_tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: &ModelSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO model_snapshots
                   (model_id, snapshot_date, downloads_30d, likes, pipeline_tag, tags)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (model_id, snapshot_date) DO UPDATE
               SET downloads_30d = EXCLUDED.downloads_30d,
                   likes = EXCLUDED.likes,
                   pipeline_tag = EXCLUDED.pipeline_tag,
                   tags = EXCLUDED.tags
            "#,
        )
        .bind(&snapshot.model_id)
        .bind(snapshot.snapshot_date)
        .bind(snapshot.downloads)
        .bind(snapshot.likes)
        .bind(&snapshot.pipeline_tag)
        .bind(&snapshot.tags)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_paper_if_absent(&self, paper: &Paper) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO papers (arxiv_id, title, abstract, submitted_at, authors)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (arxiv_id) DO NOTHING
            "#,
        )
        .bind(&paper.arxiv_id)
        .bind(&paper.title)
        .bind(&paper.abstract_text)
        .bind(paper.submitted_at)
        .bind(&paper.authors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_ranking(&self, entry: &RankingEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO arena_rankings (snapshot_date, model_name, rank, elo_score)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (snapshot_date, model_name) DO UPDATE
               SET rank = EXCLUDED.rank,
                   elo_score = EXCLUDED.elo_score
            "#,
        )
        .bind(entry.snapshot_date)
        .bind(&entry.model_name)
        .bind(entry.rank)
        .bind(entry.elo_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshot_page(
        &self,
        query: &SnapshotQuery,
        after: Option<&SnapshotCursor>,
        page_size: usize,
    ) -> Result<Vec<ModelSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT model_id, snapshot_date, downloads_30d, likes, pipeline_tag, tags
              FROM model_snapshots
             WHERE snapshot_date >= $1
               AND snapshot_date <= $2
               AND ($3::text IS NULL OR pipeline_tag = $3)
               AND ($4::date IS NULL OR (snapshot_date, model_id) > ($4::date, $5::text))
             ORDER BY snapshot_date, model_id
             LIMIT $6
            "#,
        )
        .bind(query.window.start())
        .bind(query.window.today)
        .bind(&query.pipeline_tag)
        .bind(after.map(|c| c.snapshot_date))
        .bind(after.map(|c| c.model_id.as_str()))
        .bind(sql_limit(page_size))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn models_first_seen_since(
        &self,
        since: DateTime<Utc>,
        pipeline_tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Model>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, author, pipeline_tag, first_seen_at
              FROM models
             WHERE first_seen_at >= $1
               AND ($2::text IS NULL OR pipeline_tag = $2)
             ORDER BY first_seen_at DESC, id
             LIMIT $3
            "#,
        )
        .bind(since)
        .bind(pipeline_tag)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Model {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                author: row.try_get("author")?,
                pipeline_tag: row.try_get("pipeline_tag")?,
                first_seen_at: row.try_get("first_seen_at")?,
            });
        }
        Ok(out)
    }

    async fn model_history(
        &self,
        model_id: &str,
        limit: usize,
    ) -> Result<Vec<ModelSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT model_id, snapshot_date, downloads_30d, likes, pipeline_tag, tags
              FROM model_snapshots
             WHERE model_id = $1
             ORDER BY snapshot_date DESC
             LIMIT $2
            "#,
        )
        .bind(model_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn imported_ranking_dates(&self) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT snapshot_date FROM arena_rankings")
            .fetch_all(&self.pool)
            .await?;
        let mut out = BTreeSet::new();
        for row in rows {
            out.insert(row.try_get::<NaiveDate, _>("snapshot_date")?);
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    models: BTreeMap<String, Model>,
    snapshots: BTreeMap<(NaiveDate, String), ModelSnapshot>,
    papers: BTreeMap<String, Paper>,
    rankings: BTreeMap<(NaiveDate, String), RankingEntry>,
    failing_keys: HashSet<String>,
    unavailable: bool,
}

impl MemoryTables {
    fn check_read(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> Result<(), StoreError> {
        self.check_read()?;
        if self.failing_keys.contains(key) {
            return Err(StoreError::Unavailable(format!("injected write failure for {key}")));
        }
        Ok(())
    }
}

/// Process-local store with the same conflict semantics as [`PgStore`].
///
/// Writes whose key was registered with [`MemoryStore::fail_writes_for`] are
/// rejected, which lets tests drive the ingestion error-rate gate.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_writes_for<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tables = self.tables.lock().await;
        tables.failing_keys.extend(keys.into_iter().map(Into::into));
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.lock().await.unavailable = unavailable;
    }

    /// Inserts a model with an explicit first-seen time.
    pub async fn seed_model(&self, model: Model) {
        let mut tables = self.tables.lock().await;
        tables.models.insert(model.id.clone(), model);
    }

    pub async fn models(&self) -> Vec<Model> {
        self.tables.lock().await.models.values().cloned().collect()
    }

    pub async fn snapshots(&self) -> Vec<ModelSnapshot> {
        self.tables.lock().await.snapshots.values().cloned().collect()
    }

    pub async fn papers(&self) -> Vec<Paper> {
        self.tables.lock().await.papers.values().cloned().collect()
    }

    pub async fn rankings(&self) -> Vec<RankingEntry> {
        self.tables.lock().await.rankings.values().cloned().collect()
    }
}

#[async_trait]
impl TrackerStore for MemoryStore {
    async fn insert_model_if_absent(&self, model: &NewModel) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_write(&model.id)?;
        tables.models.entry(model.id.clone()).or_insert_with(|| Model {
            id: model.id.clone(),
            name: model.name.clone(),
            author: model.author.clone(),
            pipeline_tag: model.pipeline_tag.clone(),
            first_seen_at: Utc::now(),
        });
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: &ModelSnapshot) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_write(&snapshot.model_id)?;
        tables.snapshots.insert(
            (snapshot.snapshot_date, snapshot.model_id.clone()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn insert_paper_if_absent(&self, paper: &Paper) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_write(&paper.arxiv_id)?;
        tables
            .papers
            .entry(paper.arxiv_id.clone())
            .or_insert_with(|| paper.clone());
        Ok(())
    }

    async fn upsert_ranking(&self, entry: &RankingEntry) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_write(&entry.model_name)?;
        tables.rankings.insert(
            (entry.snapshot_date, entry.model_name.clone()),
            entry.clone(),
        );
        Ok(())
    }

    async fn snapshot_page(
        &self,
        query: &SnapshotQuery,
        after: Option<&SnapshotCursor>,
        page_size: usize,
    ) -> Result<Vec<ModelSnapshot>, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_read()?;
        Ok(tables
            .snapshots
            .iter()
            .filter(|((date, model_id), _)| match after {
                Some(c) => (*date, model_id.as_str()) > (c.snapshot_date, c.model_id.as_str()),
                None => true,
            })
            .map(|(_, snap)| snap)
            .filter(|snap| query.window.contains(snap.snapshot_date))
            .filter(|snap| match &query.pipeline_tag {
                Some(tag) => snap.pipeline_tag.as_deref() == Some(tag.as_str()),
                None => true,
            })
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn models_first_seen_since(
        &self,
        since: DateTime<Utc>,
        pipeline_tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Model>, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_read()?;
        let mut out = tables
            .models
            .values()
            .filter(|m| m.first_seen_at >= since)
            .filter(|m| pipeline_tag.is_none() || m.pipeline_tag.as_deref() == pipeline_tag)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.first_seen_at.cmp(&a.first_seen_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn model_history(
        &self,
        model_id: &str,
        limit: usize,
    ) -> Result<Vec<ModelSnapshot>, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_read()?;
        Ok(tables
            .snapshots
            .values()
            .rev()
            .filter(|snap| snap.model_id == model_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn imported_ranking_dates(&self) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_read()?;
        Ok(tables.rankings.keys().map(|(date, _)| *date).collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Single-attempt GET client with a fixed per-request timeout. A failed
/// request is returned to the caller as-is; there is no retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, source_id: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = resp.bytes().await?.to_vec();
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

/// Appends url-encoded query parameters to `base`.
pub fn url_with_params(base: &str, params: &[(&str, String)]) -> Result<String, FetchError> {
    reqwest::Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|err| FetchError::InvalidUrl {
            url: base.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap() + ChronoDuration::days(n)
    }

    fn snap(model_id: &str, date: NaiveDate, likes: i64, tag: &str) -> ModelSnapshot {
        ModelSnapshot {
            model_id: model_id.to_string(),
            snapshot_date: date,
            downloads: Some(likes * 10),
            likes: Some(likes),
            pipeline_tag: Some(tag.to_string()),
            tags: vec![tag.to_string()],
        }
    }

    #[tokio::test]
    async fn snapshot_upsert_is_last_write_wins_per_day() {
        let store = MemoryStore::new();
        store.upsert_snapshot(&snap("org/a", day(0), 1, "text-generation")).await.unwrap();
        store.upsert_snapshot(&snap("org/a", day(0), 7, "text-generation")).await.unwrap();

        let rows = store.snapshots().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].likes, Some(7));
    }

    #[tokio::test]
    async fn model_insert_never_overwrites_attributes() {
        let store = MemoryStore::new();
        store
            .insert_model_if_absent(&NewModel::from_model_id("org/a", Some("text-generation".into())))
            .await
            .unwrap();
        store
            .insert_model_if_absent(&NewModel::from_model_id("org/a", Some("text-to-image".into())))
            .await
            .unwrap();

        let models = store.models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].pipeline_tag.as_deref(), Some("text-generation"));
    }

    #[tokio::test]
    async fn paper_insert_keeps_first_version() {
        let store = MemoryStore::new();
        let submitted_at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).single().unwrap();
        let mut paper = Paper {
            arxiv_id: "2605.00001".into(),
            title: "First".into(),
            abstract_text: "a".into(),
            submitted_at,
            authors: vec!["X".into()],
        };
        store.insert_paper_if_absent(&paper).await.unwrap();
        paper.title = "Second".into();
        store.insert_paper_if_absent(&paper).await.unwrap();

        let papers = store.papers().await;
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].title, "First");
    }

    #[tokio::test]
    async fn window_collection_pages_through_every_row() {
        let store = MemoryStore::new();
        for d in 0..5 {
            for m in 0..7 {
                store
                    .upsert_snapshot(&snap(&format!("org/m{m}"), day(d), d * m, "text-generation"))
                    .await
                    .unwrap();
            }
        }
        store.upsert_snapshot(&snap("org/img", day(4), 3, "text-to-image")).await.unwrap();
        store.upsert_snapshot(&snap("org/old", day(-30), 3, "text-generation")).await.unwrap();

        let query = SnapshotQuery {
            window: Window::ending(day(4), 7),
            pipeline_tag: Some("text-generation".into()),
        };
        let all = collect_window_snapshots(&store, &query, 3).await.unwrap();
        assert_eq!(all.len(), 35);
        assert!(all.windows(2).all(|w| {
            (w[0].snapshot_date, &w[0].model_id) < (w[1].snapshot_date, &w[1].model_id)
        }));

        let exact = collect_window_snapshots(&store, &query, 35).await.unwrap();
        assert_eq!(exact.len(), 35);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for d in 0..4 {
            store.upsert_snapshot(&snap("org/a", day(d), d, "text-generation")).await.unwrap();
        }
        store.upsert_snapshot(&snap("org/b", day(9), 1, "text-generation")).await.unwrap();

        let history = store.model_history("org/a", 2).await.unwrap();
        assert_eq!(
            history.iter().map(|s| s.snapshot_date).collect::<Vec<_>>(),
            vec![day(3), day(2)]
        );
        assert!(store.model_history("org/missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_models_filter_by_first_seen_and_tag() {
        let store = MemoryStore::new();
        let at = |d: i64| day(d).and_hms_opt(12, 0, 0).unwrap().and_utc();
        for (id, seen, tag) in [
            ("org/old", at(-20), "text-generation"),
            ("org/mid", at(-3), "text-generation"),
            ("org/new", at(0), "text-generation"),
            ("org/img", at(-1), "text-to-image"),
        ] {
            store
                .seed_model(Model {
                    id: id.into(),
                    name: id.rsplit('/').next().unwrap().into(),
                    author: Some("org".into()),
                    pipeline_tag: Some(tag.into()),
                    first_seen_at: seen,
                })
                .await;
        }

        let since = Window::ending(day(0), 7).start_instant();
        let rows = store
            .models_first_seen_since(since, Some("text-generation"), 10)
            .await
            .unwrap();
        assert_eq!(
            rows.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["org/new", "org/mid"]
        );
        let limited = store.models_first_seen_since(since, None, 1).await.unwrap();
        assert_eq!(limited[0].id, "org/new");
    }

    #[tokio::test]
    async fn injected_failures_surface_as_store_errors() {
        let store = MemoryStore::new();
        store.fail_writes_for(["org/bad"]).await;
        let err = store
            .upsert_snapshot(&snap("org/bad", day(0), 1, "text-generation"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_unavailable(true).await;
        assert!(store.imported_ranking_dates().await.is_err());
    }

    #[test]
    fn params_are_url_encoded() {
        let url = url_with_params(
            "http://export.arxiv.org/api/query",
            &[("search_query", "cat:cs.AI".to_string()), ("start", "0".to_string())],
        )
        .unwrap();
        assert_eq!(url, "http://export.arxiv.org/api/query?search_query=cat%3Acs.AI&start=0");
    }
}
