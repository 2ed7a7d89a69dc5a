//! Source adapter contract + the three crawl sources: HF Hub models, arXiv
//! listings, and leaderboard artifacts hosted in a HF Space.

use std::collections::BTreeSet;
use std::time::Duration;

use amt_core::{ModelSnapshot, NewModel, Paper, RankingEntry};
use amt_storage::{url_with_params, FetchError, HttpFetcher, StoreError, TrackerStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "amt-adapters";

pub const HF_API_BASE: &str = "https://huggingface.co/api";
pub const HF_PIPELINE_TAGS: &[&str] = &[
    "text-generation",
    "text2text-generation",
    "image-text-to-text",
    "text-to-image",
];
pub const HF_LIMIT_PER_TAG: usize = 200;

pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
pub const ARXIV_CATEGORIES: &[&str] = &["cs.AI", "cs.LG", "cs.CL", "cs.CV", "stat.ML"];
pub const ARXIV_PAPERS_PER_CATEGORY: usize = 100;

pub const LEADERBOARD_SPACE_ID: &str = "lmarena-ai/lmarena-leaderboard";
pub const LEADERBOARD_ARTIFACT_PREFIX: &str = "elo_results_";
pub const LEADERBOARD_ARTIFACT_EXTENSION: &str = "json";
pub const LEADERBOARD_TABLE_PATH: &[&str] = &["text", "full", "leaderboard_table"];
pub const LEADERBOARD_MAX_NEW_ARTIFACTS: usize = 3;

/// Per-run values every adapter sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub snapshot_date: NaiveDate,
}

/// One unit of crawl work: a pipeline tag, an arXiv category, or a dated
/// leaderboard artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub key: String,
    pub snapshot_date: Option<NaiveDate>,
}

impl Partition {
    pub fn named(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            snapshot_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// Normalized records of one partition plus the count of entries that had no
/// usable identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPartition<R> {
    pub records: Vec<R>,
    pub skipped: usize,
}

impl<R> Default for ParsedPartition<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed {source_id} payload: {message}")]
    Malformed {
        source_id: &'static str,
        message: String,
    },
}

impl AdapterError {
    fn malformed(source_id: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            source_id,
            message: message.into(),
        }
    }
}

/// A crawl source: which partitions to visit, how to fetch and normalize one,
/// and how a normalized record lands in the store.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    type Record: Send + Sync;

    fn source_id(&self) -> &'static str;

    /// Pause between partitions to stay inside the source's rate limits.
    fn pause_between_partitions(&self) -> Duration;

    async fn partitions(
        &self,
        http: &HttpFetcher,
        store: &dyn TrackerStore,
    ) -> Result<Vec<Partition>, AdapterError>;

    async fn fetch(&self, http: &HttpFetcher, partition: &Partition) -> Result<FetchedPage, AdapterError>;

    fn parse(
        &self,
        page: &FetchedPage,
        partition: &Partition,
        ctx: &AdapterContext,
    ) -> Result<ParsedPartition<Self::Record>, AdapterError>;

    /// Identifier used in logs for a record.
    fn record_key<'a>(&self, record: &'a Self::Record) -> &'a str;

    async fn upsert(&self, store: &dyn TrackerStore, record: &Self::Record) -> Result<(), StoreError>;
}

async fn fetch_page(http: &HttpFetcher, source_id: &str, url: &str) -> Result<FetchedPage, AdapterError> {
    let resp = http.fetch_bytes(source_id, url).await?;
    Ok(FetchedPage {
        url: resp.final_url,
        body: resp.body,
        fetched_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// HF Hub models

#[derive(Debug, Clone, Deserialize)]
struct HfModelListing {
    #[serde(rename = "modelId")]
    model_id: Option<String>,
    id: Option<String>,
    likes: Option<i64>,
    downloads: Option<i64>,
    pipeline_tag: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Model master row plus the day's snapshot, written together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    pub model: NewModel,
    pub snapshot: ModelSnapshot,
}

#[derive(Debug, Clone)]
pub struct HfModelsAdapter {
    pub api_base: String,
    pub pipeline_tags: Vec<String>,
    pub limit_per_tag: usize,
    pub pause: Duration,
}

impl Default for HfModelsAdapter {
    fn default() -> Self {
        Self {
            api_base: HF_API_BASE.to_string(),
            pipeline_tags: HF_PIPELINE_TAGS.iter().map(ToString::to_string).collect(),
            limit_per_tag: HF_LIMIT_PER_TAG,
            pause: Duration::from_secs(1),
        }
    }
}

impl HfModelsAdapter {
    pub fn listing_url(&self, pipeline_tag: &str) -> Result<String, FetchError> {
        url_with_params(
            &format!("{}/models", self.api_base.trim_end_matches('/')),
            &[
                ("pipeline_tag", pipeline_tag.to_string()),
                ("sort", "likes".to_string()),
                ("direction", "-1".to_string()),
                ("limit", self.limit_per_tag.to_string()),
                ("full", "false".to_string()),
                ("cardData", "false".to_string()),
            ],
        )
    }
}

fn normalize_hf_listing(listing: HfModelListing, snapshot_date: NaiveDate) -> Option<ModelRecord> {
    let id = listing
        .model_id
        .or(listing.id)
        .filter(|id| !id.trim().is_empty())?;
    Some(ModelRecord {
        model: NewModel::from_model_id(&id, listing.pipeline_tag.clone()),
        snapshot: ModelSnapshot {
            model_id: id,
            snapshot_date,
            downloads: listing.downloads,
            likes: Some(listing.likes.unwrap_or(0)),
            pipeline_tag: listing.pipeline_tag,
            tags: listing.tags,
        },
    })
}

#[async_trait]
impl SourceAdapter for HfModelsAdapter {
    type Record = ModelRecord;

    fn source_id(&self) -> &'static str {
        "hf-models"
    }

    fn pause_between_partitions(&self) -> Duration {
        self.pause
    }

    async fn partitions(
        &self,
        _http: &HttpFetcher,
        _store: &dyn TrackerStore,
    ) -> Result<Vec<Partition>, AdapterError> {
        Ok(self.pipeline_tags.iter().map(Partition::named).collect())
    }

    async fn fetch(&self, http: &HttpFetcher, partition: &Partition) -> Result<FetchedPage, AdapterError> {
        let url = self.listing_url(&partition.key)?;
        fetch_page(http, self.source_id(), &url).await
    }

    fn parse(
        &self,
        page: &FetchedPage,
        _partition: &Partition,
        ctx: &AdapterContext,
    ) -> Result<ParsedPartition<ModelRecord>, AdapterError> {
        let listings: Vec<HfModelListing> = serde_json::from_slice(&page.body)
            .map_err(|e| AdapterError::malformed(self.source_id(), e.to_string()))?;
        let mut parsed = ParsedPartition::default();
        for listing in listings {
            match normalize_hf_listing(listing, ctx.snapshot_date) {
                Some(record) => parsed.records.push(record),
                None => parsed.skipped += 1,
            }
        }
        Ok(parsed)
    }

    fn record_key<'a>(&self, record: &'a ModelRecord) -> &'a str {
        &record.model.id
    }

    async fn upsert(&self, store: &dyn TrackerStore, record: &ModelRecord) -> Result<(), StoreError> {
        store.insert_model_if_absent(&record.model).await?;
        store.upsert_snapshot(&record.snapshot).await
    }
}

// ---------------------------------------------------------------------------
// arXiv Atom listings

#[derive(Debug, Clone)]
pub struct ArxivAdapter {
    pub api_url: String,
    pub categories: Vec<String>,
    pub papers_per_category: usize,
    pub pause: Duration,
}

impl Default for ArxivAdapter {
    fn default() -> Self {
        Self {
            api_url: ARXIV_API_URL.to_string(),
            categories: ARXIV_CATEGORIES.iter().map(ToString::to_string).collect(),
            papers_per_category: ARXIV_PAPERS_PER_CATEGORY,
            pause: Duration::from_secs(3),
        }
    }
}

impl ArxivAdapter {
    pub fn query_url(&self, category: &str) -> Result<String, FetchError> {
        url_with_params(
            &self.api_url,
            &[
                ("search_query", format!("cat:{category}")),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
                ("start", "0".to_string()),
                ("max_results", self.papers_per_category.to_string()),
            ],
        )
    }
}

/// `http://arxiv.org/abs/2301.00234v2` -> `2301.00234`.
pub fn arxiv_id_from_url(id_url: &str) -> Option<String> {
    let tail = id_url
        .rsplit_once("/abs/")
        .map(|(_, tail)| tail)
        .unwrap_or(id_url)
        .trim();
    let bare = match tail.rsplit_once('v') {
        Some((head, version))
            if !head.is_empty()
                && !version.is_empty()
                && version.chars().all(|c| c.is_ascii_digit()) =>
        {
            head
        }
        _ => tail,
    };
    if bare.is_empty() {
        None
    } else {
        Some(bare.to_string())
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn selector(source_id: &'static str, css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::malformed(source_id, e.to_string()))
}

fn child_text(entry: ElementRef<'_>, sel: &Selector) -> Option<String> {
    entry
        .select(sel)
        .next()
        .map(|n| collapse_whitespace(&n.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

/// Parses an arXiv Atom feed into papers. Entries without an id or a
/// parseable `published` timestamp are counted as skipped.
pub fn parse_arxiv_feed(xml: &str) -> Result<ParsedPartition<Paper>, AdapterError> {
    const SOURCE: &str = "arxiv";
    let document = Html::parse_document(xml);
    let feed_sel = selector(SOURCE, "feed")?;
    if document.select(&feed_sel).next().is_none() {
        return Err(AdapterError::malformed(SOURCE, "no <feed> element"));
    }

    let entry_sel = selector(SOURCE, "feed > entry")?;
    let id_sel = selector(SOURCE, "entry > id")?;
    let title_sel = selector(SOURCE, "entry > title")?;
    let summary_sel = selector(SOURCE, "entry > summary")?;
    let published_sel = selector(SOURCE, "entry > published")?;
    let author_sel = selector(SOURCE, "entry > author > name")?;

    let mut parsed = ParsedPartition::default();
    for entry in document.select(&entry_sel) {
        let Some(arxiv_id) = child_text(entry, &id_sel).and_then(|url| arxiv_id_from_url(&url)) else {
            parsed.skipped += 1;
            continue;
        };
        let published = child_text(entry, &published_sel);
        let Some(submitted_at) = published
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
        else {
            warn!(
                arxiv_id = %arxiv_id,
                published = published.as_deref().unwrap_or("<missing>"),
                "entry has no usable published timestamp; skipping"
            );
            parsed.skipped += 1;
            continue;
        };
        let authors = entry
            .select(&author_sel)
            .map(|n| collapse_whitespace(&n.text().collect::<String>()))
            .filter(|name| !name.is_empty())
            .collect();
        parsed.records.push(Paper {
            arxiv_id,
            title: child_text(entry, &title_sel).unwrap_or_default(),
            abstract_text: child_text(entry, &summary_sel).unwrap_or_default(),
            submitted_at,
            authors,
        });
    }
    Ok(parsed)
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    type Record = Paper;

    fn source_id(&self) -> &'static str {
        "arxiv"
    }

    fn pause_between_partitions(&self) -> Duration {
        self.pause
    }

    async fn partitions(
        &self,
        _http: &HttpFetcher,
        _store: &dyn TrackerStore,
    ) -> Result<Vec<Partition>, AdapterError> {
        Ok(self.categories.iter().map(Partition::named).collect())
    }

    async fn fetch(&self, http: &HttpFetcher, partition: &Partition) -> Result<FetchedPage, AdapterError> {
        let url = self.query_url(&partition.key)?;
        fetch_page(http, self.source_id(), &url).await
    }

    fn parse(
        &self,
        page: &FetchedPage,
        _partition: &Partition,
        _ctx: &AdapterContext,
    ) -> Result<ParsedPartition<Paper>, AdapterError> {
        let text = std::str::from_utf8(&page.body)
            .map_err(|e| AdapterError::malformed(self.source_id(), e.to_string()))?;
        parse_arxiv_feed(text)
    }

    fn record_key<'a>(&self, record: &'a Paper) -> &'a str {
        &record.arxiv_id
    }

    async fn upsert(&self, store: &dyn TrackerStore, record: &Paper) -> Result<(), StoreError> {
        store.insert_paper_if_absent(record).await
    }
}

// ---------------------------------------------------------------------------
// Leaderboard artifacts

#[derive(Debug, Clone, Deserialize)]
struct SpaceInfo {
    #[serde(default)]
    siblings: Vec<SpaceSibling>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpaceSibling {
    rfilename: String,
}

#[derive(Debug, Clone)]
pub struct LeaderboardAdapter {
    pub api_base: String,
    pub hub_base: String,
    pub space_id: String,
    pub artifact_prefix: String,
    pub artifact_extension: String,
    pub max_new_artifacts: usize,
    pub pause: Duration,
}

impl Default for LeaderboardAdapter {
    fn default() -> Self {
        Self {
            api_base: HF_API_BASE.to_string(),
            hub_base: "https://huggingface.co".to_string(),
            space_id: LEADERBOARD_SPACE_ID.to_string(),
            artifact_prefix: LEADERBOARD_ARTIFACT_PREFIX.to_string(),
            artifact_extension: LEADERBOARD_ARTIFACT_EXTENSION.to_string(),
            max_new_artifacts: LEADERBOARD_MAX_NEW_ARTIFACTS,
            pause: Duration::from_secs(1),
        }
    }
}

impl LeaderboardAdapter {
    /// Extracts the date from `elo_results_YYYYMMDD.<ext>`.
    pub fn artifact_date(&self, filename: &str) -> Option<NaiveDate> {
        let stamp = filename
            .strip_prefix(&self.artifact_prefix)?
            .strip_suffix(&self.artifact_extension)?
            .strip_suffix('.')?;
        if stamp.len() != 8 || !stamp.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
    }

    /// Dated artifacts in ascending date order.
    pub fn dated_artifacts<'a, I>(&self, filenames: I) -> Vec<Partition>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = filenames
            .into_iter()
            .filter_map(|name| {
                self.artifact_date(name).map(|date| Partition {
                    key: name.to_string(),
                    snapshot_date: Some(date),
                })
            })
            .collect::<Vec<_>>();
        out.sort_by_key(|p| p.snapshot_date);
        out
    }

    /// Newest artifacts whose date is not yet imported, capped per run.
    pub fn select_new_artifacts(
        &self,
        available: &[Partition],
        imported: &BTreeSet<NaiveDate>,
    ) -> Vec<Partition> {
        available
            .iter()
            .rev()
            .filter(|p| p.snapshot_date.is_some_and(|d| !imported.contains(&d)))
            .take(self.max_new_artifacts)
            .cloned()
            .collect()
    }

    /// Compares the listed artifacts with the dates already in the store and
    /// returns the ones to import this run.
    pub async fn plan_import(
        &self,
        available: &[Partition],
        store: &dyn TrackerStore,
    ) -> Result<Vec<Partition>, AdapterError> {
        let Some(latest) = available.last() else {
            info!(space = %self.space_id, "no dated leaderboard artifacts found");
            return Ok(Vec::new());
        };
        info!(count = available.len(), latest = %latest.key, "listed leaderboard artifacts");

        let imported = store.imported_ranking_dates().await?;
        info!(imported = imported.len(), "already imported snapshot dates");
        let planned = self.select_new_artifacts(available, &imported);
        if planned.is_empty() {
            info!("no new leaderboard artifacts to import");
        }
        Ok(planned)
    }

    /// Dated artifacts from a Space listing. A non-empty listing where no
    /// file matches the artifact pattern is logged, since the run would
    /// otherwise end as a silent no-op.
    fn listed_artifacts(&self, info: &SpaceInfo) -> Vec<Partition> {
        let available = self.dated_artifacts(info.siblings.iter().map(|s| s.rfilename.as_str()));
        if available.is_empty() && !info.siblings.is_empty() {
            warn!(
                space = %self.space_id,
                files = info.siblings.len(),
                pattern = %format!("{}YYYYMMDD.{}", self.artifact_prefix, self.artifact_extension),
                "space lists files but none match the artifact pattern"
            );
        }
        available
    }

    fn space_info_url(&self) -> String {
        format!("{}/spaces/{}", self.api_base.trim_end_matches('/'), self.space_id)
    }

    fn artifact_url(&self, filename: &str) -> String {
        format!(
            "{}/spaces/{}/resolve/main/{}",
            self.hub_base.trim_end_matches('/'),
            self.space_id,
            filename
        )
    }

    /// Walks the fixed key path down to the ranking table and maps each row
    /// to an entry. Rows without `final_ranking` or `rating` are skipped.
    pub fn parse_artifact(
        &self,
        body: &[u8],
        snapshot_date: NaiveDate,
    ) -> Result<ParsedPartition<RankingEntry>, AdapterError> {
        let source_id = self.source_id();
        let root: JsonValue = serde_json::from_slice(body)
            .map_err(|e| AdapterError::malformed(source_id, e.to_string()))?;
        let mut cur = &root;
        for segment in LEADERBOARD_TABLE_PATH {
            cur = cur.get(*segment).ok_or_else(|| {
                AdapterError::malformed(source_id, format!("missing key `{segment}`"))
            })?;
        }
        let table = cur.as_object().ok_or_else(|| {
            AdapterError::malformed(source_id, "leaderboard table is not an object")
        })?;

        let mut parsed = ParsedPartition::default();
        for (model_name, row) in table {
            let rank = row
                .get("final_ranking")
                .and_then(JsonValue::as_f64)
                .and_then(|r| i32::try_from(r as i64).ok());
            let rating = row.get("rating").and_then(JsonValue::as_f64);
            match (rank, rating) {
                (Some(rank), Some(rating)) if !model_name.is_empty() => {
                    parsed.records.push(RankingEntry {
                        snapshot_date,
                        model_name: model_name.clone(),
                        rank,
                        elo_score: rating as i64,
                    })
                }
                _ => parsed.skipped += 1,
            }
        }
        Ok(parsed)
    }
}

#[async_trait]
impl SourceAdapter for LeaderboardAdapter {
    type Record = RankingEntry;

    fn source_id(&self) -> &'static str {
        "leaderboard"
    }

    fn pause_between_partitions(&self) -> Duration {
        self.pause
    }

    async fn partitions(
        &self,
        http: &HttpFetcher,
        store: &dyn TrackerStore,
    ) -> Result<Vec<Partition>, AdapterError> {
        let page = fetch_page(http, self.source_id(), &self.space_info_url()).await?;
        let info: SpaceInfo = serde_json::from_slice(&page.body)
            .map_err(|e| AdapterError::malformed(self.source_id(), e.to_string()))?;
        let available = self.listed_artifacts(&info);
        self.plan_import(&available, store).await
    }

    async fn fetch(&self, http: &HttpFetcher, partition: &Partition) -> Result<FetchedPage, AdapterError> {
        fetch_page(http, self.source_id(), &self.artifact_url(&partition.key)).await
    }

    fn parse(
        &self,
        page: &FetchedPage,
        partition: &Partition,
        _ctx: &AdapterContext,
    ) -> Result<ParsedPartition<RankingEntry>, AdapterError> {
        let snapshot_date = partition.snapshot_date.ok_or_else(|| {
            AdapterError::malformed(self.source_id(), format!("undated artifact {}", partition.key))
        })?;
        self.parse_artifact(&page.body, snapshot_date)
    }

    fn record_key<'a>(&self, record: &'a RankingEntry) -> &'a str {
        &record.model_name
    }

    async fn upsert(&self, store: &dyn TrackerStore, record: &RankingEntry) -> Result<(), StoreError> {
        store.upsert_ranking(record).await
    }
}
