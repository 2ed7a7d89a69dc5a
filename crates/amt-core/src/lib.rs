//! Core domain model and trending computations for the AI model tracker.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "amt-core";

/// Aggregate failure ratio above which a crawl run is reported as failed.
pub const ERROR_RATE_THRESHOLD: f64 = 0.1;

/// Tracked model as persisted in the `models` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub author: Option<String>,
    pub pipeline_tag: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

/// Insert payload for a model sighting. The store stamps `first_seen_at`
/// on first insert and ignores later sightings of the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewModel {
    pub id: String,
    pub name: String,
    pub author: Option<String>,
    pub pipeline_tag: Option<String>,
}

impl NewModel {
    /// Derives `name` and `author` from an `author/name` style id.
    pub fn from_model_id(id: &str, pipeline_tag: Option<String>) -> Self {
        let (author, name) = match id.split_once('/') {
            Some((author, _)) => (
                Some(author.to_string()),
                id.rsplit('/').next().unwrap_or(id).to_string(),
            ),
            None => (None, id.to_string()),
        };
        Self {
            id: id.to_string(),
            name,
            author,
            pipeline_tag,
        }
    }
}

/// Daily observation of a model, unique per `(model_id, snapshot_date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub model_id: String,
    pub snapshot_date: NaiveDate,
    #[serde(rename = "downloads_30d")]
    pub downloads: Option<i64>,
    pub likes: Option<i64>,
    pub pipeline_tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// arXiv paper keyed by its version-less identifier. First insert wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub arxiv_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub submitted_at: DateTime<Utc>,
    pub authors: Vec<String>,
}

/// Leaderboard position of a named model on a given artifact date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub snapshot_date: NaiveDate,
    pub model_name: String,
    pub rank: i32,
    pub elo_score: i64,
}

/// Inclusive calendar window `[today - days, today]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub today: NaiveDate,
    pub days: u32,
}

impl Window {
    pub fn ending(today: NaiveDate, days: u32) -> Self {
        Self { today, days }
    }

    pub fn ending_today(days: u32) -> Self {
        Self::ending(Utc::now().date_naive(), days)
    }

    pub fn start(&self) -> NaiveDate {
        self.today - Duration::days(i64::from(self.days))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start() && date <= self.today
    }

    /// Midnight UTC at the start of the window, for timestamp columns.
    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start().and_time(NaiveTime::MIN).and_utc()
    }
}

/// One ranked row of the trending listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendingModel {
    pub model_id: String,
    pub pipeline_tag: Option<String>,
    pub likes_latest: Option<i64>,
    pub likes_delta: i64,
    pub snapshot_date_from: NaiveDate,
    pub snapshot_date_to: NaiveDate,
}

/// Ranks models by likes gained between their first and last snapshot in
/// `window`.
///
/// Models with fewer than two in-window snapshots are left out. Missing
/// likes count as zero for the subtraction only. When two snapshots of a
/// model share a date, the earliest is the first one in input order and the
/// latest is the last one. The sort is stable, so equal deltas keep the order
/// in which their models first appeared, and `limit` applies after sorting.
pub fn compute_trending<'a, I>(snapshots: I, window: Window, limit: usize) -> Vec<TrendingModel>
where
    I: IntoIterator<Item = &'a ModelSnapshot>,
{
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&ModelSnapshot>> = Vec::new();

    for snap in snapshots {
        if !window.contains(snap.snapshot_date) {
            continue;
        }
        let slot = *index.entry(snap.model_id.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(snap);
    }

    let mut out = groups
        .into_iter()
        .filter(|group| group.len() >= 2)
        .filter_map(|group| {
            let mut earliest = *group.first()?;
            let mut latest = earliest;
            for &snap in &group[1..] {
                if snap.snapshot_date < earliest.snapshot_date {
                    earliest = snap;
                }
                if snap.snapshot_date >= latest.snapshot_date {
                    latest = snap;
                }
            }
            Some(TrendingModel {
                model_id: latest.model_id.clone(),
                pipeline_tag: latest.pipeline_tag.clone(),
                likes_latest: latest.likes,
                likes_delta: latest.likes.unwrap_or(0) - earliest.likes.unwrap_or(0),
                snapshot_date_from: earliest.snapshot_date,
                snapshot_date_to: latest.snapshot_date,
            })
        })
        .collect::<Vec<_>>();

    out.sort_by(|a, b| b.likes_delta.cmp(&a.likes_delta));
    out.truncate(limit);
    out
}

/// Per-run success/failure counters for an ingestion job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestTally {
    pub ok: usize,
    pub errors: usize,
    /// Records without a resolvable identifier; not part of the error rate.
    pub skipped: usize,
}

impl IngestTally {
    pub fn processed(&self) -> usize {
        self.ok + self.errors
    }

    pub fn error_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.errors as f64 / n as f64,
        }
    }

    pub fn exceeds(&self, threshold: f64) -> bool {
        self.processed() > 0 && self.error_rate() > threshold
    }

    pub fn merge(&mut self, other: IngestTally) {
        self.ok += other.ok;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap() + Duration::days(i64::from(n))
    }

    fn snap(model_id: &str, date: NaiveDate, likes: Option<i64>) -> ModelSnapshot {
        ModelSnapshot {
            model_id: model_id.to_string(),
            snapshot_date: date,
            downloads: None,
            likes,
            pipeline_tag: Some("text-generation".into()),
            tags: vec![],
        }
    }

    #[test]
    fn delta_uses_first_and_last_dates_in_window() {
        let rows = vec![snap("A", day(0), Some(10)), snap("A", day(7), Some(25))];
        let out = compute_trending(&rows, Window::ending(day(7), 7), 20);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].model_id, "A");
        assert_eq!(out[0].likes_delta, 15);
        assert_eq!(out[0].likes_latest, Some(25));
        assert_eq!(out[0].snapshot_date_from, day(0));
        assert_eq!(out[0].snapshot_date_to, day(7));
    }

    #[test]
    fn single_snapshot_models_are_excluded() {
        let rows = vec![
            snap("B", day(3), Some(5)),
            snap("C", day(1), Some(1)),
            snap("C", day(4), Some(2)),
        ];
        let out = compute_trending(&rows, Window::ending(day(7), 7), 20);
        assert_eq!(out.iter().map(|t| t.model_id.as_str()).collect::<Vec<_>>(), vec!["C"]);
    }

    #[test]
    fn out_of_window_rows_do_not_count_toward_the_pair() {
        let rows = vec![snap("A", day(0), Some(1)), snap("A", day(10), Some(50))];
        let out = compute_trending(&rows, Window::ending(day(10), 7), 20);
        assert!(out.is_empty());
    }

    #[test]
    fn unordered_input_still_picks_chronological_endpoints() {
        let rows = vec![
            snap("A", day(5), Some(30)),
            snap("A", day(2), Some(10)),
            snap("A", day(3), Some(100)),
        ];
        let out = compute_trending(&rows, Window::ending(day(5), 7), 20);
        assert_eq!(out[0].likes_delta, 20);
        assert_eq!(out[0].snapshot_date_from, day(2));
        assert_eq!(out[0].snapshot_date_to, day(5));
    }

    #[test]
    fn missing_likes_count_as_zero_but_latest_stays_absent() {
        let rows = vec![snap("A", day(1), None), snap("A", day(2), None)];
        let out = compute_trending(&rows, Window::ending(day(2), 7), 20);
        assert_eq!(out[0].likes_delta, 0);
        assert_eq!(out[0].likes_latest, None);

        let rows = vec![snap("B", day(1), None), snap("B", day(2), Some(4))];
        let out = compute_trending(&rows, Window::ending(day(2), 7), 20);
        assert_eq!(out[0].likes_delta, 4);
    }

    #[test]
    fn sorted_descending_with_stable_ties_and_limit_after_sort() {
        let rows = vec![
            snap("low", day(1), Some(0)),
            snap("low", day(2), Some(1)),
            snap("tie-a", day(1), Some(0)),
            snap("tie-a", day(2), Some(5)),
            snap("tie-b", day(1), Some(10)),
            snap("tie-b", day(2), Some(15)),
            snap("high", day(1), Some(0)),
            snap("high", day(2), Some(90)),
        ];
        let out = compute_trending(&rows, Window::ending(day(2), 7), 3);
        let ids = out.iter().map(|t| t.model_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["high", "tie-a", "tie-b"]);
    }

    #[test]
    fn same_date_ties_use_first_as_earliest_and_last_as_latest() {
        let rows = vec![
            snap("A", day(1), Some(3)),
            snap("A", day(1), Some(4)),
            snap("A", day(2), Some(10)),
            snap("A", day(2), Some(12)),
        ];
        let out = compute_trending(&rows, Window::ending(day(2), 7), 20);
        assert_eq!(out[0].likes_delta, 9);
        assert_eq!(out[0].likes_latest, Some(12));
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let window = Window::ending(day(7), 7);
        assert!(window.contains(day(0)));
        assert!(window.contains(day(7)));
        assert!(!window.contains(day(8)));
        assert_eq!(window.start_instant().date_naive(), day(0));
    }

    #[test]
    fn error_rate_gate_trips_only_above_threshold() {
        let failing = IngestTally { ok: 85, errors: 15, skipped: 0 };
        assert!((failing.error_rate() - 0.15).abs() < f64::EPSILON);
        assert!(failing.exceeds(ERROR_RATE_THRESHOLD));

        let passing = IngestTally { ok: 95, errors: 5, skipped: 3 };
        assert!(!passing.exceeds(ERROR_RATE_THRESHOLD));

        let boundary = IngestTally { ok: 9, errors: 1, skipped: 0 };
        assert!(!boundary.exceeds(ERROR_RATE_THRESHOLD));

        let empty = IngestTally { ok: 0, errors: 0, skipped: 7 };
        assert_eq!(empty.error_rate(), 0.0);
        assert!(!empty.exceeds(ERROR_RATE_THRESHOLD));
    }

    #[test]
    fn model_id_splits_into_author_and_name() {
        let m = NewModel::from_model_id("meta-llama/Llama-3-8B", None);
        assert_eq!(m.author.as_deref(), Some("meta-llama"));
        assert_eq!(m.name, "Llama-3-8B");

        let bare = NewModel::from_model_id("gpt2", Some("text-generation".into()));
        assert_eq!(bare.author, None);
        assert_eq!(bare.name, "gpt2");
    }

    #[test]
    fn snapshot_serializes_downloads_under_history_name() {
        let value = serde_json::to_value(snap("A", day(0), Some(1))).unwrap();
        assert!(value.get("downloads_30d").is_some());
        assert!(value.get("downloads").is_none());
    }
}
