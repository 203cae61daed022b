//! Durable storage of reports and per-iteration readings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cold_start_bench_core::contract::{BenchmarkResult, Reading};
use cold_start_bench_core::report::RenderedReports;
use cold_start_bench_core::storage_keys::{
    adhoc_object_key, content_type_for, is_reading_key, reading_object_key, readings_prefix,
    results_object_key, RESULTS_JSON, RESULTS_MARKDOWN,
};
use tracing::{info, warn};

use crate::adapters::object_store::{LocalObjectStore, ObjectStore, StoreError};
use crate::adapters::s3_store::S3ObjectStore;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("encoding reading: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decoding {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Where `--gcs-bucket` points: a bucket name (optionally `gs://`-prefixed)
/// or a `file://` directory for local runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketLocation {
    Bucket(String),
    Directory(std::path::PathBuf),
}

impl BucketLocation {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix("file://") {
            return (!path.is_empty()).then(|| Self::Directory(path.into()));
        }
        let name = raw.strip_prefix("gs://").unwrap_or(raw).trim_end_matches('/');
        (!name.is_empty()).then(|| Self::Bucket(name.to_string()))
    }

    /// `timeout` bounds each bucket call; local directories ignore it.
    pub async fn open(&self, timeout: std::time::Duration) -> Arc<dyn ObjectStore> {
        match self {
            Self::Bucket(name) => Arc::new(S3ObjectStore::from_env(name.clone(), timeout).await),
            Self::Directory(path) => Arc::new(LocalObjectStore::new(path.clone())),
        }
    }
}

#[derive(Clone)]
pub struct ResultStore {
    store: Arc<dyn ObjectStore>,
}

impl ResultStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn put(&self, key: &str, body: impl Into<Vec<u8>>) -> Result<(), PersistError> {
        self.store
            .put_object(key, body.into(), content_type_for(key))
            .await?;
        info!(location = %self.store.describe(key), "uploaded");
        Ok(())
    }

    /// Write both report formats under `<YYYY>/<MM>/<DD>/<run-id>/`.
    pub async fn save_results(
        &self,
        result: &BenchmarkResult,
        reports: &RenderedReports,
    ) -> Result<Vec<String>, PersistError> {
        let json_key = results_object_key(result.start_time, &result.run_id, RESULTS_JSON);
        let markdown_key = results_object_key(result.start_time, &result.run_id, RESULTS_MARKDOWN);
        self.put(&json_key, reports.json.as_bytes()).await?;
        self.put(&markdown_key, reports.markdown.as_bytes()).await?;
        Ok(vec![json_key, markdown_key])
    }

    /// Adhoc runs also land under `adhoc/<timestamp>/` for quick browsing.
    pub async fn save_adhoc(
        &self,
        timestamp: DateTime<Utc>,
        reports: &RenderedReports,
    ) -> Result<Vec<String>, PersistError> {
        let json_key = adhoc_object_key(timestamp, RESULTS_JSON);
        let markdown_key = adhoc_object_key(timestamp, RESULTS_MARKDOWN);
        self.put(&json_key, reports.json.as_bytes()).await?;
        self.put(&markdown_key, reports.markdown.as_bytes()).await?;
        Ok(vec![json_key, markdown_key])
    }

    pub async fn save_reading(&self, run_date: &str, reading: &Reading) -> Result<String, PersistError> {
        let key = reading_object_key(run_date, reading.iteration);
        let body = serde_json::to_vec_pretty(reading).map_err(PersistError::Encode)?;
        self.put(&key, body).await?;
        Ok(key)
    }

    /// Every reading under `runs/<date>/`. Objects that are not readings are
    /// ignored; a reading that fails to parse is skipped with a warning so one
    /// corrupt upload does not sink the whole day.
    pub async fn load_all_readings(&self, run_date: &str) -> Result<Vec<Reading>, PersistError> {
        let keys = self.store.list_objects(&readings_prefix(run_date)).await?;
        let mut readings = Vec::with_capacity(keys.len());
        for key in keys.iter().filter(|key| is_reading_key(key)) {
            let body = self.store.get_object(key).await?;
            match serde_json::from_slice::<Reading>(&body) {
                Ok(reading) => readings.push(reading),
                Err(source) => {
                    let error = PersistError::Decode {
                        key: key.clone(),
                        source,
                    };
                    warn!(error = %error, "skipping unreadable reading");
                }
            }
        }
        info!(run_date, count = readings.len(), "loaded readings");
        Ok(readings)
    }

    /// Remove the day's intermediate readings once they are consolidated.
    pub async fn cleanup_run(&self, run_date: &str) -> Result<usize, PersistError> {
        let keys = self.store.list_objects(&readings_prefix(run_date)).await?;
        let mut deleted = 0;
        for key in keys.iter().filter(|key| is_reading_key(key)) {
            self.store.delete_object(key).await?;
            deleted += 1;
        }
        info!(run_date, deleted, "cleaned up readings");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::TimeZone;
    use cold_start_bench_core::config::Config;
    use cold_start_bench_core::contract::{BenchmarkRun, ColdStartMeasurement, ReadingEntry};
    use cold_start_bench_core::report::render_reports;

    use super::*;

    fn summary() -> cold_start_bench_core::config::ConfigSummary {
        Config::from_yaml_str("platform:\n  project_id: demo\nservices:\n  enabled: [go-gin]\n")
            .expect("config")
            .summary()
    }

    fn reading(iteration: u32) -> Reading {
        let timestamp = Utc.with_ymd_and_hms(2026, 10, 18, 6, iteration, 0).single().expect("ts");
        let mut reading = Reading::new("2026-10-18", iteration, timestamp, summary());
        reading.services = BTreeMap::from([(
            "go-gin".to_string(),
            ReadingEntry {
                service_name: "go-gin".to_string(),
                workload_name: "discord-go-gin".to_string(),
                service_url: "https://go-gin.run.app".to_string(),
                measurement: ColdStartMeasurement {
                    timestamp,
                    ttfb: Duration::from_millis(400 + u64::from(iteration)),
                    container_startup: None,
                    status_code: 200,
                    error: None,
                },
            },
        )]);
        reading
    }

    #[test]
    fn bucket_locations_parse() {
        assert_eq!(
            BucketLocation::parse("gs://bench-results/"),
            Some(BucketLocation::Bucket("bench-results".to_string()))
        );
        assert_eq!(
            BucketLocation::parse("bench-results"),
            Some(BucketLocation::Bucket("bench-results".to_string()))
        );
        assert_eq!(
            BucketLocation::parse("file:///tmp/bench"),
            Some(BucketLocation::Directory("/tmp/bench".into()))
        );
        assert_eq!(BucketLocation::parse("  "), None);
        assert_eq!(BucketLocation::parse("gs://"), None);
    }

    #[tokio::test]
    async fn readings_round_trip_and_cleanup_leaves_other_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = Arc::new(LocalObjectStore::new(dir.path()));
        let store = ResultStore::new(local.clone());

        for iteration in [2, 0, 1] {
            store
                .save_reading("2026-10-18", &reading(iteration))
                .await
                .expect("save reading");
        }
        local
            .put_object("runs/2026-10-18/notes.txt", b"keep".to_vec(), "text/plain")
            .await
            .expect("stray object");

        let mut loaded = store.load_all_readings("2026-10-18").await.expect("load");
        loaded.sort_by_key(|reading| reading.iteration);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[1], reading(1));

        assert_eq!(store.cleanup_run("2026-10-18").await.expect("cleanup"), 3);
        assert!(store.load_all_readings("2026-10-18").await.expect("reload").is_empty());
        assert_eq!(
            local.list_objects("runs/").await.expect("list"),
            vec!["runs/2026-10-18/notes.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn corrupt_reading_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = Arc::new(LocalObjectStore::new(dir.path()));
        let store = ResultStore::new(local.clone());
        store.save_reading("2026-10-18", &reading(0)).await.expect("save");
        local
            .put_object("runs/2026-10-18/reading-1.json", b"{not json".to_vec(), "application/json")
            .await
            .expect("corrupt");

        let loaded = store.load_all_readings("2026-10-18").await.expect("load");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn results_land_under_date_partitioned_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResultStore::new(Arc::new(LocalObjectStore::new(dir.path())));
        let started_at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).single().expect("ts");
        let result = BenchmarkResult::new(&BenchmarkRun {
            run_id: "ab12cd34".to_string(),
            started_at,
            config: summary(),
        });
        let reports = render_reports(&result).expect("render");

        let keys = store.save_results(&result, &reports).await.expect("save");
        assert_eq!(
            keys,
            vec![
                "2026/10/18/ab12cd34/results.json".to_string(),
                "2026/10/18/ab12cd34/results.md".to_string(),
            ]
        );
        let markdown = std::fs::read_to_string(dir.path().join("2026/10/18/ab12cd34/results.md"))
            .expect("markdown on disk");
        assert_eq!(markdown, reports.markdown);
    }
}
