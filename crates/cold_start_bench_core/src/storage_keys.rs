use chrono::{DateTime, Utc};

pub const RESULTS_JSON: &str = "results.json";
pub const RESULTS_MARKDOWN: &str = "results.md";
pub const COMPARISON_MARKDOWN: &str = "comparison.md";

const READINGS_ROOT: &str = "runs";
const ADHOC_ROOT: &str = "adhoc";
const READING_FILE_PREFIX: &str = "reading-";

/// `<YYYY>/<MM>/<DD>/<run-id>` for final reports.
pub fn results_prefix(started_at: DateTime<Utc>, run_id: &str) -> String {
    format!("{}/{run_id}", started_at.format("%Y/%m/%d"))
}

pub fn results_object_key(started_at: DateTime<Utc>, run_id: &str, file_name: &str) -> String {
    format!("{}/{file_name}", results_prefix(started_at, run_id))
}

/// `runs/<date>/`; the trailing slash keeps `2026-01-2` from matching `2026-01-22`.
pub fn readings_prefix(run_date: &str) -> String {
    format!("{READINGS_ROOT}/{run_date}/")
}

pub fn reading_object_key(run_date: &str, iteration: u32) -> String {
    format!(
        "{}{READING_FILE_PREFIX}{iteration}.json",
        readings_prefix(run_date)
    )
}

/// Whether `key` names a persisted reading (as opposed to a stray object
/// that happens to live under the same prefix).
pub fn is_reading_key(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .and_then(|name| name.strip_prefix(READING_FILE_PREFIX))
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|iteration| iteration.parse::<u32>().is_ok())
}

/// `adhoc/<YYYY-MM-DDTHH-MM-SSZ>` for single-pass validation runs.
pub fn adhoc_prefix(timestamp: DateTime<Utc>) -> String {
    format!("{ADHOC_ROOT}/{}", timestamp.format("%Y-%m-%dT%H-%M-%SZ"))
}

pub fn adhoc_object_key(timestamp: DateTime<Utc>, file_name: &str) -> String {
    format!("{}/{file_name}", adhoc_prefix(timestamp))
}

/// `YYYY-MM-DD` used to group one day's distributed readings.
pub fn run_date(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("json") => "application/json",
        Some("md") => "text/markdown",
        _ => "text/plain",
    }
}
