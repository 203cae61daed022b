//! Fold distributed-mode readings back into per-service cold-start stats.

use std::collections::{BTreeMap, BTreeSet};

use crate::contract::Reading;
use crate::stats::ColdStartStats;

/// Per-service URL and workload name as last seen in the readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedService {
    pub workload_name: String,
    pub service_url: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidated {
    pub cold_start: BTreeMap<String, ColdStartStats>,
    pub observed: BTreeMap<String, ObservedService>,
}

/// Merge readings in iteration order. The result is independent of the order
/// in which the readings were loaded.
///
/// Every service in `services` gets an entry, even with zero samples, so a
/// service missing from every reading still shows up in the report.
pub fn consolidate_readings(readings: &[Reading], services: &[String]) -> Consolidated {
    let mut ordered: Vec<&Reading> = readings.iter().collect();
    ordered.sort_by(|a, b| {
        a.iteration
            .cmp(&b.iteration)
            .then(a.timestamp.cmp(&b.timestamp))
    });

    let mut names: BTreeSet<&str> = services.iter().map(String::as_str).collect();
    for reading in &ordered {
        names.extend(reading.services.keys().map(String::as_str));
    }

    let mut consolidated = Consolidated::default();
    for name in names {
        let mut samples = Vec::new();
        for reading in &ordered {
            let Some(entry) = reading.services.get(name) else {
                continue;
            };
            samples.push(entry.measurement.clone());
            consolidated.observed.insert(
                name.to_string(),
                ObservedService {
                    workload_name: entry.workload_name.clone(),
                    service_url: entry.service_url.clone(),
                },
            );
        }
        consolidated
            .cold_start
            .insert(name.to_string(), ColdStartStats::from_samples(samples));
    }
    consolidated
}

/// Distinct configuration fingerprints, in first-seen iteration order.
pub fn distinct_fingerprints(readings: &[Reading]) -> Vec<String> {
    let mut ordered: Vec<&Reading> = readings.iter().collect();
    ordered.sort_by_key(|reading| reading.iteration);
    let mut seen = Vec::new();
    for reading in ordered {
        if !seen.contains(&reading.config_fingerprint) {
            seen.push(reading.config_fingerprint.clone());
        }
    }
    seen
}
