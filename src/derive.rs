//! Joins the case and death streams and derives deltas and per-capita rates.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::report::RunReport;
use crate::types::{CountyMetrics, Counts, Location, Normalized, Observation};

#[derive(Default)]
struct Series {
    population: Option<u64>,
    values: BTreeMap<NaiveDate, i64>,
}

fn index(observations: Vec<Observation>) -> BTreeMap<Arc<Location>, Series> {
    let mut series: BTreeMap<Arc<Location>, Series> = BTreeMap::new();
    for obs in observations {
        let entry = series.entry(obs.location).or_default();
        if obs.population.is_some() {
            entry.population = obs.population;
        }
        entry.values.insert(obs.date, obs.value);
    }
    series
}

/// Inner-merges cases with deaths on (location, date) and derives metrics.
///
/// Observations present in only one stream are dropped (`unmatched_merge`).
/// Within each location the first merged date has zero deltas; later dates
/// take the difference against the previous merged date. Locations whose
/// population is unknown keep their raw counts but get no normalized values,
/// and each such row counts as an `unknown_population` issue.
pub fn derive_metrics(
    cases: Vec<Observation>,
    deaths: Vec<Observation>,
    report: &mut RunReport,
) -> Vec<CountyMetrics> {
    report.case_observations = cases.len();
    report.death_observations = deaths.len();

    let mut cases = index(cases);
    let deaths = index(deaths);

    let mut rows = Vec::new();

    for (location, death_series) in deaths {
        let Some(case_series) = cases.remove(&location) else {
            report.unmatched_merge += death_series.values.len();
            continue;
        };

        let population = death_series.population.filter(|p| *p > 0);
        let mut previous: Option<(i64, i64)> = None;
        let mut merged = 0usize;

        for (date, &death_count) in &death_series.values {
            let Some(case_count) = case_series.values.get(date).copied() else {
                report.unmatched_merge += 1;
                continue;
            };
            merged += 1;

            let (new_cases, new_deaths) = match previous {
                Some((prev_cases, prev_deaths)) => {
                    (case_count - prev_cases, death_count - prev_deaths)
                }
                None => (0, 0),
            };
            previous = Some((case_count, death_count));

            let counts = Counts {
                cases: case_count,
                new_cases,
                deaths: death_count,
                new_deaths,
            };
            rows.push(CountyMetrics {
                date: *date,
                location: location.clone(),
                population,
                normalized: Normalized::from_counts(&counts, population),
                counts,
            });
        }

        report.unmatched_merge += case_series
            .values
            .keys()
            .filter(|d| !death_series.values.contains_key(*d))
            .count();

        if population.is_none() && merged > 0 {
            warn!(
                fips = location.fips,
                state = %location.state_abbreviation,
                county = %location.county,
                rows = merged,
                "Unknown population, normalized metrics omitted"
            );
            report.unknown_population += merged;
        }
    }

    // whatever is left in `cases` never appeared in the deaths stream
    report.unmatched_merge += cases.values().map(|s| s.values.len()).sum::<usize>();

    report.county_rows = rows.len();
    info!(
        county_rows = rows.len(),
        unmatched = report.unmatched_merge,
        "Metrics derived"
    );

    rows
}
