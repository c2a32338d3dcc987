//! Rolls per-county metrics up to state and metro level.
//!
//! Three independent passes produce typed rows (state, county, metro) that are
//! concatenated into one table. Summed groups always re-derive their
//! normalized columns from the summed counts and population, so rates stay
//! population-weighted.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::geo::GeoMapping;
use crate::report::RunReport;
use crate::types::{CountyMetrics, Counts, Geography, Metro, MetricRow, Normalized};

/// Running sum for one group.
#[derive(Debug, Default)]
struct Totals {
    population: u64,
    unknown_population: bool,
    counts: Counts,
}

impl Totals {
    fn add(&mut self, population: Option<u64>, counts: Counts) {
        match population {
            Some(p) => self.population += p,
            None => self.unknown_population = true,
        }
        self.counts += counts;
    }

    /// Unknown if any member's population is unknown.
    fn population(&self) -> Option<u64> {
        (!self.unknown_population).then_some(self.population)
    }
}

/// Drops every row whose (date, FIPS) appears more than once.
///
/// Duplicates mean the upstream tables disagree about a county; summing them
/// would double count, so all copies are excluded and reported.
pub fn ensure_unique_counties(
    rows: Vec<CountyMetrics>,
    report: &mut RunReport,
) -> Vec<CountyMetrics> {
    let mut seen: HashMap<(NaiveDate, u32), usize> = HashMap::new();
    for row in &rows {
        *seen.entry((row.date, row.location.fips)).or_default() += 1;
    }

    let before = rows.len();
    let mut flagged: BTreeMap<u32, usize> = BTreeMap::new();
    let unique: Vec<CountyMetrics> = rows
        .into_iter()
        .filter(|row| {
            let dup = seen[&(row.date, row.location.fips)] > 1;
            if dup {
                *flagged.entry(row.location.fips).or_default() += 1;
            }
            !dup
        })
        .collect();

    for (fips, rows) in &flagged {
        warn!(fips, rows, "Duplicate (date, FIPS) rows excluded from aggregation");
    }
    report.duplicate_geo_key += before - unique.len();

    unique
}

fn summed_row(
    date: NaiveDate,
    state: String,
    state_abbreviation: String,
    geography: Geography,
    totals: &Totals,
) -> MetricRow {
    let population = totals.population();
    MetricRow {
        date,
        state,
        state_abbreviation,
        geography,
        population,
        counts: totals.counts,
        normalized: Normalized::from_counts(&totals.counts, population),
    }
}

/// Per-state totals for every date.
pub fn state_pass(rows: &[CountyMetrics]) -> Vec<MetricRow> {
    let mut groups: BTreeMap<(NaiveDate, &str, &str), Totals> = BTreeMap::new();
    for row in rows {
        let key = (
            row.date,
            row.location.state.as_str(),
            row.location.state_abbreviation.as_str(),
        );
        groups
            .entry(key)
            .or_default()
            .add(row.population, row.counts);
    }

    groups
        .into_iter()
        .map(|((date, state, abbr), totals)| {
            summed_row(
                date,
                state.to_string(),
                abbr.to_string(),
                Geography::State,
                &totals,
            )
        })
        .collect()
}

/// One row per county, tagged with its metro when it belongs to a retained one.
///
/// The source's county name is kept; the reference table only contributes
/// the metro. Name disagreements between the two are logged once per county.
pub fn county_pass(rows: &[CountyMetrics], mapping: &GeoMapping) -> Vec<MetricRow> {
    let mut renamed: HashSet<u32> = HashSet::new();
    rows.iter()
        .map(|row| {
            let membership = mapping.membership(row.location.fips);
            if let Some(m) = membership {
                if !reference_name_matches(&m.county, &row.location.county)
                    && renamed.insert(row.location.fips)
                {
                    debug!(
                        fips = row.location.fips,
                        source = %row.location.county,
                        reference = %m.county,
                        "County named differently in geo reference"
                    );
                }
            }
            MetricRow {
                date: row.date,
                state: row.location.state.clone(),
                state_abbreviation: row.location.state_abbreviation.clone(),
                geography: Geography::County {
                    fips: row.location.fips,
                    county: row.location.county.clone(),
                    metro: membership.map(|m| m.metro.clone()),
                },
                population: row.population,
                counts: row.counts,
                normalized: row.normalized,
            }
        })
        .collect()
}

/// The reference spells counties out ("Autauga County"); the sources do not.
fn reference_name_matches(reference: &str, source: &str) -> bool {
    reference == source
        || reference
            .strip_prefix(source)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// Per-(state, metro) totals, built from metro-tagged county rows only.
pub fn metro_pass(counties: &[MetricRow]) -> Vec<MetricRow> {
    let mut groups: BTreeMap<(NaiveDate, &str, &str, &Metro), Totals> = BTreeMap::new();
    for row in counties {
        let Geography::County {
            metro: Some(metro), ..
        } = &row.geography
        else {
            continue;
        };
        let key = (
            row.date,
            row.state.as_str(),
            row.state_abbreviation.as_str(),
            metro,
        );
        groups
            .entry(key)
            .or_default()
            .add(row.population, row.counts);
    }

    groups
        .into_iter()
        .map(|((date, state, abbr, metro), totals)| {
            summed_row(
                date,
                state.to_string(),
                abbr.to_string(),
                Geography::Metro(metro.clone()),
                &totals,
            )
        })
        .collect()
}

/// Runs all three passes and concatenates them.
///
/// Output is ordered by date, then state abbreviation, then geography.
pub fn aggregate(
    rows: Vec<CountyMetrics>,
    mapping: &GeoMapping,
    report: &mut RunReport,
) -> Vec<MetricRow> {
    let rows = ensure_unique_counties(rows, report);

    let states = state_pass(&rows);
    let counties = county_pass(&rows, mapping);
    let metros = metro_pass(&counties);

    report.state_rows = states.len();
    report.county_pass_rows = counties.len();
    report.metro_rows = metros.len();
    info!(
        states = states.len(),
        counties = counties.len(),
        metros = metros.len(),
        "Aggregation passes complete"
    );

    let mut all = Vec::with_capacity(states.len() + counties.len() + metros.len());
    all.extend(states);
    all.extend(counties);
    all.extend(metros);
    all.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.state_abbreviation.cmp(&b.state_abbreviation))
            .then_with(|| a.geography.cmp(&b.geography))
    });
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{ReferenceRow, build_mapping};
    use crate::types::Location;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, d).unwrap()
    }

    fn county(fips: u32, name: &str, population: u64, cases: &[i64]) -> Vec<CountyMetrics> {
        let location = Arc::new(Location {
            fips,
            state: "Alabama".to_string(),
            state_abbreviation: "AL".to_string(),
            county: name.to_string(),
        });
        let mut prev = None;
        cases
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let counts = Counts {
                    cases: *c,
                    new_cases: prev.map(|p| c - p).unwrap_or(0),
                    deaths: 0,
                    new_deaths: 0,
                };
                prev = Some(*c);
                CountyMetrics {
                    date: day(i as u32 + 1),
                    location: location.clone(),
                    population: Some(population),
                    counts,
                    normalized: Normalized::from_counts(&counts, Some(population)),
                }
            })
            .collect()
    }

    fn two_counties() -> Vec<CountyMetrics> {
        let mut rows = county(1001, "A", 100_000, &[10, 20, 35]);
        rows.extend(county(1002, "B", 50_000, &[5, 5, 10]));
        rows
    }

    fn metro_mapping() -> GeoMapping {
        let row = |county: &str, county_code| ReferenceRow {
            metro_id: 77,
            metro_name: "M".to_string(),
            county: county.to_string(),
            state: "Alabama".to_string(),
            state_code: 1,
            county_code,
            population: 1,
        };
        let mut report = RunReport::new();
        build_mapping(&[row("A", 1), row("B", 2)], 4, &mut report)
    }

    #[test]
    fn test_state_pass_sums_and_renormalizes() {
        let states = state_pass(&two_counties());
        assert_eq!(states.len(), 3);

        let day2 = &states[1];
        assert_eq!(day2.geography, Geography::State);
        assert_eq!(day2.population, Some(150_000));
        assert_eq!(day2.counts.new_cases, 10);
        let norm = day2.normalized.unwrap().new_cases;
        assert!((norm - 10.0 / 150_000.0 * 100_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_reference_name_matching() {
        assert!(reference_name_matches("Autauga", "Autauga"));
        assert!(reference_name_matches("Autauga County", "Autauga"));
        assert!(!reference_name_matches("Autaugaville County", "Autauga"));
        assert!(!reference_name_matches("Baldwin County", "Autauga"));
    }

    #[test]
    fn test_county_pass_keeps_source_name() {
        let mut report = RunReport::new();
        let mapping = build_mapping(
            &[ReferenceRow {
                metro_id: 77,
                metro_name: "M".to_string(),
                county: "A County".to_string(),
                state: "Alabama".to_string(),
                state_code: 1,
                county_code: 1,
                population: 1,
            }],
            4,
            &mut report,
        );
        let counties = county_pass(&county(1001, "A", 100, &[1]), &mapping);
        assert_eq!(counties[0].geography.county(), Some("A"));
        assert_eq!(counties[0].geography.metro().map(|m| m.id), Some(77));
    }

    #[test]
    fn test_metro_pass_sums_member_counties() {
        let rows = two_counties();
        let counties = county_pass(&rows, &metro_mapping());
        let metros = metro_pass(&counties);

        assert_eq!(metros.len(), 3);
        assert_eq!(metros[2].counts.cases, 45);
        assert_eq!(
            metros[2].geography,
            Geography::Metro(Metro {
                id: 77,
                name: "M".to_string()
            })
        );

        let a_day3 = counties
            .iter()
            .find(|r| r.geography.fips() == Some(1001) && r.date == day(3))
            .unwrap();
        assert_eq!(a_day3.counts.cases, 35);
        assert_eq!(a_day3.geography.metro().map(|m| m.id), Some(77));
    }

    #[test]
    fn test_unmapped_county_kept_without_metro() {
        let rows = two_counties();
        let counties = county_pass(&rows, &GeoMapping::default());
        assert_eq!(counties.len(), 6);
        assert!(counties.iter().all(|r| r.geography.metro().is_none()));
        assert!(metro_pass(&counties).is_empty());
    }

    #[test]
    fn test_unknown_population_propagates_to_group() {
        let mut rows = two_counties();
        rows[0].population = None;
        rows[0].normalized = None;
        let states = state_pass(&rows);
        assert_eq!(states[0].population, None);
        assert!(states[0].normalized.is_none());
        assert_eq!(states[1].population, Some(150_000));
    }

    #[test]
    fn test_duplicate_keys_excluded_not_double_counted() {
        let mut rows = two_counties();
        rows.push(rows[0].clone());

        let mut report = RunReport::new();
        let all = aggregate(rows, &GeoMapping::default(), &mut report);

        assert_eq!(report.duplicate_geo_key, 2);
        let state_day1 = all
            .iter()
            .find(|r| r.geography == Geography::State && r.date == day(1))
            .unwrap();
        // only county B survives on day 1
        assert_eq!(state_day1.counts.cases, 5);
    }

    #[test]
    fn test_union_order_and_state_consistency() {
        let mut report = RunReport::new();
        let all = aggregate(two_counties(), &metro_mapping(), &mut report);

        // 3 days x (1 state + 2 counties + 1 metro)
        assert_eq!(all.len(), 12);
        assert_eq!(all[0].geography, Geography::State);
        assert!(matches!(all[3].geography, Geography::Metro(_)));
        assert!(all.windows(2).all(|w| w[0].date <= w[1].date));

        for date in [day(1), day(2), day(3)] {
            let county_sum: i64 = all
                .iter()
                .filter(|r| r.date == date && r.geography.fips().is_some())
                .map(|r| r.counts.cases)
                .sum();
            let state = all
                .iter()
                .find(|r| r.date == date && r.geography == Geography::State)
                .unwrap();
            assert_eq!(state.counts.cases, county_sum);
        }
    }
}
