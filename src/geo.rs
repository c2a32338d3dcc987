//! County to metro (CBSA) membership, restricted to each state's largest metros.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::SchemaError;
use crate::report::RunReport;
use crate::types::Metro;

const SOURCE_NAME: &str = "geo reference";

const MAX_STATE_CODE: u32 = 99;
const MAX_COUNTY_CODE: u32 = 999;

/// One row of the county-to-metro reference table.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceRow {
    #[serde(rename = "cbsacode")]
    pub metro_id: u32,
    #[serde(rename = "cbsatitle")]
    pub metro_name: String,
    #[serde(rename = "countycountyequivalent")]
    pub county: String,
    #[serde(rename = "statename")]
    pub state: String,
    #[serde(rename = "fipsstatecode")]
    pub state_code: u32,
    #[serde(rename = "fipscountycode")]
    pub county_code: u32,
    pub population: u64,
}

impl ReferenceRow {
    pub fn fips(&self) -> u32 {
        self.state_code * 1000 + self.county_code
    }
}

/// A metro retained for one state, with the population used to rank it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedMetro {
    pub state: String,
    pub metro: Metro,
    pub population: u64,
    pub counties: usize,
}

/// A county's membership in a retained metro, as named by the reference table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetroMembership {
    pub metro: Metro,
    pub county: String,
}

/// FIPS to metro lookup, holding only counties of retained metros.
#[derive(Debug, Default)]
pub struct GeoMapping {
    members: HashMap<u32, MetroMembership>,
    retained: Vec<RankedMetro>,
}

impl GeoMapping {
    pub fn metro_for(&self, fips: u32) -> Option<&Metro> {
        self.members.get(&fips).map(|m| &m.metro)
    }

    pub fn membership(&self, fips: u32) -> Option<&MetroMembership> {
        self.members.get(&fips)
    }

    /// Retained metros grouped by state in input order, most populous first.
    pub fn retained(&self) -> &[RankedMetro] {
        &self.retained
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Reads the reference table.
///
/// # Errors
///
/// Any missing column, unparsable row or out-of-range FIPS code is schema drift.
pub fn read_reference(bytes: &[u8]) -> Result<Vec<ReferenceRow>, SchemaError> {
    let mut rdr = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();

    for result in rdr.deserialize::<ReferenceRow>() {
        let row = result.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            SchemaError::BadReferenceRow {
                source_name: SOURCE_NAME.to_string(),
                line,
                message: e.to_string(),
            }
        })?;
        if row.state_code > MAX_STATE_CODE || row.county_code > MAX_COUNTY_CODE {
            return Err(SchemaError::BadReferenceRow {
                source_name: SOURCE_NAME.to_string(),
                // header is line 1
                line: rows.len() as u64 + 2,
                message: format!(
                    "FIPS codes out of range: state {}, county {}",
                    row.state_code, row.county_code
                ),
            });
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Builds the FIPS to metro mapping, keeping the `top_k` metros per state.
///
/// Metros are ranked within a state by the summed population of their
/// counties in that state. Ties keep the order in which the metros first
/// appear in `rows`. A FIPS listed more than once keeps its first row; the
/// rest are counted as data-quality issues.
pub fn build_mapping(rows: &[ReferenceRow], top_k: usize, report: &mut RunReport) -> GeoMapping {
    let mut seen: HashSet<u32> = HashSet::new();
    let mut unique: Vec<&ReferenceRow> = Vec::with_capacity(rows.len());
    for row in rows {
        let fips = row.fips();
        if !seen.insert(fips) {
            warn!(fips, county = %row.county, metro_id = row.metro_id, "Duplicate FIPS in geo reference");
            report.duplicate_reference_fips += 1;
            continue;
        }
        unique.push(row);
    }

    // (state, metro) totals, in order of first appearance
    let mut order: Vec<(String, Metro)> = Vec::new();
    let mut totals: HashMap<(String, u32), (u64, usize)> = HashMap::new();
    for row in &unique {
        let key = (row.state.clone(), row.metro_id);
        let entry = totals.entry(key).or_insert_with(|| {
            order.push((
                row.state.clone(),
                Metro {
                    id: row.metro_id,
                    name: row.metro_name.clone(),
                },
            ));
            (0, 0)
        });
        entry.0 += row.population;
        entry.1 += 1;
    }

    let mut by_state: Vec<(String, Vec<RankedMetro>)> = Vec::new();
    for (state, metro) in order {
        let (population, counties) = totals[&(state.clone(), metro.id)];
        let ranked = RankedMetro {
            state: state.clone(),
            metro,
            population,
            counties,
        };
        match by_state.iter_mut().find(|(s, _)| *s == state) {
            Some((_, metros)) => metros.push(ranked),
            None => by_state.push((state, vec![ranked])),
        }
    }

    let mut retained = Vec::new();
    for (state, mut metros) in by_state {
        // stable: equal populations keep first-appearance order
        metros.sort_by(|a, b| b.population.cmp(&a.population));
        let dropped = metros.len().saturating_sub(top_k);
        metros.truncate(top_k);
        debug!(state = %state, kept = metros.len(), dropped, "Ranked metros");
        retained.extend(metros);
    }

    let mut members = HashMap::new();
    for row in unique {
        let kept = retained
            .iter()
            .any(|r| r.state == row.state && r.metro.id == row.metro_id);
        if kept {
            members.insert(
                row.fips(),
                MetroMembership {
                    metro: Metro {
                        id: row.metro_id,
                        name: row.metro_name.clone(),
                    },
                    county: row.county.clone(),
                },
            );
        }
    }

    report.retained_metros = retained.len();
    info!(
        metros = retained.len(),
        counties = members.len(),
        top_k,
        "Geo mapping built"
    );

    GeoMapping { members, retained }
}

/// Reads the reference table and builds the mapping in one step.
pub fn load_mapping(
    bytes: &[u8],
    top_k: usize,
    report: &mut RunReport,
) -> Result<GeoMapping, SchemaError> {
    let rows = read_reference(bytes)?;
    Ok(build_mapping(&rows, top_k, report))
}
